//! Transient per-column storage.
//!
//! Every column stream is a file of length-prefixed values (u32 LE length
//! followed by UTF-8 bytes) inside a [`SpillDir`]. Framed files concatenate
//! byte-wise, which is what the partition merge relies on.

use csvinsight_common::{CsvInsightError, Result};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const IO_BUFFER: usize = 1 << 16;

/// A job- or partition-scoped directory of named byte streams, removed on drop.
#[derive(Debug)]
pub struct SpillDir {
    dir: TempDir,
}

impl SpillDir {
    pub fn new(parent: Option<&Path>, prefix: &str) -> Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(prefix);
        let dir = match parent {
            Some(p) => builder.tempdir_in(p)?,
            None => builder.tempdir()?,
        };
        Ok(Self { dir })
    }

    /// nested scratch space, cleaned up independently of the parent
    pub fn child(&self, prefix: &str) -> Result<Self> {
        Self::new(Some(self.path()), prefix)
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn stream_path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn create(&self, name: &str) -> Result<ColumnSink> {
        ColumnSink::create(self.stream_path(name))
    }
}

/// Append-only writer for one column stream.
#[derive(Debug)]
pub struct ColumnSink {
    path: PathBuf,
    writer: BufWriter<File>,
    values: u64,
}

impl ColumnSink {
    pub fn create(path: PathBuf) -> Result<Self> {
        let file = File::create(&path)?;
        Ok(Self {
            path,
            writer: BufWriter::with_capacity(IO_BUFFER, file),
            values: 0,
        })
    }

    pub fn append(&mut self, value: &str) -> Result<()> {
        write_value(&mut self.writer, value)?;
        self.values += 1;
        Ok(())
    }

    pub fn append_all<'a, I>(&mut self, values: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a str>,
    {
        for v in values {
            self.append(v)?;
        }
        Ok(())
    }

    /// Moves every value of `stream` to the end of this sink and deletes `stream`.
    pub fn absorb(&mut self, stream: ColumnStream) -> Result<()> {
        let mut src = File::open(&stream.path)?;
        io::copy(&mut src, &mut self.writer)?;
        self.values += stream.values;
        stream.remove()
    }

    pub fn finish(mut self) -> Result<ColumnStream> {
        self.writer.flush()?;
        Ok(ColumnStream {
            path: self.path,
            values: self.values,
        })
    }
}

/// A finalized column stream on disk.
#[derive(Debug)]
pub struct ColumnStream {
    path: PathBuf,
    values: u64,
}

impl ColumnStream {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> u64 {
        self.values
    }

    pub fn is_empty(&self) -> bool {
        self.values == 0
    }

    pub fn reader(&self) -> Result<ValueReader<BufReader<File>>> {
        let file = File::open(&self.path)?;
        Ok(ValueReader::new(BufReader::with_capacity(IO_BUFFER, file)))
    }

    pub fn remove(self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

pub fn write_value<W: Write>(w: &mut W, value: &str) -> Result<()> {
    let len = u32::try_from(value.len()).map_err(|_| {
        CsvInsightError::Storage(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("value of {} bytes exceeds the frame limit", value.len()),
        ))
    })?;
    w.write_all(&len.to_le_bytes())?;
    w.write_all(value.as_bytes())?;
    Ok(())
}

/// Decodes length-prefixed values from a byte stream.
pub struct ValueReader<R> {
    inner: R,
}

impl<R: Read> ValueReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    pub fn read_value(&mut self) -> Result<Option<String>> {
        let mut len_buf = [0u8; 4];
        let mut filled = 0;
        while filled < len_buf.len() {
            match self.inner.read(&mut len_buf[filled..]) {
                Ok(0) if filled == 0 => return Ok(None),
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "truncated value header",
                    )
                    .into())
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
        let len = u32::from_le_bytes(len_buf) as usize;
        let mut bytes = vec![0u8; len];
        self.inner.read_exact(&mut bytes)?;
        String::from_utf8(bytes)
            .map(Some)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e).into())
    }
}

impl<R: Read> Iterator for ValueReader<R> {
    type Item = Result<String>;
    fn next(&mut self) -> Option<Self::Item> {
        self.read_value().transpose()
    }
}
