//! Row dispatch: explodes list cells and fans atomic values out to one
//! writer thread per column over bounded queues.

use crate::profile::RowLengthHistogram;
use crate::sink::{ColumnSink, ColumnStream, SpillDir};
use csvinsight_common::{CsvInsightError, ProfileConfig, Result};
use std::io;
use std::sync::mpsc::{self, Receiver, SyncSender};
use tracing::{debug, trace};

pub type Row = Vec<String>;

/// How one column position turns a cell into atomic values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extractor {
    Atomic,
    ListSplit(String),
}

impl Extractor {
    /// Splitting "" yields exactly one empty value.
    pub fn extract(&self, cell: String, out: &mut Vec<String>) {
        match self {
            Extractor::Atomic => out.push(cell),
            Extractor::ListSplit(sep) => out.extend(cell.split(sep.as_str()).map(str::to_owned)),
        }
    }
}

pub fn build_extractors(
    header: &[String],
    list_columns: &[String],
    separator: &str,
) -> Result<Vec<Extractor>> {
    if let Some(missing) = list_columns.iter().find(|c| !header.contains(c)) {
        return Err(CsvInsightError::Configuration(format!(
            "list column {missing:?} is not in the header"
        )));
    }
    Ok(header
        .iter()
        .map(|name| {
            if list_columns.contains(name) {
                Extractor::ListSplit(separator.to_owned())
            } else {
                Extractor::Atomic
            }
        })
        .collect())
}

/// Groups a fallible stream into vectors of `size` items. Stops after the first error.
pub struct Batches<I> {
    inner: I,
    size: usize,
    done: bool,
}

pub fn batches<I, T>(inner: I, size: usize) -> Batches<I>
where
    I: Iterator<Item = Result<T>>,
{
    Batches {
        inner,
        size: size.max(1),
        done: false,
    }
}

impl<I, T> Iterator for Batches<I>
where
    I: Iterator<Item = Result<T>>,
{
    type Item = Result<Vec<T>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut batch = Vec::with_capacity(self.size.min(1 << 16));
        while batch.len() < self.size {
            match self.inner.next() {
                Some(Ok(item)) => batch.push(item),
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e));
                }
                None => {
                    self.done = true;
                    break;
                }
            }
        }
        if batch.is_empty() {
            None
        } else {
            Some(Ok(batch))
        }
    }
}

#[derive(Debug)]
pub enum ColumnMessage {
    Batch(Vec<String>),
    End,
}

#[derive(Debug)]
pub struct DispatchOutput {
    pub histogram: RowLengthHistogram,
    pub columns: Vec<ColumnStream>,
}

/// Read-only dispatch settings, built once per job and shared by every partition.
#[derive(Debug, Clone)]
pub struct DispatchPlan {
    extractors: Vec<Extractor>,
    batch_size: usize,
    queue_depth: usize,
}

enum FeedFailure {
    Source(CsvInsightError),
    WriterGone,
}

pub fn column_stream_name(column: usize) -> String {
    format!("{column:04}")
}

impl DispatchPlan {
    pub fn new(header: &[String], config: &ProfileConfig) -> Result<Self> {
        Ok(Self {
            extractors: build_extractors(header, &config.list_columns, &config.list_separator)?,
            batch_size: config.batch_size,
            queue_depth: config.queue_depth,
        })
    }

    pub fn width(&self) -> usize {
        self.extractors.len()
    }

    /// Streams `rows` into one column stream per header position inside `spill`.
    pub fn dispatch<I>(&self, rows: I, spill: &SpillDir) -> Result<DispatchOutput>
    where
        I: Iterator<Item = Result<Row>>,
    {
        let width = self.width();
        std::thread::scope(|scope| -> Result<DispatchOutput> {
            let mut senders = Vec::with_capacity(width);
            let mut handles = Vec::with_capacity(width);
            for column in 0..width {
                let (tx, rx) = mpsc::sync_channel(self.queue_depth);
                let sink = spill.create(&column_stream_name(column))?;
                let handle = std::thread::Builder::new()
                    .name(format!("csvi-writer-{column}"))
                    .spawn_scoped(scope, move || write_column(sink, rx))?;
                senders.push(tx);
                handles.push(handle);
            }

            let fed = self.feed(rows, &senders);
            if fed.is_ok() {
                for tx in &senders {
                    // a failed send means the writer already returned its error
                    let _ = tx.send(ColumnMessage::End);
                }
            }
            drop(senders);

            let mut columns = Vec::with_capacity(width);
            let mut writer_err = None;
            for handle in handles {
                match handle.join() {
                    Ok(Ok(stream)) => columns.push(stream),
                    Ok(Err(e)) => {
                        writer_err.get_or_insert(e);
                    }
                    Err(_) => {
                        writer_err.get_or_insert(CsvInsightError::Storage(io::Error::other(
                            "column writer panicked",
                        )));
                    }
                }
            }

            match fed {
                Ok(histogram) => match writer_err {
                    Some(e) => Err(e),
                    None => Ok(DispatchOutput { histogram, columns }),
                },
                Err(FeedFailure::Source(e)) => Err(e),
                Err(FeedFailure::WriterGone) => Err(writer_err.unwrap_or_else(|| {
                    CsvInsightError::Storage(io::Error::other("column writer stopped early"))
                })),
            }
        })
    }

    fn feed<I>(
        &self,
        rows: I,
        senders: &[SyncSender<ColumnMessage>],
    ) -> std::result::Result<RowLengthHistogram, FeedFailure>
    where
        I: Iterator<Item = Result<Row>>,
    {
        let width = self.width();
        let mut histogram = RowLengthHistogram::new();
        for batch in batches(rows, self.batch_size) {
            let batch = batch.map_err(FeedFailure::Source)?;
            let mut columns: Vec<Vec<String>> =
                (0..width).map(|_| Vec::with_capacity(batch.len())).collect();
            for row in batch {
                histogram.record(row.len());
                if row.len() != width {
                    debug!(
                        row_len = row.len(),
                        header_len = width,
                        "row length does not match header, skipping"
                    );
                    continue;
                }
                for ((cell, extractor), out) in
                    row.into_iter().zip(&self.extractors).zip(columns.iter_mut())
                {
                    extractor.extract(cell, out);
                }
            }
            for (tx, values) in senders.iter().zip(columns) {
                tx.send(ColumnMessage::Batch(values))
                    .map_err(|_| FeedFailure::WriterGone)?;
            }
        }
        Ok(histogram)
    }
}

/// Drains `rx` into `sink` until [`ColumnMessage::End`].
pub fn write_column(mut sink: ColumnSink, rx: Receiver<ColumnMessage>) -> Result<ColumnStream> {
    loop {
        match rx.recv() {
            Ok(ColumnMessage::Batch(values)) => {
                trace!(values = values.len(), "writing batch");
                sink.append_all(values.iter().map(String::as_str))?;
            }
            Ok(ColumnMessage::End) => return sink.finish(),
            Err(_) => {
                return Err(CsvInsightError::Storage(io::Error::new(
                    io::ErrorKind::Interrupted,
                    "dispatcher stopped before end of input",
                )))
            }
        }
    }
}
