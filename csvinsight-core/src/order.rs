//! Ordering of column streams into byte-wise ascending order.
//!
//! Ordering is split in two halves: [`Orderer::order`] eagerly turns a column
//! stream into sorted runs on disk, and [`SortedRuns::into_values`] lazily
//! k-way merges those runs while the summarizer consumes them.

use crate::sink::{ColumnStream, SpillDir, ValueReader};
use csvinsight_common::{CsvInsightError, OrdererKind, ProfileConfig, Result};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::debug;

pub trait Orderer: Send + Sync {
    /// Consumes `stream` (deleting it) and leaves its values as sorted runs in `scratch`.
    fn order(&self, column: &str, stream: ColumnStream, scratch: SpillDir) -> Result<SortedRuns>;
}

pub fn make_orderer(config: &ProfileConfig) -> Result<Box<dyn Orderer>> {
    match config.orderer {
        OrdererKind::Merge => Ok(Box::new(MergeSortOrderer::new(
            config.sort_memory_bytes,
            config.merge_fan_in,
        ))),
        OrdererKind::Shell => Ok(Box::new(ShellSortOrderer::detect()?)),
    }
}

/// Sorted runs of one column, deleted together with their scratch directory.
#[derive(Debug)]
pub struct SortedRuns {
    runs: Vec<PathBuf>,
    values: u64,
    scratch: SpillDir,
}

impl SortedRuns {
    pub fn len(&self) -> u64 {
        self.values
    }

    pub fn is_empty(&self) -> bool {
        self.values == 0
    }

    pub fn num_runs(&self) -> usize {
        self.runs.len()
    }

    pub fn into_values(self) -> Result<SortedValues> {
        let readers = open_runs(&self.runs)?;
        Ok(SortedValues {
            merge: MergeIter::new(readers)?,
            _scratch: self.scratch,
        })
    }
}

type RunReader = ValueReader<BufReader<File>>;

fn open_runs(paths: &[PathBuf]) -> Result<Vec<RunReader>> {
    paths
        .iter()
        .map(|p| Ok(ValueReader::new(BufReader::new(File::open(p)?))))
        .collect()
}

/// Ascending values of a column; owns the run files until dropped.
pub struct SortedValues {
    merge: MergeIter<RunReader>,
    _scratch: SpillDir,
}

impl Iterator for SortedValues {
    type Item = Result<String>;
    fn next(&mut self) -> Option<Self::Item> {
        self.merge.next()
    }
}

/// K-way merge of ascending runs.
pub struct MergeIter<I> {
    runs: Vec<I>,
    // order by value, ties by run index
    heap: BinaryHeap<Reverse<(String, usize)>>,
    failed: bool,
}

impl<I: Iterator<Item = Result<String>>> MergeIter<I> {
    pub fn new(mut runs: Vec<I>) -> Result<Self> {
        let mut heap = BinaryHeap::with_capacity(runs.len());
        for (idx, run) in runs.iter_mut().enumerate() {
            if let Some(value) = run.next().transpose()? {
                heap.push(Reverse((value, idx)));
            }
        }
        Ok(Self {
            runs,
            heap,
            failed: false,
        })
    }
}

impl<I: Iterator<Item = Result<String>>> Iterator for MergeIter<I> {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let Reverse((value, idx)) = self.heap.pop()?;
        match self.runs[idx].next() {
            Some(Ok(next)) => self.heap.push(Reverse((next, idx))),
            Some(Err(e)) => {
                self.failed = true;
                return Some(Err(e));
            }
            None => {}
        }
        Some(Ok(value))
    }
}

/// Self-contained spill-and-merge sort with a bounded in-memory chunk.
#[derive(Debug, Clone)]
pub struct MergeSortOrderer {
    memory_bytes: usize,
    fan_in: usize,
}

impl MergeSortOrderer {
    pub fn new(memory_bytes: usize, fan_in: usize) -> Self {
        Self {
            memory_bytes: memory_bytes.max(1),
            fan_in: fan_in.max(2),
        }
    }

    fn write_run(scratch: &SpillDir, seq: &mut usize, values: &[String]) -> Result<PathBuf> {
        let mut sink = scratch.create(&format!("run-{:05}", *seq))?;
        *seq += 1;
        sink.append_all(values.iter().map(String::as_str))?;
        Ok(sink.finish()?.path().to_path_buf())
    }

    fn merge_pass(
        &self,
        scratch: &SpillDir,
        seq: &mut usize,
        runs: Vec<PathBuf>,
    ) -> Result<Vec<PathBuf>> {
        let mut merged = Vec::with_capacity(runs.len() / self.fan_in + 1);
        for group in runs.chunks(self.fan_in) {
            if group.len() == 1 {
                merged.push(group[0].clone());
                continue;
            }
            let mut sink = scratch.create(&format!("run-{:05}", *seq))?;
            *seq += 1;
            for value in MergeIter::new(open_runs(group)?)? {
                sink.append(&value?)?;
            }
            merged.push(sink.finish()?.path().to_path_buf());
            for path in group {
                std::fs::remove_file(path)?;
            }
        }
        Ok(merged)
    }
}

impl Orderer for MergeSortOrderer {
    fn order(&self, column: &str, stream: ColumnStream, scratch: SpillDir) -> Result<SortedRuns> {
        let values = stream.len();
        let mut runs = Vec::new();
        let mut seq = 0usize;
        let mut chunk: Vec<String> = Vec::new();
        let mut chunk_bytes = 0usize;
        for value in stream.reader()? {
            let value = value?;
            chunk_bytes += value.len() + std::mem::size_of::<String>();
            chunk.push(value);
            if chunk_bytes >= self.memory_bytes {
                chunk.sort_unstable();
                runs.push(Self::write_run(&scratch, &mut seq, &chunk)?);
                chunk.clear();
                chunk_bytes = 0;
            }
        }
        if !chunk.is_empty() {
            chunk.sort_unstable();
            runs.push(Self::write_run(&scratch, &mut seq, &chunk)?);
        }
        drop(chunk);
        stream.remove()?;

        let initial_runs = runs.len();
        while runs.len() > self.fan_in {
            runs = self.merge_pass(&scratch, &mut seq, runs)?;
        }
        debug!(column, values, initial_runs, runs = runs.len(), "column ordered");
        Ok(SortedRuns {
            runs,
            values,
            scratch,
        })
    }
}

/// Delegates sorting to the system `sort` with `LC_ALL=C`.
///
/// Values travel newline-delimited, so a value containing a newline is rejected.
#[derive(Debug, Clone)]
pub struct ShellSortOrderer {
    program: PathBuf,
}

impl ShellSortOrderer {
    pub fn new(program: PathBuf) -> Self {
        Self { program }
    }

    /// Prefers `gsort` (GNU coreutils on macOS) over `sort`.
    pub fn detect() -> Result<Self> {
        find_program(&["gsort", "sort"])
            .map(Self::new)
            .ok_or_else(|| {
                CsvInsightError::Configuration("no sort program found on PATH".into())
            })
    }
}

pub fn find_program(candidates: &[&str]) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    candidates.iter().find_map(|name| {
        std::env::split_paths(&path)
            .map(|dir| dir.join(name))
            .find(|p| p.is_file())
    })
}

fn feed_sort<W: Write>(column: &str, stream: &ColumnStream, stdin: W) -> Result<()> {
    let mut w = BufWriter::new(stdin);
    for value in stream.reader()? {
        let value = value?;
        if value.contains('\n') {
            return Err(CsvInsightError::Configuration(format!(
                "column {column:?} has a value containing a newline; use the merge orderer"
            )));
        }
        w.write_all(value.as_bytes())?;
        w.write_all(b"\n")?;
    }
    w.flush()?;
    Ok(())
}

impl Orderer for ShellSortOrderer {
    fn order(&self, column: &str, stream: ColumnStream, scratch: SpillDir) -> Result<SortedRuns> {
        let mut child = Command::new(&self.program)
            .arg("-T")
            .arg(scratch.path())
            .env("LC_ALL", "C")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| io::Error::other("sort stdin unavailable"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("sort stdout unavailable"))?;

        let run_path = scratch.stream_path("run-00000");
        let (fed, read) = std::thread::scope(|scope| {
            let feeder = scope.spawn(|| feed_sort(column, &stream, stdin));
            let read = copy_lines(stdout, &run_path);
            let fed = feeder
                .join()
                .unwrap_or_else(|_| Err(io::Error::other("sort feeder panicked").into()));
            (fed, read)
        });
        let status = child.wait()?;
        fed?;
        let values = read?;
        if !status.success() {
            let program = self.program.display();
            return Err(io::Error::other(format!("{program} exited with {status}")).into());
        }
        stream.remove()?;
        debug!(column, values, "column ordered by {}", self.program.display());
        Ok(SortedRuns {
            runs: vec![run_path],
            values,
            scratch,
        })
    }
}

fn copy_lines<R: io::Read>(stdout: R, run_path: &Path) -> Result<u64> {
    let mut sink = crate::sink::ColumnSink::create(run_path.to_path_buf())?;
    let mut reader = BufReader::new(stdout);
    let mut line = Vec::new();
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            break;
        }
        if line.last() == Some(&b'\n') {
            line.pop();
        }
        let value = std::str::from_utf8(&line)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        sink.append(value)?;
    }
    Ok(sink.finish()?.len())
}
