//! Job orchestration: dispatch (optionally over parallel row partitions),
//! merge, order and summarize every column, then aggregate the report.

use crate::dispatch::{batches, column_stream_name, DispatchOutput, DispatchPlan, Row};
use crate::order::{make_orderer, SortedRuns};
use crate::profile::{
    aggregate_histograms, profile_unordered, summarize_sorted, ColumnSummary, RowLengthHistogram,
};
use crate::sink::{ColumnStream, SpillDir};
use csvinsight_common::{CsvInsightError, ProfileConfig, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Init,
    Dispatching,
    Ordering,
    Summarizing,
    Aggregating,
    Done,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnReport {
    pub number: usize, // 1-based
    pub name: String,
    #[serde(flatten)]
    pub summary: ColumnSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    /// input file the report describes, when there is one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    pub header: Vec<String>,
    pub histogram: RowLengthHistogram,
    pub columns: Vec<ColumnReport>,
}

impl Report {
    pub fn new(
        header: Vec<String>,
        histogram: RowLengthHistogram,
        summaries: Vec<ColumnSummary>,
    ) -> Self {
        let columns = header
            .iter()
            .zip(summaries)
            .enumerate()
            .map(|(i, (name, summary))| ColumnReport {
                number: i + 1,
                name: name.clone(),
                summary,
            })
            .collect();
        Self {
            path: None,
            header,
            histogram,
            columns,
        }
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn total_rows(&self) -> u64 {
        self.histogram.total_rows()
    }
}

/// Column streams and histogram of one row partition, deleted on drop.
struct PartitionOutput {
    id: usize,
    dispatch: DispatchOutput,
    _spill: SpillDir,
}

/// Per-job context: frozen config, header, dispatch plan and the job's transient storage.
pub struct ProfileJob<'a> {
    config: &'a ProfileConfig,
    header: Vec<String>,
    plan: DispatchPlan,
    spill: SpillDir,
    state: JobState,
}

impl<'a> ProfileJob<'a> {
    pub fn new(header: Vec<String>, config: &'a ProfileConfig) -> Result<Self> {
        config.validate()?;
        let plan = DispatchPlan::new(&header, config)?;
        let spill = SpillDir::new(config.temp_dir.as_deref(), "csvi-")?;
        debug!(columns = header.len(), spill = %spill.path().display(), "job created");
        Ok(Self {
            config,
            header,
            plan,
            spill,
            state: JobState::Init,
        })
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    fn transition(&mut self, next: JobState) {
        info!(from = ?self.state, to = ?next, "job state");
        self.state = next;
    }

    /// Whether an input of `input_bytes` is split into parallel row partitions.
    pub fn should_partition(&self, input_bytes: Option<u64>) -> bool {
        input_bytes.is_some_and(|b| b > self.config.partition_threshold_bytes)
    }

    pub fn run<I>(mut self, rows: I, input_bytes: Option<u64>) -> Result<Report>
    where
        I: Iterator<Item = Result<Row>> + Send,
    {
        match self.execute(rows, input_bytes) {
            Ok(report) => {
                self.transition(JobState::Done);
                Ok(report)
            }
            Err(e) => {
                error!(state = ?self.state, "job failed: {e}");
                self.transition(JobState::Failed);
                Err(e)
            }
        }
    }

    fn execute<I>(&mut self, rows: I, input_bytes: Option<u64>) -> Result<Report>
    where
        I: Iterator<Item = Result<Row>> + Send,
    {
        self.transition(JobState::Dispatching);
        let dispatched = if self.should_partition(input_bytes) {
            self.dispatch_partitioned(rows)?
        } else {
            self.plan.dispatch(rows, &self.spill)?
        };
        let total_rows = dispatched.histogram.total_rows();
        if total_rows == 0 {
            return Err(CsvInsightError::EmptyInput);
        }
        info!(rows = total_rows, "dispatch finished");

        self.transition(JobState::Ordering);
        let pool = build_pool(self.config.ordering_workers(), "csvi-order")?;
        let orderer = make_orderer(self.config)?;
        let spill = &self.spill;
        let header = &self.header;
        let runs: Vec<SortedRuns> = pool.install(|| {
            dispatched
                .columns
                .into_par_iter()
                .zip(header.par_iter())
                .map(|(stream, name)| orderer.order(name, stream, spill.child("order-")?))
                .collect::<Result<Vec<_>>>()
        })?;

        self.transition(JobState::Summarizing);
        let most_common = self.config.most_common;
        let header = &self.header;
        let summaries: Vec<ColumnSummary> = pool.install(|| {
            runs.into_par_iter()
                .zip(header.par_iter())
                .map(|(runs, name)| summarize_sorted(name, runs.into_values()?, most_common))
                .collect::<Result<Vec<_>>>()
        })?;

        self.transition(JobState::Aggregating);
        Ok(Report::new(
            self.header.clone(),
            dispatched.histogram,
            summaries,
        ))
    }

    fn dispatch_partitioned<I>(&self, rows: I) -> Result<DispatchOutput>
    where
        I: Iterator<Item = Result<Row>> + Send,
    {
        self.dispatch_partitioned_with(rows, |plan, _, rows, spill| {
            plan.dispatch(rows.into_iter().map(Ok), spill)
        })
    }

    /// Runs `dispatch` once per partition on the partition pool.
    fn dispatch_partitioned_with<I, F>(&self, rows: I, dispatch: F) -> Result<DispatchOutput>
    where
        I: Iterator<Item = Result<Row>> + Send,
        F: Fn(&DispatchPlan, usize, Vec<Row>, &SpillDir) -> Result<DispatchOutput> + Sync,
    {
        let workers = self.config.partition_workers();
        info!(workers, rows_per_partition = self.config.partition_rows, "partitioning input");
        let pool = build_pool(workers, "csvi-part")?;
        let plan = &self.plan;
        let spill = &self.spill;
        let dispatch = &dispatch;
        let parts: Vec<PartitionOutput> = pool.install(|| {
            batches(rows, self.config.partition_rows)
                .enumerate()
                .par_bridge()
                .map(|(id, part)| {
                    let part = part?;
                    run_partition(plan, spill, id, part, dispatch)
                        .map_err(|e| e.in_partition(id))
                })
                .collect::<Result<Vec<_>>>()
        })?;
        self.merge_partitions(parts)
    }

    /// Concatenates each column's partition streams and sums the partition histograms.
    fn merge_partitions(&self, mut parts: Vec<PartitionOutput>) -> Result<DispatchOutput> {
        parts.sort_by_key(|p| p.id);
        let histogram = aggregate_histograms(parts.iter().map(|p| &p.dispatch.histogram));
        let width = self.plan.width();
        let mut per_column: Vec<Vec<ColumnStream>> =
            (0..width).map(|_| Vec::with_capacity(parts.len())).collect();
        for part in &mut parts {
            for (column, stream) in part.dispatch.columns.drain(..).enumerate() {
                per_column[column].push(stream);
            }
        }
        let columns = per_column
            .into_iter()
            .enumerate()
            .map(|(column, streams)| {
                let mut sink = self.spill.create(&column_stream_name(column))?;
                for stream in streams {
                    sink.absorb(stream)?;
                }
                sink.finish()
            })
            .collect::<Result<Vec<_>>>()?;
        debug!(partitions = parts.len(), "partitions merged");
        Ok(DispatchOutput { histogram, columns })
    }
}

fn run_partition<F>(
    plan: &DispatchPlan,
    parent: &SpillDir,
    id: usize,
    rows: Vec<Row>,
    dispatch: &F,
) -> Result<PartitionOutput>
where
    F: Fn(&DispatchPlan, usize, Vec<Row>, &SpillDir) -> Result<DispatchOutput>,
{
    let spill = parent.child(&format!("part-{id:05}-"))?;
    let num_rows = rows.len();
    let dispatch = dispatch(plan, id, rows, &spill)?;
    debug!(partition = id, rows = num_rows, "partition dispatched");
    Ok(PartitionOutput {
        id,
        dispatch,
        _spill: spill,
    })
}

fn build_pool(threads: usize, prefix: &'static str) -> Result<rayon::ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(move |i| format!("{prefix}-{i}"))
        .build()
        .map_err(|e| CsvInsightError::Configuration(format!("cannot start {prefix} pool: {e}")))
}

/// Full ordered profile of `rows` under `header`.
pub fn profile_rows<I>(
    header: Vec<String>,
    rows: I,
    input_bytes: Option<u64>,
    config: &ProfileConfig,
) -> Result<Report>
where
    I: Iterator<Item = Result<Row>> + Send,
{
    ProfileJob::new(header, config)?.run(rows, input_bytes)
}

/// Single-pass profile without uniques or most common values.
pub fn profile_rows_unordered<I>(
    header: Vec<String>,
    rows: I,
    config: &ProfileConfig,
) -> Result<Report>
where
    I: IntoIterator<Item = Result<Row>>,
{
    config.validate()?;
    let (histogram, summaries) = profile_unordered(&header, rows, config)?;
    Ok(Report::new(header, histogram, summaries))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn family() -> (Vec<String>, Vec<Result<Row>>) {
        let header = strings(&["name", "age", "fave_color"]);
        let rows = vec![
            Ok(strings(&["Misha", "33", "red;yellow"])),
            Ok(strings(&["Valya", "31", "blue"])),
            Ok(strings(&["Lyosha", "0", ""])),
        ];
        (header, rows)
    }

    #[test]
    fn list_column_example() {
        let (header, rows) = family();
        let cfg = ProfileConfig {
            list_columns: strings(&["fave_color"]),
            ..Default::default()
        };
        let report = profile_rows(header, rows.into_iter(), None, &cfg).unwrap();
        let color = &report.columns[2];
        assert_eq!(color.number, 3);
        assert_eq!(color.name, "fave_color");
        assert_eq!(color.summary.num_values, 4);
        assert_eq!(color.summary.num_fills, 3);
        assert_eq!(color.summary.num_uniques, 4);
        assert_eq!(color.summary.most_common.len(), 4);
        assert!(color.summary.most_common.iter().all(|e| e.frequency == 1));
        assert_eq!(report.total_rows(), 3);
    }

    #[test]
    fn empty_input_is_rejected() {
        let header = strings(&["a", "b"]);
        let err = profile_rows(header, std::iter::empty(), None, &ProfileConfig::default())
            .unwrap_err();
        assert!(matches!(err, CsvInsightError::EmptyInput));
    }

    #[test]
    fn partition_decision_uses_threshold() {
        let cfg = ProfileConfig {
            partition_threshold_bytes: 100,
            ..Default::default()
        };
        let job = ProfileJob::new(strings(&["a"]), &cfg).unwrap();
        assert_eq!(job.state(), JobState::Init);
        assert!(!job.should_partition(None));
        assert!(!job.should_partition(Some(100)));
        assert!(job.should_partition(Some(101)));
    }

    #[test]
    fn partitioned_run_matches_single_run() {
        let header = strings(&["id", "tags", "flag"]);
        let rows: Vec<Row> = (0..257)
            .map(|i| {
                if i % 50 == 49 {
                    strings(&["broken"])
                } else {
                    vec![
                        (i % 13).to_string(),
                        format!("t{};t{}", i % 3, i % 5),
                        if i % 4 == 0 { String::new() } else { "y".into() },
                    ]
                }
            })
            .collect();
        let single_cfg = ProfileConfig {
            list_columns: strings(&["tags"]),
            batch_size: 7,
            ..Default::default()
        };
        let part_cfg = ProfileConfig {
            partition_threshold_bytes: 0,
            partition_rows: 20,
            partition_workers: 3,
            ordering_workers: 2,
            sort_memory_bytes: 256,
            merge_fan_in: 4,
            ..single_cfg.clone()
        };
        let single = profile_rows(
            header.clone(),
            rows.clone().into_iter().map(Ok),
            Some(1),
            &single_cfg,
        )
        .unwrap();
        let parted =
            profile_rows(header, rows.into_iter().map(Ok), Some(1), &part_cfg).unwrap();
        assert_eq!(single.histogram, parted.histogram);
        assert_eq!(single.histogram.get(1), 5);
        assert_eq!(single.total_rows(), 257);
        for (a, b) in single.columns.iter().zip(&parted.columns) {
            assert_eq!(a.summary, b.summary);
        }
    }

    #[test]
    fn partition_source_error_fails_the_job() {
        let header = strings(&["a"]);
        let rows = (0..100).map(|i| {
            if i == 60 {
                Err(CsvInsightError::RowSource("bad row".into()))
            } else {
                Ok(vec![i.to_string()])
            }
        });
        let cfg = ProfileConfig {
            partition_threshold_bytes: 0,
            partition_rows: 10,
            ..Default::default()
        };
        let err = profile_rows(header, rows, Some(1), &cfg).unwrap_err();
        assert!(matches!(err, CsvInsightError::RowSource(_)));
    }

    #[test]
    fn failing_partition_is_wrapped_and_cleaned_up() {
        let scratch = tempfile::tempdir().unwrap();
        let cfg = ProfileConfig {
            temp_dir: Some(scratch.path().to_path_buf()),
            partition_threshold_bytes: 0,
            partition_rows: 10,
            partition_workers: 3,
            ..Default::default()
        };
        let job = ProfileJob::new(strings(&["a"]), &cfg).unwrap();
        let rows = (0..100).map(|i| Ok(vec![i.to_string()]));
        let err = job
            .dispatch_partitioned_with(rows, |plan, id, rows, spill| {
                let out = plan.dispatch(rows.into_iter().map(Ok), spill)?;
                if id == 4 {
                    return Err(CsvInsightError::Storage(std::io::Error::other("disk full")));
                }
                Ok(out)
            })
            .unwrap_err();
        match err {
            CsvInsightError::PartitionWorker { partition, source } => {
                assert_eq!(partition, 4);
                assert!(matches!(*source, CsvInsightError::Storage(_)));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(std::fs::read_dir(job.spill.path()).unwrap().count(), 0);
        drop(job);
        assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
    }

    #[test]
    fn transient_files_are_removed() {
        let scratch = tempfile::tempdir().unwrap();
        let (header, rows) = family();
        let cfg = ProfileConfig {
            temp_dir: Some(scratch.path().to_path_buf()),
            partition_threshold_bytes: 0,
            partition_rows: 1,
            ..Default::default()
        };
        profile_rows(header, rows.into_iter(), Some(10), &cfg).unwrap();
        assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
    }

    #[test]
    fn unordered_report_skips_uniques() {
        let (header, rows) = family();
        let report = profile_rows_unordered(header, rows, &ProfileConfig::default()).unwrap();
        assert_eq!(report.columns.len(), 3);
        assert!(report.columns.iter().all(|c| c.summary.num_uniques == -1));
    }
}
