pub mod dispatch;
pub mod export;
pub mod order;
pub mod partition;
pub mod profile;
pub mod sink;
pub mod source;

pub use csvinsight_common::{CsvInsightError, Result};
pub use dispatch::{build_extractors, DispatchOutput, DispatchPlan, Extractor, Row};
pub use export::{export_json, print_report};
pub use order::{make_orderer, MergeSortOrderer, Orderer, ShellSortOrderer, SortedRuns};
pub use partition::{
    profile_rows, profile_rows_unordered, ColumnReport, JobState, ProfileJob, Report,
};
pub use profile::{
    aggregate_histograms, summarize_sorted, ColumnSummary, RowLengthHistogram, TopK, TopKEntry,
};
pub use sink::{ColumnSink, ColumnStream, SpillDir};
pub use source::{open_delimited, read_delimited, DelimitedRows, DelimitedSource};
