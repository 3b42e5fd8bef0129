pub mod row_histogram;
pub mod summarize;
pub mod topk;
pub mod unordered;

pub use row_histogram::{aggregate_histograms, RowLengthHistogram};
pub use summarize::{summarize_sorted, ColumnSummary, RunState, SortedSummarizer, ValueStats};
pub use topk::{TopK, TopKEntry};
pub use unordered::{profile_unordered, UnorderedAccumulator};
