pub mod config;
pub use config::{Config, DialectConfig, OrdererKind, OutputConfig, ProfileConfig};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CsvInsightError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("input contains a header but no rows")]
    EmptyInput,
    #[error("column {column:?} is not sorted: {current:?} follows {previous:?}")]
    UnsortedInput {
        column: String,
        previous: String,
        current: String,
    },
    #[error("partition {partition} failed: {source}")]
    PartitionWorker {
        partition: usize,
        #[source]
        source: Box<CsvInsightError>,
    },
    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),
    #[error("column {column:?} contains no values")]
    EmptyColumn { column: String },
    #[error("row source error: {0}")]
    RowSource(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl CsvInsightError {
    /// Wraps an error raised inside a partition worker, leaving already-wrapped errors alone.
    pub fn in_partition(self, partition: usize) -> Self {
        match self {
            e @ CsvInsightError::PartitionWorker { .. } => e,
            e => CsvInsightError::PartitionWorker {
                partition,
                source: Box::new(e),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, CsvInsightError>;
