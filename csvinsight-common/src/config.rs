use crate::CsvInsightError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OrdererKind {
    /// spill-to-disk k-way merge sort, no external programs needed
    #[default]
    Merge,
    /// system `sort` with LC_ALL=C
    Shell,
}

impl std::str::FromStr for OrdererKind {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "merge" => Ok(Self::Merge),
            "shell" => Ok(Self::Shell),
            other => Err(format!("unknown orderer {other:?}, expected merge or shell")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileConfig {
    #[serde(default)]
    pub list_columns: Vec<String>,
    #[serde(default = "default_list_separator")]
    pub list_separator: String,
    #[serde(default = "default_partition_threshold")]
    pub partition_threshold_bytes: u64,
    #[serde(default = "default_partition_rows")]
    pub partition_rows: usize,
    #[serde(default)]
    pub partition_workers: usize, // 0 = available parallelism
    #[serde(default)]
    pub ordering_workers: usize, // 0 = available parallelism
    #[serde(default = "default_most_common")]
    pub most_common: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
    #[serde(default = "default_sort_memory")]
    pub sort_memory_bytes: usize,
    #[serde(default = "default_merge_fan_in")]
    pub merge_fan_in: usize,
    #[serde(default)]
    pub orderer: OrdererKind,
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,
}

fn default_list_separator() -> String {
    ";".into()
}
fn default_partition_threshold() -> u64 {
    268435456 // 256MiB
}
fn default_partition_rows() -> usize {
    100_000
}
fn default_most_common() -> usize {
    20
}
fn default_batch_size() -> usize {
    10_000
}
fn default_queue_depth() -> usize {
    10
}
fn default_sort_memory() -> usize {
    67108864 // 64MiB
}
fn default_merge_fan_in() -> usize {
    64
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            list_columns: Vec::new(),
            list_separator: default_list_separator(),
            partition_threshold_bytes: default_partition_threshold(),
            partition_rows: default_partition_rows(),
            partition_workers: 0,
            ordering_workers: 0,
            most_common: default_most_common(),
            batch_size: default_batch_size(),
            queue_depth: default_queue_depth(),
            sort_memory_bytes: default_sort_memory(),
            merge_fan_in: default_merge_fan_in(),
            orderer: OrdererKind::default(),
            temp_dir: None,
        }
    }
}

impl ProfileConfig {
    pub fn validate(&self) -> crate::Result<()> {
        let positive = [
            ("partition_rows", self.partition_rows),
            ("most_common", self.most_common),
            ("batch_size", self.batch_size),
            ("queue_depth", self.queue_depth),
            ("sort_memory_bytes", self.sort_memory_bytes),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(CsvInsightError::Configuration(format!(
                    "{name} must be greater than zero"
                )));
            }
        }
        if self.merge_fan_in < 2 {
            return Err(CsvInsightError::Configuration(
                "merge_fan_in must be at least 2".into(),
            ));
        }
        if self.list_separator.is_empty() {
            return Err(CsvInsightError::Configuration(
                "list_separator must not be empty".into(),
            ));
        }
        if let Some(dir) = &self.temp_dir {
            if !dir.is_dir() {
                return Err(CsvInsightError::Configuration(format!(
                    "temp_dir {} is not a directory",
                    dir.display()
                )));
            }
        }
        Ok(())
    }

    pub fn partition_workers(&self) -> usize {
        resolve_workers(self.partition_workers)
    }

    pub fn ordering_workers(&self) -> usize {
        resolve_workers(self.ordering_workers)
    }
}

fn resolve_workers(n: usize) -> usize {
    if n > 0 {
        return n;
    }
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialectConfig {
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    #[serde(default = "default_quote")]
    pub quote: char,
    #[serde(default)]
    pub quoting: bool,
    #[serde(default)]
    pub escape: Option<char>,
}

fn default_delimiter() -> char {
    '|'
}
fn default_quote() -> char {
    '"'
}

impl Default for DialectConfig {
    fn default() -> Self {
        Self {
            delimiter: default_delimiter(),
            quote: default_quote(),
            quoting: false,
            escape: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OutputConfig {
    #[serde(default)]
    pub json_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub profiling: ProfileConfig,
    #[serde(default)]
    pub dialect: DialectConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

impl Config {
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("csvinsight")
            .join("config.toml")
    }

    pub fn load() -> crate::Result<Self> {
        let path = if let Ok(env_path) = std::env::var("CSVINSIGHT_CONFIG") {
            PathBuf::from(env_path)
        } else {
            Self::config_path()
        };
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    pub fn load_from(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| CsvInsightError::Serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        ProfileConfig::default().validate().unwrap();
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg: Config = toml::from_str(
            r#"
            [profiling]
            list_columns = ["fave_color"]
            orderer = "shell"

            [dialect]
            delimiter = ","
            "#,
        )
        .unwrap();
        assert_eq!(cfg.profiling.list_columns, vec!["fave_color"]);
        assert_eq!(cfg.profiling.list_separator, ";");
        assert_eq!(cfg.profiling.orderer, OrdererKind::Shell);
        assert_eq!(cfg.profiling.partition_rows, 100_000);
        assert_eq!(cfg.dialect.delimiter, ',');
        assert!(!cfg.dialect.quoting);
    }

    #[test]
    fn zero_sizes_rejected() {
        let cfg = ProfileConfig { batch_size: 0, ..Default::default() };
        assert!(matches!(cfg.validate(), Err(CsvInsightError::Configuration(_))));
        let cfg = ProfileConfig { list_separator: String::new(), ..Default::default() };
        assert!(matches!(cfg.validate(), Err(CsvInsightError::Configuration(_))));
        let cfg = ProfileConfig { merge_fan_in: 1, ..Default::default() };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_workers_means_available_parallelism() {
        let cfg = ProfileConfig::default();
        assert!(cfg.partition_workers() >= 1);
        let cfg = ProfileConfig { ordering_workers: 3, ..Default::default() };
        assert_eq!(cfg.ordering_workers(), 3);
    }
}
