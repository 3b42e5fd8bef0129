use super::topk::{TopK, TopKEntry};
use csvinsight_common::{CsvInsightError, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSummary {
    pub num_values: u64,
    pub num_fills: u64,
    pub fill_rate: f64,
    pub min_len: usize,
    pub max_len: usize,
    pub avg_len: f64,
    pub num_uniques: i64, // -1 when computed without ordering
    pub most_common: Vec<TopKEntry>,
}

/// Count, fill and length statistics over runs of equal values.
#[derive(Debug, Clone)]
pub struct ValueStats {
    num_values: u64,
    num_fills: u64,
    min_len: usize,
    max_len: usize,
    sum_len: u64,
}

impl ValueStats {
    pub fn new() -> Self {
        Self {
            num_values: 0,
            num_fills: 0,
            min_len: usize::MAX,
            max_len: 0,
            sum_len: 0,
        }
    }

    /// Value length is measured in characters.
    pub fn add_run(&mut self, value: &str, run_length: u64) {
        self.num_values += run_length;
        if !value.is_empty() {
            self.num_fills += run_length;
        }
        let len = value.chars().count();
        self.min_len = self.min_len.min(len);
        self.max_len = self.max_len.max(len);
        self.sum_len += len as u64 * run_length;
    }

    pub fn finish(
        self,
        column: &str,
        num_uniques: i64,
        most_common: Vec<TopKEntry>,
    ) -> Result<ColumnSummary> {
        if self.num_values == 0 {
            return Err(CsvInsightError::EmptyColumn {
                column: column.to_owned(),
            });
        }
        let n = self.num_values as f64;
        Ok(ColumnSummary {
            num_values: self.num_values,
            num_fills: self.num_fills,
            fill_rate: 100.0 * self.num_fills as f64 / n,
            min_len: self.min_len,
            max_len: self.max_len,
            avg_len: self.sum_len as f64 / n,
            num_uniques,
            most_common,
        })
    }
}

impl Default for ValueStats {
    fn default() -> Self {
        Self::new()
    }
}

/// The (previous, current) pair that broke ascending order.
pub type OrderViolation = (String, String);

/// Run-length state over an ascending stream: the current value and how often it repeated.
#[derive(Debug, Default)]
pub struct RunState {
    current: Option<(String, u64)>,
}

impl RunState {
    /// Returns the run that `value` terminates, if any.
    pub fn push(
        &mut self,
        value: String,
    ) -> std::result::Result<Option<(String, u64)>, OrderViolation> {
        let run = match self.current.as_mut() {
            Some(run) => run,
            None => {
                self.current = Some((value, 1));
                return Ok(None);
            }
        };
        if run.0 == value {
            run.1 += 1;
            return Ok(None);
        }
        if value < run.0 {
            return Err((run.0.clone(), value));
        }
        Ok(self.current.replace((value, 1)))
    }

    /// The final, still open run.
    pub fn finish(self) -> Option<(String, u64)> {
        self.current
    }
}

/// Streams an ascending column into a [`ColumnSummary`].
pub struct SortedSummarizer {
    column: String,
    runs: RunState,
    stats: ValueStats,
    num_uniques: i64,
    top: TopK,
}

impl SortedSummarizer {
    pub fn new(column: &str, most_common: usize) -> Self {
        Self {
            column: column.to_owned(),
            runs: RunState::default(),
            stats: ValueStats::new(),
            num_uniques: 0,
            top: TopK::new(most_common),
        }
    }

    pub fn push(&mut self, value: String) -> Result<()> {
        match self.runs.push(value) {
            Ok(Some((value, run_length))) => {
                self.emit(&value, run_length);
                Ok(())
            }
            Ok(None) => Ok(()),
            Err((previous, current)) => Err(CsvInsightError::UnsortedInput {
                column: self.column.clone(),
                previous,
                current,
            }),
        }
    }

    fn emit(&mut self, value: &str, run_length: u64) {
        self.num_uniques += 1;
        self.stats.add_run(value, run_length);
        self.top.push(run_length, value);
    }

    pub fn finish(mut self) -> Result<ColumnSummary> {
        if let Some((value, run_length)) = std::mem::take(&mut self.runs).finish() {
            self.emit(&value, run_length);
        }
        let most_common = self.top.into_sorted_list();
        self.stats.finish(&self.column, self.num_uniques, most_common)
    }
}

pub fn summarize_sorted<I>(column: &str, values: I, most_common: usize) -> Result<ColumnSummary>
where
    I: IntoIterator<Item = Result<String>>,
{
    let mut summarizer = SortedSummarizer::new(column, most_common);
    for value in values {
        summarizer.push(value?)?;
    }
    summarizer.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(values: &[&str]) -> Vec<Result<String>> {
        values.iter().map(|v| Ok(v.to_string())).collect()
    }

    #[test]
    fn summarizes_sorted_column() {
        let s = summarize_sorted("c", ok(&["", "1", "2", "2", "3", "3", "3", "aa"]), 20).unwrap();
        assert_eq!(s.num_values, 8);
        assert_eq!(s.num_fills, 7);
        assert!((s.fill_rate - 700.0 / 8.0).abs() < 1e-9);
        assert_eq!(s.num_uniques, 5);
        assert_eq!(s.min_len, 0);
        assert_eq!(s.max_len, 2);
        assert!((s.avg_len - 1.0).abs() < 1e-9);
        let common: Vec<(u64, &str)> = s
            .most_common
            .iter()
            .map(|e| (e.frequency, e.value.as_str()))
            .collect();
        assert_eq!(
            common,
            vec![(3, "3"), (2, "2"), (1, "aa"), (1, "1"), (1, "")]
        );
    }

    #[test]
    fn unsorted_input_names_both_values() {
        let err = summarize_sorted("letters", ok(&["b", "a"]), 20).unwrap_err();
        match err {
            CsvInsightError::UnsortedInput { column, previous, current } => {
                assert_eq!(column, "letters");
                assert_eq!(previous, "b");
                assert_eq!(current, "a");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn final_run_is_emitted() {
        let s = summarize_sorted("c", ok(&["x", "x", "x"]), 5).unwrap();
        assert_eq!(s.num_values, 3);
        assert_eq!(s.num_uniques, 1);
        assert_eq!(s.most_common.len(), 1);
        assert_eq!(s.most_common[0].frequency, 3);
    }

    #[test]
    fn empty_column_is_an_error() {
        let err = summarize_sorted("c", ok(&[]), 5).unwrap_err();
        assert!(matches!(err, CsvInsightError::EmptyColumn { .. }));
    }

    #[test]
    fn fills_plus_empties_equal_values() {
        let s = summarize_sorted("c", ok(&["", "", "", "a", "b", "b"]), 1).unwrap();
        assert_eq!(s.num_fills + 3, s.num_values);
        assert_eq!(s.most_common.len(), 1);
        assert_eq!(s.most_common[0].value, "");
    }

    #[test]
    fn lengths_count_characters() {
        let s = summarize_sorted("c", ok(&["ab", "ñé"]), 5).unwrap();
        assert_eq!(s.min_len, 2);
        assert_eq!(s.max_len, 2);
    }

    #[test]
    fn run_state_emits_on_change() {
        let mut runs = RunState::default();
        let mut emitted = Vec::new();
        for v in ["1", "2", "2", "3", "3", "3"] {
            if let Some(run) = runs.push(v.to_string()).unwrap() {
                emitted.push(run);
            }
        }
        emitted.extend(runs.finish());
        assert_eq!(
            emitted,
            vec![("1".to_string(), 1), ("2".to_string(), 2), ("3".to_string(), 3)]
        );
    }
}
