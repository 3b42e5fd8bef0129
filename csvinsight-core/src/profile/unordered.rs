//! Single-pass column statistics without ordering.
//!
//! Cheaper than the sorted path but cannot count uniques or most common
//! values: summaries carry `num_uniques = -1` and an empty `most_common`.

use super::row_histogram::RowLengthHistogram;
use super::summarize::{ColumnSummary, ValueStats};
use crate::dispatch::{build_extractors, Row};
use csvinsight_common::{CsvInsightError, ProfileConfig, Result};
use tracing::debug;

#[derive(Debug, Default)]
pub struct UnorderedAccumulator {
    stats: ValueStats,
}

impl UnorderedAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, value: &str) {
        self.stats.add_run(value, 1);
    }

    pub fn extend<'a, I>(&mut self, values: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        for v in values {
            self.add(v);
        }
    }

    pub fn finish(self, column: &str) -> Result<ColumnSummary> {
        self.stats.finish(column, -1, Vec::new())
    }
}

/// Profiles `rows` in one pass, in memory, with the same list-splitting and
/// row-shape rules as the ordered pipeline.
pub fn profile_unordered<I>(
    header: &[String],
    rows: I,
    config: &ProfileConfig,
) -> Result<(RowLengthHistogram, Vec<ColumnSummary>)>
where
    I: IntoIterator<Item = Result<Row>>,
{
    let extractors = build_extractors(header, &config.list_columns, &config.list_separator)?;
    let mut histogram = RowLengthHistogram::new();
    let mut columns: Vec<UnorderedAccumulator> =
        header.iter().map(|_| UnorderedAccumulator::new()).collect();
    let mut values = Vec::new();
    for row in rows {
        let row = row?;
        histogram.record(row.len());
        if row.len() != header.len() {
            debug!(row_len = row.len(), header_len = header.len(), "skipping malformed row");
            continue;
        }
        for ((cell, extractor), acc) in row.into_iter().zip(&extractors).zip(columns.iter_mut()) {
            values.clear();
            extractor.extract(cell, &mut values);
            acc.extend(values.iter().map(String::as_str));
        }
    }
    if histogram.total_rows() == 0 {
        return Err(CsvInsightError::EmptyInput);
    }
    let summaries = columns
        .into_iter()
        .zip(header)
        .map(|(acc, name)| acc.finish(name))
        .collect::<Result<Vec<_>>>()?;
    Ok((histogram, summaries))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn accumulator_matches_sorted_counts() {
        let mut acc = UnorderedAccumulator::new();
        acc.extend(["3", "", "aa", "2", "3", "1", "2", "3"]);
        let s = acc.finish("c").unwrap();
        assert_eq!(s.num_values, 8);
        assert_eq!(s.num_fills, 7);
        assert_eq!(s.min_len, 0);
        assert_eq!(s.max_len, 2);
        assert!((s.avg_len - 1.0).abs() < 1e-9);
        assert_eq!(s.num_uniques, -1);
        assert!(s.most_common.is_empty());
    }

    #[test]
    fn profiles_rows_with_list_column() {
        let header = strings(&["name", "age", "fave_color"]);
        let rows = vec![
            Ok(strings(&["Misha", "33", "red;yellow"])),
            Ok(strings(&["Valya", "31", "blue"])),
            Ok(strings(&["Lyosha", "0", ""])),
            Ok(strings(&["short", "row"])),
        ];
        let cfg = ProfileConfig {
            list_columns: strings(&["fave_color"]),
            ..Default::default()
        };
        let (histogram, summaries) = profile_unordered(&header, rows, &cfg).unwrap();
        assert_eq!(histogram.get(3), 3);
        assert_eq!(histogram.get(2), 1);
        assert_eq!(summaries[0].num_values, 3);
        assert_eq!(summaries[2].num_values, 4);
        assert_eq!(summaries[2].num_fills, 3);
    }

    #[test]
    fn no_rows_is_empty_input() {
        let header = strings(&["a"]);
        let rows = Vec::<Result<Row>>::new();
        let err = profile_unordered(&header, rows, &ProfileConfig::default()).unwrap_err();
        assert!(matches!(err, CsvInsightError::EmptyInput));
    }
}
