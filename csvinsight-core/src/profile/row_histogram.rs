use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Row length -> number of rows with that many cells.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RowLengthHistogram {
    counts: BTreeMap<usize, u64>,
}

impl RowLengthHistogram {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, row_len: usize) {
        *self.counts.entry(row_len).or_insert(0) += 1;
    }

    pub fn merge(&mut self, other: &RowLengthHistogram) {
        for (&len, &count) in &other.counts {
            *self.counts.entry(len).or_insert(0) += count;
        }
    }

    pub fn get(&self, row_len: usize) -> u64 {
        self.counts.get(&row_len).copied().unwrap_or(0)
    }

    /// total rows seen, well-formed and malformed
    pub fn total_rows(&self) -> u64 {
        self.counts.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, u64)> + '_ {
        self.counts.iter().map(|(&len, &count)| (len, count))
    }

    /// entries sorted by descending row count, ties by ascending length
    pub fn by_frequency(&self) -> Vec<(usize, u64)> {
        let mut entries: Vec<(usize, u64)> = self.iter().collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        entries
    }
}

/// Sums partition-level histograms into the job-level histogram.
pub fn aggregate_histograms<'a, I>(histograms: I) -> RowLengthHistogram
where
    I: IntoIterator<Item = &'a RowLengthHistogram>,
{
    let mut total = RowLengthHistogram::new();
    for h in histograms {
        total.merge(h);
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hist(lens: &[usize]) -> RowLengthHistogram {
        let mut h = RowLengthHistogram::new();
        for &l in lens {
            h.record(l);
        }
        h
    }

    #[test]
    fn aggregate_sums_elementwise() {
        let a = hist(&[3, 3, 2]);
        let b = hist(&[3, 4]);
        let c = RowLengthHistogram::new();
        let total = aggregate_histograms([&a, &b, &c]);
        assert_eq!(total.get(3), 3);
        assert_eq!(total.get(2), 1);
        assert_eq!(total.get(4), 1);
        assert_eq!(total.get(7), 0);
        assert_eq!(total.total_rows(), a.total_rows() + b.total_rows());
    }

    #[test]
    fn by_frequency_orders_descending() {
        let h = hist(&[2, 3, 3, 3, 1, 1]);
        assert_eq!(h.by_frequency(), vec![(3, 3), (1, 2), (2, 1)]);
    }

    #[test]
    fn serializes_as_map() {
        let h = hist(&[3, 3]);
        let json = serde_json::to_string(&h).unwrap();
        assert_eq!(json, r#"{"3":2}"#);
    }
}
