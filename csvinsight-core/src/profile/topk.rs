use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::BinaryHeap;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TopKEntry {
    pub frequency: u64,
    pub value: String,
}

/// Keeps the `limit` most frequent values pushed so far.
///
/// Entries compare by `(frequency, value)`, so among equal frequencies the
/// lowest value is the one evicted. A push whose frequency merely equals the
/// current minimum is never admitted once the set is full.
#[derive(Debug)]
pub struct TopK {
    heap: BinaryHeap<Reverse<TopKEntry>>,
    limit: usize,
}

impl TopK {
    pub fn new(limit: usize) -> Self {
        Self {
            heap: BinaryHeap::with_capacity(limit.saturating_add(1).min(4096)),
            limit,
        }
    }

    pub fn push(&mut self, frequency: u64, value: &str) {
        if self.limit == 0 {
            return;
        }
        if self.heap.len() < self.limit {
            self.heap.push(Reverse(TopKEntry {
                frequency,
                value: value.to_owned(),
            }));
            return;
        }
        if let Some(mut min) = self.heap.peek_mut() {
            if frequency > min.0.frequency {
                // overwrite in place; PeekMut re-sifts on drop
                min.0 = TopKEntry {
                    frequency,
                    value: value.to_owned(),
                };
            }
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn min_frequency(&self) -> Option<u64> {
        self.heap.peek().map(|e| e.0.frequency)
    }

    /// Retained entries, highest frequency first; equal frequencies by descending value.
    pub fn to_sorted_list(&self) -> Vec<TopKEntry> {
        let mut entries: Vec<TopKEntry> = self.heap.iter().map(|e| e.0.clone()).collect();
        entries.sort_by(|a, b| b.cmp(a));
        entries
    }

    pub fn into_sorted_list(self) -> Vec<TopKEntry> {
        // ascending Reverse order == descending entry order
        self.heap.into_sorted_vec().into_iter().map(|e| e.0).collect()
    }
}
