//! Groups normalized rows into fixed-size batches

use super::types::{Batch, NormalizedRow};

/// Emits a batch exactly when it reaches the configured size; [`flush`](Self::flush)
/// returns the trailing partial batch.
#[derive(Debug)]
pub struct BatchAccumulator {
    size: usize,
    open: Vec<NormalizedRow>,
    next_sequence: u64,
}

impl BatchAccumulator {
    pub fn new(size: usize) -> Result<Self, String> {
        if size == 0 {
            return Err("batch size must be positive".to_string());
        }
        Ok(Self {
            size,
            open: Vec::with_capacity(size),
            next_sequence: 1,
        })
    }

    pub fn add(&mut self, row: NormalizedRow) -> Option<Batch> {
        self.open.push(row);
        if self.open.len() >= self.size {
            Some(self.take())
        } else {
            None
        }
    }

    pub fn flush(&mut self) -> Option<Batch> {
        if self.open.is_empty() {
            None
        } else {
            Some(self.take())
        }
    }

    pub fn pending(&self) -> usize {
        self.open.len()
    }

    fn take(&mut self) -> Batch {
        let rows = std::mem::replace(&mut self.open, Vec::with_capacity(self.size));
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        Batch { sequence, rows }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::engine::types::Value;
    use std::collections::BTreeMap;

    fn row(id: i64) -> NormalizedRow {
        let mut values = BTreeMap::new();
        values.insert("id".to_string(), Value::Int(id));
        NormalizedRow::new(values, &["id".to_string()]).unwrap()
    }

    #[test]
    fn test_zero_size_rejected() {
        assert!(BatchAccumulator::new(0).is_err());
    }

    #[test]
    fn test_emits_at_exact_size() {
        let mut acc = BatchAccumulator::new(2).unwrap();
        assert!(acc.add(row(1)).is_none());
        let batch = acc.add(row(2)).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.sequence, 1);
        assert_eq!(acc.pending(), 0);
        assert!(acc.flush().is_none());
    }

    #[test]
    fn test_batch_count_is_ceiling() {
        for (n, b) in [(0usize, 3usize), (1, 3), (3, 3), (7, 3), (10, 1), (5, 100)] {
            let mut acc = BatchAccumulator::new(b).unwrap();
            let mut batches: Vec<Batch> = (0..n).filter_map(|i| acc.add(row(i as i64))).collect();
            batches.extend(acc.flush());
            assert_eq!(batches.len(), n.div_ceil(b), "n={n} b={b}");
            assert!(batches.iter().all(|batch| batch.len() <= b));
            assert_eq!(batches.iter().map(Batch::len).sum::<usize>(), n);
            let sequences: Vec<u64> = batches.iter().map(|batch| batch.sequence).collect();
            assert_eq!(sequences, (1..=batches.len() as u64).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_rows_keep_arrival_order() {
        let mut acc = BatchAccumulator::new(10).unwrap();
        for i in [5, 3, 9] {
            acc.add(row(i));
        }
        let batch = acc.flush().unwrap();
        let ids: Vec<String> = batch.rows.iter().map(|r| r.key().to_string()).collect();
        assert_eq!(ids, vec!["5", "3", "9"]);
    }
}
