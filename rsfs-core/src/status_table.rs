//! Per-participant status table for fan-out operations
//!
//! One slot per participant, initialized to a sentinel. Completion tasks
//! record results concurrently; the waiting caller polls the counts.

use parking_lot::RwLock;

/// Sentinel for a participant that has not completed yet
pub const STATUS_UNSET: i32 = -1;
/// Participant failed after exhausting its retries
pub const STATUS_FAILED: i32 = 0;
/// Participant succeeded
pub const STATUS_SUCCESS: i32 = 1;

/// Fixed-size concurrent status array
#[derive(Debug)]
pub struct OperationStatusTable {
    sentinel: i32,
    inner: RwLock<Slots>,
}

#[derive(Debug)]
struct Slots {
    values: Vec<i32>,
    set_count: usize,
}

impl OperationStatusTable {
    pub fn new(len: usize, sentinel: i32) -> Self {
        Self {
            sentinel,
            inner: RwLock::new(Slots {
                values: vec![sentinel; len],
                set_count: 0,
            }),
        }
    }

    /// Table sized for `len` participants using `STATUS_UNSET`
    pub fn with_len(len: usize) -> Self {
        Self::new(len, STATUS_UNSET)
    }

    pub fn len(&self) -> usize {
        self.inner.read().values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn sentinel(&self) -> i32 {
        self.sentinel
    }

    /// Record `value` for participant `index`; returns false when out of range
    ///
    /// Setting a slot to the sentinel clears it.
    pub fn set(&self, index: usize, value: i32) -> bool {
        let mut slots = self.inner.write();
        let Some(&old) = slots.values.get(index) else {
            return false;
        };
        slots.values[index] = value;
        match (old == self.sentinel, value == self.sentinel) {
            (true, false) => slots.set_count += 1,
            (false, true) => slots.set_count -= 1,
            _ => {}
        }
        true
    }

    pub fn unset(&self, index: usize) -> bool {
        self.set(index, self.sentinel)
    }

    /// Whether participant `index` has recorded any value
    pub fn is_set(&self, index: usize) -> bool {
        self.get(index).is_some_and(|v| v != self.sentinel)
    }

    /// Whether participant `index` holds exactly `value`
    pub fn is_set_to(&self, index: usize, value: i32) -> bool {
        self.get(index) == Some(value)
    }

    pub fn get(&self, index: usize) -> Option<i32> {
        self.inner.read().values.get(index).copied()
    }

    pub fn count_set(&self) -> usize {
        self.inner.read().set_count
    }

    pub fn count_unset(&self) -> usize {
        let slots = self.inner.read();
        slots.values.len() - slots.set_count
    }

    pub fn count_equal(&self, value: i32) -> usize {
        self.inner
            .read()
            .values
            .iter()
            .filter(|&&v| v == value)
            .count()
    }

    /// Indices currently holding `value`
    pub fn indices_equal(&self, value: i32) -> Vec<usize> {
        self.inner
            .read()
            .values
            .iter()
            .enumerate()
            .filter(|(_, &v)| v == value)
            .map(|(i, _)| i)
            .collect()
    }

    /// Snapshot of every slot
    pub fn values(&self) -> Vec<i32> {
        self.inner.read().values.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;

    #[test]
    fn test_set_and_count() {
        let table = OperationStatusTable::with_len(4);
        assert_eq!(table.count_unset(), 4);
        assert!(table.set(0, STATUS_SUCCESS));
        assert!(table.set(2, STATUS_FAILED));
        assert!(!table.set(9, STATUS_SUCCESS));

        assert_eq!(table.count_set(), 2);
        assert_eq!(table.count_equal(STATUS_SUCCESS), 1);
        assert!(table.is_set(2));
        assert!(table.is_set_to(2, STATUS_FAILED));
        assert!(!table.is_set(1));
        assert_eq!(table.indices_equal(STATUS_UNSET), vec![1, 3]);
    }

    #[test]
    fn test_overwrite_does_not_double_count() {
        let table = OperationStatusTable::with_len(2);
        table.set(0, STATUS_FAILED);
        table.set(0, STATUS_SUCCESS);
        assert_eq!(table.count_set(), 1);
        table.unset(0);
        assert_eq!(table.count_set(), 0);
        assert_eq!(table.values(), vec![STATUS_UNSET, STATUS_UNSET]);
    }

    #[test]
    fn test_concurrent_writers() {
        let table = Arc::new(OperationStatusTable::with_len(64));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let table = Arc::clone(&table);
                std::thread::spawn(move || {
                    for i in (t..64).step_by(8) {
                        table.set(i, STATUS_SUCCESS);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(table.count_set(), 64);
        assert_eq!(table.count_equal(STATUS_SUCCESS), 64);
    }

    proptest! {
        #[test]
        fn prop_counts_partition_table(
            len in 1usize..32,
            ops in proptest::collection::vec((0usize..40, -1i32..3), 0..100),
        ) {
            let table = OperationStatusTable::with_len(len);
            for (index, value) in ops {
                table.set(index, value);
            }
            let set: usize = (0..3).map(|v| table.count_equal(v)).sum();
            prop_assert_eq!(table.count_equal(STATUS_UNSET) + set, len);
            prop_assert_eq!(table.count_set(), set);
            for v in -1..3 {
                prop_assert!(table.count_equal(v) <= len);
            }
        }
    }
}
