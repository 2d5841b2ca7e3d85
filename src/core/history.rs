//! Ring buffer of per-battery cell-balance samples.
//!
//! 288 slots hold one sample per battery every 15 minutes over 72 hours of
//! a single-battery stack. Once full, each append overwrites the oldest slot.
//! All times are unix seconds.

use serde::{Deserialize, Serialize};

use super::error::{MonitorError, Result};

pub const HISTORY_CAPACITY: usize = 288;
pub const RECORD_INTERVAL_SECS: u32 = 15 * 60;
pub const STARTUP_GRACE_SECS: u32 = 30;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceHistoryEntry {
    pub timestamp: u32,
    /// 1-based battery slot.
    pub battery_id: u8,
    /// Highest minus lowest cell voltage of that battery.
    pub balance_mv: i16,
    pub soc_percent: u8,
    pub is_valid: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryStore {
    /// Always `HISTORY_CAPACITY` long, in physical order.
    slots: Vec<BalanceHistoryEntry>,
    cursor: usize,
    count: usize,
    last_record_time: u32,
    started_at: u32,
    record_interval_secs: u32,
    startup_grace_secs: u32,
}

impl HistoryStore {
    pub fn new(started_at: u32) -> Self {
        Self::with_policy(started_at, RECORD_INTERVAL_SECS, STARTUP_GRACE_SECS)
    }

    pub fn with_policy(started_at: u32, record_interval_secs: u32, startup_grace_secs: u32) -> Self {
        Self {
            slots: vec![BalanceHistoryEntry::default(); HISTORY_CAPACITY],
            cursor: 0,
            count: 0,
            last_record_time: 0,
            started_at,
            record_interval_secs,
            startup_grace_secs,
        }
    }

    /// Forget every sample. The recording policy and start time are kept.
    pub fn reset(&mut self) {
        self.slots.fill(BalanceHistoryEntry::default());
        self.cursor = 0;
        self.count = 0;
        self.last_record_time = 0;
    }

    /// Whether a recording pass is due at `now`.
    ///
    /// Before the first recording this becomes true once the startup grace
    /// has passed; afterwards once a full interval has elapsed.
    pub fn should_record(&self, now: u32) -> bool {
        if self.last_record_time == 0 {
            return now.saturating_sub(self.started_at) > self.startup_grace_secs;
        }
        now.saturating_sub(self.last_record_time) >= self.record_interval_secs
    }

    pub fn append(&mut self, battery_id: u8, balance_mv: i16, soc_percent: u8, timestamp: u32) {
        self.slots[self.cursor] = BalanceHistoryEntry {
            timestamp,
            battery_id,
            balance_mv,
            soc_percent,
            is_valid: true,
        };
        self.cursor = (self.cursor + 1) % HISTORY_CAPACITY;
        if self.count < HISTORY_CAPACITY {
            self.count += 1;
        }
    }

    /// Entry by logical index: 0 is the oldest, `len() - 1` the newest.
    pub fn get(&self, index: usize) -> Option<&BalanceHistoryEntry> {
        if index >= self.count {
            return None;
        }
        let physical = if self.count < HISTORY_CAPACITY {
            index
        } else {
            (self.cursor + index) % HISTORY_CAPACITY
        };
        self.slots.get(physical).filter(|entry| entry.is_valid)
    }

    /// Valid entries, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &BalanceHistoryEntry> + '_ {
        (0..self.count).filter_map(move |index| self.get(index))
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn is_full(&self) -> bool {
        self.count == HISTORY_CAPACITY
    }

    pub fn capacity(&self) -> usize {
        HISTORY_CAPACITY
    }

    /// Next physical slot to be written.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn last_record_time(&self) -> u32 {
        self.last_record_time
    }

    pub fn mark_recorded(&mut self, now: u32) {
        self.last_record_time = now;
    }

    pub fn started_at(&self) -> u32 {
        self.started_at
    }

    /// Every slot in physical order, valid or not.
    pub fn slots(&self) -> &[BalanceHistoryEntry] {
        &self.slots
    }

    /// Replace the ring with persisted state.
    ///
    /// On inconsistent metadata the store is left untouched.
    pub(crate) fn restore(
        &mut self,
        cursor: usize,
        count: usize,
        last_record_time: u32,
        slots: Vec<BalanceHistoryEntry>,
    ) -> Result<()> {
        if slots.len() != HISTORY_CAPACITY {
            return Err(MonitorError::CorruptHistory(format!(
                "expected {HISTORY_CAPACITY} slots, found {}",
                slots.len()
            )));
        }
        if cursor >= HISTORY_CAPACITY {
            return Err(MonitorError::CorruptHistory(format!(
                "cursor {cursor} out of range"
            )));
        }
        if count > HISTORY_CAPACITY {
            return Err(MonitorError::CorruptHistory(format!(
                "entry count {count} exceeds capacity"
            )));
        }
        self.slots = slots;
        self.cursor = cursor;
        self.count = count;
        self.last_record_time = last_record_time;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_until_full_keeps_oldest_order() {
        let mut store = HistoryStore::new(0);
        for n in 1..=300u32 {
            store.append(1, n as i16, 50, n);
        }
        assert_eq!(store.len(), HISTORY_CAPACITY);
        assert!(store.is_full());
        assert_eq!(store.get(0).unwrap().timestamp, 13);
        assert_eq!(store.get(HISTORY_CAPACITY - 1).unwrap().timestamp, 300);
        assert_eq!(store.get(HISTORY_CAPACITY), None);
        assert_eq!(store.cursor(), 300 % HISTORY_CAPACITY);
    }

    #[test]
    fn test_partial_ring_indexes_from_slot_zero() {
        let mut store = HistoryStore::new(0);
        store.append(1, 12, 80, 1000);
        store.append(2, 30, 81, 1000);
        assert_eq!(store.len(), 2);
        assert_eq!(store.get(0).unwrap().battery_id, 1);
        assert_eq!(store.get(1).unwrap().battery_id, 2);
        assert_eq!(store.get(2), None);
        let ids: Vec<_> = store.iter().map(|e| e.battery_id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_invalid_slot_reads_as_none() {
        let mut store = HistoryStore::new(0);
        let mut slots = vec![BalanceHistoryEntry::default(); HISTORY_CAPACITY];
        slots[0].is_valid = true;
        store.restore(2, 2, 0, slots).unwrap();
        assert!(store.get(0).is_some());
        assert_eq!(store.get(1), None);
        assert_eq!(store.iter().count(), 1);
    }

    #[test]
    fn test_should_record_startup_grace() {
        let store = HistoryStore::new(1_000);
        assert!(!store.should_record(1_000));
        assert!(!store.should_record(1_030));
        assert!(store.should_record(1_031));
        assert!(!store.should_record(500));
    }

    #[test]
    fn test_should_record_interval() {
        let mut store = HistoryStore::new(1_000);
        store.mark_recorded(10_000);
        assert!(!store.should_record(10_000));
        assert!(!store.should_record(10_000 + RECORD_INTERVAL_SECS - 1));
        assert!(store.should_record(10_000 + RECORD_INTERVAL_SECS));
        assert!(!store.should_record(9_000));
    }

    #[test]
    fn test_reset_keeps_policy() {
        let mut store = HistoryStore::with_policy(100, 60, 5);
        store.append(1, 10, 90, 200);
        store.mark_recorded(200);
        store.reset();
        assert!(store.is_empty());
        assert_eq!(store.last_record_time(), 0);
        assert_eq!(store.started_at(), 100);
        assert!(store.should_record(106));
    }

    #[test]
    fn test_restore_rejects_bad_metadata() {
        let mut store = HistoryStore::new(0);
        let slots = || vec![BalanceHistoryEntry::default(); HISTORY_CAPACITY];
        assert!(store.restore(HISTORY_CAPACITY, 0, 0, slots()).is_err());
        assert!(store.restore(0, HISTORY_CAPACITY + 1, 0, slots()).is_err());
        assert!(store.restore(0, 0, 0, vec![]).is_err());
        assert!(store.restore(5, 5, 42, slots()).is_ok());
        assert_eq!(store.last_record_time(), 42);
    }
}
