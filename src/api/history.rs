use serde::Serialize;

use crate::core::{BalanceHistoryEntry, HistoryStore, Imbalance};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntryView {
    pub timestamp: u32,
    pub battery_id: u8,
    pub balance_mv: i16,
    pub soc_percent: u8,
    pub status: Imbalance,
}

impl From<&BalanceHistoryEntry> for HistoryEntryView {
    fn from(entry: &BalanceHistoryEntry) -> Self {
        Self {
            timestamp: entry.timestamp,
            battery_id: entry.battery_id,
            balance_mv: entry.balance_mv,
            soc_percent: entry.soc_percent,
            status: Imbalance::classify(i32::from(entry.balance_mv)),
        }
    }
}

/// History entries, oldest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryView {
    pub data: Vec<HistoryEntryView>,
}

impl From<&HistoryStore> for HistoryView {
    fn from(store: &HistoryStore) -> Self {
        Self {
            data: store.iter().map(HistoryEntryView::from).collect(),
        }
    }
}

/// Recording-policy state at a given instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryDebugView {
    pub now: u32,
    pub started_at: u32,
    pub last_save_time: u32,
    pub seconds_since_save: u32,
    pub should_record: bool,
    pub cursor: usize,
    pub count: usize,
    pub capacity: usize,
}

impl HistoryDebugView {
    pub fn new(store: &HistoryStore, now: u32) -> Self {
        Self {
            now,
            started_at: store.started_at(),
            last_save_time: store.last_record_time(),
            seconds_since_save: now.saturating_sub(store.last_record_time()),
            should_record: store.should_record(now),
            cursor: store.cursor(),
            count: store.len(),
            capacity: store.capacity(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_view_classifies_entries() {
        let mut store = HistoryStore::new(0);
        store.append(1, 12, 85, 100);
        store.append(2, 55, 84, 100);
        store.append(1, 90, 60, 1000);

        let view = HistoryView::from(&store);
        let statuses: Vec<_> = view.data.iter().map(|e| e.status).collect();
        assert_eq!(
            statuses,
            vec![Imbalance::Normal, Imbalance::Warning, Imbalance::Critical]
        );

        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["data"][1]["batteryId"], 2);
        assert_eq!(json["data"][2]["status"], "critical");
    }

    #[test]
    fn test_history_debug_view() {
        let mut store = HistoryStore::new(1_000);
        store.append(1, 10, 90, 2_000);
        store.mark_recorded(2_000);

        let debug = HistoryDebugView::new(&store, 2_600);
        assert_eq!(debug.seconds_since_save, 600);
        assert!(!debug.should_record);
        assert_eq!(debug.cursor, 1);
        assert_eq!(debug.count, 1);
        assert_eq!(debug.capacity, 288);
    }
}
