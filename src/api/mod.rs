//! Read-only JSON views over the acquisition state.
//!
//! Web, MQTT or CLI front ends render these; none of them mutate the stack.

pub mod history;
pub mod snapshot;

pub use history::{HistoryDebugView, HistoryEntryView, HistoryView};
pub use snapshot::{BalanceView, BatteryView, ModuleView, StackView};
