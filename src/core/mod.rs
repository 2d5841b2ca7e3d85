/// Acquisition engine: stack model, aggregation, history and polling.
///
/// Nothing here touches the serial port directly; the poller drives a
/// [`crate::protocol::ConsoleSession`] over any channel.
pub mod aggregate;
pub mod error;
pub mod history;
pub mod persistence;
pub mod poller;
pub mod stack;

pub use aggregate::{CellBalance, Imbalance, ModuleDetail, StackAggregate};
pub use error::{MonitorError, Result};
pub use history::{BalanceHistoryEntry, HistoryStore, HISTORY_CAPACITY};
pub use persistence::{FilesystemBacked, HistoryPersistence, NullBacked};
pub use poller::{unix_now, AcquisitionSettings, CycleReport, PollEvent, Poller};
pub use stack::{Battery, BatterySlots, BatteryStack, StackState, MAX_BATTERIES};
