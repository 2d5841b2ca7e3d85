//! History persistence.
//!
//! The ring is stored as one packed little-endian record:
//!
//! ```text
//! offset  size  field
//! 0       2     u16 cursor
//! 2       2     u16 count
//! 4       4     u32 last record time (unix seconds)
//! 8       9*288 entries, physical order:
//!               u32 timestamp, u8 battery id, i16 balance mV,
//!               u8 SOC %, u8 valid (0 or 1)
//! ```
//!
//! Which backend is used is decided at start-up from the configuration.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::{
    fs, io,
    path::{Path, PathBuf},
};

use super::{
    error::{MonitorError, Result},
    history::{BalanceHistoryEntry, HistoryStore, HISTORY_CAPACITY},
};

pub const HEADER_LEN: usize = 8;
pub const ENTRY_LEN: usize = 9;
pub const HISTORY_FILE_LEN: usize = HEADER_LEN + ENTRY_LEN * HISTORY_CAPACITY;

pub trait HistoryPersistence: Send + Sync {
    fn save(&self, store: &HistoryStore) -> Result<()>;

    /// Restore `store`. A store that cannot be restored is reset to empty.
    fn load(&self, store: &mut HistoryStore) -> Result<()>;

    /// Where the history lives, for logs.
    fn describe(&self) -> String;
}

/// History kept in a single file.
#[derive(Debug, Clone)]
pub struct FilesystemBacked {
    path: PathBuf,
}

impl FilesystemBacked {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl HistoryPersistence for FilesystemBacked {
    fn save(&self, store: &HistoryStore) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| MonitorError::storage(parent, e))?;
        }
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, encode_history(store)).map_err(|e| MonitorError::storage(&tmp, e))?;
        fs::rename(&tmp, &self.path).map_err(|e| MonitorError::storage(&self.path, e))?;
        log::info!(
            "saved {} history entries to {}",
            store.len(),
            self.path.display()
        );
        Ok(())
    }

    fn load(&self, store: &mut HistoryStore) -> Result<()> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::info!(
                    "no history at {}, starting empty",
                    self.path.display()
                );
                store.reset();
                return Ok(());
            }
            Err(e) => return Err(MonitorError::storage(&self.path, e)),
        };
        if let Err(err) = decode_history(&data, store) {
            store.reset();
            return Err(err);
        }
        log::info!(
            "loaded {} history entries from {}",
            store.len(),
            self.path.display()
        );
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// In-memory only: saves are dropped and loads start empty.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullBacked;

impl HistoryPersistence for NullBacked {
    fn save(&self, store: &HistoryStore) -> Result<()> {
        log::debug!("history not persisted ({} entries in memory)", store.len());
        Ok(())
    }

    fn load(&self, store: &mut HistoryStore) -> Result<()> {
        store.reset();
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

pub fn encode_history(store: &HistoryStore) -> Bytes {
    let mut buf = BytesMut::with_capacity(HISTORY_FILE_LEN);
    buf.put_u16_le(store.cursor() as u16);
    buf.put_u16_le(store.len() as u16);
    buf.put_u32_le(store.last_record_time());
    for entry in store.slots() {
        buf.put_u32_le(entry.timestamp);
        buf.put_u8(entry.battery_id);
        buf.put_i16_le(entry.balance_mv);
        buf.put_u8(entry.soc_percent);
        buf.put_u8(u8::from(entry.is_valid));
    }
    buf.freeze()
}

/// Decode a packed record into `store`. On error `store` is unchanged.
pub fn decode_history(mut data: &[u8], store: &mut HistoryStore) -> Result<()> {
    if data.len() != HISTORY_FILE_LEN {
        return Err(MonitorError::CorruptHistory(format!(
            "expected {HISTORY_FILE_LEN} bytes, found {}",
            data.len()
        )));
    }
    let cursor = usize::from(data.get_u16_le());
    let count = usize::from(data.get_u16_le());
    let last_record_time = data.get_u32_le();
    let slots = (0..HISTORY_CAPACITY)
        .map(|_| BalanceHistoryEntry {
            timestamp: data.get_u32_le(),
            battery_id: data.get_u8(),
            balance_mv: data.get_i16_le(),
            soc_percent: data.get_u8(),
            is_valid: data.get_u8() != 0,
        })
        .collect();
    store.restore(cursor, count, last_record_time, slots)
}
