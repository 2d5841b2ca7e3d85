//! Text decoding for the battery controller's serial console.
//!
//! Everything in this package is pure: it takes the raw text captured by a
//! console transaction and turns it into typed readings. No I/O happens here,
//! which keeps the decoders testable against recorded replies.

pub mod decoder;
pub mod legacy;
pub mod scanner;
pub mod types;

pub use decoder::{
    decode_cell_dump, decode_module_line, decode_module_table, decode_present_modules,
    decode_system_current,
};
pub use legacy::{decode_legacy_frame, is_legacy_frame_complete, LEGACY_QUERY};
pub use scanner::{extract_percent_before_marker, fields, scan_four_integers, split_lines};
pub use types::{CellReading, LegacyReading, ModuleReading, ModuleRow, ModuleStates, StateTag};
