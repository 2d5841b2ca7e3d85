//! The `^P003FDC` legacy query.
//!
//! Older controllers answer this preamble with a single fixed-column line
//! starting with `^D` instead of a console table. There is no prompt after
//! it: the reply ends at the first carriage return.

use crate::types::LegacyReading;

/// Raw query, sent as-is with its own carriage return.
pub const LEGACY_QUERY: &str = "^P003FDC\r";

const REPLY_PREFIX: &str = "^D";
const MIN_COMPLETE_LEN: usize = 10;
const MIN_DECODABLE_LEN: usize = 70;

const VOLTAGE_COLUMNS: std::ops::Range<usize> = 52..57;
const CURRENT_COLUMNS: std::ops::Range<usize> = 57..62;
const SOC_COLUMNS: std::ops::Range<usize> = 62..65;

/// Completion test for the accumulating reply.
pub fn is_legacy_frame_complete(accumulated: &str) -> bool {
    accumulated.len() > MIN_COMPLETE_LEN && accumulated.ends_with('\r')
}

/// Decode a `^D` reply; `None` when it is not one or is too short.
pub fn decode_legacy_frame(raw: &str) -> Option<LegacyReading> {
    if !raw.starts_with(REPLY_PREFIX) || raw.len() <= MIN_DECODABLE_LEN {
        return None;
    }
    let column = |range: std::ops::Range<usize>| raw.get(range).map_or(0, leading_integer);
    Some(LegacyReading {
        voltage_mv: column(VOLTAGE_COLUMNS),
        current_ma: column(CURRENT_COLUMNS),
        soc_percent: u32::try_from(column(SOC_COLUMNS)).unwrap_or(0),
    })
}

/// Leading signed integer of a fixed-width column, 0 when there is none.
fn leading_integer(column: &str) -> i32 {
    let column = column.trim_start();
    let sign_len = usize::from(column.starts_with(['-', '+']));
    let digits = column[sign_len..]
        .bytes()
        .take_while(u8::is_ascii_digit)
        .count();
    column[..sign_len + digits].parse().unwrap_or(0)
}
