//! Decoders for the controller's console replies.
//!
//! Three reply shapes are understood:
//!
//! - `bat` / `bat <N>`: a per-cell dump, one digit-leading row per cell with
//!   index, millivolts, milliamps, milli-Celsius, and a `NN%` SOC column.
//! - `pwr`: a per-module power summary, one row per module slot. Slots
//!   without hardware print `Absent`.
//! - `pwrsys`: a `Key : value` system summary.
//!
//! A malformed line never aborts a decode; it is skipped and the rest of the
//! reply still contributes.

use crate::scanner::{
    extract_percent_before_marker, fields, scan_four_integers, split_lines, starts_with_digit,
};
use crate::types::{CellReading, ModuleReading, ModuleRow, ModuleStates, StateTag};

/// Column schema of a `pwr` row (whitespace-delimited).
///
/// ```text
/// Power Volt  Curr  Tempr Tlow  Thigh Vlow Vhigh Base.St Volt.St Curr.St Temp.St Coulomb Time                B.V.St B.T.St
/// 1     49735 -1547 23000 22000 23000 3314 3318  Dischg  Normal  Normal  Normal  86%     2021-06-11 20:08:28 Normal Normal
/// ```
///
/// The time column spans two tokens, which is why the balance states land
/// on 15 and 16.
pub mod pwr_columns {
    pub const ID: usize = 0;
    pub const VOLT: usize = 1;
    pub const CURR: usize = 2;
    pub const TEMPR: usize = 3;
    pub const CELL_TEMP_LOW: usize = 4;
    pub const CELL_TEMP_HIGH: usize = 5;
    pub const CELL_VOLT_LOW: usize = 6;
    pub const CELL_VOLT_HIGH: usize = 7;
    pub const BASE_STATE: usize = 8;
    pub const VOLT_STATE: usize = 9;
    pub const CURR_STATE: usize = 10;
    pub const TEMP_STATE: usize = 11;
    pub const COULOMB: usize = 12;
    pub const BALANCE_VOLT_STATE: usize = 15;
    /// Also the fallback temperature column on firmware that prints a number here.
    pub const BALANCE_TEMP_STATE: usize = 16;
    /// Rows with fewer tokens are not decoded.
    pub const MIN_COLUMNS: usize = 17;
}

const ABSENT_MARKER: &str = "Absent";
const SYSTEM_CURRENT_MARKER: &str = "System Curr";

/// Decode every cell row of a `bat` reply, in reply order.
pub fn decode_cell_dump(raw: &str) -> Vec<CellReading> {
    split_lines(raw)
        .filter(|line| starts_with_digit(line))
        .filter_map(|line| {
            let reading = decode_cell_line(line);
            if reading.is_none() {
                log::debug!("cell dump: skipping undecodable line {line:?}");
            }
            reading
        })
        .collect()
}

fn decode_cell_line(line: &str) -> Option<CellReading> {
    let (index, mv, ma, mc) = scan_four_integers(line)?;
    Some(CellReading {
        index: i32::try_from(index).ok()?,
        millivolts: i32::try_from(mv).ok()?,
        milliamps: i32::try_from(ma).ok()?,
        millicelsius: i32::try_from(mc).ok()?,
        soc_percent: extract_percent_before_marker(line, '%').unwrap_or(0),
    })
}

/// Decode the `pwr` row of one module.
///
/// Returns `None` when the module never appears, is reported absent, or its
/// row is too short to decode.
pub fn decode_module_line(raw: &str, target_module_id: u8) -> Option<ModuleReading> {
    for line in split_lines(raw).filter(|line| starts_with_digit(line)) {
        if line.contains(ABSENT_MARKER) {
            continue;
        }
        let tokens = fields(line);
        if leading_module_id(&tokens) != Some(target_module_id) {
            continue;
        }
        if tokens.len() < pwr_columns::MIN_COLUMNS {
            log::debug!(
                "pwr: module {target_module_id} row has {} columns, need {}",
                tokens.len(),
                pwr_columns::MIN_COLUMNS
            );
            return None;
        }
        return decode_module_fields(target_module_id, &tokens);
    }
    None
}

/// Decode every row of a `pwr` reply, keeping absent slots.
pub fn decode_module_table(raw: &str) -> Vec<ModuleRow> {
    let mut rows = Vec::new();
    for line in split_lines(raw).filter(|line| starts_with_digit(line)) {
        let tokens = fields(line);
        let Some(id) = leading_module_id(&tokens).filter(|id| *id > 0) else {
            continue;
        };
        if line.contains(ABSENT_MARKER) {
            rows.push(ModuleRow::Absent(id));
            continue;
        }
        if tokens.len() < pwr_columns::MIN_COLUMNS {
            log::debug!("pwr: skipping short row for module {id}: {line:?}");
            continue;
        }
        match decode_module_fields(id, &tokens) {
            Some(reading) => rows.push(ModuleRow::Present(reading)),
            None => log::debug!("pwr: skipping undecodable row for module {id}: {line:?}"),
        }
    }
    rows
}

/// Ids of every module a `pwr` reply reports as present, in reply order.
pub fn decode_present_modules(raw: &str) -> Vec<u8> {
    split_lines(raw)
        .filter(|line| starts_with_digit(line) && !line.contains(ABSENT_MARKER))
        .filter_map(|line| leading_module_id(&fields(line)))
        .filter(|id| *id > 0)
        .collect()
}

/// Pack current from a `pwrsys` reply, in milliamps.
///
/// Looks for `System Curr`, then the first `:` after it, then an optionally
/// negative decimal number.
pub fn decode_system_current(raw: &str) -> Option<i32> {
    let marker_at = raw.find(SYSTEM_CURRENT_MARKER)?;
    let after_marker = &raw[marker_at + SYSTEM_CURRENT_MARKER.len()..];
    let colon_at = after_marker.find(':')?;
    let value = after_marker[colon_at + 1..].trim_start_matches([' ', '\t']);

    let sign_len = usize::from(value.starts_with('-'));
    let body_len = value[sign_len..]
        .bytes()
        .take_while(|b| b.is_ascii_digit() || *b == b'.')
        .count();
    let number = &value[..sign_len + body_len];
    if !number.bytes().any(|b| b.is_ascii_digit()) {
        return None;
    }
    number.parse::<f64>().ok().map(|ma| ma.round() as i32)
}

/// Module id in the first column, when there is more than one column.
fn leading_module_id(tokens: &[&str]) -> Option<u8> {
    if tokens.len() < 2 {
        return None;
    }
    tokens[pwr_columns::ID].parse().ok()
}

fn decode_module_fields(id: u8, tokens: &[&str]) -> Option<ModuleReading> {
    use pwr_columns::*;

    let column = |ix: usize| tokens.get(ix).copied().unwrap_or("-");
    let temperature_mc =
        parse_milli(column(TEMPR)).or_else(|| parse_milli(column(BALANCE_TEMP_STATE)));

    Some(ModuleReading {
        id,
        voltage_mv: parse_milli(column(VOLT))?,
        current_ma: parse_milli(column(CURR))?,
        temperature_mc,
        soc_percent: column(COULOMB)
            .split_once('%')
            .and_then(|(head, _)| head.parse().ok())
            .unwrap_or(0),
        cell_temp_low_mc: parse_milli(column(CELL_TEMP_LOW)),
        cell_temp_high_mc: parse_milli(column(CELL_TEMP_HIGH)),
        cell_volt_low_mv: parse_milli(column(CELL_VOLT_LOW)),
        cell_volt_high_mv: parse_milli(column(CELL_VOLT_HIGH)),
        states: ModuleStates {
            base: StateTag::from_token(column(BASE_STATE)),
            voltage: StateTag::from_token(column(VOLT_STATE)),
            current: StateTag::from_token(column(CURR_STATE)),
            temperature: StateTag::from_token(column(TEMP_STATE)),
            balance_voltage: state_word(column(BALANCE_VOLT_STATE)),
            balance_temperature: state_word(column(BALANCE_TEMP_STATE)),
        },
    })
}

/// Integer column in milli-units; `-` means the controller did not report it.
fn parse_milli(token: &str) -> Option<i32> {
    if token == "-" {
        return None;
    }
    token
        .parse::<i32>()
        .ok()
        .or_else(|| token.parse::<f64>().ok().map(|v| v.round() as i32))
}

/// A state column only when it holds a word, not a number.
fn state_word(token: &str) -> Option<StateTag> {
    if parse_milli(token).is_some() {
        return None;
    }
    StateTag::from_token(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BAT_DUMP: &str = "bat\r\n\
        @\r\n\
        Battery  Volt     Curr     Tempr    Base State   Volt. State  Curr. State  Temp. State  SOC\r\n\
        1        3350     150      2800     Charge       Normal       Normal       Normal       85%\r\n\
        2        3410     150      2900     Charge       Normal       Normal       Normal       86%\r\n\
        3        3380     160      3000     Charge       Normal       Normal       Normal       85%\r\n\
        Command completed successfully\r\n\
        $$\r\n\
        pylon>";

    const PWR_TABLE: &str = "pwr\r\n\
        @\r\n\
        Power Volt   Curr   Tempr  Tlow   Thigh  Vlow Vhigh Base.St Volt.St Curr.St Temp.St Coulomb Time                B.V.St B.T.St\r\n\
        1     49735  -1547  23000  22000  23000  3314 3318  Dischg  Normal  Normal  Normal  86%     2021-06-11 20:08:28 Normal Normal\r\n\
        2     49701  -1520  -      22000  24000  3310 3322  Dischg  Normal  Normal  Normal  84%     2021-06-11 20:08:28 Normal 24500\r\n\
        3     -      -      -      -      -      -    -     Absent  -       -       -       -       -                   -      -\r\n\
        4     49650  1200   22500  22000  23000  3300 3320  Charge  Normal\r\n\
        Command completed successfully\r\n\
        $$\r\n\
        pylon>";

    #[test]
    fn test_decode_cell_dump_reads_every_row_in_order() {
        let cells = decode_cell_dump(BAT_DUMP);
        assert_eq!(cells.len(), 3);
        assert_eq!(cells[0].index, 1);
        assert_eq!(cells[1].millivolts, 3410);
        assert_eq!(cells[2].millicelsius, 3000);
        assert_eq!(cells[1].soc_percent, 86);
    }

    #[test]
    fn test_decode_cell_dump_single_line() {
        let cells = decode_cell_dump("1  3350   150  2800  85%");
        assert_eq!(
            cells,
            vec![CellReading {
                index: 1,
                millivolts: 3350,
                milliamps: 150,
                millicelsius: 2800,
                soc_percent: 85,
            }]
        );
    }

    #[test]
    fn test_decode_cell_dump_skips_corrupted_line() {
        let raw = "1  3350  150  2800  85%\n2  33#@\n3  3380  160  3000  85%\n";
        let cells = decode_cell_dump(raw);
        assert_eq!(cells.len(), 2);
        assert_eq!(cells[0].index, 1);
        assert_eq!(cells[1].index, 3);
    }

    #[test]
    fn test_decode_cell_dump_defaults_missing_soc() {
        let cells = decode_cell_dump("4 3300 -20 2500 Idle\n");
        assert_eq!(cells.len(), 1);
        assert_eq!(cells[0].soc_percent, 0);
        assert_eq!(cells[0].milliamps, -20);
    }

    #[test]
    fn test_decode_cell_dump_empty_reply() {
        assert!(decode_cell_dump("").is_empty());
        assert!(decode_cell_dump("pylon>").is_empty());
    }

    #[test]
    fn test_decode_module_line_finds_target() {
        let module = decode_module_line(PWR_TABLE, 1).unwrap();
        assert_eq!(module.voltage_mv, 49735);
        assert_eq!(module.current_ma, -1547);
        assert_eq!(module.temperature_mc, Some(23000));
        assert_eq!(module.soc_percent, 86);
        assert_eq!(module.cell_volt_low_mv, Some(3314));
        assert_eq!(module.cell_volt_high_mv, Some(3318));
        assert_eq!(module.states.base, Some(StateTag::Dischg));
        assert_eq!(module.states.balance_temperature, Some(StateTag::Normal));
    }

    #[test]
    fn test_decode_module_line_temperature_fallback() {
        let module = decode_module_line(PWR_TABLE, 2).unwrap();
        assert_eq!(module.temperature_mc, Some(24500));
        assert_eq!(module.states.balance_temperature, None);
    }

    #[test]
    fn test_decode_module_line_missing_or_short() {
        assert_eq!(decode_module_line(PWR_TABLE, 3), None);
        assert_eq!(decode_module_line(PWR_TABLE, 4), None);
        assert_eq!(decode_module_line(PWR_TABLE, 9), None);
    }

    #[test]
    fn test_decode_module_line_both_temperatures_absent() {
        let raw = "1 49735 -1547 - 22000 23000 3314 3318 Dischg Normal Normal Normal 86% 2021-06-11 20:08:28 Normal -";
        let module = decode_module_line(raw, 1).unwrap();
        assert_eq!(module.temperature_mc, None);
    }

    #[test]
    fn test_decode_module_table_keeps_absent_slots() {
        let rows = decode_module_table(PWR_TABLE);
        let ids: Vec<_> = rows.iter().map(ModuleRow::id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert!(matches!(rows[2], ModuleRow::Absent(3)));
    }

    #[test]
    fn test_decode_present_modules() {
        assert_eq!(decode_present_modules(PWR_TABLE), vec![1, 2, 4]);
        assert!(decode_present_modules("pylon>").is_empty());
    }

    #[test]
    fn test_decode_system_current() {
        let raw = "pwrsys\r\n@\r\nSystem is discharging\r\nTotal Num                : 2\r\n\
                   System Volt              : 49718 mV\r\n\
                   System Curr              : -3067 mA\r\n\
                   System RC                : 85400 mAH\r\npylon>";
        assert_eq!(decode_system_current(raw), Some(-3067));
        assert_eq!(decode_system_current("System Curr :\t12.6 mA"), Some(13));
    }

    #[test]
    fn test_decode_system_current_missing() {
        assert_eq!(decode_system_current("System Volt : 49718 mV"), None);
        assert_eq!(decode_system_current("System Curr   no colon"), None);
        assert_eq!(decode_system_current("System Curr : - mA"), None);
    }
}
