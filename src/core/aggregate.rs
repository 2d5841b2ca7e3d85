//! Folding decoded readings into stack-level figures.
//!
//! Two reply kinds feed the stack and they use different current formulas:
//! the cell dump gives the mean per-cell current, while the module table
//! gives the sum of the module currents. Both are kept as observed.

use serde::{Deserialize, Serialize};

use pylonmon_protocol::{CellReading, ModuleReading, ModuleRow};

use super::stack::MAX_BATTERIES;

/// Highest imbalance still classified as normal, in mV.
pub const BALANCE_NORMAL_LIMIT_MV: i32 = 40;
/// Highest imbalance classified as a warning, in mV.
pub const BALANCE_WARNING_LIMIT_MV: i32 = 60;
/// Below this magnitude (amps) the cell-dump current counts as zero.
pub const CURRENT_FALLBACK_EPSILON_A: f64 = 0.0005;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Imbalance {
    Normal,
    Warning,
    Critical,
}

impl Imbalance {
    pub fn classify(imbalance_mv: i32) -> Self {
        if imbalance_mv <= BALANCE_NORMAL_LIMIT_MV {
            Imbalance::Normal
        } else if imbalance_mv <= BALANCE_WARNING_LIMIT_MV {
            Imbalance::Warning
        } else {
            Imbalance::Critical
        }
    }

    /// Short operator-facing advice for this class.
    pub fn message(self, imbalance_mv: i32) -> String {
        match self {
            Imbalance::Normal => format!("Balance normal: {imbalance_mv} mV"),
            Imbalance::Warning => format!("Watch balance: {imbalance_mv} mV"),
            Imbalance::Critical => {
                format!("Act now: {imbalance_mv} mV, check the balancer")
            }
        }
    }
}

/// Spread of cell voltages over one set of readings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellBalance {
    pub cell_count: usize,
    pub max_mv: i32,
    pub min_mv: i32,
    /// Index of the first cell holding the maximum.
    pub max_cell: i32,
    /// Index of the first cell holding the minimum.
    pub min_cell: i32,
    pub imbalance_mv: i32,
    pub class: Imbalance,
}

/// `None` when there are no readings.
pub fn cell_balance(cells: &[CellReading]) -> Option<CellBalance> {
    let first = cells.first()?;
    let (mut max, mut min) = (first, first);
    for cell in &cells[1..] {
        if cell.millivolts > max.millivolts {
            max = cell;
        }
        if cell.millivolts < min.millivolts {
            min = cell;
        }
    }
    let spread = i64::from(max.millivolts) - i64::from(min.millivolts);
    let imbalance_mv = i32::try_from(spread).unwrap_or(i32::MAX);
    Some(CellBalance {
        cell_count: cells.len(),
        max_mv: max.millivolts,
        min_mv: min.millivolts,
        max_cell: max.index,
        min_cell: min.index,
        imbalance_mv,
        class: Imbalance::classify(imbalance_mv),
    })
}

/// Stack figures derived from one cell dump, in SI units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StackAggregate {
    pub cell_count: usize,
    /// Sum of the cell voltages: the cells are in series.
    pub pack_voltage_v: f64,
    /// Mean per-cell current.
    pub current_a: f64,
    pub temperature_c: f64,
    pub soc_percent: u32,
    pub balance: Option<CellBalance>,
}

impl StackAggregate {
    pub fn power_w(&self) -> f64 {
        self.pack_voltage_v * self.current_a
    }

    /// True when the dump's current is too small to trust and `pwrsys`
    /// should be asked instead.
    pub fn needs_current_fallback(&self) -> bool {
        self.current_a.abs() < CURRENT_FALLBACK_EPSILON_A
    }

    pub fn apply_system_current(&mut self, current_ma: i32) {
        self.current_a = f64::from(current_ma) / 1000.0;
    }
}

/// Fold a cell dump. An empty dump folds to all zeros.
pub fn fold_cell_dump(cells: &[CellReading]) -> StackAggregate {
    if cells.is_empty() {
        return StackAggregate::default();
    }
    let count = cells.len() as f64;
    let (mut sum_mv, mut sum_ma, mut sum_mc, mut sum_soc) = (0i64, 0i64, 0i64, 0u64);
    for cell in cells {
        sum_mv += i64::from(cell.millivolts);
        sum_ma += i64::from(cell.milliamps);
        sum_mc += i64::from(cell.millicelsius);
        sum_soc += u64::from(cell.soc_percent);
    }
    StackAggregate {
        cell_count: cells.len(),
        pack_voltage_v: sum_mv as f64 / 1000.0,
        current_a: sum_ma as f64 / count / 1000.0,
        temperature_c: sum_mc as f64 / count / 1000.0,
        soc_percent: (sum_soc / cells.len() as u64) as u32,
        balance: cell_balance(cells),
    }
}

/// DC power in whole watts, truncated toward zero.
pub fn power_dc_w(current_ma: i64, voltage_mv: i64) -> i64 {
    ((current_ma as f64 / 1000.0) * (voltage_mv as f64 / 1000.0)) as i64
}

/// Inverter efficiency factor applied to a DC power figure.
///
/// Discharging: below -1000 W 0.94, below -600 W 0.90, otherwise 0.87.
/// Charging: above 1000 W 1.06, above 600 W 1.10, otherwise 1.13.
/// Zero power returns 1.0.
pub fn ac_efficiency(power_dc_w: i64) -> f64 {
    match power_dc_w {
        0 => 1.0,
        p if p < -1000 => 0.94,
        p if p < -600 => 0.90,
        p if p < 0 => 0.87,
        p if p > 1000 => 1.06,
        p if p > 600 => 1.10,
        _ => 1.13,
    }
}

/// Estimated AC-side power, truncated toward zero.
pub fn est_power_ac_w(power_dc_w: i64) -> i64 {
    if power_dc_w == 0 {
        return 0;
    }
    (power_dc_w as f64 * ac_efficiency(power_dc_w)) as i64
}

/// Stack figures derived from the present rows of a `pwr` table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModuleTableFold {
    pub battery_count: usize,
    pub soc_percent: u32,
    /// Mean over the modules that report a temperature.
    pub temperature_mc: Option<i32>,
    /// Sum of the module currents.
    pub current_ma: i64,
    pub avg_voltage_mv: i64,
}

pub fn fold_module_table(rows: &[ModuleRow]) -> ModuleTableFold {
    let present: Vec<&ModuleReading> = rows
        .iter()
        .filter_map(|row| match row {
            ModuleRow::Present(reading) => Some(reading),
            ModuleRow::Absent(_) => None,
        })
        .filter(|reading| (1..=MAX_BATTERIES).contains(&usize::from(reading.id)))
        .collect();
    if present.is_empty() {
        return ModuleTableFold::default();
    }

    let count = present.len() as i64;
    let temperatures: Vec<i64> = present
        .iter()
        .filter_map(|m| m.temperature_mc.map(i64::from))
        .collect();
    let temperature_mc = (!temperatures.is_empty())
        .then(|| (temperatures.iter().sum::<i64>() / temperatures.len() as i64) as i32);

    ModuleTableFold {
        battery_count: present.len(),
        soc_percent: (present.iter().map(|m| u64::from(m.soc_percent)).sum::<u64>()
            / present.len() as u64) as u32,
        temperature_mc,
        current_ma: present.iter().map(|m| i64::from(m.current_ma)).sum(),
        avg_voltage_mv: present.iter().map(|m| i64::from(m.voltage_mv)).sum::<i64>() / count,
    }
}

/// One module as seen through `pwr` plus its own `bat <id>` dump.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleDetail {
    pub id: u8,
    pub voltage_v: f64,
    pub current_a: f64,
    pub temperature_c: f64,
    pub soc_percent: u32,
    pub balance: Option<CellBalance>,
}

impl ModuleDetail {
    pub fn power_w(&self) -> f64 {
        self.voltage_v * self.current_a
    }
}

/// Combine a module's `pwr` row with its cells.
///
/// Temperature is the cell mean; without cells it falls back to the `pwr`
/// temperature, then to zero.
pub fn module_detail(reading: &ModuleReading, cells: &[CellReading]) -> ModuleDetail {
    let temperature_c = if cells.is_empty() {
        reading
            .temperature_mc
            .map_or(0.0, |mc| f64::from(mc) / 1000.0)
    } else {
        fold_cell_dump(cells).temperature_c
    };
    ModuleDetail {
        id: reading.id,
        voltage_v: f64::from(reading.voltage_mv) / 1000.0,
        current_a: f64::from(reading.current_ma) / 1000.0,
        temperature_c,
        soc_percent: reading.soc_percent,
        balance: cell_balance(cells),
    }
}
