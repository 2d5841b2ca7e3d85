use serde::{Deserialize, Serialize};

use pylonmon_protocol::{LegacyReading, ModuleReading, ModuleRow, ModuleStates, StateTag};

use super::{
    aggregate::{self, CellBalance, StackAggregate},
    history::HistoryStore,
};

/// Number of battery slots a stack can hold.
pub const MAX_BATTERIES: usize = 16;

/// Last known state of one battery module.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Battery {
    pub is_present: bool,
    pub soc_percent: u32,
    pub voltage_mv: i32,
    /// Negative while discharging.
    pub current_ma: i32,
    pub temperature_mc: Option<i32>,
    pub cell_temp_low_mc: Option<i32>,
    pub cell_temp_high_mc: Option<i32>,
    pub cell_volt_low_mv: Option<i32>,
    pub cell_volt_high_mv: Option<i32>,
    pub states: ModuleStates,
}

impl Battery {
    pub fn update_from(&mut self, reading: &ModuleReading) {
        self.is_present = true;
        self.soc_percent = reading.soc_percent;
        self.voltage_mv = reading.voltage_mv;
        self.current_ma = reading.current_ma;
        self.temperature_mc = reading.temperature_mc;
        self.cell_temp_low_mc = reading.cell_temp_low_mc;
        self.cell_temp_high_mc = reading.cell_temp_high_mc;
        self.cell_volt_low_mv = reading.cell_volt_low_mv;
        self.cell_volt_high_mv = reading.cell_volt_high_mv;
        self.states = reading.states.clone();
    }

    /// Keep the last values but stop counting this slot.
    pub fn mark_absent(&mut self) {
        self.is_present = false;
    }

    fn base_is(&self, tag: &StateTag) -> bool {
        self.states.base.as_ref() == Some(tag)
    }

    pub fn is_charging(&self) -> bool {
        self.base_is(&StateTag::Charge)
    }

    pub fn is_discharging(&self) -> bool {
        self.base_is(&StateTag::Dischg)
    }

    pub fn is_idle(&self) -> bool {
        self.base_is(&StateTag::Idle)
    }

    pub fn is_balancing(&self) -> bool {
        self.base_is(&StateTag::Balance)
    }

    /// Operating base state, and every sub-state reads `Normal`.
    ///
    /// Voltage, current and temperature states must be reported. The balance
    /// states only count when the firmware prints them.
    pub fn is_normal(&self) -> bool {
        let states = &self.states;
        states.base.as_ref().is_some_and(StateTag::is_operating)
            && [&states.voltage, &states.current, &states.temperature]
                .into_iter()
                .all(|tag| tag.as_ref().is_some_and(StateTag::is_normal))
            && [&states.balance_voltage, &states.balance_temperature]
                .into_iter()
                .all(|tag| tag.as_ref().map_or(true, StateTag::is_normal))
    }

    /// Highest minus lowest cell voltage, missing columns read as zero.
    pub fn balance_mv(&self) -> i32 {
        self.cell_volt_high_mv
            .unwrap_or(0)
            .saturating_sub(self.cell_volt_low_mv.unwrap_or(0))
    }
}

/// Fixed set of battery slots addressed by 1-based module id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatterySlots {
    slots: [Battery; MAX_BATTERIES],
}

impl BatterySlots {
    pub fn capacity(&self) -> usize {
        MAX_BATTERIES
    }

    pub fn get(&self, id: u8) -> Option<&Battery> {
        self.slots.get(usize::from(id).checked_sub(1)?)
    }

    pub fn get_mut(&mut self, id: u8) -> Option<&mut Battery> {
        self.slots.get_mut(usize::from(id).checked_sub(1)?)
    }

    /// Every slot with its module id.
    pub fn iter(&self) -> impl Iterator<Item = (u8, &Battery)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .map(|(ix, battery)| (ix as u8 + 1, battery))
    }

    pub fn iter_present(&self) -> impl Iterator<Item = (u8, &Battery)> + '_ {
        self.iter().filter(|(_, battery)| battery.is_present)
    }

    pub fn present_count(&self) -> usize {
        self.iter_present().count()
    }
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::AsRefStr,
)]
pub enum StackState {
    Charge,
    Dischg,
    #[default]
    Idle,
    #[strum(serialize = "Alarm!")]
    #[serde(rename = "Alarm!")]
    Alarm,
}

impl StackState {
    /// Direction of the stack current, ignoring alarms.
    pub fn from_current(current_ma: i64) -> Self {
        match current_ma {
            c if c > 0 => StackState::Charge,
            c if c < 0 => StackState::Dischg,
            _ => StackState::Idle,
        }
    }
}

/// Live view of the whole battery stack.
///
/// `current_ma` is negative while the stack discharges; every derived power
/// figure keeps that sign.
#[derive(Debug, Clone, PartialEq)]
pub struct BatteryStack {
    pub battery_count: usize,
    pub soc_percent: u32,
    pub temperature_mc: i32,
    pub current_ma: i64,
    pub avg_voltage_mv: i64,
    pub base_state: StackState,
    pub batteries: BatterySlots,
    /// Cell spread from the last cell dump.
    pub balance: Option<CellBalance>,
    pub history: HistoryStore,
}

impl BatteryStack {
    pub fn new(history: HistoryStore) -> Self {
        Self {
            battery_count: 0,
            soc_percent: 0,
            temperature_mc: 0,
            current_ma: 0,
            avg_voltage_mv: 0,
            base_state: StackState::default(),
            batteries: BatterySlots::default(),
            balance: None,
            history,
        }
    }

    /// True when every present battery is normal.
    pub fn is_normal(&self) -> bool {
        self.batteries
            .iter_present()
            .all(|(_, battery)| battery.is_normal())
    }

    pub fn power_dc_w(&self) -> i64 {
        aggregate::power_dc_w(self.current_ma, self.avg_voltage_mv)
    }

    /// Charging power in watts, zero otherwise.
    pub fn power_in_w(&self) -> f64 {
        if self.current_ma > 0 {
            self.exact_power_w()
        } else {
            0.0
        }
    }

    /// Discharging power in watts as a positive number, zero otherwise.
    pub fn power_out_w(&self) -> f64 {
        if self.current_ma < 0 {
            -self.exact_power_w()
        } else {
            0.0
        }
    }

    pub fn est_power_ac_w(&self) -> i64 {
        aggregate::est_power_ac_w(self.power_dc_w())
    }

    fn exact_power_w(&self) -> f64 {
        (self.current_ma as f64 / 1000.0) * (self.avg_voltage_mv as f64 / 1000.0)
    }

    pub fn refresh_base_state(&mut self) {
        self.base_state = if self.is_normal() {
            StackState::from_current(self.current_ma)
        } else {
            StackState::Alarm
        };
    }

    /// Update the slots and stack figures from a `pwr` table.
    ///
    /// Slots the table does not mention are marked absent. An empty table
    /// (usually a timed-out reply) changes nothing.
    pub fn apply_module_table(&mut self, rows: &[ModuleRow]) {
        if rows.is_empty() {
            log::debug!("empty module table, keeping previous battery state");
            return;
        }
        let mut seen = [false; MAX_BATTERIES];
        for row in rows {
            let id = row.id();
            let Some(slot) = self.batteries.get_mut(id) else {
                log::debug!("module {id} is beyond the {MAX_BATTERIES} supported slots");
                continue;
            };
            seen[usize::from(id) - 1] = true;
            match row {
                ModuleRow::Present(reading) => slot.update_from(reading),
                ModuleRow::Absent(_) => slot.mark_absent(),
            }
        }
        for (ix, battery) in self.batteries.slots.iter_mut().enumerate() {
            if !seen[ix] {
                battery.mark_absent();
            }
        }

        let fold = aggregate::fold_module_table(rows);
        self.battery_count = fold.battery_count;
        self.soc_percent = fold.soc_percent;
        if let Some(temperature_mc) = fold.temperature_mc {
            self.temperature_mc = temperature_mc;
        }
        self.current_ma = fold.current_ma;
        self.avg_voltage_mv = fold.avg_voltage_mv;
        self.refresh_base_state();
    }

    /// Overwrite voltage, current, temperature and SOC with a cell-dump fold.
    pub fn apply_cell_aggregate(&mut self, agg: &StackAggregate) {
        self.avg_voltage_mv = (agg.pack_voltage_v * 1000.0).round() as i64;
        self.current_ma = (agg.current_a * 1000.0).round() as i64;
        self.temperature_mc = (agg.temperature_c * 1000.0).round() as i32;
        self.soc_percent = agg.soc_percent;
        self.balance = agg.balance;
        self.refresh_base_state();
    }

    /// Apply a legacy `^D` reply. It describes a single battery in slot 1.
    pub fn apply_legacy(&mut self, reading: &LegacyReading) {
        if let Some(battery) = self.batteries.get_mut(1) {
            battery.is_present = true;
            battery.voltage_mv = reading.voltage_mv;
            battery.current_ma = reading.current_ma;
            battery.soc_percent = reading.soc_percent;
            battery.states.base = Some(StateTag::Idle);
        }
        self.avg_voltage_mv = i64::from(reading.voltage_mv);
        self.current_ma = i64::from(reading.current_ma);
        self.soc_percent = reading.soc_percent;
        // The frame carries no sub-states to judge normality by.
        self.base_state = StackState::from_current(self.current_ma);
    }

    pub fn should_record_history(&self, now: u32) -> bool {
        self.history.should_record(now)
    }

    /// Append one balance sample per present battery and mark `now` as the
    /// last recording time. Returns how many samples were appended.
    pub fn record_balance_history(&mut self, now: u32) -> usize {
        let samples: Vec<(u8, i16, u8)> = self
            .batteries
            .iter_present()
            .map(|(id, battery)| {
                let balance = battery
                    .balance_mv()
                    .clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16;
                let soc = battery.soc_percent.min(u32::from(u8::MAX)) as u8;
                (id, balance, soc)
            })
            .collect();
        for &(id, balance_mv, soc) in &samples {
            self.history.append(id, balance_mv, soc, now);
        }
        self.history.mark_recorded(now);
        samples.len()
    }
}
