use serde::Serialize;

use crate::core::{Battery, BatteryStack, CellBalance, Imbalance, ModuleDetail};

/// Cell spread as shown to collaborators.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceView {
    pub status: Imbalance,
    pub message: String,
    pub imbalance_mv: i32,
    pub cell_count: usize,
    /// mV
    pub max_cell_voltage: i32,
    /// mV
    pub min_cell_voltage: i32,
    pub max_cell_id: i32,
    pub min_cell_id: i32,
}

impl From<&CellBalance> for BalanceView {
    fn from(balance: &CellBalance) -> Self {
        Self {
            status: balance.class,
            message: balance.class.message(balance.imbalance_mv),
            imbalance_mv: balance.imbalance_mv,
            cell_count: balance.cell_count,
            max_cell_voltage: balance.max_mv,
            min_cell_voltage: balance.min_mv,
            max_cell_id: balance.max_cell,
            min_cell_id: balance.min_cell,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatteryView {
    pub id: u8,
    pub soc: u32,
    /// V
    pub voltage: f64,
    /// A
    pub current: f64,
    /// °C, absent when the module does not report it
    pub temperature: Option<f64>,
    pub base_state: Option<String>,
    pub is_normal: bool,
    pub balance_mv: i32,
}

impl BatteryView {
    pub fn new(id: u8, battery: &Battery) -> Self {
        Self {
            id,
            soc: battery.soc_percent,
            voltage: f64::from(battery.voltage_mv) / 1000.0,
            current: f64::from(battery.current_ma) / 1000.0,
            temperature: battery.temperature_mc.map(|mc| f64::from(mc) / 1000.0),
            base_state: battery.states.base.as_ref().map(ToString::to_string),
            is_normal: battery.is_normal(),
            balance_mv: battery.balance_mv(),
        }
    }
}

/// Read-only copy of the live stack in SI units.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StackView {
    pub soc: u32,
    pub voltage: f64,
    pub current: f64,
    pub power: f64,
    pub power_dc: i64,
    pub power_in: f64,
    pub power_out: f64,
    pub est_power_ac: i64,
    pub temperature: f64,
    pub base_state: String,
    pub is_normal: bool,
    pub battery_count: usize,
    pub balance: Option<BalanceView>,
    pub batteries: Vec<BatteryView>,
}

impl From<&BatteryStack> for StackView {
    fn from(stack: &BatteryStack) -> Self {
        Self {
            soc: stack.soc_percent,
            voltage: stack.avg_voltage_mv as f64 / 1000.0,
            current: stack.current_ma as f64 / 1000.0,
            power: stack.power_in_w() - stack.power_out_w(),
            power_dc: stack.power_dc_w(),
            power_in: stack.power_in_w(),
            power_out: stack.power_out_w(),
            est_power_ac: stack.est_power_ac_w(),
            temperature: f64::from(stack.temperature_mc) / 1000.0,
            base_state: stack.base_state.to_string(),
            is_normal: stack.is_normal(),
            battery_count: stack.battery_count,
            balance: stack.balance.as_ref().map(BalanceView::from),
            batteries: stack
                .batteries
                .iter_present()
                .map(|(id, battery)| BatteryView::new(id, battery))
                .collect(),
        }
    }
}

/// One module from its power row and cell dump.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleView {
    pub id: u8,
    pub soc: u32,
    pub voltage: f64,
    pub current: f64,
    pub power: f64,
    pub temperature: f64,
    pub balance: Option<BalanceView>,
}

impl From<&ModuleDetail> for ModuleView {
    fn from(detail: &ModuleDetail) -> Self {
        Self {
            id: detail.id,
            soc: detail.soc_percent,
            voltage: detail.voltage_v,
            current: detail.current_a,
            power: detail.power_w(),
            temperature: detail.temperature_c,
            balance: detail.balance.as_ref().map(BalanceView::from),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{
        aggregate::{cell_balance, fold_cell_dump},
        HistoryStore,
    };
    use pylonmon_protocol::decode_cell_dump;

    #[test]
    fn test_stack_view_json_shape() {
        let cells = decode_cell_dump("1 3350 -2000 2800 85%\n2 3410 -2000 2900 86%\n");
        let mut stack = BatteryStack::new(HistoryStore::new(0));
        stack.apply_cell_aggregate(&fold_cell_dump(&cells));

        let view = StackView::from(&stack);
        assert_eq!(view.base_state, "Dischg");
        assert_eq!(view.power_in, 0.0);
        assert!(view.power_out > 0.0);
        assert!(view.power < 0.0);

        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["baseState"], "Dischg");
        assert_eq!(json["balance"]["status"], "warning");
        assert_eq!(json["balance"]["imbalanceMv"], 60);
        assert_eq!(json["balance"]["maxCellId"], 2);
        assert!(json["batteries"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_balance_view_message() {
        let cells = decode_cell_dump("1 3300 0 2500 80%\n2 3380 0 2500 80%\n");
        let view = BalanceView::from(&cell_balance(&cells).unwrap());
        assert_eq!(view.status, Imbalance::Critical);
        assert!(view.message.contains("80 mV"));
    }
}
