use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

/// One row of a `bat` cell dump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellReading {
    pub index: i32,
    pub millivolts: i32,
    /// Positive while charging, negative while discharging.
    pub milliamps: i32,
    pub millicelsius: i32,
    pub soc_percent: u32,
}

/// Qualitative state word printed by the controller.
///
/// Words outside the known vocabulary are kept verbatim in `Other`.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display, AsRefStr,
)]
pub enum StateTag {
    Charge,
    Dischg,
    Idle,
    Balance,
    Normal,
    #[strum(default)]
    Other(String),
}

impl StateTag {
    /// Parse a column token; `-` and empty tokens mean "not reported".
    pub fn from_token(token: &str) -> Option<Self> {
        let token = token.trim();
        if token.is_empty() || token == "-" {
            return None;
        }
        token.parse().ok()
    }

    /// One of the four operating states a healthy module can be in.
    pub fn is_operating(&self) -> bool {
        matches!(
            self,
            StateTag::Charge | StateTag::Dischg | StateTag::Idle | StateTag::Balance
        )
    }

    pub fn is_normal(&self) -> bool {
        matches!(self, StateTag::Normal)
    }
}

/// State columns of a `pwr` row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleStates {
    pub base: Option<StateTag>,
    pub voltage: Option<StateTag>,
    pub current: Option<StateTag>,
    pub temperature: Option<StateTag>,
    pub balance_voltage: Option<StateTag>,
    pub balance_temperature: Option<StateTag>,
}

/// One present module from a `pwr` power summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleReading {
    pub id: u8,
    pub voltage_mv: i32,
    pub current_ma: i32,
    /// `None` when both temperature columns print `-`.
    pub temperature_mc: Option<i32>,
    /// Coulomb-counter state of charge.
    pub soc_percent: u32,
    pub cell_temp_low_mc: Option<i32>,
    pub cell_temp_high_mc: Option<i32>,
    pub cell_volt_low_mv: Option<i32>,
    pub cell_volt_high_mv: Option<i32>,
    pub states: ModuleStates,
}

/// A `pwr` row as seen in the full table: either decoded or reported absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModuleRow {
    Present(ModuleReading),
    Absent(u8),
}

impl ModuleRow {
    pub fn id(&self) -> u8 {
        match self {
            ModuleRow::Present(reading) => reading.id,
            ModuleRow::Absent(id) => *id,
        }
    }
}

/// Values carried by a legacy `^D` fixed-column reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyReading {
    pub voltage_mv: i32,
    pub current_ma: i32,
    pub soc_percent: u32,
}
