//! Mapping between Tuya thermostat DPs and the climate entity model.

pub mod entity;

use std::fmt;
use std::str::FromStr;

use serde_json::Value;

use crate::tuya::DpMap;

pub const TEMP_SCALE: f64 = 0.1;
pub const DEFAULT_MIN_TEMP: f64 = 5.0;
pub const DEFAULT_MAX_TEMP: f64 = 30.0;

pub const DP_SWITCH: &str = "switch";
pub const DP_MODE: &str = "mode";
pub const DP_TEMP_SET: &str = "temp_set";
pub const DP_TEMP_CURRENT: &str = "temp_current";
pub const DP_UPPER_TEMP: &str = "upper_temp";
pub const DP_LOWER_TEMP: &str = "lower_temp";
pub const DP_WORK_STATE: &str = "work_state";

pub const DP_CHILD_LOCK: &str = "child_lock";
pub const DP_FROST: &str = "frost";
pub const DP_BATTERY_PCT: &str = "battery_percentage";
pub const DP_WORK_DAYS: &str = "work_days";
pub const DP_HYSTERESIS: &str = "qidongwencha";
pub const DP_DORMANT_SWITCH: &str = "dormant_switch";
pub const DP_DORMANT_TIME_SET: &str = "dormant_time_set";
pub const DP_FACTORY_RESET: &str = "factory_reset";
pub const DP_WEEK_UP_BTN: &str = "week_up_btn";
pub const DP_WEEK_PROGRAM3: &str = "week_program3";

/// Presets always offered, whatever the device reports.
pub const BASELINE_PRESETS: [&str; 7] =
    ["home", "away", "auto", "manual", "schedule", "comfort", "eco"];

/// Secondary DPs passed through as diagnostic attributes: (attribute, DP code).
pub const DIAGNOSTIC_DPS: [(&str, &str); 10] = [
    ("child_lock", DP_CHILD_LOCK),
    ("frost", DP_FROST),
    ("battery_percentage", DP_BATTERY_PCT),
    ("work_days", DP_WORK_DAYS),
    ("hysteresis_qidongwencha", DP_HYSTERESIS),
    ("dormant_switch", DP_DORMANT_SWITCH),
    ("dormant_time_set_raw", DP_DORMANT_TIME_SET),
    ("factory_reset_flag", DP_FACTORY_RESET),
    ("week_up_btn", DP_WEEK_UP_BTN),
    ("week_program3_raw", DP_WEEK_PROGRAM3),
];

/// Device integer (tenths of a degree) to °C. Accepts numbers and numeric
/// strings; anything else is unknown.
pub fn scale_from_device(value: Option<&Value>) -> Option<f64> {
    let raw = match value? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    Some(raw * TEMP_SCALE)
}

pub fn scale_to_device(celsius: f64) -> i64 {
    (celsius / TEMP_SCALE).round() as i64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HvacMode {
    Off,
    Heat,
    Cool,
    HeatCool,
    Auto,
    Dry,
    FanOnly,
}

impl HvacMode {
    /// Modes this thermostat actually supports.
    pub const SUPPORTED: [HvacMode; 2] = [HvacMode::Off, HvacMode::Heat];

    pub fn as_str(&self) -> &'static str {
        match self {
            HvacMode::Off => "off",
            HvacMode::Heat => "heat",
            HvacMode::Cool => "cool",
            HvacMode::HeatCool => "heat_cool",
            HvacMode::Auto => "auto",
            HvacMode::Dry => "dry",
            HvacMode::FanOnly => "fan_only",
        }
    }
}

impl fmt::Display for HvacMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HvacMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" => Ok(HvacMode::Off),
            "heat" => Ok(HvacMode::Heat),
            "cool" => Ok(HvacMode::Cool),
            "heat_cool" => Ok(HvacMode::HeatCool),
            "auto" => Ok(HvacMode::Auto),
            "dry" => Ok(HvacMode::Dry),
            "fan_only" => Ok(HvacMode::FanOnly),
            other => Err(format!("unknown hvac mode '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HvacAction {
    Off,
    Heating,
    Idle,
}

impl HvacAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            HvacAction::Off => "off",
            HvacAction::Heating => "heating",
            HvacAction::Idle => "idle",
        }
    }
}

impl fmt::Display for HvacAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed read-only view over one device's DPs. Missing or mistyped DPs read
/// as `None`.
#[derive(Debug, Clone, Copy)]
pub struct DeviceStatus<'a> {
    dps: &'a DpMap,
}

impl<'a> DeviceStatus<'a> {
    pub fn new(dps: &'a DpMap) -> Self {
        Self { dps }
    }

    pub fn raw(&self) -> &'a DpMap {
        self.dps
    }

    pub fn get(&self, code: &str) -> Option<&'a Value> {
        self.dps.get(code)
    }

    fn bool_dp(&self, code: &str) -> Option<bool> {
        self.get(code).and_then(Value::as_bool)
    }

    fn str_dp(&self, code: &str) -> Option<&'a str> {
        self.get(code).and_then(Value::as_str)
    }

    pub fn switch(&self) -> Option<bool> {
        self.bool_dp(DP_SWITCH)
    }

    pub fn mode(&self) -> Option<&'a str> {
        self.str_dp(DP_MODE)
    }

    pub fn work_state(&self) -> Option<&'a str> {
        self.str_dp(DP_WORK_STATE)
    }

    pub fn current_temperature(&self) -> Option<f64> {
        scale_from_device(self.get(DP_TEMP_CURRENT))
    }

    pub fn target_temperature(&self) -> Option<f64> {
        scale_from_device(self.get(DP_TEMP_SET))
    }

    pub fn lower_limit(&self) -> Option<f64> {
        scale_from_device(self.get(DP_LOWER_TEMP))
    }

    pub fn upper_limit(&self) -> Option<f64> {
        scale_from_device(self.get(DP_UPPER_TEMP))
    }

    /// A reported limit of exactly zero is treated like a missing one.
    pub fn min_temp(&self) -> f64 {
        limit_or(self.lower_limit(), DEFAULT_MIN_TEMP)
    }

    pub fn max_temp(&self) -> f64 {
        limit_or(self.upper_limit(), DEFAULT_MAX_TEMP)
    }

    /// Only an explicit `false` switches the entity off.
    pub fn hvac_mode(&self) -> HvacMode {
        match self.switch() {
            Some(false) => HvacMode::Off,
            _ => HvacMode::Heat,
        }
    }

    pub fn hvac_action(&self) -> Option<HvacAction> {
        if self.hvac_mode() == HvacMode::Off {
            return Some(HvacAction::Off);
        }
        if let Some(state) = self.work_state() {
            match state.to_lowercase().as_str() {
                "heating" => return Some(HvacAction::Heating),
                "stop" => return Some(HvacAction::Idle),
                _ => {}
            }
        }
        let current = self.current_temperature()?;
        let target = self.target_temperature()?;
        if current < target {
            Some(HvacAction::Heating)
        } else {
            Some(HvacAction::Idle)
        }
    }

    pub fn preset_mode(&self) -> Option<String> {
        self.mode().map(str::to_lowercase)
    }

    pub fn preset_modes(&self) -> Vec<String> {
        let mut presets: Vec<String> = BASELINE_PRESETS.iter().map(|p| p.to_string()).collect();
        if let Some(observed) = self.preset_mode() {
            if !presets.contains(&observed) {
                presets.push(observed);
            }
        }
        presets.sort();
        presets
    }
}

fn limit_or(reading: Option<f64>, fallback: f64) -> f64 {
    match reading {
        Some(v) if v != 0.0 => v,
        _ => fallback,
    }
}
