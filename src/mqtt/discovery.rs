//! Home Assistant MQTT discovery payloads for the climate entities.

use serde::Serialize;

use crate::climate::HvacMode;
use crate::climate::entity::{ClimateState, ThermostatEntity};
use crate::config::{Config, sanitize_object_id};

use super::{
    FIELD_ACTION, FIELD_CURRENT_TEMPERATURE, FIELD_MODE, FIELD_PRESET_MODE, FIELD_TEMPERATURE,
};

pub const PAYLOAD_ONLINE: &str = "online";
pub const PAYLOAD_OFFLINE: &str = "offline";

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DiscoveryDevice {
    pub identifiers: Vec<String>,
    pub name: String,
    pub manufacturer: &'static str,
    pub model: &'static str,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Availability {
    pub topic: String,
    pub payload_available: &'static str,
    pub payload_not_available: &'static str,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ClimateDiscovery {
    pub name: String,
    pub unique_id: String,
    pub object_id: String,
    pub device: DiscoveryDevice,
    pub availability: Vec<Availability>,
    pub availability_mode: &'static str,
    pub modes: Vec<&'static str>,
    pub mode_state_topic: String,
    pub mode_command_topic: String,
    pub temperature_state_topic: String,
    pub temperature_command_topic: String,
    pub current_temperature_topic: String,
    pub action_topic: String,
    pub preset_mode_state_topic: String,
    pub preset_mode_command_topic: String,
    pub preset_modes: Vec<String>,
    pub min_temp: f64,
    pub max_temp: f64,
    pub precision: f64,
    pub temperature_unit: &'static str,
    pub json_attributes_topic: String,
}

impl ClimateDiscovery {
    /// Preset list and limits come from the current state, so the payload is
    /// rebuilt (and re-announced) whenever they change.
    pub fn new(config: &Config, entity: &ThermostatEntity, state: &ClimateState) -> Self {
        let id = entity.device_id();
        let unique_id = entity.unique_id();
        Self {
            name: entity.name(),
            object_id: sanitize_object_id(&unique_id),
            unique_id: unique_id.clone(),
            device: DiscoveryDevice {
                identifiers: vec![unique_id],
                name: entity.name(),
                manufacturer: "Tuya",
                model: "Cloud thermostat",
            },
            availability: vec![
                Availability {
                    topic: config.bridge_status_topic(),
                    payload_available: PAYLOAD_ONLINE,
                    payload_not_available: PAYLOAD_OFFLINE,
                },
                Availability {
                    topic: config.availability_topic(id),
                    payload_available: PAYLOAD_ONLINE,
                    payload_not_available: PAYLOAD_OFFLINE,
                },
            ],
            availability_mode: "all",
            modes: HvacMode::SUPPORTED.iter().map(HvacMode::as_str).collect(),
            mode_state_topic: config.state_topic(id, FIELD_MODE),
            mode_command_topic: config.command_topic(id, FIELD_MODE),
            temperature_state_topic: config.state_topic(id, FIELD_TEMPERATURE),
            temperature_command_topic: config.command_topic(id, FIELD_TEMPERATURE),
            current_temperature_topic: config.state_topic(id, FIELD_CURRENT_TEMPERATURE),
            action_topic: config.state_topic(id, FIELD_ACTION),
            preset_mode_state_topic: config.state_topic(id, FIELD_PRESET_MODE),
            preset_mode_command_topic: config.command_topic(id, FIELD_PRESET_MODE),
            preset_modes: state.preset_modes.clone(),
            min_temp: state.min_temp,
            max_temp: state.max_temp,
            precision: 0.1,
            temperature_unit: "C",
            json_attributes_topic: config.attributes_topic(id),
        }
    }

    pub fn topic(&self, config: &Config) -> String {
        config.discovery_topic(&self.object_id)
    }
}

/// Retained state publications for one entity: (topic, payload).
pub fn state_messages(config: &Config, device_id: &str, state: &ClimateState) -> Vec<(String, String)> {
    let mut messages = Vec::with_capacity(7);
    let availability = if state.available {
        PAYLOAD_ONLINE
    } else {
        PAYLOAD_OFFLINE
    };
    messages.push((config.availability_topic(device_id), availability.to_string()));
    messages.push((
        config.state_topic(device_id, FIELD_MODE),
        state.hvac_mode.to_string(),
    ));
    messages.push((
        config.state_topic(device_id, FIELD_ACTION),
        state
            .hvac_action
            .map(|a| a.to_string())
            .unwrap_or_else(|| "None".to_string()),
    ));
    if let Some(t) = state.target_temperature {
        messages.push((config.state_topic(device_id, FIELD_TEMPERATURE), format!("{t:.1}")));
    }
    if let Some(t) = state.current_temperature {
        messages.push((
            config.state_topic(device_id, FIELD_CURRENT_TEMPERATURE),
            format!("{t:.1}"),
        ));
    }
    messages.push((
        config.state_topic(device_id, FIELD_PRESET_MODE),
        state.preset_mode.clone().unwrap_or_else(|| "none".to_string()),
    ));
    messages.push((
        config.attributes_topic(device_id),
        serde_json::Value::Object(state.attributes.clone()).to_string(),
    ));
    messages
}
