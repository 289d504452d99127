pub mod client;
pub mod discovery;

use tracing::warn;

use crate::climate::HvacMode;
use crate::climate::entity::ClimateCommand;

/// A message received on one of the command topics.
pub struct MqttMessage {
    pub topic: String,
    pub payload: String,
}

pub const FIELD_TEMPERATURE: &str = "temperature";
pub const FIELD_CURRENT_TEMPERATURE: &str = "current_temperature";
pub const FIELD_MODE: &str = "mode";
pub const FIELD_ACTION: &str = "action";
pub const FIELD_PRESET_MODE: &str = "preset_mode";

/// Parse a command topic into (device_id, field).
/// Expected format: {prefix}/{device_id}/command/{field}
pub fn parse_command_topic<'a>(topic: &'a str, prefix: &str) -> Option<(&'a str, &'a str)> {
    let rest = topic.strip_prefix(prefix)?.strip_prefix('/')?;
    let (device_id, rest) = rest.split_once('/')?;
    let field = rest.strip_prefix("command/")?;
    if device_id.is_empty() || field.is_empty() || field.contains('/') {
        return None;
    }
    Some((device_id, field))
}

/// Turn a command field + payload into a climate command.
pub fn parse_command(field: &str, payload: &str) -> Option<ClimateCommand> {
    let payload = payload.trim();
    match field {
        FIELD_TEMPERATURE => match payload.parse::<f64>() {
            Ok(t) if t.is_finite() => Some(ClimateCommand::SetTemperature(t)),
            _ => {
                warn!("Invalid temperature payload: {}", payload);
                None
            }
        },
        FIELD_MODE => match payload.parse::<HvacMode>() {
            Ok(mode) => Some(ClimateCommand::SetHvacMode(mode)),
            Err(e) => {
                warn!("Ignoring mode command: {}", e);
                None
            }
        },
        FIELD_PRESET_MODE if !payload.is_empty() => {
            Some(ClimateCommand::SetPresetMode(payload.to_string()))
        }
        _ => {
            warn!("Unsupported command field {}={}", field, payload);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_topics() {
        assert_eq!(
            parse_command_topic("tuya_thermostat/bf123/command/temperature", "tuya_thermostat"),
            Some(("bf123", "temperature"))
        );
        assert_eq!(
            parse_command_topic("tuya_thermostat/bf123/state/temperature", "tuya_thermostat"),
            None
        );
        assert_eq!(parse_command_topic("other/bf123/command/mode", "tuya_thermostat"), None);
        assert_eq!(parse_command_topic("tuya_thermostat//command/mode", "tuya_thermostat"), None);
        assert_eq!(parse_command_topic("tuya_thermostat/bf123/command/", "tuya_thermostat"), None);
        assert_eq!(
            parse_command_topic("tuya_thermostat/bf123/command/a/b", "tuya_thermostat"),
            None
        );
    }

    #[test]
    fn command_payloads() {
        assert_eq!(
            parse_command("temperature", " 21.5 "),
            Some(ClimateCommand::SetTemperature(21.5))
        );
        assert_eq!(parse_command("temperature", "warm"), None);
        assert_eq!(parse_command("temperature", "NaN"), None);
        assert_eq!(
            parse_command("mode", "off"),
            Some(ClimateCommand::SetHvacMode(HvacMode::Off))
        );
        assert_eq!(
            parse_command("mode", "cool"),
            Some(ClimateCommand::SetHvacMode(HvacMode::Cool))
        );
        assert_eq!(parse_command("mode", "turbo"), None);
        assert_eq!(
            parse_command("preset_mode", "Eco"),
            Some(ClimateCommand::SetPresetMode("Eco".into()))
        );
        assert_eq!(parse_command("preset_mode", ""), None);
        assert_eq!(parse_command("fan_mode", "high"), None);
    }
}
