use std::sync::Arc;

use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};

use crate::coordinator::{CoordinatorHandle, CoordinatorState};
use crate::tuya::{ApiError, CloudApi, DpCommand, DpMap};

use super::{
    DIAGNOSTIC_DPS, DP_MODE, DP_SWITCH, DP_TEMP_SET, DeviceStatus, HvacAction, HvacMode,
    scale_to_device,
};

/// Everything the climate surface shows for one device at one point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct ClimateState {
    pub available: bool,
    pub current_temperature: Option<f64>,
    pub target_temperature: Option<f64>,
    pub min_temp: f64,
    pub max_temp: f64,
    pub hvac_mode: HvacMode,
    pub hvac_action: Option<HvacAction>,
    pub preset_mode: Option<String>,
    pub preset_modes: Vec<String>,
    pub attributes: Map<String, Value>,
}

impl ClimateState {
    pub fn from_status(device_id: &str, status: DeviceStatus<'_>, available: bool) -> Self {
        Self {
            available,
            current_temperature: status.current_temperature(),
            target_temperature: status.target_temperature(),
            min_temp: status.min_temp(),
            max_temp: status.max_temp(),
            hvac_mode: status.hvac_mode(),
            hvac_action: status.hvac_action(),
            preset_mode: status.preset_mode(),
            preset_modes: status.preset_modes(),
            attributes: extra_attributes(device_id, status),
        }
    }
}

/// Diagnostic attributes: the raw DP map plus named aliases, passed through
/// without interpretation.
pub fn extra_attributes(device_id: &str, status: DeviceStatus<'_>) -> Map<String, Value> {
    let mut attrs = Map::new();
    attrs.insert("device_id".into(), json!(device_id));
    attrs.insert("tuya_dp".into(), Value::Object(status.raw().clone()));
    for (name, code) in DIAGNOSTIC_DPS {
        attrs.insert(name.into(), status.get(code).cloned().unwrap_or(Value::Null));
    }
    attrs
}

/// A user action on the climate entity.
#[derive(Debug, Clone, PartialEq)]
pub enum ClimateCommand {
    SetTemperature(f64),
    SetHvacMode(HvacMode),
    SetPresetMode(String),
}

/// One climate entity, bound to a device id in the coordinator's snapshot.
pub struct ThermostatEntity {
    device_id: String,
    api: Arc<dyn CloudApi>,
    coordinator: CoordinatorHandle,
}

impl ThermostatEntity {
    pub fn new(device_id: &str, api: Arc<dyn CloudApi>, coordinator: CoordinatorHandle) -> Self {
        Self {
            device_id: device_id.to_string(),
            api,
            coordinator,
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn unique_id(&self) -> String {
        format!("tuya_cloud_thermostat_{}", self.device_id)
    }

    pub fn name(&self) -> String {
        let chars: Vec<char> = self.device_id.chars().collect();
        let tail: String = chars[chars.len().saturating_sub(6)..].iter().collect();
        format!("Tuya Thermostat {tail}")
    }

    pub fn state(&self) -> ClimateState {
        self.state_from(&self.coordinator.current())
    }

    pub fn state_from(&self, coordinator: &CoordinatorState) -> ClimateState {
        let empty = DpMap::new();
        let dps = coordinator.data.get(&self.device_id).unwrap_or(&empty);
        ClimateState::from_status(
            &self.device_id,
            DeviceStatus::new(dps),
            coordinator.last_update_success,
        )
    }

    pub async fn apply(&self, command: ClimateCommand) -> Result<bool, ApiError> {
        match command {
            ClimateCommand::SetTemperature(t) => self.set_temperature(Some(t)).await,
            ClimateCommand::SetHvacMode(mode) => self.set_hvac_mode(mode).await,
            ClimateCommand::SetPresetMode(preset) => self.set_preset_mode(&preset).await,
        }
    }

    /// Clamp into the device's limits and write `temp_set`.
    pub async fn set_temperature(&self, requested: Option<f64>) -> Result<bool, ApiError> {
        let Some(requested) = requested else {
            return Ok(false);
        };
        let state = self.state();
        let clamped = requested.min(state.max_temp).max(state.min_temp);
        if clamped != requested {
            debug!(
                "Clamped temperature {} to {} for device {}",
                requested, clamped, self.device_id
            );
        }
        self.write(vec![DpCommand::new(DP_TEMP_SET, scale_to_device(clamped))])
            .await
    }

    pub async fn set_hvac_mode(&self, mode: HvacMode) -> Result<bool, ApiError> {
        let command = match mode {
            HvacMode::Off => DpCommand::new(DP_SWITCH, false),
            HvacMode::Heat => DpCommand::new(DP_SWITCH, true),
            other => {
                debug!("Unsupported hvac_mode={} for device={}", other, self.device_id);
                return Ok(false);
            }
        };
        self.write(vec![command]).await
    }

    /// Written verbatim (lowercased); the device decides what it accepts.
    pub async fn set_preset_mode(&self, preset: &str) -> Result<bool, ApiError> {
        self.write(vec![DpCommand::new(DP_MODE, preset.to_lowercase())])
            .await
    }

    /// Send a batch and, if the cloud accepted it, ask for an immediate poll.
    async fn write(&self, commands: Vec<DpCommand>) -> Result<bool, ApiError> {
        let accepted = self.api.send_commands(&self.device_id, &commands).await?;
        if accepted {
            info!("Device {} accepted {:?}", self.device_id, commands);
            self.coordinator.request_refresh();
        } else {
            warn!("Device {} rejected {:?}, not refreshing", self.device_id, commands);
        }
        Ok(accepted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::{Coordinator, DEFAULT_SCAN_INTERVAL};
    use crate::tuya::mock::MockCloud;

    async fn entity_with(dps: Value) -> (ThermostatEntity, Arc<MockCloud>, Coordinator) {
        let cloud = Arc::new(MockCloud::new());
        cloud.set_status("bf00000000abc123", dps);
        let (coordinator, handle) = Coordinator::new(
            cloud.clone(),
            vec!["bf00000000abc123".to_string()],
            DEFAULT_SCAN_INTERVAL,
        );
        coordinator.refresh().await.unwrap();
        let entity = ThermostatEntity::new("bf00000000abc123", cloud.clone(), handle);
        (entity, cloud, coordinator)
    }

    #[tokio::test]
    async fn naming() {
        let (entity, _, _) = entity_with(json!({})).await;
        assert_eq!(entity.unique_id(), "tuya_cloud_thermostat_bf00000000abc123");
        assert_eq!(entity.name(), "Tuya Thermostat abc123");
    }

    #[tokio::test]
    async fn state_reflects_snapshot() {
        let (entity, _, _) = entity_with(json!({
            "switch": true,
            "temp_current": 195,
            "temp_set": 210,
            "mode": "Manual",
            "work_state": "heating",
            "battery_percentage": 80,
        }))
        .await;

        let state = entity.state();
        assert!(state.available);
        assert_eq!(state.hvac_mode, HvacMode::Heat);
        assert_eq!(state.hvac_action, Some(HvacAction::Heating));
        assert_eq!(state.preset_mode.as_deref(), Some("manual"));
        assert!((state.current_temperature.unwrap() - 19.5).abs() < 1e-9);
        assert!((state.target_temperature.unwrap() - 21.0).abs() < 1e-9);
        assert_eq!(state.attributes["device_id"], json!("bf00000000abc123"));
        assert_eq!(state.attributes["battery_percentage"], json!(80));
        assert_eq!(state.attributes["child_lock"], Value::Null);
        assert_eq!(state.attributes["tuya_dp"]["mode"], json!("Manual"));
    }

    #[tokio::test]
    async fn unknown_device_reads_as_empty() {
        let cloud = Arc::new(MockCloud::new());
        let (_coordinator, handle) = Coordinator::new(cloud.clone(), vec![], DEFAULT_SCAN_INTERVAL);
        let entity = ThermostatEntity::new("missing", cloud, handle);

        let state = entity.state();
        assert_eq!(state.hvac_mode, HvacMode::Heat);
        assert_eq!(state.hvac_action, None);
        assert_eq!(state.min_temp, 5.0);
        assert_eq!(state.max_temp, 30.0);
        assert!(!state.available);
    }

    #[tokio::test]
    async fn set_temperature_clamps_to_max() {
        let (entity, cloud, _) = entity_with(json!({ "switch": true })).await;

        assert!(entity.set_temperature(Some(35.0)).await.unwrap());

        assert_eq!(
            cloud.sent(),
            vec![(
                "bf00000000abc123".to_string(),
                vec![DpCommand::new("temp_set", 300)]
            )]
        );
    }

    #[tokio::test]
    async fn set_temperature_clamps_to_device_min() {
        let (entity, cloud, _) =
            entity_with(json!({ "lower_temp": 100, "upper_temp": 250 })).await;

        entity.set_temperature(Some(3.0)).await.unwrap();
        entity.set_temperature(Some(21.5)).await.unwrap();

        let sent = cloud.sent();
        assert_eq!(sent[0].1, vec![DpCommand::new("temp_set", 100)]);
        assert_eq!(sent[1].1, vec![DpCommand::new("temp_set", 215)]);
    }

    #[tokio::test]
    async fn missing_temperature_is_a_no_op() {
        let (entity, cloud, _) = entity_with(json!({})).await;
        assert!(!entity.set_temperature(None).await.unwrap());
        assert!(cloud.sent().is_empty());
    }

    #[tokio::test]
    async fn hvac_mode_writes_switch() {
        let (entity, cloud, _) = entity_with(json!({})).await;

        entity.set_hvac_mode(HvacMode::Off).await.unwrap();
        entity.set_hvac_mode(HvacMode::Heat).await.unwrap();
        assert!(!entity.set_hvac_mode(HvacMode::Cool).await.unwrap());

        let sent: Vec<_> = cloud.sent().into_iter().map(|(_, c)| c).collect();
        assert_eq!(
            sent,
            vec![
                vec![DpCommand::new("switch", false)],
                vec![DpCommand::new("switch", true)],
            ]
        );
    }

    #[tokio::test]
    async fn preset_is_lowercased_and_unvalidated() {
        let (entity, cloud, _) = entity_with(json!({})).await;

        entity.set_preset_mode("Party").await.unwrap();

        assert_eq!(cloud.sent()[0].1, vec![DpCommand::new("mode", "party")]);
    }

    #[tokio::test]
    async fn apply_dispatches() {
        let (entity, cloud, _) = entity_with(json!({})).await;

        entity.apply(ClimateCommand::SetTemperature(18.0)).await.unwrap();
        entity.apply(ClimateCommand::SetHvacMode(HvacMode::Heat)).await.unwrap();
        entity.apply(ClimateCommand::SetPresetMode("AWAY".into())).await.unwrap();

        let sent: Vec<_> = cloud.sent().into_iter().flat_map(|(_, c)| c).collect();
        assert_eq!(
            sent,
            vec![
                DpCommand::new("temp_set", 180),
                DpCommand::new("switch", true),
                DpCommand::new("mode", "away"),
            ]
        );
    }

    #[tokio::test]
    async fn rejected_write_leaves_state_and_skips_refresh() {
        let (entity, cloud, mut coordinator) =
            entity_with(json!({ "switch": true, "temp_set": 200 })).await;
        let before = entity.state();

        *cloud.accept_commands.lock().unwrap() = false;
        assert!(!entity.set_hvac_mode(HvacMode::Off).await.unwrap());
        assert!(!entity.set_temperature(Some(25.0)).await.unwrap());

        assert!(!coordinator.take_refresh_request());
        assert_eq!(entity.state(), before);
        assert_eq!(cloud.sent().len(), 2);
    }

    #[tokio::test]
    async fn accepted_write_requests_refresh() {
        let (entity, _, mut coordinator) = entity_with(json!({ "switch": true })).await;

        assert!(entity.set_hvac_mode(HvacMode::Off).await.unwrap());

        assert!(coordinator.take_refresh_request());
        // Local state only changes once the next poll lands.
        assert_eq!(entity.state().hvac_mode, HvacMode::Heat);
    }
}
