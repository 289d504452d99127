//! First-time setup: check credentials, list the account's devices and
//! validate the device selection before the bridge is started with it.

use std::collections::HashSet;

use thiserror::Error;
use tracing::error;

use crate::tuya::client::TuyaCloudClient;
use crate::tuya::{ApiError, CloudApi, DeviceDescriptor, DpMap};

#[derive(Debug, Error)]
pub enum OnboardingError {
    #[error("Failed to connect to Tuya cloud: {0}")]
    CannotConnect(#[source] ApiError),

    #[error("No devices found for this account")]
    NoDevicesFound,

    #[error("Device {0} is not visible to this account")]
    UnknownDevice(String),

    #[error("Device {0} is selected more than once")]
    DuplicateDevice(String),
}

impl OnboardingError {
    /// Stable code shown to the user.
    pub fn code(&self) -> &'static str {
        match self {
            OnboardingError::CannotConnect(_) => "cannot_connect",
            OnboardingError::NoDevicesFound => "no_devices_found",
            OnboardingError::UnknownDevice(_) => "unknown_device",
            OnboardingError::DuplicateDevice(_) => "duplicate_device",
        }
    }
}

/// Connect and list devices. Any failure is reported as `cannot_connect`.
pub async fn discover(client: &TuyaCloudClient) -> Result<Vec<DeviceDescriptor>, OnboardingError> {
    let result = async {
        client.connect().await?;
        client.list_devices().await
    }
    .await;
    let devices = result.map_err(|e| {
        error!("Failed to connect to Tuya cloud: {}", e);
        OnboardingError::CannotConnect(e)
    })?;
    if candidate_ids(&devices).is_empty() {
        return Err(OnboardingError::NoDevicesFound);
    }
    Ok(devices)
}

/// Ids of listed devices that can be selected.
pub fn candidate_ids(devices: &[DeviceDescriptor]) -> Vec<&str> {
    devices.iter().filter_map(DeviceDescriptor::id).collect()
}

/// Every selected id must be listed, and only once. Not all listed devices
/// are thermostats; the user decides.
pub fn validate_selection(
    devices: &[DeviceDescriptor],
    selected: &[String],
) -> Result<(), OnboardingError> {
    let candidates: HashSet<&str> = candidate_ids(devices).into_iter().collect();
    let mut seen = HashSet::new();
    for id in selected {
        if !seen.insert(id.as_str()) {
            return Err(OnboardingError::DuplicateDevice(id.clone()));
        }
        if !candidates.contains(id.as_str()) {
            return Err(OnboardingError::UnknownDevice(id.clone()));
        }
    }
    Ok(())
}

/// One line per device for the `list-devices` output.
pub fn describe(device: &DeviceDescriptor, selected: &[String]) -> String {
    let id = device.id().unwrap_or("?");
    let marker = if selected.iter().any(|s| s == id) { "*" } else { " " };
    let online = match device.online() {
        Some(true) => "online",
        Some(false) => "offline",
        None => "unknown",
    };
    format!(
        "{marker} {id}  {}  [{}] {}  ({online})",
        device.name().unwrap_or("-"),
        device.category().unwrap_or("-"),
        device.product_name().unwrap_or(""),
    )
}

/// Function metadata is informational; failures degrade to an empty map.
pub async fn functions(client: &dyn CloudApi, device_id: &str) -> DpMap {
    client
        .get_device_functions(device_id)
        .await
        .unwrap_or_default()
}
