pub mod client;
pub mod error;
pub mod sign;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};

pub use error::ApiError;

/// Flat DP code → value mapping for one device.
pub type DpMap = Map<String, Value>;

/// A single DP write, sent as part of a batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DpCommand {
    pub code: String,
    pub value: Value,
}

impl DpCommand {
    pub fn new(code: &str, value: impl Into<Value>) -> Self {
        Self {
            code: code.to_string(),
            value: value.into(),
        }
    }
}

/// A device as returned by the account's device listing. The vendor adds
/// fields freely, so the raw object is kept and read through accessors.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceDescriptor(pub Map<String, Value>);

impl DeviceDescriptor {
    pub fn id(&self) -> Option<&str> {
        self.str_field("id")
    }

    pub fn name(&self) -> Option<&str> {
        self.str_field("name")
    }

    pub fn category(&self) -> Option<&str> {
        self.str_field("category")
    }

    pub fn product_name(&self) -> Option<&str> {
        self.str_field("product_name")
    }

    pub fn online(&self) -> Option<bool> {
        self.0
            .get("online")
            .or_else(|| self.0.get("is_online"))
            .and_then(Value::as_bool)
    }

    fn str_field(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
    }
}

/// Operations the rest of the bridge needs from the Tuya cloud.
///
/// Read paths degrade to an empty map when the backend reports failure, so one
/// misbehaving device never blanks out the others. They still return `Err` for
/// transport problems, which the coordinator treats as a failed cycle.
#[async_trait]
pub trait CloudApi: Send + Sync {
    async fn list_devices(&self) -> Result<Vec<DeviceDescriptor>, ApiError>;

    async fn get_device_status(&self, device_id: &str) -> Result<DpMap, ApiError>;

    async fn get_device_shadow_properties(&self, device_id: &str) -> Result<DpMap, ApiError>;

    async fn get_device_functions(&self, device_id: &str) -> Result<DpMap, ApiError>;

    /// Returns whether the cloud accepted the batch.
    async fn send_commands(&self, device_id: &str, commands: &[DpCommand])
    -> Result<bool, ApiError>;

    /// Shadow properties carry DPs (such as `work_state`) that the plain status
    /// endpoint leaves out, so they are fetched first and win on conflicts.
    async fn get_device_status_map(&self, device_id: &str) -> Result<DpMap, ApiError> {
        let shadow = self.get_device_shadow_properties(device_id).await?;
        let status = self.get_device_status(device_id).await?;
        Ok(merge_status(shadow, status))
    }
}

/// Overlay `shadow` onto `status`. If only one side has data it is returned
/// as is.
pub fn merge_status(shadow: DpMap, status: DpMap) -> DpMap {
    match (shadow.is_empty(), status.is_empty()) {
        (false, false) => {
            let mut merged = status;
            merged.extend(shadow);
            merged
        }
        (false, true) => shadow,
        _ => status,
    }
}

/// Flatten a `[{code, value}, ...]` list into a `DpMap`. Entries without a
/// string `code` are skipped.
pub fn flatten_code_values(items: &[Value]) -> DpMap {
    items
        .iter()
        .filter_map(|item| {
            let code = item.get("code")?.as_str()?;
            let value = item.get("value").cloned().unwrap_or(Value::Null);
            Some((code.to_string(), value))
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod mock {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;

    /// In-memory stand-in for the cloud. Devices listed in `failing` return a
    /// transport-style error from every read.
    #[derive(Default)]
    pub struct MockCloud {
        pub shadow: Mutex<HashMap<String, DpMap>>,
        pub status: Mutex<HashMap<String, DpMap>>,
        pub failing: Mutex<Vec<String>>,
        pub accept_commands: Mutex<bool>,
        pub sent: Mutex<Vec<(String, Vec<DpCommand>)>>,
        pub status_calls: Mutex<Vec<String>>,
    }

    impl MockCloud {
        pub fn new() -> Self {
            Self {
                accept_commands: Mutex::new(true),
                ..Default::default()
            }
        }

        pub fn set_status(&self, device_id: &str, value: Value) {
            self.status
                .lock()
                .unwrap()
                .insert(device_id.to_string(), as_map(value));
        }

        pub fn set_shadow(&self, device_id: &str, value: Value) {
            self.shadow
                .lock()
                .unwrap()
                .insert(device_id.to_string(), as_map(value));
        }

        pub fn fail(&self, device_id: &str) {
            self.failing.lock().unwrap().push(device_id.to_string());
        }

        pub fn heal(&self) {
            self.failing.lock().unwrap().clear();
        }

        pub fn sent(&self) -> Vec<(String, Vec<DpCommand>)> {
            self.sent.lock().unwrap().clone()
        }

        fn check(&self, device_id: &str) -> Result<(), ApiError> {
            if self.failing.lock().unwrap().iter().any(|d| d == device_id) {
                return Err(ApiError::Decode(format!("simulated failure for {device_id}")));
            }
            Ok(())
        }
    }

    pub fn as_map(value: Value) -> DpMap {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[async_trait]
    impl CloudApi for MockCloud {
        async fn list_devices(&self) -> Result<Vec<DeviceDescriptor>, ApiError> {
            let mut ids: Vec<String> = self.status.lock().unwrap().keys().cloned().collect();
            ids.sort();
            Ok(ids
                .into_iter()
                .map(|id| DeviceDescriptor(as_map(serde_json::json!({ "id": id }))))
                .collect())
        }

        async fn get_device_status(&self, device_id: &str) -> Result<DpMap, ApiError> {
            self.status_calls.lock().unwrap().push(device_id.to_string());
            self.check(device_id)?;
            Ok(self
                .status
                .lock()
                .unwrap()
                .get(device_id)
                .cloned()
                .unwrap_or_default())
        }

        async fn get_device_shadow_properties(&self, device_id: &str) -> Result<DpMap, ApiError> {
            self.check(device_id)?;
            Ok(self
                .shadow
                .lock()
                .unwrap()
                .get(device_id)
                .cloned()
                .unwrap_or_default())
        }

        async fn get_device_functions(&self, _device_id: &str) -> Result<DpMap, ApiError> {
            Ok(DpMap::new())
        }

        async fn send_commands(
            &self,
            device_id: &str,
            commands: &[DpCommand],
        ) -> Result<bool, ApiError> {
            self.sent
                .lock()
                .unwrap()
                .push((device_id.to_string(), commands.to_vec()));
            Ok(*self.accept_commands.lock().unwrap())
        }
    }
}
