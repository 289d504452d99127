use std::collections::HashSet;
use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub mqtt: MqttConfig,
    pub tuya: TuyaConfig,
}

#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub broker_host: String,
    pub broker_port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub topic_prefix: String,
    pub client_id: String,
    pub discovery_prefix: String,
}

#[derive(Debug, Clone)]
pub struct TuyaConfig {
    pub endpoint: String,
    pub access_id: String,
    pub access_secret: String,
    /// Ordered as configured; duplicates are rejected.
    pub device_ids: Vec<String>,
}

/// Regional OpenAPI endpoints, selectable with `TUYA_REGION`.
pub const REGION_HINTS: [(&str, &str); 4] = [
    ("EU", "https://openapi.tuyaeu.com"),
    ("US", "https://openapi.tuyaus.com"),
    ("CN", "https://openapi.tuyacn.com"),
    ("IN", "https://openapi.tuyain.com"),
];

pub const DEFAULT_REGION: &str = "EU";

fn env_required(key: &str) -> Result<String, String> {
    env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| format!("{key} environment variable is required"))
}

fn env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_or_default<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl TuyaConfig {
    /// Credentials and endpoint only; enough to connect and list devices.
    pub fn from_env() -> Result<Self, String> {
        let endpoint = match env_optional("TUYA_ENDPOINT") {
            Some(endpoint) => endpoint,
            None => {
                let region = env_or_default("TUYA_REGION", DEFAULT_REGION.to_string());
                region_endpoint(&region)
                    .ok_or_else(|| format!("Unknown TUYA_REGION '{region}' (expected EU, US, CN or IN)"))?
                    .to_string()
            }
        };
        Ok(Self {
            endpoint,
            access_id: env_required("TUYA_ACCESS_ID")?,
            access_secret: env_required("TUYA_ACCESS_SECRET")?,
            device_ids: env_optional("TUYA_DEVICE_IDS")
                .map(|ids| parse_device_ids(&ids))
                .transpose()?
                .unwrap_or_default(),
        })
    }
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let config = Self {
            mqtt: MqttConfig {
                broker_host: env_required("MQTT_BROKER_HOST")?,
                broker_port: env_or_default("MQTT_BROKER_PORT", 1883),
                username: env_optional("MQTT_USERNAME"),
                password: env_optional("MQTT_PASSWORD"),
                topic_prefix: env_or_default("MQTT_TOPIC_PREFIX", "tuya_thermostat".to_string()),
                client_id: env_or_default("MQTT_CLIENT_ID", "tuya-cloud-thermostat".to_string()),
                discovery_prefix: env_or_default(
                    "MQTT_DISCOVERY_PREFIX",
                    "homeassistant".to_string(),
                ),
            },
            tuya: TuyaConfig::from_env()?,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), String> {
        if self.tuya.device_ids.is_empty() {
            return Err("TUYA_DEVICE_IDS must list at least one device".into());
        }
        if !self.tuya.endpoint.starts_with("http://") && !self.tuya.endpoint.starts_with("https://")
        {
            return Err(format!("TUYA_ENDPOINT '{}' is not an http(s) URL", self.tuya.endpoint));
        }
        for (key, value) in [
            ("MQTT_TOPIC_PREFIX", &self.mqtt.topic_prefix),
            ("MQTT_DISCOVERY_PREFIX", &self.mqtt.discovery_prefix),
        ] {
            if value.is_empty() || value.contains(['+', '#']) {
                return Err(format!("{key} must be a non-empty topic without wildcards"));
            }
        }
        Ok(())
    }

    pub fn bridge_status_topic(&self) -> String {
        format!("{}/bridge_status", self.mqtt.topic_prefix)
    }

    pub fn availability_topic(&self, device_id: &str) -> String {
        format!("{}/{}/availability", self.mqtt.topic_prefix, device_id)
    }

    pub fn state_topic(&self, device_id: &str, field: &str) -> String {
        format!("{}/{}/state/{}", self.mqtt.topic_prefix, device_id, field)
    }

    pub fn command_topic(&self, device_id: &str, field: &str) -> String {
        format!("{}/{}/command/{}", self.mqtt.topic_prefix, device_id, field)
    }

    pub fn command_topic_filter(&self, device_id: &str) -> String {
        format!("{}/{}/command/#", self.mqtt.topic_prefix, device_id)
    }

    pub fn attributes_topic(&self, device_id: &str) -> String {
        format!("{}/{}/attributes", self.mqtt.topic_prefix, device_id)
    }

    pub fn discovery_topic(&self, object_id: &str) -> String {
        format!("{}/climate/{}/config", self.mqtt.discovery_prefix, object_id)
    }
}

pub fn region_endpoint(region: &str) -> Option<&'static str> {
    REGION_HINTS
        .iter()
        .find(|(code, _)| code.eq_ignore_ascii_case(region.trim()))
        .map(|(_, url)| *url)
}

/// Split a comma-separated device list, keeping order. Ids end up in MQTT
/// topics, so topic separators and wildcards are rejected.
pub fn parse_device_ids(raw: &str) -> Result<Vec<String>, String> {
    let mut seen = HashSet::new();
    let mut ids = Vec::new();
    for id in raw.split(',').map(str::trim).filter(|id| !id.is_empty()) {
        if id.contains(['/', '+', '#']) {
            return Err(format!("Device id '{id}' contains an MQTT topic character"));
        }
        if !seen.insert(id) {
            return Err(format!("Device id '{id}' is listed more than once"));
        }
        ids.push(id.to_string());
    }
    Ok(ids)
}

/// Convert an id into a safe MQTT discovery object id.
/// "bf12:AB" → "bf12_ab"
pub fn sanitize_object_id(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect::<String>()
        .trim_matches('_')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_ids_keep_order() {
        assert_eq!(
            parse_device_ids(" bf2 , bf1,,bf3 ").unwrap(),
            vec!["bf2", "bf1", "bf3"]
        );
        assert!(parse_device_ids("").unwrap().is_empty());
    }

    #[test]
    fn device_ids_reject_duplicates_and_wildcards() {
        assert!(parse_device_ids("a,b,a").unwrap_err().contains("more than once"));
        assert!(parse_device_ids("a,b/c").is_err());
        assert!(parse_device_ids("a,#").is_err());
    }

    #[test]
    fn regions() {
        assert_eq!(region_endpoint("eu"), Some("https://openapi.tuyaeu.com"));
        assert_eq!(region_endpoint(" US "), Some("https://openapi.tuyaus.com"));
        assert_eq!(region_endpoint("XX"), None);
        assert_eq!(region_endpoint(DEFAULT_REGION), Some(REGION_HINTS[0].1));
    }

    #[test]
    fn object_ids() {
        assert_eq!(sanitize_object_id("bf12:AB"), "bf12_ab");
        assert_eq!(sanitize_object_id("__x__"), "x");
    }

    fn sample() -> Config {
        Config {
            mqtt: MqttConfig {
                broker_host: "localhost".into(),
                broker_port: 1883,
                username: None,
                password: None,
                topic_prefix: "tuya_thermostat".into(),
                client_id: "test".into(),
                discovery_prefix: "homeassistant".into(),
            },
            tuya: TuyaConfig {
                endpoint: "https://openapi.tuyaeu.com".into(),
                access_id: "id".into(),
                access_secret: "secret".into(),
                device_ids: vec!["bf1".into()],
            },
        }
    }

    #[test]
    fn topics() {
        let config = sample();
        assert_eq!(config.state_topic("bf1", "mode"), "tuya_thermostat/bf1/state/mode");
        assert_eq!(config.command_topic_filter("bf1"), "tuya_thermostat/bf1/command/#");
        assert_eq!(
            config.discovery_topic("tuya_cloud_thermostat_bf1"),
            "homeassistant/climate/tuya_cloud_thermostat_bf1/config"
        );
        assert_eq!(config.bridge_status_topic(), "tuya_thermostat/bridge_status");
    }

    #[test]
    fn validation() {
        assert!(sample().validate().is_ok());

        let mut config = sample();
        config.tuya.device_ids.clear();
        assert!(config.validate().is_err());

        let mut config = sample();
        config.mqtt.topic_prefix = "tuya/#".into();
        assert!(config.validate().is_err());

        let mut config = sample();
        config.tuya.endpoint = "openapi.tuyaeu.com".into();
        assert!(config.validate().is_err());
    }
}
