use serde::Deserialize;
use serde_json::{Map, Value};

use super::CameraError;

/// Snapshot resolution accepted by `snapshot.sh`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Low,
    High,
}

impl Resolution {
    pub fn as_query(self) -> &'static str {
        match self {
            Resolution::Low => "low",
            // the firmware spells it this way
            Resolution::High => "hight",
        }
    }
}

/// One hourly event folder, newest first as returned by `eventsdir.sh`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EventDirectoryEntry {
    pub datetime: String,
    pub dirname: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EventFileEntry {
    pub time: String,
    pub filename: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EventFiles {
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub records: Vec<EventFileEntry>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct EventDirectories {
    #[serde(default)]
    pub records: Vec<EventDirectoryEntry>,
}

/// Broker parameters reported by the camera's own `conf=mqtt` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusSettings {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub prefix: String,
}

impl BusSettings {
    pub fn from_config(conf: &Map<String, Value>) -> Result<Self, CameraError> {
        let host = setting(conf, "MQTT_IP").ok_or(CameraError::MissingSetting("MQTT_IP"))?;
        let port = setting(conf, "MQTT_PORT")
            .and_then(|p| p.parse().ok())
            .ok_or(CameraError::MissingSetting("MQTT_PORT"))?;
        let prefix =
            setting(conf, "MQTT_PREFIX").ok_or(CameraError::MissingSetting("MQTT_PREFIX"))?;

        Ok(Self {
            host,
            port,
            username: setting(conf, "MQTT_USER"),
            password: setting(conf, "MQTT_PASSWORD"),
            prefix: prefix.trim_end_matches('/').to_string(),
        })
    }
}

/// Whether the `conf=system` section reports the MQTT client as switched on.
pub fn bus_enabled(system: &Map<String, Value>) -> bool {
    setting(system, "MQTT").as_deref() == Some("yes")
}

/// Config values come back as strings on most firmware, numbers on some.
fn setting(conf: &Map<String, Value>, key: &str) -> Option<String> {
    match conf.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(if *b { "yes" } else { "no" }.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_bus_settings_from_strings() {
        let conf = map(json!({
            "MQTT_IP": "10.0.0.2",
            "MQTT_PORT": "1883",
            "MQTT_USER": "user",
            "MQTT_PASSWORD": "",
            "MQTT_PREFIX": "yicam_garden/",
        }));
        let settings = BusSettings::from_config(&conf).unwrap();
        assert_eq!(settings.host, "10.0.0.2");
        assert_eq!(settings.port, 1883);
        assert_eq!(settings.username.as_deref(), Some("user"));
        assert_eq!(settings.password, None);
        assert_eq!(settings.prefix, "yicam_garden");
    }

    #[test]
    fn test_bus_settings_numeric_port() {
        let conf = map(json!({"MQTT_IP": "h", "MQTT_PORT": 1884, "MQTT_PREFIX": "p"}));
        assert_eq!(BusSettings::from_config(&conf).unwrap().port, 1884);
    }

    #[test]
    fn test_bus_settings_missing_prefix() {
        let conf = map(json!({"MQTT_IP": "h", "MQTT_PORT": "1883"}));
        assert!(matches!(
            BusSettings::from_config(&conf),
            Err(CameraError::MissingSetting("MQTT_PREFIX"))
        ));
    }

    #[test]
    fn test_bus_enabled_flag() {
        assert!(bus_enabled(&map(json!({"MQTT": "yes"}))));
        assert!(!bus_enabled(&map(json!({"MQTT": "no"}))));
        assert!(!bus_enabled(&map(json!({}))));
    }

    #[test]
    fn test_event_files_tolerates_missing_fields() {
        let files: EventFiles = serde_json::from_str(r#"{"records": []}"#).unwrap();
        assert!(files.date.is_empty());
        assert!(files.records.is_empty());
    }

    #[test]
    fn test_high_resolution_wire_value() {
        assert_eq!(Resolution::High.as_query(), "hight");
        assert_eq!(Resolution::Low.as_query(), "low");
    }
}
