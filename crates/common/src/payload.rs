// Transferable payload: flat string map carried across the UI/background boundary

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::{port_from_i64, ConfigSink, ConfigSource, PersistedConfig, LISTENING_KEY, PORT_KEY};
use crate::error::{Error, Result};

/// Flat key-value map of strings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(BTreeMap<String, String>);

impl Payload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Encode for transport
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a transported payload. Only the envelope must be valid JSON;
    /// field values are checked when a config is loaded from it.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

impl From<&PersistedConfig> for Payload {
    fn from(config: &PersistedConfig) -> Self {
        let mut payload = Payload::new();
        config.save(&mut payload);
        payload
    }
}

impl ConfigSource for Payload {
    fn read_port(&self) -> Result<Option<u16>> {
        let Some(raw) = self.get(PORT_KEY) else {
            return Ok(None);
        };
        let value = raw.trim().parse::<i64>().map_err(|_| Error::ConfigInvalid {
            key: PORT_KEY,
            value: raw.to_string(),
        })?;
        port_from_i64(value).map(Some)
    }

    fn read_listening(&self) -> Result<Option<bool>> {
        match self.get(LISTENING_KEY) {
            None => Ok(None),
            Some(raw) => raw
                .trim()
                .parse::<bool>()
                .map(Some)
                .map_err(|_| Error::ConfigInvalid {
                    key: LISTENING_KEY,
                    value: raw.to_string(),
                }),
        }
    }
}

impl ConfigSink for Payload {
    fn write_port(&mut self, port: u16) {
        self.insert(PORT_KEY, port.to_string());
    }

    fn write_listening(&mut self, listening: bool) {
        self.insert(LISTENING_KEY, listening.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_round_trip_through_json() {
        let config = PersistedConfig::default()
            .edit()
            .port(443)
            .listening(true)
            .build();

        let json = Payload::from(&config).to_json().unwrap();
        assert_eq!(json, r#"{"listening":"true","port":"443"}"#);

        let payload = Payload::from_json(&json).unwrap();
        assert_eq!(PersistedConfig::load(&payload), config);
    }

    #[test]
    fn test_missing_and_malformed_fields_default() {
        let mut payload = Payload::new();
        assert_eq!(PersistedConfig::load(&payload), PersistedConfig::default());

        payload.insert(PORT_KEY, "http");
        payload.insert(LISTENING_KEY, "true");
        let config = PersistedConfig::load(&payload);
        assert_eq!(config.port(), 9090);
        assert!(config.listening());

        payload.insert(PORT_KEY, " 8081 ");
        payload.insert(LISTENING_KEY, "maybe");
        let config = PersistedConfig::load(&payload);
        assert_eq!(config.port(), 8081);
        assert!(!config.listening());
    }

    #[test]
    fn test_from_json_rejects_non_map() {
        assert!(Payload::from_json("[1,2]").is_err());
        assert!(Payload::from_json(r#"{"port": 80}"#).is_err());
    }
}
