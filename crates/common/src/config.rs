// Desired forwarding state and its storage/payload codecs

use std::num::NonZeroU16;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Key holding the listener port in storage records and payloads
pub const PORT_KEY: &str = "port";
/// Key holding the on/off flag in storage records and payloads
pub const LISTENING_KEY: &str = "listening";

pub const DEFAULT_PORT: u16 = 9090;

const DEFAULT_PORT_NZ: NonZeroU16 = match NonZeroU16::new(DEFAULT_PORT) {
    Some(port) => port,
    None => panic!("default port must be non-zero"),
};

/// Something a `PersistedConfig` can be read back from.
///
/// `Ok(None)` means the key is absent; `Err` means it is present but unusable.
pub trait ConfigSource {
    fn read_port(&self) -> Result<Option<u16>>;
    fn read_listening(&self) -> Result<Option<bool>>;
}

/// Something a `PersistedConfig` can be written into
pub trait ConfigSink {
    fn write_port(&mut self, port: u16);
    fn write_listening(&mut self, listening: bool);
}

/// Desired state of the forwarding listener.
///
/// Immutable snapshot; changes go through [`PersistedConfig::edit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PersistedConfig {
    port: NonZeroU16,
    listening: bool,
}

impl Default for PersistedConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT_NZ,
            listening: false,
        }
    }
}

impl PersistedConfig {
    pub fn port(&self) -> u16 {
        self.port.get()
    }

    pub fn listening(&self) -> bool {
        self.listening
    }

    /// Start an edit seeded with the current values
    pub fn edit(&self) -> ConfigEditor {
        ConfigEditor {
            port: self.port,
            listening: self.listening,
        }
    }

    /// Same config with `listening` flipped
    pub fn toggled(&self) -> Self {
        self.edit().listening(!self.listening).build()
    }

    /// Rebuild from storage or a payload.
    ///
    /// Never fails: absent keys take their defaults, malformed or out-of-range
    /// values are logged and replaced by the default.
    pub fn load(source: &impl ConfigSource) -> Self {
        let defaults = Self::default();

        let port = match source.read_port() {
            Ok(Some(port)) => NonZeroU16::new(port).unwrap_or(defaults.port),
            Ok(None) => {
                debug!("No stored port, using default {}", DEFAULT_PORT);
                defaults.port
            }
            Err(e) => {
                warn!("{}; falling back to port {}", e, DEFAULT_PORT);
                defaults.port
            }
        };

        let listening = match source.read_listening() {
            Ok(Some(listening)) => listening,
            Ok(None) => defaults.listening,
            Err(e) => {
                warn!("{}; assuming not listening", e);
                defaults.listening
            }
        };

        Self { port, listening }
    }

    /// Write both fields into `destination`
    pub fn save(&self, destination: &mut impl ConfigSink) {
        destination.write_port(self.port());
        destination.write_listening(self.listening);
    }
}

/// Builder returned by [`PersistedConfig::edit`]
#[derive(Debug, Clone, Copy)]
pub struct ConfigEditor {
    port: NonZeroU16,
    listening: bool,
}

impl ConfigEditor {
    /// Set the port. Port 0 is not a valid listener port and is ignored.
    pub fn port(mut self, port: u16) -> Self {
        match NonZeroU16::new(port) {
            Some(port) => self.port = port,
            None => warn!("Ignoring invalid port 0, keeping :{}", self.port),
        }
        self
    }

    pub fn listening(mut self, listening: bool) -> Self {
        self.listening = listening;
        self
    }

    pub fn build(self) -> PersistedConfig {
        PersistedConfig {
            port: self.port,
            listening: self.listening,
        }
    }
}

/// Validate a raw integer as a listener port (1-65535)
pub fn port_from_i64(value: i64) -> Result<u16> {
    u16::try_from(value)
        .ok()
        .filter(|port| *port != 0)
        .ok_or_else(|| Error::ConfigInvalid {
            key: PORT_KEY,
            value: value.to_string(),
        })
}

// Persistent storage record: `port` integer, `listening` boolean
impl ConfigSource for toml::Table {
    fn read_port(&self) -> Result<Option<u16>> {
        match self.get(PORT_KEY) {
            None => Ok(None),
            Some(toml::Value::Integer(n)) => port_from_i64(*n).map(Some),
            Some(other) => Err(Error::ConfigInvalid {
                key: PORT_KEY,
                value: other.to_string(),
            }),
        }
    }

    fn read_listening(&self) -> Result<Option<bool>> {
        match self.get(LISTENING_KEY) {
            None => Ok(None),
            Some(toml::Value::Boolean(b)) => Ok(Some(*b)),
            Some(other) => Err(Error::ConfigInvalid {
                key: LISTENING_KEY,
                value: other.to_string(),
            }),
        }
    }
}

impl ConfigSink for toml::Table {
    fn write_port(&mut self, port: u16) {
        self.insert(PORT_KEY.to_string(), toml::Value::Integer(port.into()));
    }

    fn write_listening(&mut self, listening: bool) {
        self.insert(LISTENING_KEY.to_string(), toml::Value::Boolean(listening));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PersistedConfig::default();
        assert_eq!(config.port(), 9090);
        assert!(!config.listening());
    }

    #[test]
    fn test_edit_leaves_original_untouched() {
        let original = PersistedConfig::default();
        let edited = original.edit().port(8080).listening(true).build();

        assert_eq!(original, PersistedConfig::default());
        assert_eq!(edited.port(), 8080);
        assert!(edited.listening());
    }

    #[test]
    fn test_edit_ignores_port_zero() {
        let config = PersistedConfig::default().edit().port(7000).port(0).build();
        assert_eq!(config.port(), 7000);
    }

    #[test]
    fn test_toggled_flips_only_listening() {
        let config = PersistedConfig::default().edit().port(1234).build();
        let on = config.toggled();
        assert!(on.listening());
        assert_eq!(on.port(), 1234);
        assert_eq!(on.toggled(), config);
    }

    #[test]
    fn test_table_round_trip() {
        for (port, listening) in [(1u16, false), (9090, true), (65535, true)] {
            let config = PersistedConfig::default()
                .edit()
                .port(port)
                .listening(listening)
                .build();
            let mut table = toml::Table::new();
            config.save(&mut table);
            assert_eq!(PersistedConfig::load(&table), config);
        }
    }

    #[test]
    fn test_load_empty_table_gives_defaults() {
        assert_eq!(
            PersistedConfig::load(&toml::Table::new()),
            PersistedConfig::default()
        );
    }

    #[test]
    fn test_load_recovers_from_invalid_fields() {
        let table: toml::Table = toml::from_str("port = 70000\nlistening = true").unwrap();
        let config = PersistedConfig::load(&table);
        assert_eq!(config.port(), DEFAULT_PORT);
        assert!(config.listening());

        let table: toml::Table = toml::from_str("port = 0\nlistening = \"yes\"").unwrap();
        assert_eq!(PersistedConfig::load(&table), PersistedConfig::default());

        let table: toml::Table = toml::from_str("port = -5\nlistening = false").unwrap();
        assert_eq!(PersistedConfig::load(&table).port(), DEFAULT_PORT);
    }

    #[test]
    fn test_port_from_i64_bounds() {
        assert_eq!(port_from_i64(1).unwrap(), 1);
        assert_eq!(port_from_i64(65535).unwrap(), 65535);
        assert!(port_from_i64(0).is_err());
        assert!(port_from_i64(65536).is_err());
        assert!(port_from_i64(-1).is_err());
    }
}
