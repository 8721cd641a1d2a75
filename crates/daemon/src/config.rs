// Port Forward - Daemon Config Module
// Handles daemon configuration (bind host, upstream, timeouts, state location)

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use port_forward_common::{is_loopback_address, parse_host_port, StateStore, APP_DIR};

use crate::tcp_engine::RelaySettings;

/// Daemon configuration
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct DaemonConfig {
    /// Host the forwarding listener binds on
    #[serde(default = "default_bind_host")]
    pub bind_host: String,

    /// Address (`host:port`) accepted connections are relayed to
    #[serde(default = "default_upstream")]
    pub upstream: String,

    /// Override for the desired-state file
    /// Default: ~/.config/port-forward/state.toml
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_path: Option<PathBuf>,

    /// Seconds to wait when dialing the upstream
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Milliseconds a stopping listener gets to wind down before it is aborted
    #[serde(default = "default_stop_grace_ms")]
    pub stop_grace_ms: u64,
}

fn default_bind_host() -> String {
    "0.0.0.0".to_string()
}

fn default_upstream() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_stop_grace_ms() -> u64 {
    100
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            bind_host: default_bind_host(),
            upstream: default_upstream(),
            state_path: None,
            connect_timeout_secs: default_connect_timeout_secs(),
            stop_grace_ms: default_stop_grace_ms(),
        }
    }
}

impl DaemonConfig {
    /// Validate the daemon configuration
    pub fn validate(&self) -> Result<()> {
        if self.bind_host.trim().is_empty() {
            anyhow::bail!("bind_host must not be empty");
        }

        parse_host_port(&self.upstream)
            .with_context(|| format!("Invalid upstream '{}'", self.upstream))?;

        if self.connect_timeout_secs == 0 {
            anyhow::bail!("connect_timeout_secs must be greater than zero");
        }

        if !is_loopback_address(&self.bind_host) {
            warn!(
                "Listener will bind on non-loopback host {}; forwarded port is reachable from the network",
                self.bind_host
            );
        }

        Ok(())
    }

    /// Load daemon configuration from `path`, or the default location.
    /// A missing file is created with defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::config_path()?,
        };

        if !config_path.exists() {
            info!("No daemon configuration found, using defaults");
            info!("Configuration will be saved to: {}", config_path.display());
            let config = Self::default();
            config.save_to(&config_path)?;
            return Ok(config);
        }

        let contents = fs::read_to_string(&config_path)
            .context("Failed to read daemon configuration")?;

        let config: Self = toml::from_str(&contents)
            .context("Failed to parse daemon configuration")?;

        config.validate()
            .context("Configuration validation failed")?;

        info!("Loaded daemon configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Save daemon configuration to `path`
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .context("Failed to create configuration directory")?;
        }

        let contents = toml::to_string_pretty(self)
            .context("Failed to serialize daemon configuration")?;

        fs::write(path, contents)
            .context("Failed to write daemon configuration")?;

        info!("Saved daemon configuration to: {}", path.display());
        Ok(())
    }

    /// Get the path to the daemon configuration file
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        Ok(config_dir.join(APP_DIR).join("daemon.toml"))
    }

    /// Store for the desired state, honoring `state_path`
    pub fn state_store(&self) -> Result<StateStore> {
        match &self.state_path {
            Some(path) => Ok(StateStore::new(path.clone())),
            None => StateStore::open_default().context("Failed to locate state file"),
        }
    }

    pub fn relay_settings(&self) -> RelaySettings {
        RelaySettings {
            bind_host: self.bind_host.clone(),
            upstream: self.upstream.clone(),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            stop_grace: Duration::from_millis(self.stop_grace_ms),
        }
    }
}
