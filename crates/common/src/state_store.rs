// Port Forward - State Store Module
// File-backed persistent record of the desired forwarding state

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::config::PersistedConfig;
use crate::error::{Error, Result};

/// Directory name under the platform config dir
pub const APP_DIR: &str = "port-forward";

/// Get the default state file path
pub fn default_state_path() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| Error::InvalidPath("Could not determine config directory".to_string()))?;
    Ok(config_dir.join(APP_DIR).join("state.toml"))
}

/// TOML file holding the `port`/`listening` record
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at the platform default location
    pub fn open_default() -> Result<Self> {
        Ok(Self::new(default_state_path()?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the stored config. An absent or unreadable record yields defaults.
    pub fn load(&self) -> PersistedConfig {
        match self.read_table() {
            Ok(Some(table)) => {
                let config = PersistedConfig::load(&table);
                debug!(
                    "Loaded state from {}: port={}, listening={}",
                    self.path.display(),
                    config.port(),
                    config.listening()
                );
                config
            }
            Ok(None) => {
                debug!("No state file at {}, using defaults", self.path.display());
                PersistedConfig::default()
            }
            Err(e) => {
                warn!(
                    "Failed to read state from {}: {}; using defaults",
                    self.path.display(),
                    e
                );
                PersistedConfig::default()
            }
        }
    }

    /// Write the config, creating the parent directory if needed
    pub fn save(&self, config: &PersistedConfig) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut table = toml::Table::new();
        config.save(&mut table);
        fs::write(&self.path, toml::to_string_pretty(&table)?)?;

        // Set restrictive permissions on state file (Unix only)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600))?;
        }

        debug!("Saved state to {}", self.path.display());
        Ok(())
    }

    /// Remove the record; the next load starts from defaults
    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn read_table(&self) -> Result<Option<toml::Table>> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(toml::from_str(&contents)?))
    }
}
