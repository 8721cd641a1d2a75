// Error types for Port Forward

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    /// A stored or transferred field is present but unusable
    #[error("Invalid value for '{key}': {value}")]
    ConfigInvalid { key: &'static str, value: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Invalid path: {0}")]
    InvalidPath(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Failures of a start/stop transition.
///
/// These never cross the `reconcile` boundary as errors; the controller turns
/// them into `Event::Error` notices carrying this type's `Display` output.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ControlError {
    /// The engine refused to start or stop the listener
    #[error("{0}")]
    EngineFailure(String),

    /// Another transition is still in flight
    #[error("busy: a start/stop transition is already in progress")]
    Busy,
}
