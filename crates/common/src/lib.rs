// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Port Forward Contributors

// Port Forward - Common Library
// Desired-state model, storage and payload codecs, shared event types

pub mod config;
pub mod error;
pub mod network;
pub mod payload;
pub mod state_store;
pub mod types;

pub use config::{
    port_from_i64, ConfigEditor, ConfigSink, ConfigSource, PersistedConfig, DEFAULT_PORT,
    LISTENING_KEY, PORT_KEY,
};
pub use error::{ControlError, Error, Result};
pub use network::{format_host_port, is_loopback_address, parse_host_port};
pub use payload::Payload;
pub use state_store::{default_state_path, StateStore, APP_DIR};
pub use types::{Event, EventKind, ListenerState};
