// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Port Forward Contributors

//! Port Forward daemon library
//!
//! Control plane for a single TCP forwarding listener: the reconcile state
//! machine, the event bus it reports on, the engine it drives, and the
//! presenter that turns user intent into desired state.

pub mod config;
pub mod controller;
pub mod engine;
pub mod event_bus;
pub mod presenter;
pub mod tcp_engine;

pub use config::DaemonConfig;
pub use controller::{ForwardController, Reconcile};
pub use engine::{failure_reason, ForwardEngine};
pub use event_bus::{ChannelListener, EventBus, EventListener, WeakListener};
pub use presenter::{ConsoleSurface, NoticeSurface, Presenter};
pub use tcp_engine::{RelaySettings, TcpForwardEngine};
