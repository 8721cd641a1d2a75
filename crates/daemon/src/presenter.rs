// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Port Forward Contributors

//! Binds the desired config to a display surface and turns user intent into reconcile calls

use std::sync::{Arc, Mutex, PoisonError};

use chrono::Local;
use colored::Colorize;
use tracing::{debug, error};

use port_forward_common::{Event, EventKind, ListenerState, Payload, PersistedConfig, StateStore};

use crate::controller::{ForwardController, Reconcile};
use crate::event_bus::EventListener;

/// Where ephemeral notices and the current state are shown
pub trait NoticeSurface: Send + Sync {
    /// Show a short-lived notice for a controller event
    fn show_notice(&self, event: &Event);

    /// Show the desired config next to the actual listener state
    fn show_state(&self, config: &PersistedConfig, state: &ListenerState);
}

/// Plain terminal output
#[derive(Debug, Default)]
pub struct ConsoleSurface;

impl NoticeSurface for ConsoleSurface {
    fn show_notice(&self, event: &Event) {
        let stamp = Local::now().format("%H:%M:%S");
        match event.kind() {
            EventKind::Info => println!("[{}] {}", stamp, event.message().green()),
            EventKind::Error => println!("[{}] {}", stamp, event.message().red().bold()),
        }
    }

    fn show_state(&self, config: &PersistedConfig, state: &ListenerState) {
        let toggle = if config.listening() {
            "on".green()
        } else {
            "off".yellow()
        };
        println!(
            "port {}  forwarding {}  ({})",
            config.port().to_string().bold(),
            toggle,
            state
        );
    }
}

/// Holds the desired config while the user interacts with it.
///
/// The presenter owns the controller, which owns the bus. Register it with
/// [`WeakListener`](crate::event_bus::WeakListener) so the bus does not keep it alive.
pub struct Presenter {
    config: Mutex<PersistedConfig>,
    store: StateStore,
    controller: ForwardController,
    surface: Arc<dyn NoticeSurface>,
}

impl Presenter {
    /// Load the desired config from `store` and bind it to `surface`
    pub fn new(
        store: StateStore,
        controller: ForwardController,
        surface: Arc<dyn NoticeSurface>,
    ) -> Self {
        let config = store.load();
        Self {
            config: Mutex::new(config),
            store,
            controller,
            surface,
        }
    }

    pub fn config(&self) -> PersistedConfig {
        *self.config.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The user toggle: flip `listening`, persist, submit
    pub fn toggle(&self) -> Reconcile {
        let desired = self.update(|config| config.toggled());
        self.submit(desired)
    }

    /// Change the port and submit the result
    pub fn set_port(&self, port: u16) -> Reconcile {
        let desired = self.update(|config| config.edit().port(port).build());
        self.submit(desired)
    }

    /// Submit the stored desired state as-is, e.g. after a relaunch
    pub fn resume(&self) -> Reconcile {
        let desired = self.resync();
        self.submit(desired)
    }

    /// Reload the desired config from storage
    pub fn resync(&self) -> PersistedConfig {
        let loaded = self.store.load();
        *self.config.lock().unwrap_or_else(PoisonError::into_inner) = loaded;
        loaded
    }

    /// Persist the current desired config (lifecycle checkpoint)
    pub fn checkpoint(&self) -> port_forward_common::Result<()> {
        self.store.save(&self.config())
    }

    /// Render the desired config and the controller's actual state
    pub fn show_state(&self) {
        self.surface.show_state(&self.config(), &self.controller.state());
    }

    fn update(&self, edit: impl FnOnce(&PersistedConfig) -> PersistedConfig) -> PersistedConfig {
        let desired = {
            let mut config = self.config.lock().unwrap_or_else(PoisonError::into_inner);
            let next = edit(&config);
            *config = next;
            next
        };

        if let Err(e) = self.store.save(&desired) {
            error!("Failed to persist desired state: {}", e);
        }
        desired
    }

    /// Hand the desired state to the controller through the transferable payload
    fn submit(&self, desired: PersistedConfig) -> Reconcile {
        let payload = Payload::from(&desired);
        debug!("Submitting desired state {:?}", payload);
        self.controller.reconcile(PersistedConfig::load(&payload))
    }
}

impl EventListener for Presenter {
    fn on_event(&self, event: &Event) {
        self.surface.show_notice(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ForwardEngine;
    use crate::event_bus::{EventBus, WeakListener};
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct AlwaysOk;

    #[async_trait]
    impl ForwardEngine for AlwaysOk {
        async fn start(&self, _port: u16) -> anyhow::Result<()> {
            Ok(())
        }

        async fn stop(&self, _port: u16) -> anyhow::Result<()> {
            Ok(())
        }
    }

    /// Starts fine; refuses to stop
    struct StuckStop;

    #[async_trait]
    impl ForwardEngine for StuckStop {
        async fn start(&self, _port: u16) -> anyhow::Result<()> {
            Ok(())
        }

        async fn stop(&self, _port: u16) -> anyhow::Result<()> {
            anyhow::bail!("port busy")
        }
    }

    #[derive(Default)]
    struct Notices(Mutex<Vec<Event>>);

    impl NoticeSurface for Notices {
        fn show_notice(&self, event: &Event) {
            self.0.lock().unwrap().push(event.clone());
        }

        fn show_state(&self, _config: &PersistedConfig, _state: &ListenerState) {}
    }

    fn presenter(dir: &TempDir) -> (Arc<Presenter>, Arc<Notices>, ForwardController) {
        presenter_with(dir, Arc::new(AlwaysOk))
    }

    fn presenter_with(
        dir: &TempDir,
        engine: Arc<dyn ForwardEngine>,
    ) -> (Arc<Presenter>, Arc<Notices>, ForwardController) {
        let bus = EventBus::new();
        let controller = ForwardController::new(engine, bus.clone());
        let notices = Arc::new(Notices::default());
        let presenter = Arc::new(Presenter::new(
            StateStore::new(dir.path().join("state.toml")),
            controller.clone(),
            notices.clone(),
        ));
        bus.register(WeakListener::new(&presenter));
        (presenter, notices, controller)
    }

    #[tokio::test]
    async fn test_toggle_persists_and_notifies() {
        let dir = TempDir::new().unwrap();
        let (presenter, notices, controller) = presenter(&dir);

        presenter.toggle().settled().await;

        assert!(presenter.config().listening());
        assert_eq!(controller.state(), ListenerState::Listening(9090));
        assert_eq!(
            *notices.0.lock().unwrap(),
            vec![Event::info("listening on :9090")]
        );

        let stored = StateStore::new(dir.path().join("state.toml")).load();
        assert_eq!(stored, presenter.config());
    }

    #[tokio::test]
    async fn test_set_port_while_listening_moves_listener() {
        let dir = TempDir::new().unwrap();
        let (presenter, notices, controller) = presenter(&dir);

        presenter.toggle().settled().await;
        presenter.set_port(8080).settled().await;

        assert_eq!(controller.state(), ListenerState::Listening(8080));
        assert_eq!(
            *notices.0.lock().unwrap(),
            vec![
                Event::info("listening on :9090"),
                Event::info("stopped listening on :9090"),
                Event::info("listening on :8080"),
            ]
        );
    }

    #[tokio::test]
    async fn test_resume_after_relaunch() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path().join("state.toml"));
        store
            .save(&PersistedConfig::default().edit().port(7000).listening(true).build())
            .unwrap();

        let (presenter, _notices, controller) = presenter(&dir);
        assert_eq!(presenter.config().port(), 7000);

        presenter.resume().settled().await;
        assert_eq!(controller.state(), ListenerState::Listening(7000));
    }

    #[tokio::test]
    async fn test_failed_stop_still_records_off() {
        let dir = TempDir::new().unwrap();
        let (presenter, notices, controller) = presenter_with(&dir, Arc::new(StuckStop));

        presenter.toggle().settled().await;
        assert_eq!(controller.state(), ListenerState::Listening(9090));

        presenter.toggle().settled().await;

        assert!(!presenter.config().listening());
        let stored = StateStore::new(dir.path().join("state.toml")).load();
        assert!(!stored.listening());
        assert_eq!(
            controller.state(),
            ListenerState::Failed("port busy".to_string())
        );
        assert_eq!(
            notices.0.lock().unwrap().last(),
            Some(&Event::error("port busy"))
        );
    }

    #[tokio::test]
    async fn test_dropped_presenter_is_not_kept_by_bus() {
        let dir = TempDir::new().unwrap();
        let (presenter, _notices, controller) = presenter(&dir);
        let weak = Arc::downgrade(&presenter);

        drop(presenter);
        assert!(weak.upgrade().is_none());
        controller.reconcile(PersistedConfig::default().toggled()).settled().await;
        assert_eq!(controller.state(), ListenerState::Listening(9090));
    }
}
