// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Port Forward Contributors

// Port Forward - Controller Module
// Drives the forwarding listener toward the desired state, one transition at a time

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use port_forward_common::{ControlError, Event, ListenerState, PersistedConfig};

use crate::engine::{failure_reason, ForwardEngine};
use crate::event_bus::EventBus;

// Phase tags for the packed state word: (phase << 16) | port
const STOPPED: u32 = 0;
const STARTING: u32 = 1;
const LISTENING: u32 = 2;
const STOPPING: u32 = 3;
const FAILED: u32 = 4;

fn pack(phase: u32, port: u16) -> u32 {
    (phase << 16) | u32::from(port)
}

fn unpack(word: u32) -> (u32, u16) {
    (word >> 16, (word & 0xFFFF) as u16)
}

/// Work a single reconcile call commits the controller to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transition {
    Start(u16),
    Stop(u16),
    /// Listening on `from` but the desired port is `to`
    Restart { from: u16, to: u16 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Plan {
    Unchanged,
    Busy,
    Run(Transition),
}

fn plan(phase: u32, port: u16, desired: &PersistedConfig) -> Plan {
    match phase {
        STARTING | STOPPING => Plan::Busy,
        LISTENING if !desired.listening() => Plan::Run(Transition::Stop(port)),
        LISTENING if desired.port() == port => Plan::Unchanged,
        LISTENING => Plan::Run(Transition::Restart {
            from: port,
            to: desired.port(),
        }),
        // Stopped, and Failed which retries from a clean slate
        _ if desired.listening() => Plan::Run(Transition::Start(desired.port())),
        _ => Plan::Unchanged,
    }
}

/// Outcome of handing a desired state to [`ForwardController::reconcile`]
#[derive(Debug)]
pub enum Reconcile {
    /// Already in the desired state; nothing was called or published
    Unchanged,
    /// Rejected because a transition is in flight; a `Busy` error was published
    Busy,
    /// A transition is running; its result will be published on the bus
    Submitted(JoinHandle<()>),
}

impl Reconcile {
    /// Wait for a submitted transition to settle
    pub async fn settled(self) {
        if let Reconcile::Submitted(handle) = self {
            if let Err(e) = handle.await {
                error!("Transition task ended abnormally: {}", e);
            }
        }
    }

    pub fn is_submitted(&self) -> bool {
        matches!(self, Reconcile::Submitted(_))
    }
}

struct Shared {
    engine: Arc<dyn ForwardEngine>,
    bus: EventBus,
    /// Packed `ListenerState` (phase tag and port)
    state: AtomicU32,
    /// Reason for the last failure; read only while the phase is `FAILED`
    failure: Mutex<Option<String>>,
}

/// Single-listener state machine.
///
/// Cloning yields another handle to the same controller.
#[derive(Clone)]
pub struct ForwardController {
    shared: Arc<Shared>,
}

impl ForwardController {
    pub fn new(engine: Arc<dyn ForwardEngine>, bus: EventBus) -> Self {
        Self {
            shared: Arc::new(Shared {
                engine,
                bus,
                state: AtomicU32::new(pack(STOPPED, 0)),
                failure: Mutex::new(None),
            }),
        }
    }

    /// Snapshot of the current listener state
    pub fn state(&self) -> ListenerState {
        let (phase, port) = unpack(self.shared.state.load(Ordering::Acquire));
        match phase {
            STARTING => ListenerState::Starting,
            LISTENING => ListenerState::Listening(port),
            STOPPING => ListenerState::Stopping,
            FAILED => ListenerState::Failed(
                self.shared
                    .failure
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone()
                    .unwrap_or_default(),
            ),
            _ => ListenerState::Stopped,
        }
    }

    pub fn is_busy(&self) -> bool {
        let (phase, _) = unpack(self.shared.state.load(Ordering::Acquire));
        matches!(phase, STARTING | STOPPING)
    }

    /// Bring the listener toward `desired`.
    ///
    /// Never blocks on I/O and never fails: engine work runs on a spawned task
    /// and every outcome, including rejection while busy, is published on the
    /// bus. Must be called from within a tokio runtime.
    pub fn reconcile(&self, desired: PersistedConfig) -> Reconcile {
        let mut current = self.shared.state.load(Ordering::Acquire);

        let transition = loop {
            let (phase, port) = unpack(current);

            let transition = match plan(phase, port, &desired) {
                Plan::Unchanged => {
                    debug!(
                        "Already {} (desired port={}, listening={})",
                        self.state(),
                        desired.port(),
                        desired.listening()
                    );
                    return Reconcile::Unchanged;
                }
                Plan::Busy => {
                    warn!("Rejecting reconcile: transition already in progress");
                    self.shared.bus.publish(Event::error(ControlError::Busy.to_string()));
                    return Reconcile::Busy;
                }
                Plan::Run(transition) => transition,
            };

            let next = match transition {
                Transition::Start(port) => pack(STARTING, port),
                Transition::Stop(port) | Transition::Restart { from: port, .. } => {
                    pack(STOPPING, port)
                }
            };

            match self.shared.state.compare_exchange(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break transition,
                // Lost a race; re-plan against what is there now
                Err(actual) => current = actual,
            }
        };

        debug!("Submitting {:?}", transition);
        let shared = self.shared.clone();
        Reconcile::Submitted(tokio::spawn(async move { shared.run(transition).await }))
    }
}

impl Shared {
    async fn run(&self, transition: Transition) {
        match transition {
            Transition::Start(port) => self.start(port).await,
            Transition::Stop(port) => {
                if self.release(port).await {
                    self.state.store(pack(STOPPED, 0), Ordering::Release);
                    self.announce_stopped(port);
                }
            }
            Transition::Restart { from, to } => {
                info!("Moving listener from :{} to :{}", from, to);
                if !self.release(from).await {
                    return;
                }
                // The move stays one transition: go straight to STARTING so no
                // reconcile can slip in while the stop is announced
                if let Err(seen) = self.state.compare_exchange(
                    pack(STOPPING, from),
                    pack(STARTING, to),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    error!(
                        "Listener state changed under a port move: {:?}",
                        unpack(seen)
                    );
                    return;
                }
                self.announce_stopped(from);
                self.start(to).await;
            }
        }
    }

    async fn start(&self, port: u16) {
        info!("Starting listener on :{}", port);
        match self.engine.start(port).await {
            Ok(()) => {
                self.clear_failure();
                self.state.store(pack(LISTENING, port), Ordering::Release);
                self.bus.publish(Event::info(format!("listening on :{}", port)));
            }
            Err(e) => self.fail(port, failure_reason(&e)),
        }
    }

    /// Returns whether the engine released the port. On success the state is
    /// left in `STOPPING` for the caller to settle.
    async fn release(&self, port: u16) -> bool {
        info!("Stopping listener on :{}", port);
        match self.engine.stop(port).await {
            Ok(()) => {
                self.clear_failure();
                true
            }
            Err(e) => {
                // The listener may well still be running
                self.fail(port, failure_reason(&e));
                false
            }
        }
    }

    fn announce_stopped(&self, port: u16) {
        self.bus
            .publish(Event::info(format!("stopped listening on :{}", port)));
    }

    fn fail(&self, port: u16, reason: String) {
        error!("Listener on :{} failed: {}", port, reason);
        *self.failure.lock().unwrap_or_else(PoisonError::into_inner) = Some(reason.clone());
        self.state.store(pack(FAILED, port), Ordering::Release);
        self.bus
            .publish(Event::error(ControlError::EngineFailure(reason).to_string()));
    }

    fn clear_failure(&self) {
        *self.failure.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}
