// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Port Forward Contributors

//! Fire-and-forget notification channel from the controller to observers

use std::sync::{Arc, PoisonError, RwLock, Weak};

use tokio::sync::mpsc;
use tracing::trace;

use port_forward_common::Event;

/// Receives one event per call.
///
/// Called on the publisher's task; implementations must not block.
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &Event);
}

/// Shared registry of listeners. Cloning yields another handle to the same bus.
#[derive(Clone, Default)]
pub struct EventBus {
    listeners: Arc<RwLock<Vec<Arc<dyn EventListener>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `listener`. Returns false if it was already registered.
    pub fn register(&self, listener: Arc<dyn EventListener>) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        if listeners.iter().any(|l| same_listener(l, &listener)) {
            return false;
        }
        listeners.push(listener);
        true
    }

    /// Remove `listener`. Returns false if it was not registered.
    pub fn unregister(&self, listener: &Arc<dyn EventListener>) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|l| !same_listener(l, listener));
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Deliver `event` to every listener registered right now.
    /// With no listeners the event is dropped.
    pub fn publish(&self, event: Event) {
        // Snapshot so listeners may (un)register from inside their callback
        let listeners: Vec<Arc<dyn EventListener>> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        if listeners.is_empty() {
            trace!("No listeners, dropping {:?}", event);
            return;
        }

        for listener in &listeners {
            listener.on_event(&event);
        }
    }
}

// Identity is the allocation, not the vtable
fn same_listener(a: &Arc<dyn EventListener>, b: &Arc<dyn EventListener>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

/// Forwards events into an unbounded channel for an async consumer
pub struct ChannelListener {
    tx: mpsc::UnboundedSender<Event>,
}

impl ChannelListener {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

impl EventListener for ChannelListener {
    fn on_event(&self, event: &Event) {
        // Receiver gone means nobody is interested any more
        let _ = self.tx.send(event.clone());
    }
}

/// Registers a listener without keeping it alive.
///
/// For listeners that own a handle back to the bus (directly or through the
/// controller); once the last strong reference is dropped, events are skipped.
pub struct WeakListener<T: EventListener> {
    inner: Weak<T>,
}

impl<T: EventListener> WeakListener<T> {
    pub fn new(listener: &Arc<T>) -> Arc<Self> {
        Arc::new(Self {
            inner: Arc::downgrade(listener),
        })
    }
}

impl<T: EventListener> EventListener for WeakListener<T> {
    fn on_event(&self, event: &Event) {
        match self.inner.upgrade() {
            Some(listener) => listener.on_event(event),
            None => trace!("Listener dropped, skipping {:?}", event),
        }
    }
}
