// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Port Forward Contributors

// Port Forward - TCP Engine
// Binds listener ports and relays each accepted connection to the upstream

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use socket2::{SockRef, TcpKeepalive};
use tokio::io::copy_bidirectional;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use port_forward_common::format_host_port;

use crate::engine::ForwardEngine;

const ACCEPT_BACKOFF_START: Duration = Duration::from_millis(5);
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);
const KEEPALIVE_PERIOD: Duration = Duration::from_secs(180);

/// Where and how accepted connections are relayed
#[derive(Debug, Clone)]
pub struct RelaySettings {
    /// Host the listeners bind on
    pub bind_host: String,
    /// `host:port` every accepted connection is relayed to
    pub upstream: String,
    pub connect_timeout: Duration,
    /// How long `stop` waits for the accept loop before aborting it
    pub stop_grace: Duration,
}

/// A bound port and its accept loop
struct ActiveListener {
    local_addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    join_handle: JoinHandle<()>,
}

/// Plain TCP relay engine
pub struct TcpForwardEngine {
    settings: Arc<RelaySettings>,
    /// Active listeners indexed by port
    listeners: Mutex<HashMap<u16, ActiveListener>>,
}

impl TcpForwardEngine {
    pub fn new(settings: RelaySettings) -> Self {
        Self {
            settings: Arc::new(settings),
            listeners: Mutex::new(HashMap::new()),
        }
    }

    /// Address actually bound for `port`, if it is being served
    pub async fn local_addr(&self, port: u16) -> Option<SocketAddr> {
        let listeners = self.listeners.lock().await;
        listeners.get(&port).map(|l| l.local_addr)
    }

    /// Ports currently served
    pub async fn active_ports(&self) -> Vec<u16> {
        let listeners = self.listeners.lock().await;
        let mut ports: Vec<u16> = listeners.keys().copied().collect();
        ports.sort_unstable();
        ports
    }

    /// Stop all listeners (best-effort)
    pub async fn stop_all(&self) {
        for port in self.active_ports().await {
            if let Err(e) = self.stop(port).await {
                warn!("Failed to stop listener on :{} during shutdown: {:#}", port, e);
            }
        }
    }
}

#[async_trait]
impl ForwardEngine for TcpForwardEngine {
    async fn start(&self, port: u16) -> Result<()> {
        let mut listeners = self.listeners.lock().await;

        if let Some(active) = listeners.get(&port) {
            if !active.join_handle.is_finished() {
                debug!("Already listening on {}", active.local_addr);
                return Ok(());
            }
            // Accept loop died on its own; rebind below
            listeners.remove(&port);
        }

        let bind_addr = format_host_port(&self.settings.bind_host, port);
        let listener = match TcpListener::bind(&bind_addr).await {
            Ok(l) => l,
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                return Err(anyhow::anyhow!(
                    "Permission denied binding to {}. Port {} is privileged (<=1024) and requires elevated permissions",
                    bind_addr,
                    port
                ));
            }
            Err(e) => {
                return Err(e).context(format!("Failed to bind to {}", bind_addr));
            }
        };
        let local_addr = listener
            .local_addr()
            .context("Failed to read bound address")?;

        info!(
            "Listening on {}, relaying to {}",
            local_addr, self.settings.upstream
        );

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let join_handle = tokio::spawn(accept_loop(
            listener,
            self.settings.clone(),
            shutdown_rx,
        ));

        listeners.insert(
            port,
            ActiveListener {
                local_addr,
                shutdown_tx: Some(shutdown_tx),
                join_handle,
            },
        );

        Ok(())
    }

    async fn stop(&self, port: u16) -> Result<()> {
        let mut listeners = self.listeners.lock().await;

        let Some(mut active) = listeners.remove(&port) else {
            debug!("Not listening on :{}, nothing to stop", port);
            return Ok(());
        };

        if let Some(tx) = active.shutdown_tx.take() {
            let _ = tx.send(());
        }

        // Give the accept loop a moment to exit, then abort it
        match tokio::time::timeout(self.settings.stop_grace, &mut active.join_handle).await {
            Ok(Err(e)) if !e.is_cancelled() => {
                debug!("Accept loop for :{} panicked: {:?}", port, e);
            }
            Ok(_) => {}
            Err(_) => {
                active.join_handle.abort();
            }
        }

        info!("Stopped listening on {}", active.local_addr);
        Ok(())
    }
}

/// Accept connections until shutdown is signalled
async fn accept_loop(
    listener: TcpListener,
    settings: Arc<RelaySettings>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let mut delay: Option<Duration> = None;

    loop {
        tokio::select! {
            _ = &mut shutdown_rx => {
                debug!("Accept loop shutting down");
                return;
            }

            accept_result = listener.accept() => {
                match accept_result {
                    Ok((stream, peer_addr)) => {
                        delay = None;
                        debug!("Accepted connection from {}", peer_addr);

                        let settings = settings.clone();
                        tokio::spawn(async move {
                            if let Err(e) = relay_connection(stream, &settings).await {
                                debug!("Relay for {} ended: {:#}", peer_addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        let next = match delay {
                            None => ACCEPT_BACKOFF_START,
                            Some(d) => (d * 2).min(ACCEPT_BACKOFF_MAX),
                        };
                        delay = Some(next);
                        error!("Failed to accept connection: {}; retrying in {:?}", e, next);
                        tokio::time::sleep(next).await;
                    }
                }
            }
        }
    }
}

/// Dial upstream and copy bytes both ways until either side closes
async fn relay_connection(mut inbound: TcpStream, settings: &RelaySettings) -> Result<()> {
    let mut outbound = tokio::time::timeout(
        settings.connect_timeout,
        TcpStream::connect(&settings.upstream),
    )
    .await
    .map_err(|_| anyhow::anyhow!("Timed out dialing {}", settings.upstream))?
    .context(format!("Failed to dial {}", settings.upstream))?;

    let _ = inbound.set_nodelay(true);
    let _ = outbound.set_nodelay(true);
    set_keepalive(&inbound);
    set_keepalive(&outbound);

    let (from_client, from_upstream) = copy_bidirectional(&mut inbound, &mut outbound).await?;

    debug!(
        "Relay closed: {} bytes from client, {} bytes from upstream",
        from_client, from_upstream
    );

    Ok(())
}

/// Relayed connections can sit idle for a long time; keep dead peers from pinning them
fn set_keepalive(stream: &TcpStream) {
    let params = TcpKeepalive::new().with_time(KEEPALIVE_PERIOD);
    if let Err(e) = SockRef::from(stream).set_tcp_keepalive(&params) {
        debug!("Failed to enable keep-alive: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn settings(upstream: &str) -> RelaySettings {
        RelaySettings {
            bind_host: "127.0.0.1".to_string(),
            upstream: upstream.to_string(),
            connect_timeout: Duration::from_secs(2),
            stop_grace: Duration::from_millis(100),
        }
    }

    /// Reserve a port that is free right now
    fn free_port() -> u16 {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn test_start_and_stop_are_idempotent() {
        let engine = TcpForwardEngine::new(settings("127.0.0.1:1"));
        let port = free_port();

        engine.start(port).await.unwrap();
        let addr = engine.local_addr(port).await.unwrap();
        engine.start(port).await.unwrap();
        assert_eq!(engine.local_addr(port).await, Some(addr));
        assert_eq!(engine.active_ports().await, vec![port]);

        engine.stop(port).await.unwrap();
        engine.stop(port).await.unwrap();
        assert!(engine.active_ports().await.is_empty());

        // Port is released and can be bound again
        std::net::TcpListener::bind(("127.0.0.1", port)).unwrap();
    }

    #[tokio::test]
    async fn test_start_on_taken_port_fails() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = taken.local_addr().unwrap().port();

        let engine = TcpForwardEngine::new(settings("127.0.0.1:1"));
        let err = engine.start(port).await.unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to bind to 127.0.0.1"));
        assert!(engine.active_ports().await.is_empty());
    }

    #[tokio::test]
    async fn test_relays_bytes_to_upstream() {
        let upstream = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let upstream_addr = upstream.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = upstream.accept().await.unwrap();
            let mut buf = [0u8; 5];
            stream.read_exact(&mut buf).await.unwrap();
            stream.write_all(&buf).await.unwrap();
        });

        let engine = TcpForwardEngine::new(settings(&upstream_addr.to_string()));
        let port = free_port();
        engine.start(port).await.unwrap();

        let mut client = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        client.write_all(b"hello").await.unwrap();
        let mut echoed = [0u8; 5];
        client.read_exact(&mut echoed).await.unwrap();
        assert_eq!(&echoed, b"hello");

        engine.stop_all().await;
        assert!(engine.active_ports().await.is_empty());
    }

    #[tokio::test]
    async fn test_keepalive_is_enabled_on_relayed_streams() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let dialed = TcpStream::connect(addr).await.unwrap();
        let (accepted, _) = listener.accept().await.unwrap();

        set_keepalive(&dialed);
        set_keepalive(&accepted);

        for stream in [&dialed, &accepted] {
            let sock = SockRef::from(stream);
            assert!(sock.keepalive().unwrap());
            #[cfg(target_os = "linux")]
            assert_eq!(sock.keepalive_time().unwrap(), KEEPALIVE_PERIOD);
        }
    }
}
