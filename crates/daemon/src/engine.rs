// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Port Forward Contributors

//! Forwarding engine capability consumed by the controller

use anyhow::Result;
use async_trait::async_trait;

/// Opaque start/stop capability for the byte-forwarding listener.
///
/// Implementations must treat `start` on a port that is already served and
/// `stop` on a port that is not served as successful no-ops; the controller's
/// retry-from-failure path depends on it.
#[async_trait]
pub trait ForwardEngine: Send + Sync {
    /// Begin accepting forwarded connections on `port`
    async fn start(&self, port: u16) -> Result<()>;

    /// Stop accepting on `port` and release it
    async fn stop(&self, port: u16) -> Result<()>;
}

/// Render an engine error as the reason carried by `Failed` and `Event::Error`
pub fn failure_reason(err: &anyhow::Error) -> String {
    format!("{:#}", err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_failure_reason_keeps_context_chain() {
        let err: anyhow::Error = anyhow::anyhow!("port busy");
        assert_eq!(failure_reason(&err), "port busy");

        let err = Err::<(), _>(std::io::Error::new(
            std::io::ErrorKind::AddrInUse,
            "address in use",
        ))
        .context("Failed to bind to 0.0.0.0:9090")
        .unwrap_err();
        assert_eq!(
            failure_reason(&err),
            "Failed to bind to 0.0.0.0:9090: address in use"
        );
    }
}
