// ABOUTME: ConnectionGate bridges asynchronous session status callbacks and the pipeline's wait.
// ABOUTME: Backed by a tokio watch channel so signals are safe from any thread or task.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;

/// The two mutually exclusive states of the session link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkState {
    Disconnected,
    Connected,
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkState::Disconnected => write!(f, "disconnected"),
            LinkState::Connected => write!(f, "connected"),
        }
    }
}

/// Errors returned while waiting on the gate.
#[derive(Debug, Error)]
pub enum GateError {
    #[error("session did not connect within {0:?}")]
    Timeout(Duration),

    #[error("connection gate closed")]
    Closed,
}

/// Binary readiness signal shared between the session layer and the pipeline.
///
/// Cloning is cheap; every clone observes and drives the same state. The
/// session layer calls [`signal_connected`](Self::signal_connected) and
/// [`signal_disconnected`](Self::signal_disconnected) from its own task while
/// the pipeline blocks in [`await_connected`](Self::await_connected). Any
/// number of waiters may wait concurrently.
#[derive(Debug, Clone)]
pub struct ConnectionGate {
    tx: Arc<watch::Sender<LinkState>>,
}

impl Default for ConnectionGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionGate {
    /// Create a gate in the `Disconnected` state.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(LinkState::Disconnected);
        Self { tx: Arc::new(tx) }
    }

    pub fn signal_connected(&self) {
        let previous = self.tx.send_replace(LinkState::Connected);
        if previous != LinkState::Connected {
            tracing::debug!("connection gate: link up");
        }
    }

    pub fn signal_disconnected(&self) {
        let previous = self.tx.send_replace(LinkState::Disconnected);
        if previous != LinkState::Disconnected {
            tracing::debug!("connection gate: link down");
        }
    }

    /// Current link state as last reported by the session layer.
    pub fn state(&self) -> LinkState {
        *self.tx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == LinkState::Connected
    }

    /// Subscribe to state changes.
    pub fn subscribe(&self) -> watch::Receiver<LinkState> {
        self.tx.subscribe()
    }

    /// Suspend until the link is observed `Connected`.
    ///
    /// Returns immediately if the gate already reads `Connected`. With
    /// `timeout` set, fails with [`GateError::Timeout`] once the bound
    /// elapses; with `None` the wait is unbounded.
    pub async fn await_connected(&self, timeout: Option<Duration>) -> Result<(), GateError> {
        let mut rx = self.tx.subscribe();
        let wait = rx.wait_for(|state| *state == LinkState::Connected);

        let observed = match timeout {
            Some(limit) => tokio::time::timeout(limit, wait)
                .await
                .map_err(|_| GateError::Timeout(limit))?
                .map(|_| ()),
            None => wait.await.map(|_| ()),
        };
        observed.map_err(|_| GateError::Closed)
    }
}
