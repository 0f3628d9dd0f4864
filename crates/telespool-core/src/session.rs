// ABOUTME: Defines the Session trait every transport adapter implements, plus QoS and SessionError.
// ABOUTME: The session connects asynchronously, reports link status through a ConnectionGate, and publishes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::gate::ConnectionGate;

/// Delivery guarantee requested for a publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum QoS {
    AtMostOnce,
    #[default]
    AtLeastOnce,
    ExactlyOnce,
}

impl QoS {
    /// Numeric level (0, 1 or 2).
    pub fn level(self) -> u8 {
        match self {
            QoS::AtMostOnce => 0,
            QoS::AtLeastOnce => 1,
            QoS::ExactlyOnce => 2,
        }
    }

    pub fn from_level(level: u8) -> Option<Self> {
        match level {
            0 => Some(QoS::AtMostOnce),
            1 => Some(QoS::AtLeastOnce),
            2 => Some(QoS::ExactlyOnce),
            _ => None,
        }
    }
}

/// Errors that can occur in the session layer.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("publish failed: {0}")]
    Publish(String),
}

/// The session/transport capability the pipeline drives. Adapters own their
/// network plumbing; the pipeline only sees connect, publish, and disconnect.
#[async_trait]
pub trait Session: Send + Sync {
    /// Begin establishing the session. Implementations report link status
    /// changes through `gate` from their own task; returning `Ok` does not
    /// imply the link is already up.
    async fn connect(&self, gate: ConnectionGate) -> Result<(), SessionError>;

    /// Send one message. Any rejection or transport failure is a
    /// [`SessionError::Publish`].
    async fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<(), SessionError>;

    /// Release the session. Safe to call when the session never connected.
    async fn disconnect(&self);

    /// Adapter name for logging and display (e.g. "http", "stub").
    fn name(&self) -> &str;
}
