// ABOUTME: Test utilities for telespool-pipeline, including an in-memory stub session.
// ABOUTME: The stub records publishes and can fail, drop the link, or never connect on demand.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use telespool_core::{ConnectionGate, QoS, Session, SessionError};

/// One message captured by [`StubSession`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

/// When the stub reports the link as connected after `connect`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectBehavior {
    /// Signal `Connected` from a separate task right after `connect`.
    Immediate,
    /// Never signal; the test drives the gate itself.
    Manual,
}

/// A session that keeps everything in memory.
///
/// Useful in tests to drive the pipeline without a network. By default it
/// connects immediately and accepts every publish.
pub struct StubSession {
    behavior: ConnectBehavior,
    fail_on: Option<u64>,
    drop_link_after: Option<u64>,
    attempts: AtomicU64,
    connects: AtomicU64,
    disconnects: AtomicU64,
    published: Mutex<Vec<Published>>,
    gate: Mutex<Option<ConnectionGate>>,
}

impl Default for StubSession {
    fn default() -> Self {
        Self::new()
    }
}

impl StubSession {
    pub fn new() -> Self {
        Self {
            behavior: ConnectBehavior::Immediate,
            fail_on: None,
            drop_link_after: None,
            attempts: AtomicU64::new(0),
            connects: AtomicU64::new(0),
            disconnects: AtomicU64::new(0),
            published: Mutex::new(Vec::new()),
            gate: Mutex::new(None),
        }
    }

    /// A stub that never signals the gate on its own.
    pub fn manual() -> Self {
        Self {
            behavior: ConnectBehavior::Manual,
            ..Self::new()
        }
    }

    /// Fail the `attempt`-th publish call (1-based).
    pub fn fail_on_publish(mut self, attempt: u64) -> Self {
        self.fail_on = Some(attempt);
        self
    }

    /// Signal `Disconnected` on the attached gate once `count` publishes succeeded.
    pub fn drop_link_after(mut self, count: u64) -> Self {
        self.drop_link_after = Some(count);
        self
    }

    /// Attach a gate without calling `connect`, for tests that drive the
    /// drain pipeline directly.
    pub fn attach_gate(&self, gate: ConnectionGate) {
        *self.gate.lock().unwrap_or_else(|e| e.into_inner()) = Some(gate);
    }

    pub fn published(&self) -> Vec<Published> {
        self.published
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn payloads(&self) -> Vec<Vec<u8>> {
        self.published().into_iter().map(|p| p.payload).collect()
    }

    pub fn publish_attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn connect_calls(&self) -> u64 {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnect_calls(&self) -> u64 {
        self.disconnects.load(Ordering::SeqCst)
    }

    fn current_gate(&self) -> Option<ConnectionGate> {
        self.gate.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl Session for StubSession {
    async fn connect(&self, gate: ConnectionGate) -> Result<(), SessionError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.attach_gate(gate.clone());
        if self.behavior == ConnectBehavior::Immediate {
            tokio::spawn(async move { gate.signal_connected() });
        }
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<(), SessionError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_on == Some(attempt) {
            return Err(SessionError::Publish(format!(
                "stub rejected publish #{attempt}"
            )));
        }

        let delivered = {
            let mut published = self.published.lock().unwrap_or_else(|e| e.into_inner());
            published.push(Published {
                topic: topic.to_string(),
                payload: payload.to_vec(),
                qos,
                retain,
            });
            published.len() as u64
        };

        if self.drop_link_after == Some(delivered)
            && let Some(gate) = self.current_gate()
        {
            gate.signal_disconnected();
        }
        Ok(())
    }

    async fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = self.current_gate() {
            gate.signal_disconnected();
        }
    }

    fn name(&self) -> &str {
        "stub"
    }
}
