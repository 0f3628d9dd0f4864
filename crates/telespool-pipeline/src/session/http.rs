// ABOUTME: HTTP session adapter: health probing drives the connection gate, publishes are POSTs.
// ABOUTME: A background monitor task re-probes the endpoint and reports link changes on its own schedule.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use telespool_core::{ConnectionGate, QoS, Session, SessionError};
use tokio_util::sync::CancellationToken;

const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(5);

/// Publishes each record as `POST {endpoint}/publish/{topic}` with the raw
/// payload as the body. The link is considered up while
/// `GET {endpoint}/health` answers with a success status.
pub struct HttpSession {
    client: reqwest::Client,
    endpoint: String,
    client_id: String,
    probe_interval: Duration,
    monitor: Mutex<Option<CancellationToken>>,
}

impl HttpSession {
    /// Create a session for `endpoint`. `request_timeout` bounds every probe
    /// and publish request.
    pub fn new(
        endpoint: &str,
        client_id: &str,
        request_timeout: Duration,
    ) -> Result<Self, SessionError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| SessionError::Connect(format!("cannot build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            client_id: client_id.to_string(),
            probe_interval: DEFAULT_PROBE_INTERVAL,
            monitor: Mutex::new(None),
        })
    }

    /// How often the monitor task re-probes the endpoint.
    pub fn with_probe_interval(mut self, interval: Duration) -> Self {
        self.probe_interval = interval;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn health_url(&self) -> String {
        format!("{}/health", self.endpoint)
    }

    /// `{endpoint}/publish/{topic}` with every topic level percent-encoded
    /// as its own path segment, so `?`, `#` and `%` stay part of the topic.
    fn publish_url(&self, topic: &str) -> Result<reqwest::Url, SessionError> {
        let mut url = reqwest::Url::parse(&self.endpoint).map_err(|e| {
            SessionError::Publish(format!("invalid endpoint {}: {}", self.endpoint, e))
        })?;
        url.path_segments_mut()
            .map_err(|_| {
                SessionError::Publish(format!("endpoint {} cannot carry a path", self.endpoint))
            })?
            .pop_if_empty()
            .push("publish")
            .extend(topic.trim_start_matches('/').split('/'));
        Ok(url)
    }

    fn stop_monitor(&self) -> bool {
        let token = self
            .monitor
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        match token {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}

async fn probe(client: &reqwest::Client, url: &str) -> bool {
    match client.get(url).send().await {
        Ok(response) => response.status().is_success(),
        Err(e) => {
            tracing::debug!(url, error = %e, "health probe failed");
            false
        }
    }
}

/// Probe until cancelled, signalling the gate on every state change.
async fn monitor_link(
    client: reqwest::Client,
    url: String,
    interval: Duration,
    gate: ConnectionGate,
    token: CancellationToken,
) {
    let mut was_up = None;
    loop {
        let up = tokio::select! {
            _ = token.cancelled() => break,
            up = probe(&client, &url) => up,
        };

        if was_up != Some(up) {
            if up {
                tracing::info!(url = %url, "session link up");
                gate.signal_connected();
            } else {
                tracing::warn!(url = %url, "session link down");
                gate.signal_disconnected();
            }
            was_up = Some(up);
        }

        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }
    gate.signal_disconnected();
    tracing::debug!(url = %url, "link monitor stopped");
}

#[async_trait]
impl Session for HttpSession {
    async fn connect(&self, gate: ConnectionGate) -> Result<(), SessionError> {
        let url = self.health_url();
        reqwest::Url::parse(&url)
            .map_err(|e| SessionError::Connect(format!("invalid endpoint {}: {}", url, e)))?;

        let token = CancellationToken::new();
        let previous = self
            .monitor
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(token.clone());
        if let Some(previous) = previous {
            previous.cancel();
        }

        tracing::info!(
            endpoint = %self.endpoint,
            client_id = %self.client_id,
            "starting session"
        );
        tokio::spawn(monitor_link(
            self.client.clone(),
            url,
            self.probe_interval,
            gate,
            token,
        ));
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<(), SessionError> {
        let url = self.publish_url(topic)?;
        let response = self
            .client
            .post(url)
            .header("content-type", "application/octet-stream")
            .header("x-client-id", &self.client_id)
            .header("x-qos", qos.level().to_string())
            .header("x-retain", retain.to_string())
            .body(payload.to_vec())
            .send()
            .await
            .map_err(|e| SessionError::Publish(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SessionError::Publish(format!(
                "endpoint answered {}: {}",
                status, body
            )));
        }
        Ok(())
    }

    async fn disconnect(&self) {
        if self.stop_monitor() {
            tracing::info!(endpoint = %self.endpoint, "session stopped");
        }
    }

    fn name(&self) -> &str {
        "http"
    }
}
