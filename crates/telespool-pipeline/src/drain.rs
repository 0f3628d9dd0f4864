// ABOUTME: DrainPipeline walks the persistent log front to back and publishes each record in order.
// ABOUTME: Fail-fast on publish errors; the link state is sampled before each record is sent.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use telespool_core::{ConnectionGate, QoS, Session, SessionError};
use telespool_store::{LogError, LogReader, PersistentLog};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Errors that abort a drain pass.
#[derive(Debug, Error)]
pub enum DrainError {
    #[error("log error: {0}")]
    Log(#[from] LogError),

    #[error("publish of record {seq} failed: {source}")]
    Publish {
        seq: u64,
        #[source]
        source: SessionError,
    },

    #[error("link lost before record {seq} was published")]
    LinkLost { seq: u64 },
}

/// Where and how records are published.
#[derive(Debug, Clone)]
pub struct DrainOptions {
    pub topic: String,
    pub qos: QoS,
    pub retain: bool,
    /// Pause between publishes. Zero still yields to the scheduler once per record.
    pub yield_between: Duration,
}

/// Outcome of one completed (or cancelled) drain pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub published: u64,
    /// The pass ended early on a read error; earlier records were still sent.
    pub degraded: bool,
    pub cancelled: bool,
}

/// Sequential reader that republishes every log record through a session.
pub struct DrainPipeline {
    session: Arc<dyn Session>,
    gate: ConnectionGate,
    options: DrainOptions,
}

impl DrainPipeline {
    pub fn new(session: Arc<dyn Session>, gate: ConnectionGate, options: DrainOptions) -> Self {
        Self {
            session,
            gate,
            options,
        }
    }

    pub fn options(&self) -> &DrainOptions {
        &self.options
    }

    /// Run one pass over `log` from its first record.
    ///
    /// An empty log completes with zero publishes. The first publish failure
    /// aborts the pass with no further publishes. A publish already in flight
    /// is allowed to finish; if the gate reads `Disconnected` before the next
    /// record, the pass aborts with [`DrainError::LinkLost`].
    pub async fn run_pass(
        &self,
        log: &PersistentLog,
        cancel: &CancellationToken,
    ) -> Result<DrainReport, DrainError> {
        let mut reader = log.open_for_read()?;
        tracing::info!(
            path = %log.path().display(),
            topic = %self.options.topic,
            session = self.session.name(),
            "drain pass started"
        );

        let result = self.publish_all(&mut reader, cancel).await;
        let degraded = reader.degraded();
        reader.close();

        let (published, cancelled) = result?;
        let report = DrainReport {
            published,
            degraded,
            cancelled,
        };
        tracing::info!(
            published,
            degraded,
            cancelled,
            "drain pass finished"
        );
        Ok(report)
    }

    async fn publish_all(
        &self,
        reader: &mut LogReader,
        cancel: &CancellationToken,
    ) -> Result<(u64, bool), DrainError> {
        let mut published = 0;

        while let Some(record) = reader.read_next_line() {
            if cancel.is_cancelled() {
                return Ok((published, true));
            }
            if !self.gate.is_connected() {
                tracing::warn!(seq = record.seq, "link down, aborting drain pass");
                return Err(DrainError::LinkLost { seq: record.seq });
            }

            tracing::debug!(seq = record.seq, len = record.len(), "publishing record");
            self.session
                .publish(
                    &self.options.topic,
                    record.as_bytes(),
                    self.options.qos,
                    self.options.retain,
                )
                .await
                .map_err(|source| {
                    tracing::error!(seq = record.seq, error = %source, "publish failed, aborting drain pass");
                    DrainError::Publish {
                        seq: record.seq,
                        source,
                    }
                })?;
            published += 1;

            if self.options.yield_between.is_zero() {
                tokio::task::yield_now().await;
            } else {
                tokio::select! {
                    _ = cancel.cancelled() => return Ok((published, true)),
                    _ = tokio::time::sleep(self.options.yield_between) => {}
                }
            }
        }

        Ok((published, cancel.is_cancelled()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StubSession;
    use proptest::prelude::*;
    use tempfile::TempDir;

    fn options() -> DrainOptions {
        DrainOptions {
            topic: "telespool/test/log".to_string(),
            qos: QoS::AtLeastOnce,
            retain: false,
            yield_between: Duration::ZERO,
        }
    }

    fn write_log(dir: &TempDir, lines: &[&str]) -> PersistentLog {
        let log = PersistentLog::new(dir.path().join("log.txt"));
        let mut writer = log.open_for_append().unwrap();
        for line in lines {
            writer.append_line(line.as_bytes()).unwrap();
        }
        writer.close().unwrap();
        log
    }

    fn connected_gate() -> ConnectionGate {
        let gate = ConnectionGate::new();
        gate.signal_connected();
        gate
    }

    #[tokio::test]
    async fn publishes_every_record_in_order() {
        let dir = TempDir::new().unwrap();
        let log = write_log(&dir, &["a", "b", "c", "d"]);
        let session = Arc::new(StubSession::new());
        let pipeline = DrainPipeline::new(session.clone(), connected_gate(), options());

        let report = pipeline
            .run_pass(&log, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.published, 4);
        assert!(!report.degraded);
        assert_eq!(session.payloads(), vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec(), b"d".to_vec()]);
        for message in session.published() {
            assert_eq!(message.topic, "telespool/test/log");
            assert_eq!(message.qos, QoS::AtLeastOnce);
            assert!(!message.retain);
        }
    }

    #[tokio::test]
    async fn empty_log_completes_with_zero_publishes() {
        let dir = TempDir::new().unwrap();
        let log = write_log(&dir, &[]);
        let session = Arc::new(StubSession::new());
        let pipeline = DrainPipeline::new(session.clone(), connected_gate(), options());

        let report = pipeline
            .run_pass(&log, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.published, 0);
        assert_eq!(session.publish_attempts(), 0);
    }

    #[tokio::test]
    async fn missing_log_is_fatal() {
        let dir = TempDir::new().unwrap();
        let log = PersistentLog::new(dir.path().join("absent.txt"));
        let pipeline = DrainPipeline::new(Arc::new(StubSession::new()), connected_gate(), options());

        let result = pipeline.run_pass(&log, &CancellationToken::new()).await;
        assert!(matches!(result, Err(DrainError::Log(LogError::NotFound(_)))));
    }

    #[tokio::test]
    async fn publish_failure_stops_the_pass() {
        let dir = TempDir::new().unwrap();
        let log = write_log(&dir, &["1", "2", "3", "4", "5"]);
        let session = Arc::new(StubSession::new().fail_on_publish(3));
        let pipeline = DrainPipeline::new(session.clone(), connected_gate(), options());

        let result = pipeline.run_pass(&log, &CancellationToken::new()).await;

        match result {
            Err(DrainError::Publish { seq, .. }) => assert_eq!(seq, 3),
            other => panic!("expected publish failure, got {:?}", other),
        }
        assert_eq!(session.payloads(), vec![b"1".to_vec(), b"2".to_vec()]);
        assert_eq!(session.publish_attempts(), 3);
    }

    #[tokio::test]
    async fn link_loss_aborts_before_next_record() {
        let dir = TempDir::new().unwrap();
        let log = write_log(&dir, &["1", "2", "3", "4"]);
        let gate = connected_gate();
        let session = Arc::new(StubSession::new().drop_link_after(2));
        session.attach_gate(gate.clone());
        let pipeline = DrainPipeline::new(session.clone(), gate, options());

        let result = pipeline.run_pass(&log, &CancellationToken::new()).await;

        match result {
            Err(DrainError::LinkLost { seq }) => assert_eq!(seq, 3),
            other => panic!("expected link loss, got {:?}", other),
        }
        assert_eq!(session.payloads().len(), 2);
    }

    #[tokio::test]
    async fn cancelled_pass_stops_publishing() {
        let dir = TempDir::new().unwrap();
        let log = write_log(&dir, &["1", "2", "3"]);
        let session = Arc::new(StubSession::new());
        let pipeline = DrainPipeline::new(session.clone(), connected_gate(), options());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = pipeline.run_pass(&log, &cancel).await.unwrap();

        assert!(report.cancelled);
        assert_eq!(report.published, 0);
        assert_eq!(session.publish_attempts(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn read_error_ends_pass_as_degraded_success() {
        // A directory opens for reading but fails on the first read on Linux.
        let dir = TempDir::new().unwrap();
        let log = PersistentLog::new(dir.path());
        if log.open_for_read().is_err() {
            return;
        }
        let session = Arc::new(StubSession::new());
        let pipeline = DrainPipeline::new(session.clone(), connected_gate(), options());

        let report = pipeline
            .run_pass(&log, &CancellationToken::new())
            .await
            .unwrap();

        assert!(report.degraded);
        assert!(!report.cancelled);
        assert_eq!(report.published, 0);
        assert_eq!(session.publish_attempts(), 0);
    }

    #[test]
    fn pipeline_keeps_its_publish_options() {
        let pipeline = DrainPipeline::new(Arc::new(StubSession::new()), connected_gate(), options());
        assert_eq!(pipeline.options().topic, "telespool/test/log");
        assert_eq!(pipeline.options().qos, QoS::AtLeastOnce);
        assert!(!pipeline.options().retain);
    }

    fn arb_line() -> impl Strategy<Value = Vec<u8>> {
        proptest::collection::vec(any::<u8>().prop_filter("no terminator", |b| *b != b'\n'), 0..48)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn drain_publishes_in_append_order(lines in proptest::collection::vec(arb_line(), 0..30)) {
            let dir = TempDir::new().unwrap();
            let log = PersistentLog::new(dir.path().join("log.txt"));
            let mut writer = log.open_for_append().unwrap();
            for line in &lines {
                writer.append_line(line).unwrap();
            }
            writer.close().unwrap();

            let session = Arc::new(StubSession::new());
            let pipeline = DrainPipeline::new(session.clone(), connected_gate(), options());
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            let report = runtime
                .block_on(pipeline.run_pass(&log, &CancellationToken::new()))
                .unwrap();

            prop_assert_eq!(report.published, lines.len() as u64);
            prop_assert_eq!(session.payloads(), lines);
        }
    }

    #[tokio::test]
    async fn oversized_records_are_passed_through() {
        let dir = TempDir::new().unwrap();
        let big = "x".repeat(4096);
        let log = write_log(&dir, &[big.as_str()]);
        let session = Arc::new(StubSession::new());
        let pipeline = DrainPipeline::new(session.clone(), connected_gate(), options());

        pipeline
            .run_pass(&log, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(session.payloads()[0].len(), 4096);
    }
}
