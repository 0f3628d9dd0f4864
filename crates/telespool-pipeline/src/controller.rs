// ABOUTME: PipelineController drives the fill -> await connection -> drain -> teardown state machine.
// ABOUTME: Owns the session lifecycle and guarantees teardown on every exit path, returning a RunReport.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use telespool_core::{ConnectionGate, GateError, Session, SessionError};
use telespool_store::{PersistentLog, SpoolStore};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::config::{DrainMode, PipelineConfig};
use crate::drain::{DrainError, DrainOptions, DrainPipeline, DrainReport};
use crate::fill::{FillError, FillOptions, FillReport, SyntheticSource, run_fill};

/// Fatal errors that send the controller to `Teardown(Failure)`.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("fill failed: {0}")]
    Fill(#[from] FillError),

    #[error("session error: {0}")]
    Session(#[from] SessionError),

    #[error("connection wait failed: {0}")]
    Gate(#[from] GateError),

    #[error("drain failed: {0}")]
    Drain(#[from] DrainError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Outcome {
    Success,
    Failure,
}

/// Controller states. `Teardown` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Phase {
    Init,
    Filling,
    AwaitingConnection,
    Draining,
    Teardown(Outcome),
}

impl Phase {
    /// Whether the state machine permits moving from `self` to `next`.
    pub fn can_transition_to(self, next: Phase) -> bool {
        use Phase::*;
        match (self, next) {
            (Teardown(_), _) => false,
            (_, Teardown(_)) => true,
            (Init, Filling) | (Init, AwaitingConnection) => true,
            (Filling, AwaitingConnection) => true,
            (AwaitingConnection, Draining) => true,
            (Draining, Draining) => true,
            _ => false,
        }
    }
}

/// Everything that happened during one controller run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub outcome: Outcome,
    pub phases: Vec<Phase>,
    /// `None` when an existing log caused the fill phase to be skipped.
    pub fill: Option<FillReport>,
    /// A non-fatal fill abort; whatever was written is still drained.
    pub fill_error: Option<String>,
    pub passes: Vec<DrainReport>,
    pub cancelled: bool,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    pub fn total_published(&self) -> u64 {
        self.passes.iter().map(|p| p.published).sum()
    }

    pub fn succeeded(&self) -> bool {
        self.outcome == Outcome::Success
    }
}

type RecordSource = Box<dyn Iterator<Item = Vec<u8>> + Send>;

/// How the drain loop ended without a fatal error.
enum Stop {
    Drained,
    Cancelled,
}

/// Orchestrates one run of the spooler over a single log and session.
pub struct PipelineController {
    config: PipelineConfig,
    store: SpoolStore,
    log: PersistentLog,
    session: Arc<dyn Session>,
    gate: ConnectionGate,
    cancel: CancellationToken,
    source: Option<RecordSource>,
    phase: Phase,
    session_open: bool,
    report: RunReport,
}

impl PipelineController {
    /// Create a controller for the log named in `config` inside `store`.
    /// The fill source defaults to [`SyntheticSource`].
    pub fn new(config: PipelineConfig, store: SpoolStore, session: Arc<dyn Session>) -> Self {
        let log = store.log(&config.log_name);
        let now = Utc::now();
        Self {
            config,
            store,
            log,
            session,
            gate: ConnectionGate::new(),
            cancel: CancellationToken::new(),
            source: None,
            phase: Phase::Init,
            session_open: false,
            report: RunReport {
                outcome: Outcome::Success,
                phases: vec![Phase::Init],
                fill: None,
                fill_error: None,
                passes: Vec::new(),
                cancelled: false,
                error: None,
                started_at: now,
                finished_at: now,
            },
        }
    }

    /// Replace the fill source.
    pub fn with_source<I>(mut self, source: I) -> Self
    where
        I: IntoIterator<Item = Vec<u8>>,
        I::IntoIter: Send + 'static,
    {
        self.source = Some(Box::new(source.into_iter()));
        self
    }

    /// Use an externally owned cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// The gate the session reports into. Clones share state.
    pub fn gate(&self) -> ConnectionGate {
        self.gate.clone()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn log(&self) -> &PersistentLog {
        &self.log
    }

    /// Run to `Teardown`. Never panics on pipeline errors; the outcome and
    /// error are carried in the returned report.
    pub async fn run(mut self) -> RunReport {
        self.report.started_at = Utc::now();
        let result = self.run_phases().await;
        self.teardown(result).await
    }

    fn transition(&mut self, next: Phase) {
        debug_assert!(
            self.phase.can_transition_to(next),
            "illegal transition {:?} -> {:?}",
            self.phase,
            next
        );
        tracing::info!(from = ?self.phase, to = ?next, "phase transition");
        self.phase = next;
        self.report.phases.push(next);
    }

    async fn run_phases(&mut self) -> Result<Stop, PipelineError> {
        if self.log.exists() {
            tracing::info!(
                path = %self.log.path().display(),
                "log exists, skipping fill"
            );
        } else {
            self.transition(Phase::Filling);
            self.fill().await?;
        }

        self.transition(Phase::AwaitingConnection);
        if self.cancel.is_cancelled() {
            return Ok(Stop::Cancelled);
        }
        self.session.connect(self.gate.clone()).await?;
        self.session_open = true;

        tracing::info!(
            timeout = ?self.config.connect_timeout,
            session = self.session.name(),
            "waiting for session"
        );
        tokio::select! {
            _ = self.cancel.cancelled() => return Ok(Stop::Cancelled),
            waited = self.gate.await_connected(self.config.connect_timeout) => waited?,
        }

        let drain = DrainPipeline::new(
            Arc::clone(&self.session),
            self.gate.clone(),
            DrainOptions {
                topic: self.config.topic.clone(),
                qos: self.config.qos,
                retain: self.config.retain,
                yield_between: self.config.drain_yield,
            },
        );

        loop {
            self.transition(Phase::Draining);
            let pass = drain.run_pass(&self.log, &self.cancel).await?;
            let cancelled = pass.cancelled;
            self.report.passes.push(pass);

            if cancelled || self.cancel.is_cancelled() {
                return Ok(Stop::Cancelled);
            }
            if self.config.drain_mode == DrainMode::Once {
                return Ok(Stop::Drained);
            }

            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(Stop::Cancelled),
                _ = tokio::time::sleep(self.config.tail_interval) => {}
            }
        }
    }

    async fn fill(&mut self) -> Result<(), PipelineError> {
        self.store.log_report();

        let source = self
            .source
            .take()
            .unwrap_or_else(|| Box::new(SyntheticSource::default()));
        let options = FillOptions {
            commit_every: self.config.commit_every,
            quota: self.config.fill_quota,
            yield_between: self.config.fill_yield,
        };

        match run_fill(&self.log, source, &options, &self.cancel).await {
            Ok(report) => self.report.fill = Some(report),
            Err(e @ FillError::Append { .. }) => {
                tracing::warn!(error = %e, "fill aborted, draining what was written");
                self.report.fill_error = Some(e.to_string());
            }
            Err(e) => return Err(e.into()),
        }

        self.store.log_report();
        Ok(())
    }

    async fn teardown(mut self, result: Result<Stop, PipelineError>) -> RunReport {
        if self.session_open {
            self.session.disconnect().await;
            self.session_open = false;
        }

        let outcome = match result {
            Ok(Stop::Drained) => Outcome::Success,
            Ok(Stop::Cancelled) => {
                tracing::info!("run cancelled");
                self.report.cancelled = true;
                Outcome::Success
            }
            Err(e) => {
                tracing::error!(error = %e, "pipeline failed");
                self.report.error = Some(e.to_string());
                Outcome::Failure
            }
        };

        self.transition(Phase::Teardown(outcome));
        self.report.outcome = outcome;
        self.report.finished_at = Utc::now();
        tracing::info!(
            outcome = ?outcome,
            published = self.report.total_published(),
            passes = self.report.passes.len(),
            "teardown complete"
        );
        self.report
    }
}
