// ABOUTME: Pipeline configuration loaded from TELESPOOL_* environment variables with defaults.
// ABOUTME: Covers store location, session endpoint, publish options, fill/drain pacing, and drain mode.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;
use telespool_core::QoS;
use thiserror::Error;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var} has an invalid value: {value:?}")]
    Invalid { var: &'static str, value: String },

    #[error("TELESPOOL_COMMIT_EVERY must be greater than zero")]
    ZeroCommitThreshold,
}

/// How many drain passes the controller runs once connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DrainMode {
    /// One pass over the log, then teardown.
    Once,
    /// Re-drain the whole log after every successful pass until cancelled
    /// or a pass fails.
    Continuous,
}

impl FromStr for DrainMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "once" => Ok(DrainMode::Once),
            "continuous" => Ok(DrainMode::Continuous),
            other => Err(format!("unknown drain mode: {other}")),
        }
    }
}

/// Full configuration for one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub home: PathBuf,
    pub log_name: String,
    pub capacity_bytes: u64,
    pub endpoint: String,
    pub client_id: String,
    pub topic: String,
    pub qos: QoS,
    pub retain: bool,
    pub commit_every: u64,
    pub fill_quota: u64,
    pub fill_yield: Duration,
    pub drain_yield: Duration,
    pub tail_interval: Duration,
    /// `None` waits for the session indefinitely.
    pub connect_timeout: Option<Duration>,
    pub publish_timeout: Duration,
    pub drain_mode: DrainMode,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            home: default_home(),
            log_name: "log.txt".to_string(),
            capacity_bytes: 1024 * 1024,
            endpoint: "http://127.0.0.1:8080".to_string(),
            client_id: format!("telespool-{}", ulid::Ulid::new()),
            topic: "telespool/device/log".to_string(),
            qos: QoS::AtLeastOnce,
            retain: false,
            commit_every: 500,
            fill_quota: 5000,
            fill_yield: Duration::from_millis(10),
            drain_yield: Duration::ZERO,
            tail_interval: Duration::from_secs(1),
            connect_timeout: None,
            publish_timeout: Duration::from_millis(2000),
            drain_mode: DrainMode::Continuous,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// Environment variables:
    /// - TELESPOOL_HOME: store root directory (default: ~/.telespool)
    /// - TELESPOOL_LOG_NAME: log file name in the store (default: log.txt)
    /// - TELESPOOL_CAPACITY_BYTES: nominal store capacity (default: 1048576)
    /// - TELESPOOL_ENDPOINT: session endpoint base URL (default: http://127.0.0.1:8080)
    /// - TELESPOOL_CLIENT_ID: session client id (default: telespool-<ulid>)
    /// - TELESPOOL_TOPIC: publish topic (default: telespool/device/log)
    /// - TELESPOOL_QOS: 0, 1 or 2 (default: 1)
    /// - TELESPOOL_RETAIN: retain flag (default: false)
    /// - TELESPOOL_COMMIT_EVERY: appends per durability commit (default: 500)
    /// - TELESPOOL_FILL_QUOTA: records written by the fill phase (default: 5000)
    /// - TELESPOOL_FILL_YIELD_MS: pause between appends (default: 10)
    /// - TELESPOOL_DRAIN_YIELD_MS: pause between publishes (default: 0)
    /// - TELESPOOL_TAIL_INTERVAL_MS: pause between continuous passes (default: 1000)
    /// - TELESPOOL_CONNECT_TIMEOUT_SECS: bound on the connection wait (default: unbounded)
    /// - TELESPOOL_PUBLISH_TIMEOUT_MS: per-publish transport timeout (default: 2000)
    /// - TELESPOOL_DRAIN_MODE: once | continuous (default: continuous)
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let home = std::env::var("TELESPOOL_HOME")
            .ok()
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.home);

        let qos_level: u8 = parse_var("TELESPOOL_QOS", defaults.qos.level())?;
        let qos = QoS::from_level(qos_level).ok_or(ConfigError::Invalid {
            var: "TELESPOOL_QOS",
            value: qos_level.to_string(),
        })?;

        let retain = match std::env::var("TELESPOOL_RETAIN") {
            Ok(v) if !v.is_empty() => parse_bool("TELESPOOL_RETAIN", &v)?,
            _ => defaults.retain,
        };

        let commit_every = parse_var("TELESPOOL_COMMIT_EVERY", defaults.commit_every)?;
        if commit_every == 0 {
            return Err(ConfigError::ZeroCommitThreshold);
        }

        let connect_timeout = match std::env::var("TELESPOOL_CONNECT_TIMEOUT_SECS") {
            Ok(v) if !v.is_empty() => Some(Duration::from_secs(
                v.trim().parse().map_err(|_| ConfigError::Invalid {
                    var: "TELESPOOL_CONNECT_TIMEOUT_SECS",
                    value: v.clone(),
                })?,
            )),
            _ => defaults.connect_timeout,
        };

        Ok(Self {
            home,
            log_name: string_var("TELESPOOL_LOG_NAME", defaults.log_name),
            capacity_bytes: parse_var("TELESPOOL_CAPACITY_BYTES", defaults.capacity_bytes)?,
            endpoint: string_var("TELESPOOL_ENDPOINT", defaults.endpoint),
            client_id: string_var("TELESPOOL_CLIENT_ID", defaults.client_id),
            topic: string_var("TELESPOOL_TOPIC", defaults.topic),
            qos,
            retain,
            commit_every,
            fill_quota: parse_var("TELESPOOL_FILL_QUOTA", defaults.fill_quota)?,
            fill_yield: millis_var("TELESPOOL_FILL_YIELD_MS", defaults.fill_yield)?,
            drain_yield: millis_var("TELESPOOL_DRAIN_YIELD_MS", defaults.drain_yield)?,
            tail_interval: millis_var("TELESPOOL_TAIL_INTERVAL_MS", defaults.tail_interval)?,
            connect_timeout,
            publish_timeout: millis_var("TELESPOOL_PUBLISH_TIMEOUT_MS", defaults.publish_timeout)?,
            drain_mode: parse_var("TELESPOOL_DRAIN_MODE", defaults.drain_mode)?,
        })
    }

    pub fn log_path(&self) -> PathBuf {
        self.home.join(&self.log_name)
    }
}

fn default_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
        .join(".telespool")
}

fn string_var(var: &'static str, default: String) -> String {
    std::env::var(var)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or(default)
}

fn parse_var<T: FromStr>(var: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(var) {
        Ok(v) if !v.is_empty() => v
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { var, value: v }),
        _ => Ok(default),
    }
}

fn millis_var(var: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    let default_ms = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
    parse_var(var, default_ms).map(Duration::from_millis)
}

fn parse_bool(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ConfigError::Invalid {
            var,
            value: value.to_string(),
        }),
    }
}
