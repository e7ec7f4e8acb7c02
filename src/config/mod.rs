//! Typed configuration from environment variables or a config file.
//!
//! Loads once at startup and fails fast on invalid values. The ingest token
//! is wrapped in secrecy::SecretString to prevent log leaks and is only ever
//! read from the environment.

pub mod secrets;

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::coordinator::CoordinatorConfig;
use crate::error::{Error, Result};
use crate::spool::DEFAULT_CAPACITY;
use crate::transport::{RetryPolicy, TransportConfig};
use secrets::SecretString;

#[derive(Debug)]
pub struct Config {
    pub ingest_url: String,
    pub ingest_token: Option<SecretString>,
    pub agent_id: String,
    /// Bound on each delivery attempt.
    pub request_timeout: Duration,
    /// Bound on snapshot production within a cycle.
    pub cycle_timeout: Duration,
    pub spool_dir: PathBuf,
    pub spool_capacity: usize,
    pub interval: Duration,
    /// Attempts for the direct delivery of a fresh snapshot.
    pub max_attempts: u32,
    pub backoff_unit: Duration,
    /// Collector program followed by its arguments.
    pub collector: Vec<String>,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ingest_url: "http://localhost:8000/ingest".to_string(),
            ingest_token: None,
            agent_id: "posture-agent-001".to_string(),
            request_timeout: Duration::from_secs(10),
            cycle_timeout: Duration::from_secs(60),
            spool_dir: PathBuf::from("/var/lib/posture-agent/spool"),
            spool_capacity: DEFAULT_CAPACITY,
            interval: Duration::from_secs(900),
            max_attempts: 1,
            backoff_unit: Duration::from_secs(1),
            collector: Vec::new(),
            otel_endpoint: None,
            log_level: "info".to_string(),
        }
    }
}

/// On-disk config. Every field is optional; missing ones keep defaults.
///
/// Field names follow the agent's historical `config.json`; unknown fields
/// are ignored.
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    ingest_url: Option<String>,
    agent_id: Option<String>,
    timeout_seconds: Option<u64>,
    cycle_timeout_seconds: Option<u64>,
    spool_dir: Option<PathBuf>,
    spool_capacity: Option<usize>,
    interval_seconds: Option<u64>,
    max_attempts: Option<u32>,
    backoff_unit_ms: Option<u64>,
    collector: Option<Vec<String>>,
    otel_endpoint: Option<String>,
    log_level: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    /// In production, systemd EnvironmentFile provides the vars.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            ingest_url: std::env::var("INGEST_URL").unwrap_or(defaults.ingest_url),
            ingest_token: token_from_env(),
            agent_id: std::env::var("AGENT_ID").unwrap_or(defaults.agent_id),
            request_timeout: secs_var("REQUEST_TIMEOUT_SECS", defaults.request_timeout)?,
            cycle_timeout: secs_var("CYCLE_TIMEOUT_SECS", defaults.cycle_timeout)?,
            spool_dir: std::env::var("SPOOL_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.spool_dir),
            spool_capacity: parsed_var("SPOOL_CAPACITY", defaults.spool_capacity)?,
            interval: secs_var("INTERVAL_SECS", defaults.interval)?,
            max_attempts: parsed_var("MAX_ATTEMPTS", defaults.max_attempts)?,
            backoff_unit: Duration::from_millis(parsed_var(
                "BACKOFF_UNIT_MS",
                defaults.backoff_unit.as_millis() as u64,
            )?),
            collector: std::env::var("COLLECTOR_COMMAND")
                .map(|cmd| cmd.split_whitespace().map(str::to_string).collect())
                .unwrap_or(defaults.collector),
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
        };
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML (`.toml`) or JSON (anything else) file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read config {}: {e}", path.display())))?;

        let file: FileConfig = if path.extension().is_some_and(|ext| ext == "toml") {
            toml::from_str(&content)
                .map_err(|e| Error::Config(format!("bad config {}: {e}", path.display())))?
        } else {
            serde_json::from_str(&content)
                .map_err(|e| Error::Config(format!("bad config {}: {e}", path.display())))?
        };

        let config = Self::default().merge(file);
        config.validate()?;
        Ok(config)
    }

    fn merge(self, file: FileConfig) -> Self {
        Self {
            ingest_url: file.ingest_url.unwrap_or(self.ingest_url),
            ingest_token: token_from_env(),
            agent_id: file.agent_id.unwrap_or(self.agent_id),
            request_timeout: file
                .timeout_seconds
                .map(Duration::from_secs)
                .unwrap_or(self.request_timeout),
            cycle_timeout: file
                .cycle_timeout_seconds
                .map(Duration::from_secs)
                .unwrap_or(self.cycle_timeout),
            spool_dir: file.spool_dir.unwrap_or(self.spool_dir),
            spool_capacity: file.spool_capacity.unwrap_or(self.spool_capacity),
            interval: file
                .interval_seconds
                .map(Duration::from_secs)
                .unwrap_or(self.interval),
            max_attempts: file.max_attempts.unwrap_or(self.max_attempts),
            backoff_unit: file
                .backoff_unit_ms
                .map(Duration::from_millis)
                .unwrap_or(self.backoff_unit),
            collector: file.collector.unwrap_or(self.collector),
            otel_endpoint: file.otel_endpoint.or(self.otel_endpoint),
            log_level: file.log_level.unwrap_or(self.log_level),
        }
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if !(self.ingest_url.starts_with("http://") || self.ingest_url.starts_with("https://")) {
            return Err(Error::Config(format!(
                "ingest_url must be an http(s) URL, got {:?}",
                self.ingest_url
            )));
        }
        if self.spool_capacity == 0 {
            return Err(Error::Config("spool_capacity must be at least 1".to_string()));
        }
        if self.interval.is_zero() {
            return Err(Error::Config("interval must be non-zero".to_string()));
        }
        if self.request_timeout.is_zero() || self.cycle_timeout.is_zero() {
            return Err(Error::Config("timeouts must be non-zero".to_string()));
        }
        if self.max_attempts == 0 {
            return Err(Error::Config("max_attempts must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            timeout: self.request_timeout,
            bearer_token: self.ingest_token.clone(),
            ..TransportConfig::new(self.ingest_url.clone())
        }
    }

    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            cycle_timeout: self.cycle_timeout,
            retry: RetryPolicy {
                max_attempts: self.max_attempts,
                backoff_unit: self.backoff_unit,
            },
        }
    }

    /// Collector program and arguments, if one is configured.
    pub fn collector_command(&self) -> Option<(&str, &[String])> {
        self.collector
            .split_first()
            .map(|(program, args)| (program.as_str(), args))
    }
}

fn token_from_env() -> Option<SecretString> {
    std::env::var("INGEST_TOKEN")
        .ok()
        .filter(|t| !t.is_empty())
        .map(SecretString::from)
}

fn parsed_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("invalid {name}={raw:?}: {e}"))),
        Err(_) => Ok(default),
    }
}

fn secs_var(name: &str, default: Duration) -> Result<Duration> {
    parsed_var(name, default.as_secs()).map(Duration::from_secs)
}
