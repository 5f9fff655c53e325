//! Configuration knobs for the orchestration kernel.
//!
//! Mirrors the defaulting style of `prodigy::storage::config::StorageConfig`:
//! every field that has a sensible default carries `#[serde(default = ...)]`
//! so a TOML file only needs to name what it overrides. The external CLI out
//! of scope for this kernel is the thing that loads this via `toml`; this
//! module only defines the shape.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Knobs for the durable session store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_ssl_mode")]
    pub ssl_mode: String,
    #[serde(default = "default_max_open_conns")]
    pub max_open_conns: u32,
    #[serde(default = "default_max_idle_conns")]
    pub max_idle_conns: u32,
    #[serde(with = "humantime_serde", default = "default_conn_max_lifetime")]
    pub conn_max_lifetime: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            database: default_database(),
            user: String::new(),
            password: String::new(),
            ssl_mode: default_ssl_mode(),
            max_open_conns: default_max_open_conns(),
            max_idle_conns: default_max_idle_conns(),
            conn_max_lifetime: default_conn_max_lifetime(),
        }
    }
}

fn default_host() -> String {
    "localhost".to_string()
}
fn default_port() -> u16 {
    5432
}
fn default_database() -> String {
    "documentation_sessions".to_string()
}
fn default_ssl_mode() -> String {
    "disable".to_string()
}
fn default_max_open_conns() -> u32 {
    10
}
fn default_max_idle_conns() -> u32 {
    2
}
fn default_conn_max_lifetime() -> Duration {
    Duration::from_secs(3600)
}

/// Knobs governing session lifetime, concurrency ceiling, and the background
/// expiry tick. Feeds [`crate::session::manager::SessionManagerConfig`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(with = "humantime_serde", default = "default_session_timeout")]
    pub timeout: Duration,
    #[serde(default)]
    pub max_concurrent: Option<usize>,
    #[serde(with = "humantime_serde", default = "default_cleanup_interval")]
    pub cleanup_interval: Duration,
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout: default_session_timeout(),
            max_concurrent: None,
            cleanup_interval: default_cleanup_interval(),
            cache_capacity: default_cache_capacity(),
        }
    }
}

fn default_session_timeout() -> Duration {
    Duration::from_secs(24 * 3600)
}
fn default_cleanup_interval() -> Duration {
    Duration::from_secs(300)
}
fn default_cache_capacity() -> usize {
    1024
}

/// Knobs for the error-recovery manager. Feeds
/// [`crate::error::recovery::RecoveryPolicy`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(with = "humantime_serde", default = "default_retry_delay")]
    pub retry_delay: Duration,
    #[serde(with = "humantime_serde", default = "default_transition_timeout")]
    pub transition_timeout: Duration,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay: default_retry_delay(),
            transition_timeout: default_transition_timeout(),
        }
    }
}

fn default_max_retries() -> u32 {
    5
}
fn default_retry_delay() -> Duration {
    Duration::from_millis(100)
}
fn default_transition_timeout() -> Duration {
    Duration::from_secs(4 * 3600)
}

/// Structured-logging knobs; consumed by the CLI this kernel does not
/// implement, but named here so `OrchestratorConfig` round-trips the whole
/// knob set from a single TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: LogLevel,
    #[serde(default)]
    pub format: LogFormat,
    #[serde(default = "default_log_output")]
    pub output: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            output: default_log_output(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Console,
}

impl Default for LogFormat {
    fn default() -> Self {
        Self::Console
    }
}

fn default_log_level() -> LogLevel {
    LogLevel::Info
}
fn default_log_output() -> String {
    "stdout".to_string()
}

/// Aggregates every config group the kernel recognizes. An external loader
/// (out of scope here, see spec §6) populates this from a TOML file with
/// `[database]`, `[session]`, `[workflow]`, and `[logging]` tables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub workflow: WorkflowConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl OrchestratorConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_uses_documented_defaults() {
        let config = OrchestratorConfig::from_toml_str("").unwrap();
        assert_eq!(config.database.port, 5432);
        assert_eq!(config.session.max_concurrent, None);
        assert_eq!(config.workflow.max_retries, 5);
        assert_eq!(config.logging.level, LogLevel::Info);
    }

    #[test]
    fn partial_overrides_leave_the_rest_default() {
        let toml = r#"
            [session]
            max_concurrent = 50
            cache_capacity = 200
        "#;
        let config = OrchestratorConfig::from_toml_str(toml).unwrap();
        assert_eq!(config.session.max_concurrent, Some(50));
        assert_eq!(config.session.cache_capacity, 200);
        assert_eq!(config.session.timeout, default_session_timeout());
    }
}
