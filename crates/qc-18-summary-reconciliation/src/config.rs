//! # Reconciliation Configuration
//!
//! Engine tunables, loadable from a TOML file and overridable from the
//! environment.
//!
//! ## Config File Format
//!
//! ```toml
//! worker_threads = 8
//! max_store_attempts = 20
//! max_cas_conflicts = 100
//! store_retry_delay_ms = 30
//! store_call_timeout_ms = 5000
//! error_backoff_ms = 1000
//! poll_interval_ms = 100
//! max_batch_size = 500
//! force_apply_rule = "strictly_greater"
//! log_level = "info"
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Field |
//! |----------|-------|
//! | `QC_RECON_WORKER_THREADS` | `worker_threads` |
//! | `QC_RECON_MAX_STORE_ATTEMPTS` | `max_store_attempts` |
//! | `QC_RECON_MAX_CAS_CONFLICTS` | `max_cas_conflicts` |
//! | `QC_RECON_STORE_RETRY_DELAY_MS` | `store_retry_delay_ms` |
//! | `QC_RECON_STORE_CALL_TIMEOUT_MS` | `store_call_timeout_ms` |
//! | `QC_RECON_ERROR_BACKOFF_MS` | `error_backoff_ms` |
//! | `QC_RECON_POLL_INTERVAL_MS` | `poll_interval_ms` |
//! | `QC_RECON_MAX_BATCH_SIZE` | `max_batch_size` |
//! | `QC_RECON_FORCE_APPLY_RULE` | `force_apply_rule` (`strictly_greater` / `greater_or_equal`) |
//! | `QC_LOG_LEVEL` or `RUST_LOG` | `log_level` |

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::domain::ForceApplyRule;

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconciliationConfig {
    /// Concurrent per-key apply tasks within one batch.
    pub worker_threads: usize,
    /// Contention waits (and call timeouts) allowed per key before the
    /// offset oracle is consulted.
    pub max_store_attempts: u32,
    /// CAS mismatches tolerated per key before the key is declared locked.
    pub max_cas_conflicts: u32,
    /// Fixed backoff between contention retries.
    pub store_retry_delay_ms: u64,
    /// Deadline for a single store call.
    pub store_call_timeout_ms: u64,
    /// Pause after a fatal batch error in the run loop.
    pub error_backoff_ms: u64,
    /// Pause between polls when the log has nothing pending.
    pub poll_interval_ms: u64,
    /// Upper bound on records per polled batch.
    pub max_batch_size: usize,
    /// Forced-apply comparison against the offset oracle.
    pub force_apply_rule: ForceApplyRule,
    /// Log filter for the binary.
    pub log_level: String,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            worker_threads: 8,
            max_store_attempts: 20,
            max_cas_conflicts: 100,
            store_retry_delay_ms: 30,
            store_call_timeout_ms: 5_000,
            error_backoff_ms: 1_000,
            poll_interval_ms: 100,
            max_batch_size: 500,
            force_apply_rule: ForceApplyRule::StrictlyGreater,
            log_level: "info".to_string(),
        }
    }
}

impl ReconciliationConfig {
    /// Defaults overridden by `QC_RECON_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_overrides(|name| env::var(name).ok())
    }

    /// Parse from a TOML string. Missing fields take their defaults.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file, then apply environment overrides.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            error: e.to_string(),
        })?;

        Self::parse(&content)?.with_overrides(|name| env::var(name).ok())
    }

    /// Apply overrides from `lookup` (an environment accessor).
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("QC_RECON_WORKER_THREADS") {
            self.worker_threads = parse_var("QC_RECON_WORKER_THREADS", &v)?;
        }
        if let Some(v) = lookup("QC_RECON_MAX_STORE_ATTEMPTS") {
            self.max_store_attempts = parse_var("QC_RECON_MAX_STORE_ATTEMPTS", &v)?;
        }
        if let Some(v) = lookup("QC_RECON_MAX_CAS_CONFLICTS") {
            self.max_cas_conflicts = parse_var("QC_RECON_MAX_CAS_CONFLICTS", &v)?;
        }
        if let Some(v) = lookup("QC_RECON_STORE_RETRY_DELAY_MS") {
            self.store_retry_delay_ms = parse_var("QC_RECON_STORE_RETRY_DELAY_MS", &v)?;
        }
        if let Some(v) = lookup("QC_RECON_STORE_CALL_TIMEOUT_MS") {
            self.store_call_timeout_ms = parse_var("QC_RECON_STORE_CALL_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("QC_RECON_ERROR_BACKOFF_MS") {
            self.error_backoff_ms = parse_var("QC_RECON_ERROR_BACKOFF_MS", &v)?;
        }
        if let Some(v) = lookup("QC_RECON_POLL_INTERVAL_MS") {
            self.poll_interval_ms = parse_var("QC_RECON_POLL_INTERVAL_MS", &v)?;
        }
        if let Some(v) = lookup("QC_RECON_MAX_BATCH_SIZE") {
            self.max_batch_size = parse_var("QC_RECON_MAX_BATCH_SIZE", &v)?;
        }
        if let Some(v) = lookup("QC_RECON_FORCE_APPLY_RULE") {
            self.force_apply_rule = match v.to_lowercase().as_str() {
                "strictly_greater" | "gt" => ForceApplyRule::StrictlyGreater,
                "greater_or_equal" | "ge" => ForceApplyRule::GreaterOrEqual,
                _ => {
                    return Err(ConfigError::InvalidVar {
                        name: "QC_RECON_FORCE_APPLY_RULE".to_string(),
                        value: v,
                    })
                }
            };
        }
        if let Some(v) = lookup("QC_LOG_LEVEL").or_else(|| lookup("RUST_LOG")) {
            self.log_level = v;
        }

        self.validate()?;
        Ok(self)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_threads == 0 {
            return Err(ConfigError::Invalid("worker_threads must be > 0".into()));
        }
        if self.max_store_attempts == 0 {
            return Err(ConfigError::Invalid("max_store_attempts must be > 0".into()));
        }
        if self.max_cas_conflicts == 0 {
            return Err(ConfigError::Invalid("max_cas_conflicts must be > 0".into()));
        }
        if self.store_call_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "store_call_timeout_ms must be > 0".into(),
            ));
        }
        if self.max_batch_size == 0 {
            return Err(ConfigError::Invalid("max_batch_size must be > 0".into()));
        }
        Ok(())
    }

    /// Contention backoff.
    pub fn store_retry_delay(&self) -> Duration {
        Duration::from_millis(self.store_retry_delay_ms)
    }

    /// Per-call store deadline.
    pub fn store_call_timeout(&self) -> Duration {
        Duration::from_millis(self.store_call_timeout_ms)
    }

    /// Run-loop pause after a failed batch.
    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }

    /// Run-loop pause when idle.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidVar {
        name: name.to_string(),
        value: value.to_string(),
    })
}

/// Errors that can occur during config loading.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// File I/O error.
    #[error("Failed to read config file {path}: {error}")]
    Io {
        /// Path of the file that failed to load.
        path: String,
        /// Error message from the I/O operation.
        error: String,
    },

    /// TOML parse error.
    #[error("Failed to parse config: {0}")]
    Parse(String),

    /// Environment variable could not be parsed.
    #[error("Invalid value for {name}: {value:?}")]
    InvalidVar {
        /// Variable name.
        name: String,
        /// Raw value.
        value: String,
    },

    /// Semantically invalid value.
    #[error("Invalid config: {0}")]
    Invalid(String),
}
