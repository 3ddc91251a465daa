//! Configuration type definitions

use crate::error::RetryConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Selection protocol timing and identity
///
/// All durations are in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    /// How long `get` waits for the first reply
    pub first_reply_window_ms: u64,

    /// How long `get` keeps draining after the first reply
    pub drain_window_ms: u64,

    /// How long a re-`set` waits for its own clear to come back
    pub clear_ack_timeout_ms: u64,

    /// Deadline for confirming ownership
    pub ownership_timeout_ms: u64,

    /// How long `store` waits for the Selection Manager
    pub handoff_timeout_ms: u64,

    /// How long a caller waits for any worker reply
    pub command_timeout_ms: u64,

    /// Back-off between contested ownership declarations
    ///
    /// `ownership_timeout_ms` bounds the retries; `max_retries` is only a
    /// cap for back-offs too short to reach it.
    pub ownership_retry: RetryConfig,

    /// Back-off for opening the native clipboard store
    pub store_open_retry: RetryConfig,

    /// Client name prefix for windowing-server connections
    pub client_name: String,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            first_reply_window_ms: 50,
            drain_window_ms: 50,
            clear_ack_timeout_ms: 50,
            ownership_timeout_ms: 100,
            handoff_timeout_ms: 500,
            command_timeout_ms: 2000,
            ownership_retry: RetryConfig {
                max_retries: 16,
                initial_delay_ms: 5,
                backoff_multiplier: 2,
                max_delay_ms: 20,
            },
            store_open_retry: RetryConfig::default(),
            client_name: "lamco-selection".to_string(),
        }
    }
}

impl SelectionConfig {
    /// First phase of the getter's reply wait
    pub fn first_reply_window(&self) -> Duration {
        Duration::from_millis(self.first_reply_window_ms)
    }

    /// Second phase of the getter's reply wait
    pub fn drain_window(&self) -> Duration {
        Duration::from_millis(self.drain_window_ms)
    }

    /// Self-clear acknowledgement wait
    pub fn clear_ack_timeout(&self) -> Duration {
        Duration::from_millis(self.clear_ack_timeout_ms)
    }

    /// Ownership confirmation deadline
    pub fn ownership_timeout(&self) -> Duration {
        Duration::from_millis(self.ownership_timeout_ms)
    }

    /// Selection Manager hand-off wait
    pub fn handoff_timeout(&self) -> Duration {
        Duration::from_millis(self.handoff_timeout_ms)
    }

    /// Worker reply wait
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level ("trace", "debug", "info", "warn", "error")
    pub level: String,

    /// Output format ("pretty", "compact", "json")
    pub format: String,

    /// Also write logs to this file (None = console only)
    pub log_file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            log_file: None,
        }
    }
}
