//! Selection Error Types
//!
//! Error handling for the selection protocol layer, together with the
//! classification and recovery policy the service applies when an agent fails.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Result type for selection operations
pub type Result<T> = std::result::Result<T, SelectionError>;

/// Transport-level failures reported by a [`Connection`](crate::transport::Connection)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Flushing buffered requests to the server failed
    #[error("flush failed: {0}")]
    Flush(String),

    /// The server rejected an atom or window identifier
    #[error("bad identifier: {0}")]
    BadIdentifier(u32),

    /// A request could not be sent
    #[error("send failed: {0}")]
    Send(String),

    /// The connection to the server is gone
    #[error("connection closed")]
    Disconnected,

    /// The server answered with something the protocol does not allow
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Selection module error types
#[derive(Error, Debug)]
pub enum SelectionError {
    /// A content value is not text, bytes or null
    #[error("Invalid payload for target {target}: {reason}")]
    InvalidPayload {
        /// Target the value was declared under
        target: String,
        /// Why the value was rejected
        reason: String,
    },

    /// Target names a legacy binary format that cannot be transferred
    #[error("Unsupported target: {0}")]
    UnsupportedTarget(String),

    /// Transport failure; the failing agent must be recreated
    #[error("Broken connection: {0}")]
    BrokenConnection(#[from] TransportError),

    /// Ownership could not be confirmed before the deadline
    #[error("Ownership of {selection} not confirmed after {attempts} attempts")]
    OwnershipTimeout {
        /// Selection atom name
        selection: String,
        /// Number of ownership declarations made
        attempts: u32,
    },

    /// Ownership declaration was rejected outright
    #[error("Ownership of {0} failed")]
    OwnershipFailed(String),

    /// The Selection Manager refused the persistence request
    #[error("Selection manager refused to save targets")]
    ManagerHandoffFailed,

    /// The Selection Manager did not answer in time
    #[error("Selection manager did not answer within {0}ms")]
    ManagerHandoffTimeout(u64),

    /// Operation has no meaning on this platform
    #[error("Unsupported operation: {0}")]
    Unsupported(&'static str),

    /// Native clipboard store could not be opened
    #[error("Native clipboard store unavailable after {0} attempts")]
    NativeStoreUnavailable(u32),

    /// Worker did not reply within the command timeout
    #[error("Worker did not reply within {0}ms")]
    Timeout(u64),
}

impl SelectionError {
    /// Returns true if the failure is a transport failure
    pub fn is_broken_connection(&self) -> bool {
        matches!(self, Self::BrokenConnection(_))
    }

    /// Returns true if the caller supplied content the service rejects
    pub fn is_payload_error(&self) -> bool {
        matches!(self, Self::InvalidPayload { .. } | Self::UnsupportedTarget(_))
    }
}

/// Error classification for recovery strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorType {
    /// Rejected content
    Payload,
    /// Transport failures
    Connection,
    /// Ownership contention
    Ownership,
    /// Selection Manager hand-off
    Handoff,
    /// Platform limitations
    Platform,
    /// Worker timeouts
    Timeout,
}

/// Classify error for recovery strategy selection
pub fn classify_error(error: &SelectionError) -> ErrorType {
    match error {
        SelectionError::InvalidPayload { .. } | SelectionError::UnsupportedTarget(_) => {
            ErrorType::Payload
        }

        SelectionError::BrokenConnection(_) => ErrorType::Connection,

        SelectionError::OwnershipTimeout { .. } | SelectionError::OwnershipFailed(_) => {
            ErrorType::Ownership
        }

        SelectionError::ManagerHandoffFailed | SelectionError::ManagerHandoffTimeout(_) => {
            ErrorType::Handoff
        }

        SelectionError::Unsupported(_) | SelectionError::NativeStoreUnavailable(_) => {
            ErrorType::Platform
        }

        SelectionError::Timeout(_) => ErrorType::Timeout,
    }
}

/// Which agent an error came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentRole {
    /// Fetches data from other owners
    Getter,
    /// Owns the selection and serves requests
    Setter,
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Getter => write!(f, "getter"),
            Self::Setter => write!(f, "setter"),
        }
    }
}

/// Error context for recovery decisions
#[derive(Debug, Clone)]
pub struct ErrorContext {
    /// Agent the error came from
    pub role: AgentRole,

    /// Retry attempt number
    pub attempt: u32,

    /// Additional context information
    pub details: String,
}

impl ErrorContext {
    /// Create new error context
    pub fn new(role: AgentRole) -> Self {
        Self {
            role,
            attempt: 0,
            details: String::new(),
        }
    }

    /// Set attempt number
    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    /// Set details
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = details.into();
        self
    }
}

/// Recovery action to take after error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Tear the agent down, build a new one and retry the call
    RecreateAgent,

    /// Tear the agent down, build a new one and re-declare the last content
    RecreateAndReplay,

    /// Hand the error to the caller
    Surface,
}

/// Retry configuration
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retries
    pub max_retries: u32,

    /// Initial delay in milliseconds
    pub initial_delay_ms: u64,

    /// Backoff multiplier
    pub backoff_multiplier: u32,

    /// Maximum delay in milliseconds
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 5,
            backoff_multiplier: 2,
            max_delay_ms: 20,
        }
    }
}

impl RetryConfig {
    /// Calculate delay for given attempt
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = (self.backoff_multiplier as u64).saturating_pow(attempt);
        let delay = self.initial_delay_ms.saturating_mul(factor);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }
}

/// Determine recovery action for error
///
/// Transport failures get exactly one recreate; anything else, and a second
/// transport failure, goes back to the caller.
pub fn recovery_action(error: &SelectionError, context: &ErrorContext) -> RecoveryAction {
    match classify_error(error) {
        ErrorType::Connection if context.attempt == 0 => match context.role {
            AgentRole::Getter => RecoveryAction::RecreateAgent,
            AgentRole::Setter => RecoveryAction::RecreateAndReplay,
        },

        ErrorType::Timeout if context.attempt == 0 && context.role == AgentRole::Setter => {
            RecoveryAction::RecreateAndReplay
        }

        _ => RecoveryAction::Surface,
    }
}
