//! Shared error taxonomy (kinds, not type names) described in spec §7.
//!
//! Every failure the engine can produce is classified into one of these kinds so
//! that the Orchestrator can decide retry/terminal behavior without inspecting
//! protocol-specific error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("no working proxy available")]
    ProxyUnavailable,

    #[error("network error: {0}")]
    Network(String),

    #[error("authentication failed: {reason} (permanent={permanent})")]
    Auth { permanent: bool, reason: String },

    #[error("policy rejection: {0}")]
    Policy(String),

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("cancelled")]
    Cancellation,

    #[error("internal invariant violated: {0}")]
    Internal(String),
}

impl EngineError {
    /// Whether an attempt that failed with this error kind should be retried by
    /// the Orchestrator's failover loop (spec §4.7 "Failure semantics").
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::Network(_)
                | EngineError::Auth {
                    permanent: false,
                    ..
                }
                | EngineError::ProxyUnavailable
        )
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
