//! Error types shared by the engine and its collaborators.

use thiserror::Error;

// ── Delivery ───────────────────────────────────────────

/// Failure reported by a [`crate::host::ReplyDispatcher`] when posting an utterance.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The platform refused the message (muted, kicked, rate limited by the host).
    #[error("reply rejected by platform: {0}")]
    Rejected(String),
    /// The platform connection is down.
    #[error("platform unavailable: {0}")]
    Unavailable(String),
    /// Dispatch did not complete within the configured timeout.
    #[error("dispatch timed out after {0}s")]
    Timeout(u64),
}

// ── Engine ─────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum EngineError {
    /// Invalid or incomplete configuration. Fatal for the affected scope.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// An external call exceeded its timeout. Callers treat the cycle as a non-reply.
    #[error("{operation} timed out after {timeout_secs}s")]
    CollaboratorTimeout {
        operation: &'static str,
        timeout_secs: u64,
    },

    /// A positive decision could not be delivered. No state was committed.
    #[error("delivery failed: {0}")]
    Delivery(#[from] DeliveryError),

    /// A contract between components was broken (e.g. a second concurrent session).
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// The inference collaborator returned an error.
    #[error("inference failed: {0}")]
    Inference(String),
}

pub type EngineResult<T> = Result<T, EngineError>;
