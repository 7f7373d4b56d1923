use thiserror::Error;

/// The error taxonomy shared by every keyward crate.
///
/// Variants are grouped by role, not by originating subsystem — a panel
/// timeout and a provider timeout are both `Transient`, because callers
/// (the scheduler jobs) react to the *role*, not the source.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Validation — rejected before any state change ────────────────────────
    #[error("validation: {0}")]
    Validation(String),

    // ── Not found — referenced entity absent ─────────────────────────────────
    #[error("not found: {0}")]
    NotFound(String),

    // ── Transient — I/O fault, safe to retry on the next tick ────────────────
    #[error("transient failure: {0}")]
    Transient(String),

    // ── Permanent — operation can never succeed as specified ─────────────────
    #[error("permanent failure: {0}")]
    Permanent(String),

    // ── Delivery — messaging sink rejected the send ──────────────────────────
    #[error("delivery failure: {0}")]
    Delivery(String),

    // ── Storage / serialization plumbing ─────────────────────────────────────
    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl CoreError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn permanent(msg: impl Into<String>) -> Self {
        Self::Permanent(msg.into())
    }

    pub fn delivery(msg: impl Into<String>) -> Self {
        Self::Delivery(msg.into())
    }

    /// True if the next scheduler tick is expected to retry this operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::Transient(_))
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
