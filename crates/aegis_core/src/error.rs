use serde::{Deserialize, Serialize};

/// The closed set of recoverable/propagating error kinds for the decision engine.
///
/// `SafetyVeto` is deliberately not a variant here: a safety veto is a normal
/// `Decision::Escalate` outcome, never a thrown error.
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail")]
pub enum AegisError {
    /// Malformed images, empty image list, non-finite context entries, VLM schema violation.
    /// Always propagates to the caller.
    #[error("input invalid: {0}")]
    InputInvalid(String),

    /// Timeout or error from a single detector. Recovered locally as empty evidence.
    #[error("detector unavailable: {detector}: {reason}")]
    DetectorUnavailable { detector: String, reason: String },

    /// Repository read or write failure. Reads degrade conservatively; repeated
    /// write failures (after backoff) propagate.
    #[error("store unavailable: {operation}: {reason}")]
    StoreUnavailable { operation: String, reason: String },

    /// A_r or A_s failed to invert even after jitter regularization.
    #[error("critic numerical failure in stratum {stratum}: {reason}")]
    CriticNumerical { stratum: String, reason: String },

    /// A single memory level failed to update; isolated, never blocks other levels.
    #[error("memory update failed for agent {agent} level {level}: {reason}")]
    MemoryUpdateFailure {
        agent: String,
        level: usize,
        reason: String,
    },
}

pub type AegisResult<T> = Result<T, AegisError>;
