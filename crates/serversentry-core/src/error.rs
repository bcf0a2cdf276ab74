//! Error types and result handling for ServerSentry

use thiserror::Error;

/// Result type alias for ServerSentry operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy for ServerSentry components.
///
/// Each component converts lower-level faults into one of these variants
/// before publishing an event or returning; no component propagates a raw
/// language-level fault across its boundary.
#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("sampler error ({kind}): {message}")]
    Sampler { kind: FaultKind, message: String },

    #[error("store error: {0}")]
    Store(String),

    #[error("evaluation error: {0}")]
    Evaluation(String),

    #[error("delivery error ({kind}): {message}")]
    Delivery { kind: FaultKind, message: String },

    #[error("internal error: {0}")]
    Internal(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Whether a fault is expected to clear itself given time (`Transient`) or
/// requires operator intervention (`Permanent`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    Transient,
    Permanent,
}

impl std::fmt::Display for FaultKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FaultKind::Transient => write!(f, "transient"),
            FaultKind::Permanent => write!(f, "permanent"),
        }
    }
}

impl Error {
    pub fn sampler_transient(message: impl Into<String>) -> Self {
        Error::Sampler { kind: FaultKind::Transient, message: message.into() }
    }

    pub fn sampler_permanent(message: impl Into<String>) -> Self {
        Error::Sampler { kind: FaultKind::Permanent, message: message.into() }
    }

    pub fn delivery_transient(message: impl Into<String>) -> Self {
        Error::Delivery { kind: FaultKind::Transient, message: message.into() }
    }

    pub fn delivery_permanent(message: impl Into<String>) -> Self {
        Error::Delivery { kind: FaultKind::Permanent, message: message.into() }
    }

    /// Whether a retry of the operation that produced this error is worth
    /// attempting.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Sampler { kind: FaultKind::Transient, .. }
                | Error::Delivery { kind: FaultKind::Transient, .. }
                | Error::Store(_)
        )
    }

    /// Short category label used in log fields.
    pub fn category(&self) -> &'static str {
        match self {
            Error::Config(_) => "config",
            Error::Sampler { .. } => "sampler",
            Error::Store(_) => "store",
            Error::Evaluation(_) => "evaluation",
            Error::Delivery { .. } => "delivery",
            Error::Internal(_) => "internal",
            Error::Serialization(_) => "serialization",
            Error::Io(_) => "io",
        }
    }
}
