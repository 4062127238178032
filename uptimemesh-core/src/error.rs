use thiserror::Error;

/// The error taxonomy shared by every uptimemesh crate.
///
/// Variants map directly onto the HTTP status codes the admin and agent
/// APIs surface: `Validation` -> 400, `Auth` -> 401, `NotFound` -> 404,
/// `Conflict` -> 409. `Io`/`Database`/`Serde` wrap transport and storage
/// failures; callers retry those once locally before propagating.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("unauthorized: {0}")]
    Auth(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transient io error: {0}")]
    TransientIo(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Peer disconnected; not retried by the component that observed it.
    #[error("session closed")]
    SessionClosed,

    #[error("probe error: {0}")]
    Probe(String),
}

pub type Result<T> = std::result::Result<T, MonitorError>;

impl MonitorError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn validation(what: impl Into<String>) -> Self {
        Self::Validation(what.into())
    }

    pub fn conflict(what: impl Into<String>) -> Self {
        Self::Conflict(what.into())
    }

    pub fn auth(what: impl Into<String>) -> Self {
        Self::Auth(what.into())
    }

    /// Whether this error should be retried once by the caller before it is
    /// surfaced — transient I/O gets a single local retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientIo(_) | Self::Io(_))
    }
}
