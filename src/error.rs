//! Error taxonomy for the ingestion pipeline.
//!
//! Errors are scoped: [`ProviderError`] describes a single embedding call,
//! [`StoreError`] a single vector-store operation, and [`IngestError`] wraps
//! both together with file-scoped and run-scoped failures. The orchestrator
//! decides escalation from the variant:
//!
//! | Variant | Scope | Effect |
//! |---------|-------|--------|
//! | [`IngestError::Parse`] | file | file marked failed, run continues |
//! | [`IngestError::Provider`] | item | item excluded from its batch |
//! | [`IngestError::Store`] | file | file marked failed, points not persisted |
//! | [`IngestError::DimensionMismatch`] | run | run aborted |
//! | [`IngestError::Config`] | run | run aborted before any work |
//!
//! Items that match no known schema are not errors; they carry a
//! [`SkipReason`](crate::normalize::SkipReason) instead.

use thiserror::Error;

/// Failure of a single embedding call.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProviderError {
    /// Network failure or timeout. Transient and retryable.
    #[error("embedding provider unavailable: {0}")]
    Unavailable(String),

    /// The API answered with a non-retryable status.
    #[error("embedding provider rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },

    /// The API answered but the vector payload was missing or malformed.
    #[error("embedding provider returned a malformed response: {0}")]
    MalformedResponse(String),

    /// The in-process model failed to load or run.
    #[error("local embedding model failed: {0}")]
    Model(String),
}

impl ProviderError {
    /// Only transient failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::Unavailable(_))
    }
}

/// Failure of a vector-store operation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Connection failure, timeout, or server-side error.
    #[error("vector store unavailable: {0}")]
    Unavailable(String),

    /// The store refused the request (bad schema, bad point, ...).
    #[error("vector store rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },

    /// The target collection has not been initialized.
    #[error("collection '{0}' does not exist; run `ipvec init` first")]
    CollectionMissing(String),

    /// Local store contents could not be decoded.
    #[error("vector store data is corrupt: {0}")]
    Corrupt(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

/// Pipeline-level error.
#[derive(Debug, Error)]
pub enum IngestError {
    /// A source file could not be read as a JSON array.
    #[error("failed to parse {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// A vector's length disagrees with the collection schema.
    #[error("dimension mismatch for collection '{collection}': expected {expected}, got {actual}")]
    DimensionMismatch {
        collection: String,
        expected: usize,
        actual: usize,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    /// Invalid or incomplete configuration.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl IngestError {
    /// Errors that must stop the whole run rather than a single file.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            IngestError::DimensionMismatch { .. } | IngestError::Config(_)
        )
    }
}
