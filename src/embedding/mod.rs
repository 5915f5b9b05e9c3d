//! Embedding provider abstraction and implementations.
//!
//! Defines the [`EmbeddingProvider`] trait and its two implementations:
//! - **[`RemoteProvider`]**: calls an OpenAI-compatible embeddings API with
//!   bearer auth, per-mode model variants, timeout, retry, and backoff.
//! - **`LocalProvider`**: runs a sentence encoder in process via fastembed
//!   (feature `local-embeddings`); no network calls after model download.
//!
//! Providers are built once at startup with [`build_provider`] and shared
//! by the pipeline behind an `Arc`.
//!
//! # Passage vs. query mode
//!
//! Stored content is embedded in [`EmbedMode::Passage`]; search input in
//! [`EmbedMode::Query`]. Both must come from the same model family for
//! scores to be comparable, so the mode only selects a variant or prefix,
//! never a different model.
//!
//! # Retry Strategy
//!
//! The remote provider retries transient failures with exponential backoff:
//! - network errors and timeouts → retry
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - any other non-success status → fail immediately
//! - Backoff: base, 2×base, 4×base, … (capped at 2^5 × base)

#[cfg(feature = "local-embeddings")]
mod local;
mod remote;

#[cfg(feature = "local-embeddings")]
pub use local::LocalProvider;
pub use remote::RemoteProvider;

use std::fmt;
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::EmbeddingConfig;
use crate::error::{IngestError, ProviderError};
use crate::models::CollectionSpec;

/// Which side of a similarity search a text is embedded for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbedMode {
    Passage,
    Query,
}

impl EmbedMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmbedMode::Passage => "passage",
            EmbedMode::Query => "query",
        }
    }
}

impl fmt::Display for EmbedMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capability shared by all embedding backends.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"solar-embedding-1-large"`).
    fn model_name(&self) -> &str;

    /// Returns the vector dimensionality the provider is configured for.
    fn dims(&self) -> usize;

    /// Embed a batch of texts, returning one vector per text in input order.
    async fn embed_batch(
        &self,
        texts: &[String],
        mode: EmbedMode,
    ) -> Result<Vec<Vec<f32>>, ProviderError>;

    /// Embed a single text.
    async fn embed(&self, text: &str, mode: EmbedMode) -> Result<Vec<f32>, ProviderError> {
        self.embed_batch(&[text.to_string()], mode)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::MalformedResponse("empty embedding response".into()))
    }
}

/// Create the provider selected by `embedding.provider`.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"remote"` | [`RemoteProvider`] |
/// | `"local"` | `LocalProvider` (requires feature `local-embeddings`) |
///
/// # Errors
///
/// Missing model/dims, a missing API key for the remote provider, or a
/// local model that fails to load.
pub fn create_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "remote" => Ok(Arc::new(RemoteProvider::new(config)?)),
        #[cfg(feature = "local-embeddings")]
        "local" => Ok(Arc::new(LocalProvider::new(config)?)),
        #[cfg(not(feature = "local-embeddings"))]
        "local" => bail!("Local embedding provider requires --features local-embeddings"),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

/// Like [`create_provider`], but runs construction on the blocking pool
/// since loading a local model reads (and may download) model files.
pub async fn build_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    let config = config.clone();
    tokio::task::spawn_blocking(move || create_provider(&config)).await?
}

/// Confirm the provider produces vectors of every target collection's
/// dimension. Runs before any file is touched.
///
/// With `probe`, one passage is actually embedded so a provider whose real
/// output disagrees with its configuration is caught here rather than at
/// the first upsert.
pub async fn verify_dimensions(
    provider: &dyn EmbeddingProvider,
    specs: &[CollectionSpec],
    probe: bool,
) -> Result<(), IngestError> {
    for spec in specs {
        if provider.dims() != spec.dims {
            return Err(IngestError::DimensionMismatch {
                collection: spec.name.clone(),
                expected: spec.dims,
                actual: provider.dims(),
            });
        }
    }

    if probe && !specs.is_empty() {
        let vector = provider.embed("dimension probe", EmbedMode::Passage).await?;
        if let Some(spec) = specs.iter().find(|s| s.dims != vector.len()) {
            return Err(IngestError::DimensionMismatch {
                collection: spec.name.clone(),
                expected: spec.dims,
                actual: vector.len(),
            });
        }
    }

    Ok(())
}
