//! Vector store abstraction.
//!
//! The [`VectorStore`] trait is the protocol the pipeline consumes: collection
//! lifecycle, batched upsert, and the similarity search used by retrieval
//! collaborators. Backends:
//!
//! | Backend | Module | Notes |
//! |---------|--------|-------|
//! | `qdrant` | [`qdrant`] | REST API of a Qdrant server |
//! | `sqlite` | [`sqlite`] | single-file store, brute-force search |
//! | `jsonl` | [`jsonl`] | append-only export, one point per line |
//! | memory | [`memory`] | in-process, for tests and embedding in other tools |
//!
//! Implementations must be `Send + Sync`; an [`upsert`](VectorStore::upsert)
//! either persists the whole batch or returns an error.

pub mod jsonl;
pub mod memory;
pub mod qdrant;
pub mod sqlite;

use std::cmp::Ordering;
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::models::{CollectionSpec, Distance, ScoredPoint, UpsertPoint, UpsertResult};

/// Result of [`VectorStore::ensure_collection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnsureOutcome {
    Created,
    /// Already present with the requested schema; untouched.
    Unchanged,
    /// Present with a different schema; dropped and recreated.
    Replaced,
}

/// Abstract vector-store backend.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`ensure_collection`](VectorStore::ensure_collection) | create, keep, or replace on schema change |
/// | [`recreate_collection`](VectorStore::recreate_collection) | drop all points and recreate |
/// | [`collection_info`](VectorStore::collection_info) | schema of an existing collection |
/// | [`upsert`](VectorStore::upsert) | insert-or-overwrite a batch by id |
/// | [`search`](VectorStore::search) | top-k similarity search |
/// | [`count`](VectorStore::count) | number of points in a collection |
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Backend name for logs and `stats`.
    fn backend(&self) -> &'static str;

    async fn ensure_collection(&self, spec: &CollectionSpec) -> Result<EnsureOutcome, StoreError> {
        match self.collection_info(&spec.name).await? {
            None => {
                self.recreate_collection(spec).await?;
                Ok(EnsureOutcome::Created)
            }
            Some(existing) if existing == *spec => Ok(EnsureOutcome::Unchanged),
            Some(_) => {
                self.recreate_collection(spec).await?;
                Ok(EnsureOutcome::Replaced)
            }
        }
    }

    /// Destroy any existing collection of that name and create it empty.
    async fn recreate_collection(&self, spec: &CollectionSpec) -> Result<(), StoreError>;

    async fn collection_info(&self, name: &str) -> Result<Option<CollectionSpec>, StoreError>;

    async fn upsert(
        &self,
        collection: &str,
        points: &[UpsertPoint],
    ) -> Result<UpsertResult, StoreError>;

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredPoint>, StoreError>;

    async fn count(&self, collection: &str) -> Result<u64, StoreError>;
}

/// Open the backend selected by `store.backend`.
pub async fn open_store(config: &StoreConfig) -> Result<Arc<dyn VectorStore>> {
    match config.backend.as_str() {
        "qdrant" => Ok(Arc::new(qdrant::QdrantStore::new(config)?)),
        "sqlite" => Ok(Arc::new(sqlite::SqliteStore::connect(&config.path).await?)),
        "jsonl" => Ok(Arc::new(jsonl::JsonlStore::new(&config.export_dir)?)),
        other => bail!("Unknown store backend: {}", other),
    }
}

/// Similarity of two vectors under a metric. Higher is closer for cosine
/// and dot; for euclid this is the distance, where lower is closer.
pub fn score(distance: Distance, a: &[f32], b: &[f32]) -> f32 {
    match distance {
        Distance::Cosine => cosine_similarity(a, b),
        Distance::Dot => a.iter().zip(b.iter()).map(|(x, y)| x * y).sum(),
        Distance::Euclid => a
            .iter()
            .zip(b.iter())
            .map(|(x, y)| (x - y) * (x - y))
            .sum::<f32>()
            .sqrt(),
    }
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns `0.0` for empty vectors or vectors of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

/// Order hits best-first for the metric and keep `top_k`.
pub(crate) fn rank(distance: Distance, mut hits: Vec<ScoredPoint>, top_k: usize) -> Vec<ScoredPoint> {
    hits.sort_by(|a, b| {
        let ord = a.score.partial_cmp(&b.score).unwrap_or(Ordering::Equal);
        match distance {
            Distance::Euclid => ord,
            Distance::Cosine | Distance::Dot => ord.reverse(),
        }
    });
    hits.truncate(top_k);
    hits
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        assert_eq!(blob_to_vec(&vec_to_blob(&vec)), vec);
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_different_lengths() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
    }

    #[test]
    fn euclid_ranks_ascending() {
        let hit = |id: &str, score: f32| ScoredPoint {
            id: id.into(),
            score,
            payload: json!({}),
        };
        let ranked = rank(Distance::Euclid, vec![hit("far", 3.0), hit("near", 0.5)], 1);
        assert_eq!(ranked[0].id, "near");
        let ranked = rank(Distance::Dot, vec![hit("low", 0.1), hit("high", 0.9)], 2);
        assert_eq!(ranked[0].id, "high");
    }

    #[test]
    fn dot_and_euclid_scores() {
        assert_eq!(score(Distance::Dot, &[1.0, 2.0], &[3.0, 4.0]), 11.0);
        assert_eq!(score(Distance::Euclid, &[0.0, 0.0], &[3.0, 4.0]), 5.0);
    }
}
