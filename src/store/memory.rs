//! In-memory [`VectorStore`] for tests and embedding in other tools.
//!
//! Uses `HashMap`s behind `std::sync::RwLock`. Search is brute force.
//! Failure injection ([`InMemoryStore::fail_next_upserts`]) lets tests
//! exercise the orchestrator's upsert-failure path.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;

use super::{rank, score, VectorStore};
use crate::error::StoreError;
use crate::models::{CollectionSpec, ScoredPoint, UpsertPoint, UpsertResult};

struct StoredCollection {
    spec: CollectionSpec,
    points: HashMap<String, (Vec<f32>, serde_json::Value)>,
}

/// In-memory store.
#[derive(Default)]
pub struct InMemoryStore {
    collections: RwLock<HashMap<String, StoredCollection>>,
    failing_upserts: AtomicUsize,
    upsert_calls: AtomicUsize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` upserts fail with [`StoreError::Unavailable`].
    pub fn fail_next_upserts(&self, n: usize) {
        self.failing_upserts.store(n, Ordering::SeqCst);
    }

    /// Number of upsert batches received, failed ones included.
    pub fn upsert_calls(&self) -> usize {
        self.upsert_calls.load(Ordering::SeqCst)
    }

    /// Snapshot of a collection's points, sorted by id.
    pub fn points(&self, collection: &str) -> Vec<(String, Vec<f32>, serde_json::Value)> {
        let guard = self.collections.read().unwrap_or_else(|e| e.into_inner());
        let mut points: Vec<_> = guard
            .get(collection)
            .map(|c| {
                c.points
                    .iter()
                    .map(|(id, (v, p))| (id.clone(), v.clone(), p.clone()))
                    .collect()
            })
            .unwrap_or_default();
        points.sort_by(|a, b| a.0.cmp(&b.0));
        points
    }
}

#[async_trait]
impl VectorStore for InMemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn recreate_collection(&self, spec: &CollectionSpec) -> Result<(), StoreError> {
        let mut guard = self.collections.write().unwrap_or_else(|e| e.into_inner());
        guard.insert(
            spec.name.clone(),
            StoredCollection {
                spec: spec.clone(),
                points: HashMap::new(),
            },
        );
        Ok(())
    }

    async fn collection_info(&self, name: &str) -> Result<Option<CollectionSpec>, StoreError> {
        let guard = self.collections.read().unwrap_or_else(|e| e.into_inner());
        Ok(guard.get(name).map(|c| c.spec.clone()))
    }

    async fn upsert(
        &self,
        collection: &str,
        points: &[UpsertPoint],
    ) -> Result<UpsertResult, StoreError> {
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);
        let injected = self
            .failing_upserts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if injected.is_ok() {
            return Err(StoreError::Unavailable("injected upsert failure".into()));
        }

        let mut guard = self.collections.write().unwrap_or_else(|e| e.into_inner());
        let stored = guard
            .get_mut(collection)
            .ok_or_else(|| StoreError::CollectionMissing(collection.to_string()))?;

        // Validate the whole batch before touching anything.
        if let Some(bad) = points.iter().find(|p| p.vector.len() != stored.spec.dims) {
            return Err(StoreError::Rejected {
                status: 400,
                body: format!(
                    "point {} has dimension {}, collection expects {}",
                    bad.id,
                    bad.vector.len(),
                    stored.spec.dims
                ),
            });
        }

        for p in points {
            stored
                .points
                .insert(p.id.to_string(), (p.vector.clone(), p.payload.clone()));
        }
        Ok(UpsertResult {
            points: points.len(),
        })
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredPoint>, StoreError> {
        let guard = self.collections.read().unwrap_or_else(|e| e.into_inner());
        let stored = guard
            .get(collection)
            .ok_or_else(|| StoreError::CollectionMissing(collection.to_string()))?;
        let hits = stored
            .points
            .iter()
            .map(|(id, (v, payload))| ScoredPoint {
                id: id.clone(),
                score: score(stored.spec.distance, vector, v),
                payload: payload.clone(),
            })
            .collect();
        Ok(rank(stored.spec.distance, hits, top_k))
    }

    async fn count(&self, collection: &str) -> Result<u64, StoreError> {
        let guard = self.collections.read().unwrap_or_else(|e| e.into_inner());
        guard
            .get(collection)
            .map(|c| c.points.len() as u64)
            .ok_or_else(|| StoreError::CollectionMissing(collection.to_string()))
    }
}
