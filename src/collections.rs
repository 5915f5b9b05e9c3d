//! Per-category collection lifecycle and serialized upserts.
//!
//! The [`CollectionManager`] binds each configured [`Category`] to its
//! [`CollectionSpec`] on a shared [`VectorStore`]. Setup is explicit:
//! [`initialize`](CollectionManager::initialize) is only reached from
//! `ipvec init`, while ingestion calls [`verify`](CollectionManager::verify)
//! and never creates collections.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::config::Config;
use crate::error::{IngestError, StoreError};
use crate::models::{Category, CollectionSpec, UpsertPoint, UpsertResult};
use crate::store::{EnsureOutcome, VectorStore};

struct Managed {
    spec: CollectionSpec,
    lock: Mutex<()>,
}

pub struct CollectionManager {
    store: Arc<dyn VectorStore>,
    collections: BTreeMap<Category, Managed>,
}

impl CollectionManager {
    pub fn new(
        store: Arc<dyn VectorStore>,
        specs: impl IntoIterator<Item = (Category, CollectionSpec)>,
    ) -> Self {
        let collections = specs
            .into_iter()
            .map(|(category, spec)| {
                (
                    category,
                    Managed {
                        spec,
                        lock: Mutex::new(()),
                    },
                )
            })
            .collect();
        Self { store, collections }
    }

    /// Manager for every category configured in `config`.
    pub fn from_config(store: Arc<dyn VectorStore>, config: &Config) -> Self {
        let specs = config
            .categories
            .iter()
            .filter_map(|(category, _)| config.collection_spec(category).map(|s| (category, s)))
            .collect::<Vec<_>>();
        Self::new(store, specs)
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    pub fn spec(&self, category: Category) -> Option<&CollectionSpec> {
        self.collections.get(&category).map(|m| &m.spec)
    }

    /// Managed specs in category order.
    pub fn specs(&self) -> Vec<(Category, CollectionSpec)> {
        self.collections
            .iter()
            .map(|(c, m)| (*c, m.spec.clone()))
            .collect()
    }

    /// Create every managed collection. With `recreate`, existing
    /// collections are dropped and recreated empty; otherwise matching ones
    /// are left alone and mismatched ones replaced.
    pub async fn initialize(
        &self,
        recreate: bool,
    ) -> Result<Vec<(Category, EnsureOutcome)>, StoreError> {
        let mut outcomes = Vec::with_capacity(self.collections.len());
        for (category, managed) in &self.collections {
            let _guard = managed.lock.lock().await;
            let outcome = if recreate {
                let existed = self.store.collection_info(&managed.spec.name).await?.is_some();
                self.store.recreate_collection(&managed.spec).await?;
                if existed {
                    EnsureOutcome::Replaced
                } else {
                    EnsureOutcome::Created
                }
            } else {
                self.store.ensure_collection(&managed.spec).await?
            };
            tracing::info!(
                category = %category,
                collection = %managed.spec.name,
                dims = managed.spec.dims,
                ?outcome,
                "collection ready"
            );
            outcomes.push((*category, outcome));
        }
        Ok(outcomes)
    }

    /// Check that every managed collection exists with the expected
    /// dimension. Distance differences are logged but tolerated.
    pub async fn verify(&self) -> Result<(), IngestError> {
        for managed in self.collections.values() {
            let existing = self
                .store
                .collection_info(&managed.spec.name)
                .await?
                .ok_or_else(|| StoreError::CollectionMissing(managed.spec.name.clone()))?;
            if existing.dims != managed.spec.dims {
                return Err(IngestError::DimensionMismatch {
                    collection: managed.spec.name.clone(),
                    expected: managed.spec.dims,
                    actual: existing.dims,
                });
            }
            if existing.distance != managed.spec.distance {
                tracing::warn!(
                    collection = %managed.spec.name,
                    configured = %managed.spec.distance,
                    actual = %existing.distance,
                    "collection distance differs from configuration"
                );
            }
        }
        Ok(())
    }

    /// Upsert one batch into the category's collection.
    ///
    /// Every vector must match the collection dimension; a mismatch is
    /// reported before anything is sent.
    pub async fn upsert(
        &self,
        category: Category,
        points: &[UpsertPoint],
    ) -> Result<UpsertResult, IngestError> {
        let managed = self.collections.get(&category).ok_or_else(|| {
            IngestError::Config(format!("category '{}' is not configured", category))
        })?;

        if let Some(bad) = points.iter().find(|p| p.vector.len() != managed.spec.dims) {
            return Err(IngestError::DimensionMismatch {
                collection: managed.spec.name.clone(),
                expected: managed.spec.dims,
                actual: bad.vector.len(),
            });
        }
        if points.is_empty() {
            return Ok(UpsertResult { points: 0 });
        }

        let _guard = managed.lock.lock().await;
        Ok(self.store.upsert(&managed.spec.name, points).await?)
    }
}
