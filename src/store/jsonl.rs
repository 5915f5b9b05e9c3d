//! Append-only JSON Lines export.
//!
//! Each collection is `{export_dir}/{collection}.jsonl`, one point per line:
//!
//! ```json
//! {"id": "…", "vector": [0.1, …], "metadata": {"title": …, "text": …}}
//! ```
//!
//! The schema sits next to it in `{collection}.schema.json`. Re-ingesting
//! appends new lines; readers take the last line for an id, so the file
//! behaves like an upsert log. A batch is written with a single
//! `write_all` under the store lock, so concurrent files never interleave.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::{rank, score, VectorStore};
use crate::error::StoreError;
use crate::models::{CollectionSpec, ScoredPoint, UpsertPoint, UpsertResult};

#[derive(Serialize, Deserialize)]
struct Line {
    id: String,
    vector: Vec<f32>,
    metadata: serde_json::Value,
}

pub struct JsonlStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlStore {
    pub fn new(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create export dir: {}", dir.display()))?;
        Ok(Self {
            dir: dir.to_path_buf(),
            write_lock: Mutex::new(()),
        })
    }

    fn data_path(&self, collection: &str) -> PathBuf {
        self.dir.join(format!("{}.jsonl", collection))
    }

    fn schema_path(&self, collection: &str) -> PathBuf {
        self.dir.join(format!("{}.schema.json", collection))
    }

    async fn require(&self, name: &str) -> Result<CollectionSpec, StoreError> {
        self.collection_info(name)
            .await?
            .ok_or_else(|| StoreError::CollectionMissing(name.to_string()))
    }

    /// Latest line per id, in first-seen order.
    async fn load(&self, collection: &str) -> Result<Vec<Line>, StoreError> {
        let content = match tokio::fs::read_to_string(self.data_path(collection)).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut lines: Vec<Line> = Vec::new();
        let mut by_id: HashMap<String, usize> = HashMap::new();
        for (n, raw) in content.lines().enumerate() {
            if raw.trim().is_empty() {
                continue;
            }
            let line: Line = serde_json::from_str(raw).map_err(|e| {
                StoreError::Corrupt(format!("{}.jsonl line {}: {}", collection, n + 1, e))
            })?;
            match by_id.get(&line.id) {
                Some(&i) => lines[i] = line,
                None => {
                    by_id.insert(line.id.clone(), lines.len());
                    lines.push(line);
                }
            }
        }
        Ok(lines)
    }
}

#[async_trait]
impl VectorStore for JsonlStore {
    fn backend(&self) -> &'static str {
        "jsonl"
    }

    async fn recreate_collection(&self, spec: &CollectionSpec) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let schema = serde_json::to_vec_pretty(spec)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        tokio::fs::write(self.data_path(&spec.name), b"").await?;
        tokio::fs::write(self.schema_path(&spec.name), schema).await?;
        Ok(())
    }

    async fn collection_info(&self, name: &str) -> Result<Option<CollectionSpec>, StoreError> {
        let raw = match tokio::fs::read(self.schema_path(name)).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let spec = serde_json::from_slice(&raw)
            .map_err(|e| StoreError::Corrupt(format!("{}.schema.json: {}", name, e)))?;
        Ok(Some(spec))
    }

    async fn upsert(
        &self,
        collection: &str,
        points: &[UpsertPoint],
    ) -> Result<UpsertResult, StoreError> {
        let spec = self.require(collection).await?;

        let mut buf = Vec::new();
        for p in points {
            if p.vector.len() != spec.dims {
                return Err(StoreError::Rejected {
                    status: 400,
                    body: format!(
                        "point {} has dimension {}, collection expects {}",
                        p.id,
                        p.vector.len(),
                        spec.dims
                    ),
                });
            }
            let line = serde_json::json!({
                "id": p.id,
                "vector": p.vector,
                "metadata": p.payload,
            });
            serde_json::to_writer(&mut buf, &line)
                .map_err(|e| StoreError::Rejected {
                    status: 400,
                    body: e.to_string(),
                })?;
            buf.push(b'\n');
        }

        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.data_path(collection))
            .await?;
        file.write_all(&buf).await?;
        file.flush().await?;

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
        let spec = self.require(collection).await?;
        let hits = self
            .load(collection)
            .await?
            .into_iter()
            .map(|line| ScoredPoint {
                score: score(spec.distance, vector, &line.vector),
                id: line.id,
                payload: line.metadata,
            })
            .collect();
        Ok(rank(spec.distance, hits, top_k))
    }

    async fn count(&self, collection: &str) -> Result<u64, StoreError> {
        self.require(collection).await?;
        Ok(self.load(collection).await?.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::derive_id;
    use crate::models::Distance;
    use serde_json::json;
    use tempfile::TempDir;

    fn spec() -> CollectionSpec {
        CollectionSpec {
            name: "patent_collection".into(),
            dims: 2,
            distance: Distance::Cosine,
        }
    }

    fn point(i: usize, v: Vec<f32>) -> UpsertPoint {
        UpsertPoint {
            id: derive_id("kr_1.json", i),
            vector: v,
            payload: json!({"text": format!("doc {}", i)}),
        }
    }

    #[tokio::test]
    async fn writes_one_line_per_point() {
        let tmp = TempDir::new().unwrap();
        let store = JsonlStore::new(tmp.path()).unwrap();
        store.recreate_collection(&spec()).await.unwrap();
        store
            .upsert(
                "patent_collection",
                &[point(0, vec![1.0, 0.0]), point(1, vec![0.0, 1.0])],
            )
            .await
            .unwrap();

        let content =
            std::fs::read_to_string(tmp.path().join("patent_collection.jsonl")).unwrap();
        let lines: Vec<serde_json::Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["id"], derive_id("kr_1.json", 0).to_string());
        assert_eq!(lines[0]["metadata"]["text"], "doc 0");
        assert_eq!(lines[1]["vector"], json!([0.0, 1.0]));
    }

    #[tokio::test]
    async fn reingest_counts_distinct_ids() {
        let tmp = TempDir::new().unwrap();
        let store = JsonlStore::new(tmp.path()).unwrap();
        store.recreate_collection(&spec()).await.unwrap();
        store
            .upsert("patent_collection", &[point(0, vec![1.0, 0.0])])
            .await
            .unwrap();
        store
            .upsert("patent_collection", &[point(0, vec![0.0, 1.0])])
            .await
            .unwrap();
        assert_eq!(store.count("patent_collection").await.unwrap(), 1);

        let hits = store
            .search("patent_collection", &[0.0, 1.0], 1)
            .await
            .unwrap();
        assert!((hits[0].score - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn recreate_truncates() {
        let tmp = TempDir::new().unwrap();
        let store = JsonlStore::new(tmp.path()).unwrap();
        store.recreate_collection(&spec()).await.unwrap();
        store
            .upsert("patent_collection", &[point(0, vec![1.0, 0.0])])
            .await
            .unwrap();
        store.recreate_collection(&spec()).await.unwrap();
        assert_eq!(store.count("patent_collection").await.unwrap(), 0);
        assert_eq!(
            store.collection_info("patent_collection").await.unwrap(),
            Some(spec())
        );
    }

    #[tokio::test]
    async fn upsert_without_schema_fails() {
        let tmp = TempDir::new().unwrap();
        let store = JsonlStore::new(tmp.path()).unwrap();
        let err = store
            .upsert("patent_collection", &[point(0, vec![1.0, 0.0])])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::CollectionMissing(_)));
    }

    #[tokio::test]
    async fn corrupt_line_reported() {
        let tmp = TempDir::new().unwrap();
        let store = JsonlStore::new(tmp.path()).unwrap();
        store.recreate_collection(&spec()).await.unwrap();
        std::fs::write(tmp.path().join("patent_collection.jsonl"), "{not json\n").unwrap();
        assert!(matches!(
            store.count("patent_collection").await.unwrap_err(),
            StoreError::Corrupt(_)
        ));
    }
}
