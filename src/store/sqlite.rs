//! Single-file SQLite vector store.
//!
//! Collections and points live in two tables; vectors are stored as
//! little-endian `f32` BLOBs and payloads as JSON text. Search is a
//! brute-force scan over the collection.
//!
//! ```sql
//! collections(name TEXT PRIMARY KEY, dims INTEGER, distance TEXT, created_at INTEGER)
//! points(collection TEXT, id TEXT, vector BLOB, payload TEXT, updated_at INTEGER,
//!        PRIMARY KEY (collection, id))
//! ```

use std::path::Path;
use std::str::FromStr;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use super::{blob_to_vec, rank, score, vec_to_blob, VectorStore};
use crate::error::StoreError;
use crate::models::{CollectionSpec, Distance, ScoredPoint, UpsertPoint, UpsertResult};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `path` and run migrations.
    pub async fn connect(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS collections (
                name TEXT PRIMARY KEY,
                dims INTEGER NOT NULL,
                distance TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS points (
                collection TEXT NOT NULL,
                id TEXT NOT NULL,
                vector BLOB NOT NULL,
                payload TEXT NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (collection, id),
                FOREIGN KEY (collection) REFERENCES collections(name)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn require(&self, name: &str) -> Result<CollectionSpec, StoreError> {
        self.collection_info(name)
            .await?
            .ok_or_else(|| StoreError::CollectionMissing(name.to_string()))
    }
}

#[async_trait]
impl VectorStore for SqliteStore {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    async fn recreate_collection(&self, spec: &CollectionSpec) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM points WHERE collection = ?")
            .bind(&spec.name)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM collections WHERE name = ?")
            .bind(&spec.name)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "INSERT INTO collections (name, dims, distance, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&spec.name)
        .bind(spec.dims as i64)
        .bind(spec.distance.as_str())
        .bind(chrono::Utc::now().timestamp())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn collection_info(&self, name: &str) -> Result<Option<CollectionSpec>, StoreError> {
        let row = sqlx::query("SELECT dims, distance FROM collections WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let dims: i64 = row.get("dims");
        let distance: String = row.get("distance");
        let distance = Distance::parse(&distance)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown distance '{}'", distance)))?;

        Ok(Some(CollectionSpec {
            name: name.to_string(),
            dims: dims as usize,
            distance,
        }))
    }

    async fn upsert(
        &self,
        collection: &str,
        points: &[UpsertPoint],
    ) -> Result<UpsertResult, StoreError> {
        let spec = self.require(collection).await?;
        if let Some(bad) = points.iter().find(|p| p.vector.len() != spec.dims) {
            return Err(StoreError::Rejected {
                status: 400,
                body: format!(
                    "point {} has dimension {}, collection expects {}",
                    bad.id,
                    bad.vector.len(),
                    spec.dims
                ),
            });
        }

        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;
        for p in points {
            let payload = serde_json::to_string(&p.payload)
                .map_err(|e| StoreError::Rejected {
                    status: 400,
                    body: e.to_string(),
                })?;
            sqlx::query(
                r#"
                INSERT INTO points (collection, id, vector, payload, updated_at)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(collection, id) DO UPDATE SET
                    vector = excluded.vector,
                    payload = excluded.payload,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(collection)
            .bind(p.id.to_string())
            .bind(vec_to_blob(&p.vector))
            .bind(payload)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

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
        let rows = sqlx::query("SELECT id, vector, payload FROM points WHERE collection = ?")
            .bind(collection)
            .fetch_all(&self.pool)
            .await?;

        let mut hits = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.get("id");
            let blob: Vec<u8> = row.get("vector");
            let payload: String = row.get("payload");
            let payload = serde_json::from_str(&payload)
                .map_err(|e| StoreError::Corrupt(format!("payload of {}: {}", id, e)))?;
            hits.push(ScoredPoint {
                score: score(spec.distance, vector, &blob_to_vec(&blob)),
                id,
                payload,
            });
        }
        Ok(rank(spec.distance, hits, top_k))
    }

    async fn count(&self, collection: &str) -> Result<u64, StoreError> {
        self.require(collection).await?;
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM points WHERE collection = ?")
            .bind(collection)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }
}
