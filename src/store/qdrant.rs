//! Qdrant REST backend.
//!
//! | Operation | Request |
//! |-----------|---------|
//! | collection info | `GET /collections/{name}` |
//! | recreate | `DELETE` then `PUT /collections/{name}` |
//! | upsert | `PUT /collections/{name}/points?wait=true` |
//! | search | `POST /collections/{name}/points/search` |
//! | count | `POST /collections/{name}/points/count` |
//!
//! Upserts wait for the server to apply the batch, so a successful return
//! means the points are persisted.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use super::VectorStore;
use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::models::{CollectionSpec, Distance, ScoredPoint, UpsertPoint, UpsertResult};

pub struct QdrantStore {
    client: reqwest::Client,
    base_url: String,
}

impl QdrantStore {
    /// Build a client for `store.url`, sending `api-key` when
    /// `store.api_key_env` names a set variable.
    pub fn new(config: &StoreConfig) -> Result<Self> {
        anyhow::ensure!(
            config.url.starts_with("http://") || config.url.starts_with("https://"),
            "store.url must be an http(s) URL: {}",
            config.url
        );

        let mut headers = HeaderMap::new();
        if let Some(var) = &config.api_key_env {
            if let Ok(key) = std::env::var(var) {
                headers.insert(
                    "api-key",
                    HeaderValue::from_str(key.trim()).context("invalid Qdrant API key")?,
                );
            }
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()
            .context("failed to build Qdrant HTTP client")?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// Map a non-success response to a [`StoreError`]. 404 on a collection
/// path means the collection is missing.
async fn check(response: Response, collection: &str) -> Result<Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    if status == StatusCode::NOT_FOUND {
        Err(StoreError::CollectionMissing(collection.to_string()))
    } else if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        Err(StoreError::Unavailable(format!("HTTP {}: {}", status, body)))
    } else {
        Err(StoreError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

#[derive(Deserialize)]
struct Envelope<R> {
    result: R,
}

async fn read_result<T: DeserializeOwned>(response: Response) -> Result<T, StoreError> {
    let envelope: Envelope<T> = response
        .json()
        .await
        .map_err(|e| StoreError::Corrupt(format!("unexpected Qdrant response: {}", e)))?;
    Ok(envelope.result)
}

fn distance_name(distance: Distance) -> &'static str {
    match distance {
        Distance::Cosine => "Cosine",
        Distance::Dot => "Dot",
        Distance::Euclid => "Euclid",
    }
}

/// Extract size and metric from a `GET /collections/{name}` result.
/// Only single unnamed-vector collections are supported.
fn parse_collection_info(name: &str, result: &Value) -> Result<CollectionSpec, StoreError> {
    let vectors = result
        .pointer("/config/params/vectors")
        .ok_or_else(|| StoreError::Corrupt(format!("collection '{}' has no vector config", name)))?;
    let dims = vectors
        .get("size")
        .and_then(Value::as_u64)
        .ok_or_else(|| {
            StoreError::Corrupt(format!(
                "collection '{}' does not use a single unnamed vector",
                name
            ))
        })?;
    let distance = vectors
        .get("distance")
        .and_then(Value::as_str)
        .and_then(Distance::parse)
        .ok_or_else(|| StoreError::Corrupt(format!("collection '{}' has unknown distance", name)))?;

    Ok(CollectionSpec {
        name: name.to_string(),
        dims: dims as usize,
        distance,
    })
}

#[derive(Deserialize)]
struct Hit {
    id: Value,
    score: f32,
    #[serde(default)]
    payload: Option<Value>,
}

impl From<Hit> for ScoredPoint {
    fn from(hit: Hit) -> Self {
        let id = match hit.id {
            Value::String(s) => s,
            other => other.to_string(),
        };
        ScoredPoint {
            id,
            score: hit.score,
            payload: hit.payload.unwrap_or(Value::Null),
        }
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    fn backend(&self) -> &'static str {
        "qdrant"
    }

    async fn recreate_collection(&self, spec: &CollectionSpec) -> Result<(), StoreError> {
        let path = format!("/collections/{}", spec.name);

        let response = self.client.delete(self.url(&path)).send().await?;
        if response.status() != StatusCode::NOT_FOUND {
            check(response, &spec.name).await?;
        }

        let body = json!({
            "vectors": {
                "size": spec.dims,
                "distance": distance_name(spec.distance),
            }
        });
        let response = self.client.put(self.url(&path)).json(&body).send().await?;
        check(response, &spec.name).await?;
        Ok(())
    }

    async fn collection_info(&self, name: &str) -> Result<Option<CollectionSpec>, StoreError> {
        let response = self
            .client
            .get(self.url(&format!("/collections/{}", name)))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let result: Value = read_result(check(response, name).await?).await?;
        parse_collection_info(name, &result).map(Some)
    }

    async fn upsert(
        &self,
        collection: &str,
        points: &[UpsertPoint],
    ) -> Result<UpsertResult, StoreError> {
        if points.is_empty() {
            return Ok(UpsertResult { points: 0 });
        }
        let body = json!({
            "points": points
                .iter()
                .map(|p| json!({"id": p.id, "vector": p.vector, "payload": p.payload}))
                .collect::<Vec<_>>(),
        });
        let response = self
            .client
            .put(self.url(&format!("/collections/{}/points?wait=true", collection)))
            .json(&body)
            .send()
            .await?;
        check(response, collection).await?;
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
        let body = json!({
            "vector": vector,
            "limit": top_k,
            "with_payload": true,
        });
        let response = self
            .client
            .post(self.url(&format!("/collections/{}/points/search", collection)))
            .json(&body)
            .send()
            .await?;
        let hits: Vec<Hit> = read_result(check(response, collection).await?).await?;
        Ok(hits.into_iter().map(ScoredPoint::from).collect())
    }

    async fn count(&self, collection: &str) -> Result<u64, StoreError> {
        #[derive(Deserialize)]
        struct Count {
            count: u64,
        }
        let response = self
            .client
            .post(self.url(&format!("/collections/{}/points/count", collection)))
            .json(&json!({"exact": true}))
            .send()
            .await?;
        let result: Count = read_result(check(response, collection).await?).await?;
        Ok(result.count)
    }
}
