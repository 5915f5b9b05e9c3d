//! Remote embeddings over HTTP.
//!
//! Speaks the OpenAI-compatible protocol used by Upstage and others:
//! `POST {url}` with `Authorization: Bearer <key>` and body
//! `{"model": ..., "input": [...]}`; the response carries
//! `data[].embedding` (optionally with `data[].index`).

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;

use super::{EmbedMode, EmbeddingProvider};
use crate::config::EmbeddingConfig;
use crate::error::ProviderError;

/// Embedding provider backed by a remote API.
///
/// The HTTP client is built once and reused; every request is bounded by
/// the configured timeout, and a timeout is reported as
/// [`ProviderError::Unavailable`].
pub struct RemoteProvider {
    client: reqwest::Client,
    url: String,
    api_key: String,
    /// Base model name; see [`RemoteProvider::model_for`].
    model: String,
    dims: usize,
    mode_suffix: bool,
    max_retries: u32,
    retry_base: Duration,
}

impl RemoteProvider {
    /// Create a remote provider from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if `model` or `dims` is not set, or if the API key
    /// variable named by `embedding.api_key_env` is unset.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for remote provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for remote provider"))?;
        let Some(api_key) = config.api_key() else {
            bail!("{} environment variable not set", config.api_key_env);
        };
        if !(config.url.starts_with("http://") || config.url.starts_with("https://")) {
            bail!("embedding.url must be an http(s) URL: {}", config.url);
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("failed to build embedding HTTP client")?;

        Ok(Self {
            client,
            url: config.url.clone(),
            api_key,
            model,
            dims,
            mode_suffix: config.mode_suffix,
            max_retries: config.max_retries,
            retry_base: Duration::from_millis(config.retry_base_ms),
        })
    }

    /// Model variant for a mode: `<model>-passage` / `<model>-query` when
    /// suffixing is on, otherwise the bare model name.
    pub fn model_for(&self, mode: EmbedMode) -> String {
        if self.mode_suffix {
            format!("{}-{}", self.model, mode.as_str())
        } else {
            self.model.clone()
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.retry_base * (1u32 << (attempt - 1).min(5))
    }

    async fn send_once(&self, body: &Value, expected: usize) -> Result<Vec<Vec<f32>>, ProviderError> {
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| ProviderError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            let json: Value = response.json().await.map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Unavailable(e.to_string())
                } else {
                    ProviderError::MalformedResponse(e.to_string())
                }
            })?;
            return parse_embeddings(&json, expected);
        }

        let body_text = response.text().await.unwrap_or_default();
        if is_transient(status) {
            Err(ProviderError::Unavailable(format!(
                "HTTP {}: {}",
                status, body_text
            )))
        } else {
            Err(ProviderError::Rejected {
                status: status.as_u16(),
                body: body_text,
            })
        }
    }
}

fn is_transient(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

#[async_trait]
impl EmbeddingProvider for RemoteProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(
        &self,
        texts: &[String],
        mode: EmbedMode,
    ) -> Result<Vec<Vec<f32>>, ProviderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let body = serde_json::json!({
            "model": self.model_for(mode),
            "input": texts,
        });

        let mut attempt = 0u32;
        loop {
            match self.send_once(&body, texts.len()).await {
                Ok(vectors) => return Ok(vectors),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    let delay = self.backoff(attempt);
                    tracing::debug!(attempt, ?delay, error = %e, "retrying embedding request");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Extract `data[].embedding` in input order.
fn parse_embeddings(json: &Value, expected: usize) -> Result<Vec<Vec<f32>>, ProviderError> {
    let data = json
        .get("data")
        .and_then(Value::as_array)
        .ok_or_else(|| ProviderError::MalformedResponse("missing data array".into()))?;

    if data.len() != expected {
        return Err(ProviderError::MalformedResponse(format!(
            "{} embeddings returned for {} inputs",
            data.len(),
            expected
        )));
    }

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(Value::as_array)
            .ok_or_else(|| ProviderError::MalformedResponse("missing embedding".into()))?;

        let vector = embedding
            .iter()
            .map(|v| v.as_f64().map(|f| f as f32))
            .collect::<Option<Vec<f32>>>()
            .ok_or_else(|| ProviderError::MalformedResponse("non-numeric embedding value".into()))?;

        let index = item
            .get("index")
            .and_then(Value::as_u64)
            .map(|i| i as usize)
            .unwrap_or(position);
        indexed.push((index, vector));
    }

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}
