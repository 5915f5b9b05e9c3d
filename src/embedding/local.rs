//! In-process embeddings via fastembed.
//!
//! The model is loaded once when the provider is created and reused for
//! every batch. Inference runs on the blocking pool; the model sits behind a
//! mutex because fastembed's `embed` needs exclusive access.

use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use async_trait::async_trait;

use super::{EmbedMode, EmbeddingProvider};
use crate::config::EmbeddingConfig;
use crate::error::ProviderError;

const DEFAULT_MODEL: &str = "multilingual-e5-base";

/// Embedding provider running a sentence encoder locally.
///
/// Models are downloaded on first use from Hugging Face and cached; after
/// that no network calls are made.
pub struct LocalProvider {
    model_name: String,
    dims: usize,
    batch_size: usize,
    model: Arc<Mutex<fastembed::TextEmbedding>>,
}

impl LocalProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let (model_name, dims) = resolve_local_model(config);
        let fastembed_model = config_to_fastembed_model(&model_name)?;
        let model = fastembed::TextEmbedding::try_new(
            fastembed::InitOptions::new(fastembed_model).with_show_download_progress(true),
        )
        .map_err(|e| anyhow::anyhow!("Failed to initialize local embedding model: {}", e))?;

        Ok(Self {
            model_name,
            dims,
            batch_size: config.batch_size,
            model: Arc::new(Mutex::new(model)),
        })
    }
}

#[async_trait]
impl EmbeddingProvider for LocalProvider {
    fn model_name(&self) -> &str {
        &self.model_name
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
        let inputs = with_mode_prefix(&self.model_name, texts, mode);
        let model = Arc::clone(&self.model);
        let batch_size = self.batch_size;

        tokio::task::spawn_blocking(move || {
            let mut model = model
                .lock()
                .map_err(|_| ProviderError::Model("embedding model lock poisoned".into()))?;
            model
                .embed(inputs, Some(batch_size))
                .map_err(|e| ProviderError::Model(e.to_string()))
        })
        .await
        .map_err(|e| ProviderError::Model(e.to_string()))?
    }
}

/// e5-family models are trained with `passage: ` / `query: ` prefixes.
fn with_mode_prefix(model_name: &str, texts: &[String], mode: EmbedMode) -> Vec<String> {
    if model_name.contains("e5") {
        texts
            .iter()
            .map(|t| format!("{}: {}", mode.as_str(), t))
            .collect()
    } else {
        texts.to_vec()
    }
}

fn resolve_local_model(config: &EmbeddingConfig) -> (String, usize) {
    let model_name = config
        .model
        .clone()
        .unwrap_or_else(|| DEFAULT_MODEL.to_string());

    let dims = config.dims.unwrap_or(match model_name.as_str() {
        "all-minilm-l6-v2" => 384,
        "bge-small-en-v1.5" => 384,
        "bge-base-en-v1.5" => 768,
        "bge-large-en-v1.5" => 1024,
        "multilingual-e5-small" => 384,
        "multilingual-e5-base" => 768,
        "multilingual-e5-large" => 1024,
        _ => 384,
    });

    (model_name, dims)
}

fn config_to_fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
    match name {
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "bge-large-en-v1.5" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
        "multilingual-e5-small" => Ok(fastembed::EmbeddingModel::MultilingualE5Small),
        "multilingual-e5-base" => Ok(fastembed::EmbeddingModel::MultilingualE5Base),
        "multilingual-e5-large" => Ok(fastembed::EmbeddingModel::MultilingualE5Large),
        other => bail!(
            "Unknown local embedding model: '{}'. Supported models: \
             all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
             multilingual-e5-small, multilingual-e5-base, multilingual-e5-large",
            other
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn e5_models_get_mode_prefix() {
        let texts = vec!["판결".to_string()];
        assert_eq!(
            with_mode_prefix("multilingual-e5-base", &texts, EmbedMode::Passage),
            vec!["passage: 판결".to_string()]
        );
        assert_eq!(
            with_mode_prefix("multilingual-e5-base", &texts, EmbedMode::Query),
            vec!["query: 판결".to_string()]
        );
        assert_eq!(
            with_mode_prefix("all-minilm-l6-v2", &texts, EmbedMode::Query),
            texts
        );
    }

    #[test]
    fn default_dims_follow_model() {
        let config = EmbeddingConfig {
            provider: "local".into(),
            ..EmbeddingConfig::default()
        };
        assert_eq!(resolve_local_model(&config), (DEFAULT_MODEL.to_string(), 768));

        let config = EmbeddingConfig {
            provider: "local".into(),
            model: Some("multilingual-e5-large".into()),
            ..EmbeddingConfig::default()
        };
        assert_eq!(resolve_local_model(&config).1, 1024);
    }

    #[test]
    fn unknown_model_rejected() {
        assert!(config_to_fastembed_model("word2vec").is_err());
    }
}
