//! `ipvec embed`: embed a single text with the configured provider.
//!
//! Handy for checking credentials, the model variant in use and the
//! dimension the provider really returns before starting a long ingest.

use anyhow::Result;
use serde::Serialize;

use crate::config::Config;
use crate::embedding::{self, EmbedMode};

const PREVIEW_LEN: usize = 5;

#[derive(Debug, Serialize)]
pub struct EmbedPreview {
    pub model: String,
    pub mode: EmbedMode,
    pub dims: usize,
    pub head: Vec<f32>,
}

/// Embed `text` and summarize the resulting vector.
pub async fn embed_preview(config: &Config, text: &str, mode: EmbedMode) -> Result<EmbedPreview> {
    let provider = embedding::build_provider(&config.embedding).await?;
    let vector = provider.embed(text, mode).await?;
    Ok(EmbedPreview {
        model: provider.model_name().to_string(),
        mode,
        dims: vector.len(),
        head: vector.iter().take(PREVIEW_LEN).copied().collect(),
    })
}

pub async fn run_embed(config: &Config, text: &str, mode: EmbedMode, json: bool) -> Result<()> {
    let preview = embed_preview(config, text, mode).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&preview)?);
        return Ok(());
    }

    println!("embed ({})", preview.mode);
    println!("  model: {}", preview.model);
    println!("  dims: {}", preview.dims);
    let head = preview
        .head
        .iter()
        .map(|v| format!("{:.6}", v))
        .collect::<Vec<_>>()
        .join(", ");
    println!("  head: [{}{}]", head, if preview.dims > PREVIEW_LEN { ", ..." } else { "" });
    if let Some(expected) = config.embedding.dims {
        if expected != preview.dims {
            println!("  warning: embedding.dims is {}", expected);
        }
    }
    Ok(())
}
