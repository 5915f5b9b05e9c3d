//! TOML configuration with environment overrides.
//!
//! ```toml
//! [source]
//! base_dir = "./dataset"
//!
//! [embedding]
//! provider = "remote"                # or "local"
//! model = "solar-embedding-1-large"  # sent as "<model>-passage" / "<model>-query"
//! dims = 4096
//!
//! [store]
//! backend = "qdrant"                 # or "sqlite", "jsonl"
//! url = "http://localhost:6333"
//!
//! [categories.legal]
//! collection = "legal_collection"
//! include_globs = ["ip_legal_data/train/labeled/**/*.json"]
//!
//! [categories.patent]
//! collection = "patent_collection"
//! include_globs = ["patent_data/train/raw/kr*.json"]
//! ```
//!
//! Environment variables applied after parsing:
//!
//! | Variable | Overrides |
//! |----------|-----------|
//! | `IPVEC_BASE_DIR` | `source.base_dir` |
//! | `IPVEC_EMBEDDING_PROVIDER` | `embedding.provider` |
//! | `IPVEC_STORE_BACKEND` | `store.backend` |
//! | `IPVEC_STORE_URL` | `store.url` |
//! | `IPVEC_BATCH_SIZE` | `embedding.batch_size` |

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::models::{Category, CollectionSpec, Distance};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub source: SourceConfig,
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub categories: CategoriesConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    pub base_dir: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_embedding_url")]
    pub url: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Append `-passage` / `-query` to the model name per request.
    #[serde(default = "default_true")]
    pub mode_suffix: bool,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Embed a probe text at startup to confirm the provider's real dimension.
    #[serde(default = "default_true")]
    pub probe_dims: bool,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: default_embedding_url(),
            api_key_env: default_api_key_env(),
            mode_suffix: true,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            retry_base_ms: default_retry_base_ms(),
            timeout_secs: default_timeout_secs(),
            probe_dims: true,
        }
    }
}

fn default_provider() -> String {
    "remote".to_string()
}
fn default_embedding_url() -> String {
    "https://api.upstage.ai/v1/embeddings".to_string()
}
fn default_api_key_env() -> String {
    "UPSTAGE_API_KEY".to_string()
}
fn default_true() -> bool {
    true
}
fn default_batch_size() -> usize {
    16
}
fn default_max_retries() -> u32 {
    5
}
fn default_retry_base_ms() -> u64 {
    1000
}
fn default_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default = "default_store_url")]
    pub url: String,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
    #[serde(default = "default_export_dir")]
    pub export_dir: PathBuf,
    #[serde(default = "default_store_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            url: default_store_url(),
            api_key_env: None,
            path: default_store_path(),
            export_dir: default_export_dir(),
            timeout_secs: default_store_timeout_secs(),
        }
    }
}

fn default_backend() -> String {
    "qdrant".to_string()
}
fn default_store_url() -> String {
    "http://localhost:6333".to_string()
}
fn default_store_path() -> PathBuf {
    PathBuf::from("./data/ipvec.sqlite")
}
fn default_export_dir() -> PathBuf {
    PathBuf::from("./exports")
}
fn default_store_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_max_errors")]
    pub max_errors_per_category: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            max_errors_per_category: default_max_errors(),
        }
    }
}

fn default_concurrency() -> usize {
    4
}
fn default_max_errors() -> usize {
    10
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct CategoriesConfig {
    pub legal: Option<CategoryConfig>,
    pub patent: Option<CategoryConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CategoryConfig {
    pub collection: String,
    /// Defaults to `embedding.dims`.
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub distance: Distance,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.json".to_string()]
}

impl CategoriesConfig {
    pub fn get(&self, category: Category) -> Option<&CategoryConfig> {
        match category {
            Category::Legal => self.legal.as_ref(),
            Category::Patent => self.patent.as_ref(),
        }
    }

    /// Configured categories in fixed order.
    pub fn iter(&self) -> impl Iterator<Item = (Category, &CategoryConfig)> {
        Category::ALL
            .into_iter()
            .filter_map(move |c| self.get(c).map(|cfg| (c, cfg)))
    }
}

impl Config {
    /// Collection schema for a configured category.
    pub fn collection_spec(&self, category: Category) -> Option<CollectionSpec> {
        let cat = self.categories.get(category)?;
        let dims = cat.dims.or(self.embedding.dims)?;
        Some(CollectionSpec {
            name: cat.collection.clone(),
            dims,
            distance: cat.distance,
        })
    }
}

impl EmbeddingConfig {
    /// Read the API key from the configured environment variable.
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse, apply environment overrides, and validate.
pub fn parse_config(content: &str) -> Result<Config> {
    let mut config: Config =
        toml::from_str(content).with_context(|| "Failed to parse config file")?;
    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    validate(&config)?;
    Ok(config)
}

/// Apply `IPVEC_*` overrides. `lookup` is injectable for tests.
pub fn apply_env_overrides(
    config: &mut Config,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<()> {
    if let Some(dir) = lookup("IPVEC_BASE_DIR") {
        config.source.base_dir = PathBuf::from(dir);
    }
    if let Some(provider) = lookup("IPVEC_EMBEDDING_PROVIDER") {
        config.embedding.provider = provider;
    }
    if let Some(backend) = lookup("IPVEC_STORE_BACKEND") {
        config.store.backend = backend;
    }
    if let Some(url) = lookup("IPVEC_STORE_URL") {
        config.store.url = url;
    }
    if let Some(size) = lookup("IPVEC_BATCH_SIZE") {
        config.embedding.batch_size = size
            .parse()
            .with_context(|| format!("IPVEC_BATCH_SIZE is not a number: '{}'", size))?;
    }
    Ok(())
}

pub fn validate(config: &Config) -> Result<()> {
    match config.embedding.provider.as_str() {
        "remote" | "local" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be local or remote.",
            other
        ),
    }

    match config.store.backend.as_str() {
        "qdrant" | "sqlite" | "jsonl" => {}
        other => bail!(
            "Unknown store backend: '{}'. Must be qdrant, sqlite, or jsonl.",
            other
        ),
    }

    if config.embedding.provider == "remote" && config.embedding.model.is_none() {
        bail!("embedding.model must be specified when provider is 'remote'");
    }

    if config.embedding.dims == Some(0) {
        bail!("embedding.dims must be > 0");
    }

    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }

    if config.ingest.concurrency == 0 {
        bail!("ingest.concurrency must be > 0");
    }

    if config.categories.iter().next().is_none() {
        bail!("at least one of [categories.legal] or [categories.patent] must be configured");
    }

    for (category, cat) in config.categories.iter() {
        if cat.collection.trim().is_empty() {
            bail!("categories.{}.collection must not be empty", category);
        }
        match cat.dims.or(config.embedding.dims) {
            None => bail!(
                "categories.{}.dims (or embedding.dims) must be specified",
                category
            ),
            Some(0) => bail!("categories.{}.dims must be > 0", category),
            Some(_) => {}
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = r#"
[source]
base_dir = "/data"

[embedding]
provider = "remote"
model = "solar-embedding-1-large"
dims = 4096

[categories.legal]
collection = "legal_collection"
include_globs = ["ip_legal_data/**/*.json"]

[categories.patent]
collection = "patent_collection"
dims = 4096
distance = "dot"
"#;

    fn parse_no_env(content: &str) -> Result<Config> {
        let mut config: Config = toml::from_str(content)?;
        apply_env_overrides(&mut config, |_| None)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn parses_with_defaults() {
        let cfg = parse_no_env(BASE).unwrap();
        assert_eq!(cfg.store.backend, "qdrant");
        assert_eq!(cfg.store.url, "http://localhost:6333");
        assert_eq!(cfg.embedding.batch_size, 16);
        assert_eq!(cfg.embedding.api_key_env, "UPSTAGE_API_KEY");
        assert!(cfg.embedding.mode_suffix);
        assert_eq!(cfg.ingest.concurrency, 4);

        let legal = cfg.collection_spec(Category::Legal).unwrap();
        assert_eq!(legal.name, "legal_collection");
        assert_eq!(legal.dims, 4096);
        assert_eq!(legal.distance, Distance::Cosine);

        let patent = cfg.collection_spec(Category::Patent).unwrap();
        assert_eq!(patent.distance, Distance::Dot);
        assert_eq!(
            cfg.categories.patent.as_ref().unwrap().include_globs,
            vec!["**/*.json".to_string()]
        );
    }

    #[test]
    fn env_overrides_apply() {
        let mut cfg: Config = toml::from_str(BASE).unwrap();
        apply_env_overrides(&mut cfg, |key| match key {
            "IPVEC_BASE_DIR" => Some("/elsewhere".to_string()),
            "IPVEC_STORE_BACKEND" => Some("jsonl".to_string()),
            "IPVEC_BATCH_SIZE" => Some("4".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(cfg.source.base_dir, PathBuf::from("/elsewhere"));
        assert_eq!(cfg.store.backend, "jsonl");
        assert_eq!(cfg.embedding.batch_size, 4);
    }

    #[test]
    fn bad_batch_size_override_fails() {
        let mut cfg: Config = toml::from_str(BASE).unwrap();
        let err = apply_env_overrides(&mut cfg, |key| {
            (key == "IPVEC_BATCH_SIZE").then(|| "lots".to_string())
        })
        .unwrap_err();
        assert!(err.to_string().contains("IPVEC_BATCH_SIZE"));
    }

    #[test]
    fn rejects_unknown_provider() {
        let content = BASE.replace("provider = \"remote\"", "provider = \"magic\"");
        let err = parse_no_env(&content).unwrap_err();
        assert!(err.to_string().contains("Unknown embedding provider"));
    }

    #[test]
    fn rejects_unknown_backend() {
        let content = format!("{}\n[store]\nbackend = \"faiss\"\n", BASE);
        let err = parse_no_env(&content).unwrap_err();
        assert!(err.to_string().contains("Unknown store backend"));
    }

    #[test]
    fn requires_dims_somewhere() {
        let content = BASE.replace("dims = 4096\n\n[categories.legal]", "\n[categories.legal]");
        let err = parse_no_env(&content).unwrap_err();
        assert!(err.to_string().contains("categories.legal.dims"));
    }

    #[test]
    fn requires_a_category() {
        let content = r#"
[source]
base_dir = "/data"

[embedding]
provider = "local"
dims = 384
"#;
        let err = parse_no_env(content).unwrap_err();
        assert!(err.to_string().contains("at least one"));
    }

    #[test]
    fn zero_concurrency_rejected() {
        let content = format!("{}\n[ingest]\nconcurrency = 0\n", BASE);
        assert!(parse_no_env(&content).is_err());
    }

    #[test]
    fn example_config_parses() {
        let config = parse_no_env(include_str!("../config/ipvec.example.toml")).unwrap();
        assert_eq!(config.store.backend, "qdrant");
        let legal = config.collection_spec(Category::Legal).unwrap();
        assert_eq!(legal.name, "legal_collection");
        assert_eq!(legal.dims, 4096);
        assert_eq!(legal.distance, Distance::Cosine);
    }
}
