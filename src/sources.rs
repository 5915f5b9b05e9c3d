use anyhow::Result;

use crate::config::Config;
use crate::discover::scan_category;
use crate::models::Category;

/// One row of `ipvec sources`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceStatus {
    pub category: Category,
    pub collection: String,
    pub globs: String,
    pub files: Option<usize>,
    pub status: String,
}

/// Status of every configured category: glob health and matched file count.
pub fn source_statuses(config: &Config) -> Vec<SourceStatus> {
    let base = &config.source.base_dir;
    config
        .categories
        .iter()
        .map(|(category, cat)| {
            let (files, status) = if !base.is_dir() {
                (None, "BASE DIR MISSING".to_string())
            } else {
                match scan_category(base, category, cat) {
                    Ok(files) if files.is_empty() => (Some(0), "NO FILES".to_string()),
                    Ok(files) => (Some(files.len()), "OK".to_string()),
                    Err(e) => (None, format!("ERROR ({})", e)),
                }
            };
            SourceStatus {
                category,
                collection: cat.collection.clone(),
                globs: cat.include_globs.join(","),
                files,
                status,
            }
        })
        .collect()
}

pub fn list_sources(config: &Config) -> Result<()> {
    println!("base dir: {}", config.source.base_dir.display());
    println!(
        "{:<10} {:<22} {:>7}  {:<18} GLOBS",
        "CATEGORY", "COLLECTION", "FILES", "STATUS"
    );
    for s in source_statuses(config) {
        let files = s
            .files
            .map(|n| n.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<10} {:<22} {:>7}  {:<18} {}",
            s.category.as_str(),
            s.collection,
            files,
            s.status,
            s.globs
        );
    }
    Ok(())
}
