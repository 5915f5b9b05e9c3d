//! Corpus discovery.
//!
//! Walks `source.base_dir` once per configured category and keeps the JSON
//! files selected by that category's include/exclude globs. Globs are
//! matched against the path relative to the base directory with `/`
//! separators. Results are sorted so runs are deterministic.

use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use walkdir::WalkDir;

use crate::config::{CategoryConfig, Config};
use crate::identity::source_key;
use crate::models::Category;

/// A file selected for ingestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub category: Category,
    pub path: PathBuf,
    /// Base-relative path with `/` separators; the input to `derive_id`.
    pub key: String,
}

impl SourceFile {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Discover files for every configured category, or only `only`.
pub fn discover(config: &Config, only: Option<Category>) -> Result<Vec<SourceFile>> {
    let base = &config.source.base_dir;
    if !base.is_dir() {
        bail!("source.base_dir does not exist: {}", base.display());
    }

    let mut files = Vec::new();
    for (category, cat) in config.categories.iter() {
        if only.is_some_and(|c| c != category) {
            continue;
        }
        files.extend(scan_category(base, category, cat)?);
    }
    Ok(files)
}

pub fn scan_category(base: &Path, category: Category, cat: &CategoryConfig) -> Result<Vec<SourceFile>> {
    let include_set = build_globset(&cat.include_globs)?;

    let mut default_excludes = vec!["**/.*/**".to_string()];
    default_excludes.extend(cat.exclude_globs.clone());
    let exclude_set = build_globset(&default_excludes)?;

    let mut files = Vec::new();
    for entry in WalkDir::new(base) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let key = source_key(base, path);

        if exclude_set.is_match(&key) || !include_set.is_match(&key) {
            continue;
        }

        files.push(SourceFile {
            category,
            path: path.to_path_buf(),
            key,
        });
    }

    files.sort_by(|a, b| a.key.cmp(&b.key));
    Ok(files)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Distance;
    use std::fs;
    use tempfile::TempDir;

    fn cat(include: &[&str], exclude: &[&str]) -> CategoryConfig {
        CategoryConfig {
            collection: "c".into(),
            dims: Some(2),
            distance: Distance::Cosine,
            include_globs: include.iter().map(|s| s.to_string()).collect(),
            exclude_globs: exclude.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "[]").unwrap();
    }

    #[test]
    fn globs_select_and_sort() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "patent_data/train/raw/kr_b.json");
        touch(tmp.path(), "patent_data/train/raw/kr_a.json");
        touch(tmp.path(), "patent_data/train/raw/us_a.json");
        touch(tmp.path(), "patent_data/train/raw/notes.txt");

        let files = scan_category(
            tmp.path(),
            Category::Patent,
            &cat(&["patent_data/train/raw/kr*.json"], &[]),
        )
        .unwrap();
        let keys: Vec<_> = files.iter().map(|f| f.key.as_str()).collect();
        assert_eq!(
            keys,
            vec!["patent_data/train/raw/kr_a.json", "patent_data/train/raw/kr_b.json"]
        );
        assert_eq!(files[0].file_name(), "kr_a.json");
    }

    #[test]
    fn excludes_and_hidden_dirs() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "labeled/a.json");
        touch(tmp.path(), "labeled/draft/b.json");
        touch(tmp.path(), ".cache/c.json");

        let files = scan_category(
            tmp.path(),
            Category::Legal,
            &cat(&["**/*.json"], &["**/draft/**"]),
        )
        .unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].key, "labeled/a.json");
    }

    #[test]
    fn invalid_glob_is_error() {
        let tmp = TempDir::new().unwrap();
        assert!(scan_category(tmp.path(), Category::Legal, &cat(&["[bad"], &[])).is_err());
    }
}
