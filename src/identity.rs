//! Stable point identifiers.
//!
//! A record's id is a SHA-256 digest of its source position (file path and
//! item index), truncated to 128 bits and rendered as a UUID so every vector
//! store accepts it as a point key. Identical positions always produce the
//! identical id, across processes and machines, which turns re-ingestion into
//! an overwrite instead of an append.

use std::path::{Component, Path};

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::RecordId;

/// Derive the id of item `item_index` in `file_path`.
///
/// `file_path` should be relative to the source base directory (see
/// [`source_key`]) so ids survive relocating the corpus.
pub fn derive_id(file_path: &str, item_index: usize) -> RecordId {
    let mut hasher = Sha256::new();
    hasher.update(file_path.as_bytes());
    // NUL never appears in a path, so (path, index) pairs cannot collide by
    // concatenation.
    hasher.update([0u8]);
    hasher.update((item_index as u64).to_be_bytes());
    let digest = hasher.finalize();

    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    RecordId(Uuid::from_bytes(bytes))
}

/// Canonical key for a source file: the path relative to `base_dir`, with
/// `/` separators regardless of platform.
pub fn source_key(base_dir: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(base_dir).unwrap_or(path);
    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
