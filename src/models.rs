//! Core data models used throughout ipvec.
//!
//! These types represent the records, identifiers, and points that flow
//! through the ingestion pipeline, and the collection schema shared by
//! every vector-store backend.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Top-level document domain. Determines the schema matchers and the
/// target collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Legal,
    Patent,
}

impl Category {
    pub const ALL: [Category; 2] = [Category::Legal, Category::Patent];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Legal => "legal",
            Category::Patent => "patent",
        }
    }

    pub fn parse(s: &str) -> Option<Category> {
        match s {
            "legal" => Some(Category::Legal),
            "patent" => Some(Category::Patent),
            _ => None,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The shape a record was recognised as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Task {
    Qa,
    Summary,
    LegalQa,
    LegalSummary,
    PatentAbs,
}

impl Task {
    pub fn as_str(&self) -> &'static str {
        match self {
            Task::Qa => "QA",
            Task::Summary => "SUMMARY",
            Task::LegalQa => "LEGAL_QA",
            Task::LegalSummary => "LEGAL_SUMMARY",
            Task::PatentAbs => "PATENT_ABS",
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A non-null metadata value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Text(String),
    List(Vec<String>),
}

/// Record metadata. Keys are never omitted; absent fields are `None`,
/// which serializes as an explicit JSON `null`.
pub type Metadata = BTreeMap<String, Option<MetaValue>>;

/// Normalized record produced from one raw JSON item.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalRecord {
    pub text: String,
    pub category: Category,
    pub task: Task,
    pub metadata: Metadata,
}

/// Stable point identifier derived from a source position.
///
/// See [`crate::identity::derive_id`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub Uuid);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Unit submitted to a collection: id, vector and JSON payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpsertPoint {
    pub id: RecordId,
    pub vector: Vec<f32>,
    pub payload: serde_json::Value,
}

impl UpsertPoint {
    /// Build a point whose payload is the record's metadata plus its text.
    pub fn from_record(id: RecordId, vector: Vec<f32>, record: &CanonicalRecord) -> Self {
        let mut payload = serde_json::Map::new();
        for (key, value) in &record.metadata {
            let json = serde_json::to_value(value).unwrap_or(serde_json::Value::Null);
            payload.insert(key.clone(), json);
        }
        payload.insert(
            "text".to_string(),
            serde_json::Value::String(record.text.clone()),
        );
        Self {
            id,
            vector,
            payload: serde_json::Value::Object(payload),
        }
    }
}

/// Outcome of one acknowledged upsert batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertResult {
    pub points: usize,
}

/// Similarity metric of a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Distance {
    #[default]
    Cosine,
    Dot,
    Euclid,
}

impl Distance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Distance::Cosine => "cosine",
            Distance::Dot => "dot",
            Distance::Euclid => "euclid",
        }
    }

    pub fn parse(s: &str) -> Option<Distance> {
        match s.to_ascii_lowercase().as_str() {
            "cosine" => Some(Distance::Cosine),
            "dot" => Some(Distance::Dot),
            "euclid" | "euclidean" => Some(Distance::Euclid),
            _ => None,
        }
    }
}

impl fmt::Display for Distance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Schema of one collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionSpec {
    pub name: String,
    pub dims: usize,
    pub distance: Distance,
}

/// A search hit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredPoint {
    pub id: String,
    pub score: f32,
    pub payload: serde_json::Value,
}
