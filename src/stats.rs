//! Collection statistics.
//!
//! Used by `ipvec stats` to confirm that `init` and `ingest` did what was
//! expected: which backend is in use, and for each configured category the
//! collection's schema and point count.

use anyhow::Result;

use crate::collections::CollectionManager;
use crate::models::{Category, CollectionSpec};

/// State of one configured collection.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionStats {
    pub category: Category,
    pub configured: CollectionSpec,
    /// Schema reported by the store; `None` if the collection is missing.
    pub actual: Option<CollectionSpec>,
    pub points: Option<u64>,
}

impl CollectionStats {
    fn status(&self) -> &'static str {
        match &self.actual {
            None => "missing",
            Some(actual) if actual.dims != self.configured.dims => "dims mismatch",
            Some(actual) if actual.distance != self.configured.distance => "distance differs",
            Some(_) => "ok",
        }
    }
}

pub async fn collect_stats(collections: &CollectionManager) -> Result<Vec<CollectionStats>> {
    let store = collections.store();
    let mut stats = Vec::new();
    for (category, configured) in collections.specs() {
        let actual = store.collection_info(&configured.name).await?;
        let points = match actual {
            Some(_) => Some(store.count(&configured.name).await?),
            None => None,
        };
        stats.push(CollectionStats {
            category,
            configured,
            actual,
            points,
        });
    }
    Ok(stats)
}

/// Run the stats command and print a summary.
pub async fn run_stats(collections: &CollectionManager) -> Result<()> {
    let stats = collect_stats(collections).await?;

    println!("ipvec stats ({} backend)", collections.store().backend());
    println!();
    println!(
        "  {:<10} {:<22} {:>6} {:<8} {:>10}   {}",
        "CATEGORY", "COLLECTION", "DIMS", "DISTANCE", "POINTS", "STATUS"
    );
    println!("  {}", "-".repeat(72));
    for s in &stats {
        let spec = s.actual.as_ref().unwrap_or(&s.configured);
        let points = s
            .points
            .map(crate::progress::format_number)
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {:<10} {:<22} {:>6} {:<8} {:>10}   {}",
            s.category.as_str(),
            spec.name,
            spec.dims,
            spec.distance.as_str(),
            points,
            s.status()
        );
    }
    println!();
    Ok(())
}
