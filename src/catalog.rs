//! Set catalog cache.
//!
//! Maintains the list of candidate sets and their parts decomposition in a
//! file-backed snapshot. Invalidation is purely content-hash driven: the
//! catalog index is hashed and compared to the persisted hash, and only a
//! mismatch (or `force`) triggers the expensive per-set detail refetch. The
//! snapshot is replaced atomically via write-temp-then-rename, and a corrupt
//! file is treated as absent.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::error::{EngineError, Result};
use crate::market::wire::title_case_slug;
use crate::market::{ItemIndexEntry, MarketClient};

/// Slug suffix identifying composite set items in the catalog index.
const SET_SLUG_SUFFIX: &str = "_set";

/// Concurrent detail fetches; the rate limiter is the real throttle.
const DETAIL_FETCH_CONCURRENCY: usize = 4;

/// One constituent part of a set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetPart {
    pub slug: String,
    pub name: String,
    pub quantity: u32,
}

/// A composite set and its decomposition. Immutable per catalog generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetDefinition {
    pub slug: String,
    pub name: String,
    pub parts: Vec<SetPart>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CatalogSnapshot {
    catalog_hash: String,
    last_updated: i64,
    sets: Vec<SetDefinition>,
}

pub struct CatalogCache {
    path: PathBuf,
    /// In-memory copy of the last snapshot loaded or written.
    snapshot: Mutex<Option<CatalogSnapshot>>,
}

impl CatalogCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let snapshot = Mutex::new(load_snapshot(&path));
        CatalogCache { path, snapshot }
    }

    /// Return the catalog, refetching decompositions only when the upstream
    /// index hash differs from the persisted one (or `force` is set).
    ///
    /// `on_progress` is invoked with (completed, total) while details fetch.
    pub async fn refresh_if_stale(
        &self,
        client: &MarketClient,
        force: bool,
        on_progress: impl Fn(usize, usize) + Send + Sync,
    ) -> Result<Vec<SetDefinition>> {
        let index = self.fetch_set_index(client).await?;
        let hash = catalog_hash(&index);

        if !force {
            let cached = self.snapshot.lock();
            if let Some(snap) = cached.as_ref() {
                if snap.catalog_hash == hash {
                    info!(sets = snap.sets.len(), "Catalog hash unchanged, using cached decomposition");
                    return Ok(snap.sets.clone());
                }
            }
        }

        info!(sets = index.len(), "Catalog changed, refetching set details");
        let sets = self.fetch_all_details(client, &index, on_progress).await?;

        let snap = CatalogSnapshot {
            catalog_hash: hash,
            last_updated: Utc::now().timestamp(),
            sets: sets.clone(),
        };
        self.persist(&snap)?;
        *self.snapshot.lock() = Some(snap);

        Ok(sets)
    }

    /// Cached decomposition without touching upstream, if a snapshot exists.
    pub fn cached_sets(&self) -> Option<Vec<SetDefinition>> {
        self.snapshot.lock().as_ref().map(|s| s.sets.clone())
    }

    /// Seconds since the snapshot was last written.
    pub fn cache_age_secs(&self) -> Option<i64> {
        let snap = self.snapshot.lock();
        snap.as_ref()
            .map(|s| (Utc::now().timestamp() - s.last_updated).max(0))
    }

    async fn fetch_set_index(&self, client: &MarketClient) -> Result<Vec<ItemIndexEntry>> {
        let mut sets: Vec<ItemIndexEntry> = client
            .list_items()
            .await?
            .into_iter()
            .filter(|item| item.slug.ends_with(SET_SLUG_SUFFIX))
            .collect();
        sets.sort_by(|a, b| a.slug.cmp(&b.slug));
        Ok(sets)
    }

    async fn fetch_all_details(
        &self,
        client: &MarketClient,
        index: &[ItemIndexEntry],
        on_progress: impl Fn(usize, usize) + Send + Sync,
    ) -> Result<Vec<SetDefinition>> {
        let total = index.len();
        let completed = AtomicUsize::new(0);

        // Pass 1: decomposition of every set.
        let details: Vec<(String, String, Vec<String>)> = stream::iter(index.iter().cloned())
            .map(|entry| {
                let client = client.clone();
                let completed = &completed;
                let on_progress = &on_progress;
                async move {
                    let result = client.item_detail(&entry.slug).await;
                    let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
                    on_progress(done, total);
                    match result {
                        Ok(detail) => (entry.slug, detail.name, detail.set_parts),
                        Err(e) => {
                            warn!(slug = %entry.slug, error = %e, "Set detail fetch failed, keeping empty decomposition");
                            (entry.slug, entry.name, Vec::new())
                        }
                    }
                }
            })
            .buffer_unordered(DETAIL_FETCH_CONCURRENCY)
            .collect()
            .await;

        // Pass 2: each unique part fetched once for name and quantity.
        let mut unique_parts: Vec<String> = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for (_, _, parts) in &details {
            for part in parts {
                if seen.insert(part.clone()) {
                    unique_parts.push(part.clone());
                }
            }
        }

        let part_lookup: HashMap<String, SetPart> = stream::iter(unique_parts.into_iter())
            .map(|code| {
                let client = client.clone();
                async move {
                    match client.item_detail(&code).await {
                        Ok(detail) => (
                            code,
                            SetPart {
                                slug: detail.slug,
                                name: detail.name,
                                quantity: detail.quantity_in_set.max(1),
                            },
                        ),
                        Err(e) => {
                            warn!(part = %code, error = %e, "Part detail fetch failed, assuming quantity 1");
                            let part = SetPart {
                                slug: code.clone(),
                                name: title_case_slug(&code),
                                quantity: 1,
                            };
                            (code, part)
                        }
                    }
                }
            })
            .buffer_unordered(DETAIL_FETCH_CONCURRENCY)
            .collect()
            .await;

        let mut sets: Vec<SetDefinition> = details
            .into_iter()
            .map(|(slug, name, part_codes)| SetDefinition {
                slug,
                name,
                parts: part_codes
                    .iter()
                    .filter_map(|code| part_lookup.get(code).cloned())
                    .collect(),
            })
            .collect();
        sets.sort_by(|a, b| a.slug.cmp(&b.slug));
        Ok(sets)
    }

    fn persist(&self, snap: &CatalogSnapshot) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(snap)
            .map_err(|e| EngineError::Storage(format!("catalog serialize: {e}")))?;
        std::fs::write(&tmp, body)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

fn load_snapshot(path: &Path) -> Option<CatalogSnapshot> {
    let raw = std::fs::read(path).ok()?;
    match serde_json::from_slice::<CatalogSnapshot>(&raw) {
        Ok(snap) => Some(snap),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Corrupt catalog snapshot, treating as absent");
            None
        }
    }
}

/// Content hash over the normalized (slug, name) index.
fn catalog_hash(index: &[ItemIndexEntry]) -> String {
    let normalized: Vec<(&str, &str)> = index
        .iter()
        .map(|e| (e.slug.as_str(), e.name.as_str()))
        .collect();
    let mut hasher = Sha256::new();
    hasher.update(serde_json::to_string(&normalized).unwrap_or_default().as_bytes());
    format!("{:x}", hasher.finalize())
}
