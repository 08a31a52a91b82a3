//! Torrent source resolution
//!
//! Queries every configured index concurrently, merges what comes back and
//! picks one torrent. A failing index is tolerated as long as another one
//! answers.

use anyhow::Result;
use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::models::{Quality, TorrentCandidate};
use crate::stream::error::AcquireError;

/// Maximum relative seed deficit for which a bluray release beats the best-seeded one
pub const BLURAY_SEED_MARGIN: f64 = 0.65;

/// A torrent index that can list releases of a movie
#[async_trait]
pub trait TorrentIndex: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// List candidate torrents for an IMDB ID
    async fn search(&self, imdb_id: &str) -> Result<Vec<TorrentCandidate>>;
}

/// Picks the torrent to download for a movie
#[derive(Clone)]
pub struct SourceResolver {
    indexes: Vec<Arc<dyn TorrentIndex>>,
}

impl SourceResolver {
    pub fn new(indexes: Vec<Arc<dyn TorrentIndex>>) -> Self {
        Self { indexes }
    }

    /// Resolver over the public YTS and apibay indexes
    pub fn with_base_urls(yts_url: &str, bay_url: &str) -> Self {
        Self::new(vec![
            Arc::new(super::YtsClient::with_base_url(yts_url)),
            Arc::new(super::BayClient::with_base_url(bay_url)),
        ])
    }

    /// Query all indexes and merge their answers
    ///
    /// Failed indexes are logged and skipped. Errors only when every index
    /// failed.
    pub async fn candidates(&self, imdb_id: &str) -> Result<Vec<TorrentCandidate>> {
        let queries = self.indexes.iter().map(|index| async move {
            (index.name().to_string(), index.search(imdb_id).await)
        });

        let mut merged = Vec::new();
        let mut answered = 0;
        for (name, result) in join_all(queries).await {
            match result {
                Ok(found) => {
                    debug!(index = %name, count = found.len(), "index answered");
                    answered += 1;
                    merged.extend(found);
                }
                Err(e) => warn!(index = %name, error = %e, "index query failed"),
            }
        }

        if answered == 0 && !self.indexes.is_empty() {
            anyhow::bail!("none of {} torrent indexes answered", self.indexes.len());
        }
        Ok(merged)
    }

    /// Select the torrent to download for a movie
    ///
    /// Unreachable indexes count as having no seeded torrents.
    pub async fn resolve(&self, imdb_id: &str) -> Result<TorrentCandidate, AcquireError> {
        let candidates = self.candidates(imdb_id).await.unwrap_or_default();
        let chosen = select_candidate(candidates).ok_or(AcquireError::NoSeedsAvailable)?;
        info!(movie = imdb_id, torrent = %chosen, "selected torrent");
        Ok(chosen)
    }
}

/// Pick one candidate out of a merged list
///
/// The best-seeded release wins unless a bluray release (1080p first, then
/// 720p) trails it by less than [`BLURAY_SEED_MARGIN`] relative to its own
/// seed count. Zero-seed candidates are never chosen.
pub fn select_candidate(mut candidates: Vec<TorrentCandidate>) -> Option<TorrentCandidate> {
    candidates.retain(|c| c.seeds > 0);
    candidates.sort_by(|a, b| b.seeds.cmp(&a.seeds));

    let best = candidates.first()?;
    let within_margin = |c: &TorrentCandidate| {
        (best.seeds - c.seeds) as f64 / (c.seeds as f64) < BLURAY_SEED_MARGIN
    };

    for quality in [Quality::FHD1080p, Quality::HD720p] {
        if let Some(bluray) = candidates.iter().find(|c| c.is_bluray(quality)) {
            if within_margin(bluray) {
                return Some(bluray.clone());
            }
        }
    }

    Some(best.clone())
}
