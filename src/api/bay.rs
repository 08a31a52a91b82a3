//! apibay client
//!
//! Searches The Pirate Bay's JSON API in the movies category and
//! classifies releases by their names.

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::sync::OnceLock;
use std::time::Duration;

use super::resolver::TorrentIndex;
use crate::models::{ContentId, Quality, SourceType, TorrentCandidate};

/// HD movies category
const MOVIES_CATEGORY: &str = "207";

/// apibay search result row
#[derive(Debug, Deserialize)]
struct BayRow {
    name: String,
    info_hash: String,
    seeders: String,
}

impl BayRow {
    fn into_candidate(self) -> Option<TorrentCandidate> {
        let content_id = ContentId::parse(&self.info_hash).ok()?;
        let seeds = self.seeders.trim().parse().unwrap_or(0);
        let (quality, source_type) = classify_release(&self.name);
        Some(TorrentCandidate::new(content_id, seeds, quality, source_type))
    }
}

/// apibay client
pub struct BayClient {
    base_url: String,
    client: reqwest::Client,
}

impl BayClient {
    pub fn new() -> Self {
        Self::with_base_url("https://apibay.org")
    }

    /// Create a client with a custom base URL (for testing)
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
        }
    }

    /// Search the movies category, keeping rows with seeders
    pub async fn search_movies(&self, query: &str) -> Result<Vec<TorrentCandidate>> {
        let url = format!(
            "{}/q.php?q={}&cat={}",
            self.base_url,
            urlencoding::encode(query),
            MOVIES_CATEGORY
        );

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to fetch from apibay")?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("apibay returned HTTP {}", status);
        }

        let text = response
            .text()
            .await
            .context("Failed to read response body")?;
        let rows: Vec<BayRow> =
            serde_json::from_str(&text).context("Failed to parse JSON response")?;

        // apibay answers "no results" with a single all-zero placeholder row
        Ok(rows
            .into_iter()
            .filter(|row| row.seeders.trim() != "0")
            .filter(|row| row.info_hash.chars().any(|c| c != '0'))
            .filter_map(BayRow::into_candidate)
            .collect())
    }
}

impl Default for BayClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TorrentIndex for BayClient {
    fn name(&self) -> &str {
        "bay"
    }

    async fn search(&self, imdb_id: &str) -> Result<Vec<TorrentCandidate>> {
        self.search_movies(imdb_id).await
    }
}

/// Derive quality and source from a release name
///
/// `webrip` wins over a resolution tag, so "Movie.1080p.WEBRip" is `web`.
pub fn classify_release(name: &str) -> (Quality, SourceType) {
    static BRRIP: OnceLock<Option<Regex>> = OnceLock::new();
    static WEBRIP: OnceLock<Option<Regex>> = OnceLock::new();

    let mut quality = Quality::Unknown;
    let mut source_type = SourceType::Unknown;

    if name.contains("720p") {
        quality = Quality::HD720p;
    }
    if name.contains("1080p") {
        quality = Quality::FHD1080p;
    }

    let brrip = BRRIP.get_or_init(|| Regex::new(r"(?i)brrip").ok());
    if brrip.as_ref().is_some_and(|re| re.is_match(name)) {
        source_type = SourceType::Bluray;
    }

    let webrip = WEBRIP.get_or_init(|| Regex::new(r"(?i)webrip").ok());
    if webrip.as_ref().is_some_and(|re| re.is_match(name)) {
        quality = Quality::Web;
        source_type = SourceType::Web;
    }

    (quality, source_type)
}
