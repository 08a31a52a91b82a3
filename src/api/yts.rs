//! YTS API client
//!
//! Looks a movie up by IMDB ID and lists its torrents.
//! API docs: https://yts.mx/api

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

use super::resolver::TorrentIndex;
use crate::models::{ContentId, Quality, SourceType, TorrentCandidate};

/// YTS API error types
#[derive(Error, Debug)]
pub enum YtsError {
    #[error("YTS returned status {0:?}")]
    BadStatus(String),

    #[error("Expected exactly one movie for {imdb_id}, found {count}")]
    Ambiguous { imdb_id: String, count: u32 },
}

/// YTS API client
pub struct YtsClient {
    base_url: String,
    client: reqwest::Client,
}

impl YtsClient {
    /// Create a new YTS client against the public API
    pub fn new() -> Self {
        Self::with_base_url("https://yts.mx/api/v2")
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

    async fn get<T: for<'de> Deserialize<'de>>(&self, url: &str) -> Result<T> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to fetch from YTS")?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("YTS returned HTTP {}", status);
        }

        let text = response
            .text()
            .await
            .context("Failed to read response body")?;
        serde_json::from_str(&text).context("Failed to parse JSON response")
    }

    /// Find the YTS movie id for an IMDB ID
    pub async fn find_movie_id(&self, imdb_id: &str) -> Result<u64> {
        let url = format!(
            "{}/list_movies.json?query_term={}",
            self.base_url,
            urlencoding::encode(imdb_id)
        );
        let response: Envelope<ListData> = self.get(&url).await?;
        if response.status != "ok" {
            return Err(YtsError::BadStatus(response.status).into());
        }

        let data = response.data;
        match data.movies.as_deref() {
            Some([movie]) if data.movie_count == 1 => Ok(movie.id),
            _ => Err(YtsError::Ambiguous {
                imdb_id: imdb_id.to_string(),
                count: data.movie_count,
            }
            .into()),
        }
    }

    /// List the seeded torrents of a YTS movie
    pub async fn torrents(&self, movie_id: u64) -> Result<Vec<TorrentCandidate>> {
        let url = format!("{}/movie_details.json?movie_id={}", self.base_url, movie_id);
        let response: Envelope<DetailsData> = self.get(&url).await?;
        if response.status != "ok" {
            return Err(YtsError::BadStatus(response.status).into());
        }

        Ok(response
            .data
            .movie
            .torrents
            .into_iter()
            .filter(|t| t.seeds != 0)
            .filter_map(|t| t.into_candidate())
            .collect())
    }
}

impl Default for YtsClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TorrentIndex for YtsClient {
    fn name(&self) -> &str {
        "yts"
    }

    async fn search(&self, imdb_id: &str) -> Result<Vec<TorrentCandidate>> {
        let movie_id = self.find_movie_id(imdb_id).await?;
        self.torrents(movie_id).await
    }
}

// =============================================================================
// Response Structures (internal deserialization)
// =============================================================================

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    status: String,
    data: T,
}

#[derive(Debug, Deserialize)]
struct ListData {
    movie_count: u32,
    movies: Option<Vec<MovieRaw>>,
}

#[derive(Debug, Deserialize)]
struct MovieRaw {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct DetailsData {
    movie: DetailsMovie,
}

#[derive(Debug, Deserialize)]
struct DetailsMovie {
    #[serde(default)]
    torrents: Vec<TorrentRaw>,
}

#[derive(Debug, Deserialize)]
struct TorrentRaw {
    hash: String,
    seeds: u32,
    quality: String,
    #[serde(rename = "type")]
    kind: String,
}

impl TorrentRaw {
    fn into_candidate(self) -> Option<TorrentCandidate> {
        let content_id = ContentId::parse(&self.hash).ok()?;
        Some(TorrentCandidate::new(
            content_id,
            self.seeds,
            Quality::from_label(&self.quality),
            SourceType::from_label(&self.kind),
        ))
    }
}
