//! Stremio Subtitle Client
//!
//! Free subtitle search using Stremio's public addon endpoint.
//! No API key required - uses Stremio's OpenSubtitles v3 addon.
//!
//! Lookups carry the content hash and size of the movie file so results
//! match the exact release. Downloads are converted from SRT to WebVTT and
//! cached under the configured cache directory.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::SubtitlesConfig;
use crate::models::MovieHash;

/// Fetches subtitles for a movie file once its content hash is known
#[async_trait]
pub trait SubtitleFetcher: Send + Sync {
    /// Fetch subtitles; returns the languages obtained
    async fn fetch(&self, movie_id: &str, hash: MovieHash, file_size: u64) -> Result<Vec<String>>;
}

/// A subtitle offered by the addon
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubtitleTrack {
    pub id: String,
    pub url: String,
    pub language: String,
}

/// Subtitle client using Stremio's free public endpoint
pub struct SubtitleClient {
    base_url: String,
    client: reqwest::Client,
    languages: Vec<String>,
    cache_dir: PathBuf,
}

/// Stremio subtitle response
#[derive(Debug, Deserialize)]
struct StremioResponse {
    #[serde(default)]
    subtitles: Vec<StremioSubtitle>,
}

/// Single subtitle from Stremio
#[derive(Debug, Deserialize)]
struct StremioSubtitle {
    id: String,
    url: String,
    lang: String,
}

impl SubtitleClient {
    /// Create a client from the subtitles configuration
    pub fn new(config: &SubtitlesConfig) -> Self {
        Self::with_base_url(&config.base_url, config.effective_languages(), config.cache_dir())
    }

    /// Create with custom base URL (for testing)
    pub fn with_base_url(
        base_url: impl Into<String>,
        languages: Vec<String>,
        cache_dir: impl Into<PathBuf>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            languages,
            cache_dir: cache_dir.into(),
        }
    }

    /// Hash-aware search URL for a movie file
    pub fn search_url(&self, imdb_id: &str, hash: MovieHash, file_size: u64) -> String {
        format!(
            "{}/subtitles/movie/{}/videoHash={}&videoSize={}.json",
            self.base_url,
            normalize_imdb_id(imdb_id),
            hash,
            file_size
        )
    }

    /// Search subtitles matching the movie file
    pub async fn search(
        &self,
        imdb_id: &str,
        hash: MovieHash,
        file_size: u64,
    ) -> Result<Vec<SubtitleTrack>> {
        let url = self.search_url(imdb_id, hash, file_size);
        debug!(%url, "searching subtitles");
        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            return Err(anyhow!("Stremio API error: {}", response.status()));
        }

        let api_response: StremioResponse = response.json().await?;
        Ok(api_response
            .subtitles
            .into_iter()
            .map(|s| SubtitleTrack {
                id: s.id,
                url: s.url,
                language: s.lang,
            })
            .collect())
    }

    /// First track per preferred language, in preference order
    pub fn pick_tracks<'a>(&self, tracks: &'a [SubtitleTrack]) -> Vec<&'a SubtitleTrack> {
        self.languages
            .iter()
            .filter_map(|lang| tracks.iter().find(|t| t.language.eq_ignore_ascii_case(lang)))
            .collect()
    }

    /// Download subtitle from URL and convert to WebVTT
    pub async fn download(&self, track: &SubtitleTrack) -> Result<String> {
        // Check cache first
        let cache_path = self.cache_path(track);
        if cache_path.exists() {
            let content = tokio::fs::read_to_string(&cache_path).await?;
            return Ok(content);
        }

        let response = self.client.get(&track.url).send().await?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "Failed to download subtitle: {}",
                response.status()
            ));
        }

        let srt_content = response.text().await?;
        let webvtt_content = Self::srt_to_webvtt(&srt_content);

        tokio::fs::create_dir_all(&self.cache_dir).await?;
        tokio::fs::write(&cache_path, &webvtt_content).await?;

        Ok(webvtt_content)
    }

    /// Cache path for a subtitle track
    pub fn cache_path(&self, track: &SubtitleTrack) -> PathBuf {
        self.cache_dir
            .join(format!("{}_{}.vtt", track.language, sanitize(&track.id)))
    }

    /// Convert SRT content to WebVTT format
    ///
    /// This converts SRT timestamps (00:00:00,000) to WebVTT format (00:00:00.000)
    /// and adds the required WEBVTT header.
    pub fn srt_to_webvtt(srt: &str) -> String {
        let mut webvtt = String::from("WEBVTT\n\n");

        // Only timestamp lines change, dialogue keeps its commas
        for line in srt.lines() {
            let converted = if line.contains(" --> ") {
                line.replace(',', ".")
            } else {
                line.to_string()
            };
            webvtt.push_str(&converted);
            webvtt.push('\n');
        }

        webvtt
    }
}

#[async_trait]
impl SubtitleFetcher for SubtitleClient {
    async fn fetch(&self, movie_id: &str, hash: MovieHash, file_size: u64) -> Result<Vec<String>> {
        let tracks = self.search(movie_id, hash, file_size).await?;
        let picked = self.pick_tracks(&tracks);
        if picked.is_empty() {
            return Err(anyhow!("No subtitles found for {}", movie_id));
        }

        let mut obtained = Vec::new();
        for track in picked {
            match self.download(track).await {
                Ok(_) => obtained.push(track.language.to_lowercase()),
                Err(e) => warn!(lang = %track.language, error = %e, "subtitle download failed"),
            }
        }

        if obtained.is_empty() {
            return Err(anyhow!("Every subtitle download failed for {}", movie_id));
        }
        info!(movie = movie_id, languages = ?obtained, "subtitles ready");
        Ok(obtained)
    }
}

/// Normalize IMDB ID to have "tt" prefix
fn normalize_imdb_id(imdb_id: &str) -> String {
    if imdb_id.starts_with("tt") {
        imdb_id.to_string()
    } else {
        format!("tt{}", imdb_id)
    }
}

/// Keep ids usable as file names
fn sanitize(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}
