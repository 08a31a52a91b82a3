//! Configuration management for reelseed
//!
//! Handles config file loading/saving. Every field has a default so a
//! missing or partial file is fine.
//! Config is stored at ~/.config/reelseed/config.toml

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub engine: EngineConfig,
    pub sources: SourcesConfig,
    pub subtitles: SubtitlesConfig,
}

/// Torrent engine limits and timings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Reject every acquisition when false
    pub enabled: bool,
    /// Ceiling on live downloads plus in-flight acquisitions
    pub max_instances: usize,
    pub metadata_timeout_secs: u64,
    /// Interval between peer refreshes of a registered download
    pub refresh_interval_secs: u64,
    /// Leading pieces of the movie file needed before playback
    pub playback_buffer_pieces: u32,
    /// Give up waiting for the playback buffer after this long; 0 waits forever
    pub playback_timeout_secs: u64,
    /// Video file extensions, highest priority first
    pub supported_extensions: Vec<String>,
    /// Drop a download from the registry once its movie file is complete
    pub release_on_complete: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_instances: 5,
            metadata_timeout_secs: 60,
            refresh_interval_secs: 30,
            playback_buffer_pieces: 10,
            playback_timeout_secs: 600,
            supported_extensions: vec![
                ".mp4".to_string(),
                ".webm".to_string(),
                ".mkv".to_string(),
                ".avi".to_string(),
            ],
            release_on_complete: true,
        }
    }
}

impl EngineConfig {
    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_secs(self.metadata_timeout_secs)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs.max(1))
    }

    pub fn playback_timeout(&self) -> Option<Duration> {
        (self.playback_timeout_secs > 0).then(|| Duration::from_secs(self.playback_timeout_secs))
    }
}

/// Torrent index endpoints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    pub yts_url: String,
    pub bay_url: String,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            yts_url: "https://yts.mx/api/v2".to_string(),
            bay_url: "https://apibay.org".to_string(),
        }
    }
}

/// Subtitle lookup settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubtitlesConfig {
    pub base_url: String,
    /// Preferred 3-letter language codes; English is always added as a fallback
    pub languages: Vec<String>,
    /// Where converted WebVTT files are cached (platform cache dir when absent)
    pub cache_dir: Option<PathBuf>,
}

impl Default for SubtitlesConfig {
    fn default() -> Self {
        Self {
            base_url: "https://opensubtitles-v3.strem.io".to_string(),
            languages: vec!["eng".to_string()],
            cache_dir: None,
        }
    }
}

impl SubtitlesConfig {
    /// Preferred languages with the English fallback appended
    pub fn effective_languages(&self) -> Vec<String> {
        let mut languages = self.languages.clone();
        if !languages.iter().any(|l| l.eq_ignore_ascii_case("eng")) {
            languages.push("eng".to_string());
        }
        languages
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join("reelseed")
                .join("subtitles")
        })
    }
}

impl Config {
    /// Get config file path (~/.config/reelseed/config.toml)
    pub fn path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("reelseed").join("config.toml"))
    }

    /// Load config from the default path, or return defaults if not found
    pub fn load() -> Self {
        Self::path()
            .and_then(|p| Self::load_from(&p).ok())
            .unwrap_or_default()
    }

    /// Load config from a specific file
    pub fn load_from(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Save config to the default path
    pub fn save(&self) -> Result<()> {
        let path = Self::path().ok_or_else(|| anyhow::anyhow!("Could not determine config path"))?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Create parent directory if needed
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let toml = toml::to_string_pretty(self)?;
        std::fs::write(path, toml)?;
        Ok(())
    }
}
