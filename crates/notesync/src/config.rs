//! # Configuration
//!
//! Engine configuration is managed by [`confique`], which handles layered loading
//! from a TOML file, environment variables, and compiled defaults.
//!
//! ## Resolution Order
//!
//! 1. **Environment variables**: `NOTESYNC_DRAFT_TTL_SECS`, `NOTESYNC_FETCH_CONCURRENCY`, etc.
//! 2. **Config file**: the path handed to [`EngineConfig::load`], if it exists.
//! 3. **Compiled Defaults**: Built-in fallbacks via `#[config(default = ...)]`.
//!
//! ## Available Settings
//!
//! | Key | Default | Description |
//! |-----|---------|-------------|
//! | `draft_ttl_secs` | `86400` | Maximum age of a pending draft |
//! | `cache_ttl_secs` | `86400` | Maximum age of an edit-cache entry |
//! | `build_timeout_secs` | `600` | How long an entry may stay `building` |
//! | `sweep_interval_secs` | `60` | Suggested interval for the host to call `tick()` |
//! | `fetch_concurrency` | `5` | Parallel requests per batch fetch round |
//! | `inter_batch_delay_ms` | `100` | Pause between batch fetch rounds |
//! | `preview_length` | `200` | Maximum preview length in characters |
//! | `note_ext` | `.md` | Extension appended to note ids to form paths |
//! | `notes_dir` | `notes` | Remote directory holding the notes |
//! | `catch_up_backoff_base_ms` | `5000` | First retry delay after a failed catch-up read |
//! | `catch_up_backoff_max_ms` | `300000` | Upper bound for the catch-up retry delay |

use crate::error::Result;
use chrono::Duration;
use confique::Config;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Config, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    #[config(default = 86400, env = "NOTESYNC_DRAFT_TTL_SECS")]
    pub draft_ttl_secs: u64,

    #[config(default = 86400, env = "NOTESYNC_CACHE_TTL_SECS")]
    pub cache_ttl_secs: u64,

    #[config(default = 600, env = "NOTESYNC_BUILD_TIMEOUT_SECS")]
    pub build_timeout_secs: u64,

    /// The engine never schedules itself; hosts read this to drive `tick()`.
    #[config(default = 60, env = "NOTESYNC_SWEEP_INTERVAL_SECS")]
    pub sweep_interval_secs: u64,

    #[config(default = 5, env = "NOTESYNC_FETCH_CONCURRENCY")]
    pub fetch_concurrency: usize,

    #[config(default = 100, env = "NOTESYNC_INTER_BATCH_DELAY_MS")]
    pub inter_batch_delay_ms: u64,

    #[config(default = 200, env = "NOTESYNC_PREVIEW_LENGTH")]
    pub preview_length: usize,

    #[config(default = ".md", env = "NOTESYNC_NOTE_EXT")]
    pub note_ext: String,

    #[config(default = "notes", env = "NOTESYNC_NOTES_DIR")]
    pub notes_dir: String,

    #[config(default = 5000, env = "NOTESYNC_CATCH_UP_BACKOFF_BASE_MS")]
    pub catch_up_backoff_base_ms: u64,

    #[config(default = 300000, env = "NOTESYNC_CATCH_UP_BACKOFF_MAX_MS")]
    pub catch_up_backoff_max_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            draft_ttl_secs: 24 * 60 * 60,
            cache_ttl_secs: 24 * 60 * 60,
            build_timeout_secs: 10 * 60,
            sweep_interval_secs: 60,
            fetch_concurrency: 5,
            inter_batch_delay_ms: 100,
            preview_length: 200,
            note_ext: ".md".to_string(),
            notes_dir: "notes".to_string(),
            catch_up_backoff_base_ms: 5_000,
            catch_up_backoff_max_ms: 300_000,
        }
    }
}

impl EngineConfig {
    /// Load configuration from the environment layered over an optional TOML file.
    /// A missing file is not an error; defaults fill the gaps.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Self::builder().env();
        if let Some(path) = path {
            builder = builder.file(path);
        }
        Ok(builder.load()?)
    }

    /// Get the note extension, normalized to start with a dot.
    pub fn note_ext(&self) -> String {
        if self.note_ext.starts_with('.') {
            self.note_ext.clone()
        } else {
            format!(".{}", self.note_ext)
        }
    }

    pub fn draft_ttl(&self) -> Duration {
        saturating_seconds(self.draft_ttl_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        saturating_seconds(self.cache_ttl_secs)
    }

    pub fn build_timeout(&self) -> Duration {
        saturating_seconds(self.build_timeout_secs)
    }

    pub fn inter_batch_delay(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.inter_batch_delay_ms)
    }

    /// Concurrency of zero would stall batch fetches, so it is clamped to one.
    pub fn fetch_concurrency(&self) -> usize {
        self.fetch_concurrency.max(1)
    }
}

/// Seconds as a chrono duration, clamped instead of wrapping or panicking.
fn saturating_seconds(secs: u64) -> Duration {
    i64::try_from(secs)
        .ok()
        .and_then(Duration::try_seconds)
        .unwrap_or(Duration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.draft_ttl(), Duration::hours(24));
        assert_eq!(config.cache_ttl(), Duration::hours(24));
        assert_eq!(config.build_timeout(), Duration::minutes(10));
        assert_eq!(config.fetch_concurrency(), 5);
        assert_eq!(config.inter_batch_delay(), std::time::Duration::from_millis(100));
        assert_eq!(config.note_ext(), ".md");
    }

    #[test]
    fn test_note_ext_normalization_without_dot() {
        let config = EngineConfig {
            note_ext: "txt".to_string(),
            ..Default::default()
        };
        assert_eq!(config.note_ext(), ".txt");
    }

    #[test]
    fn test_zero_concurrency_is_clamped() {
        let config = EngineConfig {
            fetch_concurrency: 0,
            ..Default::default()
        };
        assert_eq!(config.fetch_concurrency(), 1);
    }

    #[test]
    fn test_huge_durations_saturate() {
        let config = EngineConfig {
            draft_ttl_secs: u64::MAX,
            cache_ttl_secs: i64::MAX as u64,
            build_timeout_secs: 1 << 62,
            ..Default::default()
        };
        assert_eq!(config.draft_ttl(), Duration::MAX);
        assert_eq!(config.cache_ttl(), Duration::MAX);
        assert_eq!(config.build_timeout(), Duration::MAX);
    }

    #[test]
    fn test_load_from_toml_file() {
        let overrides = EngineConfig {
            build_timeout_secs: 30,
            fetch_concurrency: 2,
            ..Default::default()
        };
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(file, "{}", toml::to_string(&overrides).unwrap()).unwrap();

        let loaded = EngineConfig::load(Some(file.path())).unwrap();
        assert_eq!(loaded.build_timeout_secs, 30);
        assert_eq!(loaded.fetch_concurrency, 2);
        assert_eq!(loaded.draft_ttl_secs, 86400);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = EngineConfig::load(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(loaded.preview_length, 200);
        assert_eq!(loaded.notes_dir, "notes");
    }
}
