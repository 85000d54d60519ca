//! Configuration management for tether.
//!
//! Loads configuration from ${TETHER_HOME}/config.toml with sensible defaults.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Transcript retention and presentation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptConfig {
    /// Block cap; oldest blocks are trimmed past it (0 disables).
    pub max_blocks: usize,
    /// Fold reasoning blocks to a one-line summary.
    pub collapse_reasoning: bool,
}

impl Default for TranscriptConfig {
    fn default() -> Self {
        Self {
            max_blocks: 2000,
            collapse_reasoning: true,
        }
    }
}

/// Stream draining limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamsConfig {
    /// Messages drained from each stream per control-loop tick.
    pub max_per_tick: usize,
    /// Buffer size for channels created on behalf of a transport.
    pub channel_capacity: usize,
}

impl Default for StreamsConfig {
    fn default() -> Self {
        Self {
            max_per_tick: 64,
            channel_capacity: 256,
        }
    }
}

/// Log/debug buffer caps.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogBufferConfig {
    pub max_lines: usize,
    pub max_bytes: usize,
    /// Lines above this size are never sent to the formatter.
    pub format_max_line_bytes: usize,
    pub format_queue_capacity: usize,
}

impl Default for LogBufferConfig {
    fn default() -> Self {
        Self {
            max_lines: 5000,
            max_bytes: 2_000_000,
            format_max_line_bytes: 16_384,
            format_queue_capacity: 256,
        }
    }
}

/// Async projection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectionConfig {
    pub tracked_capacity: usize,
    pub debug_panel_collapsed_lines: usize,
}

impl ProjectionConfig {
    pub const MIN_TRACKED: usize = 32;
    pub const MAX_TRACKED: usize = 256;

    /// Tracked-set capacity clamped into the supported range.
    pub fn effective_tracked_capacity(&self) -> usize {
        self.tracked_capacity
            .clamp(Self::MIN_TRACKED, Self::MAX_TRACKED)
    }
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self {
            tracked_capacity: 64,
            debug_panel_collapsed_lines: 20,
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub transcript: TranscriptConfig,
    pub streams: StreamsConfig,
    pub log_buffer: LogBufferConfig,
    pub projection: ProjectionConfig,
}

/// Returns the default config template with comments.
fn default_config_template() -> &'static str {
    include_str!("../default_config.toml")
}

impl Config {
    /// Loads configuration from the default config path.
    pub fn load() -> Result<Self> {
        Self::load_from(&paths::config_path())
    }

    /// Loads configuration from a specific path.
    /// Returns defaults if file doesn't exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config from {}", path.display()))
        } else {
            Ok(Config::default())
        }
    }

    /// Creates a default config file at the given path.
    /// Returns an error if the file already exists.
    pub fn init(path: &Path) -> Result<()> {
        if path.exists() {
            anyhow::bail!("Config file already exists at {}", path.display());
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }

        let tmp_path = path.with_extension("toml.tmp");
        fs::write(&tmp_path, default_config_template())
            .with_context(|| format!("Failed to write config to {}", tmp_path.display()))?;
        fs::rename(&tmp_path, path).with_context(|| {
            format!(
                "Failed to rename {} to {}",
                tmp_path.display(),
                path.display()
            )
        })
    }
}

pub mod paths {
    //! Path resolution for tether configuration and data directories.
    //!
    //! TETHER_HOME resolution order:
    //! 1. TETHER_HOME environment variable (if set)
    //! 2. ~/.config/tether (default)
    //! 3. ./.tether when no home directory can be determined

    use std::path::PathBuf;

    /// Returns the tether home directory.
    pub fn tether_home() -> PathBuf {
        if let Ok(home) = std::env::var("TETHER_HOME") {
            return PathBuf::from(home);
        }

        dirs::home_dir().map_or_else(
            || PathBuf::from(".tether"),
            |h| h.join(".config").join("tether"),
        )
    }

    /// Returns the path to the config.toml file.
    pub fn config_path() -> PathBuf {
        tether_home().join("config.toml")
    }

    /// Returns the directory log files are written to.
    pub fn log_dir() -> PathBuf {
        tether_home().join("logs")
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::*;

    #[test]
    fn test_load_missing_file_returns_defaults() {
        let dir = tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("nonexistent.toml")).unwrap();
        assert_eq!(config.transcript.max_blocks, 2000);
        assert_eq!(config.streams.max_per_tick, 64);
        assert_eq!(config.log_buffer.max_lines, 5000);
    }

    #[test]
    fn test_load_partial_config_merges_defaults() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.toml");
        fs::write(&config_path, "[log_buffer]\nmax_bytes = 7\n").unwrap();

        let config = Config::load_from(&config_path).unwrap();
        assert_eq!(config.log_buffer.max_bytes, 7);
        assert_eq!(config.log_buffer.max_lines, 5000);
        assert!(config.transcript.collapse_reasoning);
    }

    #[test]
    fn test_load_invalid_toml_reports_path() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.toml");
        fs::write(&config_path, "[streams\nmax_per_tick = ").unwrap();

        let err = Config::load_from(&config_path).unwrap_err();
        assert!(format!("{err:#}").contains("Failed to parse config"));
    }

    #[test]
    fn test_init_creates_config_with_defaults() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("subdir").join("config.toml");

        Config::init(&config_path).unwrap();

        let config = Config::load_from(&config_path).unwrap();
        assert_eq!(config.projection.tracked_capacity, 64);
        assert_eq!(config.log_buffer.format_max_line_bytes, 16_384);
    }

    #[test]
    fn test_init_refuses_to_overwrite() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.toml");
        fs::write(&config_path, "").unwrap();

        assert!(Config::init(&config_path).is_err());
    }

    #[test]
    fn test_tracked_capacity_is_clamped() {
        let mut projection = ProjectionConfig {
            tracked_capacity: 4,
            ..ProjectionConfig::default()
        };
        assert_eq!(projection.effective_tracked_capacity(), 32);
        projection.tracked_capacity = 10_000;
        assert_eq!(projection.effective_tracked_capacity(), 256);
    }
}
