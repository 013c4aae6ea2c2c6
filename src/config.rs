//! Configuration file parser for ~/.config/course-catalog/config.toml.
//!
//! The config file is optional: a missing or empty file yields
//! `Config::default()`. Unknown keys are accepted but logged, since they are
//! usually typos.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::catalog::{QueryOptions, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
use crate::store::DEFAULT_IN_LIMIT;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// SEC-014: Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Courses per page.
    pub page_size: usize,

    /// Category ids per "in" query. Capped at the store limit of 30.
    pub in_chunk_size: usize,

    pub categories_collection: String,

    pub courses_collection: String,

    /// SQLite database file. Defaults to `catalog.db` next to the config.
    pub database_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            in_chunk_size: DEFAULT_IN_LIMIT,
            categories_collection: "categories".to_string(),
            courses_collection: "courses".to_string(),
            database_path: None,
        }
    }
}

impl Config {
    /// SEC-014: Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 5] = [
        "page_size",
        "in_chunk_size",
        "categories_collection",
        "courses_collection",
        "database_path",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    /// - Out-of-range sizes → clamped, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // SEC-014: Check file size before reading to prevent memory exhaustion
        // from a maliciously large or corrupted config file.
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        let config = config.clamped();
        tracing::info!(
            path = %path.display(),
            page_size = config.page_size,
            in_chunk_size = config.in_chunk_size,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Bring sizes into their valid ranges.
    pub fn clamped(mut self) -> Self {
        let page_size = self.page_size.clamp(1, MAX_PAGE_SIZE);
        if page_size != self.page_size {
            tracing::warn!(
                requested = self.page_size,
                using = page_size,
                "page_size out of range 1..={}",
                MAX_PAGE_SIZE
            );
            self.page_size = page_size;
        }
        let chunk = self.in_chunk_size.clamp(1, DEFAULT_IN_LIMIT);
        if chunk != self.in_chunk_size {
            tracing::warn!(
                requested = self.in_chunk_size,
                using = chunk,
                "in_chunk_size out of range 1..={}",
                DEFAULT_IN_LIMIT
            );
            self.in_chunk_size = chunk;
        }
        self
    }

    /// Options for the course query engine.
    pub fn query_options(&self) -> QueryOptions {
        QueryOptions {
            collection: self.courses_collection.clone(),
            page_size: self.page_size,
            chunk_size: self.in_chunk_size,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(name: &str, content: &str) -> (PathBuf, PathBuf) {
        let dir = std::env::temp_dir().join(format!("course_catalog_config_{name}"));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, content).unwrap();
        (dir, path)
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.page_size, 20);
        assert_eq!(config.in_chunk_size, 30);
        assert_eq!(config.categories_collection, "categories");
        assert_eq!(config.courses_collection, "courses");
        assert!(config.database_path.is_none());
    }

    #[test]
    fn test_missing_file_returns_default() {
        let path = Path::new("/tmp/course_catalog_test_nonexistent_config.toml");
        let config = Config::load(path).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_whitespace_only_file_returns_default() {
        let (dir, path) = write_config("whitespace", "   \n  \n  ");
        assert_eq!(Config::load(&path).unwrap(), Config::default());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_partial_config_uses_defaults_for_missing() {
        let (dir, path) = write_config("partial", "page_size = 5\n");
        let config = Config::load(&path).unwrap();
        assert_eq!(config.page_size, 5);
        assert_eq!(config.in_chunk_size, 30);
        assert_eq!(config.courses_collection, "courses");
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_full_config() {
        let content = r#"
page_size = 50
in_chunk_size = 10
categories_collection = "course_categories"
courses_collection = "published_courses"
database_path = "/var/lib/catalog/catalog.db"
"#;
        let (dir, path) = write_config("full", content);
        let config = Config::load(&path).unwrap();
        assert_eq!(config.page_size, 50);
        assert_eq!(config.in_chunk_size, 10);
        assert_eq!(config.categories_collection, "course_categories");
        assert_eq!(config.courses_collection, "published_courses");
        assert_eq!(
            config.database_path.as_deref(),
            Some(Path::new("/var/lib/catalog/catalog.db"))
        );

        let options = config.query_options();
        assert_eq!(options.collection, "published_courses");
        assert_eq!(options.page_size, 50);
        assert_eq!(options.chunk_size, 10);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_sizes_are_clamped() {
        let (dir, path) = write_config("clamp", "page_size = 0\nin_chunk_size = 100\n");
        let config = Config::load(&path).unwrap();
        assert_eq!(config.page_size, 1);
        assert_eq!(config.in_chunk_size, 30);
        std::fs::remove_dir_all(&dir).ok();

        let config = Config {
            in_chunk_size: 0,
            ..Config::default()
        }
        .clamped();
        assert_eq!(config.in_chunk_size, 1);
    }

    #[test]
    fn test_huge_page_size_is_clamped() {
        let (dir, path) = write_config("huge_page", "page_size = 9223372036854775807\n");
        let config = Config::load(&path).unwrap();
        assert_eq!(config.page_size, MAX_PAGE_SIZE);
        assert_eq!(config.query_options().page_size, MAX_PAGE_SIZE);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let (dir, path) = write_config("invalid", "this is not [valid toml");
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("Invalid TOML"));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_unknown_keys_accepted() {
        let content = r#"
page_size = 15
totally_fake_key = "should not fail"
"#;
        let (dir, path) = write_config("unknown", content);
        let config = Config::load(&path).unwrap();
        assert_eq!(config.page_size, 15);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_wrong_type_returns_error() {
        let (dir, path) = write_config("wrongtype", "page_size = \"twenty\"\n");
        assert!(matches!(Config::load(&path), Err(ConfigError::Parse(_))));
        std::fs::remove_dir_all(&dir).ok();
    }

    // SEC-014: File size limit
    #[test]
    fn test_too_large_file_rejected() {
        let (dir, path) = write_config("too_large", &"a".repeat(1_048_577));
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::TooLarge(_)));
        assert!(err.to_string().contains("too large"));
        std::fs::remove_dir_all(&dir).ok();
    }
}
