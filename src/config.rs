//! Configuration loading
//!
//! Resolution order: explicit `--config` path, then
//! `<config_dir>/gallery/config.toml`, then compiled defaults.
//! Every field is optional in the file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::media::import::DEFAULT_PRUNE_GRACE;
use crate::state::data::GeoPoint;

/// Fallback origin for records without a resolved location
pub const DEFAULT_LOCATION: GeoPoint = GeoPoint {
    latitude: 52.545995,
    longitude: 13.351148,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GalleryConfig {
    /// Root of everything the gallery writes
    pub data_dir: PathBuf,
    /// Catalog file name, relative to `data_dir` unless absolute
    pub database_file: PathBuf,
    /// Copied selections, relative to `data_dir` unless absolute
    pub media_dir: PathBuf,
    /// Used when neither the image nor the caller supplies a location
    pub default_location: GeoPoint,
    /// Source stored for remote entries created without a path
    pub remote_placeholder: String,
    /// Fill missing coordinates with `default_location` when loading.
    /// Turning this off keeps unknown locations unknown.
    pub backfill_missing_location: bool,
    /// `prune` keeps unreferenced copies younger than this many seconds
    pub prune_grace_secs: u64,
}

impl Default for GalleryConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            database_file: PathBuf::from("gallery.db"),
            media_dir: PathBuf::from("media"),
            default_location: DEFAULT_LOCATION,
            remote_placeholder: String::new(),
            backfill_missing_location: true,
            prune_grace_secs: DEFAULT_PRUNE_GRACE.as_secs(),
        }
    }
}

impl GalleryConfig {
    /// Load from `path` if given, otherwise from the per-user config file
    /// when one exists. A missing default file is not an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => match default_config_path().filter(|p| p.exists()) {
                Some(path) => Self::from_file(&path),
                None => {
                    debug!("no config file found, using defaults");
                    Ok(Self::default())
                }
            },
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        let config = Self::from_toml(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    pub fn from_toml(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_file)
    }

    pub fn media_path(&self) -> PathBuf {
        self.data_dir.join(&self.media_dir)
    }
}

/// ~/.local/share/gallery on Linux, the platform equivalent elsewhere
fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("gallery")
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("gallery").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_gives_defaults() {
        let config = GalleryConfig::from_toml("").unwrap();
        assert_eq!(config, GalleryConfig::default());
        assert!(config.backfill_missing_location);
        assert_eq!(config.default_location, DEFAULT_LOCATION);
    }

    #[test]
    fn test_partial_file_overrides_fields() {
        let config = GalleryConfig::from_toml(
            r#"
            data_dir = "/srv/gallery"
            backfill_missing_location = false
            prune_grace_secs = 60

            [default_location]
            latitude = 48.8566
            longitude = 2.3522
            "#,
        )
        .unwrap();

        assert_eq!(config.database_path(), PathBuf::from("/srv/gallery/gallery.db"));
        assert_eq!(config.media_path(), PathBuf::from("/srv/gallery/media"));
        assert!(!config.backfill_missing_location);
        assert_eq!(config.prune_grace_secs, 60);
        assert_eq!(config.default_location, GeoPoint::new(48.8566, 2.3522));
    }

    #[test]
    fn test_malformed_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "backfill_missing_location = \"sometimes\"").unwrap();

        assert!(matches!(GalleryConfig::load(Some(&path)), Err(Error::Config(_))));
    }

    #[test]
    fn test_explicit_missing_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = GalleryConfig::load(Some(&dir.path().join("absent.toml")));
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
