/// Shared data structures for the gallery state
///
/// These structs represent the data model that flows between
/// the database layer, the controller and whatever front end observes it.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A latitude/longitude pair in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// Build a point from two nullable columns.
    /// Half a coordinate pair is treated as no location at all.
    pub fn from_parts(latitude: Option<f64>, longitude: Option<f64>) -> Option<Self> {
        match (latitude, longitude) {
            (Some(latitude), Some(longitude)) => Some(Self { latitude, longitude }),
            _ => None,
        }
    }

    /// 0.0 on either axis is the "no location" sentinel some code paths write
    pub fn is_sentinel(&self) -> bool {
        self.latitude == 0.0 || self.longitude == 0.0
    }

    pub fn is_in_range(&self) -> bool {
        (-90.0..=90.0).contains(&self.latitude) && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// Represents a single entry in the gallery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaRecord {
    /// Unique database ID, assigned on insert and never reused
    pub id: i64,
    /// Display title (never empty)
    pub title: String,
    /// Absolute local file path or remote URL
    pub source: String,
    /// Milliseconds since the Unix epoch, immutable after creation
    pub created_at: i64,
    pub location: Option<GeoPoint>,
    /// Remote placeholder image rather than a local copy
    pub is_remote: bool,
}

impl MediaRecord {
    /// True when the record can be plotted on a map
    pub fn has_location(&self) -> bool {
        self.location.is_some_and(|point| !point.is_sentinel())
    }
}

/// A record that has not been inserted yet
#[derive(Debug, Clone, PartialEq)]
pub struct NewMediaRecord {
    pub title: String,
    pub source: String,
    pub created_at: i64,
    pub location: Option<GeoPoint>,
    pub is_remote: bool,
}

impl NewMediaRecord {
    /// Attach the store-assigned id
    pub fn with_id(self, id: i64) -> MediaRecord {
        MediaRecord {
            id,
            title: self.title,
            source: self.source,
            created_at: self.created_at,
            location: self.location,
            is_remote: self.is_remote,
        }
    }
}

/// Which subset of records the list view shows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterMode {
    #[default]
    All,
    Local,
    Remote,
}

impl FilterMode {
    pub fn matches(&self, record: &MediaRecord) -> bool {
        match self {
            FilterMode::All => true,
            FilterMode::Local => !record.is_remote,
            FilterMode::Remote => record.is_remote,
        }
    }

    /// Records passing this filter, in their original order
    pub fn apply(&self, records: &[MediaRecord]) -> Vec<MediaRecord> {
        records.iter().filter(|r| self.matches(r)).cloned().collect()
    }
}

impl std::str::FromStr for FilterMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "all" => Ok(FilterMode::All),
            "local" => Ok(FilterMode::Local),
            "remote" => Ok(FilterMode::Remote),
            other => Err(format!("unknown filter '{}' (expected all, local or remote)", other)),
        }
    }
}

/// Trim a user-entered title and reject blank input.
/// Front ends call this before handing a title to the controller.
pub fn validate_title(title: &str) -> Result<String> {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidTitle);
    }
    Ok(trimmed.to_string())
}
