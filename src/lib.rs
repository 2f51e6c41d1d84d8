//! Gallery core
//!
//! Media catalog, geotag extraction and the observable view state that a
//! gallery front end renders from.

pub mod config;
pub mod error;
pub mod media;
pub mod state;

pub use config::GalleryConfig;
pub use error::{Error, Result};
pub use state::controller::{GalleryState, MediaController};
pub use state::data::{FilterMode, GeoPoint, MediaRecord};
