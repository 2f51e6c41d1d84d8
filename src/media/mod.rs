/// Image file handling module
///
/// This module handles:
/// - Copying selected images into app-private storage
/// - Reading embedded GPS metadata from those copies
/// - Sweeping copies that never made it into the catalog

pub mod geotag;
pub mod import;
