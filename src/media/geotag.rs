/// Geotag extraction
///
/// Reads the GPS IFD of an image's EXIF block and turns the
/// degrees/minutes/seconds rationals into a decimal `GeoPoint`.

use exif::{Exif, In, Tag, Value};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::{debug, warn};

use crate::state::data::GeoPoint;

/// Something that can find the coordinates an image was taken at.
///
/// Implementations never fail: unreadable files, missing metadata and
/// malformed tags all come back as `None`.
pub trait GeotagExtractor: Send + Sync {
    fn extract_location(&self, image: &Path) -> Option<GeoPoint>;
}

/// EXIF based extractor (JPEG, TIFF, HEIF, PNG, WebP containers)
#[derive(Debug, Default, Clone, Copy)]
pub struct ExifGeotagger;

impl GeotagExtractor for ExifGeotagger {
    fn extract_location(&self, image: &Path) -> Option<GeoPoint> {
        let file = match File::open(image) {
            Ok(file) => file,
            Err(e) => {
                warn!(path = %image.display(), error = %e, "could not open image for metadata");
                return None;
            }
        };

        let exif = match exif::Reader::new().read_from_container(&mut BufReader::new(file)) {
            Ok(exif) => exif,
            Err(e) => {
                debug!(path = %image.display(), error = %e, "no readable EXIF data");
                return None;
            }
        };

        let location = location_from_exif(&exif);
        match location {
            Some(point) => debug!(
                path = %image.display(),
                latitude = point.latitude,
                longitude = point.longitude,
                "extracted geotag"
            ),
            None => debug!(path = %image.display(), "image carries no GPS location"),
        }
        location
    }
}

fn location_from_exif(exif: &Exif) -> Option<GeoPoint> {
    let latitude = signed_coordinate(exif, Tag::GPSLatitude, Tag::GPSLatitudeRef, b'S')?;
    let longitude = signed_coordinate(exif, Tag::GPSLongitude, Tag::GPSLongitudeRef, b'W')?;

    let point = GeoPoint::new(latitude, longitude);
    point.is_in_range().then_some(point)
}

/// Decimal degrees for one axis, negated when the reference tag names the
/// southern/western hemisphere. A missing reference means north/east.
fn signed_coordinate(exif: &Exif, value_tag: Tag, ref_tag: Tag, negative: u8) -> Option<f64> {
    let field = exif.get_field(value_tag, In::PRIMARY)?;
    let degrees = dms_to_degrees(&field.value)?;

    let hemisphere = exif
        .get_field(ref_tag, In::PRIMARY)
        .and_then(|f| match f.value {
            Value::Ascii(ref parts) => parts.first().and_then(|s| s.first().copied()),
            _ => None,
        })
        .map(|c| c.to_ascii_uppercase());

    Some(if hemisphere == Some(negative) { -degrees } else { degrees })
}

fn dms_to_degrees(value: &Value) -> Option<f64> {
    let parts = match value {
        Value::Rational(parts) if !parts.is_empty() => parts,
        _ => return None,
    };

    let degrees = parts
        .iter()
        .take(3)
        .zip([1.0, 60.0, 3600.0])
        .map(|(part, divisor)| part.to_f64() / divisor)
        .sum::<f64>();

    degrees.is_finite().then_some(degrees)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Minimal little-endian TIFF whose only content is a GPS IFD.
    /// Each coordinate is given as three (numerator, denominator) pairs.
    pub(crate) fn gps_tiff(
        lat_ref: u8,
        lat: [(u32, u32); 3],
        lon_ref: u8,
        lon: [(u32, u32); 3],
    ) -> Vec<u8> {
        const GPS_IFD: u32 = 26;
        const LAT_DATA: u32 = 80;
        const LON_DATA: u32 = 104;

        fn entry(out: &mut Vec<u8>, tag: u16, kind: u16, count: u32, value: [u8; 4]) {
            out.extend_from_slice(&tag.to_le_bytes());
            out.extend_from_slice(&kind.to_le_bytes());
            out.extend_from_slice(&count.to_le_bytes());
            out.extend_from_slice(&value);
        }

        let mut out = Vec::new();
        out.extend_from_slice(b"II*\0");
        out.extend_from_slice(&8u32.to_le_bytes());

        // IFD0: pointer to the GPS IFD
        out.extend_from_slice(&1u16.to_le_bytes());
        entry(&mut out, 0x8825, 4, 1, GPS_IFD.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());

        // GPS IFD
        out.extend_from_slice(&4u16.to_le_bytes());
        entry(&mut out, 0x0001, 2, 2, [lat_ref, 0, 0, 0]);
        entry(&mut out, 0x0002, 5, 3, LAT_DATA.to_le_bytes());
        entry(&mut out, 0x0003, 2, 2, [lon_ref, 0, 0, 0]);
        entry(&mut out, 0x0004, 5, 3, LON_DATA.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());

        for (num, denom) in lat.into_iter().chain(lon) {
            out.extend_from_slice(&num.to_le_bytes());
            out.extend_from_slice(&denom.to_le_bytes());
        }

        out
    }

    fn write_temp(dir: &tempfile::TempDir, name: &str, bytes: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn test_reads_northern_eastern_coordinates() {
        let dir = tempfile::tempdir().unwrap();
        let bytes = gps_tiff(b'N', [(52, 1), (32, 1), (45582, 1000)], b'E', [(13, 1), (21, 1), (41, 10)]);
        let path = write_temp(&dir, "berlin.tif", &bytes);

        let point = ExifGeotagger.extract_location(&path).unwrap();
        assert!((point.latitude - 52.545995).abs() < 1e-6);
        assert!((point.longitude - (13.0 + 21.0 / 60.0 + 4.1 / 3600.0)).abs() < 1e-6);
    }

    #[test]
    fn test_southern_western_hemispheres_are_negative() {
        let dir = tempfile::tempdir().unwrap();
        let bytes = gps_tiff(b'S', [(33, 1), (52, 1), (0, 1)], b'W', [(70, 1), (30, 1), (0, 1)]);
        let path = write_temp(&dir, "south.tif", &bytes);

        let point = ExifGeotagger.extract_location(&path).unwrap();
        assert!((point.latitude + (33.0 + 52.0 / 60.0)).abs() < 1e-9);
        assert!((point.longitude + 70.5).abs() < 1e-9);
    }

    #[test]
    fn test_out_of_range_latitude_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let bytes = gps_tiff(b'N', [(95, 1), (0, 1), (0, 1)], b'E', [(10, 1), (0, 1), (0, 1)]);
        let path = write_temp(&dir, "bogus.tif", &bytes);

        assert_eq!(ExifGeotagger.extract_location(&path), None);
    }

    #[test]
    fn test_zero_denominator_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let bytes = gps_tiff(b'N', [(52, 0), (0, 1), (0, 1)], b'E', [(10, 1), (0, 1), (0, 1)]);
        let path = write_temp(&dir, "divzero.tif", &bytes);

        assert_eq!(ExifGeotagger.extract_location(&path), None);
    }

    #[test]
    fn test_non_image_and_missing_files_degrade_to_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_temp(&dir, "notes.jpg", b"definitely not a jpeg");

        assert_eq!(ExifGeotagger.extract_location(&path), None);
        assert_eq!(ExifGeotagger.extract_location(&dir.path().join("missing.jpg")), None);
    }
}
