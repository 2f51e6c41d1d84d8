/// Copying selected images into app-private storage
///
/// A selection is copied before anything reads it so that the record's
/// `source` keeps working after the original is moved or deleted.

use chrono::Utc;
use image::ImageFormat;
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Prefix of every copied selection
const COPY_PREFIX: &str = "selected_image_";

/// Suffix used while a copy is still being written
const PARTIAL_SUFFIX: &str = ".partial";

/// Copies younger than this are left alone by `prune_orphans`
pub const DEFAULT_PRUNE_GRACE: Duration = Duration::from_secs(15 * 60);

/// Serializes the rename fallback for file systems without hard links
static FINALIZE_LOCK: Mutex<()> = Mutex::new(());

/// Copy `source` into `media_dir` under a timestamp-derived unique name.
///
/// The bytes go to an exclusively created `.partial` file first and are
/// linked into place only once fully written, without ever replacing an
/// existing copy. The returned path is always a complete file of this
/// call's bytes, and a failed copy leaves nothing behind.
pub fn copy_into_storage(source: &Path, media_dir: &Path) -> io::Result<PathBuf> {
    copy_into_storage_at(source, media_dir, Utc::now().timestamp_millis())
}

fn copy_into_storage_at(source: &Path, media_dir: &Path, millis: i64) -> io::Result<PathBuf> {
    fs::create_dir_all(media_dir)?;
    let extension = extension_for(source);

    let mut input = File::open(source)?;
    let (slot, partial, mut output) = reserve_partial(media_dir, millis, extension)?;

    let written = io::copy(&mut input, &mut output).and_then(|_| output.sync_all());
    drop(output);
    if let Err(e) = written {
        let _ = fs::remove_file(&partial);
        return Err(e);
    }

    match finalize(&partial, media_dir, millis, slot, extension) {
        Ok(target) => {
            debug!(from = %source.display(), to = %target.display(), "copied selection");
            Ok(target)
        }
        Err(e) => {
            let _ = fs::remove_file(&partial);
            Err(e)
        }
    }
}

/// Extension for the copy: the canonical one for a recognised image format,
/// `jpg` otherwise
fn extension_for(source: &Path) -> &'static str {
    ImageFormat::from_path(source)
        .ok()
        .and_then(|format| format.extensions_str().first().copied())
        .unwrap_or("jpg")
}

/// Slot 0 is `selected_image_<millis>.<ext>`, slot n is `..._<n>.<ext>`
fn candidate(media_dir: &Path, millis: i64, slot: u32, extension: &str) -> PathBuf {
    let name = match slot {
        0 => format!("{}{}.{}", COPY_PREFIX, millis, extension),
        n => format!("{}{}_{}.{}", COPY_PREFIX, millis, n, extension),
    };
    media_dir.join(name)
}

fn partial_for(target: &Path) -> PathBuf {
    let mut partial = target.as_os_str().to_owned();
    partial.push(PARTIAL_SUFFIX);
    PathBuf::from(partial)
}

/// Claim the first slot whose partial file can be created exclusively and
/// whose final name is not taken yet.
fn reserve_partial(media_dir: &Path, millis: i64, extension: &str) -> io::Result<(u32, PathBuf, File)> {
    for slot in 0u32.. {
        let target = candidate(media_dir, millis, slot, extension);
        if target.exists() {
            continue;
        }

        let partial = partial_for(&target);
        match OpenOptions::new().write(true).create_new(true).open(&partial) {
            Ok(file) => return Ok((slot, partial, file)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }
    }
    Err(io::Error::other("no free file name for copy"))
}

/// Move the finished partial to the first free final name at or after
/// `slot`. Hard links fail instead of overwriting, so two writers can never
/// end up on the same name.
fn finalize(partial: &Path, media_dir: &Path, millis: i64, slot: u32, extension: &str) -> io::Result<PathBuf> {
    for slot in slot.. {
        let target = candidate(media_dir, millis, slot, extension);
        match fs::hard_link(partial, &target) {
            Ok(()) => {
                let _ = fs::remove_file(partial);
                return Ok(target);
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(e) => {
                debug!(error = %e, "hard link unavailable, renaming under lock");
                return rename_exclusive(partial, media_dir, millis, slot, extension);
            }
        }
    }
    Err(io::Error::other("no free file name for copy"))
}

fn rename_exclusive(partial: &Path, media_dir: &Path, millis: i64, slot: u32, extension: &str) -> io::Result<PathBuf> {
    let _guard = FINALIZE_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    let target = (slot..)
        .map(|n| candidate(media_dir, millis, n, extension))
        .find(|t| !t.exists())
        .ok_or_else(|| io::Error::other("no free file name for copy"))?;
    fs::rename(partial, &target)?;
    Ok(target)
}

/// Remove copied selections that no record references, plus leftover
/// partial copies. Files modified within `grace` are kept, since they may
/// belong to a selection that is still being copied or not yet published.
/// Files not created by `copy_into_storage` are left alone.
///
/// Returns the number of files removed.
pub fn prune_orphans(media_dir: &Path, referenced: &HashSet<PathBuf>, grace: Duration) -> usize {
    if !media_dir.exists() {
        return 0;
    }

    let now = SystemTime::now();
    let mut removed = 0;
    for entry in WalkDir::new(media_dir)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        let name = entry.file_name().to_string_lossy();
        if !name.starts_with(COPY_PREFIX) {
            continue;
        }

        let is_partial = name.ends_with(PARTIAL_SUFFIX);
        if !is_partial && referenced.contains(entry.path()) {
            continue;
        }

        let age = entry
            .metadata()
            .ok()
            .and_then(|m| m.modified().ok())
            .and_then(|modified| now.duration_since(modified).ok())
            .unwrap_or(Duration::ZERO);
        if age < grace {
            continue;
        }

        match fs::remove_file(entry.path()) {
            Ok(()) => {
                debug!(path = %entry.path().display(), "removed unreferenced copy");
                removed += 1;
            }
            Err(e) => warn!(path = %entry.path().display(), error = %e, "could not remove copy"),
        }
    }

    if removed > 0 {
        info!(removed, "pruned orphaned image copies");
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_lands_in_media_dir_with_same_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("IMG_0001.png");
        fs::write(&source, b"pixels").unwrap();
        let media_dir = dir.path().join("media");

        let copy = copy_into_storage(&source, &media_dir).unwrap();

        assert_eq!(copy.parent().unwrap(), media_dir);
        assert!(copy.file_name().unwrap().to_string_lossy().starts_with(COPY_PREFIX));
        assert_eq!(copy.extension().unwrap(), "png");
        assert_eq!(fs::read(&copy).unwrap(), b"pixels");
    }

    #[test]
    fn test_unknown_extension_defaults_to_jpg() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("picture");
        fs::write(&source, b"data").unwrap();

        let copy = copy_into_storage(&source, dir.path()).unwrap();
        assert_eq!(copy.extension().unwrap(), "jpg");
    }

    #[test]
    fn test_back_to_back_copies_get_distinct_names() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("a.jpg");
        fs::write(&source, b"a").unwrap();
        let media_dir = dir.path().join("media");

        let first = copy_into_storage(&source, &media_dir).unwrap();
        let second = copy_into_storage(&source, &media_dir).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_failed_copy_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let media_dir = dir.path().join("media");

        assert!(copy_into_storage(&dir.path().join("missing.jpg"), &media_dir).is_err());
        assert_eq!(fs::read_dir(&media_dir).unwrap().count(), 0);
    }

    #[test]
    fn test_prune_keeps_referenced_and_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let keep = dir.path().join("selected_image_1.jpg");
        let orphan = dir.path().join("selected_image_2.jpg");
        let partial = dir.path().join("selected_image_3.jpg.partial");
        let foreign = dir.path().join("notes.txt");
        for path in [&keep, &orphan, &partial, &foreign] {
            fs::write(path, b"x").unwrap();
        }

        let referenced: HashSet<PathBuf> = [keep.clone()].into_iter().collect();
        assert_eq!(prune_orphans(dir.path(), &referenced, Duration::ZERO), 2);

        assert!(keep.exists());
        assert!(foreign.exists());
        assert!(!orphan.exists());
        assert!(!partial.exists());
    }

    #[test]
    fn test_prune_missing_dir_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(prune_orphans(&dir.path().join("nope"), &HashSet::new(), Duration::ZERO), 0);
    }

    #[test]
    fn test_same_millisecond_copies_get_distinct_names() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("a.jpg");
        fs::write(&source, b"a").unwrap();
        let media_dir = dir.path().join("media");

        let first = copy_into_storage_at(&source, &media_dir, 1000).unwrap();
        let second = copy_into_storage_at(&source, &media_dir, 1000).unwrap();
        assert_eq!(first, media_dir.join("selected_image_1000.jpg"));
        assert_eq!(second, media_dir.join("selected_image_1000_1.jpg"));
    }

    #[test]
    fn test_concurrent_copies_never_share_or_swap_files() {
        use std::sync::{Arc, Barrier};
        use std::thread;

        let dir = tempfile::tempdir().unwrap();
        let media_dir = dir.path().join("media");
        let sources: Vec<(PathBuf, Vec<u8>)> = (0..2u8)
            .map(|n| {
                let path = dir.path().join(format!("src{}.jpg", n));
                let bytes = vec![n; 64 * 1024];
                fs::write(&path, &bytes).unwrap();
                (path, bytes)
            })
            .collect();

        for round in 0..50i64 {
            let barrier = Arc::new(Barrier::new(2));
            let handles: Vec<_> = sources
                .iter()
                .cloned()
                .map(|(path, bytes)| {
                    let barrier = Arc::clone(&barrier);
                    let media_dir = media_dir.clone();
                    thread::spawn(move || {
                        barrier.wait();
                        (copy_into_storage_at(&path, &media_dir, round).unwrap(), bytes)
                    })
                })
                .collect();

            let copies: Vec<(PathBuf, Vec<u8>)> =
                handles.into_iter().map(|h| h.join().unwrap()).collect();
            assert_ne!(copies[0].0, copies[1].0);
            for (path, bytes) in &copies {
                assert_eq!(&fs::read(path).unwrap(), bytes);
            }
        }

        let leftovers = fs::read_dir(&media_dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(PARTIAL_SUFFIX))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn test_prune_spares_recent_files() {
        let dir = tempfile::tempdir().unwrap();
        let in_flight = dir.path().join("selected_image_5.jpg.partial");
        let fresh = dir.path().join("selected_image_6.jpg");
        let stale = dir.path().join("selected_image_7.jpg.partial");
        for path in [&in_flight, &fresh, &stale] {
            fs::write(path, b"x").unwrap();
        }
        let hour_ago = SystemTime::now() - Duration::from_secs(3600);
        File::options()
            .write(true)
            .open(&stale)
            .unwrap()
            .set_modified(hour_ago)
            .unwrap();

        assert_eq!(prune_orphans(dir.path(), &HashSet::new(), DEFAULT_PRUNE_GRACE), 1);
        assert!(in_flight.exists());
        assert!(fresh.exists());
        assert!(!stale.exists());
    }
}
