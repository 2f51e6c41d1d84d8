use rusqlite::{params, Connection, Row};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use super::data::{GeoPoint, MediaRecord, NewMediaRecord};
use crate::error::{Error, Result};

/// Durable storage for media records.
///
/// Calls may block on disk I/O. The controller only invokes them from
/// blocking worker threads, so implementations need to be `Send + Sync`.
pub trait MediaStore: Send + Sync {
    /// Insert a record and return it with its assigned id
    fn insert(&self, record: NewMediaRecord) -> Result<MediaRecord>;

    /// All records in insertion order
    fn get_all(&self) -> Result<Vec<MediaRecord>>;

    /// Replace title, source, location and remote flag of the record with
    /// the same id. `created_at` is never rewritten.
    fn update(&self, record: &MediaRecord) -> Result<()>;

    /// Remove the record with the same id
    fn delete(&self, record: &MediaRecord) -> Result<()>;
}

/// Schema migrations, applied in order. Index + 1 is the schema version
/// after the step runs. Steps are additive only so that rows written under
/// an older version stay readable.
const MIGRATIONS: &[&str] = &[
    // v1: base table
    "CREATE TABLE IF NOT EXISTS media_items (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        title       TEXT NOT NULL,
        source      TEXT NOT NULL,
        created_at  INTEGER NOT NULL
    );",
    // v2: optional geolocation
    "ALTER TABLE media_items ADD COLUMN latitude REAL DEFAULT NULL;
     ALTER TABLE media_items ADD COLUMN longitude REAL DEFAULT NULL;",
    // v3: remote placeholder flag
    "ALTER TABLE media_items ADD COLUMN is_remote INTEGER NOT NULL DEFAULT 0;",
];

/// Current schema version
pub const SCHEMA_VERSION: u32 = MIGRATIONS.len() as u32;

/// The Library manages the SQLite media catalog.
pub struct Library {
    conn: Mutex<Connection>,
    db_path: Option<PathBuf>,
}

impl Library {
    /// Open (or create) the catalog at `db_path` and bring its schema up
    /// to date. Parent directories are created as needed.
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)?;
        info!(path = %db_path.display(), "catalog opened");

        Self::from_connection(conn, Some(db_path.to_path_buf()))
    }

    /// Catalog that lives only as long as this value (tests, dry runs)
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?, None)
    }

    fn from_connection(mut conn: Connection, db_path: Option<PathBuf>) -> Result<Self> {
        migrate(&mut conn, SCHEMA_VERSION)?;
        Ok(Library {
            conn: Mutex::new(conn),
            db_path,
        })
    }

    /// Get the path to the database file (`None` for in-memory catalogs)
    pub fn path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Get a count of records in the catalog
    pub fn count(&self) -> Result<i64> {
        let count = self
            .conn()
            .query_row("SELECT COUNT(*) FROM media_items", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Schema version recorded in the database file
    pub fn schema_version(&self) -> Result<u32> {
        schema_version(&self.conn())
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // A panic while holding the lock cannot leave SQLite half-written,
        // so a poisoned guard is still usable.
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl MediaStore for Library {
    fn insert(&self, record: NewMediaRecord) -> Result<MediaRecord> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO media_items (title, source, created_at, latitude, longitude, is_remote)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.title,
                record.source,
                record.created_at,
                record.location.map(|p| p.latitude),
                record.location.map(|p| p.longitude),
                record.is_remote,
            ],
        )?;

        let id = conn.last_insert_rowid();
        debug!(id, title = %record.title, "inserted media item");
        Ok(record.with_id(id))
    }

    fn get_all(&self) -> Result<Vec<MediaRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, title, source, created_at, latitude, longitude, is_remote
             FROM media_items
             ORDER BY id ASC",
        )?;

        let records = stmt
            .query_map([], record_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(records)
    }

    fn update(&self, record: &MediaRecord) -> Result<()> {
        let changed = self.conn().execute(
            "UPDATE media_items
             SET title = ?1, source = ?2, latitude = ?3, longitude = ?4, is_remote = ?5
             WHERE id = ?6",
            params![
                record.title,
                record.source,
                record.location.map(|p| p.latitude),
                record.location.map(|p| p.longitude),
                record.is_remote,
                record.id,
            ],
        )?;

        if changed == 0 {
            return Err(Error::NotFound(record.id));
        }
        debug!(id = record.id, "updated media item");
        Ok(())
    }

    fn delete(&self, record: &MediaRecord) -> Result<()> {
        let changed = self
            .conn()
            .execute("DELETE FROM media_items WHERE id = ?1", params![record.id])?;

        if changed == 0 {
            return Err(Error::NotFound(record.id));
        }
        debug!(id = record.id, "deleted media item");
        Ok(())
    }
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<MediaRecord> {
    Ok(MediaRecord {
        id: row.get(0)?,
        title: row.get(1)?,
        source: row.get(2)?,
        created_at: row.get(3)?,
        location: GeoPoint::from_parts(row.get(4)?, row.get(5)?),
        is_remote: row.get(6)?,
    })
}

fn schema_version(conn: &Connection) -> Result<u32> {
    let version = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(version)
}

/// Run every migration between the recorded version and `target`.
/// Each step commits together with its version bump.
fn migrate(conn: &mut Connection, target: u32) -> Result<()> {
    let current = schema_version(conn)?;

    for version in (current + 1)..=target {
        let tx = conn.transaction()?;
        tx.execute_batch(MIGRATIONS[version as usize - 1])?;
        tx.pragma_update(None, "user_version", version)?;
        tx.commit()?;
        info!(version, "catalog schema migrated");
    }

    Ok(())
}

// Implement Debug for better error messages
impl std::fmt::Debug for Library {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Library")
            .field("db_path", &self.db_path)
            .finish()
    }
}
