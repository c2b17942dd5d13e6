//! SQLite period-matrix cache store.
//!
//! Each chapter's [`PeriodBundle`]s are serialised to JSON and stored in a
//! per-deployment SQLite database. The schema is intentionally simple:
//!
//! ```sql
//! CREATE TABLE IF NOT EXISTS period_bundles (
//!     chapter_id TEXT NOT NULL,
//!     period     TEXT NOT NULL,
//!     data       BLOB NOT NULL,
//!     updated_at TEXT NOT NULL,
//!     checksum   TEXT,
//!     PRIMARY KEY (chapter_id, period)
//! );
//! ```
//!
//! Design notes:
//! - One row holds all four of a period's categories, and `put_bundle` is a
//!   single upsert — regenerating a period replaces the whole bundle at
//!   once, so no reader ever observes a half-updated period.
//! - WAL mode for concurrent reads while an import writes.
//! - JSON inside a BLOB column keeps the schema stable across bundle-shape
//!   changes (forward-compatible).
//! - Optional CRC-32 checksum detects cache corruption.
//! - Backup support via SQLite's online-backup API.

use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::Utc;
use rusqlite::{Connection, OpenFlags, params};
use tracing::{debug, info, warn};

use crate::config::PersistenceConfig;
use crate::error::{RefnetError, Result};
use crate::matrix::PeriodBundle;
use crate::types::{ChapterId, PeriodKey};

// ---------------------------------------------------------------------------
// CRC-32 checksum helper
// ---------------------------------------------------------------------------

/// Compute a CRC-32 checksum of `data` and return it as lowercase hex.
fn crc32_hex(data: &[u8]) -> String {
    let crc = crc32_compute(data);
    format!("{crc:08x}")
}

/// Basic CRC-32 (ISO 3309 / ITU-T V.42) computation.
fn crc32_compute(data: &[u8]) -> u32 {
    const POLY: u32 = 0xEDB8_8320;
    let mut crc: u32 = 0xFFFF_FFFF;
    for &byte in data {
        crc ^= u32::from(byte);
        for _ in 0..8 {
            if crc & 1 == 1 {
                crc = (crc >> 1) ^ POLY;
            } else {
                crc >>= 1;
            }
        }
    }
    !crc
}

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS period_bundles (
    chapter_id TEXT NOT NULL,
    period     TEXT NOT NULL,
    data       BLOB NOT NULL,
    updated_at TEXT NOT NULL,
    checksum   TEXT,
    PRIMARY KEY (chapter_id, period)
);";

// ---------------------------------------------------------------------------
// MatrixStore
// ---------------------------------------------------------------------------

/// Handle to an open SQLite database that caches [`PeriodBundle`]s.
///
/// # Usage
///
/// ```no_run
/// # use refnet_core::store::MatrixStore;
/// # use refnet_core::config::PersistenceConfig;
/// # use refnet_core::types::{ChapterId, PeriodKey};
/// let store = MatrixStore::open("chapter_cache.db", &PersistenceConfig::default())?;
/// let chapter = ChapterId::new();
/// let cached = store.get_bundle(chapter, PeriodKey::new(2026, 5))?;
/// # Ok::<(), refnet_core::error::RefnetError>(())
/// ```
pub struct MatrixStore {
    conn: Connection,
    config: PersistenceConfig,
    db_path: PathBuf,
}

impl std::fmt::Debug for MatrixStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatrixStore")
            .field("db_path", &self.db_path)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl MatrixStore {
    /// Open (or create) an SQLite database at `path`.
    ///
    /// The schema is automatically created if it does not exist.
    /// WAL mode is enabled when `config.wal_mode` is `true`.
    ///
    /// # Errors
    ///
    /// Returns [`RefnetError::Database`] on SQLite failures.
    pub fn open<P: AsRef<Path>>(path: P, config: &PersistenceConfig) -> Result<Self> {
        let db_path = path.as_ref().to_path_buf();
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;

        let conn = Connection::open_with_flags(&db_path, flags)?;

        if config.wal_mode {
            conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        }
        conn.execute_batch("PRAGMA synchronous = NORMAL;")?;
        conn.execute_batch("PRAGMA busy_timeout = 5000;")?;
        conn.execute_batch(SCHEMA)?;

        info!(
            path = %db_path.display(),
            wal = config.wal_mode,
            "Matrix store opened"
        );

        Ok(Self {
            conn,
            config: config.clone(),
            db_path,
        })
    }

    /// Open an in-memory database (useful for tests).
    ///
    /// # Errors
    ///
    /// Returns [`RefnetError::Database`] on SQLite failures.
    pub fn open_in_memory(config: &PersistenceConfig) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;

        Ok(Self {
            conn,
            config: config.clone(),
            db_path: PathBuf::from(":memory:"),
        })
    }

    // ------------------------------------------------------------------
    // Core CRUD
    // ------------------------------------------------------------------

    /// Save (upsert) a period bundle — all four categories in one row.
    ///
    /// The bundle is serialised to JSON. If `config.checksum_enabled` is
    /// true, a CRC-32 of the JSON bytes is stored alongside the data.
    ///
    /// # Errors
    ///
    /// Returns [`RefnetError::Serialization`] if JSON encoding fails, or
    /// [`RefnetError::Database`] on SQLite failures.
    pub fn put_bundle(&self, bundle: &PeriodBundle) -> Result<()> {
        let start = Instant::now();

        let json =
            serde_json::to_vec(bundle).map_err(|e| RefnetError::Serialization(e.to_string()))?;

        let checksum = if self.config.checksum_enabled {
            Some(crc32_hex(&json))
        } else {
            None
        };

        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO period_bundles (chapter_id, period, data, updated_at, checksum)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(chapter_id, period) DO UPDATE SET
                data = excluded.data,
                updated_at = excluded.updated_at,
                checksum = excluded.checksum",
            params![
                bundle.chapter.to_string(),
                bundle.period.to_string(),
                json,
                now,
                checksum
            ],
        )?;

        debug!(
            chapter = %bundle.chapter,
            period = %bundle.period,
            members = bundle.members.len(),
            bytes = json.len(),
            elapsed_us = start.elapsed().as_micros(),
            "Saved period bundle"
        );

        Ok(())
    }

    /// Load a period bundle.
    ///
    /// Returns `None` if no row exists for the given chapter and period —
    /// the aggregator treats that as a zero-contribution period.
    /// If checksums are enabled and the stored checksum doesn't match, a
    /// warning is logged but the data is still returned.
    ///
    /// # Errors
    ///
    /// Returns [`RefnetError::Serialization`] if JSON decoding fails, or
    /// [`RefnetError::Database`] on SQLite failures.
    pub fn get_bundle(&self, chapter: ChapterId, period: PeriodKey) -> Result<Option<PeriodBundle>> {
        let start = Instant::now();

        let mut stmt = self.conn.prepare_cached(
            "SELECT data, checksum FROM period_bundles WHERE chapter_id = ?1 AND period = ?2",
        )?;

        let result: Option<(Vec<u8>, Option<String>)> = stmt
            .query_row(params![chapter.to_string(), period.to_string()], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .optional()?;

        let Some((data, stored_checksum)) = result else {
            return Ok(None);
        };

        if self.config.checksum_enabled {
            if let Some(ref expected) = stored_checksum {
                let actual = crc32_hex(&data);
                if *expected != actual {
                    warn!(
                        chapter = %chapter,
                        period = %period,
                        expected = %expected,
                        actual = %actual,
                        "Checksum mismatch — possible cache corruption"
                    );
                }
            }
        }

        let bundle: PeriodBundle =
            serde_json::from_slice(&data).map_err(|e| RefnetError::Serialization(e.to_string()))?;

        debug!(
            chapter = %chapter,
            period = %period,
            elapsed_us = start.elapsed().as_micros(),
            "Loaded period bundle"
        );

        Ok(Some(bundle))
    }

    /// Load every cached bundle for the given periods, in the order given.
    ///
    /// Absent periods are simply skipped; the caller's completeness metrics
    /// make the gaps visible.
    ///
    /// # Errors
    ///
    /// Returns [`RefnetError::Database`] on SQLite failures.
    pub fn get_bundles(
        &self,
        chapter: ChapterId,
        periods: &[PeriodKey],
    ) -> Result<Vec<PeriodBundle>> {
        let mut bundles = Vec::with_capacity(periods.len());
        for &period in periods {
            if let Some(bundle) = self.get_bundle(chapter, period)? {
                bundles.push(bundle);
            }
        }
        Ok(bundles)
    }

    /// Delete a period bundle.
    ///
    /// Returns `true` if a row was actually deleted.
    ///
    /// # Errors
    ///
    /// Returns [`RefnetError::Database`] on SQLite failures.
    pub fn delete_bundle(&self, chapter: ChapterId, period: PeriodKey) -> Result<bool> {
        let deleted = self.conn.execute(
            "DELETE FROM period_bundles WHERE chapter_id = ?1 AND period = ?2",
            params![chapter.to_string(), period.to_string()],
        )?;
        Ok(deleted > 0)
    }

    /// List the cached periods for a chapter, chronologically sorted.
    ///
    /// # Errors
    ///
    /// Returns [`RefnetError::Database`] on SQLite failures.
    pub fn list_periods(&self, chapter: ChapterId) -> Result<Vec<PeriodKey>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT period FROM period_bundles WHERE chapter_id = ?1")?;

        let rows = stmt.query_map(params![chapter.to_string()], |row| {
            let period: String = row.get(0)?;
            Ok(period)
        })?;

        let mut periods = Vec::new();
        for row in rows {
            let period_str = row?;
            match period_str.parse::<PeriodKey>() {
                Ok(period) => periods.push(period),
                Err(_) => warn!(period = %period_str, "Skipping row with invalid period key"),
            }
        }

        periods.sort();
        Ok(periods)
    }

    /// Return the total number of cached bundles across all chapters.
    ///
    /// # Errors
    ///
    /// Returns [`RefnetError::Database`] on SQLite failures.
    pub fn bundle_count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM period_bundles", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    // ------------------------------------------------------------------
    // Backup
    // ------------------------------------------------------------------

    /// Create a backup of the database to `dest_path` using SQLite's
    /// online-backup API.
    ///
    /// This is safe to call while the database is being read/written.
    ///
    /// # Errors
    ///
    /// Returns [`RefnetError::Database`] on SQLite failures, or
    /// [`RefnetError::Io`] if the destination is not writable.
    pub fn backup<P: AsRef<Path>>(&self, dest_path: P) -> Result<()> {
        let start = Instant::now();
        let mut dest = Connection::open(dest_path.as_ref())?;
        let backup = rusqlite::backup::Backup::new(&self.conn, &mut dest)?;

        backup.run_to_completion(256, std::time::Duration::from_millis(50), None)?;

        info!(
            dest = %dest_path.as_ref().display(),
            elapsed_ms = start.elapsed().as_millis(),
            "Cache backup completed"
        );
        Ok(())
    }

    /// Create a numbered backup alongside the database file, rotating old
    /// backups so that at most `config.backup_count` are kept.
    ///
    /// # Errors
    ///
    /// Returns [`RefnetError::Database`] or [`RefnetError::Io`] on failure.
    pub fn create_rotating_backup(&self) -> Result<()> {
        if self.db_path.as_os_str() == ":memory:" {
            return Ok(());
        }

        let max = self.config.backup_count;
        if max == 0 {
            return Ok(());
        }

        // Rotate existing backups (highest first so we don't overwrite).
        for i in (1..max).rev() {
            let src = self.backup_path(i);
            let dst = self.backup_path(i + 1);
            if src.exists() {
                std::fs::rename(&src, &dst)?;
            }
        }

        let oldest = self.backup_path(max + 1);
        if oldest.exists() {
            std::fs::remove_file(&oldest)?;
        }

        let dest = self.backup_path(1);
        self.backup(&dest)?;

        info!(max_backups = max, "Rotating backup created");
        Ok(())
    }

    /// Path to a numbered backup file (e.g. `chapter_cache.db.bak.1`).
    fn backup_path(&self, n: u32) -> PathBuf {
        let mut p = self.db_path.clone();
        let ext = format!(
            "{}.bak.{n}",
            p.extension()
                .map_or(String::new(), |e| e.to_string_lossy().into_owned())
        );
        p.set_extension(ext);
        p
    }

    // ------------------------------------------------------------------
    // Utility
    // ------------------------------------------------------------------

    /// Return the path to the database file (or `:memory:` for in-memory DBs).
    #[must_use]
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Run an integrity check on the database.
    ///
    /// Returns `Ok(true)` if the database passes the check, `Ok(false)` if
    /// corruption is detected.
    ///
    /// # Errors
    ///
    /// Returns [`RefnetError::Database`] if the check query itself fails.
    pub fn integrity_check(&self) -> Result<bool> {
        let result: String = self
            .conn
            .query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
        Ok(result == "ok")
    }

    /// Reclaim unused space by running `VACUUM`.
    ///
    /// # Errors
    ///
    /// Returns [`RefnetError::Database`] on SQLite failures.
    pub fn vacuum(&self) -> Result<()> {
        self.conn.execute_batch("VACUUM;")?;
        Ok(())
    }
}

/// Extension trait that adds an `.optional()` combinator to `rusqlite::Result`.
///
/// Converts `Err(QueryReturnedNoRows)` into `Ok(None)`.
trait OptionalExt<T> {
    /// Convert `QueryReturnedNoRows` into `Ok(None)`.
    fn optional(self) -> std::result::Result<Option<T>, rusqlite::Error>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> std::result::Result<Option<T>, rusqlite::Error> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::build_period_bundle;
    use crate::types::{Member, RelationshipEvent};

    fn test_config() -> PersistenceConfig {
        PersistenceConfig {
            checksum_enabled: true,
            ..PersistenceConfig::default()
        }
    }

    fn sample_bundle(chapter: ChapterId, period: PeriodKey) -> PeriodBundle {
        let members = vec![
            Member::new(chapter, "Ana", "Brooks"),
            Member::new(chapter, "Cole", "Diaz"),
        ];
        let events = vec![
            RelationshipEvent::referral(chapter, period, members[0].id, members[1].id),
            RelationshipEvent::meeting(chapter, period, members[0].id, members[1].id),
            RelationshipEvent::credit(chapter, period, None, members[0].id, 750.0, ""),
        ];
        build_period_bundle(chapter, period, &members, &events)
            .expect("build")
            .bundle
    }

    #[test]
    fn round_trip_put_get() {
        let store = MatrixStore::open_in_memory(&test_config()).expect("open");
        let chapter = ChapterId::new();
        let period = PeriodKey::new(2026, 5);
        let bundle = sample_bundle(chapter, period);

        store.put_bundle(&bundle).expect("put");
        let loaded = store.get_bundle(chapter, period).expect("get").expect("Some");

        assert_eq!(loaded, bundle);
        assert!(loaded.is_consistent());
    }

    #[test]
    fn absent_period_returns_none() {
        let store = MatrixStore::open_in_memory(&test_config()).expect("open");
        let result = store
            .get_bundle(ChapterId::new(), PeriodKey::new(2026, 1))
            .expect("get");
        assert!(result.is_none());
    }

    #[test]
    fn reput_replaces_the_whole_period() {
        let store = MatrixStore::open_in_memory(&test_config()).expect("open");
        let chapter = ChapterId::new();
        let period = PeriodKey::new(2026, 5);

        store.put_bundle(&sample_bundle(chapter, period)).expect("put 1");

        // Regenerate the period from a different roster; the re-put must
        // replace all four categories together.
        let members = vec![Member::new(chapter, "Zoe", "Quinn")];
        let regenerated = build_period_bundle(chapter, period, &members, &[])
            .expect("build")
            .bundle;
        store.put_bundle(&regenerated).expect("put 2");

        let loaded = store.get_bundle(chapter, period).expect("get").expect("Some");
        assert_eq!(loaded.members, vec!["Zoe Quinn"]);
        assert_eq!(loaded.referral.names, vec!["Zoe Quinn"]);
        assert_eq!(loaded.meeting.names, vec!["Zoe Quinn"]);
        assert_eq!(loaded.combination.names, vec!["Zoe Quinn"]);
        assert!(loaded.credit.totals.is_empty());
        assert_eq!(store.bundle_count().expect("count"), 1);
    }

    #[test]
    fn delete_bundle_works() {
        let store = MatrixStore::open_in_memory(&test_config()).expect("open");
        let chapter = ChapterId::new();
        let period = PeriodKey::new(2026, 5);

        store.put_bundle(&sample_bundle(chapter, period)).expect("put");
        assert!(store.delete_bundle(chapter, period).expect("delete"));
        assert!(!store.delete_bundle(chapter, period).expect("delete again"));
        assert!(store.get_bundle(chapter, period).expect("get").is_none());
    }

    #[test]
    fn list_periods_is_chronological_and_chapter_scoped() {
        let store = MatrixStore::open_in_memory(&test_config()).expect("open");
        let chapter = ChapterId::new();
        let other = ChapterId::new();

        for period in [
            PeriodKey::new(2026, 3),
            PeriodKey::new(2025, 12),
            PeriodKey::new(2026, 1),
        ] {
            store.put_bundle(&sample_bundle(chapter, period)).expect("put");
        }
        store
            .put_bundle(&sample_bundle(other, PeriodKey::new(2026, 2)))
            .expect("put other");

        let periods = store.list_periods(chapter).expect("list");
        assert_eq!(
            periods,
            vec![
                PeriodKey::new(2025, 12),
                PeriodKey::new(2026, 1),
                PeriodKey::new(2026, 3),
            ]
        );
        assert_eq!(store.bundle_count().expect("count"), 4);
    }

    #[test]
    fn get_bundles_skips_absent_periods() {
        let store = MatrixStore::open_in_memory(&test_config()).expect("open");
        let chapter = ChapterId::new();
        let p1 = PeriodKey::new(2026, 1);
        let p3 = PeriodKey::new(2026, 3);

        store.put_bundle(&sample_bundle(chapter, p1)).expect("put");
        store.put_bundle(&sample_bundle(chapter, p3)).expect("put");

        let bundles = store
            .get_bundles(chapter, &[p1, PeriodKey::new(2026, 2), p3])
            .expect("get");
        assert_eq!(bundles.len(), 2);
        assert_eq!(bundles[0].period, p1);
        assert_eq!(bundles[1].period, p3);
    }

    #[test]
    fn integrity_check_passes() {
        let store = MatrixStore::open_in_memory(&test_config()).expect("open");
        assert!(store.integrity_check().expect("check"));
    }

    #[test]
    fn checksum_detection() {
        // Save with checksums, then manually corrupt and reload to verify
        // the warning path. We can't easily assert on tracing output, so we
        // just ensure the load still succeeds (warnings are logged).
        let store = MatrixStore::open_in_memory(&test_config()).expect("open");
        let chapter = ChapterId::new();
        let period = PeriodKey::new(2026, 5);
        store.put_bundle(&sample_bundle(chapter, period)).expect("put");

        store
            .conn
            .execute(
                "UPDATE period_bundles SET checksum = 'deadbeef' WHERE chapter_id = ?1",
                params![chapter.to_string()],
            )
            .expect("corrupt checksum");

        let loaded = store.get_bundle(chapter, period).expect("get").expect("Some");
        assert_eq!(loaded.members.len(), 2);
    }

    #[test]
    fn file_based_open_and_backup() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db_path = dir.path().join("test_refnet.db");
        let config = test_config();

        let store = MatrixStore::open(&db_path, &config).expect("open");
        let chapter = ChapterId::new();
        let period = PeriodKey::new(2026, 5);
        store.put_bundle(&sample_bundle(chapter, period)).expect("put");

        let backup_path = dir.path().join("test_refnet_backup.db");
        store.backup(&backup_path).expect("backup");

        let backup_store = MatrixStore::open(&backup_path, &config).expect("open backup");
        let loaded = backup_store
            .get_bundle(chapter, period)
            .expect("get from backup")
            .expect("Some");
        assert_eq!(loaded.members.len(), 2);
    }

    #[test]
    fn rotating_backup() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db_path = dir.path().join("cache.db");
        let mut config = test_config();
        config.backup_count = 2;

        let store = MatrixStore::open(&db_path, &config).expect("open");
        store
            .put_bundle(&sample_bundle(ChapterId::new(), PeriodKey::new(2026, 5)))
            .expect("put");

        // Create 3 backups, should keep at most 2.
        store.create_rotating_backup().expect("backup 1");
        store.create_rotating_backup().expect("backup 2");
        store.create_rotating_backup().expect("backup 3");

        assert!(dir.path().join("cache.db.bak.1").exists());
        assert!(dir.path().join("cache.db.bak.2").exists());
        assert!(!dir.path().join("cache.db.bak.3").exists());
    }

    #[test]
    fn crc32_basic() {
        // Known test vector: CRC-32 of "123456789" = 0xCBF43926
        let crc = crc32_compute(b"123456789");
        assert_eq!(crc, 0xCBF4_3926);
    }
}
