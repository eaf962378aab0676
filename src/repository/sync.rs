// src/repository/sync.rs

//! Sync pipeline
//!
//! Both inputs are read completely before the store is touched, so a
//! failed download or unreadable pacman database leaves the store as it
//! was. Writes happen in two transactions (upstream, then system packages)
//! bracketed by the `build_status` flag: it reads `in_progress` from the
//! first write until both passes have committed.
//!
//! A full rebuild is the incremental algorithm run against freshly
//! recreated, empty tables.

use super::feed::{FeedFile, FeedRecord, FeedSource};
use super::parsers::{PacmanSource, SystemSnapshot, SystemSource};
use crate::config::Config;
use crate::db::models::{BuildMetadata, BuildStatus, ExtendedAttributes, Package, UPSTREAM_SOURCE};
use crate::db::{self, PackageDb, schema};
use crate::error::Result;
use crate::jobs::CancelToken;
use crate::packages::normalize;
use crate::resolver::InstalledState;
use rusqlite::Connection;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

/// Fields whose change makes an upstream record worth re-ingesting
#[derive(Debug, Clone, PartialEq, Eq)]
struct UpstreamFingerprint {
    last_modified: Option<i64>,
    maintainer: Option<String>,
    out_of_date: Option<i64>,
    num_votes: Option<i64>,
    co_maintainers: Vec<String>,
}

impl UpstreamFingerprint {
    fn new(
        last_modified: Option<i64>,
        maintainer: Option<String>,
        out_of_date: Option<i64>,
        num_votes: Option<i64>,
        mut co_maintainers: Vec<String>,
    ) -> Self {
        co_maintainers.sort();
        co_maintainers.dedup();
        Self {
            last_modified,
            maintainer,
            out_of_date,
            num_votes,
            co_maintainers,
        }
    }
}

impl From<&FeedRecord> for UpstreamFingerprint {
    fn from(record: &FeedRecord) -> Self {
        Self::new(
            record.last_modified,
            record.maintainer.clone(),
            record.out_of_date,
            record.num_votes,
            record.co_maintainers.clone(),
        )
    }
}

/// What one pass wrote
#[derive(Debug, Default)]
struct PassOutcome {
    written: usize,
    deleted: usize,
    touched: HashSet<String>,
}

impl PassOutcome {
    fn merge(mut self, other: PassOutcome) -> Self {
        self.written += other.written;
        self.deleted += other.deleted;
        self.touched.extend(other.touched);
        self
    }
}

/// Owns the two inputs of the pipeline
pub struct Synchronizer {
    feed: Box<dyn FeedSource + Send + Sync>,
    system: Box<dyn SystemSource + Send + Sync>,
}

impl Synchronizer {
    pub fn new(
        feed: impl FeedSource + Send + Sync + 'static,
        system: impl SystemSource + Send + Sync + 'static,
    ) -> Self {
        Self {
            feed: Box::new(feed),
            system: Box::new(system),
        }
    }

    /// Cached feed file plus the host's pacman databases
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            FeedFile::from_config(config),
            PacmanSource::new(&config.pacman_db, &config.pacman_conf),
        )
    }

    /// What the system currently has installed
    pub fn installed_state(&self) -> Result<InstalledState> {
        Ok(self.system.snapshot()?.installed_state())
    }

    /// Verify the store, rebuilding it from scratch when it is missing,
    /// unreadable, from another schema version, or left incomplete.
    ///
    /// Returns whether a rebuild ran.
    pub fn ensure_store(&self, db: &PackageDb) -> Result<bool> {
        let reason = db.with_lock(|path| {
            if !path.exists() {
                return Ok(Some("store missing"));
            }

            let check = db::open(path).and_then(|conn| {
                if !schema::is_current(&conn)? {
                    return Ok(Some("schema version changed"));
                }
                if BuildMetadata::build_status(&conn)? != BuildStatus::Complete {
                    return Ok(Some("previous build incomplete"));
                }
                Ok(None)
            });

            match check {
                Ok(reason) => Ok(reason),
                Err(e) => {
                    warn!("Store at {} is unreadable ({}), discarding it", path.display(), e);
                    db::remove_files(path)?;
                    Ok(Some("store unreadable"))
                }
            }
        })?;

        match reason {
            Some(reason) => {
                info!("Rebuilding store: {}", reason);
                self.rebuild(db, true, false)?;
                Ok(true)
            }
            None => {
                debug!("Store at {} is valid", db.path().display());
                Ok(false)
            }
        }
    }

    /// Rebuild (`full`) or incrementally update the store. Returns the
    /// number of packages inserted or updated.
    pub fn rebuild(&self, db: &PackageDb, full: bool, download: bool) -> Result<usize> {
        self.rebuild_cancellable(db, full, download, &CancelToken::new())
    }

    /// [`rebuild`](Self::rebuild) that gives up after fetching if `token`
    /// was cancelled. Once writing starts it runs to completion.
    pub fn rebuild_cancellable(
        &self,
        db: &PackageDb,
        full: bool,
        download: bool,
        token: &CancelToken,
    ) -> Result<usize> {
        info!("Starting {} sync", if full { "full" } else { "incremental" });

        let records = self.feed.fetch(download)?;
        let snapshot = self.system.snapshot()?;
        token.check("fetch")?;

        let (full, outcome) = db.with_init_connection("rebuild", |conn| {
            apply(conn, &records, &snapshot, full)
        })?;

        if full {
            db.clear_cache()?;
        } else {
            db.invalidate(outcome.touched.iter().map(String::as_str))?;
        }

        info!(
            "Sync complete: {} packages inserted or updated, {} removed",
            outcome.written, outcome.deleted
        );
        Ok(outcome.written)
    }
}

/// Write both passes, bracketed by the build status flag
fn apply(
    conn: &mut Connection,
    records: &[FeedRecord],
    snapshot: &SystemSnapshot,
    full: bool,
) -> Result<(bool, PassOutcome)> {
    let full = if !full && !schema::is_current(conn)? {
        warn!("Schema version changed, upgrading incremental sync to a full rebuild");
        true
    } else {
        full
    };

    if full {
        schema::recreate(conn)?;
    }
    BuildMetadata::set_build_status(conn, BuildStatus::InProgress)?;

    let upstream = db::transaction(conn, |tx| sync_upstream(tx, records))?;
    info!(
        "Upstream pass: {} written, {} removed",
        upstream.written, upstream.deleted
    );

    let system = db::transaction(conn, |tx| sync_system(tx, snapshot))?;
    info!(
        "System pass: {} written, {} removed",
        system.written, system.deleted
    );

    BuildMetadata::set_build_status(conn, BuildStatus::Complete)?;
    Ok((full, upstream.merge(system)))
}

fn stored_upstream(conn: &Connection) -> Result<HashMap<String, UpstreamFingerprint>> {
    let mut stmt = conn.prepare(
        "SELECT name, last_modified, maintainer, out_of_date, num_votes, metadata
         FROM packages WHERE source = ?1",
    )?;

    let rows = stmt
        .query_map([UPSTREAM_SOURCE], |row| {
            let metadata: Option<String> = row.get(5)?;
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<i64>>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<i64>>(3)?,
                row.get::<_, Option<i64>>(4)?,
                metadata,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows
        .into_iter()
        .map(|(name, last_modified, maintainer, out_of_date, num_votes, metadata)| {
            let co_maintainers = ExtendedAttributes::from_json(metadata.as_deref()).co_maintainers;
            (
                name,
                UpstreamFingerprint::new(last_modified, maintainer, out_of_date, num_votes, co_maintainers),
            )
        })
        .collect())
}

/// Delete vanished upstream rows, re-ingest new and changed ones
fn sync_upstream(conn: &Connection, records: &[FeedRecord]) -> Result<PassOutcome> {
    let stored = stored_upstream(conn)?;
    let current: HashSet<&str> = records.iter().map(|r| r.name.as_str()).collect();
    let mut outcome = PassOutcome::default();

    for name in stored.keys().filter(|name| !current.contains(name.as_str())) {
        debug!("Removing upstream package {}", name);
        Package::delete(conn, name, UPSTREAM_SOURCE)?;
        outcome.deleted += 1;
        outcome.touched.insert(name.clone());
    }

    for record in records {
        let fingerprint = UpstreamFingerprint::from(record);
        if stored.get(&record.name) == Some(&fingerprint) {
            continue;
        }

        normalize(record).store(conn).inspect_err(|e| {
            warn!("Failed to store upstream package {}: {}", record.name, e);
        })?;
        outcome.written += 1;
        outcome.touched.insert(record.name.clone());
    }

    BuildMetadata::set(
        conn,
        BuildMetadata::LAST_UPSTREAM_SYNC,
        &chrono::Utc::now().to_rfc3339(),
    )?;
    Ok(outcome)
}

fn stored_system(conn: &Connection) -> Result<HashSet<(String, String, String)>> {
    let mut stmt =
        conn.prepare("SELECT name, COALESCE(version, ''), source FROM packages WHERE source != ?1")?;

    let triples = stmt
        .query_map([UPSTREAM_SOURCE], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
        .collect::<std::result::Result<HashSet<_>, _>>()?;

    Ok(triples)
}

/// Diff `(name, version, source)` triples: delete what vanished, then
/// upsert what appeared
fn sync_system(conn: &Connection, snapshot: &SystemSnapshot) -> Result<PassOutcome> {
    let stored = stored_system(conn)?;
    let current: HashSet<(String, String, String)> = snapshot.triples().into_iter().collect();
    let mut outcome = PassOutcome::default();

    for (name, version, source) in stored.difference(&current) {
        debug!("Removing {} {} from {}", name, version, source);
        Package::delete(conn, name, source)?;
        outcome.deleted += 1;
        outcome.touched.insert(name.clone());
    }

    for (pkg, triple) in snapshot.packages.iter().zip(snapshot.triples()) {
        if stored.contains(&triple) {
            continue;
        }

        normalize(pkg).store(conn).inspect_err(|e| {
            warn!("Failed to store {} from {}: {}", pkg.name, triple.2, e);
        })?;
        outcome.written += 1;
        outcome.touched.insert(pkg.name.clone());
    }

    BuildMetadata::set(
        conn,
        BuildMetadata::LAST_SYSTEM_SYNC,
        &chrono::Utc::now().to_rfc3339(),
    )?;
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{Link, LinkType};
    use crate::error::Error;
    use crate::repository::SystemPackage;
    use std::sync::{Arc, Mutex};
    use tempfile::tempdir;

    #[derive(Clone, Default)]
    struct MemoryFeed(Arc<Mutex<Option<Vec<FeedRecord>>>>);

    impl MemoryFeed {
        fn set(&self, records: Option<Vec<FeedRecord>>) {
            *self.0.lock().unwrap() = records;
        }
    }

    impl FeedSource for MemoryFeed {
        fn fetch(&self, _download: bool) -> Result<Vec<FeedRecord>> {
            self.0
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| Error::DownloadError("offline".to_string()))
        }
    }

    #[derive(Clone, Default)]
    struct MemorySystem(Arc<Mutex<Vec<(String, Vec<SystemPackage>)>>>);

    impl SystemSource for MemorySystem {
        fn snapshot(&self) -> Result<SystemSnapshot> {
            Ok(SystemSnapshot::assemble(self.0.lock().unwrap().clone(), Vec::new()))
        }
    }

    fn record(name: &str, last_modified: i64) -> FeedRecord {
        FeedRecord {
            name: name.to_string(),
            version: "1.0-1".to_string(),
            last_modified: Some(last_modified),
            depends: vec!["glibc".to_string()],
            ..Default::default()
        }
    }

    fn setup() -> (tempfile::TempDir, PackageDb, MemoryFeed, MemorySystem, Synchronizer) {
        let dir = tempdir().unwrap();
        let db = PackageDb::new(dir.path().join("packages.db"), 16);
        let feed = MemoryFeed::default();
        let system = MemorySystem::default();
        let sync = Synchronizer::new(feed.clone(), system.clone());
        (dir, db, feed, system, sync)
    }

    #[test]
    fn test_incremental_skips_unchanged() {
        let (_dir, db, feed, system, sync) = setup();
        feed.set(Some(vec![record("a", 1), record("b", 1)]));
        *system.0.lock().unwrap() = vec![(
            "core".to_string(),
            vec![SystemPackage::new("glibc", "2.40-1")],
        )];

        assert_eq!(sync.rebuild(&db, true, false).unwrap(), 3);
        assert_eq!(sync.rebuild(&db, false, false).unwrap(), 0);

        feed.set(Some(vec![record("a", 2), record("c", 1)]));
        assert_eq!(sync.rebuild(&db, false, false).unwrap(), 2);

        let names: Vec<String> = db
            .with_connection("names", |conn| {
                let mut stmt = conn.prepare("SELECT name FROM packages WHERE source = 'aur' ORDER BY name")?;
                let names = stmt
                    .query_map([], |row| row.get(0))?
                    .collect::<std::result::Result<Vec<String>, _>>()?;
                Ok(names)
            })
            .unwrap();
        assert_eq!(names, vec!["a".to_string(), "c".to_string()]);

        db.with_connection("timestamps", |conn| {
            assert!(BuildMetadata::get(conn, BuildMetadata::LAST_UPSTREAM_SYNC)?.is_some());
            assert!(BuildMetadata::get(conn, BuildMetadata::LAST_SYSTEM_SYNC)?.is_some());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_co_maintainer_change_is_detected() {
        let (_dir, db, feed, _system, sync) = setup();
        let mut rec = record("a", 1);
        rec.co_maintainers = vec!["x".to_string(), "y".to_string()];
        feed.set(Some(vec![rec.clone()]));
        sync.rebuild(&db, true, false).unwrap();

        rec.co_maintainers = vec!["y".to_string(), "x".to_string()];
        feed.set(Some(vec![rec.clone()]));
        assert_eq!(sync.rebuild(&db, false, false).unwrap(), 0);

        rec.co_maintainers = vec!["x".to_string()];
        feed.set(Some(vec![rec]));
        assert_eq!(sync.rebuild(&db, false, false).unwrap(), 1);
    }

    #[test]
    fn test_system_version_change_replaces_row() {
        let (_dir, db, feed, system, sync) = setup();
        feed.set(Some(Vec::new()));
        *system.0.lock().unwrap() = vec![(
            "core".to_string(),
            vec![SystemPackage::new("bash", "5.2-1")],
        )];
        sync.rebuild(&db, true, false).unwrap();

        *system.0.lock().unwrap() = vec![(
            "core".to_string(),
            vec![SystemPackage::new("bash", "5.3-1")],
        )];
        assert_eq!(sync.rebuild(&db, false, false).unwrap(), 1);

        let info = db.package_info("bash", None).unwrap().unwrap();
        assert_eq!(info.package.version, "5.3-1");
        assert_eq!(info.provides, vec!["bash=5.3".to_string()]);
    }

    #[test]
    fn test_failed_fetch_leaves_store_untouched() {
        let (_dir, db, feed, _system, sync) = setup();
        feed.set(Some(vec![record("a", 1)]));
        sync.rebuild(&db, true, false).unwrap();

        feed.set(None);
        assert!(sync.rebuild(&db, true, false).is_err());

        db.with_connection("check", |conn| {
            assert_eq!(BuildMetadata::build_status(conn)?, BuildStatus::Complete);
            assert_eq!(Package::count(conn)?, 1);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_cancel_after_fetch_writes_nothing() {
        let (_dir, db, feed, _system, sync) = setup();
        feed.set(Some(vec![record("a", 1)]));

        let token = CancelToken::new();
        token.cancel();
        let result = sync.rebuild_cancellable(&db, true, false, &token);

        assert!(matches!(result, Err(Error::Cancelled("fetch"))));
        assert!(!db.path().exists());
    }

    #[test]
    fn test_ensure_store_rebuilds_once() {
        let (_dir, db, feed, _system, sync) = setup();
        feed.set(Some(vec![record("a", 1)]));

        assert!(sync.ensure_store(&db).unwrap());
        assert!(!sync.ensure_store(&db).unwrap());
    }

    #[test]
    fn test_ensure_store_repairs_incomplete_and_corrupt() {
        let (_dir, db, feed, _system, sync) = setup();
        feed.set(Some(vec![record("a", 1)]));
        sync.ensure_store(&db).unwrap();

        db.with_connection("interrupt", |conn| {
            BuildMetadata::set_build_status(conn, BuildStatus::InProgress)
        })
        .unwrap();
        assert!(sync.ensure_store(&db).unwrap());

        std::fs::write(db.path(), vec![b'x'; 4096]).unwrap();
        assert!(sync.ensure_store(&db).unwrap());
        assert!(db.package_info("a", None).unwrap().is_some());
    }

    #[test]
    fn test_schema_mismatch_forces_rebuild() {
        let (_dir, db, feed, _system, sync) = setup();
        feed.set(Some(vec![record("a", 1)]));
        sync.ensure_store(&db).unwrap();

        db.with_connection("downgrade", |conn| {
            conn.execute_batch("PRAGMA user_version = 1")?;
            Ok(())
        })
        .unwrap();
        assert!(sync.ensure_store(&db).unwrap());

        db.with_connection("links", |conn| {
            assert_eq!(
                Link::targets(conn, "a", "aur", LinkType::Depends)?,
                vec!["glibc".to_string()]
            );
            Ok(())
        })
        .unwrap();
    }
}
