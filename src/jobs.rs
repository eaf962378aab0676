// src/jobs.rs

//! Off-thread execution of long store operations
//!
//! Rebuilds, dependency resolution and detail enrichment all block on the
//! store lock and on I/O, so callers on an async runtime hand them to
//! `spawn_blocking`. Rapid re-selection is handled cooperatively: each
//! request carries a [`CancelToken`], and [`LatestOnly`] cancels the previous
//! token whenever a new request starts.

use crate::config::Config;
use crate::db::PackageDb;
use crate::error::{Error, Result};
use crate::query::{self, SearchRequest, SearchResult};
use crate::repository::Synchronizer;
use crate::resolver::{self, InstalledState, PackageDetails, Resolution};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

/// Shared flag checked between the phases of a job
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Fail with [`Error::Cancelled`] once the token is cancelled
    pub fn check(&self, phase: &'static str) -> Result<()> {
        if self.is_cancelled() {
            debug!("Job cancelled after {}", phase);
            return Err(Error::Cancelled(phase));
        }
        Ok(())
    }
}

/// Hands out one token per request and cancels the one before it
#[derive(Debug, Default)]
pub struct LatestOnly {
    current: Mutex<Option<CancelToken>>,
}

impl LatestOnly {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token for a new request; the previous request's token is cancelled
    pub fn begin(&self) -> CancelToken {
        let token = CancelToken::new();
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = current.replace(token.clone()) {
            previous.cancel();
        }
        token
    }

    /// Cancel whatever is in flight
    pub fn cancel(&self) {
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = current.take() {
            previous.cancel();
        }
    }
}

/// Runs a call only once input has been quiet for `delay`.
///
/// Every call takes a ticket; after sleeping, only the holder of the newest
/// ticket runs. Older calls return `None`.
#[derive(Debug)]
pub struct Debouncer {
    delay: Duration,
    latest: AtomicU64,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            latest: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.search_debounce)
    }

    pub async fn call<T>(&self, operation: impl FnOnce() -> T) -> Option<T> {
        let ticket = self.latest.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(self.delay).await;

        if self.latest.load(Ordering::SeqCst) != ticket {
            return None;
        }
        Some(operation())
    }
}

/// Rebuild or update the store in the background
pub fn spawn_rebuild(
    sync: Arc<Synchronizer>,
    db: Arc<PackageDb>,
    full: bool,
    download: bool,
    token: CancelToken,
) -> JoinHandle<Result<usize>> {
    tokio::task::spawn_blocking(move || sync.rebuild_cancellable(&db, full, download, &token))
}

/// Resolve an install order in the background
pub fn spawn_resolve(
    db: Arc<PackageDb>,
    installed: Arc<InstalledState>,
    names: Vec<String>,
    deep: bool,
    token: CancelToken,
) -> JoinHandle<Result<Resolution>> {
    tokio::task::spawn_blocking(move || {
        let resolution = resolver::resolve_dependency_tree(db.as_ref(), &installed, &names, deep)?;
        token.check("resolve")?;
        Ok(resolution)
    })
}

/// Load a package with providers and dependants in the background
pub fn spawn_enrich(
    db: Arc<PackageDb>,
    installed: Arc<InstalledState>,
    name: String,
    source: Option<String>,
    token: CancelToken,
) -> JoinHandle<Result<Option<PackageDetails>>> {
    tokio::task::spawn_blocking(move || {
        resolver::package_details(&db, &name, source.as_deref(), &installed, &token)
    })
}

/// Debounced search; `Ok(None)` when a newer search superseded this one
pub async fn debounced_search(
    debouncer: &Debouncer,
    db: Arc<PackageDb>,
    request: SearchRequest,
) -> Result<Option<Vec<SearchResult>>> {
    let Some(handle) = debouncer
        .call(|| tokio::task::spawn_blocking(move || query::search(&db, &request)))
        .await
    else {
        return Ok(None);
    };

    let results = handle
        .await
        .map_err(|e| Error::JobFailed(e.to_string()))??;
    Ok(Some(results))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{Package, Source};
    use tempfile::tempdir;

    fn seeded(dir: &std::path::Path) -> Arc<PackageDb> {
        let db = PackageDb::new(dir.join("packages.db"), 16);
        db.with_init_connection("seed", |conn| {
            Package::new("yay".to_string(), Source::Upstream, "12.0-1".to_string()).upsert(conn)?;
            Package::new("yay-bin".to_string(), Source::Upstream, "12.0-1".to_string()).upsert(conn)
        })
        .unwrap();
        Arc::new(db)
    }

    #[test]
    fn test_cancel_token_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(token.check("fetch").is_ok());

        clone.cancel();
        assert!(token.is_cancelled());
        assert!(matches!(token.check("lookup"), Err(Error::Cancelled("lookup"))));
    }

    #[test]
    fn test_latest_only_cancels_previous() {
        let latest = LatestOnly::new();
        let first = latest.begin();
        let second = latest.begin();

        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());

        latest.cancel();
        assert!(second.is_cancelled());
    }

    #[tokio::test]
    async fn test_debouncer_runs_latest_only() {
        let debouncer = Debouncer::new(Duration::from_millis(20));

        let (first, second) = tokio::join!(debouncer.call(|| 1), debouncer.call(|| 2));
        assert_eq!(first, None);
        assert_eq!(second, Some(2));

        assert_eq!(debouncer.call(|| 3).await, Some(3));
    }

    #[tokio::test]
    async fn test_debounced_search() {
        let dir = tempdir().unwrap();
        let db = seeded(dir.path());
        let mut config = Config::in_dir(dir.path());
        config.search_debounce = Duration::from_millis(5);
        let debouncer = Debouncer::from_config(&config);

        let results = debounced_search(&debouncer, db, SearchRequest::new("yay"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn test_spawn_enrich_cancelled() {
        let dir = tempdir().unwrap();
        let db = seeded(dir.path());
        let installed = Arc::new(InstalledState::new());

        let details = spawn_enrich(db.clone(), installed.clone(), "yay".to_string(), None, CancelToken::new())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(details.info.package.name, "yay");

        let token = CancelToken::new();
        token.cancel();
        let result = spawn_enrich(db, installed, "yay".to_string(), None, token).await.unwrap();
        assert!(matches!(result, Err(Error::Cancelled(_))));
    }

    #[tokio::test]
    async fn test_spawn_resolve() {
        let dir = tempdir().unwrap();
        let db = seeded(dir.path());

        let resolution = spawn_resolve(
            db,
            Arc::new(InstalledState::new()),
            vec!["YAY".to_string()],
            false,
            CancelToken::new(),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(resolution.order.len(), 1);
        assert_eq!(resolution.order[0].name, "yay");
    }
}
