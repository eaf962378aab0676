// src/db/store.rs

//! Serialized access to the package store
//!
//! [`PackageDb`] is the one handle every component shares. Each operation
//! takes the process-wide lock, opens a short-lived connection, runs, and
//! releases both. Full records are memoized in a bounded [`InfoCache`].

use super::cache::InfoCache;
use super::models::{GroupMembership, Link, LinkType, Package, Source};
use crate::config::Config;
use crate::error::{Error, Result};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, error};

/// A package row with its links and groups resolved into lists
#[derive(Debug, Clone, PartialEq)]
pub struct PackageInfo {
    pub package: Package,
    pub depends: Vec<String>,
    pub makedepends: Vec<String>,
    pub checkdepends: Vec<String>,
    pub optdepends: Vec<String>,
    pub provides: Vec<String>,
    pub replaces: Vec<String>,
    pub conflicts: Vec<String>,
    pub groups: Vec<String>,
}

impl PackageInfo {
    /// Raw targets of one link type
    pub fn links(&self, link_type: LinkType) -> &[String] {
        match link_type {
            LinkType::Depends => &self.depends,
            LinkType::MakeDepends => &self.makedepends,
            LinkType::CheckDepends => &self.checkdepends,
            LinkType::OptDepends => &self.optdepends,
            LinkType::Provides => &self.provides,
            LinkType::Replaces => &self.replaces,
            LinkType::Conflicts => &self.conflicts,
        }
    }

    fn links_mut(&mut self, link_type: LinkType) -> &mut Vec<String> {
        match link_type {
            LinkType::Depends => &mut self.depends,
            LinkType::MakeDepends => &mut self.makedepends,
            LinkType::CheckDepends => &mut self.checkdepends,
            LinkType::OptDepends => &mut self.optdepends,
            LinkType::Provides => &mut self.provides,
            LinkType::Replaces => &mut self.replaces,
            LinkType::Conflicts => &mut self.conflicts,
        }
    }

    /// Load links and groups for `package`
    pub fn load(conn: &Connection, package: Package) -> Result<Self> {
        let name = package.name.clone();
        let source = package.source.as_str().to_string();

        let mut info = Self {
            groups: GroupMembership::groups(conn, &name, &source)?,
            package,
            depends: Vec::new(),
            makedepends: Vec::new(),
            checkdepends: Vec::new(),
            optdepends: Vec::new(),
            provides: Vec::new(),
            replaces: Vec::new(),
            conflicts: Vec::new(),
        };
        for link_type in LinkType::ALL {
            *info.links_mut(link_type) = Link::targets(conn, &name, &source, link_type)?;
        }
        Ok(info)
    }
}

pub struct PackageDb {
    db_path: PathBuf,
    lock: Mutex<()>,
    cache: Mutex<InfoCache<Option<PackageInfo>>>,
}

impl PackageDb {
    pub fn new(db_path: impl Into<PathBuf>, cache_capacity: usize) -> Self {
        Self {
            db_path: db_path.into(),
            lock: Mutex::new(()),
            cache: Mutex::new(InfoCache::new(cache_capacity)),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.db_path, config.cache_capacity)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn acquire(&self) -> Result<MutexGuard<'_, ()>> {
        self.lock.lock().map_err(|_| Error::LockPoisoned)
    }

    fn cache(&self) -> Result<MutexGuard<'_, InfoCache<Option<PackageInfo>>>> {
        self.cache.lock().map_err(|_| Error::LockPoisoned)
    }

    /// Run `operation` on a fresh connection while holding the store lock.
    ///
    /// Failures are logged with `operation_name` before being returned.
    pub fn with_connection<T>(
        &self,
        operation_name: &str,
        operation: impl FnOnce(&mut Connection) -> Result<T>,
    ) -> Result<T> {
        let _guard = self.acquire()?;
        let result = super::open(&self.db_path).and_then(|mut conn| operation(&mut conn));
        if let Err(e) = &result {
            error!("Store operation '{}' failed: {}", operation_name, e);
        }
        result
    }

    /// Like [`with_connection`](Self::with_connection), but create the file
    /// and schema when the file is missing
    pub(crate) fn with_init_connection<T>(
        &self,
        operation_name: &str,
        operation: impl FnOnce(&mut Connection) -> Result<T>,
    ) -> Result<T> {
        let _guard = self.acquire()?;
        let conn = if self.db_path.exists() {
            super::open(&self.db_path)
        } else {
            super::init(&self.db_path)
        };
        let result = conn.and_then(|mut conn| operation(&mut conn));
        if let Err(e) = &result {
            error!("Store operation '{}' failed: {}", operation_name, e);
        }
        result
    }

    /// Hold the store lock without opening a connection (file replacement)
    pub(crate) fn with_lock<T>(&self, operation: impl FnOnce(&Path) -> Result<T>) -> Result<T> {
        let _guard = self.acquire()?;
        operation(&self.db_path)
    }

    /// Full record for `name`.
    ///
    /// Without a source the upstream row is preferred, then the first row
    /// stored. A non-upstream row borrows the package base and feed path of
    /// an upstream sibling with the same name.
    pub fn package_info(&self, name: &str, source: Option<&str>) -> Result<Option<PackageInfo>> {
        let generation = {
            let mut cache = self.cache()?;
            if let Some(cached) = cache.get(name, source) {
                debug!("package_info cache hit for {}", name);
                return Ok(cached);
            }
            cache.generation()
        };

        let info = self.read_info(name, source)?;
        self.remember(name, source, &info, generation)?;
        Ok(info)
    }

    fn read_info(&self, name: &str, source: Option<&str>) -> Result<Option<PackageInfo>> {
        self.with_connection("package_info", |conn| {
            let rows = Package::find_by_name(conn, name)?;
            let upstream = rows.iter().find(|p| p.source.is_upstream());

            let chosen = match source {
                Some(source) => rows.iter().find(|p| p.source.as_str() == source),
                None => upstream.or_else(|| rows.first()),
            };
            let Some(chosen) = chosen else {
                return Ok(None);
            };

            let mut package = chosen.clone();
            if !package.source.is_upstream()
                && let Some(upstream) = upstream
            {
                package.package_base = upstream.package_base.clone();
                package.url_path = upstream.url_path.clone();
            }

            PackageInfo::load(conn, package).map(Some)
        })
    }

    /// Cache a record read at `generation`, unless a write invalidated since
    fn remember(&self, name: &str, source: Option<&str>, info: &Option<PackageInfo>, generation: u64) -> Result<()> {
        if !self.cache()?.insert_if_current(name, source, info.clone(), generation) {
            debug!("Not caching {}: invalidated while reading", name);
        }
        Ok(())
    }

    /// Every stored source for `name`, upstream first
    pub fn sources_of(&self, name: &str) -> Result<Vec<Source>> {
        self.with_connection("sources_of", |conn| {
            let mut sources: Vec<Source> = Package::find_by_name(conn, name)?
                .into_iter()
                .map(|p| p.source)
                .collect();
            sources.sort_by_key(|s| !s.is_upstream());
            Ok(sources)
        })
    }

    /// Forget cached records for these names
    pub fn invalidate<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> Result<()> {
        let mut cache = self.cache()?;
        for name in names {
            cache.invalidate(name);
        }
        Ok(())
    }

    pub fn clear_cache(&self) -> Result<()> {
        self.cache()?.clear();
        Ok(())
    }
}
