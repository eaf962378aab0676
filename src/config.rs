// src/config.rs

//! Resolved paths and tunables
//!
//! Nothing here is read from a config file. Defaults live under the user
//! cache directory and can be moved with environment variables, which the
//! CLI in turn overrides with flags.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Snapshot of the upstream feed
pub const DEFAULT_FEED_URL: &str = "https://aur.archlinux.org/packages-meta-ext-v1.json.gz";

/// pacman's database root
pub const DEFAULT_PACMAN_DB: &str = "/var/lib/pacman";

/// pacman's configuration, used to discover sync repositories
pub const DEFAULT_PACMAN_CONF: &str = "/etc/pacman.conf";

const APP_NAME: &str = "pkgdex";
const DB_FILE: &str = "packages.db";
const FEED_FILE: &str = "packages-meta-ext-v1.json.gz";

#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: PathBuf,
    pub feed_path: PathBuf,
    pub feed_url: String,
    pub pacman_db: PathBuf,
    pub pacman_conf: PathBuf,
    /// Capacity of the `package_info` cache
    pub cache_capacity: usize,
    pub http_timeout: Duration,
    pub download_retries: u32,
    pub search_debounce: Duration,
}

impl Config {
    /// Configuration rooted at `data_dir` (database and cached feed live there)
    pub fn in_dir(data_dir: &Path) -> Self {
        Self {
            db_path: data_dir.join(DB_FILE),
            feed_path: data_dir.join(FEED_FILE),
            feed_url: DEFAULT_FEED_URL.to_string(),
            pacman_db: PathBuf::from(DEFAULT_PACMAN_DB),
            pacman_conf: PathBuf::from(DEFAULT_PACMAN_CONF),
            cache_capacity: 8192,
            http_timeout: Duration::from_secs(60),
            download_retries: 3,
            search_debounce: Duration::from_millis(300),
        }
    }

    /// Defaults with `PKGDEX_DB_DIR`, `PKGDEX_FEED_URL` and `PKGDEX_PACMAN_DB` applied
    pub fn from_env() -> Self {
        let mut config = Self::in_dir(&data_dir(std::env::var("PKGDEX_DB_DIR").ok()));
        if let Ok(url) = std::env::var("PKGDEX_FEED_URL") {
            config.feed_url = url;
        }
        if let Ok(root) = std::env::var("PKGDEX_PACMAN_DB") {
            config.pacman_db = PathBuf::from(root);
        }
        config
    }

    /// Move the database, keeping the feed snapshot next to it
    pub fn with_db_path(mut self, db_path: impl Into<PathBuf>) -> Self {
        self.db_path = db_path.into();
        if let Some(parent) = self.db_path.parent() {
            self.feed_path = parent.join(FEED_FILE);
        }
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

fn data_dir(override_dir: Option<String>) -> PathBuf {
    match override_dir {
        Some(dir) => PathBuf::from(dir),
        None => dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(APP_NAME),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_dir_layout() {
        let config = Config::in_dir(Path::new("/tmp/pkgdex"));
        assert_eq!(config.db_path, PathBuf::from("/tmp/pkgdex/packages.db"));
        assert_eq!(
            config.feed_path,
            PathBuf::from("/tmp/pkgdex/packages-meta-ext-v1.json.gz")
        );
        assert_eq!(config.feed_url, DEFAULT_FEED_URL);
    }

    #[test]
    fn test_with_db_path_moves_feed() {
        let config = Config::in_dir(Path::new("/a")).with_db_path("/b/custom.db");
        assert_eq!(config.db_path, PathBuf::from("/b/custom.db"));
        assert_eq!(
            config.feed_path,
            PathBuf::from("/b/packages-meta-ext-v1.json.gz")
        );
    }

    #[test]
    fn test_data_dir_override() {
        assert_eq!(
            data_dir(Some("/srv/pkgdex".to_string())),
            PathBuf::from("/srv/pkgdex")
        );
        assert!(data_dir(None).ends_with("pkgdex"));
    }
}
