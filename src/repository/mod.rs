// src/repository/mod.rs

//! Package sources and synchronization
//!
//! This module provides functionality for:
//! - Downloading the upstream feed snapshot with retries
//! - Reading the system package manager's databases
//! - Synchronizing both into the store (full rebuild or incremental update)

pub mod feed;
pub mod parsers;
pub mod sync;

pub use feed::{FeedFile, FeedRecord, FeedSource};
pub use parsers::{PacmanSource, SystemPackage, SystemSnapshot, SystemSource};
pub use sync::Synchronizer;

use crate::error::{Error, Result};
use reqwest::blocking::Client;
use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;
use tempfile::NamedTempFile;
use tracing::{info, warn};

/// Retry delay in milliseconds, multiplied by the attempt number
const RETRY_DELAY_MS: u64 = 1000;

/// HTTP client wrapper with retry support
pub struct RepositoryClient {
    client: Client,
    max_retries: u32,
}

impl RepositoryClient {
    /// Create a new client
    pub fn new(timeout: Duration, max_retries: u32) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("pkgdex/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::InitError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            max_retries: max_retries.max(1),
        })
    }

    /// Download a file to the specified path with retry support.
    ///
    /// The body is written to a temporary file in the destination directory
    /// and renamed into place, so a failed download never replaces an
    /// existing file.
    pub fn download_file(&self, url: &str, dest_path: &Path) -> Result<()> {
        info!("Downloading {} to {}", url, dest_path.display());

        let parent = dest_path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent)?;

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.try_download(url, parent, dest_path) {
                Ok(()) => {
                    info!("Successfully downloaded to {}", dest_path.display());
                    return Ok(());
                }
                Err(e) if attempt >= self.max_retries => {
                    return Err(Error::DownloadError(format!(
                        "Failed to download {} after {} attempts: {}",
                        url, attempt, e
                    )));
                }
                Err(e) => {
                    warn!("Download attempt {} failed: {}, retrying...", attempt, e);
                    std::thread::sleep(Duration::from_millis(RETRY_DELAY_MS * attempt as u64));
                }
            }
        }
    }

    fn try_download(&self, url: &str, dir: &Path, dest_path: &Path) -> Result<()> {
        let mut response = self
            .client
            .get(url)
            .send()
            .map_err(|e| Error::DownloadError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::DownloadError(format!(
                "HTTP {} from {}",
                response.status(),
                url
            )));
        }

        let mut temp = NamedTempFile::new_in(dir)?;
        io::copy(&mut response, temp.as_file_mut())?;
        temp.persist(dest_path).map_err(|e| Error::Io(e.error))?;
        Ok(())
    }
}
