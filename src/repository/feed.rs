// src/repository/feed.rs

//! Upstream feed snapshot
//!
//! The feed is a gzip-compressed JSON array of package records. It is
//! cached on disk next to the database and only downloaded again when asked
//! to, or when the cached copy is missing.

use super::RepositoryClient;
use crate::config::Config;
use crate::db::models::{ExtendedAttributes, LinkType, Package, Source};
use crate::error::{Error, Result};
use crate::packages::PackageRecord;
use flate2::read::GzDecoder;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

/// One record of the upstream feed.
///
/// Every field may be absent, and every field but `Name` falls back to its
/// default when it has the wrong type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct FeedRecord {
    #[serde(rename = "ID", deserialize_with = "lenient")]
    pub id: Option<i64>,
    pub name: String,
    #[serde(rename = "PackageBaseID", deserialize_with = "lenient")]
    pub package_base_id: Option<i64>,
    #[serde(deserialize_with = "lenient")]
    pub package_base: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub version: String,
    #[serde(deserialize_with = "lenient")]
    pub description: Option<String>,
    #[serde(rename = "URL", deserialize_with = "lenient")]
    pub url: Option<String>,
    #[serde(rename = "URLPath", deserialize_with = "lenient")]
    pub url_path: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub num_votes: Option<i64>,
    #[serde(deserialize_with = "lenient")]
    pub popularity: Option<f64>,
    #[serde(deserialize_with = "lenient")]
    pub out_of_date: Option<i64>,
    #[serde(deserialize_with = "lenient")]
    pub maintainer: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub submitter: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub first_submitted: Option<i64>,
    #[serde(deserialize_with = "lenient")]
    pub last_modified: Option<i64>,
    #[serde(deserialize_with = "lenient")]
    pub depends: Vec<String>,
    #[serde(deserialize_with = "lenient")]
    pub make_depends: Vec<String>,
    #[serde(deserialize_with = "lenient")]
    pub check_depends: Vec<String>,
    #[serde(deserialize_with = "lenient")]
    pub opt_depends: Vec<String>,
    #[serde(deserialize_with = "lenient")]
    pub provides: Vec<String>,
    #[serde(deserialize_with = "lenient")]
    pub replaces: Vec<String>,
    #[serde(deserialize_with = "lenient")]
    pub conflicts: Vec<String>,
    #[serde(deserialize_with = "lenient")]
    pub groups: Vec<String>,
    #[serde(deserialize_with = "lenient")]
    pub license: Vec<String>,
    #[serde(deserialize_with = "lenient")]
    pub keywords: Vec<String>,
    #[serde(deserialize_with = "lenient")]
    pub co_maintainers: Vec<String>,
}

fn lenient<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(T::deserialize(value).unwrap_or_default())
}

impl PackageRecord for FeedRecord {
    fn links(&self) -> Vec<(LinkType, &str)> {
        let lists: [(LinkType, &Vec<String>); 7] = [
            (LinkType::Depends, &self.depends),
            (LinkType::MakeDepends, &self.make_depends),
            (LinkType::CheckDepends, &self.check_depends),
            (LinkType::OptDepends, &self.opt_depends),
            (LinkType::Provides, &self.provides),
            (LinkType::Replaces, &self.replaces),
            (LinkType::Conflicts, &self.conflicts),
        ];
        lists
            .into_iter()
            .flat_map(|(link_type, targets)| targets.iter().map(move |t| (link_type, t.as_str())))
            .collect()
    }

    fn groups(&self) -> &[String] {
        &self.groups
    }

    fn to_package(&self) -> Package {
        let mut package = Package::new(self.name.clone(), Source::Upstream, self.version.clone());
        package.pkg_id = self.id;
        package.description = self.description.clone();
        package.url = self.url.clone();
        package.url_path = self.url_path.clone();
        package.maintainer = self.maintainer.clone();
        package.submitter = self.submitter.clone();
        package.first_submitted = self.first_submitted;
        package.last_modified = self.last_modified;
        package.popularity = self.popularity;
        package.out_of_date = self.out_of_date;
        package.package_base = self.package_base.clone();
        package.package_base_id = self.package_base_id;
        package.num_votes = self.num_votes;
        package.extended = ExtendedAttributes {
            licenses: self.license.clone(),
            keywords: self.keywords.clone(),
            co_maintainers: self.co_maintainers.clone(),
            ..Default::default()
        };
        package
    }
}

/// Decode a feed from an uncompressed JSON reader.
///
/// A record without a string name is skipped with a warning; it never
/// fails the whole feed.
pub fn decode_feed<R: Read>(reader: R) -> Result<Vec<FeedRecord>> {
    let values: Vec<serde_json::Value> = serde_json::from_reader(reader)?;
    let total = values.len();

    let records: Vec<FeedRecord> = values
        .into_iter()
        .enumerate()
        .filter_map(|(index, value)| match serde_json::from_value::<FeedRecord>(value) {
            Ok(record) if !record.name.is_empty() => Some(record),
            Ok(_) => {
                warn!("Skipping feed record {} without a name", index);
                None
            }
            Err(e) => {
                warn!("Skipping malformed feed record {}: {}", index, e);
                None
            }
        })
        .collect();

    debug!("Decoded {} of {} feed records", records.len(), total);
    Ok(records)
}

/// Anything that can produce the current upstream feed
pub trait FeedSource {
    /// Fetch the feed, downloading a fresh snapshot when `download` is set
    fn fetch(&self, download: bool) -> Result<Vec<FeedRecord>>;
}

/// Feed cached in a gzip file, refreshed over HTTP
#[derive(Debug, Clone)]
pub struct FeedFile {
    path: PathBuf,
    url: String,
    timeout: Duration,
    retries: u32,
}

impl FeedFile {
    pub fn new(path: impl Into<PathBuf>, url: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            url: url.into(),
            timeout: Duration::from_secs(60),
            retries: 3,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            path: config.feed_path.clone(),
            url: config.feed_url.clone(),
            timeout: config.http_timeout,
            retries: config.download_retries,
        }
    }

    fn download(&self) -> Result<()> {
        RepositoryClient::new(self.timeout, self.retries)?.download_file(&self.url, &self.path)
    }
}

impl FeedSource for FeedFile {
    fn fetch(&self, download: bool) -> Result<Vec<FeedRecord>> {
        if download {
            self.download()?;
        } else if !self.path.is_file() {
            warn!("Feed snapshot {} not found, downloading", self.path.display());
            self.download()?;
        }

        let file = File::open(&self.path)?;
        let records = decode_feed(GzDecoder::new(BufReader::new(file))).map_err(|e| match e {
            Error::Json(e) => Error::ParseError(format!("{}: {}", self.path.display(), e)),
            other => other,
        })?;

        info!("Loaded {} upstream records from {}", records.len(), self.path.display());
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;
    use tempfile::tempdir;

    const FEED: &str = r#"[
        {"ID": 1, "Name": "yay", "PackageBase": "yay", "PackageBaseID": 10,
         "Version": "12.0-1", "Maintainer": "jguer", "NumVotes": 2000,
         "Popularity": 25.5, "OutOfDate": null, "LastModified": 1700000000,
         "Depends": ["pacman>5", "git"], "MakeDepends": ["go"],
         "License": ["GPL-3.0-or-later"], "CoMaintainers": ["someone"]},
        {"Name": "bare"},
        {"Name": 42},
        {"Version": "1.0"},
        {"Name": "nulls", "Depends": null},
        {"Name": "odd", "Version": "2-1", "NumVotes": "lots", "Popularity": [],
         "Depends": "glibc", "Provides": ["odd-bin"]}
    ]"#;

    #[test]
    fn test_decode_feed_skips_bad_records() {
        let records = decode_feed(FEED.as_bytes()).unwrap();
        let names: Vec<&str> = records.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["yay", "bare", "nulls", "odd"]);

        let yay = &records[0];
        assert_eq!(yay.package_base_id, Some(10));
        assert_eq!(yay.make_depends, vec!["go".to_string()]);
        assert_eq!(yay.co_maintainers, vec!["someone".to_string()]);
        assert!(records[2].depends.is_empty());
    }

    #[test]
    fn test_wrong_typed_fields_default() {
        let records = decode_feed(FEED.as_bytes()).unwrap();
        let odd = &records[3];

        assert_eq!(odd.version, "2-1");
        assert_eq!(odd.num_votes, None);
        assert_eq!(odd.popularity, None);
        assert!(odd.depends.is_empty());
        assert_eq!(odd.provides, vec!["odd-bin".to_string()]);
    }

    #[test]
    fn test_feed_record_to_package() {
        let records = decode_feed(FEED.as_bytes()).unwrap();
        let package = records[0].to_package();

        assert_eq!(package.source, Source::Upstream);
        assert_eq!(package.pkg_id, Some(1));
        assert_eq!(package.num_votes, Some(2000));
        assert_eq!(package.extended.licenses, vec!["GPL-3.0-or-later".to_string()]);

        let links = records[0].links();
        assert_eq!(links[0], (LinkType::Depends, "pacman>5"));
        assert_eq!(links[2], (LinkType::MakeDepends, "go"));
    }

    #[test]
    fn test_fetch_cached_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("feed.json.gz");

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(FEED.as_bytes()).unwrap();
        std::fs::write(&path, encoder.finish().unwrap()).unwrap();

        let feed = FeedFile::new(&path, "http://127.0.0.1:9/unused");
        assert_eq!(feed.fetch(false).unwrap().len(), 4);
    }

    #[test]
    fn test_fetch_corrupt_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("feed.json.gz");
        std::fs::write(&path, b"not gzip").unwrap();

        let feed = FeedFile::new(&path, "http://127.0.0.1:9/unused");
        assert!(feed.fetch(false).is_err());
    }
}
