// src/repository/parsers/arch.rs

//! pacman database reader
//!
//! Sync databases are tarballs (gzip, xz, zstd or plain) of
//! `<name>-<version>/desc` entries in pacman's `%FIELD%` text format. The
//! local database is a directory tree of the same `desc` files plus
//! `files` and an optional `install` scriptlet.

use super::{SystemPackage, SystemSnapshot, SystemSource};
use crate::db::models::BackupEntry;
use crate::error::{Error, Result};
use flate2::read::GzDecoder;
use rayon::prelude::*;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use tar::Archive;
use tracing::{debug, info, warn};
use xz2::read::XzDecoder;

type DescFields = HashMap<String, Vec<String>>;

/// Reads pacman's sync and local databases
#[derive(Debug, Clone)]
pub struct PacmanSource {
    /// Database root, usually `/var/lib/pacman`
    db_root: PathBuf,
    /// pacman.conf, used to list sync repositories in priority order
    conf: PathBuf,
}

impl PacmanSource {
    pub fn new(db_root: impl Into<PathBuf>, conf: impl Into<PathBuf>) -> Self {
        Self {
            db_root: db_root.into(),
            conf: conf.into(),
        }
    }

    /// Repository names from pacman.conf section headers, `[options]` excluded
    fn repo_names(&self) -> Vec<String> {
        match fs::read_to_string(&self.conf) {
            Ok(content) => parse_repo_names(&content),
            Err(e) => {
                warn!(
                    "Cannot read {}: {}; no sync repositories registered",
                    self.conf.display(),
                    e
                );
                Vec::new()
            }
        }
    }

    /// Parse one `sync/<repo>.db`
    fn read_sync_db(&self, repo: &str) -> Result<Option<Vec<SystemPackage>>> {
        let path = self.db_root.join("sync").join(format!("{}.db", repo));
        if !path.exists() {
            warn!("Sync database for '{}' not found at {}", repo, path.display());
            return Ok(None);
        }

        let data = fs::read(&path)?;
        let packages = parse_sync_db(&data)
            .map_err(|e| Error::ParseError(format!("{}: {}", path.display(), e)))?;
        debug!("Read {} packages from repository {}", packages.len(), repo);
        Ok(Some(packages))
    }

    /// Parse every entry under `local/`
    fn read_local_db(&self) -> Result<Vec<SystemPackage>> {
        let local_dir = self.db_root.join("local");
        if !local_dir.is_dir() {
            warn!("Local database not found at {}", local_dir.display());
            return Ok(Vec::new());
        }

        let mut entries: Vec<PathBuf> = fs::read_dir(&local_dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.join("desc").is_file())
            .collect();
        entries.sort();

        let parsed: Vec<Result<Option<SystemPackage>>> =
            entries.par_iter().map(|dir| read_local_entry(dir)).collect();

        let mut packages = Vec::with_capacity(parsed.len());
        for result in parsed {
            if let Some(pkg) = result? {
                packages.push(pkg);
            }
        }
        debug!("Read {} installed packages", packages.len());
        Ok(packages)
    }
}

impl SystemSource for PacmanSource {
    fn snapshot(&self) -> Result<SystemSnapshot> {
        if !self.db_root.is_dir() {
            warn!(
                "pacman database root {} does not exist; no system packages",
                self.db_root.display()
            );
            return Ok(SystemSnapshot::default());
        }

        let mut repos = Vec::new();
        for repo in self.repo_names() {
            if let Some(packages) = self.read_sync_db(&repo)? {
                repos.push((repo, packages));
            }
        }
        let local = self.read_local_db()?;

        let snapshot = SystemSnapshot::assemble(repos, local);
        info!("System snapshot holds {} packages", snapshot.packages.len());
        Ok(snapshot)
    }
}

/// Section headers of a pacman.conf, in order
pub fn parse_repo_names(conf: &str) -> Vec<String> {
    conf.lines()
        .map(str::trim)
        .filter_map(|line| line.strip_prefix('[')?.strip_suffix(']'))
        .map(str::trim)
        .filter(|name| !name.is_empty() && !name.eq_ignore_ascii_case("options"))
        .map(str::to_string)
        .collect()
}

/// Decompress a sync database, detecting the format from its magic bytes
fn decompress_database(data: &[u8]) -> Result<Vec<u8>> {
    if data.starts_with(&[0x1f, 0x8b]) {
        let mut decompressed = Vec::new();
        GzDecoder::new(data).read_to_end(&mut decompressed)?;
        debug!("Decompressed gzip database");
        return Ok(decompressed);
    }

    if data.starts_with(&[0xfd, b'7', b'z', b'X', b'Z', 0x00]) {
        let mut decompressed = Vec::new();
        XzDecoder::new(data).read_to_end(&mut decompressed)?;
        debug!("Decompressed xz database");
        return Ok(decompressed);
    }

    if data.starts_with(&[0x28, 0xb5, 0x2f, 0xfd]) {
        let decompressed = zstd::decode_all(data)
            .map_err(|e| Error::ParseError(format!("Failed to decompress zstd database: {}", e)))?;
        debug!("Decompressed zstd database");
        return Ok(decompressed);
    }

    if data.len() > 262 && &data[257..262] == b"ustar" {
        return Ok(data.to_vec());
    }

    Err(Error::ParseError(
        "Unrecognized database format (expected gzip, xz, zstd or tar)".to_string(),
    ))
}

/// Parse a (possibly compressed) sync database tarball
pub fn parse_sync_db(data: &[u8]) -> Result<Vec<SystemPackage>> {
    let decompressed = decompress_database(data)?;
    let mut archive = Archive::new(decompressed.as_slice());

    // Older databases split each entry into `desc` and `depends`; both
    // land in the same field map keyed by directory.
    let mut by_dir: BTreeMap<String, DescFields> = BTreeMap::new();

    for entry in archive.entries()? {
        let mut entry =
            entry.map_err(|e| Error::ParseError(format!("Failed to read tarball entry: {}", e)))?;

        let path = entry
            .path()
            .map_err(|e| Error::ParseError(format!("Invalid path in tarball: {}", e)))?
            .to_string_lossy()
            .into_owned();

        let Some((dir, file)) = path.rsplit_once('/') else {
            continue;
        };
        if file != "desc" && file != "depends" {
            continue;
        }

        let mut content = String::new();
        entry
            .read_to_string(&mut content)
            .map_err(|e| Error::ParseError(format!("Failed to read {}: {}", path, e)))?;

        by_dir
            .entry(dir.to_string())
            .or_default()
            .extend(parse_desc_file(&content));
    }

    Ok(by_dir
        .into_iter()
        .filter_map(|(dir, fields)| {
            let pkg = package_from_desc(&fields);
            if pkg.is_none() {
                warn!("Skipping sync entry {} without %NAME%/%VERSION%", dir);
            }
            pkg
        })
        .collect())
}

/// Parse one `local/<name>-<version>/` directory
fn read_local_entry(dir: &Path) -> Result<Option<SystemPackage>> {
    let desc = fs::read_to_string(dir.join("desc"))?;
    let Some(mut pkg) = package_from_desc(&parse_desc_file(&desc)) else {
        warn!("Skipping local entry {} without %NAME%/%VERSION%", dir.display());
        return Ok(None);
    };

    match fs::read_to_string(dir.join("files")) {
        Ok(files) => {
            let fields = parse_desc_file(&files);
            pkg.files = field_list(&fields, "FILES");
            pkg.backup = field_list(&fields, "BACKUP")
                .iter()
                .filter_map(|line| {
                    let (path, md5sum) = line.split_once('\t')?;
                    Some(BackupEntry {
                        path: path.to_string(),
                        md5sum: md5sum.to_string(),
                    })
                })
                .collect();
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    pkg.has_scriptlet = dir.join("install").is_file();
    Ok(Some(pkg))
}

/// Parse pacman's `%FIELD%` format into field -> values
pub fn parse_desc_file(content: &str) -> DescFields {
    let mut fields = HashMap::new();
    let mut current_field: Option<String> = None;
    let mut values: Vec<String> = Vec::new();

    for line in content.lines() {
        let trimmed = line.trim_end();

        if trimmed.len() > 2 && trimmed.starts_with('%') && trimmed.ends_with('%') {
            if let Some(field) = current_field.take() {
                fields.insert(field, std::mem::take(&mut values));
            }
            current_field = Some(trimmed[1..trimmed.len() - 1].to_string());
        } else if !trimmed.is_empty() {
            values.push(trimmed.to_string());
        }
    }

    if let Some(field) = current_field {
        fields.insert(field, values);
    }

    fields
}

fn field_first(fields: &DescFields, key: &str) -> Option<String> {
    fields.get(key).and_then(|v| v.first()).cloned()
}

fn field_list(fields: &DescFields, key: &str) -> Vec<String> {
    fields.get(key).cloned().unwrap_or_default()
}

fn field_int(fields: &DescFields, key: &str) -> Option<i64> {
    fields
        .get(key)
        .and_then(|v| v.first())
        .and_then(|s| s.parse().ok())
}

/// Build a record from parsed fields; `None` without a name and version.
///
/// Local databases call the installed size `%SIZE%`; sync databases use
/// `%ISIZE%` and `%CSIZE%`.
fn package_from_desc(fields: &DescFields) -> Option<SystemPackage> {
    let name = field_first(fields, "NAME")?;
    let version = field_first(fields, "VERSION")?;

    let is_local = fields.contains_key("INSTALLDATE");
    let (installed_size, size) = if is_local {
        (field_int(fields, "SIZE"), None)
    } else {
        (field_int(fields, "ISIZE"), field_int(fields, "CSIZE"))
    };

    Some(SystemPackage {
        name,
        version,
        source: None,
        base: field_first(fields, "BASE"),
        description: field_first(fields, "DESC"),
        url: field_first(fields, "URL"),
        filename: field_first(fields, "FILENAME"),
        packager: field_first(fields, "PACKAGER"),
        arch: field_first(fields, "ARCH"),
        build_date: field_int(fields, "BUILDDATE"),
        install_date: field_int(fields, "INSTALLDATE"),
        installed_size,
        size,
        md5sum: field_first(fields, "MD5SUM"),
        sha256sum: field_first(fields, "SHA256SUM"),
        pgpsig: field_first(fields, "PGPSIG"),
        has_scriptlet: false,
        licenses: field_list(fields, "LICENSE"),
        groups: field_list(fields, "GROUPS"),
        depends: field_list(fields, "DEPENDS"),
        makedepends: field_list(fields, "MAKEDEPENDS"),
        checkdepends: field_list(fields, "CHECKDEPENDS"),
        optdepends: field_list(fields, "OPTDEPENDS"),
        provides: field_list(fields, "PROVIDES"),
        replaces: field_list(fields, "REPLACES"),
        conflicts: field_list(fields, "CONFLICTS"),
        files: Vec::new(),
        backup: Vec::new(),
    })
}
