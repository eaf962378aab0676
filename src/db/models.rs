// src/db/models.rs

//! Data models for pkgdex database entities
//!
//! Rust structs for the `packages`, `links`, `package_groups` and
//! `build_metadata` tables, with the reads and writes the sync pipeline,
//! query engine and resolver need.

use crate::error::Result;
use crate::packages::depspec::DepSpec;
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Source tag of upstream-feed rows
pub const UPSTREAM_SOURCE: &str = "aur";

/// Source tag of installed packages that no sync repository carries
pub const LOCAL_SOURCE: &str = "local";

/// Where a package row came from
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Source {
    Upstream,
    Repository(String),
    Local,
}

impl Source {
    pub fn as_str(&self) -> &str {
        match self {
            Source::Upstream => UPSTREAM_SOURCE,
            Source::Repository(name) => name,
            Source::Local => LOCAL_SOURCE,
        }
    }

    pub fn is_upstream(&self) -> bool {
        matches!(self, Source::Upstream)
    }
}

impl From<&str> for Source {
    fn from(s: &str) -> Self {
        match s {
            UPSTREAM_SOURCE => Source::Upstream,
            LOCAL_SOURCE => Source::Local,
            other => Source::Repository(other.to_string()),
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Type of a directed link between a package and a target specifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LinkType {
    Depends,
    MakeDepends,
    CheckDepends,
    OptDepends,
    Provides,
    Replaces,
    Conflicts,
}

impl LinkType {
    pub const ALL: [LinkType; 7] = [
        LinkType::Depends,
        LinkType::MakeDepends,
        LinkType::CheckDepends,
        LinkType::OptDepends,
        LinkType::Provides,
        LinkType::Replaces,
        LinkType::Conflicts,
    ];

    /// The four relations that express a dependency
    pub const DEPENDENCIES: [LinkType; 4] = [
        LinkType::Depends,
        LinkType::MakeDepends,
        LinkType::CheckDepends,
        LinkType::OptDepends,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            LinkType::Depends => "depends",
            LinkType::MakeDepends => "makedepends",
            LinkType::CheckDepends => "checkdepends",
            LinkType::OptDepends => "optdepends",
            LinkType::Provides => "provides",
            LinkType::Replaces => "replaces",
            LinkType::Conflicts => "conflicts",
        }
    }

    pub fn is_dependency(&self) -> bool {
        Self::DEPENDENCIES.contains(self)
    }
}

impl FromStr for LinkType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "depends" => Ok(LinkType::Depends),
            "makedepends" => Ok(LinkType::MakeDepends),
            "checkdepends" => Ok(LinkType::CheckDepends),
            "optdepends" => Ok(LinkType::OptDepends),
            "provides" => Ok(LinkType::Provides),
            "replaces" => Ok(LinkType::Replaces),
            "conflicts" => Ok(LinkType::Conflicts),
            _ => Err(format!("Invalid link type: {}", s)),
        }
    }
}

impl fmt::Display for LinkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A file pacman preserves on upgrade
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupEntry {
    pub path: String,
    pub md5sum: String,
}

/// Fields that are never filtered or sorted on, stored as one JSON column
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtendedAttributes {
    pub licenses: Vec<String>,
    pub keywords: Vec<String>,
    pub co_maintainers: Vec<String>,
    pub files: Vec<String>,
    pub backup: Vec<BackupEntry>,
}

impl ExtendedAttributes {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode the attribute bag; a damaged bag reads as empty.
    pub fn from_json(raw: Option<&str>) -> Self {
        match raw {
            Some(raw) => serde_json::from_str(raw).unwrap_or_else(|e| {
                tracing::warn!("Could not parse package metadata: {}", e);
                Self::default()
            }),
            None => Self::default(),
        }
    }
}

/// One row of the `packages` table
#[derive(Debug, Clone, PartialEq)]
pub struct Package {
    pub name: String,
    pub source: Source,
    pub pkg_id: Option<i64>,
    pub version: String,
    pub description: Option<String>,
    pub url: Option<String>,
    pub url_path: Option<String>,
    pub filename: Option<String>,
    pub maintainer: Option<String>,
    pub submitter: Option<String>,
    pub packager: Option<String>,
    pub arch: Option<String>,
    pub build_date: Option<i64>,
    pub install_date: Option<i64>,
    pub first_submitted: Option<i64>,
    pub last_modified: Option<i64>,
    pub popularity: Option<f64>,
    pub out_of_date: Option<i64>,
    pub package_base: Option<String>,
    pub package_base_id: Option<i64>,
    pub num_votes: Option<i64>,
    pub installed_size: Option<i64>,
    pub size: Option<i64>,
    pub md5sum: Option<String>,
    pub sha256sum: Option<String>,
    pub base64_sig: Option<String>,
    pub has_scriptlet: bool,
    pub extended: ExtendedAttributes,
}

const PACKAGE_COLUMNS: &str = "name, source, pkg_id, version, description, url, url_path, filename,
     maintainer, submitter, packager, arch, build_date, install_date, first_submitted,
     last_modified, popularity, out_of_date, package_base, package_base_id, num_votes,
     isize, size, md5sum, sha256sum, base64_sig, has_scriptlet, metadata";

impl Package {
    /// Create a package with every optional attribute unset
    pub fn new(name: String, source: Source, version: String) -> Self {
        Self {
            name,
            source,
            pkg_id: None,
            version,
            description: None,
            url: None,
            url_path: None,
            filename: None,
            maintainer: None,
            submitter: None,
            packager: None,
            arch: None,
            build_date: None,
            install_date: None,
            first_submitted: None,
            last_modified: None,
            popularity: None,
            out_of_date: None,
            package_base: None,
            package_base_id: None,
            num_votes: None,
            installed_size: None,
            size: None,
            md5sum: None,
            sha256sum: None,
            base64_sig: None,
            has_scriptlet: false,
            extended: ExtendedAttributes::default(),
        }
    }

    /// Insert this package, or overwrite every column of the existing
    /// `(name, source)` row
    pub fn upsert(&self, conn: &Connection) -> Result<()> {
        conn.execute(
            &format!(
                "INSERT INTO packages ({PACKAGE_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                         ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28)
                 ON CONFLICT(name, source) DO UPDATE SET
                    pkg_id = excluded.pkg_id,
                    version = excluded.version,
                    description = excluded.description,
                    url = excluded.url,
                    url_path = excluded.url_path,
                    filename = excluded.filename,
                    maintainer = excluded.maintainer,
                    submitter = excluded.submitter,
                    packager = excluded.packager,
                    arch = excluded.arch,
                    build_date = excluded.build_date,
                    install_date = excluded.install_date,
                    first_submitted = excluded.first_submitted,
                    last_modified = excluded.last_modified,
                    popularity = excluded.popularity,
                    out_of_date = excluded.out_of_date,
                    package_base = excluded.package_base,
                    package_base_id = excluded.package_base_id,
                    num_votes = excluded.num_votes,
                    isize = excluded.isize,
                    size = excluded.size,
                    md5sum = excluded.md5sum,
                    sha256sum = excluded.sha256sum,
                    base64_sig = excluded.base64_sig,
                    has_scriptlet = excluded.has_scriptlet,
                    metadata = excluded.metadata"
            ),
            params![
                &self.name,
                self.source.as_str(),
                &self.pkg_id,
                &self.version,
                &self.description,
                &self.url,
                &self.url_path,
                &self.filename,
                &self.maintainer,
                &self.submitter,
                &self.packager,
                &self.arch,
                &self.build_date,
                &self.install_date,
                &self.first_submitted,
                &self.last_modified,
                &self.popularity,
                &self.out_of_date,
                &self.package_base,
                &self.package_base_id,
                &self.num_votes,
                &self.installed_size,
                &self.size,
                &self.md5sum,
                &self.sha256sum,
                &self.base64_sig,
                &self.has_scriptlet,
                self.extended.to_json()?,
            ],
        )?;
        Ok(())
    }

    /// Find the row for an exact `(name, source)` pair
    pub fn find(conn: &Connection, name: &str, source: &str) -> Result<Option<Self>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {PACKAGE_COLUMNS} FROM packages WHERE name = ?1 AND source = ?2"
        ))?;

        let package = stmt.query_row([name, source], Self::from_row).optional()?;

        Ok(package)
    }

    /// Find every row carrying this name, in insertion order
    pub fn find_by_name(conn: &Connection, name: &str) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {PACKAGE_COLUMNS} FROM packages WHERE name = ?1 ORDER BY rowid"
        ))?;

        let packages = stmt
            .query_map([name], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(packages)
    }

    /// Delete a package; its links and groups go with it
    pub fn delete(conn: &Connection, name: &str, source: &str) -> Result<()> {
        conn.execute(
            "DELETE FROM packages WHERE name = ?1 AND source = ?2",
            [name, source],
        )?;
        Ok(())
    }

    /// Number of rows in the table
    pub fn count(conn: &Connection) -> Result<i64> {
        Ok(conn.query_row("SELECT COUNT(*) FROM packages", [], |row| row.get(0))?)
    }

    /// Convert a database row to a Package
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let source: String = row.get(1)?;
        let metadata: Option<String> = row.get(27)?;

        Ok(Self {
            name: row.get(0)?,
            source: Source::from(source.as_str()),
            pkg_id: row.get(2)?,
            version: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
            description: row.get(4)?,
            url: row.get(5)?,
            url_path: row.get(6)?,
            filename: row.get(7)?,
            maintainer: row.get(8)?,
            submitter: row.get(9)?,
            packager: row.get(10)?,
            arch: row.get(11)?,
            build_date: row.get(12)?,
            install_date: row.get(13)?,
            first_submitted: row.get(14)?,
            last_modified: row.get(15)?,
            popularity: row.get(16)?,
            out_of_date: row.get(17)?,
            package_base: row.get(18)?,
            package_base_id: row.get(19)?,
            num_votes: row.get(20)?,
            installed_size: row.get(21)?,
            size: row.get(22)?,
            md5sum: row.get(23)?,
            sha256sum: row.get(24)?,
            base64_sig: row.get(25)?,
            has_scriptlet: row.get::<_, Option<bool>>(26)?.unwrap_or(false),
            extended: ExtendedAttributes::from_json(metadata.as_deref()),
        })
    }
}

/// One row of the `links` table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub name: String,
    pub source: Source,
    pub link_type: LinkType,
    pub target: String,
}

impl Link {
    /// Replace every link owned by `(name, source)` with `links`
    pub fn replace_for(
        conn: &Connection,
        name: &str,
        source: &str,
        links: &[(LinkType, String)],
    ) -> Result<()> {
        conn.execute(
            "DELETE FROM links WHERE name = ?1 AND source = ?2",
            [name, source],
        )?;

        let mut stmt = conn.prepare_cached(
            "INSERT INTO links (name, source, link_type, target) VALUES (?1, ?2, ?3, ?4)",
        )?;
        for (link_type, target) in links {
            stmt.execute(params![name, source, link_type.as_str(), target])?;
        }
        Ok(())
    }

    /// Targets of one link type owned by `(name, source)`, in declaration order
    pub fn targets(
        conn: &Connection,
        name: &str,
        source: &str,
        link_type: LinkType,
    ) -> Result<Vec<String>> {
        let mut stmt = conn.prepare(
            "SELECT target FROM links WHERE name = ?1 AND source = ?2 AND link_type = ?3 ORDER BY rowid",
        )?;

        let targets = stmt
            .query_map(params![name, source, link_type.as_str()], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;

        Ok(targets)
    }

    /// Targets of one link type declared under any source for `name`
    pub fn targets_any_source(
        conn: &Connection,
        name: &str,
        link_type: LinkType,
    ) -> Result<Vec<String>> {
        let mut stmt = conn.prepare(
            "SELECT target FROM links WHERE name = ?1 AND link_type = ?2 ORDER BY rowid",
        )?;

        let targets = stmt
            .query_map(params![name, link_type.as_str()], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;

        Ok(targets)
    }

    /// Links of the given types whose target names `bare_name`, whatever
    /// constraint or description the target carries
    pub fn find_naming(
        conn: &Connection,
        link_types: &[LinkType],
        bare_name: &str,
    ) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare_cached(
            "SELECT name, source, link_type, target FROM links
             WHERE link_type = ?1 AND (target = ?2 OR target LIKE ?3 ESCAPE '\\')
             ORDER BY rowid",
        )?;

        let prefix = format!("{}%", crate::db::escape_like(bare_name));
        let mut links = Vec::new();
        for link_type in link_types {
            let rows = stmt
                .query_map(params![link_type.as_str(), bare_name, &prefix], Self::from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            links.extend(
                rows.into_iter()
                    .filter(|link| DepSpec::matches_name(&link.target, bare_name)),
            );
        }
        Ok(links)
    }

    /// Convert a database row to a Link
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let source: String = row.get(1)?;
        let type_str: String = row.get(2)?;
        let link_type = type_str.parse::<LinkType>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                2,
                rusqlite::types::Type::Text,
                Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
            )
        })?;

        Ok(Self {
            name: row.get(0)?,
            source: Source::from(source.as_str()),
            link_type,
            target: row.get(3)?,
        })
    }
}

/// Group memberships (`package_groups` table)
pub struct GroupMembership;

impl GroupMembership {
    /// Replace every group membership of `(name, source)` with `groups`
    pub fn replace_for(conn: &Connection, name: &str, source: &str, groups: &[String]) -> Result<()> {
        conn.execute(
            "DELETE FROM package_groups WHERE name = ?1 AND source = ?2",
            [name, source],
        )?;

        let mut stmt = conn.prepare_cached(
            "INSERT INTO package_groups (name, source, groupname) VALUES (?1, ?2, ?3)",
        )?;
        for group in groups {
            stmt.execute(params![name, source, group])?;
        }
        Ok(())
    }

    /// Groups of `(name, source)`
    pub fn groups(conn: &Connection, name: &str, source: &str) -> Result<Vec<String>> {
        let mut stmt = conn.prepare(
            "SELECT groupname FROM package_groups WHERE name = ?1 AND source = ?2 ORDER BY rowid",
        )?;

        let groups = stmt
            .query_map([name, source], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;

        Ok(groups)
    }
}

/// Progress flag of the last rebuild or update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStatus {
    InProgress,
    Complete,
}

impl BuildStatus {
    pub fn as_str(&self) -> &str {
        match self {
            BuildStatus::InProgress => "in_progress",
            BuildStatus::Complete => "complete",
        }
    }
}

impl FromStr for BuildStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "in_progress" => Ok(BuildStatus::InProgress),
            "complete" => Ok(BuildStatus::Complete),
            _ => Err(format!("Invalid build status: {}", s)),
        }
    }
}

/// Key/value pairs of the `build_metadata` table
pub struct BuildMetadata;

impl BuildMetadata {
    pub const BUILD_STATUS: &'static str = "build_status";
    pub const LAST_UPSTREAM_SYNC: &'static str = "last_upstream_sync";
    pub const LAST_SYSTEM_SYNC: &'static str = "last_system_sync";

    pub fn get(conn: &Connection, key: &str) -> Result<Option<String>> {
        let value = conn
            .query_row(
                "SELECT value FROM build_metadata WHERE key = ?1",
                [key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn set(conn: &Connection, key: &str, value: &str) -> Result<()> {
        conn.execute(
            "INSERT INTO build_metadata (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            [key, value],
        )?;
        Ok(())
    }

    /// Current build status; an unset or unknown value reads as in progress
    pub fn build_status(conn: &Connection) -> Result<BuildStatus> {
        Ok(Self::get(conn, Self::BUILD_STATUS)?
            .and_then(|s| s.parse().ok())
            .unwrap_or(BuildStatus::InProgress))
    }

    pub fn set_build_status(conn: &Connection, status: BuildStatus) -> Result<()> {
        Self::set(conn, Self::BUILD_STATUS, status.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema;
    use tempfile::NamedTempFile;

    fn create_test_db() -> (NamedTempFile, Connection) {
        let temp_file = NamedTempFile::new().unwrap();
        let conn = Connection::open(temp_file.path()).unwrap();
        conn.execute("PRAGMA foreign_keys = ON", []).unwrap();
        schema::create(&conn).unwrap();
        (temp_file, conn)
    }

    fn sample_package(name: &str, source: Source) -> Package {
        let mut pkg = Package::new(name.to_string(), source, "1.0-1".to_string());
        pkg.description = Some("A test package".to_string());
        pkg.num_votes = Some(3);
        pkg.extended.licenses = vec!["MIT".to_string()];
        pkg
    }

    #[test]
    fn test_source_round_trip() {
        assert_eq!(Source::from("aur"), Source::Upstream);
        assert_eq!(Source::from("local"), Source::Local);
        assert_eq!(Source::from("extra"), Source::Repository("extra".to_string()));
        assert_eq!(Source::Repository("core".to_string()).as_str(), "core");
    }

    #[test]
    fn test_link_type_parse() {
        for link_type in LinkType::ALL {
            assert_eq!(link_type.as_str().parse::<LinkType>().unwrap(), link_type);
        }
        assert!("requires".parse::<LinkType>().is_err());
        assert!(LinkType::OptDepends.is_dependency());
        assert!(!LinkType::Provides.is_dependency());
    }

    #[test]
    fn test_package_upsert_and_find() {
        let (_temp, conn) = create_test_db();

        let mut pkg = sample_package("foo", Source::Upstream);
        pkg.upsert(&conn).unwrap();

        let found = Package::find(&conn, "foo", "aur").unwrap().unwrap();
        assert_eq!(found, pkg);

        pkg.version = "2.0-1".to_string();
        pkg.upsert(&conn).unwrap();
        assert_eq!(Package::count(&conn).unwrap(), 1);
        let found = Package::find(&conn, "foo", "aur").unwrap().unwrap();
        assert_eq!(found.version, "2.0-1");
    }

    #[test]
    fn test_same_name_under_several_sources() {
        let (_temp, conn) = create_test_db();

        sample_package("bash", Source::Upstream).upsert(&conn).unwrap();
        sample_package("bash", Source::Repository("core".to_string()))
            .upsert(&conn)
            .unwrap();

        let rows = Package::find_by_name(&conn, "bash").unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_links_replace_not_append() {
        let (_temp, conn) = create_test_db();
        sample_package("foo", Source::Upstream).upsert(&conn).unwrap();

        let first = vec![
            (LinkType::Depends, "bar".to_string()),
            (LinkType::Depends, "baz>=1".to_string()),
        ];
        Link::replace_for(&conn, "foo", "aur", &first).unwrap();
        Link::replace_for(&conn, "foo", "aur", &[(LinkType::Depends, "qux".to_string())])
            .unwrap();

        let targets = Link::targets(&conn, "foo", "aur", LinkType::Depends).unwrap();
        assert_eq!(targets, vec!["qux".to_string()]);
    }

    #[test]
    fn test_cascade_delete() {
        let (_temp, conn) = create_test_db();
        sample_package("foo", Source::Upstream).upsert(&conn).unwrap();
        Link::replace_for(&conn, "foo", "aur", &[(LinkType::Depends, "bar".to_string())])
            .unwrap();
        GroupMembership::replace_for(&conn, "foo", "aur", &["base-devel".to_string()]).unwrap();

        Package::delete(&conn, "foo", "aur").unwrap();

        let links: i64 = conn
            .query_row("SELECT COUNT(*) FROM links WHERE name = 'foo'", [], |row| row.get(0))
            .unwrap();
        assert_eq!(links, 0);
        assert!(GroupMembership::groups(&conn, "foo", "aur").unwrap().is_empty());
    }

    #[test]
    fn test_link_requires_package() {
        let (_temp, conn) = create_test_db();
        let result = Link::replace_for(
            &conn,
            "ghost",
            "aur",
            &[(LinkType::Depends, "bar".to_string())],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_find_naming_ignores_lookalikes() {
        let (_temp, conn) = create_test_db();
        sample_package("a", Source::Upstream).upsert(&conn).unwrap();
        Link::replace_for(
            &conn,
            "a",
            "aur",
            &[
                (LinkType::Provides, "sh=5.2".to_string()),
                (LinkType::Provides, "shadow".to_string()),
                (LinkType::Provides, "sh_x".to_string()),
            ],
        )
        .unwrap();

        let links = Link::find_naming(&conn, &[LinkType::Provides], "sh").unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].target, "sh=5.2");
    }

    #[test]
    fn test_build_status() {
        let (_temp, conn) = create_test_db();
        assert_eq!(
            BuildMetadata::build_status(&conn).unwrap(),
            BuildStatus::InProgress
        );
        BuildMetadata::set_build_status(&conn, BuildStatus::Complete).unwrap();
        assert_eq!(
            BuildMetadata::build_status(&conn).unwrap(),
            BuildStatus::Complete
        );
    }

    #[test]
    fn test_damaged_metadata_reads_empty() {
        assert_eq!(
            ExtendedAttributes::from_json(Some("{not json")),
            ExtendedAttributes::default()
        );
        let attrs = ExtendedAttributes::from_json(Some(r#"{"licenses":["GPL"]}"#));
        assert_eq!(attrs.licenses, vec!["GPL".to_string()]);
        assert!(attrs.files.is_empty());
    }
}
