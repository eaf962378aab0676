// src/db/schema.rs

//! Database schema definitions for pkgdex
//!
//! The store is a cache: it is never migrated in place. When the version
//! recorded in `PRAGMA user_version` differs from [`SCHEMA_VERSION`] the
//! whole store is dropped and rebuilt from its sources.

use crate::error::Result;
use rusqlite::Connection;
use tracing::{debug, info};

/// Current schema version
pub const SCHEMA_VERSION: i32 = 3;

/// Tables in dependency order (children first, so drops never trip a
/// foreign key)
const TABLES: [&str; 4] = ["links", "package_groups", "packages", "build_metadata"];

/// Get the schema version recorded in the database file
pub fn get_schema_version(conn: &Connection) -> Result<i32> {
    Ok(conn.query_row("PRAGMA user_version", [], |row| row.get(0))?)
}

/// Record the schema version in the database file
fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute_batch(&format!("PRAGMA user_version = {}", version))?;
    Ok(())
}

/// True when the file was written by this schema version
pub fn is_current(conn: &Connection) -> Result<bool> {
    Ok(get_schema_version(conn)? == SCHEMA_VERSION)
}

/// Create all tables and indices, then stamp the schema version
pub fn create(conn: &Connection) -> Result<()> {
    debug!("Creating schema version {}", SCHEMA_VERSION);

    conn.execute_batch(
        "
        -- Packages: one row per (name, source)
        CREATE TABLE IF NOT EXISTS packages (
            name TEXT NOT NULL COLLATE NOCASE,
            source TEXT NOT NULL,
            pkg_id INTEGER,
            version TEXT,
            description TEXT,
            url TEXT,
            url_path TEXT,
            filename TEXT,
            maintainer TEXT,
            submitter TEXT,
            packager TEXT,
            arch TEXT,
            build_date INTEGER,
            install_date INTEGER,
            first_submitted INTEGER,
            last_modified INTEGER,
            popularity REAL,
            out_of_date INTEGER,
            package_base TEXT,
            package_base_id INTEGER,
            num_votes INTEGER,
            isize INTEGER,
            size INTEGER,
            md5sum TEXT,
            sha256sum TEXT,
            base64_sig TEXT,
            has_scriptlet INTEGER NOT NULL DEFAULT 0,
            metadata TEXT,
            PRIMARY KEY (name, source)
        );

        CREATE INDEX IF NOT EXISTS idx_packages_name ON packages(name);
        CREATE INDEX IF NOT EXISTS idx_packages_source ON packages(source);

        -- Links: typed edges from a package to a raw target specifier
        CREATE TABLE IF NOT EXISTS links (
            name TEXT NOT NULL COLLATE NOCASE,
            source TEXT NOT NULL,
            link_type TEXT NOT NULL CHECK(link_type IN (
                'depends', 'makedepends', 'checkdepends', 'optdepends',
                'provides', 'replaces', 'conflicts')),
            target TEXT NOT NULL,
            FOREIGN KEY (name, source) REFERENCES packages(name, source) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_links_type_target ON links(link_type, target);
        CREATE INDEX IF NOT EXISTS idx_links_name ON links(name);

        -- Group memberships
        CREATE TABLE IF NOT EXISTS package_groups (
            name TEXT NOT NULL COLLATE NOCASE,
            source TEXT NOT NULL,
            groupname TEXT NOT NULL,
            FOREIGN KEY (name, source) REFERENCES packages(name, source) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_groups_groupname ON package_groups(groupname);
        CREATE INDEX IF NOT EXISTS idx_groups_name ON package_groups(name);

        -- Pipeline progress
        CREATE TABLE IF NOT EXISTS build_metadata (
            key TEXT PRIMARY KEY,
            value TEXT
        );
        ",
    )?;

    set_schema_version(conn, SCHEMA_VERSION)?;

    info!("Schema version {} created", SCHEMA_VERSION);
    Ok(())
}

/// Drop every table, leaving an empty file
pub fn drop_all(conn: &Connection) -> Result<()> {
    debug!("Dropping all tables");

    for table in TABLES {
        conn.execute_batch(&format!("DROP TABLE IF EXISTS {}", table))?;
    }
    set_schema_version(conn, 0)?;
    Ok(())
}

/// Drop and recreate the whole schema
pub fn recreate(conn: &Connection) -> Result<()> {
    drop_all(conn)?;
    create(conn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn create_test_db() -> (NamedTempFile, Connection) {
        let temp_file = NamedTempFile::new().unwrap();
        let conn = Connection::open(temp_file.path()).unwrap();
        conn.execute("PRAGMA foreign_keys = ON", []).unwrap();
        (temp_file, conn)
    }

    fn table_names(conn: &Connection) -> Vec<String> {
        conn.prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap()
    }

    #[test]
    fn test_schema_version_tracking() {
        let (_temp, conn) = create_test_db();

        assert_eq!(get_schema_version(&conn).unwrap(), 0);
        assert!(!is_current(&conn).unwrap());

        create(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
        assert!(is_current(&conn).unwrap());
    }

    #[test]
    fn test_create_makes_all_tables() {
        let (_temp, conn) = create_test_db();
        create(&conn).unwrap();

        let tables = table_names(&conn);
        for table in TABLES {
            assert!(tables.contains(&table.to_string()), "missing {}", table);
        }
    }

    #[test]
    fn test_create_is_idempotent() {
        let (_temp, conn) = create_test_db();
        create(&conn).unwrap();
        create(&conn).unwrap();
        assert!(is_current(&conn).unwrap());
    }

    #[test]
    fn test_recreate_empties_tables() {
        let (_temp, conn) = create_test_db();
        create(&conn).unwrap();
        conn.execute(
            "INSERT INTO packages (name, source, version) VALUES ('foo', 'aur', '1.0')",
            [],
        )
        .unwrap();

        recreate(&conn).unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM packages", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
        assert!(is_current(&conn).unwrap());
    }

    #[test]
    fn test_name_source_unique() {
        let (_temp, conn) = create_test_db();
        create(&conn).unwrap();

        conn.execute(
            "INSERT INTO packages (name, source, version) VALUES ('foo', 'aur', '1.0')",
            [],
        )
        .unwrap();
        let result = conn.execute(
            "INSERT INTO packages (name, source, version) VALUES ('foo', 'aur', '2.0')",
            [],
        );
        assert!(result.is_err());

        conn.execute(
            "INSERT INTO packages (name, source, version) VALUES ('foo', 'extra', '1.0')",
            [],
        )
        .unwrap();
    }

    #[test]
    fn test_link_type_check() {
        let (_temp, conn) = create_test_db();
        create(&conn).unwrap();
        conn.execute(
            "INSERT INTO packages (name, source, version) VALUES ('foo', 'aur', '1.0')",
            [],
        )
        .unwrap();

        let result = conn.execute(
            "INSERT INTO links (name, source, link_type, target) VALUES ('foo', 'aur', 'requires', 'bar')",
            [],
        );
        assert!(result.is_err());
    }
}
