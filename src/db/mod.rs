// src/db/mod.rs

//! Database layer for pkgdex
//!
//! This module handles all SQLite operations including:
//! - Database initialization and schema creation
//! - Connection setup (pragmas and the `REGEXP` function)
//! - Transaction handling
//! - The serialized, cached [`PackageDb`] handle used by everything else

pub mod cache;
pub mod models;
pub mod schema;
pub mod store;

pub use store::PackageDb;

use crate::error::{Error, Result};
use regex::RegexBuilder;
use rusqlite::functions::FunctionFlags;
use rusqlite::{Connection, Transaction};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Initialize a pkgdex database at the specified path
///
/// Creates the database file and parent directories and sets up the
/// schema. Calling it on an existing, current database is safe.
pub fn init(db_path: &Path) -> Result<Connection> {
    debug!("Initializing database at: {}", db_path.display());

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            Error::InitError(format!("Failed to create database directory: {}", e))
        })?;
    }

    let conn = connect(db_path)?;
    conn.execute_batch("PRAGMA journal_mode = WAL;")?;
    schema::create(&conn)?;

    info!("Database initialized at {}", db_path.display());
    Ok(conn)
}

/// Open an existing pkgdex database
pub fn open(db_path: &Path) -> Result<Connection> {
    if !db_path.exists() {
        return Err(Error::DatabaseNotFound(db_path.display().to_string()));
    }
    connect(db_path)
}

/// Open a connection with pragmas and custom functions applied
fn connect(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)?;

    conn.execute_batch(
        "
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        PRAGMA busy_timeout = 5000;
        ",
    )?;
    register_regexp(&conn)?;

    Ok(conn)
}

/// Register a case-insensitive `REGEXP` operator backed by the regex crate.
///
/// `x REGEXP y` is evaluated by SQLite as `regexp(y, x)`. NULL text never
/// matches. Compiled patterns are cached per statement.
fn register_regexp(conn: &Connection) -> Result<()> {
    conn.create_scalar_function(
        "regexp",
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let pattern: Arc<regex::Regex> =
                ctx.get_or_create_aux(0, |value| -> std::result::Result<_, BoxError> {
                    Ok(RegexBuilder::new(value.as_str()?)
                        .case_insensitive(true)
                        .build()?)
                })?;
            let text: Option<String> = ctx.get(1)?;
            Ok(text.is_some_and(|text| pattern.is_match(&text)))
        },
    )?;
    Ok(())
}

/// Run `f` inside a transaction, committing only if it succeeds
pub fn transaction<F, T>(conn: &mut Connection, f: F) -> Result<T>
where
    F: FnOnce(&Transaction) -> Result<T>,
{
    let tx = conn.transaction()?;
    let value = f(&tx)?;
    tx.commit()?;
    Ok(value)
}

/// Escape `\`, `%` and `_` for use in `LIKE ... ESCAPE '\'`
pub fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Delete a database file together with its WAL and shared-memory files
pub fn remove_files(db_path: &Path) -> Result<()> {
    let mut wal = db_path.as_os_str().to_owned();
    wal.push("-wal");
    let mut shm = db_path.as_os_str().to_owned();
    shm.push("-shm");

    for path in [db_path.to_path_buf(), PathBuf::from(wal), PathBuf::from(shm)] {
        match std::fs::remove_file(&path) {
            Ok(()) => debug!("Removed {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!("Could not remove {}: {}", path.display(), e);
                return Err(e.into());
            }
        }
    }
    Ok(())
}
