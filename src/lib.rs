// src/lib.rs

//! pkgdex
//!
//! Local, queryable cache of AUR and pacman package metadata with
//! dependency resolution.
//!
//! # Architecture
//!
//! - Database-first: every package, link and group lives in one SQLite store
//! - Incremental sync: only changed upstream records and changed system
//!   package triples are rewritten
//! - Integrity: a schema version marker and a build status flag force a
//!   full rebuild when the store cannot be trusted
//! - Resolution: explicit-stack DFS producing an install order and cycles

pub mod config;
pub mod db;
mod error;
pub mod jobs;
pub mod packages;
pub mod query;
pub mod repository;
pub mod resolver;

pub use config::Config;
pub use db::PackageDb;
pub use error::{Error, Result};
pub use query::{Filter, Limit, SearchRequest, SearchResult, SortKey, search};
pub use repository::Synchronizer;
pub use resolver::{InstalledState, Resolution, resolve_dependency_tree};
