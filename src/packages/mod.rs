// src/packages/mod.rs

//! Package record handling for pkgdex
//!
//! This module provides the dependency specifier parser and the normalizer
//! that turns raw feed and pacman records into store rows. Each record type
//! implements the `PackageRecord` trait.

pub mod depspec;
pub mod normalize;
pub mod traits;

pub use depspec::{DepSpec, clean_version};
pub use normalize::{NormalizedPackage, normalize};
pub use traits::PackageRecord;
