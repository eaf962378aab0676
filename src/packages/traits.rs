// src/packages/traits.rs

//! Common trait for raw package records

use crate::db::models::{LinkType, Package};

/// Common interface for every record the sync pipeline ingests (upstream
/// feed entries, pacman sync and local database entries)
pub trait PackageRecord {
    /// Raw link targets as declared, grouped by relation
    fn links(&self) -> Vec<(LinkType, &str)>;

    /// Group memberships
    fn groups(&self) -> &[String];

    /// Convert this record to the canonical `packages` row, name, version
    /// and source included
    fn to_package(&self) -> Package;
}
