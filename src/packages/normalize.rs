// src/packages/normalize.rs

//! Record normalizer
//!
//! Turns any [`PackageRecord`] into the rows the store holds for it. Pure;
//! writing is a separate step so the whole unit can go into one transaction.

use super::depspec::clean_version;
use super::traits::PackageRecord;
use crate::db::models::{GroupMembership, Link, LinkType, Package};
use crate::error::Result;
use rusqlite::Connection;
use std::collections::HashSet;

/// One package in canonical row shape
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedPackage {
    pub package: Package,
    pub links: Vec<(LinkType, String)>,
    pub groups: Vec<String>,
}

impl NormalizedPackage {
    /// Upsert the row and replace its links and groups.
    ///
    /// Callers run this inside a transaction so the three tables change
    /// together.
    pub fn store(&self, conn: &Connection) -> Result<()> {
        let name = &self.package.name;
        let source = self.package.source.as_str();

        self.package.upsert(conn)?;
        Link::replace_for(conn, name, source, &self.links)?;
        GroupMembership::replace_for(conn, name, source, &self.groups)?;
        Ok(())
    }
}

/// Normalize a record.
///
/// Blank and repeated link targets are dropped, keeping first-declaration
/// order. Packages outside the upstream feed also provide their own name at
/// their cleaned version, so `name=version` lookups find them the same way
/// they find virtual names.
pub fn normalize<R: PackageRecord>(record: &R) -> NormalizedPackage {
    let package = record.to_package();

    let mut seen = HashSet::new();
    let mut links = Vec::new();
    for (link_type, target) in record.links() {
        let target = target.trim();
        if target.is_empty() {
            continue;
        }
        if seen.insert((link_type, target.to_string())) {
            links.push((link_type, target.to_string()));
        }
    }

    if !package.source.is_upstream() {
        let self_provide = format!("{}={}", package.name, clean_version(&package.version));
        if seen.insert((LinkType::Provides, self_provide.clone())) {
            links.push((LinkType::Provides, self_provide));
        }
    }

    let mut groups: Vec<String> = Vec::new();
    for group in record.groups() {
        if !group.is_empty() && !groups.contains(group) {
            groups.push(group.clone());
        }
    }

    NormalizedPackage {
        package,
        links,
        groups,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::Source;

    struct Fixture {
        name: String,
        version: String,
        source: Source,
        depends: Vec<String>,
        provides: Vec<String>,
        groups: Vec<String>,
    }

    impl Fixture {
        fn new(name: &str, version: &str, source: Source) -> Self {
            Self {
                name: name.to_string(),
                version: version.to_string(),
                source,
                depends: Vec::new(),
                provides: Vec::new(),
                groups: Vec::new(),
            }
        }
    }

    impl PackageRecord for Fixture {
        fn links(&self) -> Vec<(LinkType, &str)> {
            self.depends
                .iter()
                .map(|d| (LinkType::Depends, d.as_str()))
                .chain(self.provides.iter().map(|p| (LinkType::Provides, p.as_str())))
                .collect()
        }

        fn groups(&self) -> &[String] {
            &self.groups
        }

        fn to_package(&self) -> Package {
            Package::new(self.name.clone(), self.source.clone(), self.version.clone())
        }
    }

    #[test]
    fn test_system_package_provides_itself() {
        let mut fixture = Fixture::new("bash", "1:5.2.037-1", Source::Repository("core".to_string()));
        fixture.provides.push("sh".to_string());

        let normalized = normalize(&fixture);
        assert_eq!(
            normalized.links,
            vec![
                (LinkType::Provides, "sh".to_string()),
                (LinkType::Provides, "bash=5.2.037".to_string()),
            ]
        );
    }

    #[test]
    fn test_upstream_package_has_no_self_provide() {
        let fixture = Fixture::new("yay", "12.0-1", Source::Upstream);
        assert!(normalize(&fixture).links.is_empty());
    }

    #[test]
    fn test_duplicates_and_blanks_dropped() {
        let mut fixture = Fixture::new("foo", "1.0-1", Source::Upstream);
        fixture.depends = vec![
            "bar".to_string(),
            " ".to_string(),
            "baz".to_string(),
            "bar".to_string(),
        ];
        fixture.groups = vec!["g".to_string(), "g".to_string()];

        let normalized = normalize(&fixture);
        assert_eq!(
            normalized.links,
            vec![
                (LinkType::Depends, "bar".to_string()),
                (LinkType::Depends, "baz".to_string()),
            ]
        );
        assert_eq!(normalized.groups, vec!["g".to_string()]);
    }

    #[test]
    fn test_declared_self_provide_not_repeated() {
        let mut fixture = Fixture::new("foo", "2.0-3", Source::Local);
        fixture.provides.push("foo=2.0".to_string());

        let normalized = normalize(&fixture);
        assert_eq!(normalized.links.len(), 1);
    }
}
