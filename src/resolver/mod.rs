// src/resolver/mod.rs

//! Dependency resolution
//!
//! [`resolve_dependency_tree`] walks runtime dependencies depth-first and
//! returns an install order (dependencies before dependents), the cycles it
//! met, and which names the system already satisfies. The walk reads the
//! store only through [`DependencyLookup`], so it can run against any graph.
//!
//! [`providers`] answers the display questions: who can satisfy a
//! dependency, and who depends on a package.

pub mod providers;
pub mod traversal;

pub use providers::{
    Candidate, Dependant, EnrichedDependency, PackageDetails, Relation, get_dependants,
    get_enriched_dependencies, package_details,
};
pub use traversal::Traversal;

use crate::db::PackageDb;
use crate::db::models::{Link, LinkType, Source};
use crate::error::Result;
use crate::packages::DepSpec;
use std::collections::{BTreeSet, HashMap};
use tracing::{info, warn};

/// Read-only view of what is installed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstalledState {
    /// Installed package name to installed version
    installed: HashMap<String, String>,
    /// Every provided virtual name to the installed package providing it
    providers: HashMap<String, String>,
}

impl InstalledState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `(name, version, provides)` of each installed package
    pub fn from_packages<'a>(
        packages: impl IntoIterator<Item = (&'a str, &'a str, &'a [String])>,
    ) -> Self {
        let mut state = Self::new();
        for (name, version, provides) in packages {
            state.insert(name, version, provides);
        }
        state
    }

    pub fn insert(&mut self, name: &str, version: &str, provides: &[String]) {
        self.installed.insert(name.to_string(), version.to_string());
        for provided in provides {
            self.providers
                .insert(DepSpec::bare_name(provided), name.to_string());
        }
    }

    pub fn is_installed(&self, name: &str) -> bool {
        self.installed.contains_key(name)
    }

    pub fn version_of(&self, name: &str) -> Option<&str> {
        self.installed.get(name).map(String::as_str)
    }

    /// Installed package providing the virtual `name`
    pub fn provider_of(&self, name: &str) -> Option<&str> {
        self.providers.get(name).map(String::as_str)
    }

    /// Installed under its own name, or through a provider
    pub fn is_satisfied(&self, name: &str) -> bool {
        self.is_installed(name) || self.providers.contains_key(name)
    }

    pub fn names(&self) -> BTreeSet<String> {
        self.installed.keys().cloned().collect()
    }
}

/// Graph access the traversal needs
pub trait DependencyLookup {
    /// Stored spelling of `name`, or `None` when nothing carries it
    fn canonical_name(&self, name: &str) -> Result<Option<String>>;

    /// Bare runtime dependency names of `name`, merged across its sources
    fn dependencies(&self, name: &str) -> Result<Vec<String>>;

    /// Preferred `(source, version)` of `name`
    fn locate(&self, name: &str) -> Result<Option<(Source, String)>>;
}

impl DependencyLookup for PackageDb {
    fn canonical_name(&self, name: &str) -> Result<Option<String>> {
        Ok(self.package_info(name, None)?.map(|info| info.package.name))
    }

    fn dependencies(&self, name: &str) -> Result<Vec<String>> {
        let targets = self.with_connection("dependencies", |conn| {
            Link::targets_any_source(conn, name, LinkType::Depends)
        })?;

        let mut names: Vec<String> = Vec::new();
        for target in targets {
            let bare = DepSpec::bare_name(&target);
            if !bare.is_empty() && !names.contains(&bare) {
                names.push(bare);
            }
        }
        Ok(names)
    }

    fn locate(&self, name: &str) -> Result<Option<(Source, String)>> {
        Ok(self
            .package_info(name, None)?
            .map(|info| (info.package.source, info.package.version)))
    }
}

/// One step of an install plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderEntry {
    pub name: String,
    pub source: Source,
    pub version: String,
}

/// Outcome of [`resolve_dependency_tree`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    /// Packages to install, dependencies first; installed and satisfied
    /// names are left out
    pub order: Vec<OrderEntry>,
    /// Each cycle as the path from its first member back to that member
    pub cycles: Vec<Vec<String>>,
    pub installed: BTreeSet<String>,
    pub satisfied: BTreeSet<String>,
    /// First requested name the store does not know; everything else is
    /// empty when set
    pub unresolved: Option<String>,
}

impl Resolution {
    fn unresolved(name: &str) -> Self {
        Self {
            unresolved: Some(name.to_string()),
            ..Default::default()
        }
    }

    pub fn has_cycles(&self) -> bool {
        !self.cycles.is_empty()
    }

    /// Steps available prebuilt from a system repository
    pub fn from_repositories(&self) -> impl Iterator<Item = &OrderEntry> {
        self.order
            .iter()
            .filter(|entry| matches!(entry.source, Source::Repository(_)))
    }

    /// Steps that must be built from source
    pub fn to_build(&self) -> impl Iterator<Item = &OrderEntry> {
        self.order
            .iter()
            .filter(|entry| !matches!(entry.source, Source::Repository(_)))
    }
}

/// Resolve the install order for `names`.
///
/// `deep` keeps walking through dependencies that are already satisfied
/// (once each) so their own missing dependencies are found.
pub fn resolve_dependency_tree<L: DependencyLookup>(
    lookup: &L,
    installed: &InstalledState,
    names: &[String],
    deep: bool,
) -> Result<Resolution> {
    let mut roots = Vec::with_capacity(names.len());
    for name in names {
        match lookup.canonical_name(name)? {
            Some(canonical) => roots.push(canonical),
            None => {
                warn!("Could not find any package matching '{}'", name);
                return Ok(Resolution::unresolved(name));
            }
        }
    }

    let mut traversal = Traversal::new(lookup, installed, deep);
    for root in &roots {
        traversal.resolve(root)?;
    }
    let resolution = traversal.finish();

    info!(
        "Resolved {} package(s): {} to install, {} cycle(s)",
        roots.len(),
        resolution.order.len(),
        resolution.cycles.len()
    );
    Ok(resolution)
}
