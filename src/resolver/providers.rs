// src/resolver/providers.rs

//! Provider and dependant lookups for package details
//!
//! None of this affects install ordering. It answers which stored packages
//! could satisfy each dependency of a record, and which packages depend on
//! it.

use super::InstalledState;
use crate::db::PackageDb;
use crate::db::models::{Link, LinkType, Package, Source};
use crate::db::store::PackageInfo;
use crate::error::Result;
use crate::jobs::CancelToken;
use crate::packages::DepSpec;
use rusqlite::Connection;
use std::collections::HashSet;
use tracing::debug;

/// How a candidate satisfies a name. Declaration order is display precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Relation {
    Replaces,
    Provides,
    Direct,
}

impl Relation {
    pub fn as_str(&self) -> &str {
        match self {
            Relation::Replaces => "replaces",
            Relation::Provides => "provides",
            Relation::Direct => "direct",
        }
    }
}

/// A stored package able to satisfy a dependency
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub name: String,
    pub source: Source,
    pub relation: Relation,
    pub version: String,
    pub installed: bool,
}

/// One dependency of a record with its possible providers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrichedDependency {
    pub spec: DepSpec,
    pub raw: String,
    pub candidates: Vec<Candidate>,
}

/// A package whose dependency list names the queried package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependant {
    pub name: String,
    pub source: Source,
    pub relation: LinkType,
}

/// Everything shown for one selected package
#[derive(Debug, Clone, PartialEq)]
pub struct PackageDetails {
    pub info: PackageInfo,
    /// Installed version of this name, if any
    pub installed_version: Option<String>,
    /// Every source the name is stored under, upstream first
    pub sources: Vec<Source>,
    pub dependencies: Vec<(LinkType, Vec<EnrichedDependency>)>,
    pub dependants: Vec<(String, Vec<Dependant>)>,
}

/// Candidates for the bare name `name`, in display order
fn candidates(conn: &Connection, name: &str, installed: &InstalledState) -> Result<Vec<Candidate>> {
    let mut found: Vec<(String, Source, Relation)> = Vec::new();

    for link in Link::find_naming(conn, &[LinkType::Replaces], name)? {
        found.push((link.name, link.source, Relation::Replaces));
    }
    for link in Link::find_naming(conn, &[LinkType::Provides], name)? {
        // a package's provide of its own name is the direct match below
        if !link.name.eq_ignore_ascii_case(name) {
            found.push((link.name, link.source, Relation::Provides));
        }
    }
    for package in Package::find_by_name(conn, name)? {
        found.push((package.name, package.source, Relation::Direct));
    }

    let mut seen = HashSet::new();
    found.retain(|(name, source, _)| seen.insert((name.clone(), source.clone())));

    let repository_satisfies = found.iter().any(|(_, source, relation)| {
        *relation != Relation::Replaces && matches!(source, Source::Repository(_))
    });
    if repository_satisfies {
        found.retain(|(_, source, relation)| {
            !(*relation == Relation::Replaces && source.is_upstream())
        });
    }

    let mut result = Vec::with_capacity(found.len());
    for (name, source, relation) in found {
        let version = Package::find(conn, &name, source.as_str())?
            .map(|p| p.version)
            .unwrap_or_default();
        result.push(Candidate {
            installed: installed.is_installed(&name),
            name,
            source,
            relation,
            version,
        });
    }

    result.sort_by(|a, b| {
        (a.source.is_upstream(), a.relation, &a.name).cmp(&(b.source.is_upstream(), b.relation, &b.name))
    });
    Ok(result)
}

/// Candidates able to satisfy `spec`, ignoring any version constraint
pub fn providers_of(db: &PackageDb, spec: &str, installed: &InstalledState) -> Result<Vec<Candidate>> {
    let name = DepSpec::bare_name(spec);
    db.with_connection("providers_of", |conn| candidates(conn, &name, installed))
}

/// Per dependency type of `info`, each raw dependency with its candidates
pub fn get_enriched_dependencies(
    db: &PackageDb,
    info: &PackageInfo,
    installed: &InstalledState,
) -> Result<Vec<(LinkType, Vec<EnrichedDependency>)>> {
    db.with_connection("get_enriched_dependencies", |conn| {
        let mut enriched = Vec::with_capacity(LinkType::DEPENDENCIES.len());
        for link_type in LinkType::DEPENDENCIES {
            let mut entries = Vec::new();
            for raw in info.links(link_type) {
                let spec = DepSpec::parse(raw);
                let candidates = candidates(conn, &spec.name, installed)?;
                entries.push(EnrichedDependency {
                    spec,
                    raw: raw.clone(),
                    candidates,
                });
            }
            enriched.push((link_type, entries));
        }
        Ok(enriched)
    })
}

/// Packages depending on `name` or on any of its `provides`.
///
/// Keyed by provided name: `name` itself first, then each bare provide in
/// declaration order. A package is not listed as its own dependant.
pub fn get_dependants(
    db: &PackageDb,
    name: &str,
    provides: &[String],
) -> Result<Vec<(String, Vec<Dependant>)>> {
    let mut provided = vec![name.to_string()];
    for spec in provides {
        let bare = DepSpec::bare_name(spec);
        if !bare.is_empty() && !provided.iter().any(|p| p.eq_ignore_ascii_case(&bare)) {
            provided.push(bare);
        }
    }

    db.with_connection("get_dependants", |conn| {
        let mut result = Vec::with_capacity(provided.len());
        for target in provided {
            let mut seen = HashSet::new();
            let dependants: Vec<Dependant> = Link::find_naming(conn, &LinkType::DEPENDENCIES, &target)?
                .into_iter()
                .filter(|link| !link.name.eq_ignore_ascii_case(name))
                .filter(|link| seen.insert((link.name.clone(), link.source.clone(), link.link_type)))
                .map(|link| Dependant {
                    name: link.name,
                    source: link.source,
                    relation: link.link_type,
                })
                .collect();
            result.push((target, dependants));
        }
        Ok(result)
    })
}

/// Load a package with its sources, providers and dependants.
///
/// `token` is checked after every phase; a cancelled request returns
/// [`Error::Cancelled`](crate::error::Error::Cancelled) and nothing else.
pub fn package_details(
    db: &PackageDb,
    name: &str,
    source: Option<&str>,
    installed: &InstalledState,
    token: &CancelToken,
) -> Result<Option<PackageDetails>> {
    details_with(db, name, source, installed, |phase| token.check(phase))
}

/// [`package_details`] with `after_phase` run after each phase
fn details_with(
    db: &PackageDb,
    name: &str,
    source: Option<&str>,
    installed: &InstalledState,
    mut after_phase: impl FnMut(&'static str) -> Result<()>,
) -> Result<Option<PackageDetails>> {
    let info = db.package_info(name, source)?;
    after_phase("fetch")?;
    let Some(info) = info else {
        debug!("No details for '{}'", name);
        return Ok(None);
    };

    let sources = db.sources_of(&info.package.name)?;
    after_phase("lookup")?;

    let dependencies = get_enriched_dependencies(db, &info, installed)?;
    after_phase("dependencies")?;

    let dependants = get_dependants(db, &info.package.name, &info.provides)?;
    after_phase("dependants")?;

    Ok(Some(PackageDetails {
        installed_version: installed.version_of(&info.package.name).map(str::to_string),
        info,
        sources,
        dependencies,
        dependants,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::packages::normalize;
    use crate::repository::{FeedRecord, SystemPackage};
    use std::path::Path;
    use tempfile::tempdir;

    fn repo_pkg(name: &str, repo: &str, version: &str) -> SystemPackage {
        let mut pkg = SystemPackage::new(name, version);
        pkg.source = Some(Source::Repository(repo.to_string()));
        pkg
    }

    fn feed_record(name: &str) -> FeedRecord {
        FeedRecord {
            name: name.to_string(),
            version: "1.0-1".to_string(),
            ..Default::default()
        }
    }

    fn seeded(dir: &Path) -> PackageDb {
        let db = PackageDb::new(dir.join("packages.db"), 16);
        db.with_init_connection("seed", |conn| {
            let mut replacer = feed_record("shell-ng");
            replacer.replaces = vec!["sh".to_string()];
            normalize(&replacer).store(conn)?;

            let mut bash = repo_pkg("bash", "core", "5.2.026-2");
            bash.provides = vec!["sh".to_string()];
            normalize(&bash).store(conn)?;

            let mut dash = repo_pkg("dash", "extra", "0.5.12-1");
            dash.provides = vec!["sh".to_string()];
            normalize(&dash).store(conn)?;

            let mut tool = feed_record("tool");
            tool.depends = vec!["bash>=5".to_string(), "sh".to_string()];
            tool.opt_depends = vec!["dash: faster scripts".to_string()];
            normalize(&tool).store(conn)?;

            let mut vim_plugin = feed_record("vim-plugin");
            vim_plugin.replaces = vec!["vim".to_string()];
            normalize(&vim_plugin).store(conn)?;
            Ok(())
        })
        .unwrap();
        db
    }

    fn summary(candidates: &[Candidate]) -> Vec<(&str, Relation)> {
        candidates.iter().map(|c| (c.name.as_str(), c.relation)).collect()
    }

    #[test]
    fn test_repository_provider_hides_upstream_replacement() {
        let dir = tempdir().unwrap();
        let db = seeded(dir.path());

        let found = providers_of(&db, "sh", &InstalledState::new()).unwrap();
        assert_eq!(
            summary(&found),
            vec![("bash", Relation::Provides), ("dash", Relation::Provides)]
        );
    }

    #[test]
    fn test_upstream_replacement_kept_without_repository_provider() {
        let dir = tempdir().unwrap();
        let db = seeded(dir.path());

        let found = providers_of(&db, "vim>=9", &InstalledState::new()).unwrap();
        assert_eq!(summary(&found), vec![("vim-plugin", Relation::Replaces)]);
        assert_eq!(found[0].source, Source::Upstream);
    }

    #[test]
    fn test_local_provider_keeps_upstream_replacement() {
        let dir = tempdir().unwrap();
        let db = seeded(dir.path());
        db.with_connection("local", |conn| {
            let mut replacer = feed_record("vi-ng");
            replacer.replaces = vec!["vi".to_string()];
            normalize(&replacer).store(conn)?;

            let mut hand_built = SystemPackage::new("my-vi", "1.0-1");
            hand_built.provides = vec!["vi".to_string()];
            normalize(&hand_built).store(conn)
        })
        .unwrap();

        let found = providers_of(&db, "vi", &InstalledState::new()).unwrap();
        assert_eq!(
            summary(&found),
            vec![("my-vi", Relation::Provides), ("vi-ng", Relation::Replaces)]
        );
        assert_eq!(found[0].source, Source::Local);
    }

    #[test]
    fn test_self_provide_is_direct() {
        let dir = tempdir().unwrap();
        let db = seeded(dir.path());

        let mut installed = InstalledState::new();
        installed.insert("bash", "5.2.026-2", &[]);

        let found = providers_of(&db, "bash=5.2.026", &installed).unwrap();
        assert_eq!(summary(&found), vec![("bash", Relation::Direct)]);
        assert!(found[0].installed);
        assert_eq!(found[0].version, "5.2.026-2");
    }

    #[test]
    fn test_enriched_dependencies() {
        let dir = tempdir().unwrap();
        let db = seeded(dir.path());
        let info = db.package_info("tool", None).unwrap().unwrap();

        let enriched = get_enriched_dependencies(&db, &info, &InstalledState::new()).unwrap();
        assert_eq!(enriched.len(), 4);

        let (link_type, depends) = &enriched[0];
        assert_eq!(*link_type, LinkType::Depends);
        assert_eq!(depends[0].spec.name, "bash");
        assert_eq!(depends[0].raw, "bash>=5");
        assert_eq!(summary(&depends[1].candidates).len(), 2);

        let optdepends = &enriched
            .iter()
            .find(|(lt, _)| *lt == LinkType::OptDepends)
            .unwrap()
            .1;
        assert_eq!(optdepends[0].spec.description.as_deref(), Some("faster scripts"));
        assert_eq!(summary(&optdepends[0].candidates), vec![("dash", Relation::Direct)]);
    }

    #[test]
    fn test_dependants_by_provided_name() {
        let dir = tempdir().unwrap();
        let db = seeded(dir.path());

        let dependants = get_dependants(&db, "bash", &["sh".to_string(), "bash=5.2.026".to_string()]).unwrap();
        let keys: Vec<&str> = dependants.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["bash", "sh"]);

        assert_eq!(dependants[0].1.len(), 1);
        assert_eq!(dependants[0].1[0].name, "tool");
        assert_eq!(dependants[0].1[0].relation, LinkType::Depends);
        assert_eq!(dependants[1].1[0].name, "tool");
    }

    #[test]
    fn test_package_details_cancelled() {
        let dir = tempdir().unwrap();
        let db = seeded(dir.path());
        let token = CancelToken::new();

        let details = package_details(&db, "tool", None, &InstalledState::new(), &token)
            .unwrap()
            .unwrap();
        assert_eq!(details.sources, vec![Source::Upstream]);
        assert_eq!(details.installed_version, None);
        assert_eq!(details.dependants[0].0, "tool");

        token.cancel();
        let result = package_details(&db, "tool", None, &InstalledState::new(), &token);
        assert!(matches!(result, Err(Error::Cancelled("fetch"))));
    }

    #[test]
    fn test_cancelled_between_phases_returns_nothing() {
        let dir = tempdir().unwrap();
        let db = seeded(dir.path());

        for target in ["lookup", "dependencies", "dependants"] {
            let token = CancelToken::new();
            let mut reached = Vec::new();
            let result = details_with(&db, "tool", None, &InstalledState::new(), |phase| {
                reached.push(phase);
                if phase == target {
                    token.cancel();
                }
                token.check(phase)
            });

            match result {
                Err(Error::Cancelled(phase)) => assert_eq!(phase, target),
                other => panic!("expected cancellation after {}, got {:?}", target, other),
            }
            assert_eq!(reached.last(), Some(&target));
        }
    }
}
