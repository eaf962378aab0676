// src/repository/parsers/mod.rs

//! System package manager readers
//!
//! This module turns the system package manager's databases into
//! [`SystemPackage`] records:
//! - Arch Linux: `sync/<repo>.db` tarballs and the `local/` directory tree

pub mod arch;

use crate::db::models::{BackupEntry, ExtendedAttributes, LinkType, Package, Source};
use crate::error::Result;
use crate::packages::PackageRecord;
use crate::resolver::InstalledState;
use std::collections::HashMap;

pub use arch::PacmanSource;

/// Anything that can enumerate the system's packages
pub trait SystemSource {
    /// Read every sync repository and the local database
    fn snapshot(&self) -> Result<SystemSnapshot>;
}

/// One package from a sync repository or the local database
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SystemPackage {
    pub name: String,
    pub version: String,
    /// Where the package is stored; assigned by [`SystemSnapshot::assemble`]
    pub source: Option<Source>,
    pub base: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
    pub filename: Option<String>,
    pub packager: Option<String>,
    pub arch: Option<String>,
    pub build_date: Option<i64>,
    pub install_date: Option<i64>,
    pub installed_size: Option<i64>,
    pub size: Option<i64>,
    pub md5sum: Option<String>,
    pub sha256sum: Option<String>,
    pub pgpsig: Option<String>,
    pub has_scriptlet: bool,
    pub licenses: Vec<String>,
    pub groups: Vec<String>,
    pub depends: Vec<String>,
    pub makedepends: Vec<String>,
    pub checkdepends: Vec<String>,
    pub optdepends: Vec<String>,
    pub provides: Vec<String>,
    pub replaces: Vec<String>,
    pub conflicts: Vec<String>,
    pub files: Vec<String>,
    pub backup: Vec<BackupEntry>,
}

impl SystemPackage {
    pub fn new(name: &str, version: &str) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            ..Default::default()
        }
    }

    /// Source tag, `local` until assigned
    pub fn source_or_local(&self) -> Source {
        self.source.clone().unwrap_or(Source::Local)
    }
}

impl PackageRecord for SystemPackage {
    fn links(&self) -> Vec<(LinkType, &str)> {
        let lists: [(LinkType, &Vec<String>); 7] = [
            (LinkType::Depends, &self.depends),
            (LinkType::MakeDepends, &self.makedepends),
            (LinkType::CheckDepends, &self.checkdepends),
            (LinkType::OptDepends, &self.optdepends),
            (LinkType::Provides, &self.provides),
            (LinkType::Replaces, &self.replaces),
            (LinkType::Conflicts, &self.conflicts),
        ];
        lists
            .into_iter()
            .flat_map(|(link_type, targets)| targets.iter().map(move |t| (link_type, t.as_str())))
            .collect()
    }

    fn groups(&self) -> &[String] {
        &self.groups
    }

    fn to_package(&self) -> Package {
        let mut package = Package::new(self.name.clone(), self.source_or_local(), self.version.clone());
        package.description = self.description.clone();
        package.url = self.url.clone();
        package.filename = self.filename.clone();
        package.packager = self.packager.clone();
        package.arch = self.arch.clone();
        package.build_date = self.build_date;
        package.install_date = self.install_date;
        package.package_base = self.base.clone();
        package.installed_size = self.installed_size;
        package.size = self.size;
        package.md5sum = self.md5sum.clone();
        package.sha256sum = self.sha256sum.clone();
        package.base64_sig = self.pgpsig.clone();
        package.has_scriptlet = self.has_scriptlet;
        package.extended = ExtendedAttributes {
            licenses: self.licenses.clone(),
            files: self.files.clone(),
            backup: self.backup.clone(),
            ..Default::default()
        };
        package
    }
}

/// Everything the system package manager currently knows
#[derive(Debug, Clone, Default)]
pub struct SystemSnapshot {
    /// Rows to store, each with its source assigned
    pub packages: Vec<SystemPackage>,
    installed: InstalledState,
}

impl SystemSnapshot {
    /// Merge repository listings with the local database.
    ///
    /// An installed package that a repository carries is stored under that
    /// repository with the installed record's metadata. Installed packages no
    /// repository carries are stored under `local`. Repositories are visited
    /// in configuration order; the first one carrying a name claims the
    /// installed record.
    pub fn assemble(repos: Vec<(String, Vec<SystemPackage>)>, local: Vec<SystemPackage>) -> Self {
        let installed = InstalledState::from_packages(
            local
                .iter()
                .map(|p| (p.name.as_str(), p.version.as_str(), p.provides.as_slice())),
        );

        let mut unclaimed: HashMap<String, SystemPackage> =
            local.into_iter().map(|p| (p.name.clone(), p)).collect();
        let mut packages = Vec::new();

        for (repo, repo_packages) in repos {
            for pkg in repo_packages {
                let mut chosen = unclaimed.remove(&pkg.name).unwrap_or(pkg);
                chosen.source = Some(Source::Repository(repo.clone()));
                packages.push(chosen);
            }
        }

        let mut leftovers: Vec<SystemPackage> = unclaimed.into_values().collect();
        leftovers.sort_by(|a, b| a.name.cmp(&b.name));
        for mut pkg in leftovers {
            pkg.source = Some(Source::Local);
            packages.push(pkg);
        }

        Self {
            packages,
            installed,
        }
    }

    /// Installed names and the virtual names they provide
    pub fn installed_state(&self) -> InstalledState {
        self.installed.clone()
    }

    /// `(name, version, source)` of every row to store
    pub fn triples(&self) -> Vec<(String, String, String)> {
        self.packages
            .iter()
            .map(|p| {
                (
                    p.name.clone(),
                    p.version.clone(),
                    p.source_or_local().as_str().to_string(),
                )
            })
            .collect()
    }
}
