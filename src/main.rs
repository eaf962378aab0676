// src/main.rs

use anyhow::{Result, bail};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use pkgdex::db::models::LinkType;
use pkgdex::jobs::CancelToken;
use pkgdex::resolver::{self, PackageDetails};
use pkgdex::{Config, Filter, Limit, PackageDb, SearchRequest, SortKey, Synchronizer};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "pkgdex")]
#[command(author, version, about = "Unified AUR and pacman package index with dependency resolution", long_about = None)]
struct Cli {
    /// Database path (default: $PKGDEX_DB_DIR or the user cache directory)
    #[arg(long, global = true, value_name = "PATH")]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download the feed and rebuild the store from scratch
    Rebuild,
    /// Incrementally update the store
    Update {
        /// Reuse the cached feed snapshot instead of downloading
        #[arg(long)]
        no_download: bool,
    },
    /// Search packages by name (prefix the term with `re:` for a regex)
    Search {
        /// Search term
        term: Option<String>,
        /// Filter as key[=value], repeatable (abandoned, out_of_date,
        /// maintainer, repos, depends, makedepends, checkdepends,
        /// optdepends, provides, comaintainers, license)
        #[arg(short, long = "filter", value_name = "KEY[=VALUE]")]
        filters: Vec<String>,
        /// Maximum results, -1 for no limit
        #[arg(short, long, default_value_t = 20, allow_negative_numbers = true)]
        limit: i64,
        /// Sort key (name, popularity, votes, last_modified, first_submitted)
        #[arg(long, default_value = "popularity")]
        sort: String,
        /// Sort ascending
        #[arg(long)]
        asc: bool,
    },
    /// Show a package with its dependency providers and dependants
    Info {
        /// Package name
        name: String,
        /// Source to show (aur, a repository name, or local)
        #[arg(short, long)]
        source: Option<String>,
    },
    /// Show the install order for packages
    Deptree {
        /// Package names
        #[arg(required = true)]
        names: Vec<String>,
        /// Also walk through dependencies that are already satisfied
        #[arg(long)]
        deep: bool,
    },
    /// Generate shell completion scripts
    Completions {
        /// Shell type
        shell: Shell,
    },
}

fn main() -> Result<()> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = Config::from_env();
    if let Some(db_path) = cli.db {
        config = config.with_db_path(db_path);
    }
    let db = PackageDb::from_config(&config);
    let sync = Synchronizer::from_config(&config);

    match cli.command {
        Commands::Rebuild => {
            let count = sync.rebuild(&db, true, true)?;
            println!("Store rebuilt: {} packages", count);
        }
        Commands::Update { no_download } => {
            if sync.ensure_store(&db)? {
                println!("Store was rebuilt");
                return Ok(());
            }
            let count = sync.rebuild(&db, false, !no_download)?;
            println!("{} packages updated", count);
        }
        Commands::Search {
            term,
            filters,
            limit,
            sort,
            asc,
        } => {
            sync.ensure_store(&db)?;

            let mut request = SearchRequest::new(term.unwrap_or_default())
                .sort(SortKey::parse(&sort), !asc)
                .limit(Limit::from_arg(limit));
            for filter in &filters {
                request = request.filter(Filter::parse(filter)?);
            }

            let results = pkgdex::search(&db, &request)?;
            for result in &results {
                println!(
                    "{}/{} {} (votes: {}, popularity: {:.2})",
                    result.source, result.name, result.version, result.num_votes, result.popularity
                );
            }
            info!("{} result(s)", results.len());
        }
        Commands::Info { name, source } => {
            sync.ensure_store(&db)?;
            let installed = sync.installed_state()?;

            match resolver::package_details(&db, &name, source.as_deref(), &installed, &CancelToken::new())? {
                Some(details) => print_details(&details),
                None => bail!("Package '{}' not found", name),
            }
        }
        Commands::Deptree { names, deep } => {
            sync.ensure_store(&db)?;
            let installed = sync.installed_state()?;

            let resolution = pkgdex::resolve_dependency_tree(&db, &installed, &names, deep)?;
            if let Some(name) = &resolution.unresolved {
                bail!("Could not find any package matching '{}'", name);
            }

            println!("From repositories:");
            for entry in resolution.from_repositories() {
                println!("  {}/{} {}", entry.source, entry.name, entry.version);
            }
            println!("To build:");
            for entry in resolution.to_build() {
                println!("  {}/{} {}", entry.source, entry.name, entry.version);
            }
            if resolution.has_cycles() {
                println!("Dependency cycles (build one member ignoring its dependencies first):");
                for cycle in &resolution.cycles {
                    println!("  {}", cycle.join(" -> "));
                }
            }
            println!("Already satisfied: {}", resolution.satisfied.len());
        }
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "pkgdex", &mut std::io::stdout());
        }
    }

    Ok(())
}

fn print_details(details: &PackageDetails) {
    let package = &details.info.package;
    println!("Name:        {}", package.name);
    println!("Version:     {}", package.version);
    println!("Source:      {}", package.source);
    if let Some(version) = &details.installed_version {
        println!("Installed:   {}", version);
    }
    if let Some(description) = &package.description {
        println!("Description: {}", description);
    }
    if let Some(url) = &package.url {
        println!("URL:         {}", url);
    }
    if let Some(base) = &package.package_base {
        println!("Base:        {}", base);
    }
    if let Some(maintainer) = &package.maintainer {
        println!("Maintainer:  {}", maintainer);
    }
    if !package.extended.licenses.is_empty() {
        println!("Licenses:    {}", package.extended.licenses.join(", "));
    }
    if details.sources.len() > 1 {
        let sources: Vec<String> = details.sources.iter().map(|s| s.to_string()).collect();
        println!("Also in:     {}", sources.join(", "));
    }
    for link_type in [LinkType::Provides, LinkType::Conflicts, LinkType::Replaces] {
        let targets = details.info.links(link_type);
        if !targets.is_empty() {
            println!("{:<12} {}", format!("{}:", link_type), targets.join(", "));
        }
    }

    for (link_type, dependencies) in &details.dependencies {
        if dependencies.is_empty() {
            continue;
        }
        println!("{}:", link_type);
        for dependency in dependencies {
            let providers: Vec<String> = dependency
                .candidates
                .iter()
                .map(|c| {
                    let marker = if c.installed { " [installed]" } else { "" };
                    format!("{}/{} ({}){}", c.source, c.name, c.relation.as_str(), marker)
                })
                .collect();
            if providers.is_empty() {
                println!("  {} -> (none)", dependency.raw);
            } else {
                println!("  {} -> {}", dependency.raw, providers.join(", "));
            }
        }
    }

    for (provided, dependants) in &details.dependants {
        if dependants.is_empty() {
            continue;
        }
        println!("Required via {}:", provided);
        for dependant in dependants {
            println!("  {}/{} ({})", dependant.source, dependant.name, dependant.relation);
        }
    }
}
