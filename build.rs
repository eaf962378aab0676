// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

fn build_cli() -> Command {
    Command::new("pkgdex")
        .version(env!("CARGO_PKG_VERSION"))
        .author("pkgdex Contributors")
        .about("Unified AUR and pacman package index with dependency resolution")
        .subcommand_required(true)
        .arg(
            Arg::new("db")
                .long("db")
                .value_name("PATH")
                .global(true)
                .help("Database path (default: $PKGDEX_DB_DIR or the user cache directory)"),
        )
        .subcommand(Command::new("rebuild").about("Download the feed and rebuild the store from scratch"))
        .subcommand(
            Command::new("update")
                .about("Incrementally update the store")
                .arg(
                    Arg::new("no_download")
                        .long("no-download")
                        .action(ArgAction::SetTrue)
                        .help("Reuse the cached feed snapshot instead of downloading"),
                ),
        )
        .subcommand(
            Command::new("search")
                .about("Search packages by name (prefix the term with `re:` for a regex)")
                .arg(Arg::new("term").help("Search term"))
                .arg(
                    Arg::new("filter")
                        .short('f')
                        .long("filter")
                        .value_name("KEY[=VALUE]")
                        .action(ArgAction::Append)
                        .help("Filter, repeatable (abandoned, out_of_date, maintainer, repos, depends, makedepends, checkdepends, optdepends, provides, comaintainers, license)"),
                )
                .arg(
                    Arg::new("limit")
                        .short('l')
                        .long("limit")
                        .default_value("20")
                        .allow_negative_numbers(true)
                        .help("Maximum results, -1 for no limit"),
                )
                .arg(
                    Arg::new("sort")
                        .long("sort")
                        .default_value("popularity")
                        .help("Sort key (name, popularity, votes, last_modified, first_submitted)"),
                )
                .arg(
                    Arg::new("asc")
                        .long("asc")
                        .action(ArgAction::SetTrue)
                        .help("Sort ascending"),
                ),
        )
        .subcommand(
            Command::new("info")
                .about("Show a package with its dependency providers and dependants")
                .arg(Arg::new("name").required(true).help("Package name"))
                .arg(
                    Arg::new("source")
                        .short('s')
                        .long("source")
                        .help("Source to show (aur, a repository name, or local)"),
                ),
        )
        .subcommand(
            Command::new("deptree")
                .about("Show the install order for packages")
                .arg(
                    Arg::new("names")
                        .required(true)
                        .num_args(1..)
                        .help("Package names"),
                )
                .arg(
                    Arg::new("deep")
                        .long("deep")
                        .action(ArgAction::SetTrue)
                        .help("Also walk through dependencies that are already satisfied"),
                ),
        )
        .subcommand(
            Command::new("completions")
                .about("Generate shell completion scripts")
                .arg(
                    Arg::new("shell")
                        .required(true)
                        .value_parser(["bash", "elvish", "fish", "powershell", "zsh"])
                        .help("Shell type"),
                ),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // Create man directory
    let out_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let man_dir = out_dir.join("man");
    fs::create_dir_all(&man_dir).expect("Failed to create man directory");

    // Generate main man page
    let cmd = build_cli();
    let man = Man::new(cmd);
    let mut buffer = Vec::new();
    man.render(&mut buffer).expect("Failed to render man page");

    let man_path = man_dir.join("pkgdex.1");
    fs::write(&man_path, buffer).expect("Failed to write man page");
}
