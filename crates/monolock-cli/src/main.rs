#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::struct_excessive_bools)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::doc_markdown)]

mod commands;
mod logging;

use clap::Parser;
use commands::lockfile::LockAction;
use miette::Result;
use monolock_core::manifest::split_key;
use monolock_core::{Addition, DepType, SyncOptions, Upgrading};
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "monolock")]
#[command(author, version, about = "Keep yarn.lock files in sync across a monorepo", long_about = None)]
struct Cli {
    /// Increase logging verbosity (-v for DEBUG, -vv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit JSON formatted output (stable, machine-readable)
    #[arg(long, global = true)]
    json: bool,

    /// Override the working directory
    #[arg(long, global = true, value_name = "PATH")]
    cwd: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Flags shared by every command that installs and resynchronizes.
#[derive(clap::Args, Debug, Clone, Default)]
struct SyncArgs {
    /// Project directory (repeatable; defaults to the working directory)
    #[arg(short, long = "root", value_name = "PATH")]
    roots: Vec<PathBuf>,

    /// Package names never resolved across projects (repeatable)
    #[arg(long, value_name = "NAME")]
    ignore: Vec<String>,

    /// Scratch directory for registry installs
    #[arg(long, value_name = "PATH")]
    tmp: Option<PathBuf>,

    /// Fail instead of writing when lockfiles would change
    #[arg(long)]
    frozen: bool,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Print version information
    Version,

    /// Report packages declared with different ranges across projects
    Check {
        /// Project directory (repeatable; defaults to the working directory)
        #[arg(short, long = "root", value_name = "PATH")]
        roots: Vec<PathBuf>,
    },

    /// Add dependencies to every project
    Add {
        /// Packages as `name` or `name@range`
        #[arg(required = true)]
        specs: Vec<String>,

        /// Save to devDependencies
        #[arg(short = 'D', long, conflicts_with_all = ["peer", "optional"])]
        dev: bool,

        /// Save to peerDependencies
        #[arg(short = 'P', long, conflicts_with = "optional")]
        peer: bool,

        /// Save to optionalDependencies
        #[arg(short = 'O', long)]
        optional: bool,

        #[command(flatten)]
        sync: SyncArgs,
    },

    /// Remove dependencies from every project
    Remove {
        /// Package names
        #[arg(required = true)]
        names: Vec<String>,

        #[command(flatten)]
        sync: SyncArgs,
    },

    /// Upgrade dependencies in every project that declares them
    Upgrade {
        /// Packages as `name` or `name@range`
        #[arg(required = true)]
        specs: Vec<String>,

        /// Only upgrade declarations whose minimum version satisfies this range
        #[arg(long, value_name = "RANGE")]
        from: Option<String>,

        #[command(flatten)]
        sync: SyncArgs,
    },

    /// Resynchronize lockfiles from what is already on disk
    Sync {
        /// Project directory (repeatable; defaults to the working directory)
        #[arg(short, long = "root", value_name = "PATH")]
        roots: Vec<PathBuf>,

        /// Package names never resolved across projects (repeatable)
        #[arg(long, value_name = "NAME")]
        ignore: Vec<String>,
    },

    /// Collapse compatible ranges onto shared versions
    Dedupe {
        #[command(flatten)]
        sync: SyncArgs,
    },

    /// Install missing entries and resynchronize every project
    Regenerate {
        #[command(flatten)]
        sync: SyncArgs,
    },

    /// Fold several projects into one manifest and lockfile
    Merge {
        /// Output directory
        #[arg(long, value_name = "PATH")]
        out: PathBuf,

        #[command(flatten)]
        sync: SyncArgs,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Determine working directory
    let cwd = cli
        .cwd
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));

    let Some(command) = cli.command else {
        return commands::version::run(cli.json);
    };

    logging::init(cli.verbose, cli.json);

    let (action, sync) = match command {
        Commands::Version => return commands::version::run(cli.json),
        Commands::Check { roots } => {
            return commands::check::run(absolute_roots(&cwd, &roots), cli.json);
        }
        Commands::Merge { out, sync } => {
            return commands::lockfile::merge(
                absolute_roots(&cwd, &sync.roots),
                absolutize(&cwd, &out),
                sync_options(&sync),
                cli.json,
            );
        }
        Commands::Add {
            specs,
            dev,
            peer,
            optional,
            sync,
        } => {
            let dep_type = if dev {
                DepType::DevDependencies
            } else if peer {
                DepType::PeerDependencies
            } else if optional {
                DepType::OptionalDependencies
            } else {
                DepType::Dependencies
            };
            let additions = specs
                .iter()
                .map(|spec| {
                    let (name, range) = parse_spec(spec);
                    Addition::new(name, range, dep_type)
                })
                .collect();
            (LockAction::Add { additions }, sync)
        }
        Commands::Remove { names, sync } => (LockAction::Remove { names }, sync),
        Commands::Upgrade { specs, from, sync } => {
            let upgrades = specs
                .iter()
                .map(|spec| {
                    let (name, range) = parse_spec(spec);
                    Upgrading::new(name, range, from.clone())
                })
                .collect();
            (LockAction::Upgrade { upgrades }, sync)
        }
        Commands::Sync { roots, ignore } => (
            LockAction::Sync,
            SyncArgs {
                roots,
                ignore,
                ..SyncArgs::default()
            },
        ),
        Commands::Dedupe { sync } => (LockAction::Dedupe, sync),
        Commands::Regenerate { sync } => (LockAction::Regenerate, sync),
    };

    commands::lockfile::run(
        action,
        absolute_roots(&cwd, &sync.roots),
        sync_options(&sync),
        cli.json,
    )
}

/// Split `name@range` into its parts; a bare name has no range.
fn parse_spec(spec: &str) -> (String, Option<String>) {
    match split_key(spec) {
        Some((name, range)) => (name.to_string(), Some(range.to_string())),
        None => (spec.trim_end_matches('@').to_string(), None),
    }
}

fn sync_options(args: &SyncArgs) -> SyncOptions {
    let mut options = SyncOptions::new()
        .with_ignore(args.ignore.iter().cloned())
        .with_frozen(args.frozen);
    if let Some(tmp) = &args.tmp {
        options = options.with_tmp(tmp);
    }
    options
}

fn absolutize(cwd: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    }
}

/// Resolve roots against `cwd`, defaulting to `cwd` itself.
fn absolute_roots(cwd: &Path, roots: &[PathBuf]) -> Vec<PathBuf> {
    if roots.is_empty() {
        return vec![cwd.to_path_buf()];
    }
    roots.iter().map(|root| absolutize(cwd, root)).collect()
}
