//! Commands that install, edit, and resynchronize lockfiles.

use super::{fail, print_json};
use miette::{IntoDiagnostic, Result};
use monolock_core::{
    add, dedupe, merge as merge_sets, regenerate, remove, sync, upgrade, Addition, SyncError,
    SyncOptions, SyncReport, Upgrading, YarnClient,
};
use serde::Serialize;
use std::path::PathBuf;

/// Lockfile command to run against every root.
#[derive(Debug)]
pub enum LockAction {
    Add { additions: Vec<Addition> },
    Remove { names: Vec<String> },
    Upgrade { upgrades: Vec<Upgrading> },
    Sync,
    Dedupe,
    Regenerate,
}

impl LockAction {
    fn name(&self) -> &'static str {
        match self {
            Self::Add { .. } => "add",
            Self::Remove { .. } => "remove",
            Self::Upgrade { .. } => "upgrade",
            Self::Sync => "sync",
            Self::Dedupe => "dedupe",
            Self::Regenerate => "regenerate",
        }
    }
}

#[derive(Debug, Serialize)]
struct LockResult<'a> {
    ok: bool,
    command: &'static str,
    frozen: bool,
    #[serde(flatten)]
    report: &'a SyncReport,
}

#[derive(Debug, Serialize)]
struct MergeResult {
    ok: bool,
    out: String,
    written: bool,
    dependencies: usize,
    lockfile_entries: usize,
}

pub fn run(action: LockAction, roots: Vec<PathBuf>, options: SyncOptions, json: bool) -> Result<()> {
    let command = action.name();
    let client = YarnClient::from_env();
    let rt = tokio::runtime::Runtime::new().into_diagnostic()?;
    let report = match rt.block_on(execute(&client, action, &roots, &options)) {
        Ok(report) => report,
        Err(e) => return fail(&e, json),
    };

    if json {
        return print_json(&LockResult {
            ok: true,
            command,
            frozen: options.frozen,
            report: &report,
        });
    }

    for (project, keys) in &report.unresolved {
        for key in keys {
            eprintln!("! {}: unresolved {key}", project.display());
        }
    }
    if options.frozen {
        println!("Lockfiles are up to date ({} projects)", roots.len());
    } else if report.updated {
        println!("Updated lockfiles in {} projects", roots.len());
    } else {
        println!("Nothing to update");
    }
    Ok(())
}

async fn execute(
    client: &YarnClient,
    action: LockAction,
    roots: &[PathBuf],
    options: &SyncOptions,
) -> Result<SyncReport, SyncError> {
    match action {
        LockAction::Add { additions } => add(client, roots, additions, options).await,
        LockAction::Remove { names } => remove(client, roots, names, options).await,
        LockAction::Upgrade { upgrades } => upgrade(client, roots, upgrades, options).await,
        LockAction::Sync => sync(client, roots, &options.ignore).await,
        LockAction::Dedupe => dedupe(client, roots, options).await,
        LockAction::Regenerate => regenerate(client, roots, options).await,
    }
}

pub fn merge(roots: Vec<PathBuf>, out: PathBuf, options: SyncOptions, json: bool) -> Result<()> {
    let rt = tokio::runtime::Runtime::new().into_diagnostic()?;
    let merged = match rt.block_on(merge_sets(&roots, &out, &options)) {
        Ok(merged) => merged,
        Err(e) => return fail(&e, json),
    };

    let result = MergeResult {
        ok: true,
        out: out.display().to_string(),
        written: !options.frozen,
        dependencies: merged.manifest.entries().len(),
        lockfile_entries: merged.lockfile.len(),
    };

    if json {
        return print_json(&result);
    }
    println!(
        "Merged {} projects into {} ({} dependencies, {} lockfile entries)",
        roots.len(),
        result.out,
        result.dependencies,
        result.lockfile_entries
    );
    Ok(())
}
