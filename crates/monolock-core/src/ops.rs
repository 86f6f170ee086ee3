//! Public lockfile operations.
//!
//! Every mutating operation follows the same shape: load the version sets,
//! apply manifest edits, fill lockfile gaps through the registry client,
//! resynchronize every set against the shared index when something changed,
//! and persist (unless frozen).

use crate::config::SyncOptions;
use crate::error::SyncError;
use crate::install::{install_missing_deps, InstallCache};
use crate::manifest::{resolution_target, DepType};
use crate::mutate::{
    apply_metadata_changes, ensure_insertion_ranges, Addition, MetadataChanges, Upgrading,
};
use crate::registry::RegistryClient;
use crate::store::{load_manifest, read_version_sets, write_version_sets, VersionSet};
use crate::sync::{sync_lockfiles, SyncMode, Unresolved};
use futures::future::try_join_all;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::info;

/// Outcome of a mutating operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Whether lockfiles were resynchronized and written.
    pub updated: bool,
    /// Dependencies no lockfile entry could satisfy, per project.
    pub unresolved: Unresolved,
}

/// Package name -> range -> sorted projects declaring it with that range.
pub type CheckReport = BTreeMap<String, BTreeMap<String, Vec<String>>>;

/// Tables compared by [`check`].
const CHECKED_TABLES: [DepType; 4] = [
    DepType::Dependencies,
    DepType::DevDependencies,
    DepType::PeerDependencies,
    DepType::OptionalDependencies,
];

/// Report every package declared with more than one distinct range.
///
/// Projects are named by their manifest `name`, or their root path when
/// unnamed.
///
/// # Errors
/// Returns an error if a manifest cannot be read or parsed.
pub async fn check(roots: &[PathBuf]) -> Result<CheckReport, SyncError> {
    let manifests = try_join_all(roots.iter().map(|root| load_manifest(root))).await?;

    let mut report = CheckReport::new();
    for (root, manifest) in roots.iter().zip(&manifests) {
        let project = manifest
            .name()
            .map_or_else(|| root.display().to_string(), str::to_string);
        for ty in CHECKED_TABLES {
            let Some(table) = manifest.table(ty) else {
                continue;
            };
            for (name, range) in table {
                report
                    .entry(name.clone())
                    .or_default()
                    .entry(range.clone())
                    .or_default()
                    .push(project.clone());
            }
        }
    }

    report.retain(|_, ranges| ranges.len() > 1);
    for projects in report.values_mut().flat_map(BTreeMap::values_mut) {
        projects.sort();
        projects.dedup();
    }
    Ok(report)
}

/// Add dependencies to every root.
///
/// # Errors
/// Returns load, client, or write errors, or a frozen mismatch.
pub async fn add<C: RegistryClient>(
    client: &C,
    roots: &[PathBuf],
    additions: Vec<Addition>,
    options: &SyncOptions,
) -> Result<SyncReport, SyncError> {
    let changes = MetadataChanges {
        additions,
        ..MetadataChanges::default()
    };
    run(client, roots, changes, options, false).await
}

/// Remove dependencies from every root.
///
/// # Errors
/// Returns load, client, or write errors, or a frozen mismatch.
pub async fn remove<C: RegistryClient>(
    client: &C,
    roots: &[PathBuf],
    removals: Vec<String>,
    options: &SyncOptions,
) -> Result<SyncReport, SyncError> {
    let changes = MetadataChanges {
        removals,
        ..MetadataChanges::default()
    };
    run(client, roots, changes, options, false).await
}

/// Upgrade dependencies in every root that declares them.
///
/// # Errors
/// Returns load, client, or write errors, or a frozen mismatch.
pub async fn upgrade<C: RegistryClient>(
    client: &C,
    roots: &[PathBuf],
    upgrades: Vec<Upgrading>,
    options: &SyncOptions,
) -> Result<SyncReport, SyncError> {
    let changes = MetadataChanges {
        upgrades,
        ..MetadataChanges::default()
    };
    run(client, roots, changes, options, false).await
}

/// Resynchronize lockfiles from what is already on disk, without installing.
///
/// # Errors
/// Returns load, registry lookup, or write errors.
pub async fn sync<C: RegistryClient>(
    client: &C,
    roots: &[PathBuf],
    ignore: &[String],
) -> Result<SyncReport, SyncError> {
    let mut sets = read_version_sets(roots).await?;
    let cache = InstallCache::new();
    let registries = registry_urls(client, &sets, &cache).await?;
    let unresolved = sync_lockfiles(&mut sets, &registries, ignore, SyncMode::Write)?;
    write_version_sets(&sets).await?;
    Ok(SyncReport {
        updated: true,
        unresolved,
    })
}

/// Collapse compatible ranges across roots onto shared versions.
///
/// The roots' own package names are ignored, since local projects are never
/// fetched from the registry.
///
/// # Errors
/// Returns load, client, or write errors, or a frozen mismatch.
pub async fn dedupe<C: RegistryClient>(
    client: &C,
    roots: &[PathBuf],
    options: &SyncOptions,
) -> Result<SyncReport, SyncError> {
    let manifests = try_join_all(roots.iter().map(|root| load_manifest(root))).await?;
    let mut options = options.clone();
    for name in manifests.iter().filter_map(|m| m.name()) {
        if !options.is_ignored(name) {
            options.ignore.push(name.to_string());
        }
    }
    run(client, roots, MetadataChanges::default(), &options, true).await
}

/// Reinstall missing entries and resynchronize every root.
///
/// With `options.frozen`, only verifies that nothing would change.
///
/// # Errors
/// Returns load, client, or write errors, or a frozen mismatch.
pub async fn regenerate<C: RegistryClient>(
    client: &C,
    roots: &[PathBuf],
    options: &SyncOptions,
) -> Result<SyncReport, SyncError> {
    run(client, roots, MetadataChanges::default(), options, true).await
}

/// Fold the roots into one version set at `out`.
///
/// Later roots win on conflicting ranges and lockfile keys; ignored names are
/// left out of the merged manifest.
///
/// # Errors
/// Returns load or write errors.
pub async fn merge(
    roots: &[PathBuf],
    out: &Path,
    options: &SyncOptions,
) -> Result<VersionSet, SyncError> {
    let sets = read_version_sets(roots).await?;
    let mut merged = VersionSet::new(out);

    for set in &sets {
        for ty in DepType::ALL {
            let Some(table) = set.manifest.table(ty) else {
                continue;
            };
            for (name, range) in table {
                let target = if ty == DepType::Resolutions {
                    resolution_target(name)
                } else {
                    name.as_str()
                };
                if !options.is_ignored(target) {
                    merged
                        .manifest
                        .table_mut(ty)
                        .insert(name.clone(), range.clone());
                }
            }
        }
        merged.lockfile.extend_from(&set.lockfile);
    }

    info!(
        out = %out.display(),
        roots = roots.len(),
        entries = merged.lockfile.len(),
        "merged version sets"
    );

    if !options.frozen {
        write_version_sets(std::slice::from_ref(&merged)).await?;
    }
    Ok(merged)
}

/// Load, edit, install, resynchronize, persist.
async fn run<C: RegistryClient>(
    client: &C,
    roots: &[PathBuf],
    changes: MetadataChanges,
    options: &SyncOptions,
    force_sync: bool,
) -> Result<SyncReport, SyncError> {
    let mut sets = read_version_sets(roots).await?;
    let report = update(client, &mut sets, changes, options, force_sync).await?;
    if !options.frozen {
        write_version_sets(&sets).await?;
    }
    Ok(report)
}

/// Apply `changes` to every set, install what is missing, and resynchronize
/// when anything changed (or always, with `force_sync`).
///
/// In frozen mode the comparison is against the lockfile keys as loaded,
/// before any install.
///
/// # Errors
/// Returns client or I/O errors, or a frozen mismatch.
pub async fn update<C: RegistryClient>(
    client: &C,
    sets: &mut [VersionSet],
    mut changes: MetadataChanges,
    options: &SyncOptions,
    force_sync: bool,
) -> Result<SyncReport, SyncError> {
    let snapshots: Vec<BTreeSet<String>> = sets.iter().map(|s| s.lockfile.key_set()).collect();

    ensure_insertion_ranges(client, &mut changes).await?;
    let has_metadata_changes = !changes.is_empty();

    let cache = InstallCache::new();
    let installed = try_join_all(sets.iter_mut().map(|set| {
        apply_metadata_changes(&mut set.manifest, &changes);
        install_missing_deps(set, options, client, &cache)
    }))
    .await?;
    let has_lockfile_changes = installed.iter().any(|&added| added);

    if !(force_sync || has_metadata_changes || has_lockfile_changes) {
        info!("lockfiles already up to date");
        return Ok(SyncReport::default());
    }

    let registries = registry_urls(client, sets, &cache).await?;
    let mode = if options.frozen {
        SyncMode::Frozen(&snapshots)
    } else {
        SyncMode::Write
    };
    let unresolved = sync_lockfiles(sets, &registries, &options.ignore, mode)?;

    Ok(SyncReport {
        updated: !options.frozen,
        unresolved,
    })
}

async fn registry_urls<C: RegistryClient>(
    client: &C,
    sets: &[VersionSet],
    cache: &InstallCache,
) -> Result<Vec<String>, SyncError> {
    try_join_all(sets.iter().map(|set| cache.registry_url(client, &set.path))).await
}
