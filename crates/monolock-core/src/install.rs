//! Filling lockfile gaps through the registry client.
//!
//! Two passes per version set:
//!
//! 1. top-level: manifest entries with no `name@range` key in the lockfile
//!    are installed from a throwaway manifest in a scratch directory;
//! 2. transitive: dependency ranges of lockfile entries that have no key of
//!    their own are added in a second scratch directory.
//!
//! Results are copied back key by key. Identical requests (same specs, same
//! registry config) share one client call through [`InstallCache`].

use crate::config::SyncOptions;
use crate::error::SyncError;
use crate::manifest::{DepType, Manifest, MANIFEST_NAME};
use crate::registry::{yarnrc, RegistryClient, YARNRC_NAME};
use crate::store::{write_file, VersionSet};
use monolock_util::fs::fresh_dir;
use monolock_util::hash::short_digest;
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::hash::Hash;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info};

/// Length of the hash in scratch directory names.
const SCRATCH_HASH_LEN: usize = 16;

/// Memoized fallible async computations, one in flight per key.
///
/// Every caller for a key awaits the same computation and receives a clone of
/// its result, errors included.
#[derive(Debug)]
struct Memo<K, V> {
    cells: Mutex<HashMap<K, Arc<OnceCell<Result<V, SyncError>>>>>,
}

impl<K, V> Default for Memo<K, V> {
    fn default() -> Self {
        Self {
            cells: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash, V: Clone> Memo<K, V> {
    async fn get_or_compute<F, Fut>(&self, key: K, compute: F) -> Result<V, SyncError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, SyncError>>,
    {
        let cell = {
            let mut cells = self.cells.lock().await;
            Arc::clone(cells.entry(key).or_default())
        };
        cell.get_or_init(compute).await.clone()
    }

    #[cfg(test)]
    async fn len(&self) -> usize {
        self.cells.lock().await.len()
    }
}

/// Per-operation cache of registry lookups and scratch installs.
#[derive(Debug, Default)]
pub struct InstallCache {
    registries: Memo<PathBuf, String>,
    installs: Memo<String, Arc<VersionSet>>,
}

impl InstallCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Effective registry URL for `dir`, looked up once per directory.
    ///
    /// # Errors
    /// Returns the client's error, shared with every caller for `dir`.
    pub async fn registry_url<C: RegistryClient>(
        &self,
        client: &C,
        dir: &Path,
    ) -> Result<String, SyncError> {
        self.registries
            .get_or_compute(dir.to_path_buf(), || client.registry_url(dir))
            .await
    }

    async fn resolve<F, Fut>(&self, key: String, compute: F) -> Result<Arc<VersionSet>, SyncError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Arc<VersionSet>, SyncError>>,
    {
        self.installs.get_or_compute(key, compute).await
    }
}

/// Cache key for a request: sorted specs plus the registry config.
///
/// Top-level specs carry their table (`devDependencies:name@range`).
fn cache_key(kind: &str, specs: &BTreeSet<String>, yarnrc: &str) -> String {
    let specs: Vec<&str> = specs.iter().map(String::as_str).collect();
    format!("{kind}:{} | {yarnrc}", specs.join(" "))
}

fn scratch_dir(tmp: &Path, key: &str) -> PathBuf {
    tmp.join(format!("monolock-{}", short_digest(key, SCRATCH_HASH_LEN)))
}

/// Recreate `dir` and write the scratch manifest and registry config into it.
async fn prepare_scratch(dir: &Path, manifest: String, yarnrc: String) -> Result<(), SyncError> {
    let target = dir.to_path_buf();
    tokio::task::spawn_blocking(move || {
        fresh_dir(&target).map_err(|e| {
            SyncError::io(format!("Failed to create {}: {e}", target.display()))
        })
    })
    .await
    .map_err(|e| SyncError::io(format!("Scratch setup task failed: {e}")))??;

    futures::try_join!(
        write_file(dir.join(MANIFEST_NAME), manifest),
        write_file(dir.join(YARNRC_NAME), yarnrc),
    )?;
    Ok(())
}

/// Install lockfile entries missing from `set`.
///
/// Ignored names are skipped in the top-level pass. Returns whether any
/// lockfile key was added.
///
/// # Errors
/// Returns client, I/O, or parse errors from either pass.
pub async fn install_missing_deps<C: RegistryClient>(
    set: &mut VersionSet,
    options: &SyncOptions,
    client: &C,
    cache: &InstallCache,
) -> Result<bool, SyncError> {
    let mut edited = false;

    // Top-level entries with no lockfile key
    let mut missing = Manifest::default();
    let mut specs = BTreeSet::new();
    for entry in set.manifest.entries() {
        let key = entry.key();
        if set.lockfile.contains_key(&key) || options.is_ignored(&entry.name) {
            continue;
        }
        missing
            .table_mut(entry.dep_type)
            .insert(entry.name.clone(), entry.range.clone());
        // Table is part of the key: the scratch manifest is copied back by type
        specs.insert(format!("{}:{key}", entry.dep_type));
    }

    if !specs.is_empty() {
        let rc = yarnrc(&cache.registry_url(client, &set.path).await?);
        let key = cache_key("install", &specs, &rc);
        let dir = scratch_dir(&options.tmp, &key);

        info!(
            project = %set.path.display(),
            count = specs.len(),
            "installing missing dependencies"
        );

        let added = cache
            .resolve(key, || async {
                prepare_scratch(&dir, missing.to_json_string(), rc).await?;
                client.install(&dir).await?;
                Ok(Arc::new(VersionSet::load(&dir).await?))
            })
            .await?;

        for ty in DepType::ALL {
            if ty == DepType::Resolutions {
                continue;
            }
            if let Some(table) = added.manifest.table(ty) {
                for (name, range) in table {
                    set.manifest
                        .table_mut(ty)
                        .insert(name.clone(), range.clone());
                }
            }
        }
        edited |= copy_new_keys(set, &added);
    }

    // Dependency ranges with no lockfile key of their own
    let transitive: BTreeSet<String> = set
        .lockfile
        .iter()
        .flat_map(|(_, entry)| entry.dependencies.iter())
        .map(|(name, range)| format!("{name}@{range}"))
        .filter(|key| !set.lockfile.contains_key(key))
        .collect();

    if !transitive.is_empty() {
        let rc = yarnrc(&cache.registry_url(client, &set.path).await?);
        let key = cache_key("add", &transitive, &rc);
        let dir = scratch_dir(&options.tmp, &key);
        let specs: Vec<String> = transitive.into_iter().collect();

        info!(
            project = %set.path.display(),
            count = specs.len(),
            "adding missing transitive dependencies"
        );

        let added = cache
            .resolve(key, || async {
                prepare_scratch(&dir, "{}\n".to_string(), rc).await?;
                client.add(&dir, &specs).await?;
                Ok(Arc::new(VersionSet::load(&dir).await?))
            })
            .await?;

        edited |= copy_new_keys(set, &added);
    }

    Ok(edited)
}

fn copy_new_keys(set: &mut VersionSet, added: &VersionSet) -> bool {
    let mut copied = 0usize;
    for (key, entry) in added.lockfile.iter() {
        if !set.lockfile.contains_key(key) {
            set.lockfile.insert(key.clone(), Arc::clone(entry));
            copied += 1;
        }
    }
    debug!(project = %set.path.display(), copied, "copied lockfile entries");
    copied > 0
}
