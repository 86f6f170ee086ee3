//! Rebuilding each project's lockfile from the shared index.

use crate::error::SyncError;
use crate::index::ResolutionIndex;
use crate::lockfile::{LockEntry, Lockfile};
use crate::manifest::{split_key, Manifest};
use crate::range::{gt, satisfies};
use crate::store::VersionSet;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Unresolvable `name@range` keys per project directory.
pub type Unresolved = BTreeMap<PathBuf, Vec<String>>;

/// What to do with the lockfiles a pass computes.
#[derive(Debug, Clone, Copy)]
pub enum SyncMode<'s> {
    /// Replace each set's lockfile.
    Write,
    /// Compare against the given key sets (one per version set) and fail on
    /// any difference. Lockfiles are left untouched.
    Frozen(&'s [BTreeSet<String>]),
}

/// Result of resolving one manifest against the index.
#[derive(Debug, Clone, Default)]
pub struct ResolvedGraph {
    pub lockfile: Lockfile,
    pub unresolved: Vec<String>,
}

/// Resolve the declared dependencies of `manifest` against `index`.
///
/// Non-exact candidates are adopted when they satisfy the range, beat the
/// current choice, and were resolved from `registry`. An exact candidate is
/// only adopted for its own key and wins outright.
#[must_use]
pub fn resolve_graph(
    index: &ResolutionIndex<'_>,
    manifest: &Manifest,
    registry: &str,
    ignore: &[String],
) -> ResolvedGraph {
    let mut graph: BTreeMap<String, Arc<LockEntry>> = BTreeMap::new();
    let mut unresolved = Vec::new();
    let mut visited: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<(String, String)> = manifest
        .entries()
        .into_iter()
        .filter(|entry| !ignore.contains(&entry.name))
        .map(|entry| (entry.name, entry.range))
        .collect();

    while let Some((name, range)) = queue.pop_front() {
        let key = format!("{name}@{range}");
        if !visited.insert(key.clone()) {
            continue;
        }

        let mut chosen: Option<&Arc<LockEntry>> = None;
        for candidate in index.candidates(&name) {
            let version = &candidate.entry.version;
            if !candidate.is_exact {
                let better = satisfies(version, &range)
                    && chosen.map_or(true, |current| gt(version, &current.version));
                if better && candidate.entry.resolved.contains(registry) {
                    chosen = Some(candidate.entry);
                }
            } else if candidate.key == key {
                chosen = Some(candidate.entry);
                break;
            }
        }

        let Some(entry) = chosen else {
            unresolved.push(key);
            continue;
        };

        for (dep, dep_range) in &entry.dependencies {
            queue.push_back((dep.clone(), dep_range.clone()));
        }
        graph.insert(key, Arc::clone(entry));
    }

    ResolvedGraph {
        lockfile: unify(graph),
        unresolved,
    }
}

/// Point every key resolving to the same `name@resolved` tarball at one
/// entry, the one reached first in key order.
fn unify(graph: BTreeMap<String, Arc<LockEntry>>) -> Lockfile {
    let mut canonical: HashMap<String, Arc<LockEntry>> = HashMap::new();
    graph
        .into_iter()
        .map(|(key, entry)| {
            let name = split_key(&key).map_or(key.as_str(), |(name, _)| name);
            let identity = format!("{name}@{}", entry.resolved);
            let shared = Arc::clone(canonical.entry(identity).or_insert(entry));
            (key, shared)
        })
        .collect()
}

/// Resynchronize every set against an index of all of them.
///
/// `registries[i]` is the registry URL of `sets[i]`. Returns unresolved keys
/// per project.
///
/// # Errors
/// In [`SyncMode::Frozen`], fails on the first set whose key set would change.
pub fn sync_lockfiles(
    sets: &mut [VersionSet],
    registries: &[String],
    ignore: &[String],
    mode: SyncMode<'_>,
) -> Result<Unresolved, SyncError> {
    info!(sets = sets.len(), frozen = matches!(mode, SyncMode::Frozen(_)), "checking lockfiles");

    let graphs: Vec<ResolvedGraph> = {
        let index = ResolutionIndex::build(sets);
        debug!(packages = index.len(), "built resolution index");
        sets.iter()
            .enumerate()
            .map(|(i, set)| {
                let registry = registries.get(i).map_or("", String::as_str);
                resolve_graph(&index, &set.manifest, registry, ignore)
            })
            .collect()
    };

    let mut unresolved = Unresolved::new();
    for (i, (set, graph)) in sets.iter_mut().zip(graphs).enumerate() {
        for key in &graph.unresolved {
            warn!(project = %set.path.display(), key = %key, "no lockfile entry satisfies dependency");
        }
        if !graph.unresolved.is_empty() {
            unresolved.insert(set.path.clone(), graph.unresolved);
        }

        match mode {
            SyncMode::Frozen(snapshots) => {
                let expected = snapshots
                    .get(i)
                    .cloned()
                    .unwrap_or_else(|| set.lockfile.key_set());
                if graph.lockfile.key_set() != expected {
                    return Err(SyncError::frozen_mismatch(&set.path));
                }
            }
            SyncMode::Write => {
                debug!(
                    project = %set.path.display(),
                    before = set.lockfile.len(),
                    after = graph.lockfile.len(),
                    "replacing lockfile"
                );
                set.lockfile = graph.lockfile;
            }
        }
    }

    Ok(unresolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::codes;

    const REGISTRY: &str = "https://registry.yarnpkg.com";

    fn entry(name: &str, version: &str) -> LockEntry {
        LockEntry::new(
            version,
            format!("{REGISTRY}/{name}/-/{name}-{version}.tgz"),
        )
    }

    fn set(path: &str, manifest: &str, entries: Vec<(&str, LockEntry)>) -> VersionSet {
        let mut set = VersionSet::new(path);
        set.manifest = Manifest::parse(manifest).unwrap();
        for (key, entry) in entries {
            set.lockfile.insert(key, Arc::new(entry));
        }
        set
    }

    fn registries(n: usize) -> Vec<String> {
        vec![REGISTRY.to_string(); n]
    }

    #[test]
    fn test_picks_highest_satisfying_across_sets() {
        let mut sets = vec![
            set(
                "/repo/a",
                r#"{"dependencies":{"lodash":"^4.0.0"}}"#,
                vec![("lodash@^4.0.0", entry("lodash", "4.17.15"))],
            ),
            set(
                "/repo/b",
                r#"{"dependencies":{"lodash":"^4.17.0"}}"#,
                vec![("lodash@^4.17.0", entry("lodash", "4.17.21"))],
            ),
        ];

        let unresolved =
            sync_lockfiles(&mut sets, &registries(2), &[], SyncMode::Write).unwrap();
        assert!(unresolved.is_empty());
        for set in &sets {
            let (_, e) = set.lockfile.iter().next().unwrap();
            assert_eq!(e.version, "4.17.21");
        }
    }

    #[test]
    fn test_registry_mismatch_is_not_adopted() {
        let mut mirror = entry("lodash", "4.17.21");
        mirror.resolved = "https://mirror.example/lodash-4.17.21.tgz".to_string();
        let mut sets = vec![
            set(
                "/repo/a",
                r#"{"dependencies":{"lodash":"^4.0.0"}}"#,
                vec![("lodash@^4.0.0", entry("lodash", "4.17.15"))],
            ),
            set(
                "/repo/b",
                r#"{"dependencies":{"lodash":"^4.17.20"}}"#,
                vec![("lodash@^4.17.20", mirror)],
            ),
        ];

        sync_lockfiles(&mut sets, &registries(2), &[], SyncMode::Write).unwrap();
        assert_eq!(sets[0].lockfile.get("lodash@^4.0.0").unwrap().version, "4.17.15");
        assert!(sets[1].lockfile.is_empty());
    }

    #[test]
    fn test_transitive_dependencies_followed() {
        let mut sets = vec![set(
            "/repo/a",
            r#"{"dependencies":{"a":"^1.0.0"}}"#,
            vec![
                ("a@^1.0.0", entry("a", "1.0.0").with_dependency("b", "^2.0.0")),
                ("b@^2.0.0", entry("b", "2.3.0")),
                ("stale@^1.0.0", entry("stale", "1.0.0")),
            ],
        )];

        sync_lockfiles(&mut sets, &registries(1), &[], SyncMode::Write).unwrap();
        let keys: Vec<&String> = sets[0].lockfile.keys().collect();
        assert_eq!(keys, ["a@^1.0.0", "b@^2.0.0"]);
    }

    #[test]
    fn test_cycles_terminate() {
        let mut sets = vec![set(
            "/repo/a",
            r#"{"dependencies":{"a":"^1.0.0"}}"#,
            vec![
                ("a@^1.0.0", entry("a", "1.0.0").with_dependency("b", "^1.0.0")),
                ("b@^1.0.0", entry("b", "1.0.0").with_dependency("a", "^1.0.0")),
            ],
        )];
        sync_lockfiles(&mut sets, &registries(1), &[], SyncMode::Write).unwrap();
        assert_eq!(sets[0].lockfile.len(), 2);
    }

    #[test]
    fn test_keys_with_same_version_share_one_entry() {
        let mut sets = vec![set(
            "/repo/a",
            r#"{"dependencies":{"a":"^1.0.0"},"devDependencies":{"a":"~1.2.0"}}"#,
            vec![
                ("a@^1.0.0", entry("a", "1.2.3")),
                ("a@~1.2.0", entry("a", "1.2.3")),
            ],
        )];

        sync_lockfiles(&mut sets, &registries(1), &[], SyncMode::Write).unwrap();
        let caret = sets[0].lockfile.get("a@^1.0.0").unwrap();
        let tilde = sets[0].lockfile.get("a@~1.2.0").unwrap();
        assert!(Arc::ptr_eq(caret, tilde));
    }

    #[test]
    fn test_exact_entry_is_never_replaced() {
        let mut sets = vec![
            set(
                "/repo/a",
                r#"{"dependencies":{"a":"^1.0.0"},"resolutions":{"a":"1.0.0"}}"#,
                vec![
                    ("a@^1.0.0", entry("a", "1.0.0")),
                    ("a@1.0.0", entry("a", "1.0.0")),
                ],
            ),
            set(
                "/repo/b",
                r#"{"dependencies":{"a":"^1.2.0"}}"#,
                vec![("a@^1.2.0", entry("a", "1.5.0"))],
            ),
        ];

        sync_lockfiles(&mut sets, &registries(2), &[], SyncMode::Write).unwrap();
        assert_eq!(sets[0].lockfile.get("a@1.0.0").unwrap().version, "1.0.0");
        assert_eq!(sets[0].lockfile.get("a@^1.0.0").unwrap().version, "1.0.0");
        assert_eq!(sets[1].lockfile.get("a@^1.2.0").unwrap().version, "1.5.0");
    }

    #[test]
    fn test_git_reference_adopted_only_for_its_key() {
        let mut git = entry("a", "1.0.0");
        git.resolved = "https://codeload.github.com/user/a/tar.gz/abc".to_string();
        let mut sets = vec![set(
            "/repo/a",
            r#"{"dependencies":{"a":"github:user/a#abc"}}"#,
            vec![("a@github:user/a#abc", git)],
        )];

        sync_lockfiles(&mut sets, &registries(1), &[], SyncMode::Write).unwrap();
        assert!(sets[0].lockfile.contains_key("a@github:user/a#abc"));
    }

    #[test]
    fn test_git_entry_keeps_its_tarball_next_to_same_version() {
        let mut git = entry("a", "1.0.0");
        git.resolved = "https://codeload.github.com/user/a/tar.gz/abc".to_string();
        let mut sets = vec![set(
            "/repo/a",
            r#"{"dependencies":{"a":"^1.0.0"},"devDependencies":{"a":"github:user/a#abc"}}"#,
            vec![
                ("a@^1.0.0", entry("a", "1.0.0")),
                ("a@github:user/a#abc", git),
            ],
        )];

        sync_lockfiles(&mut sets, &registries(1), &[], SyncMode::Write).unwrap();
        let pinned = sets[0].lockfile.get("a@github:user/a#abc").unwrap();
        let ranged = sets[0].lockfile.get("a@^1.0.0").unwrap();
        assert_eq!(
            pinned.resolved,
            "https://codeload.github.com/user/a/tar.gz/abc"
        );
        assert_eq!(ranged.resolved, format!("{REGISTRY}/a/-/a-1.0.0.tgz"));
        assert!(!Arc::ptr_eq(pinned, ranged));
    }

    #[test]
    fn test_unresolved_reported_not_fatal() {
        let mut sets = vec![set(
            "/repo/a",
            r#"{"dependencies":{"ghost":"^1.0.0","a":"^1.0.0"}}"#,
            vec![("a@^1.0.0", entry("a", "1.0.0"))],
        )];

        let unresolved =
            sync_lockfiles(&mut sets, &registries(1), &[], SyncMode::Write).unwrap();
        assert_eq!(
            unresolved.get(&PathBuf::from("/repo/a")),
            Some(&vec!["ghost@^1.0.0".to_string()])
        );
        assert!(sets[0].lockfile.contains_key("a@^1.0.0"));
    }

    #[test]
    fn test_ignored_names_skipped() {
        let mut sets = vec![set(
            "/repo/a",
            r#"{"dependencies":{"local":"^1.0.0"}}"#,
            vec![],
        )];
        let unresolved = sync_lockfiles(
            &mut sets,
            &registries(1),
            &["local".to_string()],
            SyncMode::Write,
        )
        .unwrap();
        assert!(unresolved.is_empty());
    }

    #[test]
    fn test_frozen_passes_and_fails_without_mutation() {
        let mut sets = vec![set(
            "/repo/a",
            r#"{"dependencies":{"a":"^1.0.0"}}"#,
            vec![
                ("a@^1.0.0", entry("a", "1.0.0")),
                ("extra@^1.0.0", entry("extra", "1.0.0")),
            ],
        )];
        let before = sets[0].lockfile.clone();

        let matching: Vec<BTreeSet<String>> = vec![["a@^1.0.0".to_string()].into_iter().collect()];
        sync_lockfiles(&mut sets, &registries(1), &[], SyncMode::Frozen(&matching)).unwrap();
        assert_eq!(sets[0].lockfile, before);

        let on_disk = vec![before.key_set()];
        let err = sync_lockfiles(&mut sets, &registries(1), &[], SyncMode::Frozen(&on_disk))
            .unwrap_err();
        assert_eq!(err.code(), codes::LOCK_FROZEN_MISMATCH);
        assert_eq!(sets[0].lockfile, before);
    }

    #[test]
    fn test_idempotent() {
        let mut sets = vec![
            set(
                "/repo/a",
                r#"{"dependencies":{"a":"^1.0.0"}}"#,
                vec![("a@^1.0.0", entry("a", "1.1.0").with_dependency("b", "^1.0.0"))],
            ),
            set(
                "/repo/b",
                r#"{"dependencies":{"a":"^1.1.0","b":"^1.0.0"}}"#,
                vec![
                    ("a@^1.1.0", entry("a", "1.1.0").with_dependency("b", "^1.0.0")),
                    ("b@^1.0.0", entry("b", "1.0.2")),
                ],
            ),
        ];

        sync_lockfiles(&mut sets, &registries(2), &[], SyncMode::Write).unwrap();
        let first: Vec<String> = sets.iter().map(|s| s.lockfile.to_yarn_string()).collect();
        sync_lockfiles(&mut sets, &registries(2), &[], SyncMode::Write).unwrap();
        let second: Vec<String> = sets.iter().map(|s| s.lockfile.to_yarn_string()).collect();
        assert_eq!(first, second);
        assert!(sets[0].lockfile.contains_key("b@^1.0.0"));
    }
}
