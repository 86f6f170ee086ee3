//! Cross-project index of resolved lockfile entries.

use crate::lockfile::LockEntry;
use crate::manifest::split_key;
use crate::range::compare_versions;
use crate::store::VersionSet;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// One lockfile entry able to satisfy requests for a package.
#[derive(Debug, Clone)]
pub struct Candidate<'a> {
    /// Lockfile key, `name@range`.
    pub key: &'a str,
    pub entry: &'a Arc<LockEntry>,
    /// Pinned through a non-registry range or a `resolutions` declaration.
    pub is_exact: bool,
}

/// Package name -> candidates, exact first, then newest first.
#[derive(Debug, Default)]
pub struct ResolutionIndex<'a> {
    by_name: HashMap<&'a str, Vec<Candidate<'a>>>,
}

impl<'a> ResolutionIndex<'a> {
    /// Index every lockfile entry of every set.
    #[must_use]
    pub fn build(sets: &'a [VersionSet]) -> Self {
        let mut by_name: HashMap<&'a str, Vec<Candidate<'a>>> = HashMap::new();

        for set in sets {
            for (key, entry) in set.lockfile.iter() {
                let Some((name, range)) = split_key(key) else {
                    debug!(key = %key, "skipping malformed lockfile key");
                    continue;
                };
                let is_exact = range.contains(':')
                    || range.contains('/')
                    || set.manifest.has_resolution_for(name);
                by_name.entry(name).or_default().push(Candidate {
                    key,
                    entry,
                    is_exact,
                });
            }
        }

        for candidates in by_name.values_mut() {
            candidates.sort_by(|a, b| {
                b.is_exact
                    .cmp(&a.is_exact)
                    .then_with(|| compare_versions(&b.entry.version, &a.entry.version))
            });
        }

        Self { by_name }
    }

    /// Ranked candidates for `name`; empty if the name is unknown.
    #[must_use]
    pub fn candidates(&self, name: &str) -> &[Candidate<'a>] {
        self.by_name
            .get(name)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Number of distinct package names.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}
