//! Manifest edits: removals, additions, upgrades.

use crate::error::SyncError;
use crate::manifest::{DepType, Manifest};
use crate::range::{min_version, satisfies};
use crate::registry::RegistryClient;
use futures::future::try_join_all;
use tracing::debug;

/// Insert `name: range` into a dependency table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Addition {
    pub name: String,
    /// `None` means `^<latest>`, filled in by [`ensure_insertion_ranges`].
    pub range: Option<String>,
    pub dep_type: DepType,
}

impl Addition {
    #[must_use]
    pub fn new(name: impl Into<String>, range: Option<String>, dep_type: DepType) -> Self {
        Self {
            name: name.into(),
            range,
            dep_type,
        }
    }
}

/// Replace the range of an existing dependency wherever it is declared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upgrading {
    pub name: String,
    /// `None` means `^<latest>`, filled in by [`ensure_insertion_ranges`].
    pub range: Option<String>,
    /// Only upgrade declarations whose minimum version satisfies this range.
    pub from: Option<String>,
}

impl Upgrading {
    #[must_use]
    pub fn new(name: impl Into<String>, range: Option<String>, from: Option<String>) -> Self {
        Self {
            name: name.into(),
            range,
            from,
        }
    }
}

/// Requested manifest edits for one operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataChanges {
    pub removals: Vec<String>,
    pub additions: Vec<Addition>,
    pub upgrades: Vec<Upgrading>,
}

impl MetadataChanges {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.removals.is_empty() && self.additions.is_empty() && self.upgrades.is_empty()
    }
}

/// Fill every missing addition/upgrade range with `^<latest>`.
///
/// Lookups run concurrently.
///
/// # Errors
/// Returns the first client error.
pub async fn ensure_insertion_ranges<C: RegistryClient>(
    client: &C,
    changes: &mut MetadataChanges,
) -> Result<(), SyncError> {
    let slots = changes
        .additions
        .iter_mut()
        .map(|a| (&a.name, &mut a.range))
        .chain(changes.upgrades.iter_mut().map(|u| (&u.name, &mut u.range)))
        .filter(|(_, range)| range.is_none());

    try_join_all(slots.map(|(name, range)| async move {
        let latest = client.latest_version(name).await?;
        debug!(package = %name, %latest, "filled range from latest");
        *range = Some(format!("^{latest}"));
        Ok::<_, SyncError>(())
    }))
    .await?;
    Ok(())
}

/// Delete each name from every table, then drop tables left empty.
pub fn apply_removals(manifest: &mut Manifest, removals: &[String]) {
    if removals.is_empty() {
        return;
    }
    for ty in DepType::ALL {
        let Some(table) = manifest.existing_table_mut(ty) else {
            continue;
        };
        for name in removals {
            table.remove(name);
        }
        if table.is_empty() {
            manifest.remove_table(ty);
        }
    }
}

/// Insert or overwrite each addition in its table, creating the table if absent.
///
/// Additions without a range are skipped.
pub fn apply_additions(manifest: &mut Manifest, additions: &[Addition]) {
    for addition in additions {
        if let Some(range) = &addition.range {
            manifest
                .table_mut(addition.dep_type)
                .insert(addition.name.clone(), range.clone());
        }
    }
}

/// Rewrite the range of every declaration of an upgraded name.
///
/// With `from`, only declarations whose minimum version satisfies `from` are
/// touched; a declaration with no computable minimum never matches.
pub fn apply_upgrades(manifest: &mut Manifest, upgrades: &[Upgrading]) {
    for upgrade in upgrades {
        let Some(range) = &upgrade.range else {
            continue;
        };
        for ty in DepType::ALL {
            let Some(current) = manifest.existing_table_mut(ty).and_then(|t| t.get_mut(&upgrade.name))
            else {
                continue;
            };
            let matches = match &upgrade.from {
                None => true,
                Some(from) => min_version(current).is_some_and(|min| satisfies(&min.to_string(), from)),
            };
            if matches {
                current.clone_from(range);
            }
        }
    }
}

/// Removals, then additions, then upgrades.
pub fn apply_metadata_changes(manifest: &mut Manifest, changes: &MetadataChanges) {
    apply_removals(manifest, &changes.removals);
    apply_additions(manifest, &changes.additions);
    apply_upgrades(manifest, &changes.upgrades);
}
