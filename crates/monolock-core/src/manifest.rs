//! `package.json` dependency tables.
//!
//! A manifest is kept as its dependency tables plus every other top-level
//! field untouched, so a read/write cycle only changes what the engine edits.

use crate::error::SyncError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// Manifest filename.
pub const MANIFEST_NAME: &str = "package.json";

/// name -> range.
pub type DepTable = BTreeMap<String, String>;

/// A dependency table of `package.json`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DepType {
    Dependencies,
    DevDependencies,
    PeerDependencies,
    OptionalDependencies,
    Resolutions,
}

impl DepType {
    /// Every table, in the order entries are enumerated.
    pub const ALL: [DepType; 5] = [
        DepType::Dependencies,
        DepType::DevDependencies,
        DepType::PeerDependencies,
        DepType::OptionalDependencies,
        DepType::Resolutions,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dependencies => "dependencies",
            Self::DevDependencies => "devDependencies",
            Self::PeerDependencies => "peerDependencies",
            Self::OptionalDependencies => "optionalDependencies",
            Self::Resolutions => "resolutions",
        }
    }
}

impl fmt::Display for DepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DepType {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|ty| ty.as_str() == s)
            .ok_or_else(|| SyncError::manifest_invalid(format!("Unknown dependency type '{s}'")))
    }
}

/// One declared dependency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepEntry {
    /// Package name (for resolutions, the package the resolution targets).
    pub name: String,
    pub range: String,
    pub dep_type: DepType,
}

impl DepEntry {
    /// Lockfile key `name@range` for this entry.
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}@{}", self.name, self.range)
    }
}

/// Parsed `package.json`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Manifest {
    tables: BTreeMap<DepType, DepTable>,
    other: Map<String, Value>,
}

impl Manifest {
    /// Parse manifest JSON.
    ///
    /// # Errors
    /// Returns an error if the content is not a JSON object, a dependency
    /// table is not an object, or a range is not a string.
    pub fn parse(content: &str) -> Result<Self, SyncError> {
        let value: Value = serde_json::from_str(content)?;
        let Value::Object(mut root) = value else {
            return Err(SyncError::manifest_invalid(
                "package.json must be a JSON object",
            ));
        };

        let mut tables = BTreeMap::new();
        for ty in DepType::ALL {
            if let Some(section) = root.remove(ty.as_str()) {
                tables.insert(ty, extract_table(ty, section)?);
            }
        }

        Ok(Self {
            tables,
            other: root,
        })
    }

    /// Serialize with sorted keys, two-space indent and a trailing newline.
    #[must_use]
    pub fn to_json_string(&self) -> String {
        let mut root = self.other.clone();
        for (ty, table) in &self.tables {
            let table: Map<String, Value> = table
                .iter()
                .map(|(name, range)| (name.clone(), Value::String(range.clone())))
                .collect();
            root.insert(ty.as_str().to_string(), Value::Object(table));
        }
        let mut out = serde_json::to_string_pretty(&Value::Object(root))
            .unwrap_or_else(|_| String::from("{}"));
        out.push('\n');
        out
    }

    /// The `name` field, if it is a string.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.other.get("name").and_then(Value::as_str)
    }

    #[must_use]
    pub fn table(&self, ty: DepType) -> Option<&DepTable> {
        self.tables.get(&ty)
    }

    /// Mutable access to a table, creating it if absent.
    pub fn table_mut(&mut self, ty: DepType) -> &mut DepTable {
        self.tables.entry(ty).or_default()
    }

    /// Mutable access to an existing table.
    pub fn existing_table_mut(&mut self, ty: DepType) -> Option<&mut DepTable> {
        self.tables.get_mut(&ty)
    }

    pub fn remove_table(&mut self, ty: DepType) -> Option<DepTable> {
        self.tables.remove(&ty)
    }

    /// Every declared dependency across all tables.
    ///
    /// Resolution keys are reported under the package name they target.
    #[must_use]
    pub fn entries(&self) -> Vec<DepEntry> {
        let mut entries = Vec::new();
        for ty in DepType::ALL {
            let Some(table) = self.tables.get(&ty) else {
                continue;
            };
            for (name, range) in table {
                let name = if ty == DepType::Resolutions {
                    resolution_target(name)
                } else {
                    name
                };
                entries.push(DepEntry {
                    name: name.to_string(),
                    range: range.clone(),
                    dep_type: ty,
                });
            }
        }
        entries
    }

    /// Whether the `resolutions` table pins `name`.
    #[must_use]
    pub fn has_resolution_for(&self, name: &str) -> bool {
        self.tables
            .get(&DepType::Resolutions)
            .is_some_and(|table| table.keys().any(|key| resolution_target(key) == name))
    }
}

/// Package a `resolutions` key applies to: `**/foo` -> `foo`,
/// `a/b/@scope/foo` -> `@scope/foo`.
#[must_use]
pub fn resolution_target(key: &str) -> &str {
    static PATTERN: OnceLock<regex_lite::Regex> = OnceLock::new();
    let re = PATTERN.get_or_init(|| {
        regex_lite::Regex::new(r"(@[^@/]+?/)?[^@/]+$").expect("static pattern is valid")
    });
    re.find(key).map_or(key, |m| m.as_str())
}

/// Split a lockfile key into `(name, range)` at the first `@` after the
/// first character, so scoped names stay intact.
#[must_use]
pub fn split_key(key: &str) -> Option<(&str, &str)> {
    let at = key.get(1..)?.find('@')? + 1;
    let (name, range) = (&key[..at], &key[at + 1..]);
    if range.is_empty() {
        None
    } else {
        Some((name, range))
    }
}

fn extract_table(ty: DepType, section: Value) -> Result<DepTable, SyncError> {
    let Value::Object(obj) = section else {
        return Err(SyncError::manifest_invalid(format!(
            "'{ty}' must be an object, got {}",
            json_type_name(&section)
        )));
    };

    let mut table = DepTable::new();
    for (name, range) in obj {
        match range {
            Value::String(range) => {
                table.insert(name, range);
            }
            other => {
                return Err(SyncError::manifest_invalid(format!(
                    "Invalid range for '{name}' in '{ty}': expected string, got {}",
                    json_type_name(&other)
                )));
            }
        }
    }
    Ok(table)
}

/// Get a human-readable type name for a JSON value.
fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::codes;

    #[test]
    fn test_parse_tables_and_other_fields() {
        let manifest = Manifest::parse(
            r#"{
                "name": "web",
                "version": "1.0.0",
                "scripts": { "test": "jest" },
                "dependencies": { "react": "^18.0.0" },
                "devDependencies": { "jest": "^29.0.0" }
            }"#,
        )
        .unwrap();

        assert_eq!(manifest.name(), Some("web"));
        assert_eq!(
            manifest.table(DepType::Dependencies).unwrap().get("react"),
            Some(&"^18.0.0".to_string())
        );
        assert!(manifest.table(DepType::PeerDependencies).is_none());

        let out = manifest.to_json_string();
        assert!(out.ends_with("}\n"));
        let reparsed = Manifest::parse(&out).unwrap();
        assert_eq!(reparsed, manifest);
        assert!(out.contains("\"scripts\""));
    }

    #[test]
    fn test_serialization_is_key_sorted() {
        let manifest =
            Manifest::parse(r#"{"version":"1.0.0","name":"a","dependencies":{"z":"1","b":"2"}}"#)
                .unwrap();
        let out = manifest.to_json_string();
        let deps = out.find("\"dependencies\"").unwrap();
        let name = out.find("\"name\"").unwrap();
        let version = out.find("\"version\"").unwrap();
        assert!(deps < name && name < version);
        assert!(out.find("\"b\"").unwrap() < out.find("\"z\"").unwrap());
    }

    #[test]
    fn test_entries_map_resolution_keys() {
        let manifest = Manifest::parse(
            r#"{
                "dependencies": { "a": "^1.0.0" },
                "resolutions": { "**/b": "2.0.0", "x/@scope/c": "3.0.0" }
            }"#,
        )
        .unwrap();

        let entries = manifest.entries();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].key(), "a@^1.0.0");
        assert!(entries.iter().any(|e| e.key() == "b@2.0.0"));
        assert!(entries.iter().any(|e| e.key() == "@scope/c@3.0.0"));
        assert!(manifest.has_resolution_for("b"));
        assert!(manifest.has_resolution_for("@scope/c"));
        assert!(!manifest.has_resolution_for("a"));
    }

    #[test]
    fn test_resolution_target() {
        assert_eq!(resolution_target("foo"), "foo");
        assert_eq!(resolution_target("**/foo"), "foo");
        assert_eq!(resolution_target("@scope/foo"), "@scope/foo");
        assert_eq!(resolution_target("parent/**/@scope/foo"), "@scope/foo");
    }

    #[test]
    fn test_split_key() {
        assert_eq!(split_key("lodash@^4.0.0"), Some(("lodash", "^4.0.0")));
        assert_eq!(
            split_key("@babel/core@^7.0.0"),
            Some(("@babel/core", "^7.0.0"))
        );
        assert_eq!(
            split_key("pkg@npm:other@^1.0.0"),
            Some(("pkg", "npm:other@^1.0.0"))
        );
        assert_eq!(split_key("lodash"), None);
        assert_eq!(split_key("lodash@"), None);
    }

    #[test]
    fn test_invalid_section_type() {
        let err = Manifest::parse(r#"{"dependencies": ["a"]}"#).unwrap_err();
        assert_eq!(err.code(), codes::LOCK_MANIFEST_INVALID);
        assert!(err.message().contains("got array"));
    }

    #[test]
    fn test_invalid_range_type() {
        let err = Manifest::parse(r#"{"dependencies": {"a": 1}}"#).unwrap_err();
        assert!(err.message().contains("'a'"));
        assert!(err.message().contains("got number"));
    }

    #[test]
    fn test_non_object_root() {
        assert!(Manifest::parse("[]").is_err());
        assert!(Manifest::parse("{not json").is_err());
    }

    #[test]
    fn test_dep_type_from_str() {
        assert_eq!(
            "devDependencies".parse::<DepType>().unwrap(),
            DepType::DevDependencies
        );
        assert!("devDeps".parse::<DepType>().is_err());
    }
}
