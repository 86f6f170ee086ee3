//! `yarn.lock` model and codec.
//!
//! The lockfile maps `name@range` keys to resolved entries. Several keys may
//! resolve to the same entry; such keys share one [`Arc<LockEntry>`] and are
//! written as a single block with a combined header:
//!
//! ```text
//! "lodash@^4.0.0", lodash@^4.17.0:
//!   version "4.17.21"
//!   resolved "https://registry.yarnpkg.com/lodash/-/lodash-4.17.21.tgz#679591c5"
//!   integrity sha512-...
//!   dependencies:
//!     foo "^1.0.0"
//! ```
//!
//! Sharing is preserved on parse, and [`Lockfile::to_yarn_string`] groups by
//! pointer identity, so callers that unify entries get compact output.

use crate::error::SyncError;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use thiserror::Error;

/// Lockfile filename.
pub const LOCKFILE_NAME: &str = "yarn.lock";

const HEADER: &str = "# THIS IS AN AUTOGENERATED FILE. DO NOT EDIT THIS FILE DIRECTLY.\n# yarn lockfile v1\n";

/// One resolved package.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LockEntry {
    /// Resolved version string.
    pub version: String,
    /// Where the package was fetched from (empty when unknown).
    pub resolved: String,
    /// Subresource integrity hash, kept opaque.
    pub integrity: Option<String>,
    /// Declared dependencies of this package (name -> range).
    pub dependencies: BTreeMap<String, String>,
    /// Declared optional dependencies, kept opaque.
    pub optional_dependencies: BTreeMap<String, String>,
    /// Any other scalar fields, kept verbatim.
    pub extra: BTreeMap<String, String>,
    /// Any other nested maps, kept verbatim.
    pub extra_maps: BTreeMap<String, BTreeMap<String, String>>,
}

impl LockEntry {
    /// Create an entry with a version and resolved location.
    #[must_use]
    pub fn new(version: impl Into<String>, resolved: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            resolved: resolved.into(),
            ..Self::default()
        }
    }

    /// Add a dependency.
    #[must_use]
    pub fn with_dependency(mut self, name: impl Into<String>, range: impl Into<String>) -> Self {
        self.dependencies.insert(name.into(), range.into());
        self
    }
}

/// Lockfile codec errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LockfileParseError {
    #[error("line {line}: unexpected indentation")]
    Indentation { line: usize },
    #[error("line {line}: field outside of an entry")]
    Orphan { line: usize },
    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },
    #[error("entry '{key}' has no version")]
    MissingVersion { key: String },
}

impl From<LockfileParseError> for SyncError {
    fn from(e: LockfileParseError) -> Self {
        SyncError::lockfile_invalid(e.to_string())
    }
}

/// A parsed lockfile.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Lockfile {
    entries: BTreeMap<String, Arc<LockEntry>>,
}

impl Lockfile {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Arc<LockEntry>> {
        self.entries.get(key)
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Insert an entry, replacing whatever the key pointed at before.
    pub fn insert(&mut self, key: impl Into<String>, entry: Arc<LockEntry>) {
        self.entries.insert(key.into(), entry);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Arc<LockEntry>)> {
        self.entries.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    /// Owned set of keys, for order-independent comparisons.
    #[must_use]
    pub fn key_set(&self) -> BTreeSet<String> {
        self.entries.keys().cloned().collect()
    }

    /// Copy in every entry of `other`, later keys winning.
    pub fn extend_from(&mut self, other: &Lockfile) {
        for (key, entry) in &other.entries {
            self.entries.insert(key.clone(), Arc::clone(entry));
        }
    }

    /// Parse `yarn.lock` content.
    ///
    /// # Errors
    /// Returns an error on malformed indentation, quoting, or entries
    /// without a version.
    pub fn parse(content: &str) -> Result<Self, LockfileParseError> {
        let mut parser = Parser::default();
        for (idx, raw) in content.lines().enumerate() {
            parser.line(idx + 1, raw.trim_end_matches('\r'))?;
        }
        parser.finish()
    }

    /// Serialize to `yarn.lock` text.
    ///
    /// Keys sharing one entry object are written as one block.
    #[must_use]
    pub fn to_yarn_string(&self) -> String {
        let mut groups: Vec<(Vec<&str>, &LockEntry)> = Vec::new();
        let mut by_ptr: HashMap<*const LockEntry, usize> = HashMap::new();

        for (key, entry) in &self.entries {
            let ptr = Arc::as_ptr(entry);
            if let Some(&idx) = by_ptr.get(&ptr) {
                groups[idx].0.push(key);
            } else {
                by_ptr.insert(ptr, groups.len());
                groups.push((vec![key.as_str()], entry.as_ref()));
            }
        }

        let mut out = String::from(HEADER);
        out.push('\n');
        for (keys, entry) in groups {
            out.push('\n');
            let header: Vec<String> = keys.iter().map(|k| maybe_wrap(k)).collect();
            out.push_str(&header.join(", "));
            out.push_str(":\n");
            write_entry(&mut out, entry);
        }
        out
    }
}

impl FromIterator<(String, Arc<LockEntry>)> for Lockfile {
    fn from_iter<I: IntoIterator<Item = (String, Arc<LockEntry>)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

fn write_entry(out: &mut String, entry: &LockEntry) {
    let mut scalar = |name: &str, value: &str| {
        out.push_str("  ");
        out.push_str(&maybe_wrap(name));
        out.push(' ');
        out.push_str(&maybe_wrap(value));
        out.push('\n');
    };

    scalar("version", &entry.version);
    if !entry.resolved.is_empty() {
        scalar("resolved", &entry.resolved);
    }
    if let Some(integrity) = &entry.integrity {
        scalar("integrity", integrity);
    }
    for (name, value) in &entry.extra {
        scalar(name, value);
    }

    let mut nested = |name: &str, map: &BTreeMap<String, String>| {
        if map.is_empty() {
            return;
        }
        out.push_str("  ");
        out.push_str(&maybe_wrap(name));
        out.push_str(":\n");
        for (dep, range) in map {
            out.push_str("    ");
            out.push_str(&maybe_wrap(dep));
            out.push(' ');
            out.push_str(&maybe_wrap(range));
            out.push('\n');
        }
    };

    nested("dependencies", &entry.dependencies);
    nested("optionalDependencies", &entry.optional_dependencies);
    for (name, map) in &entry.extra_maps {
        nested(name, map);
    }
}

/// Quote a token the way yarn does when it would otherwise be ambiguous.
fn maybe_wrap(s: &str) -> String {
    let needs_quotes = s.starts_with("true")
        || s.starts_with("false")
        || s.chars()
            .any(|c| c.is_whitespace() || matches!(c, ':' | '\\' | '"' | ',' | '[' | ']'))
        || !s.starts_with(|c: char| c.is_ascii_alphabetic());

    if !needs_quotes {
        return s.to_string();
    }

    let mut quoted = String::with_capacity(s.len() + 2);
    quoted.push('"');
    for c in s.chars() {
        match c {
            '"' => quoted.push_str("\\\""),
            '\\' => quoted.push_str("\\\\"),
            '\n' => quoted.push_str("\\n"),
            _ => quoted.push(c),
        }
    }
    quoted.push('"');
    quoted
}

/// Read one token (quoted or bare) from the start of `s`.
///
/// Returns the unquoted token and the remainder.
fn take_token(s: &str, line: usize) -> Result<(String, &str), LockfileParseError> {
    let s = s.trim_start();
    let Some(rest) = s.strip_prefix('"') else {
        let end = s
            .find(|c: char| c.is_whitespace() || c == ',')
            .unwrap_or(s.len());
        return Ok((s[..end].to_string(), &s[end..]));
    };

    let mut token = String::new();
    let mut chars = rest.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '"' => return Ok((token, &rest[i + 1..])),
            '\\' => match chars.next() {
                Some((_, 'n')) => token.push('\n'),
                Some((_, escaped)) => token.push(escaped),
                None => break,
            },
            _ => token.push(c),
        }
    }

    Err(LockfileParseError::Syntax {
        line,
        message: "unterminated string".to_string(),
    })
}

#[derive(Default)]
struct Parser {
    entries: BTreeMap<String, Arc<LockEntry>>,
    keys: Vec<String>,
    entry: Option<LockEntry>,
    has_version: bool,
    nested: Option<String>,
}

impl Parser {
    fn line(&mut self, line: usize, text: &str) -> Result<(), LockfileParseError> {
        let trimmed = text.trim_start();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            return Ok(());
        }

        match text.len() - trimmed.len() {
            0 => self.header(line, trimmed),
            2 => self.field(line, trimmed),
            4 => self.nested_field(line, trimmed),
            _ => Err(LockfileParseError::Indentation { line }),
        }
    }

    fn header(&mut self, line: usize, text: &str) -> Result<(), LockfileParseError> {
        self.flush()?;

        let Some(mut rest) = text.trim_end().strip_suffix(':') else {
            return Err(LockfileParseError::Syntax {
                line,
                message: "entry header must end with ':'".to_string(),
            });
        };

        while !rest.trim().is_empty() {
            let (key, after) = take_token(rest, line)?;
            if key.is_empty() {
                return Err(LockfileParseError::Syntax {
                    line,
                    message: "empty key".to_string(),
                });
            }
            self.keys.push(key);
            rest = after.trim_start();
            rest = rest.strip_prefix(',').unwrap_or(rest);
        }

        self.entry = Some(LockEntry::default());
        Ok(())
    }

    fn field(&mut self, line: usize, text: &str) -> Result<(), LockfileParseError> {
        let Some(entry) = self.entry.as_mut() else {
            return Err(LockfileParseError::Orphan { line });
        };

        let (name, rest) = take_token(text, line)?;
        let rest = rest.trim();

        if let Some(name) = name.strip_suffix(':').filter(|_| rest.is_empty()) {
            self.nested = Some(name.to_string());
            return Ok(());
        }
        if rest == ":" {
            self.nested = Some(name);
            return Ok(());
        }

        self.nested = None;
        let (value, _) = take_token(rest, line)?;
        match name.as_str() {
            "version" => {
                entry.version = value;
                self.has_version = true;
            }
            "resolved" => entry.resolved = value,
            "integrity" => entry.integrity = Some(value),
            _ => {
                entry.extra.insert(name, value);
            }
        }
        Ok(())
    }

    fn nested_field(&mut self, line: usize, text: &str) -> Result<(), LockfileParseError> {
        let (Some(entry), Some(section)) = (self.entry.as_mut(), self.nested.as_deref()) else {
            return Err(LockfileParseError::Orphan { line });
        };

        let (name, rest) = take_token(text, line)?;
        let (value, _) = take_token(rest, line)?;
        let map = match section {
            "dependencies" => &mut entry.dependencies,
            "optionalDependencies" => &mut entry.optional_dependencies,
            other => entry.extra_maps.entry(other.to_string()).or_default(),
        };
        map.insert(name, value);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), LockfileParseError> {
        self.nested = None;
        let Some(entry) = self.entry.take() else {
            return Ok(());
        };
        let keys = std::mem::take(&mut self.keys);
        if !std::mem::take(&mut self.has_version) {
            return Err(LockfileParseError::MissingVersion {
                key: keys.first().cloned().unwrap_or_default(),
            });
        }

        let entry = Arc::new(entry);
        for key in keys {
            self.entries.insert(key, Arc::clone(&entry));
        }
        Ok(())
    }

    fn finish(mut self) -> Result<Lockfile, LockfileParseError> {
        self.flush()?;
        Ok(Lockfile {
            entries: self.entries,
        })
    }
}
