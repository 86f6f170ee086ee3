//! npm-style version ranges on top of the `semver` crate.
//!
//! npm ranges differ from Cargo requirements in a few places that matter for
//! lockfile work: a bare `1.2.3` is exact, a bare `1.2` means `1.2.x`,
//! comparators are joined by spaces, and `||` separates alternatives.
//! Every range is converted to a list of [`VersionReq`] alternatives.

use semver::{Comparator, Op, Version, VersionReq};
use std::cmp::Ordering;

/// Parse an npm range into its `||` alternatives.
///
/// Returns `None` for anything that is not a semver range (dist-tags,
/// `file:`/`git+` references, URLs).
#[must_use]
pub fn parse_range(range: &str) -> Option<Vec<VersionReq>> {
    let range = range.trim();
    if range.is_empty() {
        return VersionReq::parse("*").ok().map(|req| vec![req]);
    }

    let mut alternatives = Vec::new();
    for alt in range.split("||") {
        let converted = convert_alternative(alt.trim())?;
        alternatives.push(VersionReq::parse(&converted).ok()?);
    }
    Some(alternatives)
}

/// Whether `version` satisfies the npm `range`.
///
/// Unparseable versions or ranges never satisfy.
#[must_use]
pub fn satisfies(version: &str, range: &str) -> bool {
    let Ok(version) = Version::parse(version.trim()) else {
        return false;
    };
    parse_range(range).is_some_and(|alts| alts.iter().any(|req| req.matches(&version)))
}

/// Lowest version that satisfies `range`, if one can be computed.
#[must_use]
pub fn min_version(range: &str) -> Option<Version> {
    let alternatives = parse_range(range)?;

    let mut candidates = vec![Version::new(0, 0, 0)];
    for req in &alternatives {
        let lower = req
            .comparators
            .iter()
            .filter_map(lower_bound)
            .max()
            .unwrap_or_else(|| Version::new(0, 0, 0));
        candidates.push(lower);
    }
    candidates.sort();

    candidates
        .into_iter()
        .find(|v| alternatives.iter().any(|req| req.matches(v)))
}

/// Compare two version strings semantically.
///
/// Unparseable versions order below every parseable one and compare equal
/// among themselves, so sorting never depends on lexical accidents.
#[must_use]
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    match (Version::parse(a.trim()), Version::parse(b.trim())) {
        (Ok(a), Ok(b)) => a.cmp(&b),
        (Ok(_), Err(_)) => Ordering::Greater,
        (Err(_), Ok(_)) => Ordering::Less,
        (Err(_), Err(_)) => Ordering::Equal,
    }
}

/// Whether `a` is strictly greater than `b`.
#[must_use]
pub fn gt(a: &str, b: &str) -> bool {
    compare_versions(a, b) == Ordering::Greater
}

/// Smallest version a single comparator admits, if it bounds from below.
fn lower_bound(cmp: &Comparator) -> Option<Version> {
    let minor = cmp.minor.unwrap_or(0);
    let patch = cmp.patch.unwrap_or(0);
    match cmp.op {
        Op::Exact | Op::GreaterEq | Op::Tilde | Op::Caret | Op::Wildcard => {
            let mut v = Version::new(cmp.major, minor, patch);
            v.pre = cmp.pre.clone();
            Some(v)
        }
        Op::Greater => Some(match (cmp.minor, cmp.patch) {
            (None, _) => Version::new(cmp.major.checked_add(1)?, 0, 0),
            (Some(minor), None) => Version::new(cmp.major, minor.checked_add(1)?, 0),
            (Some(minor), Some(patch)) => Version::new(cmp.major, minor, patch.checked_add(1)?),
        }),
        _ => None,
    }
}

/// Convert one `||` alternative to `semver` requirement syntax.
fn convert_alternative(alt: &str) -> Option<String> {
    if alt.is_empty() {
        return Some("*".to_string());
    }

    // Hyphen ranges: "1.0.0 - 2.0.0" -> ">=1.0.0, <=2.0.0"
    if let Some((start, end)) = alt.split_once(" - ") {
        let (start, end) = (strip_v(start.trim()), strip_v(end.trim()));
        if start.is_empty() || end.is_empty() {
            return None;
        }
        return Some(format!(">={start}, <={end}"));
    }

    let mut comparators = Vec::new();
    for token in comparator_tokens(alt) {
        if let Some(converted) = convert_comparator(&token)? {
            comparators.push(converted);
        }
    }

    if comparators.is_empty() {
        Some("*".to_string())
    } else {
        Some(comparators.join(", "))
    }
}

/// Split an alternative into comparator tokens, re-attaching operators that
/// were separated from their version by whitespace (`">= 1.2.3"`).
fn comparator_tokens(alt: &str) -> Vec<String> {
    let mut tokens: Vec<String> = Vec::new();
    let mut pending_op = String::new();

    for word in alt.split_whitespace() {
        if word.chars().all(|c| matches!(c, '<' | '>' | '=' | '~' | '^')) {
            pending_op.push_str(word);
            continue;
        }
        tokens.push(format!("{pending_op}{word}"));
        pending_op.clear();
    }

    tokens
}

/// Convert a single comparator. `Ok(None)` means "matches anything".
fn convert_comparator(token: &str) -> Option<Option<String>> {
    let split = token
        .find(|c: char| !matches!(c, '<' | '>' | '=' | '~' | '^'))
        .unwrap_or(token.len());
    let (op, rest) = token.split_at(split);
    let op = if op == "~>" { "~" } else { op };
    let rest = strip_v(rest);

    if !matches!(op, "" | "=" | ">" | ">=" | "<" | "<=" | "~" | "^") {
        return None;
    }
    if !rest
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_digit() || matches!(c, 'x' | 'X' | '*'))
    {
        return None;
    }

    // Everything before the prerelease/build suffix
    let core_len = rest.find(['-', '+']).unwrap_or(rest.len());
    let parts: Vec<&str> = rest[..core_len].split('.').collect();
    let wildcard_at = parts
        .iter()
        .position(|p| matches!(*p, "x" | "X" | "*"));

    if let Some(pos) = wildcard_at {
        if pos == 0 {
            return Some(None);
        }
        let fixed = parts[..pos].join(".");
        return Some(Some(match op {
            "" | "=" => x_range(&parts[..pos])?,
            _ => format!("{op}{fixed}"),
        }));
    }

    Some(Some(match op {
        "" if parts.len() >= 3 => format!("={rest}"),
        "" => format!("~{rest}"),
        _ => format!("{op}{rest}"),
    }))
}

/// "1" -> ">=1.0.0, <2.0.0", "1.2" -> ">=1.2.0, <1.3.0".
fn x_range(fixed: &[&str]) -> Option<String> {
    match fixed {
        [major] => {
            let m: u64 = major.parse().ok()?;
            Some(format!(">={m}.0.0, <{}.0.0", m.checked_add(1)?))
        }
        [major, minor, ..] => {
            let m: u64 = major.parse().ok()?;
            let n: u64 = minor.parse().ok()?;
            Some(format!(">={m}.{n}.0, <{m}.{}.0", n.checked_add(1)?))
        }
        [] => None,
    }
}

fn strip_v(s: &str) -> &str {
    s.strip_prefix(['v', 'V']).unwrap_or(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_caret_and_tilde() {
        assert!(satisfies("4.17.21", "^4.0.0"));
        assert!(!satisfies("5.0.0", "^4.0.0"));
        assert!(satisfies("1.0.5", "~1.0.0"));
        assert!(!satisfies("1.1.0", "~1.0.0"));
    }

    #[test]
    fn test_bare_version_is_exact() {
        assert!(satisfies("1.2.3", "1.2.3"));
        assert!(!satisfies("1.2.4", "1.2.3"));
        assert!(satisfies("1.2.3", "v1.2.3"));
        assert!(satisfies("1.2.3", "=1.2.3"));
    }

    #[test]
    fn test_partial_bare_version() {
        assert!(satisfies("1.2.9", "1.2"));
        assert!(!satisfies("1.3.0", "1.2"));
        assert!(satisfies("1.9.0", "1"));
        assert!(!satisfies("2.0.0", "1"));
    }

    #[test]
    fn test_or_range() {
        assert!(satisfies("2.5.0", "^1.0.0 || ^2.0.0"));
        assert!(satisfies("1.5.0", "^1.0.0||^2.0.0"));
        assert!(!satisfies("3.0.0", "^1.0.0 || ^2.0.0"));
    }

    #[test]
    fn test_x_ranges() {
        assert!(satisfies("1.5.0", "1.x"));
        assert!(!satisfies("2.0.0", "1.x"));
        assert!(satisfies("1.2.7", "1.2.x"));
        assert!(satisfies("9.9.9", "*"));
        assert!(satisfies("9.9.9", ""));
        assert!(satisfies("1.4.0", "^1.x"));
    }

    #[test]
    fn test_max_components_do_not_overflow() {
        let max = u64::MAX;
        assert!(!satisfies("1.0.0", &format!("{max}.x")));
        assert!(!satisfies("1.0.0", &format!("1.{max}.x")));
        assert_eq!(min_version(&format!(">{max}")), None);
        assert_eq!(min_version(&format!(">1.{max}")), None);
        assert_eq!(min_version(&format!(">1.0.{max}")), None);
    }

    #[test]
    fn test_hyphen_range() {
        assert!(satisfies("2.0.0", "1.0.0 - 2.0.0"));
        assert!(!satisfies("2.0.1", "1.0.0 - 2.0.0"));
    }

    #[test]
    fn test_space_separated_comparators() {
        assert!(satisfies("2.5.0", ">= 2.1.2 < 3.0.0"));
        assert!(satisfies("2.1.2", ">=2.1.2 <3.0.0"));
        assert!(!satisfies("3.0.0", ">= 2.1.2 < 3.0.0"));
    }

    #[test]
    fn test_non_semver_ranges_never_satisfy() {
        assert!(!satisfies("1.0.0", "latest"));
        assert!(!satisfies("1.0.0", "file:../local"));
        assert!(!satisfies("1.0.0", "github:user/repo#abc"));
        assert!(!satisfies("not-a-version", "^1.0.0"));
    }

    #[test]
    fn test_prerelease_excluded_by_default() {
        assert!(!satisfies("2.0.0-beta.1", "^1.0.0"));
        assert!(satisfies("2.0.0-beta.2", "^2.0.0-beta.1"));
    }

    #[test]
    fn test_min_version() {
        assert_eq!(min_version("^1.2.3"), Some(Version::new(1, 2, 3)));
        assert_eq!(min_version("~2.1"), Some(Version::new(2, 1, 0)));
        assert_eq!(min_version(">1.2.3"), Some(Version::new(1, 2, 4)));
        assert_eq!(min_version("<2.0.0"), Some(Version::new(0, 0, 0)));
        assert_eq!(min_version("*"), Some(Version::new(0, 0, 0)));
        assert_eq!(min_version("^2.0.0 || ^1.5.0"), Some(Version::new(1, 5, 0)));
        assert_eq!(min_version(">=1.0.0 <1.5.0"), Some(Version::new(1, 0, 0)));
        assert_eq!(min_version("file:../x"), None);
    }

    #[test]
    fn test_compare_versions_semantic_not_lexical() {
        assert_eq!(compare_versions("4.17.21", "4.17.3"), Ordering::Greater);
        assert_eq!(compare_versions("10.0.0", "9.0.0"), Ordering::Greater);
        assert_eq!(compare_versions("1.0.0", "garbage"), Ordering::Greater);
        assert_eq!(compare_versions("junk", "garbage"), Ordering::Equal);
        assert!(gt("1.0.1", "1.0.0"));
        assert!(!gt("1.0.0", "1.0.0"));
    }
}
