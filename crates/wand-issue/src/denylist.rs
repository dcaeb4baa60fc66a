//! Targets links must never point at.

use std::collections::BTreeSet;

use tracing::warn;
use wand_session::Target;

/// A set of forbidden targets, matched by exact string comparison against
/// the normalized origin.
///
/// Entries are normalized on insertion the same way targets are:
///
/// - `https://Admin.local:8443` is stored as `https://admin.local:8443`.
/// - `localhost:6060` (no scheme) is stored as both `http://localhost:6060`
///   and `https://localhost:6060`.
/// - Anything that doesn't normalize is stored verbatim, with a warning.
#[derive(Debug, Clone, Default)]
pub struct Denylist {
    entries: BTreeSet<String>,
}

impl Denylist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one entry. Blank entries are ignored.
    pub fn insert(&mut self, entry: &str) {
        let entry = entry.trim();
        if entry.is_empty() {
            return;
        }

        let normalized: Vec<Target> = if entry.contains("://") {
            Target::parse_url(entry).into_iter().collect()
        } else {
            [false, true]
                .into_iter()
                .filter_map(|tls| Target::parse(entry, tls).ok())
                .collect()
        };

        if normalized.is_empty() {
            warn!(entry, "denylist entry is not a valid origin, matching it verbatim");
            self.entries.insert(entry.to_string());
            return;
        }
        self.entries
            .extend(normalized.into_iter().map(|target| target.as_str().to_string()));
    }

    /// Returns `true` if `target` is forbidden.
    pub fn contains(&self, target: &Target) -> bool {
        self.entries.contains(target.as_str())
    }

    /// The normalized entries, in sorted order.
    pub fn entries(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<S: AsRef<str>> FromIterator<S> for Denylist {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut list = Self::new();
        list.extend(iter);
        list
    }
}

impl<S: AsRef<str>> Extend<S> for Denylist {
    fn extend<I: IntoIterator<Item = S>>(&mut self, iter: I) {
        for entry in iter {
            self.insert(entry.as_ref());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn http(host: &str) -> Target {
        Target::parse(host, false).unwrap()
    }

    fn https(host: &str) -> Target {
        Target::parse(host, true).unwrap()
    }

    #[test]
    fn test_insert_without_scheme_denies_both_schemes() {
        let list: Denylist = ["localhost:6060"].into_iter().collect();
        assert!(list.contains(&http("localhost:6060")));
        assert!(list.contains(&https("localhost:6060")));
        assert!(!list.contains(&http("localhost:6061")));
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn test_insert_with_scheme_denies_only_that_scheme() {
        let list: Denylist = ["https://internal.example"].into_iter().collect();
        assert!(list.contains(&https("internal.example")));
        assert!(!list.contains(&http("internal.example")));
    }

    #[test]
    fn test_insert_normalizes_case_and_default_port() {
        let list: Denylist = ["http://Admin.Example:80/"].into_iter().collect();
        assert!(list.contains(&http("admin.example")));
        assert_eq!(list.entries().collect::<Vec<_>>(), vec!["http://admin.example"]);
    }

    #[test]
    fn test_insert_unparseable_entry_kept_verbatim() {
        let list: Denylist = ["not a host"].into_iter().collect();
        assert_eq!(list.entries().collect::<Vec<_>>(), vec!["not a host"]);
    }

    #[test]
    fn test_insert_blank_entry_ignored() {
        let list: Denylist = ["", "   "].into_iter().collect();
        assert!(list.is_empty());
    }
}
