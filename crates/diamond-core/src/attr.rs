//! Named, signature-addressed attributes on an object.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::sig::Sig128;

/// A named binary attribute. `sig` is the digest of `value` and is
/// authoritative for cache-key purposes; `value` may be stored out-of-line
/// (e.g. large attribute payloads live under `oattr/<hex_oid>/<name>` and
/// only the signature travels through the cache table).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attr {
    pub name: String,
    pub sig: Sig128,
    pub value: Vec<u8>,
}

impl Attr {
    /// Build an attribute, computing `sig` from `value`.
    #[must_use]
    pub fn new(name: impl Into<String>, value: Vec<u8>) -> Self {
        let sig = Sig128::of_bytes(&value);
        Self {
            name: name.into(),
            sig,
            value,
        }
    }

    /// An `(name, sig)` pair with no carried value, as recorded in a
    /// cache entry's `iattr`/`oattr` sets.
    #[must_use]
    pub fn entry(&self) -> CacheAttrEntry {
        CacheAttrEntry {
            name: self.name.clone(),
            sig: self.sig,
        }
    }
}

/// A `(name, sig)` pair as recorded inside a cache entry's attribute sets —
/// the value itself is not part of the cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheAttrEntry {
    pub name: String,
    pub sig: Sig128,
}

impl PartialOrd for CacheAttrEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CacheAttrEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        (&self.name, self.sig.as_bytes()).cmp(&(&other.name, other.sig.as_bytes()))
    }
}

/// An unordered set of [`CacheAttrEntry`] values. Equality is by the
/// multiset of `(name, sig)` pairs; internally kept as a sorted `Vec` so
/// canonical hashing (`iattr_sig`) and equality are both cheap and
/// deterministic regardless of insertion order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AttrSet(Vec<CacheAttrEntry>);

impl AttrSet {
    #[must_use]
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn insert(&mut self, entry: CacheAttrEntry) {
        if let Err(pos) = self.0.binary_search(&entry) {
            self.0.insert(pos, entry);
        }
    }

    #[must_use]
    pub fn from_entries(mut entries: Vec<CacheAttrEntry>) -> Self {
        entries.sort();
        entries.dedup();
        Self(entries)
    }

    #[must_use]
    pub fn iter(&self) -> std::slice::Iter<'_, CacheAttrEntry> {
        self.0.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&CacheAttrEntry> {
        self.0.iter().find(|e| e.name == name)
    }

    /// Canonical digest of this set: the signature of the concatenation of
    /// entries sorted by `(name, sig)`. This is the `iattr_sig` invariant
    /// from the data model: computed once, over the already-sorted
    /// internal representation.
    #[must_use]
    pub fn canonical_sig(&self) -> Sig128 {
        let mut buf = Vec::with_capacity(self.0.len() * 24);
        for entry in &self.0 {
            buf.extend_from_slice(&(entry.name.len() as u64).to_le_bytes());
            buf.extend_from_slice(entry.name.as_bytes());
            buf.extend_from_slice(entry.sig.as_bytes());
        }
        Sig128::of_bytes(&buf)
    }

    /// Whether `self` is a subset of `other` with matching signatures for
    /// every shared attribute — the cache's subset hit rule. `changed`
    /// collects the names that are present in both but whose signatures
    /// differ (input for narrowing partial-hit re-verification).
    #[must_use]
    pub fn is_subset_with_matching_sigs(&self, other: &AttrSet) -> SubsetCheck {
        let mut changed = Vec::new();
        let mut missing = Vec::new();
        for entry in &self.0 {
            match other.get(&entry.name) {
                Some(found) if found.sig == entry.sig => {}
                Some(_) => changed.push(entry.name.clone()),
                None => missing.push(entry.name.clone()),
            }
        }
        SubsetCheck { changed, missing }
    }
}

impl PartialEq for AttrSet {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}
impl Eq for AttrSet {}

impl FromIterator<CacheAttrEntry> for AttrSet {
    fn from_iter<I: IntoIterator<Item = CacheAttrEntry>>(iter: I) -> Self {
        Self::from_entries(iter.into_iter().collect())
    }
}

/// Result of comparing a cache entry's recorded `iattr` against an object's
/// current attributes.
#[derive(Debug, Clone, Default)]
pub struct SubsetCheck {
    /// Names present in both sets but with differing signatures.
    pub changed: Vec<String>,
    /// Names the recorded set needs that the current object doesn't carry.
    pub missing: Vec<String>,
}

impl SubsetCheck {
    #[must_use]
    pub fn is_hit(&self) -> bool {
        self.changed.is_empty() && self.missing.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, byte: u8) -> CacheAttrEntry {
        CacheAttrEntry {
            name: name.to_string(),
            sig: Sig128::of_bytes(&[byte]),
        }
    }

    #[test]
    fn set_equality_ignores_insertion_order() {
        let a = AttrSet::from_entries(vec![entry("a", 1), entry("b", 2)]);
        let b = AttrSet::from_entries(vec![entry("b", 2), entry("a", 1)]);
        assert_eq!(a, b);
        assert_eq!(a.canonical_sig(), b.canonical_sig());
    }

    #[test]
    fn subset_hit_when_equal() {
        let recorded = AttrSet::from_entries(vec![entry("color", 1)]);
        let current = AttrSet::from_entries(vec![entry("color", 1), entry("size", 2)]);
        assert!(recorded.is_subset_with_matching_sigs(&current).is_hit());
    }

    #[test]
    fn subset_miss_when_value_changed() {
        let recorded = AttrSet::from_entries(vec![entry("color", 1)]);
        let current = AttrSet::from_entries(vec![entry("color", 9)]);
        let check = recorded.is_subset_with_matching_sigs(&current);
        assert!(!check.is_hit());
        assert_eq!(check.changed, vec!["color".to_string()]);
    }

    #[test]
    fn subset_miss_when_attr_missing() {
        let recorded = AttrSet::from_entries(vec![entry("color", 1)]);
        let current = AttrSet::new();
        let check = recorded.is_subset_with_matching_sigs(&current);
        assert!(!check.is_hit());
        assert_eq!(check.missing, vec!["color".to_string()]);
    }
}
