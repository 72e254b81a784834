//! The per-session reversible substitution map. Writes happen only in the
//! redact steps, reads only in the unredact step, so the lock is held for
//! short critical sections and never across await points.

use std::collections::HashMap;
use std::sync::RwLock;

use super::types::{SpanOrigin, SubstitutionEntry};

/// `REDACTED_` + 32 hex chars.
const SECRET_PLACEHOLDER_LEN: usize = 9 + 32;
/// `<` + hyphenated uuid + `>`.
const PII_PLACEHOLDER_LEN: usize = 1 + 36 + 1;

#[derive(Default)]
struct StoreInner {
    by_literal: HashMap<String, SubstitutionEntry>,
    by_placeholder: HashMap<String, SubstitutionEntry>,
}

pub struct SubstitutionStore {
    inner: RwLock<StoreInner>,
}

impl SubstitutionStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(StoreInner::default()),
        }
    }

    /// The longest placeholder either family can produce; the streaming
    /// restorer holds back at most this minus one byte.
    pub fn max_placeholder_len(&self) -> usize {
        SECRET_PLACEHOLDER_LEN.max(PII_PLACEHOLDER_LEN)
    }

    fn mint(origin: SpanOrigin) -> String {
        match origin {
            SpanOrigin::Secret => format!("REDACTED_{}", uuid::Uuid::new_v4().simple()),
            SpanOrigin::Pii => format!("<{}>", uuid::Uuid::new_v4()),
        }
    }

    /// Returns the entry for `literal`, allocating a fresh placeholder on
    /// first sight. Placeholders are rejection-sampled against the map so
    /// no two literals ever share one.
    pub fn placeholder_for(
        &self,
        literal: &str,
        origin: SpanOrigin,
        subtype: &str,
    ) -> SubstitutionEntry {
        let mut inner = self.inner.write().expect("substitution store poisoned");
        if let Some(existing) = inner.by_literal.get(literal) {
            return existing.clone();
        }
        let placeholder = loop {
            let candidate = Self::mint(origin);
            if !inner.by_placeholder.contains_key(&candidate) {
                break candidate;
            }
        };
        let entry = SubstitutionEntry::new(
            placeholder.clone(),
            literal.to_owned(),
            origin,
            subtype.to_owned(),
        );
        inner.by_literal.insert(literal.to_owned(), entry.clone());
        inner.by_placeholder.insert(placeholder, entry.clone());
        entry
    }

    pub fn literal_for(&self, placeholder: &str) -> Option<String> {
        self.inner
            .read()
            .expect("substitution store poisoned")
            .by_placeholder
            .get(placeholder)
            .map(|entry| entry.literal().to_owned())
    }

    /// True when some stored placeholder starts with `candidate`; the
    /// streaming restorer uses this to size its held-back tail.
    pub fn any_placeholder_has_prefix(&self, candidate: &str) -> bool {
        if candidate.is_empty() {
            return false;
        }
        self.inner
            .read()
            .expect("substitution store poisoned")
            .by_placeholder
            .keys()
            .any(|placeholder| placeholder.starts_with(candidate))
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .expect("substitution store poisoned")
            .by_literal
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn count_by_origin(&self, origin: SpanOrigin) -> usize {
        self.inner
            .read()
            .expect("substitution store poisoned")
            .by_literal
            .values()
            .filter(|entry| entry.origin() == origin)
            .count()
    }

    pub fn entries(&self) -> Vec<SubstitutionEntry> {
        self.inner
            .read()
            .expect("substitution store poisoned")
            .by_literal
            .values()
            .cloned()
            .collect()
    }

    /// Session teardown: every mapping dies with the session.
    pub fn clear(&self) {
        let mut inner = self.inner.write().expect("substitution store poisoned");
        inner.by_literal.clear();
        inner.by_placeholder.clear();
    }
}

impl Default for SubstitutionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_literal_reuses_placeholder() {
        let store = SubstitutionStore::new();
        let first = store.placeholder_for("sk-123", SpanOrigin::Secret, "api_key");
        let second = store.placeholder_for("sk-123", SpanOrigin::Secret, "api_key");
        assert_eq!(first.placeholder(), second.placeholder());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn placeholder_forms_are_fixed_length_and_distinct() {
        let store = SubstitutionStore::new();
        let secret = store.placeholder_for("a", SpanOrigin::Secret, "s");
        let pii = store.placeholder_for("b", SpanOrigin::Pii, "email");
        assert_eq!(secret.placeholder().len(), 9 + 32);
        assert_eq!(pii.placeholder().len(), 38);
        assert!(secret.placeholder().starts_with("REDACTED_"));
        assert!(pii.placeholder().starts_with('<'));
        assert!(pii.placeholder().ends_with('>'));
        // neither form can be a substring of the other
        assert!(!secret.placeholder().contains(pii.placeholder()));
        assert!(!pii.placeholder().contains(secret.placeholder()));
    }

    #[test]
    fn reverse_lookup_round_trips() {
        let store = SubstitutionStore::new();
        let entry = store.placeholder_for("ghp_zzz", SpanOrigin::Secret, "github");
        assert_eq!(
            store.literal_for(entry.placeholder()).as_deref(),
            Some("ghp_zzz")
        );
        assert_eq!(store.literal_for("REDACTED_not_in_map"), None);
    }

    #[test]
    fn prefix_probe_matches_partial_placeholder() {
        let store = SubstitutionStore::new();
        let entry = store.placeholder_for("x", SpanOrigin::Secret, "s");
        let prefix = &entry.placeholder()[..12];
        assert!(store.any_placeholder_has_prefix(prefix));
        assert!(!store.any_placeholder_has_prefix("zzz"));
    }

    #[test]
    fn clear_drops_all_entries() {
        let store = SubstitutionStore::new();
        store.placeholder_for("x", SpanOrigin::Secret, "s");
        store.clear();
        assert!(store.is_empty());
    }
}
