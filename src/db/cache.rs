//! Record-view cache (§4.3: "recently read (partial) primary and secondary
//! records are cached; when a new Write is accepted with a matching
//! key/record (or key/value), the cached view is appended to in place so
//! it stays consistent").
//!
//! Search hits are cached under their own `(key, token)` map rather than
//! folded into `secondary` — a token's bytes are not a value's encoded
//! bytes, so the two need independent key schemes for `observe_accepted`
//! to extend the right entries.
//!
//! Cache entries are plain owned snapshots, not back-pointers into the
//! engine — invalidation/append happens through an explicit handle
//! (`Db::accept` calling `extend_primary`/`extend_secondary`), matching the
//! "arena ownership, not cyclic back-pointers" re-architecture note (§9).

use std::collections::HashMap;
use std::sync::RwLock;

use crate::write::Write as Revision;

#[derive(Default)]
pub struct RecordCache {
    /// (record, key) -> cached revisions, version-ascending.
    primary: RwLock<HashMap<(i64, String), Vec<Revision>>>,
    /// (key, value-bytes) -> cached revisions, version-ascending.
    secondary: RwLock<HashMap<(String, Vec<u8>), Vec<Revision>>>,
    /// (key, lowercased token) -> cached search hits, record-then-version order.
    search: RwLock<HashMap<(String, String), Vec<Revision>>>,
}

impl RecordCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_primary(&self, record: i64, key: &str) -> Option<Vec<Revision>> {
        self.primary.read().unwrap().get(&(record, key.to_string())).cloned()
    }

    pub fn put_primary(&self, record: i64, key: &str, revisions: Vec<Revision>) {
        self.primary.write().unwrap().insert((record, key.to_string()), revisions);
    }

    pub fn get_secondary(&self, key: &str, value_bytes: &[u8]) -> Option<Vec<Revision>> {
        self.secondary.read().unwrap().get(&(key.to_string(), value_bytes.to_vec())).cloned()
    }

    pub fn put_secondary(&self, key: &str, value_bytes: &[u8], revisions: Vec<Revision>) {
        self.secondary
            .write()
            .unwrap()
            .insert((key.to_string(), value_bytes.to_vec()), revisions);
    }

    pub fn get_search(&self, key: &str, token: &str) -> Option<Vec<Revision>> {
        self.search.read().unwrap().get(&(key.to_string(), token.to_string())).cloned()
    }

    pub fn put_search(&self, key: &str, token: &str, revisions: Vec<Revision>) {
        self.search
            .write()
            .unwrap()
            .insert((key.to_string(), token.to_string()), revisions);
    }

    /// Appends `revision` to every cached view it matches, in place, so a
    /// subsequent read observes it without a cache miss (Scenario 2).
    pub fn observe_accepted(&self, revision: &Revision) {
        if let Some(entries) = self
            .primary
            .write()
            .unwrap()
            .get_mut(&(revision.record, revision.key.clone()))
        {
            entries.push(revision.clone());
        }

        let value_bytes = revision.value.encode_be();
        if let Some(entries) = self
            .secondary
            .write()
            .unwrap()
            .get_mut(&(revision.key.clone(), value_bytes))
        {
            entries.push(revision.clone());
        }

        if !revision.value.search_tokens().is_empty() {
            let mut search = self.search.write().unwrap();
            for token in revision.value.search_tokens() {
                if let Some(entries) = search.get_mut(&(revision.key.clone(), token)) {
                    entries.push(revision.clone());
                }
            }
        }
    }

    /// Drops every cached entry — used when a cache is suspected of having
    /// silently diverged from durable state (§7: "on any cache inconsistency
    /// detection, the cache entry is invalidated rather than returned stale").
    pub fn invalidate_all(&self) {
        self.primary.write().unwrap().clear();
        self.secondary.write().unwrap().clear();
        self.search.write().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn observe_accepted_extends_matching_cache_entries() {
        let cache = RecordCache::new();
        cache.put_primary(42, "foo", vec![Revision::add("foo", Value::Integer(1), 42, 1)]);

        let new_write = Revision::add("foo", Value::Integer(99999), 42, 2);
        cache.observe_accepted(&new_write);

        let cached = cache.get_primary(42, "foo").unwrap();
        assert_eq!(cached.len(), 2);
        assert_eq!(cached[1].value, Value::Integer(99999));
    }

    #[test]
    fn observe_accepted_ignores_non_matching_entries() {
        let cache = RecordCache::new();
        cache.put_primary(42, "foo", vec![Revision::add("foo", Value::Integer(1), 42, 1)]);
        cache.observe_accepted(&Revision::add("bar", Value::Integer(2), 7, 2));
        assert_eq!(cache.get_primary(42, "foo").unwrap().len(), 1);
    }

    #[test]
    fn observe_accepted_extends_cached_search_hits_by_token() {
        let cache = RecordCache::new();
        let first = Revision::add("bio", Value::String("loves rust programming".into()), 1, 1);
        cache.put_search("bio", "rust", vec![first.clone()]);

        let second = Revision::add("bio", Value::String("rust is fun".into()), 2, 2);
        cache.observe_accepted(&second);

        let cached = cache.get_search("bio", "rust").unwrap();
        assert_eq!(cached.len(), 2);
        assert!(cached.iter().any(|w| w.record == 2));
    }
}
