//! Memoized expression rewrites.
use std::cell::{Cell, RefCell};
use std::collections::HashMap;

/// Identifies one rewrite. `repeats` is the size of the context selector's match set, so a
/// change in repeat cardinality yields a new key instead of invalidating old entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub expression: String,
    pub selector: Option<String>,
    pub index: usize,
    pub repeats: Option<usize>,
}

#[derive(Debug, Default)]
pub struct EvaluationCache {
    entries: RefCell<HashMap<CacheKey, String>>,
    rewrites: Cell<usize>,
}

impl EvaluationCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &CacheKey) -> Option<String> {
        let hit = self.entries.borrow().get(key).cloned();
        if hit.is_some() {
            log::trace!("Rewrite cache hit for '{}'", key.expression);
        }
        hit
    }

    /// Stores a rewrite. An existing entry is never replaced.
    pub fn insert(&self, key: CacheKey, rewritten: String) {
        self.entries.borrow_mut().entry(key).or_insert(rewritten);
    }

    pub fn record_rewrite(&self) {
        self.rewrites.set(self.rewrites.get() + 1);
    }

    /// How many times the rewriter has run since the model was created.
    pub fn rewrite_count(&self) -> usize {
        self.rewrites.get()
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(expression: &str, repeats: Option<usize>) -> CacheKey {
        CacheKey {
            expression: expression.into(),
            selector: Some("/data/rep/x".into()),
            index: 1,
            repeats,
        }
    }

    #[test]
    fn test_entries_are_immutable() {
        let cache = EvaluationCache::new();
        cache.insert(key("../a", Some(2)), "first".into());
        cache.insert(key("../a", Some(2)), "second".into());
        assert_eq!(cache.get(&key("../a", Some(2))).as_deref(), Some("first"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_repeat_count_is_part_of_key() {
        let cache = EvaluationCache::new();
        cache.insert(key("../a", Some(2)), "two".into());
        assert_eq!(cache.get(&key("../a", Some(3))), None);
        assert!(!cache.is_empty());
    }
}
