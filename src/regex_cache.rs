//! Memoization of compiled regular expressions used by `matches`/`notMatches` conditions.
use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use regex::{Regex, RegexBuilder};

/// `RegexCache` is an append-only table from `(pattern, flags)` to the compiled regex. Compile
/// failures are remembered too, so a broken pattern is only reported once.
///
/// It is shared (via `Arc`) between all datafile readers of an instance.
#[derive(Debug, Default)]
pub struct RegexCache {
    entries: RwLock<HashMap<(String, String), Option<Arc<Regex>>>>,
}

impl RegexCache {
    /// Create a new empty cache.
    pub fn new() -> Self {
        RegexCache::default()
    }

    /// Get compiled regex for `pattern` with JavaScript-style `flags` (`i`, `m`, `s`, `x`; other
    /// flags are ignored). Returns `None` if the pattern does not compile.
    pub fn get(&self, pattern: &str, flags: &str) -> Option<Arc<Regex>> {
        let key = (pattern.to_owned(), flags.to_owned());

        if let Some(entry) = self
            .entries
            .read()
            .expect("thread holding regex cache lock should not panic")
            .get(&key)
        {
            return entry.clone();
        }

        // Compiling outside of the lock; if two threads race, both produce the same value.
        let compiled = compile(pattern, flags);

        self.entries
            .write()
            .expect("thread holding regex cache lock should not panic")
            .entry(key)
            .or_insert(compiled)
            .clone()
    }

    /// Number of cached patterns.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .expect("thread holding regex cache lock should not panic")
            .len()
    }

    /// Returns `true` if nothing has been cached yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn compile(pattern: &str, flags: &str) -> Option<Arc<Regex>> {
    let mut builder = RegexBuilder::new(pattern);
    for flag in flags.chars() {
        match flag {
            'i' => builder.case_insensitive(true),
            'm' => builder.multi_line(true),
            's' => builder.dot_matches_new_line(true),
            'x' => builder.ignore_whitespace(true),
            _ => &mut builder,
        };
    }

    match builder.build() {
        Ok(regex) => Some(Arc::new(regex)),
        Err(err) => {
            log::warn!(target: "featurevisor", pattern, flags; "invalid regex in condition: {err}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::RegexCache;

    #[test]
    fn compiles_and_memoizes() {
        let cache = RegexCache::new();
        assert!(cache.is_empty());

        let first = cache.get("^test", "").unwrap();
        let second = cache.get("^test", "").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn flags_are_part_of_the_key() {
        let cache = RegexCache::new();
        assert!(!cache.get("^test", "").unwrap().is_match("TEST"));
        assert!(cache.get("^test", "i").unwrap().is_match("TEST"));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn remembers_invalid_patterns() {
        let cache = RegexCache::new();
        assert!(cache.get("(unclosed", "").is_none());
        assert!(cache.get("(unclosed", "").is_none());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn ignores_unknown_flags() {
        let cache = RegexCache::new();
        assert!(cache.get("a.c", "gu").unwrap().is_match("abc"));
    }
}
