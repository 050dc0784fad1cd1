//! # Destination Resolver
//!
//! Maps the requested destinations of one envelope to concrete live clients.
//!
//! ## Policy (per entry, in request order):
//! 1.  An entry naming a registered client selects that client.
//! 2.  Otherwise the entry is a regular expression, matched unanchored against
//!     every client name except the sender's own.
//! 3.  A client selected once is never selected again in the same pass.
//!
//! Exact-name self-addressing is not excluded; only the pattern path skips
//! the sender.
//!
//! Pattern matching sits behind `PatternMatcher` so the compiled-pattern cache
//! can be replaced without touching the processor.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use regex::Regex;

use super::client::Client;
use super::registry::Hub;

/// Upper bound on cached patterns before the cache is flushed.
const PATTERN_CACHE_LIMIT: usize = 1024;

pub trait PatternMatcher: Send + Sync {
    /// Whether `name` matches `pattern`. Invalid patterns match nothing.
    fn is_match(&self, pattern: &str, name: &str) -> bool;
}

/// Compiles each pattern once and remembers invalid ones as non-matching.
#[derive(Debug, Default)]
pub struct RegexCache {
    compiled: Mutex<HashMap<String, Option<Regex>>>,
}

impl RegexCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn compile(&self, pattern: &str) -> Option<Regex> {
        let mut compiled = self.compiled.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = compiled.get(pattern) {
            return entry.clone();
        }
        if compiled.len() >= PATTERN_CACHE_LIMIT {
            compiled.clear();
        }
        let entry = match Regex::new(pattern) {
            Ok(re) => Some(re),
            Err(e) => {
                tracing::debug!(pattern = %pattern, error = %e, "Ignoring invalid destination pattern");
                None
            }
        };
        compiled.insert(pattern.to_string(), entry.clone());
        entry
    }
}

impl PatternMatcher for RegexCache {
    fn is_match(&self, pattern: &str, name: &str) -> bool {
        self.compile(pattern)
            .map(|re| re.is_match(name))
            .unwrap_or(false)
    }
}

pub struct Resolver {
    matcher: Arc<dyn PatternMatcher>,
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new(Arc::new(RegexCache::new()))
    }
}

impl Resolver {
    pub fn new(matcher: Arc<dyn PatternMatcher>) -> Self {
        Self { matcher }
    }

    /// Resolves against the current live clients of `namespace`.
    pub fn resolve(
        &self,
        hub: &Hub,
        namespace: &str,
        requested: &[String],
        exclude: &str,
    ) -> Vec<Arc<Client>> {
        self.resolve_among(&hub.snapshot(namespace), requested, exclude)
    }

    /// Resolves against an already taken, name-ordered snapshot.
    pub fn resolve_among(
        &self,
        clients: &[Arc<Client>],
        requested: &[String],
        exclude: &str,
    ) -> Vec<Arc<Client>> {
        let mut selected: Vec<Arc<Client>> = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();

        for entry in requested {
            if let Ok(idx) = clients.binary_search_by(|c| c.name().cmp(entry.as_str())) {
                let client = &clients[idx];
                if seen.insert(client.name()) {
                    selected.push(Arc::clone(client));
                }
                continue;
            }

            for client in clients {
                let name = client.name();
                if name == exclude || seen.contains(name) {
                    continue;
                }
                if self.matcher.is_match(entry, name) {
                    seen.insert(name);
                    selected.push(Arc::clone(client));
                }
            }
        }
        selected
    }
}
