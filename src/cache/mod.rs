//! Content-addressed cache of parsed rules
//!
//! Rules are keyed by the SHA256 of their text and the parser depth limit.
//! A cache is meant to be used with a single function registry, since the
//! registry decides which calls are arity-checked at parse time.

use std::sync::Arc;

use indexmap::IndexMap;
use sha2::{Digest, Sha256};

use crate::errors::FilterResult;
use crate::evaluator::FunctionRegistry;
use crate::lexer::Lexer;
use crate::parser::ast::Rule;
use crate::parser::{Parser, DEFAULT_MAX_DEPTH, MAX_PARSE_DEPTH};

/// Cache key computed from rule text
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// The hex-encoded SHA256 hash
    pub hash: String,
}

impl CacheKey {
    /// Key for rule text parsed with the default depth limit
    pub fn for_source(source: &str) -> Self {
        Self::compute(source, DEFAULT_MAX_DEPTH)
    }

    /// Key for rule text parsed with a given depth limit
    pub fn compute(source: &str, max_depth: usize) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(source.as_bytes());
        hasher.update(b"\x00");
        hasher.update(b"depth:");
        hasher.update(max_depth.to_string().as_bytes());
        CacheKey {
            hash: hex_encode(&hasher.finalize()),
        }
    }
}

/// Bounded in-memory cache of parsed rules, evicting the oldest entry first
#[derive(Debug)]
pub struct AstCache {
    entries: IndexMap<CacheKey, Arc<Rule>>,
    capacity: usize,
    max_depth: usize,
    hits: u64,
    misses: u64,
}

impl AstCache {
    /// Create a cache holding at most `capacity` rules (at least one)
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: IndexMap::new(),
            capacity: capacity.max(1),
            max_depth: DEFAULT_MAX_DEPTH,
            hits: 0,
            misses: 0,
        }
    }

    /// Parse with a different nesting limit, up to [`MAX_PARSE_DEPTH`]
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth.min(MAX_PARSE_DEPTH);
        self
    }

    /// Return the cached tree for `source`, parsing it on a miss.
    ///
    /// Parse errors are returned and never cached.
    pub fn get_or_parse(
        &mut self,
        source: &str,
        registry: &FunctionRegistry,
    ) -> FilterResult<Arc<Rule>> {
        let key = CacheKey::compute(source, self.max_depth);
        if let Some(rule) = self.entries.get(&key) {
            self.hits += 1;
            tracing::debug!(domain = "cache", key = %&key.hash[..12], "ast cache hit");
            return Ok(Arc::clone(rule));
        }

        self.misses += 1;
        let tokens = Lexer::new(source).tokenize()?;
        let rule = Arc::new(
            Parser::new(tokens, source, registry)
                .with_max_depth(self.max_depth)
                .parse()?,
        );

        while self.entries.len() >= self.capacity {
            self.entries.shift_remove_index(0);
        }
        self.entries.insert(key, Arc::clone(&rule));
        Ok(rule)
    }

    /// Look up an entry without parsing
    pub fn get(&self, key: &CacheKey) -> Option<Arc<Rule>> {
        self.entries.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// (hits, misses) since creation
    pub fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }

    /// Remove all cached entries, returning how many were dropped
    pub fn clear(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        count
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
