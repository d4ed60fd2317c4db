//! Variable environment for the filter evaluator
//!
//! Rules read two kinds of variables:
//! - user variables assigned by the rule itself (`x := ...`, `set('x', ...)`)
//! - host variables supplied on demand by a [`VariableProvider`]
//!
//! Host variables are fetched at most once per evaluation and memoized.
//! All names are matched case-insensitively.

use indexmap::IndexMap;

use crate::errors::{FilterError, FilterResult};

use super::value::Value;

/// Supplies contextual variables (page, user, edit) to the evaluator.
///
/// Names are passed lowercased. `get` may be expensive; the evaluator calls it
/// at most once per name per evaluation.
pub trait VariableProvider {
    /// Whether the provider knows this variable
    fn has(&self, name: &str) -> bool;

    /// Compute the value of a variable
    fn get(&self, name: &str) -> Option<Value>;

    /// Names this provider can supply, for tooling
    fn names(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Provider with no variables
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyProvider;

impl VariableProvider for EmptyProvider {
    fn has(&self, _name: &str) -> bool {
        false
    }

    fn get(&self, _name: &str) -> Option<Value> {
        None
    }
}

/// In-memory provider backed by a map
#[derive(Debug, Clone, Default)]
pub struct MapProvider {
    values: IndexMap<String, Value>,
}

impl MapProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a variable (name is lowercased)
    pub fn insert(&mut self, name: &str, value: impl Into<Value>) {
        self.values.insert(name.to_lowercase(), value.into());
    }

    /// Builder-style [`MapProvider::insert`]
    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    /// Build from a JSON object mapping names to values
    pub fn from_json(json: serde_json::Value) -> FilterResult<Self> {
        match json {
            serde_json::Value::Object(obj) => {
                let mut provider = Self::new();
                for (name, value) in obj {
                    provider.insert(&name, Value::from_serde_json(value));
                }
                Ok(provider)
            }
            other => Err(FilterError::config_error(format!(
                "variables must be a JSON object, found {}",
                json_type_name(&other)
            ))),
        }
    }

    /// Parse a JSON document into a provider
    pub fn from_json_str(text: &str) -> FilterResult<Self> {
        let json: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| FilterError::config_error(format!("invalid variables JSON: {}", e)))?;
        Self::from_json(json)
    }
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

impl VariableProvider for MapProvider {
    fn has(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    fn get(&self, name: &str) -> Option<Value> {
        self.values.get(name).cloned()
    }

    fn names(&self) -> Vec<String> {
        self.values.keys().cloned().collect()
    }
}

impl<S: AsRef<str>, V: Into<Value>> FromIterator<(S, V)> for MapProvider {
    fn from_iter<I: IntoIterator<Item = (S, V)>>(iter: I) -> Self {
        let mut provider = Self::new();
        for (name, value) in iter {
            provider.insert(name.as_ref(), value);
        }
        provider
    }
}

/// Values already fetched from a provider; `None` records a miss
pub type ProviderMemo = IndexMap<String, Option<Value>>;

/// Per-evaluation variable state
#[derive(Debug, Clone, Default)]
pub struct Variables {
    /// User variables assigned during this evaluation
    locals: IndexMap<String, Value>,
    /// Memoized provider lookups
    memo: ProviderMemo,
    /// Number of provider fetches performed
    fetches: usize,
}

impl Variables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from provider values fetched by earlier evaluations
    pub fn with_memo(memo: ProviderMemo) -> Self {
        Self {
            memo,
            ..Self::default()
        }
    }

    /// Hand back the provider memo (user variables are dropped)
    pub fn into_memo(self) -> ProviderMemo {
        self.memo
    }

    /// Look up a variable: user variables first, then the memo, then the provider
    pub fn lookup(&mut self, name: &str, provider: &dyn VariableProvider) -> Option<Value> {
        let key = name.to_lowercase();

        if let Some(value) = self.locals.get(&key) {
            return Some(value.clone());
        }

        if let Some(cached) = self.memo.get(&key) {
            return cached.clone();
        }

        self.fetches += 1;
        let fetched = if provider.has(&key) {
            provider.get(&key)
        } else {
            None
        };
        tracing::trace!(domain = "vars", name = %key, found = fetched.is_some(), "provider fetch");
        self.memo.insert(key, fetched.clone());
        fetched
    }

    /// Assign a user variable
    pub fn set(&mut self, name: &str, value: Value) {
        self.locals.insert(name.to_lowercase(), value);
    }

    /// Current value of a user variable
    pub fn local(&self, name: &str) -> Option<&Value> {
        self.locals.get(&name.to_lowercase())
    }

    /// Number of provider fetches so far
    pub fn fetches(&self) -> usize {
        self.fetches
    }
}
