//! Engine configuration
//!
//! Every field has a default, so an empty JSON object (or no file at all)
//! yields a working configuration.

use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::errors::{FilterError, FilterResult};
use crate::parser::{DEFAULT_MAX_DEPTH, MAX_PARSE_DEPTH};

/// Condition budget for one evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Conditions a single evaluation may consume
    pub max_conditions: usize,
    /// Reject rules whose static condition count exceeds the budget before
    /// running any node
    pub precheck: bool,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_conditions: 1000,
            precheck: true,
        }
    }
}

impl Limits {
    pub fn new(max_conditions: usize) -> Self {
        Self {
            max_conditions,
            ..Self::default()
        }
    }
}

/// Settings for a [`FilterSet`](crate::filter::FilterSet) and the CLI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Per-rule condition budget
    pub limits: Limits,
    /// Maximum nesting depth accepted by the parser
    pub max_parse_depth: usize,
    /// Condition budget shared by all rules of one run; unlimited when absent
    pub max_total_conditions: Option<usize>,
    /// Number of parsed rules kept in the AST cache
    pub cache_capacity: usize,
    /// Host-provided variables; rules may read but not assign them
    pub reserved_variables: Vec<String>,
    /// Old variable name → preferred replacement
    pub deprecated_variables: IndexMap<String, String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            limits: Limits::default(),
            max_parse_depth: DEFAULT_MAX_DEPTH,
            max_total_conditions: None,
            cache_capacity: 256,
            reserved_variables: Vec::new(),
            deprecated_variables: IndexMap::new(),
        }
    }
}

impl EngineConfig {
    /// Parse a JSON document
    pub fn from_json_str(text: &str) -> FilterResult<Self> {
        let config: Self = serde_json::from_str(text)
            .map_err(|e| FilterError::config_error(format!("invalid engine config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> FilterResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            FilterError::io_error(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&text)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> FilterResult<()> {
        if self.max_parse_depth == 0 {
            return Err(FilterError::config_error("max_parse_depth must be at least 1"));
        }
        if self.max_parse_depth > MAX_PARSE_DEPTH {
            return Err(FilterError::config_error(format!(
                "max_parse_depth must be at most {}",
                MAX_PARSE_DEPTH
            )));
        }
        if self.cache_capacity == 0 {
            return Err(FilterError::config_error("cache_capacity must be at least 1"));
        }
        Ok(())
    }
}
