//! Rule sets evaluated together against one action
//!
//! A [`FilterSet`] holds checked rules in insertion order. [`FilterSet::run`]
//! evaluates all of them against a single provider, sharing one provider memo
//! so each host variable is computed at most once per run, and optionally
//! drawing every rule's conditions from one run-wide budget.

use std::sync::Arc;

use crate::cache::AstCache;
use crate::checker::SyntaxChecker;
use crate::config::{EngineConfig, Limits};
use crate::errors::{FilterError, FilterResult, Warning};
use crate::evaluator::{Evaluator, FunctionRegistry, ProviderMemo, VariableProvider};
use crate::parser::ast::Rule;

/// What happened to one rule during a run
#[derive(Debug)]
pub enum Outcome {
    Matched,
    NotMatched,
    /// Stopped by the condition limit
    Skipped { used: usize, max: usize },
    /// Stopped by any other error
    Failed(FilterError),
}

impl Outcome {
    pub fn is_match(&self) -> bool {
        matches!(self, Outcome::Matched)
    }
}

/// Per-rule entry of a [`RunReport`]
#[derive(Debug)]
pub struct RuleResult {
    pub id: String,
    pub outcome: Outcome,
    /// Conditions charged against the run budget
    pub conditions: usize,
    /// Warnings raised while evaluating
    pub warnings: Vec<Warning>,
}

/// Outcome of [`FilterSet::run`], in rule order
#[derive(Debug, Default)]
pub struct RunReport {
    pub results: Vec<RuleResult>,
    /// Conditions consumed by all rules
    pub total_conditions: usize,
    /// Distinct provider variables fetched during the run
    pub fetched_variables: usize,
}

impl RunReport {
    /// Ids of the rules that matched
    pub fn matched(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|r| r.outcome.is_match())
            .map(|r| r.id.as_str())
            .collect()
    }

    /// Outcome for a rule id
    pub fn outcome(&self, id: &str) -> Option<&Outcome> {
        self.results.iter().find(|r| r.id == id).map(|r| &r.outcome)
    }
}

#[derive(Debug)]
struct Entry {
    id: String,
    rule: Arc<Rule>,
    warnings: Vec<Warning>,
}

/// An ordered collection of parsed and checked rules
#[derive(Debug)]
pub struct FilterSet {
    registry: Arc<FunctionRegistry>,
    config: EngineConfig,
    cache: AstCache,
    entries: Vec<Entry>,
}

impl FilterSet {
    pub fn new(registry: impl Into<Arc<FunctionRegistry>>, config: EngineConfig) -> Self {
        let cache = AstCache::new(config.cache_capacity).with_max_depth(config.max_parse_depth);
        Self {
            registry: registry.into(),
            config,
            cache,
            entries: Vec::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Parse and check a rule, then add it under `id`.
    ///
    /// An existing rule with the same id is replaced in place. On error the
    /// set is left unchanged.
    pub fn add(&mut self, id: impl Into<String>, source: &str) -> FilterResult<&[Warning]> {
        let id = id.into();
        let rule = self.cache.get_or_parse(source, &self.registry)?;
        let warnings = self.checker().check(&rule)?;
        tracing::debug!(domain = "filter", id = %id, warnings = warnings.len(), "rule added");

        let entry = Entry { id, rule, warnings };
        let index = match self.entries.iter().position(|e| e.id == entry.id) {
            Some(index) => {
                self.entries[index] = entry;
                index
            }
            None => {
                self.entries.push(entry);
                self.entries.len() - 1
            }
        };
        Ok(self.entries[index].warnings.as_slice())
    }

    /// Remove a rule, returning whether it existed
    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.id != id);
        self.entries.len() != before
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.id.as_str())
    }

    /// Parsed rule for an id
    pub fn rule(&self, id: &str) -> Option<&Rule> {
        self.entries.iter().find(|e| e.id == id).map(|e| e.rule.as_ref())
    }

    /// Checker warnings recorded when the rule was added
    pub fn warnings(&self, id: &str) -> Option<&[Warning]> {
        self.entries
            .iter()
            .find(|e| e.id == id)
            .map(|e| e.warnings.as_slice())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Evaluate every rule against `provider`.
    ///
    /// A rule that fails or runs out of conditions is recorded and the run
    /// moves on to the next rule.
    pub fn run(&self, provider: &dyn VariableProvider) -> RunReport {
        let evaluator = Evaluator::new(&self.registry);
        let mut memo = ProviderMemo::new();
        let mut report = RunReport::default();
        let mut remaining = self.config.max_total_conditions;

        for entry in &self.entries {
            let limits = self.limits_for(remaining);
            let result = evaluator.evaluate_with_memo(&entry.rule, provider, &limits, &mut memo);

            let (outcome, conditions, warnings) = match result {
                Ok(evaluation) => {
                    let outcome = if evaluation.matched() {
                        Outcome::Matched
                    } else {
                        Outcome::NotMatched
                    };
                    tracing::debug!(
                        domain = "filter",
                        id = %entry.id,
                        matched = evaluation.matched(),
                        conditions = evaluation.conditions,
                        "rule evaluated"
                    );
                    (outcome, evaluation.conditions, evaluation.warnings)
                }
                Err(FilterError::ConditionLimitExceeded { used, max, .. }) => {
                    tracing::warn!(domain = "filter", id = %entry.id, used, max, "rule skipped: condition limit");
                    // a precheck rejection consumes nothing; a runtime abort spends the whole allowance
                    let charged = if limits.precheck { 0 } else { max };
                    (Outcome::Skipped { used, max }, charged, Vec::new())
                }
                Err(err) => {
                    tracing::warn!(domain = "filter", id = %entry.id, error = %err.message(), "rule failed");
                    (Outcome::Failed(err), 0, Vec::new())
                }
            };

            report.total_conditions += conditions;
            if let Some(left) = remaining.as_mut() {
                *left = left.saturating_sub(conditions);
            }
            report.results.push(RuleResult {
                id: entry.id.clone(),
                outcome,
                conditions,
                warnings,
            });
        }

        report.fetched_variables = memo.len();
        report
    }

    fn limits_for(&self, remaining: Option<usize>) -> Limits {
        let mut limits = self.config.limits;
        if let Some(left) = remaining {
            limits.max_conditions = limits.max_conditions.min(left);
        }
        limits
    }

    fn checker(&self) -> SyntaxChecker<'_> {
        let mut checker = SyntaxChecker::new(&self.registry);
        if !self.config.reserved_variables.is_empty() {
            checker = checker.reserved(&self.config.reserved_variables);
        }
        for (old, new) in &self.config.deprecated_variables {
            checker = checker.deprecated_variable(old, new);
        }
        checker
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::{MapProvider, Value};

    fn provider() -> MapProvider {
        MapProvider::new()
            .with("user_name", Value::from("Spammer"))
            .with("added_lines", Value::from("buy cheap pills"))
    }

    fn set_with(config: EngineConfig, rules: &[(&str, &str)]) -> FilterSet {
        let mut set = FilterSet::new(FunctionRegistry::with_builtins(), config);
        for (id, source) in rules {
            set.add(*id, source).unwrap();
        }
        set
    }

    #[test]
    fn test_run_reports_each_rule() {
        let set = set_with(
            EngineConfig::default(),
            &[
                ("spam", "added_lines contains 'pills'"),
                ("name", "user_name == 'Someone'"),
            ],
        );
        let report = set.run(&provider());
        assert_eq!(report.matched(), vec!["spam"]);
        assert!(matches!(report.outcome("name"), Some(Outcome::NotMatched)));
        assert_eq!(report.total_conditions, 2);
    }

    #[test]
    fn test_failure_does_not_stop_other_rules() {
        let set = set_with(
            EngineConfig::default(),
            &[
                ("broken", "1 / 0"),
                ("spam", "added_lines rlike 'ch[e]ap'"),
            ],
        );
        let report = set.run(&provider());
        assert!(matches!(
            report.outcome("broken"),
            Some(Outcome::Failed(FilterError::DivisionByZero { .. }))
        ));
        assert!(report.outcome("spam").is_some_and(Outcome::is_match));
    }

    #[test]
    fn test_condition_limit_skips_rule() {
        let mut config = EngineConfig::default();
        config.limits.max_conditions = 2;
        let set = set_with(
            config,
            &[("heavy", "a == 1 | b == 2 | c == 3"), ("light", "user_name == 'Spammer'")],
        );
        let report = set.run(&provider());
        assert!(matches!(
            report.outcome("heavy"),
            Some(Outcome::Skipped { used: 4, max: 2 })
        ));
        assert!(report.outcome("light").is_some_and(Outcome::is_match));
    }

    #[test]
    fn test_run_wide_budget() {
        let config = EngineConfig {
            max_total_conditions: Some(3),
            ..EngineConfig::default()
        };
        let set = set_with(
            config,
            &[
                ("first", "user_name == 'Spammer' & added_lines contains 'buy'"),
                ("second", "user_name == 'Spammer'"),
                ("third", "true"),
            ],
        );
        let report = set.run(&provider());
        assert!(report.outcome("first").is_some_and(Outcome::is_match));
        // the first rule used 3 conditions, leaving nothing for the second
        assert!(matches!(
            report.outcome("second"),
            Some(Outcome::Skipped { used: 1, max: 0 })
        ));
        assert!(report.outcome("third").is_some_and(Outcome::is_match));
        assert_eq!(report.total_conditions, 3);
    }

    #[test]
    fn test_add_replaces_and_removes() {
        let mut set = set_with(EngineConfig::default(), &[("a", "true")]);
        set.add("a", "false").unwrap();
        assert_eq!(set.len(), 1);
        assert!(matches!(set.run(&provider()).outcome("a"), Some(Outcome::NotMatched)));
        assert!(set.remove("a"));
        assert!(!set.remove("a"));
        assert!(set.is_empty());
    }

    #[test]
    fn test_add_rejects_bad_rules() {
        let config = EngineConfig {
            reserved_variables: vec!["user_name".to_string()],
            ..EngineConfig::default()
        };
        let mut set = FilterSet::new(FunctionRegistry::with_builtins(), config);
        assert!(matches!(
            set.add("syntax", "a &"),
            Err(FilterError::UnexpectedToken { .. })
        ));
        assert!(matches!(
            set.add("write", "user_name := 'x'"),
            Err(FilterError::ReadOnlyVariable { .. })
        ));
        assert!(set.is_empty());
    }

    #[test]
    fn test_add_returns_checker_warnings() {
        let config = EngineConfig {
            reserved_variables: vec!["user_name".to_string()],
            ..EngineConfig::default()
        };
        let mut set = FilterSet::new(FunctionRegistry::with_builtins(), config);
        let warnings = set.add("typo", "user_nmae == 'x'").unwrap().to_vec();
        assert_eq!(warnings.len(), 1);
        assert_eq!(set.warnings("typo").map(<[Warning]>::len), Some(1));
        assert!(set.rule("typo").is_some());
    }

    #[test]
    fn test_oversized_depth_setting_is_capped() {
        let config = EngineConfig {
            max_parse_depth: 2000,
            ..EngineConfig::default()
        };
        let mut set = FilterSet::new(FunctionRegistry::with_builtins(), config);
        let deep = format!("{}1{}", "(".repeat(1990), ")".repeat(1990));
        assert!(matches!(
            set.add("deep", &deep),
            Err(FilterError::NestingTooDeep { .. })
        ));
        assert!(set.is_empty());

        let nested = format!("{}true{}", "(".repeat(250), ")".repeat(250));
        set.add("nested", &nested).unwrap();
        let concat = format!("{} == 'abc'", vec!["'a'"; 400].join(" + "));
        set.add("concat", &concat).unwrap();
        let report = set.run(&provider());
        assert_eq!(report.matched(), vec!["nested"]);
        assert!(matches!(report.outcome("concat"), Some(Outcome::NotMatched)));
    }

    #[test]
    fn test_provider_values_shared_across_rules() {
        let set = set_with(
            EngineConfig::default(),
            &[
                ("a", "user_name == 'x'"),
                ("b", "user_name == 'Spammer'"),
                ("c", "lcase(user_name) == 'spammer'"),
            ],
        );
        let report = set.run(&provider());
        assert_eq!(report.fetched_variables, 1);
        assert_eq!(report.matched(), vec!["b", "c"]);
    }
}
