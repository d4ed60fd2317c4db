//! Static checks for parsed rules
//!
//! The checker walks the AST once without evaluating anything. Structural
//! problems (assigning to a host variable or a function name) are errors;
//! everything else is reported as a [`Warning`].

use std::collections::BTreeSet;

use indexmap::IndexMap;

use crate::errors::{span_of, unknown_name_help, FilterError, FilterResult, Warning, WarningKind};
use crate::evaluator::builtins::FunctionRegistry;
use crate::lexer::token::SourceLocation;
use crate::parser::ast::*;
use crate::stack;

/// Functions whose first literal argument names a variable they assign
const SETTER_FUNCTIONS: [&str; 2] = ["set", "set_var"];

/// Static checker for filter rules
#[derive(Debug, Clone)]
pub struct SyntaxChecker<'r> {
    registry: &'r FunctionRegistry,
    /// Lowercased host variable names; `None` disables unknown-variable warnings
    reserved: Option<BTreeSet<String>>,
    /// Lowercased old name → replacement
    deprecated_variables: IndexMap<String, String>,
}

impl<'r> SyntaxChecker<'r> {
    pub fn new(registry: &'r FunctionRegistry) -> Self {
        Self {
            registry,
            reserved: None,
            deprecated_variables: IndexMap::new(),
        }
    }

    /// Declare the variables supplied by the host
    pub fn reserved<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let reserved = self.reserved.get_or_insert_with(BTreeSet::new);
        reserved.extend(names.into_iter().map(|n| n.as_ref().to_lowercase()));
        self
    }

    /// Declare a deprecated variable and its replacement
    pub fn deprecated_variable(mut self, old: &str, new: &str) -> Self {
        self.deprecated_variables
            .insert(old.to_lowercase(), new.to_lowercase());
        self
    }

    /// Check a rule, returning its warnings
    pub fn check(&self, rule: &Rule) -> FilterResult<Vec<Warning>> {
        let mut assigned: BTreeSet<String> = rule.assigned_variables().map(str::to_string).collect();
        collect_setter_names(&rule.body, &mut assigned);

        let mut walk = Walk {
            checker: self,
            rule,
            assigned,
            warnings: Vec::new(),
        };
        walk.visit(&rule.body)?;
        Ok(walk.warnings)
    }

    fn is_reserved(&self, name: &str) -> bool {
        self.reserved
            .as_ref()
            .is_some_and(|reserved| reserved.contains(name))
    }
}

/// Names assigned through `set('name', ...)` with a literal name
fn collect_setter_names(expr: &Expr, names: &mut BTreeSet<String>) {
    if let Expr::Call(call) = expr {
        if let Some((name, _)) = setter_target(call) {
            names.insert(name.to_lowercase());
        }
    }
    for child in expr.children() {
        collect_setter_names(child, names);
    }
}

fn setter_target(call: &CallExpr) -> Option<(&str, &SourceLocation)> {
    if !SETTER_FUNCTIONS.contains(&call.name.to_lowercase().as_str()) {
        return None;
    }
    match call.args.first() {
        Some(Expr::String(name, loc)) => Some((name.as_str(), loc)),
        _ => None,
    }
}

/// Truthiness of a literal condition, if it is one
fn literal_truth(expr: &Expr) -> Option<bool> {
    match expr {
        Expr::Null(_) => Some(false),
        Expr::Bool(b, _) => Some(*b),
        Expr::Integer(n, _) => Some(*n != 0),
        Expr::Float(n, _) => Some(*n != 0.0),
        Expr::String(s, _) => Some(!s.is_empty() && s != "0"),
        Expr::Paren(inner, _) => literal_truth(inner),
        _ => None,
    }
}

struct Walk<'c, 'r> {
    checker: &'c SyntaxChecker<'r>,
    rule: &'c Rule,
    assigned: BTreeSet<String>,
    warnings: Vec<Warning>,
}

impl Walk<'_, '_> {
    fn warn(&mut self, kind: WarningKind, message: String, loc: &SourceLocation) {
        self.warnings.push(Warning::new(kind, message, loc));
    }

    fn visit(&mut self, expr: &Expr) -> FilterResult<()> {
        match expr {
            Expr::Var(name, loc) => self.check_read(name, loc),
            Expr::Assign(assign) => {
                self.check_write(assign.target.name(), &assign.name_location)?
            }
            Expr::Call(call) => self.check_call(call)?,
            Expr::Conditional(cond) => self.check_conditional(cond),
            Expr::BoolOp(bool_op) => self.check_bool_op(bool_op),
            _ => {}
        }

        for child in expr.children() {
            stack::guarded(|| self.visit(child))?;
        }
        Ok(())
    }

    fn check_read(&mut self, name: &str, loc: &SourceLocation) {
        let key = name.to_lowercase();
        let checker = self.checker;

        if let Some(replacement) = checker.deprecated_variables.get(&key) {
            let message = format!("variable '{}' is deprecated; use '{}' instead", name, replacement);
            self.warn(WarningKind::DeprecatedVariable, message, loc);
            return;
        }

        let Some(reserved) = &checker.reserved else {
            return;
        };
        if reserved.contains(&key) || self.assigned.contains(&key) {
            return;
        }
        let help = unknown_name_help(
            name,
            reserved
                .iter()
                .chain(self.assigned.iter())
                .map(String::as_str),
        );
        let message = format!("unknown variable '{}': {}", name, help);
        self.warn(WarningKind::UnknownVariable, message, loc);
    }

    fn check_write(&self, name: &str, loc: &SourceLocation) -> FilterResult<()> {
        let key = name.to_lowercase();
        if self.checker.is_reserved(&key) || self.checker.registry.contains(&key) {
            return Err(FilterError::ReadOnlyVariable {
                src: self.rule.source.clone(),
                span: span_of(loc),
                name: name.to_string(),
            });
        }
        Ok(())
    }

    fn check_call(&mut self, call: &CallExpr) -> FilterResult<()> {
        let registry = self.checker.registry;
        let Some(function) = registry.get(&call.name) else {
            let help = unknown_name_help(&call.name, registry.names());
            let message = format!("unknown function '{}': {}", call.name, help);
            self.warn(WarningKind::UnknownFunction, message, &call.location);
            return Ok(());
        };

        if let Some(replacement) = function.deprecated_by() {
            let message = format!(
                "{}() is deprecated; use {}() instead",
                function.name(),
                replacement
            );
            self.warn(WarningKind::DeprecatedFunction, message, &call.location);
        }

        if let Some((name, loc)) = setter_target(call) {
            self.check_write(name, loc)?;
        }
        Ok(())
    }

    fn check_conditional(&mut self, cond: &ConditionalExpr) {
        let Some(truth) = literal_truth(&cond.condition) else {
            return;
        };
        let skipped = if truth {
            cond.else_branch.as_deref()
        } else {
            Some(cond.then_branch.as_ref())
        };
        if let Some(branch) = skipped {
            let message = format!(
                "condition is always {}; this branch never runs",
                if truth { "true" } else { "false" }
            );
            self.warn(WarningKind::UnreachableBranch, message, branch.location());
        }
    }

    fn check_bool_op(&mut self, bool_op: &BoolOpExpr) {
        let short_circuit_on = match bool_op.op {
            BoolOp::And => false,
            BoolOp::Or => true,
            BoolOp::Xor => return,
        };
        let last = bool_op.operands.len().saturating_sub(1);
        for operand in &bool_op.operands[..last] {
            if literal_truth(operand) == Some(short_circuit_on) {
                let message = format!(
                    "constant operand of '{}' means the operands after it never run",
                    bool_op.op
                );
                self.warn(WarningKind::UnreachableBranch, message, operand.location());
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_rule;

    fn check_with(source: &str, checker: SyntaxChecker<'_>) -> FilterResult<Vec<Warning>> {
        let rule = parse_rule(source, checker.registry)?;
        checker.check(&rule)
    }

    fn kinds(warnings: &[Warning]) -> Vec<WarningKind> {
        warnings.iter().map(|w| w.kind).collect()
    }

    #[test]
    fn test_clean_rule() {
        let registry = FunctionRegistry::with_builtins();
        let warnings = check_with(
            "x := lcase(user_name); x contains 'bot' & user_editcount < 10",
            SyntaxChecker::new(&registry).reserved(["user_name", "user_editcount"]),
        )
        .unwrap();
        assert!(warnings.is_empty(), "{:?}", warnings);
    }

    #[test]
    fn test_assigning_reserved_variable_is_an_error() {
        let registry = FunctionRegistry::with_builtins();
        let err = check_with(
            "USER_NAME := 'x'",
            SyntaxChecker::new(&registry).reserved(["user_name"]),
        )
        .unwrap_err();
        match err {
            FilterError::ReadOnlyVariable { name, .. } => assert_eq!(name, "USER_NAME"),
            other => panic!("unexpected error: {:?}", other),
        }

        assert!(matches!(
            check_with(
                "set('user_name', 1)",
                SyntaxChecker::new(&registry).reserved(["user_name"])
            ),
            Err(FilterError::ReadOnlyVariable { .. })
        ));
        assert!(matches!(
            check_with(
                "l[] := 1; user_name[0] := 2",
                SyntaxChecker::new(&registry).reserved(["user_name"])
            ),
            Err(FilterError::ReadOnlyVariable { .. })
        ));
    }

    #[test]
    fn test_assigning_function_name_is_an_error() {
        let registry = FunctionRegistry::with_builtins();
        assert!(matches!(
            check_with("lcase := 1", SyntaxChecker::new(&registry)),
            Err(FilterError::ReadOnlyVariable { .. })
        ));
    }

    #[test]
    fn test_unknown_and_deprecated_functions() {
        let registry = FunctionRegistry::with_builtins();
        let warnings = check_with(
            "lcas('A') & set_var('x', 1)",
            SyntaxChecker::new(&registry),
        )
        .unwrap();
        assert_eq!(
            kinds(&warnings),
            vec![WarningKind::UnknownFunction, WarningKind::DeprecatedFunction]
        );
        assert!(warnings[0].message.contains("did you mean 'lcase'?"));
        assert!(warnings[1].message.contains("use set()"));
    }

    #[test]
    fn test_deprecated_variable() {
        let registry = FunctionRegistry::with_builtins();
        let warnings = check_with(
            "article_text == 'x'",
            SyntaxChecker::new(&registry).deprecated_variable("article_text", "page_title"),
        )
        .unwrap();
        assert_eq!(kinds(&warnings), vec![WarningKind::DeprecatedVariable]);
        assert!(warnings[0].message.contains("page_title"));
    }

    #[test]
    fn test_unknown_variable_only_with_reserved_set() {
        let registry = FunctionRegistry::with_builtins();
        let warnings = check_with("usr_name == 'x'", SyntaxChecker::new(&registry)).unwrap();
        assert!(warnings.is_empty());

        let warnings = check_with(
            "usr_name == 'x'",
            SyntaxChecker::new(&registry).reserved(["user_name"]),
        )
        .unwrap();
        assert_eq!(kinds(&warnings), vec![WarningKind::UnknownVariable]);
        assert!(warnings[0].message.contains("user_name"));
    }

    #[test]
    fn test_setter_names_count_as_assigned() {
        let registry = FunctionRegistry::with_builtins();
        let warnings = check_with(
            "set('tmp', 1); tmp == 1",
            SyntaxChecker::new(&registry).reserved(["user_name"]),
        )
        .unwrap();
        assert!(warnings.is_empty(), "{:?}", warnings);
    }

    #[test]
    fn test_unreachable_branches() {
        let registry = FunctionRegistry::with_builtins();
        let warnings = check_with("true ? 1 : 2", SyntaxChecker::new(&registry)).unwrap();
        assert_eq!(kinds(&warnings), vec![WarningKind::UnreachableBranch]);
        assert_eq!(warnings[0].column, 12);

        let warnings = check_with("if 0 then 1 end", SyntaxChecker::new(&registry)).unwrap();
        assert_eq!(kinds(&warnings), vec![WarningKind::UnreachableBranch]);

        // Nothing is skipped when there is no else branch
        let warnings = check_with("if 1 then 1 end", SyntaxChecker::new(&registry)).unwrap();
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_short_circuiting_literal_operands() {
        let registry = FunctionRegistry::with_builtins();
        let warnings = check_with("a & false & b", SyntaxChecker::new(&registry)).unwrap();
        assert_eq!(kinds(&warnings), vec![WarningKind::UnreachableBranch]);

        let warnings = check_with("(1) | a", SyntaxChecker::new(&registry)).unwrap();
        assert_eq!(kinds(&warnings), vec![WarningKind::UnreachableBranch]);

        // A literal last operand skips nothing
        let warnings = check_with("a & false", SyntaxChecker::new(&registry)).unwrap();
        assert!(warnings.is_empty());
        let warnings = check_with("a & true & b", SyntaxChecker::new(&registry)).unwrap();
        assert!(warnings.is_empty());
    }
}
