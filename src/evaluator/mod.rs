//! Evaluator for filter rules
//!
//! The evaluator walks a parsed [`Rule`] depth-first, left to right, and
//! produces a [`Value`]. It handles:
//! - Short-circuiting `&` / `|` (skipped operands never touch the provider)
//! - Condition counting against [`Limits`]
//! - `undefined` propagation from unavailable inputs
//! - Loose arithmetic and comparison coercions
//! - Built-in and embedder-registered function calls
//!
//! Each [`Evaluator::evaluate`] call owns its state (counter, locals, memo,
//! pattern cache); the evaluator itself only borrows the function registry.

pub mod builtins;
pub mod patterns;
pub mod value;
pub mod variables;

use crate::config::Limits;
use crate::errors::{span_of, unknown_name_help, FilterError, FilterResult, Warning, WarningKind};
use crate::lexer::token::SourceLocation;
use crate::parser::ast::*;
use crate::stack;

pub use builtins::{CallContext, Function, FunctionError, FunctionRegistry};
pub use patterns::{PatternCache, PatternKind};
pub use value::{Number, Value};
pub use variables::{EmptyProvider, MapProvider, ProviderMemo, VariableProvider, Variables};

/// Maximum expression nesting depth before the evaluator bails out
const MAX_EVAL_DEPTH: usize = 512;

/// Result of a completed evaluation
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    /// Value of the rule (the last statement)
    pub value: Value,
    /// Non-fatal problems met along the way
    pub warnings: Vec<Warning>,
    /// Conditions consumed
    pub conditions: usize,
    /// Provider fetches performed (memo hits excluded)
    pub fetches: usize,
}

impl Evaluation {
    /// Whether the rule matched
    pub fn matched(&self) -> bool {
        self.value.is_truthy()
    }
}

/// Tree-walking interpreter for filter rules
#[derive(Debug, Clone, Copy)]
pub struct Evaluator<'r> {
    registry: &'r FunctionRegistry,
}

impl<'r> Evaluator<'r> {
    pub fn new(registry: &'r FunctionRegistry) -> Self {
        Self { registry }
    }

    /// Evaluate a rule against a provider
    pub fn evaluate(
        &self,
        rule: &Rule,
        provider: &dyn VariableProvider,
        limits: &Limits,
    ) -> FilterResult<Evaluation> {
        let mut memo = ProviderMemo::new();
        self.evaluate_with_memo(rule, provider, limits, &mut memo)
    }

    /// Evaluate a rule, reusing (and extending) provider values fetched by
    /// earlier evaluations. The memo is updated even when evaluation fails.
    pub fn evaluate_with_memo(
        &self,
        rule: &Rule,
        provider: &dyn VariableProvider,
        limits: &Limits,
        memo: &mut ProviderMemo,
    ) -> FilterResult<Evaluation> {
        if limits.precheck {
            let needed = rule.condition_count();
            if needed > limits.max_conditions {
                tracing::debug!(
                    domain = "eval",
                    needed,
                    max = limits.max_conditions,
                    "rule rejected before evaluation"
                );
                return Err(FilterError::condition_limit(
                    rule.source.clone(),
                    rule.body.location(),
                    needed,
                    limits.max_conditions,
                ));
            }
        }

        let mut run = Run {
            registry: self.registry,
            rule,
            provider,
            max_conditions: limits.max_conditions,
            conditions: 0,
            depth: 0,
            variables: Variables::with_memo(std::mem::take(memo)),
            warnings: Vec::new(),
            patterns: PatternCache::new(),
        };

        let result = run.eval(&rule.body);
        let conditions = run.conditions;
        let fetches = run.variables.fetches();
        *memo = run.variables.into_memo();

        match result {
            Ok(value) => {
                tracing::trace!(domain = "eval", conditions, fetches, "evaluation completed");
                Ok(Evaluation {
                    value,
                    warnings: run.warnings,
                    conditions,
                    fetches,
                })
            }
            Err(err) => {
                tracing::debug!(domain = "eval", conditions, error = %err.message(), "evaluation stopped");
                Err(err)
            }
        }
    }
}

/// State of one evaluation
struct Run<'a> {
    registry: &'a FunctionRegistry,
    rule: &'a Rule,
    provider: &'a dyn VariableProvider,
    max_conditions: usize,
    conditions: usize,
    depth: usize,
    variables: Variables,
    warnings: Vec<Warning>,
    patterns: PatternCache,
}

impl Run<'_> {
    fn eval(&mut self, expr: &Expr) -> FilterResult<Value> {
        self.depth += 1;
        if self.depth > MAX_EVAL_DEPTH {
            self.depth -= 1;
            return Err(FilterError::RecursionLimitExceeded {
                src: self.rule.source.clone(),
                span: span_of(expr.location()),
                help: format!(
                    "expression nesting exceeds maximum depth of {}; simplify the rule",
                    MAX_EVAL_DEPTH
                ),
            });
        }
        let result = stack::guarded(|| self.eval_inner(expr));
        self.depth -= 1;
        result
    }

    fn eval_inner(&mut self, expr: &Expr) -> FilterResult<Value> {
        match expr {
            Expr::Null(_) => Ok(Value::Null),
            Expr::Bool(b, _) => Ok(Value::Bool(*b)),
            Expr::Integer(n, _) => Ok(Value::Int(*n)),
            Expr::Float(n, _) => Ok(Value::Float(*n)),
            Expr::String(s, _) => Ok(Value::String(s.clone())),
            Expr::Var(name, loc) => self.eval_var(name, loc),
            Expr::Array(array) => {
                let mut items = Vec::with_capacity(array.elements.len());
                for element in &array.elements {
                    items.push(self.eval(element)?);
                }
                Ok(Value::Array(items))
            }
            Expr::Call(call) => self.eval_call(call),
            Expr::Unary(unary) => self.eval_unary(unary),
            Expr::Binary(bin) => self.eval_binary(bin),
            Expr::Chain(chain) => self.eval_chain(chain),
            Expr::BoolOp(bool_op) => self.eval_bool_op(bool_op),
            Expr::Conditional(cond) => self.eval_conditional(cond),
            Expr::Assign(assign) => self.eval_assign(assign),
            Expr::Index(idx) => self.eval_index(idx),
            Expr::Sequence(seq) => {
                let mut last = Value::Null;
                for statement in &seq.statements {
                    last = self.eval(statement)?;
                }
                Ok(last)
            }
            Expr::Paren(inner, _) => self.eval(inner),
        }
    }

    /// Charge one condition; fails once the budget is exceeded
    fn count_condition(&mut self, loc: &SourceLocation) -> FilterResult<()> {
        self.conditions += 1;
        if self.conditions > self.max_conditions {
            return Err(FilterError::condition_limit(
                self.rule.source.clone(),
                loc,
                self.conditions,
                self.max_conditions,
            ));
        }
        Ok(())
    }

    fn warn(&mut self, kind: WarningKind, message: String, loc: &SourceLocation) {
        self.warnings.push(Warning::new(kind, message, loc));
    }

    /// Variable lookup: locals, then memo, then provider
    fn eval_var(&mut self, name: &str, loc: &SourceLocation) -> FilterResult<Value> {
        if let Some(value) = self.variables.lookup(name, self.provider) {
            return Ok(value);
        }

        // Assigned somewhere, just not on this path
        if self.rule.assigns(name) {
            return Ok(Value::Undefined);
        }

        let provider_names = self.provider.names();
        let candidates = provider_names
            .iter()
            .map(String::as_str)
            .chain(self.rule.assigned_variables());
        let help = unknown_name_help(name, candidates);
        Err(FilterError::unknown_variable(
            self.rule.source.clone(),
            loc,
            name,
            help,
        ))
    }

    fn eval_call(&mut self, call: &CallExpr) -> FilterResult<Value> {
        self.count_condition(&call.location)?;

        let registry = self.registry;
        let Some(function) = registry.get(&call.name) else {
            let help = unknown_name_help(&call.name, registry.names());
            return Err(FilterError::unknown_function(
                self.rule.source.clone(),
                &call.location,
                &call.name,
                help,
            ));
        };

        if !function.accepts(call.args.len()) {
            return Err(FilterError::WrongArity {
                src: self.rule.source.clone(),
                span: span_of(&call.location),
                name: function.name().to_string(),
                expected: function.arity_description(),
                found: call.args.len(),
            });
        }

        let mut args = Vec::with_capacity(call.args.len());
        for arg in &call.args {
            args.push(self.eval(arg)?);
        }

        if function.propagates_undefined() && args.iter().any(Value::is_undefined) {
            return Ok(Value::Undefined);
        }

        let mut ctx = CallContext::new(
            &call.name,
            &call.location,
            &mut self.variables,
            &mut self.warnings,
            &mut self.patterns,
        );
        function
            .call(&mut ctx, args)
            .map_err(|err| FilterError::FunctionFailed {
                src: self.rule.source.clone(),
                span: span_of(&call.location),
                name: function.name().to_string(),
                message: err.message,
            })
    }

    fn eval_unary(&mut self, unary: &UnaryExpr) -> FilterResult<Value> {
        if unary.op == UnaryOp::Not {
            self.count_condition(&unary.location)?;
        }

        let operand = self.eval(&unary.operand)?;
        if operand.is_undefined() {
            return Ok(Value::Undefined);
        }

        Ok(match unary.op {
            UnaryOp::Not => Value::Bool(!operand.is_truthy()),
            UnaryOp::Neg => match operand.to_number() {
                Number::Int(n) => n
                    .checked_neg()
                    .map_or(Value::Float(-(n as f64)), Value::Int),
                Number::Float(n) => Value::Float(-n),
            },
            UnaryOp::Plus => operand.to_number().into(),
        })
    }

    fn eval_binary(&mut self, bin: &BinaryExpr) -> FilterResult<Value> {
        if bin.op.is_condition() {
            self.count_condition(&bin.location)?;
        }

        let left = self.eval(&bin.left)?;
        let right = self.eval(&bin.right)?;
        self.apply_binary(bin.op, left, right, &bin.location)
    }

    /// Fold a chain left to right, as the equivalent nest of binary nodes
    /// would: every condition is charged before any operand runs.
    fn eval_chain(&mut self, chain: &ChainExpr) -> FilterResult<Value> {
        for link in chain.links.iter().rev() {
            if link.op.is_condition() {
                self.count_condition(&link.location)?;
            }
        }

        let mut acc = self.eval(&chain.first)?;
        for link in &chain.links {
            let right = self.eval(&link.operand)?;
            acc = self.apply_binary(link.op, acc, right, &link.location)?;
        }
        Ok(acc)
    }

    fn apply_binary(
        &mut self,
        op: BinaryOp,
        left: Value,
        right: Value,
        loc: &SourceLocation,
    ) -> FilterResult<Value> {
        if left.is_undefined() || right.is_undefined() {
            return Ok(Value::Undefined);
        }

        match op {
            BinaryOp::Add
            | BinaryOp::Sub
            | BinaryOp::Mul
            | BinaryOp::Div
            | BinaryOp::Mod
            | BinaryOp::Pow => self.arithmetic(op, left, right, loc),
            BinaryOp::Eq => Ok(Value::Bool(left.loose_eq(&right))),
            BinaryOp::NotEq => Ok(Value::Bool(!left.loose_eq(&right))),
            BinaryOp::StrictEq => Ok(Value::Bool(left.strict_eq(&right))),
            BinaryOp::StrictNotEq => Ok(Value::Bool(!left.strict_eq(&right))),
            BinaryOp::Lt => Ok(Value::Bool(left.compare(&right).is_some_and(|o| o.is_lt()))),
            BinaryOp::LtEq => Ok(Value::Bool(left.compare(&right).is_some_and(|o| o.is_le()))),
            BinaryOp::Gt => Ok(Value::Bool(left.compare(&right).is_some_and(|o| o.is_gt()))),
            BinaryOp::GtEq => Ok(Value::Bool(left.compare(&right).is_some_and(|o| o.is_ge()))),
            BinaryOp::In => Ok(Value::Bool(contains(&right, &left))),
            BinaryOp::Contains => Ok(Value::Bool(contains(&left, &right))),
            BinaryOp::Like => Ok(self.pattern_match(PatternKind::Glob, &left, &right, loc)),
            BinaryOp::Rlike => Ok(self.pattern_match(PatternKind::Regex, &left, &right, loc)),
            BinaryOp::Irlike => {
                Ok(self.pattern_match(PatternKind::RegexNoCase, &left, &right, loc))
            }
        }
    }

    fn arithmetic(
        &self,
        op: BinaryOp,
        left: Value,
        right: Value,
        loc: &SourceLocation,
    ) -> FilterResult<Value> {
        if op == BinaryOp::Add {
            return Ok(add(left, right));
        }

        let (a, b) = (left.to_number(), right.to_number());
        match op {
            BinaryOp::Sub => Ok(numeric(a, b, i64::checked_sub, |x, y| x - y)),
            BinaryOp::Mul => Ok(numeric(a, b, i64::checked_mul, |x, y| x * y)),
            BinaryOp::Div => {
                if b.as_f64() == 0.0 {
                    return Err(FilterError::division_by_zero(self.rule.source.clone(), loc));
                }
                if let (Number::Int(x), Number::Int(y)) = (a, b) {
                    if x.checked_rem(y) == Some(0) {
                        if let Some(q) = x.checked_div(y) {
                            return Ok(Value::Int(q));
                        }
                    }
                }
                Ok(Value::Float(a.as_f64() / b.as_f64()))
            }
            BinaryOp::Mod => {
                let (x, y) = (truncate(a), truncate(b));
                if y == 0 {
                    return Err(FilterError::division_by_zero(self.rule.source.clone(), loc));
                }
                // i64::MIN % -1 overflows; the mathematical result is 0
                Ok(Value::Int(x.checked_rem(y).unwrap_or(0)))
            }
            BinaryOp::Pow => {
                if let (Number::Int(x), Number::Int(y)) = (a, b) {
                    if let Some(p) = u32::try_from(y).ok().and_then(|e| x.checked_pow(e)) {
                        return Ok(Value::Int(p));
                    }
                }
                Ok(Value::Float(a.as_f64().powf(b.as_f64())))
            }
            _ => Ok(Value::Undefined),
        }
    }

    fn pattern_match(
        &mut self,
        kind: PatternKind,
        subject: &Value,
        pattern: &Value,
        loc: &SourceLocation,
    ) -> Value {
        let pattern = pattern.to_string();
        match self.patterns.get(kind, &pattern) {
            Ok(re) => Value::Bool(re.is_match(&subject.to_string())),
            Err(reason) => {
                self.warn(
                    WarningKind::MalformedPattern,
                    format!("malformed pattern {:?}: {}", pattern, reason),
                    loc,
                );
                Value::Bool(false)
            }
        }
    }

    fn eval_bool_op(&mut self, bool_op: &BoolOpExpr) -> FilterResult<Value> {
        self.count_condition(&bool_op.location)?;

        match bool_op.op {
            BoolOp::And => {
                for operand in &bool_op.operands {
                    if !self.eval(operand)?.is_truthy() {
                        return Ok(Value::Bool(false));
                    }
                }
                Ok(Value::Bool(true))
            }
            BoolOp::Or => {
                for operand in &bool_op.operands {
                    if self.eval(operand)?.is_truthy() {
                        return Ok(Value::Bool(true));
                    }
                }
                Ok(Value::Bool(false))
            }
            BoolOp::Xor => {
                let mut result = false;
                for operand in &bool_op.operands {
                    result ^= self.eval(operand)?.is_truthy();
                }
                Ok(Value::Bool(result))
            }
        }
    }

    fn eval_conditional(&mut self, cond: &ConditionalExpr) -> FilterResult<Value> {
        let condition = self.eval(&cond.condition)?;
        if condition.is_undefined() {
            return Ok(Value::Undefined);
        }

        if condition.is_truthy() {
            self.eval(&cond.then_branch)
        } else if let Some(else_branch) = &cond.else_branch {
            self.eval(else_branch)
        } else {
            Ok(Value::Null)
        }
    }

    fn eval_assign(&mut self, assign: &AssignExpr) -> FilterResult<Value> {
        match &assign.target {
            AssignTarget::Var(name) => {
                let value = self.eval(&assign.value)?;
                self.variables.set(name, value.clone());
                Ok(value)
            }
            AssignTarget::Index(name, index_expr) => {
                let index = self.eval(index_expr)?;
                let value = self.eval(&assign.value)?;
                if index.is_undefined() {
                    return Ok(Value::Undefined);
                }

                let mut items = match self.variables.lookup(name, self.provider) {
                    Some(Value::Array(items)) => items,
                    other => {
                        return Err(self.not_an_array(other.as_ref(), &assign.name_location));
                    }
                };
                let slot = self.array_slot(&index, items.len(), index_expr.location())?;
                items[slot] = value.clone();
                self.variables.set(name, Value::Array(items));
                Ok(value)
            }
            AssignTarget::Append(name) => {
                let value = self.eval(&assign.value)?;
                let mut items = match self.variables.lookup(name, self.provider) {
                    Some(Value::Array(items)) => items,
                    None | Some(Value::Undefined) | Some(Value::Null) => Vec::new(),
                    other => {
                        return Err(self.not_an_array(other.as_ref(), &assign.name_location));
                    }
                };
                items.push(value.clone());
                self.variables.set(name, Value::Array(items));
                Ok(value)
            }
        }
    }

    fn eval_index(&mut self, idx: &IndexExpr) -> FilterResult<Value> {
        let base = self.eval(&idx.base)?;
        let index = self.eval(&idx.index)?;
        if base.is_undefined() || index.is_undefined() {
            return Ok(Value::Undefined);
        }

        match base {
            Value::Array(mut items) => {
                let slot = self.array_slot(&index, items.len(), idx.index.location())?;
                Ok(items.swap_remove(slot))
            }
            other => Err(self.not_an_array(Some(&other), idx.base.location())),
        }
    }

    /// Validate an index against an array length
    fn array_slot(&self, index: &Value, len: usize, loc: &SourceLocation) -> FilterResult<usize> {
        let raw = index.to_int();
        match usize::try_from(raw) {
            Ok(slot) if slot < len => Ok(slot),
            _ => Err(FilterError::IndexOutOfBounds {
                src: self.rule.source.clone(),
                span: span_of(loc),
                index: raw.to_string(),
                len,
            }),
        }
    }

    fn not_an_array(&self, found: Option<&Value>, loc: &SourceLocation) -> FilterError {
        FilterError::NotAnArray {
            src: self.rule.source.clone(),
            span: span_of(loc),
            found: found.map_or("undefined", Value::type_name).to_string(),
        }
    }
}

/// `+`: arrays concatenate, a string on either side concatenates, otherwise numeric
fn add(left: Value, right: Value) -> Value {
    match (left, right) {
        (Value::Array(mut a), Value::Array(b)) => {
            a.extend(b);
            Value::Array(a)
        }
        (l @ Value::String(_), r) | (l, r @ Value::String(_)) => {
            Value::String(format!("{}{}", l, r))
        }
        (l, r) => numeric(l.to_number(), r.to_number(), i64::checked_add, |a, b| a + b),
    }
}

/// Integer view of a number (floats truncate)
fn truncate(n: Number) -> i64 {
    match n {
        Number::Int(n) => n,
        Number::Float(f) => f as i64,
    }
}

/// Int arithmetic with promotion to float on overflow
fn numeric(
    a: Number,
    b: Number,
    checked_int: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Value {
    match (a, b) {
        (Number::Int(x), Number::Int(y)) => checked_int(x, y)
            .map_or_else(|| Value::Float(float_op(x as f64, y as f64)), Value::Int),
        _ => Value::Float(float_op(a.as_f64(), b.as_f64())),
    }
}

/// Membership: element of an array, or substring of the string form
fn contains(haystack: &Value, needle: &Value) -> bool {
    match haystack {
        Value::Array(items) => items.iter().any(|item| item.loose_eq(needle)),
        other => {
            let needle = needle.to_string();
            !needle.is_empty() && other.to_string().contains(&needle)
        }
    }
}
