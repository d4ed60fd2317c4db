//! Canonical pretty-printer for filter rules
//!
//! Output uses single spaces around binary operators, `; ` between
//! statements, lowercase keywords and double-quoted strings. Parentheses are
//! printed exactly where the source had them, so re-parsing the output gives
//! a tree of the same shape. Comments are not preserved.

use crate::errors::FilterResult;
use crate::evaluator::FunctionRegistry;
use crate::parser::ast::{AssignTarget, ConditionalStyle, Expr, Rule};
use crate::parser::parse_rule;
use crate::stack;

/// Parse and re-print rule text
pub fn format_source(source: &str, registry: &FunctionRegistry) -> FilterResult<String> {
    let rule = parse_rule(source, registry)?;
    Ok(format_rule(&rule))
}

/// Print a parsed rule, terminated by a single newline
pub fn format_rule(rule: &Rule) -> String {
    let mut formatter = Formatter::new();
    formatter.format_expr(&rule.body);
    formatter.finish()
}

/// Print one expression on a single line
pub fn format_expr(expr: &Expr) -> String {
    let mut formatter = Formatter::new();
    formatter.format_expr(expr);
    formatter.output
}

struct Formatter {
    output: String,
}

impl Formatter {
    fn new() -> Self {
        Self {
            output: String::new(),
        }
    }

    fn finish(self) -> String {
        let mut result = self.output.trim_end().to_string();
        result.push('\n');
        result
    }

    fn format_expr(&mut self, expr: &Expr) {
        stack::guarded(|| self.format_node(expr));
    }

    fn format_node(&mut self, expr: &Expr) {
        match expr {
            Expr::Null(_) => self.output.push_str("null"),
            Expr::Bool(b, _) => {
                self.output.push_str(if *b { "true" } else { "false" });
            }
            Expr::Integer(n, _) => {
                self.output.push_str(&n.to_string());
            }
            Expr::Float(n, _) => self.format_float(*n),
            Expr::String(s, _) => {
                self.output.push('"');
                self.output.push_str(&escape_string(s));
                self.output.push('"');
            }
            Expr::Var(name, _) => self.output.push_str(name),
            Expr::Array(arr) => {
                self.output.push('[');
                self.format_list(&arr.elements, ", ");
                self.output.push(']');
            }
            Expr::Call(call) => {
                self.output.push_str(&call.name);
                self.output.push('(');
                self.format_list(&call.args, ", ");
                self.output.push(')');
            }
            Expr::Unary(unary) => {
                self.output.push_str(&unary.op.to_string());
                self.format_expr(&unary.operand);
            }
            Expr::Binary(bin) => {
                self.format_expr(&bin.left);
                self.output.push(' ');
                self.output.push_str(&bin.op.to_string());
                self.output.push(' ');
                self.format_expr(&bin.right);
            }
            Expr::Chain(chain) => {
                self.format_expr(&chain.first);
                for link in &chain.links {
                    self.output.push(' ');
                    self.output.push_str(&link.op.to_string());
                    self.output.push(' ');
                    self.format_expr(&link.operand);
                }
            }
            Expr::BoolOp(chain) => {
                let separator = format!(" {} ", chain.op);
                self.format_list(&chain.operands, &separator);
            }
            Expr::Conditional(cond) => match cond.style {
                ConditionalStyle::Ternary => {
                    self.format_expr(&cond.condition);
                    self.output.push_str(" ? ");
                    self.format_expr(&cond.then_branch);
                    self.output.push_str(" : ");
                    match &cond.else_branch {
                        Some(else_branch) => self.format_expr(else_branch),
                        None => self.output.push_str("null"),
                    }
                }
                ConditionalStyle::IfThen => {
                    self.output.push_str("if ");
                    self.format_expr(&cond.condition);
                    self.output.push_str(" then ");
                    self.format_expr(&cond.then_branch);
                    if let Some(else_branch) = &cond.else_branch {
                        self.output.push_str(" else ");
                        self.format_expr(else_branch);
                    }
                    self.output.push_str(" end");
                }
            },
            Expr::Assign(assign) => {
                match &assign.target {
                    AssignTarget::Var(name) => self.output.push_str(name),
                    AssignTarget::Index(name, index) => {
                        self.output.push_str(name);
                        self.output.push('[');
                        self.format_expr(index);
                        self.output.push(']');
                    }
                    AssignTarget::Append(name) => {
                        self.output.push_str(name);
                        self.output.push_str("[]");
                    }
                }
                self.output.push_str(" := ");
                self.format_expr(&assign.value);
            }
            Expr::Index(idx) => {
                self.format_expr(&idx.base);
                self.output.push('[');
                self.format_expr(&idx.index);
                self.output.push(']');
            }
            Expr::Sequence(seq) => self.format_list(&seq.statements, "; "),
            Expr::Paren(inner, _) => {
                self.output.push('(');
                self.format_expr(inner);
                self.output.push(')');
            }
        }
    }

    fn format_list(&mut self, items: &[Expr], separator: &str) {
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                self.output.push_str(separator);
            }
            self.format_expr(item);
        }
    }

    fn format_float(&mut self, n: f64) {
        if n.is_infinite() {
            // the lexer reads an out-of-range exponent back as infinity
            self.output.push_str("1e999");
            return;
        }
        // Debug keeps a decimal point or exponent, so the literal stays a float
        self.output.push_str(&format!("{:?}", n));
    }
}

/// Escape a string for output in double quotes
fn escape_string(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '"' => result.push_str("\\\""),
            '\\' => result.push_str("\\\\"),
            '\n' => result.push_str("\\n"),
            '\r' => result.push_str("\\r"),
            '\t' => result.push_str("\\t"),
            c if (c as u32) < 0x20 => result.push_str(&format!("\\x{:02x}", c as u32)),
            c => result.push(c),
        }
    }
    result
}
