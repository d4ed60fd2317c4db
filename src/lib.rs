// Rust 1.93+ triggers false positives on thiserror/miette derive macro fields
#![allow(unused_assignments)]

//! AbuseFilter rule language
//!
//! A small expression language for describing suspicious edits. Rules are
//! parsed once, checked statically, and evaluated against variables the host
//! supplies on demand, under a budget of boolean conditions.
//!
//! # Example
//!
//! ```
//! use abusefilter::{parse_rule, Evaluator, FunctionRegistry, Limits, MapProvider};
//!
//! let registry = FunctionRegistry::with_builtins();
//! let rule = parse_rule("lcase(user_name) == 'spammer' & added_lines contains 'pills'", &registry)?;
//! let vars = MapProvider::new()
//!     .with("user_name", "Spammer")
//!     .with("added_lines", "buy pills");
//! let result = Evaluator::new(&registry).evaluate(&rule, &vars, &Limits::default())?;
//! assert!(result.matched());
//! # Ok::<(), abusefilter::FilterError>(())
//! ```

pub mod cache;
pub mod checker;
pub mod config;
pub mod errors;
pub mod evaluator;
pub mod filter;
pub mod formatter;
pub mod lexer;
pub mod parser;
mod stack;

pub use cache::{AstCache, CacheKey};
pub use checker::SyntaxChecker;
pub use config::{EngineConfig, Limits};
pub use errors::{ErrorKind, FilterError, FilterResult, Warning, WarningKind};
pub use evaluator::{
    CallContext, EmptyProvider, Evaluation, Evaluator, Function, FunctionError, FunctionRegistry,
    MapProvider, Value, VariableProvider,
};
pub use filter::{FilterSet, Outcome, RunReport, RuleResult};
pub use formatter::{format_rule, format_source};
pub use lexer::token::{SourceLocation, Token, TokenKind};
pub use lexer::Lexer;
pub use parser::ast;
pub use parser::{parse_rule, Parser};
