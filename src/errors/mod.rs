//! Error types, diagnostics, and result aliases for the filter engine.
//!
//! All user-facing errors are variants of [`FilterError`], rendered via `miette` diagnostics.
//! Codes are grouped by phase: `E00xx` syntax, `E01xx` runtime, `E02xx` resource limits,
//! `E09xx` host (I/O and configuration).

use std::fmt;

use miette::{Diagnostic, SourceSpan};
use thiserror::Error;

use crate::lexer::token::SourceLocation;

/// Category of a non-fatal diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningKind {
    /// A regex or glob pattern failed to compile; the match evaluated to false
    MalformedPattern,
    /// Call to a function that is not registered
    UnknownFunction,
    /// Call to a function with a preferred replacement
    DeprecatedFunction,
    /// Read of a variable with a preferred replacement
    DeprecatedVariable,
    /// Read of a variable that is neither reserved nor assigned by the rule
    UnknownVariable,
    /// A branch that can never run because its condition is a literal
    UnreachableBranch,
    /// A function reported a recoverable problem
    Function,
}

impl fmt::Display for WarningKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WarningKind::MalformedPattern => write!(f, "malformed-pattern"),
            WarningKind::UnknownFunction => write!(f, "unknown-function"),
            WarningKind::DeprecatedFunction => write!(f, "deprecated-function"),
            WarningKind::DeprecatedVariable => write!(f, "deprecated-variable"),
            WarningKind::UnknownVariable => write!(f, "unknown-variable"),
            WarningKind::UnreachableBranch => write!(f, "unreachable-branch"),
            WarningKind::Function => write!(f, "function"),
        }
    }
}

/// Warning from checking or evaluation (non-fatal)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    pub kind: WarningKind,
    pub message: String,
    pub line: usize,
    pub column: usize,
}

impl Warning {
    pub fn new(kind: WarningKind, message: impl Into<String>, location: &SourceLocation) -> Self {
        Self {
            kind,
            message: message.into(),
            line: location.line,
            column: location.column,
        }
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "warning[{}] at {}:{}: {}",
            self.kind, self.line, self.column, self.message
        )
    }
}

/// Calculate Levenshtein distance between two strings
fn levenshtein_distance(a: &str, b: &str) -> usize {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();

    if a_chars.is_empty() {
        return b_chars.len();
    }
    if b_chars.is_empty() {
        return a_chars.len();
    }

    let mut previous: Vec<usize> = (0..=b_chars.len()).collect();
    let mut current = vec![0usize; b_chars.len() + 1];

    for (i, ca) in a_chars.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b_chars.iter().enumerate() {
            let cost = usize::from(ca != cb);
            current[j + 1] = (previous[j + 1] + 1)
                .min(current[j] + 1)
                .min(previous[j] + cost);
        }
        std::mem::swap(&mut previous, &mut current);
    }

    previous[b_chars.len()]
}

/// Find the best "did you mean?" suggestion from a list of candidates
pub fn find_similar<'a, I>(name: &str, candidates: I, max_distance: usize) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let name_lower = name.to_lowercase();
    let mut best_match = None;
    let mut best_distance = usize::MAX;

    for candidate in candidates {
        let distance = levenshtein_distance(&name_lower, &candidate.to_lowercase());
        if distance <= max_distance && distance < best_distance {
            best_distance = distance;
            best_match = Some(candidate.to_string());
        }
    }

    best_match
}

/// Generate a help message for an unknown name with suggestions
pub fn unknown_name_help<'a, I>(name: &str, available: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    // Longer names allow more typos
    let max_distance = (name.len() / 3).clamp(1, 3);

    match find_similar(name, available, max_distance) {
        Some(suggestion) => format!("did you mean '{}'?", suggestion),
        None => "check the name for typos".to_string(),
    }
}

/// Broad classification of a [`FilterError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed rule text; the rule must be fixed
    Syntax,
    /// A well-formed rule failed while being evaluated
    Runtime,
    /// The rule exceeded its condition budget
    ConditionLimit,
    /// Host-side failure (reading files, configuration)
    Io,
}

/// Main error type for the filter engine
#[derive(Error, Debug, Diagnostic)]
pub enum FilterError {
    #[error("unexpected token")]
    #[diagnostic(code(E0001), help("{help}"))]
    UnexpectedToken {
        #[source_code]
        src: String,
        #[label("expected {expected}, found {found}")]
        span: SourceSpan,
        expected: String,
        found: String,
        help: String,
    },

    #[error("unexpected character")]
    #[diagnostic(code(E0002), help("{help}"))]
    UnexpectedCharacter {
        #[source_code]
        src: String,
        #[label("unexpected: '{ch}'")]
        span: SourceSpan,
        ch: char,
        help: String,
    },

    #[error("unterminated string")]
    #[diagnostic(code(E0003), help("add the closing quote at the end of the string"))]
    UnterminatedString {
        #[source_code]
        src: String,
        #[label("string started here but never closed")]
        span: SourceSpan,
    },

    #[error("unterminated comment")]
    #[diagnostic(code(E0004), help("close the comment with */"))]
    UnterminatedComment {
        #[source_code]
        src: String,
        #[label("comment started here but never closed")]
        span: SourceSpan,
    },

    #[error("invalid number literal")]
    #[diagnostic(code(E0005), help("{help}"))]
    InvalidNumber {
        #[source_code]
        src: String,
        #[label("invalid number: {text}")]
        span: SourceSpan,
        text: String,
        help: String,
    },

    #[error("wrong number of arguments to {name}()")]
    #[diagnostic(code(E0006), help("{name}() expects {expected} argument(s)"))]
    WrongArity {
        #[source_code]
        src: String,
        #[label("called with {found} argument(s)")]
        span: SourceSpan,
        name: String,
        expected: String,
        found: usize,
    },

    #[error("nesting too deep")]
    #[diagnostic(code(E0007), help("{help}"))]
    NestingTooDeep {
        #[source_code]
        src: String,
        #[label("nesting too deep here")]
        span: SourceSpan,
        help: String,
    },

    #[error("cannot assign to read-only variable '{name}'")]
    #[diagnostic(code(E0008), help("use a different name for the local variable"))]
    ReadOnlyVariable {
        #[source_code]
        src: String,
        #[label("'{name}' is provided by the host")]
        span: SourceSpan,
        name: String,
    },

    #[error("invalid assignment target")]
    #[diagnostic(code(E0009), help("only a variable name, `name[index]` or `name[]` can be assigned"))]
    InvalidAssignment {
        #[source_code]
        src: String,
        #[label("cannot assign to this expression")]
        span: SourceSpan,
    },

    #[error("unknown function")]
    #[diagnostic(code(E0101), help("{help}"))]
    UnknownFunction {
        #[source_code]
        src: String,
        #[label("'{name}' is not a registered function")]
        span: SourceSpan,
        name: String,
        help: String,
    },

    #[error("unknown variable")]
    #[diagnostic(code(E0102), help("{help}"))]
    UnknownVariable {
        #[source_code]
        src: String,
        #[label("'{name}' is not defined")]
        span: SourceSpan,
        name: String,
        help: String,
    },

    #[error("division by zero")]
    #[diagnostic(code(E0103), help("divisor must be non-zero"))]
    DivisionByZero {
        #[source_code]
        src: String,
        #[label("division by zero here")]
        span: SourceSpan,
    },

    #[error("indexed value is not an array")]
    #[diagnostic(code(E0104), help("only arrays can be indexed"))]
    NotAnArray {
        #[source_code]
        src: String,
        #[label("this is a {found}")]
        span: SourceSpan,
        found: String,
    },

    #[error("array index out of bounds")]
    #[diagnostic(code(E0105), help("the array has {len} element(s)"))]
    IndexOutOfBounds {
        #[source_code]
        src: String,
        #[label("index {index}")]
        span: SourceSpan,
        index: String,
        len: usize,
    },

    #[error("{name}() failed: {message}")]
    #[diagnostic(code(E0106))]
    FunctionFailed {
        #[source_code]
        src: String,
        #[label("{message}")]
        span: SourceSpan,
        name: String,
        message: String,
    },

    #[error("maximum evaluation depth exceeded")]
    #[diagnostic(code(E0107), help("{help}"))]
    RecursionLimitExceeded {
        #[source_code]
        src: String,
        #[label("nesting too deep here")]
        span: SourceSpan,
        help: String,
    },

    #[error("condition limit exceeded ({used} > {max})")]
    #[diagnostic(
        code(E0201),
        help("the rule is too expensive to evaluate; simplify it or raise the limit")
    )]
    ConditionLimitExceeded {
        #[source_code]
        src: String,
        #[label("budget exhausted here")]
        span: SourceSpan,
        used: usize,
        max: usize,
    },

    #[error("I/O error: {message}")]
    #[diagnostic(code(E0901))]
    IoError { message: String },

    #[error("invalid configuration: {message}")]
    #[diagnostic(code(E0902))]
    ConfigError { message: String },
}

impl FilterError {
    /// Create an UnexpectedToken error
    pub fn unexpected_token(
        src: impl Into<String>,
        location: &SourceLocation,
        expected: impl Into<String>,
        found: impl Into<String>,
        help: impl Into<String>,
    ) -> Self {
        FilterError::UnexpectedToken {
            src: src.into(),
            span: span_of(location),
            expected: expected.into(),
            found: found.into(),
            help: help.into(),
        }
    }

    /// Create an UnexpectedCharacter error
    pub fn unexpected_character(
        src: impl Into<String>,
        location: &SourceLocation,
        ch: char,
    ) -> Self {
        let help = match ch {
            '=' => "use == for comparison and := for assignment".to_string(),
            '`' => "use double quotes \"...\" or single quotes '...' for strings".to_string(),
            '#' => "comments are written /* like this */".to_string(),
            _ => format!("'{}' is not valid in a filter rule", ch),
        };
        FilterError::UnexpectedCharacter {
            src: src.into(),
            span: span_of(location),
            ch,
            help,
        }
    }

    /// Create an UnterminatedString error
    pub fn unterminated_string(src: impl Into<String>, location: &SourceLocation) -> Self {
        FilterError::UnterminatedString {
            src: src.into(),
            span: span_of(location),
        }
    }

    /// Create an UnterminatedComment error
    pub fn unterminated_comment(src: impl Into<String>, location: &SourceLocation) -> Self {
        FilterError::UnterminatedComment {
            src: src.into(),
            span: span_of(location),
        }
    }

    /// Create an UnknownFunction error
    pub fn unknown_function(
        src: impl Into<String>,
        location: &SourceLocation,
        name: impl Into<String>,
        help: impl Into<String>,
    ) -> Self {
        FilterError::UnknownFunction {
            src: src.into(),
            span: span_of(location),
            name: name.into(),
            help: help.into(),
        }
    }

    /// Create an UnknownVariable error
    pub fn unknown_variable(
        src: impl Into<String>,
        location: &SourceLocation,
        name: impl Into<String>,
        help: impl Into<String>,
    ) -> Self {
        FilterError::UnknownVariable {
            src: src.into(),
            span: span_of(location),
            name: name.into(),
            help: help.into(),
        }
    }

    /// Create a DivisionByZero error
    pub fn division_by_zero(src: impl Into<String>, location: &SourceLocation) -> Self {
        FilterError::DivisionByZero {
            src: src.into(),
            span: span_of(location),
        }
    }

    /// Create a ConditionLimitExceeded error
    pub fn condition_limit(
        src: impl Into<String>,
        location: &SourceLocation,
        used: usize,
        max: usize,
    ) -> Self {
        FilterError::ConditionLimitExceeded {
            src: src.into(),
            span: span_of(location),
            used,
            max,
        }
    }

    /// Create an IoError
    pub fn io_error(message: impl Into<String>) -> Self {
        FilterError::IoError {
            message: message.into(),
        }
    }

    /// Create a ConfigError
    pub fn config_error(message: impl Into<String>) -> Self {
        FilterError::ConfigError {
            message: message.into(),
        }
    }

    /// Classify this error into the syntax / runtime / limit taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            FilterError::UnexpectedToken { .. }
            | FilterError::UnexpectedCharacter { .. }
            | FilterError::UnterminatedString { .. }
            | FilterError::UnterminatedComment { .. }
            | FilterError::InvalidNumber { .. }
            | FilterError::WrongArity { .. }
            | FilterError::NestingTooDeep { .. }
            | FilterError::ReadOnlyVariable { .. }
            | FilterError::InvalidAssignment { .. } => ErrorKind::Syntax,
            FilterError::UnknownFunction { .. }
            | FilterError::UnknownVariable { .. }
            | FilterError::DivisionByZero { .. }
            | FilterError::NotAnArray { .. }
            | FilterError::IndexOutOfBounds { .. }
            | FilterError::FunctionFailed { .. }
            | FilterError::RecursionLimitExceeded { .. } => ErrorKind::Runtime,
            FilterError::ConditionLimitExceeded { .. } => ErrorKind::ConditionLimit,
            FilterError::IoError { .. } | FilterError::ConfigError { .. } => ErrorKind::Io,
        }
    }

    /// Get the span (start, end) for this error, if it has one
    pub fn span(&self) -> Option<Span> {
        match self {
            FilterError::UnexpectedToken { span, .. }
            | FilterError::UnexpectedCharacter { span, .. }
            | FilterError::UnterminatedString { span, .. }
            | FilterError::UnterminatedComment { span, .. }
            | FilterError::InvalidNumber { span, .. }
            | FilterError::WrongArity { span, .. }
            | FilterError::NestingTooDeep { span, .. }
            | FilterError::ReadOnlyVariable { span, .. }
            | FilterError::InvalidAssignment { span, .. }
            | FilterError::UnknownFunction { span, .. }
            | FilterError::UnknownVariable { span, .. }
            | FilterError::DivisionByZero { span, .. }
            | FilterError::NotAnArray { span, .. }
            | FilterError::IndexOutOfBounds { span, .. }
            | FilterError::FunctionFailed { span, .. }
            | FilterError::RecursionLimitExceeded { span, .. }
            | FilterError::ConditionLimitExceeded { span, .. } => Some(Span::from(*span)),
            FilterError::IoError { .. } | FilterError::ConfigError { .. } => None,
        }
    }

    /// Get a simple error message (without source context)
    pub fn message(&self) -> String {
        match self {
            FilterError::UnexpectedToken {
                expected, found, ..
            } => format!("unexpected token: expected {}, found {}", expected, found),
            FilterError::UnexpectedCharacter { ch, .. } => {
                format!("unexpected character: '{}'", ch)
            }
            FilterError::UnterminatedString { .. } => "unterminated string".to_string(),
            FilterError::UnterminatedComment { .. } => "unterminated comment".to_string(),
            FilterError::InvalidNumber { text, .. } => format!("invalid number: {}", text),
            FilterError::WrongArity {
                name,
                expected,
                found,
                ..
            } => format!(
                "wrong number of arguments to {}(): expected {}, found {}",
                name, expected, found
            ),
            FilterError::NestingTooDeep { .. } => "nesting too deep".to_string(),
            FilterError::ReadOnlyVariable { name, .. } => {
                format!("cannot assign to read-only variable '{}'", name)
            }
            FilterError::InvalidAssignment { .. } => "invalid assignment target".to_string(),
            FilterError::UnknownFunction { name, .. } => format!("unknown function: {}", name),
            FilterError::UnknownVariable { name, .. } => format!("unknown variable: {}", name),
            FilterError::DivisionByZero { .. } => "division by zero".to_string(),
            FilterError::NotAnArray { found, .. } => {
                format!("indexed value is not an array: {}", found)
            }
            FilterError::IndexOutOfBounds { index, len, .. } => {
                format!("array index {} out of bounds (length {})", index, len)
            }
            FilterError::FunctionFailed { name, message, .. } => {
                format!("{}() failed: {}", name, message)
            }
            FilterError::RecursionLimitExceeded { .. } => {
                "maximum evaluation depth exceeded".to_string()
            }
            FilterError::ConditionLimitExceeded { used, max, .. } => {
                format!("condition limit exceeded ({} > {})", used, max)
            }
            FilterError::IoError { message } => format!("I/O error: {}", message),
            FilterError::ConfigError { message } => {
                format!("invalid configuration: {}", message)
            }
        }
    }
}

/// Convert a location into a miette span
pub(crate) fn span_of(location: &SourceLocation) -> SourceSpan {
    (location.offset, location.length).into()
}

/// Simple span type (offset, length) -> (start, end)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl From<SourceSpan> for Span {
    fn from(span: SourceSpan) -> Self {
        Self {
            start: span.offset(),
            end: span.offset() + span.len(),
        }
    }
}

/// Result type for filter operations
pub type FilterResult<T> = Result<T, FilterError>;
