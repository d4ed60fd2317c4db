//! Abstract Syntax Tree (AST) definitions for filter rules
//!
//! Each node owns its children exclusively and carries source location
//! information for error reporting. Trees are immutable once parsed.

use std::collections::BTreeSet;

use crate::lexer::token::SourceLocation;

/// A parsed rule: the AST root plus the text it was parsed from
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    /// Original rule text (used for diagnostics)
    pub source: String,
    /// Root expression
    pub body: Expr,
    /// Lowercased names assigned anywhere in the rule
    assigned: BTreeSet<String>,
}

impl Rule {
    pub fn new(source: impl Into<String>, body: Expr) -> Self {
        let mut assigned = BTreeSet::new();
        body.collect_assigned(&mut assigned);
        Self {
            source: source.into(),
            body,
            assigned,
        }
    }

    /// Whether `name` (case-insensitive) is the target of some assignment
    pub fn assigns(&self, name: &str) -> bool {
        self.assigned.contains(&name.to_lowercase())
    }

    /// Lowercased names of all assigned user variables
    pub fn assigned_variables(&self) -> impl Iterator<Item = &str> {
        self.assigned.iter().map(String::as_str)
    }

    /// Number of condition-counting nodes in the whole tree, all branches included
    pub fn condition_count(&self) -> usize {
        self.body.condition_count()
    }
}

/// Expression node
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// `null`
    Null(SourceLocation),
    /// `true` / `false`
    Bool(bool, SourceLocation),
    /// Integer literal
    Integer(i64, SourceLocation),
    /// Float literal
    Float(f64, SourceLocation),
    /// String literal
    String(String, SourceLocation),
    /// Variable reference, name as written
    Var(String, SourceLocation),
    /// Array literal: `[a, b, c]`
    Array(ArrayExpr),
    /// Function call: `name(args)`
    Call(CallExpr),
    /// Unary operation: `!a`, `-a`, `+a`
    Unary(UnaryExpr),
    /// Binary operation: arithmetic, comparison or keyword operator
    Binary(BinaryExpr),
    /// Two or more left-associative operators at one level: `a + b - c`
    Chain(ChainExpr),
    /// Boolean chain: `a & b & c`
    BoolOp(BoolOpExpr),
    /// `c ? a : b` or `if c then a else b end`
    Conditional(ConditionalExpr),
    /// `x := v`, `x[i] := v`, `x[] := v`
    Assign(AssignExpr),
    /// Array indexing: `a[i]`
    Index(IndexExpr),
    /// Statements separated by `;`
    Sequence(SequenceExpr),
    /// Parenthesized expression: `(expr)`
    Paren(Box<Expr>, SourceLocation),
}

impl Expr {
    /// Get the source location of this expression
    pub fn location(&self) -> &SourceLocation {
        match self {
            Expr::Null(loc) => loc,
            Expr::Bool(_, loc) => loc,
            Expr::Integer(_, loc) => loc,
            Expr::Float(_, loc) => loc,
            Expr::String(_, loc) => loc,
            Expr::Var(_, loc) => loc,
            Expr::Array(a) => &a.location,
            Expr::Call(c) => &c.location,
            Expr::Unary(u) => &u.location,
            Expr::Binary(b) => &b.location,
            Expr::Chain(c) => &c.location,
            Expr::BoolOp(b) => &b.location,
            Expr::Conditional(c) => &c.location,
            Expr::Assign(a) => &a.location,
            Expr::Index(i) => &i.location,
            Expr::Sequence(s) => &s.location,
            Expr::Paren(_, loc) => loc,
        }
    }

    /// Human-readable representation of an expression (for messages)
    pub fn display(&self) -> String {
        crate::formatter::format_expr(self)
    }

    /// Whether this node is a literal constant
    pub fn is_literal(&self) -> bool {
        match self {
            Expr::Null(_)
            | Expr::Bool(..)
            | Expr::Integer(..)
            | Expr::Float(..)
            | Expr::String(..) => true,
            Expr::Paren(inner, _) => inner.is_literal(),
            _ => false,
        }
    }

    /// Direct children in evaluation order
    pub fn children(&self) -> Vec<&Expr> {
        match self {
            Expr::Null(_)
            | Expr::Bool(..)
            | Expr::Integer(..)
            | Expr::Float(..)
            | Expr::String(..)
            | Expr::Var(..) => Vec::new(),
            Expr::Array(a) => a.elements.iter().collect(),
            Expr::Call(c) => c.args.iter().collect(),
            Expr::Unary(u) => vec![u.operand.as_ref()],
            Expr::Binary(b) => vec![b.left.as_ref(), b.right.as_ref()],
            Expr::Chain(c) => std::iter::once(c.first.as_ref())
                .chain(c.links.iter().map(|link| &link.operand))
                .collect(),
            Expr::BoolOp(b) => b.operands.iter().collect(),
            Expr::Conditional(c) => {
                let mut children = vec![c.condition.as_ref(), c.then_branch.as_ref()];
                if let Some(else_branch) = &c.else_branch {
                    children.push(else_branch.as_ref());
                }
                children
            }
            Expr::Assign(a) => match &a.target {
                AssignTarget::Index(_, index) => vec![index.as_ref(), a.value.as_ref()],
                AssignTarget::Var(_) | AssignTarget::Append(_) => vec![a.value.as_ref()],
            },
            Expr::Index(i) => vec![i.base.as_ref(), i.index.as_ref()],
            Expr::Sequence(s) => s.statements.iter().collect(),
            Expr::Paren(inner, _) => vec![inner.as_ref()],
        }
    }

    /// Whether evaluating this node adds to the condition counter
    pub fn counts_as_condition(&self) -> bool {
        match self {
            Expr::Binary(b) => b.op.is_condition(),
            Expr::Unary(u) => u.op == UnaryOp::Not,
            Expr::BoolOp(_) | Expr::Call(_) => true,
            _ => false,
        }
    }

    /// Static number of condition-counting nodes in this subtree
    pub fn condition_count(&self) -> usize {
        let own = match self {
            Expr::Chain(c) => c.condition_links(),
            _ => usize::from(self.counts_as_condition()),
        };
        own + self
            .children()
            .into_iter()
            .map(Expr::condition_count)
            .sum::<usize>()
    }

    fn collect_assigned(&self, names: &mut BTreeSet<String>) {
        if let Expr::Assign(a) = self {
            names.insert(a.target.name().to_lowercase());
        }
        for child in self.children() {
            child.collect_assigned(names);
        }
    }

    /// Structural equality ignoring source locations
    pub fn same_shape(&self, other: &Expr) -> bool {
        fn all_same(a: &[Expr], b: &[Expr]) -> bool {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.same_shape(y))
        }

        match (self, other) {
            (Expr::Null(_), Expr::Null(_)) => true,
            (Expr::Bool(a, _), Expr::Bool(b, _)) => a == b,
            (Expr::Integer(a, _), Expr::Integer(b, _)) => a == b,
            (Expr::Float(a, _), Expr::Float(b, _)) => a == b,
            (Expr::String(a, _), Expr::String(b, _)) => a == b,
            (Expr::Var(a, _), Expr::Var(b, _)) => a == b,
            (Expr::Array(a), Expr::Array(b)) => all_same(&a.elements, &b.elements),
            (Expr::Call(a), Expr::Call(b)) => a.name == b.name && all_same(&a.args, &b.args),
            (Expr::Unary(a), Expr::Unary(b)) => a.op == b.op && a.operand.same_shape(&b.operand),
            (Expr::Binary(a), Expr::Binary(b)) => {
                a.op == b.op && a.left.same_shape(&b.left) && a.right.same_shape(&b.right)
            }
            (Expr::Chain(a), Expr::Chain(b)) => {
                a.first.same_shape(&b.first)
                    && a.links.len() == b.links.len()
                    && a.links
                        .iter()
                        .zip(&b.links)
                        .all(|(x, y)| x.op == y.op && x.operand.same_shape(&y.operand))
            }
            (Expr::BoolOp(a), Expr::BoolOp(b)) => {
                a.op == b.op && all_same(&a.operands, &b.operands)
            }
            (Expr::Conditional(a), Expr::Conditional(b)) => {
                a.style == b.style
                    && a.condition.same_shape(&b.condition)
                    && a.then_branch.same_shape(&b.then_branch)
                    && match (&a.else_branch, &b.else_branch) {
                        (Some(x), Some(y)) => x.same_shape(y),
                        (None, None) => true,
                        _ => false,
                    }
            }
            (Expr::Assign(a), Expr::Assign(b)) => {
                let targets = match (&a.target, &b.target) {
                    (AssignTarget::Var(x), AssignTarget::Var(y)) => x == y,
                    (AssignTarget::Append(x), AssignTarget::Append(y)) => x == y,
                    (AssignTarget::Index(x, i), AssignTarget::Index(y, j)) => {
                        x == y && i.same_shape(j)
                    }
                    _ => false,
                };
                targets && a.value.same_shape(&b.value)
            }
            (Expr::Index(a), Expr::Index(b)) => {
                a.base.same_shape(&b.base) && a.index.same_shape(&b.index)
            }
            (Expr::Sequence(a), Expr::Sequence(b)) => all_same(&a.statements, &b.statements),
            (Expr::Paren(a, _), Expr::Paren(b, _)) => a.same_shape(b),
            _ => false,
        }
    }
}

/// Array literal
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayExpr {
    pub elements: Vec<Expr>,
    pub location: SourceLocation,
}

/// Function call
#[derive(Debug, Clone, PartialEq)]
pub struct CallExpr {
    /// Function name as written
    pub name: String,
    pub args: Vec<Expr>,
    pub location: SourceLocation,
}

/// Unary expression
#[derive(Debug, Clone, PartialEq)]
pub struct UnaryExpr {
    pub op: UnaryOp,
    pub operand: Box<Expr>,
    pub location: SourceLocation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
    Plus,
}

impl std::fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnaryOp::Not => write!(f, "!"),
            UnaryOp::Neg => write!(f, "-"),
            UnaryOp::Plus => write!(f, "+"),
        }
    }
}

/// Binary expression
#[derive(Debug, Clone, PartialEq)]
pub struct BinaryExpr {
    pub left: Box<Expr>,
    pub op: BinaryOp,
    pub right: Box<Expr>,
    pub location: SourceLocation,
}

/// Left-associative run: `first op1 x1 op2 x2 ...` means
/// `((first op1 x1) op2 x2) ...`
#[derive(Debug, Clone, PartialEq)]
pub struct ChainExpr {
    pub first: Box<Expr>,
    /// At least two links
    pub links: Vec<ChainLink>,
    pub location: SourceLocation,
}

impl ChainExpr {
    /// Links whose operator counts as a condition
    pub fn condition_links(&self) -> usize {
        self.links.iter().filter(|link| link.op.is_condition()).count()
    }
}

/// One `op operand` step of a [`ChainExpr`]
#[derive(Debug, Clone, PartialEq)]
pub struct ChainLink {
    pub op: BinaryOp,
    pub operand: Expr,
    /// Span from the start of the chain through this operand
    pub location: SourceLocation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    // Comparison
    Eq,
    NotEq,
    StrictEq,
    StrictNotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    // Keyword operators
    In,
    Contains,
    Like,
    Rlike,
    Irlike,
}

impl BinaryOp {
    /// Comparisons and keyword operators count toward the condition budget
    pub fn is_condition(&self) -> bool {
        !self.is_arithmetic()
    }

    pub fn is_arithmetic(&self) -> bool {
        matches!(
            self,
            BinaryOp::Add
                | BinaryOp::Sub
                | BinaryOp::Mul
                | BinaryOp::Div
                | BinaryOp::Mod
                | BinaryOp::Pow
        )
    }

    pub fn is_keyword(&self) -> bool {
        matches!(
            self,
            BinaryOp::In | BinaryOp::Contains | BinaryOp::Like | BinaryOp::Rlike | BinaryOp::Irlike
        )
    }
}

impl std::fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BinaryOp::Add => write!(f, "+"),
            BinaryOp::Sub => write!(f, "-"),
            BinaryOp::Mul => write!(f, "*"),
            BinaryOp::Div => write!(f, "/"),
            BinaryOp::Mod => write!(f, "%"),
            BinaryOp::Pow => write!(f, "**"),
            BinaryOp::Eq => write!(f, "=="),
            BinaryOp::NotEq => write!(f, "!="),
            BinaryOp::StrictEq => write!(f, "==="),
            BinaryOp::StrictNotEq => write!(f, "!=="),
            BinaryOp::Lt => write!(f, "<"),
            BinaryOp::LtEq => write!(f, "<="),
            BinaryOp::Gt => write!(f, ">"),
            BinaryOp::GtEq => write!(f, ">="),
            BinaryOp::In => write!(f, "in"),
            BinaryOp::Contains => write!(f, "contains"),
            BinaryOp::Like => write!(f, "like"),
            BinaryOp::Rlike => write!(f, "rlike"),
            BinaryOp::Irlike => write!(f, "irlike"),
        }
    }
}

/// N-ary boolean chain; `and`/`or` short-circuit, `xor` does not
#[derive(Debug, Clone, PartialEq)]
pub struct BoolOpExpr {
    pub op: BoolOp,
    pub operands: Vec<Expr>,
    pub location: SourceLocation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolOp {
    And,
    Or,
    Xor,
}

impl std::fmt::Display for BoolOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BoolOp::And => write!(f, "&"),
            BoolOp::Or => write!(f, "|"),
            BoolOp::Xor => write!(f, "^"),
        }
    }
}

/// Surface syntax a conditional was written in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionalStyle {
    /// `c ? a : b`
    Ternary,
    /// `if c then a else b end`
    IfThen,
}

/// Conditional expression; all three parts are kept, evaluation picks the branch
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionalExpr {
    pub condition: Box<Expr>,
    pub then_branch: Box<Expr>,
    /// Always present for ternaries; optional for `if`
    pub else_branch: Option<Box<Expr>>,
    pub style: ConditionalStyle,
    pub location: SourceLocation,
}

/// Left-hand side of `:=`
#[derive(Debug, Clone, PartialEq)]
pub enum AssignTarget {
    /// `x := v`
    Var(String),
    /// `x[i] := v`
    Index(String, Box<Expr>),
    /// `x[] := v`
    Append(String),
}

impl AssignTarget {
    /// Variable name as written
    pub fn name(&self) -> &str {
        match self {
            AssignTarget::Var(name) | AssignTarget::Index(name, _) | AssignTarget::Append(name) => {
                name
            }
        }
    }
}

/// Assignment to a user variable
#[derive(Debug, Clone, PartialEq)]
pub struct AssignExpr {
    pub target: AssignTarget,
    pub value: Box<Expr>,
    /// Location of the target variable name
    pub name_location: SourceLocation,
    pub location: SourceLocation,
}

/// Index access
#[derive(Debug, Clone, PartialEq)]
pub struct IndexExpr {
    pub base: Box<Expr>,
    pub index: Box<Expr>,
    pub location: SourceLocation,
}

/// `a; b; c`, value of the last statement
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceExpr {
    pub statements: Vec<Expr>,
    pub location: SourceLocation,
}
