use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::BTreeSet;
use std::fmt;

/// Byte range into the formula source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    #[must_use]
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}

/// One step of a property path.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PathSegment {
    /// Record field, e.g. `strength` in `@abilities.strength`.
    Field(String),
    /// List position, e.g. `[2]`.
    Index(u32),
    /// Every list element, `[]`. Only meaningful inside `sum`/`count`.
    Wildcard,
}

impl PathSegment {
    fn matches(&self, other: &PathSegment) -> bool {
        match (self, other) {
            (PathSegment::Field(a), PathSegment::Field(b)) => a == b,
            (PathSegment::Index(a), PathSegment::Index(b)) => a == b,
            (PathSegment::Wildcard, PathSegment::Index(_) | PathSegment::Wildcard)
            | (PathSegment::Index(_), PathSegment::Wildcard) => true,
            _ => false,
        }
    }
}

/// A dotted/bracketed reference into the entity context.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PropertyPath {
    pub segments: SmallVec<[PathSegment; 4]>,
}

impl PropertyPath {
    #[must_use]
    pub fn new(segments: impl IntoIterator<Item = PathSegment>) -> Self {
        Self {
            segments: segments.into_iter().collect(),
        }
    }

    /// Convenience constructor for a path made only of field names.
    #[must_use]
    pub fn fields<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        Self::new(names.into_iter().map(|n| PathSegment::Field(n.to_string())))
    }

    /// Parse a standalone path such as `abilities.strength.modifier` (the `@` is optional).
    pub fn parse(source: &str) -> Result<Self, crate::FormulaError> {
        crate::parser::parse_path(source, &crate::SecurityLimits::standard())
    }

    pub fn has_wildcard(&self) -> bool {
        self.segments
            .iter()
            .any(|s| matches!(s, PathSegment::Wildcard))
    }

    /// Whether both paths can address the same data: one is a prefix of the other, with `[]`
    /// matching any index.
    pub fn overlaps(&self, other: &PropertyPath) -> bool {
        self.segments
            .iter()
            .zip(other.segments.iter())
            .all(|(a, b)| a.matches(b))
    }
}

impl fmt::Display for PropertyPath {
    /// Bare path text without the `@` sigil, e.g. `items[].damage`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, segment) in self.segments.iter().enumerate() {
            match segment {
                PathSegment::Field(name) if is_plain_identifier(name) => {
                    if idx > 0 {
                        f.write_str(".")?;
                    }
                    f.write_str(name)?;
                }
                PathSegment::Field(name) => {
                    f.write_str("[")?;
                    write_quoted(f, name)?;
                    f.write_str("]")?;
                }
                PathSegment::Index(i) => write!(f, "[{i}]")?,
                PathSegment::Wildcard => f.write_str("[]")?,
            }
        }
        Ok(())
    }
}

pub(crate) fn is_plain_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn write_quoted(f: &mut fmt::Formatter<'_>, text: &str) -> fmt::Result {
    f.write_str("\"")?;
    for ch in text.chars() {
        if ch == '"' {
            f.write_str("\\\"")?;
        } else {
            write!(f, "{ch}")?;
        }
    }
    f.write_str("\"")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    Not,
    Negate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    And,
    Or,
}

/// Binding power of prefix operators; tighter than every binary operator.
pub(crate) const UNARY_PRECEDENCE: u8 = 8;
const ATOM_PRECEDENCE: u8 = 9;

impl BinaryOp {
    pub fn as_str(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Pow => "^",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Gt => ">",
            BinaryOp::Le => "<=",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
        }
    }

    pub(crate) fn precedence(self) -> u8 {
        match self {
            BinaryOp::Or => 1,
            BinaryOp::And => 2,
            BinaryOp::Eq | BinaryOp::Ne => 3,
            BinaryOp::Lt | BinaryOp::Gt | BinaryOp::Le | BinaryOp::Ge => 4,
            BinaryOp::Add | BinaryOp::Sub => 5,
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => 6,
            BinaryOp::Pow => 7,
        }
    }

    pub(crate) fn is_right_associative(self) -> bool {
        self == BinaryOp::Pow
    }
}

impl UnaryOp {
    pub fn as_str(self) -> &'static str {
        match self {
            UnaryOp::Not => "not",
            UnaryOp::Negate => "-",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnaryExpr {
    pub op: UnaryOp,
    pub expr: Box<Expr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinaryExpr {
    pub op: BinaryOp,
    pub left: Box<Expr>,
    pub right: Box<Expr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    /// The name as written; dispatch is case-insensitive.
    pub name: String,
    pub args: Vec<Expr>,
}

/// Parsed formula expression. Nodes are never mutated once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Number(f64),
    String(String),
    Boolean(bool),
    Path(PropertyPath),
    Unary(UnaryExpr),
    Binary(BinaryExpr),
    FunctionCall(FunctionCall),
}

impl Expr {
    /// Every property path reachable from this node, including both branches of `if`.
    pub fn collect_paths(&self) -> BTreeSet<PropertyPath> {
        let mut out = BTreeSet::new();
        let mut stack = vec![self];
        while let Some(expr) = stack.pop() {
            match expr {
                Expr::Path(path) => {
                    out.insert(path.clone());
                }
                Expr::Unary(unary) => stack.push(&unary.expr),
                Expr::Binary(binary) => {
                    stack.push(&binary.left);
                    stack.push(&binary.right);
                }
                Expr::FunctionCall(call) => stack.extend(call.args.iter()),
                Expr::Number(_) | Expr::String(_) | Expr::Boolean(_) => {}
            }
        }
        out
    }

    /// Number of nodes in this tree (a path counts as one node).
    pub fn node_count(&self) -> usize {
        let mut count = 0;
        let mut stack = vec![self];
        while let Some(expr) = stack.pop() {
            count += 1;
            match expr {
                Expr::Unary(unary) => stack.push(&unary.expr),
                Expr::Binary(binary) => {
                    stack.push(&binary.left);
                    stack.push(&binary.right);
                }
                Expr::FunctionCall(call) => stack.extend(call.args.iter()),
                Expr::Number(_) | Expr::String(_) | Expr::Boolean(_) | Expr::Path(_) => {}
            }
        }
        count
    }

    /// Stable JSON serialization useful for debugging/tests.
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    fn precedence(&self) -> u8 {
        match self {
            Expr::Binary(binary) => binary.op.precedence(),
            Expr::Unary(_) => UNARY_PRECEDENCE,
            Expr::Number(n) if n.is_sign_negative() => UNARY_PRECEDENCE,
            _ => ATOM_PRECEDENCE,
        }
    }

    fn fmt_child(&self, f: &mut fmt::Formatter<'_>, parens: bool) -> fmt::Result {
        if parens {
            write!(f, "({self})")
        } else {
            write!(f, "{self}")
        }
    }
}

impl fmt::Display for Expr {
    /// Canonical formula text: `@` on every path and only the parentheses precedence needs.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Number(n) => write!(f, "{n}"),
            Expr::String(s) => write_quoted(f, s),
            Expr::Boolean(true) => f.write_str("true"),
            Expr::Boolean(false) => f.write_str("false"),
            Expr::Path(path) => write!(f, "@{path}"),
            Expr::Unary(unary) => {
                match unary.op {
                    UnaryOp::Not => f.write_str("not ")?,
                    UnaryOp::Negate => f.write_str("-")?,
                }
                unary
                    .expr
                    .fmt_child(f, unary.expr.precedence() < UNARY_PRECEDENCE)
            }
            Expr::Binary(binary) => {
                let prec = binary.op.precedence();
                let right_assoc = binary.op.is_right_associative();
                let left_prec = binary.left.precedence();
                let right_prec = binary.right.precedence();
                binary
                    .left
                    .fmt_child(f, left_prec < prec || (left_prec == prec && right_assoc))?;
                write!(f, " {} ", binary.op.as_str())?;
                binary
                    .right
                    .fmt_child(f, right_prec < prec || (right_prec == prec && !right_assoc))
            }
            Expr::FunctionCall(call) => {
                write!(f, "{}(", call.name)?;
                for (idx, arg) in call.args.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                f.write_str(")")
            }
        }
    }
}
