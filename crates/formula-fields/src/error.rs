use crate::ast::Span;
use crate::value::ValueType;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Closed set of error kinds reported to form authors.
///
/// Several [`FormulaError`] variants share a kind (e.g. division by zero is reported as a
/// [`ErrorKind::TypeMismatch`]); the variant keeps the precise condition for the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    CharacterLimitExceeded,
    DepthExceeded,
    NodeCountExceeded,
    ArrayIterationExceeded,
    PrototypePollutionAttempt,
    SyntaxError,
    UnknownFunction,
    UnknownProperty,
    TypeMismatch,
    CircularDependency,
}

/// How an error propagates and how hosts are expected to present it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorClass {
    /// Limit or security violation. Not retryable without editing the formula.
    Resource,
    /// Malformed formula text; reported with a position.
    Syntax,
    /// Evaluation failed against the supplied data. Isolated to one field.
    Data,
    /// Affects a whole group of fields (dependency cycles).
    Structural,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::CharacterLimitExceeded => "CharacterLimitExceeded",
            ErrorKind::DepthExceeded => "DepthExceeded",
            ErrorKind::NodeCountExceeded => "NodeCountExceeded",
            ErrorKind::ArrayIterationExceeded => "ArrayIterationExceeded",
            ErrorKind::PrototypePollutionAttempt => "PrototypePollutionAttempt",
            ErrorKind::SyntaxError => "SyntaxError",
            ErrorKind::UnknownFunction => "UnknownFunction",
            ErrorKind::UnknownProperty => "UnknownProperty",
            ErrorKind::TypeMismatch => "TypeMismatch",
            ErrorKind::CircularDependency => "CircularDependency",
        }
    }

    pub fn class(self) -> ErrorClass {
        match self {
            ErrorKind::CharacterLimitExceeded
            | ErrorKind::DepthExceeded
            | ErrorKind::NodeCountExceeded
            | ErrorKind::ArrayIterationExceeded
            | ErrorKind::PrototypePollutionAttempt => ErrorClass::Resource,
            ErrorKind::SyntaxError => ErrorClass::Syntax,
            ErrorKind::UnknownFunction | ErrorKind::UnknownProperty | ErrorKind::TypeMismatch => {
                ErrorClass::Data
            }
            ErrorKind::CircularDependency => ErrorClass::Structural,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every failure the engine can report. Messages are meant to be shown to form authors as-is,
/// so each one names the violated condition and the value that was observed.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[serde(untagged)]
pub enum FormulaError {
    #[error("formula is {actual} characters long; the limit is {limit}")]
    CharacterLimitExceeded { limit: usize, actual: usize },

    #[error("formula nesting reaches depth {actual}; the limit is {limit}")]
    DepthExceeded {
        limit: usize,
        actual: usize,
        span: Span,
    },

    #[error("formula needs {actual} syntax nodes; the limit is {limit}")]
    NodeCountExceeded {
        limit: usize,
        actual: usize,
        span: Span,
    },

    #[error("aggregate visited {actual} list elements; the limit is {limit}")]
    ArrayIterationExceeded { limit: usize, actual: usize },

    #[error("property name `{segment}` is not allowed{}", position_suffix(.position))]
    PrototypePollutionAttempt {
        segment: String,
        position: Option<usize>,
    },

    #[error("{message} (at {}..{})", .span.start, .span.end)]
    Syntax { message: String, span: Span },

    #[error("unknown function `{name}`")]
    UnknownFunction { name: String },

    #[error("unknown property `{path}`: `{missing}` does not exist")]
    UnknownProperty { path: String, missing: String },

    #[error("`{op}` cannot be applied to {left}{}", right_suffix(.right))]
    TypeMismatch {
        op: String,
        left: ValueType,
        right: Option<ValueType>,
    },

    #[error("`{op}` by zero")]
    DivisionByZero { op: String },

    #[error("`{op}` produced a value that is not a finite number")]
    NonFiniteResult { op: String },

    #[error("property `{path}` is a {found}, expected a number, text or boolean")]
    NotAScalar { path: String, found: ValueType },

    #[error("`{function}` expects {expected} argument(s), got {actual}")]
    ArgumentCount {
        function: String,
        expected: String,
        actual: usize,
    },

    #[error("`{function}`: {reason}")]
    InvalidArgument { function: String, reason: String },

    #[error("cannot store `{output}`: `{blocking}` already holds a {found}")]
    OutputConflict {
        output: String,
        blocking: String,
        found: ValueType,
    },

    #[error("computed fields form a dependency cycle: {}", .members.join(" -> "))]
    CircularDependency { members: Vec<String> },
}

fn position_suffix(position: &Option<usize>) -> String {
    match position {
        Some(pos) => format!(" (at {pos})"),
        None => String::new(),
    }
}

fn right_suffix(right: &Option<ValueType>) -> String {
    match right {
        Some(ty) => format!(" and {ty}"),
        None => String::new(),
    }
}

impl FormulaError {
    pub(crate) fn syntax(message: impl Into<String>, span: Span) -> Self {
        FormulaError::Syntax {
            message: message.into(),
            span,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            FormulaError::CharacterLimitExceeded { .. } => ErrorKind::CharacterLimitExceeded,
            FormulaError::DepthExceeded { .. } => ErrorKind::DepthExceeded,
            FormulaError::NodeCountExceeded { .. } => ErrorKind::NodeCountExceeded,
            FormulaError::ArrayIterationExceeded { .. } => ErrorKind::ArrayIterationExceeded,
            FormulaError::PrototypePollutionAttempt { .. } => ErrorKind::PrototypePollutionAttempt,
            FormulaError::Syntax { .. } => ErrorKind::SyntaxError,
            FormulaError::UnknownFunction { .. } => ErrorKind::UnknownFunction,
            FormulaError::UnknownProperty { .. } => ErrorKind::UnknownProperty,
            FormulaError::TypeMismatch { .. }
            | FormulaError::DivisionByZero { .. }
            | FormulaError::NonFiniteResult { .. }
            | FormulaError::NotAScalar { .. }
            | FormulaError::ArgumentCount { .. }
            | FormulaError::InvalidArgument { .. }
            | FormulaError::OutputConflict { .. } => ErrorKind::TypeMismatch,
            FormulaError::CircularDependency { .. } => ErrorKind::CircularDependency,
        }
    }

    /// Source span for errors that point at formula text.
    pub fn span(&self) -> Option<Span> {
        match self {
            FormulaError::DepthExceeded { span, .. }
            | FormulaError::NodeCountExceeded { span, .. }
            | FormulaError::Syntax { span, .. } => Some(*span),
            FormulaError::PrototypePollutionAttempt {
                position: Some(pos),
                ..
            } => Some(Span::new(*pos, *pos)),
            _ => None,
        }
    }

    pub fn report(&self) -> ErrorReport {
        ErrorReport {
            kind: self.kind(),
            message: self.to_string(),
            detail: serde_json::to_value(self).unwrap_or_default(),
        }
    }
}

/// Host-facing rendering of a [`FormulaError`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub message: String,
    /// Variant fields (limits, observed values, spans, names) as a JSON object.
    pub detail: serde_json::Value,
}

impl ErrorReport {
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}
