#![forbid(unsafe_code)]
#![deny(unreachable_patterns)]

//! Sandboxed formula engine for computed form fields.
//!
//! Form definitions declare computed fields such as
//!
//! ```text
//! abilities.strength.modifier = floor((@abilities.strength.value - 10) / 2)
//! ```
//!
//! and the engine parses each formula once, evaluates it against a character's entity data and
//! orders fields so that a field always runs after the fields it reads.
//!
//! Formulas come from untrusted form authors. Every stage is bounded by [`SecurityLimits`]: the
//! length is checked before lexing, nesting depth and node count while parsing, and list
//! iteration while evaluating. Property names that could reach object internals on a scripting
//! host (`__proto__`, `constructor`, `prototype`) are rejected both when parsing and when
//! resolving a path. Evaluation only reads the context it is given.
//!
//! ```
//! use formula_fields::{record_from_json, Engine, Value};
//!
//! let engine = Engine::new();
//! let ctx = record_from_json(serde_json::json!({"abilities": {"strength": {"value": 15}}}));
//! let value = engine
//!     .evaluate("floor((@abilities.strength.value - 10) / 2)", &ctx)
//!     .unwrap();
//! assert_eq!(value, Value::Number(2.0));
//! ```

pub mod ast;
mod engine;
mod error;
pub mod eval;
mod formula;
pub mod graph;
mod limits;
pub mod parser;
mod value;

pub use ast::{Expr, PathSegment, PropertyPath, Span};
pub use engine::{Engine, FieldDefinition, FieldResult, FormEvaluation};
pub use error::{ErrorClass, ErrorKind, ErrorReport, FormulaError};
pub use eval::{evaluate, Evaluator};
pub use formula::{Formula, ParseCache};
pub use graph::{ComputedField, DependencyGraph, EvaluationPlan};
pub use limits::{is_blocked_property_name, SecurityLimits, BLOCKED_PROPERTY_NAMES};
pub use value::{record_from_json, EntityRecord, EntityValue, Value, ValueType};

/// Parse `source` under the standard limits.
pub fn parse(source: &str) -> Result<Formula, FormulaError> {
    Formula::parse(source)
}

pub fn parse_with_limits(source: &str, limits: &SecurityLimits) -> Result<Formula, FormulaError> {
    Formula::parse_with_limits(source, limits)
}
