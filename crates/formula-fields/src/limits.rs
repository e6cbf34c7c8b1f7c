//! Resource and property-name limits enforced while parsing and evaluating formulas.
//!
//! Form definitions can come from third parties, so every formula is treated as untrusted
//! input. The limits below bound the cost of lexing, parsing and evaluating a single formula:
//! worst-case work is a function of these constants, never of the input alone.
//!
//! Limits are passed by reference into the lexer, parser and evaluator. Nothing reads them from
//! a global, so tests can run with a small profile without affecting each other.

use serde::{Deserialize, Serialize};

/// Property names that may never appear as a path segment.
///
/// Matching is exact and case-sensitive (`Constructor` is an ordinary field name).
pub const BLOCKED_PROPERTY_NAMES: [&str; 3] = ["__proto__", "constructor", "prototype"];

/// Returns `true` when `name` is one of [`BLOCKED_PROPERTY_NAMES`].
#[must_use]
pub fn is_blocked_property_name(name: &str) -> bool {
    BLOCKED_PROPERTY_NAMES.contains(&name)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "camelCase")]
pub struct SecurityLimits {
    /// Maximum formula length in Unicode scalar values.
    pub max_formula_length: usize,
    /// Maximum number of simultaneously open expression frames (the formula itself is one).
    pub max_ast_depth: usize,
    /// Maximum number of AST nodes a single formula may produce.
    pub max_node_count: usize,
    /// Maximum number of list elements a single aggregate call may visit.
    pub max_array_iterations: usize,
}

impl SecurityLimits {
    pub const MAX_FORMULA_LENGTH: usize = 10_000;
    pub const MAX_AST_DEPTH: usize = 20;
    pub const MAX_NODE_COUNT: usize = 500;
    pub const MAX_ARRAY_ITERATIONS: usize = 1_000;

    /// The limit profile used for all user-authored formulas.
    #[must_use]
    pub const fn standard() -> Self {
        Self {
            max_formula_length: Self::MAX_FORMULA_LENGTH,
            max_ast_depth: Self::MAX_AST_DEPTH,
            max_node_count: Self::MAX_NODE_COUNT,
            max_array_iterations: Self::MAX_ARRAY_ITERATIONS,
        }
    }

    /// Load a limit profile from JSON, e.g. `{"maxAstDepth": 8}`.
    ///
    /// Keys that are not present keep their [`SecurityLimits::standard`] value; unknown keys are
    /// rejected so a typo cannot silently fall back to the default.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

impl Default for SecurityLimits {
    fn default() -> Self {
        Self::standard()
    }
}
