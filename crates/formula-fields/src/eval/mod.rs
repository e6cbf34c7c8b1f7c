mod evaluator;
mod functions;

pub use evaluator::Evaluator;

use crate::ast::Expr;
use crate::value::{EntityRecord, Value};
use crate::{FormulaError, SecurityLimits};

/// Evaluate `expr` against `context` under the standard limits.
pub fn evaluate(expr: &Expr, context: &EntityRecord) -> Result<Value, FormulaError> {
    let limits = SecurityLimits::standard();
    Evaluator::new(&limits, context).eval(expr)
}
