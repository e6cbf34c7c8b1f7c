use super::functions::{finite, type_mismatch, Aggregate, Builtin};
use crate::ast::{
    BinaryExpr, BinaryOp, Expr, FunctionCall, PathSegment, PropertyPath, Span, UnaryOp,
};
use crate::limits::is_blocked_property_name;
use crate::value::{lookup, EntityRecord, EntityValue, Value, ValueType};
use crate::{FormulaError, SecurityLimits};
use std::cmp::Ordering;

/// Counts list elements visited by one aggregate call.
#[derive(Debug)]
struct IterationBudget {
    limit: usize,
    used: usize,
}

impl IterationBudget {
    fn new(limit: usize) -> Self {
        Self { limit, used: 0 }
    }

    fn visit(&mut self) -> Result<(), FormulaError> {
        self.used += 1;
        if self.used > self.limit {
            return Err(FormulaError::ArrayIterationExceeded {
                limit: self.limit,
                actual: self.used,
            });
        }
        Ok(())
    }
}

/// Tree-walking interpreter over an entity context.
///
/// The evaluator holds no mutable state between calls; every [`Evaluator::eval`] is a pure
/// function of the expression and the context.
pub struct Evaluator<'a> {
    limits: &'a SecurityLimits,
    context: &'a EntityRecord,
}

impl<'a> Evaluator<'a> {
    pub fn new(limits: &'a SecurityLimits, context: &'a EntityRecord) -> Self {
        Self { limits, context }
    }

    pub fn eval(&self, expr: &Expr) -> Result<Value, FormulaError> {
        // Parsed formulas already satisfy this; host-built trees may not.
        let nodes = expr.node_count();
        if nodes > self.limits.max_node_count {
            return Err(FormulaError::NodeCountExceeded {
                limit: self.limits.max_node_count,
                actual: nodes,
                span: Span::new(0, 0),
            });
        }
        self.eval_expr(expr)
    }

    fn eval_expr(&self, expr: &Expr) -> Result<Value, FormulaError> {
        match expr {
            Expr::Number(n) => finite("number", *n).map(Value::Number),
            Expr::String(s) => Ok(Value::Text(s.clone())),
            Expr::Boolean(b) => Ok(Value::Bool(*b)),
            Expr::Path(path) => self.eval_path(path),
            Expr::Unary(unary) => {
                let value = self.eval_expr(&unary.expr)?;
                match (unary.op, value) {
                    (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
                    (UnaryOp::Negate, Value::Number(n)) => Ok(Value::Number(-n)),
                    (op, other) => Err(type_mismatch(op.as_str(), other.value_type(), None)),
                }
            }
            Expr::Binary(binary) => self.eval_binary(binary),
            Expr::FunctionCall(call) => self.eval_call(call),
        }
    }

    fn eval_binary(&self, binary: &BinaryExpr) -> Result<Value, FormulaError> {
        let op = binary.op;
        if matches!(op, BinaryOp::And | BinaryOp::Or) {
            let left = match self.eval_expr(&binary.left)? {
                Value::Bool(b) => b,
                other => return Err(type_mismatch(op.as_str(), other.value_type(), None)),
            };
            if (op == BinaryOp::And && !left) || (op == BinaryOp::Or && left) {
                return Ok(Value::Bool(left));
            }
            return match self.eval_expr(&binary.right)? {
                Value::Bool(b) => Ok(Value::Bool(b)),
                other => Err(type_mismatch(
                    op.as_str(),
                    ValueType::Boolean,
                    Some(other.value_type()),
                )),
            };
        }

        let left = self.eval_expr(&binary.left)?;
        let right = self.eval_expr(&binary.right)?;
        let mismatch = |l: &Value, r: &Value| {
            type_mismatch(op.as_str(), l.value_type(), Some(r.value_type()))
        };

        match op {
            BinaryOp::Eq | BinaryOp::Ne => {
                if left.value_type() != right.value_type() {
                    return Err(mismatch(&left, &right));
                }
                Ok(Value::Bool((left == right) == (op == BinaryOp::Eq)))
            }
            BinaryOp::Lt | BinaryOp::Gt | BinaryOp::Le | BinaryOp::Ge => {
                let ord = match (&left, &right) {
                    (Value::Number(a), Value::Number(b)) => a.partial_cmp(b),
                    (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
                    _ => return Err(mismatch(&left, &right)),
                };
                // Both operands are finite, so `partial_cmp` always succeeds.
                let ord = ord.unwrap_or(Ordering::Equal);
                Ok(Value::Bool(match op {
                    BinaryOp::Lt => ord == Ordering::Less,
                    BinaryOp::Gt => ord == Ordering::Greater,
                    BinaryOp::Le => ord != Ordering::Greater,
                    _ => ord != Ordering::Less,
                }))
            }
            BinaryOp::Add => match (&left, &right) {
                (Value::Number(a), Value::Number(b)) => finite("+", a + b).map(Value::Number),
                (Value::Text(a), Value::Text(b)) => Ok(Value::Text(format!("{a}{b}"))),
                _ => Err(mismatch(&left, &right)),
            },
            BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod | BinaryOp::Pow => {
                let (Value::Number(a), Value::Number(b)) = (&left, &right) else {
                    return Err(mismatch(&left, &right));
                };
                let (a, b) = (*a, *b);
                let out = match op {
                    BinaryOp::Sub => a - b,
                    BinaryOp::Mul => a * b,
                    BinaryOp::Pow => a.powf(b),
                    BinaryOp::Div | BinaryOp::Mod if b == 0.0 => {
                        return Err(FormulaError::DivisionByZero {
                            op: op.as_str().to_string(),
                        });
                    }
                    BinaryOp::Div => a / b,
                    _ => a % b,
                };
                finite(op.as_str(), out).map(Value::Number)
            }
            BinaryOp::And | BinaryOp::Or => Err(mismatch(&left, &right)),
        }
    }

    fn eval_call(&self, call: &FunctionCall) -> Result<Value, FormulaError> {
        let Some(builtin) = Builtin::lookup(&call.name) else {
            return Err(FormulaError::UnknownFunction {
                name: call.name.clone(),
            });
        };
        match builtin {
            Builtin::If => {
                let [cond, then, otherwise] = call.args.as_slice() else {
                    return Err(super::functions::arity("if", "3", call.args.len()));
                };
                match self.eval_expr(cond)? {
                    Value::Bool(true) => self.eval_expr(then),
                    Value::Bool(false) => self.eval_expr(otherwise),
                    other => Err(type_mismatch("if", other.value_type(), None)),
                }
            }
            Builtin::Aggregate(aggregate) => {
                let [arg] = call.args.as_slice() else {
                    return Err(super::functions::arity(
                        aggregate.name(),
                        "1",
                        call.args.len(),
                    ));
                };
                let Expr::Path(path) = arg else {
                    let value = self.eval_expr(arg)?;
                    return Err(type_mismatch(aggregate.name(), value.value_type(), None));
                };
                self.eval_aggregate(aggregate, path)
            }
            Builtin::Numeric(function) => {
                let args = call
                    .args
                    .iter()
                    .map(|arg| self.eval_expr(arg))
                    .collect::<Result<Vec<_>, _>>()?;
                function.apply(&args)
            }
        }
    }

    fn eval_aggregate(
        &self,
        aggregate: Aggregate,
        path: &PropertyPath,
    ) -> Result<Value, FormulaError> {
        let mut budget = IterationBudget::new(self.limits.max_array_iterations);
        let items = if path.has_wildcard() {
            self.resolve_projection(path, &mut budget)?
        } else {
            match self.resolve(path)? {
                EntityValue::List(items) => {
                    let capacity = items.len().min(self.limits.max_array_iterations);
                    let mut out = Vec::with_capacity(capacity);
                    for item in items {
                        budget.visit()?;
                        out.push(item);
                    }
                    out
                }
                other => return Err(type_mismatch(aggregate.name(), other.value_type(), None)),
            }
        };

        match aggregate {
            Aggregate::Count => Ok(Value::Number(items.len() as f64)),
            Aggregate::Sum => {
                let mut total = 0.0;
                for item in items {
                    match item {
                        EntityValue::Number(n) => total += n,
                        other => return Err(type_mismatch("sum", other.value_type(), None)),
                    }
                }
                finite("sum", total).map(Value::Number)
            }
        }
    }

    fn eval_path(&self, path: &PropertyPath) -> Result<Value, FormulaError> {
        if path.has_wildcard() {
            let mut budget = IterationBudget::new(self.limits.max_array_iterations);
            self.resolve_projection(path, &mut budget)?;
            return Err(FormulaError::NotAScalar {
                path: path.to_string(),
                found: ValueType::List,
            });
        }
        let value = self.resolve(path)?;
        match value.to_scalar() {
            Some(Value::Number(n)) if !n.is_finite() => Err(FormulaError::NonFiniteResult {
                op: format!("@{path}"),
            }),
            Some(scalar) => Ok(scalar),
            None => Err(FormulaError::NotAScalar {
                path: path.to_string(),
                found: value.value_type(),
            }),
        }
    }

    /// Resolve a path without wildcards to the single value it addresses.
    fn resolve(&self, path: &PropertyPath) -> Result<&'a EntityValue, FormulaError> {
        guard_path(path)?;
        let mut current: Option<&'a EntityValue> = None;
        for (idx, segment) in path.segments.iter().enumerate() {
            let next = match current {
                None => self.root(segment),
                Some(value) => step(value, segment),
            };
            current = Some(next.ok_or_else(|| missing(path, idx))?);
        }
        current.ok_or_else(|| missing(path, 0))
    }

    /// Resolve a path containing `[]`, returning every value it projects to.
    fn resolve_projection(
        &self,
        path: &PropertyPath,
        budget: &mut IterationBudget,
    ) -> Result<Vec<&'a EntityValue>, FormulaError> {
        guard_path(path)?;
        let Some((first, rest)) = path.segments.split_first() else {
            return Err(missing(path, 0));
        };
        let root = self.root(first).ok_or_else(|| missing(path, 0))?;
        let mut frontier = vec![root];

        for (offset, segment) in rest.iter().enumerate() {
            let idx = offset + 1;
            let mut next = Vec::with_capacity(frontier.len());
            for value in frontier {
                match (segment, value) {
                    (PathSegment::Wildcard, EntityValue::List(items)) => {
                        for item in items {
                            budget.visit()?;
                            next.push(item);
                        }
                    }
                    (PathSegment::Wildcard, other) => {
                        return Err(type_mismatch("[]", other.value_type(), None));
                    }
                    (segment, value) => {
                        next.push(step(value, segment).ok_or_else(|| missing(path, idx))?);
                    }
                }
            }
            frontier = next;
        }
        Ok(frontier)
    }

    fn root(&self, segment: &PathSegment) -> Option<&'a EntityValue> {
        match segment {
            PathSegment::Field(name) => lookup(self.context, name),
            PathSegment::Index(_) | PathSegment::Wildcard => None,
        }
    }
}

fn step<'v>(value: &'v EntityValue, segment: &PathSegment) -> Option<&'v EntityValue> {
    match segment {
        PathSegment::Field(name) => value.field(name),
        PathSegment::Index(idx) => value.index(*idx),
        PathSegment::Wildcard => None,
    }
}

fn guard_path(path: &PropertyPath) -> Result<(), FormulaError> {
    for segment in &path.segments {
        if let PathSegment::Field(name) = segment {
            if is_blocked_property_name(name) {
                log::warn!("rejected blocked property name `{name}` during evaluation");
                return Err(FormulaError::PrototypePollutionAttempt {
                    segment: name.clone(),
                    position: None,
                });
            }
        }
    }
    Ok(())
}

fn missing(path: &PropertyPath, idx: usize) -> FormulaError {
    let end = (idx + 1).min(path.segments.len());
    let prefix = PropertyPath::new(path.segments[..end].iter().cloned());
    FormulaError::UnknownProperty {
        path: path.to_string(),
        missing: prefix.to_string(),
    }
}
