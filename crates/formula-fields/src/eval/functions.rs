//! Built-in function table.

use crate::value::{Value, ValueType};
use crate::FormulaError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Builtin {
    Numeric(NumericFunction),
    Aggregate(Aggregate),
    If,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NumericFunction {
    Floor,
    Ceil,
    Round,
    Abs,
    Sqrt,
    Min,
    Max,
}

/// Functions whose single argument is a property path resolving to a list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Aggregate {
    Sum,
    Count,
}

impl Builtin {
    /// Case-insensitive lookup.
    pub(crate) fn lookup(name: &str) -> Option<Self> {
        const TABLE: [(&str, Builtin); 10] = [
            ("floor", Builtin::Numeric(NumericFunction::Floor)),
            ("ceil", Builtin::Numeric(NumericFunction::Ceil)),
            ("round", Builtin::Numeric(NumericFunction::Round)),
            ("abs", Builtin::Numeric(NumericFunction::Abs)),
            ("sqrt", Builtin::Numeric(NumericFunction::Sqrt)),
            ("min", Builtin::Numeric(NumericFunction::Min)),
            ("max", Builtin::Numeric(NumericFunction::Max)),
            ("sum", Builtin::Aggregate(Aggregate::Sum)),
            ("count", Builtin::Aggregate(Aggregate::Count)),
            ("if", Builtin::If),
        ];
        TABLE
            .iter()
            .find(|(candidate, _)| candidate.eq_ignore_ascii_case(name))
            .map(|(_, builtin)| *builtin)
    }
}

impl Aggregate {
    pub(crate) fn name(self) -> &'static str {
        match self {
            Aggregate::Sum => "sum",
            Aggregate::Count => "count",
        }
    }
}

impl NumericFunction {
    pub(crate) fn name(self) -> &'static str {
        match self {
            NumericFunction::Floor => "floor",
            NumericFunction::Ceil => "ceil",
            NumericFunction::Round => "round",
            NumericFunction::Abs => "abs",
            NumericFunction::Sqrt => "sqrt",
            NumericFunction::Min => "min",
            NumericFunction::Max => "max",
        }
    }

    pub(crate) fn apply(self, args: &[Value]) -> Result<Value, FormulaError> {
        let name = self.name();
        let out = match self {
            NumericFunction::Floor | NumericFunction::Ceil | NumericFunction::Abs => {
                let [x] = args else {
                    return Err(arity(name, "1", args.len()));
                };
                let x = number_arg(name, x)?;
                match self {
                    NumericFunction::Floor => x.floor(),
                    NumericFunction::Ceil => x.ceil(),
                    _ => x.abs(),
                }
            }
            NumericFunction::Sqrt => {
                let [x] = args else {
                    return Err(arity(name, "1", args.len()));
                };
                // `f64::sqrt` of a negative is NaN, rejected below.
                number_arg(name, x)?.sqrt()
            }
            NumericFunction::Round => match args {
                [x] => number_arg(name, x)?.round(),
                [x, places] => {
                    let x = number_arg(name, x)?;
                    let places = number_arg(name, places)?;
                    if places.fract() != 0.0 || !(0.0..=15.0).contains(&places) {
                        return Err(FormulaError::InvalidArgument {
                            function: name.to_string(),
                            reason: format!(
                                "decimal places must be a whole number from 0 to 15, got {places}"
                            ),
                        });
                    }
                    round_to(x, places as i32)
                }
                _ => return Err(arity(name, "1 or 2", args.len())),
            },
            NumericFunction::Min | NumericFunction::Max => {
                let Some((first, rest)) = args.split_first() else {
                    return Err(arity(name, "at least 1", 0));
                };
                let mut acc = number_arg(name, first)?;
                for arg in rest {
                    let n = number_arg(name, arg)?;
                    acc = if self == NumericFunction::Min {
                        acc.min(n)
                    } else {
                        acc.max(n)
                    };
                }
                acc
            }
        };
        finite(name, out).map(Value::Number)
    }
}

/// Round half away from zero to `places` decimal places.
fn round_to(x: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    let scaled = x * factor;
    // Past 2^52 every f64 is already an integer at this scale.
    if !scaled.is_finite() || scaled.abs() >= 4_503_599_627_370_496.0 {
        return x;
    }
    scaled.round() / factor
}

pub(crate) fn number_arg(function: &str, value: &Value) -> Result<f64, FormulaError> {
    match value {
        Value::Number(n) => Ok(*n),
        other => Err(FormulaError::TypeMismatch {
            op: function.to_string(),
            left: other.value_type(),
            right: None,
        }),
    }
}

pub(crate) fn arity(function: &str, expected: &str, actual: usize) -> FormulaError {
    FormulaError::ArgumentCount {
        function: function.to_string(),
        expected: expected.to_string(),
        actual,
    }
}

/// Reject NaN and infinities produced by `op`.
pub(crate) fn finite(op: &str, value: f64) -> Result<f64, FormulaError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(FormulaError::NonFiniteResult { op: op.to_string() })
    }
}

pub(crate) fn type_mismatch(op: &str, left: ValueType, right: Option<ValueType>) -> FormulaError {
    FormulaError::TypeMismatch {
        op: op.to_string(),
        left,
        right,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(f: NumericFunction, args: &[f64]) -> Result<Value, FormulaError> {
        let args: Vec<Value> = args.iter().copied().map(Value::Number).collect();
        f.apply(&args)
    }

    #[test]
    fn lookup_ignores_case() {
        assert_eq!(
            Builtin::lookup("FLOOR"),
            Some(Builtin::Numeric(NumericFunction::Floor))
        );
        assert_eq!(Builtin::lookup("Sum"), Some(Builtin::Aggregate(Aggregate::Sum)));
        assert_eq!(Builtin::lookup("iff"), None);
    }

    #[test]
    fn round_is_half_away_from_zero() {
        assert_eq!(call(NumericFunction::Round, &[2.5]), Ok(Value::Number(3.0)));
        assert_eq!(call(NumericFunction::Round, &[-2.5]), Ok(Value::Number(-3.0)));
        assert_eq!(call(NumericFunction::Round, &[1.25, 1.0]), Ok(Value::Number(1.3)));
        assert_eq!(call(NumericFunction::Round, &[1e300, 2.0]), Ok(Value::Number(1e300)));
        assert!(matches!(
            call(NumericFunction::Round, &[1.0, 16.0]),
            Err(FormulaError::InvalidArgument { .. })
        ));
        assert!(matches!(
            call(NumericFunction::Round, &[1.0, 0.5]),
            Err(FormulaError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn floor_handles_negative_modifiers() {
        assert_eq!(call(NumericFunction::Floor, &[-0.5]), Ok(Value::Number(-1.0)));
        assert_eq!(call(NumericFunction::Ceil, &[-0.5]), Ok(Value::Number(-0.0)));
    }

    #[test]
    fn sqrt_of_negative_is_rejected() {
        assert_eq!(
            call(NumericFunction::Sqrt, &[-1.0]),
            Err(FormulaError::NonFiniteResult { op: "sqrt".into() })
        );
    }

    #[test]
    fn arity_and_argument_types_are_checked() {
        assert_eq!(
            call(NumericFunction::Abs, &[1.0, 2.0]),
            Err(FormulaError::ArgumentCount {
                function: "abs".into(),
                expected: "1".into(),
                actual: 2,
            })
        );
        assert!(matches!(
            call(NumericFunction::Max, &[]),
            Err(FormulaError::ArgumentCount { actual: 0, .. })
        ));
        assert_eq!(
            NumericFunction::Min.apply(&[Value::Number(1.0), Value::Text("2".into())]),
            Err(FormulaError::TypeMismatch {
                op: "min".into(),
                left: ValueType::Text,
                right: None,
            })
        );
        assert_eq!(call(NumericFunction::Max, &[3.0, 9.0, -1.0]), Ok(Value::Number(9.0)));
    }
}
