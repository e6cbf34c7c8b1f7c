use formula_fields::{
    parse, record_from_json, ErrorKind, Evaluator, Expr, FormulaError, PathSegment, PropertyPath,
    SecurityLimits, Value,
};
use serde_json::json;

/// `(((1)))` with `groups` parentheses; the formula itself is one more level.
fn nested_parens(groups: usize) -> String {
    let mut out = String::new();
    out.extend(std::iter::repeat('(').take(groups));
    out.push('1');
    out.extend(std::iter::repeat(')').take(groups));
    out
}

fn nested_floor_calls(calls: usize) -> String {
    let mut out = String::new();
    for _ in 0..calls {
        out.push_str("floor(");
    }
    out.push('1');
    for _ in 0..calls {
        out.push(')');
    }
    out
}

/// `max(1, 1, ...)`: one call node plus `args` literal nodes.
fn max_call(args: usize) -> String {
    let args = vec!["1"; args].join(", ");
    format!("max({args})")
}

fn numbers(len: usize) -> serde_json::Value {
    json!({ "items": vec![1; len] })
}

#[test]
fn parse_allows_formula_at_10000_chars() {
    let formula = format!("\"{}\"", "a".repeat(9_998));
    assert_eq!(formula.chars().count(), 10_000);
    assert!(parse(&formula).is_ok());
}

#[test]
fn parse_rejects_formula_over_10000_chars() {
    let formula = format!("\"{}\"", "a".repeat(9_999));
    assert_eq!(
        parse(&formula).unwrap_err(),
        FormulaError::CharacterLimitExceeded {
            limit: 10_000,
            actual: 10_001,
        }
    );
}

#[test]
fn length_is_measured_in_characters_not_bytes() {
    let formula = format!("'{}'", "é".repeat(9_998));
    assert!(formula.len() > 10_000);
    assert!(parse(&formula).is_ok());
}

#[test]
fn length_limit_applies_before_tokenizing() {
    // Not a valid token stream, so any other error would mean the lexer ran.
    let formula = "#".repeat(10_001);
    assert_eq!(
        parse(&formula).unwrap_err().kind(),
        ErrorKind::CharacterLimitExceeded
    );
}

#[test]
fn parse_allows_nesting_at_20_levels() {
    assert!(parse(&nested_parens(19)).is_ok());
    assert!(parse(&nested_floor_calls(19)).is_ok());
}

#[test]
fn parse_rejects_nesting_at_21_levels() {
    let err = parse(&nested_parens(20)).unwrap_err();
    assert!(matches!(
        err,
        FormulaError::DepthExceeded {
            limit: 20,
            actual: 21,
            ..
        }
    ));
    assert_eq!(
        parse(&nested_floor_calls(20)).unwrap_err().kind(),
        ErrorKind::DepthExceeded
    );
}

#[test]
fn deep_nesting_far_past_the_limit_fails_without_overflowing() {
    let err = parse(&nested_parens(4_000)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DepthExceeded);
}

#[test]
fn parse_allows_500_nodes() {
    let formula = parse(&max_call(499)).unwrap();
    assert_eq!(formula.ast().node_count(), 500);
}

#[test]
fn parse_rejects_501_nodes() {
    assert!(matches!(
        parse(&max_call(500)).unwrap_err(),
        FormulaError::NodeCountExceeded {
            limit: 500,
            actual: 501,
            ..
        }
    ));
}

#[test]
fn node_limit_bounds_long_flat_chains() {
    let formula = vec!["1"; 400].join(" + ");
    assert_eq!(
        parse(&formula).unwrap_err().kind(),
        ErrorKind::NodeCountExceeded
    );
}

#[test]
fn sum_allows_1000_elements() {
    let ctx = record_from_json(numbers(1_000));
    let formula = parse("sum(@items)").unwrap();
    let limits = SecurityLimits::standard();
    assert_eq!(
        Evaluator::new(&limits, &ctx).eval(formula.ast()),
        Ok(Value::Number(1_000.0))
    );
}

#[test]
fn sum_rejects_1001_elements() {
    let ctx = record_from_json(numbers(1_001));
    let formula = parse("sum(@items)").unwrap();
    let limits = SecurityLimits::standard();
    assert_eq!(
        Evaluator::new(&limits, &ctx).eval(formula.ast()),
        Err(FormulaError::ArrayIterationExceeded {
            limit: 1_000,
            actual: 1_001,
        })
    );
}

#[test]
fn iteration_budget_is_per_aggregate_call() {
    let ctx = record_from_json(numbers(1_000));
    let formula = parse("sum(@items) + count(@items)").unwrap();
    let limits = SecurityLimits::standard();
    assert_eq!(
        Evaluator::new(&limits, &ctx).eval(formula.ast()),
        Ok(Value::Number(2_000.0))
    );
}

#[test]
fn projections_count_toward_the_iteration_budget() {
    let items: Vec<_> = (0..1_001).map(|_| json!({"weight": 1})).collect();
    let ctx = record_from_json(json!({ "items": items }));
    let formula = parse("sum(@items[].weight)").unwrap();
    let limits = SecurityLimits::standard();
    assert_eq!(
        Evaluator::new(&limits, &ctx).eval(formula.ast()).unwrap_err().kind(),
        ErrorKind::ArrayIterationExceeded
    );
}

#[test]
fn blocked_names_are_rejected_at_parse_time() {
    for formula in [
        "@a.__proto__.polluted",
        "@constructor",
        "@a.b.prototype + 1",
        r#"@a["__proto__"]"#,
        "count(@items[].constructor)",
    ] {
        assert_eq!(
            parse(formula).unwrap_err().kind(),
            ErrorKind::PrototypePollutionAttempt,
            "{formula}"
        );
    }
}

#[test]
fn blocked_names_in_host_built_paths_are_rejected_at_evaluation_time() {
    let ctx = record_from_json(json!({"a": {"polluted": 1}}));
    let limits = SecurityLimits::standard();
    for name in formula_fields::BLOCKED_PROPERTY_NAMES {
        let expr = Expr::Path(PropertyPath::new([
            PathSegment::Field("a".into()),
            PathSegment::Field(name.into()),
        ]));
        let err = Evaluator::new(&limits, &ctx).eval(&expr).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PrototypePollutionAttempt);
    }
}

#[test]
fn blocked_context_keys_are_unreachable_even_when_present() {
    let ctx = record_from_json(json!({"__proto__": {"isAdmin": true}}));
    let expr: Expr = serde_json::from_value(json!({
        "Path": {"segments": [{"Field": "__proto__"}, {"Field": "isAdmin"}]}
    }))
    .unwrap();
    let limits = SecurityLimits::standard();
    assert_eq!(
        Evaluator::new(&limits, &ctx).eval(&expr).unwrap_err().kind(),
        ErrorKind::PrototypePollutionAttempt
    );
}

#[test]
fn custom_limits_replace_the_standard_profile() {
    let limits =
        SecurityLimits::from_json(r#"{"maxAstDepth": 2, "maxArrayIterations": 3}"#).unwrap();
    assert!(formula_fields::parse_with_limits("(1)", &limits).is_ok());
    assert!(formula_fields::parse_with_limits("((1))", &limits).is_err());

    let ctx = record_from_json(numbers(4));
    let formula = formula_fields::parse_with_limits("count(@items)", &limits).unwrap();
    assert!(matches!(
        Evaluator::new(&limits, &ctx).eval(formula.ast()),
        Err(FormulaError::ArrayIterationExceeded { limit: 3, actual: 4 })
    ));
}
