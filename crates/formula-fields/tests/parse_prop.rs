use formula_fields::ast::{BinaryExpr, BinaryOp, FunctionCall, UnaryExpr, UnaryOp};
use formula_fields::{evaluate, parse, record_from_json, Expr, PathSegment, PropertyPath};
use proptest::prelude::*;
use serde_json::json;

const KEYWORDS: [&str; 5] = ["true", "false", "and", "or", "not"];

fn arb_name() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_]{0,5}"
}

fn arb_path() -> impl Strategy<Value = PropertyPath> {
    let segment = prop_oneof![
        3 => arb_name().prop_map(PathSegment::Field),
        1 => (0u32..8).prop_map(PathSegment::Index),
        1 => Just(PathSegment::Wildcard),
    ];
    (arb_name(), prop::collection::vec(segment, 0..3)).prop_map(|(first, rest)| {
        PropertyPath::new(std::iter::once(PathSegment::Field(first)).chain(rest))
    })
}

fn arb_binary_op() -> impl Strategy<Value = BinaryOp> {
    prop_oneof![
        Just(BinaryOp::Add),
        Just(BinaryOp::Sub),
        Just(BinaryOp::Mul),
        Just(BinaryOp::Div),
        Just(BinaryOp::Mod),
        Just(BinaryOp::Pow),
        Just(BinaryOp::Eq),
        Just(BinaryOp::Ne),
        Just(BinaryOp::Lt),
        Just(BinaryOp::Gt),
        Just(BinaryOp::Le),
        Just(BinaryOp::Ge),
        Just(BinaryOp::And),
        Just(BinaryOp::Or),
    ]
}

/// Expressions of the shape the parser produces: literals are non-negative (a leading `-` is
/// always a unary node) and function names are never keywords.
fn arb_expr() -> impl Strategy<Value = Expr> {
    let leaf = prop_oneof![
        (0u16..4000).prop_map(|n| Expr::Number(f64::from(n) / 4.0)),
        "[a-z ]{0,8}".prop_map(Expr::String),
        any::<bool>().prop_map(Expr::Boolean),
        arb_path().prop_map(Expr::Path),
    ];
    leaf.prop_recursive(4, 32, 3, |inner| {
        prop_oneof![
            (
                prop_oneof![Just(UnaryOp::Not), Just(UnaryOp::Negate)],
                inner.clone()
            )
                .prop_map(|(op, expr)| Expr::Unary(UnaryExpr {
                    op,
                    expr: Box::new(expr),
                })),
            (arb_binary_op(), inner.clone(), inner.clone()).prop_map(|(op, left, right)| {
                Expr::Binary(BinaryExpr {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                })
            }),
            (
                arb_name().prop_filter("keyword", |n| !KEYWORDS.contains(&n.as_str())),
                prop::collection::vec(inner, 0..3)
            )
                .prop_map(|(name, args)| Expr::FunctionCall(FunctionCall { name, args })),
        ]
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn printed_formulas_reparse_to_the_same_ast(expr in arb_expr()) {
        let printed = expr.to_string();
        let reparsed = parse(&printed).map_err(|e| TestCaseError::fail(format!("{printed}: {e}")))?;
        prop_assert_eq!(reparsed.ast(), &expr, "{}", printed);
    }

    #[test]
    fn parsing_is_deterministic(expr in arb_expr()) {
        let printed = expr.to_string();
        let first = parse(&printed);
        let second = parse(&printed);
        prop_assert_eq!(first, second);
    }

    #[test]
    fn evaluation_is_repeatable(expr in arb_expr()) {
        let ctx = record_from_json(json!({
            "a": 1, "b": [1, 2, 3], "c": {"d": "x"}, "e": true,
        }));
        let before = ctx.clone();
        let first = evaluate(&expr, &ctx);
        let second = evaluate(&expr, &ctx);
        prop_assert_eq!(first, second);
        prop_assert_eq!(ctx, before);
    }

    #[test]
    fn arbitrary_input_never_panics(src in "\\PC{0,200}") {
        let _ = parse(&src);
    }

    #[test]
    fn operator_soup_never_panics(src in "[-+*/%^()!<>=&|,.@\\[\\] 0-9a-z'\"]{0,120}") {
        if let Ok(formula) = parse(&src) {
            let _ = evaluate(formula.ast(), &record_from_json(json!({"a": 1})));
        }
    }
}
