use formula_fields::{
    record_from_json, EntityValue, Engine, ErrorKind, FieldDefinition, FormulaError,
    SecurityLimits, Value,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;

fn sheet() -> formula_fields::EntityRecord {
    record_from_json(json!({
        "level": 5,
        "abilities": {
            "strength": {"value": 16},
            "wisdom": {"value": 13},
        },
        "items": [{"weight": 3}, {"weight": 6}],
    }))
}

#[test]
fn cached_parse_shares_one_formula() {
    let engine = Engine::new();
    let a = engine.parse("@level + 1").unwrap();
    let b = engine.parse("@level + 1").unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(engine.cache().len(), 1);

    assert!(engine.cache().invalidate("@level + 1"));
    let c = engine.parse("@level + 1").unwrap();
    assert!(!Arc::ptr_eq(&a, &c));
    assert_eq!(*a, *c);
}

#[test]
fn validate_does_not_populate_the_cache() {
    let engine = Engine::new();
    assert!(engine.validate("floor(@level / 2)").is_ok());
    assert_eq!(
        engine.validate("floor(@level / 2").unwrap_err().kind(),
        ErrorKind::SyntaxError
    );
    assert!(engine.cache().is_empty());
}

#[test]
fn evaluate_parses_and_runs() {
    let engine = Engine::new();
    assert_eq!(
        engine.evaluate("floor((@abilities.strength.value - 10) / 2)", &sheet()),
        Ok(Value::Number(3.0))
    );
}

#[test]
fn form_pass_orders_fields_and_feeds_results_forward() {
    let engine = Engine::new();
    let fields = [
        FieldDefinition::new("carry.total", "@carry.base + sum(@items[].weight)"),
        FieldDefinition::new(
            "abilities.strength.modifier",
            "floor((@abilities.strength.value - 10) / 2)",
        ),
        FieldDefinition::new("carry.base", "@abilities.strength.modifier * 5"),
    ];
    let eval = engine.evaluate_fields(&fields, &sheet());
    assert_eq!(eval.order, vec![1, 2, 0]);
    assert_eq!(eval.get("abilities.strength.modifier"), Some(&Ok(Value::Number(3.0))));
    assert_eq!(eval.get("carry.base"), Some(&Ok(Value::Number(15.0))));
    assert_eq!(eval.get("carry.total"), Some(&Ok(Value::Number(24.0))));
    assert_eq!(
        eval.context
            .get("carry")
            .and_then(|carry| carry.field("total")),
        Some(&EntityValue::Number(24.0))
    );
}

#[test]
fn failing_field_does_not_abort_siblings() {
    let engine = Engine::new();
    let fields = [
        FieldDefinition::new("broken", "@abilities.undefinedStat.value"),
        FieldDefinition::new("bad_syntax", "1 +"),
        FieldDefinition::new("wisdom_mod", "floor((@abilities.wisdom.value - 10) / 2)"),
        FieldDefinition::new("uses_broken", "@broken + 1"),
    ];
    let eval = engine.evaluate_fields(&fields, &sheet());
    assert_eq!(eval.get("wisdom_mod"), Some(&Ok(Value::Number(1.0))));
    assert_eq!(
        eval.get("broken").unwrap().as_ref().unwrap_err().kind(),
        ErrorKind::UnknownProperty
    );
    assert_eq!(
        eval.get("bad_syntax").unwrap().as_ref().unwrap_err().kind(),
        ErrorKind::SyntaxError
    );
    assert_eq!(
        eval.get("uses_broken").unwrap().as_ref().unwrap_err().kind(),
        ErrorKind::UnknownProperty
    );
    assert_eq!(eval.errors().count(), 3);
}

#[test]
fn cycle_blocks_its_members_and_dependents_only() {
    let engine = Engine::new();
    let fields = [
        FieldDefinition::new("a", "@b + 1"),
        FieldDefinition::new("b", "@a + 1"),
        FieldDefinition::new("c", "@a * 2"),
        FieldDefinition::new("d", "@level"),
    ];
    let eval = engine.evaluate_fields(&fields, &sheet());
    let cycle = FormulaError::CircularDependency {
        members: vec!["a".into(), "b".into(), "a".into()],
    };
    assert_eq!(eval.get("a"), Some(&Err(cycle.clone())));
    assert_eq!(eval.get("b"), Some(&Err(cycle.clone())));
    assert_eq!(eval.get("c"), Some(&Err(cycle)));
    assert_eq!(eval.get("d"), Some(&Ok(Value::Number(5.0))));
    assert_eq!(eval.order, vec![3]);
}

#[test]
fn output_through_a_scalar_is_a_conflict() {
    let engine = Engine::new();
    let fields = [FieldDefinition::new("level.bonus", "1")];
    let eval = engine.evaluate_fields(&fields, &sheet());
    assert!(matches!(
        eval.get("level.bonus"),
        Some(Err(FormulaError::OutputConflict { .. }))
    ));
}

#[test]
fn invalid_output_paths_fail_their_field() {
    let engine = Engine::new();
    let fields = [
        FieldDefinition::new("items[0]", "1"),
        FieldDefinition::new("a.__proto__", "1"),
        FieldDefinition::new("ok", "1"),
    ];
    let eval = engine.evaluate_fields(&fields, &sheet());
    assert_eq!(
        eval.get("items[0]").unwrap().as_ref().unwrap_err().kind(),
        ErrorKind::SyntaxError
    );
    assert_eq!(
        eval.get("a.__proto__").unwrap().as_ref().unwrap_err().kind(),
        ErrorKind::PrototypePollutionAttempt
    );
    assert_eq!(eval.get("ok"), Some(&Ok(Value::Number(1.0))));
}

#[test]
fn input_context_is_left_untouched() {
    let engine = Engine::new();
    let ctx = sheet();
    let before = ctx.clone();
    engine.evaluate_fields(&[FieldDefinition::new("level", "@level + 1")], &ctx);
    assert_eq!(ctx, before);
}

#[test]
fn engine_limits_apply_to_every_formula() {
    let engine = Engine::with_limits(SecurityLimits {
        max_node_count: 3,
        ..SecurityLimits::standard()
    });
    assert_eq!(engine.limits().max_node_count, 3);
    assert!(engine.evaluate("1 + 2", &sheet()).is_ok());
    assert_eq!(
        engine.evaluate("1 + 2 + 3", &sheet()).unwrap_err().kind(),
        ErrorKind::NodeCountExceeded
    );
}
