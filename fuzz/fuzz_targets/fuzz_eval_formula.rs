#![no_main]

use libfuzzer_sys::fuzz_target;

use formula_fields::{record_from_json, Engine, FieldDefinition, Value};

/// Keep evaluation fuzzing bounded: we want to exercise many inputs quickly.
const MAX_EVAL_FORMULA_CHARS: usize = 2_048;
const MAX_INPUT_BYTES: usize = MAX_EVAL_FORMULA_CHARS * 4; // max UTF-8 bytes per char

fn truncate_to_chars(s: &str, max_chars: usize) -> &str {
    let mut count = 0usize;
    for (idx, _) in s.char_indices() {
        if count == max_chars {
            return &s[..idx];
        }
        count += 1;
    }
    s
}

fuzz_target!(|data: &[u8]| {
    let data = if data.len() > MAX_INPUT_BYTES {
        &data[..MAX_INPUT_BYTES]
    } else {
        data
    };
    let input = String::from_utf8_lossy(data);
    let source = truncate_to_chars(&input, MAX_EVAL_FORMULA_CHARS);

    let ctx = record_from_json(serde_json::json!({
        "level": 5,
        "name": "Mira",
        "inspired": true,
        "abilities": {"strength": {"value": 16}, "dexterity": {"value": 9}},
        "items": [{"weight": 3}, {"weight": 6}, {"weight": 0.5}],
        "scores": (0..1_200).collect::<Vec<u32>>(),
        "tags": ["elf", "wizard"],
    }));

    let engine = Engine::new();
    if let Ok(Value::Number(n)) = engine.evaluate(source, &ctx) {
        assert!(n.is_finite(), "non-finite result for `{source}`");
    }

    // Split on `;` into computed fields `f0`, `f1`, ... so fields can reference each other.
    let fields: Vec<FieldDefinition> = source
        .split(';')
        .take(8)
        .enumerate()
        .map(|(idx, formula)| FieldDefinition::new(format!("f{idx}"), formula))
        .collect();
    let before = ctx.clone();
    let eval = engine.evaluate_fields(&fields, &ctx);
    assert_eq!(eval.results.len(), fields.len());
    assert_eq!(ctx, before);
});
