#![no_main]

use libfuzzer_sys::fuzz_target;

/// Slightly over the formula length limit so the limit check itself is exercised.
const MAX_FUZZ_FORMULA_CHARS: usize = formula_fields::SecurityLimits::MAX_FORMULA_LENGTH + 256;
const MAX_INPUT_BYTES: usize = MAX_FUZZ_FORMULA_CHARS * 4; // max UTF-8 bytes per char

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
    if data.is_empty() {
        return;
    }

    let data = if data.len() > MAX_INPUT_BYTES {
        &data[..MAX_INPUT_BYTES]
    } else {
        data
    };

    // Accept arbitrary bytes as input; treat invalid UTF-8 lossy.
    let input = String::from_utf8_lossy(data);
    let source = truncate_to_chars(&input, MAX_FUZZ_FORMULA_CHARS);

    // Small depth/node profiles reach the limit paths with short inputs.
    let limits = match data[0] % 3 {
        0 => formula_fields::SecurityLimits::standard(),
        1 => formula_fields::SecurityLimits {
            max_ast_depth: 3,
            max_node_count: 16,
            ..formula_fields::SecurityLimits::standard()
        },
        _ => formula_fields::SecurityLimits {
            max_ast_depth: 1,
            max_node_count: 1,
            ..formula_fields::SecurityLimits::standard()
        },
    };

    match formula_fields::parse_with_limits(source, &limits) {
        Ok(formula) => {
            assert!(formula.ast().node_count() <= limits.max_node_count);

            // Canonical printing must reparse to the same tree. Escaping can lengthen strings,
            // so only the length limit is relaxed.
            let printed = formula.ast().to_string();
            let relaxed = formula_fields::SecurityLimits {
                max_formula_length: usize::MAX,
                ..limits
            };
            let reparsed = formula_fields::parse_with_limits(&printed, &relaxed)
                .unwrap_or_else(|err| panic!("printed formula `{printed}` failed to parse: {err}"));
            assert_eq!(reparsed.ast(), formula.ast(), "{printed}");
        }
        Err(err) => {
            let _ = err.report().to_json();
        }
    }
});
