use crate::ast::{PathSegment, PropertyPath, Span};
use crate::eval::Evaluator;
use crate::formula::{Formula, ParseCache};
use crate::graph::{ComputedField, DependencyGraph};
use crate::value::{EntityRecord, EntityValue, Value};
use crate::{parser, FormulaError, SecurityLimits};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// One computed field as declared in a form definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FieldDefinition {
    /// Where the result is stored, e.g. `abilities.strength.modifier`.
    pub output: String,
    pub formula: String,
}

impl FieldDefinition {
    pub fn new(output: impl Into<String>, formula: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            formula: formula.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldResult {
    pub output: String,
    pub result: Result<Value, FormulaError>,
}

/// Outcome of evaluating every computed field on a form.
#[derive(Debug, Clone, PartialEq)]
pub struct FormEvaluation {
    /// Declaration indices in the order they were evaluated.
    pub order: Vec<usize>,
    /// One entry per field, in declaration order.
    pub results: Vec<FieldResult>,
    /// The input context with every successful result written at its output path.
    pub context: EntityRecord,
}

impl FormEvaluation {
    /// Result of the first field declared with `output`.
    pub fn get(&self, output: &str) -> Option<&Result<Value, FormulaError>> {
        self.results
            .iter()
            .find(|r| r.output == output)
            .map(|r| &r.result)
    }

    pub fn errors(&self) -> impl Iterator<Item = (&str, &FormulaError)> {
        self.results.iter().filter_map(|r| match &r.result {
            Ok(_) => None,
            Err(err) => Some((r.output.as_str(), err)),
        })
    }
}

/// Parses, caches and evaluates formulas under one limit profile.
#[derive(Debug, Default)]
pub struct Engine {
    cache: ParseCache,
}

impl Engine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(limits: SecurityLimits) -> Self {
        Self {
            cache: ParseCache::new(limits),
        }
    }

    pub fn limits(&self) -> &SecurityLimits {
        self.cache.limits()
    }

    pub fn cache(&self) -> &ParseCache {
        &self.cache
    }

    /// Parse without touching the cache, for live validation while a formula is being typed.
    pub fn validate(&self, source: &str) -> Result<Formula, FormulaError> {
        Formula::parse_with_limits(source, self.limits())
    }

    pub fn parse(&self, source: &str) -> Result<Arc<Formula>, FormulaError> {
        self.cache.get_or_parse(source)
    }

    pub fn evaluate(&self, source: &str, context: &EntityRecord) -> Result<Value, FormulaError> {
        let formula = self.parse(source)?;
        Evaluator::new(self.limits(), context).eval(formula.ast())
    }

    /// Evaluate all computed fields of a form, dependencies first.
    ///
    /// Each field's result is written into a working copy of `context` before its dependents
    /// run. A field that fails does not stop the others; fields on or downstream of a
    /// dependency cycle fail with [`FormulaError::CircularDependency`]. Whatever the input
    /// held at a failed field's output is removed, so dependents see it as missing.
    pub fn evaluate_fields(
        &self,
        fields: &[FieldDefinition],
        context: &EntityRecord,
    ) -> FormEvaluation {
        let limits = self.limits();
        let mut results: Vec<Option<Result<Value, FormulaError>>> = vec![None; fields.len()];
        let mut computed = Vec::with_capacity(fields.len());
        let mut declared_at = Vec::with_capacity(fields.len());
        // Outputs whose input values must not leak to dependents.
        let mut stale = Vec::new();

        for (idx, def) in fields.iter().enumerate() {
            let output = match parser::parse_path(&def.output, limits) {
                Ok(output) => output,
                Err(err) => {
                    results[idx] = Some(Err(err));
                    continue;
                }
            };
            let field = self
                .parse(&def.formula)
                .and_then(|formula| ComputedField::new(output.clone(), formula));
            match field {
                Ok(field) => {
                    computed.push(field);
                    declared_at.push(idx);
                }
                Err(err) => {
                    stale.push(output);
                    results[idx] = Some(Err(err));
                }
            }
        }

        let graph = DependencyGraph::build(&computed);
        let plan = graph.plan();
        let mut working = context.clone();
        let mut order = Vec::with_capacity(plan.order.len());

        stale.extend(plan.blocked.iter().map(|&node| computed[node].output().clone()));
        for output in &stale {
            remove_output(&mut working, output);
        }

        for &node in &plan.order {
            let field = &computed[node];
            let idx = declared_at[node];
            order.push(idx);

            let evaluated = Evaluator::new(limits, &working).eval(field.formula().ast());
            let result = evaluated.and_then(|value| {
                write_output(&mut working, field.output(), value.clone().into())?;
                Ok(value)
            });
            if let Err(err) = &result {
                log::debug!("computed field `{}` failed: {err}", field.output());
                remove_output(&mut working, field.output());
            }
            results[idx] = Some(result);
        }

        if let Some(cycle) = &plan.cycle {
            let err = graph.cycle_error(cycle);
            for &node in &plan.blocked {
                results[declared_at[node]] = Some(Err(err.clone()));
            }
        }

        let results = fields
            .iter()
            .zip(results)
            .map(|(def, result)| FieldResult {
                output: def.output.clone(),
                // Every slot is filled above; a gap would mean a field was never planned.
                result: result.unwrap_or_else(|| {
                    Err(FormulaError::CircularDependency {
                        members: vec![def.output.clone()],
                    })
                }),
            })
            .collect();

        FormEvaluation {
            order,
            results,
            context: working,
        }
    }
}

fn field_name<'p>(
    output: &PropertyPath,
    segment: &'p PathSegment,
) -> Result<&'p str, FormulaError> {
    match segment {
        PathSegment::Field(name) => Ok(name),
        PathSegment::Index(_) | PathSegment::Wildcard => Err(FormulaError::syntax(
            format!("output path `{output}` must name record fields only"),
            Span::new(0, 0),
        )),
    }
}

/// Store `value` at `output`, creating intermediate records as needed.
fn write_output(
    root: &mut EntityRecord,
    output: &PropertyPath,
    value: EntityValue,
) -> Result<(), FormulaError> {
    let Some((last, parents)) = output.segments.split_last() else {
        return Err(FormulaError::syntax("output path is empty", Span::new(0, 0)));
    };
    let mut current = root;
    for (depth, segment) in parents.iter().enumerate() {
        let name = field_name(output, segment)?;
        let slot = current
            .entry(name.to_string())
            .or_insert_with(|| EntityValue::Record(EntityRecord::new()));
        current = match slot {
            EntityValue::Record(record) => record,
            other => {
                let blocking = PropertyPath::new(output.segments[..=depth].iter().cloned());
                return Err(FormulaError::OutputConflict {
                    output: output.to_string(),
                    blocking: blocking.to_string(),
                    found: other.value_type(),
                });
            }
        };
    }
    current.insert(field_name(output, last)?.to_string(), value);
    Ok(())
}

fn remove_output(root: &mut EntityRecord, output: &PropertyPath) {
    let Some((last, parents)) = output.segments.split_last() else {
        return;
    };
    let mut current = root;
    for segment in parents {
        let PathSegment::Field(name) = segment else {
            return;
        };
        match current.get_mut(name.as_str()) {
            Some(EntityValue::Record(record)) => current = record,
            _ => return,
        }
    }
    if let PathSegment::Field(name) = last {
        current.remove(name.as_str());
    }
}
