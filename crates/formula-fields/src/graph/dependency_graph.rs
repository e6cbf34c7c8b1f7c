use crate::ast::{PathSegment, PropertyPath, Span};
use crate::formula::Formula;
use crate::FormulaError;
use std::collections::BTreeSet;
use std::sync::Arc;

/// A formula together with the entity path its result is stored at.
#[derive(Debug, Clone, PartialEq)]
pub struct ComputedField {
    output: PropertyPath,
    formula: Arc<Formula>,
}

impl ComputedField {
    /// Fails when `output` is empty or contains an index, a wildcard or a blocked name.
    pub fn new(output: PropertyPath, formula: Arc<Formula>) -> Result<Self, FormulaError> {
        if output.segments.is_empty() {
            return Err(FormulaError::syntax("output path is empty", Span::new(0, 0)));
        }
        for segment in &output.segments {
            match segment {
                PathSegment::Field(name) if crate::limits::is_blocked_property_name(name) => {
                    return Err(FormulaError::PrototypePollutionAttempt {
                        segment: name.clone(),
                        position: None,
                    });
                }
                PathSegment::Field(_) => {}
                PathSegment::Index(_) | PathSegment::Wildcard => {
                    return Err(FormulaError::syntax(
                        format!("output path `{output}` must name record fields only"),
                        Span::new(0, 0),
                    ));
                }
            }
        }
        Ok(Self { output, formula })
    }

    pub fn output(&self) -> &PropertyPath {
        &self.output
    }

    pub fn formula(&self) -> &Arc<Formula> {
        &self.formula
    }
}

/// Result of ordering a batch of computed fields.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EvaluationPlan {
    /// Fields that can be evaluated, dependencies first.
    pub order: Vec<usize>,
    /// Fields on a cycle or downstream of one, in declaration order.
    pub blocked: Vec<usize>,
    /// One cycle among `blocked`, first member repeated at the end.
    pub cycle: Option<Vec<usize>>,
}

impl EvaluationPlan {
    pub fn is_acyclic(&self) -> bool {
        self.blocked.is_empty()
    }
}

/// Field-to-field dependencies of one form. Field `A` depends on `B` when a path `A` references
/// overlaps `B`'s output path.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    outputs: Vec<String>,
    /// `precedents[a]`: fields `a` reads from, ascending.
    precedents: Vec<Vec<usize>>,
    /// `dependents[b]`: fields that read from `b`, ascending.
    dependents: Vec<Vec<usize>>,
}

impl DependencyGraph {
    pub fn build(fields: &[ComputedField]) -> Self {
        let mut precedents = vec![Vec::new(); fields.len()];
        let mut dependents = vec![Vec::new(); fields.len()];

        for (a, field) in fields.iter().enumerate() {
            for (b, other) in fields.iter().enumerate() {
                let reads = field
                    .formula
                    .referenced_paths()
                    .iter()
                    .any(|path| path.overlaps(&other.output));
                if reads {
                    precedents[a].push(b);
                    dependents[b].push(a);
                }
            }
        }

        Self {
            outputs: fields.iter().map(|f| f.output.to_string()).collect(),
            precedents,
            dependents,
        }
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    pub fn precedents_of(&self, field: usize) -> &[usize] {
        self.precedents.get(field).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn dependents_of(&self, field: usize) -> &[usize] {
        self.dependents.get(field).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Topological order of every field, or the cycle that prevents one.
    pub fn evaluation_order(&self) -> Result<Vec<usize>, FormulaError> {
        let plan = self.plan();
        match plan.cycle {
            Some(cycle) => Err(self.cycle_error(&cycle)),
            None => Ok(plan.order),
        }
    }

    pub fn plan(&self) -> EvaluationPlan {
        let mut in_degree: Vec<usize> = self.precedents.iter().map(Vec::len).collect();
        let mut ready: BTreeSet<usize> = in_degree
            .iter()
            .enumerate()
            .filter_map(|(idx, &deg)| (deg == 0).then_some(idx))
            .collect();

        let mut order = Vec::with_capacity(self.len());
        while let Some(field) = ready.pop_first() {
            order.push(field);
            for &dep in &self.dependents[field] {
                let deg = &mut in_degree[dep];
                *deg = deg.saturating_sub(1);
                if *deg == 0 {
                    ready.insert(dep);
                }
            }
        }

        let blocked: Vec<usize> = in_degree
            .iter()
            .enumerate()
            .filter_map(|(idx, &deg)| (deg > 0).then_some(idx))
            .collect();

        let cycle = if blocked.is_empty() {
            log::debug!("computed field order: {order:?}");
            None
        } else {
            let cycle = self.find_cycle(&blocked);
            if let Some(cycle) = &cycle {
                log::warn!(
                    "computed fields form a dependency cycle: {}",
                    self.member_names(cycle).join(" -> ")
                );
            }
            cycle
        };

        EvaluationPlan {
            order,
            blocked,
            cycle,
        }
    }

    pub fn cycle_error(&self, cycle: &[usize]) -> FormulaError {
        FormulaError::CircularDependency {
            members: self.member_names(cycle),
        }
    }

    fn member_names(&self, fields: &[usize]) -> Vec<String> {
        fields
            .iter()
            .filter_map(|&idx| self.outputs.get(idx).cloned())
            .collect()
    }

    /// Iterative DFS along precedent edges, restricted to `remaining`.
    fn find_cycle(&self, remaining: &[usize]) -> Option<Vec<usize>> {
        #[derive(Clone, Copy, PartialEq, Eq)]
        enum Color {
            Outside,
            White,
            Gray,
            Black,
        }

        struct Frame<'g> {
            node: usize,
            neighbors: &'g [usize],
            idx: usize,
        }

        let mut color = vec![Color::Outside; self.len()];
        for &node in remaining {
            color[node] = Color::White;
        }

        let mut stack: Vec<usize> = Vec::new();
        let mut pos_in_stack: Vec<Option<usize>> = vec![None; self.len()];

        for &start in remaining {
            if color[start] != Color::White {
                continue;
            }

            let mut frames = vec![Frame {
                node: start,
                neighbors: self.precedents_of(start),
                idx: 0,
            }];
            stack.push(start);
            pos_in_stack[start] = Some(stack.len() - 1);
            color[start] = Color::Gray;

            while let Some(frame) = frames.last_mut() {
                if frame.idx >= frame.neighbors.len() {
                    color[frame.node] = Color::Black;
                    pos_in_stack[frame.node] = None;
                    stack.pop();
                    frames.pop();
                    continue;
                }

                let next = frame.neighbors[frame.idx];
                frame.idx += 1;

                match color[next] {
                    Color::White => {
                        color[next] = Color::Gray;
                        stack.push(next);
                        pos_in_stack[next] = Some(stack.len() - 1);
                        frames.push(Frame {
                            node: next,
                            neighbors: self.precedents_of(next),
                            idx: 0,
                        });
                    }
                    Color::Gray => {
                        let start_idx = pos_in_stack[next].unwrap_or(0);
                        let mut cycle = stack[start_idx..].to_vec();
                        cycle.push(next);
                        return Some(cycle);
                    }
                    Color::Black | Color::Outside => {}
                }
            }
        }

        None
    }
}
