use crate::ast::{Expr, PropertyPath};
use crate::{parser, FormulaError, SecurityLimits};
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// A validated, immutable formula: its source text, its AST and every path it references.
///
/// A `Formula` can only be obtained through parsing, so holding one proves the source passed
/// every parse-time limit and the property-name blocklist.
#[derive(Debug, Clone, PartialEq)]
pub struct Formula {
    source: String,
    ast: Expr,
    referenced_paths: BTreeSet<PropertyPath>,
}

impl Formula {
    pub fn parse(source: &str) -> Result<Self, FormulaError> {
        Self::parse_with_limits(source, &SecurityLimits::standard())
    }

    pub fn parse_with_limits(source: &str, limits: &SecurityLimits) -> Result<Self, FormulaError> {
        let ast = parser::parse_expr(source, limits)?;
        let referenced_paths = ast.collect_paths();
        Ok(Self {
            source: source.to_string(),
            ast,
            referenced_paths,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn ast(&self) -> &Expr {
        &self.ast
    }

    /// Paths referenced anywhere in the formula, including branches that may not be evaluated.
    pub fn referenced_paths(&self) -> &BTreeSet<PropertyPath> {
        &self.referenced_paths
    }
}

impl fmt::Display for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Parsed formulas keyed by their exact source text.
///
/// Failures are cached too, so a formula that was rejected once is rejected again without
/// re-lexing. Every entry was parsed under the limits the cache was created with; a host that
/// needs a different limit profile uses a different cache.
///
/// Entries are never evicted on their own. When a field's source is edited, the host calls
/// [`ParseCache::invalidate`] with the old source (or [`ParseCache::replace`]) so the map
/// tracks the live formulas rather than every revision ever seen.
#[derive(Debug, Default)]
pub struct ParseCache {
    limits: SecurityLimits,
    entries: DashMap<Arc<str>, Result<Arc<Formula>, FormulaError>>,
}

impl ParseCache {
    pub fn new(limits: SecurityLimits) -> Self {
        Self {
            limits,
            entries: DashMap::new(),
        }
    }

    pub fn limits(&self) -> &SecurityLimits {
        &self.limits
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get_or_parse(&self, source: &str) -> Result<Arc<Formula>, FormulaError> {
        if let Some(hit) = self.entries.get(source) {
            return hit.value().clone();
        }
        log::debug!("parse cache miss ({} bytes)", source.len());
        let parsed = Formula::parse_with_limits(source, &self.limits).map(Arc::new);
        self.entries
            .entry(Arc::from(source))
            .or_insert(parsed)
            .clone()
    }

    /// Drop the entry for `old` and parse `new` in its place.
    pub fn replace(&self, old: &str, new: &str) -> Result<Arc<Formula>, FormulaError> {
        if old != new {
            self.invalidate(old);
        }
        self.get_or_parse(new)
    }

    /// Drop the entry for `source`. Returns whether one was present.
    pub fn invalidate(&self, source: &str) -> bool {
        self.entries.remove(source).is_some()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}
