//! SPARQL query results

use super::EngineResult;
use futures::future::BoxFuture;
use oxrdf::{Quad, Term, Variable};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;

/// Boxed iterator of solutions
pub type SolutionIter = Box<dyn Iterator<Item = EngineResult<QuerySolution>> + Send>;

/// Boxed iterator of quads
pub type QuadIter = Box<dyn Iterator<Item = EngineResult<Quad>> + Send>;

/// Shape of a result that produces data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultKind {
    /// Variable bindings (SELECT, ASK)
    Bindings,
    /// RDF quads (CONSTRUCT, DESCRIBE)
    Quads,
}

/// Query solution (variable bindings)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuerySolution {
    /// Variable → RDF term bindings
    bindings: HashMap<Variable, Term>,
}

impl QuerySolution {
    /// Create a new empty query solution
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a binding
    pub fn get(&self, variable: &Variable) -> Option<&Term> {
        self.bindings.get(variable)
    }

    /// Check whether a variable is bound
    pub fn contains(&self, variable: &Variable) -> bool {
        self.bindings.contains_key(variable)
    }

    /// Add or replace a binding
    pub fn bind(&mut self, variable: Variable, term: Term) {
        self.bindings.insert(variable, term);
    }

    /// Bind `variable` unless it is already bound to a different term.
    /// Returns `false` on conflict.
    pub fn bind_checked(&mut self, variable: &Variable, term: Term) -> bool {
        match self.bindings.get(variable) {
            Some(existing) => existing == &term,
            None => {
                self.bindings.insert(variable.clone(), term);
                true
            }
        }
    }

    /// Iterate over the bindings in no particular order
    pub fn iter(&self) -> impl Iterator<Item = (&Variable, &Term)> {
        self.bindings.iter()
    }

    /// Number of bound variables
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Check if no variable is bound
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Two solutions are compatible when every shared variable has the same value
    pub fn is_compatible(&self, other: &QuerySolution) -> bool {
        let (small, large) = if self.len() <= other.len() {
            (self, other)
        } else {
            (other, self)
        };
        small
            .bindings
            .iter()
            .all(|(variable, term)| large.get(variable).map_or(true, |t| t == term))
    }

    /// Check if the two solutions bind at least one common variable
    pub fn shares_variable_with(&self, other: &QuerySolution) -> bool {
        self.bindings.keys().any(|variable| other.contains(variable))
    }

    /// Union of two compatible solutions
    pub fn merge(&self, other: &QuerySolution) -> QuerySolution {
        let mut merged = self.clone();
        for (variable, term) in &other.bindings {
            merged
                .bindings
                .entry(variable.clone())
                .or_insert_with(|| term.clone());
        }
        merged
    }

    /// Keep only the given variables
    pub fn project(&self, variables: &[Variable]) -> QuerySolution {
        let bindings = variables
            .iter()
            .filter_map(|variable| {
                self.bindings
                    .get(variable)
                    .map(|term| (variable.clone(), term.clone()))
            })
            .collect();
        QuerySolution { bindings }
    }

    /// Order-independent identity of the solution, used for DISTINCT
    pub fn canonical(&self) -> Vec<(Variable, Term)> {
        let mut entries: Vec<(Variable, Term)> = self
            .bindings
            .iter()
            .map(|(variable, term)| (variable.clone(), term.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.as_str().cmp(b.0.as_str()));
        entries
    }
}

/// Lazily evaluated SELECT solutions
pub struct SolutionStream {
    variables: Vec<Variable>,
    iter: SolutionIter,
}

impl SolutionStream {
    /// Wrap an iterator of solutions over the given projected variables
    pub fn new(
        variables: Vec<Variable>,
        iter: impl Iterator<Item = EngineResult<QuerySolution>> + Send + 'static,
    ) -> Self {
        Self {
            variables,
            iter: Box::new(iter),
        }
    }

    /// Projected variables, in SELECT order
    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }
}

impl Iterator for SolutionStream {
    type Item = EngineResult<QuerySolution>;

    fn next(&mut self) -> Option<Self::Item> {
        self.iter.next()
    }
}

impl fmt::Debug for SolutionStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SolutionStream")
            .field("variables", &self.variables)
            .finish_non_exhaustive()
    }
}

/// Bindings-shaped result
#[derive(Debug)]
pub enum BindingsResult {
    /// Solutions from a SELECT query
    Solutions(SolutionStream),
    /// Answer of an ASK query
    Boolean(bool),
}

/// Lazily evaluated CONSTRUCT / DESCRIBE output
pub struct QuadStream {
    iter: QuadIter,
}

impl QuadStream {
    /// Wrap an iterator of quads
    pub fn new(iter: impl Iterator<Item = EngineResult<Quad>> + Send + 'static) -> Self {
        Self {
            iter: Box::new(iter),
        }
    }
}

impl Iterator for QuadStream {
    type Item = EngineResult<Quad>;

    fn next(&mut self) -> Option<Self::Item> {
        self.iter.next()
    }
}

impl fmt::Debug for QuadStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuadStream").finish_non_exhaustive()
    }
}

/// An update that has been parsed but not applied yet
///
/// Nothing touches the store until [`PendingUpdate::execute`] is awaited;
/// dropping the value discards the update.
pub struct PendingUpdate {
    execute: Box<dyn FnOnce() -> BoxFuture<'static, EngineResult<()>> + Send>,
}

impl PendingUpdate {
    /// Wrap the deferred mutation
    pub fn new<F, Fut>(execute: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = EngineResult<()>> + Send + 'static,
    {
        Self {
            execute: Box::new(move || Box::pin(execute())),
        }
    }

    /// Apply the update to the store
    pub async fn execute(self) -> EngineResult<()> {
        (self.execute)().await
    }
}

impl fmt::Debug for PendingUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingUpdate").finish_non_exhaustive()
    }
}

/// Result of submitting an operation to a query engine
#[derive(Debug)]
pub enum QueryResult {
    /// SELECT / ASK
    Bindings(BindingsResult),
    /// CONSTRUCT / DESCRIBE
    Quads(QuadStream),
    /// Update operation, not yet applied
    Void(PendingUpdate),
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxrdf::{Literal, NamedNode};

    fn var(name: &str) -> Variable {
        Variable::new_unchecked(name)
    }

    fn iri(value: &str) -> Term {
        NamedNode::new_unchecked(value).into()
    }

    #[test]
    fn test_query_solution() {
        let mut solution = QuerySolution::new();
        assert!(solution.is_empty());

        solution.bind(var("s"), iri("http://example.org/a"));
        assert_eq!(solution.get(&var("s")), Some(&iri("http://example.org/a")));
        assert!(solution.bind_checked(&var("s"), iri("http://example.org/a")));
        assert!(!solution.bind_checked(&var("s"), iri("http://example.org/b")));
        assert!(solution.bind_checked(&var("o"), Literal::new_simple_literal("x").into()));
        assert_eq!(solution.len(), 2);
    }

    #[test]
    fn test_compatibility_and_merge() {
        let mut left = QuerySolution::new();
        left.bind(var("s"), iri("http://example.org/a"));
        left.bind(var("p"), iri("http://example.org/p"));

        let mut right = QuerySolution::new();
        right.bind(var("s"), iri("http://example.org/a"));
        right.bind(var("o"), iri("http://example.org/o"));

        assert!(left.is_compatible(&right));
        assert!(left.shares_variable_with(&right));
        let merged = left.merge(&right);
        assert_eq!(merged.len(), 3);

        let mut other = QuerySolution::new();
        other.bind(var("s"), iri("http://example.org/z"));
        assert!(!left.is_compatible(&other));

        let projected = merged.project(&[var("o"), var("missing")]);
        assert_eq!(projected.len(), 1);
    }

    #[test]
    fn test_canonical_ignores_insertion_order() {
        let mut a = QuerySolution::new();
        a.bind(var("x"), iri("http://example.org/1"));
        a.bind(var("y"), iri("http://example.org/2"));
        let mut b = QuerySolution::new();
        b.bind(var("y"), iri("http://example.org/2"));
        b.bind(var("x"), iri("http://example.org/1"));
        assert_eq!(a.canonical(), b.canonical());
    }

    #[tokio::test]
    async fn test_pending_update_runs_only_when_executed() {
        let flag = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let seen = std::sync::Arc::clone(&flag);
        let pending = PendingUpdate::new(move || async move {
            seen.store(true, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        });

        assert!(!flag.load(std::sync::atomic::Ordering::SeqCst));
        pending.execute().await.unwrap();
        assert!(flag.load(std::sync::atomic::Ordering::SeqCst));
    }
}
