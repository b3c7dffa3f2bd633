//! SPARQL query executor
//!
//! Evaluates spargebra algebra against a read snapshot of the quad index.
//! Solutions are produced lazily. Operators that need the whole of an input
//! (ORDER BY, the right side of joins, MINUS) collect it on the first pull
//! rather than when the iterator is built, so that work happens on whichever
//! thread drains the result.

use super::expression::{check_expression, order_terms};
use super::results::{QuadIter, QuadStream, QuerySolution, SolutionIter, SolutionStream};
use super::{EngineError, EngineResult};
use crate::rdf::{QuadIndex, QuadPattern};
use oxrdf::{BlankNode, GraphName, NamedNode, Quad, Subject, Term, Variable};
use spargebra::algebra::{Expression, GraphPattern, OrderExpression, PropertyPathExpression};
use spargebra::term::{GroundTerm, NamedNodePattern, TermPattern, TriplePattern};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::iter;
use std::sync::Arc;

/// Graph that triple patterns are matched against
#[derive(Debug, Clone)]
pub(super) enum ActiveGraph {
    /// The default graph (or the union of all graphs, when configured)
    Default,
    /// A single named graph, inside `GRAPH`
    Named(GraphName),
}

/// SPARQL query executor
#[derive(Clone)]
pub struct SparqlExecutor {
    index: Arc<QuadIndex>,
    union_default_graph: bool,
}

impl SparqlExecutor {
    /// Create a new executor over a snapshot
    pub fn new(index: Arc<QuadIndex>, union_default_graph: bool) -> Self {
        Self {
            index,
            union_default_graph,
        }
    }

    /// Execute a SELECT query
    pub fn execute_select(&self, pattern: &GraphPattern) -> SolutionStream {
        SolutionStream::new(projected_variables(pattern), self.evaluate(pattern))
    }

    /// Execute an ASK query
    pub fn execute_ask(&self, pattern: &GraphPattern) -> EngineResult<bool> {
        self.evaluate(pattern)
            .next()
            .transpose()
            .map(|first| first.is_some())
    }

    /// Execute a CONSTRUCT query
    ///
    /// Blank nodes in the template are minted fresh for every solution.
    pub fn execute_construct(&self, template: Vec<TriplePattern>, pattern: &GraphPattern) -> QuadStream {
        let solutions = self.evaluate(pattern);
        QuadStream::new(solutions.flat_map(move |solution| -> QuadIter {
            match solution {
                Ok(solution) => {
                    let mut blank_nodes = HashMap::new();
                    let quads: Vec<EngineResult<Quad>> = template
                        .iter()
                        .filter_map(|triple| instantiate_triple(triple, &solution, &mut blank_nodes))
                        .map(Ok)
                        .collect();
                    Box::new(quads.into_iter())
                }
                Err(e) => Box::new(iter::once(Err(e))),
            }
        }))
    }

    /// Execute a DESCRIBE query
    ///
    /// Describes every IRI or blank node bound in a solution by the quads
    /// it is the subject of.
    pub fn execute_describe(&self, pattern: &GraphPattern) -> QuadStream {
        let index = Arc::clone(&self.index);
        let graph = self.graph_filter(&ActiveGraph::Default);
        let mut described = HashSet::new();
        let solutions = self.evaluate(pattern);
        QuadStream::new(solutions.flat_map(move |solution| -> QuadIter {
            let solution = match solution {
                Ok(solution) => solution,
                Err(e) => return Box::new(iter::once(Err(e))),
            };
            let resources: Vec<Subject> = solution
                .iter()
                .filter_map(|(_, term)| term_to_subject(term.clone()))
                .filter(|resource| described.insert(resource.clone()))
                .collect();
            let index = Arc::clone(&index);
            let graph = graph.clone();
            Box::new(
                resources
                    .into_iter()
                    .flat_map(move |resource| {
                        QuadIndex::scan(
                            &index,
                            QuadPattern {
                                subject: Some(resource),
                                graph: graph.clone(),
                                ..QuadPattern::default()
                            },
                        )
                    })
                    .map(|quad| Ok(Quad::new(quad.subject, quad.predicate, quad.object, GraphName::DefaultGraph))),
            )
        }))
    }

    /// Evaluate a pattern against the default graph
    pub(super) fn evaluate(&self, pattern: &GraphPattern) -> SolutionIter {
        self.eval(pattern, &ActiveGraph::Default)
    }

    pub(super) fn eval(&self, pattern: &GraphPattern, graph: &ActiveGraph) -> SolutionIter {
        match pattern {
            GraphPattern::Bgp { patterns } => self.eval_bgp(patterns.clone(), graph.clone()),
            GraphPattern::Path {
                subject,
                path,
                object,
            } => self.eval_path(subject.clone(), path.clone(), object.clone(), graph.clone()),
            GraphPattern::Join { left, right } => self.eval_join(left, right, graph),
            GraphPattern::LeftJoin {
                left,
                right,
                expression,
            } => self.eval_left_join(left, right, expression.clone(), graph),
            GraphPattern::Filter { expr, inner } => {
                let this = self.clone();
                let expr = expr.clone();
                let active = graph.clone();
                Box::new(self.eval(inner, graph).filter(move |solution| match solution {
                    Ok(solution) => this.effective_boolean(&expr, solution, &active),
                    Err(_) => true,
                }))
            }
            GraphPattern::Union { left, right } => {
                Box::new(self.eval(left, graph).chain(self.eval(right, graph)))
            }
            GraphPattern::Graph { name, inner } => self.eval_graph(name, inner),
            GraphPattern::Extend {
                inner,
                variable,
                expression,
            } => {
                let this = self.clone();
                let variable = variable.clone();
                let expression = expression.clone();
                let active = graph.clone();
                Box::new(self.eval(inner, graph).map(move |solution| {
                    solution.map(|mut solution| {
                        if let Some(value) = this.eval_expression(&expression, &solution, &active) {
                            solution.bind(variable.clone(), value);
                        }
                        solution
                    })
                }))
            }
            GraphPattern::Minus { left, right } => self.eval_minus(left, right, graph),
            GraphPattern::Values {
                variables,
                bindings,
            } => match values_solutions(variables, bindings) {
                Ok(rows) => Box::new(rows.into_iter().map(Ok)),
                Err(e) => failed(e),
            },
            GraphPattern::OrderBy { inner, expression } => {
                self.eval_order_by(inner, expression.clone(), graph)
            }
            GraphPattern::Project { inner, variables } => {
                let variables = variables.clone();
                Box::new(
                    self.eval(inner, graph)
                        .map(move |solution| solution.map(|s| s.project(&variables))),
                )
            }
            GraphPattern::Distinct { inner } | GraphPattern::Reduced { inner } => {
                let mut seen = HashSet::new();
                Box::new(self.eval(inner, graph).filter(move |solution| match solution {
                    Ok(solution) => seen.insert(solution.canonical()),
                    Err(_) => true,
                }))
            }
            GraphPattern::Slice {
                inner,
                start,
                length,
            } => {
                let solutions = self.eval(inner, graph).skip(*start);
                match length {
                    Some(length) => Box::new(solutions.take(*length)),
                    None => Box::new(solutions),
                }
            }
            other => failed(unsupported_pattern(other)),
        }
    }

    fn eval_bgp(&self, patterns: Vec<TriplePattern>, graph: ActiveGraph) -> SolutionIter {
        let mut solutions: SolutionIter = Box::new(iter::once(Ok(QuerySolution::new())));
        for pattern in patterns {
            let this = self.clone();
            let graph = graph.clone();
            solutions = Box::new(solutions.flat_map(move |solution| -> SolutionIter {
                match solution {
                    Ok(solution) => this.match_triple(&pattern, solution, &graph),
                    Err(e) => failed(e),
                }
            }));
        }
        solutions
    }

    /// Lazily extend `solution` with every way `pattern` matches the active graph
    fn match_triple(&self, pattern: &TriplePattern, solution: QuerySolution, graph: &ActiveGraph) -> SolutionIter {
        let (subject, object) = match (
            term_position(&pattern.subject, &solution),
            term_position(&pattern.object, &solution),
        ) {
            (Ok(subject), Ok(object)) => (subject, object),
            (Err(e), _) | (_, Err(e)) => return failed(e),
        };
        let predicate = predicate_position(&pattern.predicate, &solution);

        let subject_filter = match &subject {
            Position::Bound(term) => match term_to_subject(term.clone()) {
                Some(subject) => Some(subject),
                None => return Box::new(iter::empty()),
            },
            Position::Free(_) => None,
        };
        let predicate_filter = match &predicate {
            Position::Bound(Term::NamedNode(node)) => Some(node.clone()),
            Position::Bound(_) => return Box::new(iter::empty()),
            Position::Free(_) => None,
        };
        let object_filter = match &object {
            Position::Bound(term) => Some(term.clone()),
            Position::Free(_) => None,
        };

        let graph_filter = self.graph_filter(graph);
        // Under a union default graph the same triple may come from several graphs
        let mut seen = graph_filter.is_none().then(HashSet::new);

        let scan = QuadIndex::scan(
            &self.index,
            QuadPattern {
                subject: subject_filter,
                predicate: predicate_filter,
                object: object_filter,
                graph: graph_filter,
            },
        );
        Box::new(scan.filter_map(move |quad| {
            let Quad {
                subject: s,
                predicate: p,
                object: o,
                ..
            } = quad;
            if let Some(seen) = seen.as_mut() {
                if !seen.insert((s.clone(), p.clone(), o.clone())) {
                    return None;
                }
            }
            let mut candidate = solution.clone();
            (unify(&mut candidate, &subject, s.into())
                && unify(&mut candidate, &predicate, p.into())
                && unify(&mut candidate, &object, o))
            .then_some(Ok(candidate))
        }))
    }

    fn eval_join(&self, left: &GraphPattern, right: &GraphPattern, graph: &ActiveGraph) -> SolutionIter {
        let this = self.clone();
        let left = left.clone();
        let right = right.clone();
        let graph = graph.clone();
        deferred(move || {
            let right_solutions = match this.eval(&right, &graph).collect::<EngineResult<Vec<_>>>() {
                Ok(solutions) => Arc::new(solutions),
                Err(e) => return failed(e),
            };
            Box::new(this.eval(&left, &graph).flat_map(move |solution| -> SolutionIter {
                let solution = match solution {
                    Ok(solution) => solution,
                    Err(e) => return failed(e),
                };
                let right_solutions = Arc::clone(&right_solutions);
                Box::new((0..right_solutions.len()).filter_map(move |i| {
                    let candidate = &right_solutions[i];
                    solution
                        .is_compatible(candidate)
                        .then(|| Ok(solution.merge(candidate)))
                }))
            }))
        })
    }

    fn eval_left_join(
        &self,
        left: &GraphPattern,
        right: &GraphPattern,
        expression: Option<Expression>,
        graph: &ActiveGraph,
    ) -> SolutionIter {
        let this = self.clone();
        let left = left.clone();
        let right = right.clone();
        let graph = graph.clone();
        deferred(move || {
            let right_solutions = match this.eval(&right, &graph).collect::<EngineResult<Vec<_>>>() {
                Ok(solutions) => solutions,
                Err(e) => return failed(e),
            };
            let filter = this.clone();
            let active = graph.clone();
            Box::new(this.eval(&left, &graph).flat_map(move |solution| -> SolutionIter {
                let solution = match solution {
                    Ok(solution) => solution,
                    Err(e) => return failed(e),
                };
                let mut extended: Vec<EngineResult<QuerySolution>> = right_solutions
                    .iter()
                    .filter(|candidate| solution.is_compatible(candidate))
                    .map(|candidate| solution.merge(candidate))
                    .filter(|merged| {
                        expression
                            .as_ref()
                            .map_or(true, |e| filter.effective_boolean(e, merged, &active))
                    })
                    .map(Ok)
                    .collect();
                if extended.is_empty() {
                    extended.push(Ok(solution));
                }
                Box::new(extended.into_iter())
            }))
        })
    }

    fn eval_minus(&self, left: &GraphPattern, right: &GraphPattern, graph: &ActiveGraph) -> SolutionIter {
        let this = self.clone();
        let left = left.clone();
        let right = right.clone();
        let graph = graph.clone();
        deferred(move || {
            let right_solutions = match this.eval(&right, &graph).collect::<EngineResult<Vec<_>>>() {
                Ok(solutions) => solutions,
                Err(e) => return failed(e),
            };
            Box::new(this.eval(&left, &graph).filter(move |solution| match solution {
                Ok(solution) => !right_solutions.iter().any(|candidate| {
                    solution.shares_variable_with(candidate) && solution.is_compatible(candidate)
                }),
                Err(_) => true,
            }))
        })
    }

    fn eval_graph(&self, name: &NamedNodePattern, inner: &GraphPattern) -> SolutionIter {
        match name {
            NamedNodePattern::NamedNode(node) => {
                self.eval(inner, &ActiveGraph::Named(GraphName::NamedNode(node.clone())))
            }
            NamedNodePattern::Variable(variable) => {
                let this = self.clone();
                let inner = inner.clone();
                let variable = variable.clone();
                let graphs: Vec<GraphName> = self.index.named_graphs().cloned().collect();
                Box::new(graphs.into_iter().flat_map(move |graph_name| -> SolutionIter {
                    let Some(term) = graph_name_to_term(&graph_name) else {
                        return Box::new(iter::empty());
                    };
                    let variable = variable.clone();
                    Box::new(
                        this.eval(&inner, &ActiveGraph::Named(graph_name))
                            .filter_map(move |solution| match solution {
                                Ok(mut solution) => solution
                                    .bind_checked(&variable, term.clone())
                                    .then_some(Ok(solution)),
                                Err(e) => Some(Err(e)),
                            }),
                    )
                }))
            }
        }
    }

    fn eval_order_by(
        &self,
        inner: &GraphPattern,
        expressions: Vec<OrderExpression>,
        graph: &ActiveGraph,
    ) -> SolutionIter {
        let this = self.clone();
        let inner = inner.clone();
        let graph = graph.clone();
        deferred(move || {
            let solutions = match this.eval(&inner, &graph).collect::<EngineResult<Vec<_>>>() {
                Ok(solutions) => solutions,
                Err(e) => return failed(e),
            };
            let mut keyed: Vec<(Vec<Option<Term>>, QuerySolution)> = solutions
                .into_iter()
                .map(|solution| {
                    let keys = expressions
                        .iter()
                        .map(|order| this.eval_expression(order_key(order).0, &solution, &graph))
                        .collect();
                    (keys, solution)
                })
                .collect();
            keyed.sort_by(|(a, _), (b, _)| {
                for ((left, right), order) in a.iter().zip(b).zip(&expressions) {
                    let ordering = order_terms(left.as_ref(), right.as_ref());
                    let ordering = if order_key(order).1 { ordering } else { ordering.reverse() };
                    if ordering != Ordering::Equal {
                        return ordering;
                    }
                }
                Ordering::Equal
            });
            Box::new(keyed.into_iter().map(|(_, solution)| Ok(solution)))
        })
    }

    fn eval_path(
        &self,
        subject: TermPattern,
        path: PropertyPathExpression,
        object: TermPattern,
        graph: ActiveGraph,
    ) -> SolutionIter {
        let this = self.clone();
        deferred(move || {
            let empty = QuerySolution::new();
            let (subject, object) = match (term_position(&subject, &empty), term_position(&object, &empty)) {
                (Ok(subject), Ok(object)) => (subject, object),
                (Err(e), _) | (_, Err(e)) => return failed(e),
            };
            let anchors: Vec<Term> = [&subject, &object]
                .into_iter()
                .filter_map(|position| match position {
                    Position::Bound(term) => Some(term.clone()),
                    Position::Free(_) => None,
                })
                .collect();
            let pairs = this.path_pairs(&path, &graph, &anchors);
            Box::new(pairs.into_iter().filter_map(move |(start, end)| {
                let mut candidate = QuerySolution::new();
                (unify(&mut candidate, &subject, start) && unify(&mut candidate, &object, end))
                    .then_some(Ok(candidate))
            }))
        })
    }

    /// All (start, end) node pairs connected by `path`
    fn path_pairs(&self, path: &PropertyPathExpression, graph: &ActiveGraph, anchors: &[Term]) -> Vec<(Term, Term)> {
        let graph_filter = self.graph_filter(graph);
        match path {
            PropertyPathExpression::NamedNode(predicate) => self
                .index
                .quads_for_pattern(None, Some(predicate), None, graph_filter.as_ref())
                .map(|quad| (quad.subject.clone().into(), quad.object.clone()))
                .collect(),
            PropertyPathExpression::Reverse(inner) => self
                .path_pairs(inner, graph, anchors)
                .into_iter()
                .map(|(start, end)| (end, start))
                .collect(),
            PropertyPathExpression::Sequence(first, second) => {
                let mut by_start: HashMap<Term, Vec<Term>> = HashMap::new();
                for (start, end) in self.path_pairs(second, graph, anchors) {
                    by_start.entry(start).or_default().push(end);
                }
                let mut pairs = Vec::new();
                for (start, middle) in self.path_pairs(first, graph, anchors) {
                    if let Some(ends) = by_start.get(&middle) {
                        pairs.extend(ends.iter().map(|end| (start.clone(), end.clone())));
                    }
                }
                pairs
            }
            PropertyPathExpression::Alternative(left, right) => {
                let mut pairs = self.path_pairs(left, graph, anchors);
                pairs.extend(self.path_pairs(right, graph, anchors));
                pairs
            }
            PropertyPathExpression::ZeroOrOne(inner) => distinct_pairs(
                self.reflexive_pairs(graph, anchors)
                    .into_iter()
                    .chain(self.path_pairs(inner, graph, anchors)),
            ),
            PropertyPathExpression::OneOrMore(inner) => {
                transitive_closure(self.path_pairs(inner, graph, anchors))
            }
            PropertyPathExpression::ZeroOrMore(inner) => distinct_pairs(
                self.reflexive_pairs(graph, anchors)
                    .into_iter()
                    .chain(transitive_closure(self.path_pairs(inner, graph, anchors))),
            ),
            PropertyPathExpression::NegatedPropertySet(excluded) => self
                .index
                .quads_for_pattern(None, None, None, graph_filter.as_ref())
                .filter(|quad| !excluded.contains(&quad.predicate))
                .map(|quad| (quad.subject.clone().into(), quad.object.clone()))
                .collect(),
        }
    }

    /// Zero-length path pairs: every node of the graph plus the pattern's own constants
    fn reflexive_pairs(&self, graph: &ActiveGraph, anchors: &[Term]) -> Vec<(Term, Term)> {
        let mut nodes: HashSet<Term> = anchors.iter().cloned().collect();
        let graph_filter = self.graph_filter(graph);
        for quad in self.index.quads_for_pattern(None, None, None, graph_filter.as_ref()) {
            nodes.insert(quad.subject.clone().into());
            nodes.insert(quad.object.clone());
        }
        nodes.into_iter().map(|node| (node.clone(), node)).collect()
    }

    fn graph_filter(&self, graph: &ActiveGraph) -> Option<GraphName> {
        match graph {
            ActiveGraph::Default if self.union_default_graph => None,
            ActiveGraph::Default => Some(GraphName::DefaultGraph),
            ActiveGraph::Named(name) => Some(name.clone()),
        }
    }
}

/// A triple pattern position after substituting the current solution
enum Position {
    Bound(Term),
    Free(Variable),
}

fn term_position(pattern: &TermPattern, solution: &QuerySolution) -> EngineResult<Position> {
    #[allow(unreachable_patterns)]
    let variable = match pattern {
        TermPattern::NamedNode(node) => return Ok(Position::Bound(node.clone().into())),
        TermPattern::Literal(literal) => return Ok(Position::Bound(literal.clone().into())),
        TermPattern::BlankNode(node) => blank_node_variable(node),
        TermPattern::Variable(variable) => variable.clone(),
        _ => return Err(rdf_star_unsupported()),
    };
    Ok(match solution.get(&variable) {
        Some(term) => Position::Bound(term.clone()),
        None => Position::Free(variable),
    })
}

fn predicate_position(pattern: &NamedNodePattern, solution: &QuerySolution) -> Position {
    match pattern {
        NamedNodePattern::NamedNode(node) => Position::Bound(node.clone().into()),
        NamedNodePattern::Variable(variable) => match solution.get(variable) {
            Some(term) => Position::Bound(term.clone()),
            None => Position::Free(variable.clone()),
        },
    }
}

fn unify(solution: &mut QuerySolution, position: &Position, term: Term) -> bool {
    match position {
        Position::Bound(expected) => expected == &term,
        Position::Free(variable) => solution.bind_checked(variable, term),
    }
}

/// Blank nodes in a query body behave like variables that are never projected
fn blank_node_variable(node: &BlankNode) -> Variable {
    Variable::new_unchecked(format!("_:{}", node.as_str()))
}

fn deferred(f: impl FnOnce() -> SolutionIter + Send + 'static) -> SolutionIter {
    Box::new(iter::once_with(f).flatten())
}

fn failed(error: EngineError) -> SolutionIter {
    Box::new(iter::once(Err(error)))
}

fn rdf_star_unsupported() -> EngineError {
    EngineError::Unsupported("RDF-star triple terms".to_string())
}

fn order_key(order: &OrderExpression) -> (&Expression, bool) {
    match order {
        OrderExpression::Asc(expression) => (expression, true),
        OrderExpression::Desc(expression) => (expression, false),
    }
}

fn distinct_pairs(pairs: impl Iterator<Item = (Term, Term)>) -> Vec<(Term, Term)> {
    let mut seen = HashSet::new();
    pairs.filter(|pair| seen.insert(pair.clone())).collect()
}

fn transitive_closure(pairs: Vec<(Term, Term)>) -> Vec<(Term, Term)> {
    let mut adjacency: HashMap<Term, Vec<Term>> = HashMap::new();
    for (start, end) in pairs {
        adjacency.entry(start).or_default().push(end);
    }

    let mut closure = Vec::new();
    for (start, direct) in &adjacency {
        let mut visited = HashSet::new();
        let mut pending = direct.clone();
        while let Some(node) = pending.pop() {
            if !visited.insert(node.clone()) {
                continue;
            }
            if let Some(next) = adjacency.get(&node) {
                pending.extend(next.iter().cloned());
            }
            closure.push((start.clone(), node));
        }
    }
    closure
}

fn values_solutions(
    variables: &[Variable],
    rows: &[Vec<Option<GroundTerm>>],
) -> EngineResult<Vec<QuerySolution>> {
    rows.iter()
        .map(|row| {
            let mut solution = QuerySolution::new();
            for (variable, value) in variables.iter().zip(row) {
                if let Some(value) = value {
                    solution.bind(variable.clone(), ground_term_to_term(value)?);
                }
            }
            Ok(solution)
        })
        .collect()
}

/// Variables a SELECT returns, in order
fn projected_variables(pattern: &GraphPattern) -> Vec<Variable> {
    match pattern {
        GraphPattern::Project { variables, .. } => variables.clone(),
        GraphPattern::Slice { inner, .. }
        | GraphPattern::Distinct { inner }
        | GraphPattern::Reduced { inner }
        | GraphPattern::OrderBy { inner, .. } => projected_variables(inner),
        other => {
            let mut variables = Vec::new();
            collect_in_scope(other, &mut variables);
            variables
        }
    }
}

fn push_unique(variables: &mut Vec<Variable>, variable: &Variable) {
    if !variables.contains(variable) {
        variables.push(variable.clone());
    }
}

fn collect_term_variable(variables: &mut Vec<Variable>, pattern: &TermPattern) {
    if let TermPattern::Variable(variable) = pattern {
        push_unique(variables, variable);
    }
}

fn collect_in_scope(pattern: &GraphPattern, variables: &mut Vec<Variable>) {
    match pattern {
        GraphPattern::Bgp { patterns } => {
            for triple in patterns {
                collect_term_variable(variables, &triple.subject);
                if let NamedNodePattern::Variable(variable) = &triple.predicate {
                    push_unique(variables, variable);
                }
                collect_term_variable(variables, &triple.object);
            }
        }
        GraphPattern::Path { subject, object, .. } => {
            collect_term_variable(variables, subject);
            collect_term_variable(variables, object);
        }
        GraphPattern::Join { left, right }
        | GraphPattern::LeftJoin { left, right, .. }
        | GraphPattern::Union { left, right } => {
            collect_in_scope(left, variables);
            collect_in_scope(right, variables);
        }
        GraphPattern::Minus { left, .. } => collect_in_scope(left, variables),
        GraphPattern::Graph { name, inner } => {
            if let NamedNodePattern::Variable(variable) = name {
                push_unique(variables, variable);
            }
            collect_in_scope(inner, variables);
        }
        GraphPattern::Extend { inner, variable, .. } => {
            collect_in_scope(inner, variables);
            push_unique(variables, variable);
        }
        GraphPattern::Values { variables: bound, .. } | GraphPattern::Project { variables: bound, .. } => {
            for variable in bound {
                push_unique(variables, variable);
            }
        }
        GraphPattern::Filter { inner, .. }
        | GraphPattern::Distinct { inner }
        | GraphPattern::Reduced { inner }
        | GraphPattern::Slice { inner, .. }
        | GraphPattern::OrderBy { inner, .. } => collect_in_scope(inner, variables),
        _ => {}
    }
}

/// Reject algebra the executor cannot evaluate before any result is produced
pub(super) fn check_supported(pattern: &GraphPattern) -> EngineResult<()> {
    match pattern {
        GraphPattern::Bgp { .. } | GraphPattern::Path { .. } | GraphPattern::Values { .. } => Ok(()),
        GraphPattern::Join { left, right }
        | GraphPattern::Union { left, right }
        | GraphPattern::Minus { left, right } => {
            check_supported(left)?;
            check_supported(right)
        }
        GraphPattern::LeftJoin {
            left,
            right,
            expression,
        } => {
            check_supported(left)?;
            check_supported(right)?;
            expression.as_ref().map_or(Ok(()), check_expression)
        }
        GraphPattern::Filter { expr, inner } => {
            check_expression(expr)?;
            check_supported(inner)
        }
        GraphPattern::Extend {
            inner, expression, ..
        } => {
            check_expression(expression)?;
            check_supported(inner)
        }
        GraphPattern::OrderBy { inner, expression } => {
            for order in expression {
                check_expression(order_key(order).0)?;
            }
            check_supported(inner)
        }
        GraphPattern::Graph { inner, .. }
        | GraphPattern::Project { inner, .. }
        | GraphPattern::Distinct { inner }
        | GraphPattern::Reduced { inner }
        | GraphPattern::Slice { inner, .. } => check_supported(inner),
        other => Err(unsupported_pattern(other)),
    }
}

fn unsupported_pattern(pattern: &GraphPattern) -> EngineError {
    let feature = match pattern {
        GraphPattern::Group { .. } => "aggregates and GROUP BY",
        GraphPattern::Service { .. } => "SERVICE",
        _ => "graph pattern",
    };
    EngineError::Unsupported(feature.to_string())
}

/// Substitute a solution into a template term, minting blank nodes as needed
pub(super) fn instantiate_term(
    pattern: &TermPattern,
    solution: &QuerySolution,
    blank_nodes: &mut HashMap<BlankNode, BlankNode>,
) -> Option<Term> {
    #[allow(unreachable_patterns)]
    match pattern {
        TermPattern::NamedNode(node) => Some(node.clone().into()),
        TermPattern::Literal(literal) => Some(literal.clone().into()),
        TermPattern::BlankNode(node) => Some(
            blank_nodes
                .entry(node.clone())
                .or_insert_with(BlankNode::default)
                .clone()
                .into(),
        ),
        TermPattern::Variable(variable) => solution.get(variable).cloned(),
        _ => None,
    }
}

pub(super) fn instantiate_predicate(pattern: &NamedNodePattern, solution: &QuerySolution) -> Option<NamedNode> {
    match pattern {
        NamedNodePattern::NamedNode(node) => Some(node.clone()),
        NamedNodePattern::Variable(variable) => match solution.get(variable) {
            Some(Term::NamedNode(node)) => Some(node.clone()),
            _ => None,
        },
    }
}

fn instantiate_triple(
    triple: &TriplePattern,
    solution: &QuerySolution,
    blank_nodes: &mut HashMap<BlankNode, BlankNode>,
) -> Option<Quad> {
    let subject = term_to_subject(instantiate_term(&triple.subject, solution, blank_nodes)?)?;
    let predicate = instantiate_predicate(&triple.predicate, solution)?;
    let object = instantiate_term(&triple.object, solution, blank_nodes)?;
    Some(Quad::new(subject, predicate, object, GraphName::DefaultGraph))
}

pub(super) fn term_to_subject(term: Term) -> Option<Subject> {
    match term {
        Term::NamedNode(node) => Some(node.into()),
        Term::BlankNode(node) => Some(node.into()),
        _ => None,
    }
}

pub(super) fn term_to_graph_name(term: Term) -> Option<GraphName> {
    match term {
        Term::NamedNode(node) => Some(node.into()),
        Term::BlankNode(node) => Some(node.into()),
        _ => None,
    }
}

fn graph_name_to_term(graph_name: &GraphName) -> Option<Term> {
    match graph_name {
        GraphName::NamedNode(node) => Some(node.clone().into()),
        GraphName::BlankNode(node) => Some(node.clone().into()),
        GraphName::DefaultGraph => None,
    }
}

pub(super) fn ground_term_to_term(term: &GroundTerm) -> EngineResult<Term> {
    #[allow(unreachable_patterns)]
    match term {
        GroundTerm::NamedNode(node) => Ok(node.clone().into()),
        GroundTerm::Literal(literal) => Ok(literal.clone().into()),
        _ => Err(rdf_star_unsupported()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxrdf::Literal;
    use spargebra::Query;

    const EX: &str = "http://example.org/";

    fn ex(local: &str) -> NamedNode {
        NamedNode::new(format!("{EX}{local}")).unwrap()
    }

    fn var(name: &str) -> Variable {
        Variable::new_unchecked(name)
    }

    fn social_index() -> Arc<QuadIndex> {
        let mut index = QuadIndex::new();
        let default = GraphName::DefaultGraph;
        index.insert(Quad::new(ex("alice"), ex("knows"), ex("bob"), default.clone()));
        index.insert(Quad::new(ex("bob"), ex("knows"), ex("carol"), default.clone()));
        index.insert(Quad::new(ex("alice"), ex("name"), Literal::new_simple_literal("Alice"), default.clone()));
        index.insert(Quad::new(ex("bob"), ex("name"), Literal::new_simple_literal("Bob"), default.clone()));
        index.insert(Quad::new(ex("carol"), ex("name"), Literal::new_simple_literal("Carol"), default.clone()));
        index.insert(Quad::new(ex("alice"), ex("age"), Literal::from(30_i64), default.clone()));
        index.insert(Quad::new(ex("bob"), ex("age"), Literal::from(25_i64), default));
        index.insert(Quad::new(ex("carol"), ex("knows"), ex("dave"), ex("g1")));
        Arc::new(index)
    }

    fn select_with(index: &Arc<QuadIndex>, union_default_graph: bool, query: &str) -> Vec<QuerySolution> {
        let full = format!("PREFIX ex: <{EX}>\n{query}");
        let Query::Select { pattern, .. } = Query::parse(&full, None).unwrap() else {
            panic!("not a SELECT query: {query}");
        };
        SparqlExecutor::new(Arc::clone(index), union_default_graph)
            .execute_select(&pattern)
            .collect::<EngineResult<Vec<_>>>()
            .unwrap()
    }

    fn select(index: &Arc<QuadIndex>, query: &str) -> Vec<QuerySolution> {
        select_with(index, false, query)
    }

    fn parse_pattern(query: &str) -> Query {
        Query::parse(&format!("PREFIX ex: <{EX}>\n{query}"), None).unwrap()
    }

    #[test]
    fn test_basic_graph_pattern_join() {
        let index = social_index();
        assert_eq!(select(&index, "SELECT ?a ?b WHERE { ?a ex:knows ?b }").len(), 2);

        let rows = select(&index, "SELECT ?x ?name WHERE { ?x ex:knows ?y . ?y ex:name ?name }");
        assert_eq!(rows.len(), 2);
        let names: HashSet<String> = rows
            .iter()
            .filter_map(|row| match row.get(&var("name")) {
                Some(Term::Literal(l)) => Some(l.value().to_string()),
                _ => None,
            })
            .collect();
        assert!(names.contains("Bob"));
        assert!(names.contains("Carol"));
    }

    #[test]
    fn test_select_variables_in_order() {
        let index = social_index();
        let Query::Select { pattern, .. } =
            parse_pattern("SELECT ?name ?x WHERE { ?x ex:name ?name }")
        else {
            panic!("expected SELECT");
        };
        let stream = SparqlExecutor::new(index, false).execute_select(&pattern);
        assert_eq!(stream.variables(), &[var("name"), var("x")]);
    }

    #[test]
    fn test_optional() {
        let index = social_index();
        let rows = select(&index, "SELECT ?x ?age WHERE { ?x ex:name ?n OPTIONAL { ?x ex:age ?age } }");
        assert_eq!(rows.len(), 3);
        assert_eq!(rows.iter().filter(|row| row.contains(&var("age"))).count(), 2);
    }

    #[test]
    fn test_filter_and_regex() {
        let index = social_index();
        let rows = select(&index, "SELECT ?x WHERE { ?x ex:age ?age FILTER(?age > 26) }");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get(&var("x")), Some(&Term::from(ex("alice"))));

        let rows = select(&index, r#"SELECT ?x WHERE { ?x ex:name ?n FILTER regex(?n, "^a", "i") }"#);
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn test_order_by_and_limit() {
        let index = social_index();
        let rows = select(&index, "SELECT ?x WHERE { ?x ex:age ?age } ORDER BY DESC(?age) LIMIT 1");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get(&var("x")), Some(&Term::from(ex("alice"))));

        let rows = select(&index, "SELECT ?n WHERE { ?x ex:name ?n } ORDER BY ?n OFFSET 1");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get(&var("n")), Some(&Literal::new_simple_literal("Bob").into()));
    }

    #[test]
    fn test_union_minus_values_distinct() {
        let index = social_index();
        let union = select(&index, "SELECT ?x WHERE { { ?x ex:age ?a } UNION { ?x ex:knows ex:carol } }");
        assert_eq!(union.len(), 3);

        let minus = select(&index, "SELECT ?x WHERE { ?x ex:name ?n MINUS { ?x ex:age ?a } }");
        assert_eq!(minus.len(), 1);
        assert_eq!(minus[0].get(&var("x")), Some(&Term::from(ex("carol"))));

        let values = select(&index, "SELECT ?x ?n WHERE { VALUES ?x { ex:alice ex:carol } ?x ex:name ?n }");
        assert_eq!(values.len(), 2);

        let distinct = select(&index, "SELECT DISTINCT ?x WHERE { ?x ?p ?o }");
        assert_eq!(distinct.len(), 3);
    }

    #[test]
    fn test_bind_arithmetic() {
        let index = social_index();
        let rows = select(&index, "SELECT ?double WHERE { ex:bob ex:age ?a BIND(?a * 2 AS ?double) }");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get(&var("double")), Some(&Literal::from(50_i64).into()));
    }

    #[test]
    fn test_property_paths() {
        let index = social_index();
        assert_eq!(select(&index, "SELECT ?y WHERE { ex:alice ex:knows+ ?y }").len(), 2);
        assert_eq!(select(&index, "SELECT ?y WHERE { ex:alice ex:knows* ?y }").len(), 3);
        assert_eq!(select(&index, "SELECT ?y WHERE { ex:alice ex:knows/ex:name ?y }").len(), 1);

        let reversed = select(&index, "SELECT ?x WHERE { ?x ^ex:knows ex:bob }");
        assert_eq!(reversed.len(), 1);
        assert_eq!(reversed[0].get(&var("x")), Some(&Term::from(ex("carol"))));

        let reversed = select(&index, "SELECT ?x WHERE { ex:bob ^ex:knows ?x }");
        assert_eq!(reversed.len(), 1);
        assert_eq!(reversed[0].get(&var("x")), Some(&Term::from(ex("alice"))));
    }

    #[test]
    fn test_named_graphs() {
        let index = social_index();
        let rows = select(&index, "SELECT ?g ?s WHERE { GRAPH ?g { ?s ?p ?o } }");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get(&var("g")), Some(&Term::from(ex("g1"))));

        assert_eq!(select(&index, "SELECT ?s WHERE { GRAPH ex:g1 { ?s ex:knows ex:dave } }").len(), 1);
        assert_eq!(select(&index, "SELECT ?s WHERE { ?s ex:knows ex:dave }").len(), 0);
    }

    #[test]
    fn test_union_default_graph() {
        let index = social_index();
        assert_eq!(select_with(&index, true, "SELECT ?y WHERE { ex:alice ex:knows+ ?y }").len(), 3);
        assert_eq!(select_with(&index, true, "SELECT ?s WHERE { ?s ex:knows ex:dave }").len(), 1);
    }

    #[test]
    fn test_union_scan_deduplicates_across_batches() {
        let mut index = QuadIndex::new();
        for i in 0..2000 {
            let quad = Quad::new(
                ex(&format!("item{i}")),
                ex("label"),
                Literal::new_simple_literal(i.to_string()),
                GraphName::DefaultGraph,
            );
            index.insert(quad.clone());
            index.insert(Quad {
                graph_name: ex("copy").into(),
                ..quad
            });
        }
        let index = Arc::new(index);
        let Query::Select { pattern, .. } = parse_pattern("SELECT ?s WHERE { ?s ex:label ?o }") else {
            panic!("not a SELECT query");
        };

        let mut solutions = SparqlExecutor::new(Arc::clone(&index), true).execute_select(&pattern);
        assert!(solutions.next().is_some());
        assert_eq!(solutions.count(), 1999);

        assert_eq!(select(&index, "SELECT ?s WHERE { ?s ex:label ?o }").len(), 2000);
    }

    #[test]
    fn test_blank_node_in_pattern() {
        let index = social_index();
        let rows = select(&index, "SELECT ?n WHERE { _:someone ex:knows ?x . _:someone ex:name ?n }");
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|row| row.len() == 1));
    }

    #[test]
    fn test_ask() {
        let index = social_index();
        let executor = SparqlExecutor::new(index, false);
        let Query::Ask { pattern, .. } = parse_pattern("ASK { ex:alice ex:knows ex:bob }") else {
            panic!("expected ASK");
        };
        assert!(executor.execute_ask(&pattern).unwrap());

        let Query::Ask { pattern, .. } = parse_pattern("ASK { ex:bob ex:knows ex:alice }") else {
            panic!("expected ASK");
        };
        assert!(!executor.execute_ask(&pattern).unwrap());
    }

    #[test]
    fn test_construct_mints_blank_nodes_per_solution() {
        let index = social_index();
        let Query::Construct { template, pattern, .. } =
            parse_pattern("CONSTRUCT { ?x ex:friendOf ?y . ?x ex:link _:b } WHERE { ?x ex:knows ?y }")
        else {
            panic!("expected CONSTRUCT");
        };
        let quads = SparqlExecutor::new(index, false)
            .execute_construct(template, &pattern)
            .collect::<EngineResult<Vec<_>>>()
            .unwrap();
        assert_eq!(quads.len(), 4);

        let blank_objects: HashSet<&Term> = quads
            .iter()
            .filter(|quad| quad.predicate == ex("link"))
            .map(|quad| &quad.object)
            .collect();
        assert_eq!(blank_objects.len(), 2);
        assert!(quads.iter().all(|quad| quad.graph_name.is_default_graph()));
    }

    #[test]
    fn test_describe() {
        let index = social_index();
        let Query::Describe { pattern, .. } = parse_pattern("DESCRIBE ?x WHERE { ?x ex:age 25 }") else {
            panic!("expected DESCRIBE");
        };
        let quads = SparqlExecutor::new(index, false)
            .execute_describe(&pattern)
            .collect::<EngineResult<Vec<_>>>()
            .unwrap();
        assert_eq!(quads.len(), 3);
        assert!(quads.iter().all(|quad| quad.subject == Subject::from(ex("bob"))));
    }

    #[test]
    fn test_unsupported_features_are_rejected() {
        let Query::Select { pattern, .. } =
            parse_pattern("SELECT (COUNT(?s) AS ?c) WHERE { ?s ?p ?o }")
        else {
            panic!("expected SELECT");
        };
        assert!(matches!(check_supported(&pattern), Err(EngineError::Unsupported(_))));

        let Query::Select { pattern, .. } =
            parse_pattern("SELECT ?s WHERE { ?s ?p ?o FILTER(?o = \"x\") }")
        else {
            panic!("expected SELECT");
        };
        assert!(check_supported(&pattern).is_ok());
    }
}
