//! SPARQL UPDATE execution

use super::executor::{
    check_supported, ground_term_to_term, instantiate_predicate, instantiate_term, term_to_graph_name,
    term_to_subject, SparqlExecutor,
};
use super::results::QuerySolution;
use super::{EngineError, EngineResult};
use crate::rdf::IndexWriter;
use oxrdf::{BlankNode, GraphName, Quad, Subject, Term};
use spargebra::algebra::GraphTarget;
use spargebra::term::{
    GraphName as TargetGraph, GraphNamePattern, GroundQuad, GroundQuadPattern, GroundSubject,
    GroundTermPattern, Quad as DataQuad, QuadPattern,
};
use spargebra::{GraphUpdateOperation, Update};
use std::collections::HashMap;
use tracing::debug;

/// Apply every operation of `update` in order through `writer`.
///
/// Each operation sees the effects of the ones before it. On error the
/// caller drops `writer` uncommitted, which reverts them.
pub(super) fn apply_update(
    writer: &mut IndexWriter<'_>,
    update: &Update,
    union_default_graph: bool,
) -> EngineResult<()> {
    for operation in &update.operations {
        apply_operation(writer, operation, union_default_graph)?;
    }
    debug!(changes = writer.changes(), "update applied");
    Ok(())
}

fn apply_operation(
    writer: &mut IndexWriter<'_>,
    operation: &GraphUpdateOperation,
    union_default_graph: bool,
) -> EngineResult<()> {
    match operation {
        GraphUpdateOperation::InsertData { data } => {
            let mut blank_nodes = HashMap::new();
            let quads: Vec<Quad> = data
                .iter()
                .map(|quad| data_quad(quad, &mut blank_nodes))
                .collect();
            let inserted = quads.into_iter().filter(|quad| writer.insert(quad.clone())).count();
            debug!(inserted, "INSERT DATA applied");
        }
        GraphUpdateOperation::DeleteData { data } => {
            let quads = data.iter().map(ground_quad).collect::<EngineResult<Vec<_>>>()?;
            let removed = quads.iter().filter(|quad| writer.remove(quad)).count();
            debug!(removed, "DELETE DATA applied");
        }
        GraphUpdateOperation::DeleteInsert {
            delete,
            insert,
            using,
            pattern,
        } => {
            if using.is_some() {
                return Err(EngineError::Unsupported("USING and USING NAMED".to_string()));
            }
            check_supported(pattern)?;

            let solutions = SparqlExecutor::new(writer.snapshot(), union_default_graph)
                .evaluate(pattern)
                .collect::<EngineResult<Vec<QuerySolution>>>()?;

            let mut removals = Vec::new();
            let mut additions = Vec::new();
            for solution in &solutions {
                removals.extend(
                    delete
                        .iter()
                        .filter_map(|template| instantiate_ground_quad(template, solution)),
                );
                let mut blank_nodes = HashMap::new();
                additions.extend(
                    insert
                        .iter()
                        .filter_map(|template| instantiate_quad(template, solution, &mut blank_nodes)),
                );
            }

            let removed = removals.iter().filter(|quad| writer.remove(quad)).count();
            let inserted = additions.into_iter().filter(|quad| writer.insert(quad.clone())).count();
            debug!(matched = solutions.len(), removed, inserted, "DELETE/INSERT applied");
        }
        GraphUpdateOperation::Load { silent: true, .. } => {
            debug!("skipping LOAD SILENT");
        }
        GraphUpdateOperation::Load { .. } => {
            return Err(EngineError::Unsupported("LOAD".to_string()));
        }
        GraphUpdateOperation::Clear { graph, .. } | GraphUpdateOperation::Drop { graph, .. } => {
            let removed = clear_target(writer, graph);
            debug!(removed, "graph cleared");
        }
        // Graphs exist as soon as they hold a quad
        GraphUpdateOperation::Create { .. } => {}
    }
    Ok(())
}

fn clear_target(writer: &mut IndexWriter<'_>, target: &GraphTarget) -> usize {
    match target {
        GraphTarget::NamedNode(node) => writer.clear_graph(&GraphName::NamedNode(node.clone())),
        GraphTarget::DefaultGraph => writer.clear_graph(&GraphName::DefaultGraph),
        GraphTarget::NamedGraphs => writer.clear_named_graphs(),
        GraphTarget::AllGraphs => writer.clear_all(),
    }
}

fn fresh_blank_node(node: &BlankNode, blank_nodes: &mut HashMap<BlankNode, BlankNode>) -> BlankNode {
    blank_nodes
        .entry(node.clone())
        .or_insert_with(BlankNode::default)
        .clone()
}

fn target_graph(graph: &TargetGraph) -> GraphName {
    match graph {
        TargetGraph::NamedNode(node) => GraphName::NamedNode(node.clone()),
        TargetGraph::DefaultGraph => GraphName::DefaultGraph,
    }
}

/// INSERT DATA quad, with its blank nodes replaced by fresh ones
fn data_quad(quad: &DataQuad, blank_nodes: &mut HashMap<BlankNode, BlankNode>) -> Quad {
    let subject = match &quad.subject {
        Subject::BlankNode(node) => Subject::BlankNode(fresh_blank_node(node, blank_nodes)),
        other => other.clone(),
    };
    let object = match &quad.object {
        Term::BlankNode(node) => Term::BlankNode(fresh_blank_node(node, blank_nodes)),
        other => other.clone(),
    };
    Quad::new(subject, quad.predicate.clone(), object, target_graph(&quad.graph_name))
}

fn ground_quad(quad: &GroundQuad) -> EngineResult<Quad> {
    #[allow(unreachable_patterns)]
    let subject: Subject = match &quad.subject {
        GroundSubject::NamedNode(node) => node.clone().into(),
        _ => return Err(EngineError::Unsupported("RDF-star triple terms".to_string())),
    };
    Ok(Quad::new(
        subject,
        quad.predicate.clone(),
        ground_term_to_term(&quad.object)?,
        target_graph(&quad.graph_name),
    ))
}

fn instantiate_graph_name(pattern: &GraphNamePattern, solution: &QuerySolution) -> Option<GraphName> {
    match pattern {
        GraphNamePattern::NamedNode(node) => Some(GraphName::NamedNode(node.clone())),
        GraphNamePattern::DefaultGraph => Some(GraphName::DefaultGraph),
        GraphNamePattern::Variable(variable) => solution.get(variable).cloned().and_then(term_to_graph_name),
    }
}

fn instantiate_ground_term(pattern: &GroundTermPattern, solution: &QuerySolution) -> Option<Term> {
    #[allow(unreachable_patterns)]
    match pattern {
        GroundTermPattern::NamedNode(node) => Some(node.clone().into()),
        GroundTermPattern::Literal(literal) => Some(literal.clone().into()),
        GroundTermPattern::Variable(variable) => solution.get(variable).cloned(),
        _ => None,
    }
}

/// DELETE template quad; templates with unbound or ill-typed positions yield nothing
fn instantiate_ground_quad(template: &GroundQuadPattern, solution: &QuerySolution) -> Option<Quad> {
    Some(Quad::new(
        term_to_subject(instantiate_ground_term(&template.subject, solution)?)?,
        instantiate_predicate(&template.predicate, solution)?,
        instantiate_ground_term(&template.object, solution)?,
        instantiate_graph_name(&template.graph_name, solution)?,
    ))
}

fn instantiate_quad(
    template: &QuadPattern,
    solution: &QuerySolution,
    blank_nodes: &mut HashMap<BlankNode, BlankNode>,
) -> Option<Quad> {
    Some(Quad::new(
        term_to_subject(instantiate_term(&template.subject, solution, blank_nodes)?)?,
        instantiate_predicate(&template.predicate, solution)?,
        instantiate_term(&template.object, solution, blank_nodes)?,
        instantiate_graph_name(&template.graph_name, solution)?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rdf::QuadIndex;
    use oxrdf::{Literal, NamedNode};
    use std::sync::Arc;

    const PREFIX: &str = "PREFIX ex: <http://example.org/>\n";

    fn ex(local: &str) -> NamedNode {
        NamedNode::new(format!("http://example.org/{local}")).unwrap()
    }

    fn run(index: &mut Arc<QuadIndex>, text: &str) -> EngineResult<()> {
        let update = Update::parse(&format!("{PREFIX}{text}"), None).unwrap();
        let mut writer = IndexWriter::new(index);
        apply_update(&mut writer, &update, false)?;
        writer.commit();
        Ok(())
    }

    #[test]
    fn test_insert_and_delete_data() {
        let mut index = Arc::new(QuadIndex::new());
        run(&mut index, "INSERT DATA { ex:s ex:p \"v\" . GRAPH ex:g { ex:s ex:p ex:o } }").unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(index.named_graphs().count(), 1);

        run(&mut index, "DELETE DATA { ex:s ex:p \"v\" }").unwrap();
        assert_eq!(index.len(), 1);
        assert!(index.contains(&Quad::new(ex("s"), ex("p"), ex("o"), ex("g"))));
    }

    #[test]
    fn test_insert_data_mints_fresh_blank_nodes() {
        let mut index = Arc::new(QuadIndex::new());
        run(&mut index, "INSERT DATA { _:b ex:p \"1\" }").unwrap();
        run(&mut index, "INSERT DATA { _:b ex:p \"1\" }").unwrap();
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_delete_insert_where() {
        let mut index = Arc::new(QuadIndex::new());
        run(&mut index, "INSERT DATA { ex:a ex:old \"1\" . ex:b ex:old \"2\" . ex:c ex:other \"3\" }").unwrap();

        run(&mut index, "DELETE { ?s ex:old ?o } INSERT { ?s ex:new ?o } WHERE { ?s ex:old ?o }").unwrap();
        assert_eq!(index.len(), 3);
        assert!(index.contains(&Quad::new(
            ex("a"),
            ex("new"),
            Literal::new_simple_literal("1"),
            GraphName::DefaultGraph
        )));
        let old = ex("old");
        assert!(index.quads_for_pattern(None, Some(&old), None, None).next().is_none());

        run(&mut index, "DELETE WHERE { ?s ex:new ?o }").unwrap();
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_clear_and_drop() {
        let mut index = Arc::new(QuadIndex::new());
        run(
            &mut index,
            "INSERT DATA { ex:a ex:p ex:b . GRAPH ex:g1 { ex:a ex:p ex:c } GRAPH ex:g2 { ex:a ex:p ex:d } }",
        )
        .unwrap();

        run(&mut index, "CLEAR GRAPH ex:g1").unwrap();
        assert_eq!(index.len(), 2);

        run(&mut index, "DROP NAMED").unwrap();
        assert_eq!(index.len(), 1);

        run(&mut index, "CREATE GRAPH ex:g3").unwrap();
        run(&mut index, "CLEAR ALL").unwrap();
        assert!(index.is_empty());
    }

    #[test]
    fn test_load_is_unsupported() {
        let mut index = Arc::new(QuadIndex::new());
        assert!(matches!(
            run(&mut index, "LOAD <http://example.org/data.nq>"),
            Err(EngineError::Unsupported(_))
        ));
        assert!(run(&mut index, "LOAD SILENT <http://example.org/data.nq>").is_ok());
    }

    #[test]
    fn test_operations_see_earlier_effects() {
        let mut index = Arc::new(QuadIndex::new());
        run(
            &mut index,
            "INSERT DATA { ex:a ex:p \"1\" } ; INSERT { ?s ex:q ?o } WHERE { ?s ex:p ?o }",
        )
        .unwrap();
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_failing_operation_reverts_earlier_ones() {
        let mut index = Arc::new(QuadIndex::new());
        run(&mut index, "INSERT DATA { ex:a ex:p \"1\" }").unwrap();

        let result = run(
            &mut index,
            "DELETE DATA { ex:a ex:p \"1\" } ; INSERT DATA { ex:b ex:p \"2\" } ; LOAD <http://example.org/data.nq>",
        );
        assert!(matches!(result, Err(EngineError::Unsupported(_))));
        assert_eq!(index.len(), 1);
        assert!(index.contains(&Quad::new(
            ex("a"),
            ex("p"),
            Literal::new_simple_literal("1"),
            GraphName::DefaultGraph
        )));
    }

    #[test]
    fn test_update_does_not_copy_an_unshared_index() {
        let mut index = Arc::new(QuadIndex::new());
        run(&mut index, "INSERT DATA { ex:a ex:p \"1\" . ex:b ex:p \"2\" }").unwrap();
        let before = Arc::as_ptr(&index);

        run(&mut index, "DELETE { ?s ex:p ?o } INSERT { ?s ex:q ?o } WHERE { ?s ex:p ?o }").unwrap();
        assert_eq!(Arc::as_ptr(&index), before);
        assert_eq!(index.len(), 2);
    }
}
