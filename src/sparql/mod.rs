//! SPARQL 1.1 query language support
//!
//! This module implements SPARQL parsing and execution over an [`RdfStore`]:
//!
//! - Query forms: SELECT, ASK, CONSTRUCT, DESCRIBE
//! - Graph patterns: basic graph patterns, property paths, OPTIONAL, UNION,
//!   MINUS, FILTER, BIND, VALUES, GRAPH
//! - Solution modifiers: ORDER BY, DISTINCT, REDUCED, LIMIT, OFFSET
//! - Updates: INSERT DATA, DELETE DATA, DELETE/INSERT WHERE, CLEAR, DROP, CREATE
//!
//! Aggregates, SERVICE, FROM / FROM NAMED, USING and LOAD are rejected with
//! [`EngineError::Unsupported`] before any result is produced.
//!
//! # Example
//!
//! ```rust
//! use quadstore_http::rdf::RdfStore;
//! use quadstore_http::sparql::{BindingsResult, QueryEngine, QueryResult, SparqlEngine};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let engine = SparqlEngine::new(RdfStore::new());
//!
//! let result = engine
//!     .execute("INSERT DATA { <http://example.org/s> <http://example.org/p> \"o\" }")
//!     .await
//!     .unwrap();
//! let QueryResult::Void(update) = result else { panic!("expected an update") };
//! update.execute().await.unwrap();
//!
//! let result = engine.execute("SELECT ?o WHERE { ?s ?p ?o }").await.unwrap();
//! let QueryResult::Bindings(BindingsResult::Solutions(solutions)) = result else {
//!     panic!("expected solutions")
//! };
//! assert_eq!(solutions.count(), 1);
//! # });
//! ```

mod executor;
mod expression;
mod parser;
mod results;
mod update;

pub use executor::SparqlExecutor;
pub use parser::{ParseError as SparqlParseError, SparqlOperation, SparqlParser};
pub use results::{
    BindingsResult, PendingUpdate, QuadStream, QueryResult, QuerySolution, ResultKind, SolutionStream,
};

use crate::rdf::{RdfStore, RdfStoreError};
use async_trait::async_trait;
use spargebra::algebra::QueryDataset;
use spargebra::Query;
use thiserror::Error;
use tracing::debug;

/// SPARQL engine errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The operation is not valid SPARQL
    #[error("Syntax error: {0}")]
    Syntax(String),

    /// Valid SPARQL this engine does not implement
    #[error("Unsupported feature: {0}")]
    Unsupported(String),

    /// Failure while evaluating the operation
    #[error("Evaluation error: {0}")]
    Evaluation(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

impl From<RdfStoreError> for EngineError {
    fn from(error: RdfStoreError) -> Self {
        EngineError::Evaluation(error.to_string())
    }
}

/// Executes SPARQL text and hands back a typed result
///
/// Updates are never applied by `execute` itself: they come back as
/// [`QueryResult::Void`] and only take effect when the caller runs the
/// [`PendingUpdate`].
#[async_trait]
pub trait QueryEngine: Send + Sync {
    /// Parse and prepare a SPARQL query or update
    async fn execute(&self, operation: &str) -> EngineResult<QueryResult>;
}

/// Engine options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineOptions {
    /// Match default-graph patterns against the union of all graphs
    pub union_default_graph: bool,
}

/// SPARQL query engine over an in-memory quad store
#[derive(Clone)]
pub struct SparqlEngine {
    store: RdfStore,
    options: EngineOptions,
}

impl SparqlEngine {
    /// Create a new SPARQL engine
    pub fn new(store: RdfStore) -> Self {
        Self::with_options(store, EngineOptions::default())
    }

    /// Create a new SPARQL engine with explicit options
    pub fn with_options(store: RdfStore, options: EngineOptions) -> Self {
        Self { store, options }
    }

    /// The store queries run against
    pub fn store(&self) -> &RdfStore {
        &self.store
    }

    async fn prepare_query(&self, query: Query) -> EngineResult<QueryResult> {
        let executor = SparqlExecutor::new(self.store.snapshot().await, self.options.union_default_graph);
        match query {
            Query::Select { dataset, pattern, .. } => {
                reject_dataset(&dataset)?;
                executor::check_supported(&pattern)?;
                debug!("prepared SELECT query");
                Ok(QueryResult::Bindings(BindingsResult::Solutions(
                    executor.execute_select(&pattern),
                )))
            }
            Query::Ask { dataset, pattern, .. } => {
                reject_dataset(&dataset)?;
                executor::check_supported(&pattern)?;
                let answer = tokio::task::spawn_blocking(move || executor.execute_ask(&pattern))
                    .await
                    .map_err(|e| EngineError::Evaluation(e.to_string()))??;
                debug!(answer, "evaluated ASK query");
                Ok(QueryResult::Bindings(BindingsResult::Boolean(answer)))
            }
            Query::Construct {
                template,
                dataset,
                pattern,
                ..
            } => {
                reject_dataset(&dataset)?;
                executor::check_supported(&pattern)?;
                debug!("prepared CONSTRUCT query");
                Ok(QueryResult::Quads(executor.execute_construct(template, &pattern)))
            }
            Query::Describe { dataset, pattern, .. } => {
                reject_dataset(&dataset)?;
                executor::check_supported(&pattern)?;
                debug!("prepared DESCRIBE query");
                Ok(QueryResult::Quads(executor.execute_describe(&pattern)))
            }
        }
    }
}

#[async_trait]
impl QueryEngine for SparqlEngine {
    async fn execute(&self, operation: &str) -> EngineResult<QueryResult> {
        let parsed = SparqlParser::parse(operation).map_err(|e| match e {
            SparqlParseError::Syntax(message) => EngineError::Syntax(message),
        })?;

        match parsed {
            SparqlOperation::Query(query) => self.prepare_query(query).await,
            SparqlOperation::Update(update) => {
                let store = self.store.clone();
                let union_default_graph = self.options.union_default_graph;
                debug!(operations = update.operations.len(), "prepared update");
                Ok(QueryResult::Void(PendingUpdate::new(move || async move {
                    store
                        .transaction(move |writer| update::apply_update(writer, &update, union_default_graph))
                        .await
                })))
            }
        }
    }
}

fn reject_dataset(dataset: &Option<QueryDataset>) -> EngineResult<()> {
    match dataset {
        Some(_) => Err(EngineError::Unsupported("FROM and FROM NAMED".to_string())),
        None => Ok(()),
    }
}
