//! Quadstore HTTP
//!
//! A SPARQL 1.1 Protocol endpoint over an in-memory RDF quad store.
//!
//! # Architecture
//!
//! - [`rdf`]: quad store with copy-on-write snapshots, N-Quads / TriG I/O
//! - [`sparql`]: query and update engine behind the [`QueryEngine`] trait
//! - [`http`]: request resolution, dispatch, content negotiation and
//!   incremental result streaming on top of axum
//! - [`config`]: endpoint configuration loaded from YAML
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use quadstore_http::{EndpointConfig, HttpServer, RdfStore, SparqlEngine};
//! use std::sync::Arc;
//!
//! # async fn run() -> std::io::Result<()> {
//! let engine = Arc::new(SparqlEngine::new(RdfStore::new()));
//! let server = HttpServer::new(engine, EndpointConfig::default());
//! server.start().await
//! # }
//! ```

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod http;
pub mod rdf;
pub mod sparql;

// Re-export main types for convenience
pub use config::{ConfigError, ConfigResult, EndpointConfig, StreamingConfig};

pub use http::{
    BoundServer, EndpointState, HttpServer, IncomingOperation, MediaType, OperationMethod,
    ProtocolError,
};

pub use rdf::{
    GraphName, Literal, NamedNode, Quad, QuadIndex, RdfFormat, RdfParser, RdfStore, RdfStoreError,
    RdfStoreResult,
};

pub use sparql::{
    BindingsResult, EngineError, EngineOptions, EngineResult, QueryEngine, QueryResult, SparqlEngine,
};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get version string
pub fn version() -> &'static str {
    VERSION
}
