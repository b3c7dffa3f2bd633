//! RDF (Resource Description Framework) support
//!
//! This module implements the quad store behind the SPARQL endpoint:
//! - RDF quads in the default graph and in named graphs
//! - Key-ordered SPOG / POSG / OSPG indexes
//! - Copy-on-write read snapshots with lazy pattern scans
//! - Serialized, journaled write transactions
//! - N-Quads and TriG parsing and serialization
//!
//! # Example
//!
//! ```rust
//! use quadstore_http::rdf::{GraphName, Literal, NamedNode, Quad, QuadIndex, QuadPattern, RdfStore};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let store = RdfStore::new();
//!
//! let quad = Quad::new(
//!     NamedNode::new("http://example.org/alice").unwrap(),
//!     NamedNode::new("http://xmlns.com/foaf/0.1/name").unwrap(),
//!     Literal::new_simple_literal("Alice"),
//!     GraphName::DefaultGraph,
//! );
//! store.insert(quad).await;
//!
//! let snapshot = store.snapshot().await;
//! assert_eq!(snapshot.len(), 1);
//! assert_eq!(QuadIndex::scan(&snapshot, QuadPattern::default()).count(), 1);
//! # });
//! ```

mod store;
mod serialization;

pub use store::{
    IndexWriter, QuadIndex, QuadPattern, QuadScan, RdfStore, RdfStoreError, RdfStoreResult,
};

pub use serialization::{ParseError, ParseResult, QuadWriter, RdfFormat, RdfParser};

pub use oxrdf::{BlankNode, GraphName, Literal, NamedNode, Quad, Subject, Term, Variable};
