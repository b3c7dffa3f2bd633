//! SPARQL 1.1 Protocol over HTTP
//!
//! A request to `/sparql` moves through four stages:
//!
//! 1. [`resolver`] extracts the operation text from the query string, raw
//!    body or form body
//! 2. [`dispatcher`] hands it to the [`QueryEngine`](crate::sparql::QueryEngine)
//!    and runs updates (POST only)
//! 3. [`negotiate`] picks a media type from the `Accept` header
//! 4. [`streamer`] serializes the result into the response body incrementally

pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod negotiate;
pub mod resolver;
pub mod server;
pub mod streamer;

pub use dispatcher::{dispatch, DispatchOutcome, StreamableResult};
pub use error::ProtocolError;
pub use handler::{sparql_handler, EndpointState};
pub use negotiate::{negotiate, MediaType, NegotiationRequest};
pub use resolver::{resolve, IncomingOperation, OperationMethod};
pub use server::{BoundServer, HttpServer};
pub use streamer::stream;
