//! `/sparql` request handler

use super::dispatcher::{dispatch, DispatchOutcome};
use super::negotiate::NegotiationRequest;
use super::resolver::resolve;
use super::streamer::stream;
use crate::config::StreamingConfig;
use crate::sparql::QueryEngine;
use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use std::sync::Arc;
use tracing::debug;

/// Shared state of the endpoint
pub struct EndpointState {
    pub engine: Arc<dyn QueryEngine>,
    pub streaming: StreamingConfig,
}

impl EndpointState {
    pub fn new(engine: Arc<dyn QueryEngine>, streaming: StreamingConfig) -> Self {
        Self { engine, streaming }
    }
}

/// Resolve, dispatch, negotiate and stream one SPARQL protocol request
pub async fn sparql_handler(State(state): State<Arc<EndpointState>>, request: Request) -> Response {
    let accept = request
        .headers()
        .get(header::ACCEPT)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);

    let operation = match resolve(request).await {
        Ok(operation) => operation,
        Err(e) => {
            debug!("rejected request: {}", e);
            return e.into_response();
        }
    };

    let result = match dispatch(&operation, state.engine.as_ref()).await {
        Ok(DispatchOutcome::Completed) => return StatusCode::NO_CONTENT.into_response(),
        Ok(DispatchOutcome::Stream(result)) => result,
        Err(e) => {
            debug!("operation failed: {}", e);
            return e.into_response();
        }
    };

    let media_type = NegotiationRequest {
        accept_header: accept.as_deref(),
        result_kind: result.kind(),
    }
    .media_type();
    debug!(%media_type, kind = ?result.kind(), "streaming result");

    stream(result, media_type, &state.streaming)
}
