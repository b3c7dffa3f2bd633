//! Protocol errors and their HTTP representation

use crate::sparql::EngineError;
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Errors detected before any response byte is written
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Missing or malformed `query` parameter, form field or body
    #[error("invalid query: {0}")]
    InvalidRequest(String),

    /// POST with a `Content-Type` that carries no SPARQL operation
    #[error("unsupported content-type")]
    UnsupportedContentType,

    /// Method other than GET or POST
    #[error("unsupported HTTP method")]
    UnsupportedMethod(Method),

    /// Update submitted with a safe method
    #[error("updates must be submitted with POST")]
    MethodNotAllowedForUpdate,

    /// The engine rejected the operation text
    #[error("{0}")]
    QuerySyntax(String),

    /// Any other engine or store failure
    #[error("{0}")]
    Engine(String),
}

impl ProtocolError {
    /// HTTP status reported for this error
    pub fn status(&self) -> StatusCode {
        match self {
            ProtocolError::InvalidRequest(_)
            | ProtocolError::UnsupportedContentType
            | ProtocolError::QuerySyntax(_) => StatusCode::BAD_REQUEST,
            ProtocolError::UnsupportedMethod(_) | ProtocolError::MethodNotAllowedForUpdate => {
                StatusCode::METHOD_NOT_ALLOWED
            }
            ProtocolError::Engine(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn allow(&self) -> Option<&'static str> {
        match self {
            ProtocolError::UnsupportedMethod(_) => Some("GET, POST"),
            ProtocolError::MethodNotAllowedForUpdate => Some("POST"),
            _ => None,
        }
    }
}

impl From<EngineError> for ProtocolError {
    fn from(error: EngineError) -> Self {
        match error {
            EngineError::Syntax(message) => ProtocolError::QuerySyntax(message),
            other => ProtocolError::Engine(other.to_string()),
        }
    }
}

impl IntoResponse for ProtocolError {
    fn into_response(self) -> Response {
        let mut response = (self.status(), Json(json!({ "error": self.to_string() }))).into_response();
        if let Some(allow) = self.allow() {
            response
                .headers_mut()
                .insert(header::ALLOW, HeaderValue::from_static(allow));
        }
        response
    }
}
