//! Request resolution: turns an HTTP request into SPARQL operation text

use super::error::ProtocolError;
use axum::body::Body;
use axum::extract::{Form, FromRequest, Query, Request};
use axum::http::{header, Method};
use mime::Mime;
use serde::Deserialize;

const SPARQL_QUERY: &str = "application/sparql-query";
const SPARQL_UPDATE: &str = "application/sparql-update";
const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";

/// HTTP method an operation arrived with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationMethod {
    Get,
    Post,
}

/// SPARQL text extracted from a request, not yet parsed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingOperation {
    pub text: String,
    pub method: OperationMethod,
}

impl IncomingOperation {
    /// Wrap operation text, rejecting blank input
    pub fn new(text: impl Into<String>, method: OperationMethod) -> Result<Self, ProtocolError> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(ProtocolError::InvalidRequest("empty SPARQL operation".to_string()));
        }
        Ok(Self { text, method })
    }
}

/// `query` / `update` parameters of a query string or form body
#[derive(Debug, Default, Deserialize)]
struct OperationParams {
    query: Option<String>,
    update: Option<String>,
}

/// Extract the operation from `request`, reading the body at most once
pub async fn resolve(request: Request<Body>) -> Result<IncomingOperation, ProtocolError> {
    let method = request.method().clone();

    if method == Method::GET {
        let Query(params) = Query::<OperationParams>::try_from_uri(request.uri())
            .map_err(|e| ProtocolError::InvalidRequest(e.body_text()))?;
        let text = params
            .query
            .ok_or_else(|| ProtocolError::InvalidRequest("missing `query` parameter".to_string()))?;
        return IncomingOperation::new(text, OperationMethod::Get);
    }

    if method != Method::POST {
        return Err(ProtocolError::UnsupportedMethod(method));
    }

    let content_type = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<Mime>().ok())
        .ok_or(ProtocolError::UnsupportedContentType)?;

    match content_type.essence_str() {
        SPARQL_QUERY | SPARQL_UPDATE => {
            let text = String::from_request(request, &())
                .await
                .map_err(|e| ProtocolError::InvalidRequest(e.body_text()))?;
            IncomingOperation::new(text, OperationMethod::Post)
        }
        FORM_URLENCODED => {
            let Form(params) = Form::<OperationParams>::from_request(request, &())
                .await
                .map_err(|e| ProtocolError::InvalidRequest(e.body_text()))?;
            let text = params
                .query
                .or(params.update)
                .ok_or_else(|| ProtocolError::InvalidRequest("missing `query` form field".to_string()))?;
            IncomingOperation::new(text, OperationMethod::Post)
        }
        _ => Err(ProtocolError::UnsupportedContentType),
    }
}
