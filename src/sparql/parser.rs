//! SPARQL parser using spargebra library

use regex::Regex;
use spargebra::{Query, Update};
use std::sync::OnceLock;
use thiserror::Error;

/// Parse errors
#[derive(Error, Debug)]
pub enum ParseError {
    /// Syntax error
    #[error("Syntax error: {0}")]
    Syntax(String),
}

/// A parsed SPARQL operation
#[derive(Debug, Clone)]
pub enum SparqlOperation {
    /// SELECT, ASK, CONSTRUCT or DESCRIBE
    Query(Query),
    /// One or more update operations
    Update(Update),
}

/// Matches text whose first keyword after the prologue starts an update.
fn update_keyword() -> Option<&'static Regex> {
    static UPDATE_KEYWORD: OnceLock<Option<Regex>> = OnceLock::new();
    UPDATE_KEYWORD
        .get_or_init(|| {
            Regex::new(
                r"(?is)^\s*(?:(?:#[^\n]*\n|PREFIX\s+[^\s:]*:\s*<[^>]*>|BASE\s*<[^>]*>)\s*)*(?:INSERT|DELETE|LOAD|CLEAR|CREATE|DROP|COPY|MOVE|ADD|WITH)\b",
            )
            .ok()
        })
        .as_ref()
}

/// SPARQL parser
pub struct SparqlParser;

impl SparqlParser {
    /// Parse SPARQL text as either a query or an update.
    ///
    /// The grammar tried first is guessed from the leading keyword, so the
    /// syntax error reported on failure comes from the grammar the client
    /// most likely meant.
    pub fn parse(text: &str) -> Result<SparqlOperation, ParseError> {
        if Self::looks_like_update(text) {
            match Update::parse(text, None) {
                Ok(update) => Ok(SparqlOperation::Update(update)),
                Err(update_error) => Query::parse(text, None)
                    .map(SparqlOperation::Query)
                    .map_err(|_| ParseError::Syntax(update_error.to_string())),
            }
        } else {
            match Query::parse(text, None) {
                Ok(query) => Ok(SparqlOperation::Query(query)),
                Err(query_error) => Update::parse(text, None)
                    .map(SparqlOperation::Update)
                    .map_err(|_| ParseError::Syntax(query_error.to_string())),
            }
        }
    }

    /// Cheap lexical check for update operations
    pub fn looks_like_update(text: &str) -> bool {
        update_keyword().map_or(false, |pattern| pattern.is_match(text))
    }
}
