//! RDF serialization formats
//!
//! Supports:
//! - N-Quads (.nq)
//! - TriG (.trig)

mod quads;

pub use quads::QuadWriter;

use oxrdf::Quad;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use thiserror::Error;

/// RDF dataset serialization format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RdfFormat {
    /// N-Quads format (.nq)
    NQuads,
    /// TriG format (.trig)
    TriG,
}

impl RdfFormat {
    /// Guess the format from a file extension
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.to_ascii_lowercase().as_str() {
            "nq" | "nquads" => Some(RdfFormat::NQuads),
            "trig" => Some(RdfFormat::TriG),
            _ => None,
        }
    }
}

/// Parse errors
#[derive(Error, Debug)]
pub enum ParseError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Parse error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Unknown file extension
    #[error("Cannot infer RDF format of {0}")]
    UnknownFormat(String),
}

pub type ParseResult<T> = Result<T, ParseError>;

/// RDF parser
pub struct RdfParser;

impl RdfParser {
    /// Parse an RDF dataset from a reader
    pub fn parse(reader: impl BufRead, format: RdfFormat) -> ParseResult<Vec<Quad>> {
        quads::parse_quads(reader, format)
    }

    /// Parse an RDF dataset from a file, inferring the format from its extension
    pub fn parse_file(path: &Path) -> ParseResult<Vec<Quad>> {
        let format = path
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(RdfFormat::from_extension)
            .ok_or_else(|| ParseError::UnknownFormat(path.display().to_string()))?;
        let file = File::open(path)?;
        Self::parse(BufReader::new(file), format)
    }
}
