//! N-Quads / TriG implementation on top of rio

use super::{ParseError, ParseResult, RdfFormat};
use oxrdf::{BlankNode, GraphName, Literal, NamedNode, Quad, Subject, Term};
use rio_api::formatter::QuadsFormatter;
use rio_api::parser::QuadsParser;
use rio_turtle::{NQuadsFormatter, NQuadsParser, TriGFormatter, TriGParser, TurtleError};
use std::io::{self, BufRead, Write};

const XSD_STRING: &str = "http://www.w3.org/2001/XMLSchema#string";

/// Parse a quad document into owned quads
pub(super) fn parse_quads(reader: impl BufRead, format: RdfFormat) -> ParseResult<Vec<Quad>> {
    let mut quads = Vec::new();
    let mut on_quad = |q: rio_api::model::Quad<'_>| -> Result<(), TurtleError> {
        let quad = convert_quad(q).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
        quads.push(quad);
        Ok(())
    };

    let res = match format {
        RdfFormat::NQuads => NQuadsParser::new(reader).parse_all(&mut on_quad),
        RdfFormat::TriG => TriGParser::new(reader, None).parse_all(&mut on_quad),
    };

    match res {
        Ok(()) => Ok(quads),
        Err(e) => Err(ParseError::Parse(e.to_string())),
    }
}

enum Formatter<W: Write> {
    NQuads(NQuadsFormatter<W>),
    TriG(TriGFormatter<W>),
}

/// Incremental quad writer
///
/// Every call to [`QuadWriter::write`] hands the quad straight to the
/// underlying formatter, so output reaches `W` as it is produced.
pub struct QuadWriter<W: Write> {
    formatter: Formatter<W>,
}

impl<W: Write> QuadWriter<W> {
    /// Start a new document in `format`
    pub fn new(write: W, format: RdfFormat) -> Self {
        let formatter = match format {
            RdfFormat::NQuads => Formatter::NQuads(NQuadsFormatter::new(write)),
            RdfFormat::TriG => Formatter::TriG(TriGFormatter::new(write)),
        };
        Self { formatter }
    }

    /// Write one quad
    pub fn write(&mut self, quad: &Quad) -> io::Result<()> {
        let rio_quad = to_rio_quad(quad)?;
        match &mut self.formatter {
            Formatter::NQuads(f) => f.format(&rio_quad),
            Formatter::TriG(f) => f.format(&rio_quad),
        }
    }

    /// Close the document and return the underlying writer
    pub fn finish(self) -> io::Result<W> {
        match self.formatter {
            Formatter::NQuads(f) => f.finish(),
            Formatter::TriG(f) => f.finish(),
        }
    }
}

fn unsupported(what: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("{} cannot be serialized: RDF-star triples are not supported", what),
    )
}

fn to_rio_quad(quad: &Quad) -> io::Result<rio_api::model::Quad<'_>> {
    #[allow(unreachable_patterns)]
    let subject = match &quad.subject {
        Subject::NamedNode(n) => rio_api::model::Subject::NamedNode(rio_api::model::NamedNode { iri: n.as_str() }),
        Subject::BlankNode(b) => rio_api::model::Subject::BlankNode(rio_api::model::BlankNode { id: b.as_str() }),
        _ => return Err(unsupported("subject")),
    };

    #[allow(unreachable_patterns)]
    let object = match &quad.object {
        Term::NamedNode(n) => rio_api::model::Term::NamedNode(rio_api::model::NamedNode { iri: n.as_str() }),
        Term::BlankNode(b) => rio_api::model::Term::BlankNode(rio_api::model::BlankNode { id: b.as_str() }),
        Term::Literal(l) => rio_api::model::Term::Literal(to_rio_literal(l)),
        _ => return Err(unsupported("object")),
    };

    let graph_name = match &quad.graph_name {
        GraphName::NamedNode(n) => Some(rio_api::model::GraphName::NamedNode(rio_api::model::NamedNode { iri: n.as_str() })),
        GraphName::BlankNode(b) => Some(rio_api::model::GraphName::BlankNode(rio_api::model::BlankNode { id: b.as_str() })),
        GraphName::DefaultGraph => None,
    };

    Ok(rio_api::model::Quad {
        subject,
        predicate: rio_api::model::NamedNode { iri: quad.predicate.as_str() },
        object,
        graph_name,
    })
}

fn to_rio_literal(literal: &Literal) -> rio_api::model::Literal<'_> {
    if let Some(language) = literal.language() {
        return rio_api::model::Literal::LanguageTaggedString {
            value: literal.value(),
            language,
        };
    }
    let datatype = literal.datatype();
    if datatype.as_str() == XSD_STRING {
        rio_api::model::Literal::Simple { value: literal.value() }
    } else {
        rio_api::model::Literal::Typed {
            value: literal.value(),
            datatype: rio_api::model::NamedNode { iri: datatype.as_str() },
        }
    }
}

fn convert_quad(q: rio_api::model::Quad<'_>) -> ParseResult<Quad> {
    let graph_name = match q.graph_name {
        None => GraphName::DefaultGraph,
        Some(rio_api::model::GraphName::NamedNode(n)) => GraphName::NamedNode(convert_named_node(n)?),
        Some(rio_api::model::GraphName::BlankNode(b)) => GraphName::BlankNode(convert_blank_node(b)?),
    };
    Ok(Quad::new(
        convert_subject(q.subject)?,
        convert_named_node(q.predicate)?,
        convert_object(q.object)?,
        graph_name,
    ))
}

fn convert_named_node(n: rio_api::model::NamedNode<'_>) -> ParseResult<NamedNode> {
    NamedNode::new(n.iri).map_err(|e| ParseError::Parse(e.to_string()))
}

fn convert_blank_node(b: rio_api::model::BlankNode<'_>) -> ParseResult<BlankNode> {
    BlankNode::new(b.id).map_err(|e| ParseError::Parse(e.to_string()))
}

fn convert_subject(s: rio_api::model::Subject<'_>) -> ParseResult<Subject> {
    #[allow(unreachable_patterns)]
    match s {
        rio_api::model::Subject::NamedNode(n) => Ok(convert_named_node(n)?.into()),
        rio_api::model::Subject::BlankNode(b) => Ok(convert_blank_node(b)?.into()),
        _ => Err(ParseError::Parse("Unsupported subject type".to_string())),
    }
}

fn convert_object(o: rio_api::model::Term<'_>) -> ParseResult<Term> {
    #[allow(unreachable_patterns)]
    match o {
        rio_api::model::Term::NamedNode(n) => Ok(convert_named_node(n)?.into()),
        rio_api::model::Term::BlankNode(b) => Ok(convert_blank_node(b)?.into()),
        rio_api::model::Term::Literal(l) => {
            let literal = match l {
                rio_api::model::Literal::Simple { value } => Literal::new_simple_literal(value),
                rio_api::model::Literal::LanguageTaggedString { value, language } => {
                    Literal::new_language_tagged_literal(value, language)
                        .map_err(|e| ParseError::Parse(e.to_string()))?
                }
                rio_api::model::Literal::Typed { value, datatype } => {
                    Literal::new_typed_literal(value, convert_named_node(datatype)?)
                }
            };
            Ok(literal.into())
        }
        _ => Err(ParseError::Parse("Unsupported object type".to_string())),
    }
}
