//! Result streaming
//!
//! Serialization runs on a blocking worker and pushes fixed-size chunks into
//! a bounded channel that feeds the response body. A full channel parks the
//! worker until the client has drained earlier chunks; a dropped body closes
//! the channel and the next write fails, which ends serialization.

use super::dispatcher::StreamableResult;
use super::negotiate::MediaType;
use crate::config::StreamingConfig;
use crate::rdf::{QuadWriter, RdfFormat, Term};
use crate::sparql::{BindingsResult, QuadStream, SolutionStream};
use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::Response;
use bytes::{Bytes, BytesMut};
use sparesults::{QueryResultsFormat, QueryResultsSerializer};
use std::io::{self, Write};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

type Chunk = io::Result<Bytes>;

/// `io::Write` adapter that forwards buffered output to the response body
struct ChannelWriter {
    sender: mpsc::Sender<Chunk>,
    buffer: BytesMut,
    chunk_size: usize,
    written: usize,
}

impl ChannelWriter {
    fn new(sender: mpsc::Sender<Chunk>, chunk_size: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            sender,
            buffer: BytesMut::with_capacity(chunk_size),
            chunk_size,
            written: 0,
        }
    }

    fn send_buffer(&mut self) -> io::Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let chunk = self.buffer.split().freeze();
        self.written += chunk.len();
        self.sender
            .blocking_send(Ok(chunk))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "response body dropped"))
    }

    /// Abort the body so the client sees a truncated response
    fn abort(&self, error: io::Error) {
        if !self.sender.is_closed() {
            let _ = self.sender.blocking_send(Err(error));
        }
    }
}

impl Write for ChannelWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        if self.buffer.len() >= self.chunk_size {
            self.send_buffer()?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.send_buffer()
    }
}

fn engine_failure(error: impl ToString) -> io::Error {
    io::Error::new(io::ErrorKind::Other, error.to_string())
}

/// Stream `result` as `media_type`.
///
/// Status and `Content-Type` are fixed here, before the first byte exists;
/// later failures can only cut the body short.
pub fn stream(result: StreamableResult, media_type: MediaType, config: &StreamingConfig) -> Response {
    let (sender, receiver) = mpsc::channel(config.channel_capacity.max(1));
    let mut writer = ChannelWriter::new(sender, config.chunk_size);

    tokio::task::spawn_blocking(move || {
        match write_result(result, media_type, &mut writer).and_then(|()| writer.flush()) {
            Ok(()) => debug!(bytes = writer.written, %media_type, "result stream completed"),
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                warn!(bytes = writer.written, "client went away, result stream aborted");
            }
            Err(e) => {
                warn!(bytes = writer.written, "result stream aborted: {}", e);
                writer.abort(e);
            }
        }
    });

    let mut response = Response::new(Body::from_stream(ReceiverStream::new(receiver)));
    *response.status_mut() = StatusCode::OK;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(media_type.as_str()));
    response
}

fn write_result(result: StreamableResult, media_type: MediaType, writer: &mut ChannelWriter) -> io::Result<()> {
    match result {
        StreamableResult::Bindings(bindings) => write_bindings(bindings, media_type, writer),
        StreamableResult::Quads(quads) => write_quads(quads, media_type, writer),
    }
}

fn write_bindings(bindings: BindingsResult, media_type: MediaType, writer: &mut ChannelWriter) -> io::Result<()> {
    let format = match media_type {
        MediaType::Json => return write_plain_json(bindings, writer),
        MediaType::SparqlResultsXml => QueryResultsFormat::Xml,
        MediaType::SparqlResultsJson => QueryResultsFormat::Json,
        MediaType::TriG | MediaType::NQuads => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("bindings cannot be written as {}", media_type),
            ))
        }
    };
    let serializer = QueryResultsSerializer::from_format(format);

    match bindings {
        BindingsResult::Boolean(value) => {
            serializer.serialize_boolean_to_writer(&mut *writer, value)?;
        }
        BindingsResult::Solutions(solutions) => {
            let variables = solutions.variables().to_vec();
            let mut solutions_writer = serializer.serialize_solutions_to_writer(&mut *writer, variables)?;
            for solution in solutions {
                let solution = solution.map_err(engine_failure)?;
                solutions_writer.serialize(solution.iter())?;
            }
            solutions_writer.finish()?;
        }
    }
    Ok(())
}

/// Plain JSON: an array of `{"?var": "term"}` objects, or a bare boolean
fn write_plain_json(bindings: BindingsResult, writer: &mut ChannelWriter) -> io::Result<()> {
    match bindings {
        BindingsResult::Boolean(value) => serde_json::to_writer(&mut *writer, &value)?,
        BindingsResult::Solutions(solutions) => write_json_rows(solutions, writer)?,
    }
    Ok(())
}

fn write_json_rows(solutions: SolutionStream, writer: &mut ChannelWriter) -> io::Result<()> {
    let variables = solutions.variables().to_vec();
    writer.write_all(b"[")?;
    for (row, solution) in solutions.enumerate() {
        let solution = solution.map_err(engine_failure)?;
        if row > 0 {
            writer.write_all(b",")?;
        }
        writer.write_all(b"{")?;
        let mut first = true;
        for variable in &variables {
            let Some(term) = solution.get(variable) else {
                continue;
            };
            if !first {
                writer.write_all(b",")?;
            }
            first = false;
            serde_json::to_writer(&mut *writer, &format!("?{}", variable.as_str()))?;
            writer.write_all(b":")?;
            serde_json::to_writer(&mut *writer, &term_string(term))?;
        }
        writer.write_all(b"}")?;
    }
    writer.write_all(b"]")
}

fn term_string(term: &Term) -> String {
    match term {
        Term::NamedNode(node) => node.as_str().to_string(),
        other => other.to_string(),
    }
}

fn write_quads(quads: QuadStream, media_type: MediaType, writer: &mut ChannelWriter) -> io::Result<()> {
    let format = match media_type {
        MediaType::TriG => RdfFormat::TriG,
        MediaType::NQuads => RdfFormat::NQuads,
        other => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("quads cannot be written as {}", other),
            ))
        }
    };
    let mut quad_writer = QuadWriter::new(&mut *writer, format);
    for quad in quads {
        quad_writer.write(&quad.map_err(engine_failure)?)?;
    }
    quad_writer.finish()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rdf::{GraphName, Literal, NamedNode, Quad, Variable};
    use crate::sparql::{EngineError, QuerySolution};
    use http_body_util::BodyExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn config(chunk_size: usize) -> StreamingConfig {
        StreamingConfig {
            chunk_size,
            channel_capacity: 2,
        }
    }

    fn people(count: usize) -> SolutionStream {
        let name = Variable::new_unchecked("name");
        let rows: Vec<_> = (0..count)
            .map(|i| {
                let mut solution = QuerySolution::new();
                solution.bind(name.clone(), Literal::new_simple_literal(format!("person{i}")).into());
                Ok(solution)
            })
            .collect();
        SolutionStream::new(vec![name], rows.into_iter())
    }

    async fn body_text(response: Response) -> Result<String, axum::Error> {
        let bytes = response.into_body().collect().await?.to_bytes();
        Ok(String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_sparql_json_stream() {
        let result = StreamableResult::Bindings(BindingsResult::Solutions(people(3)));
        let response = stream(result, MediaType::SparqlResultsJson, &config(16));
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/sparql-results+json"
        );

        let body: serde_json::Value = serde_json::from_str(&body_text(response).await.unwrap()).unwrap();
        assert_eq!(body["head"]["vars"], serde_json::json!(["name"]));
        assert_eq!(body["results"]["bindings"].as_array().unwrap().len(), 3);
        assert_eq!(body["results"]["bindings"][2]["name"]["value"], "person2");
    }

    #[tokio::test]
    async fn test_plain_json_stream() {
        let result = StreamableResult::Bindings(BindingsResult::Solutions(people(2)));
        let response = stream(result, MediaType::Json, &config(4));
        let body: serde_json::Value = serde_json::from_str(&body_text(response).await.unwrap()).unwrap();
        assert_eq!(
            body,
            serde_json::json!([{ "?name": "\"person0\"" }, { "?name": "\"person1\"" }])
        );

        let response = stream(
            StreamableResult::Bindings(BindingsResult::Boolean(true)),
            MediaType::Json,
            &config(4),
        );
        assert_eq!(body_text(response).await.unwrap(), "true");
    }

    #[tokio::test]
    async fn test_xml_boolean() {
        let response = stream(
            StreamableResult::Bindings(BindingsResult::Boolean(false)),
            MediaType::SparqlResultsXml,
            &config(8192),
        );
        let body = body_text(response).await.unwrap();
        assert!(body.contains("<boolean>false</boolean>"));
    }

    #[tokio::test]
    async fn test_nquads_stream() {
        let quads: Vec<_> = (0..50)
            .map(|i| {
                Ok(Quad::new(
                    NamedNode::new(format!("urn:s{i}")).unwrap(),
                    NamedNode::new("urn:p").unwrap(),
                    Literal::new_simple_literal("v"),
                    GraphName::DefaultGraph,
                ))
            })
            .collect();
        let response = stream(
            StreamableResult::Quads(QuadStream::new(quads.into_iter())),
            MediaType::NQuads,
            &config(64),
        );
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/n-quads");
        let body = body_text(response).await.unwrap();
        assert_eq!(body.lines().count(), 50);
        assert!(body.starts_with("<urn:s0> <urn:p> \"v\" ."));
    }

    #[tokio::test]
    async fn test_mid_stream_failure_aborts_body() {
        let name = Variable::new_unchecked("name");
        let rows = (0..100).map(move |i| {
            if i == 50 {
                Err(EngineError::Evaluation("boom".to_string()))
            } else {
                let mut solution = QuerySolution::new();
                solution.bind(name.clone(), Literal::new_simple_literal("x").into());
                Ok(solution)
            }
        });
        let result = StreamableResult::Bindings(BindingsResult::Solutions(SolutionStream::new(
            vec![Variable::new_unchecked("name")],
            rows,
        )));

        let response = stream(result, MediaType::SparqlResultsJson, &config(32));
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.is_err());
    }

    #[tokio::test]
    async fn test_unread_body_parks_the_serializer() {
        let pulled = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&pulled);
        let name = Variable::new_unchecked("name");
        let rows = (0..1_000_000).map(move |i| {
            counter.fetch_add(1, Ordering::SeqCst);
            let mut solution = QuerySolution::new();
            solution.bind(name.clone(), Literal::new_simple_literal(format!("person{i}")).into());
            Ok(solution)
        });
        let result = StreamableResult::Bindings(BindingsResult::Solutions(SolutionStream::new(
            vec![Variable::new_unchecked("name")],
            rows,
        )));
        let response = stream(result, MediaType::SparqlResultsJson, &config(1024));

        tokio::time::sleep(Duration::from_millis(200)).await;
        let parked = pulled.load(Ordering::SeqCst);
        assert!(parked > 0);
        assert!(parked < 5_000, "serializer ran ahead of the client: {parked} rows");
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(pulled.load(Ordering::SeqCst), parked);

        drop(response);
        tokio::time::sleep(Duration::from_millis(200)).await;
        let stopped = pulled.load(Ordering::SeqCst);
        assert!(stopped < 5_000);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(pulled.load(Ordering::SeqCst), stopped);
    }
}
