//! Query dispatch: runs an operation and decides what the response will carry

use super::error::ProtocolError;
use super::resolver::{IncomingOperation, OperationMethod};
use crate::sparql::{BindingsResult, QueryEngine, QueryResult, QuadStream, ResultKind};
use tracing::{debug, error};

/// A read-only result headed for the streamer
#[derive(Debug)]
pub enum StreamableResult {
    Bindings(BindingsResult),
    Quads(QuadStream),
}

impl StreamableResult {
    pub fn kind(&self) -> ResultKind {
        match self {
            StreamableResult::Bindings(_) => ResultKind::Bindings,
            StreamableResult::Quads(_) => ResultKind::Quads,
        }
    }
}

/// What the handler must do next
#[derive(Debug)]
pub enum DispatchOutcome {
    /// Update applied; respond with no content
    Completed,
    /// Query prepared; negotiate and stream it
    Stream(StreamableResult),
}

/// Submit `operation` to `engine`.
///
/// Updates are only executed for POST. A GET carrying an update is refused
/// before the mutation is ever started.
pub async fn dispatch(
    operation: &IncomingOperation,
    engine: &dyn QueryEngine,
) -> Result<DispatchOutcome, ProtocolError> {
    let result = engine.execute(&operation.text).await.map_err(|e| {
        error!("SPARQL execution failed: {}", e);
        ProtocolError::from(e)
    })?;

    match result {
        QueryResult::Void(update) => {
            if operation.method == OperationMethod::Get {
                debug!("refusing update submitted with GET");
                return Err(ProtocolError::MethodNotAllowedForUpdate);
            }
            update.execute().await.map_err(|e| {
                error!("SPARQL update failed: {}", e);
                ProtocolError::from(e)
            })?;
            debug!("update committed");
            Ok(DispatchOutcome::Completed)
        }
        QueryResult::Bindings(bindings) => Ok(DispatchOutcome::Stream(StreamableResult::Bindings(bindings))),
        QueryResult::Quads(quads) => Ok(DispatchOutcome::Stream(StreamableResult::Quads(quads))),
    }
}
