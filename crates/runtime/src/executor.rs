use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use toolrelay_core::{
    CallContext, CallId, ConfirmationDispatch, ConfirmationRequest, ExecutionOutcome,
    OrchestratorRpc, RecordIdentity, ResultReport, ToolCall, ToolCatalog, ToolError,
    TransportError,
};

/// Provenance stamped on results the executor synthesizes for failed calls.
pub const FAILURE_PROVENANCE: &str = "toolrelay.executor";

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("posting result for `{call_id}` failed: {source}")]
    PostResult { call_id: String, source: TransportError },
    #[error("requesting confirmation for `{call_id}` failed: {source}")]
    Confirmation { call_id: String, source: TransportError },
}

/// Which branch an execution took.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExecutionReport {
    Posted,
    Deferred,
    AlreadyReported,
    ConfirmationRequested,
    ConfirmationAlreadyPending,
    FailurePosted { kind: String },
}

enum HandlerFailure {
    Error(ToolError),
    Panic(String),
}

impl HandlerFailure {
    fn kind(&self) -> &str {
        match self {
            Self::Error(error) => error.kind(),
            Self::Panic(_) => "Panic",
        }
    }

    fn message(&self) -> String {
        match self {
            Self::Error(error) => error_chain(error),
            Self::Panic(message) => message.clone(),
        }
    }
}

pub struct CallExecutor {
    catalog: Arc<ToolCatalog>,
}

impl CallExecutor {
    pub fn new(catalog: Arc<ToolCatalog>) -> Self {
        Self { catalog }
    }

    pub async fn execute(
        &self,
        call: ToolCall,
        rpc: Arc<dyn OrchestratorRpc>,
        cancellation: CancellationToken,
    ) -> Result<ExecutionReport, ExecutionError> {
        debug!(
            event_name = "runtime.executor.started",
            correlation_id = %call.call_id,
            tool_name = %call.tool_name,
            thread_id = %call.thread_id,
            call_sequence = call.call_sequence,
            "executing tool call"
        );

        let ctx = CallContext::new(&call, Arc::clone(&rpc), cancellation);
        let outcome = match self.catalog.get(&call.tool_name) {
            Some(tool) => match AssertUnwindSafe(tool.execute(&call, &ctx)).catch_unwind().await {
                Ok(result) => result.map_err(HandlerFailure::Error),
                Err(payload) => Err(HandlerFailure::Panic(panic_message(payload))),
            },
            None => Err(HandlerFailure::Error(ToolError::UnknownTool(call.tool_name.clone()))),
        };
        debug!(
            event_name = "runtime.executor.handler_returned",
            correlation_id = %call.call_id,
            tool_name = %call.tool_name,
            outcome = outcome.as_ref().map_or("failure", ExecutionOutcome::label),
            "tool handler returned"
        );

        match outcome {
            Ok(ExecutionOutcome::Immediate { content, provenance }) => {
                post(&*rpc, &call.call_id, &call.untrusted_result_key, content, provenance).await?;
                Ok(ExecutionReport::Posted)
            }
            Ok(ExecutionOutcome::Deferred) => {
                debug!(
                    event_name = "runtime.executor.deferred",
                    correlation_id = %call.call_id,
                    tool_name = %call.tool_name,
                    "handler deferred its result"
                );
                Ok(ExecutionReport::Deferred)
            }
            Ok(ExecutionOutcome::AlreadyReported) => Ok(ExecutionReport::AlreadyReported),
            Ok(ExecutionOutcome::ConfirmationNeeded(request)) => {
                request_confirmation(&*rpc, &call, request).await
            }
            Err(failure) => {
                let kind = failure.kind().to_owned();
                let content = format!("{kind}: {}", failure.message());
                warn!(
                    event_name = "runtime.executor.handler_failed",
                    correlation_id = %call.call_id,
                    tool_name = %call.tool_name,
                    error_kind = %kind,
                    error = %content,
                    "tool handler failed; reporting failure result"
                );
                let provenance = FAILURE_PROVENANCE.to_owned();
                post(&*rpc, &call.call_id, &call.untrusted_result_key, content, provenance).await?;
                Ok(ExecutionReport::FailurePosted { kind })
            }
        }
    }

    /// Answers a record that names a call but does not decode, so the caller
    /// gets an error result instead of waiting on a call that never runs.
    pub async fn reject_record(
        &self,
        identity: RecordIdentity,
        reason: &str,
        rpc: Arc<dyn OrchestratorRpc>,
    ) -> Result<ExecutionReport, ExecutionError> {
        let content = format!("{INVALID_RECORD_KIND}: {reason}");
        let provenance = FAILURE_PROVENANCE.to_owned();
        post(&*rpc, &identity.call_id, &identity.result_key, content, provenance).await?;
        Ok(ExecutionReport::FailurePosted { kind: INVALID_RECORD_KIND.to_owned() })
    }
}

const INVALID_RECORD_KIND: &str = "InvalidRecord";

async fn post(
    rpc: &dyn OrchestratorRpc,
    call_id: &CallId,
    result_key: &str,
    content: String,
    provenance: String,
) -> Result<(), ExecutionError> {
    rpc.post_result(ResultReport {
        call_id: call_id.clone(),
        result_key: result_key.to_owned(),
        content,
        provenance,
        cost: 0.0,
    })
    .await
    .map_err(|source| ExecutionError::PostResult { call_id: call_id.to_string(), source })
}

async fn request_confirmation(
    rpc: &dyn OrchestratorRpc,
    call: &ToolCall,
    request: ConfirmationRequest,
) -> Result<ExecutionReport, ExecutionError> {
    let setup_key = request.setup_key.clone();
    let dispatch = ConfirmationDispatch {
        call_id: call.call_id.clone(),
        setup_key: request.setup_key,
        command_text: request.command_text,
        explanation: request.explanation,
    };

    match rpc.request_confirmation(dispatch).await {
        Ok(()) => {
            info!(
                event_name = "runtime.executor.confirmation_requested",
                correlation_id = %call.call_id,
                tool_name = %call.tool_name,
                setup_key = %setup_key,
                "human confirmation requested"
            );
            Ok(ExecutionReport::ConfirmationRequested)
        }
        Err(error) if error.is_confirmation_already_requested() => {
            debug!(
                event_name = "runtime.executor.confirmation_duplicate",
                correlation_id = %call.call_id,
                setup_key = %setup_key,
                "confirmation already pending for this call"
            );
            Ok(ExecutionReport::ConfirmationAlreadyPending)
        }
        Err(source) => {
            Err(ExecutionError::Confirmation { call_id: call.call_id.to_string(), source })
        }
    }
}

fn error_chain(error: &ToolError) -> String {
    match error {
        ToolError::Other(inner) => format!("{inner:#}"),
        other => other.to_string(),
    }
}

pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        return (*message).to_owned();
    }
    if let Some(message) = payload.downcast_ref::<String>() {
        return message.clone();
    }
    "handler panicked".to_owned()
}
