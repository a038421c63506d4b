use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::domain::call::{CallId, ToolCall};
use crate::errors::TransportError;
use crate::transport::{OrchestratorRpc, ResultReport};

/// Posts a result for one call after its handler has returned `Deferred`.
#[derive(Clone)]
pub struct DeferredReporter {
    rpc: Arc<dyn OrchestratorRpc>,
    call_id: CallId,
    result_key: String,
}

impl DeferredReporter {
    pub fn call_id(&self) -> &CallId {
        &self.call_id
    }

    pub async fn post(
        &self,
        content: impl Into<String>,
        provenance: impl Into<String>,
    ) -> Result<(), TransportError> {
        self.rpc
            .post_result(ResultReport {
                call_id: self.call_id.clone(),
                result_key: self.result_key.clone(),
                content: content.into(),
                provenance: provenance.into(),
                cost: 0.0,
            })
            .await
    }
}

impl std::fmt::Debug for DeferredReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredReporter").field("call_id", &self.call_id).finish_non_exhaustive()
    }
}

/// Per-call handles passed to a handler alongside the call itself.
#[derive(Clone, Debug)]
pub struct CallContext {
    reporter: DeferredReporter,
    cancellation: CancellationToken,
}

impl CallContext {
    pub fn new(
        call: &ToolCall,
        rpc: Arc<dyn OrchestratorRpc>,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            reporter: DeferredReporter {
                rpc,
                call_id: call.call_id.clone(),
                result_key: call.untrusted_result_key.clone(),
            },
            cancellation,
        }
    }

    pub fn reporter(&self) -> DeferredReporter {
        self.reporter.clone()
    }

    /// Cancelled when the process is shutting down. Handlers should stop as
    /// soon as practical; the final report is not guaranteed to be posted.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }
}
