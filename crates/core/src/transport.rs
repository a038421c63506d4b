//! Contract between the runtime and the orchestrator transport.
//!
//! The transport client owns connection setup, authentication and low-level
//! retry. The runtime only opens an RPC channel and a subscription per session;
//! both handles may be shared by many concurrent tasks.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::call::CallId;
use crate::domain::descriptor::{ScopeFilter, SubscriptionFilter};
use crate::errors::TransportError;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResultReport {
    pub call_id: CallId,
    pub result_key: String,
    pub content: String,
    pub provenance: String,
    pub cost: f64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationDispatch {
    pub call_id: CallId,
    pub setup_key: String,
    pub command_text: String,
    pub explanation: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolAnnouncement {
    pub name: String,
    pub description: String,
    pub parameter_schema: Value,
    pub scope: ScopeFilter,
}

#[async_trait]
pub trait OrchestratorRpc: Send + Sync {
    async fn post_result(&self, report: ResultReport) -> Result<(), TransportError>;
    async fn request_confirmation(
        &self,
        request: ConfirmationDispatch,
    ) -> Result<(), TransportError>;
    async fn announce_tool(&self, announcement: ToolAnnouncement) -> Result<(), TransportError>;
}

#[async_trait]
pub trait CallSubscription: Send {
    /// Next raw call record. `Ok(None)` is a graceful end of stream.
    async fn next_record(&mut self) -> Result<Option<Value>, TransportError>;
}

#[async_trait]
pub trait TransportClient: Send + Sync {
    async fn open_rpc(&self) -> Result<Arc<dyn OrchestratorRpc>, TransportError>;
    async fn open_subscription(
        &self,
        filter: &SubscriptionFilter,
    ) -> Result<Box<dyn CallSubscription>, TransportError>;

    fn mode(&self) -> &'static str;
}
