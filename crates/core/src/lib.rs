//! Core types for the toolrelay worker: the call data model, the tool catalog,
//! the transport contract and configuration.

pub mod catalog;
pub mod config;
pub mod context;
pub mod domain;
pub mod errors;
pub mod transport;

pub use catalog::{Tool, ToolCatalog};
pub use context::{CallContext, DeferredReporter};
pub use domain::call::{CallId, ConfirmationState, RecordIdentity, ToolCall};
pub use domain::descriptor::{ScopeFilter, SubscriptionFilter, ToolDescriptor};
pub use domain::outcome::{ConfirmationRequest, ExecutionOutcome};
pub use errors::{ToolError, TransportError};
pub use transport::{
    CallSubscription, ConfirmationDispatch, OrchestratorRpc, ResultReport, ToolAnnouncement,
    TransportClient,
};
