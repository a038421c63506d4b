use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use toolrelay_core::{CallSubscription, OrchestratorRpc, RecordIdentity, ToolCall, TransportError};

use crate::executor::CallExecutor;
use crate::workset::WorkSet;

/// Why the dispatch loop returned without a transport error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchEnd {
    StreamClosed,
    Shutdown,
}

/// Pulls calls off one subscription and runs each on the session WorkSet.
///
/// Capacity is checked before the next record is read, so a full WorkSet
/// leaves pending calls queued at the orchestrator.
pub struct Dispatcher {
    executor: Arc<CallExecutor>,
    rpc: Arc<dyn OrchestratorRpc>,
    poll_interval: Duration,
    session_id: String,
}

impl Dispatcher {
    pub fn new(
        executor: Arc<CallExecutor>,
        rpc: Arc<dyn OrchestratorRpc>,
        poll_interval: Duration,
        session_id: impl Into<String>,
    ) -> Self {
        Self { executor, rpc, poll_interval, session_id: session_id.into() }
    }

    pub async fn run(
        &self,
        subscription: &mut dyn CallSubscription,
        workset: &mut WorkSet,
        shutdown: &CancellationToken,
    ) -> Result<DispatchEnd, TransportError> {
        loop {
            workset.reap();
            while workset.is_full() {
                warn!(
                    event_name = "runtime.dispatcher.backpressure",
                    correlation_id = %self.session_id,
                    in_flight = workset.in_flight(),
                    "too many tasks in flight; waiting before reading more calls"
                );
                tokio::select! {
                    _ = shutdown.cancelled() => return Ok(DispatchEnd::Shutdown),
                    _ = tokio::time::sleep(self.poll_interval) => {}
                }
                workset.reap();
            }

            let record = tokio::select! {
                _ = shutdown.cancelled() => return Ok(DispatchEnd::Shutdown),
                record = subscription.next_record() => record?,
            };

            let Some(record) = record else {
                info!(
                    event_name = "runtime.dispatcher.stream_closed",
                    correlation_id = %self.session_id,
                    "call subscription ended"
                );
                return Ok(DispatchEnd::StreamClosed);
            };

            let identity = RecordIdentity::of(&record);
            match (ToolCall::from_record(record), identity) {
                (Ok(call), _) => self.spawn_execution(call, workset, shutdown),
                (Err(decode_error), Some(identity)) => {
                    self.spawn_rejection(identity, decode_error.to_string(), workset)
                }
                (Err(decode_error), None) => warn!(
                    event_name = "runtime.dispatcher.record_invalid",
                    correlation_id = %self.session_id,
                    error = %decode_error,
                    "skipping call record that does not decode"
                ),
            }
        }
    }

    fn spawn_rejection(&self, identity: RecordIdentity, reason: String, workset: &mut WorkSet) {
        warn!(
            event_name = "runtime.dispatcher.record_rejected",
            correlation_id = %identity.call_id,
            session_id = %self.session_id,
            error = %reason,
            "call record does not decode; answering with a failure result"
        );

        let executor = Arc::clone(&self.executor);
        let rpc = Arc::clone(&self.rpc);
        workset.spawn(async move {
            let call_id = identity.call_id.clone();
            if let Err(failure) = executor.reject_record(identity, &reason, rpc).await {
                error!(
                    event_name = "runtime.executor.report_failed",
                    correlation_id = %call_id,
                    error = %failure,
                    "could not report call outcome to the orchestrator"
                );
            }
        });
    }

    fn spawn_execution(&self, call: ToolCall, workset: &mut WorkSet, shutdown: &CancellationToken) {
        debug!(
            event_name = "runtime.dispatcher.call_received",
            correlation_id = %call.call_id,
            session_id = %self.session_id,
            tool_name = %call.tool_name,
            "dispatching tool call"
        );

        let executor = Arc::clone(&self.executor);
        let rpc = Arc::clone(&self.rpc);
        let cancellation = shutdown.child_token();
        workset.spawn(async move {
            let call_id = call.call_id.clone();
            let tool_name = call.tool_name.clone();
            if let Err(failure) = executor.execute(call, rpc, cancellation).await {
                error!(
                    event_name = "runtime.executor.report_failed",
                    correlation_id = %call_id,
                    tool_name = %tool_name,
                    error = %failure,
                    "could not report call outcome to the orchestrator"
                );
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Utc;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    use toolrelay_core::{
        CallContext, CallId, ExecutionOutcome, SubscriptionFilter, Tool, ToolCall, ToolCatalog,
        ToolDescriptor, ToolError, TransportClient, TransportError,
    };

    use super::{DispatchEnd, Dispatcher};
    use crate::executor::{CallExecutor, FAILURE_PROVENANCE};
    use crate::loopback::LoopbackTransport;
    use crate::status::WorkSetGauge;
    use crate::workset::WorkSet;

    struct Echo;

    #[async_trait]
    impl Tool for Echo {
        fn descriptor(&self) -> ToolDescriptor {
            ToolDescriptor::new("echo", "Echoes arguments", json!({}))
        }

        async fn execute(
            &self,
            call: &ToolCall,
            _ctx: &CallContext,
        ) -> Result<ExecutionOutcome, ToolError> {
            Ok(ExecutionOutcome::immediate(call.arguments.clone(), "echo"))
        }
    }

    fn echo_call(id: &str) -> ToolCall {
        ToolCall {
            call_id: CallId(id.to_owned()),
            thread_id: "thread".to_owned(),
            alt_index: 0,
            call_sequence: 0,
            tool_name: "echo".to_owned(),
            arguments: id.to_owned(),
            created_at: Utc::now(),
            untrusted_result_key: format!("key-{id}"),
            caller_identity: String::new(),
            location_scope: None,
            confirmed_by_human: None,
        }
    }

    async fn dispatcher(transport: &LoopbackTransport) -> Dispatcher {
        let rpc = transport.open_rpc().await.expect("rpc opens");
        let executor = Arc::new(CallExecutor::new(Arc::new(ToolCatalog::new().with(Echo))));
        Dispatcher::new(executor, rpc, Duration::from_secs(1), "session-test")
    }

    #[tokio::test]
    async fn malformed_records_are_skipped() {
        let transport = LoopbackTransport::new();
        transport.push_record(json!({"not": "a call"}));
        transport.push_call(&echo_call("call-1")).expect("call encodes");
        transport.close_stream();

        let dispatcher = dispatcher(&transport).await;
        let mut subscription = transport
            .open_subscription(&SubscriptionFilter::default())
            .await
            .expect("subscription opens");
        let mut workset = WorkSet::new(Arc::new(WorkSetGauge::new(4)), "session-test");

        let end = dispatcher
            .run(&mut *subscription, &mut workset, &CancellationToken::new())
            .await
            .expect("stream closes cleanly");
        workset.drain(None).await;

        assert_eq!(end, DispatchEnd::StreamClosed);
        let results = transport.results();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].content, "call-1");
    }

    #[tokio::test]
    async fn identifiable_records_are_answered_even_when_they_do_not_decode() {
        let transport = LoopbackTransport::new();
        transport.push_record(json!({
            "call_id": "call-no-timestamp",
            "tool_name": "echo",
            "arguments": "hi",
            "untrusted_result_key": "key-no-timestamp"
        }));
        transport.push_record(json!({
            "call_id": "call-bad-timestamp",
            "tool_name": "echo",
            "arguments": "hi",
            "created_at": "yesterday",
            "untrusted_result_key": "key-bad-timestamp"
        }));
        transport.close_stream();

        let dispatcher = dispatcher(&transport).await;
        let mut subscription = transport
            .open_subscription(&SubscriptionFilter::default())
            .await
            .expect("subscription opens");
        let mut workset = WorkSet::new(Arc::new(WorkSetGauge::new(4)), "session-test");

        dispatcher
            .run(&mut *subscription, &mut workset, &CancellationToken::new())
            .await
            .expect("stream closes cleanly");
        workset.drain(None).await;

        let mut results = transport.results();
        results.sort_by(|left, right| left.call_id.as_str().cmp(right.call_id.as_str()));
        assert_eq!(results.len(), 2);

        assert_eq!(results[0].call_id.as_str(), "call-bad-timestamp");
        assert_eq!(results[0].result_key, "key-bad-timestamp");
        assert!(results[0].content.starts_with("InvalidRecord: "), "{}", results[0].content);
        assert_eq!(results[0].provenance, FAILURE_PROVENANCE);

        assert_eq!(results[1].call_id.as_str(), "call-no-timestamp");
        assert_eq!(results[1].content, "hi");
    }

    #[tokio::test]
    async fn transport_failure_ends_the_loop() {
        let transport = LoopbackTransport::new();
        transport.disconnect(TransportError::Io("reset by peer".to_owned()));

        let dispatcher = dispatcher(&transport).await;
        let mut subscription = transport
            .open_subscription(&SubscriptionFilter::default())
            .await
            .expect("subscription opens");
        let mut workset = WorkSet::new(Arc::new(WorkSetGauge::new(4)), "session-test");

        let error = dispatcher
            .run(&mut *subscription, &mut workset, &CancellationToken::new())
            .await
            .expect_err("disconnect surfaces");
        assert_eq!(error, TransportError::Io("reset by peer".to_owned()));
    }

    #[tokio::test(start_paused = true)]
    async fn full_workset_stops_reading_until_shutdown() {
        let transport = LoopbackTransport::new();
        transport.push_call(&echo_call("call-1")).expect("call encodes");

        let dispatcher = dispatcher(&transport).await;
        let mut subscription = transport
            .open_subscription(&SubscriptionFilter::default())
            .await
            .expect("subscription opens");
        let gauge = Arc::new(WorkSetGauge::new(1));
        let mut workset = WorkSet::new(Arc::clone(&gauge), "session-test");
        workset.spawn(async { tokio::time::sleep(Duration::from_secs(3_600)).await });

        let shutdown = CancellationToken::new();
        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            trigger.cancel();
        });

        let end = dispatcher
            .run(&mut *subscription, &mut workset, &shutdown)
            .await
            .expect("shutdown is clean");

        assert_eq!(end, DispatchEnd::Shutdown);
        assert_eq!(transport.pending_records(), 1, "no record read while full");
        assert!(transport.results().is_empty());
        workset.drain(Some(Duration::from_secs(1))).await;
    }
}
