use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use toolrelay_core::{OrchestratorRpc, ScopeFilter, ToolAnnouncement, ToolDescriptor};

/// Re-announces every served tool so the orchestrator keeps routing to this
/// worker. A failed announcement restarts the whole pass after a retry delay.
pub struct Heartbeat {
    descriptors: Vec<ToolDescriptor>,
    scope: ScopeFilter,
    interval: Duration,
    retry: Duration,
}

impl Heartbeat {
    pub fn new(
        descriptors: Vec<ToolDescriptor>,
        scope: ScopeFilter,
        interval: Duration,
        retry: Duration,
    ) -> Self {
        Self { descriptors, scope, interval, retry }
    }

    pub async fn run(
        self,
        rpc: Arc<dyn OrchestratorRpc>,
        session_id: String,
        cancel: CancellationToken,
    ) {
        loop {
            // A stalled announcement must not outlive the session.
            let announced = tokio::select! {
                _ = cancel.cancelled() => break,
                announced = self.announce_all(&*rpc, &session_id) => announced,
            };
            let pause = if announced { self.interval } else { self.retry };

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }

        debug!(
            event_name = "runtime.heartbeat.stopped",
            correlation_id = %session_id,
            "heartbeat stopped"
        );
    }

    async fn announce_all(&self, rpc: &dyn OrchestratorRpc, session_id: &str) -> bool {
        for descriptor in &self.descriptors {
            let announcement = ToolAnnouncement {
                name: descriptor.name.clone(),
                description: descriptor.description.clone(),
                parameter_schema: descriptor.parameter_schema.clone(),
                scope: self.scope.clone(),
            };

            if let Err(failure) = rpc.announce_tool(announcement).await {
                if failure.is_auth_failure() {
                    error!(
                        event_name = "runtime.heartbeat.auth_rejected",
                        correlation_id = %session_id,
                        tool_name = %descriptor.name,
                        error = %failure,
                        "orchestrator rejected worker credentials; check the api key"
                    );
                } else {
                    warn!(
                        event_name = "runtime.heartbeat.announce_failed",
                        correlation_id = %session_id,
                        tool_name = %descriptor.name,
                        error = %failure,
                        retry_in_secs = self.retry.as_secs(),
                        "tool announcement failed"
                    );
                }
                return false;
            }
        }

        info!(
            event_name = "runtime.heartbeat.announced",
            correlation_id = %session_id,
            tools = self.descriptors.len(),
            "announced served tools"
        );
        true
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    use toolrelay_core::{
        ConfirmationDispatch, OrchestratorRpc, ResultReport, ScopeFilter, ToolAnnouncement,
        ToolDescriptor, TransportClient, TransportError,
    };

    use super::Heartbeat;
    use crate::loopback::LoopbackTransport;

    fn heartbeat() -> Heartbeat {
        let descriptors = ["alpha", "beta", "gamma"]
            .into_iter()
            .map(|name| ToolDescriptor::new(name, format!("{name} tool"), json!({})))
            .collect();
        let scope = ScopeFilter { location: Some("loc-1".to_owned()), user: None };
        Heartbeat::new(descriptors, scope, Duration::from_secs(120), Duration::from_secs(60))
    }

    #[tokio::test(start_paused = true)]
    async fn announces_every_tool_each_interval() {
        let transport = LoopbackTransport::new();
        let rpc = transport.open_rpc().await.expect("rpc opens");
        let cancel = CancellationToken::new();
        let task = tokio::spawn(heartbeat().run(rpc, "session-1".to_owned(), cancel.clone()));

        transport.wait_until(|journal| journal.announcements.len() >= 3).await;
        assert_eq!(transport.announcements().len(), 3);

        tokio::time::sleep(Duration::from_secs(121)).await;
        let announcements = transport.announcements();
        assert_eq!(announcements.len(), 6);
        assert!(announcements
            .iter()
            .all(|announcement| announcement.scope.location.as_deref() == Some("loc-1")));

        cancel.cancel();
        task.await.expect("heartbeat exits on cancel");
    }

    #[tokio::test(start_paused = true)]
    async fn failed_pass_restarts_after_retry_delay() {
        let transport = LoopbackTransport::new();
        transport.fail_next_announcement(TransportError::Rejected("HTTP 403".to_owned()));
        let rpc = transport.open_rpc().await.expect("rpc opens");
        let cancel = CancellationToken::new();
        let task = tokio::spawn(heartbeat().run(rpc, "session-1".to_owned(), cancel.clone()));

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert!(transport.announcements().is_empty(), "nothing announced before the retry");

        tokio::time::sleep(Duration::from_secs(2)).await;
        let names: Vec<String> =
            transport.announcements().into_iter().map(|announcement| announcement.name).collect();
        assert_eq!(names, vec!["alpha", "beta", "gamma"]);

        cancel.cancel();
        task.await.expect("heartbeat exits on cancel");
    }

    struct StalledRpc;

    #[async_trait]
    impl OrchestratorRpc for StalledRpc {
        async fn post_result(&self, _report: ResultReport) -> Result<(), TransportError> {
            Ok(())
        }

        async fn request_confirmation(
            &self,
            _request: ConfirmationDispatch,
        ) -> Result<(), TransportError> {
            Ok(())
        }

        async fn announce_tool(&self, _announcement: ToolAnnouncement) -> Result<(), TransportError> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_interrupts_a_stalled_announcement() {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(heartbeat().run(
            Arc::new(StalledRpc),
            "session-1".to_owned(),
            cancel.clone(),
        ));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!task.is_finished());

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("heartbeat stops while an announcement is pending")
            .expect("heartbeat exits on cancel");
    }
}
