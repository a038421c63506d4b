use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use thiserror::Error;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use toolrelay_core::{SubscriptionFilter, ToolCatalog, TransportClient, TransportError};

use crate::dispatcher::{DispatchEnd, Dispatcher};
use crate::executor::{panic_message, CallExecutor};
use crate::heartbeat::Heartbeat;
use crate::load_monitor::LoadMonitor;
use crate::options::RuntimeOptions;
use crate::status::{RuntimeStatus, SessionState};
use crate::workset::WorkSet;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("session panicked: {0}")]
    Panicked(String),
}

/// Keeps a worker session alive for the life of the process.
///
/// Every session end, clean or not, is followed by the reconnect backoff
/// unless shutdown has been requested.
pub struct ReconnectSupervisor {
    transport: Arc<dyn TransportClient>,
    catalog: Arc<ToolCatalog>,
    options: RuntimeOptions,
    status: Arc<RuntimeStatus>,
}

impl ReconnectSupervisor {
    pub fn new(
        transport: Arc<dyn TransportClient>,
        catalog: Arc<ToolCatalog>,
        options: RuntimeOptions,
    ) -> Self {
        let status = Arc::new(RuntimeStatus::new(options.max_concurrent_calls));
        Self { transport, catalog, options, status }
    }

    pub fn status(&self) -> Arc<RuntimeStatus> {
        Arc::clone(&self.status)
    }

    pub async fn run(&self, shutdown: CancellationToken) {
        let executor = Arc::new(CallExecutor::new(Arc::clone(&self.catalog)));

        while !shutdown.is_cancelled() {
            self.status.set_state(SessionState::Connecting);
            let session_number = self.status.record_session_start();
            let session_id = format!("session-{}", Uuid::new_v4());

            let outcome = AssertUnwindSafe(self.run_session(&executor, &session_id, &shutdown))
                .catch_unwind()
                .await
                .unwrap_or_else(|payload| Err(SessionError::Panicked(panic_message(payload))));
            self.log_session_end(&session_id, session_number, &outcome);

            if shutdown.is_cancelled() {
                break;
            }

            self.status.set_state(SessionState::Backoff);
            info!(
                event_name = "runtime.supervisor.backoff",
                correlation_id = %session_id,
                backoff_secs = self.options.reconnect_backoff.as_secs(),
                "waiting before reconnecting"
            );
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.options.reconnect_backoff) => {}
            }
        }

        self.status.set_state(SessionState::Shutdown);
        info!(
            event_name = "runtime.supervisor.stopped",
            correlation_id = "supervisor",
            sessions_started = self.status.sessions_started(),
            "supervisor stopped"
        );
    }

    async fn run_session(
        &self,
        executor: &Arc<CallExecutor>,
        session_id: &str,
        shutdown: &CancellationToken,
    ) -> Result<DispatchEnd, SessionError> {
        let rpc = tokio::select! {
            _ = shutdown.cancelled() => return Ok(DispatchEnd::Shutdown),
            rpc = self.transport.open_rpc() => rpc?,
        };
        let filter =
            SubscriptionFilter { tool_names: self.catalog.names(), scope: self.options.scope.clone() };
        let mut subscription = tokio::select! {
            _ = shutdown.cancelled() => return Ok(DispatchEnd::Shutdown),
            subscription = self.transport.open_subscription(&filter) => subscription?,
        };

        self.status.set_state(SessionState::Running);
        info!(
            event_name = "runtime.session.started",
            correlation_id = %session_id,
            transport_mode = self.transport.mode(),
            tools = filter.tool_names.len(),
            scope_unrestricted = filter.scope.is_unrestricted(),
            max_concurrent_calls = self.options.max_concurrent_calls,
            "worker session established"
        );

        let companions_cancel = shutdown.child_token();
        let mut companions = JoinSet::new();
        let heartbeat = Heartbeat::new(
            self.catalog.descriptors().cloned().collect(),
            self.options.scope.clone(),
            self.options.heartbeat_interval,
            self.options.heartbeat_retry,
        );
        companions.spawn(heartbeat.run(
            Arc::clone(&rpc),
            session_id.to_owned(),
            companions_cancel.clone(),
        ));
        let monitor = LoadMonitor::new(self.status(), self.options.load_sample_interval);
        companions.spawn(monitor.run(session_id.to_owned(), companions_cancel.clone()));

        let mut workset = WorkSet::new(self.status.gauge(), session_id);
        let dispatcher = Dispatcher::new(
            Arc::clone(executor),
            rpc,
            self.options.backpressure_poll,
            session_id,
        );
        let dispatched = dispatcher.run(&mut *subscription, &mut workset, shutdown).await;

        companions_cancel.cancel();
        while let Some(joined) = companions.join_next().await {
            if let Err(failure) = joined {
                if !failure.is_cancelled() {
                    warn!(
                        event_name = "runtime.session.companion_failed",
                        correlation_id = %session_id,
                        error = %failure,
                        "session companion task ended abnormally"
                    );
                }
            }
        }

        let deadline = shutdown.is_cancelled().then_some(self.options.shutdown_grace);
        workset.drain(deadline).await;

        dispatched.map_err(SessionError::from)
    }

    fn log_session_end(
        &self,
        session_id: &str,
        session_number: u64,
        outcome: &Result<DispatchEnd, SessionError>,
    ) {
        match outcome {
            Ok(end) => info!(
                event_name = "runtime.session.ended",
                correlation_id = %session_id,
                session_number,
                reason = ?end,
                "worker session ended"
            ),
            Err(SessionError::Transport(failure)) if failure.is_auth_failure() => error!(
                event_name = "runtime.session.auth_rejected",
                correlation_id = %session_id,
                session_number,
                error = %failure,
                "orchestrator rejected worker credentials; check the api key"
            ),
            Err(SessionError::Transport(failure)) if failure.is_transport_class() => warn!(
                event_name = "runtime.session.disconnected",
                correlation_id = %session_id,
                session_number,
                error = %failure,
                "worker session lost its connection"
            ),
            Err(failure) => error!(
                event_name = "runtime.session.failed",
                correlation_id = %session_id,
                session_number,
                error = %failure,
                "worker session failed"
            ),
        }
    }
}
