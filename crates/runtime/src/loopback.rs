//! In-process transport used by the local server and by tests.
//!
//! Calls are queued by the caller and delivered to whichever subscription the
//! current session holds. Everything the runtime sends back is journaled so
//! it can be inspected.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Notify;

use toolrelay_core::{
    CallSubscription, ConfirmationDispatch, OrchestratorRpc, ResultReport, SubscriptionFilter,
    ToolAnnouncement, ToolCall, TransportClient, TransportError,
};

#[derive(Debug)]
enum StreamEvent {
    Record(Value),
    Close,
    Disconnect(TransportError),
}

#[derive(Clone, Debug, Default)]
pub struct Journal {
    pub results: Vec<ResultReport>,
    pub confirmations: Vec<ConfirmationDispatch>,
    pub announcements: Vec<ToolAnnouncement>,
    pub subscriptions: Vec<SubscriptionFilter>,
    pub rpc_opens: usize,
}

#[derive(Debug, Default)]
struct Script {
    confirmation_failures: VecDeque<TransportError>,
    announce_failures: VecDeque<TransportError>,
    open_failures: VecDeque<TransportError>,
}

#[derive(Debug, Default)]
struct Shared {
    events: Mutex<VecDeque<StreamEvent>>,
    event_ready: Notify,
    journal: Mutex<Journal>,
    journal_changed: Notify,
    script: Mutex<Script>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Shared {
    fn push_event(&self, event: StreamEvent) {
        lock(&self.events).push_back(event);
        self.event_ready.notify_one();
    }

    fn journal<F>(&self, update: F)
    where
        F: FnOnce(&mut Journal),
    {
        update(&mut lock(&self.journal));
        self.journal_changed.notify_waiters();
    }

    fn scripted<F>(&self, pick: F) -> Option<TransportError>
    where
        F: FnOnce(&mut Script) -> &mut VecDeque<TransportError>,
    {
        pick(&mut lock(&self.script)).pop_front()
    }
}

#[derive(Clone, Debug, Default)]
pub struct LoopbackTransport {
    shared: Arc<Shared>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_record(&self, record: Value) {
        self.shared.push_event(StreamEvent::Record(record));
    }

    pub fn push_call(&self, call: &ToolCall) -> Result<(), serde_json::Error> {
        self.push_record(serde_json::to_value(call)?);
        Ok(())
    }

    /// Ends the current subscription gracefully.
    pub fn close_stream(&self) {
        self.shared.push_event(StreamEvent::Close);
    }

    /// Fails the current subscription with `error`.
    pub fn disconnect(&self, error: TransportError) {
        self.shared.push_event(StreamEvent::Disconnect(error));
    }

    pub fn fail_next_confirmation(&self, error: TransportError) {
        lock(&self.shared.script).confirmation_failures.push_back(error);
    }

    pub fn fail_next_announcement(&self, error: TransportError) {
        lock(&self.shared.script).announce_failures.push_back(error);
    }

    pub fn fail_next_open(&self, error: TransportError) {
        lock(&self.shared.script).open_failures.push_back(error);
    }

    pub fn journal(&self) -> Journal {
        lock(&self.shared.journal).clone()
    }

    pub fn results(&self) -> Vec<ResultReport> {
        lock(&self.shared.journal).results.clone()
    }

    pub fn confirmations(&self) -> Vec<ConfirmationDispatch> {
        lock(&self.shared.journal).confirmations.clone()
    }

    pub fn announcements(&self) -> Vec<ToolAnnouncement> {
        lock(&self.shared.journal).announcements.clone()
    }

    pub fn pending_records(&self) -> usize {
        lock(&self.shared.events).len()
    }

    /// Resolves once the journal satisfies `ready`.
    pub async fn wait_until<F>(&self, ready: F) -> Journal
    where
        F: Fn(&Journal) -> bool,
    {
        loop {
            let changed = self.shared.journal_changed.notified();
            tokio::pin!(changed);
            changed.as_mut().enable();

            {
                let journal = lock(&self.shared.journal);
                if ready(&journal) {
                    return journal.clone();
                }
            }
            changed.await;
        }
    }

    pub async fn wait_for_results(&self, count: usize) -> Vec<ResultReport> {
        self.wait_until(|journal| journal.results.len() >= count).await.results
    }
}

#[async_trait]
impl TransportClient for LoopbackTransport {
    async fn open_rpc(&self) -> Result<Arc<dyn OrchestratorRpc>, TransportError> {
        if let Some(error) = self.shared.scripted(|script| &mut script.open_failures) {
            return Err(error);
        }
        self.shared.journal(|journal| journal.rpc_opens += 1);
        Ok(Arc::new(LoopbackRpc { shared: Arc::clone(&self.shared) }))
    }

    async fn open_subscription(
        &self,
        filter: &SubscriptionFilter,
    ) -> Result<Box<dyn CallSubscription>, TransportError> {
        self.shared.journal(|journal| journal.subscriptions.push(filter.clone()));
        Ok(Box::new(LoopbackSubscription { shared: Arc::clone(&self.shared) }))
    }

    fn mode(&self) -> &'static str {
        "loopback"
    }
}

struct LoopbackRpc {
    shared: Arc<Shared>,
}

#[async_trait]
impl OrchestratorRpc for LoopbackRpc {
    async fn post_result(&self, report: ResultReport) -> Result<(), TransportError> {
        self.shared.journal(|journal| journal.results.push(report));
        Ok(())
    }

    async fn request_confirmation(
        &self,
        request: ConfirmationDispatch,
    ) -> Result<(), TransportError> {
        if let Some(error) = self.shared.scripted(|script| &mut script.confirmation_failures) {
            return Err(error);
        }
        self.shared.journal(|journal| journal.confirmations.push(request));
        Ok(())
    }

    async fn announce_tool(&self, announcement: ToolAnnouncement) -> Result<(), TransportError> {
        if let Some(error) = self.shared.scripted(|script| &mut script.announce_failures) {
            return Err(error);
        }
        self.shared.journal(|journal| journal.announcements.push(announcement));
        Ok(())
    }
}

struct LoopbackSubscription {
    shared: Arc<Shared>,
}

#[async_trait]
impl CallSubscription for LoopbackSubscription {
    async fn next_record(&mut self) -> Result<Option<Value>, TransportError> {
        loop {
            let event = lock(&self.shared.events).pop_front();
            match event {
                Some(StreamEvent::Record(record)) => return Ok(Some(record)),
                Some(StreamEvent::Close) => return Ok(None),
                Some(StreamEvent::Disconnect(error)) => return Err(error),
                None => self.shared.event_ready.notified().await,
            }
        }
    }
}
