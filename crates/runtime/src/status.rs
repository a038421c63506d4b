use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::watch;

use crate::load_monitor::LoadReport;

/// Occupancy of the current session's WorkSet.
#[derive(Debug)]
pub struct WorkSetGauge {
    in_flight: AtomicUsize,
    capacity: usize,
}

impl WorkSetGauge {
    pub fn new(capacity: usize) -> Self {
        Self { in_flight: AtomicUsize::new(0), capacity }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_idle(&self) -> bool {
        self.in_flight() == 0
    }

    pub fn is_full(&self) -> bool {
        self.in_flight() >= self.capacity
    }

    pub(crate) fn acquire(self: &Arc<Self>) -> InFlightGuard {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        InFlightGuard { gauge: Arc::clone(self) }
    }
}

/// Releases one WorkSet slot when the execution task finishes, however it ends.
#[derive(Debug)]
pub(crate) struct InFlightGuard {
    gauge: Arc<WorkSetGauge>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.gauge.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Connecting,
    Running,
    Backoff,
    Shutdown,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub state: SessionState,
    pub sessions_started: u64,
    pub in_flight: usize,
    pub capacity: usize,
    pub last_load_report: Option<LoadReport>,
}

/// Shared view of the supervisor, read by the health endpoint.
#[derive(Debug)]
pub struct RuntimeStatus {
    gauge: Arc<WorkSetGauge>,
    state_tx: watch::Sender<SessionState>,
    sessions_started: AtomicU64,
    last_load_report: Mutex<Option<LoadReport>>,
}

impl RuntimeStatus {
    pub fn new(capacity: usize) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Connecting);
        Self {
            gauge: Arc::new(WorkSetGauge::new(capacity)),
            state_tx,
            sessions_started: AtomicU64::new(0),
            last_load_report: Mutex::new(None),
        }
    }

    pub fn gauge(&self) -> Arc<WorkSetGauge> {
        Arc::clone(&self.gauge)
    }

    pub fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    pub fn sessions_started(&self) -> u64 {
        self.sessions_started.load(Ordering::SeqCst)
    }

    pub fn last_load_report(&self) -> Option<LoadReport> {
        self.last_load_report.lock().ok().and_then(|report| report.clone())
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            state: self.state(),
            sessions_started: self.sessions_started(),
            in_flight: self.gauge.in_flight(),
            capacity: self.gauge.capacity(),
            last_load_report: self.last_load_report(),
        }
    }

    pub(crate) fn set_state(&self, state: SessionState) {
        self.state_tx.send_replace(state);
    }

    pub(crate) fn record_session_start(&self) -> u64 {
        self.sessions_started.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn record_load_report(&self, report: LoadReport) {
        if let Ok(mut slot) = self.last_load_report.lock() {
            *slot = Some(report);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{RuntimeStatus, SessionState, WorkSetGauge};

    #[test]
    fn guard_releases_slot_on_drop() {
        let gauge = Arc::new(WorkSetGauge::new(2));
        assert!(gauge.is_idle());

        let first = gauge.acquire();
        let second = gauge.acquire();
        assert!(gauge.is_full());

        drop(first);
        assert_eq!(gauge.in_flight(), 1);
        assert!(!gauge.is_full());

        drop(second);
        assert!(gauge.is_idle());
    }

    #[test]
    fn snapshot_reflects_state_changes() {
        let status = RuntimeStatus::new(4);
        assert_eq!(status.state(), SessionState::Connecting);

        status.set_state(SessionState::Running);
        assert_eq!(status.record_session_start(), 1);

        let snapshot = status.snapshot();
        assert_eq!(snapshot.state, SessionState::Running);
        assert_eq!(snapshot.sessions_started, 1);
        assert_eq!(snapshot.capacity, 4);
        assert!(snapshot.last_load_report.is_none());
    }
}
