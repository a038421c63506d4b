use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::{JoinError, JoinSet};
use tracing::{debug, warn};

use crate::status::WorkSetGauge;

/// In-flight execution tasks of one session, bounded by the gauge capacity.
///
/// The dispatcher owns the set; each task holds a slot on the gauge until it
/// finishes, so occupancy drops as soon as a task ends even before it is
/// reaped here.
pub struct WorkSet {
    tasks: JoinSet<()>,
    gauge: Arc<WorkSetGauge>,
    session_id: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DrainSummary {
    pub completed: usize,
    pub failed: usize,
    pub aborted: usize,
}

impl WorkSet {
    pub fn new(gauge: Arc<WorkSetGauge>, session_id: impl Into<String>) -> Self {
        Self { tasks: JoinSet::new(), gauge, session_id: session_id.into() }
    }

    pub fn in_flight(&self) -> usize {
        self.gauge.in_flight()
    }

    pub fn is_full(&self) -> bool {
        self.gauge.is_full()
    }

    pub fn spawn<F>(&mut self, execution: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let slot = self.gauge.acquire();
        self.tasks.spawn(async move {
            let _slot = slot;
            execution.await;
        });
    }

    /// Collects finished tasks without waiting.
    pub fn reap(&mut self) -> usize {
        let mut reaped = 0;
        while let Some(result) = self.tasks.try_join_next() {
            self.log_join_failure(result.err());
            reaped += 1;
        }
        reaped
    }

    /// Waits for every remaining task. With a deadline, tasks still running
    /// when it passes are aborted. Task failures are logged, never returned.
    pub async fn drain(&mut self, deadline: Option<Duration>) -> DrainSummary {
        let mut summary = DrainSummary { completed: 0, failed: 0, aborted: 0 };

        let waited = match deadline {
            Some(limit) => tokio::time::timeout(limit, self.join_all(&mut summary)).await.is_ok(),
            None => {
                self.join_all(&mut summary).await;
                true
            }
        };

        if !waited {
            summary.aborted = self.tasks.len();
            warn!(
                event_name = "runtime.workset.drain_timeout",
                correlation_id = %self.session_id,
                aborted = summary.aborted,
                "in-flight calls did not finish before the shutdown deadline; aborting"
            );
            self.tasks.abort_all();
            while self.tasks.join_next().await.is_some() {}
        }

        debug!(
            event_name = "runtime.workset.drained",
            correlation_id = %self.session_id,
            completed = summary.completed,
            failed = summary.failed,
            aborted = summary.aborted,
            "workset drained"
        );
        summary
    }

    async fn join_all(&mut self, summary: &mut DrainSummary) {
        while let Some(result) = self.tasks.join_next().await {
            match result {
                Ok(()) => summary.completed += 1,
                Err(error) => {
                    summary.failed += 1;
                    self.log_join_failure(Some(error));
                }
            }
        }
    }

    fn log_join_failure(&self, error: Option<JoinError>) {
        let Some(error) = error else {
            return;
        };
        if error.is_cancelled() {
            return;
        }
        warn!(
            event_name = "runtime.workset.task_failed",
            correlation_id = %self.session_id,
            error = %error,
            "execution task ended abnormally"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::WorkSet;
    use crate::status::WorkSetGauge;

    #[tokio::test(start_paused = true)]
    async fn slots_are_released_when_tasks_finish() {
        let gauge = Arc::new(WorkSetGauge::new(2));
        let mut workset = WorkSet::new(Arc::clone(&gauge), "session-test");

        workset.spawn(async { tokio::time::sleep(Duration::from_secs(1)).await });
        workset.spawn(async { tokio::time::sleep(Duration::from_secs(2)).await });
        assert!(workset.is_full());

        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(workset.in_flight(), 1);
        assert_eq!(workset.reap(), 1);

        let summary = workset.drain(None).await;
        assert_eq!(summary.completed, 1);
        assert!(gauge.is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn drain_with_deadline_aborts_stragglers() {
        let gauge = Arc::new(WorkSetGauge::new(4));
        let mut workset = WorkSet::new(Arc::clone(&gauge), "session-test");

        workset.spawn(async {});
        workset.spawn(async { tokio::time::sleep(Duration::from_secs(3_600)).await });

        let summary = workset.drain(Some(Duration::from_secs(5))).await;
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.aborted, 1);
        assert!(gauge.is_idle(), "aborted tasks must release their slot");
    }

    #[tokio::test]
    async fn panicking_task_is_counted_not_propagated() {
        let gauge = Arc::new(WorkSetGauge::new(1));
        let mut workset = WorkSet::new(Arc::clone(&gauge), "session-test");

        workset.spawn(async { panic!("handler exploded") });

        let summary = workset.drain(None).await;
        assert_eq!(summary.failed, 1);
        assert!(gauge.is_idle());
    }
}
