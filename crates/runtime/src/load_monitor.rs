use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::status::{RuntimeStatus, WorkSetGauge};

pub const WINDOW_SAMPLES: usize = 60;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoadSample {
    pub idle: bool,
    pub full: bool,
}

impl LoadSample {
    pub fn of(gauge: &WorkSetGauge) -> Self {
        Self { idle: gauge.is_idle(), full: gauge.is_full() }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LoadReport {
    pub minute: i64,
    pub samples: usize,
    pub idle_fraction: f64,
    pub full_fraction: f64,
}

impl std::fmt::Display for LoadReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "idle {:.0}% full {:.0}% over {} samples",
            self.idle_fraction * 100.0,
            self.full_fraction * 100.0,
            self.samples
        )
    }
}

/// Rolling window of the last 60 samples, reported once per minute boundary.
#[derive(Debug, Default)]
pub struct LoadWindow {
    samples: VecDeque<LoadSample>,
    current_minute: Option<i64>,
    computed_reports: u64,
}

impl LoadWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a sample taken during `minute` (minutes since the epoch).
    /// Returns a report when `minute` crosses a boundary, except for the very
    /// first one, which covers a partial minute.
    pub fn record(&mut self, sample: LoadSample, minute: i64) -> Option<LoadReport> {
        if self.samples.len() == WINDOW_SAMPLES {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);

        let previous = self.current_minute.replace(minute);
        if previous.is_none() || previous == Some(minute) {
            return None;
        }

        self.computed_reports += 1;
        if self.computed_reports == 1 {
            return None;
        }

        Some(self.report(minute))
    }

    fn report(&self, minute: i64) -> LoadReport {
        let total = self.samples.len().max(1) as f64;
        let idle = self.samples.iter().filter(|sample| sample.idle).count() as f64;
        let full = self.samples.iter().filter(|sample| sample.full).count() as f64;
        LoadReport {
            minute,
            samples: self.samples.len(),
            idle_fraction: idle / total,
            full_fraction: full / total,
        }
    }
}

type MinuteClock = Arc<dyn Fn() -> i64 + Send + Sync>;

fn wall_clock_minute() -> i64 {
    Utc::now().timestamp().div_euclid(60)
}

pub struct LoadMonitor {
    status: Arc<RuntimeStatus>,
    sample_interval: Duration,
    minute_clock: MinuteClock,
}

impl LoadMonitor {
    pub fn new(status: Arc<RuntimeStatus>, sample_interval: Duration) -> Self {
        Self { status, sample_interval, minute_clock: Arc::new(wall_clock_minute) }
    }

    /// Replaces the wall clock that decides minute boundaries.
    pub fn with_minute_clock(mut self, clock: impl Fn() -> i64 + Send + Sync + 'static) -> Self {
        self.minute_clock = Arc::new(clock);
        self
    }

    pub async fn run(self, session_id: String, cancel: CancellationToken) {
        let gauge = self.status.gauge();
        let mut window = LoadWindow::new();
        let mut ticker = tokio::time::interval(self.sample_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(
                        event_name = "runtime.load_monitor.stopped",
                        correlation_id = %session_id,
                        "load monitor stopped"
                    );
                    return;
                }
                _ = ticker.tick() => {}
            }

            let minute = (self.minute_clock)();
            if let Some(report) = window.record(LoadSample::of(&gauge), minute) {
                info!(
                    event_name = "runtime.load_monitor.report",
                    correlation_id = %session_id,
                    idle_pct = report.idle_fraction * 100.0,
                    full_pct = report.full_fraction * 100.0,
                    samples = report.samples,
                    "dispatcher load: {report}"
                );
                self.status.record_load_report(report);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use tokio_util::sync::CancellationToken;

    use super::{LoadMonitor, LoadSample, LoadWindow, WINDOW_SAMPLES};
    use crate::status::RuntimeStatus;

    const IDLE: LoadSample = LoadSample { idle: true, full: false };
    const FULL: LoadSample = LoadSample { idle: false, full: true };
    const BUSY: LoadSample = LoadSample { idle: false, full: false };

    #[test]
    fn first_boundary_report_is_skipped() {
        let mut window = LoadWindow::new();
        for _ in 0..30 {
            assert!(window.record(IDLE, 100).is_none());
        }

        assert!(window.record(IDLE, 101).is_none(), "partial first minute must not be reported");

        for _ in 0..59 {
            assert!(window.record(FULL, 101).is_none());
        }
        let report = window.record(FULL, 102).expect("second boundary should report");
        assert_eq!(report.minute, 102);
        assert_eq!(report.samples, WINDOW_SAMPLES);
    }

    #[test]
    fn fractions_cover_only_the_last_sixty_samples() {
        let mut window = LoadWindow::new();
        window.record(BUSY, 10);
        window.record(BUSY, 11);

        for _ in 0..100 {
            window.record(IDLE, 11);
        }
        for _ in 0..15 {
            window.record(FULL, 11);
        }
        let report = window.record(FULL, 12).expect("report at boundary");

        assert_eq!(report.samples, 60);
        assert!((report.full_fraction - 16.0 / 60.0).abs() < f64::EPSILON);
        assert!((report.idle_fraction - 44.0 / 60.0).abs() < f64::EPSILON);
    }

    #[test]
    fn report_display_is_percentages() {
        let mut window = LoadWindow::new();
        window.record(IDLE, 0);
        window.record(IDLE, 1);
        window.record(FULL, 1);
        let report = window.record(IDLE, 2).expect("report at boundary");

        assert_eq!(report.to_string(), "idle 75% full 25% over 4 samples");
    }

    #[tokio::test(start_paused = true)]
    async fn run_publishes_reports_to_runtime_status() {
        let status = Arc::new(RuntimeStatus::new(2));
        let samples_taken = Arc::new(AtomicI64::new(0));
        let clock = {
            let samples_taken = Arc::clone(&samples_taken);
            move || samples_taken.fetch_add(1, Ordering::SeqCst).div_euclid(60)
        };
        let monitor = LoadMonitor::new(Arc::clone(&status), Duration::from_secs(1))
            .with_minute_clock(clock);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(monitor.run("session-test".to_owned(), cancel.clone()));

        tokio::time::sleep(Duration::from_secs(90)).await;
        assert!(status.last_load_report().is_none(), "first boundary is not published");

        tokio::time::sleep(Duration::from_secs(40)).await;
        let report = status.last_load_report().expect("second boundary is published");
        assert_eq!(report.minute, 2);
        assert_eq!(report.samples, WINDOW_SAMPLES);
        assert!((report.idle_fraction - 1.0).abs() < f64::EPSILON);
        assert_eq!(status.snapshot().last_load_report, Some(report));

        cancel.cancel();
        task.await.expect("monitor exits on cancel");
    }
}
