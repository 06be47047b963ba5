//! Dwell countdown with pausable 0–100 progress.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Receives every published progress value, in percent.
pub type ProgressSink = Arc<dyn Fn(f64) + Send + Sync>;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct TimerStatus {
    percent: f64,
    /// Bumped on every start, pause and abort; a segment task only publishes
    /// while its own number is current.
    segment: u64,
    completed: bool,
    aborted: bool,
}

#[derive(Debug, Clone, Copy)]
struct Segment {
    started: Instant,
    prior: f64,
}

/// Counts down one relay's dwell while publishing progress on a fixed tick.
///
/// Progress resumes from where it was frozen by [`pause`](Self::pause), so a
/// paused-and-resumed display finishes after the *remaining* dwell, not a
/// fresh one. Completion is observed through [`completion`](Self::completion)
/// and happens at most once; it never happens after [`abort`](Self::abort).
pub struct DisplayTimer {
    dwell: Duration,
    tick: Duration,
    sink: ProgressSink,
    status: Arc<watch::Sender<TimerStatus>>,
    segment: Option<Segment>,
    task: Option<JoinHandle<()>>,
}

impl DisplayTimer {
    pub fn new(dwell: Duration, tick: Duration, sink: ProgressSink) -> Self {
        let (status, _) = watch::channel(TimerStatus::default());
        Self {
            dwell,
            tick: tick.max(Duration::from_millis(1)),
            sink,
            status: Arc::new(status),
            segment: None,
            task: None,
        }
    }

    /// Run the remaining `dwell * (1 - prior_percent / 100)`.
    pub fn start_or_resume(&mut self, prior_percent: f64) {
        self.stop_task();
        let status = *self.status.borrow();
        if status.completed || status.aborted {
            return;
        }

        let prior = prior_percent.clamp(0.0, 100.0);
        let started = Instant::now();
        let mut segment_id = 0;
        self.status.send_modify(|status| {
            status.segment += 1;
            status.percent = prior;
            segment_id = status.segment;
        });

        self.segment = Some(Segment { started, prior });
        self.task = Some(tokio::spawn(run_segment(
            SegmentRun {
                id: segment_id,
                started,
                prior,
                dwell: self.dwell,
                tick: self.tick,
            },
            self.status.clone(),
            self.sink.clone(),
        )));
    }

    /// Resume from the frozen percentage.
    pub fn resume(&mut self) {
        let frozen = self.progress();
        self.start_or_resume(frozen);
    }

    /// Stop counting without losing progress.
    pub fn pause(&mut self) {
        let Some(segment) = self.segment.take() else {
            return;
        };
        self.stop_task();

        let dwell = self.dwell;
        let sink = &self.sink;
        self.status.send_if_modified(|status| {
            if status.completed || status.aborted {
                return false;
            }
            let frozen = percent_at(segment.prior, segment.started.elapsed(), dwell);
            status.segment += 1;
            status.percent = frozen;
            sink(frozen);
            true
        });
    }

    /// Stop for good. Safe to call repeatedly.
    pub fn abort(&mut self) {
        self.segment = None;
        self.stop_task();
        self.status.send_if_modified(|status| {
            if status.aborted {
                return false;
            }
            status.segment += 1;
            status.aborted = true;
            true
        });
    }

    pub fn is_running(&self) -> bool {
        self.segment.is_some()
    }

    pub fn is_completed(&self) -> bool {
        self.status.borrow().completed
    }

    pub fn is_aborted(&self) -> bool {
        self.status.borrow().aborted
    }

    /// Current percentage, computed live while running.
    pub fn progress(&self) -> f64 {
        let status = *self.status.borrow();
        match self.segment {
            Some(segment) if !status.completed => {
                percent_at(segment.prior, segment.started.elapsed(), self.dwell)
            }
            _ => status.percent,
        }
    }

    /// Resolves to `true` when the dwell runs out, or `false` once aborted.
    pub fn completion(&self) -> impl Future<Output = bool> + Send + 'static {
        let mut status = self.status.subscribe();
        async move {
            loop {
                let (completed, aborted) = {
                    let current = status.borrow_and_update();
                    (current.completed, current.aborted)
                };
                if completed || aborted {
                    return completed;
                }
                if status.changed().await.is_err() {
                    return false;
                }
            }
        }
    }

    fn stop_task(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for DisplayTimer {
    fn drop(&mut self) {
        self.stop_task();
    }
}

#[derive(Debug, Clone, Copy)]
struct SegmentRun {
    id: u64,
    started: Instant,
    prior: f64,
    dwell: Duration,
    tick: Duration,
}

async fn run_segment(run: SegmentRun, status: Arc<watch::Sender<TimerStatus>>, sink: ProgressSink) {
    let remaining = run.dwell.mul_f64(1.0 - run.prior / 100.0);
    let deadline = tokio::time::sleep_until(run.started + remaining);
    tokio::pin!(deadline);

    let mut ticker = tokio::time::interval(run.tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = &mut deadline => {
                // Timer drift must not leave the final value short of 100.
                publish_if_current(&status, run, &sink, |_| 100.0, true);
                return;
            }
            _ = ticker.tick() => {
                publish_if_current(
                    &status,
                    run,
                    &sink,
                    |run| percent_at(run.prior, run.started.elapsed(), run.dwell),
                    false,
                );
            }
        }
    }
}

/// The sink is called while the status is locked, so a pause or abort that
/// bumps the segment can never be followed by a value from the old segment.
fn publish_if_current(
    status: &watch::Sender<TimerStatus>,
    run: SegmentRun,
    sink: &ProgressSink,
    percent: impl FnOnce(&SegmentRun) -> f64,
    complete: bool,
) {
    status.send_if_modified(|status| {
        if status.segment != run.id || status.aborted || status.completed {
            return false;
        }
        let percent = percent(&run);
        status.percent = percent;
        status.completed = complete;
        sink(percent);
        true
    });
}

fn percent_at(prior: f64, elapsed: Duration, dwell: Duration) -> f64 {
    if dwell.is_zero() {
        return 100.0;
    }
    (prior + elapsed.as_secs_f64() / dwell.as_secs_f64() * 100.0).min(100.0)
}
