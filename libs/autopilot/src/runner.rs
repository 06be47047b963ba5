//! The tour state machine.
//!
//! A driver task owns the visitation order and reacts to three inputs: changes
//! of the shared [`AutopilotState`], skip requests, and reports from finished
//! visits. Each visit (rotate, open, await data, display, close) runs in its
//! own task registered with the [`ExecutionGuard`], so starting, skipping or
//! stopping can always cancel the one visit in flight before anything else
//! happens.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::AutopilotConfig;
use crate::context::{AutopilotContext, AutopilotState, VisitPhase};
use crate::controls::{Location, LocationSource, TourControls};
use crate::error::Cancelled;
use crate::guard::{ExecutionGuard, ExecutionHandle, ExecutionId};
use crate::order::VisitationOrder;
use crate::progress::{DisplayTimer, ProgressSink};

const COMMAND_CAPACITY: usize = 16;
const REPORT_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunnerCommand {
    Skip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VisitOutcome {
    Displayed,
    NoData,
    Failed,
}

#[derive(Debug)]
struct VisitReport {
    execution: ExecutionId,
    location: Location,
    outcome: VisitOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DataWait {
    Loaded,
    TimedOut,
    PanelClosed,
}

/// Keeps the autopilot driver alive. Dropping it detaches the driver; call
/// [`shutdown`](Self::shutdown) to stop it.
pub struct RunnerHandle {
    shutdown: CancellationToken,
    commands: mpsc::Sender<RunnerCommand>,
    guard: ExecutionGuard,
    task: JoinHandle<()>,
}

impl RunnerHandle {
    /// Same as [`AutopilotContext::skip`], without going through the context.
    pub fn skip(&self) -> bool {
        self.commands.try_send(RunnerCommand::Skip).is_ok()
    }

    pub fn guard(&self) -> &ExecutionGuard {
        &self.guard
    }

    /// Cancel the visit in flight, close the panel and stop the driver.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Err(error) = self.task.await {
            warn!(error = %error, "Autopilot driver ended abnormally");
        }
    }
}

/// Start the driver. It idles until `context.start()` is called and registers
/// itself as the context's skip handler.
pub fn spawn_autopilot(
    context: AutopilotContext,
    controls: Arc<dyn TourControls>,
    source: Arc<dyn LocationSource>,
    config: AutopilotConfig,
) -> RunnerHandle {
    let (command_tx, command_rx) = mpsc::channel(COMMAND_CAPACITY);
    let shutdown = CancellationToken::new();
    let guard = ExecutionGuard::new(config.abort_grace);

    let skip_tx = command_tx.clone();
    context.register_skip_handler(move || {
        if let Err(error) = skip_tx.try_send(RunnerCommand::Skip) {
            debug!(error = %error, "Dropped skip request");
        }
    });

    let runner = SequenceRunner {
        context,
        controls,
        source,
        config: Arc::new(config),
        guard: guard.clone(),
        order: VisitationOrder::default(),
        index: 0,
    };
    let task = tokio::spawn(runner.run(command_rx, shutdown.clone()));

    RunnerHandle {
        shutdown,
        commands: command_tx,
        guard,
        task,
    }
}

struct SequenceRunner {
    context: AutopilotContext,
    controls: Arc<dyn TourControls>,
    source: Arc<dyn LocationSource>,
    config: Arc<AutopilotConfig>,
    guard: ExecutionGuard,
    order: VisitationOrder,
    index: usize,
}

impl SequenceRunner {
    async fn run(mut self, mut commands: mpsc::Receiver<RunnerCommand>, shutdown: CancellationToken) {
        let (report_tx, mut reports) = mpsc::channel::<VisitReport>(REPORT_CAPACITY);
        let mut state = self.context.subscribe();

        let mut last = AutopilotState::default();
        let current = state.borrow_and_update().clone();
        self.on_state_change(&last, &current, &report_tx).await;
        last = current;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    self.halt().await;
                    break;
                }
                changed = state.changed() => {
                    if changed.is_err() {
                        self.halt().await;
                        break;
                    }
                    let current = state.borrow_and_update().clone();
                    self.on_state_change(&last, &current, &report_tx).await;
                    last = current;
                }
                Some(command) = commands.recv() => match command {
                    RunnerCommand::Skip => self.skip(&report_tx).await,
                },
                Some(report) = reports.recv() => {
                    self.on_visit_finished(report, &report_tx).await;
                }
            }
        }

        debug!("Autopilot driver stopped");
    }

    async fn on_state_change(
        &mut self,
        previous: &AutopilotState,
        current: &AutopilotState,
        reports: &mpsc::Sender<VisitReport>,
    ) {
        if current.mode_on {
            if !previous.mode_on || previous.run_epoch() != current.run_epoch() {
                self.begin_tour(reports).await;
            }
        } else if previous.mode_on {
            self.halt().await;
        }
    }

    async fn begin_tour(&mut self, reports: &mpsc::Sender<VisitReport>) {
        self.halt().await;

        self.order = VisitationOrder::generate(self.source.candidates());
        self.index = 0;
        if self.order.is_empty() {
            warn!("No relays to visit; stopping autopilot");
            self.context.stop();
            return;
        }

        info!(relays = self.order.len(), "Starting relay tour");
        self.context.set_position(0, self.order.len());
        self.launch_visit(Duration::ZERO, reports).await;
    }

    /// Cancel the visit in flight and put the panel away. Schedules nothing.
    async fn halt(&mut self) {
        if !self.guard.has_live() {
            return;
        }
        self.guard.abort_live().await;
        self.controls.stop_display_scroll();
        close_panel(self.controls.as_ref()).await;
        self.context.set_phase(VisitPhase::Idle);
    }

    async fn skip(&mut self, reports: &mpsc::Sender<VisitReport>) {
        if !self.context.is_mode_on() || !self.guard.has_live() {
            debug!("Skip ignored; no visit in flight");
            return;
        }

        info!(
            index = self.index,
            relay = ?self.order.get(self.index).map(Location::as_str),
            "Skipping relay"
        );
        self.halt().await;
        if self.advance() {
            self.launch_visit(Duration::ZERO, reports).await;
        }
    }

    async fn on_visit_finished(&mut self, report: VisitReport, reports: &mpsc::Sender<VisitReport>) {
        if !self.guard.release(report.execution) {
            debug!(execution = %report.execution, "Ignoring report from superseded visit");
            return;
        }

        match report.outcome {
            VisitOutcome::Displayed => debug!(relay = %report.location, "Relay displayed"),
            VisitOutcome::NoData => info!(relay = %report.location, "Relay skipped without data"),
            VisitOutcome::Failed => info!(relay = %report.location, "Relay skipped after failure"),
        }
        self.context.set_phase(VisitPhase::Idle);

        if !self.context.is_mode_on() {
            return;
        }
        if self.advance() {
            self.launch_visit(self.config.advance_delay, reports).await;
        }
    }

    /// Move to the next position, reshuffling once the order is used up.
    /// Returns false when there is nothing left to visit.
    fn advance(&mut self) -> bool {
        let next = self.index + 1;
        if next >= self.order.len() {
            self.order = VisitationOrder::generate(self.source.candidates());
            self.index = 0;
            if self.order.is_empty() {
                warn!("No relays left to visit; stopping autopilot");
                self.context.stop();
                return false;
            }
            debug!(relays = self.order.len(), "Visitation order exhausted; reshuffled");
        } else {
            self.index = next;
        }

        self.context.set_position(self.index, self.order.len());
        true
    }

    async fn launch_visit(&mut self, delay: Duration, reports: &mpsc::Sender<VisitReport>) {
        let Some(location) = self.order.get(self.index).cloned() else {
            return;
        };

        let handle = self.guard.begin().await;
        let visit = Visit {
            handle: handle.clone(),
            location,
            index: self.index,
            delay,
            controls: self.controls.clone(),
            context: self.context.clone(),
            guard: self.guard.clone(),
            config: self.config.clone(),
        };

        let reports = reports.clone();
        let task = tokio::spawn(async move {
            let Some(report) = visit.run().await else {
                return;
            };
            if let Err(error) = reports.send(report).await {
                error!(error = %error, "Failed to report visit outcome");
            }
        });
        self.guard.attach(&handle, task);
    }
}

/// One relay's pass through the state machine.
struct Visit {
    handle: ExecutionHandle,
    location: Location,
    index: usize,
    delay: Duration,
    controls: Arc<dyn TourControls>,
    context: AutopilotContext,
    guard: ExecutionGuard,
    config: Arc<AutopilotConfig>,
}

impl Visit {
    /// `None` when the visit was cancelled; whoever cancelled it decides
    /// what happens next.
    async fn run(self) -> Option<VisitReport> {
        let outcome = match AssertUnwindSafe(self.execute()).catch_unwind().await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(Cancelled)) => {
                debug!(execution = %self.handle.id(), relay = %self.location, "Visit cancelled");
                return None;
            }
            Err(panic) => {
                error!(
                    relay = %self.location,
                    panic = panic_message(panic.as_ref()),
                    "Visit panicked; skipping relay"
                );
                self.controls.stop_display_scroll();
                self.close_after(VisitOutcome::Failed).await.ok()?
            }
        };

        Some(VisitReport {
            execution: self.handle.id(),
            location: self.location.clone(),
            outcome,
        })
    }

    async fn execute(&self) -> Result<VisitOutcome, Cancelled> {
        if !self.delay.is_zero() {
            self.checkpoint(tokio::time::sleep(self.delay)).await?;
        }
        self.hold_while_paused().await?;

        info!(index = self.index, relay = %self.location, "Visiting relay");

        self.enter(VisitPhase::Rotating)?;
        if let Err(error) = self
            .checkpoint(self.controls.rotate_to_location(&self.location))
            .await?
        {
            warn!(relay = %self.location, error = %error, "Camera rotation failed");
            return self.close_after(VisitOutcome::Failed).await;
        }

        self.hold_while_paused().await?;
        self.enter(VisitPhase::OpeningPanel)?;
        if let Err(error) = self
            .checkpoint(self.controls.open_panel(&self.location))
            .await?
        {
            warn!(relay = %self.location, error = %error, "Failed to open relay panel");
            return self.close_after(VisitOutcome::Failed).await;
        }
        if !self.controls.is_panel_open() {
            warn!(relay = %self.location, "Relay panel did not open");
            return self.close_after(VisitOutcome::Failed).await;
        }

        self.hold_while_paused().await?;
        self.enter(VisitPhase::AwaitingData)?;
        match self.checkpoint(self.wait_for_data()).await? {
            DataWait::Loaded => {}
            DataWait::TimedOut => {
                warn!(
                    relay = %self.location,
                    timeout_ms = self.config.data_timeout.as_millis() as u64,
                    "Relay data did not load in time"
                );
                return self.close_after(VisitOutcome::NoData).await;
            }
            DataWait::PanelClosed => {
                info!(relay = %self.location, "Relay panel closed while loading");
                return self.close_after(VisitOutcome::NoData).await;
            }
        }

        self.hold_while_paused().await?;
        self.enter(VisitPhase::Displaying)?;
        self.display().await?;

        self.close_after(VisitOutcome::Displayed).await
    }

    async fn wait_for_data(&self) -> DataWait {
        let poll = async {
            let mut ticker = tokio::time::interval(self.config.data_poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if self.controls.are_data_loaded() {
                    return DataWait::Loaded;
                }
                if !self.controls.is_panel_open() {
                    return DataWait::PanelClosed;
                }
            }
        };

        tokio::time::timeout(self.config.data_timeout, poll)
            .await
            .unwrap_or(DataWait::TimedOut)
    }

    async fn display(&self) -> Result<(), Cancelled> {
        self.controls.start_display_scroll();
        let shown = self.run_display_timer().await;
        self.controls.stop_display_scroll();
        shown
    }

    async fn run_display_timer(&self) -> Result<(), Cancelled> {
        let sink: ProgressSink = {
            let context = self.context.clone();
            let guard = self.guard.clone();
            let handle = self.handle.clone();
            Arc::new(move |percent| {
                if guard.is_live(&handle) {
                    context.set_progress(percent);
                }
            })
        };

        let mut timer = DisplayTimer::new(self.config.dwell, self.config.progress_tick, sink);
        let completion = timer.completion();
        tokio::pin!(completion);
        let mut state = self.context.subscribe();

        loop {
            let paused = state.borrow_and_update().paused;
            if paused && timer.is_running() {
                timer.pause();
                debug!(relay = %self.location, progress = timer.progress(), "Display paused");
            } else if !paused && !timer.is_running() {
                timer.resume();
            }

            tokio::select! {
                biased;
                _ = self.handle.cancelled() => {
                    timer.abort();
                    return Err(Cancelled);
                }
                completed = &mut completion => {
                    if !completed {
                        return Err(Cancelled);
                    }
                    break;
                }
                changed = state.changed() => {
                    if changed.is_err() {
                        timer.abort();
                        return Err(Cancelled);
                    }
                }
            }
        }

        self.check()
    }

    /// Wait for resume before taking the next action.
    async fn hold_while_paused(&self) -> Result<(), Cancelled> {
        let mut state = self.context.subscribe();
        loop {
            {
                let current = state.borrow_and_update();
                if !current.paused || !current.mode_on {
                    break;
                }
            }
            debug!(relay = %self.location, "Visit held while paused");
            if self.checkpoint(state.changed()).await?.is_err() {
                return Err(Cancelled);
            }
        }
        self.check()
    }

    /// Closing is best effort and always leads to advancing, but not while
    /// paused.
    async fn close_after(&self, outcome: VisitOutcome) -> Result<VisitOutcome, Cancelled> {
        self.hold_while_paused().await?;
        self.enter(VisitPhase::Closing)?;
        self.checkpoint(close_panel(self.controls.as_ref())).await?;
        Ok(outcome)
    }

    fn enter(&self, phase: VisitPhase) -> Result<(), Cancelled> {
        self.check()?;
        debug!(relay = %self.location, phase = %phase, "Visit phase");
        self.context.set_phase(phase);
        Ok(())
    }

    /// Await `work` unless the visit is cancelled first, then confirm the
    /// guard still recognizes this visit.
    async fn checkpoint<F: Future>(&self, work: F) -> Result<F::Output, Cancelled> {
        let output = tokio::select! {
            biased;
            _ = self.handle.cancelled() => return Err(Cancelled),
            output = work => output,
        };
        self.check()?;
        Ok(output)
    }

    fn check(&self) -> Result<(), Cancelled> {
        if self.guard.is_live(&self.handle) {
            Ok(())
        } else {
            Err(Cancelled)
        }
    }
}

async fn close_panel(controls: &dyn TourControls) {
    if let Err(error) = controls.close_panel().await {
        warn!(error = %error, "Failed to close relay panel");
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
