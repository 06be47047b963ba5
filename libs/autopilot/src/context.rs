//! Shared autopilot state and the operations the UI may perform on it.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info};

/// Callback registered by the UI layer.
pub type Callback = Arc<dyn Fn() + Send + Sync>;

/// Where the in-flight visit currently is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VisitPhase {
    #[default]
    Idle,
    Rotating,
    OpeningPanel,
    AwaitingData,
    Displaying,
    Closing,
}

impl fmt::Display for VisitPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            VisitPhase::Idle => "idle",
            VisitPhase::Rotating => "rotating",
            VisitPhase::OpeningPanel => "opening panel",
            VisitPhase::AwaitingData => "awaiting data",
            VisitPhase::Displaying => "displaying",
            VisitPhase::Closing => "closing",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AutopilotState {
    /// The user wants the autopilot running.
    pub mode_on: bool,
    /// Mode is on and not paused.
    pub active: bool,
    pub paused: bool,
    pub current_index: usize,
    pub total: usize,
    /// Dwell progress of the current relay, 0–100.
    pub progress: f64,
    pub phase: VisitPhase,
    /// Incremented by every `start()` so a restart is visible even when
    /// observers only see the latest value.
    #[serde(skip)]
    run_epoch: u64,
}

impl AutopilotState {
    pub(crate) fn run_epoch(&self) -> u64 {
        self.run_epoch
    }
}

struct ContextInner {
    state: watch::Sender<AutopilotState>,
    camera_reset: Mutex<Option<Callback>>,
    skip_handler: Mutex<Option<Callback>>,
}

/// The autopilot's public control surface.
///
/// Cloning is cheap; every clone observes and mutates the same state. The
/// context holds no tour logic: the runner watches it and reacts.
#[derive(Clone)]
pub struct AutopilotContext {
    inner: Arc<ContextInner>,
}

impl Default for AutopilotContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AutopilotContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AutopilotContext")
            .field("state", &*self.inner.state.borrow())
            .finish_non_exhaustive()
    }
}

impl AutopilotContext {
    pub fn new() -> Self {
        let (state, _) = watch::channel(AutopilotState::default());
        Self {
            inner: Arc::new(ContextInner {
                state,
                camera_reset: Mutex::new(None),
                skip_handler: Mutex::new(None),
            }),
        }
    }

    pub fn start(&self) {
        self.inner.state.send_modify(|state| {
            state.mode_on = true;
            state.active = true;
            state.paused = false;
            state.current_index = 0;
            state.progress = 0.0;
            state.run_epoch += 1;
        });
        info!("Autopilot started");
    }

    /// Turn the autopilot off, reset all counters and recenter the camera.
    pub fn stop(&self) {
        let was_on = self.is_mode_on();
        self.inner.state.send_modify(|state| {
            *state = AutopilotState {
                run_epoch: state.run_epoch,
                ..AutopilotState::default()
            };
        });
        if was_on {
            info!("Autopilot stopped");
        }

        let camera_reset = lock_slot(&self.inner.camera_reset).clone();
        if let Some(camera_reset) = camera_reset {
            camera_reset();
        }
    }

    pub fn toggle(&self) {
        if self.is_mode_on() {
            self.stop();
        } else {
            self.start();
        }
    }

    pub fn pause(&self) {
        let paused = self.inner.state.send_if_modified(|state| {
            if !state.mode_on || state.paused {
                return false;
            }
            state.paused = true;
            state.active = false;
            true
        });
        if paused {
            info!(index = self.current_index(), "Autopilot paused");
        }
    }

    pub fn resume(&self) {
        let resumed = self.inner.state.send_if_modified(|state| {
            if !state.mode_on || !state.paused {
                return false;
            }
            state.paused = false;
            state.active = true;
            true
        });
        if resumed {
            info!(index = self.current_index(), "Autopilot resumed");
        }
    }

    pub fn toggle_pause(&self) {
        if self.is_paused() {
            self.resume();
        } else {
            self.pause();
        }
    }

    /// Ask the registered skip handler to move on to the next relay.
    /// Returns false when autopilot is off or nothing is registered.
    pub fn skip(&self) -> bool {
        if !self.is_mode_on() {
            return false;
        }
        let handler = lock_slot(&self.inner.skip_handler).clone();
        match handler {
            Some(handler) => {
                handler();
                true
            }
            None => {
                debug!("Skip requested with no handler registered");
                false
            }
        }
    }

    /// Replaces any previously registered camera reset.
    pub fn register_camera_reset(&self, callback: impl Fn() + Send + Sync + 'static) {
        *lock_slot(&self.inner.camera_reset) = Some(Arc::new(callback));
    }

    /// Replaces any previously registered skip handler.
    pub fn register_skip_handler(&self, callback: impl Fn() + Send + Sync + 'static) {
        *lock_slot(&self.inner.skip_handler) = Some(Arc::new(callback));
    }

    pub fn snapshot(&self) -> AutopilotState {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AutopilotState> {
        self.inner.state.subscribe()
    }

    pub fn is_mode_on(&self) -> bool {
        self.inner.state.borrow().mode_on
    }

    pub fn is_active(&self) -> bool {
        self.inner.state.borrow().active
    }

    pub fn is_paused(&self) -> bool {
        self.inner.state.borrow().paused
    }

    pub fn current_index(&self) -> usize {
        self.inner.state.borrow().current_index
    }

    pub fn total(&self) -> usize {
        self.inner.state.borrow().total
    }

    pub fn progress(&self) -> f64 {
        self.inner.state.borrow().progress
    }

    pub fn phase(&self) -> VisitPhase {
        self.inner.state.borrow().phase
    }

    /// Move to a new position; progress restarts at zero.
    pub(crate) fn set_position(&self, index: usize, total: usize) {
        self.inner.state.send_if_modified(|state| {
            if !state.mode_on {
                return false;
            }
            state.current_index = index;
            state.total = total;
            state.progress = 0.0;
            true
        });
    }

    pub(crate) fn set_progress(&self, percent: f64) {
        self.inner.state.send_if_modified(|state| {
            if !state.mode_on || state.progress == percent {
                return false;
            }
            state.progress = percent.clamp(0.0, 100.0);
            true
        });
    }

    pub(crate) fn set_phase(&self, phase: VisitPhase) {
        self.inner.state.send_if_modified(|state| {
            if state.phase == phase || (!state.mode_on && phase != VisitPhase::Idle) {
                return false;
            }
            state.phase = phase;
            true
        });
    }
}

fn lock_slot(slot: &Mutex<Option<Callback>>) -> std::sync::MutexGuard<'_, Option<Callback>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}
