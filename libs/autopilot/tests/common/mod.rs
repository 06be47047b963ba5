#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use relaymap_autopilot::{
    AutopilotConfig, AutopilotContext, AutopilotState, ControlError, Location, LocationSource,
    RunnerHandle, TourControls, spawn_autopilot,
};
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Rotate(Location),
    Open(Location),
    Close,
    ScrollStart,
    ScrollStop,
}

/// Globe and panel double that records every call with its (virtual) time.
pub struct RecordingGlobe {
    rotate_delay: Duration,
    data_delay: Duration,
    never_loads: bool,
    failing_rotations: HashSet<Location>,
    fail_every_rotation: bool,
    panic_on_open: bool,
    fail_open: bool,
    panel_stays_shut: bool,
    fail_close: bool,
    calls: Mutex<Vec<(Instant, Call)>>,
    panel: Mutex<Option<(Location, Instant)>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    scrolling: AtomicBool,
    scroll_overlaps: AtomicUsize,
}

impl Default for RecordingGlobe {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingGlobe {
    pub fn new() -> Self {
        Self {
            rotate_delay: Duration::from_millis(50),
            data_delay: Duration::ZERO,
            never_loads: false,
            failing_rotations: HashSet::new(),
            fail_every_rotation: false,
            panic_on_open: false,
            fail_open: false,
            panel_stays_shut: false,
            fail_close: false,
            calls: Mutex::new(Vec::new()),
            panel: Mutex::new(None),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            scrolling: AtomicBool::new(false),
            scroll_overlaps: AtomicUsize::new(0),
        }
    }

    pub fn rotate_delay(mut self, delay: Duration) -> Self {
        self.rotate_delay = delay;
        self
    }

    pub fn data_delay(mut self, delay: Duration) -> Self {
        self.data_delay = delay;
        self
    }

    pub fn never_loads(mut self) -> Self {
        self.never_loads = true;
        self
    }

    pub fn fail_rotation_to(mut self, location: Location) -> Self {
        self.failing_rotations.insert(location);
        self
    }

    pub fn fail_every_rotation(mut self) -> Self {
        self.fail_every_rotation = true;
        self
    }

    pub fn panic_on_open(mut self) -> Self {
        self.panic_on_open = true;
        self
    }

    pub fn fail_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    /// `open_panel` succeeds but the panel never shows up.
    pub fn panel_stays_shut(mut self) -> Self {
        self.panel_stays_shut = true;
        self
    }

    /// `close_panel` errors and leaves the panel open.
    pub fn fail_close(mut self) -> Self {
        self.fail_close = true;
        self
    }

    /// The user dismisses the panel behind the autopilot's back.
    pub fn close_panel_externally(&self) {
        *lock(&self.panel) = None;
    }

    pub fn calls(&self) -> Vec<(Instant, Call)> {
        lock(&self.calls).clone()
    }

    pub fn rotations(&self) -> Vec<Location> {
        self.calls()
            .into_iter()
            .filter_map(|(_, call)| match call {
                Call::Rotate(location) => Some(location),
                _ => None,
            })
            .collect()
    }

    pub fn opens(&self) -> Vec<Location> {
        self.calls()
            .into_iter()
            .filter_map(|(_, call)| match call {
                Call::Open(location) => Some(location),
                _ => None,
            })
            .collect()
    }

    pub fn first_time_of(&self, wanted: impl Fn(&Call) -> bool) -> Option<Instant> {
        self.calls()
            .into_iter()
            .find(|(_, call)| wanted(call))
            .map(|(at, _)| at)
    }

    pub fn count(&self, wanted: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|(_, call)| wanted(call)).count()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn scroll_overlaps(&self) -> usize {
        self.scroll_overlaps.load(Ordering::SeqCst)
    }

    fn record(&self, call: Call) {
        lock(&self.calls).push((Instant::now(), call));
    }
}

struct InFlight<'a>(&'a RecordingGlobe);

impl<'a> InFlight<'a> {
    fn enter(globe: &'a RecordingGlobe) -> Self {
        let now = globe.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        globe.max_in_flight.fetch_max(now, Ordering::SeqCst);
        Self(globe)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl TourControls for RecordingGlobe {
    async fn rotate_to_location(&self, location: &Location) -> Result<(), ControlError> {
        let _in_flight = InFlight::enter(self);
        self.record(Call::Rotate(location.clone()));
        tokio::time::sleep(self.rotate_delay).await;
        if self.fail_every_rotation || self.failing_rotations.contains(location) {
            return Err(ControlError::LocationNotFound(location.clone()));
        }
        Ok(())
    }

    async fn open_panel(&self, location: &Location) -> Result<(), ControlError> {
        let _in_flight = InFlight::enter(self);
        self.record(Call::Open(location.clone()));
        if self.panic_on_open {
            panic!("panel exploded for {location}");
        }
        if self.fail_open {
            return Err(ControlError::panel("open", format!("{location} refused")));
        }
        if self.panel_stays_shut {
            return Ok(());
        }
        *lock(&self.panel) = Some((location.clone(), Instant::now()));
        Ok(())
    }

    async fn close_panel(&self) -> Result<(), ControlError> {
        self.record(Call::Close);
        if self.fail_close {
            return Err(ControlError::panel("close", "panel is stuck"));
        }
        *lock(&self.panel) = None;
        Ok(())
    }

    fn are_data_loaded(&self) -> bool {
        if self.never_loads {
            return false;
        }
        lock(&self.panel)
            .as_ref()
            .is_some_and(|(_, opened)| opened.elapsed() >= self.data_delay)
    }

    fn is_panel_open(&self) -> bool {
        lock(&self.panel).is_some()
    }

    fn start_display_scroll(&self) {
        if self.scrolling.swap(true, Ordering::SeqCst) {
            self.scroll_overlaps.fetch_add(1, Ordering::SeqCst);
        }
        self.record(Call::ScrollStart);
    }

    fn stop_display_scroll(&self) {
        if self.scrolling.swap(false, Ordering::SeqCst) {
            self.record(Call::ScrollStop);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub fn relays(count: usize) -> Vec<Location> {
    (0..count)
        .map(|index| Location::new(format!("wss://relay-{index}.example")))
        .collect()
}

pub fn spawn(
    globe: &Arc<RecordingGlobe>,
    source: Arc<dyn LocationSource>,
    config: AutopilotConfig,
) -> (AutopilotContext, RunnerHandle) {
    let context = AutopilotContext::new();
    let runner = spawn_autopilot(context.clone(), globe.clone(), source, config);
    (context, runner)
}

pub async fn wait_for_state(
    context: &AutopilotContext,
    within: Duration,
    predicate: impl Fn(&AutopilotState) -> bool,
) -> AutopilotState {
    let mut state = context.subscribe();
    let reached = match tokio::time::timeout(within, state.wait_for(|value| predicate(value))).await
    {
        Ok(Ok(value)) => Some(value.clone()),
        Ok(Err(error)) => panic!("state channel closed: {error}"),
        Err(_) => None,
    };
    match reached {
        Some(value) => value,
        None => panic!(
            "state not reached within {within:?}; last state {:?}",
            context.snapshot()
        ),
    }
}

pub fn assert_permutation(visited: &[Location], candidates: &[Location]) {
    let mut visited = visited.to_vec();
    let mut expected = candidates.to_vec();
    visited.sort();
    expected.sort();
    assert_eq!(visited, expected, "one cycle must visit every relay exactly once");
}

pub fn millis_between(from: Instant, to: Instant) -> u128 {
    to.duration_since(from).as_millis()
}
