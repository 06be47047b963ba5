//! A headless globe for driving the autopilot without a renderer.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use relaymap_autopilot::{ControlError, Location, TourControls};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::debug;

/// How the simulated globe and panel behave.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulationProfile {
    /// Camera flight time per rotation.
    pub flight_time: Duration,
    /// Upper bound of the random delay before a panel's data arrive.
    pub max_load_latency: Duration,
    /// Probability that a rotation fails.
    pub fail_rate: f64,
    /// Probability that an opened panel never receives data.
    pub stall_rate: f64,
}

impl Default for SimulationProfile {
    fn default() -> Self {
        Self {
            flight_time: Duration::from_millis(800),
            max_load_latency: Duration::from_millis(1200),
            fail_rate: 0.0,
            stall_rate: 0.0,
        }
    }
}

#[derive(Debug)]
struct OpenPanel {
    location: Location,
    ready_at: Option<Instant>,
}

pub struct SimulatedGlobe {
    profile: SimulationProfile,
    rng: Mutex<StdRng>,
    panel: Mutex<Option<OpenPanel>>,
    closed: watch::Sender<u64>,
}

impl SimulatedGlobe {
    /// The same `seed` replays the same failures and latencies.
    pub fn new(profile: SimulationProfile, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_rng(&mut rand::rng()),
        };
        let (closed, _) = watch::channel(0);
        Self {
            profile,
            rng: Mutex::new(rng),
            panel: Mutex::new(None),
            closed,
        }
    }

    /// Counts `close_panel` calls.
    pub fn closed_panels(&self) -> watch::Receiver<u64> {
        self.closed.subscribe()
    }

    fn roll(&self, probability: f64) -> bool {
        probability > 0.0 && lock(&self.rng).random_bool(probability.min(1.0))
    }

    fn load_latency(&self) -> Duration {
        let max = self.profile.max_load_latency;
        if max.is_zero() {
            return Duration::ZERO;
        }
        let millis = max.as_millis().min(u128::from(u64::MAX)) as u64;
        Duration::from_millis(lock(&self.rng).random_range(0..=millis))
    }
}

#[async_trait]
impl TourControls for SimulatedGlobe {
    async fn rotate_to_location(&self, location: &Location) -> Result<(), ControlError> {
        debug!(relay = %location, "Camera flying");
        tokio::time::sleep(self.profile.flight_time).await;
        if self.roll(self.profile.fail_rate) {
            return Err(ControlError::Rotation(format!(
                "lost track of {location} mid-flight"
            )));
        }
        Ok(())
    }

    async fn open_panel(&self, location: &Location) -> Result<(), ControlError> {
        let ready_at = if self.roll(self.profile.stall_rate) {
            debug!(relay = %location, "Panel will never load");
            None
        } else {
            Some(Instant::now() + self.load_latency())
        };
        *lock(&self.panel) = Some(OpenPanel {
            location: location.clone(),
            ready_at,
        });
        Ok(())
    }

    async fn close_panel(&self) -> Result<(), ControlError> {
        if let Some(panel) = lock(&self.panel).take() {
            debug!(relay = %panel.location, "Panel closed");
        }
        self.closed.send_modify(|closed| *closed += 1);
        Ok(())
    }

    fn are_data_loaded(&self) -> bool {
        lock(&self.panel)
            .as_ref()
            .and_then(|panel| panel.ready_at)
            .is_some_and(|ready_at| Instant::now() >= ready_at)
    }

    fn is_panel_open(&self) -> bool {
        lock(&self.panel).is_some()
    }

    fn start_display_scroll(&self) {
        debug!("Feed scroll started");
    }

    fn stop_display_scroll(&self) {
        debug!("Feed scroll stopped");
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
