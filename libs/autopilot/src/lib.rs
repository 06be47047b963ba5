//! Autopilot sequencing core for the relay globe.
//!
//! The autopilot walks a shuffled list of relay locations and, for each one,
//! rotates the camera, opens the relay's feed panel, waits for its data,
//! displays it for a fixed dwell while publishing progress, and closes the
//! panel again. Exactly one visit is in flight at any time.
//!
//! The UI talks to [`AutopilotContext`]; the rendering and panel layers
//! implement [`TourControls`]; [`spawn_autopilot`] ties them together.

pub mod config;
pub mod context;
pub mod controls;
pub mod error;
pub mod guard;
pub mod order;
pub mod progress;
pub mod runner;

pub use config::{AutopilotConfig, ConfigError, ConfigValidationError};
pub use context::{AutopilotContext, AutopilotState, Callback, VisitPhase};
pub use controls::{Location, LocationSource, TourControls};
pub use error::ControlError;
pub use guard::{ExecutionGuard, ExecutionHandle, ExecutionId};
pub use order::VisitationOrder;
pub use progress::{DisplayTimer, ProgressSink};
pub use runner::{RunnerHandle, spawn_autopilot};
