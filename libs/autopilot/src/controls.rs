//! The contract between the autopilot and the layers it drives.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::ControlError;

/// One visitable relay. Opaque to the autopilot beyond equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Location(pub String);

impl Location {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Location {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for Location {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Operations the autopilot needs from the globe and the feed panel.
///
/// `rotate_to_location`, `open_panel` and `close_panel` are not time-bounded
/// by the autopilot; implementations must not hang. The polling methods must
/// not block.
#[async_trait]
pub trait TourControls: Send + Sync {
    /// Resolves once the camera has finished flying to `location`.
    async fn rotate_to_location(&self, location: &Location) -> Result<(), ControlError>;

    /// Resolves once the panel for `location` is open and its fetch has started.
    async fn open_panel(&self, location: &Location) -> Result<(), ControlError>;

    /// Must be safe to call when no panel is open.
    async fn close_panel(&self) -> Result<(), ControlError>;

    /// True once the open panel's content has settled, successfully or not.
    fn are_data_loaded(&self) -> bool;

    fn is_panel_open(&self) -> bool;

    /// Idempotent.
    fn start_display_scroll(&self) {}

    /// Idempotent.
    fn stop_display_scroll(&self) {}
}

/// Supplies the current candidate list whenever a new visitation order is built.
pub trait LocationSource: Send + Sync {
    fn candidates(&self) -> Vec<Location>;
}

impl LocationSource for Vec<Location> {
    fn candidates(&self) -> Vec<Location> {
        self.clone()
    }
}

impl LocationSource for watch::Receiver<Vec<Location>> {
    fn candidates(&self) -> Vec<Location> {
        self.borrow().clone()
    }
}
