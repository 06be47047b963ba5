use crate::controls::Location;

/// Failure reported by a [`TourControls`](crate::TourControls) implementation.
///
/// The runner never propagates these: a failed step closes the panel and moves
/// on to the next relay.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ControlError {
    #[error("relay not found: {0}")]
    LocationNotFound(Location),
    #[error("camera rotation failed: {0}")]
    Rotation(String),
    #[error("panel {action} failed: {reason}")]
    Panel {
        action: &'static str,
        reason: String,
    },
    #[error("{0}")]
    Other(String),
}

impl ControlError {
    pub fn panel(action: &'static str, reason: impl Into<String>) -> Self {
        Self::Panel {
            action,
            reason: reason.into(),
        }
    }
}

/// Returned from a checkpoint when the visit no longer owns the guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Cancelled;
