//! Error types for Cascade driver operations.

use cascade_chip::link::LinkError;
use cascade_chip::ChipKey;
use thiserror::Error;

/// Result type alias for Cascade operations.
pub type Result<T> = std::result::Result<T, CascadeError>;

/// Errors that can occur during network bring-up.
///
/// Register mismatches are **not** errors: they are carried in
/// [`crate::reconcile::ReconcileResult`] and degrade to waitlist entries.
/// A read timeout is surfaced as `Transport` by the bus and treated by the
/// reconciliation layer exactly like a mismatched value.
#[derive(Debug, Error)]
pub enum CascadeError {
    /// Bus-level failure (timeout, dropped response, transport fault).
    #[error("Transport error: {reason}")]
    Transport {
        /// Reason for failure.
        reason: String,
    },

    /// Lane algebra misuse — a programming error, not a bus condition.
    #[error("Link algebra error: {0}")]
    InvalidOffset(#[from] LinkError),

    /// The desired chip id is already present in the working set.
    #[error("Chip already present: {key}")]
    AddressConflict {
        /// Key that collided.
        key: ChipKey,
    },

    /// Operation on a chip that is not in the working set.
    #[error("Unknown chip: {key}")]
    UnknownChip {
        /// Key that was looked up.
        key: ChipKey,
    },
}

impl CascadeError {
    /// Create a transport error.
    pub fn transport(reason: impl Into<String>) -> Self {
        Self::Transport { reason: reason.into() }
    }
}
