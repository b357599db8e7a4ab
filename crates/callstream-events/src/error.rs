//! Event bus error primitives.

use std::fmt::{self, Display, Formatter};

/// Error surfaced to subscribers of the event bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventBusError {
    /// The subscriber fell behind and the bus dropped events for it.
    Lagged {
        /// Number of events skipped.
        skipped: u64,
    },
}

impl EventBusError {
    /// Number of events the subscriber missed.
    #[must_use]
    pub const fn skipped(&self) -> u64 {
        match self {
            Self::Lagged { skipped } => *skipped,
        }
    }
}

impl Display for EventBusError {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str("event subscriber lagged behind the bus")
    }
}

impl std::error::Error for EventBusError {}

/// Result wrapper for event bus operations.
pub type EventBusResult<T> = Result<T, EventBusError>;
