use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Broad error category used for user-facing handling.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TimelineErrorCategory {
    /// Invalid input or a command issued in the wrong room state.
    Config,
    /// Feed collaborator call (subscribe/paginate) failed.
    Feed,
    /// Inbound event cannot be ordered or identified.
    Integrity,
    /// Outgoing message submission failed.
    Send,
    /// Internal bug or invariant break.
    Internal,
}

/// Stable error payload emitted across the command/event boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("{category:?}:{code}: {message}")]
pub struct TimelineError {
    /// High-level error category.
    pub category: TimelineErrorCategory,
    /// Stable machine-readable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

impl TimelineError {
    /// Construct a new timeline error.
    pub fn new(
        category: TimelineErrorCategory,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
        }
    }

    /// Error for a command that needs a current room.
    pub fn no_active_room(action: impl Into<String>) -> Self {
        let action = action.into();
        Self::new(
            TimelineErrorCategory::Config,
            "no_active_room",
            format!("cannot run '{action}' without an active room"),
        )
    }

    /// Error for an event whose timestamp cannot be used for ordering.
    pub fn invalid_timestamp(event_id: &str) -> Self {
        Self::new(
            TimelineErrorCategory::Integrity,
            "invalid_timestamp",
            format!("event '{event_id}' has a missing or unparseable origin_server_ts"),
        )
    }

    /// Error for an event without identity fields.
    pub fn malformed_event(detail: impl Into<String>) -> Self {
        Self::new(
            TimelineErrorCategory::Integrity,
            "malformed_event",
            detail.into(),
        )
    }

    /// Whether re-triggering the failed operation may succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.category,
            TimelineErrorCategory::Feed | TimelineErrorCategory::Send
        )
    }
}
