use serde_json::Value;

use crate::{
    error::TimelineError,
    types::{ControllerEvent, Message, SendAck},
};

/// Build a [`Message`] from a raw Matrix event.
///
/// A missing or non-string `content.body` becomes an empty body. A missing
/// `event_id` or `sender` is a `malformed_event` error, and a missing or
/// non-integer `origin_server_ts` is an `invalid_timestamp` error; neither is
/// defaulted because that would corrupt identity or ordering silently.
pub fn message_from_event(raw: &Value) -> Result<Message, TimelineError> {
    let event_id = raw
        .get("event_id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| TimelineError::malformed_event("event has no event_id"))?;
    let sender = raw
        .get("sender")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            TimelineError::malformed_event(format!("event '{event_id}' has no sender"))
        })?;
    let timestamp_ms = raw
        .get("origin_server_ts")
        .and_then(Value::as_u64)
        .ok_or_else(|| TimelineError::invalid_timestamp(event_id))?;
    let body = raw
        .get("content")
        .and_then(|content| content.get("body"))
        .and_then(Value::as_str)
        .unwrap_or_default();

    Ok(Message {
        event_id: event_id.to_owned(),
        sender: sender.to_owned(),
        body: body.to_owned(),
        timestamp_ms,
    })
}

/// User IDs listed in an `m.typing` event's `content.user_ids`.
pub fn typing_user_ids(raw: &Value) -> Vec<String> {
    raw.get("content")
        .and_then(|content| content.get("user_ids"))
        .and_then(Value::as_array)
        .map(|ids| {
            ids.iter()
                .filter_map(Value::as_str)
                .map(ToOwned::to_owned)
                .collect()
        })
        .unwrap_or_default()
}

/// Send result before normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Send succeeded and produced an event ID.
    Success { event_id: String },
    /// Send failed with error details.
    Failure { error: TimelineError },
}

/// Convert a send outcome to a stable `ControllerEvent::SendAck`.
pub fn normalize_send_outcome(
    client_txn_id: impl Into<String>,
    outcome: SendOutcome,
) -> ControllerEvent {
    let client_txn_id = client_txn_id.into();
    match outcome {
        SendOutcome::Success { event_id } => ControllerEvent::SendAck(SendAck {
            client_txn_id,
            event_id: Some(event_id),
            error_code: None,
        }),
        SendOutcome::Failure { error } => ControllerEvent::SendAck(SendAck {
            client_txn_id,
            event_id: None,
            error_code: Some(error.code),
        }),
    }
}

/// Convert an error into an `ErrorReported` event.
pub fn normalize_error(error: TimelineError) -> ControllerEvent {
    let recoverable = error.is_recoverable();
    ControllerEvent::ErrorReported {
        code: error.code,
        message: error.message,
        recoverable,
    }
}
