//! Core room timeline contract shared between the controller runtime and its
//! consumers.
//!
//! This crate defines the message model, the de-duplicating timeline store,
//! the room lifecycle state machine, event normalization, and the
//! command/event channel abstractions.

/// Async command/event channel primitives.
pub mod channel;
/// Stable timeline error type.
pub mod error;
/// Raw event to message normalization and send acknowledgements.
pub mod normalization;
/// Display classification of timeline rows.
pub mod render;
/// Room lifecycle state machine.
pub mod state_machine;
/// De-duplicated, ordered timeline store.
pub mod timeline;
/// Consumer-facing types (commands, events, payloads).
pub mod types;

pub use channel::{ControllerChannelError, ControllerChannels, EventEmitter, EventStream};
pub use error::{TimelineError, TimelineErrorCategory};
pub use normalization::{
    SendOutcome, message_from_event, normalize_error, normalize_send_outcome, typing_user_ids,
};
pub use render::{MessageCellKind, MessageView, message_views};
pub use state_machine::{RoomSwitchMachine, RoomTransition};
pub use timeline::TimelineStore;
pub use types::{
    ControllerCommand, ControllerConfig, ControllerEvent, EventFilter, EventKind, FeedEvent,
    Message, PaginationDirection, PaginationRequest, RoomLifecycleState, SendAck,
};
