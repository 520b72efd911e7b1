use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Matrix `type` of a room message event.
pub const ROOM_MESSAGE_EVENT_TYPE: &str = "m.room.message";
/// Matrix `type` of an ephemeral typing notification.
pub const TYPING_EVENT_TYPE: &str = "m.typing";

const DEFAULT_INITIAL_PAGE_SIZE: u16 = 10;

/// Room lifecycle state reported to consumers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum RoomLifecycleState {
    /// No room is selected (startup or after logout).
    #[default]
    NoRoom,
    /// Exactly one room is subscribed and owns the timeline store.
    Active {
        /// Matrix room ID.
        room_id: String,
    },
}

impl RoomLifecycleState {
    /// Room ID when a room is active.
    pub fn room_id(&self) -> Option<&str> {
        match self {
            Self::NoRoom => None,
            Self::Active { room_id } => Some(room_id),
        }
    }
}

/// One chat event rendered in a room timeline.
///
/// Messages are immutable once built; the event ID is the identity used for
/// de-duplication.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    /// Event ID, unique within a timeline.
    pub event_id: String,
    /// Sender user ID.
    pub sender: String,
    /// Plain text body; empty when the event carried no usable body.
    pub body: String,
    /// Server-assigned timestamp in milliseconds since Unix epoch.
    pub timestamp_ms: u64,
}

/// Classification of a live feed event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// `m.room.message`.
    RoomMessage,
    /// `m.typing`.
    Typing,
    /// Any other event type, carried verbatim.
    Other(String),
}

impl EventKind {
    /// Classify a Matrix event `type` string.
    pub fn from_event_type(event_type: &str) -> Self {
        match event_type {
            ROOM_MESSAGE_EVENT_TYPE => Self::RoomMessage,
            TYPING_EVENT_TYPE => Self::Typing,
            other => Self::Other(other.to_owned()),
        }
    }
}

/// Listener filter used when subscribing to a room feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventFilter {
    /// Unfiltered catch-all.
    All,
    /// Only the listed kinds.
    Kinds(Vec<EventKind>),
}

impl EventFilter {
    /// Whether an event of `kind` passes this filter.
    pub fn matches(&self, kind: &EventKind) -> bool {
        match self {
            Self::All => true,
            Self::Kinds(kinds) => kinds.contains(kind),
        }
    }
}

/// Raw event delivered by a room feed.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedEvent {
    /// Room the event was delivered for.
    pub room_id: String,
    /// Kind derived from the raw `type` field.
    pub kind: EventKind,
    /// Original JSON event.
    pub raw: Value,
}

impl FeedEvent {
    /// Wrap a raw JSON event, classifying it by its `type` field.
    pub fn from_raw(room_id: impl Into<String>, raw: Value) -> Self {
        let kind = raw
            .get("type")
            .and_then(Value::as_str)
            .map(EventKind::from_event_type)
            .unwrap_or_else(|| EventKind::Other(String::new()));
        Self {
            room_id: room_id.into(),
            kind,
            raw,
        }
    }
}

/// Pagination direction relative to the live end of the timeline.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PaginationDirection {
    /// Towards older events.
    Backward,
    /// Towards newer events.
    Forward,
}

/// Parameters of a single pagination call.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PaginationRequest {
    /// Maximum number of events to return.
    pub limit: u16,
    /// Direction to paginate in.
    pub direction: PaginationDirection,
    /// Whether the feed may go to the network, not only its local store.
    pub allow_network_fetch: bool,
}

impl PaginationRequest {
    /// Backward page of `limit` events.
    pub fn backward(limit: u16, allow_network_fetch: bool) -> Self {
        Self {
            limit,
            direction: PaginationDirection::Backward,
            allow_network_fetch,
        }
    }

    /// Clamp a requested pagination limit against safety and server caps.
    ///
    /// The result is always in `1..=100`.
    pub fn bounded_limit(requested: u16, server_cap: u16) -> u16 {
        let safe_requested = requested.max(1);
        let safe_cap = server_cap.max(1);
        safe_requested.min(safe_cap).min(100)
    }
}

/// Tuning values for the room switch controller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Logged-in user, forwarded to render consumers with every redraw.
    pub own_user_id: Option<String>,
    /// Size of the backward page requested after each room switch.
    pub initial_page_size: u16,
    /// Whether the initial page may be fetched from the network.
    pub allow_network_fetch: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            own_user_id: None,
            initial_page_size: DEFAULT_INITIAL_PAGE_SIZE,
            allow_network_fetch: true,
        }
    }
}

/// Command channel input accepted by the controller runtime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ControllerCommand {
    /// Make `room_id` the current room.
    SwitchRoom {
        /// Target room ID.
        room_id: String,
    },
    /// Request another backward page for the current room.
    PaginateBack {
        /// Requested page size (subject to caps).
        limit: u16,
    },
    /// Send a plain text message to the current room.
    SendText {
        /// Caller transaction ID echoed in `SendAck`.
        client_txn_id: String,
        /// Message body.
        body: String,
    },
    /// Tear down the current room and return to `NoRoom`.
    Logout,
}

/// Acknowledgement for `SendText`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SendAck {
    /// Original caller transaction ID.
    pub client_txn_id: String,
    /// Event ID on success.
    pub event_id: Option<String>,
    /// Stable error code on failure.
    pub error_code: Option<String>,
}

/// Event channel output emitted by the controller runtime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ControllerEvent {
    /// Current room changed.
    StateChanged {
        /// New lifecycle state.
        state: RoomLifecycleState,
    },
    /// The timeline changed; consumers should redraw from `items`.
    TimelineUpdated {
        /// Room the snapshot belongs to.
        room_id: String,
        /// Full ordered, de-duplicated snapshot.
        items: Vec<Message>,
        /// Logged-in user, when known.
        own_user_id: Option<String>,
        /// `true` when a live message was appended.
        scroll_to_end: bool,
    },
    /// Typing notification forwarded from the room feed.
    Typing {
        /// Room the notification belongs to.
        room_id: String,
        /// Users currently typing.
        user_ids: Vec<String>,
    },
    /// Send acknowledgement.
    SendAck(SendAck),
    /// Non-fatal error surfaced to the user.
    ErrorReported {
        /// Stable error code.
        code: String,
        /// Human-readable error message.
        message: String,
        /// Whether re-triggering the operation may succeed.
        recoverable: bool,
    },
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn classifies_feed_events_by_type() {
        let message = FeedEvent::from_raw("!a:example.org", json!({"type": "m.room.message"}));
        let typing = FeedEvent::from_raw("!a:example.org", json!({"type": "m.typing"}));
        let member = FeedEvent::from_raw("!a:example.org", json!({"type": "m.room.member"}));
        let untyped = FeedEvent::from_raw("!a:example.org", json!({}));

        assert_eq!(message.kind, EventKind::RoomMessage);
        assert_eq!(typing.kind, EventKind::Typing);
        assert_eq!(member.kind, EventKind::Other("m.room.member".into()));
        assert_eq!(untyped.kind, EventKind::Other(String::new()));
    }

    #[test]
    fn filter_matches_listed_kinds_only() {
        let filter = EventFilter::Kinds(vec![EventKind::RoomMessage]);
        assert!(filter.matches(&EventKind::RoomMessage));
        assert!(!filter.matches(&EventKind::Typing));
        assert!(EventFilter::All.matches(&EventKind::Other("x".into())));
    }

    #[test]
    fn bounds_pagination_limit_for_safety() {
        assert_eq!(PaginationRequest::bounded_limit(0, 200), 1);
        assert_eq!(PaginationRequest::bounded_limit(25, 10), 10);
        assert_eq!(PaginationRequest::bounded_limit(150, 500), 100);
    }

    #[test]
    fn default_config_requests_ten_events_from_network() {
        let config = ControllerConfig::default();
        assert_eq!(config.initial_page_size, 10);
        assert!(config.allow_network_fetch);
        assert_eq!(config.own_user_id, None);
    }
}
