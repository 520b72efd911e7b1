//! Collaborator contracts for a room event feed and message submission.
//!
//! The controller never talks to a chat SDK directly. It registers listeners
//! through [`EventFeed`], holds them in a [`RoomSubscription`] so teardown is an
//! explicit step, and submits outgoing text through [`MessageSender`].

use std::sync::Arc;

use roomline_core::{
    EventFilter, FeedEvent, PaginationRequest, TimelineError, TimelineErrorCategory,
};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

mod memory;

pub use memory::{InMemoryEventFeed, PaginationMode, SentMessage};

/// Errors reported by feed and send collaborators.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FeedError {
    #[error("room not found: {0}")]
    RoomNotFound(String),
    #[error("feed unavailable: {0}")]
    Unavailable(String),
    #[error("feed backend failure: {0}")]
    Backend(String),
}

impl FeedError {
    /// Map into the stable error payload under `code`.
    pub fn into_timeline_error(
        self,
        category: TimelineErrorCategory,
        code: &str,
    ) -> TimelineError {
        TimelineError::new(category, code, self.to_string())
    }
}

/// Opaque identifier of a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerHandle(pub u64);

/// Callback invoked for every event that passes a listener's filter.
pub type Listener = Arc<dyn Fn(FeedEvent) + Send + Sync>;

/// One-shot completion for [`EventFeed::paginate`].
pub type PaginationCallback = Box<dyn FnOnce(Result<Vec<Value>, FeedError>) + Send>;

/// One-shot completion for [`MessageSender::send_text`]; receives the event ID.
pub type SendCallback = Box<dyn FnOnce(Result<String, FeedError>) + Send>;

/// Live event feed of a chat SDK.
pub trait EventFeed: Send + Sync {
    fn listen(
        &self,
        room_id: &str,
        filter: EventFilter,
        listener: Listener,
    ) -> Result<ListenerHandle, FeedError>;

    fn remove_listener(&self, room_id: &str, handle: ListenerHandle);

    /// Restart backward pagination of `room_id` from the live end.
    fn reset_pagination(&self, room_id: &str);

    /// Request a page of events. Must not block; `completion` runs once the
    /// page (or failure) is available.
    fn paginate(&self, room_id: &str, request: PaginationRequest, completion: PaginationCallback);
}

/// Outgoing plain-text submission.
pub trait MessageSender: Send + Sync {
    fn send_text(&self, room_id: &str, body: &str, completion: SendCallback);
}

/// Listeners registered for one room, released together.
pub struct RoomSubscription {
    feed: Arc<dyn EventFeed>,
    room_id: String,
    handles: Vec<ListenerHandle>,
}

impl RoomSubscription {
    pub fn new(feed: Arc<dyn EventFeed>, room_id: impl Into<String>) -> Self {
        Self {
            feed,
            room_id: room_id.into(),
            handles: Vec::new(),
        }
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn listener_count(&self) -> usize {
        self.handles.len()
    }

    /// Register a listener on this subscription's room.
    pub fn listen(&mut self, filter: EventFilter, listener: Listener) -> Result<(), FeedError> {
        let handle = self.feed.listen(&self.room_id, filter, listener)?;
        self.handles.push(handle);
        Ok(())
    }

    /// Remove every listener registered through this subscription.
    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if self.handles.is_empty() {
            return;
        }
        debug!(room_id = %self.room_id, count = self.handles.len(), "releasing room listeners");
        for handle in self.handles.drain(..) {
            self.feed.remove_listener(&self.room_id, handle);
        }
    }
}

impl Drop for RoomSubscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for RoomSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomSubscription")
            .field("room_id", &self.room_id)
            .field("handles", &self.handles)
            .finish()
    }
}
