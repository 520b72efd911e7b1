use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard},
    time::{SystemTime, UNIX_EPOCH},
};

use roomline_core::{
    EventFilter, FeedEvent, PaginationDirection, PaginationRequest, types::ROOM_MESSAGE_EVENT_TYPE,
};
use serde_json::{Value, json};
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::{
    EventFeed, FeedError, Listener, ListenerHandle, MessageSender, PaginationCallback,
    SendCallback,
};

const DEFAULT_USER_ID: &str = "@me:localhost";

/// When pagination completions are delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PaginationMode {
    /// Completion runs inside `paginate`.
    #[default]
    Immediate,
    /// Completions queue until resolved or failed explicitly.
    Deferred,
}

/// Record of a message accepted by [`InMemoryEventFeed::send_text`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub room_id: String,
    pub event_id: String,
    pub body: String,
}

struct RegisteredListener {
    handle: ListenerHandle,
    filter: EventFilter,
    listener: Listener,
}

#[derive(Default)]
struct RoomFeed {
    history: Vec<Value>,
    listeners: Vec<RegisteredListener>,
    // Index of the oldest event already paginated; `None` means the live end.
    backward_cursor: Option<usize>,
}

struct PendingPage {
    room_id: String,
    request: PaginationRequest,
    completion: PaginationCallback,
}

#[derive(Default)]
struct FeedState {
    rooms: HashMap<String, RoomFeed>,
    pending: VecDeque<PendingPage>,
    requests: Vec<(String, PaginationRequest)>,
    sent: Vec<SentMessage>,
    pagination_failure: Option<FeedError>,
    send_failure: Option<FeedError>,
    // Registrations still allowed before `listen` starts failing.
    listen_failure: Option<(usize, FeedError)>,
    next_handle: u64,
}

/// Process-local feed keeping per-room history, used by tests and the smoke app.
#[derive(Clone)]
pub struct InMemoryEventFeed {
    state: Arc<Mutex<FeedState>>,
    mode: PaginationMode,
    user_id: String,
}

impl Default for InMemoryEventFeed {
    fn default() -> Self {
        Self::new(PaginationMode::Immediate)
    }
}

impl InMemoryEventFeed {
    pub fn new(mode: PaginationMode) -> Self {
        Self {
            state: Arc::new(Mutex::new(FeedState::default())),
            mode,
            user_id: DEFAULT_USER_ID.to_owned(),
        }
    }

    /// Sender used for echoes of submitted messages.
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self
    }

    /// Append history to a room without notifying listeners.
    pub fn seed(&self, room_id: &str, events: impl IntoIterator<Item = Value>) {
        let Ok(mut state) = self.lock_state() else {
            return;
        };
        state
            .rooms
            .entry(room_id.to_owned())
            .or_default()
            .history
            .extend(events);
    }

    /// Append an event to a room's history and deliver it to matching
    /// listeners. Returns the number of listeners invoked.
    pub fn emit(&self, room_id: &str, raw: Value) -> usize {
        let event = FeedEvent::from_raw(room_id, raw);
        let targets: Vec<Listener> = {
            let Ok(mut state) = self.lock_state() else {
                return 0;
            };
            let room = state.rooms.entry(room_id.to_owned()).or_default();
            room.history.push(event.raw.clone());
            room.listeners
                .iter()
                .filter(|registered| registered.filter.matches(&event.kind))
                .map(|registered| registered.listener.clone())
                .collect()
        };

        trace!(%room_id, kind = ?event.kind, listeners = targets.len(), "emitting feed event");
        for listener in &targets {
            listener(event.clone());
        }
        targets.len()
    }

    pub fn listener_count(&self, room_id: &str) -> usize {
        self.state
            .lock()
            .map(|state| state.rooms.get(room_id).map_or(0, |room| room.listeners.len()))
            .unwrap_or(0)
    }

    /// Every pagination request received so far, in order.
    pub fn pagination_requests(&self) -> Vec<(String, PaginationRequest)> {
        self.state
            .lock()
            .map(|state| state.requests.clone())
            .unwrap_or_default()
    }

    pub fn pending_pagination_count(&self) -> usize {
        self.state
            .lock()
            .map(|state| state.pending.len())
            .unwrap_or(0)
    }

    /// Make subsequent immediate paginations fail with `failure`.
    pub fn set_pagination_failure(&self, failure: Option<FeedError>) {
        if let Ok(mut state) = self.lock_state() {
            state.pagination_failure = failure;
        }
    }

    /// Let `successes` more listener registrations through, then fail every
    /// later one with `failure`. `None` clears the injected failure.
    pub fn fail_listen_after(&self, successes: usize, failure: Option<FeedError>) {
        if let Ok(mut state) = self.lock_state() {
            state.listen_failure = failure.map(|failure| (successes, failure));
        }
    }

    /// Make subsequent sends fail with `failure`.
    pub fn set_send_failure(&self, failure: Option<FeedError>) {
        if let Ok(mut state) = self.lock_state() {
            state.send_failure = failure;
        }
    }

    pub fn sent_messages(&self) -> Vec<SentMessage> {
        self.state
            .lock()
            .map(|state| state.sent.clone())
            .unwrap_or_default()
    }

    /// Complete the oldest deferred pagination with its page. Returns the
    /// room it was issued for.
    pub fn resolve_next_pagination(&self) -> Option<String> {
        let (pending, page) = {
            let mut state = self.lock_state().ok()?;
            let pending = state.pending.pop_front()?;
            let page = take_page(&mut state, &pending.room_id, pending.request);
            (pending, page)
        };
        debug!(room_id = %pending.room_id, "resolving deferred pagination");
        (pending.completion)(page);
        Some(pending.room_id)
    }

    /// Fail the oldest deferred pagination with `error`.
    pub fn fail_next_pagination(&self, error: FeedError) -> Option<String> {
        let pending = self.lock_state().ok()?.pending.pop_front()?;
        debug!(room_id = %pending.room_id, %error, "failing deferred pagination");
        (pending.completion)(Err(error));
        Some(pending.room_id)
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, FeedState>, FeedError> {
        self.state
            .lock()
            .map_err(|_| FeedError::Backend("poisoned lock".to_owned()))
    }
}

impl EventFeed for InMemoryEventFeed {
    fn listen(
        &self,
        room_id: &str,
        filter: EventFilter,
        listener: Listener,
    ) -> Result<ListenerHandle, FeedError> {
        let mut state = self.lock_state()?;
        if let Some((remaining, failure)) = state.listen_failure.as_mut() {
            if *remaining == 0 {
                warn!(%room_id, error = %failure, "in-memory listen rejected");
                return Err(failure.clone());
            }
            *remaining -= 1;
        }
        state.next_handle += 1;
        let handle = ListenerHandle(state.next_handle);
        state
            .rooms
            .entry(room_id.to_owned())
            .or_default()
            .listeners
            .push(RegisteredListener {
                handle,
                filter,
                listener,
            });
        Ok(handle)
    }

    fn remove_listener(&self, room_id: &str, handle: ListenerHandle) {
        let Ok(mut state) = self.lock_state() else {
            return;
        };
        if let Some(room) = state.rooms.get_mut(room_id) {
            room.listeners.retain(|registered| registered.handle != handle);
        }
    }

    fn reset_pagination(&self, room_id: &str) {
        let Ok(mut state) = self.lock_state() else {
            return;
        };
        if let Some(room) = state.rooms.get_mut(room_id) {
            room.backward_cursor = None;
        }
    }

    fn paginate(&self, room_id: &str, request: PaginationRequest, completion: PaginationCallback) {
        let result = {
            let mut state = match self.lock_state() {
                Ok(state) => state,
                Err(err) => {
                    completion(Err(err));
                    return;
                }
            };
            state.requests.push((room_id.to_owned(), request));

            if self.mode == PaginationMode::Deferred {
                state.pending.push_back(PendingPage {
                    room_id: room_id.to_owned(),
                    request,
                    completion,
                });
                return;
            }

            match state.pagination_failure.clone() {
                Some(failure) => Err(failure),
                None => take_page(&mut state, room_id, request),
            }
        };
        completion(result);
    }
}

impl MessageSender for InMemoryEventFeed {
    fn send_text(&self, room_id: &str, body: &str, completion: SendCallback) {
        let failure = match self.lock_state() {
            Ok(state) => state.send_failure.clone(),
            Err(err) => Some(err),
        };
        if let Some(failure) = failure {
            warn!(%room_id, error = %failure, "in-memory send rejected");
            completion(Err(failure));
            return;
        }

        let event_id = format!("${}", Uuid::new_v4().simple());
        let origin_server_ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or_default();

        if let Ok(mut state) = self.lock_state() {
            state.sent.push(SentMessage {
                room_id: room_id.to_owned(),
                event_id: event_id.clone(),
                body: body.to_owned(),
            });
        }

        self.emit(
            room_id,
            json!({
                "type": ROOM_MESSAGE_EVENT_TYPE,
                "event_id": event_id,
                "sender": self.user_id,
                "origin_server_ts": origin_server_ts,
                "content": {"msgtype": "m.text", "body": body},
            }),
        );
        completion(Ok(event_id));
    }
}

fn take_page(
    state: &mut FeedState,
    room_id: &str,
    request: PaginationRequest,
) -> Result<Vec<Value>, FeedError> {
    let room = state
        .rooms
        .get_mut(room_id)
        .ok_or_else(|| FeedError::RoomNotFound(room_id.to_owned()))?;

    match request.direction {
        PaginationDirection::Backward => {
            let end = room.backward_cursor.unwrap_or(room.history.len());
            let start = end.saturating_sub(usize::from(request.limit));
            room.backward_cursor = Some(start);
            // Newest first, like a server `/messages?dir=b` chunk.
            Ok(room.history[start..end].iter().rev().cloned().collect())
        }
        // Live events are delivered synchronously, there is nothing ahead of
        // the live end to page through.
        PaginationDirection::Forward => Ok(Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use roomline_core::EventKind;

    use super::*;

    fn event(event_id: &str, ts: u64) -> Value {
        json!({
            "type": "m.room.message",
            "event_id": event_id,
            "sender": "@alice:example.org",
            "origin_server_ts": ts,
            "content": {"body": event_id},
        })
    }

    fn ids(page: &[Value]) -> Vec<&str> {
        page.iter()
            .filter_map(|raw| raw.get("event_id").and_then(Value::as_str))
            .collect()
    }

    fn capture_page() -> (PaginationCallback, Arc<Mutex<Option<Result<Vec<Value>, FeedError>>>>) {
        let slot = Arc::new(Mutex::new(None));
        let sink = slot.clone();
        let completion: PaginationCallback = Box::new(move |result| {
            *sink.lock().expect("page lock") = Some(result);
        });
        (completion, slot)
    }

    #[test]
    fn feed_is_shareable_across_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<InMemoryEventFeed>();

        let feed: Arc<dyn EventFeed> = Arc::new(InMemoryEventFeed::default());
        let sender: Arc<dyn MessageSender> = Arc::new(InMemoryEventFeed::default());
        drop((feed, sender));
    }

    #[test]
    fn listen_fails_after_allowed_registrations() {
        let feed = InMemoryEventFeed::default();
        feed.fail_listen_after(1, Some(FeedError::Unavailable("sync stopped".into())));

        feed.listen("!a:example.org", EventFilter::All, Arc::new(|_: FeedEvent| {}))
            .expect("first listen allowed");
        let err = feed
            .listen("!a:example.org", EventFilter::All, Arc::new(|_: FeedEvent| {}))
            .expect_err("second listen should fail");
        assert_eq!(err, FeedError::Unavailable("sync stopped".into()));
        assert_eq!(feed.listener_count("!a:example.org"), 1);

        feed.fail_listen_after(0, None);
        feed.listen("!a:example.org", EventFilter::All, Arc::new(|_: FeedEvent| {}))
            .expect("listen allowed once cleared");
        assert_eq!(feed.listener_count("!a:example.org"), 2);
    }

    #[test]
    fn delivers_only_to_matching_listeners() {
        let feed = InMemoryEventFeed::default();
        let messages = Arc::new(Mutex::new(0_usize));
        let everything = Arc::new(Mutex::new(0_usize));

        let m = messages.clone();
        feed.listen(
            "!a:example.org",
            EventFilter::Kinds(vec![EventKind::RoomMessage]),
            Arc::new(move |_: FeedEvent| *m.lock().expect("lock") += 1),
        )
        .expect("listen messages");
        let e = everything.clone();
        feed.listen(
            "!a:example.org",
            EventFilter::All,
            Arc::new(move |_: FeedEvent| *e.lock().expect("lock") += 1),
        )
        .expect("listen all");

        feed.emit("!a:example.org", event("$1", 1));
        feed.emit("!a:example.org", json!({"type": "m.typing"}));
        feed.emit("!b:example.org", event("$2", 2));

        assert_eq!(*messages.lock().expect("lock"), 1);
        assert_eq!(*everything.lock().expect("lock"), 2);
    }

    #[test]
    fn paginates_backward_newest_first_until_reset() {
        let feed = InMemoryEventFeed::default();
        feed.seed(
            "!a:example.org",
            (1..=5).map(|n| event(&format!("${n}"), n)),
        );

        let (first, first_page) = capture_page();
        feed.paginate("!a:example.org", PaginationRequest::backward(2, true), first);
        let (second, second_page) = capture_page();
        feed.paginate("!a:example.org", PaginationRequest::backward(2, true), second);

        let first_page = first_page.lock().expect("lock").take().expect("first page");
        let second_page = second_page.lock().expect("lock").take().expect("second page");
        assert_eq!(ids(&first_page.expect("page ok")), vec!["$5", "$4"]);
        assert_eq!(ids(&second_page.expect("page ok")), vec!["$3", "$2"]);

        feed.reset_pagination("!a:example.org");
        let (third, third_page) = capture_page();
        feed.paginate("!a:example.org", PaginationRequest::backward(1, false), third);
        let third_page = third_page.lock().expect("lock").take().expect("third page");
        assert_eq!(ids(&third_page.expect("page ok")), vec!["$5"]);

        assert_eq!(feed.pagination_requests().len(), 3);
    }

    #[test]
    fn unknown_room_pagination_fails() {
        let feed = InMemoryEventFeed::default();
        let (completion, page) = capture_page();
        feed.paginate("!nope:example.org", PaginationRequest::backward(10, true), completion);

        let result = page.lock().expect("lock").take().expect("completion ran");
        assert_eq!(
            result,
            Err(FeedError::RoomNotFound("!nope:example.org".into()))
        );
    }

    #[test]
    fn deferred_pagination_waits_for_resolution() {
        let feed = InMemoryEventFeed::new(PaginationMode::Deferred);
        feed.seed("!a:example.org", vec![event("$1", 1)]);

        let (completion, page) = capture_page();
        feed.paginate("!a:example.org", PaginationRequest::backward(10, true), completion);
        assert!(page.lock().expect("lock").is_none());
        assert_eq!(feed.pending_pagination_count(), 1);

        assert_eq!(
            feed.resolve_next_pagination().as_deref(),
            Some("!a:example.org")
        );
        let result = page.lock().expect("lock").take().expect("completion ran");
        assert_eq!(ids(&result.expect("page ok")), vec!["$1"]);
        assert_eq!(feed.resolve_next_pagination(), None);
    }

    #[test]
    fn deferred_pagination_can_fail() {
        let feed = InMemoryEventFeed::new(PaginationMode::Deferred);
        feed.seed("!a:example.org", vec![event("$1", 1)]);
        let (completion, page) = capture_page();
        feed.paginate("!a:example.org", PaginationRequest::backward(10, true), completion);

        feed.fail_next_pagination(FeedError::Unavailable("timeout".into()));
        let result = page.lock().expect("lock").take().expect("completion ran");
        assert_eq!(result, Err(FeedError::Unavailable("timeout".into())));
    }

    #[test]
    fn send_echoes_message_to_listeners() {
        let feed = InMemoryEventFeed::default().with_user_id("@me:example.org");
        let echoed = Arc::new(Mutex::new(Vec::new()));
        let sink = echoed.clone();
        feed.listen(
            "!a:example.org",
            EventFilter::Kinds(vec![EventKind::RoomMessage]),
            Arc::new(move |event: FeedEvent| sink.lock().expect("lock").push(event.raw)),
        )
        .expect("listen");

        let acked = Arc::new(Mutex::new(None));
        let ack_sink = acked.clone();
        feed.send_text(
            "!a:example.org",
            "hello",
            Box::new(move |result| *ack_sink.lock().expect("lock") = Some(result)),
        );

        let event_id = acked
            .lock()
            .expect("lock")
            .take()
            .expect("completion ran")
            .expect("send ok");
        let echoed = echoed.lock().expect("lock");
        assert_eq!(echoed.len(), 1);
        assert_eq!(echoed[0]["event_id"], json!(event_id));
        assert_eq!(echoed[0]["sender"], json!("@me:example.org"));
        let stamped = echoed[0]["origin_server_ts"]
            .as_u64()
            .expect("echo carries an integer timestamp");
        assert!(stamped > 1_600_000_000_000);
        assert_eq!(feed.sent_messages()[0].body, "hello");
    }

    #[test]
    fn send_failure_is_reported_without_echo() {
        let feed = InMemoryEventFeed::default();
        feed.set_send_failure(Some(FeedError::Unavailable("offline".into())));

        let acked = Arc::new(Mutex::new(None));
        let ack_sink = acked.clone();
        feed.send_text(
            "!a:example.org",
            "hello",
            Box::new(move |result| *ack_sink.lock().expect("lock") = Some(result)),
        );

        assert_eq!(
            acked.lock().expect("lock").take(),
            Some(Err(FeedError::Unavailable("offline".into())))
        );
        assert!(feed.sent_messages().is_empty());
    }
}
