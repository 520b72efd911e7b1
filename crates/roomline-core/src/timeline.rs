use std::collections::HashSet;

use tracing::trace;

use crate::types::Message;

/// De-duplicated, age-ordered message set for a single room.
///
/// Invariants held after every mutation:
/// - no two messages share an `event_id`; the first one seen wins,
/// - messages are sorted ascending by `timestamp_ms`, equal timestamps keep
///   their insertion order.
#[derive(Debug, Clone, Default)]
pub struct TimelineStore {
    items: Vec<Message>,
    ids: HashSet<String>,
}

impl TimelineStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current messages in display order.
    pub fn snapshot(&self) -> &[Message] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, event_id: &str) -> bool {
        self.ids.contains(event_id)
    }

    /// Replace the contents with the de-duplicated, sorted form of `messages`.
    pub fn replace(&mut self, messages: impl IntoIterator<Item = Message>) {
        self.items.clear();
        self.ids.clear();
        for message in messages {
            if self.ids.contains(&message.event_id) {
                trace!(event_id = %message.event_id, "dropping duplicate message");
                continue;
            }
            self.ids.insert(message.event_id.clone());
            self.items.push(message);
        }
        // `sort_by_key` is stable, equal timestamps keep arrival order.
        self.items.sort_by_key(|message| message.timestamp_ms);
    }

    /// Merge `messages` after the current contents, as if calling
    /// [`replace`](Self::replace) with the current contents followed by them.
    ///
    /// Returns the number of messages actually inserted.
    pub fn extend(&mut self, messages: impl IntoIterator<Item = Message>) -> usize {
        let before = self.items.len();
        let merged: Vec<Message> = self.items.drain(..).chain(messages).collect();
        self.replace(merged);
        self.items.len() - before
    }

    /// Insert one message. Returns `false` when its `event_id` is already present.
    pub fn append(&mut self, message: Message) -> bool {
        if self.ids.contains(&message.event_id) {
            trace!(event_id = %message.event_id, "append ignored for known event");
            return false;
        }

        // Contents are already sorted, so inserting after every message with an
        // equal or smaller timestamp is the same as a stable re-sort.
        let idx = self
            .items
            .partition_point(|existing| existing.timestamp_ms <= message.timestamp_ms);
        self.ids.insert(message.event_id.clone());
        self.items.insert(idx, message);
        true
    }

    /// Drop every message.
    pub fn clear(&mut self) {
        self.items.clear();
        self.ids.clear();
    }
}
