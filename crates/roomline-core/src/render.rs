//! Display classification of timeline rows.
//!
//! The logged-in user is an explicit argument so render consumers never need
//! to reach for session state of their own.

use serde::{Deserialize, Serialize};

use crate::types::Message;

/// How a row should be drawn.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MessageCellKind {
    /// Sent by the logged-in user.
    Sent,
    /// Received, same sender as the previous row; sender label hidden.
    Received,
    /// Received from a different sender than the previous row.
    ReceivedWithSender,
}

/// Timeline row consumed by a renderer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageView {
    pub event_id: String,
    pub sender: String,
    pub body: String,
    pub timestamp_ms: u64,
    pub cell: MessageCellKind,
}

/// Classify every message of an ordered snapshot.
pub fn message_views(items: &[Message], own_user_id: Option<&str>) -> Vec<MessageView> {
    let mut previous_sender: Option<&str> = None;
    items
        .iter()
        .map(|message| {
            let cell = if own_user_id == Some(message.sender.as_str()) {
                MessageCellKind::Sent
            } else if previous_sender == Some(message.sender.as_str()) {
                MessageCellKind::Received
            } else {
                MessageCellKind::ReceivedWithSender
            };
            previous_sender = Some(message.sender.as_str());

            MessageView {
                event_id: message.event_id.clone(),
                sender: message.sender.clone(),
                body: message.body.clone(),
                timestamp_ms: message.timestamp_ms,
                cell,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(event_id: &str, sender: &str) -> Message {
        Message {
            event_id: event_id.to_owned(),
            sender: sender.to_owned(),
            body: "hi".to_owned(),
            timestamp_ms: 1,
        }
    }

    #[test]
    fn groups_consecutive_senders_and_marks_own_messages() {
        let items = vec![
            msg("$1", "@bob:example.org"),
            msg("$2", "@bob:example.org"),
            msg("$3", "@me:example.org"),
            msg("$4", "@bob:example.org"),
        ];

        let cells: Vec<_> = message_views(&items, Some("@me:example.org"))
            .into_iter()
            .map(|view| view.cell)
            .collect();

        assert_eq!(
            cells,
            vec![
                MessageCellKind::ReceivedWithSender,
                MessageCellKind::Received,
                MessageCellKind::Sent,
                MessageCellKind::ReceivedWithSender,
            ]
        );
    }

    #[test]
    fn without_own_user_every_row_is_received() {
        let items = vec![msg("$1", "@me:example.org"), msg("$2", "@me:example.org")];
        let views = message_views(&items, None);
        assert_eq!(views[0].cell, MessageCellKind::ReceivedWithSender);
        assert_eq!(views[1].cell, MessageCellKind::Received);
    }
}
