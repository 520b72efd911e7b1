use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tracing::trace;

use crate::types::{ControllerCommand, ControllerEvent};

/// Receiving side for render and error-surface consumers.
pub type EventStream = broadcast::Receiver<ControllerEvent>;

#[derive(Debug, Error)]
pub enum ControllerChannelError {
    #[error("controller command channel is closed")]
    CommandChannelClosed,
}

/// Outbound half held by the controller. It can only publish events.
#[derive(Clone, Debug)]
pub struct EventEmitter {
    event_tx: broadcast::Sender<ControllerEvent>,
}

impl EventEmitter {
    /// Publish `event` and return how many subscribers it reached.
    ///
    /// Nobody listening is not an error: the controller keeps running
    /// headless and consumers that join later start from the next event.
    pub fn emit(&self, event: ControllerEvent) -> usize {
        match self.event_tx.send(event) {
            Ok(receivers) => receivers,
            Err(broadcast::error::SendError(event)) => {
                trace!(?event, "controller event dropped without subscribers");
                0
            }
        }
    }

    pub fn subscribe(&self) -> EventStream {
        self.event_tx.subscribe()
    }
}

/// Consumer-facing half: submits commands and hands out event streams.
#[derive(Clone, Debug)]
pub struct ControllerChannels {
    command_tx: mpsc::Sender<ControllerCommand>,
    events: EventEmitter,
}

impl ControllerChannels {
    /// Create the channel set. The command receiver goes to the task that
    /// owns the controller.
    pub fn new(
        command_buffer: usize,
        event_buffer: usize,
    ) -> (Self, mpsc::Receiver<ControllerCommand>) {
        let (command_tx, command_rx) = mpsc::channel(command_buffer.max(1));
        let (event_tx, _) = broadcast::channel(event_buffer.max(1));

        (
            Self {
                command_tx,
                events: EventEmitter { event_tx },
            },
            command_rx,
        )
    }

    /// Publishing handle for the controller.
    pub fn emitter(&self) -> EventEmitter {
        self.events.clone()
    }

    pub fn subscribe(&self) -> EventStream {
        self.events.subscribe()
    }

    /// Queue one command, waiting while the bounded buffer is full.
    pub async fn send_command(
        &self,
        command: ControllerCommand,
    ) -> Result<(), ControllerChannelError> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| ControllerChannelError::CommandChannelClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RoomLifecycleState;

    #[tokio::test]
    async fn commands_reach_the_owning_task() {
        let (channels, mut rx) = ControllerChannels::new(8, 8);
        channels
            .send_command(ControllerCommand::SwitchRoom {
                room_id: "!a:example.org".into(),
            })
            .await
            .expect("command send should work");

        match rx.recv().await.expect("receiver should have a command") {
            ControllerCommand::SwitchRoom { room_id } => assert_eq!(room_id, "!a:example.org"),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[tokio::test]
    async fn send_fails_once_controller_task_is_gone() {
        let (channels, rx) = ControllerChannels::new(1, 1);
        drop(rx);
        let err = channels
            .send_command(ControllerCommand::Logout)
            .await
            .expect_err("send must fail once the receiver is gone");
        assert!(matches!(err, ControllerChannelError::CommandChannelClosed));
    }

    #[tokio::test]
    async fn emitter_reaches_every_subscriber() {
        let (channels, _) = ControllerChannels::new(4, 16);
        let emitter = channels.emitter();
        let mut a = channels.subscribe();
        let mut b = emitter.subscribe();

        let reached = emitter.emit(ControllerEvent::StateChanged {
            state: RoomLifecycleState::NoRoom,
        });
        assert_eq!(reached, 2);

        let event_a = a.recv().await.expect("subscriber a should receive event");
        let event_b = b.recv().await.expect("subscriber b should receive event");
        assert_eq!(event_a, event_b);
    }

    #[test]
    fn emitting_without_subscribers_is_silent() {
        let (channels, _) = ControllerChannels::new(1, 1);
        let reached = channels.emitter().emit(ControllerEvent::StateChanged {
            state: RoomLifecycleState::NoRoom,
        });
        assert_eq!(reached, 0);
    }
}
