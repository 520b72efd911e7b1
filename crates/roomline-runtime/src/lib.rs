//! Serialized runtime for the room switch controller.
//!
//! [`spawn_runtime`] moves a [`RoomSwitchController`] into a single tokio task.
//! Commands and feed deliveries are handled one at a time by that task, so the
//! timeline store never sees concurrent writers.

use std::sync::Arc;

use roomline_core::{
    ControllerChannelError, ControllerChannels, ControllerCommand, ControllerConfig, EventStream,
};
use roomline_feed::{EventFeed, MessageSender};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

mod controller;

pub use controller::{FeedDelivery, RoomSwitchController, RuntimeInput};

const COMMAND_BUFFER: usize = 128;
const EVENT_BUFFER: usize = 512;

/// Handle used by consumers to drive a spawned runtime.
#[derive(Clone, Debug)]
pub struct RuntimeHandle {
    channels: ControllerChannels,
    shutdown: CancellationToken,
}

impl RuntimeHandle {
    pub async fn send(&self, command: ControllerCommand) -> Result<(), ControllerChannelError> {
        self.channels.send_command(command).await
    }

    pub async fn switch_room(&self, room_id: impl Into<String>) -> Result<(), ControllerChannelError> {
        self.send(ControllerCommand::SwitchRoom {
            room_id: room_id.into(),
        })
        .await
    }

    /// Submit text to the current room under a fresh transaction ID, which is
    /// returned so the caller can match the `SendAck`.
    pub async fn send_text(
        &self,
        body: impl Into<String>,
    ) -> Result<String, ControllerChannelError> {
        let client_txn_id = Uuid::new_v4().to_string();
        self.send(ControllerCommand::SendText {
            client_txn_id: client_txn_id.clone(),
            body: body.into(),
        })
        .await?;
        Ok(client_txn_id)
    }

    pub fn subscribe(&self) -> EventStream {
        self.channels.subscribe()
    }

    /// Stop the runtime task; its room subscription is released on exit.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

/// Spawn the controller runtime on the current tokio runtime.
pub fn spawn_runtime(
    feed: Arc<dyn EventFeed>,
    sender: Arc<dyn MessageSender>,
    config: ControllerConfig,
) -> RuntimeHandle {
    let (channels, command_rx) = ControllerChannels::new(COMMAND_BUFFER, EVENT_BUFFER);
    let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
    let shutdown = CancellationToken::new();

    let runtime = ControllerRuntime {
        controller: RoomSwitchController::new(feed, sender, config, channels.emitter(), inbox_tx),
        command_rx,
        inbox_rx,
        shutdown: shutdown.child_token(),
    };
    tokio::spawn(async move {
        runtime.run().await;
    });

    RuntimeHandle { channels, shutdown }
}

struct ControllerRuntime {
    controller: RoomSwitchController,
    command_rx: mpsc::Receiver<ControllerCommand>,
    inbox_rx: mpsc::UnboundedReceiver<RuntimeInput>,
    shutdown: CancellationToken,
}

impl ControllerRuntime {
    async fn run(mut self) {
        debug!("room controller runtime started");
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                command = self.command_rx.recv() => {
                    let Some(command) = command else {
                        break;
                    };
                    self.controller.dispatch(command);
                }
                Some(input) = self.inbox_rx.recv() => {
                    self.controller.handle_input(input);
                }
            }
        }
        self.controller.shutdown();
        debug!("room controller runtime exiting");
    }
}
