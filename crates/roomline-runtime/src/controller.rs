use std::sync::Arc;

use roomline_core::{
    ControllerCommand, ControllerConfig, ControllerEvent, EventEmitter, EventFilter,
    EventKind, FeedEvent, Message, PaginationRequest, RoomLifecycleState, RoomSwitchMachine,
    SendOutcome, TimelineError, TimelineErrorCategory, TimelineStore, message_from_event,
    normalize_error, normalize_send_outcome, typing_user_ids,
};
use roomline_feed::{EventFeed, FeedError, Listener, MessageSender, RoomSubscription};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

const SERVER_PAGINATION_LIMIT_CAP: u16 = 100;

/// Feed callback payload, tagged by the listener class it came from.
#[derive(Debug)]
pub enum FeedDelivery {
    Message(FeedEvent),
    Typing(FeedEvent),
    /// Catch-all listener; observed for diagnostics only.
    Observed(FeedEvent),
    Page(Result<Vec<Value>, FeedError>),
}

/// Input of the serialized callback queue.
#[derive(Debug)]
pub enum RuntimeInput {
    /// Delivery from a listener or pagination issued under `generation`.
    Feed {
        generation: u64,
        delivery: FeedDelivery,
    },
    /// Send completion. Acknowledged even after a room switch.
    SendCompleted {
        client_txn_id: String,
        result: Result<String, FeedError>,
    },
}

/// Owns the current room, its subscription, and its timeline store.
///
/// All methods are expected to run on one serialized queue; feed callbacks
/// never touch controller state directly, they post [`RuntimeInput`]s to the
/// inbox instead.
pub struct RoomSwitchController {
    feed: Arc<dyn EventFeed>,
    sender: Arc<dyn MessageSender>,
    config: ControllerConfig,
    events: EventEmitter,
    inbox: mpsc::UnboundedSender<RuntimeInput>,
    machine: RoomSwitchMachine,
    store: TimelineStore,
    subscription: Option<RoomSubscription>,
}

impl RoomSwitchController {
    pub fn new(
        feed: Arc<dyn EventFeed>,
        sender: Arc<dyn MessageSender>,
        config: ControllerConfig,
        events: EventEmitter,
        inbox: mpsc::UnboundedSender<RuntimeInput>,
    ) -> Self {
        Self {
            feed,
            sender,
            config,
            events,
            inbox,
            machine: RoomSwitchMachine::default(),
            store: TimelineStore::new(),
            subscription: None,
        }
    }

    pub fn state(&self) -> &RoomLifecycleState {
        self.machine.state()
    }

    /// Current ordered timeline of the active room.
    pub fn snapshot(&self) -> &[Message] {
        self.store.snapshot()
    }

    /// Handle a command, reporting failures on the event channel.
    pub fn dispatch(&mut self, command: ControllerCommand) {
        if let Err(err) = self.handle_command(command) {
            warn!(code = %err.code, message = %err.message, "controller command failed");
            self.events.emit(normalize_error(err));
        }
    }

    pub fn handle_command(&mut self, command: ControllerCommand) -> Result<(), TimelineError> {
        match command {
            ControllerCommand::SwitchRoom { room_id } => self.switch_room(&room_id),
            ControllerCommand::PaginateBack { limit } => self.paginate_back(limit),
            ControllerCommand::SendText {
                client_txn_id,
                body,
            } => {
                self.send_text(client_txn_id, body);
                Ok(())
            }
            ControllerCommand::Logout => {
                self.logout();
                Ok(())
            }
        }
    }

    /// Apply one queued feed or send delivery.
    pub fn handle_input(&mut self, input: RuntimeInput) {
        match input {
            RuntimeInput::Feed {
                generation,
                delivery,
            } => self.handle_feed(generation, delivery),
            RuntimeInput::SendCompleted {
                client_txn_id,
                result,
            } => {
                let outcome = match result {
                    Ok(event_id) => SendOutcome::Success { event_id },
                    Err(err) => {
                        warn!(%client_txn_id, error = %err, "message send failed");
                        SendOutcome::Failure {
                            error: err.into_timeline_error(TimelineErrorCategory::Send, "send_failed"),
                        }
                    }
                };
                self.events
                    .emit(normalize_send_outcome(client_txn_id, outcome));
            }
        }
    }

    /// Release the current subscription without changing room state.
    pub fn shutdown(&mut self) {
        self.teardown();
    }

    fn switch_room(&mut self, room_id: &str) -> Result<(), TimelineError> {
        let transition = self.machine.switch_to(room_id)?;
        debug!(
            %room_id,
            previous = ?transition.previous,
            generation = transition.generation,
            "switching room"
        );

        self.teardown();
        self.store.clear();
        self.events.emit(ControllerEvent::StateChanged {
            state: self.machine.state().clone(),
        });
        self.emit_timeline(room_id, false);

        self.feed.reset_pagination(room_id);
        let subscription = self
            .subscribe(room_id, transition.generation)
            .map_err(|err| {
                err.into_timeline_error(TimelineErrorCategory::Feed, "subscription_failed")
            })?;
        self.subscription = Some(subscription);

        let limit = PaginationRequest::bounded_limit(
            self.config.initial_page_size,
            SERVER_PAGINATION_LIMIT_CAP,
        );
        self.request_page(
            room_id,
            transition.generation,
            PaginationRequest::backward(limit, self.config.allow_network_fetch),
        );
        Ok(())
    }

    fn logout(&mut self) {
        let transition = self.machine.logout();
        debug!(previous = ?transition.previous, generation = transition.generation, "logging out of room");
        self.teardown();
        self.store.clear();
        self.events.emit(ControllerEvent::StateChanged {
            state: RoomLifecycleState::NoRoom,
        });
        if let Some(room_id) = transition.previous.as_deref() {
            self.emit_timeline(room_id, false);
        }
    }

    fn paginate_back(&mut self, limit: u16) -> Result<(), TimelineError> {
        let room_id = self.machine.require_active("paginate_back")?.to_owned();
        let limit = PaginationRequest::bounded_limit(limit, SERVER_PAGINATION_LIMIT_CAP);
        self.request_page(
            &room_id,
            self.machine.generation(),
            PaginationRequest::backward(limit, self.config.allow_network_fetch),
        );
        Ok(())
    }

    fn send_text(&mut self, client_txn_id: String, body: String) {
        let room_id = match self.machine.require_active("send_text") {
            Ok(room_id) => room_id.to_owned(),
            Err(error) => {
                self.events.emit(normalize_send_outcome(
                    client_txn_id,
                    SendOutcome::Failure { error },
                ));
                return;
            }
        };

        if body.trim().is_empty() {
            let error = TimelineError::new(
                TimelineErrorCategory::Config,
                "empty_message",
                "message body must not be empty",
            );
            self.events.emit(normalize_send_outcome(
                client_txn_id,
                SendOutcome::Failure { error },
            ));
            return;
        }

        debug!(%room_id, %client_txn_id, body_len = body.len(), "submitting message");
        let inbox = self.inbox.clone();
        self.sender.send_text(
            &room_id,
            &body,
            Box::new(move |result| {
                let _ = inbox.send(RuntimeInput::SendCompleted {
                    client_txn_id,
                    result,
                });
            }),
        );
    }

    fn teardown(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            debug!(room_id = %subscription.room_id(), "unsubscribing room feed");
            subscription.unsubscribe();
        }
    }

    fn subscribe(&self, room_id: &str, generation: u64) -> Result<RoomSubscription, FeedError> {
        let mut subscription = RoomSubscription::new(self.feed.clone(), room_id);
        subscription.listen(
            EventFilter::Kinds(vec![EventKind::RoomMessage]),
            self.forwarder(generation, FeedDelivery::Message),
        )?;
        subscription.listen(
            EventFilter::Kinds(vec![EventKind::Typing]),
            self.forwarder(generation, FeedDelivery::Typing),
        )?;
        subscription.listen(
            EventFilter::All,
            self.forwarder(generation, FeedDelivery::Observed),
        )?;
        Ok(subscription)
    }

    fn forwarder(&self, generation: u64, wrap: fn(FeedEvent) -> FeedDelivery) -> Listener {
        let inbox = self.inbox.clone();
        Arc::new(move |event| {
            let _ = inbox.send(RuntimeInput::Feed {
                generation,
                delivery: wrap(event),
            });
        })
    }

    fn request_page(&self, room_id: &str, generation: u64, request: PaginationRequest) {
        debug!(%room_id, generation, limit = request.limit, "requesting timeline page");
        let inbox = self.inbox.clone();
        self.feed.paginate(
            room_id,
            request,
            Box::new(move |result| {
                let _ = inbox.send(RuntimeInput::Feed {
                    generation,
                    delivery: FeedDelivery::Page(result),
                });
            }),
        );
    }

    fn handle_feed(&mut self, generation: u64, delivery: FeedDelivery) {
        if !self.machine.is_current(generation) {
            debug!(
                generation,
                current = self.machine.generation(),
                "dropping stale feed delivery"
            );
            return;
        }
        let Some(room_id) = self.machine.active_room().map(ToOwned::to_owned) else {
            return;
        };

        match delivery {
            FeedDelivery::Message(event) => self.on_live_message(&room_id, &event.raw),
            FeedDelivery::Typing(event) => {
                self.events.emit(ControllerEvent::Typing {
                    room_id,
                    user_ids: typing_user_ids(&event.raw),
                });
            }
            FeedDelivery::Observed(event) => {
                let event_id = event.raw.get("event_id").and_then(Value::as_str);
                trace!(%room_id, kind = ?event.kind, ?event_id, "observed room event");
            }
            FeedDelivery::Page(result) => self.on_page(&room_id, result),
        }
    }

    fn on_live_message(&mut self, room_id: &str, raw: &Value) {
        match message_from_event(raw) {
            Ok(message) => {
                if self.store.append(message) {
                    self.emit_timeline(room_id, true);
                }
            }
            Err(err) => self.report_rejected_event(room_id, err),
        }
    }

    fn on_page(&mut self, room_id: &str, result: Result<Vec<Value>, FeedError>) {
        let events = match result {
            Ok(events) => events,
            Err(err) => {
                warn!(%room_id, error = %err, "timeline pagination failed");
                self.events.emit(normalize_error(
                    err.into_timeline_error(TimelineErrorCategory::Feed, "pagination_failed"),
                ));
                return;
            }
        };

        let mut messages = Vec::with_capacity(events.len());
        for raw in &events {
            match message_from_event(raw) {
                Ok(message) => messages.push(message),
                Err(err) => self.report_rejected_event(room_id, err),
            }
        }

        let inserted = self.store.extend(messages);
        debug!(%room_id, received = events.len(), inserted, "merged timeline page");
        if inserted > 0 {
            self.emit_timeline(room_id, false);
        }
    }

    fn report_rejected_event(&self, room_id: &str, err: TimelineError) {
        warn!(%room_id, code = %err.code, message = %err.message, "rejected timeline event");
        self.events.emit(normalize_error(err));
    }

    fn emit_timeline(&self, room_id: &str, scroll_to_end: bool) {
        self.events.emit(ControllerEvent::TimelineUpdated {
            room_id: room_id.to_owned(),
            items: self.store.snapshot().to_vec(),
            own_user_id: self.config.own_user_id.clone(),
            scroll_to_end,
        });
    }
}
