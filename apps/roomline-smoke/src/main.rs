mod config;
mod logging;

use std::{error::Error, sync::Arc, time::Duration};

use config::SmokeConfig;
use roomline_core::{
    ControllerCommand, ControllerEvent, EventStream, Message, RoomLifecycleState, SendAck,
    message_views,
};
use roomline_feed::InMemoryEventFeed;
use roomline_runtime::{RuntimeHandle, spawn_runtime};
use serde_json::{Value, json};
use tokio::{sync::broadcast::error::RecvError, time::timeout};
use tracing::{info, warn};

const EVENT_WAIT: Duration = Duration::from_secs(5);
const HISTORY_BASE_TS: u64 = 1_700_000_000_000;

type SmokeResult<T> = Result<T, Box<dyn Error>>;

#[tokio::main]
async fn main() {
    logging::init();

    let config = match SmokeConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Invalid configuration: {err}");
            std::process::exit(2);
        }
    };

    if let Err(err) = run(config).await {
        eprintln!("Smoke scenario failed: {err}");
        std::process::exit(1);
    }
}

async fn run(config: SmokeConfig) -> SmokeResult<()> {
    let feed = Arc::new(InMemoryEventFeed::default().with_user_id(config.own_user_id.clone()));
    for room_id in &config.rooms {
        feed.seed(room_id, seeded_history(room_id, &config.own_user_id));
    }

    let handle = spawn_runtime(feed.clone(), feed.clone(), config.controller_config());
    let mut events = handle.subscribe();

    for room_id in &config.rooms {
        let snapshot = exercise_room(&handle, &feed, &mut events, room_id).await?;
        let report = json!({
            "room_id": room_id,
            "messages": snapshot,
            "views": message_views(&snapshot, Some(config.own_user_id.as_str())),
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    handle.send(ControllerCommand::Logout).await?;
    wait_for(&mut events, |event| {
        matches!(
            event,
            ControllerEvent::StateChanged {
                state: RoomLifecycleState::NoRoom
            }
        )
    })
    .await?;

    handle.shutdown();
    info!(rooms = config.rooms.len(), "smoke scenario complete");
    Ok(())
}

/// Switch into `room_id`, push live traffic through it, and return the final
/// timeline the controller reported.
async fn exercise_room(
    handle: &RuntimeHandle,
    feed: &InMemoryEventFeed,
    events: &mut EventStream,
    room_id: &str,
) -> SmokeResult<Vec<Message>> {
    handle.switch_room(room_id).await?;
    let mut latest = wait_for_timeline(events, room_id, |items| items.len() >= 3).await?;
    info!(%room_id, count = latest.len(), "initial page loaded");

    let live = raw_message(
        room_id,
        "live",
        "@carol:localhost",
        HISTORY_BASE_TS + 500,
        "live update",
    );
    let delivered = feed.emit(room_id, live.clone());
    let before = latest.len();
    latest = wait_for_timeline(events, room_id, |items| items.len() > before).await?;
    info!(%room_id, listeners = delivered, "live event applied");

    // Re-delivery of a known event must leave the timeline unchanged.
    feed.emit(room_id, live);

    let client_txn_id = handle.send_text("hello from roomline-smoke").await?;
    let mut ack: Option<SendAck> = None;
    timeout(EVENT_WAIT, async {
        while ack.is_none() {
            match next_event(events).await? {
                ControllerEvent::TimelineUpdated {
                    room_id: updated,
                    items,
                    ..
                } if updated == room_id => latest = items,
                ControllerEvent::SendAck(received) if received.client_txn_id == client_txn_id => {
                    ack = Some(received);
                }
                ControllerEvent::ErrorReported { code, message, .. } => {
                    warn!(%code, %message, "controller reported error");
                }
                _ => {}
            }
        }
        Ok::<_, Box<dyn Error>>(())
    })
    .await??;

    if let Some(ack) = ack {
        info!(
            %room_id,
            client_txn_id = %ack.client_txn_id,
            event_id = ?ack.event_id,
            error_code = ?ack.error_code,
            "send acknowledged"
        );
    }
    Ok(latest)
}

async fn wait_for_timeline<F>(
    events: &mut EventStream,
    room_id: &str,
    mut ready: F,
) -> SmokeResult<Vec<Message>>
where
    F: FnMut(&[Message]) -> bool,
{
    let event = wait_for(events, |event| match event {
        ControllerEvent::TimelineUpdated {
            room_id: updated,
            items,
            ..
        } => updated == room_id && ready(items),
        _ => false,
    })
    .await?;
    match event {
        ControllerEvent::TimelineUpdated { items, .. } => Ok(items),
        other => Err(format!("unexpected event: {other:?}").into()),
    }
}

async fn wait_for<F>(events: &mut EventStream, mut predicate: F) -> SmokeResult<ControllerEvent>
where
    F: FnMut(&ControllerEvent) -> bool,
{
    timeout(EVENT_WAIT, async {
        loop {
            let event = next_event(events).await?;
            if let ControllerEvent::ErrorReported { code, message, .. } = &event {
                warn!(%code, %message, "controller reported error");
            }
            if predicate(&event) {
                return Ok::<_, Box<dyn Error>>(event);
            }
        }
    })
    .await?
}

async fn next_event(events: &mut EventStream) -> SmokeResult<ControllerEvent> {
    loop {
        match events.recv().await {
            Ok(event) => return Ok(event),
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "event stream lagged");
            }
            Err(RecvError::Closed) => return Err("controller event stream closed".into()),
        }
    }
}

fn seeded_history(room_id: &str, own_user_id: &str) -> Vec<Value> {
    vec![
        raw_message(room_id, "1", "@alice:localhost", HISTORY_BASE_TS, "hi"),
        raw_message(room_id, "2", "@alice:localhost", HISTORY_BASE_TS + 100, "anyone here?"),
        raw_message(room_id, "3", own_user_id, HISTORY_BASE_TS + 200, "yes"),
        raw_message(room_id, "4", "@bob:localhost", HISTORY_BASE_TS + 300, "me too"),
    ]
}

fn raw_message(room_id: &str, suffix: &str, sender: &str, ts: u64, body: &str) -> Value {
    let local = room_id
        .trim_start_matches('!')
        .split(':')
        .next()
        .unwrap_or(room_id);
    json!({
        "type": "m.room.message",
        "event_id": format!("${local}-{suffix}"),
        "sender": sender,
        "origin_server_ts": ts,
        "content": {"msgtype": "m.text", "body": body},
    })
}
