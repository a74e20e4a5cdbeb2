use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

use helpsl_types::Category;
use helpsl_types::events::{GatewayCommand, GatewayEvent};

use crate::dispatcher::Dispatcher;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

type Subscriptions = Arc<std::sync::RwLock<HashSet<String>>>;

/// Serve one realtime client until either side hangs up.
pub async fn handle_connection(socket: WebSocket, dispatcher: Dispatcher) {
    let (mut sender, receiver) = socket.split();

    let conn_id = Uuid::new_v4();
    info!("realtime client {} connected", conn_id);

    let ready = GatewayEvent::Ready {
        connection_id: conn_id,
    };
    if send_event(&mut sender, &ready).await.is_err() {
        return;
    }

    run_connection_loop(sender, receiver, dispatcher, conn_id).await;
    info!("realtime client {} disconnected", conn_id);
}

async fn run_connection_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    dispatcher: Dispatcher,
    conn_id: Uuid,
) {
    let mut broadcast_rx = dispatcher.subscribe();

    // Per-connection table subscriptions (shared between send and recv tasks).
    let subscribed_tables: Subscriptions = Arc::new(std::sync::RwLock::new(HashSet::new()));
    let send_subscriptions = subscribed_tables.clone();

    // Replies to commands travel through the send task so the sink has one owner.
    let (reply_tx, mut reply_rx) = tokio::sync::mpsc::unbounded_channel::<GatewayEvent>();

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = broadcast_rx.recv() => {
                    let payload = match result {
                        Ok(payload) => payload,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            // Lost events are not replayable; the client resyncs on reconnect.
                            warn!("realtime client {} lagged by {} events, dropping", conn_id, n);
                            break;
                        }
                        Err(_) => break,
                    };

                    let wanted = match send_subscriptions.read() {
                        Ok(subs) => subs.contains(&payload.table),
                        Err(_) => break,
                    };
                    if !wanted {
                        continue;
                    }

                    if send_event(&mut sender, &GatewayEvent::Change(payload)).await.is_err() {
                        break;
                    }
                }
                reply = reply_rx.recv() => {
                    let Some(event) = reply else { break };
                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let recv_subscriptions = subscribed_tables.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => {
                        if let Some(event) = handle_command(&recv_subscriptions, conn_id, cmd) {
                            if reply_tx.send(event).is_err() {
                                break;
                            }
                        }
                    }
                    Err(e) => {
                        warn!(
                            "realtime client {} bad command: {} -- raw: {}",
                            conn_id,
                            e,
                            text.chars().take(200).collect::<String>()
                        );
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
}

/// Apply a command to the connection's table set. Returns the acknowledgement
/// to send back, if any.
fn handle_command(
    subscriptions: &Subscriptions,
    conn_id: Uuid,
    cmd: GatewayCommand,
) -> Option<GatewayEvent> {
    let Ok(mut subs) = subscriptions.write() else {
        return None;
    };

    match cmd {
        GatewayCommand::Subscribe { tables } => {
            for table in tables {
                if Category::from_table(&table).is_err() {
                    warn!("realtime client {} asked for unknown table '{}'", conn_id, table);
                    continue;
                }
                subs.insert(table);
            }
        }
        GatewayCommand::Unsubscribe { tables } => {
            for table in &tables {
                subs.remove(table);
            }
        }
    }

    let mut tables: Vec<String> = subs.iter().cloned().collect();
    tables.sort();
    debug!("realtime client {} now follows {:?}", conn_id, tables);
    Some(GatewayEvent::Subscribed { tables })
}

async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &GatewayEvent,
) -> Result<(), ()> {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            warn!("failed to encode gateway event: {}", e);
            return Ok(());
        }
    };
    sender.send(Message::Text(text.into())).await.map_err(|_| ())
}
