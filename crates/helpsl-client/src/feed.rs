//! Raw change feeds. A feed opens one connection for one category and yields
//! its events until the connection ends; reconnecting is the subscriber's job.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream};
use futures_util::{SinkExt, Stream, StreamExt};
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, info, warn};

use helpsl_types::events::{GatewayCommand, GatewayEvent};
use helpsl_types::{Category, ChangeEvent};

use crate::error::SubscriptionError;

/// Events of one connection. Ends when the connection closes; an `Err` item
/// means it broke.
pub type ChangeStream = BoxStream<'static, Result<ChangeEvent, SubscriptionError>>;

#[async_trait]
pub trait ChangeFeed: Send + Sync {
    async fn open(&self, category: Category) -> Result<ChangeStream, SubscriptionError>;
}

/// How long the server gets to confirm a `Subscribe` command.
const SUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(10);

/// The server's `/realtime` WebSocket.
pub struct WsChangeFeed {
    url: String,
}

impl WsChangeFeed {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl ChangeFeed for WsChangeFeed {
    async fn open(&self, category: Category) -> Result<ChangeStream, SubscriptionError> {
        let (mut ws, _) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| SubscriptionError::Connect(format!("{}: {}", self.url, e)))?;

        let subscribe = GatewayCommand::Subscribe {
            tables: vec![category.table().to_string()],
        };
        let json = serde_json::to_string(&subscribe)
            .map_err(|e| SubscriptionError::Protocol(e.to_string()))?;
        ws.send(Message::Text(json.into())).await?;

        tokio::time::timeout(SUBSCRIBE_TIMEOUT, await_subscribed(&mut ws, category))
            .await
            .map_err(|_| {
                SubscriptionError::Protocol(format!(
                    "no Subscribed reply for {} within {:?}",
                    category.table(),
                    SUBSCRIBE_TIMEOUT
                ))
            })??;
        info!("change stream open for {}", category.table());

        let events = stream::unfold(ws, move |mut ws| async move {
            loop {
                match ws.next().await {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(event) = decode_frame(category, text.as_str()) {
                            return Some((Ok(event), ws));
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("change stream for {} closed", category.table());
                        return None;
                    }
                    // Pings are answered by tungstenite on the next read.
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Some((Err(SubscriptionError::Transport(e)), ws)),
                }
            }
        });

        // A transport error is the last item of a connection.
        let mut broken = false;
        let events = events.take_while(move |item| {
            let keep = !broken;
            broken = item.is_err();
            futures_util::future::ready(keep)
        });

        Ok(events.boxed())
    }
}

/// Read frames until the server confirms the subscription to `category`.
///
/// Changes read here were committed after the server registered the table and
/// are covered by any snapshot taken once this returns.
pub async fn await_subscribed<S>(
    frames: &mut S,
    category: Category,
) -> Result<(), SubscriptionError>
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    loop {
        match frames.next().await {
            Some(Ok(Message::Text(text))) => {
                match serde_json::from_str::<GatewayEvent>(text.as_str()) {
                    Ok(GatewayEvent::Subscribed { tables })
                        if tables.iter().any(|t| t == category.table()) =>
                    {
                        debug!("server confirmed {:?}", tables);
                        return Ok(());
                    }
                    Ok(_) => {}
                    Err(e) => warn!("unreadable frame while subscribing: {}", e),
                }
            }
            Some(Ok(Message::Close(_))) | None => {
                return Err(SubscriptionError::Connect(format!(
                    "closed before {} was confirmed",
                    category.table()
                )));
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(SubscriptionError::Transport(e)),
        }
    }
}

/// Turn a text frame into a change for `category`. Connection-level frames,
/// other tables and undecodable rows yield `None`.
pub fn decode_frame(category: Category, text: &str) -> Option<ChangeEvent> {
    let event: GatewayEvent = match serde_json::from_str(text) {
        Ok(event) => event,
        Err(e) => {
            warn!("unreadable change frame: {}", e);
            return None;
        }
    };

    let payload = match event {
        GatewayEvent::Change(payload) => payload,
        GatewayEvent::Ready { connection_id } => {
            debug!("realtime connection {}", connection_id);
            return None;
        }
        GatewayEvent::Subscribed { tables } => {
            debug!("subscribed to {:?}", tables);
            return None;
        }
    };

    if payload.table != category.table() {
        warn!("dropping {} change on the {} stream", payload.table, category.table());
        return None;
    }

    let id = payload.new.id;
    ChangeEvent::from_payload(payload)
        .map_err(|e| warn!("dropping change for {}#{}: {}", category.table(), id, e))
        .ok()
}
