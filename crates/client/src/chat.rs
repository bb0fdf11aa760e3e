//! Secondary conversational channel.
//!
//! Unlike the per-task event stream this one is bidirectional and long-lived:
//! a WebSocket kept open with a fixed-interval ping probe. The same
//! duplicate-delivery problem recurs here, so inbound messages go through
//! their own per-connection [`DedupCache`], discarded when the channel
//! closes.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::dedup::DedupCache;
use crate::error::ChatError;

/// One inbound conversational message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub role: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl ChatMessage {
    /// Explicit id preferred; otherwise a deterministic composite of the
    /// message body, timestamp, and role.
    fn dedup_key(&self) -> String {
        match &self.id {
            Some(id) => id.clone(),
            None => format!(
                "{}|{}|{}",
                self.text,
                self.timestamp.as_deref().unwrap_or(""),
                self.role
            ),
        }
    }
}

/// Handle for an open conversational channel.
pub struct ChatChannel {
    outbound: mpsc::Sender<String>,
    token: CancellationToken,
}

impl ChatChannel {
    /// Connect and start the pump. Returns the channel handle plus the
    /// receiver of de-duplicated inbound messages.
    pub async fn connect(
        url: &str,
        heartbeat_interval: Duration,
    ) -> Result<(Self, mpsc::Receiver<ChatMessage>), ChatError> {
        let (ws, _) = connect_async(url).await.map_err(|source| ChatError::Connect {
            url: url.to_string(),
            source,
        })?;

        let (outbound_tx, outbound_rx) = mpsc::channel::<String>(64);
        let (inbound_tx, inbound_rx) = mpsc::channel::<ChatMessage>(64);
        let token = CancellationToken::new();

        tokio::spawn(pump(ws, outbound_rx, inbound_tx, heartbeat_interval, token.clone()));

        Ok((
            Self {
                outbound: outbound_tx,
                token,
            },
            inbound_rx,
        ))
    }

    /// Queue one outbound text message.
    pub async fn send(&self, text: impl Into<String>) -> Result<(), ChatError> {
        self.outbound
            .send(text.into())
            .await
            .map_err(|_| ChatError::Closed)
    }

    /// Tear the channel down, along with its ping timer and de-dup cache.
    pub fn close(&self) {
        self.token.cancel();
    }
}

async fn pump(
    ws: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    mut outbound: mpsc::Receiver<String>,
    inbound: mpsc::Sender<ChatMessage>,
    heartbeat_interval: Duration,
    token: CancellationToken,
) {
    let (mut sink, mut stream) = ws.split();
    let mut dedup = DedupCache::default();
    let mut ping_timer = tokio::time::interval(heartbeat_interval);
    ping_timer.tick().await; // first tick fires immediately, skip it

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                debug!("chat channel closed by caller");
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
            _ = ping_timer.tick() => {
                if sink.send(Message::Ping(Vec::new().into())).await.is_err() {
                    warn!("chat ping failed, closing channel");
                    break;
                }
            }
            text = outbound.recv() => match text {
                Some(text) => {
                    if sink.send(Message::Text(text.into())).await.is_err() {
                        warn!("chat send failed, closing channel");
                        break;
                    }
                }
                None => break,
            },
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let message: ChatMessage = match serde_json::from_str(&text) {
                        Ok(m) => m,
                        Err(e) => {
                            warn!(error = %e, "malformed chat message, skipping");
                            continue;
                        }
                    };
                    if !dedup.insert(&message.dedup_key()) {
                        debug!("duplicate chat message dropped");
                        continue;
                    }
                    if inbound.send(message).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    debug!("chat channel closed by server");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "chat read error");
                    break;
                }
            }
        }
    }
    // Cache dropped here: a reconnected channel starts with a clean slate.
    dedup.clear();
}
