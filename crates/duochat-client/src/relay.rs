//! Client side of the message relay.
//!
//! One [`RelayConnection`] per device. It owns two tasks: a writer draining
//! the outgoing queue into the socket and a reader turning incoming frames
//! into [`RelayUpdate`]s. Dropping the connection without calling
//! [`RelayConnection::disconnect`] aborts both.

use duochat_shared::{ChatMessage, RelayEvent, UserId};
use futures::{SinkExt, StreamExt};
use reqwest::Url;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::error::{ClientError, Result};

const OUTGOING_QUEUE_CAPACITY: usize = 64;
const UPDATE_QUEUE_CAPACITY: usize = 256;
const CLOSE_GRACE: std::time::Duration = std::time::Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayUpdate {
    Connected(UserId),
    Message(ChatMessage),
    Deleted(String),
    /// The server rejected a frame; the connection stays up.
    Error(String),
    Disconnected,
}

pub struct RelayConnection {
    outgoing: mpsc::Sender<String>,
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
}

impl RelayConnection {
    /// Open the relay socket at `url` (as given by
    /// [`ApiClient::socket_url`](crate::ApiClient::socket_url)) with an
    /// access token.
    pub async fn connect(
        url: &str,
        access_token: &str,
    ) -> Result<(Self, mpsc::Receiver<RelayUpdate>)> {
        let mut url = Url::parse(url).map_err(|e| ClientError::InvalidUrl(e.to_string()))?;
        url.query_pairs_mut().append_pair("token", access_token);
        let (socket, _) = tokio_tungstenite::connect_async(url.as_str()).await?;
        let (mut sink, mut stream) = socket.split();

        let (outgoing, mut outgoing_rx) = mpsc::channel::<String>(OUTGOING_QUEUE_CAPACITY);
        let (updates_tx, updates_rx) = mpsc::channel(UPDATE_QUEUE_CAPACITY);

        let writer = tokio::spawn(async move {
            while let Some(text) = outgoing_rx.recv().await {
                if let Err(e) = sink.send(Message::Text(text)).await {
                    debug!(error = %e, "Relay send failed");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let reader = tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                let text = match frame {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        debug!(error = %e, "Relay receive failed");
                        break;
                    }
                };
                let Some(update) = to_update(&text) else {
                    continue;
                };
                if updates_tx.send(update).await.is_err() {
                    break;
                }
            }
            let _ = updates_tx.send(RelayUpdate::Disconnected).await;
        });

        info!(url = %url, "Relay connected");
        Ok((
            Self {
                outgoing,
                writer,
                reader,
            },
            updates_rx,
        ))
    }

    pub async fn send_message(&self, message: &ChatMessage) -> Result<()> {
        self.send(RelayEvent::message(message)?).await
    }

    pub async fn send_delete(&self, id: &str) -> Result<()> {
        self.send(RelayEvent::DeleteMessage(id.to_string())).await
    }

    async fn send(&self, event: RelayEvent) -> Result<()> {
        let text = event.encode()?;
        self.outgoing
            .send(text)
            .await
            .map_err(|_| ClientError::Disconnected)
    }

    pub fn is_connected(&self) -> bool {
        !self.writer.is_finished() && !self.reader.is_finished()
    }

    /// Close the socket and wait briefly for the server to acknowledge.
    pub async fn disconnect(mut self) {
        // Swapping in a dead sender closes the queue so the writer can finish.
        let (closed, _) = mpsc::channel(1);
        drop(std::mem::replace(&mut self.outgoing, closed));
        let _ = (&mut self.writer).await;

        if tokio::time::timeout(CLOSE_GRACE, &mut self.reader).await.is_err() {
            debug!("Relay close not acknowledged in time");
        }
        info!("Relay disconnected");
    }
}

impl Drop for RelayConnection {
    fn drop(&mut self) {
        self.writer.abort();
        self.reader.abort();
    }
}

fn to_update(text: &str) -> Option<RelayUpdate> {
    let event = match RelayEvent::decode(text) {
        Ok(event) => event,
        Err(e) => {
            warn!(error = %e, "Ignoring malformed relay frame");
            return None;
        }
    };

    match event {
        RelayEvent::Connect(ack) => Some(RelayUpdate::Connected(ack.user_id)),
        RelayEvent::Message(raw) => match serde_json::from_str::<ChatMessage>(raw.get()) {
            Ok(message) => Some(RelayUpdate::Message(message)),
            Err(e) => {
                warn!(error = %e, "Ignoring relayed payload that is not a chat message");
                None
            }
        },
        RelayEvent::DeleteMessage(id) => Some(RelayUpdate::Deleted(id)),
        RelayEvent::Error(body) => Some(RelayUpdate::Error(body.message)),
    }
}
