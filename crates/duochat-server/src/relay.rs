//! WebSocket message relay.
//!
//! A socket authenticates once, at upgrade time, with an access token from
//! `?token=` or `Authorization: Bearer`. It then joins the room of its user
//! and every `message` / `deleteMessage` it sends is fanned out to the whole
//! room. Message payloads are appended to the user's history first; a
//! storage failure is logged and the broadcast goes ahead anyway.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use duochat_shared::protocol::ConnectAck;
use duochat_shared::{RelayEvent, UserId};
use futures::{sink::SinkExt, stream::StreamExt};
use serde::Deserialize;
use serde_json::value::RawValue;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::api::AppState;
use crate::auth::bearer_token;
use crate::error::ServerError;
use crate::rooms::{ConnectionId, Frame, CONNECTION_QUEUE_CAPACITY};

#[derive(Debug, Default, Deserialize)]
pub struct SocketQuery {
    #[serde(default)]
    pub token: Option<String>,
}

// ---------------------------------------------------------------------------
// WebSocket upgrade handler
// ---------------------------------------------------------------------------

/// Authenticate, then upgrade. A bad token never reaches the upgrade.
pub async fn socket_handler(
    State(state): State<AppState>,
    Query(query): Query<SocketQuery>,
    headers: HeaderMap,
    ws: Option<WebSocketUpgrade>,
) -> Result<Response, ServerError> {
    let token = query
        .token
        .filter(|t| !t.is_empty())
        .or_else(|| bearer_token(&headers).map(str::to_string))
        .ok_or_else(|| ServerError::unauthorized("Unauthorized"))?;

    let claims = state.tokens.verify_access(&token).map_err(|e| {
        debug!(error = %e, "Rejected relay connection");
        ServerError::unauthorized("Invalid token")
    })?;

    let ws = ws.ok_or_else(|| ServerError::bad_request("WebSocket upgrade required"))?;

    Ok(ws
        .on_upgrade(move |socket| handle_socket(socket, state, claims.sub))
        .into_response())
}

// ---------------------------------------------------------------------------
// Socket lifecycle
// ---------------------------------------------------------------------------

async fn handle_socket(socket: WebSocket, state: AppState, user_id: UserId) {
    let conn_id: ConnectionId = Uuid::new_v4();
    let room = user_id.to_room();
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Frame>(CONNECTION_QUEUE_CAPACITY);

    state.hub.join_room(&room, conn_id, tx.clone()).await;

    if let Some(ack) = encode(&RelayEvent::Connect(ConnectAck { user_id })) {
        if let Err(e) = tx.try_send(ack) {
            warn!(conn = %conn_id, error = %e, "Could not queue connect ack");
        }
    }

    let forward_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if ws_sender.send(Message::Text(frame.to_string())).await.is_err() {
                break;
            }
        }
    });

    let connections = state.hub.connection_count(&room).await;
    info!(
        user = %user_id.short(),
        conn = %conn_id,
        connections = connections,
        "Relay connection opened"
    );

    while let Some(msg) = ws_receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => handle_text(&text, &state, user_id, &room, &tx).await,
            Ok(Message::Binary(_)) => reply_error(&tx, "Binary frames are not supported"),
            Ok(Message::Close(_)) => break,
            Ok(Message::Ping(_) | Message::Pong(_)) => {}
            Err(e) => {
                debug!(conn = %conn_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    state.hub.leave_room(&room, &conn_id).await;
    forward_task.abort();

    info!(user = %user_id.short(), conn = %conn_id, "Relay connection closed");
}

async fn handle_text(
    text: &str,
    state: &AppState,
    user_id: UserId,
    room: &str,
    tx: &mpsc::Sender<Frame>,
) {
    let event = match RelayEvent::decode(text) {
        Ok(event) => event,
        Err(e) => {
            debug!(user = %user_id.short(), error = %e, "Malformed relay frame");
            reply_error(tx, &e.to_string());
            return;
        }
    };

    match event {
        RelayEvent::Message(raw) => {
            persist_message(state, user_id, &raw).await;
            let Some(frame) = encode(&RelayEvent::Message(raw)) else {
                return;
            };
            let delivered = state.hub.broadcast(room, frame).await;
            debug!(room = %room, delivered, "Relayed message");
        }
        RelayEvent::DeleteMessage(id) => {
            let Some(frame) = encode(&RelayEvent::DeleteMessage(id)) else {
                return;
            };
            let delivered = state.hub.broadcast(room, frame).await;
            debug!(room = %room, delivered, "Relayed delete");
        }
        other => reply_error(tx, &format!("Unexpected event: {}", other.name())),
    }
}

/// Append the payload, tagged with its owner and save time, to the user's
/// history. Failures are logged, never surfaced.
async fn persist_message(state: &AppState, user_id: UserId, raw: &RawValue) {
    let mut record = match serde_json::from_str::<Value>(raw.get()) {
        Ok(Value::Object(map)) => map,
        Ok(_) => {
            warn!(user = %user_id.short(), "Message payload is not an object; not persisted");
            return;
        }
        Err(e) => {
            error!(user = %user_id.short(), error = %e, "Unreadable message payload");
            return;
        }
    };
    record.insert("userId".into(), Value::String(user_id.to_string()));
    record.insert("savedAt".into(), Value::String(Utc::now().to_rfc3339()));

    if let Err(e) = state
        .stores
        .chats
        .push_message(user_id, Value::Object(record))
        .await
    {
        error!(user = %user_id.short(), error = %e, "Failed to persist relayed message");
    }
}

fn encode(event: &RelayEvent) -> Option<Frame> {
    match event.encode() {
        Ok(text) => Some(Arc::from(text)),
        Err(e) => {
            error!(event = event.name(), error = %e, "Failed to encode relay frame");
            None
        }
    }
}

fn reply_error(tx: &mpsc::Sender<Frame>, message: &str) {
    if let Some(frame) = encode(&RelayEvent::error(message)) {
        if let Err(e) = tx.try_send(frame) {
            debug!(error = %e, "Dropped error reply");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tokio_tungstenite::tungstenite::client::IntoClientRequest;
    use tokio_tungstenite::tungstenite::{self, Message as WsMessage};

    use crate::api::build_router;
    use crate::api::tests::test_state;

    async fn spawn_server(state: AppState) -> std::net::SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = build_router(state);
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        addr
    }

    async fn next_text<S>(ws: &mut S) -> String
    where
        S: futures::Stream<Item = Result<WsMessage, tungstenite::Error>> + Unpin,
    {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
                .await
                .expect("timed out waiting for frame")
                .expect("stream ended")
                .expect("websocket error");
            if let WsMessage::Text(text) = msg {
                return text;
            }
        }
    }

    #[tokio::test]
    async fn test_relay_fans_out_to_every_device_of_the_user() {
        let state = test_state();
        let alice = state.stores.users.insert_user("alice@example.com", "h").await.unwrap();
        let bob = state.stores.users.insert_user("bob@example.com", "h").await.unwrap();
        let alice_tokens = state.tokens.issue(&alice).unwrap();
        let bob_tokens = state.tokens.issue(&bob).unwrap();
        let addr = spawn_server(state.clone()).await;

        // web authenticates with the query string, mobile with a header
        let (mut web, _) = tokio_tungstenite::connect_async(format!(
            "ws://{addr}/socket?token={}",
            alice_tokens.access_token
        ))
        .await
        .unwrap();
        let mut req = format!("ws://{addr}/socket").into_client_request().unwrap();
        req.headers_mut().insert(
            "Authorization",
            format!("Bearer {}", alice_tokens.access_token).parse().unwrap(),
        );
        let (mut mobile, _) = tokio_tungstenite::connect_async(req).await.unwrap();
        let (mut other, _) = tokio_tungstenite::connect_async(format!(
            "ws://{addr}/socket?token={}",
            bob_tokens.access_token
        ))
        .await
        .unwrap();

        for ws in [&mut web, &mut mobile] {
            match RelayEvent::decode(&next_text(ws).await).unwrap() {
                RelayEvent::Connect(ack) => assert_eq!(ack.user_id, alice.id),
                other => panic!("expected connect, got {other:?}"),
            }
        }
        next_text(&mut other).await;

        let payload = r#"{"id":"m1",  "content":"hello","senderId":"web","createdAt":"2024-05-01T10:00:00Z"}"#;
        web.send(WsMessage::Text(format!(r#"{{"event":"message","data":{payload}}}"#)))
            .await
            .unwrap();

        // the sender's own socket gets it too
        for ws in [&mut mobile, &mut web] {
            match RelayEvent::decode(&next_text(ws).await).unwrap() {
                RelayEvent::Message(raw) => assert_eq!(raw.get(), payload),
                other => panic!("expected message, got {other:?}"),
            }
        }
        assert!(
            tokio::time::timeout(Duration::from_millis(200), other.next())
                .await
                .is_err(),
            "another user's room must not see the message"
        );

        let history = state.stores.chats.messages(alice.id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].payload["content"], "hello");
        assert_eq!(history[0].payload["userId"], alice.id.to_string());
        assert!(history[0].payload["savedAt"].is_string());

        mobile
            .send(WsMessage::Text(r#"{"event":"deleteMessage","data":"m1"}"#.into()))
            .await
            .unwrap();
        for ws in [&mut web, &mut mobile] {
            match RelayEvent::decode(&next_text(ws).await).unwrap() {
                RelayEvent::DeleteMessage(id) => assert_eq!(id, "m1"),
                other => panic!("expected delete, got {other:?}"),
            }
        }
        // a relayed delete is only a notification
        assert_eq!(state.stores.chats.messages(alice.id).await.unwrap().len(), 1);

        web.close(None).await.unwrap();
        mobile.close(None).await.unwrap();
        let room = alice.id.to_room();
        for _ in 0..50 {
            if state.hub.connection_count(&room).await == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(state.hub.connection_count(&room).await, 0);
        assert!(!state.hub.list_rooms().await.contains(&room));
    }

    #[tokio::test]
    async fn test_malformed_frame_gets_error_and_connection_survives() {
        let state = test_state();
        let alice = state.stores.users.insert_user("alice@example.com", "h").await.unwrap();
        let tokens = state.tokens.issue(&alice).unwrap();
        let addr = spawn_server(state.clone()).await;

        let (mut ws, _) = tokio_tungstenite::connect_async(format!(
            "ws://{addr}/socket?token={}",
            tokens.access_token
        ))
        .await
        .unwrap();
        next_text(&mut ws).await;

        ws.send(WsMessage::Text("not json".into())).await.unwrap();
        assert!(matches!(
            RelayEvent::decode(&next_text(&mut ws).await).unwrap(),
            RelayEvent::Error(_)
        ));

        ws.send(WsMessage::Text(r#"{"event":"typing","data":{}}"#.into()))
            .await
            .unwrap();
        assert!(matches!(
            RelayEvent::decode(&next_text(&mut ws).await).unwrap(),
            RelayEvent::Error(_)
        ));

        ws.send(WsMessage::Text(r#"{"event":"message","data":{"id":"m2"}}"#.into()))
            .await
            .unwrap();
        assert!(matches!(
            RelayEvent::decode(&next_text(&mut ws).await).unwrap(),
            RelayEvent::Message(_)
        ));
    }

    #[tokio::test]
    async fn test_error_reply_to_full_queue_is_dropped() {
        let (tx, mut rx) = mpsc::channel::<Frame>(1);
        reply_error(&tx, "first");
        reply_error(&tx, "second");

        let queued = rx.try_recv().unwrap();
        assert!(queued.contains("first"));
        assert!(rx.try_recv().is_err());

        drop(rx);
        reply_error(&tx, "closed");
    }

    #[tokio::test]
    async fn test_invalid_token_never_connects() {
        let state = test_state();
        let addr = spawn_server(state.clone()).await;

        let result =
            tokio_tungstenite::connect_async(format!("ws://{addr}/socket?token=forged")).await;
        match result {
            Err(tungstenite::Error::Http(resp)) => {
                assert_eq!(resp.status().as_u16(), 401)
            }
            other => panic!("expected HTTP 401, got {other:?}"),
        }
        assert!(state.hub.list_rooms().await.is_empty());
    }

    #[tokio::test]
    async fn test_non_object_payload_is_relayed_but_not_stored() {
        let state = test_state();
        let owner = UserId::new();
        let raw = RawValue::from_string("\"just text\"".to_string()).unwrap();

        persist_message(&state, owner, &raw).await;
        assert!(state.stores.chats.messages(owner).await.unwrap().is_empty());

        let raw = RawValue::from_string(r#"{"id":"m9"}"#.to_string()).unwrap();
        persist_message(&state, owner, &raw).await;
        assert_eq!(state.stores.chats.messages(owner).await.unwrap().len(), 1);
    }
}
