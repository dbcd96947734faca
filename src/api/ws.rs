//! WebSocket endpoint for the prediction feed.
//!
//! Handshake: the client's first message must be `{"subscribe":"<topic>"}`;
//! the server acks with `{"ok":true}` and then pushes published predictions
//! as they happen. Closing the connection (or dropping it) releases the
//! subscriber.

use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::State,
    response::Response,
};
use tracing::{debug, info};

use super::routes::AppState;
use crate::fanout::SubscriberHandle;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let Some(mut subscriber) = subscribe_handshake(&mut socket, &state).await else {
        return;
    };

    loop {
        tokio::select! {
            // Forward published predictions; a lagging subscriber resumes
            // at the next available message.
            published = subscriber.recv() => {
                match published {
                    Some(message) => {
                        if socket.send(Message::Text(message)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if text == "ping" {
                            let _ = socket.send(Message::Text("pong".to_string())).await;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    debug!(subscriber = %subscriber.id, "subscriber disconnected");
}

/// Wait for the subscribe request; anything else gets an error reply and
/// another chance until the connection closes.
async fn subscribe_handshake(socket: &mut WebSocket, state: &AppState) -> Option<SubscriberHandle> {
    while let Some(Ok(message)) = socket.recv().await {
        match message {
            Message::Text(text) => {
                let topic = serde_json::from_str::<serde_json::Value>(&text)
                    .ok()
                    .and_then(|v| {
                        v.get("subscribe")
                            .and_then(|t| t.as_str())
                            .map(str::to_string)
                    });

                match topic {
                    Some(topic) => {
                        let subscriber = state.hub.subscribe(&topic);
                        info!(subscriber = %subscriber.id, topic = %topic, "subscribed");
                        if socket
                            .send(Message::Text(r#"{"ok":true}"#.to_string()))
                            .await
                            .is_err()
                        {
                            return None;
                        }
                        return Some(subscriber);
                    }
                    None => {
                        if socket
                            .send(Message::Text(r#"{"error":"expected subscribe"}"#.to_string()))
                            .await
                            .is_err()
                        {
                            return None;
                        }
                    }
                }
            }
            Message::Close(_) => return None,
            _ => {}
        }
    }
    None
}
