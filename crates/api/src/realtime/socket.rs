//! WebSocket fan-out endpoint.
//!
//! The first client frame must be an `authenticate` message carrying a
//! short-lived signed token and the organization to join. An invalid or
//! mismatched token gets exactly one `authentication_error` frame before
//! the socket closes. After authentication the socket receives only its
//! organization's messages, at-most-once, with no replay; a subscriber
//! that falls behind the channel bound loses the overrun (counted) rather
//! than applying backpressure to producers.

use crate::realtime::token::SocketTokenService;
use crate::state::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    routing::{get, Router},
};
use serde::Deserialize;
use singura_core::Uuid;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

const AUTH_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Deserialize)]
struct AuthenticateFrame {
    #[serde(rename = "type")]
    frame_type: String,
    token: String,
    #[serde(rename = "organizationId")]
    organization_id: Uuid,
}

pub fn realtime_routes() -> Router<AppState> {
    Router::new().route("/", get(websocket_handler))
}

async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn send_error(socket: &mut WebSocket, error: &str) {
    let frame = serde_json::json!({
        "type": "authentication_error",
        "error": error,
    });
    let _ = socket.send(Message::Text(frame.to_string())).await;
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let tokens = SocketTokenService::new(&state.config.auth);

    // Authentication phase: one frame, bounded wait.
    let auth = tokio::time::timeout(
        std::time::Duration::from_secs(AUTH_TIMEOUT_SECS),
        socket.recv(),
    )
    .await;

    let frame = match auth {
        Ok(Some(Ok(Message::Text(text)))) => text,
        Ok(Some(Ok(_))) | Ok(Some(Err(_))) | Ok(None) => {
            send_error(&mut socket, "expected an authenticate frame").await;
            return;
        }
        Err(_) => {
            send_error(&mut socket, "authentication timed out").await;
            return;
        }
    };

    let authenticate: AuthenticateFrame = match serde_json::from_str(&frame) {
        Ok(frame) => frame,
        Err(_) => {
            send_error(&mut socket, "malformed authenticate frame").await;
            return;
        }
    };

    if authenticate.frame_type != "authenticate" {
        send_error(&mut socket, "expected an authenticate frame").await;
        return;
    }

    let claims = match tokens.verify(&authenticate.token) {
        Ok(claims) => claims,
        Err(e) => {
            debug!(error = %e, "Socket token rejected");
            send_error(&mut socket, "invalid token").await;
            return;
        }
    };

    // The token's organization must match the requested room.
    if claims.org != authenticate.organization_id {
        warn!(
            token_org = %claims.org,
            requested_org = %authenticate.organization_id,
            "Socket organization mismatch"
        );
        send_error(&mut socket, "organization mismatch").await;
        return;
    }

    let organization_id = claims.org;
    let accepted = serde_json::json!({
        "type": "authenticated",
        "userId": claims.sub,
        "organizationId": organization_id,
    });
    if socket.send(Message::Text(accepted.to_string())).await.is_err() {
        return;
    }

    info!(
        organization_id = %organization_id,
        user_id = %claims.sub,
        "Realtime subscriber joined"
    );

    let mut subscription = state.bus.subscribe(organization_id);
    let metrics = Arc::clone(&state.metrics);

    loop {
        tokio::select! {
            inbound = socket.recv() => {
                match inbound {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {
                        // Clients have nothing else to say on this channel.
                        continue;
                    }
                    Some(Err(e)) => {
                        debug!(error = %e, "Socket receive error");
                        break;
                    }
                }
            }
            outbound = subscription.recv() => {
                match outbound {
                    Ok(message) => {
                        let Ok(payload) = serde_json::to_string(&message) else {
                            continue;
                        };
                        if socket.send(Message::Text(payload)).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(missed)) => {
                        // The slow subscriber loses the overrun; producers
                        // never block on it.
                        warn!(
                            organization_id = %organization_id,
                            missed,
                            "Subscriber lagged; messages dropped"
                        );
                        metrics
                            .realtime_dropped
                            .with_label_values(&["slow_subscriber"])
                            .inc_by(missed);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }

    info!(
        organization_id = %organization_id,
        user_id = %claims.sub,
        "Realtime subscriber left"
    );
}
