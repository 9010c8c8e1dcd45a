//! Gateway dispatcher (C6): detects the WebSocket upgrade and hands the
//! socket to the tunnel engine; everything else falls through to the
//! management surface.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{FromRequest, Request, State};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use vlwg_common::ErrorKind;

use crate::tunnel::{self, CloseReason};
use crate::wsstream;

use super::management::{self, CreateAccountRequest, DeleteAccountRequest};
use super::AppState;

const SEC_WEBSOCKET_PROTOCOL: &str = "sec-websocket-protocol";
const CHANNEL_CAPACITY: usize = 32;

/// Top-level dispatch (C6, spec §4.6): any path whose `Upgrade` header
/// is `websocket` (case-insensitive) is handed to the tunnel engine;
/// everything else is routed to the management surface by path.
pub async fn dispatch(State(state): State<AppState>, request: Request) -> Response {
    let is_websocket_upgrade = request
        .headers()
        .get(axum::http::header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false);

    let early_data_header = request
        .headers()
        .get(SEC_WEBSOCKET_PROTOCOL)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    if is_websocket_upgrade {
        return match WebSocketUpgrade::from_request(request, &state).await {
            Ok(ws) => accept(ws, state, early_data_header),
            Err(rejection) => rejection.into_response(),
        };
    }

    let method = request.method().clone();
    let path = request.uri().path().to_string();

    match (method, path.as_str()) {
        (Method::GET, "/api/accounts") => management::list_accounts(State(state)).await.into_response(),
        (Method::POST, "/api/create") => {
            match parse_json_body::<CreateAccountRequest>(request).await {
                Ok(body) => management::create_account(State(state), axum::Json(body)).await,
                Err(status) => status.into_response(),
            }
        }
        (Method::POST, "/api/delete") => {
            match parse_json_body::<DeleteAccountRequest>(request).await {
                Ok(body) => management::delete_account(State(state), axum::Json(body)).await,
                Err(status) => status.into_response(),
            }
        }
        (Method::OPTIONS, _) => StatusCode::NO_CONTENT.into_response(),
        _ => management::catch_all().await.into_response(),
    }
}

async fn parse_json_body<T: serde::de::DeserializeOwned>(request: Request) -> Result<T, StatusCode> {
    let bytes = axum::body::to_bytes(request.into_body(), 1024 * 1024)
        .await
        .map_err(|_| StatusCode::BAD_REQUEST)?;
    serde_json::from_slice(&bytes).map_err(|_| StatusCode::BAD_REQUEST)
}

fn accept(ws: WebSocketUpgrade, state: AppState, early_data_header: Option<String>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, early_data_header))
}

async fn handle_socket(socket: WebSocket, state: AppState, early_data_header: Option<String>) {
    let first_chunk = match wsstream::decode_early_data(early_data_header.as_deref()) {
        Ok(bytes) => bytes,
        Err(_) => {
            let _ = close_immediately(
                socket,
                ErrorKind::MalformedHeader(vlwg_common::error::MalformedReason::BadEarlyData),
            )
            .await;
            return;
        }
    };

    let (mut ws_sink, mut ws_stream) = socket.split();
    let (inbound_tx, inbound_rx) = mpsc::channel::<Vec<u8>>(CHANNEL_CAPACITY);
    let (downstream_tx, mut downstream_rx) = mpsc::channel::<Vec<u8>>(CHANNEL_CAPACITY);
    let (close_code_tx, close_code_rx) = tokio::sync::oneshot::channel::<u16>();

    // Returns whether the loop ended because of a disallowed frame (only
    // binary frames carry tunnel data, spec §6), so the caller can pick
    // the right close code once the tunnel engine has also wound down.
    let recv_task = tokio::spawn(async move {
        while let Some(message) = ws_stream.next().await {
            match message {
                Ok(Message::Binary(data)) => {
                    if inbound_tx.send(data.to_vec()).await.is_err() {
                        break;
                    }
                }
                Ok(Message::Close(_)) => return false,
                Ok(Message::Text(_)) => return true,
                Ok(_) => {} // Ping/Pong handled by axum.
                Err(_) => break,
            }
        }
        false
    });

    let send_task = tokio::spawn(async move {
        while let Some(chunk) = downstream_rx.recv().await {
            if ws_sink.send(Message::Binary(chunk.into())).await.is_err() {
                return;
            }
        }
        let code = close_code_rx.await.unwrap_or(1000);
        let _ = ws_sink.send(wsstream::close_message(code)).await;
    });

    let dialer = state.dialer.clone();
    let outcome = tunnel::run_session(
        first_chunk,
        inbound_rx,
        downstream_tx,
        &state.identity,
        |address: String, port: u16| {
            let dialer = dialer.clone();
            async move { dialer.dial(&address, port).await }
        },
        state.dialer.fallback_address(),
        state.config.header_timeout,
        state.config.connect_timeout,
        state.config.idle_timeout,
    )
    .await;

    // `abort` is a no-op if `recv_task` already returned (the common case:
    // its sender being dropped is usually what unblocked `run_session`);
    // it only actually cancels a task still parked on `ws_stream.next()`.
    recv_task.abort();
    let text_frame_seen = matches!(recv_task.await, Ok(true));

    let close_code = if text_frame_seen {
        vlwg_common::error::close_code::PROTOCOL_ERROR
    } else {
        outcome.reason.close_code()
    };
    let _ = close_code_tx.send(close_code);

    match &outcome.reason {
        CloseReason::Rejected(reason) | CloseReason::Aborted(reason) => {
            tracing::info!(close_code, "tunnel session ended: {reason}");
        }
        CloseReason::Terminated => {
            tracing::debug!(
                close_code,
                bytes_up = outcome.stats.bytes_up,
                bytes_down = outcome.stats.bytes_down,
                "tunnel session terminated"
            );
        }
    }

    let _ = send_task.await;
}

async fn close_immediately(mut socket: WebSocket, reason: ErrorKind) -> Result<(), axum::Error> {
    let code = reason.close_code();
    tracing::info!(close_code = code, "rejecting session: {reason}");
    socket.send(wsstream::close_message(code)).await
}
