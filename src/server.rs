//! Console WebSocket endpoint.
//!
//! `GET /api/console/{vm}` upgrades to a WebSocket and hands it to
//! [`console::run_session`]. Outbound [`ServerMessage`]s are written as JSON
//! text frames; inbound text frames are passed through unparsed and the
//! stream ends at the first close frame or socket error.

use std::future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::Router;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::config::ConsoleConfig;
use crate::console;
use crate::protocol::ServerMessage;
use crate::vm::{ControlPlane, validate_name};

#[derive(Clone)]
struct ConsoleState {
    plane: Arc<ControlPlane>,
    tick: Duration,
}

/// Console routes.
pub fn router(plane: Arc<ControlPlane>, console: &ConsoleConfig) -> Router {
    Router::new()
        .route("/api/console/{vm}", get(console_socket))
        .with_state(ConsoleState {
            plane,
            tick: console.tick_interval(),
        })
}

/// Bind `bind` and serve the console routes until the process exits.
pub async fn serve(plane: Arc<ControlPlane>, bind: &str, console: &ConsoleConfig) -> anyhow::Result<()> {
    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind console server to {bind}"))?;
    let addr = listener.local_addr().context("listener has no local address")?;
    if !plane.is_supported() {
        warn!("Hypervisor not supported on this host; consoles will show no frames");
    }
    info!(%addr, "Console server listening");

    axum::serve(listener, router(plane, console))
        .await
        .context("console server failed")
}

async fn console_socket(
    ws: WebSocketUpgrade,
    Path(vm): Path<String>,
    State(state): State<ConsoleState>,
) -> Response {
    let vm = match validate_name(&vm) {
        Ok(name) => name.to_string(),
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };
    ws.on_upgrade(move |socket| handle_socket(socket, state, vm))
}

async fn handle_socket(socket: WebSocket, state: ConsoleState, vm: String) {
    let (sink, stream) = socket.split();

    let outbound = sink.with(|msg: ServerMessage| {
        future::ready(Ok::<_, axum::Error>(Message::Text(msg.to_json().into())))
    });
    let inbound = stream
        .take_while(|msg| future::ready(matches!(msg, Ok(m) if !matches!(m, Message::Close(_)))))
        .filter_map(|msg| {
            future::ready(match msg {
                Ok(Message::Text(text)) => Some(text.as_str().to_owned()),
                _ => None,
            })
        });

    console::run_session(state.plane, vm, state.tick, outbound, inbound).await;
}
