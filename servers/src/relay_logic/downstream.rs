//! Local subscriber server.
//!
//! Every WebSocket client on `/` or `/ws` is registered with the shared
//! [`Dispatcher`] and receives each normalized event as one JSON text frame.
//! Text frames from the client are echoed back, which is handy when poking at
//! the relay by hand.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{any, get},
    Router,
};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use lib_relay::Dispatcher;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// A subscriber that cannot take one frame within this long is dropped.
const SEND_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    /// First frame every subscriber receives.
    pub greeting: Arc<str>,
    pub shutdown: CancellationToken,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", any(ws_handler))
        .route("/ws", any(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Binds `0.0.0.0:port` and serves until `state.shutdown` fires.
pub async fn run(port: u16, state: AppState) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind subscriber server on {addr}"))?;
    tracing::info!(%addr, "Subscriber server listening");
    serve(listener, state).await
}

pub async fn serve(listener: TcpListener, state: AppState) -> Result<()> {
    let shutdown = state.shutdown.clone();
    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown.cancelled().await;
        tracing::info!("Subscriber server shutting down");
    })
    .await
    .context("Subscriber server failed")
}

async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn ws_handler(
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> Response {
    match ws {
        Ok(ws) => ws
            .on_upgrade(move |socket| handle_socket(socket, state, addr))
            .into_response(),
        Err(rejection) => {
            tracing::debug!(peer = %addr, %rejection, "Rejected non WebSocket request");
            (StatusCode::BAD_REQUEST, "WebSocket only").into_response()
        }
    }
}

async fn handle_socket(socket: WebSocket, state: AppState, addr: SocketAddr) {
    let label = format!("ws-{addr}");
    let (id, mut frames) = state.dispatcher.add_client(&label);
    tracing::info!(
        subscriber = id,
        peer = %addr,
        subscribers = state.dispatcher.subscriber_count(),
        "Subscriber connected"
    );

    let (mut sink, mut inbound) = socket.split();

    if send_text(&mut sink, state.greeting.to_string()).await {
        loop {
            tokio::select! {
                frame = frames.recv() => {
                    // `None`: the dispatcher dropped this handle.
                    let Some(frame) = frame else { break };
                    if !send_text(&mut sink, frame.to_string()).await {
                        break;
                    }
                }
                msg = inbound.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        let echo = format!("Echo: {}", text.as_str());
                        if !send_text(&mut sink, echo).await {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!(subscriber = id, error = %e, "Subscriber socket error");
                        break;
                    }
                },
                _ = state.shutdown.cancelled() => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    }

    state.dispatcher.remove_client(id);
    tracing::info!(
        subscriber = id,
        peer = %addr,
        subscribers = state.dispatcher.subscriber_count(),
        "Subscriber disconnected"
    );
}

/// `false` once the socket is gone or too slow to accept a frame.
async fn send_text(sink: &mut SplitSink<WebSocket, Message>, text: String) -> bool {
    match tokio::time::timeout(SEND_TIMEOUT, sink.send(Message::Text(text.into()))).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            tracing::debug!(error = %e, "Subscriber send failed");
            false
        }
        Err(_) => {
            tracing::warn!(timeout_secs = SEND_TIMEOUT.as_secs(), "Subscriber send timed out");
            false
        }
    }
}
