//! Transport layer: the axum router, websocket pipelines and the HTTP
//! overview endpoints.
//!
//! Each websocket runs a reader inline plus three spawned tasks: the
//! writer draining the outbound queue, the batch flusher and the viewport
//! ticker. The reader enforces the frame-size cap and the idle deadline;
//! anything that smells like a protocol violation beyond a malformed JSON
//! body disconnects the client.

use crate::board::{Board, MoveRequest, MoveType};
use crate::captures::RecentCaptures;
use crate::client::{self, Client, OUTBOUND_CAPACITY};
use crate::minimap::Minimap;
use crate::server::ServerHandle;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use serde_json::json;
use shared::protocol::{ClientFrame, ServerFrame};
use shared::{BOARD_SIZE, MAX_FRAME_BYTES, ZSTD_MAGIC};
use std::io::Read;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, RwLock};
use tokio::time::{interval, timeout, MissedTickBehavior};

/// A connection that sends nothing for this long is dropped.
pub const READ_DEADLINE: Duration = Duration::from_secs(120);

/// A send that stalls this long marks the peer dead.
pub const WRITE_DEADLINE: Duration = Duration::from_secs(10);

/// Websocket protocol ping cadence.
pub const PING_INTERVAL: Duration = Duration::from_secs(10);

/// Shared state behind every route.
pub struct AppState {
    pub handle: ServerHandle,
    pub board: Arc<RwLock<Board>>,
    pub minimap: Arc<Minimap>,
    pub captures: Arc<RecentCaptures>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/minimap", get(minimap_handler))
        .route("/recent-captures", get(recent_captures_handler))
        .with_state(state)
}

async fn ws_handler(
    State(state): State<Arc<AppState>>,
    upgrade: WebSocketUpgrade,
) -> Response {
    upgrade.on_upgrade(move |socket| handle_socket(socket, state))
}

/// The cached compressed overview blob, shared with the refresher.
async fn minimap_handler(State(state): State<Arc<AppState>>) -> Response {
    let blob = state.minimap.blob();
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/octet-stream")],
        blob.as_ref().clone(),
    )
        .into_response()
}

async fn recent_captures_handler(State(state): State<Arc<AppState>>) -> Response {
    Json(json!({
        "white": state.captures.recent(true),
        "black": state.captures.recent(false),
    }))
    .into_response()
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (sink, stream) = socket.split();
    let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);

    let Some(connected) = state.handle.register(outbound_tx).await else {
        return;
    };
    debug!("client {} websocket established", connected.id);

    let unregister = state.handle.unregister_sender();
    let writer = tokio::spawn(run_writer(sink, outbound_rx, connected.clone()));
    let flusher = tokio::spawn(client::run_flusher(connected.clone(), unregister.clone()));
    let ticker = tokio::spawn(client::run_viewport_ticker(
        connected.clone(),
        state.board.clone(),
        unregister,
    ));

    run_reader(stream, connected.clone(), &state).await;

    state.handle.unregister(connected.id);
    let _ = writer.await;
    flusher.abort();
    ticker.abort();
    info!("client {} websocket torn down", connected.id);
}

/// Consumes inbound frames until the peer disconnects, times out or
/// violates the protocol.
async fn run_reader(mut stream: SplitStream<WebSocket>, client: Arc<Client>, state: &Arc<AppState>) {
    loop {
        if client.is_closed() {
            break;
        }
        let message = match timeout(READ_DEADLINE, stream.next()).await {
            Err(_) => {
                info!("client {}: idle past read deadline", client.id);
                break;
            }
            Ok(None) | Ok(Some(Err(_))) => break,
            Ok(Some(Ok(message))) => message,
        };

        let outcome = match message {
            Message::Text(text) => {
                if text.len() > MAX_FRAME_BYTES {
                    oversized(&client);
                    break;
                }
                dispatch_text(text.as_str(), &client, state).await
            }
            Message::Binary(bytes) => {
                if bytes.len() > MAX_FRAME_BYTES {
                    oversized(&client);
                    break;
                }
                match inflate(&bytes) {
                    Some(text) => dispatch_text(&text, &client, state).await,
                    None => {
                        oversized(&client);
                        break;
                    }
                }
            }
            Message::Close(_) => break,
            // Protocol pings and pongs are handled by the stack.
            Message::Ping(_) | Message::Pong(_) => ControlFlow::Continue(()),
        };
        if outcome.is_break() {
            break;
        }
    }
}

fn oversized(client: &Client) {
    warn!("client {}: frame over the size cap", client.id);
    client.queue_frame(ServerFrame::Error {
        message: "frame too large".to_string(),
        code: 400,
    });
}

/// Decompresses a zstd binary envelope, enforcing both the magic prefix
/// and the size cap on the inflated text.
fn inflate(bytes: &[u8]) -> Option<String> {
    if bytes.len() < ZSTD_MAGIC.len() || bytes[..ZSTD_MAGIC.len()] != ZSTD_MAGIC {
        return None;
    }
    let mut text = String::new();
    let decoder = zstd::stream::read::Decoder::new(bytes).ok()?;
    decoder
        .take(MAX_FRAME_BYTES as u64 + 1)
        .read_to_string(&mut text)
        .ok()?;
    if text.len() > MAX_FRAME_BYTES {
        return None;
    }
    Some(text)
}

async fn dispatch_text(
    text: &str,
    client: &Arc<Client>,
    state: &Arc<AppState>,
) -> ControlFlow<()> {
    let frame: ClientFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(err) => {
            debug!("client {}: malformed frame: {}", client.id, err);
            client.queue_frame(ServerFrame::Error {
                message: "malformed frame".to_string(),
                code: 400,
            });
            return ControlFlow::Continue(());
        }
    };

    match frame {
        ClientFrame::Move {
            piece_id,
            from_x,
            from_y,
            to_x,
            to_y,
            move_type,
            move_token,
        } => {
            let parsed_type = MoveType::from_wire(move_type);
            if parsed_type.is_none()
                || from_x >= BOARD_SIZE
                || from_y >= BOARD_SIZE
                || to_x >= BOARD_SIZE
                || to_y >= BOARD_SIZE
            {
                client.queue_frame(ServerFrame::Error {
                    message: "malformed move".to_string(),
                    code: 400,
                });
                return ControlFlow::Continue(());
            }
            let request = MoveRequest {
                piece_id,
                from_x,
                from_y,
                to_x,
                to_y,
                move_type: parsed_type.unwrap_or(MoveType::Normal),
                move_token,
                client_is_white: client.plays_white,
            };
            if !state.handle.submit_move(client.clone(), request).await {
                return ControlFlow::Break(());
            }
        }
        ClientFrame::Subscribe { center_x, center_y } => {
            if center_x >= BOARD_SIZE || center_y >= BOARD_SIZE {
                client.queue_frame(ServerFrame::Error {
                    message: "subscription out of bounds".to_string(),
                    code: 400,
                });
                return ControlFlow::Continue(());
            }
            if !state.handle.subscribe(client.clone(), center_x, center_y).await {
                return ControlFlow::Break(());
            }
        }
        ClientFrame::RequestSnapshot => {
            if !client.allow_snapshot_request() {
                client.queue_frame(ServerFrame::Error {
                    message: "snapshot requests limited to one per second".to_string(),
                    code: 429,
                });
                return ControlFlow::Continue(());
            }
            let (x, y) = client.position();
            let snapshot = state.board.read().await.state_for_position(x, y);
            client.queue_frame(ServerFrame::StateSnapshot(snapshot.into_payload()));
        }
        ClientFrame::AppPing => {
            client.queue_frame(ServerFrame::AppPong { time: now_nanos() });
        }
    }
    ControlFlow::Continue(())
}

fn now_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos() as u64)
        .unwrap_or(0)
}

/// Drains the outbound queue onto the socket. Exits on the close signal,
/// a stalled send or a closed queue.
async fn run_writer(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<ServerFrame>,
    client: Arc<Client>,
) {
    let mut ping = interval(PING_INTERVAL);
    ping.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        let message = tokio::select! {
            frame = outbound.recv() => {
                let Some(frame) = frame else { break };
                match serde_json::to_string(&frame) {
                    Ok(text) => Message::Text(text.into()),
                    Err(err) => {
                        warn!("client {}: frame serialization failed: {}", client.id, err);
                        continue;
                    }
                }
            }
            _ = client.closed_wait() => break,
            _ = ping.tick() => Message::Ping(Vec::new().into()),
        };

        match timeout(WRITE_DEADLINE, sink.send(message)).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => break,
            Err(_) => {
                warn!("client {}: send stalled past write deadline", client.id);
                break;
            }
        }
    }
    let _ = sink.close().await;
    debug!("client {}: writer stopped", client.id);
}
