//! Per-client connection state and the outbound pipeline.
//!
//! Each client owns a bounded outbound queue of frames plus two mutable
//! buffers of pending deltas. The move-apply worker is the only producer
//! into the buffers; the batch flusher drains them every 150 ms into one
//! `moveUpdates` frame. A full outbound queue is a fatal signal; the
//! client is slated for unregistration instead of ever blocking fan-out.

use crate::board::Board;
use crate::zones::ClientId;
use log::{debug, warn};
use shared::protocol::{PieceCapture, PieceMove, ServerFrame};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify, RwLock};
use tokio::time::{interval, Instant, MissedTickBehavior};

/// Outbound queue capacity in frames; overflow unregisters the client.
pub const OUTBOUND_CAPACITY: usize = 256;

/// Buffered moves that force an immediate producer-side flush.
pub const MOVE_BUFFER_CAP: usize = 400;

/// Batch flusher period.
pub const FLUSH_INTERVAL: Duration = Duration::from_millis(150);

/// Periodic viewport snapshot period.
pub const VIEWPORT_INTERVAL: Duration = Duration::from_secs(2);

/// Minimum spacing between client-requested snapshots.
pub const SNAPSHOT_REQUEST_INTERVAL: Duration = Duration::from_secs(1);

/// One connected client. Identity is the `id`; the color never changes
/// after registration.
pub struct Client {
    pub id: ClientId,
    pub plays_white: bool,
    position: Mutex<(u16, u16)>,
    outbound: mpsc::Sender<ServerFrame>,
    move_buffer: Mutex<Vec<PieceMove>>,
    capture_buffer: Mutex<Vec<PieceCapture>>,
    closed: AtomicBool,
    has_zones: AtomicBool,
    last_snapshot_request: Mutex<Instant>,
    shutdown: Notify,
}

impl Client {
    pub fn new(
        id: ClientId,
        plays_white: bool,
        position: (u16, u16),
        outbound: mpsc::Sender<ServerFrame>,
    ) -> Client {
        Client {
            id,
            plays_white,
            position: Mutex::new(position),
            outbound,
            move_buffer: Mutex::new(Vec::new()),
            capture_buffer: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            has_zones: AtomicBool::new(false),
            last_snapshot_request: Mutex::new(Instant::now() - SNAPSHOT_REQUEST_INTERVAL),
            shutdown: Notify::new(),
        }
    }

    pub fn position(&self) -> (u16, u16) {
        *self.position.lock().unwrap()
    }

    pub fn set_position(&self, x: u16, y: u16) {
        *self.position.lock().unwrap() = (x, y);
    }

    pub fn mark_zoned(&self) {
        self.has_zones.store(true, Ordering::Relaxed);
    }

    pub fn has_zones(&self) -> bool {
        self.has_zones.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    /// Marks the client closed and wakes the writer. Returns true on the
    /// first close only, so unregistration stays one-shot.
    pub fn close(&self) -> bool {
        let first = !self.closed.swap(true, Ordering::SeqCst);
        if first {
            self.shutdown.notify_one();
        }
        first
    }

    /// Completes when the client has been closed.
    pub async fn closed_wait(&self) {
        self.shutdown.notified().await;
    }

    /// Enqueues a frame. False means the queue is full or closed; the
    /// caller must slate the client for unregistration.
    pub fn queue_frame(&self, frame: ServerFrame) -> bool {
        if self.is_closed() {
            return false;
        }
        self.outbound.try_send(frame).is_ok()
    }

    /// Appends a pending move. Returns true when the buffer hit its cap
    /// and the producer must flush immediately.
    pub fn push_move(&self, piece_move: PieceMove) -> bool {
        let mut buffer = self.move_buffer.lock().unwrap();
        buffer.push(piece_move);
        buffer.len() >= MOVE_BUFFER_CAP
    }

    pub fn push_capture(&self, capture: PieceCapture) {
        self.capture_buffer.lock().unwrap().push(capture);
    }

    /// Atomically swaps out both buffers.
    pub fn take_updates(&self) -> (Vec<PieceMove>, Vec<PieceCapture>) {
        let moves = std::mem::take(&mut *self.move_buffer.lock().unwrap());
        let captures = std::mem::take(&mut *self.capture_buffer.lock().unwrap());
        (moves, captures)
    }

    /// Drains the buffers into one `moveUpdates` frame. False means the
    /// outbound queue rejected the frame.
    pub fn flush_updates(&self) -> bool {
        let (moves, captures) = self.take_updates();
        if moves.is_empty() && captures.is_empty() {
            return true;
        }
        self.queue_frame(ServerFrame::MoveUpdates { moves, captures })
    }

    /// Rate limiter for client-requested snapshots.
    pub fn allow_snapshot_request(&self) -> bool {
        let mut last = self.last_snapshot_request.lock().unwrap();
        if last.elapsed() >= SNAPSHOT_REQUEST_INTERVAL {
            *last = Instant::now();
            true
        } else {
            false
        }
    }
}

/// Drains the delta buffers every [`FLUSH_INTERVAL`]. Exits when the
/// client closes; a rejected frame unregisters it.
pub async fn run_flusher(client: Arc<Client>, unregister: mpsc::UnboundedSender<ClientId>) {
    let mut ticker = interval(FLUSH_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        if client.is_closed() {
            break;
        }
        if !client.flush_updates() {
            warn!("client {}: outbound queue full during flush", client.id);
            let _ = unregister.send(client.id);
            break;
        }
    }
    debug!("client {}: flusher stopped", client.id);
}

/// Sends a fresh viewport snapshot every [`VIEWPORT_INTERVAL`] once the
/// client has subscribed somewhere.
pub async fn run_viewport_ticker(
    client: Arc<Client>,
    board: Arc<RwLock<Board>>,
    unregister: mpsc::UnboundedSender<ClientId>,
) {
    let mut ticker = interval(VIEWPORT_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        if client.is_closed() {
            break;
        }
        if !client.has_zones() {
            continue;
        }
        let (x, y) = client.position();
        let snapshot = board.read().await.state_for_position(x, y);
        if !client.queue_frame(ServerFrame::StateSnapshot(snapshot.into_payload())) {
            warn!("client {}: outbound queue full during viewport tick", client.id);
            let _ = unregister.send(client.id);
            break;
        }
    }
    debug!("client {}: viewport ticker stopped", client.id);
}
