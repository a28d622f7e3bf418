//! The orchestrator: channel surfaces and the workers behind them.
//!
//! Every mutation of shared state flows through a channel into a dedicated
//! worker task, so no lock is ever held across an await on the hot path:
//!
//! - the move-apply worker linearizes all board mutations (client moves
//!   plus the operator adoption / bulk-capture surface) and fans results
//!   out to interested clients,
//! - the subscription worker retargets viewports,
//! - the registration worker admits clients and assigns colors,
//! - the unregistration worker tears clients down exactly once.
//!
//! [`ServerHandle`] is the cheap clonable front the websocket layer and
//! operator tooling talk to.

use crate::board::{
    AdoptionRequest, Board, BulkCaptureRequest, MoveRequest, MoveResult,
};
use crate::client::Client;
use crate::captures::RecentCaptures;
use crate::minimap::Minimap;
use crate::persistence::Mutation;
use crate::registry::ClientRegistry;
use crate::zones::{self, ClientId, ZoneCommand};
use log::{debug, info, warn};
use rand::Rng;
use shared::piece::Piece;
use shared::protocol::{
    MovedPieceWire, PieceCapture, PieceMove, Position, ServerFrame,
};
use shared::{BOARD_SIZE, SUB_BOARD_SIZE};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;

/// Pending client moves; senders back off (await) when the worker lags.
pub const MOVE_QUEUE_CAPACITY: usize = 1024;

/// Pending viewport changes.
pub const SUBSCRIPTION_QUEUE_CAPACITY: usize = 256;

/// A new connection asking to be admitted.
pub struct RegisterRequest {
    pub outbound: mpsc::Sender<ServerFrame>,
    pub reply: oneshot::Sender<Arc<Client>>,
}

/// A viewport retarget from one client.
pub struct SubscriptionRequest {
    pub client: Arc<Client>,
    pub center_x: u16,
    pub center_y: u16,
}

/// A client move bound for the move-apply worker.
pub struct MoveCommand {
    pub client: Arc<Client>,
    pub request: MoveRequest,
}

/// Clonable front of the orchestrator.
#[derive(Clone)]
pub struct ServerHandle {
    moves: mpsc::Sender<MoveCommand>,
    subscriptions: mpsc::Sender<SubscriptionRequest>,
    adoptions: mpsc::UnboundedSender<AdoptionRequest>,
    bulk_captures: mpsc::UnboundedSender<BulkCaptureRequest>,
    registrations: mpsc::UnboundedSender<RegisterRequest>,
    unregistrations: mpsc::UnboundedSender<ClientId>,
}

impl ServerHandle {
    /// Admits a connection and returns its client record once the initial
    /// state frame has been queued. `None` means the server is shutting
    /// down.
    pub async fn register(&self, outbound: mpsc::Sender<ServerFrame>) -> Option<Arc<Client>> {
        let (reply, response) = oneshot::channel();
        self.registrations
            .send(RegisterRequest { outbound, reply })
            .ok()?;
        response.await.ok()
    }

    pub fn unregister(&self, client_id: ClientId) {
        let _ = self.unregistrations.send(client_id);
    }

    /// Sender the per-client tasks use to slate their client for teardown.
    pub fn unregister_sender(&self) -> mpsc::UnboundedSender<ClientId> {
        self.unregistrations.clone()
    }

    pub async fn submit_move(&self, client: Arc<Client>, request: MoveRequest) -> bool {
        self.moves.send(MoveCommand { client, request }).await.is_ok()
    }

    pub async fn subscribe(&self, client: Arc<Client>, center_x: u16, center_y: u16) -> bool {
        self.subscriptions
            .send(SubscriptionRequest {
                client,
                center_x,
                center_y,
            })
            .await
            .is_ok()
    }

    /// Operator surface: reset a sub-board to the initial arrangement.
    pub fn request_adoption(&self, request: AdoptionRequest) -> bool {
        self.adoptions.send(request).is_ok()
    }

    /// Operator surface: clear matching pieces from a sub-board.
    pub fn request_bulk_capture(&self, request: BulkCaptureRequest) -> bool {
        self.bulk_captures.send(request).is_ok()
    }
}

/// Owns the receivers; consumed by [`Server::run`].
pub struct Server {
    board: Arc<RwLock<Board>>,
    registry: Arc<RwLock<ClientRegistry>>,
    zone_tx: mpsc::UnboundedSender<ZoneCommand>,
    persist_tx: mpsc::UnboundedSender<Mutation>,
    minimap: Arc<Minimap>,
    captures: Arc<RecentCaptures>,
    handle: ServerHandle,
    moves_rx: mpsc::Receiver<MoveCommand>,
    subscriptions_rx: mpsc::Receiver<SubscriptionRequest>,
    adoptions_rx: mpsc::UnboundedReceiver<AdoptionRequest>,
    bulk_captures_rx: mpsc::UnboundedReceiver<BulkCaptureRequest>,
    registrations_rx: mpsc::UnboundedReceiver<RegisterRequest>,
    unregistrations_rx: mpsc::UnboundedReceiver<ClientId>,
}

impl Server {
    pub fn new(
        board: Arc<RwLock<Board>>,
        zone_tx: mpsc::UnboundedSender<ZoneCommand>,
        persist_tx: mpsc::UnboundedSender<Mutation>,
        minimap: Arc<Minimap>,
        captures: Arc<RecentCaptures>,
    ) -> Server {
        let (moves_tx, moves_rx) = mpsc::channel(MOVE_QUEUE_CAPACITY);
        let (subscriptions_tx, subscriptions_rx) = mpsc::channel(SUBSCRIPTION_QUEUE_CAPACITY);
        let (adoptions_tx, adoptions_rx) = mpsc::unbounded_channel();
        let (bulk_captures_tx, bulk_captures_rx) = mpsc::unbounded_channel();
        let (registrations_tx, registrations_rx) = mpsc::unbounded_channel();
        let (unregistrations_tx, unregistrations_rx) = mpsc::unbounded_channel();

        Server {
            board,
            registry: Arc::new(RwLock::new(ClientRegistry::new())),
            zone_tx,
            persist_tx,
            minimap,
            captures,
            handle: ServerHandle {
                moves: moves_tx,
                subscriptions: subscriptions_tx,
                adoptions: adoptions_tx,
                bulk_captures: bulk_captures_tx,
                registrations: registrations_tx,
                unregistrations: unregistrations_tx,
            },
            moves_rx,
            subscriptions_rx,
            adoptions_rx,
            bulk_captures_rx,
            registrations_rx,
            unregistrations_rx,
        }
    }

    pub fn handle(&self) -> ServerHandle {
        self.handle.clone()
    }

    pub fn registry(&self) -> Arc<RwLock<ClientRegistry>> {
        self.registry.clone()
    }

    /// Spawns the worker tasks and returns their handles.
    pub fn run(self) -> Vec<JoinHandle<()>> {
        let worker = MoveWorker {
            board: self.board.clone(),
            registry: self.registry.clone(),
            zone_tx: self.zone_tx.clone(),
            persist_tx: self.persist_tx,
            minimap: self.minimap,
            captures: self.captures,
            unregister_tx: self.handle.unregistrations.clone(),
        };

        vec![
            tokio::spawn(worker.run(
                self.moves_rx,
                self.adoptions_rx,
                self.bulk_captures_rx,
            )),
            tokio::spawn(run_subscriptions(
                self.board.clone(),
                self.zone_tx.clone(),
                self.handle.unregistrations.clone(),
                self.subscriptions_rx,
            )),
            tokio::spawn(run_registrations(
                self.board,
                self.registry.clone(),
                self.zone_tx.clone(),
                self.registrations_rx,
            )),
            tokio::spawn(run_unregistrations(
                self.registry,
                self.zone_tx,
                self.unregistrations_rx,
            )),
        ]
    }
}

/// The single writer of the board.
struct MoveWorker {
    board: Arc<RwLock<Board>>,
    registry: Arc<RwLock<ClientRegistry>>,
    zone_tx: mpsc::UnboundedSender<ZoneCommand>,
    persist_tx: mpsc::UnboundedSender<Mutation>,
    minimap: Arc<Minimap>,
    captures: Arc<RecentCaptures>,
    unregister_tx: mpsc::UnboundedSender<ClientId>,
}

fn wire_deltas(result: &MoveResult) -> (Vec<PieceMove>, Vec<PieceCapture>) {
    let moves = result
        .moved
        .iter()
        .map(|moved| {
            let piece = Piece::decode(moved.new_state);
            PieceMove {
                piece: MovedPieceWire {
                    id: moved.piece_id,
                    from_x: moved.from.0,
                    from_y: moved.from.1,
                    to_x: moved.to.0,
                    to_y: moved.to.1,
                    kind: piece.kind as u8,
                    is_white: piece.is_white,
                    move_state: piece.move_state(),
                },
                seqnum: result.seq_num,
            }
        })
        .collect();
    let captures = result
        .captured
        .iter()
        .map(|captured| PieceCapture {
            captured_piece_id: captured.piece_id,
            seqnum: result.seq_num,
        })
        .collect();
    (moves, captures)
}

fn sub_board_span(board_x: u16, board_y: u16) -> ((u16, u16), (u16, u16)) {
    let x0 = board_x * SUB_BOARD_SIZE;
    let y0 = board_y * SUB_BOARD_SIZE;
    ((x0, y0), (x0 + SUB_BOARD_SIZE - 1, y0 + SUB_BOARD_SIZE - 1))
}

impl MoveWorker {
    async fn run(
        self,
        mut moves: mpsc::Receiver<MoveCommand>,
        mut adoptions: mpsc::UnboundedReceiver<AdoptionRequest>,
        mut bulk_captures: mpsc::UnboundedReceiver<BulkCaptureRequest>,
    ) {
        loop {
            tokio::select! {
                command = moves.recv() => {
                    let Some(command) = command else { break };
                    self.handle_move(command).await;
                }
                request = adoptions.recv() => {
                    let Some(request) = request else { break };
                    self.handle_adoption(request).await;
                }
                request = bulk_captures.recv() => {
                    let Some(request) = request else { break };
                    self.handle_bulk_capture(request).await;
                }
            }
        }
        info!("move-apply worker stopping");
    }

    async fn handle_move(&self, command: MoveCommand) {
        let result = {
            let mut board = self.board.write().await;
            board.validate_and_apply_move(&command.request)
        };

        if !result.valid {
            // Only the offender learns about a rejection.
            if !command.client.queue_frame(ServerFrame::Error {
                message: "invalid move".to_string(),
                code: 422,
            }) {
                let _ = self.unregister_tx.send(command.client.id);
            }
            return;
        }

        let _ = self.persist_tx.send(Mutation::Move(command.request.clone()));
        self.publish(
            &result,
            (command.request.from_x, command.request.from_y),
            (command.request.to_x, command.request.to_y),
        )
        .await;
    }

    async fn handle_adoption(&self, request: AdoptionRequest) {
        let result = {
            let mut board = self.board.write().await;
            board.adopt(&request)
        };
        if !result.valid {
            warn!(
                "adoption of sub-board ({},{}) rejected",
                request.board_x, request.board_y
            );
            return;
        }
        let (low, high) = sub_board_span(request.board_x, request.board_y);
        let _ = self.persist_tx.send(Mutation::Adopt(request));
        self.publish(&result, low, high).await;
    }

    async fn handle_bulk_capture(&self, request: BulkCaptureRequest) {
        let result = {
            let mut board = self.board.write().await;
            board.do_bulk_capture(&request)
        };
        if !result.valid {
            warn!(
                "bulk capture of sub-board ({},{}) rejected",
                request.board_x, request.board_y
            );
            return;
        }
        let (low, high) = sub_board_span(request.board_x, request.board_y);
        let _ = self.persist_tx.send(Mutation::BulkCapture(request));
        self.publish(&result, low, high).await;
    }

    /// Feeds one accepted result to the aggregators and fans the deltas out
    /// to every client whose zone set touches the mutation span.
    async fn publish(&self, result: &MoveResult, span_low: (u16, u16), span_high: (u16, u16)) {
        self.minimap.apply(result);
        for captured in &result.captured {
            self.captures
                .record(captured.x, captured.y, captured.was_white);
        }

        let touched = zones::zones_for_span(span_low, span_high);
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .zone_tx
            .send(ZoneCommand::Query {
                zones: touched,
                reply: reply_tx,
            })
            .is_err()
        {
            return;
        }
        let Ok(interested) = reply_rx.await else {
            return;
        };

        let (moves, captures) = wire_deltas(result);
        let registry = self.registry.read().await;
        for client_id in interested {
            let Some(client) = registry.get(client_id) else {
                continue;
            };
            if client.is_closed() {
                continue;
            }
            let mut must_flush = false;
            for piece_move in &moves {
                must_flush |= client.push_move(*piece_move);
            }
            for capture in &captures {
                client.push_capture(*capture);
            }
            if must_flush && !client.flush_updates() {
                debug!("client {}: buffer overflow during fan-out", client_id);
                let _ = self.unregister_tx.send(client_id);
            }
        }
    }
}

/// Applies viewport retargets: zone re-registration plus a fresh snapshot.
async fn run_subscriptions(
    board: Arc<RwLock<Board>>,
    zone_tx: mpsc::UnboundedSender<ZoneCommand>,
    unregister_tx: mpsc::UnboundedSender<ClientId>,
    mut subscriptions: mpsc::Receiver<SubscriptionRequest>,
) {
    while let Some(request) = subscriptions.recv().await {
        let client = request.client;
        if client.is_closed() {
            continue;
        }
        client.set_position(request.center_x, request.center_y);
        let _ = zone_tx.send(ZoneCommand::Update {
            client: client.id,
            x: request.center_x,
            y: request.center_y,
        });
        client.mark_zoned();

        let snapshot = board
            .read()
            .await
            .state_for_position(request.center_x, request.center_y);
        if !client.queue_frame(ServerFrame::StateSnapshot(snapshot.into_payload())) {
            let _ = unregister_tx.send(client.id);
        }
    }
}

/// Admits connections: minority color, random spawn position, zone
/// registration, initial state frame.
async fn run_registrations(
    board: Arc<RwLock<Board>>,
    registry: Arc<RwLock<ClientRegistry>>,
    zone_tx: mpsc::UnboundedSender<ZoneCommand>,
    mut registrations: mpsc::UnboundedReceiver<RegisterRequest>,
) {
    while let Some(request) = registrations.recv().await {
        let (x, y) = {
            let mut rng = rand::thread_rng();
            (rng.gen_range(0..BOARD_SIZE), rng.gen_range(0..BOARD_SIZE))
        };

        let client = {
            let mut registry = registry.write().await;
            let plays_white = registry.next_color();
            let id = registry.mint_id();
            let client = Arc::new(Client::new(id, plays_white, (x, y), request.outbound));
            registry.add(client.clone());
            client
        };

        let _ = zone_tx.send(ZoneCommand::Update {
            client: client.id,
            x,
            y,
        });
        client.mark_zoned();

        let snapshot = board.read().await.state_for_position(x, y);
        let seq_num = snapshot.ending_seq_num;
        client.queue_frame(ServerFrame::InitialState {
            playing_white: client.plays_white,
            position: Position { x, y },
            snapshot: snapshot.into_payload(),
            seq_num,
        });
        info!(
            "client {} registered as {} at ({},{})",
            client.id,
            if client.plays_white { "white" } else { "black" },
            x,
            y
        );
        let _ = request.reply.send(client);
    }
}

/// Tears a client down exactly once: registry, zone map, close signal.
async fn run_unregistrations(
    registry: Arc<RwLock<ClientRegistry>>,
    zone_tx: mpsc::UnboundedSender<ZoneCommand>,
    mut unregistrations: mpsc::UnboundedReceiver<ClientId>,
) {
    while let Some(client_id) = unregistrations.recv().await {
        let removed = registry.write().await.remove(client_id);
        let Some(client) = removed else {
            continue;
        };
        let _ = zone_tx.send(ZoneCommand::Remove { client: client_id });
        client.close();
        info!("client {} unregistered", client_id);
    }
}
