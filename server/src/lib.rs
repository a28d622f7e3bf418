//! # Chess World Server Library
//!
//! Authoritative server core for a massively multiplayer real-time chess
//! world: a single 8000x8000 board tiled by one million standard 8x8
//! sub-boards, with tens of thousands of clients each viewing a small
//! window of it and moving pieces of their assigned color.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Board
//! The server owns the only writable copy of the world. Every move is
//! validated and applied by a single move-apply worker holding the board's
//! write lock, so mutations are linearised and each one is uniquely tagged
//! by a monotonically increasing sequence number.
//!
//! ### Interest Management
//! A zone map buckets the world into 50x50 tiles and tracks which clients
//! watch which tiles. A move touches at most two zones, so fan-out walks
//! the union of two client sets instead of the whole connection table.
//!
//! ### Client Pipelines
//! Each connection runs one reader, one writer, a 150 ms batch flusher and
//! a 2 s viewport ticker. Backpressure is handled by disconnecting: a full
//! outbound queue unregisters the client rather than blocking fan-out.
//!
//! ### Persistence
//! A shadow board applies the same mutation stream as the live board and is
//! periodically written to disk as an atomic snapshot image. On restart the
//! newest snapshot is reloaded; a shadow rejection is a fatal consistency
//! bug.
//!
//! ## Module Organization
//!
//! - [`board`]: bit-packed grid, move application, adoptions, bulk
//!   captures, viewport snapshots.
//! - [`rules`]: pure per-piece-kind move geometry and path scanning.
//! - [`zones`]: the zone interest map worker and its channel protocol.
//! - [`registry`]: connected-client table and balanced color assignment.
//! - [`client`]: per-client state, outbound queue, buffers and tickers.
//! - [`server`]: the orchestrator: move-apply, subscription, registration
//!   and unregistration workers.
//! - [`persistence`]: shadow board, snapshot codec, atomic file writes.
//! - [`minimap`]: 200x200 color-density aggregation and the compressed
//!   overview blob.
//! - [`captures`]: time-windowed ring of recent capture positions.
//! - [`net`]: axum router, websocket reader/writer tasks, HTTP endpoints.

pub mod board;
pub mod captures;
pub mod client;
pub mod minimap;
pub mod net;
pub mod persistence;
pub mod registry;
pub mod rules;
pub mod server;
pub mod zones;
