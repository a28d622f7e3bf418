//! JSON wire protocol.
//!
//! All control frames are internally tagged with a `"type"` field and use
//! camelCase keys. Binary frames are reserved for zstd envelopes and carry
//! the magic prefix in [`crate::ZSTD_MAGIC`].

use serde::{Deserialize, Serialize};

/// Frames a client may send.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type")]
pub enum ClientFrame {
    #[serde(rename = "move", rename_all = "camelCase")]
    Move {
        piece_id: u32,
        from_x: u16,
        from_y: u16,
        to_x: u16,
        to_y: u16,
        move_type: u8,
        move_token: u32,
    },
    #[serde(rename = "subscribe", rename_all = "camelCase")]
    Subscribe { center_x: u16, center_y: u16 },
    #[serde(rename = "requestSnapshot")]
    RequestSnapshot,
    #[serde(rename = "app-ping")]
    AppPing,
}

/// Frames the server sends.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ServerFrame {
    #[serde(rename = "initialState", rename_all = "camelCase")]
    InitialState {
        playing_white: bool,
        position: Position,
        snapshot: SnapshotPayload,
        seq_num: u64,
    },
    #[serde(rename = "stateSnapshot")]
    StateSnapshot(SnapshotPayload),
    #[serde(rename = "moveUpdates")]
    MoveUpdates {
        moves: Vec<PieceMove>,
        captures: Vec<PieceCapture>,
    },
    #[serde(rename = "app-pong")]
    AppPong { time: u64 },
    #[serde(rename = "error")]
    Error { message: String, code: u16 },
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct Position {
    pub x: u16,
    pub y: u16,
}

/// A viewport snapshot. `ending_seq_num` lets the client drop any later
/// delta whose seqnum the snapshot already incorporates.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotPayload {
    pub pieces: Vec<WirePiece>,
    pub area_min_x: u16,
    pub area_min_y: u16,
    pub area_max_x: u16,
    pub area_max_y: u16,
    pub starting_seq_num: u64,
    pub ending_seq_num: u64,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WirePiece {
    pub id: u32,
    pub x: u16,
    pub y: u16,
    #[serde(rename = "type")]
    pub kind: u8,
    pub is_white: bool,
    pub move_state: u16,
}

/// One applied piece movement. A castle yields two of these with the same
/// seqnum.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PieceMove {
    pub piece: MovedPieceWire,
    pub seqnum: u64,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MovedPieceWire {
    pub id: u32,
    pub from_x: u16,
    pub from_y: u16,
    pub to_x: u16,
    pub to_y: u16,
    #[serde(rename = "type")]
    pub kind: u8,
    pub is_white: bool,
    pub move_state: u16,
}

/// A capture notification. Captures carry no position because a piece cannot
/// be uncaptured; the id plus seqnum is enough for the client to remove it.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PieceCapture {
    pub captured_piece_id: u32,
    pub seqnum: u64,
}
