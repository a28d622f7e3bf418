//! Types and constants shared between the chess world server and its clients.
//!
//! The world is a single 8000x8000 board tiled by one million standard 8x8
//! chess sub-boards. This crate carries the world geometry constants, the
//! bit-packed piece codec and the JSON wire protocol so that the server and
//! any client binary agree on them by construction.

pub mod piece;
pub mod protocol;

/// Width and height of the world in cells.
pub const BOARD_SIZE: u16 = 8000;

/// Side length of one standard chess sub-board.
pub const SUB_BOARD_SIZE: u16 = 8;

/// Side length of one interest-management zone in cells.
pub const ZONE_SIZE: u16 = 50;

/// Number of zones per axis (`BOARD_SIZE / ZONE_SIZE`).
pub const ZONE_COUNT: usize = 160;

/// Half-width of the square viewport window sent in state snapshots.
pub const VIEW_RADIUS: u16 = 47;

/// Maximum Chebyshev distance of a single move. Bounds validation cost.
pub const MAX_MOVE_DISTANCE: u16 = 36;

/// Minimap cells per axis; one cell aggregates a 40x40 region of the world.
pub const MINIMAP_GRID: usize = 200;

/// World cells covered by one minimap cell, per axis.
pub const MINIMAP_CELL: u16 = 40;

/// Maximum accepted size of one inbound frame.
pub const MAX_FRAME_BYTES: usize = 8 * 1024;

/// Magic prefix of a zstd-compressed binary frame.
pub const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];
