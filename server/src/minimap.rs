//! 200x200 minimap aggregation and the compressed overview blob.
//!
//! The grid counts live pieces per color per 40x40 region and is maintained
//! incrementally from accepted mutation results; a full board scan happens
//! only at startup. Every 10 seconds the grid is packed into one byte per
//! cell, wrapped in a JSON envelope and zstd-compressed; the resulting blob
//! is shared by reference so the HTTP handler never copies it.

use crate::board::{Board, MoveResult};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use log::{debug, error};
use serde_json::json;
use shared::piece::Piece;
use shared::{MINIMAP_CELL, MINIMAP_GRID};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};

/// Blob refresh cadence.
pub const MINIMAP_INTERVAL: Duration = Duration::from_secs(10);

/// zstd level for the overview blob; speed over ratio.
const BLOB_COMPRESSION_LEVEL: i32 = 1;

#[derive(Debug, Clone, Copy, Default)]
pub struct CellCounts {
    pub white: u32,
    pub black: u32,
}

impl CellCounts {
    fn bump(&mut self, is_white: bool, delta: i64) {
        let counter = if is_white {
            &mut self.white
        } else {
            &mut self.black
        };
        *counter = (*counter as i64 + delta).max(0) as u32;
    }

    /// Packs the cell into one byte: dominance level in the low bits, the
    /// leading color in bit 3.
    fn pack(self) -> u8 {
        let total = self.white as u64 + self.black as u64;
        if total == 0 {
            return 0;
        }
        let diff = (self.white as i64 - self.black as i64).unsigned_abs();
        let share = diff as f64 / total as f64;
        let level: u8 = if share > 0.30 && diff > 50 {
            3
        } else if share > 0.15 && diff > 25 {
            2
        } else if share > 0.03 && diff > 2 {
            1
        } else {
            0
        };
        let white_ahead = (self.white >= self.black) as u8;
        level | (white_ahead << 3)
    }
}

/// Shared minimap state: the live count grid and the last packed blob.
pub struct Minimap {
    grid: Mutex<Vec<CellCounts>>,
    blob: RwLock<Arc<Vec<u8>>>,
}

fn cell_index(x: u16, y: u16) -> usize {
    (y / MINIMAP_CELL) as usize * MINIMAP_GRID + (x / MINIMAP_CELL) as usize
}

impl Minimap {
    pub fn new() -> Minimap {
        Minimap {
            grid: Mutex::new(vec![CellCounts::default(); MINIMAP_GRID * MINIMAP_GRID]),
            blob: RwLock::new(Arc::new(Vec::new())),
        }
    }

    /// Rebuilds the grid from a full board scan. Startup only.
    pub fn scan_board(&self, board: &Board) {
        let mut fresh = vec![CellCounts::default(); MINIMAP_GRID * MINIMAP_GRID];
        board.each_piece(|x, y, piece| {
            fresh[cell_index(x, y)].bump(piece.is_white, 1);
        });
        *self.grid.lock().unwrap() = fresh;
    }

    /// Applies one accepted mutation result. Placements arrive with
    /// `from == to` and only increment; cross-cell moves shift a count;
    /// captures decrement.
    pub fn apply(&self, result: &MoveResult) {
        if !result.valid {
            return;
        }
        let mut grid = self.grid.lock().unwrap();
        for moved in &result.moved {
            let is_white = Piece::decode(moved.new_state).is_white;
            let to = cell_index(moved.to.0, moved.to.1);
            if moved.from == moved.to {
                grid[to].bump(is_white, 1);
                continue;
            }
            let from = cell_index(moved.from.0, moved.from.1);
            if from != to {
                grid[from].bump(is_white, -1);
                grid[to].bump(is_white, 1);
            }
        }
        for captured in &result.captured {
            grid[cell_index(captured.x, captured.y)].bump(captured.was_white, -1);
        }
    }

    /// One packed byte per cell, row-major.
    pub fn pack(&self) -> Vec<u8> {
        self.grid.lock().unwrap().iter().map(|cell| cell.pack()).collect()
    }

    /// Re-packs the grid into the compressed JSON envelope and swaps the
    /// shared blob. A compression failure keeps the previous blob.
    pub fn refresh_blob(&self) {
        let packed = self.pack();
        let envelope = json!({
            "type": "minimapUpdate",
            "gridSize": MINIMAP_GRID,
            "cells": BASE64.encode(&packed),
        });
        let body = envelope.to_string();
        match zstd::encode_all(body.as_bytes(), BLOB_COMPRESSION_LEVEL) {
            Ok(compressed) => {
                debug!(
                    "minimap blob refreshed: {} bytes compressed from {}",
                    compressed.len(),
                    body.len()
                );
                *self.blob.write().unwrap() = Arc::new(compressed);
            }
            Err(err) => error!("minimap blob compression failed: {}", err),
        }
    }

    /// The last packed blob, shared by reference.
    pub fn blob(&self) -> Arc<Vec<u8>> {
        self.blob.read().unwrap().clone()
    }
}

impl Default for Minimap {
    fn default() -> Minimap {
        Minimap::new()
    }
}

/// Refreshes the shared blob every [`MINIMAP_INTERVAL`].
pub async fn run_scheduler(minimap: Arc<Minimap>) {
    let mut ticker = interval(MINIMAP_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        minimap.refresh_blob();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::{AdoptionRequest, ColorFilter, MoveRequest, MoveType};
    use shared::ZSTD_MAGIC;

    fn counts_at(minimap: &Minimap, x: u16, y: u16) -> (u32, u32) {
        let grid = minimap.grid.lock().unwrap();
        let cell = grid[cell_index(x, y)];
        (cell.white, cell.black)
    }

    #[test]
    fn test_cell_index_layout() {
        assert_eq!(cell_index(0, 0), 0);
        assert_eq!(cell_index(39, 39), 0);
        assert_eq!(cell_index(40, 0), 1);
        assert_eq!(cell_index(0, 40), MINIMAP_GRID);
        assert_eq!(cell_index(7999, 7999), MINIMAP_GRID * MINIMAP_GRID - 1);
    }

    #[test]
    fn test_scan_counts_colors() {
        let mut board = Board::new();
        board.adopt(&AdoptionRequest {
            board_x: 0,
            board_y: 0,
            filter: ColorFilter::Both,
        });
        let minimap = Minimap::new();
        minimap.scan_board(&board);
        assert_eq!(counts_at(&minimap, 0, 0), (16, 16));
    }

    #[test]
    fn test_apply_tracks_moves_and_captures() {
        let mut board = Board::new();
        let minimap = Minimap::new();
        // Placement deltas carry from == to.
        let adoption = board.adopt(&AdoptionRequest {
            board_x: 0,
            board_y: 0,
            filter: ColorFilter::Both,
        });
        minimap.apply(&adoption);
        assert_eq!(counts_at(&minimap, 0, 0), (16, 16));

        let pawn = board.piece_at(0, 6);
        let result = board.validate_and_apply_move(&MoveRequest {
            piece_id: pawn.id,
            from_x: 0,
            from_y: 6,
            to_x: 0,
            to_y: 4,
            move_type: MoveType::Normal,
            move_token: 0,
            client_is_white: true,
        });
        assert!(result.valid);
        minimap.apply(&result);
        // Same minimap cell, counts unchanged.
        assert_eq!(counts_at(&minimap, 0, 0), (16, 16));

        // A bulk capture empties one color.
        let capture = board.do_bulk_capture(&crate::board::BulkCaptureRequest {
            board_x: 0,
            board_y: 0,
            filter: ColorFilter::OnlyBlack,
        });
        minimap.apply(&capture);
        assert_eq!(counts_at(&minimap, 0, 0), (16, 0));
    }

    #[test]
    fn test_cross_cell_move_shifts_count() {
        let minimap = Minimap::new();
        minimap.grid.lock().unwrap()[cell_index(39, 0)].white = 1;
        let result = MoveResult {
            valid: true,
            moved: vec![crate::board::MovedPiece {
                piece_id: 1,
                from: (39, 0),
                to: (41, 0),
                new_state: Piece {
                    id: 1,
                    is_white: true,
                    ..Piece::default()
                }
                .encode(),
            }],
            captured: Vec::new(),
            seq_num: 1,
        };
        minimap.apply(&result);
        assert_eq!(counts_at(&minimap, 39, 0), (0, 0));
        assert_eq!(counts_at(&minimap, 41, 0), (1, 0));
    }

    #[test]
    fn test_pack_levels() {
        assert_eq!(CellCounts { white: 0, black: 0 }.pack(), 0);
        // Balanced cell: level 0, white-ahead bit set on ties.
        assert_eq!(CellCounts { white: 16, black: 16 }.pack(), 0b1000);
        // Slight white lead.
        assert_eq!(CellCounts { white: 20, black: 16 }.pack(), 0b1001);
        // Strong black dominance.
        assert_eq!(CellCounts { white: 2, black: 120 }.pack(), 0b0011);
        // Large absolute lead diluted by many pieces: lowest level.
        assert_eq!(CellCounts { white: 130, black: 100 }.pack(), 0b1001);
    }

    #[test]
    fn test_blob_is_zstd_compressed_envelope() {
        let minimap = Minimap::new();
        assert!(minimap.blob().is_empty());
        minimap.refresh_blob();

        let blob = minimap.blob();
        assert_eq!(&blob[..4], &ZSTD_MAGIC);

        let body = zstd::decode_all(&blob[..]).unwrap();
        let envelope: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(envelope["type"], "minimapUpdate");
        assert_eq!(envelope["gridSize"], MINIMAP_GRID);
        let cells = BASE64
            .decode(envelope["cells"].as_str().unwrap())
            .unwrap();
        assert_eq!(cells.len(), MINIMAP_GRID * MINIMAP_GRID);
    }
}
