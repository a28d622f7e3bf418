//! Per-piece move geometry.
//!
//! Every predicate is a pure function of the board and the request; the
//! board applies the returned plan. Only geometric legality and local
//! capture rules are enforced here; check, checkmate and friends are
//! deliberately not part of this world.

use crate::board::{Board, MoveRequest, MoveType};
use shared::piece::{Piece, PieceKind};
use shared::SUB_BOARD_SIZE;

/// Rook displacement that accompanies a castle.
#[derive(Debug, Clone, Copy)]
pub struct RookMove {
    pub from: (u16, u16),
    pub to: (u16, u16),
}

/// What applying a legal move entails beyond relocating the mover.
#[derive(Debug, Clone, Copy, Default)]
pub struct MovePlan {
    /// Square whose occupant is captured. For en passant this differs from
    /// the destination.
    pub capture: Option<(u16, u16)>,
    /// Co-moving rook, castle only.
    pub rook: Option<RookMove>,
    /// The mover is a pawn that advanced two squares.
    pub sets_double_moved: bool,
    /// The mover is a pawn reaching its last rank.
    pub promotes: bool,
}

pub fn chebyshev(a: (u16, u16), b: (u16, u16)) -> u16 {
    let dx = (a.0 as i32 - b.0 as i32).unsigned_abs();
    let dy = (a.1 as i32 - b.1 as i32).unsigned_abs();
    dx.max(dy) as u16
}

/// Validates the geometry of a move whose bounds, distance, piece id and
/// color ownership have already been checked.
pub fn plan_move(board: &Board, piece: Piece, request: &MoveRequest) -> Result<MovePlan, &'static str> {
    match request.move_type {
        MoveType::Castle => {
            if piece.kind != PieceKind::King {
                return Err("only kings castle");
            }
            plan_castle(board, piece, request)
        }
        MoveType::EnPassant => {
            if piece.kind != PieceKind::Pawn {
                return Err("only pawns capture en passant");
            }
            plan_en_passant(board, piece, request)
        }
        MoveType::Normal | MoveType::Promotion => match piece.kind {
            PieceKind::Pawn => plan_pawn(board, piece, request),
            PieceKind::Knight => plan_knight(board, piece, request),
            PieceKind::Bishop => plan_slider(board, piece, request, false, true),
            PieceKind::Rook => plan_slider(board, piece, request, true, false),
            PieceKind::Queen | PieceKind::PromotedPawn => {
                plan_slider(board, piece, request, true, true)
            }
            PieceKind::King => plan_king(board, piece, request),
        },
    }
}

fn deltas(request: &MoveRequest) -> (i32, i32) {
    (
        request.to_x as i32 - request.from_x as i32,
        request.to_y as i32 - request.from_y as i32,
    )
}

/// Empty or enemy; same-color destinations are illegal. Returns the capture
/// square when the destination holds an enemy.
fn destination_policy(
    board: &Board,
    piece: Piece,
    request: &MoveRequest,
) -> Result<Option<(u16, u16)>, &'static str> {
    let occupant = board.piece_at(request.to_x, request.to_y);
    if occupant.is_empty() {
        Ok(None)
    } else if occupant.is_white == piece.is_white {
        Err("destination holds a friendly piece")
    } else {
        Ok(Some((request.to_x, request.to_y)))
    }
}

/// True when every square strictly between the endpoints of a straight or
/// diagonal ray is empty.
fn path_clear(board: &Board, from: (u16, u16), to: (u16, u16)) -> bool {
    let step_x = (to.0 as i32 - from.0 as i32).signum();
    let step_y = (to.1 as i32 - from.1 as i32).signum();
    let mut x = from.0 as i32 + step_x;
    let mut y = from.1 as i32 + step_y;
    while (x, y) != (to.0 as i32, to.1 as i32) {
        if !board.piece_at(x as u16, y as u16).is_empty() {
            return false;
        }
        x += step_x;
        y += step_y;
    }
    true
}

fn plan_pawn(board: &Board, piece: Piece, request: &MoveRequest) -> Result<MovePlan, &'static str> {
    let (dx, dy) = deltas(request);
    // White advances toward smaller y.
    let dir: i32 = if piece.is_white { -1 } else { 1 };
    let local_from_rank = request.from_y % SUB_BOARD_SIZE;
    let home_rank = if piece.is_white { 6 } else { 1 };
    let last_rank = if piece.is_white { 0 } else { 7 };

    let promotes = request.to_y % SUB_BOARD_SIZE == last_rank;
    if request.move_type == MoveType::Promotion && !promotes {
        return Err("promotion without reaching the last rank");
    }

    let mut plan = MovePlan {
        promotes,
        ..MovePlan::default()
    };

    if dx == 0 && dy == dir {
        if board.piece_at(request.to_x, request.to_y).is_empty() {
            Ok(plan)
        } else {
            Err("pawn advance is blocked")
        }
    } else if dx == 0 && dy == 2 * dir {
        if local_from_rank != home_rank {
            return Err("double move off the home rank");
        }
        let mid_y = (request.from_y as i32 + dir) as u16;
        if !board.piece_at(request.from_x, mid_y).is_empty()
            || !board.piece_at(request.to_x, request.to_y).is_empty()
        {
            return Err("double move is blocked");
        }
        plan.sets_double_moved = true;
        Ok(plan)
    } else if dx.abs() == 1 && dy == dir {
        let occupant = board.piece_at(request.to_x, request.to_y);
        if occupant.is_empty() {
            Err("pawn captures diagonally only onto an enemy")
        } else if occupant.is_white == piece.is_white {
            Err("destination holds a friendly piece")
        } else {
            plan.capture = Some((request.to_x, request.to_y));
            Ok(plan)
        }
    } else {
        Err("pawn geometry")
    }
}

fn plan_en_passant(
    board: &Board,
    piece: Piece,
    request: &MoveRequest,
) -> Result<MovePlan, &'static str> {
    let (dx, dy) = deltas(request);
    let dir: i32 = if piece.is_white { -1 } else { 1 };
    if dx.abs() != 1 || dy != dir {
        return Err("en passant geometry");
    }
    if !board.piece_at(request.to_x, request.to_y).is_empty() {
        return Err("en passant destination is occupied");
    }
    // The victim sits on the destination file, beside the mover.
    let victim = board.piece_at(request.to_x, request.from_y);
    if victim.is_empty() || victim.kind != PieceKind::Pawn || victim.is_white == piece.is_white {
        return Err("no enemy pawn to capture en passant");
    }
    if !victim.just_double_moved {
        return Err("victim did not just double-move");
    }
    Ok(MovePlan {
        capture: Some((request.to_x, request.from_y)),
        ..MovePlan::default()
    })
}

fn plan_knight(board: &Board, piece: Piece, request: &MoveRequest) -> Result<MovePlan, &'static str> {
    let (dx, dy) = deltas(request);
    let shape = (dx.abs().min(dy.abs()), dx.abs().max(dy.abs()));
    if shape != (1, 2) {
        return Err("knight geometry");
    }
    Ok(MovePlan {
        capture: destination_policy(board, piece, request)?,
        ..MovePlan::default()
    })
}

fn plan_king(board: &Board, piece: Piece, request: &MoveRequest) -> Result<MovePlan, &'static str> {
    let (dx, dy) = deltas(request);
    if dx.abs() > 1 || dy.abs() > 1 {
        return Err("king geometry");
    }
    Ok(MovePlan {
        capture: destination_policy(board, piece, request)?,
        ..MovePlan::default()
    })
}

fn plan_slider(
    board: &Board,
    piece: Piece,
    request: &MoveRequest,
    straight: bool,
    diagonal: bool,
) -> Result<MovePlan, &'static str> {
    let (dx, dy) = deltas(request);
    let is_straight = dx == 0 || dy == 0;
    let is_diagonal = dx.abs() == dy.abs();
    if !(straight && is_straight || diagonal && is_diagonal) {
        return Err("slider geometry");
    }
    if !path_clear(
        board,
        (request.from_x, request.from_y),
        (request.to_x, request.to_y),
    ) {
        return Err("path is not empty");
    }
    Ok(MovePlan {
        capture: destination_policy(board, piece, request)?,
        ..MovePlan::default()
    })
}

/// Castling: the king shifts two squares along its back rank and the
/// corner rook of that wing jumps over it. Both must be unmoved and the
/// squares between them empty. Moving through attacked squares is not
/// checked; full chess legality is out of scope here.
fn plan_castle(board: &Board, piece: Piece, request: &MoveRequest) -> Result<MovePlan, &'static str> {
    if piece.move_count != 0 {
        return Err("king has moved");
    }
    let (dx, dy) = deltas(request);
    if dy != 0 || dx.abs() != 2 {
        return Err("castle geometry");
    }
    // The rook sits on the corner of the king's own sub-board.
    let sub_origin_x = request.from_x / SUB_BOARD_SIZE * SUB_BOARD_SIZE;
    if request.to_x / SUB_BOARD_SIZE != request.from_x / SUB_BOARD_SIZE {
        return Err("castle leaves the sub-board");
    }
    let rook_x = if dx > 0 {
        sub_origin_x + SUB_BOARD_SIZE - 1
    } else {
        sub_origin_x
    };
    let rook = board.piece_at(rook_x, request.from_y);
    if rook.is_empty()
        || rook.kind != PieceKind::Rook
        || rook.is_white != piece.is_white
        || rook.move_count != 0
    {
        return Err("no unmoved rook on that wing");
    }
    if !path_clear(board, (request.from_x, request.from_y), (rook_x, request.from_y)) {
        return Err("castle path is not empty");
    }
    let rook_to_x = (request.from_x + request.to_x) / 2;
    Ok(MovePlan {
        rook: Some(RookMove {
            from: (rook_x, request.from_y),
            to: (rook_to_x, request.from_y),
        }),
        ..MovePlan::default()
    })
}
