//! The authoritative board: an 8000x8000 grid of bit-packed cell words.
//!
//! All mutations funnel through the server's single move-apply worker, so
//! the board itself is plain data behind one reader-writer lock. The write
//! path never contends with another writer; readers (viewport snapshots,
//! the minimap's initial scan) block it only briefly.

use crate::rules;
use log::debug;
use shared::piece::{Piece, PieceKind};
use shared::protocol::{SnapshotPayload, WirePiece};
use shared::{BOARD_SIZE, MAX_MOVE_DISTANCE, SUB_BOARD_SIZE, VIEW_RADIUS};

/// Back-rank arrangement of a standard sub-board, king on file 4.
const BACK_RANK: [PieceKind; 8] = [
    PieceKind::Rook,
    PieceKind::Knight,
    PieceKind::Bishop,
    PieceKind::Queen,
    PieceKind::King,
    PieceKind::Bishop,
    PieceKind::Knight,
    PieceKind::Rook,
];

/// Special-move selector carried in a move request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveType {
    Normal,
    Castle,
    EnPassant,
    Promotion,
}

impl MoveType {
    pub fn from_wire(value: u8) -> Option<MoveType> {
        match value {
            0 => Some(MoveType::Normal),
            1 => Some(MoveType::Castle),
            2 => Some(MoveType::EnPassant),
            3 => Some(MoveType::Promotion),
            _ => None,
        }
    }
}

/// A validated-on-entry move request from one client.
#[derive(Debug, Clone)]
pub struct MoveRequest {
    pub piece_id: u32,
    pub from_x: u16,
    pub from_y: u16,
    pub to_x: u16,
    pub to_y: u16,
    pub move_type: MoveType,
    pub move_token: u32,
    pub client_is_white: bool,
}

/// Color filter for adoptions and bulk captures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorFilter {
    Both,
    OnlyWhite,
    OnlyBlack,
}

impl ColorFilter {
    pub fn matches(self, is_white: bool) -> bool {
        match self {
            ColorFilter::Both => true,
            ColorFilter::OnlyWhite => is_white,
            ColorFilter::OnlyBlack => !is_white,
        }
    }
}

/// Clears one sub-board (subject to the filter) and re-seats the standard
/// initial arrangement with freshly minted piece ids.
#[derive(Debug, Clone)]
pub struct AdoptionRequest {
    pub board_x: u16,
    pub board_y: u16,
    pub filter: ColorFilter,
}

/// Clears every filter-matching piece in one sub-board.
#[derive(Debug, Clone)]
pub struct BulkCaptureRequest {
    pub board_x: u16,
    pub board_y: u16,
    pub filter: ColorFilter,
}

/// One piece displaced (or freshly placed, when `from == to`) by a
/// mutation. `new_state` is the encoded cell word after the mutation.
#[derive(Debug, Clone, Copy)]
pub struct MovedPiece {
    pub piece_id: u32,
    pub from: (u16, u16),
    pub to: (u16, u16),
    pub new_state: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct CapturedPiece {
    pub piece_id: u32,
    pub x: u16,
    pub y: u16,
    pub was_white: bool,
    pub was_king: bool,
}

/// Outcome of one mutation. A rejected mutation carries no seqnum and must
/// never be fanned out.
#[derive(Debug, Clone)]
pub struct MoveResult {
    pub valid: bool,
    pub moved: Vec<MovedPiece>,
    pub captured: Vec<CapturedPiece>,
    pub seq_num: u64,
}

impl MoveResult {
    fn rejected() -> MoveResult {
        MoveResult {
            valid: false,
            moved: Vec::new(),
            captured: Vec::new(),
            seq_num: 0,
        }
    }
}

/// All non-empty pieces inside one viewport window, captured together with
/// the sequence number observed under the read lock.
#[derive(Debug, Clone)]
pub struct StateSnapshot {
    pub pieces: Vec<(u16, u16, Piece)>,
    pub area_min_x: u16,
    pub area_min_y: u16,
    pub area_max_x: u16,
    pub area_max_y: u16,
    pub starting_seq_num: u64,
    pub ending_seq_num: u64,
}

impl StateSnapshot {
    pub fn into_payload(self) -> SnapshotPayload {
        SnapshotPayload {
            pieces: self
                .pieces
                .into_iter()
                .map(|(x, y, piece)| WirePiece {
                    id: piece.id,
                    x,
                    y,
                    kind: piece.kind as u8,
                    is_white: piece.is_white,
                    move_state: piece.move_state(),
                })
                .collect(),
            area_min_x: self.area_min_x,
            area_min_y: self.area_min_y,
            area_max_x: self.area_max_x,
            area_max_y: self.area_max_y,
            starting_seq_num: self.starting_seq_num,
            ending_seq_num: self.ending_seq_num,
        }
    }
}

/// The world grid plus its id allocator, sequence number and counters.
///
/// `seq_num` advances exactly once per accepted mutation; counters stay
/// consistent with the mutation history because they are only touched on
/// the (single-writer) mutation path.
#[derive(Clone)]
pub struct Board {
    cells: Vec<u64>,
    pub next_id: u32,
    pub seq_num: u64,
    pub total_moves: u64,
    pub white_pieces_captured: u64,
    pub black_pieces_captured: u64,
    pub white_kings_captured: u64,
    pub black_kings_captured: u64,
}

impl Board {
    pub fn new() -> Board {
        Board {
            cells: vec![0; BOARD_SIZE as usize * BOARD_SIZE as usize],
            next_id: 1,
            seq_num: 0,
            total_moves: 0,
            white_pieces_captured: 0,
            black_pieces_captured: 0,
            white_kings_captured: 0,
            black_kings_captured: 0,
        }
    }

    pub fn in_bounds(x: u16, y: u16) -> bool {
        x < BOARD_SIZE && y < BOARD_SIZE
    }

    #[inline]
    fn index(x: u16, y: u16) -> usize {
        y as usize * BOARD_SIZE as usize + x as usize
    }

    /// Unpacked piece at a cell; a zeroed piece for empty or out-of-bounds.
    pub fn piece_at(&self, x: u16, y: u16) -> Piece {
        if !Self::in_bounds(x, y) {
            return Piece::default();
        }
        Piece::decode(self.cells[Self::index(x, y)])
    }

    /// `None` for empty or out-of-bounds cells.
    pub fn get_piece(&self, x: u16, y: u16) -> Option<Piece> {
        let piece = self.piece_at(x, y);
        if piece.is_empty() {
            None
        } else {
            Some(piece)
        }
    }

    fn set_cell(&mut self, x: u16, y: u16, word: u64) {
        self.cells[Self::index(x, y)] = word;
    }

    /// Raw cell write for snapshot restore. Bypasses validation; only the
    /// snapshot decoder may use it.
    pub(crate) fn restore_cell(&mut self, x: u16, y: u16, word: u64) {
        self.set_cell(x, y, word);
    }

    fn mint_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn record_capture(&mut self, victim: &Piece) {
        if victim.is_white {
            self.white_pieces_captured += 1;
            if victim.is_king() {
                self.white_kings_captured += 1;
            }
        } else {
            self.black_pieces_captured += 1;
            if victim.is_king() {
                self.black_kings_captured += 1;
            }
        }
    }

    /// Visits every non-empty cell in row-major order.
    pub fn each_piece(&self, mut visit: impl FnMut(u16, u16, Piece)) {
        for y in 0..BOARD_SIZE {
            let row = y as usize * BOARD_SIZE as usize;
            for x in 0..BOARD_SIZE {
                let word = self.cells[row + x as usize];
                if word != 0 {
                    visit(x, y, Piece::decode(word));
                }
            }
        }
    }

    /// The only mutation entry point for client moves. Must be called with
    /// the write lock held, from the single move-apply worker.
    pub fn validate_and_apply_move(&mut self, request: &MoveRequest) -> MoveResult {
        if !Self::in_bounds(request.from_x, request.from_y)
            || !Self::in_bounds(request.to_x, request.to_y)
        {
            return MoveResult::rejected();
        }

        let distance = rules::chebyshev(
            (request.from_x, request.from_y),
            (request.to_x, request.to_y),
        );
        if distance == 0 || distance > MAX_MOVE_DISTANCE {
            return MoveResult::rejected();
        }

        let piece = self.piece_at(request.from_x, request.from_y);
        if piece.is_empty() || piece.id != request.piece_id {
            return MoveResult::rejected();
        }
        if piece.is_white != request.client_is_white {
            return MoveResult::rejected();
        }

        let plan = match rules::plan_move(self, piece, request) {
            Ok(plan) => plan,
            Err(reason) => {
                debug!(
                    "rejected move of piece {} to ({},{}): {}",
                    piece.id, request.to_x, request.to_y, reason
                );
                return MoveResult::rejected();
            }
        };

        let mut moved = Vec::with_capacity(if plan.rook.is_some() { 2 } else { 1 });
        let mut captured = Vec::new();

        if let Some((cx, cy)) = plan.capture {
            let victim = self.piece_at(cx, cy);
            self.set_cell(cx, cy, 0);
            self.record_capture(&victim);
            captured.push(CapturedPiece {
                piece_id: victim.id,
                x: cx,
                y: cy,
                was_white: victim.is_white,
                was_king: victim.is_king(),
            });
        }

        let mut mover = piece;
        mover.increment_move_count();
        if !captured.is_empty() {
            mover.increment_capture_count();
        }
        // A pawn's double-move flag lives until its own next move.
        mover.just_double_moved = plan.sets_double_moved;
        if plan.promotes {
            mover.kind = PieceKind::PromotedPawn;
        }

        self.set_cell(request.from_x, request.from_y, 0);
        let word = mover.encode();
        self.set_cell(request.to_x, request.to_y, word);
        moved.push(MovedPiece {
            piece_id: mover.id,
            from: (request.from_x, request.from_y),
            to: (request.to_x, request.to_y),
            new_state: word,
        });

        if let Some(rook_move) = plan.rook {
            let mut rook = self.piece_at(rook_move.from.0, rook_move.from.1);
            rook.increment_move_count();
            self.set_cell(rook_move.from.0, rook_move.from.1, 0);
            let rook_word = rook.encode();
            self.set_cell(rook_move.to.0, rook_move.to.1, rook_word);
            moved.push(MovedPiece {
                piece_id: rook.id,
                from: rook_move.from,
                to: rook_move.to,
                new_state: rook_word,
            });
        }

        self.seq_num += 1;
        self.total_moves += 1;

        MoveResult {
            valid: true,
            moved,
            captured,
            seq_num: self.seq_num,
        }
    }

    fn sub_board_in_bounds(board_x: u16, board_y: u16) -> bool {
        board_x < BOARD_SIZE / SUB_BOARD_SIZE && board_y < BOARD_SIZE / SUB_BOARD_SIZE
    }

    /// Clears the sub-board (subject to the color filter) and seats a fresh
    /// initial arrangement for the filtered colors. Cleared pieces count as
    /// captures so the counters and fan-out stay consistent.
    pub fn adopt(&mut self, request: &AdoptionRequest) -> MoveResult {
        if !Self::sub_board_in_bounds(request.board_x, request.board_y) {
            return MoveResult::rejected();
        }
        let x0 = request.board_x * SUB_BOARD_SIZE;
        let y0 = request.board_y * SUB_BOARD_SIZE;

        let mut captured = Vec::new();
        self.clear_sub_board(x0, y0, request.filter, &mut captured);

        let mut moved = Vec::new();
        self.place_arrangement(x0, y0, request.filter, &mut moved);

        self.seq_num += 1;
        MoveResult {
            valid: true,
            moved,
            captured,
            seq_num: self.seq_num,
        }
    }

    /// Clears every filter-matching piece in the sub-board.
    pub fn do_bulk_capture(&mut self, request: &BulkCaptureRequest) -> MoveResult {
        if !Self::sub_board_in_bounds(request.board_x, request.board_y) {
            return MoveResult::rejected();
        }
        let x0 = request.board_x * SUB_BOARD_SIZE;
        let y0 = request.board_y * SUB_BOARD_SIZE;

        let mut captured = Vec::new();
        self.clear_sub_board(x0, y0, request.filter, &mut captured);

        self.seq_num += 1;
        MoveResult {
            valid: true,
            moved: Vec::new(),
            captured,
            seq_num: self.seq_num,
        }
    }

    fn clear_sub_board(
        &mut self,
        x0: u16,
        y0: u16,
        filter: ColorFilter,
        captured: &mut Vec<CapturedPiece>,
    ) {
        for y in y0..y0 + SUB_BOARD_SIZE {
            for x in x0..x0 + SUB_BOARD_SIZE {
                let piece = self.piece_at(x, y);
                if piece.is_empty() || !filter.matches(piece.is_white) {
                    continue;
                }
                self.set_cell(x, y, 0);
                self.record_capture(&piece);
                captured.push(CapturedPiece {
                    piece_id: piece.id,
                    x,
                    y,
                    was_white: piece.is_white,
                    was_king: piece.is_king(),
                });
            }
        }
    }

    /// Seats the standard arrangement for the filtered colors, skipping any
    /// cell still occupied (a filtered adoption never displaces the other
    /// color). Placed pieces are reported with `from == to`.
    fn place_arrangement(
        &mut self,
        x0: u16,
        y0: u16,
        filter: ColorFilter,
        moved: &mut Vec<MovedPiece>,
    ) {
        for file in 0..SUB_BOARD_SIZE {
            // Black occupies the two low-y ranks and advances toward
            // larger y; white mirrors that from the high-y ranks.
            let seats = [
                (x0 + file, y0, BACK_RANK[file as usize], false),
                (x0 + file, y0 + 1, PieceKind::Pawn, false),
                (x0 + file, y0 + SUB_BOARD_SIZE - 2, PieceKind::Pawn, true),
                (
                    x0 + file,
                    y0 + SUB_BOARD_SIZE - 1,
                    BACK_RANK[file as usize],
                    true,
                ),
            ];
            for (x, y, kind, is_white) in seats {
                if !filter.matches(is_white) || !self.piece_at(x, y).is_empty() {
                    continue;
                }
                let piece = Piece {
                    id: self.mint_id(),
                    kind,
                    is_white,
                    ..Piece::default()
                };
                let word = piece.encode();
                self.set_cell(x, y, word);
                moved.push(MovedPiece {
                    piece_id: piece.id,
                    from: (x, y),
                    to: (x, y),
                    new_state: word,
                });
            }
        }
    }

    /// Seats the initial arrangement on all one million sub-boards. Called
    /// once at cold start when no persisted snapshot exists.
    pub fn seed_initial_arrangements(&mut self) {
        let per_axis = BOARD_SIZE / SUB_BOARD_SIZE;
        let mut scratch = Vec::with_capacity(32);
        for board_y in 0..per_axis {
            for board_x in 0..per_axis {
                scratch.clear();
                self.place_arrangement(
                    board_x * SUB_BOARD_SIZE,
                    board_y * SUB_BOARD_SIZE,
                    ColorFilter::Both,
                    &mut scratch,
                );
            }
        }
    }

    /// All non-empty pieces within the viewport window around a position,
    /// clipped to the board. Both sequence numbers are read under the same
    /// lock as the cells so clients can order later deltas against them.
    pub fn state_for_position(&self, x: u16, y: u16) -> StateSnapshot {
        let min_x = x.saturating_sub(VIEW_RADIUS);
        let min_y = y.saturating_sub(VIEW_RADIUS);
        let max_x = (x + VIEW_RADIUS).min(BOARD_SIZE - 1);
        let max_y = (y + VIEW_RADIUS).min(BOARD_SIZE - 1);

        let mut pieces = Vec::new();
        for cy in min_y..=max_y {
            let row = cy as usize * BOARD_SIZE as usize;
            for cx in min_x..=max_x {
                let word = self.cells[row + cx as usize];
                if word != 0 {
                    pieces.push((cx, cy, Piece::decode(word)));
                }
            }
        }

        StateSnapshot {
            pieces,
            area_min_x: min_x,
            area_min_y: min_y,
            area_max_x: max_x,
            area_max_y: max_y,
            starting_seq_num: self.seq_num,
            ending_seq_num: self.seq_num,
        }
    }
}

impl Default for Board {
    fn default() -> Board {
        Board::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Seats a full sub-board and returns the board.
    fn board_with_sub_board(board_x: u16, board_y: u16) -> Board {
        let mut board = Board::new();
        let result = board.adopt(&AdoptionRequest {
            board_x,
            board_y,
            filter: ColorFilter::Both,
        });
        assert!(result.valid);
        board
    }

    fn move_request(board: &Board, from: (u16, u16), to: (u16, u16)) -> MoveRequest {
        typed_move_request(board, from, to, MoveType::Normal)
    }

    fn typed_move_request(
        board: &Board,
        from: (u16, u16),
        to: (u16, u16),
        move_type: MoveType,
    ) -> MoveRequest {
        let piece = board.piece_at(from.0, from.1);
        MoveRequest {
            piece_id: piece.id,
            from_x: from.0,
            from_y: from.1,
            to_x: to.0,
            to_y: to.1,
            move_type,
            move_token: 0,
            client_is_white: piece.is_white,
        }
    }

    #[test]
    fn test_adopt_places_standard_arrangement() {
        let board = board_with_sub_board(0, 0);

        // 32 pieces, back ranks at y 0 and 7, pawns at 1 and 6.
        let mut count = 0;
        board.each_piece(|x, y, piece| {
            assert!(x < 8 && y < 8);
            match y {
                0 => assert!(!piece.is_white),
                1 => assert!(!piece.is_white && piece.kind == PieceKind::Pawn),
                6 => assert!(piece.is_white && piece.kind == PieceKind::Pawn),
                7 => assert!(piece.is_white),
                _ => panic!("piece on empty rank {}", y),
            }
            count += 1;
        });
        assert_eq!(count, 32);
        assert_eq!(board.piece_at(4, 7).kind, PieceKind::King);
        assert_eq!(board.piece_at(4, 0).kind, PieceKind::King);
    }

    #[test]
    fn test_ids_are_unique_after_adoption() {
        let mut board = board_with_sub_board(0, 0);
        board.adopt(&AdoptionRequest {
            board_x: 1,
            board_y: 0,
            filter: ColorFilter::Both,
        });

        let mut seen = std::collections::HashSet::new();
        board.each_piece(|_, _, piece| {
            assert!(seen.insert(piece.id), "duplicate id {}", piece.id);
        });
        assert_eq!(seen.len(), 64);
    }

    #[test]
    fn test_pawn_single_and_double_advance() {
        let mut board = board_with_sub_board(0, 0);

        // White advances toward smaller y; double move from the home rank
        // sets the en-passant flag.
        let result = board.validate_and_apply_move(&move_request(&board, (4, 6), (4, 4)));
        assert!(result.valid);
        let pawn = board.piece_at(4, 4);
        assert!(pawn.just_double_moved);
        assert_eq!(pawn.move_count, 1);
        assert!(board.piece_at(4, 6).is_empty());

        // A follow-up single step clears the flag.
        let result = board.validate_and_apply_move(&move_request(&board, (4, 4), (4, 3)));
        assert!(result.valid);
        assert!(!board.piece_at(4, 3).just_double_moved);
    }

    #[test]
    fn test_pawn_cannot_move_backward_or_double_from_elsewhere() {
        let mut board = board_with_sub_board(0, 0);
        board.validate_and_apply_move(&move_request(&board, (4, 6), (4, 5)));

        // Backward.
        assert!(
            !board
                .validate_and_apply_move(&move_request(&board, (4, 5), (4, 6)))
                .valid
        );
        // Double move off the home rank.
        assert!(
            !board
                .validate_and_apply_move(&move_request(&board, (4, 5), (4, 3)))
                .valid
        );
    }

    #[test]
    fn test_en_passant_capture() {
        let mut board = board_with_sub_board(0, 0);

        // White pawn double-moves e6->e4 (world coords (4,6)->(4,4)); a black
        // pawn brought to (3,4) may capture it en passant onto (4,5).
        assert!(
            board
                .validate_and_apply_move(&move_request(&board, (3, 1), (3, 3)))
                .valid
        );
        assert!(
            board
                .validate_and_apply_move(&move_request(&board, (3, 3), (3, 4)))
                .valid
        );
        let white_before = board.white_pieces_captured;
        assert!(
            board
                .validate_and_apply_move(&move_request(&board, (4, 6), (4, 4)))
                .valid
        );
        let victim_id = board.piece_at(4, 4).id;

        let result = board.validate_and_apply_move(&typed_move_request(
            &board,
            (3, 4),
            (4, 5),
            MoveType::EnPassant,
        ));
        assert!(result.valid);
        assert_eq!(result.captured.len(), 1);
        assert_eq!(result.captured[0].piece_id, victim_id);
        assert!(board.piece_at(4, 4).is_empty());
        assert_eq!(board.piece_at(4, 5).kind, PieceKind::Pawn);
        assert!(!board.piece_at(4, 5).is_white);
        assert_eq!(board.white_pieces_captured, white_before + 1);
    }

    #[test]
    fn test_en_passant_requires_fresh_double_move() {
        let mut board = board_with_sub_board(0, 0);
        assert!(
            board
                .validate_and_apply_move(&move_request(&board, (3, 1), (3, 3)))
                .valid
        );
        assert!(
            board
                .validate_and_apply_move(&move_request(&board, (3, 3), (3, 4)))
                .valid
        );
        // White pawn arrives at (4,4) by two single steps: no flag.
        assert!(
            board
                .validate_and_apply_move(&move_request(&board, (4, 6), (4, 5)))
                .valid
        );
        assert!(
            board
                .validate_and_apply_move(&move_request(&board, (4, 5), (4, 4)))
                .valid
        );

        let result = board.validate_and_apply_move(&typed_move_request(
            &board,
            (3, 4),
            (4, 5),
            MoveType::EnPassant,
        ));
        assert!(!result.valid);
    }

    #[test]
    fn test_castle_kingside() {
        let mut board = board_with_sub_board(0, 0);
        // Vacate f1/g1 (local (5,7) and (6,7)).
        board.set_cell(5, 7, 0);
        board.set_cell(6, 7, 0);

        let king_id = board.piece_at(4, 7).id;
        let rook_id = board.piece_at(7, 7).id;
        let result = board.validate_and_apply_move(&typed_move_request(
            &board,
            (4, 7),
            (6, 7),
            MoveType::Castle,
        ));
        assert!(result.valid);
        assert_eq!(result.moved.len(), 2);
        assert_eq!(result.moved[0].piece_id, king_id);
        assert_eq!(result.moved[1].piece_id, rook_id);
        assert_eq!(board.piece_at(6, 7).kind, PieceKind::King);
        assert_eq!(board.piece_at(5, 7).kind, PieceKind::Rook);
        assert!(board.piece_at(4, 7).is_empty());
        assert!(board.piece_at(7, 7).is_empty());
    }

    #[test]
    fn test_castle_rejected_when_rook_moved_or_path_blocked() {
        let mut board = board_with_sub_board(0, 0);

        // Path blocked (bishop and knight still home).
        assert!(
            !board
                .validate_and_apply_move(&typed_move_request(
                    &board,
                    (4, 7),
                    (6, 7),
                    MoveType::Castle
                ))
                .valid
        );

        // Rook has moved.
        board.set_cell(5, 7, 0);
        board.set_cell(6, 7, 0);
        assert!(
            board
                .validate_and_apply_move(&move_request(&board, (7, 7), (6, 7)))
                .valid
        );
        assert!(
            board
                .validate_and_apply_move(&move_request(&board, (6, 7), (7, 7)))
                .valid
        );
        assert!(
            !board
                .validate_and_apply_move(&typed_move_request(
                    &board,
                    (4, 7),
                    (6, 7),
                    MoveType::Castle
                ))
                .valid
        );
    }

    #[test]
    fn test_promotion_on_last_rank() {
        let mut board = board_with_sub_board(0, 0);
        // Clear a column so the white pawn can run to the local last rank.
        board.set_cell(0, 1, 0);
        board.set_cell(0, 0, 0);

        for (from_y, to_y) in [(6, 4), (4, 3), (3, 2), (2, 1)] {
            assert!(
                board
                    .validate_and_apply_move(&move_request(&board, (0, from_y), (0, to_y)))
                    .valid
            );
        }
        let result = board.validate_and_apply_move(&typed_move_request(
            &board,
            (0, 1),
            (0, 0),
            MoveType::Promotion,
        ));
        assert!(result.valid);
        assert_eq!(board.piece_at(0, 0).kind, PieceKind::PromotedPawn);

        // The promoted pawn slides like a queen.
        assert!(
            board
                .validate_and_apply_move(&move_request(&board, (0, 0), (0, 4)))
                .valid
        );
    }

    #[test]
    fn test_promotion_without_last_rank_is_rejected() {
        let mut board = board_with_sub_board(0, 0);
        let result = board.validate_and_apply_move(&typed_move_request(
            &board,
            (4, 6),
            (4, 5),
            MoveType::Promotion,
        ));
        assert!(!result.valid);
    }

    #[test]
    fn test_rejections_do_not_advance_seq_num() {
        let mut board = board_with_sub_board(0, 0);
        let seq = board.seq_num;

        // Empty origin.
        assert!(
            !board
                .validate_and_apply_move(&MoveRequest {
                    piece_id: 1,
                    from_x: 4,
                    from_y: 4,
                    to_x: 4,
                    to_y: 3,
                    move_type: MoveType::Normal,
                    move_token: 0,
                    client_is_white: true,
                })
                .valid
        );
        // Stale piece id.
        let mut stale = move_request(&board, (4, 6), (4, 5));
        stale.piece_id += 1000;
        assert!(!board.validate_and_apply_move(&stale).valid);
        // Wrong color ownership.
        let mut wrong_color = move_request(&board, (4, 6), (4, 5));
        wrong_color.client_is_white = false;
        assert!(!board.validate_and_apply_move(&wrong_color).valid);
        // Out of bounds.
        let mut oob = move_request(&board, (4, 6), (4, 5));
        oob.to_x = BOARD_SIZE;
        assert!(!board.validate_and_apply_move(&oob).valid);
        // Zero-length move.
        assert!(
            !board
                .validate_and_apply_move(&move_request(&board, (4, 6), (4, 6)))
                .valid
        );
        // Self capture.
        assert!(
            !board
                .validate_and_apply_move(&move_request(&board, (0, 7), (0, 6)))
                .valid
        );

        assert_eq!(board.seq_num, seq);
        assert_eq!(board.total_moves, 0);
    }

    #[test]
    fn test_distance_cap() {
        let mut board = board_with_sub_board(0, 0);
        board.set_cell(0, 6, 0); // open the rook's file
        let request = move_request(&board, (0, 7), (0, 7 + MAX_MOVE_DISTANCE + 1));
        assert!(!board.validate_and_apply_move(&request).valid);

        // Exactly at the cap (path is empty below the sub-board).
        let request = move_request(&board, (0, 7), (0, 7 + MAX_MOVE_DISTANCE));
        assert!(board.validate_and_apply_move(&request).valid);
    }

    #[test]
    fn test_seq_num_is_strictly_monotonic() {
        let mut board = board_with_sub_board(0, 0);
        let mut last = board.seq_num;
        for (from, to) in [((4, 6), (4, 5)), ((4, 1), (4, 2)), ((4, 5), (4, 4))] {
            let result = board.validate_and_apply_move(&move_request(&board, from, to));
            assert!(result.valid);
            assert_eq!(result.seq_num, last + 1);
            last = result.seq_num;
        }
    }

    #[test]
    fn test_bulk_capture_respects_color_filter() {
        let mut board = board_with_sub_board(0, 0);
        let result = board.do_bulk_capture(&BulkCaptureRequest {
            board_x: 0,
            board_y: 0,
            filter: ColorFilter::OnlyWhite,
        });
        assert!(result.valid);
        assert_eq!(result.captured.len(), 16);
        assert!(result.captured.iter().all(|c| c.was_white));
        assert_eq!(board.white_pieces_captured, 16);
        assert_eq!(board.white_kings_captured, 1);
        assert_eq!(board.black_pieces_captured, 0);

        // Black pieces are untouched.
        let mut black = 0;
        board.each_piece(|_, _, piece| {
            assert!(!piece.is_white);
            black += 1;
        });
        assert_eq!(black, 16);
    }

    #[test]
    fn test_adoption_with_filter_never_displaces_other_color() {
        let mut board = board_with_sub_board(0, 0);
        // Push a black pawn onto white's pawn rank so a seat is occupied.
        assert!(
            board
                .validate_and_apply_move(&move_request(&board, (3, 1), (3, 3)))
                .valid
        );
        board.set_cell(3, 6, 0);
        board.set_cell(3, 3, 0);
        let intruder = Piece {
            id: board.mint_id(),
            kind: PieceKind::Pawn,
            is_white: false,
            ..Piece::default()
        };
        board.set_cell(3, 6, intruder.encode());

        let result = board.adopt(&AdoptionRequest {
            board_x: 0,
            board_y: 0,
            filter: ColorFilter::OnlyWhite,
        });
        assert!(result.valid);
        assert!(result.captured.iter().all(|c| c.was_white));
        // The black intruder keeps its seat; no white pawn was stacked on it.
        let survivor = board.piece_at(3, 6);
        assert_eq!(survivor.id, intruder.id);
        assert!(!survivor.is_white);
    }

    #[test]
    fn test_counter_conservation() {
        let mut board = board_with_sub_board(0, 0);
        board.do_bulk_capture(&BulkCaptureRequest {
            board_x: 0,
            board_y: 0,
            filter: ColorFilter::Both,
        });
        assert_eq!(
            board.white_pieces_captured + board.black_pieces_captured,
            32
        );
        assert!(board.white_kings_captured <= board.white_pieces_captured);
        assert!(board.black_kings_captured <= board.black_pieces_captured);
    }

    #[test]
    fn test_state_for_position_clips_and_tags_seq() {
        let mut board = board_with_sub_board(0, 0);
        board.validate_and_apply_move(&move_request(&board, (4, 6), (4, 4)));

        let snapshot = board.state_for_position(0, 0);
        assert_eq!(snapshot.area_min_x, 0);
        assert_eq!(snapshot.area_min_y, 0);
        assert_eq!(snapshot.area_max_x, VIEW_RADIUS);
        assert_eq!(snapshot.area_max_y, VIEW_RADIUS);
        assert_eq!(snapshot.pieces.len(), 32);
        assert_eq!(snapshot.starting_seq_num, board.seq_num);
        assert_eq!(snapshot.ending_seq_num, board.seq_num);

        // A window far from the sub-board sees nothing.
        assert!(board.state_for_position(4000, 4000).pieces.is_empty());
    }

    #[test]
    fn test_capture_increments_capture_count_of_mover() {
        let mut board = board_with_sub_board(0, 0);
        assert!(
            board
                .validate_and_apply_move(&move_request(&board, (4, 6), (4, 4)))
                .valid
        );
        assert!(
            board
                .validate_and_apply_move(&move_request(&board, (3, 1), (3, 3)))
                .valid
        );
        // White pawn takes the black pawn diagonally.
        let result = board.validate_and_apply_move(&move_request(&board, (4, 4), (3, 3)));
        assert!(result.valid);
        assert_eq!(result.captured.len(), 1);
        let pawn = board.piece_at(3, 3);
        assert_eq!(pawn.capture_count, 1);
        assert_eq!(board.black_pieces_captured, 1);
    }
}
