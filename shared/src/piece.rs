//! Bit-packed piece codec.
//!
//! Every cell of the world is one `u64` word stored inline in a contiguous
//! array, so a piece never lives on the heap and a whole cell can be
//! overwritten in one store. The zero word is the canonical empty cell.
//!
//! Layout (low to high bit):
//! - bits 0..32  piece id (0 means empty)
//! - bits 32..36 piece kind
//! - bit  36     is white
//! - bit  37     just double moved (pawn advanced two squares last move)
//! - bits 38..46 move count, saturating
//! - bits 46..54 capture count, saturating

/// Saturation ceiling for the move and capture counters.
pub const MAX_COUNTER: u8 = 250;

/// The seven piece kinds. A promoted pawn keeps its own kind so clients can
/// render it distinctly; it moves like a queen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PieceKind {
    #[default]
    Pawn = 0,
    Knight = 1,
    Bishop = 2,
    Rook = 3,
    Queen = 4,
    King = 5,
    PromotedPawn = 6,
}

impl PieceKind {
    /// Decodes the 4-bit kind field. Unknown values fall back to `Pawn`;
    /// the board never stores one.
    pub fn from_bits(bits: u8) -> PieceKind {
        match bits {
            1 => PieceKind::Knight,
            2 => PieceKind::Bishop,
            3 => PieceKind::Rook,
            4 => PieceKind::Queen,
            5 => PieceKind::King,
            6 => PieceKind::PromotedPawn,
            _ => PieceKind::Pawn,
        }
    }
}

/// Unpacked view of one cell word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Piece {
    pub id: u32,
    pub kind: PieceKind,
    pub is_white: bool,
    pub just_double_moved: bool,
    pub move_count: u8,
    pub capture_count: u8,
}

impl Piece {
    /// Unpacks a cell word. The empty word decodes to a zeroed `Piece`; its
    /// kind and color carry no meaning in that case.
    pub fn decode(word: u64) -> Piece {
        Piece {
            id: (word & 0xFFFF_FFFF) as u32,
            kind: PieceKind::from_bits(((word >> 32) & 0xF) as u8),
            is_white: (word >> 36) & 1 == 1,
            just_double_moved: (word >> 37) & 1 == 1,
            move_count: ((word >> 38) & 0xFF) as u8,
            capture_count: ((word >> 46) & 0xFF) as u8,
        }
    }

    /// Packs into a cell word.
    pub fn encode(&self) -> u64 {
        (self.id as u64)
            | ((self.kind as u64) << 32)
            | ((self.is_white as u64) << 36)
            | ((self.just_double_moved as u64) << 37)
            | ((self.move_count as u64) << 38)
            | ((self.capture_count as u64) << 46)
    }

    pub fn is_empty(&self) -> bool {
        self.id == 0
    }

    pub fn is_king(&self) -> bool {
        self.kind == PieceKind::King
    }

    /// Saturating move counter bump.
    pub fn increment_move_count(&mut self) {
        if self.move_count < MAX_COUNTER {
            self.move_count += 1;
        }
    }

    /// Saturating capture counter bump.
    pub fn increment_capture_count(&mut self) {
        if self.capture_count < MAX_COUNTER {
            self.capture_count += 1;
        }
    }

    /// Compact per-piece move state sent to clients: low eight bits are the
    /// move count, bit eight the just-double-moved flag.
    pub fn move_state(&self) -> u16 {
        self.move_count as u16 | ((self.just_double_moved as u16) << 8)
    }
}
