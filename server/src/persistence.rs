//! Shadow board and snapshot persistence.
//!
//! The persistence worker owns a second copy of the board and replays the
//! exact mutation stream the live board accepted. Because both boards start
//! from the same image and apply the same deterministic mutations in the
//! same order, any divergence means a consistency bug, so a shadow
//! rejection aborts the process instead of limping on with a corrupt
//! archive.
//!
//! Snapshot images are written atomically: encode, write to a `.tmp`
//! sibling, fsync, rename. At most one disk write is in flight at a time;
//! a tick that arrives while one is pending is skipped.

use crate::board::{AdoptionRequest, Board, BulkCaptureRequest, MoveRequest};
use log::{error, info, warn};
use shared::BOARD_SIZE;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

/// Snapshot cadence.
pub const SNAPSHOT_INTERVAL: Duration = Duration::from_secs(30);

/// Fixed-size image header: next_id, seq_num, total_moves, the four
/// capture counters, piece count.
const HEADER_LEN: usize = 4 + 7 * 8;

/// Bytes per stored piece: the cell word plus packed coordinates.
const PIECE_LEN: usize = 8 + 4;

/// One accepted mutation, replayed verbatim onto the shadow board.
#[derive(Debug, Clone)]
pub enum Mutation {
    Move(MoveRequest),
    Adopt(AdoptionRequest),
    BulkCapture(BulkCaptureRequest),
}

/// Replays a mutation the live board already accepted. Panics on
/// rejection: the shadow must never disagree with the live board.
pub fn apply_to_shadow(shadow: &mut Board, mutation: &Mutation) {
    let result = match mutation {
        Mutation::Move(request) => shadow.validate_and_apply_move(request),
        Mutation::Adopt(request) => shadow.adopt(request),
        Mutation::BulkCapture(request) => shadow.do_bulk_capture(request),
    };
    if !result.valid {
        panic!(
            "shadow board rejected a mutation the live board accepted at seq {}: {:?}",
            shadow.seq_num, mutation
        );
    }
}

/// Serializes the board into the snapshot image format: a fixed header
/// followed by one 12-byte record per non-empty cell in row-major order.
/// All integers are little-endian.
pub fn encode_snapshot(board: &Board) -> Vec<u8> {
    let mut records: Vec<u8> = Vec::new();
    let mut piece_count: u64 = 0;
    board.each_piece(|x, y, piece| {
        records.extend_from_slice(&piece.encode().to_le_bytes());
        let packed = ((x as u32) << 16) | y as u32;
        records.extend_from_slice(&packed.to_le_bytes());
        piece_count += 1;
    });

    let mut image = Vec::with_capacity(HEADER_LEN + records.len());
    image.extend_from_slice(&board.next_id.to_le_bytes());
    image.extend_from_slice(&board.seq_num.to_le_bytes());
    image.extend_from_slice(&board.total_moves.to_le_bytes());
    image.extend_from_slice(&board.white_pieces_captured.to_le_bytes());
    image.extend_from_slice(&board.black_pieces_captured.to_le_bytes());
    image.extend_from_slice(&board.white_kings_captured.to_le_bytes());
    image.extend_from_slice(&board.black_kings_captured.to_le_bytes());
    image.extend_from_slice(&piece_count.to_le_bytes());
    image.extend_from_slice(&records);
    image
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes(bytes[at..at + 4].try_into().unwrap_or_default())
}

fn read_u64(bytes: &[u8], at: usize) -> u64 {
    u64::from_le_bytes(bytes[at..at + 8].try_into().unwrap_or_default())
}

/// Rebuilds a board from a snapshot image, validating length, piece count
/// and coordinate bounds.
pub fn decode_snapshot(image: &[u8]) -> io::Result<Board> {
    if image.len() < HEADER_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "snapshot image shorter than header",
        ));
    }

    let piece_count = read_u64(image, 4 + 6 * 8) as usize;
    let expected = HEADER_LEN + piece_count * PIECE_LEN;
    if image.len() != expected {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "snapshot image is {} bytes, header promises {}",
                image.len(),
                expected
            ),
        ));
    }

    let mut board = Board::new();
    board.next_id = read_u32(image, 0);
    board.seq_num = read_u64(image, 4);
    board.total_moves = read_u64(image, 12);
    board.white_pieces_captured = read_u64(image, 20);
    board.black_pieces_captured = read_u64(image, 28);
    board.white_kings_captured = read_u64(image, 36);
    board.black_kings_captured = read_u64(image, 44);

    for index in 0..piece_count {
        let at = HEADER_LEN + index * PIECE_LEN;
        let word = read_u64(image, at);
        let packed = read_u32(image, at + 8);
        let x = (packed >> 16) as u16;
        let y = (packed & 0xFFFF) as u16;
        if word == 0 || x >= BOARD_SIZE || y >= BOARD_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("snapshot record {} is invalid: ({},{})", index, x, y),
            ));
        }
        board.restore_cell(x, y, word);
    }
    Ok(board)
}

fn snapshot_filename(seq_num: u64) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos())
        .unwrap_or(0);
    format!("board-ts:{}-seq:{}.bin", nanos, seq_num)
}

fn parse_timestamp(filename: &str) -> Option<u128> {
    let rest = filename.strip_prefix("board-ts:")?;
    let end = rest.find('-')?;
    rest[..end].parse().ok()
}

/// Writes an encoded image atomically and returns the final path.
pub fn write_snapshot(dir: &Path, seq_num: u64, image: &[u8]) -> io::Result<PathBuf> {
    let path = dir.join(snapshot_filename(seq_num));
    let tmp = path.with_extension("tmp");
    let mut file = File::create(&tmp)?;
    file.write_all(image)?;
    file.sync_all()?;
    fs::rename(&tmp, &path)?;
    Ok(path)
}

/// Loads the newest snapshot in the directory, or `None` when the
/// directory holds no snapshot. Only completed `.bin` images are
/// candidates; a `.tmp` left behind by a crash mid-write is deleted.
/// Images that fail to decode are an error, not silently skipped.
pub fn load_latest(dir: &Path) -> io::Result<Option<Board>> {
    let mut newest: Option<(u128, PathBuf)> = None;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if !name.ends_with(".bin") {
            if name.starts_with("board-ts:") && name.ends_with(".tmp") {
                warn!("removing interrupted snapshot write {:?}", entry.path());
                let _ = fs::remove_file(entry.path());
            }
            continue;
        }
        let Some(timestamp) = parse_timestamp(name) else {
            continue;
        };
        if newest.as_ref().map_or(true, |(ts, _)| timestamp > *ts) {
            newest = Some((timestamp, entry.path()));
        }
    }

    let Some((_, path)) = newest else {
        return Ok(None);
    };
    let mut image = Vec::new();
    File::open(&path)?.read_to_end(&mut image)?;
    let board = decode_snapshot(&image)?;
    info!(
        "loaded snapshot {:?}: seq {}, {} total moves",
        path.file_name().unwrap_or_default(),
        board.seq_num,
        board.total_moves
    );
    Ok(Some(board))
}

/// The persistence worker: replays mutations onto the shadow board and
/// writes a snapshot every [`SNAPSHOT_INTERVAL`], with at most one disk
/// write in flight.
pub async fn run(mut shadow: Board, mut mutations: mpsc::UnboundedReceiver<Mutation>, dir: PathBuf) {
    let mut ticker = interval(SNAPSHOT_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut in_flight: Option<JoinHandle<io::Result<PathBuf>>> = None;

    loop {
        tokio::select! {
            mutation = mutations.recv() => {
                let Some(mutation) = mutation else {
                    info!("mutation stream closed; persistence worker stopping");
                    break;
                };
                apply_to_shadow(&mut shadow, &mutation);
            }
            _ = ticker.tick() => {
                if let Some(handle) = &in_flight {
                    if !handle.is_finished() {
                        warn!("snapshot write still in flight; skipping tick");
                        continue;
                    }
                }
                if let Some(handle) = in_flight.take() {
                    match handle.await {
                        Ok(Ok(path)) => info!("snapshot written to {:?}", path),
                        Ok(Err(err)) => error!("snapshot write failed: {}", err),
                        Err(err) => error!("snapshot writer panicked: {}", err),
                    }
                }

                let image = encode_snapshot(&shadow);
                let seq_num = shadow.seq_num;
                let target = dir.clone();
                in_flight = Some(tokio::task::spawn_blocking(move || {
                    write_snapshot(&target, seq_num, &image)
                }));
            }
        }
    }
}
