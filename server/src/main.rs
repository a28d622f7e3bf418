//! Chess world server binary.

use clap::Parser;
use log::info;
use server::board::Board;
use server::captures::RecentCaptures;
use server::minimap::{self, Minimap};
use server::net::{self, AppState};
use server::persistence;
use server::server::Server;
use server::zones;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};

#[derive(Parser)]
#[command(name = "chessworld-server")]
#[command(about = "Authoritative server for a massively multiplayer chess world")]
struct Args {
    /// Address the websocket/HTTP listener binds to.
    #[arg(long, default_value = "127.0.0.1:8080")]
    addr: String,

    /// Directory holding board snapshot images.
    #[arg(long = "state", default_value = "state")]
    state_dir: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    std::fs::create_dir_all(&args.state_dir)?;
    let board = match persistence::load_latest(&args.state_dir)? {
        Some(board) => board,
        None => {
            info!("no snapshot found; seeding a fresh world");
            let mut board = Board::new();
            board.seed_initial_arrangements();
            let image = persistence::encode_snapshot(&board);
            persistence::write_snapshot(&args.state_dir, board.seq_num, &image)?;
            board
        }
    };
    let shadow = board.clone();

    let minimap = Arc::new(Minimap::new());
    minimap.scan_board(&board);
    minimap.refresh_blob();
    let captures = Arc::new(RecentCaptures::new());
    let board = Arc::new(RwLock::new(board));

    let (zone_tx, zone_rx) = mpsc::unbounded_channel();
    zones::spawn(zone_rx);
    let (persist_tx, persist_rx) = mpsc::unbounded_channel();
    tokio::spawn(persistence::run(shadow, persist_rx, args.state_dir.clone()));

    let orchestrator = Server::new(
        board.clone(),
        zone_tx,
        persist_tx,
        minimap.clone(),
        captures.clone(),
    );
    let handle = orchestrator.handle();
    orchestrator.run();
    tokio::spawn(minimap::run_scheduler(minimap.clone()));

    let state = Arc::new(AppState {
        handle,
        board,
        minimap,
        captures,
    });
    let listener = tokio::net::TcpListener::bind(&args.addr).await?;
    info!("listening on {}", args.addr);

    tokio::select! {
        result = axum::serve(listener, net::router(state)) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received; shutting down");
        }
    }
    Ok(())
}
