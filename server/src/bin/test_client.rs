//! Headless bot for exercising a running server.
//!
//! Connects, joins with a name, optionally starts the match (when it is the
//! admin) and then plays random legal-looking moves whenever it holds the
//! turn, retrying with another move when the server refuses one.

use clap::Parser;
use log::{debug, error, info, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use shared::framing::{read_frame, write_frame};
use shared::{Color, Coord, MapDefinition, Packet, SessionId, PROTOCOL_VERSION};
use std::collections::BTreeSet;
use std::time::Duration;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::time::sleep;

/// Moves tried per turn before the bot gives up on it.
const MAX_ATTEMPTS: u32 = 32;

#[derive(Parser, Debug)]
#[command(author, version, about = "Random-move bot for the Hexfall server")]
struct Args {
    /// Server address
    #[arg(short, long, default_value = "127.0.0.1:7777")]
    server: String,

    /// Player name
    #[arg(short, long, default_value = "bot")]
    name: String,

    /// Join as a spectator
    #[arg(long)]
    spectate: bool,

    /// Send StartMatch after joining (only honored for the admin)
    #[arg(long)]
    start: bool,

    /// Delay before each move, in milliseconds
    #[arg(long, default_value = "200")]
    think_ms: u64,

    /// Seed for move selection
    #[arg(long)]
    seed: Option<u64>,
}

/// What the bot knows about the board.
struct BotState {
    me: SessionId,
    color: Color,
    tiles: BTreeSet<Coord>,
    pawns: BTreeSet<Coord>,
    my_turn: bool,
    attempts: u32,
}

impl BotState {
    fn new() -> Self {
        Self {
            me: 0,
            color: Color::SPECTATOR,
            tiles: BTreeSet::new(),
            pawns: BTreeSet::new(),
            my_turn: false,
            attempts: 0,
        }
    }

    fn load_map(&mut self, map: &MapDefinition) {
        self.tiles = map.tiles.iter().map(|t| t.at).collect();
        self.pawns = map
            .pawns
            .iter()
            .filter(|p| p.color == self.color)
            .map(|p| p.at)
            .collect();
    }

    fn pick_move(&self, rng: &mut StdRng) -> Option<(Coord, Coord)> {
        let pawns: Vec<Coord> = self.pawns.iter().copied().collect();
        let from = *pawns.choose(rng)?;
        let targets: Vec<Coord> = from
            .neighbors()
            .into_iter()
            .filter(|c| self.tiles.contains(c))
            .collect();
        let to = *targets.choose(rng)?;
        Some((from, to))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::init();
    let args = Args::parse();
    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let stream = TcpStream::connect(&args.server).await?;
    info!("Connected to {}", args.server);
    let (mut reader, mut writer) = stream.into_split();

    write_frame(
        &mut writer,
        &Packet::HandshakeInit {
            client_version: PROTOCOL_VERSION,
            name: args.name.clone(),
            spectator: args.spectate,
        },
    )
    .await?;

    let mut state = BotState::new();
    let think = Duration::from_millis(args.think_ms);

    loop {
        let packet = match read_frame(&mut reader).await {
            Ok(packet) => packet,
            Err(e) => {
                info!("Connection closed: {}", e);
                break;
            }
        };
        debug!("Received {}", packet.kind());

        match packet {
            Packet::Rejected { reason } => {
                error!("Server rejected us: {}", reason);
                break;
            }
            Packet::RosterInfo { you, players, .. } => {
                state.me = you;
                if let Some(me) = players.iter().find(|p| p.id == you) {
                    state.color = me.color;
                }
                info!("Joined as session {} with color {}", you, state.color.0);
                if args.start {
                    write_frame(&mut writer, &Packet::StartMatch).await?;
                }
            }
            Packet::ColorChange { session, color } if session == state.me => {
                state.color = color;
            }
            Packet::MatchBegin { first_turn, map } => {
                state.load_map(&map);
                info!("Match started with {} own pawns", state.pawns.len());
                state.my_turn = first_turn == state.me;
                if state.my_turn {
                    state.attempts = 0;
                    play(&mut writer, &mut state, &mut rng, think).await?;
                }
            }
            Packet::TurnNotice { session } => {
                state.my_turn = session == state.me;
                if state.my_turn {
                    state.attempts = 0;
                    play(&mut writer, &mut state, &mut rng, think).await?;
                }
            }
            Packet::AckBadMove { reason } => {
                debug!("Move refused: {}", reason);
                if state.my_turn {
                    play(&mut writer, &mut state, &mut rng, think).await?;
                }
            }
            Packet::Move { from, to } | Packet::ForcedMove { from, to } => {
                if state.pawns.remove(&from) {
                    state.pawns.insert(to);
                }
            }
            Packet::Destroy { at, color, reason } => {
                if color == state.color && state.pawns.remove(&at) {
                    info!("Lost pawn on {} ({:?})", at, reason);
                }
            }
            Packet::StateUpdate { tiles, pawns } => {
                for tile in &tiles {
                    state.pawns.remove(&tile.at);
                }
                state.pawns.extend(
                    pawns
                        .iter()
                        .filter(|p| p.color == state.color)
                        .map(|p| p.at),
                );
            }
            Packet::GameOver { winner } => {
                match winner {
                    Some(id) if id == state.me => info!("We won!"),
                    Some(id) => info!("Session {} won", id),
                    None => info!("Match ended in a draw"),
                }
                state.my_turn = false;
            }
            Packet::Chat { session, text } => info!("[{}] {}", session, text),
            _ => {}
        }
    }

    Ok(())
}

async fn play(
    writer: &mut OwnedWriteHalf,
    state: &mut BotState,
    rng: &mut StdRng,
    think: Duration,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    if state.attempts >= MAX_ATTEMPTS {
        warn!("No accepted move after {} attempts", MAX_ATTEMPTS);
        return Ok(());
    }
    state.attempts += 1;

    let Some((from, to)) = state.pick_move(rng) else {
        warn!("No pawn left to move");
        return Ok(());
    };
    sleep(think).await;
    debug!("Moving {} -> {}", from, to);
    write_frame(writer, &Packet::Move { from, to }).await?;
    Ok(())
}
