//! Wire protocol between the authoritative server and clients.
//!
//! Every frame carries exactly one bincode-encoded [`Packet`]. Board state
//! travels as flat [`TileState`] / [`PawnState`] records so the same shapes
//! serve match snapshots, batched deltas and persisted map files.

use crate::error::ProtocolError;
use crate::hex::{Coord, WrapEdges};
use serde::{Deserialize, Serialize};

/// Bumped whenever a `Packet` layout changes.
pub const PROTOCOL_VERSION: u32 = 1;

/// Number of playable (non-spectator) colors.
pub const MAX_COLORS: u8 = 8;

pub const MIN_HEIGHT: i8 = -2;
pub const MAX_HEIGHT: i8 = 2;

pub type SessionId = u32;

/// Session that may start matches and change maps.
pub const ADMIN_SESSION: SessionId = 0;

/// Stands in for a pickup's power id on tiles sent to players. Only
/// spectators and map files see the real id.
pub const HIDDEN_PICKUP: PowerId = PowerId::MAX;

/// Index into the server's static power table.
pub type PowerId = u8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Color(pub u8);

impl Color {
    /// Reserved non-combatant color, excluded from turns and win counting.
    pub const SPECTATOR: Color = Color(u8::MAX);

    pub fn is_spectator(self) -> bool {
        self == Color::SPECTATOR
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerInfo {
    pub id: SessionId,
    pub name: String,
    pub color: Color,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

impl KeyValue {
    pub fn new(key: impl Into<String>, value: impl ToString) -> Self {
        Self {
            key: key.into(),
            value: value.to_string(),
        }
    }
}

/// Static and dynamic attributes of one tile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileState {
    pub at: Coord,
    pub height: i8,
    pub smashed: bool,
    pub pickup: Option<PowerId>,
    pub mine: Option<Color>,
    pub landing_pad: Option<Color>,
    pub black_hole: Option<u8>,
    pub wrap: WrapEdges,
}

impl TileState {
    /// Keeps the presence of a pickup but drops its identity.
    pub fn conceal_pickup(&mut self) {
        if self.pickup.is_some() {
            self.pickup = Some(HIDDEN_PICKUP);
        }
    }

    pub fn flat(at: Coord) -> Self {
        Self {
            at,
            height: 0,
            smashed: false,
            pickup: None,
            mine: None,
            landing_pad: None,
            black_hole: None,
            wrap: WrapEdges::empty(),
        }
    }
}

/// Publicly visible attributes of a pawn. Held powers are never included;
/// owners learn about them through `PowerAcquired` / `PowerUsed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PawnState {
    pub at: Coord,
    pub color: Color,
    pub range: u8,
    pub status: u8,
}

/// A complete board: the scenario format on disk and the snapshot format on
/// the wire.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MapDefinition {
    pub name: String,
    pub tiles: Vec<TileState>,
    pub pawns: Vec<PawnState>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DestroyReason {
    Crushed,
    Fell,
    HoleFall,
    Mine,
    Power,
    Hazard,
    OwnerLeft,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PawnAnimation {
    Crushed,
    Fall,
    HoleFall,
    Dissolve,
    Pulled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TileAnimation {
    Raise,
    Lower,
    Smash,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParticleAnimation {
    Explosion,
    PickupSpawn,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Packet {
    // Session management
    HandshakeInit {
        client_version: u32,
        name: String,
        spectator: bool,
    },
    Rejected {
        reason: String,
    },
    RosterInfo {
        you: SessionId,
        players: Vec<PlayerInfo>,
        settings: Vec<KeyValue>,
    },
    PlayerJoin {
        player: PlayerInfo,
    },
    PlayerLeave {
        session: SessionId,
        color: Color,
    },
    /// Request from a client (`session` is ignored) or notice from the server.
    ColorChange {
        session: SessionId,
        color: Color,
    },
    Chat {
        session: SessionId,
        text: String,
    },
    Quit,

    // Lobby
    StartMatch,
    MatchBegin {
        first_turn: SessionId,
        map: MapDefinition,
    },
    MapChange {
        name: String,
    },
    MapDefinition {
        map: MapDefinition,
    },

    // Turns and commands
    TurnNotice {
        session: SessionId,
    },
    Move {
        from: Coord,
        to: Coord,
    },
    ForcedMove {
        from: Coord,
        to: Coord,
    },
    PowerUse {
        at: Coord,
        power: PowerId,
    },
    AckOk,
    AckBadMove {
        reason: String,
    },

    // State
    StateUpdate {
        tiles: Vec<TileState>,
        pawns: Vec<PawnState>,
    },
    Destroy {
        at: Coord,
        color: Color,
        reason: DestroyReason,
    },
    GameOver {
        winner: Option<SessionId>,
    },
    PowerAcquired {
        at: Coord,
        color: Color,
        power: Option<PowerId>,
    },
    PowerUsed {
        at: Coord,
        color: Color,
        power: PowerId,
    },

    // Presentation hints
    PawnAnimation {
        at: Coord,
        kind: PawnAnimation,
    },
    TileAnimation {
        at: Coord,
        kind: TileAnimation,
    },
    ParticleAnimation {
        at: Coord,
        kind: ParticleAnimation,
    },
}

impl Packet {
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serialize(self).map_err(ProtocolError::Encode)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        bincode::deserialize(bytes).map_err(ProtocolError::Decode)
    }

    /// The packet as a player sees it: tile records keep their pickups but
    /// not which power each one holds.
    pub fn concealed(&self) -> Packet {
        let mut packet = self.clone();
        match &mut packet {
            Packet::MapDefinition { map } | Packet::MatchBegin { map, .. } => {
                map.tiles.iter_mut().for_each(TileState::conceal_pickup);
            }
            Packet::StateUpdate { tiles, .. } => {
                tiles.iter_mut().for_each(TileState::conceal_pickup);
            }
            _ => {}
        }
        packet
    }

    /// Short name used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Packet::HandshakeInit { .. } => "handshake-init",
            Packet::Rejected { .. } => "rejected",
            Packet::RosterInfo { .. } => "roster-info",
            Packet::PlayerJoin { .. } => "player-join",
            Packet::PlayerLeave { .. } => "player-leave",
            Packet::ColorChange { .. } => "color-change",
            Packet::Chat { .. } => "chat",
            Packet::Quit => "quit",
            Packet::StartMatch => "start-match",
            Packet::MatchBegin { .. } => "match-begin",
            Packet::MapChange { .. } => "map-change",
            Packet::MapDefinition { .. } => "map-definition",
            Packet::TurnNotice { .. } => "turn-notice",
            Packet::Move { .. } => "move",
            Packet::ForcedMove { .. } => "forced-move",
            Packet::PowerUse { .. } => "power-use",
            Packet::AckOk => "ack-ok",
            Packet::AckBadMove { .. } => "ack-bad-move",
            Packet::StateUpdate { .. } => "state-update",
            Packet::Destroy { .. } => "destroy",
            Packet::GameOver { .. } => "game-over",
            Packet::PowerAcquired { .. } => "power-acquired",
            Packet::PowerUsed { .. } => "power-used",
            Packet::PawnAnimation { .. } => "pawn-animation",
            Packet::TileAnimation { .. } => "tile-animation",
            Packet::ParticleAnimation { .. } => "particle-animation",
        }
    }
}
