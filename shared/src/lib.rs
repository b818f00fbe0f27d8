//! Types shared between the hexfall server and its clients: hex geometry,
//! the wire protocol, frame codec and the persisted map format.

pub mod error;
pub mod framing;
pub mod hex;
pub mod mapfile;
pub mod protocol;

pub use error::ProtocolError;
pub use hex::{Coord, Diagonal, Direction, WrapEdges};
pub use protocol::{
    Color, DestroyReason, KeyValue, MapDefinition, Packet, ParticleAnimation, PawnAnimation,
    PawnState, PlayerInfo, PowerId, SessionId, TileAnimation, TileState, ADMIN_SESSION,
    HIDDEN_PICKUP, MAX_COLORS, MAX_HEIGHT, MIN_HEIGHT, PROTOCOL_VERSION,
};
