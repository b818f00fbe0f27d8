//! Scenario storage.
//!
//! Maps live as `<dir>/<name>.map` files in the `shared::mapfile` format.
//! The built-in scenario named [`DEFAULT_MAP`] is served from memory when no
//! file by that name exists, so a fresh server can always start a match.

use crate::board::{Board, BoardError};
use crate::powers;
use log::{debug, info};
use shared::framing::MAX_FRAME_LEN;
use shared::mapfile::{decode_map, encode_map};
use shared::{
    Color, Coord, MapDefinition, Packet, PawnState, PowerId, ProtocolError, SessionId,
    TileState, WrapEdges, MAX_COLORS,
};
use std::fs;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub const DEFAULT_MAP: &str = "default";

const DEFAULT_WIDTH: i32 = 11;
const DEFAULT_HEIGHT: i32 = 9;

#[derive(Error, Debug)]
pub enum MapError {
    #[error("invalid map name '{0}'")]
    InvalidName(String),
    #[error("map '{0}' not found")]
    NotFound(String),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("corrupt map file: {0}")]
    Format(#[from] ProtocolError),
    #[error("invalid scenario: {0}")]
    Board(#[from] BoardError),
    #[error("map has no tiles")]
    Empty,
    #[error("tile {at} holds unknown power {power}")]
    UnknownPower { at: Coord, power: PowerId },
    #[error("pawn on {at} has invalid color {color}")]
    BadColor { at: Coord, color: u8 },
    #[error("map needs up to {len} bytes on the wire, limit is {max}")]
    TooLarge { len: usize, max: usize },
}

/// Largest frame the map can produce once a match runs on it. Every empty
/// tile slot may fill up during play and grows by one byte when it does.
pub fn wire_size(map: &MapDefinition) -> Result<usize, MapError> {
    let begin = Packet::MatchBegin {
        first_turn: SessionId::MAX,
        map: map.clone(),
    };
    let growth: usize = map
        .tiles
        .iter()
        .map(|t| {
            [
                t.pickup.is_none(),
                t.mine.is_none(),
                t.landing_pad.is_none(),
                t.black_hole.is_none(),
            ]
            .iter()
            .filter(|empty| **empty)
            .count()
        })
        .sum();
    Ok(begin.encode()?.len() + growth)
}

/// Checks everything a match relies on: legal heights, unique tiles, one
/// pawn per existing tile, known power ids, playable pawn colors and a
/// size every client can receive.
pub fn validate(map: &MapDefinition) -> Result<(), MapError> {
    if map.tiles.is_empty() {
        return Err(MapError::Empty);
    }
    Board::from_map(map, |_| true)?;
    for tile in &map.tiles {
        if let Some(power) = tile.pickup {
            if !powers::is_valid(power) {
                return Err(MapError::UnknownPower { at: tile.at, power });
            }
        }
    }
    for pawn in &map.pawns {
        if pawn.color.0 >= MAX_COLORS {
            return Err(MapError::BadColor {
                at: pawn.at,
                color: pawn.color.0,
            });
        }
    }
    let len = wire_size(map)?;
    if len > MAX_FRAME_LEN {
        return Err(MapError::TooLarge {
            len,
            max: MAX_FRAME_LEN,
        });
    }
    Ok(())
}

fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Loads and saves named scenarios under one directory.
#[derive(Debug, Clone)]
pub struct MapLoader {
    dir: PathBuf,
}

impl MapLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, name: &str) -> Result<PathBuf, MapError> {
        if !valid_name(name) {
            return Err(MapError::InvalidName(name.to_string()));
        }
        Ok(self.dir.join(format!("{}.map", name)))
    }

    /// Reads and validates a scenario. This is a blocking read.
    pub fn load(&self, name: &str) -> Result<MapDefinition, MapError> {
        let path = self.path_for(name)?;
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                if name == DEFAULT_MAP {
                    debug!("No {} on disk, using built-in scenario", path.display());
                    return Ok(default_map());
                }
                return Err(MapError::NotFound(name.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        let mut map = decode_map(&bytes)?;
        map.name = name.to_string();
        validate(&map)?;
        info!("Loaded map '{}' ({} tiles)", name, map.tiles.len());
        Ok(map)
    }

    pub fn save(&self, map: &MapDefinition, name: &str) -> Result<(), MapError> {
        let path = self.path_for(name)?;
        validate(map)?;
        fs::create_dir_all(&self.dir)?;
        fs::write(&path, encode_map(map)?)?;
        info!("Saved map '{}' to {}", name, path.display());
        Ok(())
    }
}

/// Built-in 11x9 scenario: a crater with a gravity well in the middle,
/// wrapping side edges and two pawns for every color around the rim.
pub fn default_map() -> MapDefinition {
    let center = Coord::new(DEFAULT_WIDTH / 2, DEFAULT_HEIGHT / 2);
    let crater = center.neighbors();

    let mut tiles = Vec::new();
    for row in 0..DEFAULT_HEIGHT {
        for col in 0..DEFAULT_WIDTH {
            let at = Coord::new(col, row);
            let mut tile = TileState::flat(at);
            if at == center {
                tile.black_hole = Some(1);
            } else if crater.contains(&at) {
                tile.height = -1;
            } else if row == 0 || row == DEFAULT_HEIGHT - 1 {
                tile.height = 1;
            }
            if col == 0 {
                tile.wrap |= WrapEdges::RIGHT;
            }
            if col == DEFAULT_WIDTH - 1 {
                tile.wrap |= WrapEdges::LEFT;
            }
            tiles.push(tile);
        }
    }

    let mut spawns = Vec::new();
    for col in [1, 3, 5, 7, 9] {
        spawns.push(Coord::new(col, 0));
        spawns.push(Coord::new(col, DEFAULT_HEIGHT - 1));
    }
    for row in [2, 4, 6] {
        spawns.push(Coord::new(0, row));
        spawns.push(Coord::new(DEFAULT_WIDTH - 1, row));
    }
    let pawns = spawns
        .into_iter()
        .enumerate()
        .map(|(i, at)| PawnState {
            at,
            color: Color((i % MAX_COLORS as usize) as u8),
            range: 0,
            status: 0,
        })
        .collect();

    MapDefinition {
        name: DEFAULT_MAP.to_string(),
        tiles,
        pawns,
    }
}
