//! Board model: tiles, the pawns standing on them, and static geometry
//! queries relative to an origin tile.
//!
//! Every tile exclusively owns the pawn standing on it. A pawn only records
//! its coordinate as a handle, updated whenever it is relocated, so there is
//! never a second owner.

use bitflags::bitflags;
use shared::{
    Color, Coord, DestroyReason, Diagonal, Direction, MapDefinition, PawnState, PowerId,
    TileState, WrapEdges, MAX_HEIGHT, MIN_HEIGHT,
};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// Highest range modifier a pawn can reach.
pub const MAX_RANGE: u8 = 3;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PawnStatus: u8 {
        const SHIELD = 1 << 0;
        /// Hover/climb: ignores height, smashed tiles and mines.
        const HOVER = 1 << 1;
        const INVISIBLE = 1 << 2;
        const JUMP = 1 << 3;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Pawn {
    pub color: Color,
    /// Tile this pawn stands on. Non-owning: the tile holds the pawn.
    pub at: Coord,
    /// Held power charges, power id -> count. Entries never hold zero.
    pub powers: BTreeMap<PowerId, u32>,
    pub range: u8,
    pub status: PawnStatus,
    pub destroyed: Option<DestroyReason>,
}

impl Pawn {
    pub fn new(color: Color, at: Coord) -> Self {
        Self {
            color,
            at,
            powers: BTreeMap::new(),
            range: 0,
            status: PawnStatus::empty(),
            destroyed: None,
        }
    }

    pub fn held(&self, power: PowerId) -> u32 {
        self.powers.get(&power).copied().unwrap_or(0)
    }

    pub fn grant(&mut self, power: PowerId) {
        *self.powers.entry(power).or_insert(0) += 1;
    }

    /// Removes one charge, dropping the entry when it reaches zero.
    pub fn spend(&mut self, power: PowerId) -> bool {
        match self.powers.get_mut(&power) {
            Some(count) if *count > 1 => {
                *count -= 1;
                true
            }
            Some(_) => {
                self.powers.remove(&power);
                true
            }
            None => false,
        }
    }

    pub fn has(&self, flag: PawnStatus) -> bool {
        self.status.contains(flag)
    }

    pub fn state(&self) -> PawnState {
        PawnState {
            at: self.at,
            color: self.color,
            range: self.range,
            status: self.status.bits(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tile {
    pub at: Coord,
    pub height: i8,
    pub smashed: bool,
    pub pickup: Option<PowerId>,
    pub mine: Option<Color>,
    pub landing_pad: Option<Color>,
    pub black_hole: Option<u8>,
    pub wrap: WrapEdges,
    pawn: Option<Pawn>,
}

impl Tile {
    pub fn from_state(state: &TileState) -> Self {
        Self {
            at: state.at,
            height: state.height,
            smashed: state.smashed,
            pickup: state.pickup,
            mine: state.mine,
            landing_pad: state.landing_pad,
            black_hole: state.black_hole,
            wrap: state.wrap,
            pawn: None,
        }
    }

    pub fn state(&self) -> TileState {
        TileState {
            at: self.at,
            height: self.height,
            smashed: self.smashed,
            pickup: self.pickup,
            mine: self.mine,
            landing_pad: self.landing_pad,
            black_hole: self.black_hole,
            wrap: self.wrap,
        }
    }

    pub fn pawn(&self) -> Option<&Pawn> {
        self.pawn.as_ref()
    }

    pub fn is_occupied(&self) -> bool {
        self.pawn.is_some()
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum BoardError {
    #[error("tile {0} is defined twice")]
    DuplicateTile(Coord),
    #[error("tile {at} has height {height} outside [-2, 2]")]
    HeightOutOfRange { at: Coord, height: i8 },
    #[error("pawn placed on missing tile {0}")]
    PawnOffBoard(Coord),
    #[error("tile {0} already holds a pawn")]
    TileOccupied(Coord),
}

#[derive(Debug, Clone, Default)]
pub struct Board {
    pub name: String,
    tiles: BTreeMap<Coord, Tile>,
    graveyard: Vec<Pawn>,
}

impl Board {
    /// Builds a board from a scenario, keeping only pawns whose color passes
    /// `keep`.
    pub fn from_map(
        map: &MapDefinition,
        keep: impl Fn(Color) -> bool,
    ) -> Result<Self, BoardError> {
        let mut tiles = BTreeMap::new();
        for state in &map.tiles {
            if !(MIN_HEIGHT..=MAX_HEIGHT).contains(&state.height) {
                return Err(BoardError::HeightOutOfRange {
                    at: state.at,
                    height: state.height,
                });
            }
            if tiles.insert(state.at, Tile::from_state(state)).is_some() {
                return Err(BoardError::DuplicateTile(state.at));
            }
        }

        let mut board = Board {
            name: map.name.clone(),
            tiles,
            graveyard: Vec::new(),
        };
        for state in &map.pawns {
            let tile = board
                .tiles
                .get(&state.at)
                .ok_or(BoardError::PawnOffBoard(state.at))?;
            if tile.is_occupied() {
                return Err(BoardError::TileOccupied(state.at));
            }
            if !keep(state.color) {
                continue;
            }
            let mut pawn = Pawn::new(state.color, state.at);
            pawn.range = state.range.min(MAX_RANGE);
            pawn.status = PawnStatus::from_bits_truncate(state.status);
            board.place(pawn)?;
        }
        Ok(board)
    }

    pub fn to_map(&self) -> MapDefinition {
        MapDefinition {
            name: self.name.clone(),
            tiles: self.tiles.values().map(Tile::state).collect(),
            pawns: self.pawns().map(Pawn::state).collect(),
        }
    }

    pub fn contains(&self, at: Coord) -> bool {
        self.tiles.contains_key(&at)
    }

    pub fn tile(&self, at: Coord) -> Option<&Tile> {
        self.tiles.get(&at)
    }

    pub fn tile_mut(&mut self, at: Coord) -> Option<&mut Tile> {
        self.tiles.get_mut(&at)
    }

    pub fn tiles(&self) -> impl Iterator<Item = &Tile> {
        self.tiles.values()
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn pawn(&self, at: Coord) -> Option<&Pawn> {
        self.tiles.get(&at).and_then(|t| t.pawn.as_ref())
    }

    pub fn pawn_mut(&mut self, at: Coord) -> Option<&mut Pawn> {
        self.tiles.get_mut(&at).and_then(|t| t.pawn.as_mut())
    }

    /// All live pawns in coordinate order.
    pub fn pawns(&self) -> impl Iterator<Item = &Pawn> {
        self.tiles.values().filter_map(|t| t.pawn.as_ref())
    }

    pub fn pawn_coords(&self) -> Vec<Coord> {
        self.pawns().map(|p| p.at).collect()
    }

    pub fn has_live_pawns(&self, color: Color) -> bool {
        self.pawns().any(|p| p.color == color)
    }

    pub fn graveyard(&self) -> &[Pawn] {
        &self.graveyard
    }

    /// Puts a pawn on the tile named by `pawn.at`.
    pub fn place(&mut self, pawn: Pawn) -> Result<(), BoardError> {
        let at = pawn.at;
        let tile = self
            .tiles
            .get_mut(&at)
            .ok_or(BoardError::PawnOffBoard(at))?;
        if tile.pawn.is_some() {
            return Err(BoardError::TileOccupied(at));
        }
        tile.pawn = Some(pawn);
        Ok(())
    }

    /// Lifts a pawn off its tile. The caller must place it again or destroy it.
    pub(crate) fn take(&mut self, at: Coord) -> Option<Pawn> {
        self.tiles.get_mut(&at).and_then(|t| t.pawn.take())
    }

    /// Moves the pawn on `from` onto the empty tile `to`, updating its handle.
    pub(crate) fn relocate(&mut self, from: Coord, to: Coord) -> bool {
        match self.tiles.get(&to) {
            Some(tile) if tile.pawn.is_none() => {}
            _ => return false,
        }
        let Some(mut pawn) = self.take(from) else {
            return false;
        };
        pawn.at = to;
        if let Some(tile) = self.tiles.get_mut(&to) {
            tile.pawn = Some(pawn);
        }
        true
    }

    /// Removes the pawn on `at` for good. Returns its color.
    pub fn destroy(&mut self, at: Coord, reason: DestroyReason) -> Option<Color> {
        let mut pawn = self.take(at)?;
        pawn.destroyed = Some(reason);
        let color = pawn.color;
        self.graveyard.push(pawn);
        Some(color)
    }

    /// Destroys every pawn of `color`, returning the vacated coordinates.
    pub fn destroy_color(&mut self, color: Color, reason: DestroyReason) -> Vec<Coord> {
        let coords: Vec<Coord> = self
            .pawns()
            .filter(|p| p.color == color)
            .map(|p| p.at)
            .collect();
        for at in &coords {
            self.destroy(*at, reason);
        }
        coords
    }

    /// Adds `delta` to a tile's height, clamped to the legal range. Returns
    /// whether the height changed.
    pub fn adjust_height(&mut self, at: Coord, delta: i8) -> bool {
        match self.tiles.get_mut(&at) {
            Some(tile) => {
                let height = (tile.height + delta).clamp(MIN_HEIGHT, MAX_HEIGHT);
                let changed = height != tile.height;
                tile.height = height;
                changed
            }
            None => false,
        }
    }

    /// Every tile whose row lies within `range` rows of `origin`, across the
    /// full board width.
    pub fn row_band(&self, origin: Coord, range: u8) -> Vec<Coord> {
        let range = range as i32;
        self.tiles
            .keys()
            .filter(|c| (c.row - origin.row).abs() <= range)
            .copied()
            .collect()
    }

    /// Every tile whose diagonal on `axis` meets row 0 within `range` columns
    /// of the origin's diagonal.
    pub fn diagonal_band(&self, origin: Coord, axis: Diagonal, range: u8) -> Vec<Coord> {
        let base = origin.diagonal_base(axis);
        let range = range as i32;
        self.tiles
            .keys()
            .filter(|c| (c.diagonal_base(axis) - base).abs() <= range)
            .copied()
            .collect()
    }

    /// Neighbor expansion from `origin`, applied `range + 1` times. This
    /// reaches one ring further than hex distance `range`.
    pub fn radial(&self, origin: Coord, range: u8) -> Vec<Coord> {
        let mut reached = BTreeSet::from([origin]);
        for _ in 0..=range {
            let ring: Vec<Coord> = reached.iter().flat_map(|c| c.neighbors()).collect();
            reached.extend(ring);
        }
        reached
            .into_iter()
            .filter(|c| self.tiles.contains_key(c))
            .collect()
    }

    /// Last tile reachable by walking `dir` from `origin`, if any step exists.
    pub fn far_edge(&self, origin: Coord, dir: Direction) -> Option<Coord> {
        let mut cursor = origin;
        while self.tiles.contains_key(&cursor.neighbor(dir)) {
            cursor = cursor.neighbor(dir);
        }
        (cursor != origin).then_some(cursor)
    }

    /// Extra neighbors granted by the origin's wrap edges.
    pub fn wrap_neighbors(&self, origin: Coord) -> Vec<Coord> {
        let Some(tile) = self.tiles.get(&origin) else {
            return Vec::new();
        };
        tile.wrap
            .directions()
            .filter_map(|dir| self.far_edge(origin, dir))
            .collect()
    }
}
