//! Hex offset coordinates shared by the server and clients.
//!
//! The board uses an "odd-r" offset layout: row 0 is the top row and every
//! odd row is shifted half a tile to the right. Neighbor formulas therefore
//! depend on row parity.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Position of a tile as (column, row).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Coord {
    pub col: i32,
    pub row: i32,
}

impl Coord {
    pub const fn new(col: i32, row: i32) -> Self {
        Self { col, row }
    }

    fn odd_row(&self) -> bool {
        self.row.rem_euclid(2) == 1
    }

    /// Returns the coordinate one step away in `dir`.
    pub fn neighbor(&self, dir: Direction) -> Coord {
        let odd = self.odd_row() as i32;
        let (dc, dr) = match dir {
            Direction::Left => (-1, 0),
            Direction::Right => (1, 0),
            Direction::NorthWest => (odd - 1, -1),
            Direction::NorthEast => (odd, -1),
            Direction::SouthWest => (odd - 1, 1),
            Direction::SouthEast => (odd, 1),
        };
        Coord::new(self.col + dc, self.row + dr)
    }

    pub fn neighbors(&self) -> [Coord; 6] {
        Direction::ALL.map(|dir| self.neighbor(dir))
    }

    /// Projects the coordinate onto a continuous plane used by the gravity
    /// simulation: odd rows shift half a column, rows are half a unit apart.
    pub fn plane_position(&self) -> (f64, f64) {
        let x = self.col as f64 + if self.odd_row() { 0.5 } else { 0.0 };
        let y = self.row as f64 * 0.5;
        (x, y)
    }

    /// Squared plane distance between two coordinates.
    pub fn plane_distance_sq(&self, other: &Coord) -> f64 {
        let (x1, y1) = self.plane_position();
        let (x2, y2) = other.plane_position();
        (x2 - x1).powi(2) + (y2 - y1).powi(2)
    }

    /// The hex direction whose 60° sector contains the bearing from `self`
    /// towards `target`. Returns `None` when both coordinates coincide.
    pub fn bearing_to(&self, target: &Coord) -> Option<Direction> {
        if self == target {
            return None;
        }
        let (x1, y1) = self.plane_position();
        let (x2, y2) = target.plane_position();
        let degrees = (y2 - y1).atan2(x2 - x1).to_degrees().rem_euclid(360.0);
        let sector = (((degrees + 30.0) / 60.0).floor() as usize) % 6;
        Some(BEARING_SECTORS[sector])
    }

    /// Column this tile's diagonal occupies at row 0.
    pub fn diagonal_base(&self, axis: Diagonal) -> i32 {
        let (up, down) = match axis {
            Diagonal::ForwardSlash => (Direction::NorthEast, Direction::SouthWest),
            Diagonal::BackSlash => (Direction::NorthWest, Direction::SouthEast),
        };
        let mut cursor = *self;
        while cursor.row > 0 {
            cursor = cursor.neighbor(up);
        }
        while cursor.row < 0 {
            cursor = cursor.neighbor(down);
        }
        cursor.col
    }
}

impl fmt::Display for Coord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.col, self.row)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Left,
    Right,
    NorthEast,
    NorthWest,
    SouthEast,
    SouthWest,
}

/// Angle-to-direction table, indexed by 60° sector starting at -30°
/// (screen coordinates: y grows downwards, so 60° points south-east).
const BEARING_SECTORS: [Direction; 6] = [
    Direction::Right,
    Direction::SouthEast,
    Direction::SouthWest,
    Direction::Left,
    Direction::NorthWest,
    Direction::NorthEast,
];

impl Direction {
    pub const ALL: [Direction; 6] = [
        Direction::Left,
        Direction::Right,
        Direction::NorthEast,
        Direction::NorthWest,
        Direction::SouthEast,
        Direction::SouthWest,
    ];

    pub fn edge(self) -> WrapEdges {
        match self {
            Direction::Left => WrapEdges::LEFT,
            Direction::Right => WrapEdges::RIGHT,
            Direction::NorthEast => WrapEdges::NORTH_EAST,
            Direction::NorthWest => WrapEdges::NORTH_WEST,
            Direction::SouthEast => WrapEdges::SOUTH_EAST,
            Direction::SouthWest => WrapEdges::SOUTH_WEST,
        }
    }
}

/// The two diagonal axes of the hex grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Diagonal {
    /// Runs from south-west to north-east.
    ForwardSlash,
    /// Runs from north-west to south-east.
    BackSlash,
}

bitflags! {
    /// Board edges a tile wraps across.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct WrapEdges: u8 {
        const LEFT = 1 << 0;
        const RIGHT = 1 << 1;
        const NORTH_EAST = 1 << 2;
        const NORTH_WEST = 1 << 3;
        const SOUTH_EAST = 1 << 4;
        const SOUTH_WEST = 1 << 5;
    }
}

impl WrapEdges {
    pub fn directions(self) -> impl Iterator<Item = Direction> {
        Direction::ALL
            .into_iter()
            .filter(move |dir| self.contains(dir.edge()))
    }
}
