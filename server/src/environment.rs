//! Environmental simulators: the pickup spawner and gravity wells, both run
//! on turn boundaries, and the spreading hazard, run on its own timer.

use crate::board::Board;
use crate::movement::{self, BoardEvent};
use crate::powers;
use log::debug;
use rand::seq::{IteratorRandom, SliceRandom};
use rand::Rng;
use shared::{Color, Coord, DestroyReason, TileAnimation, MAX_HEIGHT};
use tokio::time::Instant;

const SPAWN_COUNTDOWN: std::ops::RangeInclusive<u32> = 1..=6;
const SPAWN_BATCH: std::ops::RangeInclusive<usize> = 1..=4;

/// Drops random power pickups onto the board every few turns.
#[derive(Debug, Clone)]
pub struct PickupSpawner {
    countdown: u32,
    batch: usize,
}

impl PickupSpawner {
    pub fn new<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self {
            countdown: rng.gen_range(SPAWN_COUNTDOWN),
            batch: rng.gen_range(SPAWN_BATCH),
        }
    }

    pub fn countdown(&self) -> u32 {
        self.countdown
    }

    pub fn batch(&self) -> usize {
        self.batch
    }

    /// Advances the countdown by one turn, spawning a batch when it expires.
    /// Returns the coordinates that received a pickup.
    pub fn tick<R: Rng + ?Sized>(
        &mut self,
        board: &mut Board,
        rng: &mut R,
        events: &mut Vec<BoardEvent>,
    ) -> Vec<Coord> {
        self.countdown = self.countdown.saturating_sub(1);
        if self.countdown > 0 {
            return Vec::new();
        }

        // Occupied, mined and black-hole tiles stay eligible; only smashed
        // tiles are skipped.
        let chosen = board
            .tiles()
            .filter(|t| !t.smashed)
            .map(|t| t.at)
            .choose_multiple(rng, self.batch);
        for at in &chosen {
            let power = powers::random_power(rng);
            if let Some(tile) = board.tile_mut(*at) {
                tile.pickup = Some(power);
            }
            events.push(BoardEvent::PickupSpawned { at: *at });
            events.push(BoardEvent::TileChanged {
                at: *at,
                animation: None,
            });
        }
        debug!("Spawned {} pickups", chosen.len());

        self.countdown = rng.gen_range(SPAWN_COUNTDOWN);
        self.batch = rng.gen_range(SPAWN_BATCH);
        chosen
    }
}

/// Probability that a hole of `power` pulls a pawn at squared plane
/// distance `distance_sq` during one tick. Values above 1 always pull.
pub fn pull_chance(power: u8, distance_sq: f64) -> f64 {
    f64::from(power) / distance_sq
}

/// Lets every black hole tug at every live pawn once. Holes pull in board
/// order, each from wherever the previous holes left the pawns.
pub fn gravity_tick<R: Rng + ?Sized>(board: &mut Board, rng: &mut R, events: &mut Vec<BoardEvent>) {
    let holes: Vec<(Coord, u8)> = board
        .tiles()
        .filter_map(|t| t.black_hole.map(|power| (t.at, power)))
        .collect();

    for (hole, power) in holes {
        for at in board.pawn_coords() {
            let distance_sq = at.plane_distance_sq(&hole);
            if distance_sq == 0.0 {
                continue;
            }
            if rng.gen::<f64>() >= pull_chance(power, distance_sq) {
                continue;
            }
            let Some(dir) = at.bearing_to(&hole) else {
                continue;
            };
            let dest = at.neighbor(dir);
            let Some(height) = board.tile(at).map(|t| t.height) else {
                continue;
            };
            let open = board
                .tile(dest)
                .is_some_and(|t| !t.is_occupied() && t.height <= height + 1);
            if open && movement::pull(board, at, dest, events) {
                debug!("Gravity well at {} pulled {} to {}", hole, at, dest);
            }
        }
    }
}

/// A terrain hazard walking the board, raising tiles and destroying enemy
/// pawns in its path.
#[derive(Debug, Clone, PartialEq)]
pub struct Hazard {
    pub at: Coord,
    pub color: Color,
    pub budget: u32,
    pub due: Instant,
}

impl Hazard {
    pub fn new(at: Coord, color: Color, budget: u32, due: Instant) -> Self {
        Self {
            at,
            color,
            budget,
            due,
        }
    }

    /// Runs one step on the current tile. Returns whether the hazard keeps
    /// going.
    pub fn step<R: Rng + ?Sized>(
        &mut self,
        board: &mut Board,
        rng: &mut R,
        events: &mut Vec<BoardEvent>,
    ) -> bool {
        let raised = board.adjust_height(self.at, 1);
        if board.pawn(self.at).is_some_and(|p| p.color != self.color) {
            movement::destroy(board, self.at, DestroyReason::Hazard, events);
        }
        events.push(BoardEvent::TileChanged {
            at: self.at,
            animation: raised.then_some(TileAnimation::Raise),
        });

        self.budget = self.budget.saturating_sub(1);
        if self.budget == 0 {
            return false;
        }

        let candidates: Vec<Coord> = self
            .at
            .neighbors()
            .into_iter()
            .filter(|n| board.tile(*n).is_some_and(|t| t.height < MAX_HEIGHT))
            .collect();
        match candidates.choose(rng) {
            Some(next) => {
                self.at = *next;
                true
            }
            None => false,
        }
    }
}
