//! The running match: the board, whose turn it is, and the simulators that
//! act on the board between turns.
//!
//! Sessions are passed in as a roster of `(session, color)` pairs in id
//! order. The match never holds on to sessions itself, so a departure only
//! has to be reflected in the next roster handed in.

use crate::board::{Board, BoardError};
use crate::environment::{self, Hazard, PickupSpawner};
use crate::movement::{self, BoardEvent, MoveError};
use crate::powers::{self, PowerError};
use log::{debug, info};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use shared::{Color, Coord, DestroyReason, MapDefinition, PowerId, SessionId};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

#[derive(Error, Debug, PartialEq)]
pub enum GameError {
    #[error("invalid scenario: {0}")]
    Board(#[from] BoardError),
    #[error("no player has pawns on this map")]
    NoEligiblePlayers,
}

/// How a finished match ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Winner(SessionId),
    Draw,
}

impl Outcome {
    pub fn winner(self) -> Option<SessionId> {
        match self {
            Outcome::Winner(id) => Some(id),
            Outcome::Draw => None,
        }
    }
}

pub struct GameState {
    pub board: Board,
    turn: Option<SessionId>,
    spawner: PickupSpawner,
    hazards: Vec<Hazard>,
    hazard_interval: Duration,
    rng: StdRng,
}

impl GameState {
    /// Builds a match from `map`, keeping only pawns whose color is held by a
    /// roster member, and hands the first turn to a random eligible session.
    pub fn new(
        map: &MapDefinition,
        roster: &[(SessionId, Color)],
        hazard_interval: Duration,
        mut rng: StdRng,
    ) -> Result<Self, GameError> {
        let present: Vec<Color> = roster
            .iter()
            .map(|(_, color)| *color)
            .filter(|color| !color.is_spectator())
            .collect();
        let board = Board::from_map(map, |color| present.contains(&color))?;
        let spawner = PickupSpawner::new(&mut rng);

        let mut game = Self {
            board,
            turn: None,
            spawner,
            hazards: Vec::new(),
            hazard_interval,
            rng,
        };
        let live = game.live_sessions(roster);
        let first = *live
            .choose(&mut game.rng)
            .ok_or(GameError::NoEligiblePlayers)?;
        game.turn = Some(first);
        info!(
            "Match on '{}' begins with {} players, session {} first",
            game.board.name,
            live.len(),
            first
        );
        Ok(game)
    }

    pub fn turn(&self) -> Option<SessionId> {
        self.turn
    }

    pub fn is_turn(&self, session: SessionId) -> bool {
        self.turn == Some(session)
    }

    /// A session may hold the turn if it plays a color with live pawns.
    pub fn is_eligible(&self, color: Color) -> bool {
        !color.is_spectator() && self.board.has_live_pawns(color)
    }

    pub fn live_sessions(&self, roster: &[(SessionId, Color)]) -> Vec<SessionId> {
        roster
            .iter()
            .filter(|(_, color)| self.is_eligible(*color))
            .map(|(id, _)| *id)
            .collect()
    }

    /// `Some` once fewer than two sessions have live pawns.
    pub fn outcome(&self, roster: &[(SessionId, Color)]) -> Option<Outcome> {
        match self.live_sessions(roster).as_slice() {
            [] => Some(Outcome::Draw),
            [winner] => Some(Outcome::Winner(*winner)),
            _ => None,
        }
    }

    /// Hands the turn to the next eligible session after the current holder,
    /// wrapping around the roster. The scan visits each roster entry at most
    /// once; if nobody qualifies the turn is cleared.
    pub fn select_next(&mut self, roster: &[(SessionId, Color)]) -> Option<SessionId> {
        let start = match self.turn {
            Some(current) => roster
                .iter()
                .position(|(id, _)| *id > current)
                .unwrap_or(0),
            None => 0,
        };
        self.turn = (0..roster.len())
            .map(|offset| roster[(start + offset) % roster.len()])
            .find(|(_, color)| self.is_eligible(*color))
            .map(|(id, _)| id);
        debug!("Turn passes to {:?}", self.turn);
        self.turn
    }

    pub fn apply_move(
        &mut self,
        from: Coord,
        to: Coord,
        events: &mut Vec<BoardEvent>,
    ) -> Result<bool, MoveError> {
        movement::execute_move(&mut self.board, from, to, events)
    }

    /// Uses a power and schedules any hazard it starts.
    pub fn apply_power(
        &mut self,
        at: Coord,
        power: PowerId,
        now: Instant,
        events: &mut Vec<BoardEvent>,
    ) -> Result<(), PowerError> {
        let first_new = events.len();
        powers::use_power(&mut self.board, at, power, &mut self.rng, events)?;
        for event in &events[first_new..] {
            if let BoardEvent::HazardStarted {
                origin,
                color,
                budget,
            } = event
            {
                debug!("Hazard started at {} with budget {}", origin, budget);
                self.hazards.push(Hazard::new(
                    *origin,
                    *color,
                    *budget,
                    now + self.hazard_interval,
                ));
            }
        }
        Ok(())
    }

    /// Turn-boundary gravity well pass.
    pub fn gravity(&mut self, events: &mut Vec<BoardEvent>) {
        environment::gravity_tick(&mut self.board, &mut self.rng, events);
    }

    /// Turn-boundary spawner countdown.
    pub fn spawn_pickups(&mut self, events: &mut Vec<BoardEvent>) {
        self.spawner.tick(&mut self.board, &mut self.rng, events);
    }

    /// Removes every pawn of a departing player's color.
    pub fn remove_color(&mut self, color: Color, events: &mut Vec<BoardEvent>) {
        if color.is_spectator() {
            return;
        }
        for at in self.board.destroy_color(color, DestroyReason::OwnerLeft) {
            events.push(BoardEvent::Destroyed {
                at,
                color,
                reason: DestroyReason::OwnerLeft,
            });
        }
    }

    pub fn hazard_count(&self) -> usize {
        self.hazards.len()
    }

    pub fn next_hazard_deadline(&self) -> Option<Instant> {
        self.hazards.iter().map(|h| h.due).min()
    }

    /// Steps every hazard whose deadline has passed and reschedules the ones
    /// that keep going. Returns how many stepped.
    pub fn run_due_hazards(&mut self, now: Instant, events: &mut Vec<BoardEvent>) -> usize {
        let mut stepped = 0;
        let mut hazards = std::mem::take(&mut self.hazards);
        hazards.retain_mut(|hazard| {
            if hazard.due > now {
                return true;
            }
            stepped += 1;
            let alive = hazard.step(&mut self.board, &mut self.rng, events);
            hazard.due = now + self.hazard_interval;
            alive
        });
        self.hazards = hazards;
        stepped
    }

    pub fn snapshot(&self) -> MapDefinition {
        self.board.to_map()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::tests::{flat_board, put};
    use crate::powers::ANT;
    use rand::SeedableRng;

    const TICK: Duration = Duration::from_secs(1);

    fn c(col: i32, row: i32) -> Coord {
        Coord::new(col, row)
    }

    /// 6x6 board with one pawn for each of colors 0..3.
    fn scenario() -> MapDefinition {
        let mut board = flat_board(6, 6);
        put(&mut board, 0, 0, 0);
        put(&mut board, 1, 5, 0);
        put(&mut board, 2, 0, 5);
        put(&mut board, 3, 5, 5);
        board.to_map()
    }

    fn start(roster: &[(SessionId, Color)]) -> GameState {
        GameState::new(&scenario(), roster, TICK, StdRng::seed_from_u64(11)).unwrap()
    }

    #[test]
    fn test_new_filters_absent_colors() {
        let roster = [(0, Color(0)), (1, Color(2))];
        let game = start(&roster);
        assert_eq!(game.board.pawns().count(), 2);
        assert!(game.board.pawn(c(5, 0)).is_none());
        assert!(matches!(game.turn(), Some(0) | Some(1)));
    }

    #[test]
    fn test_new_needs_an_eligible_session() {
        let roster = [(0, Color::SPECTATOR), (1, Color(7))];
        assert!(matches!(
            GameState::new(&scenario(), &roster, TICK, StdRng::seed_from_u64(0)),
            Err(GameError::NoEligiblePlayers)
        ));
    }

    #[test]
    fn test_first_turn_is_random_among_eligible() {
        let roster = [(0, Color(0)), (1, Color::SPECTATOR), (2, Color(1)), (3, Color(6))];
        let mut seen = std::collections::BTreeSet::new();
        for seed in 0..50 {
            let game =
                GameState::new(&scenario(), &roster, TICK, StdRng::seed_from_u64(seed)).unwrap();
            seen.insert(game.turn().unwrap());
        }
        assert_eq!(seen.into_iter().collect::<Vec<_>>(), vec![0, 2]);
    }

    #[test]
    fn test_select_next_skips_spectators_and_pawnless() {
        let roster = [
            (0, Color(0)),
            (1, Color::SPECTATOR),
            (2, Color(6)),
            (3, Color(1)),
        ];
        let mut game = start(&roster);
        game.turn = Some(0);
        assert_eq!(game.select_next(&roster), Some(3));
        assert_eq!(game.select_next(&roster), Some(0));
    }

    #[test]
    fn test_select_next_after_holder_left() {
        let mut game = start(&[(0, Color(0)), (1, Color(1)), (2, Color(2))]);
        game.turn = Some(1);
        let remaining = [(0, Color(0)), (2, Color(2))];
        assert_eq!(game.select_next(&remaining), Some(2));
    }

    #[test]
    fn test_select_next_with_nobody_left() {
        let roster = [(0, Color(0)), (1, Color(1))];
        let mut game = start(&roster);
        let mut events = Vec::new();
        game.remove_color(Color(0), &mut events);
        game.remove_color(Color(1), &mut events);
        assert_eq!(game.select_next(&roster), None);
        assert_eq!(game.select_next(&[]), None);
        assert_eq!(game.outcome(&roster), Some(Outcome::Draw));
    }

    #[test]
    fn test_single_survivor_wins() {
        let roster = [(0, Color(0)), (1, Color(1))];
        let mut game = start(&roster);
        assert_eq!(game.outcome(&roster), None);

        let mut events = Vec::new();
        game.remove_color(Color(1), &mut events);
        assert_eq!(
            events,
            vec![BoardEvent::Destroyed {
                at: c(5, 0),
                color: Color(1),
                reason: DestroyReason::OwnerLeft,
            }]
        );
        assert_eq!(game.outcome(&roster), Some(Outcome::Winner(0)));
        assert_eq!(Outcome::Winner(0).winner(), Some(0));
        assert_eq!(Outcome::Draw.winner(), None);
    }

    #[test]
    fn test_hazard_scheduling() {
        let roster = [(0, Color(0)), (1, Color(1))];
        let mut game = start(&roster);
        game.board.pawn_mut(c(0, 0)).unwrap().grant(ANT);
        let now = Instant::now();

        let mut events = Vec::new();
        game.apply_power(c(0, 0), ANT, now, &mut events).unwrap();
        assert_eq!(game.hazard_count(), 1);
        assert_eq!(game.next_hazard_deadline(), Some(now + TICK));

        // Nothing is due yet.
        assert_eq!(game.run_due_hazards(now, &mut events), 0);
        assert_eq!(game.board.tile(c(0, 0)).unwrap().height, 0);

        let later = now + TICK;
        assert_eq!(game.run_due_hazards(later, &mut events), 1);
        assert_eq!(game.board.tile(c(0, 0)).unwrap().height, 1);
        // The owner's pawn survives its own hazard.
        assert!(game.board.pawn(c(0, 0)).is_some());
        if game.hazard_count() > 0 {
            assert_eq!(game.next_hazard_deadline(), Some(later + TICK));
        }
    }

    #[test]
    fn test_hazard_runs_out() {
        let roster = [(0, Color(0)), (1, Color(1))];
        let mut game = start(&roster);
        game.board.pawn_mut(c(0, 0)).unwrap().grant(ANT);
        let mut now = Instant::now();
        game.apply_power(c(0, 0), ANT, now, &mut Vec::new()).unwrap();

        for _ in 0..powers::ANT_BUDGET {
            now += TICK;
            game.run_due_hazards(now, &mut Vec::new());
        }
        assert_eq!(game.hazard_count(), 0);
        assert_eq!(game.next_hazard_deadline(), None);
    }
}
