//! Randomized tests for game-wide invariants
//!
//! Each test drives the rules engine with seeded random input and checks
//! properties that must hold after every step.

use assert_approx_eq::assert_approx_eq;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use server::board::Board;
use server::game::GameState;
use server::maps::default_map;
use server::movement::{self, BoardEvent};
use server::powers::{random_power, POWERS};
use shared::{Color, Coord, SessionId, MAX_COLORS};
use std::collections::BTreeSet;
use std::time::Duration;

fn full_roster() -> Vec<(SessionId, Color)> {
    (0..MAX_COLORS)
        .map(|c| (c as SessionId, Color(c)))
        .collect()
}

/// Picks a random legal move for `color`, if it has any.
fn random_legal_move(board: &Board, color: Color, rng: &mut StdRng) -> Option<(Coord, Coord)> {
    let mut candidates = Vec::new();
    for pawn in board.pawns().filter(|p| p.color == color) {
        for to in board.radial(pawn.at, pawn.range) {
            if movement::can_move(board, pawn.at, to).is_ok() {
                candidates.push((pawn.at, to));
            }
        }
    }
    candidates.choose(rng).copied()
}

fn assert_board_consistent(board: &Board, initial_pawns: usize) {
    for tile in board.tiles() {
        if let Some(pawn) = tile.pawn() {
            assert_eq!(pawn.at, tile.at, "pawn handle out of sync with its tile");
        }
    }
    let live: BTreeSet<Coord> = board.pawn_coords().into_iter().collect();
    assert_eq!(live.len(), board.pawns().count());
    assert_eq!(live.len() + board.graveyard().len(), initial_pawns);
    assert!(board.graveyard().iter().all(|p| p.destroyed.is_some()));
}

#[test]
fn random_power_matches_spawn_weights() {
    let mut rng = StdRng::seed_from_u64(2024);
    let draws = 200_000;
    let mut counts = vec![0u32; POWERS.len()];
    for _ in 0..draws {
        counts[random_power(&mut rng) as usize] += 1;
    }

    let total: u32 = POWERS.iter().map(|p| p.weight).sum();
    for (index, def) in POWERS.iter().enumerate() {
        let expected = def.weight as f64 / total as f64;
        let observed = counts[index] as f64 / draws as f64;
        assert_approx_eq!(observed, expected, 0.01);
    }
}

#[test]
fn random_play_keeps_board_consistent() {
    for seed in 0..20 {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut game = GameState::new(
            &default_map(),
            &full_roster(),
            Duration::from_secs(1),
            StdRng::seed_from_u64(seed),
        )
        .unwrap();
        let initial = game.board.pawns().count();

        for step in 0..200 {
            let color = Color(rng.gen_range(0..MAX_COLORS));
            let mut events: Vec<BoardEvent> = Vec::new();
            if let Some((from, to)) = random_legal_move(&game.board, color, &mut rng) {
                game.apply_move(from, to, &mut events).unwrap();
            }
            if step % 3 == 0 {
                game.gravity(&mut events);
            }
            game.spawn_pickups(&mut events);
            assert_board_consistent(&game.board, initial);
        }
    }
}

#[test]
fn turn_always_rests_with_an_eligible_session() {
    let roster = full_roster();
    for seed in 0..10 {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut game = GameState::new(
            &default_map(),
            &roster,
            Duration::from_secs(1),
            StdRng::seed_from_u64(seed + 100),
        )
        .unwrap();

        for _ in 0..500 {
            if game.outcome(&roster).is_some() {
                break;
            }
            let turn = game.turn().expect("running match has a turn holder");
            let color = roster
                .iter()
                .find(|(id, _)| *id == turn)
                .map(|(_, color)| *color)
                .unwrap();
            assert!(
                game.is_eligible(color),
                "session {} holds the turn without pawns",
                turn
            );

            let mut events = Vec::new();
            if let Some((from, to)) = random_legal_move(&game.board, color, &mut rng) {
                game.apply_move(from, to, &mut events).unwrap();
            }
            game.gravity(&mut events);
            if game.outcome(&roster).is_some() {
                break;
            }
            let next = game.select_next(&roster);
            assert!(next.is_some());
            game.spawn_pickups(&mut events);
        }
    }
}
