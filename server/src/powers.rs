//! Power table and resolution.
//!
//! Powers are entries in a static, ordered table and are referenced by index
//! everywhere (pawns hold indices, pickups hold indices). Each entry pairs an
//! effect function with its spawn weight and an optional use-precondition.
//! Directional variants of the same named power are separate entries.

use crate::board::{Board, PawnStatus, MAX_RANGE};
use crate::movement::{self, BoardEvent};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use shared::{Color, Coord, DestroyReason, Diagonal, PowerId, TileAnimation};
use thiserror::Error;

/// Hazard steps granted by the Ant power before range bonuses.
pub const ANT_BUDGET: u32 = 4;

pub type Effect = fn(&mut EffectContext<'_>);
pub type Precondition = fn(&Board, Coord) -> bool;

/// Where a power reaches. Only used by clients to draw a targeting hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aim {
    Row,
    ForwardSlash,
    BackSlash,
    Radial,
    Adjacent,
    SelfTile,
}

pub struct PowerDef {
    pub name: &'static str,
    pub aim: Aim,
    pub weight: u32,
    pub consumed: bool,
    pub precondition: Option<Precondition>,
    pub effect: Effect,
}

/// Everything an effect may touch while it runs.
pub struct EffectContext<'a> {
    pub board: &'a mut Board,
    pub user: Coord,
    pub color: Color,
    pub range: u8,
    pub rng: &'a mut StdRng,
    pub events: &'a mut Vec<BoardEvent>,
}

pub const DESTROY_ROW: PowerId = 0;
pub const DESTROY_FORWARD: PowerId = 1;
pub const DESTROY_BACK: PowerId = 2;
pub const DESTROY_RADIAL: PowerId = 3;
pub const RAISE_ROW: PowerId = 4;
pub const RAISE_RADIAL: PowerId = 5;
pub const LOWER_ROW: PowerId = 6;
pub const LOWER_RADIAL: PowerId = 7;
pub const SMASH_ROW: PowerId = 8;
pub const SMASH_RADIAL: PowerId = 9;
pub const SHIELD: PowerId = 10;
pub const HOVER: PowerId = 11;
pub const INVISIBILITY: PowerId = 12;
pub const JUMP: PowerId = 13;
pub const RANGE: PowerId = 14;
pub const MINE: PowerId = 15;
pub const LANDING_PAD: PowerId = 16;
pub const BLACK_HOLE: PowerId = 17;
pub const ANT: PowerId = 18;
pub const PULL: PowerId = 19;

macro_rules! power {
    ($name:expr, $aim:ident, $weight:expr, $pre:expr, $effect:expr) => {
        PowerDef {
            name: $name,
            aim: Aim::$aim,
            weight: $weight,
            consumed: true,
            precondition: $pre,
            effect: $effect,
        }
    };
}

pub static POWERS: [PowerDef; 20] = [
    power!("Destroy", Row, 10, None, destroy_row),
    power!("Destroy", ForwardSlash, 10, None, destroy_forward),
    power!("Destroy", BackSlash, 10, None, destroy_back),
    power!("Destroy", Radial, 6, None, destroy_radial),
    power!("Raise Tile", Row, 8, None, raise_row),
    power!("Raise Tile", Radial, 6, None, raise_radial),
    power!("Lower Tile", Row, 8, None, lower_row),
    power!("Lower Tile", Radial, 6, None, lower_radial),
    power!("Smash", Row, 5, None, smash_row),
    power!("Smash", Radial, 4, None, smash_radial),
    power!("Shield", SelfTile, 8, Some(lacks_shield), shield),
    power!("Hover", SelfTile, 6, Some(lacks_hover), hover),
    power!("Invisibility", SelfTile, 6, Some(lacks_invisibility), invisibility),
    power!("Jump", SelfTile, 8, Some(lacks_jump), jump),
    power!("Range", SelfTile, 8, Some(below_max_range), range_up),
    power!("Mine", SelfTile, 8, Some(has_no_mine), lay_mine),
    power!("Landing Pad", SelfTile, 6, Some(has_no_landing_pad), landing_pad),
    power!("Black Hole", Adjacent, 3, Some(has_free_neighbor), black_hole),
    power!("Ant", SelfTile, 4, None, ant),
    power!("Pull", Radial, 5, None, pull),
];

pub fn is_valid(power: PowerId) -> bool {
    (power as usize) < POWERS.len()
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PowerError {
    #[error("unknown power {0}")]
    UnknownPower(PowerId),
    #[error("no pawn on {0}")]
    NoPawn(Coord),
    #[error("power {0} is not held")]
    Unavailable(PowerId),
    #[error("{0} cannot be used here")]
    PreconditionFailed(&'static str),
}

/// Uses one charge of `power` held by the pawn on `at`.
///
/// Nothing changes unless the pawn holds the power and its precondition
/// passes. The use itself is always public; see [`BoardEvent::PowerUsed`].
pub fn use_power(
    board: &mut Board,
    at: Coord,
    power: PowerId,
    rng: &mut StdRng,
    events: &mut Vec<BoardEvent>,
) -> Result<(), PowerError> {
    let def = POWERS
        .get(power as usize)
        .ok_or(PowerError::UnknownPower(power))?;
    let pawn = board.pawn(at).ok_or(PowerError::NoPawn(at))?;
    if pawn.held(power) == 0 {
        return Err(PowerError::Unavailable(power));
    }
    let (color, range) = (pawn.color, pawn.range);
    if let Some(check) = def.precondition {
        if !check(board, at) {
            return Err(PowerError::PreconditionFailed(def.name));
        }
    }

    events.push(BoardEvent::PowerUsed { at, color, power });
    (def.effect)(&mut EffectContext {
        board: &mut *board,
        user: at,
        color,
        range,
        rng,
        events,
    });

    if def.consumed {
        if let Some(pawn) = board.pawn_mut(at) {
            pawn.spend(power);
        }
    }
    Ok(())
}

/// Grants one charge to the pawn on `at`. The resulting event is private to
/// the owner and spectators.
pub fn add_power(board: &mut Board, at: Coord, power: PowerId, events: &mut Vec<BoardEvent>) {
    if let Some(pawn) = board.pawn_mut(at) {
        pawn.grant(power);
        events.push(BoardEvent::PowerAdded {
            at,
            color: pawn.color,
            power,
        });
    }
}

/// Weighted roulette over the table's spawn weights.
pub fn random_power<R: Rng + ?Sized>(rng: &mut R) -> PowerId {
    let total: u32 = POWERS.iter().map(|p| p.weight).sum();
    let mut roll = rng.gen_range(0..total);
    for (index, def) in POWERS.iter().enumerate() {
        if roll < def.weight {
            return index as PowerId;
        }
        roll -= def.weight;
    }
    (POWERS.len() - 1) as PowerId
}

fn lacks(board: &Board, at: Coord, flag: PawnStatus) -> bool {
    board.pawn(at).is_some_and(|p| !p.has(flag))
}

fn lacks_shield(board: &Board, at: Coord) -> bool {
    lacks(board, at, PawnStatus::SHIELD)
}

fn lacks_hover(board: &Board, at: Coord) -> bool {
    lacks(board, at, PawnStatus::HOVER)
}

fn lacks_invisibility(board: &Board, at: Coord) -> bool {
    lacks(board, at, PawnStatus::INVISIBLE)
}

fn lacks_jump(board: &Board, at: Coord) -> bool {
    lacks(board, at, PawnStatus::JUMP)
}

fn below_max_range(board: &Board, at: Coord) -> bool {
    board.pawn(at).is_some_and(|p| p.range < MAX_RANGE)
}

fn has_no_mine(board: &Board, at: Coord) -> bool {
    board.tile(at).is_some_and(|t| t.mine.is_none())
}

fn has_no_landing_pad(board: &Board, at: Coord) -> bool {
    board.tile(at).is_some_and(|t| t.landing_pad.is_none())
}

fn free_neighbors(board: &Board, at: Coord) -> Vec<Coord> {
    at.neighbors()
        .into_iter()
        .filter(|n| {
            board
                .tile(*n)
                .is_some_and(|t| !t.is_occupied() && t.black_hole.is_none())
        })
        .collect()
}

fn has_free_neighbor(board: &Board, at: Coord) -> bool {
    !free_neighbors(board, at).is_empty()
}

fn destroy_enemies(ctx: &mut EffectContext<'_>, band: Vec<Coord>) {
    for at in band.into_iter().filter(|at| *at != ctx.user) {
        let target = ctx.board.pawn(at).is_some_and(|p| {
            p.color != ctx.color && !p.has(PawnStatus::SHIELD) && !p.has(PawnStatus::INVISIBLE)
        });
        if target {
            movement::destroy(ctx.board, at, DestroyReason::Power, ctx.events);
        }
    }
}

fn destroy_row(ctx: &mut EffectContext<'_>) {
    let band = ctx.board.row_band(ctx.user, ctx.range);
    destroy_enemies(ctx, band);
}

fn destroy_forward(ctx: &mut EffectContext<'_>) {
    let band = ctx
        .board
        .diagonal_band(ctx.user, Diagonal::ForwardSlash, ctx.range);
    destroy_enemies(ctx, band);
}

fn destroy_back(ctx: &mut EffectContext<'_>) {
    let band = ctx
        .board
        .diagonal_band(ctx.user, Diagonal::BackSlash, ctx.range);
    destroy_enemies(ctx, band);
}

fn destroy_radial(ctx: &mut EffectContext<'_>) {
    let band = ctx.board.radial(ctx.user, ctx.range);
    destroy_enemies(ctx, band);
}

fn shift_heights(ctx: &mut EffectContext<'_>, band: Vec<Coord>, delta: i8) {
    let animation = if delta > 0 {
        TileAnimation::Raise
    } else {
        TileAnimation::Lower
    };
    for at in band.into_iter().filter(|at| *at != ctx.user) {
        if ctx.board.adjust_height(at, delta) {
            ctx.events.push(BoardEvent::TileChanged {
                at,
                animation: Some(animation),
            });
        }
    }
}

fn raise_row(ctx: &mut EffectContext<'_>) {
    let band = ctx.board.row_band(ctx.user, ctx.range);
    shift_heights(ctx, band, 1);
}

fn raise_radial(ctx: &mut EffectContext<'_>) {
    let band = ctx.board.radial(ctx.user, ctx.range);
    shift_heights(ctx, band, 1);
}

fn lower_row(ctx: &mut EffectContext<'_>) {
    let band = ctx.board.row_band(ctx.user, ctx.range);
    shift_heights(ctx, band, -1);
}

fn lower_radial(ctx: &mut EffectContext<'_>) {
    let band = ctx.board.radial(ctx.user, ctx.range);
    shift_heights(ctx, band, -1);
}

fn smash(ctx: &mut EffectContext<'_>, band: Vec<Coord>) {
    for at in band.into_iter().filter(|at| *at != ctx.user) {
        let Some(tile) = ctx.board.tile_mut(at) else {
            continue;
        };
        if tile.smashed {
            continue;
        }
        tile.smashed = true;
        let falls = tile.pawn().is_some_and(|p| !p.has(PawnStatus::HOVER));
        ctx.events.push(BoardEvent::TileChanged {
            at,
            animation: Some(TileAnimation::Smash),
        });
        if falls {
            movement::destroy(ctx.board, at, DestroyReason::Fell, ctx.events);
        }
    }
}

fn smash_row(ctx: &mut EffectContext<'_>) {
    let band = ctx.board.row_band(ctx.user, ctx.range);
    smash(ctx, band);
}

fn smash_radial(ctx: &mut EffectContext<'_>) {
    let band = ctx.board.radial(ctx.user, ctx.range);
    smash(ctx, band);
}

fn set_flag(ctx: &mut EffectContext<'_>, flag: PawnStatus) {
    if let Some(pawn) = ctx.board.pawn_mut(ctx.user) {
        pawn.status.insert(flag);
        ctx.events.push(BoardEvent::PawnChanged { at: ctx.user });
    }
}

fn shield(ctx: &mut EffectContext<'_>) {
    set_flag(ctx, PawnStatus::SHIELD);
}

fn hover(ctx: &mut EffectContext<'_>) {
    set_flag(ctx, PawnStatus::HOVER);
}

fn invisibility(ctx: &mut EffectContext<'_>) {
    set_flag(ctx, PawnStatus::INVISIBLE);
}

fn jump(ctx: &mut EffectContext<'_>) {
    set_flag(ctx, PawnStatus::JUMP);
}

fn range_up(ctx: &mut EffectContext<'_>) {
    if let Some(pawn) = ctx.board.pawn_mut(ctx.user) {
        pawn.range = (pawn.range + 1).min(MAX_RANGE);
        ctx.events.push(BoardEvent::PawnChanged { at: ctx.user });
    }
}

fn lay_mine(ctx: &mut EffectContext<'_>) {
    if let Some(tile) = ctx.board.tile_mut(ctx.user) {
        tile.mine = Some(ctx.color);
        ctx.events.push(BoardEvent::TileChanged {
            at: ctx.user,
            animation: None,
        });
    }
}

fn landing_pad(ctx: &mut EffectContext<'_>) {
    if let Some(tile) = ctx.board.tile_mut(ctx.user) {
        tile.landing_pad = Some(ctx.color);
        ctx.events.push(BoardEvent::TileChanged {
            at: ctx.user,
            animation: None,
        });
    }
}

fn black_hole(ctx: &mut EffectContext<'_>) {
    let candidates = free_neighbors(ctx.board, ctx.user);
    let Some(&at) = candidates.choose(&mut *ctx.rng) else {
        return;
    };
    if let Some(tile) = ctx.board.tile_mut(at) {
        tile.black_hole = Some(1);
        ctx.events.push(BoardEvent::TileChanged {
            at,
            animation: None,
        });
    }
}

fn ant(ctx: &mut EffectContext<'_>) {
    ctx.events.push(BoardEvent::HazardStarted {
        origin: ctx.user,
        color: ctx.color,
        budget: ANT_BUDGET + u32::from(ctx.range),
    });
}

/// Drags every exposed enemy within reach one step towards the user.
fn pull(ctx: &mut EffectContext<'_>) {
    let targets: Vec<Coord> = ctx
        .board
        .radial(ctx.user, ctx.range + 1)
        .into_iter()
        .filter(|at| *at != ctx.user)
        .filter(|at| {
            ctx.board.pawn(*at).is_some_and(|p| {
                p.color != ctx.color
                    && !p.has(PawnStatus::SHIELD)
                    && !p.has(PawnStatus::INVISIBLE)
            })
        })
        .collect();

    for at in targets {
        let Some(dir) = at.bearing_to(&ctx.user) else {
            continue;
        };
        let dest = at.neighbor(dir);
        if dest != ctx.user {
            movement::pull(ctx.board, at, dest, ctx.events);
        }
    }
}
