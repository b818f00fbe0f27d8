//! Pawn movement legality and the forced-move resolution pipeline.

use crate::board::{Board, PawnStatus};
use crate::powers;
use shared::{Color, Coord, DestroyReason, PowerId, TileAnimation};
use thiserror::Error;

/// Something observable that happened on the board. The lobby turns these
/// into packets for each recipient.
#[derive(Debug, Clone, PartialEq)]
pub enum BoardEvent {
    /// A player's own move, recorded after any crush and before the
    /// destination resolves.
    Moved { from: Coord, to: Coord },
    /// A pawn was relocated by something other than its owner's move.
    ForcedMove { from: Coord, to: Coord },
    Destroyed {
        at: Coord,
        color: Color,
        reason: DestroyReason,
    },
    PowerAdded {
        at: Coord,
        color: Color,
        power: PowerId,
    },
    PowerUsed {
        at: Coord,
        color: Color,
        power: PowerId,
    },
    MineExploded { at: Coord },
    TileChanged {
        at: Coord,
        animation: Option<TileAnimation>,
    },
    PawnChanged { at: Coord },
    PickupSpawned { at: Coord },
    HazardStarted {
        origin: Coord,
        color: Color,
        budget: u32,
    },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MoveError {
    #[error("no pawn on {0}")]
    NoPawn(Coord),
    #[error("tile {0} does not exist")]
    UnknownTile(Coord),
    #[error("tile {0} is out of reach")]
    OutOfReach(Coord),
    #[error("tile {0} is a black hole")]
    BlackHole(Coord),
    #[error("tile {0} is too high to climb")]
    TooHigh(Coord),
    #[error("tile {0} is smashed")]
    Smashed(Coord),
    #[error("tile {0} is blocked")]
    Blocked(Coord),
}

/// Checks whether the pawn on `from` may move to `to`.
pub fn can_move(board: &Board, from: Coord, to: Coord) -> Result<(), MoveError> {
    let pawn = board.pawn(from).ok_or(MoveError::NoPawn(from))?;
    let origin = board.tile(from).ok_or(MoveError::UnknownTile(from))?;
    let target = board.tile(to).ok_or(MoveError::UnknownTile(to))?;

    let radius = pawn.range + u8::from(pawn.has(PawnStatus::JUMP));
    let own_pad = target.landing_pad == Some(pawn.color);
    let reachable = own_pad
        || board.radial(from, radius).contains(&to)
        || board.wrap_neighbors(from).contains(&to);
    if !reachable {
        return Err(MoveError::OutOfReach(to));
    }

    if target.black_hole.is_some() {
        return Err(MoveError::BlackHole(to));
    }

    if !pawn.has(PawnStatus::HOVER) && target.landing_pad.is_none() {
        if target.height > origin.height + 1 {
            return Err(MoveError::TooHigh(to));
        }
        if target.smashed {
            return Err(MoveError::Smashed(to));
        }
    }

    if let Some(occupant) = target.pawn() {
        if occupant.color == pawn.color || occupant.has(PawnStatus::SHIELD) {
            return Err(MoveError::Blocked(to));
        }
    }
    Ok(())
}

/// A player's move: legality check, crush of an enemy occupant, then
/// `force_move`. Returns whether the mover survived.
pub fn execute_move(
    board: &mut Board,
    from: Coord,
    to: Coord,
    events: &mut Vec<BoardEvent>,
) -> Result<bool, MoveError> {
    can_move(board, from, to)?;
    if let Some(color) = board.destroy(to, DestroyReason::Crushed) {
        events.push(BoardEvent::Destroyed {
            at: to,
            color,
            reason: DestroyReason::Crushed,
        });
    }
    events.push(BoardEvent::Moved { from, to });
    Ok(force_move(board, from, to, events))
}

/// Relocation on behalf of the environment or a power. Announces the move
/// before resolving it.
pub fn pull(board: &mut Board, from: Coord, to: Coord, events: &mut Vec<BoardEvent>) -> bool {
    match board.tile(to) {
        Some(tile) if !tile.is_occupied() && board.pawn(from).is_some() => {}
        _ => return false,
    }
    events.push(BoardEvent::ForcedMove { from, to });
    force_move(board, from, to, events);
    true
}

/// Moves the pawn on `from` to the empty tile `to` and resolves the
/// consequences in a fixed order: black hole, smashed tile, pickup, then the
/// mine on the tile just vacated. Returns whether the pawn survived.
pub fn force_move(board: &mut Board, from: Coord, to: Coord, events: &mut Vec<BoardEvent>) -> bool {
    let Some((color, status)) = board.pawn(from).map(|p| (p.color, p.status)) else {
        return false;
    };
    let origin_mine = board.tile(from).and_then(|t| t.mine);
    if !board.relocate(from, to) {
        return false;
    }
    let climbs = status.contains(PawnStatus::HOVER);

    let Some(target) = board.tile(to) else {
        return false;
    };
    let (hole, smashed, pickup) = (target.black_hole.is_some(), target.smashed, target.pickup);

    if hole {
        destroy(board, to, DestroyReason::HoleFall, events);
        return false;
    }
    if smashed && !climbs {
        destroy(board, to, DestroyReason::Fell, events);
        return false;
    }

    if let Some(power) = pickup {
        if let Some(tile) = board.tile_mut(to) {
            tile.pickup = None;
        }
        powers::add_power(board, to, power, events);
    }

    match origin_mine {
        Some(owner) if owner != color && !climbs => {
            events.push(BoardEvent::MineExploded { at: from });
            if let Some(tile) = board.tile_mut(from) {
                tile.mine = None;
            }
            events.push(BoardEvent::TileChanged {
                at: from,
                animation: None,
            });
            if !status.contains(PawnStatus::SHIELD) {
                destroy(board, to, DestroyReason::Mine, events);
                return false;
            }
            true
        }
        _ => true,
    }
}

/// Destroys the pawn on `at`, recording the event. Returns whether a pawn was
/// there.
pub fn destroy(
    board: &mut Board,
    at: Coord,
    reason: DestroyReason,
    events: &mut Vec<BoardEvent>,
) -> bool {
    match board.destroy(at, reason) {
        Some(color) => {
            events.push(BoardEvent::Destroyed { at, color, reason });
            true
        }
        None => false,
    }
}
