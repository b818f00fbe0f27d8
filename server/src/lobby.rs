//! Lobby/game state machine.
//!
//! The [`Lobby`] owns every piece of shared state: the session directory, the
//! current scenario and, while a match runs, the [`GameState`]. It is driven
//! by three inputs (decoded packets, disconnects and timer expiry) and
//! answers by queueing [`Outgoing`] items that the network layer delivers.
//! Nothing here touches a socket, which keeps the whole game testable
//! without I/O.

use crate::board::Board;
use crate::client_manager::ClientManager;
use crate::config::ServerConfig;
use crate::game::{GameState, Outcome};
use crate::maps::{self, MapError, MapLoader};
use crate::movement::BoardEvent;
use crate::powers;
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::{
    Color, Coord, DestroyReason, MapDefinition, Packet, ParticleAnimation, PawnAnimation,
    PowerId, SessionId,
};
use std::collections::BTreeSet;
use std::net::SocketAddr;
use tokio::time::Instant;

/// Work for the network layer.
#[derive(Debug, Clone, PartialEq)]
pub enum Outgoing {
    Send { to: SessionId, packet: Packet },
    /// Flush what is queued for the session, then drop its connection.
    Close { session: SessionId },
}

#[derive(Debug, Default)]
pub struct Outbox {
    items: Vec<Outgoing>,
}

impl Outbox {
    pub fn send(&mut self, to: SessionId, packet: Packet) {
        self.items.push(Outgoing::Send { to, packet });
    }

    /// Sends to every joined session.
    pub fn broadcast(&mut self, clients: &ClientManager, packet: Packet) {
        for id in clients.joined_ids() {
            self.send(id, packet.clone());
        }
    }

    /// Sends a packet carrying tile state. Players get it with pickup
    /// identities concealed; spectators get it as is.
    pub fn send_board(&mut self, clients: &ClientManager, to: SessionId, packet: &Packet) {
        let spectator = clients.get(to).is_some_and(|c| c.is_spectator());
        let view = if spectator {
            packet.clone()
        } else {
            packet.concealed()
        };
        self.send(to, view);
    }

    pub fn broadcast_board(&mut self, clients: &ClientManager, packet: Packet) {
        for id in clients.joined_ids() {
            self.send_board(clients, id, &packet);
        }
    }

    pub fn broadcast_except(&mut self, clients: &ClientManager, except: SessionId, packet: Packet) {
        for id in clients.joined_ids().into_iter().filter(|id| *id != except) {
            self.send(id, packet.clone());
        }
    }

    pub fn close(&mut self, session: SessionId) {
        self.items.push(Outgoing::Close { session });
    }

    pub fn drain(&mut self) -> Vec<Outgoing> {
        std::mem::take(&mut self.items)
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

pub enum Mode {
    Lobby,
    Game(GameState),
}

pub struct Lobby {
    clients: ClientManager,
    mode: Mode,
    map: MapDefinition,
    maps: MapLoader,
    config: ServerConfig,
    rng: StdRng,
    outbox: Outbox,
}

impl Lobby {
    /// Loads the configured scenario and opens an empty lobby.
    pub fn new(config: ServerConfig) -> Result<Self, MapError> {
        let maps = MapLoader::new(&config.maps_dir);
        let map = maps.load(&config.map_name)?;
        Ok(Self::with_map(config, map))
    }

    pub fn with_map(config: ServerConfig, map: MapDefinition) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            clients: ClientManager::new(config.max_clients),
            mode: Mode::Lobby,
            map,
            maps: MapLoader::new(&config.maps_dir),
            config,
            rng,
            outbox: Outbox::default(),
        }
    }

    pub fn clients(&self) -> &ClientManager {
        &self.clients
    }

    pub fn map(&self) -> &MapDefinition {
        &self.map
    }

    pub fn game(&self) -> Option<&GameState> {
        match &self.mode {
            Mode::Game(game) => Some(game),
            Mode::Lobby => None,
        }
    }

    pub fn in_game(&self) -> bool {
        matches!(self.mode, Mode::Game(_))
    }

    pub fn drain_outbox(&mut self) -> Vec<Outgoing> {
        self.outbox.drain()
    }

    /// Registers a fresh connection. `None` means the server is full.
    pub fn connect(&mut self, addr: SocketAddr) -> Option<SessionId> {
        self.clients.add_client(addr)
    }

    /// Removes a session and runs departure logic. Returns false if the
    /// session was already gone, so repeated calls are harmless.
    pub fn disconnect(&mut self, id: SessionId) -> bool {
        let Some(client) = self.clients.remove_client(id) else {
            return false;
        };
        if !client.is_joined() {
            return true;
        }

        self.outbox.broadcast(
            &self.clients,
            Packet::PlayerLeave {
                session: id,
                color: client.color,
            },
        );

        if let Mode::Game(game) = &mut self.mode {
            let mut events = Vec::new();
            game.remove_color(client.color, &mut events);
            let held_turn = game.is_turn(id);
            publish(&mut self.outbox, &self.clients, &game.board, events);
            if self.check_game_over() {
                return true;
            }
            if held_turn {
                self.pass_turn();
            }
        }
        true
    }

    pub fn handle_packet(&mut self, id: SessionId, packet: Packet, now: Instant) {
        if self.clients.get(id).is_none() {
            debug!("Dropping {} from departed session {}", packet.kind(), id);
            return;
        }
        if let Packet::HandshakeInit {
            client_version,
            name,
            spectator,
        } = packet
        {
            self.handshake(id, client_version, &name, spectator);
            return;
        }
        if !self.clients.is_joined(id) {
            warn!("Session {} sent {} before its handshake", id, packet.kind());
            return;
        }

        match packet {
            Packet::Quit => {
                self.disconnect(id);
                self.outbox.close(id);
            }
            Packet::ColorChange { color, .. } => self.change_color(id, color),
            Packet::Chat { text, .. } => self.chat(id, text),
            Packet::StartMatch => self.start_match(id),
            Packet::MapChange { name } => self.change_map(id, &name),
            Packet::MapDefinition { map } => self.upload_map(id, map),
            Packet::Move { from, to } => self.handle_move(id, from, to),
            Packet::PowerUse { at, power } => self.handle_power(id, at, power, now),
            other => warn!("Unexpected {} from session {}", other.kind(), id),
        }
    }

    /// Earliest pending hazard step, if a match is running.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.game().and_then(GameState::next_hazard_deadline)
    }

    /// Runs every hazard step due at `now`.
    pub fn on_timer(&mut self, now: Instant) {
        let Mode::Game(game) = &mut self.mode else {
            return;
        };
        let mut events = Vec::new();
        if game.run_due_hazards(now, &mut events) == 0 {
            return;
        }
        publish(&mut self.outbox, &self.clients, &game.board, events);
        self.settle();
    }

    fn roster(&self) -> Vec<(SessionId, Color)> {
        self.clients.joined().map(|c| (c.id, c.color)).collect()
    }

    fn reject(&mut self, id: SessionId, reason: impl ToString) {
        self.outbox.send(
            id,
            Packet::AckBadMove {
                reason: reason.to_string(),
            },
        );
    }

    fn handshake(&mut self, id: SessionId, client_version: u32, name: &str, spectator: bool) {
        if self.clients.is_joined(id) {
            warn!("Session {} repeated its handshake", id);
            return;
        }
        let player = match self
            .clients
            .complete_handshake(id, client_version, name, spectator)
        {
            Ok(player) => player,
            Err(e) => {
                info!("Rejecting session {}: {}", id, e);
                self.outbox.send(
                    id,
                    Packet::Rejected {
                        reason: e.to_string(),
                    },
                );
                self.outbox.close(id);
                return;
            }
        };

        self.outbox
            .broadcast_except(&self.clients, id, Packet::PlayerJoin { player });
        self.outbox.send(
            id,
            Packet::RosterInfo {
                you: id,
                players: self.clients.roster(),
                settings: self.config.settings(),
            },
        );
        self.outbox.send_board(
            &self.clients,
            id,
            &Packet::MapDefinition {
                map: self.map.clone(),
            },
        );
        if let Mode::Game(game) = &self.mode {
            if let Some(turn) = game.turn() {
                self.outbox.send_board(
                    &self.clients,
                    id,
                    &Packet::MatchBegin {
                        first_turn: turn,
                        map: game.snapshot(),
                    },
                );
                self.outbox.send(id, Packet::TurnNotice { session: turn });
            }
        }
    }

    fn change_color(&mut self, id: SessionId, color: Color) {
        if self.in_game() {
            self.reject(id, "colors are locked during a match");
            return;
        }
        match self.clients.set_color(id, color) {
            Ok(()) => {
                debug!("Session {} now plays color {}", id, color.0);
                self.outbox
                    .broadcast(&self.clients, Packet::ColorChange { session: id, color });
            }
            Err(e) => self.reject(id, e),
        }
    }

    fn chat(&mut self, id: SessionId, text: String) {
        if text.trim().is_empty() {
            return;
        }
        self.outbox
            .broadcast(&self.clients, Packet::Chat { session: id, text });
    }

    fn start_match(&mut self, id: SessionId) {
        if !self.clients.is_admin(id) {
            debug!("Ignoring start request from non-admin session {}", id);
            return;
        }
        if self.in_game() {
            warn!("Start requested while a match is running");
            return;
        }

        let rng = StdRng::seed_from_u64(self.rng.gen());
        let roster = self.roster();
        let game = match GameState::new(&self.map, &roster, self.config.hazard_interval, rng) {
            Ok(game) => game,
            Err(e) => {
                warn!("Cannot start match: {}", e);
                self.reject(id, e);
                return;
            }
        };
        let Some(first_turn) = game.turn() else {
            return;
        };
        self.outbox.broadcast_board(
            &self.clients,
            Packet::MatchBegin {
                first_turn,
                map: game.snapshot(),
            },
        );
        self.outbox
            .broadcast(&self.clients, Packet::TurnNotice { session: first_turn });
        self.mode = Mode::Game(game);
    }

    fn change_map(&mut self, id: SessionId, name: &str) {
        if !self.clients.is_admin(id) {
            debug!("Ignoring map change from non-admin session {}", id);
            return;
        }
        if self.in_game() {
            warn!("Map change requested while a match is running");
            return;
        }
        match self.maps.load(name) {
            Ok(map) => {
                info!("Map changed to '{}'", name);
                self.map = map;
                self.outbox.broadcast(
                    &self.clients,
                    Packet::MapChange {
                        name: name.to_string(),
                    },
                );
                self.outbox.broadcast_board(
                    &self.clients,
                    Packet::MapDefinition {
                        map: self.map.clone(),
                    },
                );
            }
            Err(e) => {
                warn!("Cannot load map '{}': {}", name, e);
                self.reject(id, e);
            }
        }
    }

    fn upload_map(&mut self, id: SessionId, map: MapDefinition) {
        if !self.clients.is_admin(id) {
            debug!("Ignoring map upload from non-admin session {}", id);
            return;
        }
        if self.in_game() {
            warn!("Map upload while a match is running");
            return;
        }
        if let Err(e) = maps::validate(&map) {
            warn!("Rejecting uploaded map '{}': {}", map.name, e);
            self.reject(id, e);
            return;
        }
        info!("Admin uploaded map '{}'", map.name);
        self.map = map;
        self.outbox.broadcast_board(
            &self.clients,
            Packet::MapDefinition {
                map: self.map.clone(),
            },
        );
    }

    /// Common checks for turn commands. Returns false after replying or
    /// logging when the command must be dropped.
    fn may_command(&mut self, id: SessionId, at: Coord) -> bool {
        let color = self.clients.color_of(id);
        let Mode::Game(game) = &self.mode else {
            warn!("Session {} sent a turn command outside a match", id);
            return false;
        };
        if !game.board.contains(at) {
            warn!("Session {} named unknown tile {}", id, at);
            return false;
        }
        if !game.is_turn(id) {
            self.reject(id, "not your turn");
            return false;
        }
        if game.board.pawn(at).map(|p| p.color) != color {
            self.reject(id, format!("no pawn of yours on {}", at));
            return false;
        }
        true
    }

    fn handle_move(&mut self, id: SessionId, from: Coord, to: Coord) {
        if !self.may_command(id, from) {
            return;
        }
        let Mode::Game(game) = &mut self.mode else {
            return;
        };
        if !game.board.contains(to) {
            warn!("Session {} moved to unknown tile {}", id, to);
            return;
        }

        let mut events = Vec::new();
        match game.apply_move(from, to, &mut events) {
            Ok(survived) => {
                debug!("Session {} moved {} -> {} (survived: {})", id, from, to, survived);
                self.outbox.send(id, Packet::AckOk);
                publish(&mut self.outbox, &self.clients, &game.board, events);
                self.next_turn();
            }
            Err(e) => self.reject(id, e),
        }
    }

    fn handle_power(&mut self, id: SessionId, at: Coord, power: PowerId, now: Instant) {
        if !powers::is_valid(power) {
            warn!("Session {} used unknown power {}", id, power);
            return;
        }
        if !self.may_command(id, at) {
            return;
        }
        let Mode::Game(game) = &mut self.mode else {
            return;
        };

        let mut events = Vec::new();
        match game.apply_power(at, power, now, &mut events) {
            Ok(()) => {
                debug!("Session {} used power {} on {}", id, power, at);
                self.outbox.send(id, Packet::AckOk);
                publish(&mut self.outbox, &self.clients, &game.board, events);
                self.settle();
            }
            Err(e) => self.reject(id, e),
        }
    }

    /// Turn advance after a move: gravity, game-over check, then hand over.
    fn next_turn(&mut self) {
        let Mode::Game(game) = &mut self.mode else {
            return;
        };
        let mut events = Vec::new();
        game.gravity(&mut events);
        publish(&mut self.outbox, &self.clients, &game.board, events);
        if self.check_game_over() {
            return;
        }
        self.pass_turn();
    }

    /// Hands the turn on without a gravity tick, then counts down the spawner.
    fn pass_turn(&mut self) {
        let roster = self.roster();
        let Mode::Game(game) = &mut self.mode else {
            return;
        };
        let Some(next) = game.select_next(&roster) else {
            self.end_match(Outcome::Draw);
            return;
        };
        let mut events = Vec::new();
        game.spawn_pickups(&mut events);
        publish(&mut self.outbox, &self.clients, &game.board, events);
        self.outbox
            .broadcast(&self.clients, Packet::TurnNotice { session: next });
    }

    /// After something outside the turn order changed the board: end the
    /// match if it is decided, or skip a turn holder that lost its pawns.
    fn settle(&mut self) {
        if self.check_game_over() {
            return;
        }
        let roster = self.roster();
        let Mode::Game(game) = &self.mode else {
            return;
        };
        let holder_ok = game.turn().is_some_and(|turn| {
            roster
                .iter()
                .any(|(id, color)| *id == turn && game.is_eligible(*color))
        });
        if !holder_ok {
            self.pass_turn();
        }
    }

    fn check_game_over(&mut self) -> bool {
        if !self.config.game_over_checks {
            return false;
        }
        let roster = self.roster();
        let outcome = match &self.mode {
            Mode::Game(game) => game.outcome(&roster),
            Mode::Lobby => None,
        };
        match outcome {
            Some(outcome) => {
                self.end_match(outcome);
                true
            }
            None => false,
        }
    }

    fn end_match(&mut self, outcome: Outcome) {
        info!("Match over: {:?}", outcome);
        self.outbox.broadcast(
            &self.clients,
            Packet::GameOver {
                winner: outcome.winner(),
            },
        );
        self.mode = Mode::Lobby;
    }
}

fn destroy_animation(reason: DestroyReason) -> PawnAnimation {
    match reason {
        DestroyReason::Crushed => PawnAnimation::Crushed,
        DestroyReason::Fell => PawnAnimation::Fall,
        DestroyReason::HoleFall => PawnAnimation::HoleFall,
        DestroyReason::Mine
        | DestroyReason::Power
        | DestroyReason::Hazard
        | DestroyReason::OwnerLeft => PawnAnimation::Dissolve,
    }
}

/// Turns board events into packets, in event order, followed by one
/// `StateUpdate` covering every touched tile. A listed tile without a listed
/// pawn is empty.
fn publish(outbox: &mut Outbox, clients: &ClientManager, board: &Board, events: Vec<BoardEvent>) {
    if events.is_empty() {
        return;
    }
    let mut dirty = BTreeSet::new();

    for event in events {
        match event {
            BoardEvent::Moved { from, to } => {
                outbox.broadcast(clients, Packet::Move { from, to });
                dirty.extend([from, to]);
            }
            BoardEvent::ForcedMove { from, to } => {
                outbox.broadcast(clients, Packet::ForcedMove { from, to });
                outbox.broadcast(
                    clients,
                    Packet::PawnAnimation {
                        at: to,
                        kind: PawnAnimation::Pulled,
                    },
                );
                dirty.extend([from, to]);
            }
            BoardEvent::Destroyed { at, color, reason } => {
                outbox.broadcast(
                    clients,
                    Packet::PawnAnimation {
                        at,
                        kind: destroy_animation(reason),
                    },
                );
                outbox.broadcast(clients, Packet::Destroy { at, color, reason });
                dirty.insert(at);
            }
            BoardEvent::PowerAdded { at, color, power } => {
                // Only the owner and spectators learn which power it was.
                for client in clients.joined() {
                    let visible = client.color == color || client.is_spectator();
                    outbox.send(
                        client.id,
                        Packet::PowerAcquired {
                            at,
                            color,
                            power: visible.then_some(power),
                        },
                    );
                }
            }
            BoardEvent::PowerUsed { at, color, power } => {
                outbox.broadcast(clients, Packet::PowerUsed { at, color, power });
            }
            BoardEvent::MineExploded { at } => {
                outbox.broadcast(
                    clients,
                    Packet::ParticleAnimation {
                        at,
                        kind: ParticleAnimation::Explosion,
                    },
                );
                dirty.insert(at);
            }
            BoardEvent::TileChanged { at, animation } => {
                if let Some(kind) = animation {
                    outbox.broadcast(clients, Packet::TileAnimation { at, kind });
                }
                dirty.insert(at);
            }
            BoardEvent::PawnChanged { at } => {
                dirty.insert(at);
            }
            BoardEvent::PickupSpawned { at } => {
                outbox.broadcast(
                    clients,
                    Packet::ParticleAnimation {
                        at,
                        kind: ParticleAnimation::PickupSpawn,
                    },
                );
                dirty.insert(at);
            }
            BoardEvent::HazardStarted { origin, .. } => {
                dirty.insert(origin);
            }
        }
    }

    let tiles = dirty
        .iter()
        .filter_map(|at| board.tile(*at))
        .map(|t| t.state())
        .collect();
    let pawns = dirty
        .iter()
        .filter_map(|at| board.pawn(*at))
        .map(|p| p.state())
        .collect();
    outbox.broadcast_board(clients, Packet::StateUpdate { tiles, pawns });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::tests::{flat_board, put};
    use crate::movement;
    use crate::powers::{ANT, RANGE};
    use shared::{ADMIN_SESSION, HIDDEN_PICKUP, PROTOCOL_VERSION};
    use std::time::Duration;

    fn c(col: i32, row: i32) -> Coord {
        Coord::new(col, row)
    }

    fn addr() -> SocketAddr {
        "127.0.0.1:9000".parse().unwrap()
    }

    fn config() -> ServerConfig {
        ServerConfig {
            seed: Some(42),
            maps_dir: std::env::temp_dir().join("hexfall-lobby-tests-none"),
            ..ServerConfig::default()
        }
    }

    /// Colors 0 and 1 face each other on adjacent tiles.
    fn duel_map() -> MapDefinition {
        let mut board = flat_board(4, 3);
        put(&mut board, 0, 1, 1);
        put(&mut board, 1, 2, 1);
        board.to_map()
    }

    /// Colors 0 and 1 in opposite corners with pickups next to both.
    fn corners_map() -> MapDefinition {
        let mut board = flat_board(6, 6);
        put(&mut board, 0, 0, 0);
        put(&mut board, 1, 5, 5);
        board.tile_mut(c(1, 0)).unwrap().pickup = Some(RANGE);
        board.tile_mut(c(4, 5)).unwrap().pickup = Some(RANGE);
        board.to_map()
    }

    fn join(lobby: &mut Lobby, name: &str, spectator: bool) -> SessionId {
        let id = lobby.connect(addr()).unwrap();
        lobby.handle_packet(
            id,
            Packet::HandshakeInit {
                client_version: PROTOCOL_VERSION,
                name: name.to_string(),
                spectator,
            },
            Instant::now(),
        );
        id
    }

    fn packets_for(outgoing: &[Outgoing], session: SessionId) -> Vec<Packet> {
        outgoing
            .iter()
            .filter_map(|o| match o {
                Outgoing::Send { to, packet } if *to == session => Some(packet.clone()),
                _ => None,
            })
            .collect()
    }

    /// Two players in a started match, outbox drained.
    fn started(map: MapDefinition) -> Lobby {
        let mut lobby = Lobby::with_map(config(), map);
        join(&mut lobby, "alice", false);
        join(&mut lobby, "bob", false);
        lobby.handle_packet(ADMIN_SESSION, Packet::StartMatch, Instant::now());
        assert!(lobby.in_game());
        lobby.drain_outbox();
        lobby
    }

    fn holder(lobby: &Lobby) -> SessionId {
        lobby.game().unwrap().turn().unwrap()
    }

    /// Home tile and a free step for each session of `corners_map`.
    fn corner_step(id: SessionId) -> (Coord, Coord) {
        if id == 0 {
            (c(0, 0), c(1, 0))
        } else {
            (c(5, 5), c(4, 5))
        }
    }

    #[test]
    fn test_handshake_sends_roster_and_map() {
        let mut lobby = Lobby::with_map(config(), duel_map());
        let alice = join(&mut lobby, "alice", false);
        let out = lobby.drain_outbox();
        let packets = packets_for(&out, alice);
        assert!(matches!(
            &packets[0],
            Packet::RosterInfo { you, players, .. } if *you == alice && players.len() == 1
        ));
        assert_eq!(packets[1], Packet::MapDefinition { map: duel_map() });

        let bob = join(&mut lobby, "bob", false);
        let out = lobby.drain_outbox();
        let to_alice = packets_for(&out, alice);
        assert_eq!(
            to_alice,
            vec![Packet::PlayerJoin {
                player: lobby.clients().get(bob).unwrap().info(),
            }]
        );
        assert_eq!(lobby.clients().color_of(bob), Some(Color(1)));
    }

    #[test]
    fn test_bad_handshake_is_rejected_and_closed() {
        let mut lobby = Lobby::with_map(config(), duel_map());
        let id = join(&mut lobby, "  ", false);
        let out = lobby.drain_outbox();
        assert!(matches!(packets_for(&out, id)[0], Packet::Rejected { .. }));
        assert!(out.contains(&Outgoing::Close { session: id }));
        assert!(!lobby.clients().is_joined(id));
        // Dropping a session that never joined tells nobody.
        assert!(lobby.disconnect(id));
        assert!(lobby.drain_outbox().is_empty());
    }

    #[test]
    fn test_commands_before_handshake_are_dropped() {
        let mut lobby = Lobby::with_map(config(), duel_map());
        let id = lobby.connect(addr()).unwrap();
        lobby.handle_packet(id, Packet::StartMatch, Instant::now());
        lobby.handle_packet(
            id,
            Packet::Chat {
                session: id,
                text: "hi".to_string(),
            },
            Instant::now(),
        );
        assert!(lobby.drain_outbox().is_empty());
        assert!(!lobby.in_game());
    }

    #[test]
    fn test_only_admin_starts() {
        let mut lobby = Lobby::with_map(config(), duel_map());
        join(&mut lobby, "alice", false);
        let bob = join(&mut lobby, "bob", false);
        lobby.drain_outbox();

        lobby.handle_packet(bob, Packet::StartMatch, Instant::now());
        assert!(!lobby.in_game());
        assert!(lobby.drain_outbox().is_empty());

        lobby.handle_packet(ADMIN_SESSION, Packet::StartMatch, Instant::now());
        assert!(lobby.in_game());
        let out = lobby.drain_outbox();
        for id in [ADMIN_SESSION, bob] {
            let packets = packets_for(&out, id);
            assert!(matches!(packets[0], Packet::MatchBegin { .. }));
            assert!(matches!(packets[1], Packet::TurnNotice { .. }));
        }
    }

    #[test]
    fn test_start_refused_without_players_on_map() {
        let mut lobby = Lobby::with_map(config(), duel_map());
        let admin = join(&mut lobby, "watcher", true);
        lobby.drain_outbox();
        lobby.handle_packet(admin, Packet::StartMatch, Instant::now());
        assert!(!lobby.in_game());
        assert!(matches!(
            packets_for(&lobby.drain_outbox(), admin)[0],
            Packet::AckBadMove { .. }
        ));
    }

    #[test]
    fn test_move_by_non_holder_is_refused() {
        let mut lobby = started(corners_map());
        let turn = holder(&lobby);
        let other = 1 - turn;
        let (from, to) = corner_step(other);
        lobby.handle_packet(other, Packet::Move { from, to }, Instant::now());
        let out = lobby.drain_outbox();
        assert_eq!(
            packets_for(&out, other),
            vec![Packet::AckBadMove {
                reason: "not your turn".to_string(),
            }]
        );
        assert!(lobby.game().unwrap().board.pawn(from).is_some());
    }

    #[test]
    fn test_move_ends_turn_and_collects_pickup_privately() {
        let mut lobby = started(corners_map());
        let spectator = join(&mut lobby, "watcher", true);
        lobby.drain_outbox();

        let turn = holder(&lobby);
        let other = 1 - turn;
        let (from, to) = corner_step(turn);
        lobby.handle_packet(turn, Packet::Move { from, to }, Instant::now());
        let out = lobby.drain_outbox();

        let mine = packets_for(&out, turn);
        assert_eq!(mine[0], Packet::AckOk);
        assert!(mine.contains(&Packet::Move { from, to }));
        let color = Color(turn as u8);
        assert!(mine.contains(&Packet::PowerAcquired {
            at: to,
            color,
            power: Some(RANGE),
        }));
        assert!(packets_for(&out, other).contains(&Packet::PowerAcquired {
            at: to,
            color,
            power: None,
        }));
        assert!(packets_for(&out, spectator).contains(&Packet::PowerAcquired {
            at: to,
            color,
            power: Some(RANGE),
        }));

        assert_eq!(holder(&lobby), other);
        assert_eq!(
            packets_for(&out, other).last(),
            Some(&Packet::TurnNotice { session: other })
        );
    }

    #[test]
    fn test_power_use_keeps_turn() {
        let mut lobby = started(corners_map());
        let turn = holder(&lobby);
        let (home, _) = corner_step(turn);
        let Mode::Game(game) = &mut lobby.mode else {
            unreachable!()
        };
        game.board.pawn_mut(home).unwrap().grant(RANGE);

        lobby.handle_packet(
            turn,
            Packet::PowerUse {
                at: home,
                power: RANGE,
            },
            Instant::now(),
        );
        let out = lobby.drain_outbox();
        assert_eq!(packets_for(&out, turn)[0], Packet::AckOk);
        assert!(packets_for(&out, 1 - turn).contains(&Packet::PowerUsed {
            at: home,
            color: Color(turn as u8),
            power: RANGE,
        }));
        assert_eq!(holder(&lobby), turn);
        assert_eq!(lobby.game().unwrap().board.pawn(home).unwrap().range, 1);

        // The charge is spent now.
        lobby.handle_packet(
            turn,
            Packet::PowerUse {
                at: home,
                power: RANGE,
            },
            Instant::now(),
        );
        assert!(matches!(
            packets_for(&lobby.drain_outbox(), turn)[0],
            Packet::AckBadMove { .. }
        ));
    }

    #[test]
    fn test_crushing_last_enemy_wins() {
        let mut lobby = started(duel_map());
        let turn = holder(&lobby);
        let (from, to) = if turn == 0 {
            (c(1, 1), c(2, 1))
        } else {
            (c(2, 1), c(1, 1))
        };
        lobby.handle_packet(turn, Packet::Move { from, to }, Instant::now());
        let out = lobby.drain_outbox();
        let packets = packets_for(&out, 1 - turn);
        assert!(packets.contains(&Packet::Destroy {
            at: to,
            color: Color(1 - turn as u8),
            reason: DestroyReason::Crushed,
        }));
        assert_eq!(
            packets.last(),
            Some(&Packet::GameOver { winner: Some(turn) })
        );
        assert!(!lobby.in_game());
    }

    #[test]
    fn test_sandbox_keeps_playing() {
        let mut lobby = Lobby::with_map(
            ServerConfig {
                game_over_checks: false,
                ..config()
            },
            duel_map(),
        );
        join(&mut lobby, "solo", false);
        lobby.handle_packet(ADMIN_SESSION, Packet::StartMatch, Instant::now());
        lobby.handle_packet(
            ADMIN_SESSION,
            Packet::Move {
                from: c(1, 1),
                to: c(1, 2),
            },
            Instant::now(),
        );
        assert!(lobby.in_game());
        assert_eq!(holder(&lobby), ADMIN_SESSION);
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let mut lobby = started(corners_map());
        assert!(lobby.disconnect(1));
        let out = lobby.drain_outbox();
        let leaves = packets_for(&out, 0)
            .into_iter()
            .filter(|p| matches!(p, Packet::PlayerLeave { session: 1, .. }))
            .count();
        assert_eq!(leaves, 1);
        assert!(packets_for(&out, 0).contains(&Packet::GameOver { winner: Some(0) }));

        assert!(!lobby.disconnect(1));
        assert!(lobby.drain_outbox().is_empty());
    }

    #[test]
    fn test_holder_leaving_passes_turn() {
        let mut lobby = Lobby::with_map(config(), corners_map_three());
        join(&mut lobby, "a", false);
        join(&mut lobby, "b", false);
        join(&mut lobby, "c", false);
        lobby.handle_packet(ADMIN_SESSION, Packet::StartMatch, Instant::now());
        lobby.drain_outbox();

        let turn = holder(&lobby);
        lobby.disconnect(turn);
        assert!(lobby.in_game());
        let next = holder(&lobby);
        assert_ne!(next, turn);
        let out = lobby.drain_outbox();
        let survivor = [0, 1, 2].into_iter().find(|id| *id != turn).unwrap();
        assert!(packets_for(&out, survivor).contains(&Packet::TurnNotice { session: next }));
        let gone = Color(turn as u8);
        assert!(!lobby.game().unwrap().board.has_live_pawns(gone));
    }

    fn corners_map_three() -> MapDefinition {
        let mut map = corners_map();
        map.pawns.push(shared::PawnState {
            at: c(0, 5),
            color: Color(2),
            range: 0,
            status: 0,
        });
        map
    }

    #[test]
    fn test_late_joiner_gets_match_snapshot() {
        let mut lobby = started(corners_map());
        let late = join(&mut lobby, "late", false);
        let packets = packets_for(&lobby.drain_outbox(), late);
        assert!(matches!(packets[0], Packet::RosterInfo { .. }));
        assert!(matches!(packets[2], Packet::MatchBegin { .. }));
        assert_eq!(
            packets[3],
            Packet::TurnNotice {
                session: holder(&lobby),
            }
        );
    }

    fn pickups_in(packet: &Packet) -> Vec<(Coord, PowerId)> {
        let tiles = match packet {
            Packet::MapDefinition { map } | Packet::MatchBegin { map, .. } => &map.tiles,
            Packet::StateUpdate { tiles, .. } => tiles,
            _ => return Vec::new(),
        };
        tiles
            .iter()
            .filter_map(|t| t.pickup.map(|p| (t.at, p)))
            .collect()
    }

    #[test]
    fn test_pickup_identity_hidden_from_players() {
        let mut lobby = Lobby::with_map(config(), corners_map());
        let alice = join(&mut lobby, "alice", false);
        let bob = join(&mut lobby, "bob", false);
        let carol = join(&mut lobby, "carol", true);
        lobby.handle_packet(ADMIN_SESSION, Packet::StartMatch, Instant::now());
        let mut out = lobby.drain_outbox();

        // The spawner fires within six turns.
        for _ in 0..12 {
            let Some(game) = lobby.game() else { break };
            let Some(turn) = game.turn() else { break };
            let color = lobby.clients().color_of(turn).unwrap();
            let step = game
                .board
                .pawns()
                .filter(|p| p.color == color)
                .flat_map(|p| p.at.neighbors().into_iter().map(move |to| (p.at, to)))
                .find(|(from, to)| movement::can_move(&game.board, *from, *to).is_ok());
            let Some((from, to)) = step else { break };
            lobby.handle_packet(turn, Packet::Move { from, to }, Instant::now());
            out.extend(lobby.drain_outbox());
        }

        for player in [alice, bob] {
            let seen: Vec<(Coord, PowerId)> = packets_for(&out, player)
                .iter()
                .flat_map(pickups_in)
                .collect();
            assert!(seen.contains(&(c(1, 0), HIDDEN_PICKUP)));
            assert!(seen.iter().all(|(_, p)| *p == HIDDEN_PICKUP));
        }

        let watched: Vec<(Coord, PowerId)> = packets_for(&out, carol)
            .iter()
            .flat_map(pickups_in)
            .collect();
        assert!(watched.contains(&(c(1, 0), RANGE)));
        assert!(watched.iter().all(|(_, p)| *p != HIDDEN_PICKUP));
        // Spawned pickups reached the spectator through state updates.
        assert!(packets_for(&out, carol).iter().any(|p| matches!(
            p,
            Packet::StateUpdate { tiles, .. } if tiles.iter().any(|t| t.pickup.is_some())
        )));
    }

    #[test]
    fn test_color_change_rules() {
        let mut lobby = Lobby::with_map(config(), duel_map());
        let alice = join(&mut lobby, "alice", false);
        let bob = join(&mut lobby, "bob", false);
        lobby.drain_outbox();

        lobby.handle_packet(
            bob,
            Packet::ColorChange {
                session: bob,
                color: Color(0),
            },
            Instant::now(),
        );
        assert!(matches!(
            packets_for(&lobby.drain_outbox(), bob)[0],
            Packet::AckBadMove { .. }
        ));

        lobby.handle_packet(
            bob,
            Packet::ColorChange {
                session: 77,
                color: Color(4),
            },
            Instant::now(),
        );
        assert_eq!(
            packets_for(&lobby.drain_outbox(), alice),
            vec![Packet::ColorChange {
                session: bob,
                color: Color(4),
            }]
        );

        lobby.handle_packet(ADMIN_SESSION, Packet::StartMatch, Instant::now());
        lobby.drain_outbox();
        lobby.handle_packet(
            alice,
            Packet::ColorChange {
                session: alice,
                color: Color(5),
            },
            Instant::now(),
        );
        assert!(matches!(
            packets_for(&lobby.drain_outbox(), alice)[0],
            Packet::AckBadMove { .. }
        ));
    }

    #[test]
    fn test_chat() {
        let mut lobby = Lobby::with_map(config(), duel_map());
        let alice = join(&mut lobby, "alice", false);
        let bob = join(&mut lobby, "bob", false);
        lobby.drain_outbox();

        let say = |text: &str| Packet::Chat {
            session: 99,
            text: text.to_string(),
        };
        lobby.handle_packet(bob, say("   "), Instant::now());
        assert!(lobby.drain_outbox().is_empty());

        lobby.handle_packet(bob, say("gg"), Instant::now());
        let expected = Packet::Chat {
            session: bob,
            text: "gg".to_string(),
        };
        let out = lobby.drain_outbox();
        assert_eq!(packets_for(&out, alice), vec![expected.clone()]);
        assert_eq!(packets_for(&out, bob), vec![expected]);
    }

    #[test]
    fn test_map_upload_and_change() {
        let mut lobby = Lobby::with_map(config(), duel_map());
        let admin = join(&mut lobby, "alice", false);
        let bob = join(&mut lobby, "bob", false);
        lobby.drain_outbox();

        lobby.handle_packet(bob, Packet::MapDefinition { map: corners_map() }, Instant::now());
        assert_eq!(lobby.map(), &duel_map());

        let mut broken = corners_map();
        broken.tiles[0].height = 9;
        lobby.handle_packet(admin, Packet::MapDefinition { map: broken }, Instant::now());
        assert!(matches!(
            packets_for(&lobby.drain_outbox(), admin)[0],
            Packet::AckBadMove { .. }
        ));

        lobby.handle_packet(admin, Packet::MapDefinition { map: corners_map() }, Instant::now());
        assert_eq!(lobby.map(), &corners_map());
        assert_eq!(
            packets_for(&lobby.drain_outbox(), bob),
            vec![Packet::MapDefinition { map: corners_map() }.concealed()]
        );

        lobby.handle_packet(
            admin,
            Packet::MapChange {
                name: maps::DEFAULT_MAP.to_string(),
            },
            Instant::now(),
        );
        assert_eq!(lobby.map(), &maps::default_map());
        let packets = packets_for(&lobby.drain_outbox(), bob);
        assert_eq!(
            packets[0],
            Packet::MapChange {
                name: maps::DEFAULT_MAP.to_string(),
            }
        );
    }

    #[test]
    fn test_oversized_map_change_is_refused() {
        let dir = std::env::temp_dir().join(format!("hexfall-lobby-big-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let big = flat_board(30, 30).to_map();
        std::fs::write(dir.join("big.map"), shared::mapfile::encode_map(&big).unwrap()).unwrap();

        let mut lobby = Lobby::with_map(
            ServerConfig {
                maps_dir: dir.clone(),
                ..config()
            },
            duel_map(),
        );
        let admin = join(&mut lobby, "alice", false);
        let bob = join(&mut lobby, "bob", false);
        lobby.drain_outbox();

        lobby.handle_packet(
            admin,
            Packet::MapChange {
                name: "big".to_string(),
            },
            Instant::now(),
        );
        let out = lobby.drain_outbox();
        assert!(matches!(
            packets_for(&out, admin)[..],
            [Packet::AckBadMove { .. }]
        ));
        assert!(packets_for(&out, bob).is_empty());
        assert!(!out.iter().any(|o| matches!(o, Outgoing::Close { .. })));
        assert_eq!(lobby.map(), &duel_map());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_hazard_timer_lifecycle() {
        let mut lobby = started(corners_map());
        assert_eq!(lobby.next_deadline(), None);

        let turn = holder(&lobby);
        let (home, _) = corner_step(turn);
        let Mode::Game(game) = &mut lobby.mode else {
            unreachable!()
        };
        game.board.pawn_mut(home).unwrap().grant(ANT);
        let now = Instant::now();
        lobby.handle_packet(turn, Packet::PowerUse { at: home, power: ANT }, now);
        lobby.drain_outbox();

        let due = lobby.next_deadline().unwrap();
        assert_eq!(due, now + Duration::from_secs(1));
        lobby.on_timer(due);
        let out = lobby.drain_outbox();
        assert!(packets_for(&out, 1 - turn)
            .iter()
            .any(|p| matches!(p, Packet::StateUpdate { .. })));

        // Ending the match drops pending hazards with it.
        lobby.disconnect(1 - turn);
        assert!(!lobby.in_game());
        assert_eq!(lobby.next_deadline(), None);
    }

    #[test]
    fn test_quit_closes_connection() {
        let mut lobby = Lobby::with_map(config(), duel_map());
        let alice = join(&mut lobby, "alice", false);
        let bob = join(&mut lobby, "bob", false);
        lobby.drain_outbox();

        lobby.handle_packet(bob, Packet::Quit, Instant::now());
        let out = lobby.drain_outbox();
        assert!(out.contains(&Outgoing::Close { session: bob }));
        assert_eq!(
            packets_for(&out, alice),
            vec![Packet::PlayerLeave {
                session: bob,
                color: Color(1),
            }]
        );
        assert!(!lobby.disconnect(bob));
    }
}
