//! Session directory for the game server
//!
//! This module tracks every connection the server has accepted, including:
//! - Session id assignment (monotonic, never reused, id 0 is the admin)
//! - The handshake that turns a raw connection into a roster member
//! - Color assignment and uniqueness among non-spectators
//! - Capacity limits
//!
//! The directory only knows about sessions. Sockets are owned by the network
//! layer and keyed by the same id.

use log::info;
use shared::{Color, PlayerInfo, SessionId, ADMIN_SESSION, MAX_COLORS, PROTOCOL_VERSION};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use thiserror::Error;

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Accepted, waiting for `HandshakeInit`.
    Connecting,
    /// Handshake done; listed in the roster.
    Joined,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum HandshakeError {
    #[error("unknown session {0}")]
    UnknownSession(SessionId),
    #[error("session {0} already completed its handshake")]
    AlreadyJoined(SessionId),
    #[error("name must not be empty")]
    EmptyName,
    #[error("protocol version {client} does not match server version {server}")]
    VersionMismatch { client: u32, server: u32 },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ColorError {
    #[error("unknown session {0}")]
    UnknownSession(SessionId),
    #[error("color {0} does not exist")]
    Invalid(u8),
    #[error("color {0} is already taken")]
    Taken(u8),
}

/// Represents one accepted connection
#[derive(Debug, Clone)]
pub struct Client {
    /// Unique session identifier assigned by the server
    pub id: SessionId,
    /// Peer address, kept for logging
    pub addr: SocketAddr,
    /// Display name, empty until the handshake completes
    pub name: String,
    pub color: Color,
    pub state: ClientState,
}

impl Client {
    /// Creates a session in the `Connecting` state. Until the handshake
    /// completes it holds the spectator color so it never blocks a color.
    pub fn new(id: SessionId, addr: SocketAddr) -> Self {
        Self {
            id,
            addr,
            name: String::new(),
            color: Color::SPECTATOR,
            state: ClientState::Connecting,
        }
    }

    pub fn is_joined(&self) -> bool {
        self.state == ClientState::Joined
    }

    pub fn is_spectator(&self) -> bool {
        self.color.is_spectator()
    }

    pub fn info(&self) -> PlayerInfo {
        PlayerInfo {
            id: self.id,
            name: self.name.clone(),
            color: self.color,
        }
    }
}

/// Manages all sessions known to the server
///
/// Sessions are kept in id order, which is also the order turns rotate in.
pub struct ClientManager {
    /// Sessions indexed by their id
    clients: BTreeMap<SessionId, Client>,
    /// Next id handed out; ids are never reused
    next_client_id: SessionId,
    /// Maximum number of concurrent sessions allowed
    max_clients: usize,
}

impl ClientManager {
    /// Creates an empty directory. The first session gets the admin id.
    pub fn new(max_clients: usize) -> Self {
        Self {
            clients: BTreeMap::new(),
            next_client_id: ADMIN_SESSION,
            max_clients,
        }
    }

    /// Registers a new connection.
    ///
    /// Returns `None` if the server is at capacity.
    pub fn add_client(&mut self, addr: SocketAddr) -> Option<SessionId> {
        if self.clients.len() >= self.max_clients {
            return None;
        }

        let client_id = self.next_client_id;
        self.next_client_id += 1;

        info!("Client {} connected from {}", client_id, addr);
        self.clients.insert(client_id, Client::new(client_id, addr));
        Some(client_id)
    }

    /// Validates a handshake and moves the session into the roster.
    ///
    /// Players get the lowest free color; spectators, and players arriving
    /// when every color is taken, get the spectator color.
    pub fn complete_handshake(
        &mut self,
        id: SessionId,
        client_version: u32,
        name: &str,
        spectator: bool,
    ) -> Result<PlayerInfo, HandshakeError> {
        let state = self
            .clients
            .get(&id)
            .map(|c| c.state)
            .ok_or(HandshakeError::UnknownSession(id))?;
        if state == ClientState::Joined {
            return Err(HandshakeError::AlreadyJoined(id));
        }
        if client_version != PROTOCOL_VERSION {
            return Err(HandshakeError::VersionMismatch {
                client: client_version,
                server: PROTOCOL_VERSION,
            });
        }
        let name = name.trim();
        if name.is_empty() {
            return Err(HandshakeError::EmptyName);
        }

        let color = if spectator {
            Color::SPECTATOR
        } else {
            self.lowest_free_color()
        };
        let client = self
            .clients
            .get_mut(&id)
            .ok_or(HandshakeError::UnknownSession(id))?;
        client.name = name.to_string();
        client.color = color;
        client.state = ClientState::Joined;
        info!("Client {} joined as '{}' with color {}", id, name, color.0);
        Ok(client.info())
    }

    /// Lowest non-spectator color not held by a joined session, or the
    /// spectator color when all are taken.
    pub fn lowest_free_color(&self) -> Color {
        (0..MAX_COLORS)
            .map(Color)
            .find(|color| self.color_holder(*color).is_none())
            .unwrap_or(Color::SPECTATOR)
    }

    /// The joined session currently holding `color`, if any. Always `None`
    /// for the spectator color.
    pub fn color_holder(&self, color: Color) -> Option<SessionId> {
        if color.is_spectator() {
            return None;
        }
        self.joined().find(|c| c.color == color).map(|c| c.id)
    }

    /// Switches a session's color, keeping non-spectator colors unique.
    pub fn set_color(&mut self, id: SessionId, color: Color) -> Result<(), ColorError> {
        if !color.is_spectator() && color.0 >= MAX_COLORS {
            return Err(ColorError::Invalid(color.0));
        }
        match self.color_holder(color) {
            Some(holder) if holder != id => return Err(ColorError::Taken(color.0)),
            _ => {}
        }
        let client = self
            .clients
            .get_mut(&id)
            .ok_or(ColorError::UnknownSession(id))?;
        client.color = color;
        Ok(())
    }

    /// Removes a session. Returns it if it was still present, so callers can
    /// run departure logic exactly once.
    pub fn remove_client(&mut self, id: SessionId) -> Option<Client> {
        let client = self.clients.remove(&id)?;
        info!("Client {} disconnected", client.id);
        Some(client)
    }

    pub fn get(&self, id: SessionId) -> Option<&Client> {
        self.clients.get(&id)
    }

    pub fn is_joined(&self, id: SessionId) -> bool {
        self.clients.get(&id).is_some_and(Client::is_joined)
    }

    pub fn is_admin(&self, id: SessionId) -> bool {
        id == ADMIN_SESSION && self.is_joined(id)
    }

    pub fn color_of(&self, id: SessionId) -> Option<Color> {
        self.clients.get(&id).map(|c| c.color)
    }

    /// Joined sessions in id order.
    pub fn joined(&self) -> impl Iterator<Item = &Client> {
        self.clients.values().filter(|c| c.is_joined())
    }

    pub fn joined_ids(&self) -> Vec<SessionId> {
        self.joined().map(|c| c.id).collect()
    }

    pub fn roster(&self) -> Vec<PlayerInfo> {
        self.joined().map(Client::info).collect()
    }

    /// Returns the number of sessions, joined or not
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn max_clients(&self) -> usize {
        self.max_clients
    }
}
