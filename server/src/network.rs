//! Server network layer: TCP accept loop, per-connection tasks and the
//! reactor that owns the lobby.
//!
//! Each accepted connection gets a reader task, which decodes frames and
//! forwards packets to the reactor, and a writer task, which drains that
//! connection's FIFO queue so at most one write is in flight. All game state
//! lives in the reactor; tasks only ever talk to it through channels.

use crate::config::ServerConfig;
use crate::lobby::{Lobby, Outgoing};
use log::{debug, error, info, warn};
use shared::framing::{read_frame, write_frame};
use shared::{Packet, SessionId};
use std::collections::HashMap;
use std::error::Error;
use std::io;
use std::net::SocketAddr;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

/// Messages sent from connection tasks to the reactor
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived { session: SessionId, packet: Packet },
    ConnectionLost { session: SessionId, reason: String },
    Shutdown,
}

/// Asks a running [`Server`] to stop.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    server_tx: mpsc::UnboundedSender<ServerMessage>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        if self.server_tx.send(ServerMessage::Shutdown).is_err() {
            debug!("Server already stopped");
        }
    }
}

/// Reactor-side handle to one live connection.
struct Connection {
    addr: SocketAddr,
    outgoing: mpsc::UnboundedSender<Packet>,
    reader: JoinHandle<()>,
}

pub struct Server {
    listener: TcpListener,
    lobby: Lobby,
    connections: HashMap<SessionId, Connection>,

    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
}

impl Server {
    /// Loads the configured map and binds the listener.
    pub async fn new(config: ServerConfig) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let lobby = Lobby::new(config.clone())?;
        let listener = TcpListener::bind(config.bind_addr()).await?;
        info!(
            "Server listening on {} with map '{}'",
            listener.local_addr()?,
            lobby.map().name
        );

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        Ok(Server {
            listener,
            lobby,
            connections: HashMap::new(),
            server_tx,
            server_rx,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            server_tx: self.server_tx.clone(),
        }
    }

    /// Main server loop: connections, packets and hazard timers.
    pub async fn run(mut self) -> Result<(), Box<dyn Error + Send + Sync>> {
        info!("Server started successfully");

        loop {
            let deadline = self.lobby.next_deadline();

            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => self.accept(stream, addr),
                        Err(e) => error!("Failed to accept connection: {}", e),
                    }
                },

                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::PacketReceived { session, packet }) => {
                            debug!("Session {} sent {}", session, packet.kind());
                            self.lobby.handle_packet(session, packet, Instant::now());
                        },
                        Some(ServerMessage::ConnectionLost { session, reason }) => {
                            info!("Connection of session {} lost: {}", session, reason);
                            self.terminate(session);
                        },
                        Some(ServerMessage::Shutdown) | None => {
                            info!("Server shutting down");
                            break;
                        }
                    }
                },

                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.lobby.on_timer(Instant::now());
                },
            }

            self.flush_outbox();
        }

        for (_, connection) in self.connections.drain() {
            connection.reader.abort();
        }
        Ok(())
    }

    fn accept(&mut self, stream: TcpStream, addr: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY for {}: {}", addr, e);
        }

        let Some(session) = self.lobby.connect(addr) else {
            info!("Refusing {}: server full", addr);
            tokio::spawn(async move {
                let mut stream = stream;
                let refusal = Packet::Rejected {
                    reason: "server full".to_string(),
                };
                if let Err(e) = write_frame(&mut stream, &refusal).await {
                    debug!("Could not tell {} the server is full: {}", addr, e);
                }
                if let Err(e) = stream.shutdown().await {
                    debug!("Shutdown of refused connection {} failed: {}", addr, e);
                }
            });
            return;
        };

        let (read_half, write_half) = stream.into_split();
        let (outgoing, queue) = mpsc::unbounded_channel();
        tokio::spawn(write_loop(
            session,
            write_half,
            queue,
            self.server_tx.clone(),
        ));
        let reader = tokio::spawn(read_loop(session, read_half, self.server_tx.clone()));

        self.connections.insert(
            session,
            Connection {
                addr,
                outgoing,
                reader,
            },
        );
    }

    /// Drops a connection and runs departure logic. Safe to call more than
    /// once for the same session.
    fn terminate(&mut self, session: SessionId) {
        if let Some(connection) = self.connections.remove(&session) {
            debug!("Closing connection to {}", connection.addr);
            connection.reader.abort();
        }
        self.lobby.disconnect(session);
    }

    /// Delivers everything the lobby queued, including whatever departures
    /// triggered along the way queue in turn.
    fn flush_outbox(&mut self) {
        loop {
            let items = self.lobby.drain_outbox();
            if items.is_empty() {
                break;
            }
            let mut lost = Vec::new();
            for item in items {
                match item {
                    Outgoing::Send { to, packet } => {
                        let Some(connection) = self.connections.get(&to) else {
                            continue;
                        };
                        if connection.outgoing.send(packet).is_err() {
                            lost.push(to);
                        }
                    }
                    // Dropping the queue sender lets the writer finish what
                    // is already queued before it shuts the socket.
                    Outgoing::Close { session } => self.terminate(session),
                }
            }
            for session in lost {
                self.terminate(session);
            }
        }
    }
}

async fn read_loop(
    session: SessionId,
    mut reader: OwnedReadHalf,
    server_tx: mpsc::UnboundedSender<ServerMessage>,
) {
    loop {
        let message = match read_frame(&mut reader).await {
            Ok(packet) => ServerMessage::PacketReceived { session, packet },
            Err(e) => ServerMessage::ConnectionLost {
                session,
                reason: e.to_string(),
            },
        };
        let lost = matches!(message, ServerMessage::ConnectionLost { .. });
        if server_tx.send(message).is_err() || lost {
            break;
        }
    }
}

async fn write_loop(
    session: SessionId,
    mut writer: OwnedWriteHalf,
    mut queue: mpsc::UnboundedReceiver<Packet>,
    server_tx: mpsc::UnboundedSender<ServerMessage>,
) {
    while let Some(packet) = queue.recv().await {
        if let Err(e) = write_frame(&mut writer, &packet).await {
            error!("Failed to send {} to session {}: {}", packet.kind(), session, e);
            let lost = ServerMessage::ConnectionLost {
                session,
                reason: e.to_string(),
            };
            if server_tx.send(lost).is_err() {
                debug!("Reactor gone before session {} loss was reported", session);
            }
            return;
        }
    }
    if let Err(e) = writer.shutdown().await {
        debug!("Shutdown of session {} writer failed: {}", session, e);
    }
}
