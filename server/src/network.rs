//! Server network layer handling UDP communications and session loop coordination

use crate::bot::BotTuning;
use crate::lobby::{lock_session, Lobby, LoopStart, SharedSession};
use crate::room::TickStatus;
use arena_shared::{Packet, SessionId, TICK_MILLIS};
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

/// Messages sent from network and session tasks to the main server loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived {
        packet: Packet,
        addr: SocketAddr,
    },
    SessionFinished {
        session_id: SessionId,
    },
    Shutdown,
}

/// Messages sent from the lobby and session loops to the sender task
#[derive(Debug)]
pub enum GameMessage {
    SendPacket {
        packet: Packet,
        addr: SocketAddr,
    },
    BroadcastPacket {
        packet: Packet,
        recipients: Vec<SocketAddr>,
    },
}

/// Runtime settings for [`Server`]
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub max_clients: usize,
    /// Silence after which a connection is dropped
    pub client_timeout: Duration,
    pub bot_tuning: BotTuning,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            max_clients: 64,
            client_timeout: Duration::from_secs(5),
            bot_tuning: BotTuning::default(),
        }
    }
}

/// Main server: owns the socket and the lobby and coordinates the tasks
pub struct Server {
    socket: Arc<UdpSocket>,
    lobby: Lobby,
    client_timeout: Duration,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    game_rx: Option<mpsc::UnboundedReceiver<GameMessage>>,
}

impl Server {
    pub async fn new(config: ServerConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = Arc::new(UdpSocket::bind(&config.bind_addr).await?);
        info!("Server listening on {}", socket.local_addr()?);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (game_tx, game_rx) = mpsc::unbounded_channel();

        Ok(Server {
            socket,
            lobby: Lobby::new(config.max_clients, config.bot_tuning, game_tx),
            client_timeout: config.client_timeout,
            server_tx,
            server_rx,
            game_rx: Some(game_rx),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Handle for stopping [`Server::run`] from another task
    pub fn shutdown_handle(&self) -> mpsc::UnboundedSender<ServerMessage> {
        self.server_tx.clone()
    }

    /// Spawns task that continuously listens for incoming packets
    fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 2048];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => {
                        if let Ok(packet) = deserialize::<Packet>(&buffer[0..len]) {
                            if let Err(e) =
                                server_tx.send(ServerMessage::PacketReceived { packet, addr })
                            {
                                error!("Failed to send packet to main loop: {}", e);
                                break;
                            }
                        } else {
                            warn!("Failed to deserialize packet from {}", addr);
                        }
                    }
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns task that drains the outgoing packet queue
    fn spawn_network_sender(&mut self) {
        let socket = Arc::clone(&self.socket);
        let Some(mut game_rx) = self.game_rx.take() else {
            return;
        };

        tokio::spawn(async move {
            while let Some(message) = game_rx.recv().await {
                match message {
                    GameMessage::SendPacket { packet, addr } => {
                        if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                            error!("Failed to send packet to {}: {}", addr, e);
                        }
                    }
                    GameMessage::BroadcastPacket { packet, recipients } => {
                        let data = match serialize(&packet) {
                            Ok(data) => data,
                            Err(e) => {
                                error!("Failed to serialize broadcast: {}", e);
                                continue;
                            }
                        };
                        for addr in recipients {
                            if let Err(e) = socket.send_to(&data, addr).await {
                                error!("Failed to send to {}: {}", addr, e);
                            }
                        }
                    }
                }
            }
        });
    }

    async fn send_packet_impl(
        socket: &UdpSocket,
        packet: &Packet,
        addr: SocketAddr,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let data = serialize(packet)?;
        socket.send_to(&data, addr).await?;
        Ok(())
    }

    fn start_loops(&self, started: Vec<LoopStart>) {
        for start in started {
            spawn_session_loop(start, self.server_tx.clone());
        }
    }

    /// Main server loop: the only writer of the lobby
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.spawn_network_receiver();
        self.spawn_network_sender();

        let mut timeout_check = interval(Duration::from_secs(1));
        info!("Server started successfully");

        loop {
            tokio::select! {
                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::PacketReceived { packet, addr }) => {
                            let started = self.lobby.handle_packet(packet, addr);
                            self.start_loops(started);
                        },
                        Some(ServerMessage::SessionFinished { session_id }) => {
                            self.lobby.finish_session(session_id);
                        },
                        Some(ServerMessage::Shutdown) | None => {
                            info!("Server shutting down");
                            break;
                        }
                    }
                }

                _ = timeout_check.tick() => {
                    self.lobby.expire_idle(self.client_timeout);
                }
            }
        }

        Ok(())
    }
}

/// Starts the tick loop of a session that just entered play and registers
/// its abort handle with the session.
pub fn spawn_session_loop(
    start: LoopStart,
    server_tx: mpsc::UnboundedSender<ServerMessage>,
) -> JoinHandle<()> {
    let LoopStart {
        session_id,
        session,
    } = start;
    let handle = tokio::spawn(run_session_loop(
        session_id,
        Arc::clone(&session),
        server_tx,
    ));
    lock_session(&session).attach_tick_task(handle.abort_handle());
    handle
}

/// Advances one session every tick until its game ends or it is closed.
pub async fn run_session_loop(
    session_id: SessionId,
    session: SharedSession,
    server_tx: mpsc::UnboundedSender<ServerMessage>,
) {
    let mut ticker = interval(Duration::from_millis(TICK_MILLIS));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    // The first tick fires immediately
    ticker.tick().await;
    debug!("Session {} tick loop started", session_id);

    loop {
        ticker.tick().await;

        let status = lock_session(&session).advance();
        match status {
            TickStatus::Running => {}
            TickStatus::Finished(_) => {
                if let Err(e) = server_tx.send(ServerMessage::SessionFinished { session_id }) {
                    error!("Failed to report finished session {}: {}", session_id, e);
                }
                break;
            }
            TickStatus::Stopped => break,
        }
    }

    debug!("Session {} tick loop stopped", session_id);
}
