//! Lobby: the single authoritative store of connections, the matchmaking
//! queue and the session table, plus the dispatch of inbound commands.
//!
//! The lobby is owned by the server's main loop and handles one packet at a
//! time. Sessions are shared with their tick tasks behind a per-session mutex;
//! the lobby never holds more than one session lock at once.

use crate::bot::BotTuning;
use crate::error::{CommandError, CommandResult};
use crate::matchmaking::{FormedMatch, MatchmakingQueue, QueueEntry};
use crate::network::GameMessage;
use crate::registry::{
    CharacterDirectory, ClientStatus, ConnectionRegistry, DefaultDirectory, Profile,
};
use crate::room::{Member, Session};
use arena_shared::{
    is_valid_room_code, ClientId, Packet, SessionId, SessionStatus, Team, ROOM_CODE_LEN,
};
use log::{debug, error, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Room code draws attempted before giving up on a free code.
const MAX_CODE_DRAWS: usize = 10_000;

pub type SharedSession = Arc<Mutex<Session>>;

/// Locks a session. A panic inside a previous holder does not leave the
/// session unusable.
pub fn lock_session(session: &SharedSession) -> MutexGuard<'_, Session> {
    session.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A session that just entered play and needs a tick loop.
pub struct LoopStart {
    pub session_id: SessionId,
    pub session: SharedSession,
}

pub struct Lobby {
    registry: ConnectionRegistry,
    queue: MatchmakingQueue,
    sessions: HashMap<SessionId, SharedSession>,
    codes: HashMap<String, SessionId>,
    next_session_id: SessionId,
    bot_tuning: BotTuning,
    rng: StdRng,
    directory: Box<dyn CharacterDirectory + Send>,
    outbox: mpsc::UnboundedSender<GameMessage>,
}

impl Lobby {
    pub fn new(
        max_clients: usize,
        bot_tuning: BotTuning,
        outbox: mpsc::UnboundedSender<GameMessage>,
    ) -> Self {
        Self::with_rng(max_clients, bot_tuning, outbox, StdRng::from_entropy())
    }

    /// Same as [`Lobby::new`] with a fixed seed for room codes, respawns and
    /// bot decisions.
    pub fn with_seed(
        max_clients: usize,
        bot_tuning: BotTuning,
        outbox: mpsc::UnboundedSender<GameMessage>,
        seed: u64,
    ) -> Self {
        Self::with_rng(max_clients, bot_tuning, outbox, StdRng::seed_from_u64(seed))
    }

    fn with_rng(
        max_clients: usize,
        bot_tuning: BotTuning,
        outbox: mpsc::UnboundedSender<GameMessage>,
        rng: StdRng,
    ) -> Self {
        Self {
            registry: ConnectionRegistry::new(max_clients),
            queue: MatchmakingQueue::new(),
            sessions: HashMap::new(),
            codes: HashMap::new(),
            next_session_id: 1,
            bot_tuning,
            rng,
            directory: Box::new(DefaultDirectory),
            outbox,
        }
    }

    pub fn with_directory(mut self, directory: Box<dyn CharacterDirectory + Send>) -> Self {
        self.directory = directory;
        self
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn session(&self, session_id: SessionId) -> Option<SharedSession> {
        self.sessions.get(&session_id).cloned()
    }

    /// Session the client is seated in, if any.
    pub fn session_of(&self, client_id: ClientId) -> Option<SharedSession> {
        match self.registry.status(&client_id)? {
            ClientStatus::InSession(session_id) => self.session(session_id),
            _ => None,
        }
    }

    fn send(&self, packet: Packet, addr: SocketAddr) {
        if let Err(e) = self.outbox.send(GameMessage::SendPacket { packet, addr }) {
            error!("Failed to queue packet for {}: {}", addr, e);
        }
    }

    /// Accepts a connection from `addr`, replacing any previous connection
    /// from the same address.
    pub fn connect(&mut self, addr: SocketAddr) -> Option<ClientId> {
        if let Some(existing) = self.registry.find_client_by_addr(addr) {
            info!("Replacing existing client {} from {}", existing, addr);
            self.disconnect(existing);
        }

        match self.registry.add_client(addr) {
            Some(client_id) => {
                self.send(Packet::Connected { client_id }, addr);
                Some(client_id)
            }
            None => {
                warn!("Rejecting {}: server full", addr);
                self.send(
                    Packet::Disconnected {
                        reason: "Server full".to_string(),
                    },
                    addr,
                );
                None
            }
        }
    }

    /// Drops a connection, leaving the queue or session it was in.
    pub fn disconnect(&mut self, client_id: ClientId) {
        match self.registry.status(&client_id) {
            Some(ClientStatus::Queued) => {
                self.queue.dequeue(client_id);
            }
            Some(ClientStatus::InSession(session_id)) => {
                self.leave_session(client_id, session_id);
            }
            Some(ClientStatus::Idle) | None => {}
        }
        self.registry.remove_client(&client_id);
    }

    /// Disconnects every client that has been silent for longer than
    /// `timeout`. Returns the dropped ids.
    pub fn expire_idle(&mut self, timeout: Duration) -> Vec<ClientId> {
        let expired = self.registry.timed_out(timeout);
        for client_id in &expired {
            warn!("Client {} timed out", client_id);
            self.disconnect(*client_id);
        }
        expired
    }

    /// Entry point for every datagram. Rejected commands are answered with
    /// an error addressed to the sender only.
    pub fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) -> Vec<LoopStart> {
        if let Packet::Connect { client_version } = packet {
            debug!("Connect from {} (version {})", addr, client_version);
            self.connect(addr);
            return Vec::new();
        }

        let Some(client_id) = self.registry.find_client_by_addr(addr) else {
            warn!("Packet from unknown address {}", addr);
            return Vec::new();
        };
        self.registry.touch(&client_id);

        let registering = matches!(packet, Packet::Register { .. });
        match self.handle_command(client_id, packet) {
            Ok(started) => started,
            Err(e) => {
                debug!("Client {} command rejected: {}", client_id, e);
                let reply = if registering {
                    Packet::Registered {
                        outcome: Err(e.to_string()),
                    }
                } else {
                    Packet::Error {
                        message: e.to_string(),
                    }
                };
                self.send(reply, addr);
                Vec::new()
            }
        }
    }

    /// Executes one command for a connected client. Returns the sessions
    /// that entered play as a result.
    pub fn handle_command(
        &mut self,
        client_id: ClientId,
        packet: Packet,
    ) -> CommandResult<Vec<LoopStart>> {
        match packet {
            Packet::Heartbeat => {}
            Packet::Disconnect => self.disconnect(client_id),
            Packet::Register {
                player_id,
                character_id,
            } => self.register(client_id, &player_id, &character_id)?,
            Packet::CreatePrivateSession => self.create_private(client_id)?,
            Packet::JoinPrivateSession { code } => self.join_private(client_id, &code)?,
            Packet::SelectTeam { team } => {
                self.with_session(client_id, |session| session.select_team(client_id, &team))?;
            }
            Packet::StartGame => {
                let rng = self.fork_rng();
                let started =
                    self.with_session(client_id, |session| session.start(client_id, rng))?;
                if started.is_some() {
                    return Ok(self.loop_start_for(client_id).into_iter().collect());
                }
            }
            Packet::JoinMatchmaking => return self.join_matchmaking(client_id),
            Packet::LeaveMatchmaking => self.leave_matchmaking(client_id)?,
            Packet::LeaveSession => {
                self.require_profile(client_id)?;
                match self.registry.status(&client_id) {
                    Some(ClientStatus::InSession(session_id)) => {
                        self.leave_session(client_id, session_id)
                    }
                    _ => return Err(CommandError::NotInRoom),
                }
            }
            Packet::Move(motion) => {
                if let Some(session) = self.session_of(client_id) {
                    lock_session(&session).relay_motion(client_id, motion);
                }
            }
            Packet::Action { kind, payload } => {
                if let Some(session) = self.session_of(client_id) {
                    lock_session(&session).relay_action(client_id, kind, payload);
                }
            }
            Packet::HitBall(hit) => {
                let finished =
                    self.with_session(client_id, |session| session.hit(client_id, &hit))?;
                if finished == Some(true) {
                    if let Some(ClientStatus::InSession(session_id)) =
                        self.registry.status(&client_id)
                    {
                        self.finish_session(session_id);
                    }
                }
            }
            Packet::AddBot => {
                let bot_id = self.registry.alloc_id();
                self.with_session(client_id, |session| session.add_bot(client_id, bot_id))?;
            }
            Packet::RemoveBot { bot_id } => {
                self.with_session(client_id, |session| session.remove_bot(client_id, bot_id))?;
            }
            Packet::AssignBotTeam { bot_id, team } => {
                self.with_session(client_id, |session| {
                    session.assign_bot_team(client_id, bot_id, &team)
                })?;
            }
            other => {
                warn!("Unexpected packet type from client {}: {:?}", client_id, other);
            }
        };
        Ok(Vec::new())
    }

    /// Runs `op` against the client's session. `Ok(None)` means the session
    /// is already gone or over, in which case the command is dropped.
    fn with_session<T>(
        &mut self,
        client_id: ClientId,
        op: impl FnOnce(&mut Session) -> CommandResult<T>,
    ) -> CommandResult<Option<T>> {
        self.require_profile(client_id)?;
        let session_id = match self.registry.status(&client_id) {
            Some(ClientStatus::InSession(session_id)) => session_id,
            _ => return Err(CommandError::NotInRoom),
        };
        let Some(session) = self.session(session_id) else {
            debug!("Session {} is gone; dropping command", session_id);
            return Ok(None);
        };

        let mut session = lock_session(&session);
        if session.is_closed() || session.status() == SessionStatus::Finished {
            return Ok(None);
        }
        op(&mut session).map(Some)
    }

    fn require_profile(&self, client_id: ClientId) -> CommandResult<Profile> {
        self.registry
            .get(&client_id)
            .and_then(|client| client.profile.clone())
            .ok_or(CommandError::NotRegistered)
    }

    fn require_idle(&self, client_id: ClientId) -> CommandResult<(SocketAddr, Profile)> {
        let profile = self.require_profile(client_id)?;
        let client = self
            .registry
            .get(&client_id)
            .ok_or(CommandError::NotRegistered)?;
        match client.status {
            ClientStatus::Idle => Ok((client.addr, profile)),
            ClientStatus::Queued => Err(CommandError::AlreadyQueued),
            ClientStatus::InSession(_) => Err(CommandError::AlreadyInRoom),
        }
    }

    fn fork_rng(&mut self) -> StdRng {
        StdRng::seed_from_u64(self.rng.gen())
    }

    fn loop_start_for(&self, client_id: ClientId) -> Option<LoopStart> {
        match self.registry.status(&client_id)? {
            ClientStatus::InSession(session_id) => Some(LoopStart {
                session_id,
                session: self.session(session_id)?,
            }),
            _ => None,
        }
    }

    fn register(
        &mut self,
        client_id: ClientId,
        player_id: &str,
        character_id: &str,
    ) -> CommandResult<()> {
        let display_name = self
            .directory
            .display_name(player_id, character_id)
            .map_err(CommandError::InvalidIdentity)?;
        let client = self
            .registry
            .get(&client_id)
            .ok_or(CommandError::NotRegistered)?;
        // Queue entries and seats carry the profile they were created with
        match client.status {
            ClientStatus::Idle => {}
            ClientStatus::Queued => return Err(CommandError::AlreadyQueued),
            ClientStatus::InSession(_) => return Err(CommandError::AlreadyInRoom),
        }
        let addr = client.addr;
        if let Some(holder) = self.registry.holder_of(player_id) {
            if holder != client_id {
                return Err(CommandError::IdentityInUse(player_id.to_string()));
            }
        }

        self.registry.set_profile(
            &client_id,
            Profile {
                player_id: player_id.to_string(),
                character_id: character_id.to_string(),
                display_name: display_name.clone(),
            },
        );
        self.send(
            Packet::Registered {
                outcome: Ok(display_name),
            },
            addr,
        );
        Ok(())
    }

    fn draw_room_code(&mut self) -> CommandResult<String> {
        let space = 10u32.pow(ROOM_CODE_LEN as u32);
        for _ in 0..MAX_CODE_DRAWS {
            let code = format!("{:0width$}", self.rng.gen_range(0..space), width = ROOM_CODE_LEN);
            if !self.codes.contains_key(&code) {
                return Ok(code);
            }
        }
        Err(CommandError::NoRoomCodeAvailable)
    }

    fn alloc_session_id(&mut self) -> SessionId {
        let id = self.next_session_id;
        self.next_session_id += 1;
        id
    }

    fn create_private(&mut self, client_id: ClientId) -> CommandResult<()> {
        let (addr, profile) = self.require_idle(client_id)?;
        let code = self.draw_room_code()?;
        let session_id = self.alloc_session_id();

        let host = Member::human(client_id, &profile.display_name, addr, &profile.player_id);
        let session = Session::new(
            session_id,
            Some(code.clone()),
            vec![host],
            self.bot_tuning,
            self.outbox.clone(),
        );
        session.send_to(client_id, Packet::SessionCreated(session.snapshot()));
        info!("Client {} created private session {} ({})", client_id, session_id, code);

        self.codes.insert(code, session_id);
        self.sessions
            .insert(session_id, Arc::new(Mutex::new(session)));
        self.registry
            .set_status(&client_id, ClientStatus::InSession(session_id));
        Ok(())
    }

    fn join_private(&mut self, client_id: ClientId, code: &str) -> CommandResult<()> {
        self.require_profile(client_id)?;
        let code = code.trim();
        if !is_valid_room_code(code) {
            return Err(CommandError::MalformedCode(code.to_string()));
        }
        let (addr, profile) = self.require_idle(client_id)?;
        let session_id = *self
            .codes
            .get(code)
            .ok_or_else(|| CommandError::RoomNotFound(code.to_string()))?;
        let session = self
            .session(session_id)
            .ok_or_else(|| CommandError::RoomNotFound(code.to_string()))?;

        let member = Member::human(client_id, &profile.display_name, addr, &profile.player_id);
        lock_session(&session).join(member)?;
        self.registry
            .set_status(&client_id, ClientStatus::InSession(session_id));
        Ok(())
    }

    fn join_matchmaking(&mut self, client_id: ClientId) -> CommandResult<Vec<LoopStart>> {
        let (addr, profile) = self.require_idle(client_id)?;
        self.registry.set_status(&client_id, ClientStatus::Queued);

        let entry = QueueEntry {
            client: client_id,
            addr,
            profile,
            enqueued_at: Instant::now(),
        };
        match self.queue.enqueue(entry) {
            Some(formed) => Ok(vec![self.start_matched_session(formed)]),
            None => {
                debug!("Client {} queued ({} waiting)", client_id, self.queue.len());
                self.send(
                    Packet::MatchmakingJoined {
                        queue_size: self.queue.len(),
                    },
                    addr,
                );
                Ok(Vec::new())
            }
        }
    }

    fn leave_matchmaking(&mut self, client_id: ClientId) -> CommandResult<()> {
        self.require_profile(client_id)?;
        if !self.queue.dequeue(client_id) {
            return Err(CommandError::NotQueued);
        }
        self.registry.set_status(&client_id, ClientStatus::Idle);
        if let Some(client) = self.registry.get(&client_id) {
            self.send(Packet::MatchmakingLeft, client.addr);
        }
        Ok(())
    }

    fn start_matched_session(&mut self, formed: FormedMatch) -> LoopStart {
        let session_id = self.alloc_session_id();
        let seat = |entry: &QueueEntry, team: Team| {
            Member::human(
                entry.client,
                &entry.profile.display_name,
                entry.addr,
                &entry.profile.player_id,
            )
            .on_team(team)
        };
        let members: Vec<Member> = formed
            .team_a
            .iter()
            .map(|entry| seat(entry, Team::A))
            .chain(formed.team_b.iter().map(|entry| seat(entry, Team::B)))
            .collect();
        let ids: Vec<ClientId> = members.iter().map(|member| member.id).collect();

        let mut session = Session::new(
            session_id,
            None,
            members,
            self.bot_tuning,
            self.outbox.clone(),
        );
        let snapshot = session.snapshot();
        for id in &ids {
            session.send_to(*id, Packet::SessionJoined(snapshot.clone()));
            self.registry
                .set_status(id, ClientStatus::InSession(session_id));
        }
        session.begin(self.fork_rng());
        info!("Matchmaking formed session {}", session_id);

        let session = Arc::new(Mutex::new(session));
        self.sessions.insert(session_id, Arc::clone(&session));
        LoopStart {
            session_id,
            session,
        }
    }

    fn leave_session(&mut self, client_id: ClientId, session_id: SessionId) {
        self.registry.set_status(&client_id, ClientStatus::Idle);
        let Some(session) = self.session(session_id) else {
            return;
        };

        let departure = lock_session(&session).remove_member(client_id);
        if let Some(departure) = departure {
            if departure.emptied {
                info!("Session {} is empty", session_id);
                self.teardown(session_id);
            }
        }
    }

    /// Tears down a finished session and returns its players to the lobby.
    pub fn finish_session(&mut self, session_id: SessionId) {
        for client_id in self.teardown(session_id) {
            if self.registry.status(&client_id) == Some(ClientStatus::InSession(session_id)) {
                self.registry.set_status(&client_id, ClientStatus::Idle);
            }
        }
    }

    /// Stops the session's tick loop, releases the match and removes the
    /// session from the table. Returns the humans that were still seated.
    fn teardown(&mut self, session_id: SessionId) -> Vec<ClientId> {
        let Some(session) = self.session(session_id) else {
            return Vec::new();
        };
        let humans = {
            let mut guard = lock_session(&session);
            guard.close();
            if let Some(code) = guard.code() {
                self.codes.remove(code);
            }
            guard.human_ids()
        };
        self.sessions.remove(&session_id);
        info!("Session {} torn down", session_id);
        humans
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arena_shared::{HitKind, HitRequest, PlayerMotion};

    fn lobby() -> (Lobby, mpsc::UnboundedReceiver<GameMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Lobby::with_seed(32, BotTuning::default(), tx, 3), rx)
    }

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<GameMessage>) -> Vec<Packet> {
        let mut packets = Vec::new();
        while let Ok(message) = rx.try_recv() {
            match message {
                GameMessage::SendPacket { packet, .. } => packets.push(packet),
                GameMessage::BroadcastPacket { packet, .. } => packets.push(packet),
            }
        }
        packets
    }

    fn registered(lobby: &mut Lobby, port: u16) -> ClientId {
        let client = lobby.connect(addr(port)).unwrap();
        lobby
            .handle_command(
                client,
                Packet::Register {
                    player_id: format!("user-{}", port),
                    character_id: format!("Char{}", port),
                },
            )
            .unwrap();
        client
    }

    fn room_code(lobby: &Lobby, client: ClientId) -> String {
        let session = lobby.session_of(client).unwrap();
        let code = lock_session(&session).code().unwrap().to_string();
        code
    }

    #[test]
    fn test_connect_and_capacity() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut lobby = Lobby::with_seed(1, BotTuning::default(), tx, 1);

        assert!(lobby.connect(addr(1)).is_some());
        assert!(lobby.connect(addr(2)).is_none());

        let packets = drain(&mut rx);
        assert!(matches!(packets[0], Packet::Connected { client_id: 1 }));
        assert!(matches!(&packets[1], Packet::Disconnected { reason } if reason == "Server full"));
    }

    #[test]
    fn test_reconnect_from_same_address_replaces_client() {
        let (mut lobby, _rx) = lobby();
        let first = lobby.connect(addr(1)).unwrap();
        let second = lobby.connect(addr(1)).unwrap();

        assert_ne!(first, second);
        assert_eq!(lobby.registry().len(), 1);
    }

    #[test]
    fn test_commands_require_registration() {
        let (mut lobby, mut rx) = lobby();
        let client = lobby.connect(addr(1)).unwrap();
        drain(&mut rx);

        assert!(matches!(
            lobby.handle_command(client, Packet::CreatePrivateSession),
            Err(CommandError::NotRegistered)
        ));
        assert!(matches!(
            lobby.handle_command(client, Packet::JoinMatchmaking),
            Err(CommandError::NotRegistered)
        ));

        lobby.handle_packet(Packet::StartGame, addr(1));
        assert!(matches!(
            drain(&mut rx).as_slice(),
            [Packet::Error { message }] if message.contains("register")
        ));
    }

    #[test]
    fn test_register_failure_answers_with_registered_error() {
        let (mut lobby, mut rx) = lobby();
        lobby.connect(addr(1)).unwrap();
        drain(&mut rx);

        lobby.handle_packet(
            Packet::Register {
                player_id: String::new(),
                character_id: "Mina".to_string(),
            },
            addr(1),
        );
        assert!(matches!(
            drain(&mut rx).as_slice(),
            [Packet::Registered { outcome: Err(_) }]
        ));
    }

    #[test]
    fn test_reregistration_updates_profile() {
        let (mut lobby, _rx) = lobby();
        let client = registered(&mut lobby, 1);
        lobby
            .handle_command(
                client,
                Packet::Register {
                    player_id: "user-1".to_string(),
                    character_id: "Renamed".to_string(),
                },
            )
            .unwrap();

        let profile = lobby.registry().get(&client).unwrap().profile.clone().unwrap();
        assert_eq!(profile.display_name, "Renamed");
    }

    fn register_as(lobby: &mut Lobby, port: u16, player_id: &str) -> CommandResult<ClientId> {
        let client = lobby.connect(addr(port)).unwrap();
        lobby
            .handle_command(
                client,
                Packet::Register {
                    player_id: player_id.to_string(),
                    character_id: "Twin".to_string(),
                },
            )
            .map(|_| client)
    }

    #[test]
    fn test_identity_registers_on_one_connection_only() {
        let (mut lobby, mut rx) = lobby();
        let first = register_as(&mut lobby, 1, "alice").unwrap();
        drain(&mut rx);

        lobby.handle_packet(Packet::Connect { client_version: 1 }, addr(2));
        lobby.handle_packet(
            Packet::Register {
                player_id: "alice".to_string(),
                character_id: "Twin".to_string(),
            },
            addr(2),
        );
        assert!(matches!(
            drain(&mut rx).as_slice(),
            [Packet::Connected { .. }, Packet::Registered { outcome: Err(message) }]
                if message.contains("alice")
        ));

        let second = lobby.registry().find_client_by_addr(addr(2)).unwrap();
        lobby.handle_command(first, Packet::CreatePrivateSession).unwrap();
        assert!(matches!(
            lobby.handle_command(second, Packet::CreatePrivateSession),
            Err(CommandError::NotRegistered)
        ));
        assert_eq!(lobby.session_count(), 1);
    }

    #[test]
    fn test_identity_cannot_fill_a_matchmaking_queue() {
        let (mut lobby, _rx) = lobby();
        let first = register_as(&mut lobby, 1, "bob").unwrap();
        lobby.handle_command(first, Packet::JoinMatchmaking).unwrap();

        for port in 2..=6 {
            assert_eq!(
                register_as(&mut lobby, port, "bob"),
                Err(CommandError::IdentityInUse("bob".to_string()))
            );
            let client = lobby.registry().find_client_by_addr(addr(port)).unwrap();
            assert!(matches!(
                lobby.handle_command(client, Packet::JoinMatchmaking),
                Err(CommandError::NotRegistered)
            ));
        }

        assert_eq!(lobby.queue_len(), 1);
        assert_eq!(lobby.session_count(), 0);
    }

    #[test]
    fn test_identity_is_released_on_disconnect() {
        let (mut lobby, _rx) = lobby();
        let first = register_as(&mut lobby, 1, "carol").unwrap();
        lobby.disconnect(first);

        assert!(register_as(&mut lobby, 2, "carol").is_ok());
    }

    #[test]
    fn test_reregistration_rejected_while_seated_or_queued() {
        let (mut lobby, _rx) = lobby();
        let host = registered(&mut lobby, 1);
        let waiting = registered(&mut lobby, 2);
        lobby.handle_command(host, Packet::CreatePrivateSession).unwrap();
        lobby.handle_command(waiting, Packet::JoinMatchmaking).unwrap();

        let rename = |player_id: &str| Packet::Register {
            player_id: player_id.to_string(),
            character_id: "Renamed".to_string(),
        };
        assert!(matches!(
            lobby.handle_command(host, rename("user-1")),
            Err(CommandError::AlreadyInRoom)
        ));
        assert!(matches!(
            lobby.handle_command(waiting, rename("user-2")),
            Err(CommandError::AlreadyQueued)
        ));

        let session = lobby.session_of(host).unwrap();
        let snapshot = lock_session(&session).snapshot();
        assert_eq!(snapshot.roster[0].name, "Char1");
        let profile = lobby.registry().get(&host).unwrap().profile.clone().unwrap();
        assert_eq!(profile.display_name, "Char1");
    }

    #[test]
    fn test_create_and_join_private_session() {
        let (mut lobby, mut rx) = lobby();
        let host = registered(&mut lobby, 1);
        let guest = registered(&mut lobby, 2);
        drain(&mut rx);

        lobby.handle_command(host, Packet::CreatePrivateSession).unwrap();
        let code = room_code(&lobby, host);
        assert_eq!(code.len(), ROOM_CODE_LEN);
        assert!(matches!(drain(&mut rx).as_slice(), [Packet::SessionCreated(s)] if s.host == host));

        lobby
            .handle_command(guest, Packet::JoinPrivateSession { code: code.clone() })
            .unwrap();
        assert_eq!(
            lobby.registry().status(&guest),
            lobby.registry().status(&host)
        );

        assert!(matches!(
            lobby.handle_command(guest, Packet::JoinPrivateSession { code }),
            Err(CommandError::AlreadyInRoom)
        ));
    }

    #[test]
    fn test_join_private_validation() {
        let (mut lobby, _rx) = lobby();
        let client = registered(&mut lobby, 1);

        assert!(matches!(
            lobby.handle_command(client, Packet::JoinPrivateSession { code: "12a4".to_string() }),
            Err(CommandError::MalformedCode(_))
        ));
        assert!(matches!(
            lobby.handle_command(client, Packet::JoinPrivateSession { code: "0000".to_string() }),
            Err(CommandError::RoomNotFound(code)) if code == "0000"
        ));
    }

    #[test]
    fn test_room_codes_are_unique() {
        let (mut lobby, _rx) = lobby();
        let mut codes = std::collections::HashSet::new();
        for port in 1..=30 {
            let client = registered(&mut lobby, port);
            lobby.handle_command(client, Packet::CreatePrivateSession).unwrap();
            assert!(codes.insert(room_code(&lobby, client)));
        }
        assert_eq!(lobby.session_count(), 30);
    }

    #[test]
    fn test_matchmaking_forms_started_session() {
        let (mut lobby, mut rx) = lobby();
        let clients: Vec<ClientId> = (1..=6).map(|port| registered(&mut lobby, port)).collect();
        drain(&mut rx);

        for client in &clients[..5] {
            assert!(lobby.handle_command(*client, Packet::JoinMatchmaking).unwrap().is_empty());
        }
        assert_eq!(lobby.queue_len(), 5);
        assert!(matches!(
            drain(&mut rx).last(),
            Some(Packet::MatchmakingJoined { queue_size: 5 })
        ));

        let started = lobby.handle_command(clients[5], Packet::JoinMatchmaking).unwrap();
        assert_eq!(started.len(), 1);
        assert_eq!(lobby.queue_len(), 0);

        let session = lock_session(&started[0].session);
        assert_eq!(session.status(), SessionStatus::InGame);
        assert!(!session.is_private());
        assert_eq!(session.host(), clients[0]);
        assert_eq!(session.teams().a, clients[..3].to_vec());
        assert_eq!(session.teams().b, clients[3..].to_vec());
        drop(session);

        let packets = drain(&mut rx);
        let joined = packets
            .iter()
            .filter(|p| matches!(p, Packet::SessionJoined(_)))
            .count();
        assert_eq!(joined, 6);
        assert!(packets.iter().any(|p| matches!(p, Packet::GameStarted { .. })));
    }

    #[test]
    fn test_leave_matchmaking() {
        let (mut lobby, mut rx) = lobby();
        let client = registered(&mut lobby, 1);

        assert!(matches!(
            lobby.handle_command(client, Packet::LeaveMatchmaking),
            Err(CommandError::NotQueued)
        ));
        lobby.handle_command(client, Packet::JoinMatchmaking).unwrap();
        assert!(matches!(
            lobby.handle_command(client, Packet::JoinMatchmaking),
            Err(CommandError::AlreadyQueued)
        ));
        drain(&mut rx);

        lobby.handle_command(client, Packet::LeaveMatchmaking).unwrap();
        assert_eq!(lobby.queue_len(), 0);
        assert_eq!(lobby.registry().status(&client), Some(ClientStatus::Idle));
        assert!(matches!(drain(&mut rx).as_slice(), [Packet::MatchmakingLeft]));
    }

    #[test]
    fn test_disconnect_while_queued_leaves_queue() {
        let (mut lobby, _rx) = lobby();
        let client = registered(&mut lobby, 1);
        lobby.handle_command(client, Packet::JoinMatchmaking).unwrap();

        lobby.disconnect(client);
        assert_eq!(lobby.queue_len(), 0);
        assert!(lobby.registry().is_empty());
    }

    #[test]
    fn test_last_human_leaving_tears_down_session() {
        let (mut lobby, _rx) = lobby();
        let host = registered(&mut lobby, 1);
        lobby.handle_command(host, Packet::CreatePrivateSession).unwrap();
        lobby.handle_command(host, Packet::AddBot).unwrap();
        let session = lobby.session_of(host).unwrap();
        let code = room_code(&lobby, host);

        lobby.handle_command(host, Packet::LeaveSession).unwrap();
        assert_eq!(lobby.session_count(), 0);
        assert!(lock_session(&session).is_closed());
        assert_eq!(lobby.registry().status(&host), Some(ClientStatus::Idle));

        let other = registered(&mut lobby, 2);
        assert!(matches!(
            lobby.handle_command(other, Packet::JoinPrivateSession { code }),
            Err(CommandError::RoomNotFound(_))
        ));
    }

    #[test]
    fn test_start_game_returns_loop_start() {
        let (mut lobby, _rx) = lobby();
        let host = registered(&mut lobby, 1);
        lobby.handle_command(host, Packet::CreatePrivateSession).unwrap();
        lobby
            .handle_command(host, Packet::SelectTeam { team: "A".to_string() })
            .unwrap();
        lobby.handle_command(host, Packet::AddBot).unwrap();

        let started = lobby.handle_command(host, Packet::StartGame).unwrap();
        assert_eq!(started.len(), 1);
        assert_eq!(
            lock_session(&started[0].session).status(),
            SessionStatus::InGame
        );
    }

    #[test]
    fn test_relays_outside_session_are_dropped() {
        let (mut lobby, mut rx) = lobby();
        let client = lobby.connect(addr(1)).unwrap();
        drain(&mut rx);

        lobby.handle_packet(Packet::Move(PlayerMotion::default()), addr(1));
        lobby.handle_packet(
            Packet::Action {
                kind: "dive".to_string(),
                payload: None,
            },
            addr(1),
        );
        assert!(drain(&mut rx).is_empty());
        assert_eq!(lobby.registry().status(&client), Some(ClientStatus::Idle));
    }

    #[test]
    fn test_hit_outside_session_is_rejected() {
        let (mut lobby, _rx) = lobby();
        let client = registered(&mut lobby, 1);
        let hit = HitRequest {
            power: HitKind::Spike,
            direction: 1.0,
            gauge: 70.0,
        };
        assert!(matches!(
            lobby.handle_command(client, Packet::HitBall(hit)),
            Err(CommandError::NotInRoom)
        ));
    }

    #[test]
    fn test_finish_session_returns_players_to_lobby() {
        let (mut lobby, _rx) = lobby();
        let host = registered(&mut lobby, 1);
        lobby.handle_command(host, Packet::CreatePrivateSession).unwrap();
        let session_id = match lobby.registry().status(&host) {
            Some(ClientStatus::InSession(id)) => id,
            other => panic!("unexpected status {:?}", other),
        };

        lobby.finish_session(session_id);
        assert_eq!(lobby.session_count(), 0);
        assert_eq!(lobby.registry().status(&host), Some(ClientStatus::Idle));
        lobby.handle_command(host, Packet::JoinMatchmaking).unwrap();
    }

    #[test]
    fn test_expire_idle_disconnects() {
        let (mut lobby, _rx) = lobby();
        let client = registered(&mut lobby, 1);
        lobby.handle_command(client, Packet::CreatePrivateSession).unwrap();

        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(lobby.expire_idle(Duration::from_millis(5)), vec![client]);
        assert_eq!(lobby.session_count(), 0);
        assert!(lobby.registry().is_empty());
    }
}
