//! Session lifecycle: roster, teams, host and status.
//!
//! A session moves Waiting -> InGame -> Finished and never back. Every
//! operation validates completely before it mutates, then broadcasts the new
//! roster and teams to every human member. Outbound packets are queued on the
//! outbox while the caller still holds the session lock, which keeps the
//! packet order per session identical to the mutation order.

use crate::bot::BotTuning;
use crate::error::{CommandError, CommandResult};
use crate::game::{HitOutcome, Match, MatchEvent};
use crate::network::GameMessage;
use arena_shared::{
    ActionPayload, HitRequest, MemberId, Packet, PlayerMotion, RosterEntry, SessionId,
    SessionSnapshot, SessionStatus, Team, Teams, ROOM_CAPACITY, TEAM_CAPACITY,
};
use log::{error, info};
use rand::rngs::StdRng;
use std::net::SocketAddr;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

/// Who occupies a roster slot.
#[derive(Debug, Clone, PartialEq)]
pub enum Seat {
    Human { addr: SocketAddr, player_id: String },
    Bot,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Member {
    pub id: MemberId,
    pub name: String,
    pub team: Option<Team>,
    pub seat: Seat,
}

impl Member {
    pub fn human(id: MemberId, name: &str, addr: SocketAddr, player_id: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            team: None,
            seat: Seat::Human {
                addr,
                player_id: player_id.to_string(),
            },
        }
    }

    pub fn bot(id: MemberId, name: String) -> Self {
        Self {
            id,
            name,
            team: None,
            seat: Seat::Bot,
        }
    }

    pub fn on_team(mut self, team: Team) -> Self {
        self.team = Some(team);
        self
    }

    pub fn is_bot(&self) -> bool {
        self.seat == Seat::Bot
    }

    pub fn addr(&self) -> Option<SocketAddr> {
        match &self.seat {
            Seat::Human { addr, .. } => Some(*addr),
            Seat::Bot => None,
        }
    }

    fn entry(&self) -> RosterEntry {
        RosterEntry {
            id: self.id,
            name: self.name.clone(),
            team: self.team,
            is_bot: self.is_bot(),
        }
    }
}

/// Result of removing a member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Departure {
    /// No human is left; the session must be torn down.
    pub emptied: bool,
    pub new_host: Option<MemberId>,
}

/// What the tick loop should do after advancing a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickStatus {
    Running,
    Finished(Team),
    Stopped,
}

pub struct Session {
    id: SessionId,
    code: Option<String>,
    host: MemberId,
    roster: Vec<Member>,
    status: SessionStatus,
    game: Option<Match>,
    winner: Option<Team>,
    bots_created: u32,
    bot_tuning: BotTuning,
    tick_task: Option<AbortHandle>,
    closed: bool,
    outbox: mpsc::UnboundedSender<GameMessage>,
}

impl Session {
    /// Creates a waiting session. The host must be a human; a private
    /// session carries a join code.
    pub fn new(
        id: SessionId,
        code: Option<String>,
        members: Vec<Member>,
        bot_tuning: BotTuning,
        outbox: mpsc::UnboundedSender<GameMessage>,
    ) -> Self {
        let host = members
            .iter()
            .find(|member| !member.is_bot())
            .map(|member| member.id)
            .unwrap_or_default();

        Self {
            id,
            code,
            host,
            roster: members,
            status: SessionStatus::Waiting,
            game: None,
            winner: None,
            bots_created: 0,
            bot_tuning,
            tick_task: None,
            closed: false,
            outbox,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    pub fn is_private(&self) -> bool {
        self.code.is_some()
    }

    pub fn host(&self) -> MemberId {
        self.host
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn roster(&self) -> &[Member] {
        &self.roster
    }

    pub fn member(&self, id: MemberId) -> Option<&Member> {
        self.roster.iter().find(|member| member.id == id)
    }

    pub fn game(&self) -> Option<&Match> {
        self.game.as_ref()
    }

    pub fn game_mut(&mut self) -> Option<&mut Match> {
        self.game.as_mut()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn human_ids(&self) -> Vec<MemberId> {
        self.roster
            .iter()
            .filter(|member| !member.is_bot())
            .map(|member| member.id)
            .collect()
    }

    pub fn team_size(&self, team: Team) -> usize {
        self.roster
            .iter()
            .filter(|member| member.team == Some(team))
            .count()
    }

    pub fn teams(&self) -> Teams {
        let mut teams = Teams::default();
        for member in &self.roster {
            match member.team {
                Some(Team::A) => teams.a.push(member.id),
                Some(Team::B) => teams.b.push(member.id),
                None => {}
            }
        }
        teams
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.id,
            code: self.code.clone(),
            host: self.host,
            status: self.status,
            roster: self.roster.iter().map(Member::entry).collect(),
            teams: self.teams(),
        }
    }

    fn require_waiting(&self) -> CommandResult<()> {
        if self.status == SessionStatus::Waiting {
            Ok(())
        } else {
            Err(CommandError::GameAlreadyStarted)
        }
    }

    fn require_host(&self, requester: MemberId) -> CommandResult<()> {
        if requester == self.host {
            Ok(())
        } else {
            Err(CommandError::NotHost)
        }
    }

    fn require_room_for(&self, team: Team, member: MemberId) -> CommandResult<()> {
        let others = self
            .roster
            .iter()
            .filter(|m| m.team == Some(team) && m.id != member)
            .count();
        if others >= TEAM_CAPACITY {
            Err(CommandError::TeamFull(team.to_string()))
        } else {
            Ok(())
        }
    }

    fn find_bot(&self, bot_id: MemberId) -> CommandResult<usize> {
        self.roster
            .iter()
            .position(|m| m.id == bot_id && m.is_bot())
            .ok_or(CommandError::UnknownBot(bot_id))
    }

    /// Adds a human through a join code.
    pub fn join(&mut self, member: Member) -> CommandResult<()> {
        if let Seat::Human { player_id, .. } = &member.seat {
            let duplicate = self.roster.iter().any(|m| {
                matches!(&m.seat, Seat::Human { player_id: other, .. } if other == player_id)
            });
            if duplicate {
                return Err(CommandError::DuplicateIdentity);
            }
        }
        if self.roster.len() >= ROOM_CAPACITY {
            return Err(CommandError::RoomFull);
        }
        self.require_waiting()?;

        info!("{} joined session {}", member.name, self.id);
        let joined = member.id;
        self.roster.push(member);
        self.send_to(joined, Packet::SessionJoined(self.snapshot()));
        self.broadcast_roster();
        Ok(())
    }

    /// Moves a member onto `team`, leaving any previous team.
    pub fn select_team(&mut self, member_id: MemberId, team: &str) -> CommandResult<()> {
        let index = self
            .roster
            .iter()
            .position(|m| m.id == member_id)
            .ok_or(CommandError::NotInRoom)?;
        let team: Team = team.parse().map_err(CommandError::InvalidTeam)?;
        self.require_waiting()?;
        self.require_room_for(team, member_id)?;

        self.roster[index].team = Some(team);
        self.broadcast_roster();
        Ok(())
    }

    /// Host-only start of a waiting session.
    pub fn start(&mut self, requester: MemberId, rng: StdRng) -> CommandResult<()> {
        self.require_host(requester)?;
        self.require_waiting()?;
        for team in [Team::A, Team::B] {
            let size = self.team_size(team);
            if size == 0 {
                return Err(CommandError::EmptyTeam(team.to_string()));
            }
            if size > TEAM_CAPACITY {
                return Err(CommandError::TeamOverflow(team.to_string()));
            }
        }

        self.begin(rng);
        Ok(())
    }

    /// Switches to in-game and creates the match. Callers have validated the
    /// teams; the tick loop is started by the caller.
    pub fn begin(&mut self, rng: StdRng) {
        let bots: Vec<(MemberId, Team)> = self
            .roster
            .iter()
            .filter(|member| member.is_bot())
            .filter_map(|member| member.team.map(|team| (member.id, team)))
            .collect();

        let game = Match::new(&bots, self.bot_tuning, rng);
        let ball = game.physics().snapshot();
        self.game = Some(game);
        self.status = SessionStatus::InGame;

        info!(
            "Session {} started: {} vs {}",
            self.id,
            self.team_size(Team::A),
            self.team_size(Team::B)
        );
        self.broadcast(Packet::GameStarted {
            teams: self.teams(),
        });
        self.broadcast(Packet::BallState(ball));
    }

    /// Removes a member from the roster and its team. Returns `None` when the
    /// member was not in this session.
    pub fn remove_member(&mut self, member_id: MemberId) -> Option<Departure> {
        let index = self.roster.iter().position(|m| m.id == member_id)?;
        let member = self.roster.remove(index);
        info!("{} left session {}", member.name, self.id);

        let Some(next_host) = self.roster.iter().find(|m| !m.is_bot()).map(|m| m.id) else {
            return Some(Departure {
                emptied: true,
                new_host: None,
            });
        };

        let new_host = if member_id == self.host {
            self.host = next_host;
            Some(next_host)
        } else {
            None
        };

        self.broadcast(Packet::PlayerLeft { player: member_id });
        if let Some(host) = new_host {
            self.broadcast(Packet::HostChanged { host });
        }
        self.broadcast_roster();

        Some(Departure {
            emptied: false,
            new_host,
        })
    }

    /// Adds a bot on the smaller team that still has room.
    pub fn add_bot(&mut self, requester: MemberId, bot_id: MemberId) -> CommandResult<RosterEntry> {
        self.require_host(requester)?;
        self.require_waiting()?;
        if self.roster.len() >= ROOM_CAPACITY {
            return Err(CommandError::RoomFull);
        }

        let (a, b) = (self.team_size(Team::A), self.team_size(Team::B));
        let team = if a <= b && a < TEAM_CAPACITY {
            Some(Team::A)
        } else if b < TEAM_CAPACITY {
            Some(Team::B)
        } else {
            None
        };

        self.bots_created += 1;
        let mut bot = Member::bot(bot_id, format!("Bot {}", self.bots_created));
        bot.team = team;
        let entry = bot.entry();
        self.roster.push(bot);

        self.broadcast(Packet::BotAdded(entry.clone()));
        self.broadcast_roster();
        Ok(entry)
    }

    pub fn remove_bot(&mut self, requester: MemberId, bot_id: MemberId) -> CommandResult<()> {
        self.require_host(requester)?;
        let index = self.find_bot(bot_id)?;
        self.require_waiting()?;

        self.roster.remove(index);
        self.broadcast(Packet::BotRemoved { bot_id });
        self.broadcast_roster();
        Ok(())
    }

    pub fn assign_bot_team(
        &mut self,
        requester: MemberId,
        bot_id: MemberId,
        team: &str,
    ) -> CommandResult<()> {
        self.require_host(requester)?;
        let index = self.find_bot(bot_id)?;
        let team: Team = team.parse().map_err(CommandError::InvalidTeam)?;
        self.require_waiting()?;
        self.require_room_for(team, bot_id)?;

        self.roster[index].team = Some(team);
        self.broadcast_roster();
        Ok(())
    }

    /// Applies a human hit request. Returns true if the hit decided the game.
    pub fn hit(&mut self, member_id: MemberId, hit: &HitRequest) -> CommandResult<bool> {
        let team = self
            .member(member_id)
            .ok_or(CommandError::NotInRoom)?
            .team;
        let game = match (self.status, self.game.as_mut()) {
            (SessionStatus::InGame, Some(game)) => game,
            _ => return Err(CommandError::GameNotRunning),
        };
        let team = team.ok_or(CommandError::NotOnTeam)?;

        if let HitOutcome::Violation(event) = game.hit_ball(member_id, team, hit) {
            self.publish(vec![MatchEvent::Score(event)]);
        }
        Ok(self.settle())
    }

    /// Forwards a movement update to everyone else in the session.
    pub fn relay_motion(&self, member_id: MemberId, motion: PlayerMotion) {
        self.broadcast_except(
            member_id,
            Packet::PlayerMoved {
                player: member_id,
                motion,
            },
        );
    }

    pub fn relay_action(&self, member_id: MemberId, kind: String, payload: Option<ActionPayload>) {
        self.broadcast_except(
            member_id,
            Packet::PlayerAction {
                player: member_id,
                kind,
                payload,
            },
        );
    }

    /// Advances the match by one tick. Called by the session's tick loop.
    pub fn advance(&mut self) -> TickStatus {
        if self.closed {
            return TickStatus::Stopped;
        }
        let Some(game) = self.game.as_mut() else {
            return TickStatus::Stopped;
        };

        let events = game.tick();
        self.publish(events);

        if self.settle() {
            match self.winner {
                Some(team) => TickStatus::Finished(team),
                None => TickStatus::Stopped,
            }
        } else {
            TickStatus::Running
        }
    }

    /// Ends the game if the match has a winner. Returns true when it did.
    fn settle(&mut self) -> bool {
        let Some(winner) = self.game.as_ref().and_then(Match::winner) else {
            return false;
        };
        let final_score = self
            .game
            .as_ref()
            .map(|game| game.rules().score())
            .unwrap_or_default();

        self.status = SessionStatus::Finished;
        self.game = None;
        self.winner = Some(winner);
        info!(
            "Session {} finished: team {} wins {}-{}",
            self.id, winner, final_score.team_a, final_score.team_b
        );
        self.broadcast(Packet::GameEnded {
            winner,
            final_score,
        });
        true
    }

    pub fn winner(&self) -> Option<Team> {
        self.winner
    }

    pub fn attach_tick_task(&mut self, handle: AbortHandle) {
        self.tick_task = Some(handle);
    }

    /// Stops the tick loop and releases the match. Nothing is emitted for this
    /// session afterwards.
    pub fn close(&mut self) {
        if let Some(handle) = self.tick_task.take() {
            handle.abort();
        }
        self.game = None;
        self.closed = true;
    }

    fn publish(&self, events: Vec<MatchEvent>) {
        for event in events {
            match event {
                MatchEvent::Ball(ball) => self.broadcast(Packet::BallState(ball)),
                MatchEvent::Score(score) => self.broadcast(Packet::ScoreUpdate(score)),
                MatchEvent::PlayerMoved { player, motion } => {
                    self.broadcast(Packet::PlayerMoved { player, motion })
                }
                MatchEvent::PlayerAction {
                    player,
                    kind,
                    payload,
                } => self.broadcast(Packet::PlayerAction {
                    player,
                    kind,
                    payload,
                }),
            }
        }
    }

    fn broadcast_roster(&self) {
        self.broadcast(Packet::RosterChanged {
            roster: self.roster.iter().map(Member::entry).collect(),
        });
        self.broadcast(Packet::TeamsChanged {
            teams: self.teams(),
        });
    }

    pub fn send_to(&self, member_id: MemberId, packet: Packet) {
        if let Some(addr) = self.member(member_id).and_then(Member::addr) {
            self.queue(GameMessage::SendPacket { packet, addr });
        }
    }

    pub fn broadcast(&self, packet: Packet) {
        self.broadcast_filtered(packet, None);
    }

    fn broadcast_except(&self, skip: MemberId, packet: Packet) {
        self.broadcast_filtered(packet, Some(skip));
    }

    fn broadcast_filtered(&self, packet: Packet, skip: Option<MemberId>) {
        if self.closed {
            return;
        }
        let recipients: Vec<SocketAddr> = self
            .roster
            .iter()
            .filter(|member| Some(member.id) != skip)
            .filter_map(Member::addr)
            .collect();
        if recipients.is_empty() {
            return;
        }
        self.queue(GameMessage::BroadcastPacket { packet, recipients });
    }

    fn queue(&self, message: GameMessage) {
        if let Err(e) = self.outbox.send(message) {
            error!("Failed to queue packet for session {}: {}", self.id, e);
        }
    }
}
