//! Connection registry for the session server
//!
//! This module tracks every live connection and what it is currently doing:
//! - Connection lifecycle (connect, disconnect, timeout)
//! - The registered player profile resolved through a [`CharacterDirectory`]
//! - Whether the connection is idle, queued for matchmaking or seated in a session
//!
//! Bots never connect, but they draw their ids from the same counter so that
//! a member id is unique across humans and bots.

use arena_shared::{ClientId, SessionId};
use log::info;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Longest display name accepted from a character directory.
const MAX_NAME_LEN: usize = 24;

/// Resolves a player's chosen character to the name shown to other players.
///
/// Identity and character storage live outside the server; this is the seam
/// where they plug in.
pub trait CharacterDirectory {
    fn display_name(&self, player_id: &str, character_id: &str) -> Result<String, String>;
}

/// Directory used when no external store is configured: the character id is
/// the display name.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultDirectory;

impl CharacterDirectory for DefaultDirectory {
    fn display_name(&self, player_id: &str, character_id: &str) -> Result<String, String> {
        if player_id.trim().is_empty() {
            return Err("player id is empty".to_string());
        }
        let name = character_id.trim();
        if name.is_empty() {
            return Err("character id is empty".to_string());
        }
        Ok(name.chars().take(MAX_NAME_LEN).collect())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub player_id: String,
    pub character_id: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientStatus {
    Idle,
    Queued,
    InSession(SessionId),
}

/// A live connection and its lobby state
#[derive(Debug)]
pub struct Client {
    /// Unique client identifier assigned by the server
    pub id: ClientId,
    /// Network address for sending responses
    pub addr: SocketAddr,
    /// Last time we received any packet from this client
    pub last_seen: Instant,
    /// Set once the client has registered
    pub profile: Option<Profile>,
    pub status: ClientStatus,
}

impl Client {
    pub fn new(id: ClientId, addr: SocketAddr) -> Self {
        Self {
            id,
            addr,
            last_seen: Instant::now(),
            profile: None,
            status: ClientStatus::Idle,
        }
    }

    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    /// Checks if the client has exceeded the connection timeout
    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

/// All connected clients, keyed by id
///
/// Enforces the connection capacity limit and hands out member ids.
pub struct ConnectionRegistry {
    clients: HashMap<ClientId, Client>,
    /// Connection currently holding each registered player id
    identities: HashMap<String, ClientId>,
    /// Next available id, shared by clients and bots
    next_id: u32,
    /// Maximum number of concurrent clients allowed
    max_clients: usize,
}

impl ConnectionRegistry {
    pub fn new(max_clients: usize) -> Self {
        Self {
            clients: HashMap::new(),
            identities: HashMap::new(),
            next_id: 1,
            max_clients,
        }
    }

    /// Hands out a fresh member id without creating a connection.
    pub fn alloc_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Attempts to add a new client connection
    ///
    /// Returns None if the server is at capacity.
    pub fn add_client(&mut self, addr: SocketAddr) -> Option<ClientId> {
        if self.clients.len() >= self.max_clients {
            return None;
        }

        let client_id = self.alloc_id();
        info!("Client {} connected from {}", client_id, addr);
        self.clients.insert(client_id, Client::new(client_id, addr));

        Some(client_id)
    }

    /// Removes a client, returning it if it was still connected.
    pub fn remove_client(&mut self, client_id: &ClientId) -> Option<Client> {
        let client = self.clients.remove(client_id)?;
        if let Some(profile) = &client.profile {
            self.release_identity(&profile.player_id, client.id);
        }
        info!("Client {} disconnected", client.id);
        Some(client)
    }

    /// Finds a client ID by their network address
    pub fn find_client_by_addr(&self, addr: SocketAddr) -> Option<ClientId> {
        self.clients
            .iter()
            .find(|(_, client)| client.addr == addr)
            .map(|(id, _)| *id)
    }

    pub fn get(&self, client_id: &ClientId) -> Option<&Client> {
        self.clients.get(client_id)
    }

    /// Records activity; returns false if the client ID is unknown.
    pub fn touch(&mut self, client_id: &ClientId) -> bool {
        match self.clients.get_mut(client_id) {
            Some(client) => {
                client.touch();
                true
            }
            None => false,
        }
    }

    /// Returns the connection registered under `player_id`, if any.
    pub fn holder_of(&self, player_id: &str) -> Option<ClientId> {
        self.identities.get(player_id).copied()
    }

    pub fn set_profile(&mut self, client_id: &ClientId, profile: Profile) {
        let Some(client) = self.clients.get_mut(client_id) else {
            return;
        };
        info!(
            "Client {} registered as {} ({})",
            client_id, profile.display_name, profile.player_id
        );
        let previous = client.profile.replace(profile.clone());
        if let Some(previous) = previous {
            self.release_identity(&previous.player_id, *client_id);
        }
        self.identities.insert(profile.player_id, *client_id);
    }

    fn release_identity(&mut self, player_id: &str, client_id: ClientId) {
        if self.identities.get(player_id) == Some(&client_id) {
            self.identities.remove(player_id);
        }
    }

    pub fn status(&self, client_id: &ClientId) -> Option<ClientStatus> {
        self.clients.get(client_id).map(|client| client.status)
    }

    pub fn set_status(&mut self, client_id: &ClientId, status: ClientStatus) {
        if let Some(client) = self.clients.get_mut(client_id) {
            client.status = status;
        }
    }

    /// Lists clients that have been silent for longer than `timeout`.
    pub fn timed_out(&self, timeout: Duration) -> Vec<ClientId> {
        self.clients
            .iter()
            .filter(|(_, client)| client.is_timed_out(timeout))
            .map(|(id, _)| *id)
            .collect()
    }

    /// Returns the number of currently connected clients
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
