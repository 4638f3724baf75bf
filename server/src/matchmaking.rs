//! FIFO matchmaking queue.
//!
//! The queue has no locking of its own. It is owned by the lobby task, which
//! handles packets one at a time, so enqueue, dequeue and match formation can
//! never interleave.

use crate::registry::Profile;
use arena_shared::{ClientId, ROOM_CAPACITY, TEAM_CAPACITY};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub client: ClientId,
    pub addr: SocketAddr,
    pub profile: Profile,
    pub enqueued_at: Instant,
}

/// Six entries taken off the queue, split by queue order.
#[derive(Debug, Clone)]
pub struct FormedMatch {
    pub team_a: Vec<QueueEntry>,
    pub team_b: Vec<QueueEntry>,
}

#[derive(Debug, Default)]
pub struct MatchmakingQueue {
    entries: VecDeque<QueueEntry>,
}

impl MatchmakingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry and forms a match from the six oldest entries once
    /// enough players are waiting.
    pub fn enqueue(&mut self, entry: QueueEntry) -> Option<FormedMatch> {
        self.entries.push_back(entry);

        if self.entries.len() < ROOM_CAPACITY {
            return None;
        }

        let mut players: Vec<QueueEntry> = self.entries.drain(..ROOM_CAPACITY).collect();
        let team_b = players.split_off(TEAM_CAPACITY);
        Some(FormedMatch {
            team_a: players,
            team_b,
        })
    }

    /// Removes the client's entry. Returns false if it was not queued.
    pub fn dequeue(&mut self, client: ClientId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.client != client);
        self.entries.len() != before
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(client: ClientId) -> QueueEntry {
        QueueEntry {
            client,
            addr: SocketAddr::from(([127, 0, 0, 1], 9000 + client as u16)),
            profile: Profile {
                player_id: format!("p{}", client),
                character_id: format!("c{}", client),
                display_name: format!("Player {}", client),
            },
            enqueued_at: Instant::now(),
        }
    }

    fn ids(entries: &[QueueEntry]) -> Vec<ClientId> {
        entries.iter().map(|e| e.client).collect()
    }

    #[test]
    fn test_forms_match_on_sixth_entry() {
        let mut queue = MatchmakingQueue::new();
        for client in 1..=5 {
            assert!(queue.enqueue(entry(client)).is_none());
        }
        assert_eq!(queue.len(), 5);

        let formed = queue.enqueue(entry(6)).expect("sixth entry forms a match");
        assert_eq!(ids(&formed.team_a), vec![1, 2, 3]);
        assert_eq!(ids(&formed.team_b), vec![4, 5, 6]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_forms_exactly_at_multiples_of_six() {
        let mut queue = MatchmakingQueue::new();
        let mut formed = Vec::new();

        for client in 1..=20 {
            if let Some(found) = queue.enqueue(entry(client)) {
                formed.push((client, found));
            }
        }

        let at: Vec<ClientId> = formed.iter().map(|(client, _)| *client).collect();
        assert_eq!(at, vec![6, 12, 18]);
        assert_eq!(ids(&formed[1].1.team_a), vec![7, 8, 9]);
        assert_eq!(ids(&formed[2].1.team_b), vec![16, 17, 18]);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_dequeue_keeps_fifo_order() {
        let mut queue = MatchmakingQueue::new();
        for client in 1..=4 {
            queue.enqueue(entry(client));
        }

        assert!(queue.dequeue(2));
        assert!(!queue.dequeue(2));
        assert_eq!(queue.len(), 3);

        queue.enqueue(entry(5));
        queue.enqueue(entry(6));
        let formed = queue.enqueue(entry(7)).unwrap();
        assert_eq!(ids(&formed.team_a), vec![1, 3, 4]);
        assert_eq!(ids(&formed.team_b), vec![5, 6, 7]);
    }

    #[test]
    fn test_dequeue_absent_is_harmless() {
        let mut queue = MatchmakingQueue::new();
        queue.enqueue(entry(1));
        assert!(!queue.dequeue(42));
        assert_eq!(queue.len(), 1);
    }
}
