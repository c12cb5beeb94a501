use std::collections::HashMap;
use std::sync::Mutex;

use crate::crypto::{generate_random_hex, unix_now};
use crate::model::{Ticket, TicketIdentity};

/// Single-use, short-lived credential store bridging an authenticated
/// HTTP call into a WebSocket upgrade. One lock, because contention is
/// low (tickets live for 2 minutes by default) and every operation is
/// a cheap map mutation.
pub struct TicketStore {
    tickets: Mutex<HashMap<String, Ticket>>,
}

impl Default for TicketStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TicketStore {
    pub fn new() -> Self {
        Self {
            tickets: Mutex::new(HashMap::new()),
        }
    }

    /// Issue a ticket for `identity`, valid for `ttl_secs`. Returns the
    /// raw ticket string the caller hands back to the client.
    pub fn issue(&self, identity: TicketIdentity, ttl_secs: u64) -> String {
        let raw = generate_random_hex(32);
        let entry = Ticket {
            identity,
            expires_at: unix_now() + ttl_secs,
        };
        self.tickets
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(raw.clone(), entry);
        raw
    }

    /// Remove the ticket unconditionally; return it only if it hadn't
    /// already expired. Every ticket is consumed on first attempt
    /// regardless of outcome, so a second concurrent caller always
    /// observes `None`.
    pub fn consume(&self, ticket: &str) -> Option<Ticket> {
        let entry = self
            .tickets
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(ticket)?;
        if unix_now() <= entry.expires_at {
            Some(entry)
        } else {
            None
        }
    }

    /// Remove expired entries. Call on an interval equal to the ticket
    /// TTL — no apparent upper bound on unconsumed, expired tickets
    /// otherwise.
    pub fn sweep(&self) {
        let now = unix_now();
        self.tickets
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|_, t| t.expires_at > now);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.tickets.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn identity() -> TicketIdentity {
        TicketIdentity::User {
            user_id: Uuid::new_v4(),
            role: hearth_protocol::Role::User,
        }
    }

    #[test]
    fn consume_is_single_use() {
        let store = TicketStore::new();
        let ticket = store.issue(identity(), 120);
        assert!(store.consume(&ticket).is_some());
        assert!(store.consume(&ticket).is_none());
    }

    #[test]
    fn consume_unknown_ticket_returns_none() {
        let store = TicketStore::new();
        assert!(store.consume("does-not-exist").is_none());
    }

    #[test]
    fn sweep_removes_expired_entries() {
        let store = TicketStore::new();
        let ticket = store.issue(identity(), 0);
        // already expired relative to `now` on the next tick
        std::thread::sleep(std::time::Duration::from_secs(1));
        store.sweep();
        assert_eq!(store.len(), 0);
        assert!(store.consume(&ticket).is_none());
    }
}
