//! Session arena: every live connection, keyed by a stable [`SessionId`].
//!
//! The registry is owned by the compatibility service and mutated only
//! from the runtime's event loop, so it needs no locking.
//!
//! Each entry pairs the protocol [`Session`] with how the connection came
//! to exist:
//!
//! ```text
//! Inbound                 accepted on one of our listeners
//! Dialed { reconnect }    opened by us; `reconnect` marks message sessions
//!                         created by connect_to_host or a reconnect redial
//! ```

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;

use mwb_core::{Channel, PeerIdentity, Session};

/// Stable identifier for one connection, unique for the service's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The two ports of a remote host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortPair {
    pub message: u16,
    pub clipboard: u16,
}

/// A host we dial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialTarget {
    pub host: String,
    pub ports: PortPair,
}

impl DialTarget {
    pub fn port_for(&self, channel: Channel) -> u16 {
        match channel {
            Channel::Message => self.ports.message,
            Channel::Clipboard => self.ports.clipboard,
        }
    }
}

/// How a connection was opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOrigin {
    Inbound { remote: SocketAddr },
    Dialed { target: DialTarget, reconnect: bool },
}

impl SessionOrigin {
    /// The dial target if losing this session should trigger a redial.
    pub fn reconnect_target(&self) -> Option<&DialTarget> {
        match self {
            SessionOrigin::Dialed {
                target,
                reconnect: true,
            } => Some(target),
            _ => None,
        }
    }

    pub fn dial_target(&self) -> Option<&DialTarget> {
        match self {
            SessionOrigin::Dialed { target, .. } => Some(target),
            SessionOrigin::Inbound { .. } => None,
        }
    }
}

/// One registry entry.
#[derive(Debug)]
pub struct SessionEntry {
    pub session: Session,
    pub origin: SessionOrigin,
}

/// In-memory arena of all live sessions, with one id list per channel.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<SessionId, SessionEntry>,
    message: Vec<SessionId>,
    clipboard: Vec<SessionId>,
    next_id: u64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves an id, e.g. for a dial that has not connected yet.
    pub fn allocate_id(&mut self) -> SessionId {
        self.next_id += 1;
        SessionId(self.next_id)
    }

    pub fn insert(&mut self, id: SessionId, entry: SessionEntry) {
        let list = self.list_mut(entry.session.channel());
        if !list.contains(&id) {
            list.push(id);
        }
        self.sessions.insert(id, entry);
    }

    pub fn get(&self, id: SessionId) -> Option<&SessionEntry> {
        self.sessions.get(&id)
    }

    pub fn get_mut(&mut self, id: SessionId) -> Option<&mut SessionEntry> {
        self.sessions.get_mut(&id)
    }

    pub fn remove(&mut self, id: SessionId) -> Option<SessionEntry> {
        let entry = self.sessions.remove(&id)?;
        self.list_mut(entry.session.channel()).retain(|s| *s != id);
        Some(entry)
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions.contains_key(&id)
    }

    /// Session ids of one channel, oldest first.
    pub fn ids(&self, channel: Channel) -> &[SessionId] {
        match channel {
            Channel::Message => &self.message,
            Channel::Clipboard => &self.clipboard,
        }
    }

    pub fn all_ids(&self) -> Vec<SessionId> {
        self.message.iter().chain(&self.clipboard).copied().collect()
    }

    /// Verified session ids of one channel, oldest first.
    pub fn verified(&self, channel: Channel) -> Vec<SessionId> {
        self.ids(channel)
            .iter()
            .copied()
            .filter(|id| self.sessions.get(id).is_some_and(|e| e.session.is_verified()))
            .collect()
    }

    /// Verified sessions of `channel` talking to the same peer as `peer`,
    /// excluding `except`.
    pub fn peer_sessions(
        &self,
        channel: Channel,
        peer: &PeerIdentity,
        except: Option<SessionId>,
    ) -> Vec<SessionId> {
        self.verified(channel)
            .into_iter()
            .filter(|id| Some(*id) != except)
            .filter(|id| {
                self.sessions
                    .get(id)
                    .and_then(|e| e.session.peer())
                    .is_some_and(|p| p.same_peer(peer))
            })
            .collect()
    }

    /// Verified peers on the message channel.
    pub fn connected_peers(&self) -> Vec<PeerIdentity> {
        self.verified(Channel::Message)
            .iter()
            .filter_map(|id| self.sessions.get(id)?.session.peer().cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn list_mut(&mut self, channel: Channel) -> &mut Vec<SessionId> {
        match channel {
            Channel::Message => &mut self.message,
            Channel::Clipboard => &mut self.clipboard,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mwb_core::{derive_session_key, Direction, LocalMachine, SessionKey};

    fn key() -> SessionKey {
        derive_session_key("ABCDEFGHIJKLMNOP").unwrap()
    }

    fn inbound(key: &SessionKey, channel: Channel) -> SessionEntry {
        SessionEntry {
            session: Session::new(key, LocalMachine::new(1, "local"), Direction::Inbound, channel),
            origin: SessionOrigin::Inbound {
                remote: "127.0.0.1:40000".parse().unwrap(),
            },
        }
    }

    #[test]
    fn test_registry_starts_empty() {
        let registry = SessionRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.ids(Channel::Message).is_empty());
    }

    #[test]
    fn test_allocated_ids_are_unique() {
        let mut registry = SessionRegistry::new();
        let a = registry.allocate_id();
        let b = registry.allocate_id();
        assert_ne!(a, b);
    }

    #[test]
    fn test_insert_files_session_under_its_channel() {
        let k = key();
        let mut registry = SessionRegistry::new();
        let m = registry.allocate_id();
        let c = registry.allocate_id();

        registry.insert(m, inbound(&k, Channel::Message));
        registry.insert(c, inbound(&k, Channel::Clipboard));

        assert_eq!(registry.ids(Channel::Message), &[m]);
        assert_eq!(registry.ids(Channel::Clipboard), &[c]);
        assert_eq!(registry.all_ids(), vec![m, c]);
    }

    #[test]
    fn test_remove_drops_from_arena_and_list() {
        let k = key();
        let mut registry = SessionRegistry::new();
        let id = registry.allocate_id();
        registry.insert(id, inbound(&k, Channel::Message));

        assert!(registry.remove(id).is_some());
        assert!(registry.remove(id).is_none());
        assert!(!registry.contains(id));
        assert!(registry.ids(Channel::Message).is_empty());
    }

    #[test]
    fn test_unverified_sessions_are_not_listed_as_verified() {
        let k = key();
        let mut registry = SessionRegistry::new();
        let id = registry.allocate_id();
        registry.insert(id, inbound(&k, Channel::Message));

        assert!(registry.verified(Channel::Message).is_empty());
        assert!(registry.connected_peers().is_empty());
    }

    #[test]
    fn test_only_flagged_dials_are_reconnect_targets() {
        let target = DialTarget {
            host: "10.0.0.5".into(),
            ports: PortPair { message: 15101, clipboard: 15100 },
        };
        let flagged = SessionOrigin::Dialed { target: target.clone(), reconnect: true };
        let plain = SessionOrigin::Dialed { target: target.clone(), reconnect: false };

        assert_eq!(flagged.reconnect_target(), Some(&target));
        assert_eq!(plain.reconnect_target(), None);
        assert_eq!(plain.dial_target(), Some(&target));
        assert_eq!(target.port_for(Channel::Clipboard), 15100);
    }
}
