//! Peer directory: reachable peers and the handle→peer lookup, driven by transport events.

use std::collections::HashMap;

use crate::identity::{Handle, PeerId};

/// Connection state as reported by the transport.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    NotConnected,
}

/// Lifecycle of a directory entry. Removal from the directory is the `Gone` state.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum PeerState {
    Discovered,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Peer {
    pub peer_id: PeerId,
    pub handle: Handle,
    pub state: PeerState,
}

/// What a state change did to the directory, for notices.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Transition {
    Joined(Handle),
    Left(Handle),
    Unchanged,
}

/// Reachable peers, excluding the local identity.
///
/// Handle collisions are last-write-wins: the most recent discovery of a handle owns the
/// mapping. When that peer goes away, the mapping falls back to another peer still
/// advertising the same handle (connected first).
#[derive(Debug)]
pub struct PeerDirectory {
    local_id: PeerId,
    peers: HashMap<PeerId, Peer>,
    by_handle: HashMap<Handle, PeerId>,
}

impl PeerDirectory {
    pub fn new(local_id: PeerId) -> Self {
        Self {
            local_id,
            peers: HashMap::new(),
            by_handle: HashMap::new(),
        }
    }

    pub fn local_id(&self) -> PeerId {
        self.local_id
    }

    /// Peer appeared. Returns false when the event is about ourselves and was ignored.
    pub fn on_discovered(&mut self, peer_id: PeerId, handle: Handle) -> bool {
        if peer_id == self.local_id {
            return false;
        }
        let existing = self
            .peers
            .get(&peer_id)
            .map(|p| (p.handle.clone(), p.state));
        let state = match existing {
            Some((old, state)) => {
                if old != handle {
                    // Re-advertised under a new handle: drop the stale mapping first.
                    self.release_handle(&old, peer_id);
                }
                state
            }
            None => PeerState::Discovered,
        };
        self.peers.insert(
            peer_id,
            Peer {
                peer_id,
                handle: handle.clone(),
                state,
            },
        );
        self.by_handle.insert(handle, peer_id);
        true
    }

    pub fn on_connection_state_changed(
        &mut self,
        peer_id: PeerId,
        state: ConnectionState,
    ) -> Transition {
        match state {
            ConnectionState::NotConnected => self.remove(peer_id),
            ConnectionState::Connecting => {
                if let Some(p) = self.peers.get_mut(&peer_id) {
                    if p.state == PeerState::Discovered {
                        p.state = PeerState::Connecting;
                    }
                }
                Transition::Unchanged
            }
            ConnectionState::Connected => match self.peers.get_mut(&peer_id) {
                Some(p) if p.state != PeerState::Connected => {
                    p.state = PeerState::Connected;
                    Transition::Joined(p.handle.clone())
                }
                Some(_) => Transition::Unchanged,
                None => {
                    tracing::debug!(peer = %peer_id, "connected peer not in directory");
                    Transition::Unchanged
                }
            },
        }
    }

    pub fn on_lost(&mut self, peer_id: PeerId) -> Transition {
        self.remove(peer_id)
    }

    fn remove(&mut self, peer_id: PeerId) -> Transition {
        let Some(peer) = self.peers.remove(&peer_id) else {
            return Transition::Unchanged;
        };
        self.release_handle(&peer.handle, peer_id);
        if peer.state == PeerState::Connected {
            Transition::Left(peer.handle)
        } else {
            Transition::Unchanged
        }
    }

    /// Drop `handle → peer_id` if `peer_id` owns it, falling back to another holder of the handle.
    fn release_handle(&mut self, handle: &Handle, peer_id: PeerId) {
        if self.by_handle.get(handle) != Some(&peer_id) {
            return;
        }
        self.by_handle.remove(handle);
        let fallback = self
            .peers
            .values()
            .filter(|p| p.peer_id != peer_id && p.handle == *handle)
            .max_by_key(|p| (p.state == PeerState::Connected, p.peer_id))
            .map(|p| p.peer_id);
        if let Some(other) = fallback {
            self.by_handle.insert(handle.clone(), other);
        }
    }

    pub fn lookup(&self, handle: &Handle) -> Option<&Peer> {
        self.by_handle.get(handle).and_then(|id| self.peers.get(id))
    }

    pub fn get(&self, peer_id: &PeerId) -> Option<&Peer> {
        self.peers.get(peer_id)
    }

    pub fn is_connected(&self, peer_id: &PeerId) -> bool {
        self.peers
            .get(peer_id)
            .is_some_and(|p| p.state == PeerState::Connected)
    }

    /// Connected peers, sorted for stable fan-out order.
    pub fn connected_peers(&self) -> Vec<PeerId> {
        let mut out: Vec<PeerId> = self
            .peers
            .values()
            .filter(|p| p.state == PeerState::Connected)
            .map(|p| p.peer_id)
            .collect();
        out.sort_unstable();
        out
    }

    pub fn count(&self) -> usize {
        self.peers.len()
    }

    pub fn sorted_handles(&self) -> Vec<String> {
        let mut out: Vec<String> = self
            .peers
            .values()
            .map(|p| p.handle.as_str().to_string())
            .collect();
        out.sort();
        out
    }

    pub fn clear(&mut self) {
        self.peers.clear();
        self.by_handle.clear();
    }
}
