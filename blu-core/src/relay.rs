//! Relay engine: id-based dedup, deliver-once, flood relay to everyone but the sender.

use std::collections::{HashSet, VecDeque};

use crate::core::{OutboundAction, Reliability};
use crate::directory::PeerDirectory;
use crate::envelope::{DisplayedMessage, Envelope};
use crate::identity::PeerId;
use crate::session::SessionState;

/// Envelope ids already delivered.
///
/// Unbounded by default. With a capacity the oldest ids are evicted first, so a copy
/// arriving after more than `capacity` newer envelopes would be delivered again.
pub struct SeenIds {
    ids: HashSet<String>,
    order: VecDeque<String>,
    capacity: Option<usize>,
}

impl SeenIds {
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            ids: HashSet::new(),
            order: VecDeque::new(),
            capacity: capacity.filter(|&c| c > 0),
        }
    }

    /// Returns true if `id` was not seen before.
    pub fn insert(&mut self, id: &str) -> bool {
        if !self.ids.insert(id.to_string()) {
            return false;
        }
        if let Some(cap) = self.capacity {
            self.order.push_back(id.to_string());
            while self.order.len() > cap {
                if let Some(old) = self.order.pop_front() {
                    self.ids.remove(&old);
                }
            }
        }
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Dedup-and-deliver. Returns true if the envelope was new and appended to the log.
pub fn deliver(state: &mut SessionState, env: &Envelope) -> bool {
    if !state.seen.insert(&env.id) {
        return false;
    }
    state.push_message(DisplayedMessage::from_envelope(env));
    true
}

/// Connected peers other than `from`.
pub fn relay_targets(directory: &PeerDirectory, from: PeerId) -> Vec<PeerId> {
    directory
        .connected_peers()
        .into_iter()
        .filter(|p| *p != from)
        .collect()
}

/// Handle bytes received from `from`: deliver once, then forward the raw bytes unchanged.
/// Unparsable payloads and duplicates produce no action.
pub fn on_data_received(
    state: &mut SessionState,
    directory: &PeerDirectory,
    from: PeerId,
    bytes: &[u8],
) -> Option<OutboundAction> {
    let env = match Envelope::decode(bytes) {
        Ok(env) => env,
        Err(e) => {
            tracing::debug!(peer = %from, error = %e, "dropping unparsable payload");
            return None;
        }
    };
    if !deliver(state, &env) {
        tracing::trace!(id = %env.id, "duplicate envelope");
        return None;
    }
    let to = relay_targets(directory, from);
    if to.is_empty() {
        return None;
    }
    tracing::debug!(id = %env.id, peers = to.len(), "relaying envelope");
    Some(OutboundAction::Send {
        to,
        payload: bytes.to_vec(),
        reliability: Reliability::Reliable,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::ConnectionState;
    use crate::envelope::Destination;
    use crate::identity::Handle;
    use crate::session::DEFAULT_ROOM;

    fn connected(dir: &mut PeerDirectory, name: &str) -> PeerId {
        let id = PeerId::random();
        dir.on_discovered(id, Handle::normalize(name).unwrap());
        dir.on_connection_state_changed(id, ConnectionState::Connected);
        id
    }

    #[test]
    fn bounded_seen_evicts_oldest() {
        let mut seen = SeenIds::new(Some(2));
        assert!(seen.insert("a"));
        assert!(seen.insert("b"));
        assert!(!seen.insert("a"));
        assert!(seen.insert("c"));
        assert_eq!(seen.len(), 2);
        assert!(!seen.contains("a"));
        assert!(seen.insert("a"));
    }

    #[test]
    fn unbounded_seen_keeps_everything() {
        let mut seen = SeenIds::new(None);
        for i in 0..1000 {
            assert!(seen.insert(&i.to_string()));
        }
        assert_eq!(seen.len(), 1000);
        assert!(seen.contains("0"));
    }

    #[test]
    fn relays_to_everyone_but_sender() {
        let mut state = SessionState::new(DEFAULT_ROOM, None);
        let mut dir = PeerDirectory::new(PeerId::random());
        let p = connected(&mut dir, "@p");
        let q = connected(&mut dir, "@q");
        let r = connected(&mut dir, "@r");
        let bytes = Envelope::new("@p", Destination::room("bitchat"), "hi")
            .encode()
            .unwrap();

        let action = on_data_received(&mut state, &dir, p, &bytes).unwrap();
        match action {
            OutboundAction::Send { to, payload, .. } => {
                let mut expected = vec![q, r];
                expected.sort_unstable();
                assert_eq!(to, expected);
                assert_eq!(payload, bytes);
            }
            _ => panic!("expected Send"),
        }
        assert_eq!(state.messages().len(), 1);
    }

    #[test]
    fn duplicate_from_second_peer_is_dropped() {
        let mut state = SessionState::new(DEFAULT_ROOM, None);
        let mut dir = PeerDirectory::new(PeerId::random());
        let p = connected(&mut dir, "@p");
        let q = connected(&mut dir, "@q");
        let bytes = Envelope::new("@p", Destination::room("bitchat"), "hi")
            .encode()
            .unwrap();
        assert!(on_data_received(&mut state, &dir, p, &bytes).is_some());
        assert!(on_data_received(&mut state, &dir, q, &bytes).is_none());
        assert_eq!(state.messages().len(), 1);
    }

    #[test]
    fn lone_link_delivers_without_relay() {
        let mut state = SessionState::new(DEFAULT_ROOM, None);
        let mut dir = PeerDirectory::new(PeerId::random());
        let p = connected(&mut dir, "@p");
        let bytes = Envelope::new("@p", Destination::room("bitchat"), "hi")
            .encode()
            .unwrap();
        assert!(on_data_received(&mut state, &dir, p, &bytes).is_none());
        assert_eq!(state.messages().len(), 1);
    }

    #[test]
    fn garbage_is_ignored() {
        let mut state = SessionState::new(DEFAULT_ROOM, None);
        let mut dir = PeerDirectory::new(PeerId::random());
        let p = connected(&mut dir, "@p");
        connected(&mut dir, "@q");
        assert!(on_data_received(&mut state, &dir, p, b"\xff\x00garbage").is_none());
        assert!(state.messages().is_empty());
    }
}
