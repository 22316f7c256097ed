//! Message router: destination resolution, envelope construction, recipient selection.

use crate::directory::PeerDirectory;
use crate::envelope::{Destination, Envelope};
use crate::identity::{Handle, PeerId};
use crate::session::SessionState;

/// Trim and drop a leading `#`. Returns `None` for an empty name.
pub fn normalize_room(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let name = trimmed.strip_prefix('#').unwrap_or(trimmed).trim();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

/// Build an outbound envelope. Empty or whitespace-only text yields `None`.
///
/// An active direct target wins; otherwise the explicit room, otherwise the current room.
pub fn compose(
    state: &SessionState,
    sender: &Handle,
    text: &str,
    explicit_room: Option<&str>,
) -> Option<Envelope> {
    if text.trim().is_empty() {
        return None;
    }
    let destination = match &state.active_dm {
        Some(target) => Destination::Direct(target.clone()),
        None => {
            let room = explicit_room
                .and_then(normalize_room)
                .unwrap_or_else(|| state.current_room.clone());
            Destination::Room(room)
        }
    };
    Some(Envelope::new(sender.as_str(), destination, text))
}

/// Peers an envelope should be transmitted to.
///
/// A direct message to an unknown (or not yet connected) handle has no recipients: it is
/// still delivered locally, it just cannot leave this device.
pub fn recipients_for(env: &Envelope, directory: &PeerDirectory) -> Vec<PeerId> {
    match &env.destination {
        Destination::Room(_) => directory.connected_peers(),
        Destination::Direct(handle) => match directory.lookup(handle) {
            Some(peer) if directory.is_connected(&peer.peer_id) => vec![peer.peer_id],
            _ => {
                tracing::debug!(target_handle = %handle, "direct target not reachable, local echo only");
                Vec::new()
            }
        },
        Destination::System => Vec::new(),
    }
}

/// Switch rooms. Clears any direct target. Returns false for an empty name.
pub fn set_room(state: &mut SessionState, name: &str) -> bool {
    let Some(room) = normalize_room(name) else {
        return false;
    };
    state.active_dm = None;
    state.post_system_notice(&format!("switched to #{}", room));
    state.current_room = room;
    true
}

pub fn start_direct(state: &mut SessionState, raw: &str) -> bool {
    let Some(handle) = Handle::normalize(raw) else {
        return false;
    };
    state.post_system_notice(&format!("direct chat with {}", handle));
    state.active_dm = Some(handle);
    true
}

pub fn end_direct(state: &mut SessionState) -> bool {
    if state.active_dm.take().is_none() {
        return false;
    }
    let notice = format!("back to #{}", state.current_room);
    state.post_system_notice(&notice);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::ConnectionState;
    use crate::session::DEFAULT_ROOM;

    fn me() -> Handle {
        Handle::normalize("@a").unwrap()
    }

    #[test]
    fn compose_rejects_blank_text() {
        let state = SessionState::new(DEFAULT_ROOM, None);
        assert!(compose(&state, &me(), "", None).is_none());
        assert!(compose(&state, &me(), "  \n\t", None).is_none());
    }

    #[test]
    fn compose_destinations() {
        let mut state = SessionState::new(DEFAULT_ROOM, None);
        let env = compose(&state, &me(), "hi", None).unwrap();
        assert_eq!(env.destination.to_string(), "#bitchat");
        assert_eq!(env.sender, "@a");

        let env = compose(&state, &me(), "hi", Some("#side")).unwrap();
        assert_eq!(env.destination.to_string(), "#side");

        start_direct(&mut state, "b");
        let env = compose(&state, &me(), "hi", Some("side")).unwrap();
        assert_eq!(env.destination.to_string(), "@b");
    }

    #[test]
    fn set_room_clears_direct_target() {
        let mut state = SessionState::new(DEFAULT_ROOM, None);
        start_direct(&mut state, "@b");
        assert!(set_room(&mut state, "  general "));
        assert!(state.active_dm.is_none());
        let env = compose(&state, &me(), "hi", None).unwrap();
        assert_eq!(env.destination.to_string(), "#general");
        assert_eq!(state.messages().last().unwrap().text, "switched to #general");
    }

    #[test]
    fn set_room_ignores_empty_name() {
        let mut state = SessionState::new(DEFAULT_ROOM, None);
        assert!(!set_room(&mut state, "   "));
        assert_eq!(state.current_room, DEFAULT_ROOM);
        assert!(state.messages().is_empty());
    }

    #[test]
    fn end_direct_without_target_is_noop() {
        let mut state = SessionState::new(DEFAULT_ROOM, None);
        assert!(!end_direct(&mut state));
        assert!(state.messages().is_empty());
        start_direct(&mut state, "@b");
        assert!(end_direct(&mut state));
        assert_eq!(state.messages().last().unwrap().text, "back to #bitchat");
    }

    #[test]
    fn recipients_for_room_and_direct() {
        let mut dir = PeerDirectory::new(PeerId::random());
        let mut ids = Vec::new();
        for name in ["@b", "@c", "@d"] {
            let id = PeerId::random();
            dir.on_discovered(id, Handle::normalize(name).unwrap());
            dir.on_connection_state_changed(id, ConnectionState::Connected);
            ids.push(id);
        }
        let room = Envelope::new("@a", Destination::room("bitchat"), "x");
        assert_eq!(recipients_for(&room, &dir).len(), 3);

        let dm = Envelope::new("@a", Destination::Direct(Handle::normalize("@c").unwrap()), "x");
        assert_eq!(recipients_for(&dm, &dir), vec![ids[1]]);

        let unknown = Envelope::new("@a", Destination::Direct(Handle::normalize("@zz").unwrap()), "x");
        assert!(recipients_for(&unknown, &dir).is_empty());
    }
}
