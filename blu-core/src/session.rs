//! Session state observed by the presentation layer: room, direct target, delivered messages.

use crate::envelope::{DisplayedMessage, Envelope};
use crate::identity::Handle;
use crate::relay::{self, SeenIds};

/// Room joined when nothing else is configured.
pub const DEFAULT_ROOM: &str = "bitchat";

pub struct SessionState {
    pub current_room: String,
    pub active_dm: Option<Handle>,
    pub(crate) seen: SeenIds,
    messages: Vec<DisplayedMessage>,
}

impl SessionState {
    pub fn new(room: &str, seen_capacity: Option<usize>) -> Self {
        Self {
            current_room: room.to_string(),
            active_dm: None,
            seen: SeenIds::new(seen_capacity),
            messages: Vec::new(),
        }
    }

    pub fn messages(&self) -> &[DisplayedMessage] {
        &self.messages
    }

    pub(crate) fn push_message(&mut self, msg: DisplayedMessage) {
        self.messages.push(msg);
    }

    /// Deliver a synthetic `system` envelope. Never transmitted.
    pub fn post_system_notice(&mut self, text: &str) {
        tracing::debug!(notice = text, "system notice");
        relay::deliver(self, &Envelope::system(text));
    }
}

/// Read-only snapshot for the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionView {
    pub handle: String,
    pub room: String,
    pub active_dm: Option<String>,
    pub peer_count: usize,
    pub peer_handles: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notices_are_delivered_once_each() {
        let mut state = SessionState::new(DEFAULT_ROOM, None);
        state.post_system_notice("hello");
        state.post_system_notice("hello");
        assert_eq!(state.messages().len(), 2);
        assert!(state.messages().iter().all(|m| m.sender == "system"));
        assert_ne!(state.messages()[0].id, state.messages()[1].id);
    }
}
