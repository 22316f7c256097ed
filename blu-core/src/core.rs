//! Host-driven API: MeshSession receives transport events and UI calls, returns actions.

use crate::directory::{ConnectionState, PeerDirectory, Transition};
use crate::envelope::DisplayedMessage;
use crate::identity::{Handle, HandleStore, IdentityManager, LocalIdentity, PeerId};
use crate::relay;
use crate::router;
use crate::session::{SessionState, SessionView, DEFAULT_ROOM};

/// Session tunables.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Room joined at startup.
    pub room: String,
    /// Accept every inbound connection invitation. When false, invitations are declined.
    pub auto_accept_invitations: bool,
    /// Bound on remembered envelope ids. `None` keeps every id for the session lifetime.
    pub seen_capacity: Option<usize>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            room: DEFAULT_ROOM.to_string(),
            auto_accept_invitations: true,
            seen_capacity: None,
        }
    }
}

/// Events the transport pushes into the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Discovered { peer_id: PeerId, handle: String },
    Lost { peer_id: PeerId },
    StateChanged { peer_id: PeerId, state: ConnectionState },
    DataReceived { peer_id: PeerId, bytes: Vec<u8> },
    Invitation { peer_id: PeerId, handle: String },
}

/// Delivery guarantee requested for a send. Chat traffic always asks for reliable delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reliability {
    Reliable,
}

/// Action for host to perform. Send failures are the host's to log and swallow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundAction {
    StartDiscovery,
    StopDiscovery,
    DisconnectAll,
    Connect(PeerId),
    Send {
        to: Vec<PeerId>,
        payload: Vec<u8>,
        reliability: Reliability,
    },
    RespondInvitation { peer_id: PeerId, accept: bool },
    /// Tear down the transport identity and rebuild it under the new peer ID and handle.
    Reidentify { peer_id: PeerId, handle: String },
}

/// The mesh messaging session. One per process; every mutation goes through `&mut self`,
/// so the host serializes events simply by owning it from a single task.
pub struct MeshSession {
    identity: IdentityManager,
    directory: PeerDirectory,
    state: SessionState,
    config: SessionConfig,
}

impl MeshSession {
    pub fn new(store: Box<dyn HandleStore>, config: SessionConfig) -> Self {
        let identity = IdentityManager::load(store);
        let directory = PeerDirectory::new(identity.identity().peer_id);
        let room = router::normalize_room(&config.room).unwrap_or_else(|| DEFAULT_ROOM.to_string());
        let state = SessionState::new(&room, config.seen_capacity);
        Self {
            identity,
            directory,
            state,
            config,
        }
    }

    pub fn local_identity(&self) -> &LocalIdentity {
        self.identity.identity()
    }

    pub fn current_handle(&self) -> &Handle {
        self.identity.current_handle()
    }

    pub fn directory(&self) -> &PeerDirectory {
        &self.directory
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn messages(&self) -> &[DisplayedMessage] {
        self.state.messages()
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            handle: self.current_handle().to_string(),
            room: self.state.current_room.clone(),
            active_dm: self.state.active_dm.as_ref().map(|h| h.to_string()),
            peer_count: self.directory.count(),
            peer_handles: self.directory.sorted_handles(),
        }
    }

    /// Begin advertising and browsing.
    pub fn start(&mut self) -> Vec<OutboundAction> {
        tracing::info!(handle = %self.current_handle(), room = %self.state.current_room, "session starting");
        let notice = format!("you joined #{}", self.state.current_room);
        self.state.post_system_notice(&notice);
        vec![OutboundAction::StartDiscovery]
    }

    /// Stop advertising, drop every connection and forget known peers.
    pub fn stop(&mut self) -> Vec<OutboundAction> {
        tracing::info!("session stopping");
        self.directory.clear();
        vec![OutboundAction::StopDiscovery, OutboundAction::DisconnectAll]
    }

    /// Dispatch one transport event. Events are processed to completion, one at a time.
    pub fn on_event(&mut self, event: TransportEvent) -> Vec<OutboundAction> {
        match event {
            TransportEvent::Discovered { peer_id, handle } => self.on_peer_discovered(peer_id, &handle),
            TransportEvent::Lost { peer_id } => {
                let t = self.directory.on_lost(peer_id);
                self.notice_transition(t);
                Vec::new()
            }
            TransportEvent::StateChanged { peer_id, state } => {
                let t = self.directory.on_connection_state_changed(peer_id, state);
                self.notice_transition(t);
                Vec::new()
            }
            TransportEvent::DataReceived { peer_id, bytes } => {
                relay::on_data_received(&mut self.state, &self.directory, peer_id, &bytes)
                    .into_iter()
                    .collect()
            }
            TransportEvent::Invitation { peer_id, handle } => self.on_invitation(peer_id, &handle),
        }
    }

    fn on_peer_discovered(&mut self, peer_id: PeerId, raw_handle: &str) -> Vec<OutboundAction> {
        let Some(handle) = Handle::normalize(raw_handle) else {
            tracing::debug!(peer = %peer_id, "discovered peer without a handle");
            return Vec::new();
        };
        if !self.directory.on_discovered(peer_id, handle) {
            return Vec::new();
        }
        if self.directory.is_connected(&peer_id) {
            return Vec::new();
        }
        vec![OutboundAction::Connect(peer_id)]
    }

    fn on_invitation(&mut self, peer_id: PeerId, raw_handle: &str) -> Vec<OutboundAction> {
        let handle = Handle::normalize(raw_handle);
        let accept = self.config.auto_accept_invitations
            && peer_id != self.directory.local_id()
            && handle.is_some();
        if let (true, Some(handle)) = (accept, handle) {
            self.directory.on_discovered(peer_id, handle);
        } else {
            tracing::debug!(peer = %peer_id, "declining invitation");
        }
        vec![OutboundAction::RespondInvitation { peer_id, accept }]
    }

    fn notice_transition(&mut self, t: Transition) {
        match t {
            Transition::Joined(h) => self.state.post_system_notice(&format!("{} joined", h)),
            Transition::Left(h) => self.state.post_system_notice(&format!("{} left", h)),
            Transition::Unchanged => {}
        }
    }

    /// Compose and send. Local delivery always happens; transmission only when someone can receive it.
    pub fn send_text(&mut self, text: &str, room: Option<&str>) -> Vec<OutboundAction> {
        let Some(env) = router::compose(&self.state, self.identity.current_handle(), text, room) else {
            return Vec::new();
        };
        let payload = match env.encode() {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(error = %e, "could not encode envelope");
                return Vec::new();
            }
        };
        relay::deliver(&mut self.state, &env);
        let to = router::recipients_for(&env, &self.directory);
        if to.is_empty() {
            return Vec::new();
        }
        vec![OutboundAction::Send {
            to,
            payload,
            reliability: Reliability::Reliable,
        }]
    }

    /// Replace the local identity. No-op when `raw` normalizes to nothing or to the current handle.
    pub fn rotate(&mut self, raw: &str) -> Vec<OutboundAction> {
        let Some(handle) = self.identity.rotation_target(raw) else {
            return Vec::new();
        };
        tracing::info!(from = %self.current_handle(), to = %handle, "rotating identity");
        let mut actions = vec![OutboundAction::DisconnectAll, OutboundAction::StopDiscovery];
        self.directory = self.identity.adopt(handle);
        let local = self.identity.identity();
        actions.push(OutboundAction::Reidentify {
            peer_id: local.peer_id,
            handle: local.handle.to_string(),
        });
        actions.push(OutboundAction::StartDiscovery);
        let notice = format!("you are now {}", local.handle);
        self.state.post_system_notice(&notice);
        actions
    }

    pub fn set_room(&mut self, name: &str) -> bool {
        router::set_room(&mut self.state, name)
    }

    pub fn start_direct(&mut self, handle: &str) -> bool {
        router::start_direct(&mut self.state, handle)
    }

    pub fn end_direct(&mut self) -> bool {
        router::end_direct(&mut self.state)
    }

    pub fn post_system_notice(&mut self, text: &str) {
        self.state.post_system_notice(text);
    }
}
