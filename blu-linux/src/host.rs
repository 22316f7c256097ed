//! Single dispatcher: owns the session, applies events one at a time, executes returned actions.

use blu_core::{MeshSession, OutboundAction, Reliability, TransportEvent};
use tokio::sync::{mpsc, watch};

use crate::discovery::Advert;
use crate::transport::Transport;
use crate::ui::{self, Command};

/// Everything that can mutate the session, funneled through one channel.
#[derive(Debug)]
pub enum HostEvent {
    Transport(TransportEvent),
    Input(String),
    Shutdown,
}

/// Executes core actions against the LAN transport and discovery.
pub struct Host {
    advert: watch::Sender<Advert>,
    transport: Transport,
}

impl Host {
    pub fn new(advert: watch::Sender<Advert>, transport: Transport) -> Self {
        Self { advert, transport }
    }

    pub async fn execute(&self, actions: Vec<OutboundAction>) {
        for action in actions {
            match action {
                OutboundAction::StartDiscovery => self.advert.send_modify(|a| a.advertising = true),
                OutboundAction::StopDiscovery => self.advert.send_modify(|a| a.advertising = false),
                OutboundAction::DisconnectAll => self.transport.disconnect_all().await,
                OutboundAction::Connect(peer_id) => self.transport.connect(peer_id).await,
                OutboundAction::Send {
                    to,
                    payload,
                    reliability: Reliability::Reliable,
                } => self.transport.send(&to, payload).await,
                OutboundAction::RespondInvitation { peer_id, accept } => {
                    self.transport.respond(peer_id, accept).await
                }
                OutboundAction::Reidentify { peer_id, handle } => {
                    tracing::info!(peer = %peer_id, %handle, "transport identity rebuilt");
                    self.advert.send_modify(|a| {
                        a.peer_id = peer_id;
                        a.handle = handle;
                    });
                }
            }
        }
    }
}

/// Run the session until shutdown or until every event source is gone.
pub async fn run_session(
    mut session: MeshSession,
    host: Host,
    mut events: mpsc::UnboundedReceiver<HostEvent>,
) {
    let mut printed = 0usize;
    host.execute(session.start()).await;
    ui::print_new(&session, &mut printed);

    while let Some(event) = events.recv().await {
        let actions = match event {
            HostEvent::Transport(e) => session.on_event(e),
            HostEvent::Input(line) => match ui::parse(&line) {
                Command::Say(text) => session.send_text(&text, None),
                Command::Nick(h) => session.rotate(&h),
                Command::Join(room) => {
                    session.set_room(&room);
                    Vec::new()
                }
                Command::Direct(h) => {
                    session.start_direct(&h);
                    Vec::new()
                }
                Command::EndDirect => {
                    session.end_direct();
                    Vec::new()
                }
                Command::Peers => {
                    ui::print_view(&session.view());
                    Vec::new()
                }
                Command::Help => {
                    ui::print_help();
                    Vec::new()
                }
                Command::Quit => break,
                Command::Unknown(cmd) => {
                    tracing::debug!(%cmd, "unknown command");
                    ui::print_help();
                    Vec::new()
                }
            },
            HostEvent::Shutdown => break,
        };
        host.execute(actions).await;
        ui::print_new(&session, &mut printed);
    }

    host.execute(session.stop()).await;
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use blu_core::{ConnectionState, MemoryStore, PeerId, SessionConfig};

    use super::*;
    use crate::discovery;

    fn host_with_advert(session: &MeshSession) -> (Host, watch::Receiver<Advert>) {
        let local = session.local_identity();
        let (advert_tx, advert_rx) = watch::channel(Advert {
            peer_id: local.peer_id,
            handle: local.handle.to_string(),
            advertising: false,
        });
        let (events, _) = mpsc::unbounded_channel();
        let transport = Transport::new(
            advert_rx.clone(),
            discovery::new_peer_table(),
            events,
            Duration::from_secs(1),
        );
        (Host::new(advert_tx, transport), advert_rx)
    }

    fn session() -> MeshSession {
        MeshSession::new(Box::new(MemoryStore::with_handle("@a")), SessionConfig::default())
    }

    #[tokio::test]
    async fn start_and_stop_toggle_advertising() {
        let mut session = session();
        let (host, advert) = host_with_advert(&session);
        host.execute(session.start()).await;
        assert!(advert.borrow().advertising);
        host.execute(session.stop()).await;
        assert!(!advert.borrow().advertising);
    }

    #[tokio::test]
    async fn rotation_replaces_advertised_identity() {
        let mut session = session();
        let (host, advert) = host_with_advert(&session);
        let old = advert.borrow().peer_id;
        host.execute(session.start()).await;
        host.execute(session.rotate("x")).await;
        let current = advert.borrow().clone();
        assert_ne!(current.peer_id, old);
        assert_eq!(current.peer_id, session.local_identity().peer_id);
        assert_eq!(current.handle, "@x");
        assert!(current.advertising);
    }

    #[tokio::test]
    async fn nick_is_queued_behind_transport_events() {
        let session = session();
        let old = session.local_identity().peer_id;
        let (host, advert) = host_with_advert(&session);
        let (tx, rx) = mpsc::unbounded_channel();
        let peer = PeerId::random();
        tx.send(HostEvent::Transport(TransportEvent::StateChanged {
            peer_id: peer,
            state: ConnectionState::Connected,
        }))
        .unwrap();
        tx.send(HostEvent::Input("/nick x".into())).unwrap();
        tx.send(HostEvent::Input("/quit".into())).unwrap();
        tx.send(HostEvent::Input("/nick never".into())).unwrap();

        run_session(session, host, rx).await;

        let last = advert.borrow().clone();
        assert_ne!(last.peer_id, old);
        assert_eq!(last.handle, "@x");
        assert!(!last.advertising);
    }
}
