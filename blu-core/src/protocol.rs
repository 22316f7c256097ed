//! LAN link protocol between hosts: discovery beacons, connection hello, chat payloads.

use serde::{Deserialize, Serialize};

use crate::identity::PeerId;

/// Current link protocol version. Carried in beacons and hello.
pub const PROTOCOL_VERSION: u8 = 1;

/// Link messages. Encoding is bincode; framing is length-prefix (see wire module).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    /// Multicast presence announcement.
    Beacon {
        protocol_version: u8,
        peer_id: PeerId,
        handle: String,
        listen_port: u16,
    },
    /// Unicast reply to a beacon so the sender learns about us without waiting a full interval.
    DiscoveryResponse {
        protocol_version: u8,
        peer_id: PeerId,
        handle: String,
        listen_port: u16,
    },
    /// First frame on every TCP connection, in both directions.
    Hello {
        protocol_version: u8,
        peer_id: PeerId,
        handle: String,
    },
    /// Opaque chat payload (JSON envelope bytes).
    Chat { payload: Vec<u8> },
    /// Graceful departure (stop or identity rotation).
    Leave { peer_id: PeerId },
}

impl Message {
    /// Peer announced by a discovery message, with its handle and transport port.
    pub fn announced_peer(&self) -> Option<(PeerId, &str, u16)> {
        match self {
            Message::Beacon {
                protocol_version,
                peer_id,
                handle,
                listen_port,
            }
            | Message::DiscoveryResponse {
                protocol_version,
                peer_id,
                handle,
                listen_port,
            } if *protocol_version == PROTOCOL_VERSION => {
                Some((*peer_id, handle.as_str(), *listen_port))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn announced_peer_checks_version() {
        let id = PeerId::random();
        let beacon = Message::Beacon {
            protocol_version: PROTOCOL_VERSION,
            peer_id: id,
            handle: "@b".into(),
            listen_port: 45679,
        };
        assert_eq!(beacon.announced_peer(), Some((id, "@b", 45679)));

        let old = Message::DiscoveryResponse {
            protocol_version: PROTOCOL_VERSION + 1,
            peer_id: id,
            handle: "@b".into(),
            listen_port: 45679,
        };
        assert!(old.announced_peer().is_none());
        assert!(Message::Leave { peer_id: id }.announced_peer().is_none());
    }
}
