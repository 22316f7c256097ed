//! Bluchat mesh session core.
//! Host-driven: no I/O; host passes transport events and UI calls, receives actions.

pub mod core;
pub mod directory;
pub mod envelope;
pub mod identity;
pub mod protocol;
pub mod relay;
pub mod router;
pub mod session;
pub mod wire;

pub use crate::core::{MeshSession, OutboundAction, Reliability, SessionConfig, TransportEvent};
pub use directory::{ConnectionState, Peer, PeerDirectory, PeerState};
pub use envelope::{Destination, DisplayedMessage, Envelope, EnvelopeError};
pub use identity::{Handle, HandleStore, LocalIdentity, MemoryStore, PeerId, StoreError};
pub use protocol::{Message, PROTOCOL_VERSION};
pub use session::SessionView;
pub use wire::{decode_frame, encode_frame, FrameDecodeError, FrameEncodeError};
