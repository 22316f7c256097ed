//! Local transport: TCP server (inbound invitations), TCP client (outbound to discovered peers),
//! hello exchange and chat frames.
//!
//! Only the side with the lower peer ID dials; the other side waits for the invitation.
//! This keeps a single link per pair of peers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use blu_core::wire::{decode_frame, encode_frame, frame_len, LEN_SIZE};
use blu_core::{ConnectionState, Message, PeerId, TransportEvent, PROTOCOL_VERSION};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, watch, Mutex};

use crate::discovery::{self, Advert, PeerTable};
use crate::host::HostEvent;

type Links = Arc<Mutex<HashMap<PeerId, mpsc::UnboundedSender<Vec<u8>>>>>;
type Pending = Arc<Mutex<HashMap<PeerId, oneshot::Sender<bool>>>>;

#[derive(Clone)]
pub struct Transport {
    advert: watch::Receiver<Advert>,
    peers: PeerTable,
    links: Links,
    pending: Pending,
    /// Bumped by `disconnect_all`; every link belongs to one epoch and closes when it changes.
    epoch: Arc<watch::Sender<u64>>,
    events: mpsc::UnboundedSender<HostEvent>,
    handshake_timeout: Duration,
}

impl Transport {
    pub fn new(
        advert: watch::Receiver<Advert>,
        peers: PeerTable,
        events: mpsc::UnboundedSender<HostEvent>,
        handshake_timeout: Duration,
    ) -> Self {
        let (epoch, _) = watch::channel(0u64);
        Self {
            advert,
            peers,
            links: Arc::new(Mutex::new(HashMap::new())),
            pending: Arc::new(Mutex::new(HashMap::new())),
            epoch: Arc::new(epoch),
            events,
            handshake_timeout,
        }
    }

    fn emit(&self, event: TransportEvent) {
        let _ = self.events.send(HostEvent::Transport(event));
    }

    fn hello(&self) -> Message {
        let advert = self.advert.borrow();
        Message::Hello {
            protocol_version: PROTOCOL_VERSION,
            peer_id: advert.peer_id,
            handle: advert.handle.clone(),
        }
    }

    /// Accept inbound connections until the listener fails.
    pub async fn listen(self, port: u16) -> std::io::Result<()> {
        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        tracing::info!(port, "transport listening");
        loop {
            let (stream, from) = listener.accept().await?;
            let this = self.clone();
            tokio::spawn(async move {
                if let Err(e) = this.accept(stream).await {
                    tracing::debug!(%from, error = %e, "inbound connection failed");
                }
            });
        }
    }

    async fn accept(self, mut stream: TcpStream) -> std::io::Result<()> {
        let epoch = *self.epoch.borrow();
        let (peer_id, handle) = self.read_hello(&mut stream).await?;
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(peer_id, tx);
        self.emit(TransportEvent::Invitation { peer_id, handle });
        let accepted = matches!(
            tokio::time::timeout(self.handshake_timeout, rx).await,
            Ok(Ok(true))
        );
        self.pending.lock().await.remove(&peer_id);
        if !accepted {
            tracing::debug!(peer = %peer_id, "invitation not accepted");
            return Ok(());
        }
        write_message(&mut stream, &self.hello()).await?;
        self.run_link(stream, peer_id, epoch).await;
        Ok(())
    }

    /// Session's answer to an invitation.
    pub async fn respond(&self, peer_id: PeerId, accept: bool) {
        if let Some(tx) = self.pending.lock().await.remove(&peer_id) {
            let _ = tx.send(accept);
        }
    }

    /// Dial a discovered peer in the background. A peer that already has a live link is
    /// reported connected again, since the session may have dropped it on a discovery timeout.
    pub async fn connect(&self, peer_id: PeerId) {
        if self.links.lock().await.contains_key(&peer_id) {
            tracing::debug!(peer = %peer_id, "link still up");
            self.emit(TransportEvent::StateChanged {
                peer_id,
                state: ConnectionState::Connected,
            });
            return;
        }
        let local = self.advert.borrow().peer_id;
        if local > peer_id {
            tracing::trace!(peer = %peer_id, "waiting for peer to dial");
            return;
        }
        let this = self.clone();
        tokio::spawn(async move {
            if this.links.lock().await.contains_key(&peer_id) {
                return;
            }
            let epoch = *this.epoch.borrow();
            this.emit(TransportEvent::StateChanged {
                peer_id,
                state: ConnectionState::Connecting,
            });
            match this.dial(peer_id).await {
                Ok(stream) => this.run_link(stream, peer_id, epoch).await,
                Err(e) => {
                    tracing::debug!(peer = %peer_id, error = %e, "connect failed");
                    discovery::forget(&this.peers, &peer_id).await;
                    this.emit(TransportEvent::StateChanged {
                        peer_id,
                        state: ConnectionState::NotConnected,
                    });
                }
            }
        });
    }

    async fn dial(&self, peer_id: PeerId) -> std::io::Result<TcpStream> {
        let addr = discovery::peer_addr(&self.peers, &peer_id)
            .await
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "unknown peer address"))?;
        let mut stream = tokio::time::timeout(self.handshake_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out"))??;
        write_message(&mut stream, &self.hello()).await?;
        let (remote, _) = self.read_hello(&mut stream).await?;
        if remote != peer_id {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "peer answered with a different identity",
            ));
        }
        Ok(stream)
    }

    async fn read_hello(&self, stream: &mut TcpStream) -> std::io::Result<(PeerId, String)> {
        let msg = tokio::time::timeout(self.handshake_timeout, read_message(stream))
            .await
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "hello timed out"))??;
        match msg {
            Message::Hello {
                protocol_version,
                peer_id,
                handle,
            } if protocol_version == PROTOCOL_VERSION => Ok((peer_id, handle)),
            _ => Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "expected hello",
            )),
        }
    }

    async fn run_link(&self, stream: TcpStream, peer_id: PeerId, epoch: u64) {
        let mut epoch_rx = self.epoch.subscribe();
        if *epoch_rx.borrow_and_update() != epoch {
            return;
        }
        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
        {
            let mut links = self.links.lock().await;
            if links.contains_key(&peer_id) {
                tracing::debug!(peer = %peer_id, "duplicate link dropped");
                return;
            }
            links.insert(peer_id, tx.clone());
        }
        self.emit(TransportEvent::StateChanged {
            peer_id,
            state: ConnectionState::Connected,
        });

        let (mut reader, mut writer) = stream.into_split();
        tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if writer.write_all(&frame).await.is_err() {
                    break;
                }
            }
            let _ = writer.shutdown().await;
        });

        loop {
            tokio::select! {
                msg = read_message(&mut reader) => match msg {
                    Ok(Message::Chat { payload }) => self.emit(TransportEvent::DataReceived {
                        peer_id,
                        bytes: payload,
                    }),
                    Ok(Message::Leave { .. }) => break,
                    Ok(_) => {}
                    Err(e) => {
                        tracing::debug!(peer = %peer_id, error = %e, "link closed");
                        break;
                    }
                },
                _ = epoch_rx.changed() => break,
            }
        }

        {
            let mut links = self.links.lock().await;
            if links.get(&peer_id).is_some_and(|l| l.same_channel(&tx)) {
                links.remove(&peer_id);
            }
        }
        discovery::forget(&self.peers, &peer_id).await;
        self.emit(TransportEvent::StateChanged {
            peer_id,
            state: ConnectionState::NotConnected,
        });
    }

    /// Queue `payload` as a chat frame to each peer. Failures are logged and otherwise ignored.
    pub async fn send(&self, to: &[PeerId], payload: Vec<u8>) {
        let frame = match encode_frame(&Message::Chat { payload }) {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!(error = %e, "could not frame chat payload");
                return;
            }
        };
        let links = self.links.lock().await;
        for peer in to {
            match links.get(peer) {
                Some(tx) if tx.send(frame.clone()).is_ok() => {}
                _ => tracing::debug!(peer = %peer, "send failed, no live link"),
            }
        }
    }

    /// Say goodbye on every link and close them all.
    pub async fn disconnect_all(&self) {
        let peer_id = self.advert.borrow().peer_id;
        let leave = encode_frame(&Message::Leave { peer_id }).ok();
        let drained: Vec<_> = self.links.lock().await.drain().collect();
        for (_, tx) in &drained {
            if let Some(frame) = &leave {
                let _ = tx.send(frame.clone());
            }
        }
        self.epoch.send_modify(|e| *e += 1);
        tracing::debug!(links = drained.len(), "disconnected all links");
    }
}

/// Read one length-prefixed frame.
pub async fn read_message<R: AsyncRead + Unpin>(r: &mut R) -> std::io::Result<Message> {
    let mut buf = vec![0u8; LEN_SIZE];
    r.read_exact(&mut buf).await?;
    let len = frame_len(&buf)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    buf.resize(LEN_SIZE + len, 0);
    r.read_exact(&mut buf[LEN_SIZE..]).await?;
    let (msg, _) =
        decode_frame(&buf).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    Ok(msg)
}

pub async fn write_message<W: AsyncWrite + Unpin>(w: &mut W, msg: &Message) -> std::io::Result<()> {
    let frame =
        encode_frame(msg).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    w.write_all(&frame).await?;
    w.flush().await
}
