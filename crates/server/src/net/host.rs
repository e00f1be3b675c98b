use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use slotmap::{SlotMap, new_key_type};
use tokio::net::UdpSocket;
use tokio::time::Instant;

use super::address::Address;
use super::packet::{Delivery, Packet};
use super::peer::{Peer, PeerConfig, PeerState, Role, ServiceOutcome};
use super::protocol::{Frame, FrameKind, MAX_DATAGRAM, MAX_PAYLOAD};
use super::socket::Socket;

new_key_type! {
    /// Handle to a peer owned by a [`Host`]. Stale once the peer is gone.
    pub struct PeerId;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostConfig {
    /// Incoming connections accepted at once. Zero refuses all of them.
    pub max_peers: usize,
    /// Settings new peers start with.
    pub peer: PeerConfig,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            max_peers: 32,
            peer: PeerConfig::default(),
        }
    }
}

type ConnectFn = Box<dyn FnMut(PeerId, Address) + Send>;
type DisconnectFn = Box<dyn FnMut(PeerId, Address) + Send>;
type ReceiveFn = Box<dyn FnMut(PeerId, Packet) + Send>;

enum Event {
    Connect(PeerId, Address),
    Disconnect(PeerId, Address),
    Receive(PeerId, Packet),
}

/// Owns a socket and the peers reached through it.
///
/// Nothing happens in the background: [`Host::poll`] receives, acknowledges,
/// retransmits, detects timeouts and then runs the registered callbacks in the
/// caller's task. Callbacks must only enqueue work.
pub struct Host<S: Socket> {
    socket: S,
    config: HostConfig,
    peers: SlotMap<PeerId, Peer>,
    by_addr: HashMap<SocketAddr, PeerId>,
    events: VecDeque<Event>,
    on_connect: Option<ConnectFn>,
    on_disconnect: Option<DisconnectFn>,
    on_receive: Option<ReceiveFn>,
    recv_buf: Vec<u8>,
}

impl Host<UdpSocket> {
    /// Bind a UDP socket at `addr`.
    pub async fn bind(addr: Address, config: HostConfig) -> Result<Self> {
        let socket = UdpSocket::bind(addr.socket_addr())
            .await
            .with_context(|| format!("binding UDP socket on {addr}"))?;
        Ok(Self::new(socket, config))
    }
}

impl<S: Socket> Host<S> {
    pub fn new(socket: S, config: HostConfig) -> Self {
        Self {
            socket,
            config,
            peers: SlotMap::with_key(),
            by_addr: HashMap::new(),
            events: VecDeque::new(),
            on_connect: None,
            on_disconnect: None,
            on_receive: None,
            recv_buf: vec![0; MAX_DATAGRAM],
        }
    }

    pub fn local_addr(&self) -> Result<Address> {
        Ok(self.socket.local_addr().context("querying local address")?.into())
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn on_connect(&mut self, f: impl FnMut(PeerId, Address) + Send + 'static) {
        self.on_connect = Some(Box::new(f));
    }

    pub fn on_disconnect(&mut self, f: impl FnMut(PeerId, Address) + Send + 'static) {
        self.on_disconnect = Some(Box::new(f));
    }

    pub fn on_receive(&mut self, f: impl FnMut(PeerId, Packet) + Send + 'static) {
        self.on_receive = Some(Box::new(f));
    }

    /// Start connecting to `address`. The connect callback fires once the
    /// remote has verified; a failed attempt is reported as a disconnect.
    pub fn connect(&mut self, address: Address) -> PeerId {
        let addr = address.socket_addr();
        if let Some(&id) = self.by_addr.get(&addr) {
            return id;
        }
        let mut peer = Peer::new(address, Role::Initiator, self.config.peer, Instant::now());
        peer.queue_sequenced(FrameKind::Connect, Vec::new());
        let id = self.peers.insert(peer);
        self.by_addr.insert(addr, id);
        tracing::debug!("Connecting to {}", address);
        id
    }

    /// Queue a packet for `peer`. Delivery problems never surface here: a lost
    /// reliable packet ends in a disconnect event, an unreliable one is just
    /// gone. Packets for peers that are not connected are dropped.
    pub fn send(&mut self, peer: PeerId, mut packet: Packet) {
        let Some(target) = self.peers.get_mut(peer) else {
            tracing::debug!("Dropping packet for unknown peer {:?}", peer);
            return;
        };
        if target.state() != PeerState::Connected {
            tracing::debug!(
                "Dropping packet for {} in state {:?}",
                target.address(),
                target.state()
            );
            return;
        }
        if packet.len() > MAX_PAYLOAD {
            tracing::warn!(
                "Dropping {}-byte packet for {}: larger than one datagram",
                packet.len(),
                target.address()
            );
            return;
        }
        packet.mark_sent();
        let delivery = packet.delivery();
        let payload = packet.into_data();
        match delivery {
            Delivery::Reliable => {
                target.queue_sequenced(FrameKind::Reliable, payload);
            }
            Delivery::Unreliable => target.queue_unreliable(payload),
        }
    }

    /// Queue a copy of `packet` for every connected peer.
    pub fn broadcast(&mut self, packet: Packet) {
        let connected: Vec<PeerId> = self
            .peers
            .iter()
            .filter(|(_, p)| p.is_connected())
            .map(|(id, _)| id)
            .collect();
        for id in connected {
            self.send(id, packet.clone());
        }
    }

    /// Graceful disconnect: the DISCONNECT follows everything already queued
    /// and the disconnect callback fires once it is acknowledged.
    pub fn disconnect(&mut self, peer: PeerId) {
        if let Some(target) = self.peers.get_mut(peer) {
            if matches!(target.state(), PeerState::Connected | PeerState::Connecting) {
                target.set_state(PeerState::Disconnecting);
                target.queue_sequenced(FrameKind::Disconnect, Vec::new());
            }
        }
    }

    /// Send a single DISCONNECT and forget the peer without an event.
    pub fn disconnect_now(&mut self, peer: PeerId) {
        if let Some(target) = self.peers.remove(peer) {
            self.by_addr.remove(&target.address().socket_addr());
            self.transmit(target.address(), &target.disconnect_datagram());
            tracing::debug!("Dropped {} immediately", target.address());
        }
    }

    pub fn peer(&self, peer: PeerId) -> Option<&Peer> {
        self.peers.get(peer)
    }

    pub fn peer_mut(&mut self, peer: PeerId) -> Option<&mut Peer> {
        self.peers.get_mut(peer)
    }

    pub fn peers(&self) -> impl Iterator<Item = (PeerId, &Peer)> {
        self.peers.iter()
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn connected_count(&self) -> usize {
        self.peers.values().filter(|p| p.is_connected()).count()
    }

    /// Transmit everything queued on every peer.
    pub fn flush(&mut self) {
        let now = Instant::now();
        let mut outgoing = Vec::new();
        for peer in self.peers.values_mut() {
            let address = peer.address();
            outgoing.extend(peer.flush(now).into_iter().map(|d| (address, d)));
        }
        for (address, datagram) in outgoing {
            self.transmit(address, &datagram);
        }
        self.reap();
    }

    /// Advance the protocol for up to `timeout`, returning as soon as at least
    /// one event is ready. Dispatches every ready event to its callback and
    /// returns how many there were.
    pub async fn poll(&mut self, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        loop {
            self.drain_socket();
            self.service();
            self.flush();
            if !self.events.is_empty() || Instant::now() >= deadline {
                return self.dispatch();
            }

            let wake = self
                .peers
                .values()
                .filter_map(Peer::next_wake)
                .min()
                .map_or(deadline, |t| t.min(deadline));
            let mut buf = self.take_buf();
            let received = tokio::time::timeout_at(wake, self.socket.recv_from(&mut buf)).await;
            match received {
                Ok(Ok((len, from))) => self.handle_datagram(from, &buf[..len]),
                Ok(Err(e)) => tracing::debug!("Socket receive failed: {}", e),
                Err(_) => {}
            }
            self.recv_buf = buf;
        }
    }

    /// Borrow the receive buffer out of `self`. A `poll` cancelled mid-await
    /// never puts it back, so an empty buffer is replaced.
    fn take_buf(&mut self) -> Vec<u8> {
        let buf = std::mem::take(&mut self.recv_buf);
        if buf.is_empty() {
            vec![0; MAX_DATAGRAM]
        } else {
            buf
        }
    }

    fn drain_socket(&mut self) {
        let mut buf = self.take_buf();
        loop {
            match self.socket.try_recv_from(&mut buf) {
                Ok(Some((len, from))) => self.handle_datagram(from, &buf[..len]),
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!("Socket receive failed: {}", e);
                    break;
                }
            }
        }
        self.recv_buf = buf;
    }

    fn transmit(&self, address: Address, datagram: &[u8]) {
        if let Err(e) = self.socket.send_to(datagram, address.socket_addr()) {
            tracing::debug!("Send to {} failed: {}", address, e);
        }
    }

    fn service(&mut self) {
        let now = Instant::now();
        let mut resend = Vec::new();
        let mut timed_out = Vec::new();
        for (id, peer) in self.peers.iter_mut() {
            match peer.service(now) {
                ServiceOutcome::Alive(datagrams) => {
                    resend.extend(datagrams.into_iter().map(|d| (peer.address(), d)));
                }
                ServiceOutcome::TimedOut => timed_out.push(id),
            }
        }
        for (address, datagram) in resend {
            self.transmit(address, &datagram);
        }
        for id in timed_out {
            if let Some(peer) = self.peers.get(id) {
                tracing::info!("Peer {} timed out", peer.address());
            }
            self.close(id);
        }
    }

    fn handle_datagram(&mut self, from: SocketAddr, datagram: &[u8]) {
        let frame = match Frame::decode(datagram) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!("Discarding datagram from {}: {:#}", from, e);
                return;
            }
        };
        let now = Instant::now();

        let id = match self.by_addr.get(&from) {
            Some(&id) => id,
            None if frame.kind == FrameKind::Connect => {
                if self.peers.len() >= self.config.max_peers {
                    tracing::debug!("Refusing connection from {}: host is full", from);
                    return;
                }
                let id = self
                    .peers
                    .insert(Peer::new(from.into(), Role::Acceptor, self.config.peer, now));
                self.by_addr.insert(from, id);
                tracing::debug!("Incoming connection from {}", from);
                id
            }
            None => {
                tracing::trace!("Ignoring {:?} from unknown {}", frame.kind, from);
                return;
            }
        };
        let Some(peer) = self.peers.get_mut(id) else {
            return;
        };
        peer.touch(now);

        match frame.kind {
            FrameKind::Ack => {
                if let Some(kind) = peer.on_ack(frame.seq, now) {
                    self.on_acked(id, kind);
                }
            }
            FrameKind::Unreliable => {
                self.promote(id);
                if self.peers.get(id).is_some_and(Peer::is_connected) {
                    let packet = Packet::unreliable(frame.payload.to_vec());
                    self.events.push_back(Event::Receive(id, packet));
                }
            }
            kind => {
                for (kind, payload) in peer.receive_sequenced(frame.seq, kind, frame.payload) {
                    self.deliver(id, kind, payload);
                }
            }
        }
    }

    fn deliver(&mut self, id: PeerId, kind: FrameKind, payload: Vec<u8>) {
        let Some(peer) = self.peers.get_mut(id) else {
            return;
        };
        match kind {
            FrameKind::Connect => {
                if peer.role() == Role::Acceptor && peer.state() == PeerState::Connecting {
                    peer.queue_verify();
                }
            }
            FrameKind::Verify => {
                if peer.role() == Role::Initiator && peer.state() == PeerState::Connecting {
                    peer.set_state(PeerState::Connected);
                    tracing::debug!("Connected to {}", peer.address());
                    self.events.push_back(Event::Connect(id, peer.address()));
                }
            }
            FrameKind::Reliable => {
                self.promote(id);
                let open = self.peers.get(id).is_some_and(|p| {
                    matches!(p.state(), PeerState::Connected | PeerState::Disconnecting)
                });
                if open {
                    self.events.push_back(Event::Receive(id, Packet::reliable(payload)));
                }
            }
            FrameKind::Disconnect => {
                tracing::debug!("{} disconnected", peer.address());
                self.close(id);
            }
            FrameKind::Ping | FrameKind::Unreliable | FrameKind::Ack => {}
        }
    }

    fn on_acked(&mut self, id: PeerId, kind: FrameKind) {
        match kind {
            FrameKind::Verify => self.promote(id),
            FrameKind::Disconnect => {
                if self
                    .peers
                    .get(id)
                    .is_some_and(|p| p.state() == PeerState::Disconnecting)
                {
                    self.close(id);
                }
            }
            _ => {}
        }
    }

    /// An acceptor becomes connected when its VERIFY is acknowledged or the
    /// initiator's first traffic arrives, whichever is first.
    fn promote(&mut self, id: PeerId) {
        if let Some(peer) = self.peers.get_mut(id) {
            if peer.role() == Role::Acceptor && peer.state() == PeerState::Connecting {
                peer.set_state(PeerState::Connected);
                tracing::debug!("Accepted {}", peer.address());
                self.events.push_back(Event::Connect(id, peer.address()));
            }
        }
    }

    /// Mark a peer disconnected, report it if it was ever announced, and
    /// leave it for [`Host::reap`] so pending acknowledgements still go out.
    fn close(&mut self, id: PeerId) {
        if let Some(peer) = self.peers.get_mut(id) {
            if peer.state() == PeerState::Disconnected {
                return;
            }
            if peer.announced() {
                self.events.push_back(Event::Disconnect(id, peer.address()));
            }
            peer.set_state(PeerState::Disconnected);
        }
    }

    fn reap(&mut self) {
        let by_addr = &mut self.by_addr;
        self.peers.retain(|_, peer| {
            let keep = peer.state() != PeerState::Disconnected;
            if !keep {
                by_addr.remove(&peer.address().socket_addr());
            }
            keep
        });
    }

    fn dispatch(&mut self) -> usize {
        let mut dispatched = 0;
        while let Some(event) = self.events.pop_front() {
            dispatched += 1;
            match event {
                Event::Connect(id, address) => {
                    if let Some(f) = self.on_connect.as_mut() {
                        f(id, address);
                    }
                }
                Event::Disconnect(id, address) => {
                    if let Some(f) = self.on_disconnect.as_mut() {
                        f(id, address);
                    }
                }
                Event::Receive(id, packet) => {
                    if let Some(f) = self.on_receive.as_mut() {
                        f(id, packet);
                    }
                }
            }
        }
        dispatched
    }
}
