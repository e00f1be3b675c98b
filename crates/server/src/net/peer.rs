//! Per-connection protocol state: the reliable stream, round-trip and loss
//! estimates, throttling and timeouts.

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use tokio::time::Instant;

use super::address::Address;
use super::protocol::{self, FrameKind};

/// Full-speed throttle value.
pub const THROTTLE_SCALE: u32 = 32;
const THROTTLE_COUNTER: u32 = 7;

const INITIAL_RTT: Duration = Duration::from_millis(100);
const INITIAL_RTT_VARIANCE: Duration = Duration::from_millis(50);
const MIN_RTO: Duration = Duration::from_millis(50);

/// Reliable frames allowed in flight before further ones wait in the queue.
const RELIABLE_WINDOW: usize = 512;
/// How far ahead of the next expected sequence number frames are buffered.
const REORDER_WINDOW: u32 = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Role {
    /// We sent the CONNECT.
    Initiator,
    /// The remote sent the CONNECT.
    Acceptor,
}

/// Tunables for one peer. See [`Peer::set_timeout`] and [`Peer::set_throttle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerConfig {
    pub ping_interval: Duration,
    pub timeout_limit: u32,
    pub timeout_minimum: Duration,
    pub timeout_maximum: Duration,
    pub throttle_interval: Duration,
    pub throttle_acceleration: u32,
    pub throttle_deceleration: u32,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_millis(500),
            timeout_limit: 32,
            timeout_minimum: Duration::from_secs(5),
            timeout_maximum: Duration::from_secs(30),
            throttle_interval: Duration::from_secs(5),
            throttle_acceleration: 2,
            throttle_deceleration: 2,
        }
    }
}

struct Queued {
    kind: FrameKind,
    seq: u32,
    payload: Vec<u8>,
}

struct InFlight {
    kind: FrameKind,
    datagram: Vec<u8>,
    first_sent: Instant,
    last_sent: Instant,
    retries: u32,
    rto: Duration,
}

pub(crate) enum ServiceOutcome {
    Alive(Vec<Vec<u8>>),
    TimedOut,
}

/// One live connection.
pub struct Peer {
    address: Address,
    state: PeerState,
    role: Role,
    config: PeerConfig,
    verify_queued: bool,

    queue: VecDeque<Queued>,
    pending_acks: Vec<u32>,
    next_seq: u32,
    next_unreliable_seq: u32,
    in_flight: BTreeMap<u32, InFlight>,

    next_expected: u32,
    reorder: BTreeMap<u32, (FrameKind, Vec<u8>)>,

    round_trip_time: Duration,
    rtt_variance: Duration,
    has_rtt_sample: bool,
    last_round_trip_time: Duration,
    last_rtt_variance: Duration,

    throttle: u32,
    throttle_counter: u32,
    epoch_start: Instant,
    epoch_sent: u32,
    epoch_lost: u32,
    packet_loss: f32,

    last_receive: Instant,
    last_send: Instant,
}

impl Peer {
    pub(crate) fn new(address: Address, role: Role, config: PeerConfig, now: Instant) -> Self {
        Self {
            address,
            state: PeerState::Connecting,
            role,
            config,
            verify_queued: false,
            queue: VecDeque::new(),
            pending_acks: Vec::new(),
            next_seq: 0,
            next_unreliable_seq: 0,
            in_flight: BTreeMap::new(),
            next_expected: 0,
            reorder: BTreeMap::new(),
            round_trip_time: INITIAL_RTT,
            rtt_variance: INITIAL_RTT_VARIANCE,
            has_rtt_sample: false,
            last_round_trip_time: INITIAL_RTT,
            last_rtt_variance: Duration::ZERO,
            throttle: THROTTLE_SCALE,
            throttle_counter: 0,
            epoch_start: now,
            epoch_sent: 0,
            epoch_lost: 0,
            packet_loss: 0.0,
            last_receive: now,
            last_send: now,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn state(&self) -> PeerState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == PeerState::Connected
    }

    pub fn config(&self) -> &PeerConfig {
        &self.config
    }

    /// Smoothed round-trip time.
    pub fn round_trip_time(&self) -> Duration {
        self.round_trip_time
    }

    pub fn round_trip_time_variance(&self) -> Duration {
        self.rtt_variance
    }

    /// Smoothed fraction of reliable frames that needed retransmission.
    pub fn packet_loss(&self) -> f32 {
        self.packet_loss
    }

    /// Current throttle in `0..=THROTTLE_SCALE`; unreliable traffic is thinned
    /// in proportion to `THROTTLE_SCALE - throttle`.
    pub fn throttle(&self) -> u32 {
        self.throttle
    }

    pub fn last_receive(&self) -> Instant {
        self.last_receive
    }

    /// Reliable frames sent but not yet acknowledged.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn set_timeout(&mut self, limit: u32, minimum: Duration, maximum: Duration) {
        self.config.timeout_limit = limit;
        self.config.timeout_minimum = minimum;
        self.config.timeout_maximum = maximum;
    }

    pub fn set_throttle(&mut self, interval: Duration, acceleration: u32, deceleration: u32) {
        self.config.throttle_interval = interval;
        self.config.throttle_acceleration = acceleration;
        self.config.throttle_deceleration = deceleration;
    }

    pub fn set_ping_interval(&mut self, interval: Duration) {
        self.config.ping_interval = interval;
    }

    /// Queue a keep-alive; its acknowledgement refreshes the RTT estimate.
    pub fn ping(&mut self) {
        if self.state == PeerState::Connected {
            self.queue_sequenced(FrameKind::Ping, Vec::new());
        }
    }

    pub(crate) fn role(&self) -> Role {
        self.role
    }

    pub(crate) fn set_state(&mut self, state: PeerState) {
        self.state = state;
    }

    /// Whether the owner has been told about this peer through a connect
    /// event, or is waiting on its own connection attempt.
    pub(crate) fn announced(&self) -> bool {
        !(self.role == Role::Acceptor && self.state == PeerState::Connecting)
    }

    /// Queue VERIFY once, in reply to the remote's CONNECT.
    pub(crate) fn queue_verify(&mut self) {
        if !self.verify_queued {
            self.verify_queued = true;
            self.queue_sequenced(FrameKind::Verify, Vec::new());
        }
    }

    pub(crate) fn queue_sequenced(&mut self, kind: FrameKind, payload: Vec<u8>) -> u32 {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        self.queue.push_back(Queued { kind, seq, payload });
        seq
    }

    pub(crate) fn queue_unreliable(&mut self, payload: Vec<u8>) {
        let seq = self.next_unreliable_seq;
        self.next_unreliable_seq = self.next_unreliable_seq.wrapping_add(1);
        self.queue.push_back(Queued {
            kind: FrameKind::Unreliable,
            seq,
            payload,
        });
    }

    /// A DISCONNECT for [`Host::disconnect_now`](super::Host::disconnect_now),
    /// sent once and never retransmitted.
    pub(crate) fn disconnect_datagram(&self) -> Vec<u8> {
        protocol::encode(FrameKind::Disconnect, self.next_seq, &[])
    }

    pub(crate) fn touch(&mut self, now: Instant) {
        self.last_receive = now;
    }

    /// Drain queued frames into datagrams: acknowledgements first, then the
    /// queue in order until the reliable window is full.
    pub(crate) fn flush(&mut self, now: Instant) -> Vec<Vec<u8>> {
        let mut out: Vec<Vec<u8>> = self
            .pending_acks
            .drain(..)
            .map(|seq| protocol::encode(FrameKind::Ack, seq, &[]))
            .collect();

        while let Some(front) = self.queue.front() {
            if front.kind.is_sequenced() && self.in_flight.len() >= RELIABLE_WINDOW {
                break;
            }
            let Some(frame) = self.queue.pop_front() else {
                break;
            };
            let datagram = protocol::encode(frame.kind, frame.seq, &frame.payload);
            if frame.kind.is_sequenced() {
                self.in_flight.insert(
                    frame.seq,
                    InFlight {
                        kind: frame.kind,
                        datagram: datagram.clone(),
                        first_sent: now,
                        last_sent: now,
                        retries: 0,
                        rto: self.base_rto(),
                    },
                );
                self.epoch_sent += 1;
            } else {
                self.throttle_counter = (self.throttle_counter + THROTTLE_COUNTER) % THROTTLE_SCALE;
                if self.throttle_counter > self.throttle {
                    tracing::trace!("Throttled unreliable frame to {}", self.address);
                    continue;
                }
            }
            out.push(datagram);
        }

        if !out.is_empty() {
            self.last_send = now;
        }
        out
    }

    /// Retransmit overdue frames, detect timeouts, schedule keep-alives and
    /// roll the throttle epoch.
    pub(crate) fn service(&mut self, now: Instant) -> ServiceOutcome {
        if now.duration_since(self.epoch_start) >= self.config.throttle_interval {
            self.end_epoch(now);
        }

        let earliest = self.in_flight.values().map(|f| f.first_sent).min();
        let mut resend = Vec::new();
        if let Some(earliest) = earliest {
            let outstanding = now.duration_since(earliest);
            let cap = self.config.timeout_maximum;
            for frame in self.in_flight.values_mut() {
                if frame.last_sent + frame.rto > now {
                    continue;
                }
                let exhausted =
                    1u64 << frame.retries.min(63) >= u64::from(self.config.timeout_limit);
                if outstanding >= self.config.timeout_maximum
                    || (exhausted && outstanding >= self.config.timeout_minimum)
                {
                    return ServiceOutcome::TimedOut;
                }
                frame.retries += 1;
                frame.rto = (frame.rto * 2).min(cap);
                frame.last_sent = now;
                self.epoch_lost += 1;
                resend.push(frame.datagram.clone());
            }
        }
        if !resend.is_empty() {
            self.last_send = now;
        }

        if self.state == PeerState::Connected
            && self.in_flight.is_empty()
            && !self.queue.iter().any(|f| f.kind.is_sequenced())
            && now.duration_since(self.last_receive) >= self.config.ping_interval
        {
            self.queue_sequenced(FrameKind::Ping, Vec::new());
        }

        ServiceOutcome::Alive(resend)
    }

    /// Earliest instant at which [`Peer::service`] has work to do.
    pub(crate) fn next_wake(&self) -> Option<Instant> {
        let retransmit = self.in_flight.values().map(|f| f.last_sent + f.rto).min();
        let ping = (self.state == PeerState::Connected && self.in_flight.is_empty())
            .then(|| self.last_receive + self.config.ping_interval);
        match (retransmit, ping) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Handle an ACK. Returns the kind of the acknowledged frame, or `None`
    /// for a stale or duplicate acknowledgement.
    pub(crate) fn on_ack(&mut self, seq: u32, now: Instant) -> Option<FrameKind> {
        let frame = self.in_flight.remove(&seq)?;
        // Retransmitted frames give ambiguous samples.
        if frame.retries == 0 {
            let sample = now.duration_since(frame.last_sent);
            self.update_round_trip(sample);
            self.adjust_throttle(sample);
        }
        Some(frame.kind)
    }

    /// Accept a sequenced frame. Returns every frame now deliverable in order.
    pub(crate) fn receive_sequenced(
        &mut self,
        seq: u32,
        kind: FrameKind,
        payload: &[u8],
    ) -> Vec<(FrameKind, Vec<u8>)> {
        self.pending_acks.push(seq);

        let distance = seq.wrapping_sub(self.next_expected);
        if distance == 0 {
            let mut ready = vec![(kind, payload.to_vec())];
            self.next_expected = self.next_expected.wrapping_add(1);
            while let Some(next) = self.reorder.remove(&self.next_expected) {
                ready.push(next);
                self.next_expected = self.next_expected.wrapping_add(1);
            }
            ready
        } else if distance < REORDER_WINDOW {
            self.reorder
                .entry(seq)
                .or_insert_with(|| (kind, payload.to_vec()));
            Vec::new()
        } else {
            // Behind the window: a duplicate of something already delivered.
            Vec::new()
        }
    }

    fn base_rto(&self) -> Duration {
        (self.round_trip_time + self.rtt_variance * 4)
            .max(MIN_RTO)
            .min(self.config.timeout_maximum)
    }

    fn update_round_trip(&mut self, sample: Duration) {
        if self.has_rtt_sample {
            let deviation = self.round_trip_time.abs_diff(sample);
            self.rtt_variance = self.rtt_variance * 3 / 4 + deviation / 4;
            self.round_trip_time = self.round_trip_time * 7 / 8 + sample / 8;
        } else {
            self.has_rtt_sample = true;
            self.round_trip_time = sample;
            self.rtt_variance = sample / 2;
        }
    }

    fn adjust_throttle(&mut self, sample: Duration) {
        if self.last_round_trip_time <= self.last_rtt_variance {
            self.throttle = THROTTLE_SCALE;
        } else if sample < self.last_round_trip_time {
            self.throttle = (self.throttle + self.config.throttle_acceleration).min(THROTTLE_SCALE);
        } else if sample > self.last_round_trip_time + self.last_rtt_variance * 2 {
            self.throttle = self.throttle.saturating_sub(self.config.throttle_deceleration);
        }
    }

    fn end_epoch(&mut self, now: Instant) {
        self.last_round_trip_time = self.round_trip_time;
        self.last_rtt_variance = self.rtt_variance;
        if self.epoch_sent > 0 {
            let sample = (self.epoch_lost as f32 / self.epoch_sent as f32).min(1.0);
            self.packet_loss = self.packet_loss * 7.0 / 8.0 + sample / 8.0;
        }
        self.epoch_sent = 0;
        self.epoch_lost = 0;
        self.epoch_start = now;
    }
}
