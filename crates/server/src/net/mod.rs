//! Connection-oriented datagram transport.
//!
//! A [`Host`] owns a [`Socket`] and any number of [`Peer`]s. Each peer carries
//! one acknowledged, ordered stream for [`Delivery::Reliable`] packets and a
//! fire-and-forget path for [`Delivery::Unreliable`] ones. Lost connections
//! surface as disconnect events from [`Host::poll`], never as send errors.

pub mod address;
pub mod host;
pub mod packet;
pub mod peer;
pub mod protocol;
pub mod sim;
pub mod socket;

pub use address::Address;
pub use host::{Host, HostConfig, PeerId};
pub use packet::{Delivery, Packet};
pub use peer::{Peer, PeerConfig, PeerState};
pub use sim::{SimNetwork, SimSocket};
pub use socket::Socket;
