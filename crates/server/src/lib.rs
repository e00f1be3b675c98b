//! Client/server state synchronization over a reliable UDP transport.
//!
//! - [`net`]: addresses, packets, peers and the polling [`net::Host`].
//! - [`input`]: fixed-rate client input sampling.
//! - [`sync`]: per-tick bundles and the [`sync::SyncLoop`] that applies them.
//! - [`server`] and [`client`]: the two ends wired together.

pub mod actor;
pub mod client;
pub mod commands;
pub mod config;
pub mod content;
pub mod input;
pub mod message;
pub mod net;
pub mod server;
pub mod sync;
pub mod tick;
