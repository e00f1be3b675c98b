//! Server and client settings, read from optional JSON files.
//!
//! Every field has a default, so a config file only needs the values it
//! changes.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;

use crate::input::InputQueueConfig;
use crate::net::{HostConfig, PeerConfig};
use crate::sync::SyncSettings;

/// Transport tunables shared by both ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetConfig {
    pub ping_interval_millis: u64,
    pub timeout_limit: u32,
    pub timeout_minimum_millis: u64,
    pub timeout_maximum_millis: u64,
    pub throttle_interval_millis: u64,
    pub throttle_acceleration: u32,
    pub throttle_deceleration: u32,
}

impl Default for NetConfig {
    fn default() -> Self {
        let peer = PeerConfig::default();
        Self {
            ping_interval_millis: peer.ping_interval.as_millis() as u64,
            timeout_limit: peer.timeout_limit,
            timeout_minimum_millis: peer.timeout_minimum.as_millis() as u64,
            timeout_maximum_millis: peer.timeout_maximum.as_millis() as u64,
            throttle_interval_millis: peer.throttle_interval.as_millis() as u64,
            throttle_acceleration: peer.throttle_acceleration,
            throttle_deceleration: peer.throttle_deceleration,
        }
    }
}

impl NetConfig {
    pub fn peer_config(&self) -> PeerConfig {
        PeerConfig {
            ping_interval: Duration::from_millis(self.ping_interval_millis),
            timeout_limit: self.timeout_limit,
            timeout_minimum: Duration::from_millis(self.timeout_minimum_millis),
            timeout_maximum: Duration::from_millis(self.timeout_maximum_millis),
            throttle_interval: Duration::from_millis(self.throttle_interval_millis),
            throttle_acceleration: self.throttle_acceleration,
            throttle_deceleration: self.throttle_deceleration,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// `ip:port` to listen on.
    pub bind: String,
    pub max_peers: usize,
    /// Directory holding save descriptors and save folders.
    pub save_root: PathBuf,
    pub save_name: String,
    pub tick_millis: u64,
    /// Blocks per second.
    pub move_speed: f32,
    pub spawn: [f32; 3],
    /// Block ids stacked upward from y = 0 by the flat generator.
    pub flat_layers: Vec<String>,
    pub net: NetConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:7777".into(),
            max_peers: 32,
            save_root: "saves".into(),
            save_name: "world".into(),
            tick_millis: 50,
            move_speed: 4.3,
            spawn: [0.0, 4.0, 0.0],
            flat_layers: vec![
                "base:stone".into(),
                "base:dirt".into(),
                "base:dirt".into(),
                "base:grass".into(),
            ],
            net: NetConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Defaults, overlaid with `path` if given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        path.map_or_else(|| Ok(Self::default()), read_json)
    }

    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_millis.max(1))
    }

    pub fn host_config(&self) -> HostConfig {
        HostConfig {
            max_peers: self.max_peers,
            peer: self.net.peer_config(),
        }
    }

    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            dt: self.tick_period().as_secs_f32(),
            move_speed: self.move_speed,
            spawn: self.spawn.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub name: String,
    pub input_period_millis: u64,
    pub input_history: usize,
    pub net: NetConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            name: "player".into(),
            input_period_millis: 50,
            input_history: 256,
            net: NetConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        path.map_or_else(|| Ok(Self::default()), read_json)
    }

    pub fn input_config(&self) -> InputQueueConfig {
        InputQueueConfig {
            period: Duration::from_millis(self.input_period_millis.max(1)),
            history: self.input_history,
            capture: true,
        }
    }

    /// Clients never accept incoming connections.
    pub fn host_config(&self) -> HostConfig {
        HostConfig {
            max_peers: 0,
            peer: self.net.peer_config(),
        }
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
}
