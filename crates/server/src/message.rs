//! Wire messages layered over the transport's opaque packets.
//!
//! Encoded with bincode. Input states and snapshots are superseded every tick
//! and travel unreliably; everything else is reliable.

use anyhow::{Context, Result};
use cubesync_engine::world::block::BlockId;
use cubesync_engine::world::position::BlockPos;
use serde::{Deserialize, Serialize};

use crate::actor::{ActorId, ActorState};
use crate::input::InputState;
use crate::net::{Delivery, Packet};

/// A block change requested by a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockEdit {
    Place { pos: BlockPos, block: BlockId },
    Break { pos: BlockPos },
    Interact { pos: BlockPos },
}

impl BlockEdit {
    pub fn pos(&self) -> BlockPos {
        match *self {
            BlockEdit::Place { pos, .. }
            | BlockEdit::Break { pos }
            | BlockEdit::Interact { pos } => pos,
        }
    }
}

/// Canonical world state after one server tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldSnapshot {
    /// Sequence number of the bundle that produced this state.
    pub tick: u64,
    pub actors: Vec<ActorState>,
}

impl WorldSnapshot {
    pub fn actor(&self, id: ActorId) -> Option<&ActorState> {
        self.actors.iter().find(|a| a.id == id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClientMessage {
    Hello { name: String },
    State(InputState),
    Chat(String),
    Edit(BlockEdit),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerMessage {
    Welcome { actor: ActorId },
    Snapshot(WorldSnapshot),
    BlockChanged { pos: BlockPos, block: BlockId },
    /// `from` is `None` for server notices and command replies.
    Chat { from: Option<String>, text: String },
}

impl ClientMessage {
    pub fn delivery(&self) -> Delivery {
        match self {
            ClientMessage::State(_) => Delivery::Unreliable,
            _ => Delivery::Reliable,
        }
    }

    pub fn to_packet(&self) -> Result<Packet> {
        let data = bincode::serialize(self).context("encoding client message")?;
        Ok(Packet::new(data, self.delivery()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).context("decoding client message")
    }
}

impl ServerMessage {
    pub fn delivery(&self) -> Delivery {
        match self {
            ServerMessage::Snapshot(_) => Delivery::Unreliable,
            _ => Delivery::Reliable,
        }
    }

    pub fn to_packet(&self) -> Result<Packet> {
        let data = bincode::serialize(self).context("encoding server message")?;
        Ok(Packet::new(data, self.delivery()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).context("decoding server message")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::MovementFlags;

    #[test]
    fn delivery_follows_message_kind() {
        let state = ClientMessage::State(InputState {
            flags: MovementFlags::FORWARD,
            yaw: 0.0,
            pitch: 0.0,
            sequence: 5,
        });
        let packet = state.to_packet().unwrap();
        assert!(!packet.is_reliable());
        assert_eq!(ClientMessage::decode(packet.data()).unwrap(), state);

        assert!(ClientMessage::Chat("hi".into()).to_packet().unwrap().is_reliable());
        assert!(!ServerMessage::Snapshot(WorldSnapshot { tick: 1, actors: vec![] })
            .to_packet()
            .unwrap()
            .is_reliable());
        assert!(ServerMessage::Welcome { actor: 3 }.to_packet().unwrap().is_reliable());
    }

    #[test]
    fn garbage_does_not_decode() {
        assert!(ClientMessage::decode(&[0xFF, 0xFF, 0xFF, 0xFF, 0x01]).is_err());
        assert!(ServerMessage::decode(&[]).is_err());
    }
}
