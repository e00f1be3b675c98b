//! Datagram framing.
//!
//! ```text
//! magic: u8 | kind: u8 | seq: u32 LE | payload
//! ```
//!
//! Sequenced kinds share one reliable stream per peer. `Ack` carries the
//! acknowledged sequence number in `seq`; `Unreliable` carries a counter that
//! the receiver ignores.

use anyhow::{Result, bail};

pub const MAGIC: u8 = 0xCB;
pub const HEADER_LEN: usize = 6;
/// Largest datagram the transport sends or accepts.
pub const MAX_DATAGRAM: usize = 65_507;
pub const MAX_PAYLOAD: usize = MAX_DATAGRAM - HEADER_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameKind {
    Connect = 1,
    Verify = 2,
    Disconnect = 3,
    Ping = 4,
    Reliable = 5,
    Unreliable = 6,
    Ack = 7,
}

impl FrameKind {
    /// Whether frames of this kind travel on the acknowledged stream.
    pub const fn is_sequenced(self) -> bool {
        !matches!(self, FrameKind::Unreliable | FrameKind::Ack)
    }
}

impl TryFrom<u8> for FrameKind {
    type Error = anyhow::Error;

    fn try_from(value: u8) -> Result<Self> {
        Ok(match value {
            1 => FrameKind::Connect,
            2 => FrameKind::Verify,
            3 => FrameKind::Disconnect,
            4 => FrameKind::Ping,
            5 => FrameKind::Reliable,
            6 => FrameKind::Unreliable,
            7 => FrameKind::Ack,
            other => bail!("unknown frame kind {other}"),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    pub kind: FrameKind,
    pub seq: u32,
    pub payload: &'a [u8],
}

impl<'a> Frame<'a> {
    pub fn decode(datagram: &'a [u8]) -> Result<Self> {
        if datagram.len() < HEADER_LEN {
            bail!("datagram of {} bytes is shorter than the header", datagram.len());
        }
        if datagram[0] != MAGIC {
            bail!("bad magic byte {:#04x}", datagram[0]);
        }
        let kind = FrameKind::try_from(datagram[1])?;
        let seq = u32::from_le_bytes([datagram[2], datagram[3], datagram[4], datagram[5]]);
        Ok(Self {
            kind,
            seq,
            payload: &datagram[HEADER_LEN..],
        })
    }
}

pub fn encode(kind: FrameKind, seq: u32, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
    buf.push(MAGIC);
    buf.push(kind as u8);
    buf.extend_from_slice(&seq.to_le_bytes());
    buf.extend_from_slice(payload);
    buf
}
