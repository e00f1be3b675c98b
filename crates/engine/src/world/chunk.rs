use std::collections::HashMap;

use anyhow::{Result, bail};

use super::block::BlockId;
use super::generator::ChunkGenerator;
use super::metadata::{self, CellMetadata};
use super::position::{ChunkPos, LocalPos};
use super::referrer::BlockReferrer;

/// Number of blocks along each axis of a chunk.
pub const CHUNK_SIZE: usize = 16;
/// Total block count in one chunk.
pub const NUM_BLOCKS: usize = CHUNK_SIZE * CHUNK_SIZE * CHUNK_SIZE;

/// Bytes in the position header of a chunk file (three `i32`).
const HEADER_LEN: usize = 3 * 4;
/// Exact size of a serialized chunk.
pub const SERIALIZED_LEN: usize = HEADER_LEN + NUM_BLOCKS * 2;

/// Slot index for local coordinates: `x + 16 * (y + 16 * z)`.
#[inline]
pub const fn index(x: usize, y: usize, z: usize) -> usize {
    x + CHUNK_SIZE * (y + CHUNK_SIZE * z)
}

/// A 16x16x16 cube of blocks.
///
/// Blocks are stored as ids into the session's [`BlockReferrer`], in slot
/// order [`index`]. The block array is either empty (not yet filled) or holds
/// exactly [`NUM_BLOCKS`] entries; `fill` swaps in a complete array in one step.
#[derive(Clone, Debug)]
pub struct Chunk {
    pos: ChunkPos,
    blocks: Vec<BlockId>,
    metadata: HashMap<LocalPos, CellMetadata>,
}

impl Chunk {
    /// An unfilled chunk. Reads return `UNKNOWN` until [`Chunk::fill`] runs.
    pub fn new(pos: ChunkPos) -> Self {
        Self {
            pos,
            blocks: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    pub fn pos(&self) -> ChunkPos {
        self.pos
    }

    pub fn is_filled(&self) -> bool {
        self.blocks.len() == NUM_BLOCKS
    }

    /// Generate every block of this chunk.
    pub fn fill(&mut self, generator: &dyn ChunkGenerator, referrer: &BlockReferrer) {
        let mut blocks = vec![BlockId::AIR; NUM_BLOCKS];
        generator.generate(self.pos, referrer, &mut blocks);
        self.blocks = blocks;
    }

    /// Block at signed local coordinates; `OUT_OF_BOUNDS` outside `0..16`.
    pub fn get_block_at(&self, x: i32, y: i32, z: i32) -> BlockId {
        match LocalPos::try_new(x, y, z) {
            Some(local) => self.get(local),
            None => BlockId::OUT_OF_BOUNDS,
        }
    }

    /// Write a block at signed local coordinates; ignored outside `0..16`.
    pub fn set_block_at(&mut self, x: i32, y: i32, z: i32, block: BlockId) {
        if let Some(local) = LocalPos::try_new(x, y, z) {
            self.set(local, block);
        }
    }

    #[inline]
    pub fn get(&self, local: LocalPos) -> BlockId {
        self.blocks
            .get(local.index())
            .copied()
            .unwrap_or(BlockId::UNKNOWN)
    }

    #[inline]
    pub fn set(&mut self, local: LocalPos, block: BlockId) {
        if let Some(slot) = self.blocks.get_mut(local.index()) {
            *slot = block;
        }
    }

    /// Blocks in slot order, for meshing. Empty if unfilled.
    pub fn blocks(&self) -> &[BlockId] {
        &self.blocks
    }

    pub fn metadata(&self, local: LocalPos) -> Option<&CellMetadata> {
        self.metadata.get(&local)
    }

    /// Metadata for a cell, created empty if absent.
    pub fn metadata_mut(&mut self, local: LocalPos) -> &mut CellMetadata {
        self.metadata.entry(local).or_default()
    }

    pub fn remove_metadata(&mut self, local: LocalPos) -> Option<CellMetadata> {
        self.metadata.remove(&local)
    }

    pub fn has_metadata(&self) -> bool {
        self.metadata.values().any(|m| !m.is_empty())
    }

    /// Chunk file bytes: position (3 × `i32` LE) then every id (`u16` LE) in
    /// slot order. No magic, no version.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        if !self.is_filled() {
            bail!("chunk {:?} serialized before being filled", self.pos);
        }
        let mut out = Vec::with_capacity(SERIALIZED_LEN);
        for c in [self.pos.x, self.pos.y, self.pos.z] {
            out.extend_from_slice(&c.to_le_bytes());
        }
        for id in &self.blocks {
            out.extend_from_slice(&id.0.to_le_bytes());
        }
        Ok(out)
    }

    /// Parse chunk file bytes.
    ///
    /// Ids are only meaningful to the referrer that assigned them, so this
    /// must be given the same referrer (same mod set, same order) that was
    /// live when the chunk was written. Ids the referrer does not know are
    /// rejected.
    pub fn deserialize(bytes: &[u8], referrer: &BlockReferrer) -> Result<Self> {
        if bytes.len() != SERIALIZED_LEN {
            bail!(
                "chunk data is {} bytes, expected {}",
                bytes.len(),
                SERIALIZED_LEN
            );
        }
        let (header, body) = bytes.split_at(HEADER_LEN);
        let coord = |i: usize| {
            i32::from_le_bytes([header[i], header[i + 1], header[i + 2], header[i + 3]])
        };
        let pos = ChunkPos::new(coord(0), coord(4), coord(8));

        let mut blocks = Vec::with_capacity(NUM_BLOCKS);
        for (slot, raw) in body.chunks_exact(2).enumerate() {
            let id = BlockId(u16::from_le_bytes([raw[0], raw[1]]));
            if !referrer.contains(id) {
                bail!(
                    "chunk {:?} slot {} holds block id {} which is not registered",
                    pos,
                    slot,
                    id.0
                );
            }
            blocks.push(id);
        }

        Ok(Self {
            pos,
            blocks,
            metadata: HashMap::new(),
        })
    }

    /// Metadata sidecar bytes (see [`metadata`]).
    pub fn serialize_metadata(&self) -> Result<Vec<u8>> {
        metadata::encode(&self.metadata)
    }

    /// Replace this chunk's metadata with a decoded sidecar.
    pub fn load_metadata(&mut self, bytes: &[u8]) -> Result<()> {
        self.metadata = metadata::decode(bytes)?;
        Ok(())
    }
}
