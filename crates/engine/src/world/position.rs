use serde::{Deserialize, Serialize};

use super::chunk::CHUNK_SIZE;

/// Chunk edge length as a signed world-space quantity.
const EDGE: i32 = CHUNK_SIZE as i32;

/// Split one world-space axis into `(chunk coordinate, local coordinate)`.
///
/// Floor division: `/` and `%` truncate toward zero, so a negative remainder
/// moves the chunk coordinate down by one and the local coordinate up by one
/// chunk edge. The local coordinate always lands in `0..CHUNK_SIZE`.
#[inline]
pub const fn split_axis(v: i32) -> (i32, u8) {
    let mut chunk = v / EDGE;
    let mut local = v % EDGE;
    if local < 0 {
        chunk -= 1;
        local += EDGE;
    }
    (chunk, local as u8)
}

/// Absolute block position in the world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl BlockPos {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// The chunk this block belongs to and the block's position inside it.
    pub const fn split(&self) -> (ChunkPos, LocalPos) {
        let (cx, lx) = split_axis(self.x);
        let (cy, ly) = split_axis(self.y);
        let (cz, lz) = split_axis(self.z);
        (ChunkPos::new(cx, cy, cz), LocalPos::new(lx, ly, lz))
    }

    pub const fn chunk(&self) -> ChunkPos {
        self.split().0
    }

    pub const fn local(&self) -> LocalPos {
        self.split().1
    }
}

/// Cubic chunk coordinate: world position divided by the chunk edge, floored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl ChunkPos {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// World position of the chunk's `(0, 0, 0)` corner.
    pub const fn block_origin(&self) -> BlockPos {
        BlockPos::new(self.x * EDGE, self.y * EDGE, self.z * EDGE)
    }

    /// World position of a block inside this chunk.
    pub const fn block_at(&self, local: LocalPos) -> BlockPos {
        let origin = self.block_origin();
        BlockPos::new(
            origin.x + local.x as i32,
            origin.y + local.y as i32,
            origin.z + local.z as i32,
        )
    }

    /// Stem used for this chunk's files inside a save directory.
    pub fn file_stem(&self) -> String {
        format!("{}_{}_{}", self.x, self.y, self.z)
    }
}

/// Block position local to a chunk (each axis in `0..CHUNK_SIZE`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LocalPos {
    pub x: u8,
    pub y: u8,
    pub z: u8,
}

impl LocalPos {
    pub const fn new(x: u8, y: u8, z: u8) -> Self {
        Self { x, y, z }
    }

    /// Checked constructor for signed coordinates; `None` outside the chunk.
    pub const fn try_new(x: i32, y: i32, z: i32) -> Option<Self> {
        if x < 0 || y < 0 || z < 0 || x >= EDGE || y >= EDGE || z >= EDGE {
            return None;
        }
        Some(Self::new(x as u8, y as u8, z as u8))
    }

    /// Slot index in the chunk's block array: `x + 16 * (y + 16 * z)`.
    #[inline]
    pub const fn index(&self) -> usize {
        self.x as usize + CHUNK_SIZE * (self.y as usize + CHUNK_SIZE * self.z as usize)
    }

    /// Inverse of [`LocalPos::index`].
    #[inline]
    pub const fn from_index(index: usize) -> Self {
        Self::new(
            (index % CHUNK_SIZE) as u8,
            ((index / CHUNK_SIZE) % CHUNK_SIZE) as u8,
            (index / (CHUNK_SIZE * CHUNK_SIZE)) as u8,
        )
    }
}
