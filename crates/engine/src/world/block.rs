use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::Map;
use super::position::BlockPos;

/// Stable numeric block identifier, as stored in chunks.
///
/// Ids index into the [`BlockReferrer`](super::referrer::BlockReferrer) that
/// assigned them. They are only meaningful relative to that referrer: a world
/// saved under one mod set must be read back with the same registration order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct BlockId(pub u16);

impl BlockId {
    /// Fallback for any lookup miss.
    pub const UNKNOWN: BlockId = BlockId(0);
    /// Returned by reads outside a chunk's bounds.
    pub const OUT_OF_BOUNDS: BlockId = BlockId(1);
    /// The empty block.
    pub const AIR: BlockId = BlockId(2);

    pub const fn new(id: u16) -> Self {
        Self(id)
    }

    /// True for the three ids every referrer reserves.
    pub const fn is_sentinel(self) -> bool {
        self.0 <= Self::AIR.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlockCategory {
    Air,
    Solid,
    Liquid,
}

/// One face of a block, in the order textures are stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Face {
    Top,
    Bottom,
    North,
    South,
    East,
    West,
}

impl Face {
    pub const ALL: [Face; 6] = [
        Face::Top,
        Face::Bottom,
        Face::North,
        Face::South,
        Face::East,
        Face::West,
    ];

    const fn slot(self) -> usize {
        self as usize
    }
}

/// Per-face texture references, consumed read-only by the meshing layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaceTextures([String; 6]);

impl FaceTextures {
    /// Same texture on all six faces.
    pub fn uniform(texture: impl Into<String>) -> Self {
        let texture = texture.into();
        Self(std::array::from_fn(|_| texture.clone()))
    }

    /// Distinct top and bottom, shared sides (grass, logs).
    pub fn column(top: &str, bottom: &str, side: &str) -> Self {
        Self::uniform(side)
            .with_face(Face::Top, top)
            .with_face(Face::Bottom, bottom)
    }

    pub fn with_face(mut self, face: Face, texture: impl Into<String>) -> Self {
        self.0[face.slot()] = texture.into();
        self
    }

    pub fn get(&self, face: Face) -> &str {
        &self.0[face.slot()]
    }
}

/// Where and by whom a block hook was triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockEventContext {
    pub pos: BlockPos,
    /// Acting actor, if the change came from a player rather than the server.
    pub actor: Option<u32>,
}

/// Interaction hooks for a block type.
///
/// This is the only way the core calls into mod code: a script engine adapter
/// implements it for script-defined blocks. Hooks run on the tick thread after
/// the block write has been applied and persisted, so they may read and write
/// the map freely.
pub trait BlockBehavior: Send + Sync {
    fn on_place(&self, _map: &Map, _ctx: &BlockEventContext) -> Result<()> {
        Ok(())
    }

    fn on_break(&self, _map: &Map, _ctx: &BlockEventContext) -> Result<()> {
        Ok(())
    }

    fn on_interact(&self, _map: &Map, _ctx: &BlockEventContext) -> Result<()> {
        Ok(())
    }
}

/// Canonical block-type record. Owned by the referrer, never copied into chunks.
#[derive(Clone)]
pub struct BlockType {
    pub display_name: String,
    /// Namespaced string id, e.g. `"base:stone"`.
    pub id: String,
    pub category: BlockCategory,
    pub textures: FaceTextures,
    pub behavior: Option<Arc<dyn BlockBehavior>>,
}

impl BlockType {
    /// A block with one texture named after its id and no hooks.
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        category: BlockCategory,
    ) -> Self {
        let id = id.into();
        Self {
            display_name: display_name.into(),
            textures: FaceTextures::uniform(id.clone()),
            id,
            category,
            behavior: None,
        }
    }

    pub fn with_textures(mut self, textures: FaceTextures) -> Self {
        self.textures = textures;
        self
    }

    pub fn with_behavior(mut self, behavior: impl BlockBehavior + 'static) -> Self {
        self.behavior = Some(Arc::new(behavior));
        self
    }

    /// The mod namespace: everything before the first `:`.
    pub fn namespace(&self) -> &str {
        self.id.split_once(':').map_or(self.id.as_str(), |(ns, _)| ns)
    }

    pub fn is_solid(&self) -> bool {
        self.category == BlockCategory::Solid
    }
}

impl fmt::Debug for BlockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockType")
            .field("id", &self.id)
            .field("display_name", &self.display_name)
            .field("category", &self.category)
            .field("has_behavior", &self.behavior.is_some())
            .finish()
    }
}
