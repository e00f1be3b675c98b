//! String mod-id ↔ numeric id ↔ block-type indirection.

use std::collections::BTreeSet;

use anyhow::{Context, Result, bail};

use super::block::{BlockCategory, BlockId, BlockType, Face};
use crate::registry::Registry;

pub const UNKNOWN_ID: &str = "core:unknown";
pub const OUT_OF_BOUNDS_ID: &str = "core:out_of_bounds";
pub const AIR_ID: &str = "core:air";

/// Supplier of block types during the load phase.
///
/// The script/mod front end implements this; `BlockReferrer::load` runs every
/// source to completion before the referrer can be shared with a map.
pub trait BlockSource {
    /// Mod namespace, as recorded in save descriptors.
    fn namespace(&self) -> &str;

    fn register_blocks(&self, referrer: &mut BlockReferrer) -> Result<()>;
}

/// Owns every block type for a session.
///
/// Ids 0, 1 and 2 are the unknown, out-of-bounds and air sentinels. Every
/// later registration gets `uid = number of registered types`, so ids depend
/// on registration order and are never reused.
#[derive(Debug, Clone)]
pub struct BlockReferrer {
    ids: Registry<String, BlockId>,
    blocks: Registry<BlockId, BlockType>,
}

impl BlockReferrer {
    pub fn new() -> Self {
        let unknown = BlockType::new(UNKNOWN_ID, "Unknown", BlockCategory::Solid);
        let mut referrer = Self {
            ids: Registry::new(BlockId::UNKNOWN),
            blocks: Registry::new(unknown.clone()),
        };
        referrer.insert(BlockId::UNKNOWN, unknown);
        referrer.insert(
            BlockId::OUT_OF_BOUNDS,
            BlockType::new(OUT_OF_BOUNDS_ID, "Out of bounds", BlockCategory::Solid),
        );
        referrer.insert(
            BlockId::AIR,
            BlockType::new(AIR_ID, "Air", BlockCategory::Air),
        );
        referrer
    }

    /// Build a referrer and run every source's registration against it.
    pub fn load(sources: &[&dyn BlockSource]) -> Result<Self> {
        let mut referrer = Self::new();
        for source in sources {
            source
                .register_blocks(&mut referrer)
                .with_context(|| format!("registering blocks from '{}'", source.namespace()))?;
        }
        tracing::info!(
            "Block registry loaded: {} types from {} sources",
            referrer.len(),
            sources.len()
        );
        Ok(referrer)
    }

    fn insert(&mut self, id: BlockId, block: BlockType) {
        self.ids.insert(block.id.clone(), id);
        self.blocks.insert(id, block);
    }

    /// Register a block type and return its id.
    ///
    /// Registering a string id that already exists replaces the definition but
    /// keeps the original numeric id, so chunks already referring to it stay valid.
    pub fn register(&mut self, block: BlockType) -> Result<BlockId> {
        if let Some(&existing) = self.ids.try_get(block.id.as_str()) {
            if existing.is_sentinel() {
                bail!("'{}' is a reserved block id", block.id);
            }
            tracing::warn!("Block '{}' registered twice, replacing definition", block.id);
            self.blocks.insert(existing, block);
            return Ok(existing);
        }

        let uid = u16::try_from(self.blocks.len())
            .with_context(|| format!("block id space exhausted registering '{}'", block.id))?;
        let id = BlockId(uid);
        tracing::debug!("Registered block '{}' as {}", block.id, uid);
        self.insert(id, block);
        Ok(id)
    }

    /// Numeric id for a string id; unregistered strings map to `UNKNOWN`.
    pub fn id_of(&self, name: &str) -> BlockId {
        *self.ids.get(name)
    }

    /// Block type for an id; unregistered ids map to the unknown block.
    pub fn block(&self, id: BlockId) -> &BlockType {
        self.blocks.get(&id)
    }

    pub fn block_by_name(&self, name: &str) -> &BlockType {
        self.block(self.id_of(name))
    }

    pub fn contains(&self, id: BlockId) -> bool {
        self.blocks.contains_key(&id)
    }

    /// Texture reference for one face of a block, for the meshing layer.
    pub fn face_texture(&self, id: BlockId, face: Face) -> &str {
        self.block(id).textures.get(face)
    }

    /// Number of registered types, sentinels included.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Mod namespaces with at least one registered block (excluding `core`).
    pub fn namespaces(&self) -> BTreeSet<&str> {
        self.blocks
            .iter()
            .map(|(_, block)| block.namespace())
            .filter(|ns| *ns != "core")
            .collect()
    }

    /// All types in id order.
    pub fn iter(&self) -> impl Iterator<Item = (BlockId, &BlockType)> {
        (0..self.len()).filter_map(|i| {
            let id = BlockId(i as u16);
            self.blocks.try_get(&id).map(|block| (id, block))
        })
    }
}

impl Default for BlockReferrer {
    fn default() -> Self {
        Self::new()
    }
}
