use super::block::BlockId;
use super::chunk::NUM_BLOCKS;
use super::position::{ChunkPos, LocalPos};
use super::referrer::BlockReferrer;

/// Terrain source for chunks that have never been saved.
///
/// `blocks` arrives filled with air and holds exactly `NUM_BLOCKS` slots in
/// chunk slot order. Generators must be deterministic in `pos`: a chunk is
/// generated at most once per save, but different saves must agree.
pub trait ChunkGenerator: Send + Sync {
    fn generate(&self, pos: ChunkPos, referrer: &BlockReferrer, blocks: &mut [BlockId]);
}

/// Horizontal layers stacked upward from world `y = 0`.
///
/// Everything below the first layer repeats the first layer; everything above
/// the last is air. Layer names are string ids resolved through the referrer,
/// so a missing mod shows up as unknown blocks rather than a crash.
#[derive(Debug, Clone, Default)]
pub struct FlatGenerator {
    layers: Vec<String>,
}

impl FlatGenerator {
    pub fn new(layers: Vec<String>) -> Self {
        Self { layers }
    }

    /// All air.
    pub fn empty() -> Self {
        Self::default()
    }

    fn layer_at(&self, y: i32, resolved: &[BlockId]) -> BlockId {
        if resolved.is_empty() {
            return BlockId::AIR;
        }
        if y < 0 {
            return resolved[0];
        }
        resolved.get(y as usize).copied().unwrap_or(BlockId::AIR)
    }
}

impl ChunkGenerator for FlatGenerator {
    fn generate(&self, pos: ChunkPos, referrer: &BlockReferrer, blocks: &mut [BlockId]) {
        debug_assert_eq!(blocks.len(), NUM_BLOCKS);
        let resolved: Vec<BlockId> = self.layers.iter().map(|l| referrer.id_of(l)).collect();

        for (slot, block) in blocks.iter_mut().enumerate() {
            let world = pos.block_at(LocalPos::from_index(slot));
            *block = self.layer_at(world.y, &resolved);
        }
    }
}
