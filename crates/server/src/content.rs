//! The built-in `base` block set.

use anyhow::Result;
use cubesync_engine::world::Map;
use cubesync_engine::world::block::{
    BlockBehavior, BlockCategory, BlockEventContext, BlockType, FaceTextures,
};
use cubesync_engine::world::metadata::MetaValue;
use cubesync_engine::world::referrer::{BlockReferrer, BlockSource};

pub const NAMESPACE: &str = "base";

pub const STONE: &str = "base:stone";
pub const DIRT: &str = "base:dirt";
pub const GRASS: &str = "base:grass";
pub const SAND: &str = "base:sand";
pub const WATER: &str = "base:water";
pub const LAMP: &str = "base:lamp";

/// Metadata key holding a lamp's on/off state.
pub const LIT: &str = "lit";

pub struct BaseContent;

impl BlockSource for BaseContent {
    fn namespace(&self) -> &str {
        NAMESPACE
    }

    fn register_blocks(&self, referrer: &mut BlockReferrer) -> Result<()> {
        referrer.register(BlockType::new(STONE, "Stone", BlockCategory::Solid))?;
        referrer.register(BlockType::new(DIRT, "Dirt", BlockCategory::Solid))?;
        referrer.register(
            BlockType::new(GRASS, "Grass", BlockCategory::Solid)
                .with_textures(FaceTextures::column("base:grass_top", DIRT, "base:grass_side")),
        )?;
        referrer.register(BlockType::new(SAND, "Sand", BlockCategory::Solid))?;
        referrer.register(BlockType::new(WATER, "Water", BlockCategory::Liquid))?;
        referrer.register(
            BlockType::new(LAMP, "Lamp", BlockCategory::Solid).with_behavior(Lamp),
        )?;
        Ok(())
    }
}

/// Toggles between lit and unlit when used. Starts unlit.
struct Lamp;

impl BlockBehavior for Lamp {
    fn on_place(&self, map: &Map, ctx: &BlockEventContext) -> Result<()> {
        map.update_metadata(ctx.pos, |meta| meta.set(LIT, MetaValue::Int(0)))?;
        Ok(())
    }

    fn on_interact(&self, map: &Map, ctx: &BlockEventContext) -> Result<()> {
        map.update_metadata(ctx.pos, |meta| {
            let lit = meta.get(LIT).and_then(MetaValue::as_int).unwrap_or(0);
            meta.set(LIT, MetaValue::Int(1 - lit.clamp(0, 1)));
        })?;
        Ok(())
    }
}

/// A referrer holding the sentinels and the base block set.
pub fn referrer() -> Result<BlockReferrer> {
    BlockReferrer::load(&[&BaseContent])
}
