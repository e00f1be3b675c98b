//! BlockReferrer bootstrap, fallback and id assignment.

use anyhow::Result;
use cubesync_engine::world::block::{BlockCategory, BlockId, BlockType, Face, FaceTextures};
use cubesync_engine::world::referrer::{BlockReferrer, BlockSource};

#[test]
fn fresh_referrer_has_fixed_sentinels() {
    let r = BlockReferrer::new();
    assert_eq!(r.id_of("core:unknown"), BlockId(0));
    assert_eq!(r.id_of("core:out_of_bounds"), BlockId(1));
    assert_eq!(r.id_of("core:air"), BlockId(2));
    assert_eq!(r.len(), 3);
    assert_eq!(r.block(BlockId::AIR).category, BlockCategory::Air);
    assert!(r.namespaces().is_empty());
}

#[test]
fn unregistered_lookups_fall_back_to_unknown() {
    let r = BlockReferrer::new();
    assert_eq!(r.id_of("nope:missing"), BlockId::UNKNOWN);
    assert_eq!(r.block_by_name("nope:missing").id, "core:unknown");
    assert_eq!(r.block(BlockId(999)).id, "core:unknown");
    assert!(!r.contains(BlockId(999)));
}

#[test]
fn registration_assigns_increasing_ids() {
    let mut r = BlockReferrer::new();
    let a = r
        .register(BlockType::new("m:a", "A", BlockCategory::Solid))
        .unwrap();
    let b = r
        .register(BlockType::new("m:b", "B", BlockCategory::Liquid))
        .unwrap();
    assert_eq!(a, BlockId(3));
    assert_eq!(b, BlockId(4));
    assert_eq!(r.id_of("m:b"), b);
    assert_eq!(r.block(b).display_name, "B");
    let ids: Vec<BlockId> = r.iter().map(|(id, _)| id).collect();
    assert_eq!(ids, (0..5).map(BlockId).collect::<Vec<_>>());
}

#[test]
fn re_registering_keeps_the_id() {
    let mut r = BlockReferrer::new();
    let first = r
        .register(BlockType::new("m:a", "Old", BlockCategory::Solid))
        .unwrap();
    let again = r
        .register(BlockType::new("m:a", "New", BlockCategory::Solid))
        .unwrap();
    assert_eq!(first, again);
    assert_eq!(r.block(first).display_name, "New");
    assert_eq!(r.len(), 4);

    let next = r
        .register(BlockType::new("m:b", "B", BlockCategory::Solid))
        .unwrap();
    assert_eq!(next, BlockId(4));
}

#[test]
fn sentinels_cannot_be_redefined() {
    let mut r = BlockReferrer::new();
    assert!(
        r.register(BlockType::new("core:air", "Fake air", BlockCategory::Solid))
            .is_err()
    );
    assert_eq!(r.block(BlockId::AIR).display_name, "Air");
}

#[test]
fn face_textures_are_looked_up_per_face() {
    let mut r = BlockReferrer::new();
    let grass = r
        .register(
            BlockType::new("m:grass", "Grass", BlockCategory::Solid)
                .with_textures(FaceTextures::column("grass_top", "dirt", "grass_side")),
        )
        .unwrap();
    assert_eq!(r.face_texture(grass, Face::Top), "grass_top");
    assert_eq!(r.face_texture(grass, Face::West), "grass_side");
    // Unknown ids use the unknown block's texture.
    assert_eq!(r.face_texture(BlockId(500), Face::Top), "core:unknown");
}

struct Pack(&'static str, &'static [&'static str]);

impl BlockSource for Pack {
    fn namespace(&self) -> &str {
        self.0
    }

    fn register_blocks(&self, referrer: &mut BlockReferrer) -> Result<()> {
        for name in self.1 {
            referrer.register(BlockType::new(
                format!("{}:{}", self.0, name),
                *name,
                BlockCategory::Solid,
            ))?;
        }
        Ok(())
    }
}

#[test]
fn load_runs_sources_in_order() {
    let r = BlockReferrer::load(&[&Pack("first", &["x", "y"]), &Pack("second", &["z"])]).unwrap();
    assert_eq!(r.id_of("first:x"), BlockId(3));
    assert_eq!(r.id_of("first:y"), BlockId(4));
    assert_eq!(r.id_of("second:z"), BlockId(5));
    let namespaces: Vec<&str> = r.namespaces().into_iter().collect();
    assert_eq!(namespaces, vec!["first", "second"]);
}
