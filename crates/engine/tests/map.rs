//! Map: coordinate translation, generate-once, persistence, corruption, hooks.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;
use cubesync_engine::world::Map;
use cubesync_engine::world::block::{
    BlockBehavior, BlockCategory, BlockEventContext, BlockId, BlockType,
};
use cubesync_engine::world::generator::FlatGenerator;
use cubesync_engine::world::metadata::MetaValue;
use cubesync_engine::world::position::{BlockPos, ChunkPos, LocalPos};
use cubesync_engine::world::referrer::BlockReferrer;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct Fixture {
    dir: PathBuf,
    referrer: Arc<BlockReferrer>,
    stone: BlockId,
    glass: BlockId,
}

impl Fixture {
    fn new(tag: &str) -> Self {
        let dir = std::env::temp_dir().join(format!("cubesync_map_{tag}"));
        let _ = fs::remove_dir_all(&dir);
        let mut referrer = BlockReferrer::new();
        let stone = referrer
            .register(BlockType::new("t:stone", "Stone", BlockCategory::Solid))
            .unwrap();
        let glass = referrer
            .register(BlockType::new("t:glass", "Glass", BlockCategory::Solid))
            .unwrap();
        Self {
            dir,
            referrer: Arc::new(referrer),
            stone,
            glass,
        }
    }

    /// Map with stone at y = 0 and air above.
    fn map(&self) -> Map {
        Map::new(
            &self.dir,
            Arc::clone(&self.referrer),
            Box::new(FlatGenerator::new(vec!["t:stone".into()])),
        )
        .unwrap()
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.dir);
    }
}

// ---------------------------------------------------------------------------
// Coordinate translation
// ---------------------------------------------------------------------------

#[test]
fn world_reads_match_chunk_local_reads() {
    let fx = Fixture::new("translation");
    let map = fx.map();

    let samples = [
        BlockPos::new(0, 0, 0),
        BlockPos::new(-1, 5, 5),
        BlockPos::new(-16, -1, 31),
        BlockPos::new(-17, 0, -33),
        BlockPos::new(47, 16, -16),
    ];
    for (i, pos) in samples.iter().enumerate() {
        map.set_block_at(*pos, if i % 2 == 0 { fx.glass } else { fx.stone })
            .unwrap();
    }
    for pos in samples {
        let (chunk_pos, local) = pos.split();
        let chunk = map.get_chunk(chunk_pos).unwrap();
        let via_chunk = chunk.get_block_at(local.x as i32, local.y as i32, local.z as i32);
        drop(chunk);
        assert_eq!(map.get_block_at(pos).unwrap(), via_chunk, "at {pos:?}");
    }
}

#[test]
fn minus_one_x_is_local_fifteen_of_chunk_minus_one() {
    let fx = Fixture::new("minus_one");
    let map = fx.map();

    map.set_block_at(BlockPos::new(-1, 5, 5), fx.glass).unwrap();
    let chunk = map.get_chunk(ChunkPos::new(-1, 0, 0)).unwrap();
    assert_eq!(chunk.get_block_at(15, 5, 5), fx.glass);
    assert_eq!(chunk.get(LocalPos::new(15, 5, 5)), fx.glass);
    drop(chunk);
    assert_eq!(
        map.get_chunk(ChunkPos::new(0, 0, 0)).unwrap().get_block_at(0, 5, 5),
        BlockId::AIR
    );
}

// ---------------------------------------------------------------------------
// Generation and persistence
// ---------------------------------------------------------------------------

#[test]
fn first_access_generates_and_persists() {
    let fx = Fixture::new("generate");
    let map = fx.map();
    let pos = ChunkPos::new(2, 0, -3);

    assert!(!map.chunk_path(pos).exists());
    assert_eq!(map.get_block_at(BlockPos::new(32, 0, -48)).unwrap(), fx.stone);
    assert_eq!(map.get_block_at(BlockPos::new(32, 1, -48)).unwrap(), BlockId::AIR);
    assert!(map.chunk_path(pos).exists());
    assert_eq!(map.chunk_count(), 1);
}

#[test]
fn existing_chunks_are_loaded_not_regenerated() {
    let fx = Fixture::new("no_regen");
    let pos = BlockPos::new(3, 0, 3);
    {
        let map = fx.map();
        map.set_block_at(pos, fx.glass).unwrap();
    }

    // Fresh map over the same directory with a generator that would
    // produce something different.
    let map = Map::new(
        &fx.dir,
        Arc::clone(&fx.referrer),
        Box::new(FlatGenerator::new(vec!["t:glass".into(); 16])),
    )
    .unwrap();
    assert_eq!(map.get_block_at(pos).unwrap(), fx.glass);
    assert_eq!(map.get_block_at(BlockPos::new(4, 0, 3)).unwrap(), fx.stone);
    assert_eq!(map.get_block_at(BlockPos::new(4, 1, 3)).unwrap(), BlockId::AIR);
}

#[test]
fn set_block_persists_synchronously() {
    let fx = Fixture::new("sync_persist");
    let map = fx.map();
    let pos = BlockPos::new(-5, 2, 7);
    map.set_block_at(pos, fx.glass).unwrap();

    let bytes = fs::read(map.chunk_path(pos.chunk())).unwrap();
    let on_disk = cubesync_engine::world::chunk::Chunk::deserialize(&bytes, &fx.referrer).unwrap();
    assert_eq!(on_disk.get(pos.local()), fx.glass);
}

#[test]
fn save_all_writes_every_loaded_chunk() {
    let fx = Fixture::new("save_all");
    let map = fx.map();
    for x in -2..2 {
        map.get_chunk(ChunkPos::new(x, 0, 0)).unwrap();
    }
    for x in -2..2 {
        fs::remove_file(map.chunk_path(ChunkPos::new(x, 0, 0))).unwrap();
    }
    assert_eq!(map.save_all().unwrap(), 4);
    for x in -2..2 {
        assert!(map.chunk_path(ChunkPos::new(x, 0, 0)).exists());
    }
}

#[test]
fn corrupt_chunk_file_is_fatal() {
    let fx = Fixture::new("corrupt");
    let pos = ChunkPos::new(0, 0, 0);
    {
        let map = fx.map();
        map.get_chunk(pos).unwrap();
        let path = map.chunk_path(pos);
        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();
    }

    let map = fx.map();
    let err = map.get_chunk(pos).unwrap_err();
    assert!(format!("{err:#}").contains("corrupt chunk file"), "{err:#}");
    assert!(map.get_block_at(BlockPos::new(1, 1, 1)).is_err());
    assert!(!map.is_loaded(pos), "no substitute chunk may be cached");
}

#[test]
fn chunk_file_for_the_wrong_position_is_fatal() {
    let fx = Fixture::new("wrong_pos");
    let map = fx.map();
    map.get_chunk(ChunkPos::new(0, 0, 0)).unwrap();
    fs::copy(
        map.chunk_path(ChunkPos::new(0, 0, 0)),
        map.chunk_path(ChunkPos::new(9, 9, 9)),
    )
    .unwrap();
    assert!(map.get_chunk(ChunkPos::new(9, 9, 9)).is_err());
}

#[test]
fn metadata_persists_beside_the_chunk() {
    let fx = Fixture::new("metadata");
    let pos = BlockPos::new(1, 1, 1);
    {
        let map = fx.map();
        map.update_metadata(pos, |m| m.set("charge", MetaValue::Float(0.5)))
            .unwrap();
    }
    let map = fx.map();
    let chunk = map.chunk_at(pos).unwrap();
    assert_eq!(
        chunk.metadata(pos.local()).and_then(|m| m.get("charge")),
        Some(&MetaValue::Float(0.5))
    );
}

#[test]
fn metadata_with_a_long_key_reloads() {
    let fx = Fixture::new("long_key");
    let pos = BlockPos::new(1, 1, 1);
    let key = "k".repeat(70_000);
    {
        let map = fx.map();
        map.update_metadata(pos, |m| m.set(key.clone(), MetaValue::Int(1)))
            .unwrap();
    }
    let map = fx.map();
    assert_eq!(map.get_block_at(pos).unwrap(), BlockId::AIR);
    let chunk = map.chunk_at(pos).unwrap();
    assert_eq!(
        chunk.metadata(pos.local()).and_then(|m| m.get(&key)),
        Some(&MetaValue::Int(1))
    );
}

#[test]
fn leftover_tmp_files_do_not_affect_loading() {
    let fx = Fixture::new("leftover_tmp");
    let pos = BlockPos::new(2, 0, 2);
    {
        let map = fx.map();
        map.set_block_at(pos, fx.glass).unwrap();
        map.update_metadata(pos, |m| m.set("n", MetaValue::Int(7)))
            .unwrap();
    }
    let stray: Vec<_> = fs::read_dir(&fx.dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .filter(|name| name.ends_with(".tmp"))
        .collect();
    assert!(stray.is_empty(), "{stray:?}");

    fs::write(fx.dir.join("0_0_0.chunk.tmp"), b"half a chunk").unwrap();
    fs::write(fx.dir.join("0_0_0.meta.tmp"), [0xff; 3]).unwrap();

    let map = fx.map();
    assert_eq!(map.get_block_at(pos).unwrap(), fx.glass);
    assert_eq!(
        map.chunk_at(pos)
            .unwrap()
            .metadata(pos.local())
            .and_then(|m| m.get("n")),
        Some(&MetaValue::Int(7))
    );

    // The next write replaces the stray files.
    map.set_block_at(pos, fx.stone).unwrap();
    assert!(!fx.dir.join("0_0_0.chunk.tmp").exists());
    assert_eq!(fx.map().get_block_at(pos).unwrap(), fx.stone);
}

#[test]
fn failed_writes_leave_the_loaded_chunk_unchanged() {
    let fx = Fixture::new("failed_write");
    let pos = BlockPos::new(3, 2, 1);
    let map = fx.map();
    map.set_block_at(pos, fx.glass).unwrap();
    map.update_metadata(pos, |m| m.set("n", MetaValue::Int(1)))
        .unwrap();
    let stored = |map: &Map| {
        let chunk = map.chunk_at(pos).unwrap();
        let n = chunk.metadata(pos.local()).and_then(|m| m.get("n").cloned());
        (chunk.get(pos.local()), n)
    };

    // A directory in the way makes staging the chunk file fail.
    let chunk_tmp = fx.dir.join("0_0_0.chunk.tmp");
    fs::create_dir(&chunk_tmp).unwrap();
    assert!(map.set_block_at(pos, fx.stone).is_err());
    assert!(map.break_block(pos, None).is_err());
    assert_eq!(stored(&map), (fx.glass, Some(MetaValue::Int(1))));
    fs::remove_dir(&chunk_tmp).unwrap();

    let meta_tmp = fx.dir.join("0_0_0.meta.tmp");
    fs::create_dir(&meta_tmp).unwrap();
    assert!(map.update_metadata(pos, |m| m.set("n", MetaValue::Int(2))).is_err());
    assert_eq!(stored(&map), (fx.glass, Some(MetaValue::Int(1))));
    fs::remove_dir(&meta_tmp).unwrap();

    assert_eq!(stored(&fx.map()), (fx.glass, Some(MetaValue::Int(1))));
    map.set_block_at(pos, fx.stone).unwrap();
    assert_eq!(fx.map().get_block_at(pos).unwrap(), fx.stone);
}

// ---------------------------------------------------------------------------
// Block hooks
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Counting {
    placed: AtomicUsize,
    broken: AtomicUsize,
    used: AtomicUsize,
}

struct Hooks(Arc<Counting>);

impl BlockBehavior for Hooks {
    fn on_place(&self, map: &Map, ctx: &BlockEventContext) -> Result<()> {
        self.0.placed.fetch_add(1, Ordering::SeqCst);
        let owner = MetaValue::Int(ctx.actor.unwrap_or(0) as i64);
        map.update_metadata(ctx.pos, |m| m.set("owner", owner))?;
        Ok(())
    }

    fn on_break(&self, _map: &Map, _ctx: &BlockEventContext) -> Result<()> {
        self.0.broken.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn on_interact(&self, _map: &Map, _ctx: &BlockEventContext) -> Result<()> {
        self.0.used.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[test]
fn hooks_run_through_the_behavior_interface() {
    let dir = std::env::temp_dir().join("cubesync_map_hooks");
    let _ = fs::remove_dir_all(&dir);
    let counts = Arc::new(Counting::default());
    let mut referrer = BlockReferrer::new();
    let lamp = referrer
        .register(
            BlockType::new("t:lamp", "Lamp", BlockCategory::Solid)
                .with_behavior(Hooks(Arc::clone(&counts))),
        )
        .unwrap();
    let map = Map::new(&dir, Arc::new(referrer), Box::new(FlatGenerator::empty())).unwrap();
    let pos = BlockPos::new(0, 0, 0);

    map.place_block(pos, lamp, Some(7)).unwrap();
    map.interact(pos, Some(7)).unwrap();
    assert_eq!(
        map.chunk_at(pos).unwrap().metadata(pos.local()).and_then(|m| m.get("owner")),
        Some(&MetaValue::Int(7))
    );

    assert_eq!(map.break_block(pos, None).unwrap(), lamp);
    assert_eq!(map.break_block(pos, None).unwrap(), BlockId::AIR, "second break is a no-op");
    assert!(map.chunk_at(pos).unwrap().metadata(pos.local()).is_none());

    assert_eq!(counts.placed.load(Ordering::SeqCst), 1);
    assert_eq!(counts.used.load(Ordering::SeqCst), 1);
    assert_eq!(counts.broken.load(Ordering::SeqCst), 1);
    let _ = fs::remove_dir_all(&dir);
}
