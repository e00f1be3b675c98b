pub mod block;
pub mod chunk;
pub mod generator;
pub mod metadata;
pub mod position;
pub mod referrer;

use std::fs::{self, File};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use dashmap::mapref::one::{Ref, RefMut};
use rayon::prelude::*;

use block::{BlockEventContext, BlockId};
use chunk::Chunk;
use generator::ChunkGenerator;
use metadata::CellMetadata;
use position::{BlockPos, ChunkPos};
use referrer::BlockReferrer;

use crate::save::SaveDir;

const CHUNK_EXT: &str = "chunk";
const META_EXT: &str = "meta";
const TMP_EXT: &str = "tmp";

/// The block world: sparse cubic chunks, generated on first access and
/// persisted on every change.
///
/// Lock-sharded by chunk so the meshing layer can read while the tick thread
/// writes; the tick thread is the only writer. A chunk file that fails to
/// parse is fatal: lookups that hit it return an error, never a stand-in chunk.
pub struct Map {
    chunk_dir: PathBuf,
    referrer: Arc<BlockReferrer>,
    generator: Box<dyn ChunkGenerator>,
    chunks: DashMap<ChunkPos, Chunk>,
}

impl Map {
    /// A map persisting chunks under `chunk_dir` (created if missing).
    pub fn new(
        chunk_dir: impl Into<PathBuf>,
        referrer: Arc<BlockReferrer>,
        generator: Box<dyn ChunkGenerator>,
    ) -> Result<Self> {
        let chunk_dir = chunk_dir.into();
        fs::create_dir_all(&chunk_dir)
            .with_context(|| format!("creating chunk directory {}", chunk_dir.display()))?;
        Ok(Self {
            chunk_dir,
            referrer,
            generator,
            chunks: DashMap::new(),
        })
    }

    /// A map over a save's chunk directory.
    pub fn open(
        save: &SaveDir,
        referrer: Arc<BlockReferrer>,
        generator: Box<dyn ChunkGenerator>,
    ) -> Result<Self> {
        Self::new(save.chunk_dir(), referrer, generator)
    }

    pub fn referrer(&self) -> &Arc<BlockReferrer> {
        &self.referrer
    }

    pub fn chunk_dir(&self) -> &Path {
        &self.chunk_dir
    }

    /// The chunk at `pos`: loaded, read from disk, or generated and saved.
    pub fn get_chunk(&self, pos: ChunkPos) -> Result<Ref<'_, ChunkPos, Chunk>> {
        if let Some(chunk) = self.chunks.get(&pos) {
            return Ok(chunk);
        }
        Ok(self.get_chunk_mut(pos)?.downgrade())
    }

    fn get_chunk_mut(&self, pos: ChunkPos) -> Result<RefMut<'_, ChunkPos, Chunk>> {
        match self.chunks.entry(pos) {
            Entry::Occupied(entry) => Ok(entry.into_ref()),
            Entry::Vacant(entry) => {
                let chunk = self.load_or_generate(pos)?;
                Ok(entry.insert(chunk))
            }
        }
    }

    /// The chunk containing a world position.
    pub fn chunk_at(&self, pos: BlockPos) -> Result<Ref<'_, ChunkPos, Chunk>> {
        self.get_chunk(pos.chunk())
    }

    pub fn get_block_at(&self, pos: BlockPos) -> Result<BlockId> {
        let (chunk_pos, local) = pos.split();
        Ok(self.get_chunk(chunk_pos)?.get(local))
    }

    /// Write a block and persist its chunk before returning. On error the
    /// loaded chunk is left as it was.
    pub fn set_block_at(&self, pos: BlockPos, block: BlockId) -> Result<()> {
        let (chunk_pos, local) = pos.split();
        let mut chunk = self.get_chunk_mut(chunk_pos)?;
        let mut edited = chunk.clone();
        edited.set(local, block);
        self.commit(&mut chunk, edited)
    }

    /// Edit a cell's metadata and persist the chunk.
    pub fn update_metadata<R>(
        &self,
        pos: BlockPos,
        f: impl FnOnce(&mut CellMetadata) -> R,
    ) -> Result<R> {
        let (chunk_pos, local) = pos.split();
        let mut chunk = self.get_chunk_mut(chunk_pos)?;
        let mut edited = chunk.clone();
        let result = f(edited.metadata_mut(local));
        if edited.metadata(local).is_some_and(CellMetadata::is_empty) {
            edited.remove_metadata(local);
        }
        self.commit(&mut chunk, edited)?;
        Ok(result)
    }

    /// Place a block and run its `on_place` hook.
    pub fn place_block(&self, pos: BlockPos, block: BlockId, actor: Option<u32>) -> Result<()> {
        self.set_block_at(pos, block)?;
        if let Some(behavior) = &self.referrer.block(block).behavior {
            behavior.on_place(self, &BlockEventContext { pos, actor })?;
        }
        Ok(())
    }

    /// Replace a block with air, run the old block's `on_break` hook, and
    /// return the removed id. Breaking air is a no-op.
    pub fn break_block(&self, pos: BlockPos, actor: Option<u32>) -> Result<BlockId> {
        let (chunk_pos, local) = pos.split();
        let old = {
            let mut chunk = self.get_chunk_mut(chunk_pos)?;
            let old = chunk.get(local);
            if old == BlockId::AIR {
                return Ok(old);
            }
            let mut edited = chunk.clone();
            edited.set(local, BlockId::AIR);
            edited.remove_metadata(local);
            self.commit(&mut chunk, edited)?;
            old
        };
        if let Some(behavior) = &self.referrer.block(old).behavior {
            behavior.on_break(self, &BlockEventContext { pos, actor })?;
        }
        Ok(old)
    }

    /// Run the `on_interact` hook of the block at `pos`.
    pub fn interact(&self, pos: BlockPos, actor: Option<u32>) -> Result<()> {
        let block = self.get_block_at(pos)?;
        if let Some(behavior) = &self.referrer.block(block).behavior {
            behavior.on_interact(self, &BlockEventContext { pos, actor })?;
        }
        Ok(())
    }

    /// Synchronously write the chunk at `pos` to its file.
    pub fn save(&self, pos: ChunkPos) -> Result<()> {
        let chunk = self.get_chunk(pos)?;
        self.write_chunk(&chunk)
    }

    /// Write every loaded chunk, in parallel. Returns the number written.
    pub fn save_all(&self) -> Result<usize> {
        let loaded: Vec<ChunkPos> = self.chunks.iter().map(|entry| *entry.key()).collect();
        loaded
            .par_iter()
            .map(|pos| self.save(*pos))
            .collect::<Result<Vec<()>>>()?;
        Ok(loaded.len())
    }

    pub fn is_loaded(&self, pos: ChunkPos) -> bool {
        self.chunks.contains_key(&pos)
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// File holding the blocks of the chunk at `pos`.
    pub fn chunk_path(&self, pos: ChunkPos) -> PathBuf {
        self.chunk_dir
            .join(pos.file_stem())
            .with_extension(CHUNK_EXT)
    }

    fn meta_path(&self, pos: ChunkPos) -> PathBuf {
        self.chunk_dir.join(pos.file_stem()).with_extension(META_EXT)
    }

    fn load_or_generate(&self, pos: ChunkPos) -> Result<Chunk> {
        let path = self.chunk_path(pos);
        match fs::read(&path) {
            Ok(bytes) => self.parse_chunk_file(pos, &path, &bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                let mut chunk = Chunk::new(pos);
                chunk.fill(self.generator.as_ref(), &self.referrer);
                self.write_chunk(&chunk)?;
                tracing::debug!("Generated chunk {:?}", pos);
                Ok(chunk)
            }
            Err(e) => Err(e).with_context(|| format!("reading chunk file {}", path.display())),
        }
    }

    fn parse_chunk_file(&self, pos: ChunkPos, path: &Path, bytes: &[u8]) -> Result<Chunk> {
        let mut chunk = Chunk::deserialize(bytes, &self.referrer)
            .with_context(|| format!("corrupt chunk file {}", path.display()))?;
        if chunk.pos() != pos {
            bail!(
                "corrupt chunk file {}: holds chunk {:?}, expected {:?}",
                path.display(),
                chunk.pos(),
                pos
            );
        }

        let meta_path = self.meta_path(pos);
        match fs::read(&meta_path) {
            Ok(meta) => chunk
                .load_metadata(&meta)
                .with_context(|| format!("corrupt metadata file {}", meta_path.display()))?,
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("reading metadata file {}", meta_path.display()));
            }
        }
        tracing::debug!("Loaded chunk {:?} from {}", pos, path.display());
        Ok(chunk)
    }

    /// Replace a loaded chunk with its edited copy once the copy is on disk.
    fn commit(&self, loaded: &mut Chunk, edited: Chunk) -> Result<()> {
        self.write_chunk(&edited)?;
        *loaded = edited;
        Ok(())
    }

    /// Both files are staged beside their targets before either is renamed
    /// into place, so a failed write leaves the previous pair intact.
    fn write_chunk(&self, chunk: &Chunk) -> Result<()> {
        let pos = chunk.pos();
        let path = self.chunk_path(pos);
        let meta_path = self.meta_path(pos);
        let meta = if chunk.has_metadata() {
            Some(chunk.serialize_metadata()?)
        } else {
            None
        };

        let staged = stage(&path, &chunk.serialize()?)
            .with_context(|| format!("writing chunk file {}", path.display()))?;
        let staged_meta = match meta {
            Some(bytes) => match stage(&meta_path, &bytes) {
                Ok(tmp) => Some(tmp),
                Err(e) => {
                    let _ = fs::remove_file(&staged);
                    return Err(e).with_context(|| {
                        format!("writing metadata file {}", meta_path.display())
                    });
                }
            },
            None => None,
        };

        fs::rename(&staged, &path)
            .with_context(|| format!("replacing chunk file {}", path.display()))?;
        match staged_meta {
            Some(tmp) => fs::rename(&tmp, &meta_path)
                .with_context(|| format!("replacing metadata file {}", meta_path.display()))?,
            None => match fs::remove_file(&meta_path) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(e).with_context(|| {
                        format!("removing stale metadata file {}", meta_path.display())
                    });
                }
            },
        }
        Ok(())
    }
}

/// Write `bytes` to `<path>.tmp` and flush it. Loading never reads `.tmp` files.
fn stage(path: &Path, bytes: &[u8]) -> io::Result<PathBuf> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".");
    tmp.push(TMP_EXT);
    let tmp = PathBuf::from(tmp);
    let mut file = File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    Ok(tmp)
}
