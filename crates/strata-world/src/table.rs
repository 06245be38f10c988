//! Dense, id-indexed storage of a world's chunks.

use strata_common::{BlockPos, ChunkId, MapId, WorldError, WorldResult};

use crate::block::MapBlock;
use crate::chunk::MapChunk;
use crate::spatial::{self, Lookup};

/// Anything that can hand out resident chunks by id.
///
/// Lookups report a chunk that is not resident as [`Lookup::Pending`] so the
/// caller can load it and resume.
pub trait ChunkSource {
    /// Returns the chunk with `id` if it is resident.
    fn chunk(&self, id: ChunkId) -> Option<&MapChunk>;
}

/// All chunks of one map, indexed directly by chunk id.
#[derive(Debug, Clone)]
pub struct ChunkTable {
    map: MapId,
    root: ChunkId,
    chunks: Vec<Option<MapChunk>>,
}

impl ChunkTable {
    /// Creates an empty table whose root will be `root`.
    #[must_use]
    pub fn new(map: MapId, root: ChunkId) -> Self {
        Self {
            map,
            root,
            chunks: Vec::new(),
        }
    }

    /// Map served by this table.
    #[must_use]
    pub const fn map(&self) -> MapId {
        self.map
    }

    /// Root chunk id.
    #[must_use]
    pub const fn root(&self) -> ChunkId {
        self.root
    }

    /// Inserts (or replaces) a chunk, returning the previous one.
    pub fn insert(&mut self, chunk: MapChunk) -> Option<MapChunk> {
        let index = chunk.id().index();
        if index >= self.chunks.len() {
            self.chunks.resize_with(index + 1, || None);
        }
        self.chunks[index].replace(chunk)
    }

    /// Returns a chunk by id.
    #[must_use]
    pub fn get(&self, id: ChunkId) -> Option<&MapChunk> {
        self.chunks.get(id.index()).and_then(Option::as_ref)
    }

    /// Returns a chunk by id, mutably.
    pub fn get_mut(&mut self, id: ChunkId) -> Option<&mut MapChunk> {
        self.chunks.get_mut(id.index()).and_then(Option::as_mut)
    }

    /// Number of chunks stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.chunks.iter().filter(|c| c.is_some()).count()
    }

    /// Returns true if no chunk is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunks.iter().all(Option::is_none)
    }

    /// Iterates over chunks in id order.
    pub fn iter(&self) -> impl Iterator<Item = &MapChunk> {
        self.chunks.iter().filter_map(Option::as_ref)
    }

    /// Iterates over leaf chunks in id order.
    pub fn leaves(&self) -> impl Iterator<Item = &MapChunk> {
        self.iter().filter(|c| c.is_leaf())
    }

    /// Ids of all stored chunks.
    #[must_use]
    pub fn ids(&self) -> Vec<ChunkId> {
        self.iter().map(MapChunk::id).collect()
    }

    /// Reads the block at `pos`, `None` outside the world.
    pub fn block(&self, pos: BlockPos) -> WorldResult<Option<MapBlock>> {
        match spatial::find_block(self, self.root, pos)? {
            Lookup::Hit(block) => Ok(Some(block)),
            Lookup::Miss => Ok(None),
            Lookup::Pending(id) => Err(WorldError::ChunkNotFound(id.raw())),
        }
    }

    /// Overwrites the block at `block.pos` in its leaf chunk.
    pub fn write_block(&mut self, block: &MapBlock) -> WorldResult<()> {
        let BlockPos { x, y, z, .. } = block.pos;
        let leaf = match spatial::find_chunk(self, self.root, x, y, z) {
            Lookup::Hit(id) => id,
            Lookup::Miss => {
                return Err(WorldError::OutOfWorld { x, y, z })
            },
            Lookup::Pending(id) => return Err(WorldError::ChunkNotFound(id.raw())),
        };
        let chunk = self
            .get_mut(leaf)
            .ok_or(WorldError::ChunkNotFound(leaf.raw()))?;
        let mut block = *block;
        block.parent = leaf;
        chunk.write_block(&block)
    }
}

impl ChunkSource for ChunkTable {
    fn chunk(&self, id: ChunkId) -> Option<&MapChunk> {
        self.get(id)
    }
}
