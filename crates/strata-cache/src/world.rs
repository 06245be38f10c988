//! Spatial queries over chunks pulled from the chunk cache.

use ahash::AHashMap;
use strata_common::{BlockPos, ChunkId, CodecResult, MapId, WorldError};
use strata_world::{
    find_block, find_chunk, get_neighbor, ChunkSource, ChunkTable, Direction, Lookup, MapBlock,
    MapChunk,
};
use tracing::{debug, info};

use crate::actor::CacheHandle;
use crate::error::CacheResult;

/// Chunks a [`CachedWorld`] keeps before it drops them.
pub const DEFAULT_RESIDENT_CAPACITY: usize = 1024;

/// Smallest resident capacity: the longest root-to-leaf path of a `u16`
/// world with room to spare.
pub const MIN_RESIDENT_CAPACITY: usize = 32;

/// A world reader backed by the chunk cache.
///
/// Lookups run against the chunks already pulled in. When one reports a
/// chunk as pending, the reader loads it through the cache and runs the
/// lookup again from the start. Once `capacity` chunks are resident, the
/// next load drops all of them except the root.
///
/// With a block cache attached, every loaded leaf is copied into it and
/// block reads try it first. Block writes always go through the owning leaf
/// chunk, which is what gets persisted.
#[derive(Debug)]
pub struct CachedWorld {
    chunks: CacheHandle<MapChunk>,
    blocks: Option<(CacheHandle<MapBlock>, MapId)>,
    root: ChunkId,
    resident: AHashMap<ChunkId, MapChunk>,
    capacity: usize,
}

impl CachedWorld {
    /// Creates a reader for the world rooted at `root`.
    #[must_use]
    pub fn new(chunks: CacheHandle<MapChunk>, root: ChunkId) -> Self {
        Self {
            chunks,
            blocks: None,
            root,
            resident: AHashMap::new(),
            capacity: DEFAULT_RESIDENT_CAPACITY,
        }
    }

    /// Keeps `blocks` filled with the blocks of map `map` this reader loads
    /// or writes.
    #[must_use]
    pub fn with_blocks(mut self, blocks: CacheHandle<MapBlock>, map: MapId) -> Self {
        self.blocks = Some((blocks, map));
        self
    }

    /// Caps the number of resident chunks, at least [`MIN_RESIDENT_CAPACITY`].
    #[must_use]
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(MIN_RESIDENT_CAPACITY);
        self
    }

    /// Root chunk id.
    #[must_use]
    pub const fn root(&self) -> ChunkId {
        self.root
    }

    /// Resident chunk limit.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of chunks pulled in so far.
    #[must_use]
    pub fn resident_len(&self) -> usize {
        self.resident.len()
    }

    /// Forgets every pulled-in chunk.
    pub fn release(&mut self) {
        self.resident.clear();
    }

    /// Id of the leaf chunk owning `(x, y, z)`, `None` outside the world.
    pub async fn find_chunk(&mut self, x: u16, y: u16, z: u16) -> CacheResult<Option<ChunkId>> {
        loop {
            match find_chunk(&*self, self.root, x, y, z) {
                Lookup::Hit(id) => return Ok(Some(id)),
                Lookup::Miss => return Ok(None),
                Lookup::Pending(id) => self.load(id).await?,
            }
        }
    }

    /// Block at `pos`, `None` outside the world.
    pub async fn block(&mut self, pos: BlockPos) -> CacheResult<Option<MapBlock>> {
        if let Some((blocks, _)) = &self.blocks {
            if let Some(block) = blocks.get(pos).await? {
                return Ok(Some(block));
            }
        }
        self.block_from_chunks(pos).await
    }

    /// Block next to `block` in `direction`, `None` past the world edge.
    pub async fn neighbor(
        &mut self,
        block: &MapBlock,
        direction: Direction,
    ) -> CacheResult<Option<MapBlock>> {
        loop {
            match get_neighbor(&*self, block, direction, block.parent)? {
                Lookup::Hit(found) => return Ok(Some(found)),
                Lookup::Miss => return Ok(None),
                Lookup::Pending(id) => self.load(id).await?,
            }
        }
    }

    /// Writes `block` into its leaf chunk and stores the chunk back through
    /// the chunk cache. Returns the block as stored, owned by its leaf.
    pub async fn write_block(&mut self, block: &MapBlock) -> CacheResult<MapBlock> {
        let pos = block.pos;
        let Some(current) = self.block_from_chunks(pos).await? else {
            return Err(WorldError::OutOfWorld {
                x: pos.x,
                y: pos.y,
                z: pos.z,
            }
            .into());
        };
        let mut stored = *block;
        stored.parent = current.parent;

        // The lookup above just read the leaf, so it is resident.
        let leaf = self
            .resident
            .get_mut(&stored.parent)
            .ok_or(WorldError::ChunkNotFound(stored.parent.raw()))?;
        leaf.write_block(&stored)?;
        let leaf = leaf.clone();
        self.chunks.put(leaf.id(), leaf).await?;
        if let Some((blocks, _)) = &self.blocks {
            blocks.put(pos, stored).await?;
        }
        Ok(stored)
    }

    async fn block_from_chunks(&mut self, pos: BlockPos) -> CacheResult<Option<MapBlock>> {
        loop {
            match find_block(&*self, self.root, pos)? {
                Lookup::Hit(block) => return Ok(Some(block)),
                Lookup::Miss => return Ok(None),
                Lookup::Pending(id) => self.load(id).await?,
            }
        }
    }

    async fn load(&mut self, id: ChunkId) -> CacheResult<()> {
        if self.resident.len() >= self.capacity {
            debug!("Dropping {} resident chunks", self.resident.len());
            let root = self.resident.remove(&self.root);
            self.resident.clear();
            if let Some(root) = root {
                self.resident.insert(self.root, root);
            }
        }

        debug!("Pulling chunk {id} into cached world");
        let chunk = self
            .chunks
            .get(id)
            .await?
            .ok_or(WorldError::ChunkNotFound(id.raw()))?;
        if let (Some((blocks, map)), true) = (&self.blocks, chunk.is_leaf()) {
            let loaded = chunk.blocks(*map).collect::<CodecResult<Vec<_>>>()?;
            blocks.puts(loaded).await?;
        }
        self.resident.insert(id, chunk);
        Ok(())
    }
}

impl ChunkSource for CachedWorld {
    fn chunk(&self, id: ChunkId) -> Option<&MapChunk> {
        self.resident.get(&id)
    }
}

/// Writes every chunk of `table` to the chunk cache in one batch.
pub async fn persist_table(chunks: &CacheHandle<MapChunk>, table: &ChunkTable) -> CacheResult<()> {
    let all: Vec<MapChunk> = table.iter().cloned().collect();
    info!("Persisting {} chunks of map {}", all.len(), table.map());
    chunks.puts(all).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Backend, MemoryBackend};
    use crate::caches::{chunk_cache, Caches};
    use crate::knowledge::JsonKnowledge;
    use crate::entity::Entity;
    use crate::error::CacheError;
    use crate::settings::CacheSettings;
    use std::sync::Arc;
    use strata_world::{build_world, WorldShape};

    async fn setup(dims: [u16; 3]) -> (Arc<MemoryBackend>, ChunkTable, CacheHandle<MapChunk>) {
        let backend = Arc::new(MemoryBackend::new());
        let table = build_world(&WorldShape::new(0, dims, 8)).expect("world");
        let chunks = chunk_cache(&CacheSettings::default(), Arc::clone(&backend));
        persist_table(&chunks, &table).await.expect("persist");
        (backend, table, chunks)
    }

    #[tokio::test]
    async fn test_pending_chunks_are_pulled_in() {
        let (backend, table, chunks) = setup([32, 32, 32]).await;
        let mut world = CachedWorld::new(chunks, table.root());

        let pos = BlockPos::new(0, 25, 9, 17);
        let block = world.block(pos).await.expect("lookup").expect("inside");
        assert_eq!(block, table.block(pos).expect("decode").expect("inside"));
        // root, one internal chunk, one leaf
        assert_eq!(world.resident_len(), 3);
        // everything came from cache memory, nothing from the backend
        assert_eq!(backend.gets(), 0);

        assert_eq!(world.block(BlockPos::new(0, 32, 0, 0)).await.expect("lookup"), None);
    }

    #[tokio::test]
    async fn test_neighbor_across_chunks() {
        let (_, table, chunks) = setup([16, 16, 16]).await;
        let mut world = CachedWorld::new(chunks, table.root());

        let edge = world.block(BlockPos::new(0, 7, 0, 0)).await.expect("lookup").expect("inside");
        let east = world.neighbor(&edge, Direction::EAST).await.expect("lookup").expect("inside");
        assert_eq!(east.pos, BlockPos::new(0, 8, 0, 0));
        assert_ne!(east.parent, edge.parent);

        let origin = world.block(BlockPos::new(0, 0, 0, 0)).await.expect("lookup").expect("inside");
        assert_eq!(world.neighbor(&origin, Direction::WEST).await.expect("lookup"), None);

        let leaf = world.find_chunk(8, 0, 0).await.expect("lookup");
        assert_eq!(leaf, Some(east.parent));
    }

    #[tokio::test]
    async fn test_evicted_chunks_reload_from_backend() {
        let (backend, table, chunks) = setup([16, 16, 16]).await;
        for _ in 0..200 {
            if backend.sets() == table.len() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        for id in table.ids() {
            chunks.evict(id).await.expect("evict");
        }

        let mut world = CachedWorld::new(chunks, table.root());
        assert!(world.block(BlockPos::new(0, 15, 15, 15)).await.expect("lookup").is_some());
        assert_eq!(backend.gets(), 2);
    }

    async fn drain(chunks: &CacheHandle<MapChunk>) {
        for _ in 0..500 {
            if chunks.stats().await.expect("stats").pending_writes == 0 {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        panic!("chunk writes never drained");
    }

    fn start(backend: &Arc<MemoryBackend>) -> Caches {
        let backend: Arc<dyn Backend> = backend.clone();
        Caches::start(&CacheSettings::default(), backend, Arc::new(JsonKnowledge::default()))
    }

    #[tokio::test]
    async fn test_block_write_survives_restart() {
        let backend = Arc::new(MemoryBackend::new());
        let table = build_world(&WorldShape::new(0, [16, 16, 16], 8)).expect("world");
        let pos = BlockPos::new(0, 12, 3, 9);

        {
            let caches = start(&backend);
            persist_table(&caches.chunks, &table).await.expect("persist");
            let mut world = caches.world(0, table.root());
            let block = world.block(pos).await.expect("lookup").expect("inside");
            let stored = world
                .write_block(&block.with_material(9))
                .await
                .expect("write");
            assert_eq!(stored.parent, block.parent);

            world.release();
            let reread = world.block(pos).await.expect("lookup").expect("inside");
            assert_eq!(reread.material, 9);
            drain(&caches.chunks).await;
        }

        let caches = start(&backend);
        let mut world = caches.world(0, table.root());
        assert_eq!(caches.blocks.get(pos).await.expect("get"), None);
        let reloaded = world.block(pos).await.expect("lookup").expect("inside");
        assert_eq!(reloaded.material, 9);
        assert_eq!(
            caches.blocks.get(pos).await.expect("get").map(|b| b.material),
            Some(9)
        );
        assert!(backend.peek("block", &[0, 0, 0, 12, 0, 3, 0, 9]).is_none());
    }

    #[tokio::test]
    async fn test_loaded_leaves_fill_block_cache() {
        let backend = Arc::new(MemoryBackend::new());
        let table = build_world(&WorldShape::new(0, [16, 16, 16], 8)).expect("world");
        let caches = start(&backend);
        persist_table(&caches.chunks, &table).await.expect("persist");
        let mut world = caches.world(0, table.root());

        world.block(BlockPos::new(0, 1, 1, 1)).await.expect("lookup");
        assert_eq!(caches.blocks.stats().await.expect("stats").len, 512);
        let resident = world.resident_len();

        let block = world.block(BlockPos::new(0, 7, 7, 7)).await.expect("lookup");
        assert_eq!(block, table.block(BlockPos::new(0, 7, 7, 7)).expect("decode"));
        assert_eq!(world.resident_len(), resident);
        assert_eq!(caches.blocks.stats().await.expect("stats").hits, 1);
    }

    #[tokio::test]
    async fn test_resident_chunks_are_bounded() {
        let (_, table, chunks) = setup([32, 32, 32]).await;
        let mut world = CachedWorld::new(chunks, table.root()).with_capacity(10);
        assert_eq!(world.capacity(), MIN_RESIDENT_CAPACITY);

        for z in (0..32).step_by(8) {
            for y in (0..32).step_by(8) {
                for x in (0..32).step_by(8) {
                    let pos = BlockPos::new(0, x, y, z);
                    let block = world.block(pos).await.expect("lookup");
                    assert_eq!(block, table.block(pos).expect("decode"));
                    assert!(world.resident_len() <= MIN_RESIDENT_CAPACITY);
                }
            }
        }
    }

    #[tokio::test]
    async fn test_write_outside_world_is_an_error() {
        let (_, table, chunks) = setup([16, 16, 16]).await;
        let mut world = CachedWorld::new(chunks, table.root());
        let outside = MapBlock::empty(BlockPos::new(0, 16, 0, 0), table.root());
        assert!(matches!(
            world.write_block(&outside).await,
            Err(CacheError::World(WorldError::OutOfWorld { x: 16, .. }))
        ));
    }

    #[tokio::test]
    async fn test_missing_chunk_is_an_error() {
        let backend = Arc::new(MemoryBackend::new());
        let chunks = chunk_cache(&CacheSettings::default(), backend);
        let mut world = CachedWorld::new(chunks, ChunkId::from_raw(1));
        assert!(matches!(
            world.block(BlockPos::new(0, 0, 0, 0)).await,
            Err(CacheError::World(WorldError::ChunkNotFound(1)))
        ));
        assert_eq!(MapChunk::KIND, "chunk");
    }
}
