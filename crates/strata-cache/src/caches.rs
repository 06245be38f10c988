//! The concrete caches of a world: chunks, blocks, map objects, knowledge.

use std::sync::Arc;

use strata_common::{ChunkId, MapId};
use strata_world::{MapBlock, MapChunk, MapObject};
use tracing::info;

use crate::actor::{CacheBuilder, CacheHandle, CacheOptions, SetupPolicy, WritePolicy};
use crate::backend::Backend;
use crate::entity::{DetachedSource, Record, RecordSource, Source};
use crate::error::BackendError;
use crate::knowledge::{KnowledgeProvider, KnowledgeSet, KnowledgeSource};
use crate::settings::CacheSettings;
use crate::store::{EternalStore, LruStore};
use crate::world::CachedWorld;

/// Builds the source of a record cache once the backend has prepared `E::KIND`.
async fn prepare_records<E: Record, B: Backend + ?Sized>(
    backend: Arc<B>,
) -> Result<Arc<dyn Source<E>>, BackendError> {
    let prepared = Arc::clone(&backend);
    tokio::task::spawn_blocking(move || prepared.prepare(E::KIND))
        .await
        .map_err(|e| BackendError::Unavailable(format!("prepare task failed: {e}")))??;
    Ok(Arc::new(RecordSource::new(backend)))
}

/// LRU chunk cache, loading misses from the backend, write-behind.
pub fn chunk_cache<B: Backend + ?Sized>(
    settings: &CacheSettings,
    backend: Arc<B>,
) -> CacheHandle<MapChunk> {
    CacheBuilder::new(
        CacheOptions::from_settings(settings),
        LruStore::new(settings.chunk_capacity),
    )
    .spawn(prepare_records(backend))
}

/// Eternal block cache: a memory miss means the block is absent.
///
/// Blocks are persisted with their leaf chunk, so the cache never touches a
/// backend. [`CachedWorld`] fills it from every leaf it loads and keeps it in
/// step with block writes.
pub fn block_cache(settings: &CacheSettings) -> CacheHandle<MapBlock> {
    let source: Arc<dyn Source<MapBlock>> = Arc::new(DetachedSource);
    CacheBuilder::new(
        CacheOptions {
            fetch_on_miss: false,
            write_policy: WritePolicy::MemoryOnly,
            ..CacheOptions::from_settings(settings)
        },
        EternalStore::new(),
    )
    .spawn(std::future::ready(Ok(source)))
}

/// LRU map object cache, loading misses from the backend, write-behind.
pub fn object_cache<B: Backend + ?Sized>(
    settings: &CacheSettings,
    backend: Arc<B>,
) -> CacheHandle<MapObject> {
    CacheBuilder::new(
        CacheOptions::from_settings(settings),
        LruStore::new(settings.object_capacity),
    )
    .spawn(prepare_records(backend))
}

/// Eternal, read-only knowledge cache, loading each type once from `provider`.
pub fn knowledge_cache<P: KnowledgeProvider + ?Sized>(
    settings: &CacheSettings,
    provider: Arc<P>,
) -> CacheHandle<KnowledgeSet> {
    let source: Arc<dyn Source<KnowledgeSet>> = Arc::new(KnowledgeSource::new(provider));
    CacheBuilder::new(
        CacheOptions {
            read_only: true,
            setup_policy: SetupPolicy::FailRequests,
            ..CacheOptions::from_settings(settings)
        },
        EternalStore::new(),
    )
    .spawn(std::future::ready(Ok(source)))
}

/// Handles to every cache of one world.
#[derive(Debug, Clone)]
pub struct Caches {
    /// Chunk cache
    pub chunks: CacheHandle<MapChunk>,
    /// Block cache
    pub blocks: CacheHandle<MapBlock>,
    /// Map object cache
    pub objects: CacheHandle<MapObject>,
    /// Knowledge cache
    pub knowledge: CacheHandle<KnowledgeSet>,
}

impl Caches {
    /// Starts all caches over one backend and one knowledge provider.
    pub fn start(
        settings: &CacheSettings,
        backend: Arc<dyn Backend>,
        knowledge: Arc<dyn KnowledgeProvider>,
    ) -> Self {
        info!("Starting world caches");
        Self {
            chunks: chunk_cache(settings, Arc::clone(&backend)),
            blocks: block_cache(settings),
            objects: object_cache(settings, backend),
            knowledge: knowledge_cache(settings, knowledge),
        }
    }

    /// A reader over the world rooted at `root`, keeping the block cache in
    /// step with the chunks it loads and writes.
    #[must_use]
    pub fn world(&self, map: MapId, root: ChunkId) -> CachedWorld {
        CachedWorld::new(self.chunks.clone(), root).with_blocks(self.blocks.clone(), map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DirBackend, MemoryBackend};
    use crate::entity::Entity;
    use crate::error::CacheError;
    use crate::knowledge::JsonKnowledge;
    use strata_common::{BlockPos, ChunkId, ChunkPos};
    use strata_world::{build_world, WorldShape};
    use tempfile::TempDir;

    fn knowledge() -> Arc<JsonKnowledge> {
        Arc::new(JsonKnowledge::parse(r#"{"materials": [{"id": 5}]}"#).expect("parse"))
    }

    #[tokio::test]
    async fn test_chunks_persist_through_dir_backend() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let settings = CacheSettings::default();
        let table = build_world(&WorldShape::new(0, [16, 16, 16], 8)).expect("world");

        {
            let backend = Arc::new(DirBackend::open(temp_dir.path()).expect("open"));
            let chunks = chunk_cache(&settings, backend);
            chunks
                .puts(table.iter().cloned().collect())
                .await
                .expect("puts");
            // The batch write is behind; wait for it to land on disk.
            let last = backend_path(temp_dir.path(), ChunkId::from_raw(9));
            for _ in 0..200 {
                if last.exists() {
                    break;
                }
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        }

        let reopened = Arc::new(DirBackend::open(temp_dir.path()).expect("open"));
        let chunks = chunk_cache(&settings, reopened);
        let root = chunks.get(table.root()).await.expect("get").expect("stored");
        assert_eq!(&root, table.get(table.root()).expect("root"));
        assert_eq!(chunks.get(ChunkId::from_raw(100)).await.expect("get"), None);
    }

    fn backend_path(root: &std::path::Path, id: ChunkId) -> std::path::PathBuf {
        DirBackend::open(root)
            .expect("open")
            .record_path(MapChunk::KIND, &MapChunk::key_bytes(&id))
    }

    #[tokio::test]
    async fn test_block_cache_is_eternal() {
        let blocks = block_cache(&CacheSettings::default());
        let pos = BlockPos::new(0, 0, 0, 1);

        assert_eq!(blocks.get(pos).await.expect("get"), None);
        let block = MapBlock::empty(pos, ChunkId::from_raw(2)).with_material(5);
        blocks.put(pos, block).await.expect("put");
        assert_eq!(blocks.get(pos).await.expect("get"), Some(block));

        let stats = blocks.stats().await.expect("stats");
        assert_eq!(stats.fetches, 0);
        assert_eq!(stats.writes, 0);
    }

    #[tokio::test]
    async fn test_knowledge_cache_is_read_only() {
        let cache = knowledge_cache(&CacheSettings::default(), knowledge());
        let set = cache
            .get("materials".to_string())
            .await
            .expect("get")
            .expect("known");
        assert_eq!(set.len(), 1);
        assert_eq!(cache.get("weather".to_string()).await.expect("get"), None);
        assert!(matches!(
            cache.put("materials".to_string(), set).await,
            Err(CacheError::ReadOnly("knowledge"))
        ));
    }

    #[tokio::test]
    async fn test_setup_failure_surfaces() {
        let backend = Arc::new(MemoryBackend::new());
        backend.set_offline(true);
        let objects = object_cache(&CacheSettings::default(), backend);
        let id = strata_common::ObjectId::new(1, strata_common::IdKind::Object);
        let result = objects.get(id).await;
        assert!(
            matches!(result, Err(CacheError::Setup(_)) | Err(CacheError::Closed)),
            "unexpected {result:?}"
        );
    }

    #[tokio::test]
    async fn test_start_all() {
        let backend: Arc<dyn Backend> = Arc::new(MemoryBackend::new());
        let caches = Caches::start(&CacheSettings::default(), backend, knowledge());
        let pos = ChunkPos::new([0, 0, 0], [4, 4, 4]).expect("valid extent");
        let chunk = MapChunk::new(ChunkId::from_raw(1), ChunkId::NONE, 4, pos, 0).expect("chunk");
        caches.chunks.put(chunk.id(), chunk.clone()).await.expect("put");
        assert_eq!(caches.chunks.get(chunk.id()).await.expect("get"), Some(chunk));
        assert!(caches.knowledge.get("materials".into()).await.expect("get").is_some());
        assert_eq!(caches.objects.stats().await.expect("stats").len, 0);
        assert!(!caches.blocks.is_closed());
    }
}
