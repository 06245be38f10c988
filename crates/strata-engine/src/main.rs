//! # Strata Engine
//!
//! Host binary for the Strata world store.
//!
//! Ties the subsystems together:
//! - World: octree construction and the binary chunk layout
//! - Cache: per-entity caches over the directory backend
//! - Knowledge: read-only type records from a JSON document

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

mod config;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use strata_cache::{persist_table, Backend, Caches, DirBackend, JsonKnowledge, KnowledgeProvider};
use strata_common::{BlockPos, IdKind, ObjectIdAllocator};
use strata_world::{build_world, Direction, MapObject};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::{EngineConfig, CONFIG_FILE};

/// Main entry point.
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("strata=info".parse()?))
        .init();

    info!("Strata starting...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = EngineConfig::load();
    config.validate();
    if !Path::new(CONFIG_FILE).exists() {
        // First run: leave an editable copy of the defaults behind.
        if let Err(e) = config.save_to(CONFIG_FILE) {
            warn!("Failed to write default config: {e}");
        }
    }

    let table = build_world(&config.world_shape()).context("building world")?;
    let backend: Arc<dyn Backend> = Arc::new(
        DirBackend::open(&config.data_dir)
            .with_context(|| format!("opening data dir {}", config.data_dir.display()))?,
    );
    let knowledge: Arc<dyn KnowledgeProvider> = match &config.knowledge_path {
        Some(path) => Arc::new(
            JsonKnowledge::load(path)
                .with_context(|| format!("loading knowledge from {}", path.display()))?,
        ),
        None => Arc::new(JsonKnowledge::default()),
    };

    let caches = Caches::start(&config.cache, backend, knowledge);
    persist_table(&caches.chunks, &table).await?;

    let mut world = caches.world(config.map_id, table.root());
    let [dx, dy, dz] = config.dims;
    let corner = BlockPos::new(config.map_id, dx - 1, dy - 1, dz - 1);
    let Some(mut block) = world.block(corner).await? else {
        warn!("Far corner {corner:?} is outside the world");
        return Ok(());
    };
    info!("Block {corner:?} lives in chunk {}", block.parent);
    match world.neighbor(&block, Direction::WEST).await? {
        Some(west) => {
            info!("West of the far corner: {:?} in chunk {}", west.pos, west.parent);
        },
        None => info!("Far corner has no western neighbor"),
    }
    info!("{} chunks resident after lookups", world.resident_len());

    // Place a marker object on the corner; the block is saved with its leaf.
    let objects = ObjectIdAllocator::new(IdKind::Object);
    let marker = MapObject::new(objects.allocate()?, 1, corner);
    block.set_object(Some(marker.id))?;
    caches.objects.put(marker.id, marker).await?;
    world.write_block(&block).await?;

    // Write-behind traffic must land before the runtime goes away.
    loop {
        let stats = [
            ("chunks", caches.chunks.stats().await?),
            ("blocks", caches.blocks.stats().await?),
            ("objects", caches.objects.stats().await?),
            ("knowledge", caches.knowledge.stats().await?),
        ];
        if stats.iter().all(|(_, stats)| stats.pending_writes == 0) {
            for (name, stats) in stats {
                info!("{name} cache: {stats:?}");
            }
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    info!("Strata shutdown complete");
    Ok(())
}
