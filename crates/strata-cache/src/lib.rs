//! # Strata Cache
//!
//! Cache-aside layer between Strata worlds and their persistent store.
//!
//! This crate handles:
//! - Single-writer cache tasks with startup stash and async backend loads
//! - LRU and eternal memory stores
//! - Record backends (in-memory, directory) and the knowledge provider
//! - The chunk, block, object and knowledge caches of a world
//! - Spatial queries that pull chunks through the chunk cache

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

pub mod actor;
pub mod backend;
pub mod caches;
pub mod entity;
pub mod error;
pub mod knowledge;
pub mod settings;
pub mod store;
pub mod world;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::actor::*;
    pub use crate::backend::*;
    pub use crate::caches::*;
    pub use crate::entity::*;
    pub use crate::error::*;
    pub use crate::knowledge::*;
    pub use crate::settings::*;
    pub use crate::store::*;
    pub use crate::world::*;
}

pub use prelude::*;
