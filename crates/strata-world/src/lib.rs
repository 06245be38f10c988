//! # Strata World
//!
//! Octree chunk/block store for Strata maps.
//!
//! This crate handles:
//! - The fixed-layout binary encoding of blocks and chunks
//! - Spatial lookups over resident chunks (point, box and neighbor queries)
//! - World construction: octree split and the 26-direction neighbor graph
//! - Generic map objects

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

pub mod block;
pub mod chunk;
pub mod direction;
pub mod object;
pub mod octree;
pub mod spatial;
pub mod table;

mod wire;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::block::*;
    pub use crate::chunk::*;
    pub use crate::direction::*;
    pub use crate::object::*;
    pub use crate::octree::*;
    pub use crate::spatial::*;
    pub use crate::table::*;
}

pub use prelude::*;
