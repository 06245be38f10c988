//! # Strata Common
//!
//! Common types shared by the Strata world store and its caches:
//! - Block and chunk coordinate types
//! - Chunk and object ids with explicit capacity bounds
//! - Property bitsets
//! - Codec and world error types
//! - Prelude for convenient imports

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

pub mod coords;
pub mod error;
pub mod ids;
pub mod properties;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::coords::*;
    pub use crate::error::*;
    pub use crate::ids::*;
    pub use crate::properties::*;
}

pub use prelude::*;

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn test_local_index_roundtrip(
            sx in 1u16..16, sy in 1u16..16, sz in 1u16..16,
            ox in 0u16..1000, oy in 0u16..1000, oz in 0u16..1000,
            seed in any::<usize>(),
        ) {
            let pos = ChunkPos::from_origin([ox, oy, oz], [sx, sy, sz]).expect("valid extent");
            let index = seed % pos.volume();
            let [x, y, z] = pos.position_of(index).expect("index in range");
            prop_assert!(pos.contains(x, y, z));
            prop_assert_eq!(pos.local_index(x, y, z), Some(index));
        }

        #[test]
        fn test_object_id_roundtrip(serial in any::<u32>(), chunk in any::<bool>()) {
            let kind = if chunk { IdKind::Chunk } else { IdKind::Object };
            let id = ObjectId::new(serial, kind);
            prop_assert_eq!(id.serial(), serial);
            prop_assert_eq!(id.kind(), kind);
            prop_assert_eq!(ObjectId::from_raw(id.raw()), id);
        }
    }
}
