//! ID types for chunks and map objects.
//!
//! Chunk ids are 16-bit serials: `0` is reserved as the "no chunk" sentinel,
//! so one world holds at most [`ChunkId::CAPACITY`] chunks. Object ids pack a
//! 32-bit serial and a one-bit kind flag into 64 bits.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::WorldError;

/// Identifier of a chunk node in the octree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct ChunkId(u16);

impl ChunkId {
    /// Sentinel: no chunk (root parent, empty neighbor, lookup miss).
    pub const NONE: Self = Self(0);

    /// Largest number of chunks a single world can hold.
    pub const CAPACITY: usize = u16::MAX as usize;

    /// Creates a chunk ID from a raw value.
    #[must_use]
    pub const fn from_raw(value: u16) -> Self {
        Self(value)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn raw(self) -> u16 {
        self.0
    }

    /// Checks if this is a real chunk (not the sentinel).
    #[must_use]
    pub const fn is_some(self) -> bool {
        self.0 != 0
    }

    /// Checks if this is the sentinel.
    #[must_use]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }

    /// Index into dense per-chunk tables.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for ChunkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Serial allocator for chunk ids. The first id handed out is `1`.
#[derive(Debug)]
pub struct ChunkIdAllocator {
    next: u32,
}

impl Default for ChunkIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkIdAllocator {
    /// Creates an allocator starting at id `1`.
    #[must_use]
    pub const fn new() -> Self {
        Self { next: 1 }
    }

    /// Hands out the next id.
    pub fn allocate(&mut self) -> Result<ChunkId, WorldError> {
        let raw = u16::try_from(self.next).map_err(|_| WorldError::IdSpaceExhausted {
            capacity: ChunkId::CAPACITY,
        })?;
        self.next += 1;
        Ok(ChunkId(raw))
    }

    /// Number of ids handed out so far.
    #[must_use]
    pub const fn allocated(&self) -> usize {
        (self.next - 1) as usize
    }
}

/// Kind flag stored in the low bit of an [`ObjectId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IdKind {
    /// A free-standing map object (building, plant, person...)
    Object,
    /// A chunk-attached record
    Chunk,
}

/// Identifier of a map object: `serial << 1 | kind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(u64);

impl ObjectId {
    /// Largest serial representable per kind.
    pub const MAX_SERIAL: u32 = u32::MAX;

    /// Packs a serial and a kind flag.
    #[must_use]
    pub const fn new(serial: u32, kind: IdKind) -> Self {
        let flag = match kind {
            IdKind::Object => 0,
            IdKind::Chunk => 1,
        };
        Self(((serial as u64) << 1) | flag)
    }

    /// Creates an object ID from its packed value.
    #[must_use]
    pub const fn from_raw(value: u64) -> Self {
        Self(value)
    }

    /// Returns the packed value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Returns the serial part.
    #[must_use]
    pub const fn serial(self) -> u32 {
        (self.0 >> 1) as u32
    }

    /// Returns the kind flag.
    #[must_use]
    pub const fn kind(self) -> IdKind {
        if self.0 & 1 == 0 {
            IdKind::Object
        } else {
            IdKind::Chunk
        }
    }
}

/// Thread-safe serial source for object ids of one kind.
#[derive(Debug)]
pub struct ObjectIdAllocator {
    kind: IdKind,
    next: AtomicU64,
}

impl ObjectIdAllocator {
    /// Creates an allocator whose first serial is `1`.
    #[must_use]
    pub const fn new(kind: IdKind) -> Self {
        Self {
            kind,
            next: AtomicU64::new(1),
        }
    }

    /// Creates an allocator that resumes after `last` (e.g. after loading a save).
    #[must_use]
    pub fn resume_after(kind: IdKind, last: u32) -> Self {
        Self {
            kind,
            next: AtomicU64::new(u64::from(last) + 1),
        }
    }

    /// Hands out the next id, failing once the 32-bit serial space is used up.
    pub fn allocate(&self) -> Result<ObjectId, WorldError> {
        let serial = self.next.fetch_add(1, Ordering::Relaxed);
        let serial = u32::try_from(serial).map_err(|_| WorldError::IdSpaceExhausted {
            capacity: ObjectId::MAX_SERIAL as usize,
        })?;
        Ok(ObjectId::new(serial, self.kind))
    }
}
