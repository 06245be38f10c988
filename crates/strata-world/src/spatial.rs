//! Spatial lookups over the chunk octree.
//!
//! Every lookup is synchronous and reads only chunks handed out by a
//! [`ChunkSource`]. When a needed chunk is not resident the lookup stops with
//! [`Lookup::Pending`]; the caller loads that chunk and runs the lookup again.
//! Points outside the world volume are a [`Lookup::Miss`], never a panic.

use strata_common::{BlockPos, ChunkId, ChunkPos, CodecResult};

use crate::block::MapBlock;
use crate::chunk::MapChunk;
use crate::direction::Direction;
use crate::table::ChunkSource;

/// Outcome of a spatial lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup<T> {
    /// Found
    Hit(T),
    /// Nothing there (outside the world, no such child)
    Miss,
    /// The chunk with this id must be loaded before the lookup can finish
    Pending(ChunkId),
}

impl<T> Lookup<T> {
    /// Converts a hit into `Some`, anything else into `None`.
    pub fn hit(self) -> Option<T> {
        match self {
            Self::Hit(value) => Some(value),
            Self::Miss | Self::Pending(_) => None,
        }
    }

    /// Checks for a miss.
    pub const fn is_miss(&self) -> bool {
        matches!(self, Self::Miss)
    }

    /// Maps the hit value.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Lookup<U> {
        match self {
            Self::Hit(value) => Lookup::Hit(f(value)),
            Self::Miss => Lookup::Miss,
            Self::Pending(id) => Lookup::Pending(id),
        }
    }
}

/// Borrows a resident chunk or returns `Pending` from the enclosing function.
macro_rules! resident {
    ($source:expr, $id:expr $(, $wrap:path)?) => {
        match $source.chunk($id) {
            Some(chunk) => chunk,
            None => return $($wrap)?(Lookup::Pending($id)),
        }
    };
}

/// Descends from `root` to the leaf chunk containing `(x, y, z)`.
///
/// A point outside the root volume is a miss.
pub fn find_chunk<S: ChunkSource + ?Sized>(
    source: &S,
    root: ChunkId,
    x: u16,
    y: u16,
    z: u16,
) -> Lookup<ChunkId> {
    let mut id = root;
    let chunk = resident!(source, id);
    if !chunk.pos().contains(x, y, z) {
        return Lookup::Miss;
    }
    loop {
        let chunk = resident!(source, id);
        if chunk.is_leaf() {
            return Lookup::Hit(id);
        }
        match chunk.children().iter().find(|child| child.pos.contains(x, y, z)) {
            Some(child) => id = child.id,
            None => return Lookup::Miss,
        }
    }
}

/// Finds the block at `pos`, starting the search at chunk `from`.
///
/// Ascends through parents while `pos` lies outside the current chunk (a miss
/// once the root is passed), then descends to the owning leaf and decodes the
/// record at `z·sx·sy + y·sx + x` relative to the leaf origin.
pub fn find_block<S: ChunkSource + ?Sized>(
    source: &S,
    from: ChunkId,
    pos: BlockPos,
) -> CodecResult<Lookup<MapBlock>> {
    let mut id = from;
    loop {
        let chunk = resident!(source, id, Ok);
        if chunk.pos().contains_pos(pos) {
            break;
        }
        if chunk.is_root() {
            return Ok(Lookup::Miss);
        }
        id = chunk.parent();
    }

    let leaf = match find_chunk(source, id, pos.x, pos.y, pos.z) {
        Lookup::Hit(leaf) => leaf,
        Lookup::Miss => return Ok(Lookup::Miss),
        Lookup::Pending(missing) => return Ok(Lookup::Pending(missing)),
    };
    let chunk = resident!(source, leaf, Ok);
    Ok(match chunk.block_at(pos)? {
        Some(block) => Lookup::Hit(block),
        None => Lookup::Miss,
    })
}

/// Returns the child of `chunk` whose volume is exactly `start..end`, or
/// [`ChunkId::NONE`].
#[must_use]
pub fn find_child(chunk: &MapChunk, start: [u16; 3], end: [u16; 3]) -> ChunkId {
    chunk
        .children()
        .iter()
        .find(|child| child.pos.start == start && child.pos.end == end)
        .map_or(ChunkId::NONE, |child| child.id)
}

/// Resolves a volume to the chunk that covers exactly that volume, searching
/// down from `root`.
pub fn resolve_box<S: ChunkSource + ?Sized>(
    source: &S,
    root: ChunkId,
    target: &ChunkPos,
) -> Lookup<ChunkId> {
    let mut id = root;
    let chunk = resident!(source, id);
    if chunk.pos() == target {
        return Lookup::Hit(id);
    }
    if !chunk.pos().contains_box(target) {
        return Lookup::Miss;
    }
    loop {
        let chunk = resident!(source, id);
        let exact = find_child(chunk, target.start, target.end);
        if exact.is_some() {
            return Lookup::Hit(exact);
        }
        match chunk.children().iter().find(|child| child.pos.contains_box(target)) {
            Some(child) => id = child.id,
            None => return Lookup::Miss,
        }
    }
}

/// Returns the block one step from `block` in `direction`.
///
/// `owner` is the chunk that holds `block`. Stepping below zero on any axis
/// is a miss: the world origin is a hard boundary.
pub fn get_neighbor<S: ChunkSource + ?Sized>(
    source: &S,
    block: &MapBlock,
    direction: Direction,
    owner: ChunkId,
) -> CodecResult<Lookup<MapBlock>> {
    let (dx, dy, dz) = direction.offset();
    let Some(target) = block.pos.offset(dx, dy, dz) else {
        return Ok(Lookup::Miss);
    };

    let chunk = resident!(source, owner, Ok);
    if chunk.pos().contains_pos(target) {
        if let Some(found) = chunk.block_at(target)? {
            return Ok(Lookup::Hit(found));
        }
        return find_block(source, owner, target);
    }
    if chunk.is_root() {
        return Ok(Lookup::Miss);
    }
    find_block(source, chunk.parent(), target)
}
