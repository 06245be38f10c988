//! World construction: octree split and neighbor graph.
//!
//! The root covers the whole map. Every chunk whose extent exceeds the chunk
//! size on some axis is halved along those axes, giving up to eight octants.
//! Once all chunks exist, each one gets its 26 neighbor ids by shifting its
//! own volume by ± its extent and resolving the shifted volume from the root.

use strata_common::{ChunkId, ChunkIdAllocator, ChunkPos, MapId, WorldError, WorldResult};
use tracing::{debug, info};

use crate::chunk::{ChildEntry, MapChunk};
use crate::direction::{Direction, DIRECTION_COUNT};
use crate::spatial::{resolve_box, Lookup};
use crate::table::ChunkTable;

/// Dimensions of a world to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorldShape {
    /// Map id stamped on every block position
    pub map: MapId,
    /// World size along x, y, z
    pub dims: [u16; 3],
    /// Leaf edge length
    pub chunk_size: u16,
}

impl WorldShape {
    /// Creates a world shape.
    #[must_use]
    pub const fn new(map: MapId, dims: [u16; 3], chunk_size: u16) -> Self {
        Self {
            map,
            dims,
            chunk_size,
        }
    }

    /// Checks that every axis halves cleanly down to the chunk size.
    ///
    /// An axis is accepted when it is at most `chunk_size` (never split) or
    /// exactly `chunk_size × 2^k`.
    pub fn validate(&self) -> WorldResult<()> {
        let uneven = WorldError::UnevenDimensions {
            dims: self.dims,
            chunk_size: self.chunk_size,
        };
        if self.chunk_size == 0 {
            return Err(uneven);
        }
        for &d in &self.dims {
            if d == 0 {
                return Err(uneven);
            }
            if d <= self.chunk_size {
                continue;
            }
            if d % self.chunk_size != 0 || !(d / self.chunk_size).is_power_of_two() {
                return Err(uneven);
            }
        }
        Ok(())
    }

    /// Volume covered by the root chunk.
    pub fn root_pos(&self) -> WorldResult<ChunkPos> {
        Ok(ChunkPos::from_origin([0, 0, 0], self.dims)?)
    }
}

/// Splits a volume into its octants, halving only the axes longer than
/// `chunk_size`. Order is z slowest, x fastest.
#[must_use]
pub fn octants(pos: &ChunkPos, chunk_size: u16) -> Vec<ChunkPos> {
    let extent = pos.extent();
    let mut ranges: [Vec<(u16, u16)>; 3] = Default::default();
    for axis in 0..3 {
        let (start, end) = (pos.start[axis], pos.end[axis]);
        ranges[axis] = if extent[axis] > chunk_size {
            let mid = start + extent[axis] / 2;
            vec![(start, mid), (mid, end)]
        } else {
            vec![(start, end)]
        };
    }

    let mut out = Vec::with_capacity(8);
    for &(z0, z1) in &ranges[2] {
        for &(y0, y1) in &ranges[1] {
            for &(x0, x1) in &ranges[0] {
                out.push(ChunkPos {
                    start: [x0, y0, z0],
                    end: [x1, y1, z1],
                });
            }
        }
    }
    out
}

/// Builds the full chunk tree of a world, leaves materialized with empty
/// blocks, neighbor tables filled in.
pub fn build_world(shape: &WorldShape) -> WorldResult<ChunkTable> {
    shape.validate()?;
    let mut ids = ChunkIdAllocator::new();
    let root_id = ids.allocate()?;
    let mut table = ChunkTable::new(shape.map, root_id);

    let root = MapChunk::new(
        root_id,
        ChunkId::NONE,
        shape.chunk_size,
        shape.root_pos()?,
        shape.map,
    )?;
    table.insert(root);
    split(&mut table, &mut ids, root_id, shape)?;
    build_neighbor_graph(&mut table)?;

    info!(
        "Built map {} ({:?}, chunk size {}): {} chunks, {} leaves",
        shape.map,
        shape.dims,
        shape.chunk_size,
        table.len(),
        table.leaves().count()
    );
    Ok(table)
}

fn split(
    table: &mut ChunkTable,
    ids: &mut ChunkIdAllocator,
    id: ChunkId,
    shape: &WorldShape,
) -> WorldResult<()> {
    let pos = *table.get(id).ok_or(WorldError::ChunkNotFound(id.raw()))?.pos();
    if pos.extent().iter().all(|&e| e <= shape.chunk_size) {
        return Ok(());
    }

    for octant in octants(&pos, shape.chunk_size) {
        let child_id = ids.allocate()?;
        table.insert(MapChunk::new(child_id, id, shape.chunk_size, octant, shape.map)?);
        table
            .get_mut(id)
            .ok_or(WorldError::ChunkNotFound(id.raw()))?
            .add_child(ChildEntry {
                id: child_id,
                pos: octant,
            })?;
        split(table, ids, child_id, shape)?;
    }
    Ok(())
}

/// Computes the 26-direction neighbor table of every chunk in `table`.
///
/// A direction whose shifted volume leaves the world, or is not covered by a
/// chunk of the same size, gets [`ChunkId::NONE`].
pub fn build_neighbor_graph(table: &mut ChunkTable) -> WorldResult<()> {
    let root = table.root();
    let mut linked = 0usize;
    for id in table.ids() {
        let pos = *table.get(id).ok_or(WorldError::ChunkNotFound(id.raw()))?.pos();
        let mut neighbors = [ChunkId::NONE; DIRECTION_COUNT];
        for direction in Direction::ALL {
            let (dx, dy, dz) = direction.offset();
            let Some(shifted) = pos.translate_by_extent(dx, dy, dz) else {
                continue;
            };
            match resolve_box(&*table, root, &shifted) {
                Lookup::Hit(neighbor) => {
                    neighbors[direction.index()] = neighbor;
                    linked += 1;
                },
                Lookup::Miss => {},
                Lookup::Pending(missing) => return Err(WorldError::ChunkNotFound(missing.raw())),
            }
        }
        table
            .get_mut(id)
            .ok_or(WorldError::ChunkNotFound(id.raw()))?
            .set_neighbors(neighbors);
    }
    debug!("Linked {linked} neighbor slots");
    Ok(())
}
