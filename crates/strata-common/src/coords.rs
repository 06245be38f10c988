//! Coordinate types for blocks and chunk volumes.
//!
//! All coordinates are unsigned 16-bit values: the world origin is a hard
//! boundary and the compact on-disk format stores positions in two bytes.

use serde::{Deserialize, Serialize};

use crate::error::CodecError;

/// Identifier of a game map (a world may host several independent maps).
pub type MapId = u16;

/// Position of a single block in a map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockPos {
    /// Map the block belongs to
    pub map: MapId,
    /// X coordinate
    pub x: u16,
    /// Y coordinate
    pub y: u16,
    /// Z coordinate
    pub z: u16,
}

impl BlockPos {
    /// Creates a new block position.
    #[must_use]
    pub const fn new(map: MapId, x: u16, y: u16, z: u16) -> Self {
        Self { map, x, y, z }
    }

    /// Returns the coordinates as an array.
    #[must_use]
    pub const fn xyz(self) -> [u16; 3] {
        [self.x, self.y, self.z]
    }

    /// Translates the position by a signed offset.
    ///
    /// Returns `None` when any resulting coordinate would be negative or
    /// would not fit in 16 bits.
    #[must_use]
    pub fn offset(self, dx: i32, dy: i32, dz: i32) -> Option<Self> {
        let x = u16::try_from(i32::from(self.x) + dx).ok()?;
        let y = u16::try_from(i32::from(self.y) + dy).ok()?;
        let z = u16::try_from(i32::from(self.z) + dz).ok()?;
        Some(Self::new(self.map, x, y, z))
    }
}

impl std::fmt::Display for BlockPos {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:({}, {}, {})", self.map, self.x, self.y, self.z)
    }
}

/// Axis-aligned volume covered by a chunk: `start` inclusive, `end` exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkPos {
    /// Inclusive start corner
    pub start: [u16; 3],
    /// Exclusive end corner
    pub end: [u16; 3],
}

impl ChunkPos {
    /// Creates a chunk volume, checking that `end > start` on every axis.
    pub fn new(start: [u16; 3], end: [u16; 3]) -> Result<Self, CodecError> {
        if (0..3).any(|axis| end[axis] <= start[axis]) {
            return Err(CodecError::InvalidExtent { start, end });
        }
        Ok(Self { start, end })
    }

    /// Creates a chunk volume from an origin and an edge length per axis.
    pub fn from_origin(start: [u16; 3], size: [u16; 3]) -> Result<Self, CodecError> {
        let mut end = [0u16; 3];
        for axis in 0..3 {
            end[axis] = start[axis]
                .checked_add(size[axis])
                .ok_or(CodecError::InvalidExtent { start, end: [u16::MAX; 3] })?;
        }
        Self::new(start, end)
    }

    /// Edge length along each axis.
    #[must_use]
    pub fn extent(&self) -> [u16; 3] {
        [
            self.end[0] - self.start[0],
            self.end[1] - self.start[1],
            self.end[2] - self.start[2],
        ]
    }

    /// Geometric center of the volume.
    #[must_use]
    pub fn center(&self) -> [f32; 3] {
        let mut c = [0.0; 3];
        for (axis, value) in c.iter_mut().enumerate() {
            *value = (f32::from(self.start[axis]) + f32::from(self.end[axis])) / 2.0;
        }
        c
    }

    /// Half of the edge length along each axis.
    #[must_use]
    pub fn half_extent(&self) -> [f32; 3] {
        let e = self.extent();
        [f32::from(e[0]) / 2.0, f32::from(e[1]) / 2.0, f32::from(e[2]) / 2.0]
    }

    /// Number of blocks inside the volume.
    #[must_use]
    pub fn volume(&self) -> usize {
        let e = self.extent();
        e[0] as usize * e[1] as usize * e[2] as usize
    }

    /// Checks whether a point lies inside the volume.
    #[must_use]
    pub fn contains(&self, x: u16, y: u16, z: u16) -> bool {
        let p = [x, y, z];
        (0..3).all(|axis| p[axis] >= self.start[axis] && p[axis] < self.end[axis])
    }

    /// Checks whether a block position lies inside the volume.
    #[must_use]
    pub fn contains_pos(&self, pos: BlockPos) -> bool {
        self.contains(pos.x, pos.y, pos.z)
    }

    /// Checks whether another volume lies entirely inside this one.
    #[must_use]
    pub fn contains_box(&self, other: &ChunkPos) -> bool {
        (0..3).all(|axis| {
            other.start[axis] >= self.start[axis] && other.end[axis] <= self.end[axis]
        })
    }

    /// Checks whether two volumes share at least one block.
    #[must_use]
    pub fn intersects(&self, other: &ChunkPos) -> bool {
        (0..3).all(|axis| self.start[axis] < other.end[axis] && other.start[axis] < self.end[axis])
    }

    /// Linear index of a point relative to the volume origin, x fastest.
    #[must_use]
    pub fn local_index(&self, x: u16, y: u16, z: u16) -> Option<usize> {
        if !self.contains(x, y, z) {
            return None;
        }
        let [sx, sy, _] = self.extent();
        let lx = (x - self.start[0]) as usize;
        let ly = (y - self.start[1]) as usize;
        let lz = (z - self.start[2]) as usize;
        Some(lz * sx as usize * sy as usize + ly * sx as usize + lx)
    }

    /// Inverse of [`local_index`](Self::local_index).
    #[must_use]
    pub fn position_of(&self, index: usize) -> Option<[u16; 3]> {
        if index >= self.volume() {
            return None;
        }
        let [sx, sy, _] = self.extent();
        let (sx, sy) = (sx as usize, sy as usize);
        Some([
            self.start[0] + (index % sx) as u16,
            self.start[1] + ((index / sx) % sy) as u16,
            self.start[2] + (index / (sx * sy)) as u16,
        ])
    }

    /// Shifts the volume by whole multiples of its own extent.
    ///
    /// Returns `None` if the result would leave the 16-bit coordinate space.
    #[must_use]
    pub fn translate_by_extent(&self, dx: i32, dy: i32, dz: i32) -> Option<Self> {
        let e = self.extent();
        let d = [dx, dy, dz];
        let mut start = [0u16; 3];
        let mut end = [0u16; 3];
        for axis in 0..3 {
            let shift = d[axis] * i32::from(e[axis]);
            start[axis] = u16::try_from(i32::from(self.start[axis]) + shift).ok()?;
            end[axis] = u16::try_from(i32::from(self.end[axis]) + shift).ok()?;
        }
        Some(Self { start, end })
    }
}
