//! Chunk nodes of the world octree and their binary encoding.
//!
//! Encoded layout (big-endian):
//!
//! | offset | size | field |
//! |---|---|---|
//! | 0 | 2 | chunk id |
//! | 2 | 2 | parent id (0 for the root) |
//! | 4 | 2 | chunk size (leaf edge length) |
//! | 6 | 12 | start x,y,z · end x,y,z |
//! | 18 | 52 | 26 neighbor ids |
//! | 70 | 126 | 9 child-index slots (cid + start/end), cid 0 = empty |
//! | 196 | 14·n | block records (leaf chunks only) |
//!
//! An internal chunk encodes to exactly [`BLOCKS_OFFSET`] bytes; a leaf to
//! `BLOCKS_OFFSET + BLOCK_WIDTH × volume`.

use strata_common::{BlockPos, ChunkId, ChunkPos, CodecError, CodecResult, MapId, WorldError};

use crate::block::{BlockCodec, MapBlock, BLOCK_WIDTH};
use crate::direction::{Direction, DIRECTION_COUNT};
use crate::wire::{self, Reader, Writer};

/// Size of the fixed chunk header.
pub const HEADER_SIZE: usize = 2 + 2 + 2 + 12 + DIRECTION_COUNT * 2;

/// Size of one child-index entry.
pub const CHILD_ENTRY_SIZE: usize = 14;

/// Number of child-index slots reserved after the header.
pub const CHILD_SLOTS: usize = 9;

/// Maximum number of children of an internal chunk (octants).
pub const MAX_CHILDREN: usize = 8;

/// Offset of the child-index table.
pub const CHILD_TABLE_OFFSET: usize = HEADER_SIZE;

/// Offset of the block region of a leaf chunk.
pub const BLOCKS_OFFSET: usize = CHILD_TABLE_OFFSET + CHILD_SLOTS * CHILD_ENTRY_SIZE;

/// Fixed header fields of a chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkHeader {
    /// Chunk id
    pub id: ChunkId,
    /// Parent chunk id ([`ChunkId::NONE`] for the root)
    pub parent: ChunkId,
    /// Leaf edge length of the world
    pub chunk_size: u16,
    /// Volume covered
    pub pos: ChunkPos,
    /// Neighbor ids, indexed by [`Direction::index`]
    pub neighbors: [ChunkId; DIRECTION_COUNT],
}

impl ChunkHeader {
    /// Whether a chunk with this header holds blocks rather than children.
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.pos.extent().iter().all(|&e| e <= self.chunk_size)
    }

    /// Exact encoded size of the chunk described by this header.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        if self.is_leaf() {
            BLOCKS_OFFSET + BlockCodec::region_len(self.pos.volume())
        } else {
            BLOCKS_OFFSET
        }
    }
}

/// Entry of an internal chunk's child table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildEntry {
    /// Child chunk id
    pub id: ChunkId,
    /// Volume covered by the child
    pub pos: ChunkPos,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ChunkBody {
    Children(Vec<ChildEntry>),
    Blocks(Vec<u8>),
}

/// A node of the world octree: either children or a dense block buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapChunk {
    header: ChunkHeader,
    body: ChunkBody,
}

impl MapChunk {
    /// Creates a chunk with no children and no neighbors.
    ///
    /// Leaf chunks (extent ≤ `chunk_size` on every axis) are materialized
    /// with empty blocks owned by `id`.
    pub fn new(
        id: ChunkId,
        parent: ChunkId,
        chunk_size: u16,
        pos: ChunkPos,
        map: MapId,
    ) -> CodecResult<Self> {
        let header = ChunkHeader {
            id,
            parent,
            chunk_size,
            pos,
            neighbors: [ChunkId::NONE; DIRECTION_COUNT],
        };
        let body = if header.is_leaf() {
            let mut buf = vec![0u8; BlockCodec::region_len(pos.volume())];
            for index in 0..pos.volume() {
                let Some([x, y, z]) = pos.position_of(index) else {
                    break;
                };
                let block = MapBlock::empty(BlockPos::new(map, x, y, z), id);
                BlockCodec::encode(&mut buf, index * BLOCK_WIDTH, &block)?;
            }
            ChunkBody::Blocks(buf)
        } else {
            ChunkBody::Children(Vec::with_capacity(MAX_CHILDREN))
        };
        Ok(Self { header, body })
    }

    /// Returns the header.
    #[must_use]
    pub const fn header(&self) -> &ChunkHeader {
        &self.header
    }

    /// Returns the chunk id.
    #[must_use]
    pub const fn id(&self) -> ChunkId {
        self.header.id
    }

    /// Returns the parent id.
    #[must_use]
    pub const fn parent(&self) -> ChunkId {
        self.header.parent
    }

    /// Returns the covered volume.
    #[must_use]
    pub const fn pos(&self) -> &ChunkPos {
        &self.header.pos
    }

    /// Returns the leaf edge length.
    #[must_use]
    pub const fn chunk_size(&self) -> u16 {
        self.header.chunk_size
    }

    /// Whether the chunk holds blocks.
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        matches!(self.body, ChunkBody::Blocks(_))
    }

    /// Whether this chunk is the octree root.
    #[must_use]
    pub const fn is_root(&self) -> bool {
        self.header.parent.is_none()
    }

    /// Child table (empty for leaves).
    #[must_use]
    pub fn children(&self) -> &[ChildEntry] {
        match &self.body {
            ChunkBody::Children(children) => children,
            ChunkBody::Blocks(_) => &[],
        }
    }

    /// Appends a child entry.
    pub fn add_child(&mut self, child: ChildEntry) -> CodecResult<()> {
        match &mut self.body {
            ChunkBody::Children(children) if children.len() < MAX_CHILDREN => {
                children.push(child);
                Ok(())
            },
            ChunkBody::Children(children) => Err(CodecError::TooManyChildren {
                count: children.len() + 1,
                max: MAX_CHILDREN,
            }),
            ChunkBody::Blocks(_) => Err(CodecError::TooManyChildren {
                count: 1,
                max: 0,
            }),
        }
    }

    /// Neighbor id in a direction ([`ChunkId::NONE`] at the world edge).
    #[must_use]
    pub const fn neighbor(&self, direction: Direction) -> ChunkId {
        self.header.neighbors[direction.index()]
    }

    /// The full neighbor table.
    #[must_use]
    pub const fn neighbors(&self) -> &[ChunkId; DIRECTION_COUNT] {
        &self.header.neighbors
    }

    /// Replaces the neighbor table.
    pub fn set_neighbors(&mut self, neighbors: [ChunkId; DIRECTION_COUNT]) {
        self.header.neighbors = neighbors;
    }

    /// Raw block region (leaves only).
    #[must_use]
    pub fn block_bytes(&self) -> Option<&[u8]> {
        match &self.body {
            ChunkBody::Blocks(buf) => Some(buf),
            ChunkBody::Children(_) => None,
        }
    }

    /// Decodes the block at a world position inside this leaf.
    ///
    /// Returns `Ok(None)` for internal chunks and positions outside the chunk.
    pub fn block_at(&self, pos: BlockPos) -> CodecResult<Option<MapBlock>> {
        let ChunkBody::Blocks(buf) = &self.body else {
            return Ok(None);
        };
        match self.header.pos.local_index(pos.x, pos.y, pos.z) {
            Some(index) => BlockCodec::decode(buf, index * BLOCK_WIDTH, pos).map(Some),
            None => Ok(None),
        }
    }

    /// Encodes `block` in place at its position.
    pub fn write_block(&mut self, block: &MapBlock) -> Result<(), WorldError> {
        let index = self
            .header
            .pos
            .local_index(block.pos.x, block.pos.y, block.pos.z)
            .ok_or(WorldError::OutOfWorld {
                x: block.pos.x,
                y: block.pos.y,
                z: block.pos.z,
            })?;
        match &mut self.body {
            ChunkBody::Blocks(buf) => {
                BlockCodec::encode(buf, index * BLOCK_WIDTH, block)?;
                Ok(())
            },
            ChunkBody::Children(_) => Err(WorldError::ChunkNotFound(self.header.id.raw())),
        }
    }

    /// Decodes every block of a leaf in index order.
    pub fn blocks(&self, map: MapId) -> impl Iterator<Item = CodecResult<MapBlock>> + '_ {
        let pos = self.header.pos;
        let count = self.block_bytes().map_or(0, |_| pos.volume());
        (0..count).filter_map(move |index| {
            let [x, y, z] = pos.position_of(index)?;
            let buf = self.block_bytes()?;
            Some(BlockCodec::decode(buf, index * BLOCK_WIDTH, BlockPos::new(map, x, y, z)))
        })
    }
}

/// Encoder/decoder for chunk buffers.
pub struct ChunkCodec;

impl ChunkCodec {
    /// Encodes a chunk into a freshly allocated buffer of exact size.
    pub fn encode(chunk: &MapChunk) -> CodecResult<Vec<u8>> {
        let mut buf = vec![0u8; chunk.header.encoded_len()];
        Self::encode_into(&mut buf, chunk)?;
        Ok(buf)
    }

    /// Encodes a chunk into a caller-allocated buffer.
    ///
    /// The buffer must be at least `chunk.header().encoded_len()` bytes.
    pub fn encode_into(buf: &mut [u8], chunk: &MapChunk) -> CodecResult<()> {
        let header = &chunk.header;
        if buf.len() < header.encoded_len() {
            return Err(CodecError::BufferTooShort {
                needed: header.encoded_len(),
                actual: buf.len(),
            });
        }

        let mut w = Writer::new(wire::slice_mut(buf, 0, HEADER_SIZE)?);
        w.u16(header.id.raw());
        w.u16(header.parent.raw());
        w.u16(header.chunk_size);
        w.triple(header.pos.start);
        w.triple(header.pos.end);
        for neighbor in header.neighbors {
            w.u16(neighbor.raw());
        }

        let table = wire::slice_mut(buf, CHILD_TABLE_OFFSET, CHILD_SLOTS * CHILD_ENTRY_SIZE)?;
        table.fill(0);
        let mut w = Writer::new(table);
        for child in chunk.children() {
            w.u16(child.id.raw());
            w.triple(child.pos.start);
            w.triple(child.pos.end);
        }

        if let Some(blocks) = chunk.block_bytes() {
            wire::slice_mut(buf, BLOCKS_OFFSET, blocks.len())?.copy_from_slice(blocks);
        }
        Ok(())
    }

    /// Decodes only the fixed header.
    pub fn decode_header(buf: &[u8]) -> CodecResult<ChunkHeader> {
        let mut r = Reader::new(wire::slice(buf, 0, HEADER_SIZE)?);
        let id = ChunkId::from_raw(r.u16());
        let parent = ChunkId::from_raw(r.u16());
        let chunk_size = r.u16();
        let start = r.triple();
        let end = r.triple();
        let pos = ChunkPos::new(start, end)?;
        let mut neighbors = [ChunkId::NONE; DIRECTION_COUNT];
        for slot in &mut neighbors {
            *slot = ChunkId::from_raw(r.u16());
        }
        Ok(ChunkHeader {
            id,
            parent,
            chunk_size,
            pos,
            neighbors,
        })
    }

    /// Decodes the child-index table, skipping empty slots.
    pub fn decode_children(buf: &[u8]) -> CodecResult<Vec<ChildEntry>> {
        let mut r = Reader::new(wire::slice(
            buf,
            CHILD_TABLE_OFFSET,
            CHILD_SLOTS * CHILD_ENTRY_SIZE,
        )?);
        let mut children = Vec::with_capacity(MAX_CHILDREN);
        for _ in 0..CHILD_SLOTS {
            let id = ChunkId::from_raw(r.u16());
            let start = r.triple();
            let end = r.triple();
            if id.is_none() {
                continue;
            }
            children.push(ChildEntry {
                id,
                pos: ChunkPos::new(start, end)?,
            });
        }
        if children.len() > MAX_CHILDREN {
            return Err(CodecError::TooManyChildren {
                count: children.len(),
                max: MAX_CHILDREN,
            });
        }
        Ok(children)
    }

    /// Decodes a full chunk.
    pub fn decode(buf: &[u8]) -> CodecResult<MapChunk> {
        let header = Self::decode_header(buf)?;
        let body = if header.is_leaf() {
            let len = BlockCodec::region_len(header.pos.volume());
            ChunkBody::Blocks(wire::slice(buf, BLOCKS_OFFSET, len)?.to_vec())
        } else {
            ChunkBody::Children(Self::decode_children(buf)?)
        };
        Ok(MapChunk { header, body })
    }
}
