//! Block records and their fixed-width binary encoding.
//!
//! A block record is 14 bytes, big-endian:
//!
//! | bytes | field |
//! |---|---|
//! | 0..4 | property bitset |
//! | 4..6 | parent chunk id |
//! | 6..8 | material id |
//! | 8..10 | object id (`0xFFFF` = none) |
//! | 10..12 | temperature, biased by `0x8000` |
//! | 12..14 | light level, biased by `0x8000` |
//!
//! The block position is not stored; it follows from the record's index in
//! the owning leaf chunk.

use strata_common::{BlockPos, ChunkId, CodecError, CodecResult, ObjectId, PropertiesSet};

use crate::wire::{self, Reader, Writer};

/// Encoded size of one block record.
pub const BLOCK_WIDTH: usize = 14;

/// Object slot value meaning "no object on this block".
pub const NO_OBJECT: u16 = 0xFFFF;

/// Bias applied to the signed scalar fields.
const SCALAR_BIAS: i32 = 0x8000;

/// Material id of empty space.
pub const MATERIAL_AIR: u16 = 0;

/// A single block of the map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapBlock {
    /// Position (derived from the owning leaf, never persisted)
    pub pos: BlockPos,
    /// Leaf chunk owning this block
    pub parent: ChunkId,
    /// Material id
    pub material: u16,
    /// Object serial occupying the block, or [`NO_OBJECT`]
    pub object: u16,
    /// Property flags (see `BlockProperty`)
    pub props: PropertiesSet,
    /// Temperature
    pub temperature: i16,
    /// Light level
    pub lux: i16,
}

impl MapBlock {
    /// Creates an empty (air) block.
    #[must_use]
    pub const fn empty(pos: BlockPos, parent: ChunkId) -> Self {
        Self {
            pos,
            parent,
            material: MATERIAL_AIR,
            object: NO_OBJECT,
            props: PropertiesSet::EMPTY,
            temperature: 0,
            lux: 0,
        }
    }

    /// Returns the block with a material set.
    #[must_use]
    pub const fn with_material(mut self, material: u16) -> Self {
        self.material = material;
        self
    }

    /// Returns the block with a property bit set.
    #[must_use]
    pub const fn with_property(mut self, bit: u8) -> Self {
        self.props = self.props.with(bit);
        self
    }

    /// Checks whether an object sits on the block.
    #[must_use]
    pub const fn has_object(&self) -> bool {
        self.object != NO_OBJECT
    }

    /// Places (or removes) an object.
    ///
    /// Object ids are 64-bit in memory but the record slot holds 16 bits:
    /// only serials up to `0xFFFE` are accepted, larger ones are rejected
    /// instead of being truncated.
    pub fn set_object(&mut self, object: Option<ObjectId>) -> CodecResult<()> {
        self.object = match object {
            None => NO_OBJECT,
            Some(id) => match u16::try_from(id.serial()) {
                Ok(serial) if serial != NO_OBJECT => serial,
                _ => {
                    return Err(CodecError::IdOverflow {
                        field: "object",
                        value: id.raw(),
                    })
                },
            },
        };
        Ok(())
    }
}

/// Encoder/decoder for block records.
pub struct BlockCodec;

impl BlockCodec {
    /// Writes `block` at `offset` in `buf`.
    pub fn encode(buf: &mut [u8], offset: usize, block: &MapBlock) -> CodecResult<()> {
        let record = wire::slice_mut(buf, offset, BLOCK_WIDTH)?;
        let mut w = Writer::new(record);
        w.u32(block.props.bits());
        w.u16(block.parent.raw());
        w.u16(block.material);
        w.u16(block.object);
        w.u16(bias(block.temperature));
        w.u16(bias(block.lux));
        Ok(())
    }

    /// Reads the block record at `offset`; `pos` is the position it describes.
    pub fn decode(buf: &[u8], offset: usize, pos: BlockPos) -> CodecResult<MapBlock> {
        let record = wire::slice(buf, offset, BLOCK_WIDTH)?;
        let mut r = Reader::new(record);
        Ok(MapBlock {
            pos,
            props: PropertiesSet::from_bits(r.u32()),
            parent: ChunkId::from_raw(r.u16()),
            material: r.u16(),
            object: r.u16(),
            temperature: unbias(r.u16()),
            lux: unbias(r.u16()),
        })
    }

    /// Size of a block region holding `count` records.
    #[must_use]
    pub const fn region_len(count: usize) -> usize {
        count * BLOCK_WIDTH
    }
}

fn bias(value: i16) -> u16 {
    (i32::from(value) + SCALAR_BIAS) as u16
}

fn unbias(raw: u16) -> i16 {
    (i32::from(raw) - SCALAR_BIAS) as i16
}
