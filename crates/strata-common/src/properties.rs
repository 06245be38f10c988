//! Bit-packed property sets shared by blocks and map objects.

use serde::{Deserialize, Serialize};

/// A 32-bit set of boolean properties addressed by bit position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct PropertiesSet(u32);

impl PropertiesSet {
    /// Number of addressable bits.
    pub const BITS: u8 = 32;

    /// The empty set.
    pub const EMPTY: Self = Self(0);

    /// Creates a set from its raw bit pattern.
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Returns the raw bit pattern.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Returns whether bit `index` is set. Out-of-range bits read as unset.
    #[must_use]
    pub const fn get(self, index: u8) -> bool {
        index < Self::BITS && self.0 & (1 << index) != 0
    }

    /// Sets bit `index`.
    pub fn set(&mut self, index: u8) {
        if index < Self::BITS {
            self.0 |= 1 << index;
        }
    }

    /// Clears bit `index`.
    pub fn clear(&mut self, index: u8) {
        if index < Self::BITS {
            self.0 &= !(1 << index);
        }
    }

    /// Flips bit `index`.
    pub fn toggle(&mut self, index: u8) {
        if index < Self::BITS {
            self.0 ^= 1 << index;
        }
    }

    /// Sets or clears bit `index` depending on `value`.
    pub fn assign(&mut self, index: u8, value: bool) {
        if value {
            self.set(index);
        } else {
            self.clear(index);
        }
    }

    /// Returns the set with bit `index` set.
    #[must_use]
    pub const fn with(self, index: u8) -> Self {
        if index < Self::BITS {
            Self(self.0 | (1 << index))
        } else {
            self
        }
    }

    /// Checks if no bit is set.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Iterates over the positions of set bits, lowest first.
    pub fn iter(self) -> impl Iterator<Item = u8> {
        (0..Self::BITS).filter(move |&i| self.get(i))
    }
}

/// Block property bit positions.
pub struct BlockProperty;

impl BlockProperty {
    /// Block has been dug out - bit 0
    pub const MINED: u8 = 0;
    /// Block is a ramp - bit 1
    pub const RAMP: u8 = 1;
    /// Floor was generated with the world - bit 2
    pub const NATURAL_FLOOR: u8 = 2;
    /// Roof was generated with the world - bit 3
    pub const NATURAL_ROOF: u8 = 3;
    /// Block has not been discovered yet - bit 4
    pub const HIDDEN: u8 = 4;
    /// Block carries a constructed floor - bit 5
    pub const FLOOR: u8 = 5;
    /// Block carries a constructed roof - bit 6
    pub const ROOF: u8 = 6;
    /// Block holds water - bit 7
    pub const WATER: u8 = 7;
}

/// Map object property bit positions.
pub struct ObjectProperty;

impl ObjectProperty {
    /// Object blocks movement - bit 0
    pub const SOLID: u8 = 0;
    /// Object can be picked up - bit 1
    pub const MOVABLE: u8 = 1;
    /// Object is scheduled for removal - bit 2
    pub const DESTROYED: u8 = 2;
}
