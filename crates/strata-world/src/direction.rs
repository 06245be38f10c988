//! The 26 neighbor directions of a cell in a 3D grid.

/// A non-zero unit offset in {-1, 0, 1}³.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Direction {
    /// X component
    pub dx: i8,
    /// Y component
    pub dy: i8,
    /// Z component
    pub dz: i8,
}

/// Number of neighbor directions.
pub const DIRECTION_COUNT: usize = 26;

impl Direction {
    /// +x
    pub const EAST: Self = Self::new(1, 0, 0);
    /// -x
    pub const WEST: Self = Self::new(-1, 0, 0);
    /// +y
    pub const SOUTH: Self = Self::new(0, 1, 0);
    /// -y
    pub const NORTH: Self = Self::new(0, -1, 0);
    /// +z
    pub const UP: Self = Self::new(0, 0, 1);
    /// -z
    pub const DOWN: Self = Self::new(0, 0, -1);

    /// All directions in neighbor-table order (z slowest, x fastest).
    pub const ALL: [Self; DIRECTION_COUNT] = Self::build_all();

    const fn new(dx: i8, dy: i8, dz: i8) -> Self {
        Self { dx, dy, dz }
    }

    const fn build_all() -> [Self; DIRECTION_COUNT] {
        let mut out = [Self::new(0, 0, 0); DIRECTION_COUNT];
        let mut n = 0;
        let mut i = 0;
        while n < 27 {
            let dx = (n % 3) as i8 - 1;
            let dy = ((n / 3) % 3) as i8 - 1;
            let dz = (n / 9) as i8 - 1;
            if dx != 0 || dy != 0 || dz != 0 {
                out[i] = Self::new(dx, dy, dz);
                i += 1;
            }
            n += 1;
        }
        out
    }

    /// Creates a direction, rejecting the zero vector and components outside -1..=1.
    #[must_use]
    pub fn from_components(dx: i8, dy: i8, dz: i8) -> Option<Self> {
        let valid = (-1..=1).contains(&dx) && (-1..=1).contains(&dy) && (-1..=1).contains(&dz);
        if !valid || (dx == 0 && dy == 0 && dz == 0) {
            return None;
        }
        Some(Self::new(dx, dy, dz))
    }

    /// Returns the direction stored at `index` of a neighbor table.
    #[must_use]
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Slot of this direction in a neighbor table.
    #[must_use]
    pub const fn index(self) -> usize {
        let n = ((self.dz + 1) * 9 + (self.dy + 1) * 3 + (self.dx + 1)) as usize;
        if n < 13 {
            n
        } else {
            n - 1
        }
    }

    /// The reverse direction.
    #[must_use]
    pub const fn opposite(self) -> Self {
        Self::new(-self.dx, -self.dy, -self.dz)
    }

    /// Components widened for coordinate arithmetic.
    #[must_use]
    pub const fn offset(self) -> (i32, i32, i32) {
        (self.dx as i32, self.dy as i32, self.dz as i32)
    }

    /// Whether the direction moves along exactly one axis.
    #[must_use]
    pub const fn is_face(self) -> bool {
        (self.dx != 0) as u8 + (self.dy != 0) as u8 + (self.dz != 0) as u8 == 1
    }
}
