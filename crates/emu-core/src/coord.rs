//! Node coordinates on the 8×18 mesh.

/// A node coordinate in `YXX` form: row × 100 + column.
///
/// Rows run 0–7 and columns 0–17, giving the 144 valid codes
/// 0–17, 100–117, …, 700–717.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Coord(u16);

impl Coord {
    pub const ROWS: u16 = 8;
    pub const COLS: u16 = 18;

    /// Build a coordinate from a `YXX` code.
    ///
    /// Returns `None` if the row or column is off the mesh.
    #[must_use]
    pub const fn new(code: u16) -> Option<Self> {
        let row = code / 100;
        let col = code % 100;
        if row < Self::ROWS && col < Self::COLS {
            Some(Self(code))
        } else {
            None
        }
    }

    /// Build a coordinate from row and column.
    #[must_use]
    pub const fn from_row_col(row: u16, col: u16) -> Option<Self> {
        if row < Self::ROWS && col < Self::COLS {
            Some(Self(row * 100 + col))
        } else {
            None
        }
    }

    #[must_use]
    pub const fn code(self) -> u16 {
        self.0
    }

    #[must_use]
    pub const fn row(self) -> u16 {
        self.0 / 100
    }

    #[must_use]
    pub const fn col(self) -> u16 {
        self.0 % 100
    }

    /// Dense index into a row-major array of 144 nodes.
    #[must_use]
    pub const fn index(self) -> usize {
        (self.row() * Self::COLS + self.col()) as usize
    }

    /// Inverse of [`Coord::index`].
    #[must_use]
    pub const fn from_index(index: usize) -> Self {
        let index = index as u16;
        Self((index / Self::COLS) * 100 + index % Self::COLS)
    }

    /// The neighbor one step in the given compass direction, if on-mesh.
    /// North is toward higher rows (row 7 is the top edge).
    #[must_use]
    pub const fn neighbor(self, dir: Compass) -> Option<Self> {
        let (row, col) = (self.row(), self.col());
        match dir {
            Compass::North => {
                if row + 1 < Self::ROWS {
                    Self::from_row_col(row + 1, col)
                } else {
                    None
                }
            }
            Compass::South => {
                if row > 0 {
                    Self::from_row_col(row - 1, col)
                } else {
                    None
                }
            }
            Compass::East => {
                if col + 1 < Self::COLS {
                    Self::from_row_col(row, col + 1)
                } else {
                    None
                }
            }
            Compass::West => {
                if col > 0 {
                    Self::from_row_col(row, col - 1)
                } else {
                    None
                }
            }
        }
    }
}

impl core::fmt::Display for Coord {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:03}", self.0)
    }
}

/// A geographic direction on the mesh.
///
/// Geography is distinct from the F18A's right/down/left/up port names:
/// alternate rows and columns are mirrored in silicon, so the port a
/// given compass direction maps to depends on coordinate parity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compass {
    North,
    South,
    East,
    West,
}

impl Compass {
    pub const ALL: [Self; 4] = [Self::North, Self::South, Self::East, Self::West];

    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::North => Self::South,
            Self::South => Self::North,
            Self::East => Self::West,
            Self::West => Self::East,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_codes() {
        assert!(Coord::new(0).is_some());
        assert!(Coord::new(717).is_some());
        assert!(Coord::new(708).is_some());
        assert!(Coord::new(18).is_none());
        assert!(Coord::new(800).is_none());
        assert!(Coord::new(118).is_none());
    }

    #[test]
    fn index_round_trip() {
        for idx in 0..144 {
            assert_eq!(Coord::from_index(idx).index(), idx);
        }
    }

    #[test]
    fn neighbors_respect_edges() {
        let nw = Coord::new(700).expect("valid");
        assert_eq!(nw.neighbor(Compass::North), None);
        assert_eq!(nw.neighbor(Compass::West), None);
        assert_eq!(nw.neighbor(Compass::South), Coord::new(600));
        assert_eq!(nw.neighbor(Compass::East), Coord::new(701));

        let se = Coord::new(17).expect("valid");
        assert_eq!(se.neighbor(Compass::South), None);
        assert_eq!(se.neighbor(Compass::East), None);
    }
}
