//! Port and I/O address space.
//!
//! Addresses with bit 8 set select the I/O region. Within it, `0x15D`
//! is the I/O register, and addresses of the form `x_xxxx_0101` select
//! communication ports via bits 7..4: right when bit 7 is set, down
//! when bit 6 is clear, left when bit 5 is set, up when bit 4 is clear.
//! Several bits can select at once, giving multiport addresses such as
//! `rdlu`.
//!
//! Alternate rows and columns of the mesh are mirrored, so one physical
//! channel has the same address seen from both endpoints; which compass
//! direction a hardware port faces depends on coordinate parity.

use emu_core::{Compass, Coord};

/// The I/O register address.
pub const IO_ADDR: u16 = 0x15D;

/// Single-port addresses.
pub const PORT_RIGHT: u16 = 0x1D5;
pub const PORT_DOWN: u16 = 0x115;
pub const PORT_LEFT: u16 = 0x175;
pub const PORT_UP: u16 = 0x145;

/// The four-way multiport idle nodes execute from.
pub const PORT_RDLU: u16 = 0x1A5;

/// A hardware communication port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HwPort {
    Right = 0,
    Down = 1,
    Left = 2,
    Up = 3,
}

impl HwPort {
    pub const ALL: [Self; 4] = [Self::Right, Self::Down, Self::Left, Self::Up];

    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// The single-port address of this port.
    #[must_use]
    pub const fn addr(self) -> u16 {
        match self {
            Self::Right => PORT_RIGHT,
            Self::Down => PORT_DOWN,
            Self::Left => PORT_LEFT,
            Self::Up => PORT_UP,
        }
    }
}

/// A set of hardware ports selected by one address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortSet(u8);

impl PortSet {
    pub const EMPTY: Self = Self(0);

    #[must_use]
    pub const fn single(port: HwPort) -> Self {
        Self(1 << port.index())
    }

    #[must_use]
    pub const fn contains(self, port: HwPort) -> bool {
        self.0 & (1 << port.index()) != 0
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[must_use]
    pub fn iter(self) -> impl Iterator<Item = HwPort> {
        HwPort::ALL.into_iter().filter(move |p| self.contains(*p))
    }

    /// The one port in a singleton set.
    #[must_use]
    pub fn only(self) -> Option<HwPort> {
        if self.0.count_ones() == 1 {
            HwPort::ALL.into_iter().find(|p| self.contains(*p))
        } else {
            None
        }
    }
}

/// True if the address falls in the I/O region.
#[must_use]
pub const fn is_io_region(addr: u16) -> bool {
    addr & 0x100 != 0
}

/// True if the address is a port select.
#[must_use]
pub const fn is_port_addr(addr: u16) -> bool {
    (addr & 0x10F) == 0x105
}

/// Decode a port address into the set of ports it selects.
///
/// Returns the empty set for non-port addresses.
#[must_use]
pub const fn port_set(addr: u16) -> PortSet {
    if !is_port_addr(addr) {
        return PortSet::EMPTY;
    }
    let mut bits = 0u8;
    if addr & 0x080 != 0 {
        bits |= 1 << HwPort::Right.index();
    }
    if addr & 0x040 == 0 {
        bits |= 1 << HwPort::Down.index();
    }
    if addr & 0x020 != 0 {
        bits |= 1 << HwPort::Left.index();
    }
    if addr & 0x010 == 0 {
        bits |= 1 << HwPort::Up.index();
    }
    PortSet(bits)
}

/// The hardware port facing the given compass direction from `coord`.
///
/// Columns mirror left/right and rows mirror up/down, so the mapping
/// depends on parity; this is what gives a channel one shared address.
#[must_use]
pub const fn hw_for_compass(coord: Coord, dir: Compass) -> HwPort {
    let even_col = coord.col() % 2 == 0;
    let even_row = coord.row() % 2 == 0;
    match dir {
        Compass::East => {
            if even_col {
                HwPort::Right
            } else {
                HwPort::Left
            }
        }
        Compass::West => {
            if even_col {
                HwPort::Left
            } else {
                HwPort::Right
            }
        }
        Compass::North => {
            if even_row {
                HwPort::Up
            } else {
                HwPort::Down
            }
        }
        Compass::South => {
            if even_row {
                HwPort::Down
            } else {
                HwPort::Up
            }
        }
    }
}

/// The compass direction a hardware port faces from `coord`.
#[must_use]
pub fn compass_for_hw(coord: Coord, port: HwPort) -> Compass {
    for dir in Compass::ALL {
        if hw_for_compass(coord, dir) == port {
            return dir;
        }
    }
    unreachable!("every port faces some direction")
}

/// The address of the channel toward `dir` — identical from both ends.
#[must_use]
pub const fn channel_addr(coord: Coord, dir: Compass) -> u16 {
    hw_for_compass(coord, dir).addr()
}

/// The port a pin-wake read uses: UP on the top row (where the pins
/// are bonded), LEFT everywhere else.
#[must_use]
pub const fn wake_port(coord: Coord) -> HwPort {
    if coord.row() == 7 { HwPort::Up } else { HwPort::Left }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_port_decodes() {
        assert_eq!(port_set(PORT_RIGHT).only(), Some(HwPort::Right));
        assert_eq!(port_set(PORT_DOWN).only(), Some(HwPort::Down));
        assert_eq!(port_set(PORT_LEFT).only(), Some(HwPort::Left));
        assert_eq!(port_set(PORT_UP).only(), Some(HwPort::Up));
    }

    #[test]
    fn rdlu_selects_all_four() {
        let set = port_set(PORT_RDLU);
        for port in HwPort::ALL {
            assert!(set.contains(port), "{port:?} missing from rdlu");
        }
    }

    #[test]
    fn io_register_is_not_a_port() {
        assert!(is_io_region(IO_ADDR));
        assert!(!is_port_addr(IO_ADDR));
        assert!(port_set(IO_ADDR).is_empty());
    }

    #[test]
    fn shared_channel_addresses_agree() {
        // Horizontal: 708 (even column) and 709 (odd column).
        let a = Coord::new(708).expect("valid");
        let b = Coord::new(709).expect("valid");
        assert_eq!(channel_addr(a, Compass::East), channel_addr(b, Compass::West));

        // Vertical: 717 (odd row) and 617 (even row).
        let c = Coord::new(717).expect("valid");
        let d = Coord::new(617).expect("valid");
        assert_eq!(channel_addr(c, Compass::South), channel_addr(d, Compass::North));
    }

    #[test]
    fn every_adjacent_pair_shares_an_address() {
        for idx in 0..144 {
            let coord = Coord::from_index(idx);
            for dir in Compass::ALL {
                if let Some(next) = coord.neighbor(dir) {
                    assert_eq!(
                        channel_addr(coord, dir),
                        channel_addr(next, dir.opposite()),
                        "{coord} -> {next}"
                    );
                }
            }
        }
    }

    #[test]
    fn wake_port_rule() {
        assert_eq!(wake_port(Coord::new(708).expect("valid")), HwPort::Up);
        assert_eq!(wake_port(Coord::new(304).expect("valid")), HwPort::Left);
    }
}
