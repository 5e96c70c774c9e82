//! F18A node interpreter.
//!
//! Each `step()` executes one opcode (or one blocked attempt at a port
//! operation). The node owns its registers, stacks, RAM, ROM, and
//! thermal state; everything shared — channels, pins, the I/O ring —
//! is reached through the [`Fabric`] trait so nodes never hold
//! references to each other.

use emu_core::{Coord, Observable, Value};

use crate::opcode::{Op, WORD_MASK, slot_addr, slot_op};
use crate::ports::{self, IO_ADDR, PortSet};
use crate::registers::Registers;
use crate::thermal::{Thermal, op_cost};

/// Words of RAM (and of ROM).
pub const MEM_WORDS: usize = 64;

/// What the chip provides to a stepping node.
///
/// Port operations are attempt-based: an attempt either completes
/// immediately or registers the node as a waiter and returns nothing;
/// a later partner completes the rendezvous and the woken node's next
/// attempt observes the delivered result. Attempts are idempotent, so
/// spurious wake-ups are harmless.
pub trait Fabric {
    /// Attempt to read a word from any of the given ports.
    fn try_read(&mut self, node: usize, ports: PortSet) -> Option<u32>;

    /// Attempt to write a word to the given ports. A multiport write
    /// delivers to every waiting reader at once. Returns completion.
    fn try_write(&mut self, node: usize, ports: PortSet, value: u32) -> bool;

    /// Attempt a pin-wake read: completes with the pin level (0 or 1)
    /// when it matches the armed polarity, otherwise waits for an edge.
    /// A wake-port read tries the channel first, so a completion here
    /// must also release any reader registration that attempt left.
    fn wake_read(&mut self, node: usize) -> Option<u32>;

    /// Synthesized I/O register read.
    fn io_read(&self, node: usize) -> u32;

    /// I/O register write: latch pins and append to the tagged ring.
    fn io_write(&mut self, node: usize, value: u32, time_ns: f64, jitter_ns: f64);
}

/// Node scheduling state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Executing normally.
    Running,
    /// Parked on a port read (or port-execution fetch) with no writer.
    BlockedRead,
    /// Parked on a port write with no reader.
    BlockedWrite,
    /// Parked on a wake-port read: wakes on a partner's data or on a
    /// satisfying pin17 edge, whichever comes first.
    Suspended,
}

impl NodeState {
    #[must_use]
    pub const fn is_runnable(self) -> bool {
        matches!(self, Self::Running)
    }
}

/// A port operation in flight while the node is parked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pending {
    None,
    /// Instruction fetch through a port (port execution).
    Fetch(PortSet),
    /// Data read; `inc_a` replays the `@+` autoincrement on completion.
    Read { ports: PortSet, inc_a: bool },
    /// Wake-port read: a rendezvous that doubles as a pin wait.
    WakeRead { ports: PortSet, inc_a: bool },
    /// Data write, value already popped.
    Write { ports: PortSet, value: u32, inc_a: bool },
}

/// One F18A node.
#[derive(Debug, Clone)]
pub struct Node {
    pub coord: Coord,
    pub regs: Registers,
    pub ram: [u32; MEM_WORDS],
    pub rom: [u32; MEM_WORDS],
    /// Next slot of `I` to execute.
    pub slot: u8,
    /// True when `I` is exhausted and the next step fetches.
    needs_fetch: bool,
    pub state: NodeState,
    pub thermal: Thermal,
    pending: Pending,
    /// Address fetched during the most recent step, for breakpoints.
    pub last_fetch: Option<u16>,
}

impl Node {
    #[must_use]
    pub fn new(coord: Coord) -> Self {
        Self {
            coord,
            regs: Registers::new(),
            ram: [0; MEM_WORDS],
            rom: [0; MEM_WORDS],
            slot: 0,
            needs_fetch: true,
            state: NodeState::Running,
            thermal: Thermal::new(seed_for(coord)),
            pending: Pending::None,
            last_fetch: None,
        }
    }

    /// Reset registers, RAM, and thermal state; ROM survives.
    ///
    /// `entry` is where execution resumes — the boot ROM on a node that
    /// has one, the rdlu multiport everywhere else.
    pub fn reset(&mut self, entry: u16) {
        self.regs = Registers::new();
        self.regs.p = entry & 0x1FF;
        self.ram = [0; MEM_WORDS];
        self.slot = 0;
        self.needs_fetch = true;
        self.state = NodeState::Running;
        self.thermal.reset(seed_for(self.coord));
        self.pending = Pending::None;
        self.last_fetch = None;
    }

    /// Abandon any parked operation and restart execution at `p`.
    ///
    /// Host-side installs use this to pull a node off the multiport it
    /// has been parked on since reset. The caller must also clear the
    /// node's fabric-side registrations.
    pub fn force_entry(&mut self, p: u16) {
        self.regs.p = p & 0x1FF;
        self.slot = 0;
        self.needs_fetch = true;
        self.state = NodeState::Running;
        self.pending = Pending::None;
        self.last_fetch = None;
    }

    /// Install the ROM image.
    pub fn set_rom(&mut self, words: &[u32]) {
        for (cell, word) in self.rom.iter_mut().zip(words) {
            *cell = word & WORD_MASK;
        }
    }

    /// The node's clock, ns.
    #[must_use]
    pub fn time_ns(&self) -> f64 {
        self.thermal.simulated_time_ns
    }

    /// Read RAM or ROM through the 9-bit address map. The 64-word
    /// windows mirror across their regions.
    #[must_use]
    pub fn mem_read(&self, addr: u16) -> u32 {
        if addr & 0x080 == 0 {
            self.ram[(addr & 0x3F) as usize]
        } else {
            self.rom[(addr & 0x3F) as usize]
        }
    }

    fn mem_write(&mut self, addr: u16, value: u32) {
        // Stores into the ROM window are dropped, as on hardware.
        if addr & 0x080 == 0 {
            self.ram[(addr & 0x3F) as usize] = value & WORD_MASK;
        }
    }

    fn charge(&mut self, op: Op) {
        self.thermal.advance(op_cost(op));
    }

    /// Advance past the slot just executed.
    fn finish_slot(&mut self) {
        if self.slot >= 3 {
            self.needs_fetch = true;
        } else {
            self.slot += 1;
        }
    }

    /// End the current word.
    fn end_word(&mut self) {
        self.needs_fetch = true;
    }

    /// Execute one opcode, or one attempt at a parked port operation.
    pub fn step(&mut self, fabric: &mut impl Fabric) {
        self.last_fetch = None;

        match self.pending {
            Pending::None => {}
            Pending::Fetch(set) => {
                if let Some(word) = fabric.try_read(self.coord.index(), set) {
                    self.pending = Pending::None;
                    self.state = NodeState::Running;
                    self.regs.i = word & WORD_MASK;
                    self.slot = 0;
                    self.needs_fetch = false;
                    self.charge(Op::Fetch);
                } else {
                    self.state = NodeState::BlockedRead;
                }
                return;
            }
            Pending::Read { ports, inc_a } => {
                if let Some(value) = fabric.try_read(self.coord.index(), ports) {
                    self.pending = Pending::None;
                    self.state = NodeState::Running;
                    self.regs.push_data(value & WORD_MASK);
                    if inc_a {
                        self.regs.a = (self.regs.a + 1) & WORD_MASK;
                    }
                    self.finish_slot();
                    self.charge(Op::Fetch);
                } else {
                    self.state = NodeState::BlockedRead;
                }
                return;
            }
            Pending::WakeRead { ports, inc_a } => {
                // The wake port is still a real channel: data beats
                // the pin.
                if let Some(value) = fabric.try_read(self.coord.index(), ports) {
                    self.pending = Pending::None;
                    self.state = NodeState::Running;
                    self.regs.push_data(value & WORD_MASK);
                    if inc_a {
                        self.regs.a = (self.regs.a + 1) & WORD_MASK;
                    }
                    self.finish_slot();
                    self.charge(Op::Fetch);
                } else if let Some(value) = fabric.wake_read(self.coord.index()) {
                    self.pending = Pending::None;
                    self.state = NodeState::Running;
                    self.regs.push_data(value);
                    if inc_a {
                        self.regs.a = (self.regs.a + 1) & WORD_MASK;
                    }
                    self.finish_slot();
                    self.charge(Op::Fetch);
                } else {
                    self.state = NodeState::Suspended;
                }
                return;
            }
            Pending::Write { ports, value, inc_a } => {
                if fabric.try_write(self.coord.index(), ports, value) {
                    self.pending = Pending::None;
                    self.state = NodeState::Running;
                    if inc_a {
                        self.regs.a = (self.regs.a + 1) & WORD_MASK;
                    }
                    self.finish_slot();
                    self.charge(Op::Store);
                } else {
                    self.state = NodeState::BlockedWrite;
                }
                return;
            }
        }

        if self.needs_fetch {
            let p = self.regs.p;
            if ports::is_port_addr(p) {
                // Port execution: P stays put and successive fetches
                // pull successive channel words.
                self.last_fetch = Some(p);
                if let Some(word) = fabric.try_read(self.coord.index(), ports::port_set(p)) {
                    self.regs.i = word & WORD_MASK;
                    self.slot = 0;
                    self.needs_fetch = false;
                    self.charge(Op::Fetch);
                } else {
                    self.pending = Pending::Fetch(ports::port_set(p));
                    self.state = NodeState::BlockedRead;
                }
                return;
            }
            if ports::is_io_region(p) {
                // Executing from the I/O register or an unmapped I/O
                // address streams zeros (nops).
                self.regs.i = if p == IO_ADDR { fabric.io_read(self.coord.index()) } else { 0 };
                self.last_fetch = Some(p);
                self.slot = 0;
                self.needs_fetch = false;
                self.charge(Op::Fetch);
                return;
            }
            self.regs.i = self.mem_read(p);
            self.last_fetch = Some(p);
            self.regs.p = (p + 1) & 0x1FF;
            self.slot = 0;
            self.needs_fetch = false;
            // RAM/ROM fetch is folded into the first slot's execution.
        }

        self.execute_slot(fabric);
    }

    fn execute_slot(&mut self, fabric: &mut impl Fabric) {
        let slot = self.slot as usize;
        let op = slot_op(self.regs.i, slot);
        let regs = &mut self.regs;

        match op {
            Op::Ret => {
                regs.p = (regs.r & 0x1FF) as u16;
                regs.pop_ret();
                self.end_word();
                self.charge(op);
            }
            Op::Ex => {
                let old_p = regs.p;
                regs.p = (regs.r & 0x1FF) as u16;
                regs.r = u32::from(old_p);
                self.end_word();
                self.charge(op);
            }
            Op::Jump => {
                regs.p = slot_addr(regs.i, slot);
                self.end_word();
                self.charge(op);
            }
            Op::Call => {
                let ret = u32::from(regs.p);
                regs.push_ret(ret);
                regs.p = slot_addr(regs.i, slot);
                self.end_word();
                self.charge(op);
            }
            Op::Unext => {
                if regs.r == 0 {
                    regs.pop_ret();
                    self.finish_slot();
                } else {
                    regs.r = (regs.r - 1) & WORD_MASK;
                    // Re-run the word from slot 0 without a fetch.
                    self.slot = 0;
                }
                self.charge(op);
            }
            Op::Next => {
                if regs.r == 0 {
                    regs.pop_ret();
                } else {
                    regs.r = (regs.r - 1) & WORD_MASK;
                    regs.p = slot_addr(regs.i, slot);
                }
                self.end_word();
                self.charge(op);
            }
            Op::If => {
                if regs.t == 0 {
                    regs.p = slot_addr(regs.i, slot);
                }
                self.end_word();
                self.charge(op);
            }
            Op::MinusIf => {
                if regs.t & 0x20000 == 0 {
                    regs.p = slot_addr(regs.i, slot);
                }
                self.end_word();
                self.charge(op);
            }
            Op::FetchP => {
                let addr = regs.p;
                if ports::is_port_addr(addr) {
                    self.port_read(fabric, ports::port_set(addr), false);
                } else {
                    let value = if ports::is_io_region(addr) {
                        if addr == IO_ADDR { fabric.io_read(self.coord.index()) } else { 0 }
                    } else {
                        self.mem_read(addr)
                    };
                    self.regs.push_data(value);
                    if !ports::is_io_region(addr) {
                        self.regs.p = (addr + 1) & 0x1FF;
                    }
                    self.finish_slot();
                    self.charge(op);
                }
            }
            Op::FetchPlus => {
                let addr = (regs.a & 0x1FF) as u16;
                self.read_common(fabric, addr, true, op);
            }
            Op::FetchB => {
                let addr = regs.b;
                self.read_common(fabric, addr, false, op);
            }
            Op::Fetch => {
                let addr = (regs.a & 0x1FF) as u16;
                self.read_common(fabric, addr, false, op);
            }
            Op::StoreP => {
                let addr = regs.p;
                let value = self.regs.pop_data();
                if ports::is_port_addr(addr) {
                    self.port_write(fabric, ports::port_set(addr), value, false);
                } else {
                    if ports::is_io_region(addr) {
                        if addr == IO_ADDR {
                            self.io_store(fabric, value);
                        }
                    } else {
                        self.mem_write(addr, value);
                        self.regs.p = (addr + 1) & 0x1FF;
                    }
                    self.finish_slot();
                    self.charge(op);
                }
            }
            Op::StorePlus => {
                let addr = (regs.a & 0x1FF) as u16;
                let value = self.regs.pop_data();
                self.write_common(fabric, addr, value, true, op);
            }
            Op::StoreB => {
                let addr = regs.b;
                let value = self.regs.pop_data();
                self.write_common(fabric, addr, value, false, op);
            }
            Op::Store => {
                let addr = (regs.a & 0x1FF) as u16;
                let value = self.regs.pop_data();
                self.write_common(fabric, addr, value, false, op);
            }
            Op::MultStep => {
                // Multiply step over the 36-bit T:A pair.
                let sum = if regs.a & 1 != 0 { (regs.t + regs.s) & WORD_MASK } else { regs.t };
                regs.a = (regs.a >> 1) | ((sum & 1) << 17);
                regs.t = (sum >> 1) | (sum & 0x20000);
                self.finish_slot();
                self.charge(op);
            }
            Op::TwoStar => {
                regs.t = (regs.t << 1) & WORD_MASK;
                self.finish_slot();
                self.charge(op);
            }
            Op::TwoSlash => {
                regs.t = (regs.t >> 1) | (regs.t & 0x20000);
                self.finish_slot();
                self.charge(op);
            }
            Op::Not => {
                regs.t = !regs.t & WORD_MASK;
                self.finish_slot();
                self.charge(op);
            }
            Op::Plus => {
                let sum = (regs.t + regs.s) & WORD_MASK;
                regs.pop_data();
                regs.t = sum;
                self.finish_slot();
                self.charge(op);
            }
            Op::And => {
                let value = regs.t & regs.s;
                regs.pop_data();
                regs.t = value;
                self.finish_slot();
                self.charge(op);
            }
            Op::Or => {
                // F18A "or" is exclusive-or.
                let value = regs.t ^ regs.s;
                regs.pop_data();
                regs.t = value;
                self.finish_slot();
                self.charge(op);
            }
            Op::Drop => {
                regs.pop_data();
                self.finish_slot();
                self.charge(op);
            }
            Op::Dup => {
                let t = regs.t;
                regs.push_data(t);
                self.finish_slot();
                self.charge(op);
            }
            Op::Pop => {
                let value = regs.pop_ret();
                regs.push_data(value);
                self.finish_slot();
                self.charge(op);
            }
            Op::Over => {
                let s = regs.s;
                regs.push_data(s);
                self.finish_slot();
                self.charge(op);
            }
            Op::PushA => {
                let a = regs.a;
                regs.push_data(a);
                self.finish_slot();
                self.charge(op);
            }
            Op::Nop => {
                self.finish_slot();
                self.charge(op);
            }
            Op::Push => {
                let value = regs.pop_data();
                regs.push_ret(value);
                self.finish_slot();
                self.charge(op);
            }
            Op::BStore => {
                let value = regs.pop_data();
                regs.b = (value & 0x1FF) as u16;
                self.finish_slot();
                self.charge(op);
            }
            Op::AStore => {
                let value = regs.pop_data();
                regs.a = value;
                self.finish_slot();
                self.charge(op);
            }
        }
    }

    /// Shared path for `@` / `@+` / `@b`.
    fn read_common(&mut self, fabric: &mut impl Fabric, addr: u16, inc_a: bool, op: Op) {
        if ports::is_port_addr(addr) {
            let set = ports::port_set(addr);
            if set.only() == Some(ports::wake_port(self.coord)) {
                self.wake_port_read(fabric, set, inc_a);
            } else {
                self.port_read(fabric, set, inc_a);
            }
            return;
        }
        let value = if ports::is_io_region(addr) {
            if addr == IO_ADDR { fabric.io_read(self.coord.index()) } else { 0 }
        } else {
            self.mem_read(addr)
        };
        self.regs.push_data(value);
        if inc_a {
            self.regs.a = (self.regs.a + 1) & WORD_MASK;
        }
        self.finish_slot();
        self.charge(op);
    }

    /// Shared path for `!` / `!+` / `!b`; `value` is already popped.
    fn write_common(&mut self, fabric: &mut impl Fabric, addr: u16, value: u32, inc_a: bool, op: Op) {
        if ports::is_port_addr(addr) {
            self.port_write(fabric, ports::port_set(addr), value, inc_a);
            return;
        }
        if ports::is_io_region(addr) {
            if addr == IO_ADDR {
                self.io_store(fabric, value);
            }
        } else {
            self.mem_write(addr, value);
        }
        if inc_a {
            self.regs.a = (self.regs.a + 1) & WORD_MASK;
        }
        self.finish_slot();
        self.charge(op);
    }

    fn port_read(&mut self, fabric: &mut impl Fabric, set: PortSet, inc_a: bool) {
        if let Some(value) = fabric.try_read(self.coord.index(), set) {
            self.regs.push_data(value & WORD_MASK);
            if inc_a {
                self.regs.a = (self.regs.a + 1) & WORD_MASK;
            }
            self.finish_slot();
            self.charge(Op::Fetch);
        } else {
            self.pending = Pending::Read { ports: set, inc_a };
            self.state = NodeState::BlockedRead;
        }
    }

    fn port_write(&mut self, fabric: &mut impl Fabric, set: PortSet, value: u32, inc_a: bool) {
        if fabric.try_write(self.coord.index(), set, value & WORD_MASK) {
            if inc_a {
                self.regs.a = (self.regs.a + 1) & WORD_MASK;
            }
            self.finish_slot();
            self.charge(Op::Store);
        } else {
            self.pending = Pending::Write { ports: set, value: value & WORD_MASK, inc_a };
            self.state = NodeState::BlockedWrite;
        }
    }

    /// A single-port read of the node's wake port. The channel is
    /// still a rendezvous: a partner's data completes the read like
    /// any other port. Only when no data is waiting does the read arm
    /// the pin wait, returning the pin level on a satisfying edge.
    fn wake_port_read(&mut self, fabric: &mut impl Fabric, set: PortSet, inc_a: bool) {
        if let Some(value) = fabric.try_read(self.coord.index(), set) {
            self.regs.push_data(value & WORD_MASK);
            if inc_a {
                self.regs.a = (self.regs.a + 1) & WORD_MASK;
            }
            self.finish_slot();
            self.charge(Op::Fetch);
        } else if let Some(value) = fabric.wake_read(self.coord.index()) {
            self.regs.push_data(value);
            if inc_a {
                self.regs.a = (self.regs.a + 1) & WORD_MASK;
            }
            self.finish_slot();
            self.charge(Op::Fetch);
        } else {
            self.pending = Pending::WakeRead { ports: set, inc_a };
            self.state = NodeState::Suspended;
        }
    }

    fn io_store(&mut self, fabric: &mut impl Fabric, value: u32) {
        fabric.io_write(
            self.coord.index(),
            value & WORD_MASK,
            self.thermal.simulated_time_ns,
            self.thermal.last_jitter_ns,
        );
    }
}

/// Reset PRNG seed for a node: a fixed multiplier spreads the 144
/// coordinates across the xorshift state space.
#[must_use]
pub const fn seed_for(coord: Coord) -> u32 {
    (coord.code() as u32).wrapping_mul(0x9E37_79B9) | 1
}

impl Observable for Node {
    fn query(&self, path: &str) -> Option<Value> {
        match path {
            "p" => Some(Value::U16(self.regs.p)),
            "i" => Some(Value::U32(self.regs.i)),
            "a" => Some(Value::U32(self.regs.a)),
            "b" => Some(Value::U16(self.regs.b)),
            "t" => Some(Value::U32(self.regs.t)),
            "s" => Some(Value::U32(self.regs.s)),
            "r" => Some(Value::U32(self.regs.r)),
            "slot" => Some(Value::U8(self.slot)),
            "state" => Some(Value::String(format!("{:?}", self.state))),
            "coord" => Some(Value::U16(self.coord.code())),
            "thermal.temperature" => Some(Value::F64(self.thermal.temperature)),
            "thermal.energy" => Some(Value::F64(self.thermal.total_energy_pj)),
            "thermal.time" => Some(Value::F64(self.thermal.simulated_time_ns)),
            "ram" => Some(Value::Array(self.ram.iter().map(|&w| Value::U32(w)).collect())),
            "stack" => Some(Value::Array(
                self.regs.data.to_vec().into_iter().map(Value::U32).collect(),
            )),
            _ => None,
        }
    }

    fn query_paths(&self) -> &'static [&'static str] {
        &[
            "p",
            "i",
            "a",
            "b",
            "t",
            "s",
            "r",
            "slot",
            "state",
            "coord",
            "thermal.temperature",
            "thermal.energy",
            "thermal.time",
            "ram",
            "stack",
        ]
    }
}
