//! The GA144: 144 nodes, the channel fabric, and the event loop.
//!
//! The chip owns everything shared. Nodes are addressed by dense index
//! (row-major); channels live in one flat pool with per-node,
//! per-port handles, so a node and the fabric can be borrowed
//! mutually without any node ever referencing another.
//!
//! Scheduling is discrete-event: one NODE event executes one opcode
//! and re-enqueues the node at its new jittered time. A hot loop keeps
//! re-stepping the same node inline while nothing else can possibly
//! run sooner, which is the common case — a busy node and 143 parked
//! ones.

use emu_core::{Coord, Nanos, Observable, Value};
use f18a::node::{Fabric, Node};
use f18a::ports::{self, HwPort, PortSet};
use f18a::rom;
use serde::Serialize;

use crate::boot;
use crate::event::{Event, EventKind, EventQueue};
use crate::program::{Issue, NodeImage, Program};
use crate::ring::{IoDelta, IoRing};
use crate::serial::{self, BitSchedule, Segment};

/// Nodes on the mesh.
pub const NODE_COUNT: usize = 144;

/// Events between leakage sweeps over suspended nodes.
const IDLE_SWEEP_EVENTS: u64 = 1000;

/// Marker for a channel side with no node behind it.
const NO_NODE: u16 = u16::MAX;

/// One rendezvous channel. Each side owns its own pending-read and
/// pending-write flags, so both endpoints can legitimately wait on the
/// same channel at once (a node parked on its multiport plus its
/// focused neighbor). Boundary ports get a channel whose second side
/// is vacant, which is what makes them block forever.
#[derive(Debug, Clone, Copy)]
struct Channel {
    /// Node index per side; boundary channels leave side 1 vacant.
    nodes: [u16; 2],
    reader: [bool; 2],
    writer: [bool; 2],
    /// Value parked by each side's pending write.
    value: [u32; 2],
}

impl Channel {
    fn new(owner: u16) -> Self {
        Self { nodes: [owner, NO_NODE], reader: [false; 2], writer: [false; 2], value: [0; 2] }
    }

    /// Which side of this channel the node is on.
    fn side(&self, node: usize) -> usize {
        usize::from(self.nodes[0] != node as u16)
    }

    fn park(&mut self) {
        self.reader = [false; 2];
        self.writer = [false; 2];
        self.value = [0; 2];
    }
}

/// Everything a stepping node may touch besides itself.
#[derive(Debug)]
struct FabricState {
    channels: Vec<Channel>,
    /// Channel handle per node and hardware port.
    chan_of: Vec<[usize; 4]>,
    /// Value delivered to a parked reader, consumed on its next step.
    delivered: Vec<Option<u32>>,
    /// Set when a parked write was consumed; the writer's next step
    /// completes the store.
    write_done: Vec<bool>,
    /// Externally driven pin17 level per node.
    pin17: Vec<bool>,
    /// Latched I/O register value per node.
    io_latch: Vec<u32>,
    /// Nodes waiting on a pin17 edge.
    pin_wait: Vec<bool>,
    /// Nodes to re-enqueue after the current step.
    wake_queue: Vec<u16>,
    ring: IoRing,
}

impl FabricState {
    fn new() -> Self {
        let mut chan_of = vec![[usize::MAX; 4]; NODE_COUNT];
        let mut channels = Vec::new();
        for idx in 0..NODE_COUNT {
            let coord = Coord::from_index(idx);
            for port in HwPort::ALL {
                if chan_of[idx][port.index()] != usize::MAX {
                    continue;
                }
                let id = channels.len();
                let mut channel = Channel::new(idx as u16);
                chan_of[idx][port.index()] = id;
                // Interior channels are shared with the facing port of
                // the neighbor; boundary channels stay single-ended.
                let dir = ports::compass_for_hw(coord, port);
                if let Some(nb) = coord.neighbor(dir) {
                    let nb_port = ports::hw_for_compass(nb, dir.opposite());
                    chan_of[nb.index()][nb_port.index()] = id;
                    channel.nodes[1] = nb.index() as u16;
                }
                channels.push(channel);
            }
        }
        Self {
            channels,
            chan_of,
            delivered: vec![None; NODE_COUNT],
            write_done: vec![false; NODE_COUNT],
            pin17: vec![false; NODE_COUNT],
            io_latch: vec![0; NODE_COUNT],
            pin_wait: vec![false; NODE_COUNT],
            wake_queue: Vec::new(),
            ring: IoRing::new(),
        }
    }

    fn reset(&mut self) {
        for ch in &mut self.channels {
            ch.park();
        }
        self.delivered.fill(None);
        self.write_done.fill(false);
        self.pin17.fill(false);
        self.io_latch.fill(0);
        self.pin_wait.fill(false);
        self.wake_queue.clear();
        self.ring.clear();
    }

    /// Pin17 as the node sees it: its own drive wins over the
    /// external level.
    fn effective_pin17(&self, node: usize) -> bool {
        match (self.io_latch[node] >> 16) & 0b11 {
            0b11 => true,
            0b10 => false,
            _ => self.pin17[node],
        }
    }

    fn clear_reader(&mut self, node: u16) {
        for ch in self.chan_of[node as usize] {
            let side = self.channels[ch].side(node as usize);
            self.channels[ch].reader[side] = false;
        }
    }

    fn clear_writer(&mut self, node: u16) {
        for ch in self.chan_of[node as usize] {
            let side = self.channels[ch].side(node as usize);
            self.channels[ch].writer[side] = false;
        }
    }

    /// Drive the external pin17 level; wakes a satisfied pin-waiter.
    fn set_pin17(&mut self, node: usize, level: bool) {
        self.pin17[node] = level;
        if self.pin_wait[node] {
            let wd = (self.io_latch[node] >> 11) & 1 != 0;
            if self.effective_pin17(node) != wd {
                self.pin_wait[node] = false;
                self.wake_queue.push(node as u16);
            }
        }
    }
}

impl Fabric for FabricState {
    fn try_read(&mut self, node: usize, set: PortSet) -> Option<u32> {
        if let Some(value) = self.delivered[node].take() {
            // A wake-port read may have armed the pin as well; data
            // settles it.
            self.pin_wait[node] = false;
            return Some(value);
        }
        for port in set.iter() {
            let ch = self.chan_of[node][port.index()];
            let other = 1 - self.channels[ch].side(node);
            if self.channels[ch].writer[other] {
                let writer = self.channels[ch].nodes[other];
                let value = self.channels[ch].value[other];
                self.clear_writer(writer);
                self.write_done[writer as usize] = true;
                self.wake_queue.push(writer);
                self.pin_wait[node] = false;
                return Some(value);
            }
        }
        for port in set.iter() {
            let ch = self.chan_of[node][port.index()];
            let side = self.channels[ch].side(node);
            self.channels[ch].reader[side] = true;
        }
        None
    }

    fn try_write(&mut self, node: usize, set: PortSet, value: u32) -> bool {
        if self.write_done[node] {
            self.write_done[node] = false;
            return true;
        }
        let mut delivered_any = false;
        for port in set.iter() {
            let ch = self.chan_of[node][port.index()];
            let other = 1 - self.channels[ch].side(node);
            if self.channels[ch].reader[other] {
                let reader = self.channels[ch].nodes[other];
                self.clear_reader(reader);
                self.delivered[reader as usize] = Some(value);
                self.wake_queue.push(reader);
                delivered_any = true;
            }
        }
        if delivered_any {
            return true;
        }
        for port in set.iter() {
            let ch = self.chan_of[node][port.index()];
            let side = self.channels[ch].side(node);
            self.channels[ch].writer[side] = true;
            self.channels[ch].value[side] = value;
        }
        false
    }

    fn wake_read(&mut self, node: usize) -> Option<u32> {
        let wd = (self.io_latch[node] >> 11) & 1 != 0;
        let pin = self.effective_pin17(node);
        if pin != wd {
            self.pin_wait[node] = false;
            // The paired channel attempt may have registered this node
            // as a reader; the pin answered first.
            self.clear_reader(node as u16);
            Some(u32::from(pin))
        } else {
            self.pin_wait[node] = true;
            None
        }
    }

    fn io_read(&self, node: usize) -> u32 {
        let latch = self.io_latch[node];
        let mut value = latch & 0b1000_0000_0011;
        if self.effective_pin17(node) {
            value |= 1 << 17;
        }
        // Rw/Rr mirror the RIGHT-port neighbor's side of the channel.
        let right = self.chan_of[node][HwPort::Right.index()];
        let other = 1 - self.channels[right].side(node);
        if self.channels[right].writer[other] {
            value |= 1 << 16;
        }
        if self.channels[right].reader[other] {
            value |= 1 << 15;
        }
        value
    }

    fn io_write(&mut self, node: usize, value: u32, time_ns: f64, jitter_ns: f64) {
        self.io_latch[node] = value;
        let coord = Coord::from_index(node).code();
        self.ring.push(coord, value, time_ns, jitter_ns);
    }
}

/// A point-in-time view of one node, for hosts and the CLI.
#[derive(Debug, Clone, Serialize)]
pub struct NodeSnapshot {
    pub coord: u16,
    pub p: u16,
    pub i: u32,
    pub a: u32,
    pub b: u16,
    pub t: u32,
    pub s: u32,
    pub r: u32,
    pub state: String,
    pub time_ns: f64,
    pub temperature: f64,
    pub energy_pj: f64,
    pub ram: Vec<u32>,
}

/// The GA144 chip.
pub struct Chip {
    nodes: Vec<Node>,
    fabric: FabricState,
    queue: EventQueue,
    /// True while a NODE event for the index is pending.
    queued: Vec<bool>,
    schedule: BitSchedule,
    serial_target: usize,
    serial_event_live: bool,
    breakpoints: Vec<(usize, u16)>,
    breakpoint_hit: bool,
    events_processed: u64,
    now_ns: f64,
}

impl Default for Chip {
    fn default() -> Self {
        Self::new()
    }
}

impl Chip {
    #[must_use]
    pub fn new() -> Self {
        let mut nodes: Vec<Node> =
            (0..NODE_COUNT).map(|idx| Node::new(Coord::from_index(idx))).collect();
        let boot_idx = Coord::new(boot::BOOT_COORD).expect("boot node exists").index();
        nodes[boot_idx].set_rom(&rom::build());
        let mut chip = Self {
            nodes,
            fabric: FabricState::new(),
            queue: EventQueue::new(),
            queued: vec![false; NODE_COUNT],
            schedule: BitSchedule::new(),
            serial_target: boot_idx,
            serial_event_live: false,
            breakpoints: Vec::new(),
            breakpoint_hit: false,
            events_processed: 0,
            now_ns: 0.0,
        };
        chip.reset();
        chip
    }

    /// Power-on reset: every node cold, the boot node in its ROM,
    /// everyone else parked at multiport execution, all 144 enqueued
    /// in index order at time zero.
    pub fn reset(&mut self) {
        let boot_idx = Coord::new(boot::BOOT_COORD).expect("boot node exists").index();
        self.queue = EventQueue::new();
        self.queued.fill(false);
        self.fabric.reset();
        self.schedule.clear();
        self.serial_event_live = false;
        self.breakpoint_hit = false;
        self.events_processed = 0;
        self.now_ns = 0.0;
        for idx in 0..NODE_COUNT {
            let entry = if idx == boot_idx { rom::COLD } else { ports::PORT_RDLU };
            self.nodes[idx].reset(entry);
            self.enqueue_node(idx);
        }
    }

    fn enqueue_node(&mut self, idx: usize) {
        if self.queued[idx] {
            return;
        }
        self.queue.insert(Event {
            time: Nanos::new(self.nodes[idx].time_ns()),
            kind: EventKind::Node,
            payload: idx as u16,
        });
        self.queued[idx] = true;
    }

    /// Compile-side entry: build the boot stream for `program` and
    /// schedule it on node 708's pin17. Returns validation issues.
    pub fn load_program(&mut self, program: &Program) -> Result<Vec<Issue>, String> {
        let (_, issues) = program.validated();
        let stream = boot::build(program)?;
        let bit = serial::bit_ns(serial::BOOT_BAUD);
        let segments = serial::encode_8n1(&stream.bytes, bit, 4.0 * bit);
        let boot_idx = Coord::new(boot::BOOT_COORD).expect("boot node exists").index();
        self.enqueue_serial_segments(boot_idx, &segments)?;
        Ok(issues)
    }

    /// Schedule raw serial segments on a node's pin17.
    pub fn enqueue_serial_segments(
        &mut self,
        node_idx: usize,
        segments: &[Segment],
    ) -> Result<(), String> {
        if node_idx >= NODE_COUNT {
            return Err(format!("node index {node_idx} out of range"));
        }
        if !self.schedule.is_empty() && node_idx != self.serial_target {
            return Err("serial schedule already targets another node".to_string());
        }
        self.serial_target = node_idx;
        let start = self.schedule.append(segments, self.now_ns);
        log::debug!("serial: scheduled {} segments from {start} ns", segments.len());
        if !self.serial_event_live {
            if let Some((time_ns, _)) = self.schedule.peek(self.schedule.next_index()) {
                self.queue.insert(Event {
                    time: Nanos::new(time_ns),
                    kind: EventKind::Serial,
                    payload: self.schedule.next_index() as u16,
                });
                self.serial_event_live = true;
            }
        }
        Ok(())
    }

    /// Schedule pin17 bits on a node by coordinate.
    pub fn enqueue_serial_bits(&mut self, coord: u16, segments: &[Segment]) -> Result<(), String> {
        let coord = Coord::new(coord).ok_or_else(|| format!("invalid coordinate {coord}"))?;
        self.enqueue_serial_segments(coord.index(), segments)
    }

    /// Install an image directly, bypassing the boot protocol.
    pub fn install_image(&mut self, image: &NodeImage) -> Result<(), String> {
        let coord =
            Coord::new(image.coord).ok_or_else(|| format!("invalid coordinate {}", image.coord))?;
        let idx = coord.index();
        let node = &mut self.nodes[idx];
        for (cell, word) in image.mem.iter().enumerate() {
            if let Some(word) = word {
                if cell < f18a::node::MEM_WORDS {
                    node.ram[cell] = word & f18a::WORD_MASK;
                }
            }
        }
        for &cell in &image.stack {
            node.regs.push_data(cell & f18a::WORD_MASK);
        }
        if let Some(a) = image.a {
            node.regs.a = a & f18a::WORD_MASK;
        }
        if let Some(b) = image.b {
            node.regs.b = b & 0x1FF;
        }
        if let Some(io) = image.io {
            let time = node.thermal.simulated_time_ns;
            let jitter = node.thermal.last_jitter_ns;
            self.fabric.io_write(idx, io & f18a::WORD_MASK, time, jitter);
        }
        if let Some(p) = image.p {
            // The node has been parked on the multiport since reset;
            // abandon that fetch and its fabric registrations, and
            // pull its clock up so it does not run in the past.
            self.fabric.clear_reader(idx as u16);
            self.fabric.clear_writer(idx as u16);
            self.fabric.delivered[idx] = None;
            self.fabric.write_done[idx] = false;
            let node = &mut self.nodes[idx];
            node.force_entry(p);
            node.thermal.idle_to(self.now_ns);
            self.enqueue_node(idx);
        }
        Ok(())
    }

    /// Drain fabric wake-ups into the event queue.
    fn drain_wakes(&mut self) {
        while let Some(idx) = self.fabric.wake_queue.pop() {
            let idx = idx as usize;
            self.nodes[idx].thermal.idle_to(self.now_ns);
            self.enqueue_node(idx);
        }
    }

    /// Execute one step of a node, with breakpoint bookkeeping.
    fn step_node(&mut self, idx: usize) {
        let node = &mut self.nodes[idx];
        node.step(&mut self.fabric);
        if let Some(addr) = node.last_fetch {
            if self.breakpoints.iter().any(|&(n, a)| n == idx && a == addr) {
                self.breakpoint_hit = true;
            }
        }
        if !self.nodes[idx].state.is_runnable() {
            // Entering suspension cancels any pending wake-up.
            self.queue.remove(EventKind::Node, idx as u16);
            self.queued[idx] = false;
        }
        self.drain_wakes();
    }

    fn fire_serial(&mut self, edge_index: usize) {
        self.serial_event_live = false;
        if let Some((_, level)) = self.schedule.peek(edge_index) {
            self.fabric.set_pin17(self.serial_target, level);
            self.drain_wakes();
        }
        if let Some(next) = self.schedule.advance() {
            if let Some((time_ns, _)) = self.schedule.peek(next) {
                self.queue.insert(Event {
                    time: Nanos::new(time_ns),
                    kind: EventKind::Serial,
                    payload: next as u16,
                });
                self.serial_event_live = true;
            }
        }
    }

    /// Charge leakage to every non-running node.
    fn idle_sweep(&mut self) {
        for node in &mut self.nodes {
            if !node.state.is_runnable() {
                node.thermal.idle_to(self.now_ns);
            }
        }
    }

    /// Dispatch up to `budget` events (a hot-looped instruction counts
    /// as an event). Returns true if a breakpoint was hit.
    pub fn step_n(&mut self, budget: u64) -> bool {
        self.breakpoint_hit = false;
        let mut spent: u64 = 0;
        while spent < budget {
            let Some(event) = self.queue.pop() else {
                break;
            };
            self.now_ns = self.now_ns.max(event.time.get());
            self.events_processed += 1;
            if self.events_processed % IDLE_SWEEP_EVENTS == 0 {
                self.idle_sweep();
            }
            spent += 1;
            match event.kind {
                EventKind::Serial => {
                    self.fire_serial(event.payload as usize);
                }
                EventKind::Node => {
                    let idx = event.payload as usize;
                    self.queued[idx] = false;
                    if !self.nodes[idx].state.is_runnable()
                        && self.nodes[idx].time_ns() > event.time.get()
                    {
                        // Stale event for a node that woke elsewhere.
                        continue;
                    }
                    self.nodes[idx].thermal.idle_to(event.time.get());
                    self.step_node(idx);
                    // Hot loop: keep running this node inline while no
                    // other event could possibly precede it.
                    while spent < budget
                        && !self.breakpoint_hit
                        && self.nodes[idx].state.is_runnable()
                        && self.queue.peek_time().is_none_or(|head| self.nodes[idx].time_ns() <= head.get())
                    {
                        spent += 1;
                        self.events_processed += 1;
                        if self.events_processed % IDLE_SWEEP_EVENTS == 0 {
                            self.now_ns = self.now_ns.max(self.nodes[idx].time_ns());
                            self.idle_sweep();
                        }
                        self.step_node(idx);
                    }
                    let node_time = self.nodes[idx].time_ns();
                    let head = self.queue.peek_time().map_or(node_time, Nanos::get);
                    self.now_ns = self.now_ns.max(node_time.min(head));
                    if self.nodes[idx].state.is_runnable() {
                        self.enqueue_node(idx);
                    }
                }
            }
            if self.breakpoint_hit {
                return true;
            }
        }
        false
    }

    /// Step until the machine goes idle or the budget runs out.
    /// Returns true only on a fully idle machine.
    pub fn step_until_done(&mut self, budget: u64) -> bool {
        let mut remaining = budget;
        while remaining > 0 && !self.queue.is_empty() {
            let slice = remaining.min(10_000);
            self.step_n(slice);
            remaining -= slice;
        }
        self.queue.is_empty()
    }

    /// Current simulated time, ns.
    #[must_use]
    pub fn now_ns(&self) -> f64 {
        self.now_ns
    }

    #[must_use]
    pub fn events_processed(&self) -> u64 {
        self.events_processed
    }

    /// Tagged I/O records since `since_seq`.
    #[must_use]
    pub fn io_delta(&self, since_seq: u64) -> IoDelta {
        self.fabric.ring.delta(since_seq)
    }

    /// Node accessor by coordinate.
    #[must_use]
    pub fn node(&self, coord: u16) -> Option<&Node> {
        Coord::new(coord).map(|c| &self.nodes[c.index()])
    }

    /// Latched I/O register of a node (what it last wrote).
    #[must_use]
    pub fn io_latch(&self, coord: u16) -> Option<u32> {
        Coord::new(coord).map(|c| self.fabric.io_latch[c.index()])
    }

    pub fn add_breakpoint(&mut self, coord: u16, addr: u16) -> Result<(), String> {
        let c = Coord::new(coord).ok_or_else(|| format!("invalid coordinate {coord}"))?;
        self.breakpoints.push((c.index(), addr & 0x1FF));
        Ok(())
    }

    pub fn clear_breakpoints(&mut self) {
        self.breakpoints.clear();
    }

    /// Snapshot one node.
    #[must_use]
    pub fn snapshot_node(&self, coord: u16) -> Option<NodeSnapshot> {
        let c = Coord::new(coord)?;
        let node = &self.nodes[c.index()];
        Some(NodeSnapshot {
            coord: node.coord.code(),
            p: node.regs.p,
            i: node.regs.i,
            a: node.regs.a,
            b: node.regs.b,
            t: node.regs.t,
            s: node.regs.s,
            r: node.regs.r,
            state: format!("{:?}", node.state),
            time_ns: node.time_ns(),
            temperature: node.thermal.temperature,
            energy_pj: node.thermal.total_energy_pj,
            ram: node.ram.to_vec(),
        })
    }

    /// Snapshot the whole chip.
    #[must_use]
    pub fn snapshot(&self) -> Vec<NodeSnapshot> {
        (0..NODE_COUNT)
            .filter_map(|idx| self.snapshot_node(Coord::from_index(idx).code()))
            .collect()
    }
}

impl Observable for Chip {
    fn query(&self, path: &str) -> Option<Value> {
        match path {
            "time" => Some(Value::F64(self.now_ns)),
            "events" => Some(Value::U64(self.events_processed)),
            "pending" => Some(Value::U64(self.queue.len() as u64)),
            "ring.count" => Some(Value::U64(self.fabric.ring.len() as u64)),
            "ring.next_seq" => Some(Value::U64(self.fabric.ring.next_seq())),
            _ => {
                // `node.<coord>.<path>` delegates to the node.
                let rest = path.strip_prefix("node.")?;
                let (coord, sub) = rest.split_once('.')?;
                let coord: u16 = coord.parse().ok()?;
                self.node(coord)?.query(sub)
            }
        }
    }

    fn query_paths(&self) -> &'static [&'static str] {
        &["time", "events", "pending", "ring.count", "ring.next_seq", "node.<coord>.<path>"]
    }
}
