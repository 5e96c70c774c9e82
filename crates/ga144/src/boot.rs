//! Async boot-stream builder.
//!
//! Turns a compiled program into the byte stream node 708's boot ROM
//! consumes. The stream breaks down as:
//!
//! 1. the `0xAE` magic byte (auto-baud calibration);
//! 2. a boot frame `[completion][addr][count][words…]` installing a
//!    generated serial loader in 708's RAM;
//! 3. the nested relay stream the loader pumps east: each visited node
//!    port-executes a focusing call and the five pump words, forwards
//!    everything destined further down the path, then port-executes
//!    its own payload (code install, register prologue, entry jump);
//! 4. 708's own payload values, when 708 itself is a target, read
//!    straight off the serial line by the loader.
//!
//! The nesting means the tail of the path finishes loading first and
//! each node's payload arrives only after everything beyond it has
//! been forwarded.

use emu_core::{Compass, Coord};
use f18a::Op;
use f18a::opcode::{encode, encode_branch, encode_ending};
use f18a::ports::{PORT_RDLU, channel_addr};
use f18a::rom::RX18;

use crate::program::{NodeImage, Program};

/// Magic byte opening every boot stream.
pub const MAGIC: u8 = 0xAE;

/// Where the generated serial loader lands in 708's RAM. User code on
/// 708 itself must fit below this.
pub const LOADER_ADDR: u16 = 0x28;

/// The boot entry node.
pub const BOOT_COORD: u16 = 708;

/// A built boot stream, with its routing for inspection and tests.
#[derive(Debug, Clone)]
pub struct BootStream {
    /// All 18-bit words after the magic byte, in wire order.
    pub words: Vec<u32>,
    /// The full wire byte sequence (magic included).
    pub bytes: Vec<u8>,
    /// The trimmed serpentine path, starting at 708.
    pub path: Vec<Coord>,
    /// Visited nodes that only relay.
    pub wire_nodes: Vec<Coord>,
}

/// Encode one 18-bit word as its three wire bytes.
///
/// The `0x2D` pattern in byte 0 puts the double-wide HIGH calibration
/// pulse at the front of every word once the RS232 inversion is
/// applied.
#[must_use]
pub fn word_to_bytes(word: u32) -> [u8; 3] {
    [
        ((((word << 6) & 0xC0) as u8) | 0x2D) ^ 0xFF,
        (((word >> 2) & 0xFF) as u8) ^ 0xFF,
        (((word >> 10) & 0xFF) as u8) ^ 0xFF,
    ]
}

/// Decode three wire bytes back to the 18-bit word.
#[must_use]
pub fn bytes_to_word(bytes: [u8; 3]) -> u32 {
    let b0 = u32::from(bytes[0] ^ 0xFF);
    let b1 = u32::from(bytes[1] ^ 0xFF);
    let b2 = u32::from(bytes[2] ^ 0xFF);
    ((b0 & 0xC0) >> 6) | (b1 << 2) | (b2 << 10)
}

/// The canonical 143-step serpentine visiting all 144 nodes.
///
/// East along the top row from 708, snake down rows 6..1 over columns
/// 1–17, the whole of row 0, back north up column 0, and finish with
/// 700–707. Column 0 is the return corridor that makes the walk cover
/// the left end of the top row last.
#[must_use]
pub fn serpentine() -> Vec<Coord> {
    let coord = |row: u16, col: u16| Coord::from_row_col(row, col).expect("on-mesh");
    let mut path = Vec::with_capacity(144);
    for col in 8..18 {
        path.push(coord(7, col));
    }
    for row in (1..7).rev() {
        if row % 2 == 0 {
            for col in (1..18).rev() {
                path.push(coord(row, col));
            }
        } else {
            for col in 1..18 {
                path.push(coord(row, col));
            }
        }
    }
    for col in (0..18).rev() {
        path.push(coord(0, col));
    }
    for row in 1..8 {
        path.push(coord(row, 0));
    }
    for col in 1..8 {
        path.push(coord(7, col));
    }
    path
}

/// Compass direction of one path step.
fn step_dir(from: Coord, to: Coord) -> Result<Compass, String> {
    Compass::ALL
        .into_iter()
        .find(|&d| from.neighbor(d) == Some(to))
        .ok_or_else(|| format!("path step {from} -> {to} is not adjacent"))
}

/// `call` into the channel shared by two adjacent nodes — the focusing
/// word that moves the downstream node from multiport execution onto
/// the one channel the stream arrives through.
fn focus_word(from: Coord, to: Coord) -> Result<u32, String> {
    let dir = step_dir(from, to)?;
    encode_branch(&[], Op::Call, channel_addr(from, dir))
}

/// The port-executed payload for one target node: install the code
/// image, run the register prologue, then enter (or park).
fn payload(image: &NodeImage) -> Result<Vec<u32>, String> {
    let mut words = Vec::new();
    let fetch_push = encode(&[Op::FetchP, Op::Push, Op::Nop, Op::Nop])?;

    // Entry address first, parked on the return stack under the pump
    // count until the trailing `;` consumes it.
    words.push(fetch_push);
    words.push(u32::from(image.p.unwrap_or(0)));
    // Destination (doubles as the frame padding word).
    words.push(encode(&[Op::FetchP, Op::AStore, Op::Nop, Op::Nop])?);
    words.push(0);
    if image.len > 0 {
        // Code length as a for-count (the pump runs count + 1 times).
        words.push(fetch_push);
        words.push(u32::from(image.len - 1));
        words.push(encode(&[Op::FetchP, Op::StorePlus, Op::Unext, Op::Nop])?);
        words.extend(image.code());
    }

    // Register prologue: stack cells, IO, then the address registers.
    for &cell in &image.stack {
        words.push(encode(&[Op::FetchP, Op::Nop, Op::Nop, Op::Nop])?);
        words.push(cell);
    }
    if let Some(io) = image.io {
        // B still holds its reset value, the I/O register address.
        words.push(encode(&[Op::FetchP, Op::StoreB, Op::Nop, Op::Nop])?);
        words.push(io);
    }
    if let Some(a) = image.a {
        words.push(encode(&[Op::FetchP, Op::AStore, Op::Nop, Op::Nop])?);
        words.push(a);
    }
    if let Some(b) = image.b {
        words.push(encode(&[Op::FetchP, Op::BStore, Op::Nop, Op::Nop])?);
        words.push(u32::from(b));
    }
    if image.p.is_some() {
        words.push(encode_ending(&[], Op::Ret)?);
    } else {
        words.push(encode(&[Op::Pop, Op::Drop, Op::Nop, Op::Nop])?);
    }
    Ok(words)
}

/// 708's serial loader: pump `pump_count` words east, then optionally
/// self-load, then park at multiport execution.
fn loader_708(
    next_hop: Option<u16>,
    pump_count: usize,
    own: Option<&NodeImage>,
) -> Result<(Vec<u32>, Vec<u32>), String> {
    let mut words = Vec::new();
    let mut tail_values = Vec::new();
    let call_rx = encode_branch(&[], Op::Call, RX18)?;

    if let Some(chan) = next_hop {
        if pump_count > 0 {
            words.push(encode(&[Op::FetchP, Op::AStore, Op::Nop, Op::Nop])?);
            words.push(u32::from(chan));
            words.push(encode(&[Op::FetchP, Op::Push, Op::Nop, Op::Nop])?);
            words.push(pump_count as u32 - 1);
            let loop_at = LOADER_ADDR + words.len() as u16;
            words.push(call_rx);
            words.push(encode_branch(&[Op::Store], Op::Next, loop_at)?);
        }
    }

    if let Some(image) = own {
        // Mirror of the port-executed payload, but every value comes
        // off the serial line through the ROM's rx18.
        words.push(call_rx);
        words.push(encode(&[Op::Push, Op::Nop, Op::Nop, Op::Nop])?);
        tail_values.push(u32::from(image.p.unwrap_or(0)));
        words.push(call_rx);
        words.push(encode(&[Op::Drop, Op::Nop, Op::Nop, Op::Nop])?);
        tail_values.push(0);
        if image.len > 0 {
            words.push(call_rx);
            words.push(encode(&[Op::Push, Op::Nop, Op::Nop, Op::Nop])?);
            tail_values.push(u32::from(image.len - 1));
            words.push(encode(&[Op::FetchP, Op::AStore, Op::Nop, Op::Nop])?);
            words.push(0);
            let loop_at = LOADER_ADDR + words.len() as u16;
            words.push(call_rx);
            words.push(encode_branch(&[Op::StorePlus], Op::Next, loop_at)?);
            tail_values.extend(image.code());
        }

        for &cell in &image.stack {
            words.push(call_rx);
            tail_values.push(cell);
        }
        if let Some(io) = image.io {
            words.push(call_rx);
            words.push(encode(&[Op::StoreB, Op::Nop, Op::Nop, Op::Nop])?);
            tail_values.push(io);
        }
        if let Some(a) = image.a {
            words.push(call_rx);
            words.push(encode(&[Op::AStore, Op::Nop, Op::Nop, Op::Nop])?);
            tail_values.push(a);
        }
        if let Some(b) = image.b {
            words.push(call_rx);
            words.push(encode(&[Op::BStore, Op::Nop, Op::Nop, Op::Nop])?);
            tail_values.push(u32::from(b));
        }
        if image.p.is_some() {
            // The entry address is still parked on the return stack.
            words.push(encode_ending(&[], Op::Ret)?);
        } else {
            words.push(encode(&[Op::Pop, Op::Drop, Op::Nop, Op::Nop])?);
            words.push(encode_branch(&[], Op::Jump, PORT_RDLU)?);
        }
    } else {
        words.push(encode_branch(&[], Op::Jump, PORT_RDLU)?);
    }

    if LOADER_ADDR as usize + words.len() > 0x40 {
        return Err(format!("boot loader overflows RAM ({} words)", words.len()));
    }
    Ok((words, tail_values))
}

/// Build the boot stream for a program.
pub fn build(program: &Program) -> Result<BootStream, String> {
    let (images, issues) = program.validated();
    if images.is_empty() {
        return Err("no loadable node images".to_string());
    }
    for issue in &issues {
        log::warn!("boot: {}", issue.message);
    }

    let full_path = serpentine();
    let target_at = |coord: Coord| images.iter().find(|im| im.coord == coord.code());

    // Trim the path at the furthest target.
    let furthest = full_path
        .iter()
        .rposition(|&c| target_at(c).is_some())
        .ok_or_else(|| "no target lies on the boot path".to_string())?;
    let path: Vec<Coord> = full_path[..=furthest].to_vec();
    let wire_nodes: Vec<Coord> =
        path.iter().copied().filter(|&c| target_at(c).is_none()).collect();

    let w1 = encode(&[Op::FetchP, Op::Dup, Op::AStore, Op::Nop])?;
    let w3 = encode(&[Op::FetchP, Op::Push, Op::Store, Op::Nop])?;
    let w5 = encode(&[Op::FetchP, Op::Store, Op::Unext, Op::Nop])?;

    // Build the relay stream from the far end of the path inward.
    // `rest` is everything a node receives after its focusing word.
    let mut rest: Vec<u32> = Vec::new();
    for i in (1..path.len()).rev() {
        let own = match target_at(path[i]) {
            Some(image) => payload(image)?,
            None => Vec::new(),
        };
        if i == path.len() - 1 {
            rest = own;
        } else {
            let forwarded = rest.len();
            let mut next = Vec::with_capacity(forwarded + own.len() + 5);
            next.push(w1);
            next.push(focus_word(path[i], path[i + 1])?);
            next.push(w3);
            next.push(forwarded as u32 - 1);
            next.push(w5);
            next.extend(rest);
            next.extend(own);
            rest = next;
        }
    }

    // The pump stream as 708 sends it: focusing word first.
    let mut pumped: Vec<u32> = Vec::new();
    let mut next_hop = None;
    if path.len() > 1 {
        pumped.push(focus_word(path[0], path[1])?);
        pumped.extend(rest);
        next_hop = Some(channel_addr(path[0], step_dir(path[0], path[1])?));
    }

    let own_708 = target_at(path[0]);
    let (loader, tail_values) = loader_708(next_hop, pumped.len(), own_708.map(|v| &**v))?;

    // Frame for the boot ROM, then the pumped stream, then 708's own
    // payload values.
    let mut words = Vec::new();
    words.push(u32::from(LOADER_ADDR)); // completion
    words.push(u32::from(LOADER_ADDR)); // store address
    words.push(loader.len() as u32 - 1); // for-count
    words.extend(&loader);
    words.extend(&pumped);
    words.extend(&tail_values);

    let mut bytes = Vec::with_capacity(1 + words.len() * 3);
    bytes.push(MAGIC);
    for &word in &words {
        bytes.extend(word_to_bytes(word));
    }

    log::info!(
        "boot stream: {} words / {} bytes, path {} nodes ({} wire)",
        words.len(),
        bytes.len(),
        path.len(),
        wire_nodes.len()
    );

    Ok(BootStream { words, bytes, path, wire_nodes })
}
