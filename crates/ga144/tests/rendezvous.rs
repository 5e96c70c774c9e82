//! Port rendezvous, multiport fan-out, boundary blocking, and the
//! pin-wake rule, exercised through directly installed node programs.

use f18a::Op;
use f18a::node::NodeState;
use f18a::opcode::{encode, encode_branch};
use f18a::ports::{PORT_DOWN, PORT_LEFT, PORT_RDLU, PORT_RIGHT};
use ga144::{Chip, NodeImage, Segment};

fn word(ops: &[Op]) -> u32 {
    encode(ops).expect("encodes")
}

fn spin(addr: u16) -> u32 {
    encode_branch(&[], Op::Jump, addr).expect("encodes")
}

/// `@p a! . .` / addr / then the given tail, then a spin.
fn with_a(addr: u16, tail: &[u32]) -> Vec<u32> {
    let mut words = vec![word(&[Op::FetchP, Op::AStore, Op::Nop, Op::Nop]), u32::from(addr)];
    words.extend_from_slice(tail);
    let here = words.len() as u16;
    words.push(spin(here));
    words
}

fn image(coord: u16, words: &[u32]) -> NodeImage {
    NodeImage {
        coord,
        mem: words.iter().map(|&w| Some(w)).collect(),
        len: words.len() as u8,
        p: Some(0),
        ..NodeImage::default()
    }
}

/// Writer program: A = port, push literal, store, spin.
fn writer(port: u16, value: u32) -> Vec<u32> {
    with_a(port, &[word(&[Op::FetchP, Op::Store, Op::Nop, Op::Nop]), value])
}

/// Reader program: A = port, fetch, spin.
fn reader(port: u16) -> Vec<u32> {
    with_a(port, &[word(&[Op::Fetch, Op::Nop, Op::Nop, Op::Nop])])
}

/// A chip with the power-on burst behind it: the 143 idle nodes have
/// parked on their multiports and only the boot node still runs its
/// serial poll loop.
fn settled_chip() -> Chip {
    let mut chip = Chip::new();
    chip.step_n(300);
    chip
}

#[test]
fn east_west_rendezvous_delivers_within_fifteen_steps() {
    let mut chip = settled_chip();
    // 304 (even column) writes east through RIGHT; 305 reads west
    // through the same shared channel address.
    chip.install_image(&image(304, &writer(PORT_RIGHT, 0xAAAA))).expect("installs");
    chip.install_image(&image(305, &reader(PORT_RIGHT))).expect("installs");

    chip.step_n(15);
    let receiver = chip.node(305).expect("node exists");
    assert_eq!(receiver.regs.t, 0xAAAA);
}

#[test]
fn rendezvous_works_with_either_arrival_order() {
    // Reader first: park it, then bring up the writer.
    let mut chip = settled_chip();
    chip.install_image(&image(305, &reader(PORT_RIGHT))).expect("installs");
    chip.step_n(40);
    assert_eq!(chip.node(305).expect("node").state, NodeState::BlockedRead);

    chip.install_image(&image(304, &writer(PORT_RIGHT, 0x1234))).expect("installs");
    chip.step_n(40);
    assert_eq!(chip.node(305).expect("node").regs.t, 0x1234);
    assert_eq!(chip.node(304).expect("node").state, NodeState::Running);
}

#[test]
fn multiport_write_reaches_every_waiting_reader() {
    let mut chip = settled_chip();
    // 304 reads its channel toward 305 (RIGHT); 306 reads its channel
    // toward 305 (LEFT). Park both before the writer starts. 306's
    // west channel doubles as its wake port, so its read also arms
    // the pin wait and parks as Suspended; the channel registration
    // still stands and data must beat the pin.
    chip.install_image(&image(304, &reader(PORT_RIGHT))).expect("installs");
    chip.install_image(&image(306, &reader(PORT_LEFT))).expect("installs");
    chip.step_n(60);
    assert_eq!(chip.node(304).expect("node").state, NodeState::BlockedRead);
    assert_eq!(chip.node(306).expect("node").state, NodeState::Suspended);

    // 305 writes the rdlu multiport: both neighbors receive the value
    // and the writer never blocks.
    chip.install_image(&image(305, &writer(PORT_RDLU, 0x155))).expect("installs");
    for _ in 0..60 {
        chip.step_n(1);
        assert_ne!(
            chip.node(305).expect("node").state,
            NodeState::BlockedWrite,
            "multiport writer must not block with readers waiting"
        );
    }
    assert_eq!(chip.node(304).expect("node").regs.t, 0x155);
    assert_eq!(chip.node(306).expect("node").regs.t, 0x155);
}

#[test]
fn boundary_write_blocks_forever() {
    let mut chip = settled_chip();
    // Row 0 writing south is off the chip.
    chip.install_image(&image(4, &writer(PORT_DOWN, 0x1))).expect("installs");
    chip.step_n(100);
    assert_eq!(chip.node(4).expect("node").state, NodeState::BlockedWrite);
    // No budget ever unblocks it.
    chip.step_n(1000);
    assert_eq!(chip.node(4).expect("node").state, NodeState::BlockedWrite);
}

#[test]
fn boundary_read_blocks_forever() {
    let mut chip = settled_chip();
    // Column 17 reading east: 717 is an odd column, so east is LEFT.
    chip.install_image(&image(717, &reader(PORT_LEFT))).expect("installs");
    chip.step_n(100);
    assert_eq!(chip.node(717).expect("node").state, NodeState::BlockedRead);
}

#[test]
fn wake_port_read_still_rendezvouses_with_data() {
    let mut chip = settled_chip();
    // 304's wake port is LEFT, which is also its real channel toward
    // 303. A data read there parks as a pin-armed wait, but a
    // neighbor's write must complete it like any rendezvous — the pin
    // never moves in this test.
    chip.install_image(&image(304, &reader(PORT_LEFT))).expect("installs");
    chip.step_n(60);
    assert_eq!(chip.node(304).expect("node").state, NodeState::Suspended);

    chip.install_image(&image(303, &writer(PORT_LEFT, 0x2BAD))).expect("installs");
    chip.step_n(60);
    let node = chip.node(304).expect("node");
    assert_eq!(node.regs.t, 0x2BAD);
    assert_eq!(node.state, NodeState::Running);
}

#[test]
fn wake_pin_read_blocks_until_high_and_returns_one() {
    let mut chip = settled_chip();
    // 304's wake port is LEFT; with WD = 0 a read waits for HIGH.
    chip.install_image(&image(304, &reader(PORT_LEFT))).expect("installs");
    chip.step_n(60);
    assert_eq!(chip.node(304).expect("node").state, NodeState::Suspended);

    // Drive the pin HIGH after 10 us.
    chip.enqueue_serial_bits(
        304,
        &[
            Segment { level: false, duration_ns: 10_000.0 },
            Segment { level: true, duration_ns: 5_000.0 },
        ],
    )
    .expect("schedules");
    // The boot node keeps polling its own serial line while the 10 us
    // elapse, so give the budget room for that.
    chip.step_n(8000);
    let node = chip.node(304).expect("node");
    assert_eq!(node.regs.t, 1);
    assert_eq!(node.state, NodeState::Running);
}

#[test]
fn wake_pin_with_wd_set_completes_low_with_zero() {
    let mut chip = settled_chip();
    // Arm the opposite polarity first (WD = bit 11), then read the
    // wake port; the pin idles LOW, so the read completes at once.
    let words = vec![
        word(&[Op::FetchP, Op::StoreB, Op::Nop, Op::Nop]),
        1 << 11,
        word(&[Op::FetchP, Op::AStore, Op::Nop, Op::Nop]),
        u32::from(PORT_LEFT),
        word(&[Op::Fetch, Op::Nop, Op::Nop, Op::Nop]),
        spin(5),
    ];
    chip.install_image(&image(304, &words)).expect("installs");
    chip.step_n(60);
    let node = chip.node(304).expect("node");
    assert_eq!(node.regs.t, 0);
    assert_eq!(node.state, NodeState::Running);
}

#[test]
fn simulated_time_is_monotone_per_node() {
    let mut chip = settled_chip();
    chip.install_image(&image(304, &writer(PORT_RIGHT, 0xAAAA))).expect("installs");
    chip.install_image(&image(305, &reader(PORT_RIGHT))).expect("installs");
    let mut last = [0.0f64; 2];
    for _ in 0..200 {
        chip.step_n(1);
        for (slot, coord) in [304u16, 305].iter().enumerate() {
            let t = chip.node(*coord).expect("node").time_ns();
            assert!(t >= last[slot]);
            last[slot] = t;
        }
    }
}
