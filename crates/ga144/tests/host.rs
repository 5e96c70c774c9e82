//! Host-surface behavior: breakpoints, snapshots, and state queries.

use emu_core::{Observable, Value};
use f18a::Op;
use f18a::opcode::{encode, encode_branch};
use ga144::{Chip, NodeImage};

fn spin_image(coord: u16) -> NodeImage {
    // Push a literal, then spin at address 2 forever.
    let words = vec![
        encode(&[Op::FetchP, Op::Nop, Op::Nop, Op::Nop]).expect("encodes"),
        0x123,
        encode_branch(&[], Op::Jump, 2).expect("encodes"),
    ];
    NodeImage {
        coord,
        mem: words.iter().map(|&w| Some(w)).collect(),
        len: words.len() as u8,
        p: Some(0),
        ..NodeImage::default()
    }
}

#[test]
fn breakpoint_stops_the_scheduler() {
    let mut chip = Chip::new();
    chip.step_n(300);
    chip.install_image(&spin_image(304)).expect("installs");
    chip.add_breakpoint(304, 2).expect("valid");

    // The spin word at 2 is fetched over and over; every budget slice
    // reports the hit.
    assert!(chip.step_n(10_000), "breakpoint must be observed");
    assert!(chip.step_n(10_000), "spin re-fetches the breakpoint address");

    chip.clear_breakpoints();
    assert!(!chip.step_n(1_000));
}

#[test]
fn snapshot_reflects_node_state() {
    let mut chip = Chip::new();
    chip.step_n(300);
    chip.install_image(&spin_image(304)).expect("installs");
    chip.step_n(50);

    let snap = chip.snapshot_node(304).expect("node exists");
    assert_eq!(snap.coord, 304);
    assert_eq!(snap.t, 0x123);
    assert_eq!(snap.state, "Running");
    assert!(snap.time_ns > 0.0);
    assert_eq!(snap.ram.len(), 64);

    assert_eq!(chip.snapshot().len(), 144);
}

#[test]
fn chip_query_paths_reach_nodes() {
    let mut chip = Chip::new();
    chip.step_n(300);
    chip.install_image(&spin_image(304)).expect("installs");
    chip.step_n(50);

    assert_eq!(chip.query("node.304.t"), Some(Value::U32(0x123)));
    assert!(matches!(chip.query("time"), Some(Value::F64(t)) if t > 0.0));
    assert_eq!(chip.query("node.304.bogus"), None);
    assert_eq!(chip.query("bogus"), None);
}
