//! GA144 — an event-driven emulator for the 144-node F18A mesh.
//!
//! The chip boots the way the silicon does: a compiled program becomes
//! an async-boot byte stream, the RS232 codec turns it into timed
//! pin17 edges, and node 708's boot ROM decodes and propagates it
//! across the mesh by port execution. Hosts observe the run through
//! the tagged I/O ring and node snapshots.

pub mod boot;
pub mod chip;
pub mod event;
pub mod program;
pub mod ring;
pub mod serial;

pub use chip::{Chip, NodeSnapshot};
pub use program::{Issue, NodeImage, Program};
pub use ring::{IoDelta, IoRecord};
pub use serial::Segment;
