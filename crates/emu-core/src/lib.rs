//! Core types for event-driven chip emulation.
//!
//! Everything is timed in simulated nanoseconds. All component timing
//! derives from this. No exceptions.

mod coord;
mod observable;
mod time;

pub use coord::{Compass, Coord};
pub use observable::{Observable, Value};
pub use time::{Nanos, TICK_NS};
