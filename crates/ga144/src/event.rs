//! The discrete-event queue.
//!
//! A pool-backed sorted linked list of `(time, kind, payload)` records.
//! Insertion keeps time order; an arrival that ties an existing time is
//! nudged forward by a small epsilon until unique, so dequeued times
//! are strictly increasing and equal-time arrivals run in insertion
//! order. Determinism depends on this total order.

use emu_core::Nanos;

/// Queue capacity. Overflow is a programming error and fatal.
pub const CAPACITY: usize = 1024;

/// Nudge applied to resolve exact time ties.
const EPSILON: Nanos = Nanos::new(0.001);

/// What an event fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Payload is a node index; the node executes one instruction.
    Node,
    /// Payload is an index into the serial bit schedule.
    Serial,
}

/// A scheduled event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Event {
    pub time: Nanos,
    pub kind: EventKind,
    pub payload: u16,
}

const NIL: usize = usize::MAX;

#[derive(Debug, Clone, Copy)]
struct Cell {
    event: Event,
    next: usize,
}

/// Sorted pending-event list over a fixed pool.
#[derive(Debug)]
pub struct EventQueue {
    pool: Vec<Cell>,
    /// Head of the sorted pending list.
    head: usize,
    /// Head of the free list.
    free: usize,
    len: usize,
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl EventQueue {
    #[must_use]
    pub fn new() -> Self {
        let dummy = Event { time: Nanos::ZERO, kind: EventKind::Node, payload: 0 };
        let mut pool = Vec::with_capacity(CAPACITY);
        for i in 0..CAPACITY {
            pool.push(Cell {
                event: dummy,
                next: if i + 1 < CAPACITY { i + 1 } else { NIL },
            });
        }
        Self { pool, head: NIL, free: 0, len: 0 }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Time of the soonest event.
    #[must_use]
    pub fn peek_time(&self) -> Option<Nanos> {
        if self.head == NIL { None } else { Some(self.pool[self.head].event.time) }
    }

    /// Insert an event, nudging its time past any exact tie.
    ///
    /// # Panics
    ///
    /// Panics when the pool is exhausted; a run that queues more than
    /// [`CAPACITY`] events at once has lost its way.
    pub fn insert(&mut self, mut event: Event) {
        assert!(self.free != NIL, "event queue overflow ({CAPACITY} pending events)");

        // Walk to the insertion point, bumping the time while it
        // collides with an already-queued event.
        let mut prev = NIL;
        let mut cur = self.head;
        while cur != NIL {
            let t = self.pool[cur].event.time;
            if t > event.time {
                break;
            }
            if t == event.time {
                event.time += EPSILON;
            }
            prev = cur;
            cur = self.pool[cur].next;
        }

        let slot = self.free;
        self.free = self.pool[slot].next;
        self.pool[slot] = Cell { event, next: cur };
        if prev == NIL {
            self.head = slot;
        } else {
            self.pool[prev].next = slot;
        }
        self.len += 1;
    }

    /// Dequeue the soonest event.
    pub fn pop(&mut self) -> Option<Event> {
        if self.head == NIL {
            return None;
        }
        let slot = self.head;
        let event = self.pool[slot].event;
        self.head = self.pool[slot].next;
        self.pool[slot].next = self.free;
        self.free = slot;
        self.len -= 1;
        Some(event)
    }

    /// Remove every pending event matching kind and payload.
    ///
    /// Used when a node suspends: its not-yet-fired wake-up must not
    /// dangle in the queue.
    pub fn remove(&mut self, kind: EventKind, payload: u16) {
        let mut prev = NIL;
        let mut cur = self.head;
        while cur != NIL {
            let next = self.pool[cur].next;
            let e = &self.pool[cur].event;
            if e.kind == kind && e.payload == payload {
                if prev == NIL {
                    self.head = next;
                } else {
                    self.pool[prev].next = next;
                }
                self.pool[cur].next = self.free;
                self.free = cur;
                self.len -= 1;
            } else {
                prev = cur;
            }
            cur = next;
        }
    }

    /// True if an event with this kind and payload is pending.
    #[must_use]
    pub fn contains(&self, kind: EventKind, payload: u16) -> bool {
        let mut cur = self.head;
        while cur != NIL {
            let e = &self.pool[cur].event;
            if e.kind == kind && e.payload == payload {
                return true;
            }
            cur = self.pool[cur].next;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node_event(time_ns: f64, payload: u16) -> Event {
        Event { time: Nanos::new(time_ns), kind: EventKind::Node, payload }
    }

    #[test]
    fn pops_in_time_order() {
        let mut q = EventQueue::new();
        q.insert(node_event(3.0, 3));
        q.insert(node_event(1.0, 1));
        q.insert(node_event(2.0, 2));
        let order: Vec<u16> = std::iter::from_fn(|| q.pop()).map(|e| e.payload).collect();
        assert_eq!(order, vec![1, 2, 3]);
    }

    #[test]
    fn ties_resolve_in_insertion_order() {
        let mut q = EventQueue::new();
        q.insert(node_event(5.0, 10));
        q.insert(node_event(5.0, 11));
        q.insert(node_event(5.0, 12));
        let a = q.pop().expect("first");
        let b = q.pop().expect("second");
        let c = q.pop().expect("third");
        assert_eq!((a.payload, b.payload, c.payload), (10, 11, 12));
        assert!(a.time < b.time && b.time < c.time);
    }

    #[test]
    fn dequeued_times_strictly_increase() {
        let mut q = EventQueue::new();
        for i in 0..100u16 {
            q.insert(node_event(f64::from(i % 7), i));
        }
        let mut last = f64::NEG_INFINITY;
        while let Some(e) = q.pop() {
            assert!(e.time.get() > last, "tie survived: {} vs {}", e.time.get(), last);
            last = e.time.get();
        }
    }

    #[test]
    fn remove_cancels_all_matching() {
        let mut q = EventQueue::new();
        q.insert(node_event(1.0, 7));
        q.insert(node_event(2.0, 8));
        q.insert(node_event(3.0, 7));
        q.remove(EventKind::Node, 7);
        assert_eq!(q.len(), 1);
        assert_eq!(q.pop().expect("one left").payload, 8);
    }

    #[test]
    fn freed_slots_recycle() {
        let mut q = EventQueue::new();
        for round in 0..10 {
            for i in 0..CAPACITY as u16 {
                q.insert(node_event(f64::from(i), i));
            }
            assert_eq!(q.len(), CAPACITY);
            while q.pop().is_some() {}
            assert!(q.is_empty(), "round {round}");
        }
    }

    #[test]
    #[should_panic(expected = "event queue overflow")]
    fn overflow_is_fatal() {
        let mut q = EventQueue::new();
        for i in 0..=CAPACITY as u16 {
            q.insert(node_event(0.5, i));
        }
    }
}
