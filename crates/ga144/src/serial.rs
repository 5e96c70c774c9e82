//! RS232 bit-level codec and the pin17 bit schedule.
//!
//! The wire convention, seen through the inverting level shifter:
//! idle is LOW, the start bit is HIGH, the eight data bits go out
//! LSB-first inverted (data 1 drives LOW), the stop bit is LOW, and
//! each byte trails two bit periods of idle. Adjacent equal levels
//! merge into one segment, which is what makes the double-wide HIGH
//! opening pulse of the boot stream's calibration bytes.

use emu_core::Nanos;

/// Boot streams always run at this rate.
pub const BOOT_BAUD: f64 = 921_600.0;

/// Gap inserted between appended bit streams, ns.
pub const STREAM_GAP_NS: f64 = 1_000_000.0;

/// One level held for a duration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment {
    pub level: bool,
    pub duration_ns: f64,
}

/// Nanoseconds per bit at a baud rate.
#[must_use]
pub fn bit_ns(baud: f64) -> f64 {
    1.0e9 / baud
}

/// Nanoseconds per bit from a tick count.
#[must_use]
pub fn ticks_to_ns(ticks: f64) -> f64 {
    Nanos::from_ticks(ticks).get()
}

fn push_level(out: &mut Vec<Segment>, level: bool, duration_ns: f64) {
    if duration_ns <= 0.0 {
        return;
    }
    if let Some(last) = out.last_mut() {
        if last.level == level {
            last.duration_ns += duration_ns;
            return;
        }
    }
    out.push(Segment { level, duration_ns });
}

/// Encode bytes as 8N1 segments.
///
/// `lead_in_ns` of idle (LOW) precedes the first start bit.
#[must_use]
pub fn encode_8n1(bytes: &[u8], bit_period_ns: f64, lead_in_ns: f64) -> Vec<Segment> {
    let mut out = Vec::new();
    push_level(&mut out, false, lead_in_ns);
    for &byte in bytes {
        // Start bit.
        push_level(&mut out, true, bit_period_ns);
        // Data, LSB first, inverted on the wire.
        for bit in 0..8 {
            let data = (byte >> bit) & 1 != 0;
            push_level(&mut out, !data, bit_period_ns);
        }
        // Stop bit plus two trailing idle bits.
        push_level(&mut out, false, 3.0 * bit_period_ns);
    }
    out
}

/// Decode 8N1 segments back to bytes.
///
/// Finds each rising start edge, samples the eight data-bit centers,
/// and resyncs after the stop bit. Usable down to two ticks per bit.
#[must_use]
pub fn decode_8n1(segments: &[Segment], bit_period_ns: f64) -> Vec<u8> {
    // Absolute-time view of the waveform.
    let mut edges: Vec<(f64, bool)> = Vec::with_capacity(segments.len());
    let mut t = 0.0;
    for seg in segments {
        edges.push((t, seg.level));
        t += seg.duration_ns;
    }
    let end = t;
    let level_at = |t: f64| -> bool {
        let mut level = false;
        for &(start, l) in &edges {
            if start > t {
                break;
            }
            level = l;
        }
        level
    };

    let mut bytes = Vec::new();
    let mut cursor = 0.0;
    loop {
        // Next rising edge at or after the cursor.
        let mut found = None;
        for (i, &(at, level)) in edges.iter().enumerate() {
            if level && at + 1.0e-9 >= cursor && (i == 0 || !edges[i - 1].1) {
                found = Some(at);
                break;
            }
        }
        let Some(start) = found else {
            break;
        };
        if start + 9.0 * bit_period_ns > end {
            break;
        }
        let mut byte = 0u8;
        for bit in 0..8 {
            let sample = start + (1.5 + f64::from(bit)) * bit_period_ns;
            if !level_at(sample) {
                byte |= 1 << bit;
            }
        }
        bytes.push(byte);
        // Past the data bits and into the stop bit; the next rising
        // edge is the next start.
        cursor = start + 9.5 * bit_period_ns;
    }
    bytes
}

/// Reconstruct a pin waveform from tagged ring records.
///
/// Picks one node's I/O writes out of a ring delta and turns the pin1
/// drive field (bits 1:0, `11` high / `10` low) into level segments —
/// the serial sniffer feeds these to [`decode_8n1`]. The final drive
/// level is held for `tail_ns` so the last byte's bits have width.
#[must_use]
pub fn pin1_segments(records: &[crate::ring::IoRecord], coord: u16, tail_ns: f64) -> Vec<Segment> {
    let mut out = Vec::new();
    let mut last: Option<(f64, bool)> = None;
    for rec in records.iter().filter(|r| r.coord() == coord) {
        let level = rec.value() & 0b11 == 0b11;
        if let Some((since, held)) = last {
            push_level(&mut out, held, rec.time_ns - since);
        } else if rec.time_ns > 0.0 {
            // Idle LOW before the first write.
            push_level(&mut out, false, rec.time_ns);
        }
        last = Some((rec.time_ns, level));
    }
    if let Some((_, held)) = last {
        push_level(&mut out, held, tail_ns);
    }
    out
}

/// A pin17 bit schedule: segment boundaries pinned to absolute times.
///
/// The chip holds one schedule per run and keeps a single SERIAL event
/// in flight for the next undelivered edge.
#[derive(Debug, Default)]
pub struct BitSchedule {
    /// `(absolute time ns, level)` per segment start, in time order.
    edges: Vec<(f64, bool)>,
    /// Absolute end of the final segment.
    tail_ns: f64,
    /// Next edge to deliver.
    next: usize,
}

impl BitSchedule {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Absolute end of the schedule.
    #[must_use]
    pub fn tail_ns(&self) -> f64 {
        self.tail_ns
    }

    /// Append segments, starting no earlier than `now_ns` and strictly
    /// after the current tail plus the inter-stream gap.
    ///
    /// A start time inside the already-scheduled stream would be a
    /// contract violation; the floor below makes overlap impossible,
    /// so a too-early request is quietly pushed past the tail.
    pub fn append(&mut self, segments: &[Segment], now_ns: f64) -> f64 {
        let gap_floor = if self.edges.is_empty() { now_ns } else { self.tail_ns + STREAM_GAP_NS };
        let start = now_ns.max(gap_floor);
        let mut t = start;
        for seg in segments {
            self.edges.push((t, seg.level));
            t += seg.duration_ns;
        }
        self.tail_ns = t;
        start
    }

    /// The next undelivered edge.
    #[must_use]
    pub fn peek(&self, index: usize) -> Option<(f64, bool)> {
        self.edges.get(index).copied()
    }

    #[must_use]
    pub fn next_index(&self) -> usize {
        self.next
    }

    /// Mark an edge delivered and return the index of the next one.
    pub fn advance(&mut self) -> Option<usize> {
        self.next += 1;
        if self.next < self.edges.len() { Some(self.next) } else { None }
    }

    pub fn clear(&mut self) {
        self.edges.clear();
        self.tail_ns = 0.0;
        self.next = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use emu_core::TICK_NS;

    const BIT: f64 = 150.0; // 100 ticks

    #[test]
    fn tick_and_baud_conversions() {
        assert!((ticks_to_ns(100.0) - BIT).abs() < 1e-9);
        assert!((bit_ns(BOOT_BAUD) - 1_085.069_444).abs() < 1e-3);
        assert!((TICK_NS - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn encode_all_ones_merges_to_two_segments() {
        // 0xFF: start HIGH, eight data-1 bits LOW, stop LOW, idle LOW —
        // one HIGH bit then eleven merged LOW bits.
        let segs = encode_8n1(&[0xFF], BIT, 0.0);
        assert_eq!(
            segs,
            vec![
                Segment { level: true, duration_ns: BIT },
                Segment { level: false, duration_ns: 11.0 * BIT },
            ]
        );
    }

    #[test]
    fn encode_zero_merges_start_with_data() {
        // 0x00: start HIGH merges with eight data-0 HIGH bits.
        let segs = encode_8n1(&[0x00], BIT, 0.0);
        assert_eq!(
            segs,
            vec![
                Segment { level: true, duration_ns: 9.0 * BIT },
                Segment { level: false, duration_ns: 3.0 * BIT },
            ]
        );
    }

    #[test]
    fn lead_in_prepends_idle() {
        let segs = encode_8n1(&[0xFF], BIT, 300.0);
        assert_eq!(segs[0], Segment { level: false, duration_ns: 300.0 });
    }

    #[test]
    fn round_trip_bytes() {
        let payload = [0x00, 0xFF, 0xAE, 0x2D, 0x5A, 0x01, 0x80];
        let segs = encode_8n1(&payload, BIT, 450.0);
        assert_eq!(decode_8n1(&segs, BIT), payload);
    }

    #[test]
    fn round_trip_at_two_ticks_per_bit() {
        let bit = 2.0 * TICK_NS;
        let payload = [0xC3, 0x3C, 0x7E];
        let segs = encode_8n1(&payload, bit, 0.0);
        assert_eq!(decode_8n1(&segs, bit), payload);
    }

    #[test]
    fn calibration_byte_opens_double_wide() {
        // Boot byte0 always has data bit 0 = 0 on the wire (HIGH),
        // giving a two-bit opening pulse.
        let byte0 = 0xD2u8; // bit0 clear
        let segs = encode_8n1(&[byte0], BIT, 0.0);
        assert_eq!(segs[0], Segment { level: true, duration_ns: 2.0 * BIT });
    }

    #[test]
    fn sniffer_rebuilds_bytes_from_ring_records() {
        use crate::ring::IoRecord;

        // A guest bit-banging pin1 writes the I/O register at each
        // level change; rebuild the waveform and decode it.
        let payload = [0xAE, 0x42];
        let segs = encode_8n1(&payload, BIT, 600.0);
        let mut records = Vec::new();
        let mut t = 0.0;
        for seg in &segs {
            let drive = if seg.level { 0b11 } else { 0b10 };
            records.push(IoRecord {
                tagged: (708u64 << 18) | drive,
                time_ns: t,
                jitter_ns: 0.0,
            });
            t += seg.duration_ns;
        }
        let rebuilt = pin1_segments(&records, 708, 4.0 * BIT);
        assert_eq!(decode_8n1(&rebuilt, BIT), payload);
    }

    #[test]
    fn schedule_appends_with_gap() {
        let mut sched = BitSchedule::new();
        let segs = encode_8n1(&[0xFF], BIT, 0.0);
        let first_start = sched.append(&segs, 100.0);
        assert!((first_start - 100.0).abs() < 1e-9);
        let tail = sched.tail_ns();
        let second_start = sched.append(&segs, 0.0);
        assert!((second_start - (tail + STREAM_GAP_NS)).abs() < 1e-9);
    }

    #[test]
    fn schedule_walks_edges_in_order() {
        let mut sched = BitSchedule::new();
        sched.append(&encode_8n1(&[0xFF], BIT, 0.0), 0.0);
        let mut last = f64::NEG_INFINITY;
        let mut idx = Some(sched.next_index());
        while let Some(i) = idx {
            let (t, _) = sched.peek(i).expect("edge exists");
            assert!(t >= last);
            last = t;
            idx = sched.advance();
        }
    }
}
