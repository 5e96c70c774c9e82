//! Per-node thermal and timing model.
//!
//! Each executed opcode heats the node and takes a jittered amount of
//! simulated time; heat decays exponentially and warmer nodes run
//! slower. Every node owns its PRNG, seeded at reset, so a run is
//! reproducible regardless of what the host does between steps.

use crate::opcode::Op;

/// Thermal time constant in nanoseconds.
const TAU_NS: f64 = 50.0;

/// Energy-to-temperature coupling.
const K_ET: f64 = 0.02;

/// Jitter coefficient.
const CJ: f64 = 0.02;

/// Deterministic slowdown per unit temperature.
const SLOWDOWN: f64 = 0.003;

/// Floor on any instruction duration, ns.
const MIN_STEP_NS: f64 = 0.1;

/// Suspended-node leakage power, expressed in pJ per ns (100 nW).
const LEAKAGE_PJ_PER_NS: f64 = 1.0e-4;

/// Base execution cost of one opcode.
#[derive(Debug, Clone, Copy)]
pub struct OpCost {
    pub base_ns: f64,
    pub energy_pj: f64,
}

/// Control-flow and memory opcodes.
const COST_MEMORY: OpCost = OpCost { base_ns: 5.1, energy_pj: 23.0 };
/// ALU, stack, and register opcodes.
const COST_ALU: OpCost = OpCost { base_ns: 1.5, energy_pj: 6.75 };
/// `unext` re-runs the current word without touching memory.
const COST_UNEXT: OpCost = OpCost { base_ns: 2.0, energy_pj: 9.0 };

/// Base time/energy for one opcode.
#[must_use]
pub const fn op_cost(op: Op) -> OpCost {
    match op {
        Op::Unext => COST_UNEXT,
        Op::Ret
        | Op::Ex
        | Op::Jump
        | Op::Call
        | Op::Next
        | Op::If
        | Op::MinusIf
        | Op::FetchP
        | Op::FetchPlus
        | Op::FetchB
        | Op::Fetch
        | Op::StoreP
        | Op::StorePlus
        | Op::StoreB
        | Op::Store => COST_MEMORY,
        _ => COST_ALU,
    }
}

/// Per-node thermal state.
#[derive(Debug, Clone)]
pub struct Thermal {
    /// Dimensionless temperature above ambient.
    pub temperature: f64,
    /// Lifetime energy in picojoules.
    pub total_energy_pj: f64,
    /// The node's own clock, in nanoseconds.
    pub simulated_time_ns: f64,
    /// Jitter applied to the most recent instruction, ns.
    pub last_jitter_ns: f64,
    /// xorshift32 state.
    rng: u32,
    /// Cached second Box–Muller deviate.
    spare: Option<f64>,
}

impl Thermal {
    #[must_use]
    pub fn new(seed: u32) -> Self {
        Self {
            temperature: 0.0,
            total_energy_pj: 0.0,
            simulated_time_ns: 0.0,
            last_jitter_ns: 0.0,
            // xorshift32 cycles on zero.
            rng: if seed == 0 { 0x9E37_79B9 } else { seed },
            spare: None,
        }
    }

    /// Reset to cold, re-seeding the PRNG.
    pub fn reset(&mut self, seed: u32) {
        *self = Self::new(seed);
    }

    fn next_u32(&mut self) -> u32 {
        let mut x = self.rng;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.rng = x;
        x
    }

    /// Uniform deviate in (0, 1).
    fn uniform(&mut self) -> f64 {
        (f64::from(self.next_u32()) + 1.0) / (f64::from(u32::MAX) + 2.0)
    }

    /// Standard normal deviate via Box–Muller.
    fn normal(&mut self) -> f64 {
        if let Some(z) = self.spare.take() {
            return z;
        }
        let u1 = self.uniform();
        let u2 = self.uniform();
        let radius = (-2.0 * u1.ln()).sqrt();
        let angle = 2.0 * std::f64::consts::PI * u2;
        self.spare = Some(radius * angle.sin());
        radius * angle.cos()
    }

    /// Account one executed opcode: decay, heat, jitter, slowdown.
    ///
    /// Advances the node's clock and returns the jittered duration.
    pub fn advance(&mut self, cost: OpCost) -> f64 {
        self.temperature *= (-cost.base_ns / TAU_NS).exp();
        self.temperature += cost.energy_pj * K_ET;
        self.total_energy_pj += cost.energy_pj;

        let sigma = CJ * cost.base_ns * self.temperature.abs().sqrt();
        let jitter = sigma * self.normal();
        self.last_jitter_ns = jitter;

        let dt = ((cost.base_ns + jitter) * (1.0 + SLOWDOWN * self.temperature)).max(MIN_STEP_NS);
        self.simulated_time_ns += dt;
        dt
    }

    /// Cool a suspended node across an idle gap, charging leakage.
    ///
    /// Moves the node's clock up to `now_ns` (never backward).
    pub fn idle_to(&mut self, now_ns: f64) {
        let elapsed = now_ns - self.simulated_time_ns;
        if elapsed <= 0.0 {
            return;
        }
        self.temperature *= (-elapsed / TAU_NS).exp();
        self.total_energy_pj += elapsed * LEAKAGE_PJ_PER_NS;
        self.simulated_time_ns = now_ns;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_for_fixed_seed() {
        let mut a = Thermal::new(708);
        let mut b = Thermal::new(708);
        for _ in 0..1000 {
            let da = a.advance(COST_MEMORY);
            let db = b.advance(COST_MEMORY);
            assert!((da - db).abs() < f64::EPSILON);
        }
        assert!((a.simulated_time_ns - b.simulated_time_ns).abs() < f64::EPSILON);
    }

    #[test]
    fn seeds_diverge() {
        let mut a = Thermal::new(708);
        let mut b = Thermal::new(709);
        for _ in 0..10 {
            a.advance(COST_ALU);
            b.advance(COST_ALU);
        }
        assert!((a.simulated_time_ns - b.simulated_time_ns).abs() > 1e-12);
    }

    #[test]
    fn time_is_strictly_increasing() {
        let mut t = Thermal::new(1);
        let mut last = 0.0;
        for _ in 0..10_000 {
            t.advance(COST_ALU);
            assert!(t.simulated_time_ns > last);
            last = t.simulated_time_ns;
        }
    }

    #[test]
    fn durations_respect_floor() {
        let mut t = Thermal::new(42);
        for _ in 0..10_000 {
            let dt = t.advance(COST_UNEXT);
            assert!(dt >= MIN_STEP_NS);
        }
    }

    #[test]
    fn idle_cools_and_never_rewinds() {
        let mut t = Thermal::new(3);
        t.advance(COST_MEMORY);
        let hot = t.temperature;
        let now = t.simulated_time_ns + 1000.0;
        t.idle_to(now);
        assert!(t.temperature < hot);
        assert!((t.simulated_time_ns - now).abs() < f64::EPSILON);
        t.idle_to(now - 500.0);
        assert!((t.simulated_time_ns - now).abs() < f64::EPSILON);
    }
}
