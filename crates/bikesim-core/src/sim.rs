//! Scene clock and state hashing.
//!
//! The scene clock counts hundredths of a second. A speed factor other than
//! one scales each step; the fractional part of a scaled step is carried in
//! fixed point so slow motion advances exactly the same way on every
//! platform.

use glam::Vec2;

use crate::fixed::{Centis, Fixed64};

/// Duration of one physics step, in hundredths of a second.
pub const PHYS_STEP_SIZE: Centis = 1;

// ---------------------------------------------------------------------------
// Scene clock
// ---------------------------------------------------------------------------

/// Result of advancing the clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClockAdvance {
    /// Hundredths actually added (negative when playing backwards).
    pub delta: Centis,
    /// The clock moved backwards this step.
    pub moved_back: bool,
}

/// Authoritative scene time with speed factor and pause.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SimClock {
    time: Centis,
    carry: Fixed64,
    speed: Fixed64,
    paused: bool,
}

impl SimClock {
    pub fn new() -> Self {
        Self {
            time: 0,
            carry: Fixed64::ZERO,
            speed: Fixed64::from_num(1),
            paused: false,
        }
    }

    pub fn time(&self) -> Centis {
        self.time
    }

    /// Reset to zero, keeping the speed factor.
    pub fn reset(&mut self) {
        self.time = 0;
        self.carry = Fixed64::ZERO;
    }

    /// Set the time directly, clamped at zero. Drops any fractional carry.
    pub fn set_time(&mut self, time: Centis) {
        self.time = time.max(0);
        self.carry = Fixed64::ZERO;
    }

    /// Speed factor in effect: zero while paused.
    pub fn speed(&self) -> Fixed64 {
        if self.paused { Fixed64::ZERO } else { self.speed }
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn toggle_pause(&mut self) {
        self.paused = !self.paused;
    }

    pub fn faster(&mut self, increment: Fixed64) {
        self.speed += increment;
    }

    /// Decrease the speed. With `clamp_at_zero` the clock can never run
    /// backwards (scripted or physics-block levels cannot be reverted).
    pub fn slower(&mut self, increment: Fixed64, clamp_at_zero: bool) {
        self.speed -= increment;
        if clamp_at_zero && self.speed < Fixed64::ZERO {
            self.speed = Fixed64::ZERO;
        }
    }

    /// Advance by `step` hundredths scaled by the speed factor.
    ///
    /// Time never goes below zero.
    pub fn advance(&mut self, step: Centis) -> ClockAdvance {
        let before = self.time;
        let speed = self.speed();
        if speed == Fixed64::from_num(1) {
            self.time += step;
        } else {
            let scaled = Fixed64::from_num(step) * speed + self.carry;
            let whole = scaled.round_to_zero();
            self.carry = scaled - whole;
            self.time += whole.to_num::<Centis>();
        }
        if self.time < 0 {
            self.time = 0;
            self.carry = Fixed64::ZERO;
        }
        ClockAdvance {
            delta: self.time - before,
            moved_back: self.time < before,
        }
    }
}

impl Default for SimClock {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// State hash
// ---------------------------------------------------------------------------

/// A simple deterministic hash of simulation state for desync detection.
///
/// Uses FNV-1a (64-bit) for speed and simplicity. Not cryptographic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateHash(pub u64);

impl StateHash {
    const FNV_OFFSET: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x100000001b3;

    pub fn new() -> Self {
        Self(Self::FNV_OFFSET)
    }

    pub fn write(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.0 ^= b as u64;
            self.0 = self.0.wrapping_mul(Self::FNV_PRIME);
        }
    }

    pub fn write_u64(&mut self, v: u64) {
        self.write(&v.to_le_bytes());
    }

    pub fn write_i64(&mut self, v: i64) {
        self.write(&v.to_le_bytes());
    }

    /// Floats are hashed by bit pattern.
    pub fn write_f32(&mut self, v: f32) {
        self.write(&v.to_bits().to_le_bytes());
    }

    pub fn write_vec2(&mut self, v: Vec2) {
        self.write_f32(v.x);
        self.write_f32(v.y);
    }

    pub fn write_fixed64(&mut self, v: Fixed64) {
        self.write(&v.to_bits().to_le_bytes());
    }

    pub fn finish(self) -> u64 {
        self.0
    }
}

impl Default for StateHash {
    fn default() -> Self {
        Self::new()
    }
}
