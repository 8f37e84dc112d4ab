//! Script-driven motions of entities and blocks.
//!
//! A motion advances one hundredth at a time and reports the total offset
//! (and rotation, for blocks spinning on themselves) accumulated over the
//! hundredths it was actually active for.

use std::f32::consts::TAU;

use glam::Vec2;
use serde::{Deserialize, Serialize};

use crate::fixed::Centis;
use crate::id::{BlockId, EntityId};

/// What a dynamic motion moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DynamicTarget {
    Entity(EntityId),
    Block(BlockId),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DynamicMotion {
    /// Circle of `radius` starting at `angle`.
    Rotation {
        angle: f32,
        speed: f32,
        radius: f32,
        origin: Vec2,
        previous: Vec2,
    },
    /// Back and forth along `(x, y)`.
    Translation {
        amplitude: Vec2,
        step: Vec2,
        total: Vec2,
        forward: bool,
    },
    /// Spin around the block's own rotation centre.
    SelfRotation { speed: f32 },
}

impl DynamicMotion {
    pub fn rotation(init_angle: f32, radius: f32, period: f32) -> Self {
        let speed = if period != 0.0 { TAU / period } else { 0.0 };
        let origin = Vec2::new(init_angle.cos(), init_angle.sin()) * radius;
        DynamicMotion::Rotation {
            angle: init_angle,
            speed,
            radius,
            origin,
            previous: Vec2::ZERO,
        }
    }

    pub fn translation(x: f32, y: f32, period: f32) -> Self {
        let amplitude = Vec2::new(x, y);
        let length = amplitude.length();
        let speed = if period != 0.0 { length * 2.0 / period } else { 0.0 };
        let step = if length != 0.0 {
            amplitude * (speed / length)
        } else {
            Vec2::ZERO
        };
        DynamicMotion::Translation {
            amplitude,
            step,
            total: Vec2::ZERO,
            forward: true,
        }
    }

    pub fn self_rotation(period: f32) -> Self {
        let speed = if period != 0.0 { TAU / period } else { 0.0 };
        DynamicMotion::SelfRotation { speed }
    }

    /// One hundredth of motion: (offset, rotation).
    fn step(&mut self) -> (Vec2, f32) {
        match self {
            DynamicMotion::Rotation {
                angle,
                speed,
                radius,
                origin,
                previous,
            } => {
                if *angle >= TAU {
                    *angle -= TAU;
                }
                let p = Vec2::new(angle.cos(), angle.sin()) * *radius - *origin;
                let d = p - *previous;
                *previous = p;
                *angle += *speed;
                (d, 0.0)
            }
            DynamicMotion::Translation {
                amplitude,
                step,
                total,
                forward,
            } => {
                let d = if *forward { *step } else { -*step };
                let sign = if *forward { 1.0 } else { -1.0 };
                *total += d.abs() * sign;
                if total.x < 0.0
                    || total.x > amplitude.x.abs()
                    || total.y < 0.0
                    || total.y > amplitude.y.abs()
                {
                    *forward = !*forward;
                }
                (d, 0.0)
            }
            DynamicMotion::SelfRotation { speed } => (Vec2::ZERO, *speed),
        }
    }
}

/// Accumulated movement produced by one update.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DynamicStep {
    pub offset: Vec2,
    pub rotation: f32,
}

/// A motion bound to a target and a `[start, end)` time window.
/// An `end` of zero never expires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DynamicObject {
    pub target: DynamicTarget,
    pub start: Centis,
    pub end: Centis,
    time: Centis,
    motion: DynamicMotion,
}

impl DynamicObject {
    pub fn new(target: DynamicTarget, motion: DynamicMotion, start: Centis, end: Centis) -> Self {
        Self {
            target,
            start,
            end,
            time: 0,
            motion,
        }
    }

    fn expired(&self) -> bool {
        self.end != 0 && self.time >= self.end
    }

    /// Advance by `cents` hundredths. Returns the movement and whether the
    /// object is still alive.
    pub fn next_state(&mut self, cents: Centis) -> (DynamicStep, bool) {
        if self.expired() {
            return (DynamicStep::default(), false);
        }
        let mut active = cents;
        if self.start > self.time {
            active -= self.start - self.time;
        }
        if self.end != 0 && self.time + cents > self.end {
            active -= self.time + cents - self.end;
        }
        let mut out = DynamicStep::default();
        for _ in 0..active.max(0) {
            let (d, r) = self.motion.step();
            out.offset += d;
            out.rotation += r;
        }
        self.time += cents;
        (out, !self.expired())
    }
}
