//! 2D geometry primitives shared by collision, physics and zones.

use glam::Vec2;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Aabb
// ---------------------------------------------------------------------------

/// Axis-aligned bounding box. An empty box has `min > max`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: Vec2,
    pub max: Vec2,
}

impl Aabb {
    pub fn new(min: Vec2, max: Vec2) -> Self {
        Self { min, max }
    }

    pub fn empty() -> Self {
        Self {
            min: Vec2::splat(f32::INFINITY),
            max: Vec2::splat(f32::NEG_INFINITY),
        }
    }

    /// Box around a circle.
    pub fn around_circle(center: Vec2, radius: f32) -> Self {
        Self::new(center - Vec2::splat(radius), center + Vec2::splat(radius))
    }

    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y
    }

    pub fn add_point(&mut self, p: Vec2) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    pub fn add_circle(&mut self, center: Vec2, radius: f32) {
        self.add_point(center - Vec2::splat(radius));
        self.add_point(center + Vec2::splat(radius));
    }

    pub fn overlaps(&self, other: &Aabb) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
    }

    pub fn contains(&self, p: Vec2) -> bool {
        p.x >= self.min.x && p.x <= self.max.x && p.y >= self.min.y && p.y <= self.max.y
    }

    /// Whether a circle overlaps this box (box-vs-box test on the circle's
    /// bounding square, the way zone primitives are checked).
    pub fn touches_circle(&self, center: Vec2, radius: f32) -> bool {
        self.overlaps(&Aabb::around_circle(center, radius))
    }
}

// ---------------------------------------------------------------------------
// Segment
// ---------------------------------------------------------------------------

/// A level line segment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub a: Vec2,
    pub b: Vec2,
}

impl Segment {
    pub fn new(a: Vec2, b: Vec2) -> Self {
        Self { a, b }
    }

    pub fn bounds(&self) -> Aabb {
        Aabb::new(self.a.min(self.b), self.a.max(self.b))
    }

    /// Closest point on the segment to `p`.
    pub fn closest_point(&self, p: Vec2) -> Vec2 {
        let ab = self.b - self.a;
        let len2 = ab.length_squared();
        if len2 <= f32::EPSILON {
            return self.a;
        }
        let t = ((p - self.a).dot(ab) / len2).clamp(0.0, 1.0);
        self.a + ab * t
    }
}

/// A circle penetrating a segment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Contact {
    /// Point on the segment closest to the circle centre.
    pub point: Vec2,
    /// Unit normal pointing from the segment towards the circle centre.
    pub normal: Vec2,
    /// Penetration depth (radius minus distance), always positive.
    pub depth: f32,
}

/// Test a circle against a segment.
pub fn circle_segment_contact(center: Vec2, radius: f32, seg: &Segment) -> Option<Contact> {
    let point = seg.closest_point(center);
    let delta = center - point;
    let dist = delta.length();
    if dist >= radius {
        return None;
    }
    let normal = if dist > f32::EPSILON {
        delta / dist
    } else {
        // Centre exactly on the line: push along the segment's left normal.
        let dir = (seg.b - seg.a).normalize_or_zero();
        Vec2::new(-dir.y, dir.x)
    };
    Some(Contact {
        point,
        normal,
        depth: radius - dist,
    })
}

/// Whether two circles overlap.
pub fn circle_touches_circle(c1: Vec2, r1: f32, c2: Vec2, r2: f32) -> bool {
    let r = r1 + r2;
    c1.distance_squared(c2) < r * r
}

// ---------------------------------------------------------------------------
// Rotation matrices
// ---------------------------------------------------------------------------

/// A 2x2 rotation matrix stored row-major as `[m0, m1, m2, m3]`, i.e.
/// `[[cos, -sin], [sin, cos]]`.
pub type RotMatrix = [f32; 4];

pub const IDENTITY_ROT: RotMatrix = [1.0, 0.0, 0.0, 1.0];

pub fn rot_from_angle(angle: f32) -> RotMatrix {
    let (s, c) = angle.sin_cos();
    [c, -s, s, c]
}

/// Angle of a rotation matrix, in `[0, 2*pi)`.
pub fn rot_angle(m: &RotMatrix) -> f32 {
    let a = m[2].atan2(m[0]);
    if a < 0.0 { a + std::f32::consts::TAU } else { a }
}

/// Apply a rotation matrix to a local offset and translate by `origin`.
pub fn rot_apply(m: &RotMatrix, local: Vec2, origin: Vec2) -> Vec2 {
    Vec2::new(
        local.x * m[0] + local.y * m[1] + origin.x,
        local.x * m[2] + local.y * m[3] + origin.y,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aabb_overlap_and_empty() {
        let a = Aabb::new(Vec2::ZERO, Vec2::ONE);
        let b = Aabb::new(Vec2::splat(0.5), Vec2::splat(2.0));
        let c = Aabb::new(Vec2::splat(3.0), Vec2::splat(4.0));
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c));
        assert!(!a.overlaps(&Aabb::empty()));
        assert!(Aabb::empty().is_empty());
    }

    #[test]
    fn aabb_grows_with_points() {
        let mut bb = Aabb::empty();
        bb.add_point(Vec2::new(1.0, -1.0));
        bb.add_circle(Vec2::new(0.0, 0.0), 0.5);
        assert_eq!(bb.min, Vec2::new(-0.5, -1.0));
        assert_eq!(bb.max, Vec2::new(1.0, 0.5));
    }

    #[test]
    fn circle_above_floor_has_no_contact() {
        let floor = Segment::new(Vec2::new(-5.0, 0.0), Vec2::new(5.0, 0.0));
        assert!(circle_segment_contact(Vec2::new(0.0, 1.0), 0.35, &floor).is_none());
    }

    #[test]
    fn circle_sinking_into_floor_pushes_up() {
        let floor = Segment::new(Vec2::new(-5.0, 0.0), Vec2::new(5.0, 0.0));
        let c = circle_segment_contact(Vec2::new(0.0, 0.25), 0.35, &floor).unwrap();
        assert!((c.depth - 0.1).abs() < 1e-5);
        assert!((c.normal - Vec2::Y).length() < 1e-6);
        assert_eq!(c.point, Vec2::ZERO);
    }

    #[test]
    fn closest_point_clamps_to_endpoints() {
        let s = Segment::new(Vec2::ZERO, Vec2::X);
        assert_eq!(s.closest_point(Vec2::new(-3.0, 1.0)), Vec2::ZERO);
        assert_eq!(s.closest_point(Vec2::new(4.0, 1.0)), Vec2::X);
    }

    #[test]
    fn circles_touch() {
        assert!(circle_touches_circle(Vec2::ZERO, 1.0, Vec2::new(1.5, 0.0), 1.0));
        assert!(!circle_touches_circle(Vec2::ZERO, 0.5, Vec2::new(1.5, 0.0), 0.5));
    }

    #[test]
    fn rotation_round_trip() {
        let m = rot_from_angle(1.0);
        assert!((rot_angle(&m) - 1.0).abs() < 1e-5);
        let p = rot_apply(&rot_from_angle(std::f32::consts::FRAC_PI_2), Vec2::X, Vec2::ZERO);
        assert!((p - Vec2::Y).length() < 1e-6);
    }
}
