//! Ghost smoothing between recorded states.

use glam::Vec2;

use crate::bike::{BikeState, RiderJoints};
use crate::geom::RotMatrix;

// Equal endpoints come back bit-for-bit, and so do t = 0 and t = 1.
fn lerp(a: f32, b: f32, t: f32) -> f32 {
    if a == b { a } else { a * (1.0 - t) + b * t }
}

fn lerp_v(a: Vec2, b: Vec2, t: f32) -> Vec2 {
    Vec2::new(lerp(a.x, b.x, t), lerp(a.y, b.y, t))
}

fn normalize_rot(c: f32, s: f32, fallback: &RotMatrix) -> RotMatrix {
    let d = (c * c + s * s).sqrt();
    if d <= f32::EPSILON {
        return *fallback;
    }
    [c / d, -s / d, s / d, c / d]
}

fn lerp_rot(a: &RotMatrix, b: &RotMatrix, t: f32) -> RotMatrix {
    if a == b || t <= 0.0 {
        return *a;
    }
    if t >= 1.0 {
        return *b;
    }
    normalize_rot(lerp(a[0], b[0], t), lerp(a[2], b[2], t), a)
}

fn lerp_rider(a: &RiderJoints, b: &RiderJoints, t: f32) -> RiderJoints {
    RiderJoints {
        hand: lerp_v(a.hand, b.hand, t),
        elbow: lerp_v(a.elbow, b.elbow, t),
        shoulder: lerp_v(a.shoulder, b.shoulder, t),
        lower_body: lerp_v(a.lower_body, b.lower_body, t),
        knee: lerp_v(a.knee, b.knee, t),
        foot: lerp_v(a.foot, b.foot, t),
        head: lerp_v(a.head, b.head, t),
        wanted_hand: lerp_v(a.wanted_hand, b.wanted_hand, t),
        wanted_foot: lerp_v(a.wanted_foot, b.wanted_foot, t),
    }
}

/// Linear interpolation between two recorded states.
///
/// `t` is clamped to `[0, 1]`. States facing different directions are not
/// blended: `a` is returned. Wheel spin is not blended either (it wraps
/// too fast between records); the nearest record's rotation is used.
pub fn interpolate_linear(a: &BikeState, b: &BikeState, t: f32) -> BikeState {
    if a.dir != b.dir {
        return a.clone();
    }
    let t = if t.is_nan() { 0.0 } else { t.clamp(0.0, 1.0) };
    let (near_rear, near_front) = if t < 0.5 {
        (a.rear_wheel_rot, a.front_wheel_rot)
    } else {
        (b.rear_wheel_rot, b.front_wheel_rot)
    };
    BikeState {
        dir: a.dir,
        engine_rpm: lerp(a.engine_rpm, b.engine_rpm, t),
        game_time: lerp(a.game_time, b.game_time, t),
        center: lerp_v(a.center, b.center, t),
        rear_wheel: lerp_v(a.rear_wheel, b.rear_wheel, t),
        front_wheel: lerp_v(a.front_wheel, b.front_wheel, t),
        relaxed_rear_wheel: lerp_v(a.relaxed_rear_wheel, b.relaxed_rear_wheel, t),
        relaxed_front_wheel: lerp_v(a.relaxed_front_wheel, b.relaxed_front_wheel, t),
        swing_anchor: lerp_v(a.swing_anchor, b.swing_anchor, t),
        front_anchor: lerp_v(a.front_anchor, b.front_anchor, t),
        swing_anchor2: lerp_v(a.swing_anchor2, b.swing_anchor2, t),
        front_anchor2: lerp_v(a.front_anchor2, b.front_anchor2, t),
        frame_rot: lerp_rot(&a.frame_rot, &b.frame_rot, t),
        rear_wheel_rot: near_rear,
        front_wheel_rot: near_front,
        rider: lerp_rider(&a.rider, &b.rider, t),
        rider2: lerp_rider(&a.rider2, &b.rider2, t),
        prev_rq: lerp_v(a.prev_rq, b.prev_rq, t),
        prev_fq: lerp_v(a.prev_fq, b.prev_fq, t),
        prev_pfq: lerp_v(a.prev_pfq, b.prev_pfq, t),
        prev_phq: lerp_v(a.prev_phq, b.prev_phq, t),
        prev_pfq2: lerp_v(a.prev_pfq2, b.prev_pfq2, t),
        prev_phq2: lerp_v(a.prev_phq2, b.prev_phq2, t),
    }
}

fn catmull_rom(p0: f32, p1: f32, p2: f32, p3: f32, t: f32) -> f32 {
    let t2 = t * t;
    let t3 = t2 * t;
    0.5 * ((2.0 * p1)
        + (-p0 + p2) * t
        + (2.0 * p0 - 5.0 * p1 + 4.0 * p2 - p3) * t2
        + (-p0 + 3.0 * p1 - 3.0 * p2 + p3) * t3)
}

fn catmull_rom_v(p: [Vec2; 4], t: f32) -> Vec2 {
    Vec2::new(
        catmull_rom(p[0].x, p[1].x, p[2].x, p[3].x, t),
        catmull_rom(p[0].y, p[1].y, p[2].y, p[3].y, t),
    )
}

/// Cubic interpolation over the segment `s[1] -> s[2]`, using `s[0]` and
/// `s[3]` as tangent controls. Falls back to linear when the four states
/// do not all face the same way.
pub fn interpolate_cubic(s: [&BikeState; 4], t: f32) -> BikeState {
    let [a, b, c, d] = s;
    let mut out = interpolate_linear(b, c, t);
    if a.dir != b.dir || b.dir != c.dir || c.dir != d.dir {
        return out;
    }
    let t = if t.is_nan() { 0.0 } else { t.clamp(0.0, 1.0) };
    let pick = |f: fn(&BikeState) -> Vec2| catmull_rom_v([f(a), f(b), f(c), f(d)], t);

    out.center = pick(|s| s.center);
    out.rear_wheel = pick(|s| s.rear_wheel);
    out.front_wheel = pick(|s| s.front_wheel);
    out.engine_rpm = catmull_rom(a.engine_rpm, b.engine_rpm, c.engine_rpm, d.engine_rpm, t);
    let fc = catmull_rom(a.frame_rot[0], b.frame_rot[0], c.frame_rot[0], d.frame_rot[0], t);
    let fs = catmull_rom(a.frame_rot[2], b.frame_rot[2], c.frame_rot[2], d.frame_rot[2], t);
    out.frame_rot = normalize_rot(fc, fs, &out.frame_rot);

    let rider = |s: &BikeState| s.active_rider().clone();
    let r = [rider(a), rider(b), rider(c), rider(d)];
    let joint = |f: fn(&RiderJoints) -> Vec2| catmull_rom_v([f(&r[0]), f(&r[1]), f(&r[2]), f(&r[3])], t);
    let head = joint(|j| j.head);
    let hand = joint(|j| j.hand);
    let elbow = joint(|j| j.elbow);
    let shoulder = joint(|j| j.shoulder);
    let lower_body = joint(|j| j.lower_body);
    let knee = joint(|j| j.knee);
    let foot = joint(|j| j.foot);
    let active = out.active_rider_mut();
    active.head = head;
    active.hand = hand;
    active.elbow = elbow;
    active.shoulder = shoulder;
    active.lower_body = lower_body;
    active.knee = knee;
    active.foot = foot;
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bike::{BikeParameters, Direction};
    use crate::geom::rot_from_angle;

    fn pair() -> (BikeState, BikeState) {
        let params = BikeParameters::default();
        let mut a = BikeState::at_rest(Vec2::new(0.0, 0.0), Direction::Right, &params);
        a.game_time = 1.0;
        a.engine_rpm = 1000.0;
        let mut b = BikeState::at_rest(Vec2::new(1.0, 0.5), Direction::Right, &params);
        b.game_time = 1.04;
        b.engine_rpm = 2000.0;
        b.frame_rot = rot_from_angle(0.3);
        (a, b)
    }

    // -----------------------------------------------------------------------
    // Test 1: Endpoints are returned exactly
    // -----------------------------------------------------------------------
    #[test]
    fn endpoints_exact() {
        let (a, b) = pair();
        assert_eq!(interpolate_linear(&a, &b, 0.0), a);
        assert_eq!(interpolate_linear(&a, &b, 1.0), b);
        assert_eq!(interpolate_linear(&a, &a, 0.37), a);
    }

    // -----------------------------------------------------------------------
    // Test 2: Midpoint blends positions and keeps the rotation orthonormal
    // -----------------------------------------------------------------------
    #[test]
    fn midpoint_blends() {
        let (a, b) = pair();
        let m = interpolate_linear(&a, &b, 0.5);
        assert!((m.center - Vec2::new(0.5, 0.25)).length() < 1e-6);
        assert!((m.engine_rpm - 1500.0).abs() < 1e-3);
        let r = m.frame_rot;
        assert!((r[0] * r[0] + r[2] * r[2] - 1.0).abs() < 1e-5);
    }

    // -----------------------------------------------------------------------
    // Test 3: Out-of-range t clamps
    // -----------------------------------------------------------------------
    #[test]
    fn t_clamps() {
        let (a, b) = pair();
        assert_eq!(interpolate_linear(&a, &b, -3.0), a);
        assert_eq!(interpolate_linear(&a, &b, 7.0), b);
        assert_eq!(interpolate_linear(&a, &b, f32::NAN), a);
    }

    // -----------------------------------------------------------------------
    // Test 4: Direction change returns the first state
    // -----------------------------------------------------------------------
    #[test]
    fn direction_change_returns_first() {
        let (a, mut b) = pair();
        b.dir = Direction::Left;
        assert_eq!(interpolate_linear(&a, &b, 0.8), a);
    }

    // -----------------------------------------------------------------------
    // Test 5: Cubic passes through the inner control points
    // -----------------------------------------------------------------------
    #[test]
    fn cubic_passes_through_controls() {
        let params = BikeParameters::default();
        let s: Vec<_> = (0..4)
            .map(|i| BikeState::at_rest(Vec2::new(i as f32, (i * i) as f32), Direction::Right, &params))
            .collect();
        let at0 = interpolate_cubic([&s[0], &s[1], &s[2], &s[3]], 0.0);
        let at1 = interpolate_cubic([&s[0], &s[1], &s[2], &s[3]], 1.0);
        assert!((at0.center - s[1].center).length() < 1e-5);
        assert!((at1.center - s[2].center).length() < 1e-5);
        let mid = interpolate_cubic([&s[0], &s[1], &s[2], &s[3]], 0.5);
        assert!(mid.center.x > 1.0 && mid.center.x < 2.0);
    }

    #[test]
    fn cubic_mixed_directions_is_linear() {
        let params = BikeParameters::default();
        let a = BikeState::at_rest(Vec2::ZERO, Direction::Left, &params);
        let b = BikeState::at_rest(Vec2::X, Direction::Right, &params);
        let c = BikeState::at_rest(Vec2::new(2.0, 0.0), Direction::Right, &params);
        let d = BikeState::at_rest(Vec2::new(3.0, 0.0), Direction::Right, &params);
        assert_eq!(interpolate_cubic([&a, &b, &c, &d], 0.3), interpolate_linear(&b, &c, 0.3));
    }
}
