//! Bike kinematic state, rider pose and the fixed bike geometry.
//!
//! A [`BikeState`] is pure data: the physics step writes it for live
//! players, the replay decoder writes it for ghosts. Everything derived from
//! the frame transform (suspension anchors, relaxed wheel positions, wanted
//! hand/foot positions, the head) is recomputed through
//! [`BikeState::refresh_from_frame`] and [`BikeState::update_heads`].

pub mod interpolate;
pub mod serialized;

use glam::Vec2;
use serde::{Deserialize, Serialize};

use crate::geom::{IDENTITY_ROT, RotMatrix, rot_apply};

pub use interpolate::{interpolate_cubic, interpolate_linear};
pub use serialized::{
    SerializedBikeState, decode_coordinate, decode_rotation, encode_coordinate, encode_rotation,
};

// ---------------------------------------------------------------------------
// Direction
// ---------------------------------------------------------------------------

/// Driving direction. Selects which rider joint set is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Direction {
    Left,
    #[default]
    Right,
}

impl Direction {
    pub fn flipped(self) -> Self {
        match self {
            Direction::Left => Direction::Right,
            Direction::Right => Direction::Left,
        }
    }
}

// ---------------------------------------------------------------------------
// Bike parameters & anchors
// ---------------------------------------------------------------------------

/// Physical dimensions and masses of the bike and rider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BikeParameters {
    pub wheel_radius: f32,
    /// Height of the frame's centre of mass above the wheel axles.
    pub mass_elevation: f32,
    pub wheel_base: f32,
    pub rear_susp_anchor: Vec2,
    pub front_susp_anchor: Vec2,
    pub rider_elbow: Vec2,
    pub rider_hand: Vec2,
    pub rider_shoulder: Vec2,
    pub rider_lower_body: Vec2,
    pub rider_knee: Vec2,
    pub rider_foot: Vec2,
    pub head_size: f32,
    pub neck_length: f32,
    pub wheel_mass: f32,
    pub body_part_mass: f32,
    pub frame_mass: f32,
    pub inertial_length: f32,
    pub inertial_height: f32,
    pub max_brake: f32,
    pub max_engine: f32,
}

impl Default for BikeParameters {
    fn default() -> Self {
        Self {
            wheel_radius: 0.35,
            mass_elevation: 0.9,
            wheel_base: 1.4,
            rear_susp_anchor: Vec2::new(-0.11, -0.3),
            front_susp_anchor: Vec2::new(0.4, 0.4),
            rider_elbow: Vec2::new(-0.1, 0.6),
            rider_hand: Vec2::new(0.3, 0.45),
            rider_shoulder: Vec2::new(-0.2, 1.1),
            rider_lower_body: Vec2::new(-0.3, 0.4),
            rider_knee: Vec2::new(0.3, 0.2),
            rider_foot: Vec2::new(0.0, -0.37),
            head_size: 0.18,
            neck_length: 0.22,
            wheel_mass: 5.0,
            body_part_mass: 5.0,
            frame_mass: 90.0,
            inertial_length: 1.2,
            inertial_height: 1.8,
            max_brake: 100.0,
            max_engine: 300.0,
        }
    }
}

/// Frame-local anchor offsets derived once from [`BikeParameters`].
/// The `*2` variants are the mirrored offsets used when driving left.
#[derive(Debug, Clone, PartialEq)]
pub struct BikeAnchors {
    /// Point under the bike touching the ground at rest.
    pub ground_point: Vec2,
    /// Relaxed rear wheel position.
    pub rear_wheel: Vec2,
    /// Relaxed front wheel position.
    pub front_wheel: Vec2,
    pub swing: Vec2,
    pub front: Vec2,
    pub swing2: Vec2,
    pub front2: Vec2,
    pub hand: Vec2,
    pub foot: Vec2,
    pub hand2: Vec2,
    pub foot2: Vec2,
    pub rider: RiderOffsets,
    pub rider2: RiderOffsets,
}

/// Frame-local rest positions of the rider hinges.
#[derive(Debug, Clone, PartialEq)]
pub struct RiderOffsets {
    pub elbow: Vec2,
    pub shoulder: Vec2,
    pub lower_body: Vec2,
    pub knee: Vec2,
}

impl BikeAnchors {
    pub fn from_parameters(p: &BikeParameters) -> Self {
        let mirror = |v: Vec2| Vec2::new(-v.x, v.y);
        let t = Vec2::new(0.0, -p.mass_elevation);
        Self {
            ground_point: t,
            rear_wheel: t + Vec2::new(-0.5 * p.wheel_base, p.wheel_radius),
            front_wheel: t + Vec2::new(0.5 * p.wheel_base, p.wheel_radius),
            swing: p.rear_susp_anchor,
            front: p.front_susp_anchor,
            swing2: mirror(p.rear_susp_anchor),
            front2: mirror(p.front_susp_anchor),
            hand: p.rider_hand,
            foot: p.rider_foot,
            hand2: mirror(p.rider_hand),
            foot2: mirror(p.rider_foot),
            rider: RiderOffsets {
                elbow: p.rider_elbow,
                shoulder: p.rider_shoulder,
                lower_body: p.rider_lower_body,
                knee: p.rider_knee,
            },
            rider2: RiderOffsets {
                elbow: mirror(p.rider_elbow),
                shoulder: mirror(p.rider_shoulder),
                lower_body: mirror(p.rider_lower_body),
                knee: mirror(p.rider_knee),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Rider joints
// ---------------------------------------------------------------------------

/// World positions of one rider joint chain.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RiderJoints {
    pub hand: Vec2,
    pub elbow: Vec2,
    pub shoulder: Vec2,
    pub lower_body: Vec2,
    pub knee: Vec2,
    pub foot: Vec2,
    pub head: Vec2,
    pub wanted_hand: Vec2,
    pub wanted_foot: Vec2,
}

impl RiderJoints {
    pub fn torso(&self) -> Vec2 {
        (self.lower_body + self.shoulder) * 0.5
    }

    pub fn upper_arm(&self) -> Vec2 {
        (self.elbow + self.shoulder) * 0.5
    }

    pub fn lower_arm(&self) -> Vec2 {
        (self.elbow + self.hand) * 0.5
    }

    pub fn upper_leg(&self) -> Vec2 {
        (self.lower_body + self.knee) * 0.5
    }

    pub fn lower_leg(&self) -> Vec2 {
        (self.foot + self.knee) * 0.5
    }

    /// Head sits on the neck, extending the lower-body-to-shoulder axis.
    fn update_head(&mut self, neck_length: f32) {
        let axis = (self.shoulder - self.lower_body).normalize_or_zero();
        self.head = self.shoulder + axis * neck_length;
    }
}

// ---------------------------------------------------------------------------
// BikeState
// ---------------------------------------------------------------------------

/// The full pose of one bike and its rider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BikeState {
    pub dir: Direction,
    pub engine_rpm: f32,
    /// Timestamp of this pose, in seconds.
    pub game_time: f32,

    pub center: Vec2,
    pub rear_wheel: Vec2,
    pub front_wheel: Vec2,
    pub relaxed_rear_wheel: Vec2,
    pub relaxed_front_wheel: Vec2,
    pub swing_anchor: Vec2,
    pub front_anchor: Vec2,
    pub swing_anchor2: Vec2,
    pub front_anchor2: Vec2,

    pub frame_rot: RotMatrix,
    pub rear_wheel_rot: RotMatrix,
    pub front_wheel_rot: RotMatrix,

    /// Rider when driving right.
    pub rider: RiderJoints,
    /// Mirrored rider when driving left.
    pub rider2: RiderJoints,

    // Previous spring errors for the damped corrections.
    pub prev_rq: Vec2,
    pub prev_fq: Vec2,
    pub prev_pfq: Vec2,
    pub prev_phq: Vec2,
    pub prev_pfq2: Vec2,
    pub prev_phq2: Vec2,
}

impl Default for BikeState {
    fn default() -> Self {
        Self {
            dir: Direction::Right,
            engine_rpm: 0.0,
            game_time: 0.0,
            center: Vec2::ZERO,
            rear_wheel: Vec2::ZERO,
            front_wheel: Vec2::ZERO,
            relaxed_rear_wheel: Vec2::ZERO,
            relaxed_front_wheel: Vec2::ZERO,
            swing_anchor: Vec2::ZERO,
            front_anchor: Vec2::ZERO,
            swing_anchor2: Vec2::ZERO,
            front_anchor2: Vec2::ZERO,
            frame_rot: IDENTITY_ROT,
            rear_wheel_rot: IDENTITY_ROT,
            front_wheel_rot: IDENTITY_ROT,
            rider: RiderJoints::default(),
            rider2: RiderJoints::default(),
            prev_rq: Vec2::ZERO,
            prev_fq: Vec2::ZERO,
            prev_pfq: Vec2::ZERO,
            prev_phq: Vec2::ZERO,
            prev_pfq2: Vec2::ZERO,
            prev_phq2: Vec2::ZERO,
        }
    }
}

impl BikeState {
    /// A bike standing still with its frame centre at `center`, wheels
    /// relaxed and both riders in their rest pose.
    pub fn at_rest(center: Vec2, dir: Direction, params: &BikeParameters) -> Self {
        let anchors = BikeAnchors::from_parameters(params);
        let mut state = Self {
            dir,
            center,
            ..Self::default()
        };
        state.refresh_from_frame(&anchors);
        state.rear_wheel = state.relaxed_rear_wheel;
        state.front_wheel = state.relaxed_front_wheel;
        state.pose_rider_at_rest(&anchors, Direction::Right);
        state.pose_rider_at_rest(&anchors, Direction::Left);
        state.update_heads(params.neck_length);
        state
    }

    /// Recompute every point that is a fixed offset of the frame transform.
    pub fn refresh_from_frame(&mut self, anchors: &BikeAnchors) {
        let m = self.frame_rot;
        let c = self.center;
        self.swing_anchor = rot_apply(&m, anchors.swing, c);
        self.front_anchor = rot_apply(&m, anchors.front, c);
        self.swing_anchor2 = rot_apply(&m, anchors.swing2, c);
        self.front_anchor2 = rot_apply(&m, anchors.front2, c);
        self.rider.wanted_hand = rot_apply(&m, anchors.hand, c);
        self.rider.wanted_foot = rot_apply(&m, anchors.foot, c);
        self.rider2.wanted_hand = rot_apply(&m, anchors.hand2, c);
        self.rider2.wanted_foot = rot_apply(&m, anchors.foot2, c);
        self.relaxed_rear_wheel = rot_apply(&m, anchors.rear_wheel, c);
        self.relaxed_front_wheel = rot_apply(&m, anchors.front_wheel, c);
    }

    /// Put the hinges of one rider at their frame-relative rest positions.
    /// Hand and foot go to their wanted positions.
    pub fn pose_rider_at_rest(&mut self, anchors: &BikeAnchors, dir: Direction) {
        let m = self.frame_rot;
        let c = self.center;
        let (rider, offsets) = match dir {
            Direction::Right => (&mut self.rider, &anchors.rider),
            Direction::Left => (&mut self.rider2, &anchors.rider2),
        };
        rider.elbow = rot_apply(&m, offsets.elbow, c);
        rider.shoulder = rot_apply(&m, offsets.shoulder, c);
        rider.lower_body = rot_apply(&m, offsets.lower_body, c);
        rider.knee = rot_apply(&m, offsets.knee, c);
        rider.hand = rider.wanted_hand;
        rider.foot = rider.wanted_foot;
    }

    pub fn update_heads(&mut self, neck_length: f32) {
        self.rider.update_head(neck_length);
        self.rider2.update_head(neck_length);
    }

    /// Rider joint set selected by the driving direction.
    pub fn active_rider(&self) -> &RiderJoints {
        match self.dir {
            Direction::Right => &self.rider,
            Direction::Left => &self.rider2,
        }
    }

    pub fn active_rider_mut(&mut self) -> &mut RiderJoints {
        match self.dir {
            Direction::Right => &mut self.rider,
            Direction::Left => &mut self.rider2,
        }
    }

    /// Head of the active rider.
    pub fn head(&self) -> Vec2 {
        self.active_rider().head
    }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

/// Rider input for one step.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BikeController {
    /// Throttle in `(0, 1]`, brake in `[-1, 0)`.
    pub drive: f32,
    /// Lean: positive pulls the front up.
    pub pull: f32,
    /// Request a direction change on the next step.
    pub change_dir: bool,
}

impl BikeController {
    pub fn stop(&mut self) {
        *self = Self::default();
    }
}
