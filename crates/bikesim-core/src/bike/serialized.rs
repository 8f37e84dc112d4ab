//! Compact fixed-size bike state records.
//!
//! Every position except the frame centre is stored as an 8-bit offset
//! from the centre, scaled by the largest offset on that axis. Rotation
//! matrices keep only their first column, 8 bits per component.

use glam::Vec2;

use crate::bike::{BikeAnchors, BikeState, Direction};
use crate::fixed::{Centis, centis_to_secs};
use crate::geom::{IDENTITY_ROT, RotMatrix};

/// Size in bytes of one encoded record.
pub const SERIALIZED_STATE_SIZE: usize = 40;

const FLAG_DIR_LEFT: u8 = 0x01;
const FLAG_DIR_RIGHT: u8 = 0x02;

// ---------------------------------------------------------------------------
// Scalar codecs
// ---------------------------------------------------------------------------

/// Map `coord` to a signed byte relative to `reference`.
///
/// The offset is clamped to `[-max_delta, max_delta]` and scaled to
/// `[-127, 127]`. A non-positive `max_delta` encodes every coordinate as
/// the reference itself.
pub fn encode_coordinate(reference: f32, max_delta: f32, coord: f32) -> i8 {
    if !(max_delta > 0.0) {
        return 0;
    }
    let delta = (coord - reference).clamp(-max_delta, max_delta);
    let n = (127.0 * delta / max_delta).round();
    if n.is_nan() {
        return 0;
    }
    n.clamp(-127.0, 127.0) as i8
}

pub fn decode_coordinate(reference: f32, max_delta: f32, code: i8) -> f32 {
    reference + (code as f32 / 127.0) * max_delta
}

fn unit_to_byte(v: f32) -> u8 {
    (v * 127.0 + 127.0).round().clamp(0.0, 255.0) as u8
}

/// Pack the first column of a rotation matrix into 16 bits.
pub fn encode_rotation(m: &RotMatrix) -> u16 {
    ((unit_to_byte(m[0]) as u16) << 8) | unit_to_byte(m[2]) as u16
}

/// Unpack a rotation, renormalizing the column. A null column decodes to
/// the identity.
pub fn decode_rotation(n: u16) -> RotMatrix {
    let c = ((n >> 8) as f32 - 127.0) / 127.0;
    let s = ((n & 0xff) as f32 - 127.0) / 127.0;
    let d = (c * c + s * s).sqrt();
    if d == 0.0 {
        return IDENTITY_ROT;
    }
    let (c, s) = (c / d, s / d);
    [c, -s, s, c]
}

/// Engine speed range used to quantize RPM into a byte.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineRpmRange {
    pub min: f32,
    pub max: f32,
}

impl EngineRpmRange {
    fn encode(&self, rpm: f32) -> u8 {
        let span = self.max - self.min;
        if !(span > 0.0) {
            return 0;
        }
        ((rpm - self.min) / span * 255.0).round().clamp(0.0, 255.0) as u8
    }

    fn decode(&self, code: u8) -> f32 {
        self.min + (self.max - self.min) * code as f32 / 255.0
    }
}

// ---------------------------------------------------------------------------
// SerializedBikeState
// ---------------------------------------------------------------------------

/// One 40-byte replay record.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SerializedBikeState {
    pub flags: u8,
    /// Seconds.
    pub game_time: f32,
    pub frame_x: f32,
    pub frame_y: f32,
    pub max_x_diff: f32,
    pub max_y_diff: f32,
    pub rear_wheel_rot: u16,
    pub front_wheel_rot: u16,
    pub frame_rot: u16,
    pub engine_rpm: u8,
    pub rear_wheel_x: i8,
    pub rear_wheel_y: i8,
    pub front_wheel_x: i8,
    pub front_wheel_y: i8,
    pub elbow_x: i8,
    pub elbow_y: i8,
    pub shoulder_x: i8,
    pub shoulder_y: i8,
    pub lower_body_x: i8,
    pub lower_body_y: i8,
    pub knee_x: i8,
    pub knee_y: i8,
}

impl SerializedBikeState {
    /// Encode a live bike state taken at scene time `time`.
    pub fn from_bike_state(state: &BikeState, time: Centis, rpm: EngineRpmRange) -> Self {
        let rider = state.active_rider();
        let c = state.center;
        let points = [
            state.front_wheel,
            state.rear_wheel,
            rider.elbow,
            rider.shoulder,
            rider.lower_body,
            rider.knee,
        ];
        let max_x = points.iter().fold(0.0f32, |m, p| m.max((c.x - p.x).abs()));
        let max_y = points.iter().fold(0.0f32, |m, p| m.max((c.y - p.y).abs()));

        let ex = |v: f32| encode_coordinate(c.x, max_x, v);
        let ey = |v: f32| encode_coordinate(c.y, max_y, v);

        Self {
            flags: match state.dir {
                Direction::Left => FLAG_DIR_LEFT,
                Direction::Right => FLAG_DIR_RIGHT,
            },
            game_time: centis_to_secs(time),
            frame_x: c.x,
            frame_y: c.y,
            max_x_diff: max_x,
            max_y_diff: max_y,
            rear_wheel_rot: encode_rotation(&state.rear_wheel_rot),
            front_wheel_rot: encode_rotation(&state.front_wheel_rot),
            frame_rot: encode_rotation(&state.frame_rot),
            engine_rpm: rpm.encode(state.engine_rpm),
            rear_wheel_x: ex(state.rear_wheel.x),
            rear_wheel_y: ey(state.rear_wheel.y),
            front_wheel_x: ex(state.front_wheel.x),
            front_wheel_y: ey(state.front_wheel.y),
            elbow_x: ex(rider.elbow.x),
            elbow_y: ey(rider.elbow.y),
            shoulder_x: ex(rider.shoulder.x),
            shoulder_y: ey(rider.shoulder.y),
            lower_body_x: ex(rider.lower_body.x),
            lower_body_y: ey(rider.lower_body.y),
            knee_x: ex(rider.knee.x),
            knee_y: ey(rider.knee.y),
        }
    }

    pub fn direction(&self) -> Direction {
        if self.flags & FLAG_DIR_LEFT != 0 {
            Direction::Left
        } else {
            Direction::Right
        }
    }

    fn decode_point(&self, x: i8, y: i8) -> Vec2 {
        Vec2::new(
            decode_coordinate(self.frame_x, self.max_x_diff, x),
            decode_coordinate(self.frame_y, self.max_y_diff, y),
        )
    }

    /// Write this record into `state`. Only the active rider is decoded;
    /// the mirrored rider keeps whatever pose it had.
    pub fn apply_to(
        &self,
        state: &mut BikeState,
        anchors: &BikeAnchors,
        neck_length: f32,
        rpm: EngineRpmRange,
    ) {
        state.game_time = self.game_time;
        state.center = Vec2::new(self.frame_x, self.frame_y);
        state.rear_wheel = self.decode_point(self.rear_wheel_x, self.rear_wheel_y);
        state.front_wheel = self.decode_point(self.front_wheel_x, self.front_wheel_y);
        state.frame_rot = decode_rotation(self.frame_rot);
        state.front_wheel_rot = decode_rotation(self.front_wheel_rot);
        state.rear_wheel_rot = decode_rotation(self.rear_wheel_rot);
        state.engine_rpm = rpm.decode(self.engine_rpm);
        state.refresh_from_frame(anchors);

        state.dir = self.direction();
        let elbow = self.decode_point(self.elbow_x, self.elbow_y);
        let shoulder = self.decode_point(self.shoulder_x, self.shoulder_y);
        let lower_body = self.decode_point(self.lower_body_x, self.lower_body_y);
        let knee = self.decode_point(self.knee_x, self.knee_y);
        let rider = state.active_rider_mut();
        rider.hand = rider.wanted_hand;
        rider.foot = rider.wanted_foot;
        rider.elbow = elbow;
        rider.shoulder = shoulder;
        rider.lower_body = lower_body;
        rider.knee = knee;
        state.update_heads(neck_length);
    }

    /// Decode into a fresh state. The inactive rider is put in its rest pose.
    pub fn to_bike_state(
        &self,
        anchors: &BikeAnchors,
        neck_length: f32,
        rpm: EngineRpmRange,
    ) -> BikeState {
        let mut state = BikeState::default();
        self.apply_to(&mut state, anchors, neck_length, rpm);
        state.pose_rider_at_rest(anchors, state.dir.flipped());
        state.update_heads(neck_length);
        state
    }

    pub fn to_bytes(&self) -> [u8; SERIALIZED_STATE_SIZE] {
        let mut out = [0u8; SERIALIZED_STATE_SIZE];
        out[0] = self.flags;
        out[1..5].copy_from_slice(&self.game_time.to_le_bytes());
        out[5..9].copy_from_slice(&self.frame_x.to_le_bytes());
        out[9..13].copy_from_slice(&self.frame_y.to_le_bytes());
        out[13..17].copy_from_slice(&self.max_x_diff.to_le_bytes());
        out[17..21].copy_from_slice(&self.max_y_diff.to_le_bytes());
        out[21..23].copy_from_slice(&self.rear_wheel_rot.to_le_bytes());
        out[23..25].copy_from_slice(&self.front_wheel_rot.to_le_bytes());
        out[25..27].copy_from_slice(&self.frame_rot.to_le_bytes());
        out[27] = self.engine_rpm;
        let codes = [
            self.rear_wheel_x,
            self.rear_wheel_y,
            self.front_wheel_x,
            self.front_wheel_y,
            self.elbow_x,
            self.elbow_y,
            self.shoulder_x,
            self.shoulder_y,
            self.lower_body_x,
            self.lower_body_y,
            self.knee_x,
            self.knee_y,
        ];
        for (slot, code) in out[28..].iter_mut().zip(codes) {
            *slot = code as u8;
        }
        out
    }

    /// Decode one record. Returns `None` when fewer than
    /// [`SERIALIZED_STATE_SIZE`] bytes are given.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let b: &[u8; SERIALIZED_STATE_SIZE] = bytes.get(..SERIALIZED_STATE_SIZE)?.try_into().ok()?;
        let f = |i: usize| f32::from_le_bytes([b[i], b[i + 1], b[i + 2], b[i + 3]]);
        let u = |i: usize| u16::from_le_bytes([b[i], b[i + 1]]);
        let c = |i: usize| b[i] as i8;
        Some(Self {
            flags: b[0],
            game_time: f(1),
            frame_x: f(5),
            frame_y: f(9),
            max_x_diff: f(13),
            max_y_diff: f(17),
            rear_wheel_rot: u(21),
            front_wheel_rot: u(23),
            frame_rot: u(25),
            engine_rpm: b[27],
            rear_wheel_x: c(28),
            rear_wheel_y: c(29),
            front_wheel_x: c(30),
            front_wheel_y: c(31),
            elbow_x: c(32),
            elbow_y: c(33),
            shoulder_x: c(34),
            shoulder_y: c(35),
            lower_body_x: c(36),
            lower_body_y: c(37),
            knee_x: c(38),
            knee_y: c(39),
        })
    }
}
