//! Fixed-step bike dynamics.
//!
//! Three rigid bodies (rear wheel, front wheel, frame) are tied together by
//! damped suspension springs acting between each wheel and its relaxed
//! position on the frame. Each rider's hand and foot are point masses pulled
//! towards their handlebar and footpeg anchors the same way. Contacts are
//! resolved at velocity level against the level lines near each wheel:
//! penetration is pushed out, approaching velocity is cancelled and the
//! tangential slip is removed up to the line's grip.
//!
//! Positions live in [`BikeState`]; velocities and controller memory live in
//! [`PhysicsSimulator`].

use glam::Vec2;
use serde::{Deserialize, Serialize};

use crate::bike::{
    BikeAnchors, BikeController, BikeParameters, BikeState, Direction, RiderJoints, RiderOffsets,
};
use crate::bike::serialized::EngineRpmRange;
use crate::collision::{CollisionSystem, Line};
use crate::fixed::{Centis, centis_to_secs};
use crate::geom::{Aabb, circle_segment_contact, rot_angle, rot_apply, rot_from_angle};

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Every tunable constant of the simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicsSettings {
    /// Seconds of simulated motion per second of game time.
    pub simulation_speed_factor: f32,
    pub bike: BikeParameters,
    pub rider_spring: f32,
    pub rider_damp: f32,
    pub rider_attitude_torque: f32,
    pub rider_attitude_defactor: f32,
    pub susp_spring: f32,
    pub susp_damp: f32,
    pub brake_factor: f32,
    pub engine_damp: f32,
    pub engine_rpm_min: f32,
    pub engine_rpm_max: f32,
    pub wheel_roll_resistance: f32,
    pub wheel_roll_resistance_max: f32,
    pub wheel_roll_velocity_max: f32,
    pub sleep_eps: f32,
    pub sleep_frames: u32,
    /// Wheel angular speed above which a driven, touching wheel spins.
    pub wheel_spin_threshold: f32,
}

impl Default for PhysicsSettings {
    fn default() -> Self {
        Self {
            simulation_speed_factor: 0.6,
            bike: BikeParameters::default(),
            rider_spring: 800.0,
            rider_damp: 500.0,
            rider_attitude_torque: 1000.0,
            rider_attitude_defactor: 0.5,
            susp_spring: 2000.0,
            susp_damp: 20000.0,
            brake_factor: 10.0,
            engine_damp: 0.4,
            engine_rpm_min: 400.0,
            engine_rpm_max: 7000.0,
            wheel_roll_resistance: 1.0,
            wheel_roll_resistance_max: 20.0,
            wheel_roll_velocity_max: 60.0,
            sleep_eps: 0.008,
            sleep_frames: 150,
            wheel_spin_threshold: 5.0,
        }
    }
}

impl PhysicsSettings {
    pub fn rpm_range(&self) -> EngineRpmRange {
        EngineRpmRange {
            min: self.engine_rpm_min,
            max: self.engine_rpm_max,
        }
    }
}

/// Attitude torques below this are glued to zero.
const ATTITUDE_GLUE: f32 = 100.0;

/// Distance under which a resting wheel still counts as touching.
const CONTACT_SLOP: f32 = 0.01;

/// Radius used to test rider joints against the level.
const BODY_MEMBER_RADIUS: f32 = 0.1;

// ---------------------------------------------------------------------------
// Step output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wheel {
    Front,
    Rear,
}

/// A driven wheel slipping on the ground this step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WheelSpin {
    pub point: Vec2,
    pub dir: Vec2,
}

/// Contact summary of one physics step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepContacts {
    pub front_wheel_touching: bool,
    pub rear_wheel_touching: bool,
    pub head_touching: bool,
    pub body_touching: bool,
    /// Wheels whose touching state flipped this step.
    pub wheel_transitions: Vec<(Wheel, bool)>,
    pub wheel_spin: Option<WheelSpin>,
    pub contact_points: Vec<Vec2>,
}

/// A force pushed onto the frame during `[start, end)`. An `end` of zero
/// never expires.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExternalForce {
    pub start: Centis,
    pub end: Centis,
    pub force: Vec2,
}

impl ExternalForce {
    fn active_at(&self, time: Centis) -> bool {
        self.start <= time && (self.end == 0 || time < self.end)
    }

    fn expired_at(&self, time: Centis) -> bool {
        self.end != 0 && time >= self.end
    }
}

/// Inputs of one step.
#[derive(Debug, Clone, Copy)]
pub struct StepInput<'a> {
    pub time: Centis,
    pub step: Centis,
    pub gravity: Vec2,
    pub controller: &'a BikeController,
    /// False once the rider is dead or finished: inputs are ignored.
    pub controls_enabled: bool,
    pub collision: &'a CollisionSystem,
}

// ---------------------------------------------------------------------------
// Bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Body {
    vel: Vec2,
    ang_vel: f32,
    angle: f32,
    force: Vec2,
    torque: f32,
}

impl Body {
    fn add_force_at(&mut self, force: Vec2, at: Vec2, center: Vec2) {
        self.force += force;
        self.torque += (at - center).perp_dot(force);
    }

    fn integrate_velocity(&mut self, gravity: Vec2, mass: f32, inertia: f32, dt: f32) {
        self.vel += (self.force / mass + gravity) * dt;
        if inertia > 0.0 {
            self.ang_vel += self.torque / inertia * dt;
        }
        self.force = Vec2::ZERO;
        self.torque = 0.0;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct RiderBodies {
    hand_vel: Vec2,
    foot_vel: Vec2,
}

// ---------------------------------------------------------------------------
// PhysicsSimulator
// ---------------------------------------------------------------------------

/// Dynamics of one live bike.
#[derive(Debug, Clone)]
pub struct PhysicsSimulator {
    settings: PhysicsSettings,
    anchors: BikeAnchors,
    rear: Body,
    front: Body,
    frame: Body,
    rider: RiderBodies,
    rider2: RiderBodies,
    attitude: f32,
    last_attitude_dir: f32,
    next_attitude_time: f32,
    still_frames: u32,
    forces: Vec<ExternalForce>,
    front_touching: bool,
    rear_touching: bool,
}

impl PhysicsSimulator {
    pub fn new(settings: PhysicsSettings, state: &BikeState) -> Self {
        let anchors = BikeAnchors::from_parameters(&settings.bike);
        let mut sim = Self {
            settings,
            anchors,
            rear: Body::default(),
            front: Body::default(),
            frame: Body::default(),
            rider: RiderBodies::default(),
            rider2: RiderBodies::default(),
            attitude: 0.0,
            last_attitude_dir: 0.0,
            next_attitude_time: -1000.0,
            still_frames: 0,
            forces: Vec::new(),
            front_touching: false,
            rear_touching: false,
        };
        sim.reset(state);
        sim
    }

    /// Forget every velocity and take angles from `state`.
    pub fn reset(&mut self, state: &BikeState) {
        self.rear = Body {
            angle: rot_angle(&state.rear_wheel_rot),
            ..Body::default()
        };
        self.front = Body {
            angle: rot_angle(&state.front_wheel_rot),
            ..Body::default()
        };
        self.frame = Body {
            angle: rot_angle(&state.frame_rot),
            ..Body::default()
        };
        self.rider = RiderBodies::default();
        self.rider2 = RiderBodies::default();
        self.attitude = 0.0;
        self.still_frames = 0;
    }

    pub fn settings(&self) -> &PhysicsSettings {
        &self.settings
    }

    pub fn anchors(&self) -> &BikeAnchors {
        &self.anchors
    }

    /// Frame centre position for a bike whose ground point sits at `start`.
    pub fn center_for_start(&self, start: Vec2) -> Vec2 {
        start - self.anchors.ground_point
    }

    /// Queue an external force. `start`/`end` are relative to `now`.
    pub fn add_body_force(&mut self, now: Centis, force: Vec2, start: Centis, end: Centis) {
        self.forces.push(ExternalForce {
            start: now + start,
            end: if end == 0 { 0 } else { now + end },
            force,
        });
        self.still_frames = 0;
    }

    pub fn is_sleeping(&self) -> bool {
        self.still_frames > self.settings.sleep_frames
    }

    pub fn rear_wheel_velocity(&self) -> f32 {
        self.rear.ang_vel
    }

    pub fn front_wheel_velocity(&self) -> f32 {
        self.front.ang_vel
    }

    pub fn frame_velocity(&self) -> Vec2 {
        self.frame.vel
    }

    fn force_at(&mut self, time: Centis) -> Vec2 {
        let total = self
            .forces
            .iter()
            .filter(|f| f.active_at(time))
            .fold(Vec2::ZERO, |acc, f| acc + f.force);
        self.forces.retain(|f| !f.expired_at(time));
        total
    }

    fn wheel_inertia(&self) -> f32 {
        let p = &self.settings.bike;
        0.5 * p.wheel_mass * p.wheel_radius * p.wheel_radius
    }

    fn frame_inertia(&self) -> f32 {
        let p = &self.settings.bike;
        p.frame_mass * (p.inertial_length * p.inertial_length + p.inertial_height * p.inertial_height)
            / 12.0
    }

    /// Advance `state` by one step.
    pub fn step(&mut self, state: &mut BikeState, input: StepInput<'_>) -> StepContacts {
        let s = self.settings.clone();
        let dt = centis_to_secs(input.step) * s.simulation_speed_factor;
        let ctrl = input.controller;
        let controls = input.controls_enabled;
        let mut out = StepContacts::default();

        // Sleep bookkeeping.
        let eps = s.sleep_eps;
        let still = [self.front.vel, self.rear.vel, self.frame.vel]
            .iter()
            .all(|v| v.x.abs() < eps && v.y.abs() < eps);
        if still {
            self.still_frames += 1;
        } else {
            self.still_frames = 0;
        }

        let external = self.force_at(input.time);
        if external != Vec2::ZERO {
            self.still_frames = 0;
            self.frame.force += external;
        }

        let sleeping = self.is_sleeping();

        // Suspension.
        if !sleeping {
            let fq = state.relaxed_front_wheel - state.front_wheel;
            let f_total = fq * s.susp_spring + (fq - state.prev_fq) * s.susp_damp;
            self.front.force += f_total;
            self.frame
                .add_force_at(-f_total, state.relaxed_front_wheel, state.center);
            state.prev_fq = fq;

            let rq = state.relaxed_rear_wheel - state.rear_wheel;
            let r_total = rq * s.susp_spring + (rq - state.prev_rq) * s.susp_damp;
            self.rear.force += r_total;
            self.frame
                .add_force_at(-r_total, state.relaxed_rear_wheel, state.center);
            state.prev_rq = rq;
        }

        // Attitude.
        let now = centis_to_secs(input.time);
        if controls
            && ctrl.pull != 0.0
            && (now > self.next_attitude_time || ctrl.pull * self.last_attitude_dir < 0.0)
        {
            self.attitude = ctrl.pull * s.rider_attitude_torque;
            self.last_attitude_dir = self.attitude;
            self.next_attitude_time = now + 0.6 * ctrl.pull.abs();
        }
        if self.attitude != 0.0 {
            self.still_frames = 0;
            self.frame.torque += self.attitude;
        }
        self.attitude *= s.rider_attitude_defactor;
        if self.attitude.abs() < ATTITUDE_GLUE {
            self.attitude = 0.0;
        }

        // Rolling resistance.
        if !sleeping {
            for wheel in [&mut self.rear, &mut self.front] {
                let resist = if wheel.ang_vel.abs() < s.wheel_roll_velocity_max {
                    s.wheel_roll_resistance
                } else {
                    s.wheel_roll_resistance_max
                };
                wheel.torque -= wheel.ang_vel * resist;
            }
        }

        // Engine speed.
        if controls {
            let f = match state.dir {
                Direction::Right => -self.rear.ang_vel,
                Direction::Left => self.front.ang_vel,
            }
            .max(0.0);
            let rpm = s.engine_rpm_min
                + (s.engine_rpm_max - s.engine_rpm_min) * (f / s.wheel_roll_velocity_max) * ctrl.drive;
            state.engine_rpm = rpm.clamp(s.engine_rpm_min, s.engine_rpm_max);
        }

        // Brake / throttle.
        if controls {
            if ctrl.drive < 0.0 {
                if !sleeping {
                    self.rear.torque += self.rear.ang_vel * s.brake_factor * ctrl.drive;
                    self.front.torque += self.front.ang_vel * s.brake_factor * ctrl.drive;
                }
            } else if ctrl.drive > 0.0 {
                let engine = s.bike.max_engine * s.engine_damp * ctrl.drive;
                match state.dir {
                    Direction::Right if self.rear.ang_vel > -s.wheel_roll_velocity_max => {
                        self.still_frames = 0;
                        self.rear.torque -= engine;
                    }
                    Direction::Left if self.front.ang_vel < s.wheel_roll_velocity_max => {
                        self.still_frames = 0;
                        self.front.torque += engine;
                    }
                    _ => {}
                }
            }
        }

        // Rider springs (both riders, so a direction change is smooth).
        let rider_spring = |q: Vec2, prev: Vec2| q * s.rider_spring + (q - prev) * s.rider_damp;
        let pfq = state.rider.wanted_foot - state.rider.foot;
        let phq = state.rider.wanted_hand - state.rider.hand;
        let pfq2 = state.rider2.wanted_foot - state.rider2.foot;
        let phq2 = state.rider2.wanted_hand - state.rider2.hand;
        let forces = [
            rider_spring(pfq, state.prev_pfq),
            rider_spring(phq, state.prev_phq),
            rider_spring(pfq2, state.prev_pfq2),
            rider_spring(phq2, state.prev_phq2),
        ];
        state.prev_pfq = pfq;
        state.prev_phq = phq;
        state.prev_pfq2 = pfq2;
        state.prev_phq2 = phq2;

        // A sleeping bike stays exactly where it is.
        if self.is_sleeping() {
            self.frame.force = Vec2::ZERO;
            self.frame.torque = 0.0;
            self.front.force = Vec2::ZERO;
            self.front.torque = 0.0;
            self.rear.force = Vec2::ZERO;
            self.rear.torque = 0.0;
            self.detect_contacts(state, input.collision, controls, ctrl, &mut out);
            return out;
        }

        let m_wheel = s.bike.wheel_mass;
        let m_part = s.bike.body_part_mass;
        let i_wheel = self.wheel_inertia();
        let i_frame = self.frame_inertia();

        // Rider reactions load the frame at the anchors.
        let wanted = [
            state.rider.wanted_foot,
            state.rider.wanted_hand,
            state.rider2.wanted_foot,
            state.rider2.wanted_hand,
        ];
        for (f, at) in forces.iter().zip(wanted) {
            self.frame.add_force_at(-*f, at, state.center);
        }

        let g = input.gravity;
        self.front.integrate_velocity(g, m_wheel, i_wheel, dt);
        self.rear.integrate_velocity(g, m_wheel, i_wheel, dt);
        self.frame.integrate_velocity(g, s.bike.frame_mass, i_frame, dt);
        self.rider.foot_vel += (forces[0] / m_part + g) * dt;
        self.rider.hand_vel += (forces[1] / m_part + g) * dt;
        self.rider2.foot_vel += (forces[2] / m_part + g) * dt;
        self.rider2.hand_vel += (forces[3] / m_part + g) * dt;

        state.front_wheel += self.front.vel * dt;
        state.rear_wheel += self.rear.vel * dt;
        state.center += self.frame.vel * dt;
        state.rider.foot += self.rider.foot_vel * dt;
        state.rider.hand += self.rider.hand_vel * dt;
        state.rider2.foot += self.rider2.foot_vel * dt;
        state.rider2.hand += self.rider2.hand_vel * dt;

        // Contacts.
        let radius = s.bike.wheel_radius;
        let front_lines = lines_around(input.collision, state.front_wheel, radius);
        let rear_lines = lines_around(input.collision, state.rear_wheel, radius);
        let front_hits = resolve_wheel(
            &mut self.front,
            &mut state.front_wheel,
            radius,
            m_wheel,
            i_wheel,
            &front_lines,
            &mut out.contact_points,
        );
        let rear_hits = resolve_wheel(
            &mut self.rear,
            &mut state.rear_wheel,
            radius,
            m_wheel,
            i_wheel,
            &rear_lines,
            &mut out.contact_points,
        );

        self.front.angle = wrap_angle(self.front.angle + self.front.ang_vel * dt);
        self.rear.angle = wrap_angle(self.rear.angle + self.rear.ang_vel * dt);
        self.frame.angle = wrap_angle(self.frame.angle + self.frame.ang_vel * dt);
        state.front_wheel_rot = rot_from_angle(self.front.angle);
        state.rear_wheel_rot = rot_from_angle(self.rear.angle);
        state.frame_rot = rot_from_angle(self.frame.angle);

        self.update_derived(state);

        self.report_wheels(front_hits, rear_hits, state, controls, ctrl, &mut out);
        self.detect_head_and_body(state, input.collision, &mut out);
        out
    }

    /// Recompute anchors, rider hinges and heads from the frame transform.
    fn update_derived(&self, state: &mut BikeState) {
        state.refresh_from_frame(&self.anchors);
        let m = state.frame_rot;
        let c = state.center;
        let place = |rider: &mut RiderJoints, off: &RiderOffsets| {
            let hand_off = rider.hand - rider.wanted_hand;
            let foot_off = rider.foot - rider.wanted_foot;
            rider.elbow = rot_apply(&m, off.elbow, c) + hand_off * 0.5;
            rider.shoulder = rot_apply(&m, off.shoulder, c);
            rider.lower_body = rot_apply(&m, off.lower_body, c);
            rider.knee = rot_apply(&m, off.knee, c) + foot_off * 0.5;
        };
        place(&mut state.rider, &self.anchors.rider);
        place(&mut state.rider2, &self.anchors.rider2);
        state.update_heads(self.settings.bike.neck_length);
    }

    fn detect_contacts(
        &mut self,
        state: &BikeState,
        collision: &CollisionSystem,
        controls: bool,
        ctrl: &BikeController,
        out: &mut StepContacts,
    ) {
        let r = self.settings.bike.wheel_radius + CONTACT_SLOP;
        let count = |p: Vec2| {
            lines_around(collision, p, r)
                .iter()
                .filter(|l| circle_segment_contact(p, r, &l.seg).is_some())
                .count()
        };
        let front = count(state.front_wheel);
        let rear = count(state.rear_wheel);
        self.report_wheels(front, rear, state, controls, ctrl, out);
        self.detect_head_and_body(state, collision, out);
    }

    fn report_wheels(
        &mut self,
        front_hits: usize,
        rear_hits: usize,
        state: &BikeState,
        controls: bool,
        ctrl: &BikeController,
        out: &mut StepContacts,
    ) {
        out.front_wheel_touching = front_hits > 0;
        out.rear_wheel_touching = rear_hits > 0;
        if out.front_wheel_touching != self.front_touching {
            self.front_touching = out.front_wheel_touching;
            log::trace!("front wheel touching: {}", self.front_touching);
            out.wheel_transitions.push((Wheel::Front, self.front_touching));
        }
        if out.rear_wheel_touching != self.rear_touching {
            self.rear_touching = out.rear_wheel_touching;
            log::trace!("rear wheel touching: {}", self.rear_touching);
            out.wheel_transitions.push((Wheel::Rear, self.rear_touching));
        }

        if !controls || ctrl.drive <= 0.0 {
            return;
        }
        let threshold = self.settings.wheel_spin_threshold;
        let (center, ang_vel, hits) = match state.dir {
            Direction::Right => (state.rear_wheel, self.rear.ang_vel, rear_hits),
            Direction::Left => (state.front_wheel, self.front.ang_vel, front_hits),
        };
        if ang_vel.abs() <= threshold || hits == 0 {
            return;
        }
        let r = self.settings.bike.wheel_radius;
        let point = center - Vec2::Y * r;
        let d = center - point;
        let dir = match state.dir {
            Direction::Right => Vec2::new((-d.y + d.x) / 2.0, (d.x + d.y) / 2.0),
            Direction::Left => Vec2::new((d.y + d.x) / 2.0, (-d.x + d.y) / 2.0),
        };
        out.wheel_spin = Some(WheelSpin { point, dir });
    }

    fn detect_head_and_body(
        &self,
        state: &BikeState,
        collision: &CollisionSystem,
        out: &mut StepContacts,
    ) {
        let head_r = self.settings.bike.head_size;
        let head = state.head();
        out.head_touching = lines_around(collision, head, head_r)
            .iter()
            .any(|l| circle_segment_contact(head, head_r, &l.seg).is_some());

        let rider = state.active_rider();
        out.body_touching = [rider.shoulder, rider.lower_body, rider.elbow, rider.knee]
            .iter()
            .any(|p| {
                lines_around(collision, *p, BODY_MEMBER_RADIUS)
                    .iter()
                    .any(|l| circle_segment_contact(*p, BODY_MEMBER_RADIUS, &l.seg).is_some())
            });
    }
}

fn wrap_angle(a: f32) -> f32 {
    a.rem_euclid(std::f32::consts::TAU)
}

fn lines_around(collision: &CollisionSystem, center: Vec2, radius: f32) -> Vec<Line> {
    collision.lines_near(&Aabb::around_circle(center, radius))
}

/// Push a wheel out of every line it penetrates and remove approaching and
/// slipping velocity. Returns the number of contacts.
fn resolve_wheel(
    body: &mut Body,
    center: &mut Vec2,
    radius: f32,
    mass: f32,
    inertia: f32,
    lines: &[Line],
    points: &mut Vec<Vec2>,
) -> usize {
    let mut hits = 0;
    for line in lines {
        let Some(c) = circle_segment_contact(*center, radius, &line.seg) else {
            continue;
        };
        hits += 1;
        points.push(c.point);
        *center += c.normal * c.depth;

        let vn = body.vel.dot(c.normal);
        let jn = if vn < 0.0 { -vn * mass } else { 0.0 };
        body.vel += c.normal * (jn / mass);

        // Contact point relative to the wheel centre.
        let r = -c.normal * radius;
        let t = c.normal.perp();
        let v_point = body.vel + Vec2::new(-r.y, r.x) * body.ang_vel;
        let vt = v_point.dot(t);
        let rt = r.perp_dot(t);
        let k = 1.0 / mass + rt * rt / inertia;
        let max_friction = line.grip * jn;
        let jt = (-vt / k).clamp(-max_friction, max_friction);
        body.vel += t * (jt / mass);
        body.ang_vel += rt * jt / inertia;
    }
    hits
}
