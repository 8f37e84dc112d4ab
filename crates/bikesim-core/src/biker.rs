//! Bikers: live players driven by physics, and replays driven by a ghost.

use std::collections::BTreeSet;

use glam::Vec2;

use crate::bike::{BikeAnchors, BikeController, BikeState, Direction};
use crate::collision::CollisionSystem;
use crate::fixed::Centis;
use crate::ghost::{Ghost, GhostPhase};
use crate::id::{EntityId, ZoneId};
use crate::physics::{PhysicsSettings, PhysicsSimulator, StepContacts, StepInput, WheelSpin};

/// Result of updating a touching flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TouchChange {
    None,
    Added,
    Removed,
}

fn set_touching<K: Ord + Copy>(set: &mut BTreeSet<K>, key: K, touching: bool) -> TouchChange {
    match (touching, set.contains(&key)) {
        (true, false) => {
            set.insert(key);
            TouchChange::Added
        }
        (false, true) => {
            set.remove(&key);
            TouchChange::Removed
        }
        _ => TouchChange::None,
    }
}

// ---------------------------------------------------------------------------
// PlayerBiker
// ---------------------------------------------------------------------------

/// A bike under player control.
#[derive(Debug, Clone)]
pub struct PlayerBiker {
    state: BikeState,
    physics: PhysicsSimulator,
    pub controller: BikeController,
    death_time: Option<Centis>,
    finish_time: Option<Centis>,
    touching_entities: BTreeSet<EntityId>,
    touching_zones: BTreeSet<ZoneId>,
    pickup_times: Vec<Centis>,
    wheel_spin: Option<WheelSpin>,
}

impl PlayerBiker {
    /// A bike at rest with its ground point on `start`.
    pub fn new(settings: PhysicsSettings, start: Vec2, dir: Direction) -> Self {
        let center = start - BikeAnchors::from_parameters(&settings.bike).ground_point;
        let state = BikeState::at_rest(center, dir, &settings.bike);
        let physics = PhysicsSimulator::new(settings, &state);
        Self {
            state,
            physics,
            controller: BikeController::default(),
            death_time: None,
            finish_time: None,
            touching_entities: BTreeSet::new(),
            touching_zones: BTreeSet::new(),
            pickup_times: Vec::new(),
            wheel_spin: None,
        }
    }

    pub fn state(&self) -> &BikeState {
        &self.state
    }

    pub fn physics(&self) -> &PhysicsSimulator {
        &self.physics
    }

    pub fn is_dead(&self) -> bool {
        self.death_time.is_some()
    }

    pub fn is_finished(&self) -> bool {
        self.finish_time.is_some()
    }

    /// Neither dead nor finished.
    pub fn is_playing(&self) -> bool {
        !self.is_dead() && !self.is_finished()
    }

    pub fn death_time(&self) -> Option<Centis> {
        self.death_time
    }

    pub fn finish_time(&self) -> Option<Centis> {
        self.finish_time
    }

    /// Returns `false` if the player was already out of play.
    pub fn kill(&mut self, time: Centis) -> bool {
        if !self.is_playing() {
            return false;
        }
        self.death_time = Some(time);
        self.controller.stop();
        true
    }

    /// Returns `false` if the player was already out of play.
    pub fn win(&mut self, time: Centis) -> bool {
        if !self.is_playing() {
            return false;
        }
        self.finish_time = Some(time);
        true
    }

    pub fn set_touching_entity(&mut self, entity: EntityId, touching: bool) -> TouchChange {
        set_touching(&mut self.touching_entities, entity, touching)
    }

    pub fn set_touching_zone(&mut self, zone: ZoneId, touching: bool) -> TouchChange {
        set_touching(&mut self.touching_zones, zone, touching)
    }

    pub fn touching_entities(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.touching_entities.iter().copied()
    }

    /// Stop touching every entity not in `near`.
    pub fn release_entities_except(&mut self, near: &[EntityId]) {
        self.touching_entities.retain(|e| near.contains(e));
    }

    pub fn pickup_times(&self) -> &[Centis] {
        &self.pickup_times
    }

    pub fn push_pickup(&mut self, time: Centis) {
        self.pickup_times.push(time);
    }

    /// Forget pickups made after `time`.
    pub fn drop_pickups_after(&mut self, time: Centis) {
        self.pickup_times.retain(|t| *t <= time);
    }

    /// Teleport, at rest.
    pub fn set_position(&mut self, start: Vec2, dir: Direction) {
        let center = self.physics.center_for_start(start);
        self.state = BikeState::at_rest(center, dir, &self.physics.settings().bike);
        self.physics.reset(&self.state);
    }

    pub fn add_force(&mut self, now: Centis, force: Vec2, start: Centis, end: Centis) {
        self.physics.add_body_force(now, force, start, end);
    }

    /// Last wheel-spin emission, for presentation.
    pub fn wheel_spin(&self) -> Option<WheelSpin> {
        self.wheel_spin
    }

    pub fn set_wheel_spin(&mut self, spin: Option<WheelSpin>) {
        self.wheel_spin = spin;
    }

    /// Run one physics step.
    pub fn step(&mut self, time: Centis, step: Centis, gravity: Vec2, collision: &CollisionSystem) -> StepContacts {
        let controls_enabled = self.is_playing();
        self.physics.step(
            &mut self.state,
            StepInput {
                time,
                step,
                gravity,
                controller: &self.controller,
                controls_enabled,
                collision,
            },
        )
    }
}

// ---------------------------------------------------------------------------
// Biker
// ---------------------------------------------------------------------------

/// Anything occupying a player slot of the scene.
#[derive(Debug)]
pub enum Biker {
    Local(Box<PlayerBiker>),
    /// Watch-replay mode: an active ghost in a player slot.
    Replay(Box<Ghost>),
}

impl Biker {
    pub fn state(&self) -> &BikeState {
        match self {
            Biker::Local(p) => p.state(),
            Biker::Replay(g) => g.state(),
        }
    }

    pub fn is_dead(&self) -> bool {
        match self {
            Biker::Local(p) => p.is_dead(),
            Biker::Replay(g) => g.phase() == GhostPhase::DeadEnd,
        }
    }

    pub fn is_finished(&self) -> bool {
        match self {
            Biker::Local(p) => p.is_finished(),
            Biker::Replay(g) => g.phase() == GhostPhase::Finished,
        }
    }

    pub fn as_local(&self) -> Option<&PlayerBiker> {
        match self {
            Biker::Local(p) => Some(&**p),
            Biker::Replay(_) => None,
        }
    }

    pub fn as_local_mut(&mut self) -> Option<&mut PlayerBiker> {
        match self {
            Biker::Local(p) => Some(&mut **p),
            Biker::Replay(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    fn player() -> PlayerBiker {
        PlayerBiker::new(PhysicsSettings::default(), Vec2::ZERO, Direction::Right)
    }

    // -----------------------------------------------------------------------
    // Test 1: Touching is edge-triggered
    // -----------------------------------------------------------------------
    #[test]
    fn touching_reports_edges_only() {
        let mut keys: SlotMap<EntityId, ()> = SlotMap::with_key();
        let e = keys.insert(());
        let mut p = player();
        assert_eq!(p.set_touching_entity(e, true), TouchChange::Added);
        assert_eq!(p.set_touching_entity(e, true), TouchChange::None);
        assert_eq!(p.set_touching_entity(e, false), TouchChange::Removed);
        assert_eq!(p.set_touching_entity(e, false), TouchChange::None);
    }

    // -----------------------------------------------------------------------
    // Test 2: Death and finish are exclusive and final
    // -----------------------------------------------------------------------
    #[test]
    fn death_is_final() {
        let mut p = player();
        p.controller.drive = 1.0;
        assert!(p.kill(120));
        assert_eq!(p.controller, BikeController::default());
        assert!(!p.win(130));
        assert!(!p.kill(140));
        assert_eq!(p.death_time(), Some(120));
        assert!(!p.is_finished());
    }

    #[test]
    fn pickups_after_rewind_are_dropped() {
        let mut p = player();
        for t in [10, 20, 30] {
            p.push_pickup(t);
        }
        p.drop_pickups_after(20);
        assert_eq!(p.pickup_times(), &[10, 20]);
    }

    #[test]
    fn spawn_puts_ground_point_on_start() {
        let p = player();
        let ground = p.state().center + p.physics().anchors().ground_point;
        assert!(ground.length() < 1e-6);
    }
}
