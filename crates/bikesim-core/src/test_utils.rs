//! Shared test helpers for integration tests and benchmarks.
//!
//! Gated behind `#[cfg(any(test, feature = "test-utils"))]` so these helpers
//! are available in unit tests, integration tests, and benchmarks (via the
//! `test-utils` feature).

use std::cell::RefCell;
use std::rc::Rc;

use glam::Vec2;

use crate::bike::serialized::SerializedBikeState;
use crate::bike::{BikeParameters, BikeState, Direction};
use crate::biker::PlayerBiker;
use crate::config::SceneConfig;
use crate::error::{ScriptRuntimeError, SceneError};
use crate::event::GameEvent;
use crate::fixed::Centis;
use crate::geom::Aabb;
use crate::id::PlayerIndex;
use crate::level::{Block, Entity, EntitySpeciality, Level, Zone};
use crate::physics::PhysicsSettings;
use crate::replay::Replay;
use crate::scene::Scene;
use crate::script::{ScriptContext, ScriptHost, ScriptValue};

// ===========================================================================
// Levels
// ===========================================================================

/// Top surface of [`flat_level`]'s floor.
pub const FLOOR_Y: f32 = 0.0;

/// A wide floor block whose top is at `y = 0`, and nothing else.
pub fn flat_level(id: &str) -> Level {
    let mut level = Level::new(id);
    let floor = Block::new(
        "floor",
        vec![
            Vec2::new(-80.0, -2.0),
            Vec2::new(80.0, -2.0),
            Vec2::new(80.0, FLOOR_Y),
            Vec2::new(-80.0, FLOOR_Y),
        ],
    );
    level.add_block(floor).unwrap();
    level
}

/// Add an entity and return the level, panicking on invalid input.
pub fn with_entity(mut level: Level, name: &str, speciality: EntitySpeciality, at: Vec2, radius: f32) -> Level {
    level
        .add_entity(Entity::new(name, speciality, at, radius))
        .unwrap();
    level
}

/// Add a square zone of half-size `half` around `center`.
pub fn with_zone(mut level: Level, name: &str, center: Vec2, half: f32) -> Level {
    let bb = Aabb::new(center - Vec2::splat(half), center + Vec2::splat(half));
    level.add_zone(Zone::new(name, vec![bb])).unwrap();
    level
}

/// Pose of a bike spawned at `start` facing right, before any physics.
pub fn rest_pose(start: Vec2) -> BikeState {
    PlayerBiker::new(PhysicsSettings::default(), start, Direction::Right)
        .state()
        .clone()
}

// ===========================================================================
// Scenes
// ===========================================================================

/// A scene playing `level` with one player at the origin.
pub fn playing_scene(level: Level, script: Box<dyn ScriptHost>) -> (Scene, PlayerIndex) {
    playing_scene_with(SceneConfig::default(), level, script)
}

pub fn playing_scene_with(config: SceneConfig, level: Level, script: Box<dyn ScriptHost>) -> (Scene, PlayerIndex) {
    let mut scene = Scene::new(config);
    scene.pre_play_level(level, script, true).unwrap();
    let player = scene.add_player_biker(Vec2::new(0.0, FLOOR_Y), Direction::Right);
    (scene, player)
}

/// Run `steps` one-hundredth updates.
pub fn run(scene: &mut Scene, steps: usize) -> Result<(), SceneError> {
    for _ in 0..steps {
        scene.update_level(1, None)?;
    }
    Ok(())
}

/// Run `steps` updates while recording into `replay`.
pub fn run_recording(scene: &mut Scene, replay: &mut Replay, steps: usize) -> Result<(), SceneError> {
    for _ in 0..steps {
        scene.update_level(1, Some(replay))?;
    }
    Ok(())
}

// ===========================================================================
// Replays
// ===========================================================================

/// A replay whose bike rolls one unit per recorded state, one state every
/// 4 hundredths.
pub fn rolling_replay(level_id: &str, player: &str, states: usize, finished: bool) -> Replay {
    let params = BikeParameters::default();
    let rpm = PhysicsSettings::default().rpm_range();
    let mut replay = Replay::create(level_id, player, 25.0);
    for i in 0..states {
        let state = BikeState::at_rest(Vec2::new(i as f32, 1.0), Direction::Right, &params);
        replay.store_state(&SerializedBikeState::from_bike_state(&state, i as Centis * 4, rpm));
    }
    replay.finish_replay(finished, (states.saturating_sub(1)) as f32 * 0.04);
    replay
}

// ===========================================================================
// Script host
// ===========================================================================

/// A script host driven by test code. Every call is logged to a shared
/// journal as `table.function(args)`.
#[derive(Debug, Default, Clone)]
pub struct ScriptedHost {
    pub journal: Rc<RefCell<Vec<String>>>,
    /// Events emitted by `Tick` at the given hundredth.
    pub on_tick: Vec<(Centis, GameEvent)>,
    /// Events emitted by `OnLoad`.
    pub on_load: Vec<GameEvent>,
    pub reject_load: bool,
    pub fail_load: Option<String>,
    pub fail_parse: Option<String>,
    /// `Tick` returns false at this time.
    pub stop_at: Option<Centis>,
    pub ticks: Rc<RefCell<Vec<Centis>>>,
}

impl ScriptedHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn journal(&self) -> Vec<String> {
        self.journal.borrow().clone()
    }
}

impl ScriptHost for ScriptedHost {
    fn load(&mut self, _source: &str) -> Result<(), String> {
        match &self.fail_parse {
            Some(msg) => Err(msg.clone()),
            None => Ok(()),
        }
    }

    fn on_load(&mut self, ctx: &mut ScriptContext<'_>) -> Result<bool, String> {
        if let Some(msg) = &self.fail_load {
            return Err(msg.clone());
        }
        for event in &self.on_load {
            ctx.emit(event.clone());
        }
        Ok(!self.reject_load)
    }

    fn tick(&mut self, ctx: &mut ScriptContext<'_>) -> Result<bool, ScriptRuntimeError> {
        self.ticks.borrow_mut().push(ctx.time);
        for (t, event) in &self.on_tick {
            if *t == ctx.time {
                ctx.emit(event.clone());
            }
        }
        Ok(self.stop_at != Some(ctx.time))
    }

    fn call_table(
        &mut self,
        table: &str,
        function: &str,
        args: &[ScriptValue],
        _ctx: &mut ScriptContext<'_>,
    ) -> Result<(), ScriptRuntimeError> {
        self.journal
            .borrow_mut()
            .push(format!("{table}.{function}({args:?})"));
        Ok(())
    }
}
