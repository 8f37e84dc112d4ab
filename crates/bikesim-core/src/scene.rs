//! The playable world and its per-step update.
//!
//! # Update order
//!
//! Each call to [`Scene::update_level`] runs, in this order:
//!
//! 1. **Dynamics** -- every other update, advance scripted block and entity
//!    motions.
//! 2. **Clock** -- advance time by `step * speed`; a backward move rewinds
//!    player pickups and ghost diffs.
//! 3. **Touches** -- zone and entity touch transitions of live players.
//! 4. **Script ticks** -- one `Tick` per elapsed hundredth, bounded.
//! 5. **Ghosts** -- track the new time; active ones replay their events.
//! 6. **Players** -- physics, head deaths, wheel spin.
//! 7. **Events** -- drain the queue, recording each event first.
//! 8. **Recording** -- store the sole player's state at the replay rate.
//! 9. **Deletions** -- remove destroyed entities from collision.

use std::path::Path;

use glam::Vec2;

use crate::bike::serialized::SerializedBikeState;
use crate::bike::{BikeController, Direction};
use crate::biker::{Biker, PlayerBiker, TouchChange};
use crate::collision::CollisionSystem;
use crate::config::SceneConfig;
use crate::dynamic::{DynamicMotion, DynamicObject, DynamicTarget};
use crate::error::{LevelLoadError, ScriptRuntimeError, SceneError};
use crate::event::{
    DynamicSubject, EventHost, EventQueue, EventSink, EventTarget, GameEvent, SceneEvent,
    drain_events,
};
use crate::fixed::{Centis, Fixed64, f32_to_fixed64};
use crate::geom::{Aabb, Segment, circle_touches_circle};
use crate::ghost::{FileGhostSource, Ghost, GhostDisplay, GhostSource, GhostUpdate};
use crate::id::{BlockId, EntityId, PlayerIndex};
use crate::level::{EntitySpeciality, Level};
use crate::replay::Replay;
use crate::rng::{RandomSource, SimRng};
use crate::script::{NullScriptHost, ScriptContext, ScriptHost, ScriptValue};
use crate::selection::{GhostSelectionPolicy, ReplayQuery};
use crate::sim::{PHYS_STEP_SIZE, SimClock, StateHash};

/// Margin around the bike when looking for entities.
const ENTITY_QUERY_MARGIN: f32 = 0.5;

/// Thickness of rider limbs and frame when touching entities.
const BODY_RADIUS: f32 = 0.1;

/// Probability of emitting wheel-spin debris on a spinning step.
const WHEEL_SPIN_CHANCE: f32 = 0.7;

/// A camera request raised by the level script.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CameraCue {
    Zoom(f32),
    Move(Vec2),
}

#[derive(Debug)]
pub struct Scene {
    config: SceneConfig,
    level: Option<Level>,
    collision: CollisionSystem,
    script: Box<dyn ScriptHost>,
    clock: SimClock,
    events: EventQueue,
    players: Vec<Biker>,
    ghosts: Vec<Ghost>,
    gravity: Vec2,
    play_events: bool,
    rng: SimRng,
    dynamics: Vec<DynamicObject>,
    last_dynamic_time: Centis,
    half_update: bool,
    last_tick: Centis,
    last_serialization: Option<Centis>,
    delete_schedule: Vec<EntityId>,
    messages: Vec<String>,
    camera_cues: Vec<CameraCue>,
    penalty_time: Centis,
}

impl Scene {
    pub fn new(config: SceneConfig) -> Self {
        let rng = SimRng::new(config.rng_seed);
        Self {
            config,
            level: None,
            collision: CollisionSystem::default(),
            script: Box::new(NullScriptHost),
            clock: SimClock::new(),
            events: EventQueue::new(),
            players: Vec::new(),
            ghosts: Vec::new(),
            gravity: Vec2::ZERO,
            play_events: false,
            rng,
            dynamics: Vec::new(),
            last_dynamic_time: 0,
            half_update: false,
            last_tick: 0,
            last_serialization: None,
            delete_schedule: Vec::new(),
            messages: Vec::new(),
            camera_cues: Vec::new(),
            penalty_time: 0,
        }
    }

    // -----------------------------------------------------------------------
    // Level lifecycle
    // -----------------------------------------------------------------------

    /// Load `level` for play. With `play_events` the script's `OnLoad` runs
    /// and the events it raises are executed right away.
    pub fn pre_play_level(
        &mut self,
        level: Level,
        script: Box<dyn ScriptHost>,
        play_events: bool,
    ) -> Result<(), SceneError> {
        self.end_level();

        for (id, block) in level.blocks() {
            if !block.background {
                self.collision.set_block_lines(id, &block.edges(), block.grip);
            }
        }
        for (id, entity) in level.entities() {
            if entity.alive {
                self.collision.add_entity(id, entity.position, entity.radius);
            }
        }
        self.gravity = level.gravity;
        self.play_events = play_events;
        self.script = script;
        let source = level.script.clone().filter(|s| !s.trim().is_empty());
        log::debug!(
            "loading level `{}`: {} lines, {} entities",
            level.id,
            self.collision.line_count(),
            self.collision.entity_count()
        );
        self.level = Some(level);

        if let Some(source) = source {
            if let Err(msg) = self.script.load(&source) {
                self.end_level();
                return Err(LevelLoadError::ScriptParse(msg).into());
            }
            if play_events {
                let time = self.clock.time();
                match self.with_script(time, |host, ctx| host.on_load(ctx)) {
                    Some(Ok(false)) => {
                        self.end_level();
                        return Err(LevelLoadError::ScriptOnLoadRejected.into());
                    }
                    Some(Err(msg)) => {
                        self.end_level();
                        return Err(LevelLoadError::ScriptOnLoad(msg).into());
                    }
                    _ => {}
                }
            }
        }

        if play_events {
            drain_events(self, None)?;
        }
        Ok(())
    }

    /// Drop the level and everything attached to it. Safe to call twice.
    pub fn end_level(&mut self) {
        if let Some(level) = &self.level {
            log::debug!("ending level `{}`", level.id);
        }
        self.level = None;
        self.collision.clear();
        self.script = Box::new(NullScriptHost);
        self.clock.reset();
        self.events.clear();
        self.players.clear();
        self.ghosts.clear();
        self.dynamics.clear();
        self.delete_schedule.clear();
        self.messages.clear();
        self.camera_cues.clear();
        self.last_dynamic_time = 0;
        self.half_update = false;
        self.last_tick = 0;
        self.last_serialization = None;
        self.penalty_time = 0;
        self.rng = SimRng::new(self.config.rng_seed);
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn config(&self) -> &SceneConfig {
        &self.config
    }

    pub fn level(&self) -> Option<&Level> {
        self.level.as_ref()
    }

    pub fn is_level_loaded(&self) -> bool {
        self.level.is_some()
    }

    pub fn collision(&self) -> &CollisionSystem {
        &self.collision
    }

    pub fn time(&self) -> Centis {
        self.clock.time()
    }

    pub fn gravity(&self) -> Vec2 {
        self.gravity
    }

    pub fn players(&self) -> &[Biker] {
        &self.players
    }

    pub fn player(&self, index: PlayerIndex) -> Result<&Biker, SceneError> {
        self.players
            .get(index.0)
            .ok_or(SceneError::PlayerIndex(index.0))
    }

    /// Controls of a live player.
    pub fn controller_mut(&mut self, index: PlayerIndex) -> Result<&mut BikeController, SceneError> {
        self.players
            .get_mut(index.0)
            .and_then(Biker::as_local_mut)
            .map(|p| &mut p.controller)
            .ok_or(SceneError::PlayerIndex(index.0))
    }

    pub fn ghosts(&self) -> &[Ghost] {
        &self.ghosts
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    /// Camera requests raised since the last call.
    pub fn take_camera_cues(&mut self) -> Vec<CameraCue> {
        std::mem::take(&mut self.camera_cues)
    }

    pub fn penalty_time(&self) -> Centis {
        self.penalty_time
    }

    /// Hash of the clock, gravity, random source and every biker pose.
    pub fn state_hash(&self) -> u64 {
        let mut h = StateHash::new();
        h.write_i64(self.clock.time());
        h.write_fixed64(self.clock.speed());
        h.write_vec2(self.gravity);
        h.write_u64(self.rng.state());
        for biker in &self.players {
            let s = biker.state();
            h.write_vec2(s.center);
            h.write_vec2(s.rear_wheel);
            h.write_vec2(s.front_wheel);
            h.write_f32(s.engine_rpm);
        }
        h.finish()
    }

    // -----------------------------------------------------------------------
    // Clock control
    // -----------------------------------------------------------------------

    pub fn toggle_pause(&mut self) {
        self.clock.toggle_pause();
    }

    pub fn faster(&mut self, increment: f32) {
        self.clock.faster(f32_to_fixed64(increment));
    }

    /// Levels with scripts or moving blocks can never run backwards.
    pub fn slower(&mut self, increment: f32) {
        let clamp = self
            .level
            .as_ref()
            .is_some_and(|l| l.is_scripted() || l.has_dynamic_blocks());
        self.clock.slower(f32_to_fixed64(increment), clamp);
    }

    pub fn speed(&self) -> Fixed64 {
        self.clock.speed()
    }

    /// Jump the clock forward. Ghosts catch up on the next update.
    pub fn fastforward(&mut self, centis: Centis) {
        self.clock.set_time(self.clock.time() + centis.max(0));
    }

    /// Jump the clock back. Refused (returns `false`) on scripted levels.
    pub fn fastrewind(&mut self, centis: Centis) -> bool {
        if self.level.as_ref().is_some_and(Level::is_scripted) {
            return false;
        }
        self.clock.set_time(self.clock.time() - centis.max(0));
        self.on_rewinding();
        true
    }

    fn on_rewinding(&mut self) {
        let time = self.clock.time();
        for p in self.players.iter_mut().filter_map(Biker::as_local_mut) {
            p.drop_pickups_after(time);
        }
        self.refresh_ghost_diffs();
        self.messages.clear();
        self.last_tick = self.last_tick.min(time);
        self.last_dynamic_time = self.last_dynamic_time.min(time);
    }

    fn refresh_ghost_diffs(&mut self) {
        let Some(player) = self.players.first().and_then(Biker::as_local) else {
            return;
        };
        let times = player.pickup_times();
        for ghost in &mut self.ghosts {
            if times.is_empty() {
                ghost.clear_diff_to_player();
            } else {
                ghost.update_diff_to_player(times);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Bikers
    // -----------------------------------------------------------------------

    /// Add a live player whose ground point sits on `start`.
    pub fn add_player_biker(&mut self, start: Vec2, dir: Direction) -> PlayerIndex {
        let biker = PlayerBiker::new(self.config.physics.clone(), start, dir);
        self.players.push(Biker::Local(Box::new(biker)));
        let index = PlayerIndex(self.players.len() - 1);
        log::info!("player {} added at {start}", index.0);
        index
    }

    fn make_ghost(&self, source: Box<dyn GhostSource>, label: &str) -> Ghost {
        let display = GhostDisplay {
            interpolation: self.config.ghost_interpolation,
            cubic: self.config.ghost_cubic_interpolation,
        };
        Ghost::new(
            source,
            label,
            display,
            &self.config.physics.bike,
            self.config.physics.rpm_range(),
        )
    }

    fn open_for_level(&self, path: &Path) -> Result<Replay, SceneError> {
        let level = self.level.as_ref().ok_or(SceneError::NoLevelLoaded)?;
        Ok(Replay::open(path, Some(&level.id))?)
    }

    /// Add a ghost from any source. Returns its index.
    pub fn add_ghost(&mut self, source: Box<dyn GhostSource>, label: &str, is_reference: bool) -> usize {
        let mut ghost = self.make_ghost(source, label).with_reference(is_reference);
        if let Some(player) = self.players.first().and_then(Biker::as_local) {
            ghost.update_diff_to_player(player.pickup_times());
        }
        log::info!("ghost `{label}` added ({})", ghost.player_name());
        self.ghosts.push(ghost);
        self.ghosts.len() - 1
    }

    /// Add a ghost read from a replay file of the loaded level.
    pub fn add_ghost_from_file(&mut self, path: &Path, label: &str, is_reference: bool) -> Result<usize, SceneError> {
        let replay = self.open_for_level(path)?;
        Ok(self.add_ghost(Box::new(FileGhostSource::new(replay)), label, is_reference))
    }

    /// Resolve ghosts with `policy` and add them. Replays that fail to open
    /// are skipped.
    pub fn add_ghosts_from_policy(&mut self, policy: &GhostSelectionPolicy, query: &dyn ReplayQuery) -> Vec<usize> {
        let Some(level_id) = self.level.as_ref().map(|l| l.id.clone()) else {
            return Vec::new();
        };
        let mut added = Vec::new();
        for choice in policy.resolve(&level_id, query) {
            match self.add_ghost_from_file(&choice.path, &choice.label, choice.is_reference) {
                Ok(i) => added.push(i),
                Err(e) => log::warn!("skipping ghost {}: {e}", choice.path.display()),
            }
        }
        added
    }

    /// Watch a replay: its biker takes a player slot and its events are
    /// replayed into the scene.
    pub fn add_replay_from_file(&mut self, path: &Path) -> Result<PlayerIndex, SceneError> {
        let replay = self.open_for_level(path)?;
        let label = replay.player_name().to_string();
        let ghost = self
            .make_ghost(Box::new(FileGhostSource::new(replay)), &label)
            .with_active(true);
        self.players.push(Biker::Replay(Box::new(ghost)));
        let index = PlayerIndex(self.players.len() - 1);
        log::info!("replay of `{label}` added as player {}", index.0);
        Ok(index)
    }

    // -----------------------------------------------------------------------
    // Update
    // -----------------------------------------------------------------------

    /// An empty replay of the loaded level for `player_name`, recorded at
    /// the configured frame rate.
    pub fn start_recording(&self, player_name: &str) -> Result<Replay, SceneError> {
        let level = self.level.as_ref().ok_or(SceneError::NoLevelLoaded)?;
        log::debug!(
            "recording `{}` for {player_name} at {} states/s",
            level.id,
            self.config.replay_frame_rate
        );
        Ok(Replay::create(level.id.clone(), player_name, self.config.replay_frame_rate))
    }

    /// Advance the world by `step` hundredths (scaled by the speed factor).
    /// With a `recorder`, executed events and the sole player's states are
    /// stored into it.
    pub fn update_level(&mut self, step: Centis, mut recorder: Option<&mut Replay>) -> Result<(), SceneError> {
        if self.level.is_none() {
            return Err(SceneError::NoLevelLoaded);
        }

        // 1. Dynamics
        self.half_update = !self.half_update;
        if self.half_update {
            self.update_dynamics();
        }

        // 2. Clock
        let advance = self.clock.advance(step);
        if advance.moved_back {
            self.on_rewinding();
        }
        let time = self.clock.time();

        // 3. Touches
        if self.play_events {
            for i in 0..self.players.len() {
                self.update_zones_touching(i);
                self.update_entities_touching(i);
            }
        }

        // 4. Script ticks
        self.run_script_ticks()?;

        // 5. Ghosts
        self.update_ghosts(time)?;

        // 6. Players
        if advance.delta > 0 {
            self.update_players(time - advance.delta, advance.delta);
        }

        // 7. Events
        drain_events(self, recorder.as_deref_mut().map(|r| r as &mut dyn EventSink))?;

        // 8. Recording
        if let Some(replay) = recorder {
            self.record(replay, time);
        }

        // 9. Deletions
        self.process_delete_schedule();
        Ok(())
    }

    fn with_script<R>(
        &mut self,
        time: Centis,
        f: impl FnOnce(&mut dyn ScriptHost, &mut ScriptContext<'_>) -> R,
    ) -> Option<R> {
        let level = self.level.as_ref()?;
        let players: Vec<Vec2> = self.players.iter().map(|b| b.state().center).collect();
        let mut ctx = ScriptContext::new(time, level, self.gravity, &players, &mut self.events);
        Some(f(self.script.as_mut(), &mut ctx))
    }

    fn call_script(&mut self, table: &str, function: &str, args: &[ScriptValue]) -> Result<(), ScriptRuntimeError> {
        let time = self.clock.time();
        self.with_script(time, |host, ctx| host.call_table(table, function, args, ctx))
            .unwrap_or(Ok(()))
    }

    fn update_dynamics(&mut self) {
        let time = self.clock.time();
        let cents = time - self.last_dynamic_time;
        self.last_dynamic_time = time;
        if cents <= 0 || self.dynamics.is_empty() {
            return;
        }
        let mut moves = Vec::with_capacity(self.dynamics.len());
        self.dynamics.retain_mut(|obj| {
            let (step, alive) = obj.next_state(cents);
            moves.push((obj.target, step));
            alive
        });
        for (target, step) in moves {
            match target {
                DynamicTarget::Entity(id) => {
                    if let Some(e) = self.level.as_mut().and_then(|l| l.entity_mut(id)) {
                        e.position += step.offset;
                        let position = e.position;
                        if self.collision.contains_entity(id) {
                            self.collision.move_entity(id, position);
                        }
                    }
                }
                DynamicTarget::Block(id) => {
                    if let Some(b) = self.level.as_mut().and_then(|l| l.block_mut(id)) {
                        b.position += step.offset;
                        b.rotation += step.rotation;
                    }
                    self.refresh_block(id);
                }
            }
        }
    }

    fn refresh_block(&mut self, id: BlockId) {
        let Some(block) = self.level.as_ref().and_then(|l| l.block(id)) else {
            return;
        };
        if !block.background {
            self.collision.set_block_lines(id, &block.edges(), block.grip);
        }
    }

    fn update_zones_touching(&mut self, index: usize) {
        let Some(level) = self.level.as_ref() else {
            return;
        };
        let Some(player) = self.players.get_mut(index).and_then(Biker::as_local_mut) else {
            return;
        };
        if !player.is_playing() {
            return;
        }
        let bike = &self.config.physics.bike;
        let s = player.state().clone();
        let time = self.clock.time();
        for (id, zone) in level.zones() {
            let touching = zone.touches_circle(s.front_wheel, bike.wheel_radius)
                || zone.touches_circle(s.rear_wheel, bike.wheel_radius)
                || zone.touches_circle(s.head(), bike.head_size);
            let event = match player.set_touching_zone(id, touching) {
                TouchChange::Added => GameEvent::PlayerEntersZone {
                    player: PlayerIndex(index),
                    zone: zone.name.clone(),
                },
                TouchChange::Removed => GameEvent::PlayerLeavesZone {
                    player: PlayerIndex(index),
                    zone: zone.name.clone(),
                },
                TouchChange::None => continue,
            };
            self.events.push(SceneEvent::new(time, event));
        }
    }

    fn update_entities_touching(&mut self, index: usize) {
        let Some(level) = self.level.as_ref() else {
            return;
        };
        let Some(player) = self.players.get_mut(index).and_then(Biker::as_local_mut) else {
            return;
        };
        if !player.is_playing() {
            return;
        }
        let bike = &self.config.physics.bike;
        let s = player.state().clone();
        let head = s.head();
        let (wheel_r, head_r) = (bike.wheel_radius, bike.head_size);

        let mut bb = Aabb::empty();
        bb.add_circle(head, head_r + ENTITY_QUERY_MARGIN);
        bb.add_circle(s.front_wheel, wheel_r + ENTITY_QUERY_MARGIN);
        bb.add_circle(s.rear_wheel, wheel_r + ENTITY_QUERY_MARGIN);
        let near = self.collision.entities_near(&bb);

        let rider = s.active_rider();
        let members = [
            Segment::new(s.rear_wheel, s.center),
            Segment::new(s.center, s.front_wheel),
            Segment::new(rider.lower_body, rider.shoulder),
            Segment::new(rider.shoulder, rider.elbow),
            Segment::new(rider.elbow, rider.hand),
            Segment::new(rider.lower_body, rider.knee),
            Segment::new(rider.knee, rider.foot),
        ];

        let time = self.clock.time();
        for &id in &near {
            let Some(entity) = level.entity(id) else {
                continue;
            };
            if !entity.alive {
                continue;
            }
            let (c, r) = (entity.position, entity.radius);
            let with_head = circle_touches_circle(head, head_r, c, r);
            let touching = with_head
                || circle_touches_circle(s.front_wheel, wheel_r, c, r)
                || circle_touches_circle(s.rear_wheel, wheel_r, c, r)
                || members
                    .iter()
                    .any(|m| m.closest_point(c).distance(c) <= r + BODY_RADIUS);
            if touching {
                if player.set_touching_entity(id, true) == TouchChange::Added {
                    self.events.push(SceneEvent::new(
                        time,
                        GameEvent::PlayerTouchesEntity {
                            player: PlayerIndex(index),
                            entity: entity.name.clone(),
                            with_head,
                        },
                    ));
                }
            } else {
                player.set_touching_entity(id, false);
            }
        }
        player.release_entities_except(&near);
    }

    fn run_script_ticks(&mut self) -> Result<(), SceneError> {
        let limit = self.config.script_catchup_limit;
        let mut ticks = 0;
        while self.clock.time() - self.last_tick >= PHYS_STEP_SIZE {
            if ticks >= limit {
                log::warn!(
                    "script tick backlog of {} dropped at {}",
                    self.clock.time() - self.last_tick,
                    self.clock.time()
                );
                self.last_tick = self.clock.time();
                break;
            }
            self.last_tick += PHYS_STEP_SIZE;
            ticks += 1;
            if !self.play_events {
                continue;
            }
            let tick_time = self.last_tick;
            match self.with_script(tick_time, |host, ctx| host.tick(ctx)) {
                Some(Ok(false)) => {
                    return Err(ScriptRuntimeError::TickFailed { time: tick_time }.into());
                }
                Some(Err(e)) => return Err(e.into()),
                _ => {}
            }
        }
        Ok(())
    }

    fn update_ghosts(&mut self, time: Centis) -> Result<(), SceneError> {
        let updates = track_ghosts(&mut self.ghosts, time);
        for update in updates {
            self.apply_ghost_update(update)?;
        }

        for i in 0..self.players.len() {
            let Biker::Replay(ghost) = &mut self.players[i] else {
                continue;
            };
            let update = ghost.update(time);
            let blocks: Vec<(String, Vec2, f32)> = ghost
                .moving_blocks()
                .iter()
                .filter_map(|t| t.sample_at(time).map(|s| (t.name.clone(), s.position, s.rotation)))
                .collect();
            self.apply_ghost_update(update)?;
            for (name, position, rotation) in blocks {
                self.set_block_position(&name, position);
                self.set_block_rotation(&name, rotation);
            }
        }
        Ok(())
    }

    fn apply_ghost_update(&mut self, update: GhostUpdate) -> Result<(), SceneError> {
        for event in &update.to_revert {
            event.revert(self);
        }
        for event in &update.to_do {
            event.do_action(self)?;
        }
        Ok(())
    }

    fn update_players(&mut self, from: Centis, delta: Centis) {
        let spin_chance = f32_to_fixed64(WHEEL_SPIN_CHANCE);
        for (i, biker) in self.players.iter_mut().enumerate() {
            let Some(player) = biker.as_local_mut() else {
                continue;
            };
            let mut spin = None;
            for k in 0..delta / PHYS_STEP_SIZE {
                let now = from + (k + 1) * PHYS_STEP_SIZE;
                let contacts = player.step(now, PHYS_STEP_SIZE, self.gravity, &self.collision);
                if contacts.head_touching && self.config.head_touch_kills && player.is_playing() {
                    self.events.push(SceneEvent::new(
                        now,
                        GameEvent::PlayerDies {
                            player: PlayerIndex(i),
                            killed_by_wrecker: false,
                        },
                    ));
                }
                if contacts.wheel_spin.is_some() && self.rng.chance(spin_chance) {
                    spin = contacts.wheel_spin;
                }
            }
            player.set_wheel_spin(spin);
        }
    }

    fn record(&mut self, replay: &mut Replay, time: Centis) {
        let interval = 100.0 / replay.frame_rate();
        let due = self
            .last_serialization
            .is_none_or(|last| (time - last) as f32 >= interval);
        if !due || self.players.len() != 1 {
            return;
        }
        let (Some(player), Some(level)) = (self.players[0].as_local(), self.level.as_ref()) else {
            return;
        };
        if !player.is_playing() {
            return;
        }
        self.last_serialization = Some(time);
        let rpm = self.config.physics.rpm_range();
        replay.store_state(&SerializedBikeState::from_bike_state(player.state(), time, rpm));
        let blocks = level
            .blocks()
            .filter(|(_, b)| b.dynamic)
            .map(|(_, b)| (b.name.as_str(), b.position, b.rotation));
        replay.store_blocks(time, blocks, player.state().center);
    }

    fn process_delete_schedule(&mut self) {
        if self.delete_schedule.is_empty() {
            return;
        }
        for id in std::mem::take(&mut self.delete_schedule) {
            self.collision.remove_entity(id);
        }
        let Some(level) = self.level.as_ref() else {
            return;
        };
        if level.count_to_take() > 0 {
            return;
        }
        let time = self.clock.time();
        for (i, biker) in self.players.iter().enumerate() {
            let Some(player) = biker.as_local() else {
                continue;
            };
            if !player.is_playing() {
                continue;
            }
            let on_flower = player.touching_entities().any(|id| {
                level
                    .entity(id)
                    .is_some_and(|e| e.alive && e.speciality == EntitySpeciality::MakeWin)
            });
            if on_flower {
                self.events.push(SceneEvent::new(
                    time,
                    GameEvent::PlayerWins {
                        player: PlayerIndex(i),
                    },
                ));
            }
        }
    }

    fn resolve_subject(&self, subject: &DynamicSubject) -> Option<DynamicTarget> {
        let level = self.level.as_ref()?;
        match subject {
            DynamicSubject::Entity(name) => level.entity_by_name(name).map(DynamicTarget::Entity),
            DynamicSubject::Block(name) => level.block_by_name(name).map(DynamicTarget::Block),
        }
    }

    fn with_block(&mut self, name: &str, f: impl FnOnce(&mut crate::level::Block)) {
        let Some(level) = self.level.as_mut() else {
            return;
        };
        let Some(id) = level.block_by_name(name) else {
            log::warn!("unknown block `{name}`");
            return;
        };
        if let Some(block) = level.block_mut(id) {
            f(block);
        }
        self.refresh_block(id);
    }

    fn local_player(&mut self, player: PlayerIndex) -> Option<&mut PlayerBiker> {
        let found = self.players.get_mut(player.0).and_then(Biker::as_local_mut);
        if found.is_none() {
            log::debug!("no live player at index {}", player.0);
        }
        found
    }
}

#[cfg(feature = "parallel")]
fn track_ghosts(ghosts: &mut [Ghost], time: Centis) -> Vec<GhostUpdate> {
    use rayon::prelude::*;
    ghosts.par_iter_mut().map(|g| g.update(time)).collect()
}

#[cfg(not(feature = "parallel"))]
fn track_ghosts(ghosts: &mut [Ghost], time: Centis) -> Vec<GhostUpdate> {
    ghosts.iter_mut().map(|g| g.update(time)).collect()
}

// ---------------------------------------------------------------------------
// Event handling
// ---------------------------------------------------------------------------

impl EventHost for Scene {
    fn events_mut(&mut self) -> &mut EventQueue {
        &mut self.events
    }
}

impl EventTarget for Scene {
    fn kill_player(&mut self, player: PlayerIndex) {
        let time = self.clock.time();
        if let Some(p) = self.local_player(player) {
            if p.kill(time) {
                log::info!("player {} died at {time}", player.0);
            }
        }
    }

    fn make_player_win(&mut self, player: PlayerIndex) {
        let time = self.clock.time();
        if let Some(p) = self.local_player(player) {
            if p.win(time) {
                log::info!("player {} finished at {time}", player.0);
            }
        }
    }

    fn player_enters_zone(&mut self, player: PlayerIndex, zone: &str) -> Result<(), ScriptRuntimeError> {
        if !self.play_events {
            return Ok(());
        }
        self.call_script(zone, "OnEnter", &[])?;
        self.call_script(zone, "OnEnterBy", &[player.into()])
    }

    fn player_leaves_zone(&mut self, player: PlayerIndex, zone: &str) -> Result<(), ScriptRuntimeError> {
        if !self.play_events {
            return Ok(());
        }
        self.call_script(zone, "OnLeave", &[])?;
        self.call_script(zone, "OnLeaveBy", &[player.into()])
    }

    fn player_touches_entity(
        &mut self,
        player: PlayerIndex,
        entity: &str,
        with_head: bool,
    ) -> Result<(), ScriptRuntimeError> {
        if self.play_events {
            self.call_script(entity, "Touch", &[])?;
            self.call_script(entity, "TouchBy", &[player.into(), ScriptValue::Bool(with_head)])?;
        }
        let Some(level) = self.level.as_ref() else {
            return Ok(());
        };
        let Some(e) = level.entity_by_name(entity).and_then(|id| level.entity(id)) else {
            return Ok(());
        };
        if !e.alive {
            return Ok(());
        }
        let event = match e.speciality {
            EntitySpeciality::MakeWin if level.count_to_take() == 0 => GameEvent::PlayerWins { player },
            EntitySpeciality::Kill => GameEvent::PlayerDies {
                player,
                killed_by_wrecker: true,
            },
            EntitySpeciality::ToTake => GameEvent::EntityDestroyed {
                entity: e.name.clone(),
                speciality: e.speciality,
                position: e.position,
                radius: e.radius,
                taken_by: Some(player),
            },
            _ => return Ok(()),
        };
        let time = self.clock.time();
        self.events.push(SceneEvent::new(time, event));
        Ok(())
    }

    fn set_player_position(&mut self, player: PlayerIndex, position: Vec2, dir: Direction) {
        if let Some(p) = self.local_player(player) {
            p.set_position(position, dir);
        }
    }

    fn add_force_to_player(&mut self, player: PlayerIndex, force: Vec2, start: Centis, end: Centis) {
        let now = self.clock.time();
        if let Some(p) = self.local_player(player) {
            p.add_force(now, force, start, end);
        }
    }

    fn entity_destroyed(&mut self, entity: &str, time: Centis, taken_by: Option<PlayerIndex>) {
        let Some(level) = self.level.as_mut() else {
            return;
        };
        let Some(id) = level.entity_by_name(entity) else {
            log::warn!("unknown entity `{entity}`");
            return;
        };
        let to_take = level
            .entity(id)
            .is_some_and(|e| e.speciality == EntitySpeciality::ToTake);
        if !level.destroy_entity(id) {
            return;
        }
        if to_take {
            if let Some(p) = taken_by.and_then(|p| self.players.get_mut(p.0)).and_then(Biker::as_local_mut) {
                p.push_pickup(time);
            }
            self.refresh_ghost_diffs();
        }
        if !self.delete_schedule.contains(&id) {
            self.delete_schedule.push(id);
        }
    }

    fn revert_entity_destroyed(&mut self, entity: &str) {
        let Some(level) = self.level.as_mut() else {
            return;
        };
        let Some(id) = level.entity_by_name(entity) else {
            return;
        };
        if !level.revert_entity_destroyed(id) {
            return;
        }
        self.delete_schedule.retain(|e| *e != id);
        if let Some(e) = level.entity(id) {
            if !self.collision.contains_entity(id) {
                self.collision.add_entity(id, e.position, e.radius);
            }
        }
    }

    fn set_entity_position(&mut self, entity: &str, position: Vec2) {
        let Some(level) = self.level.as_mut() else {
            return;
        };
        let Some(id) = level.entity_by_name(entity) else {
            log::warn!("unknown entity `{entity}`");
            return;
        };
        if let Some(e) = level.entity_mut(id) {
            e.position = position;
        }
        if self.collision.contains_entity(id) {
            self.collision.move_entity(id, position);
        }
    }

    fn set_block_position(&mut self, block: &str, position: Vec2) {
        self.with_block(block, |b| b.position = position);
    }

    fn move_block(&mut self, block: &str, offset: Vec2) {
        self.with_block(block, |b| b.position += offset);
    }

    fn set_block_center(&mut self, block: &str, center: Vec2) {
        self.with_block(block, |b| b.rotation_center = center);
    }

    fn set_block_rotation(&mut self, block: &str, angle: f32) {
        self.with_block(block, |b| b.rotation = angle);
    }

    fn set_dynamic(&mut self, subject: &DynamicSubject, motion: DynamicMotion, start: Centis, end: Centis) {
        match self.resolve_subject(subject) {
            Some(target) => self.dynamics.push(DynamicObject::new(target, motion, start, end)),
            None => log::warn!("dynamic motion on unknown {subject:?}"),
        }
    }

    fn clear_dynamic(&mut self, subject: &DynamicSubject) {
        if let Some(target) = self.resolve_subject(subject) {
            self.dynamics.retain(|d| d.target != target);
        }
    }

    fn set_gravity(&mut self, gravity: Vec2) {
        self.gravity = gravity;
    }

    fn add_penalty_time(&mut self, time: Centis) {
        if time > 0 {
            self.penalty_time += time;
            self.clock.set_time(self.clock.time() + time);
        }
    }

    fn add_message(&mut self, text: &str) {
        self.messages.push(text.to_string());
    }

    fn clear_messages(&mut self) {
        self.messages.clear();
    }

    fn camera_zoom(&mut self, zoom: f32) {
        self.camera_cues.push(CameraCue::Zoom(zoom));
    }

    fn camera_move(&mut self, offset: Vec2) {
        self.camera_cues.push(CameraCue::Move(offset));
    }
}
