//! Gameplay events, their FIFO queue and the recording sink.
//!
//! Events are raised while a step evaluates touches, physics and scripts, and
//! executed together once per step by [`EventQueue::drain`]. Each event is
//! written to the replay sink right before it runs, so a recording holds
//! events in raised order.
//!
//! # Deferred wins
//!
//! `PlayerWins` events are held back until every other event (including the
//! ones raised by handlers while draining) has run, so a death and a win
//! raised in the same step always resolve as a death.

use std::collections::VecDeque;

use glam::Vec2;
use serde::{Deserialize, Serialize};

use crate::bike::Direction;
use crate::dynamic::DynamicMotion;
use crate::error::{ReplayIoError, ScriptRuntimeError};
use crate::fixed::Centis;
use crate::id::PlayerIndex;
use crate::level::EntitySpeciality;

// ---------------------------------------------------------------------------
// Event types
// ---------------------------------------------------------------------------

/// What a scripted dynamic motion is attached to, by level name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DynamicSubject {
    Entity(String),
    Block(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GameEvent {
    // -- Players --
    PlayerDies {
        player: PlayerIndex,
        killed_by_wrecker: bool,
    },
    PlayerWins {
        player: PlayerIndex,
    },
    PlayerEntersZone {
        player: PlayerIndex,
        zone: String,
    },
    PlayerLeavesZone {
        player: PlayerIndex,
        zone: String,
    },
    PlayerTouchesEntity {
        player: PlayerIndex,
        entity: String,
        with_head: bool,
    },
    SetPlayerPosition {
        player: PlayerIndex,
        position: Vec2,
        dir: Direction,
    },
    AddForceToPlayer {
        player: PlayerIndex,
        force: Vec2,
        start: Centis,
        end: Centis,
    },

    // -- Level --
    EntityDestroyed {
        entity: String,
        speciality: EntitySpeciality,
        position: Vec2,
        radius: f32,
        /// `None` when destroyed by a script rather than a player.
        taken_by: Option<PlayerIndex>,
    },
    SetEntityPosition {
        entity: String,
        position: Vec2,
    },
    SetBlockPosition {
        block: String,
        position: Vec2,
    },
    MoveBlock {
        block: String,
        offset: Vec2,
    },
    SetBlockCenter {
        block: String,
        center: Vec2,
    },
    SetBlockRotation {
        block: String,
        angle: f32,
    },
    SetDynamic {
        subject: DynamicSubject,
        motion: DynamicMotion,
        start: Centis,
        end: Centis,
    },
    ClearDynamic {
        subject: DynamicSubject,
    },
    SetGravity {
        gravity: Vec2,
    },
    PenaltyTime {
        time: Centis,
    },

    // -- Presentation cues --
    Message {
        text: String,
    },
    ClearMessages,
    CameraZoom {
        zoom: f32,
    },
    CameraMove {
        offset: Vec2,
    },
}

impl GameEvent {
    /// Whether a replay-driven ghost re-executes this event. Player-driven
    /// physics inputs and touches are already baked into the recorded states
    /// (touches would also raise their consequences a second time).
    pub fn replays_on_ghost(&self) -> bool {
        !matches!(
            self,
            GameEvent::PlayerTouchesEntity { .. }
                | GameEvent::SetPlayerPosition { .. }
                | GameEvent::AddForceToPlayer { .. }
                | GameEvent::SetGravity { .. }
        )
    }

    pub fn is_player_wins(&self) -> bool {
        matches!(self, GameEvent::PlayerWins { .. })
    }

    /// Short description, for logs.
    pub fn describe(&self) -> String {
        match self {
            GameEvent::PlayerDies { player, .. } => format!("player {} dies", player.0),
            GameEvent::PlayerWins { player } => format!("player {} wins", player.0),
            GameEvent::PlayerEntersZone { player, zone } => {
                format!("player {} enters zone {zone}", player.0)
            }
            GameEvent::PlayerLeavesZone { player, zone } => {
                format!("player {} leaves zone {zone}", player.0)
            }
            GameEvent::PlayerTouchesEntity { player, entity, .. } => {
                format!("player {} touches {entity}", player.0)
            }
            GameEvent::SetPlayerPosition { player, .. } => {
                format!("player {} teleported", player.0)
            }
            GameEvent::AddForceToPlayer { player, .. } => format!("force on player {}", player.0),
            GameEvent::EntityDestroyed { entity, .. } => format!("entity {entity} destroyed"),
            GameEvent::SetEntityPosition { entity, .. } => format!("entity {entity} moved"),
            GameEvent::SetBlockPosition { block, .. }
            | GameEvent::MoveBlock { block, .. }
            | GameEvent::SetBlockCenter { block, .. }
            | GameEvent::SetBlockRotation { block, .. } => format!("block {block} moved"),
            GameEvent::SetDynamic { subject, .. } => format!("dynamic motion on {subject:?}"),
            GameEvent::ClearDynamic { subject } => format!("dynamic motion cleared on {subject:?}"),
            GameEvent::SetGravity { gravity } => format!("gravity set to {gravity}"),
            GameEvent::PenaltyTime { time } => format!("penalty of {time}"),
            GameEvent::Message { text } => format!("message: {text}"),
            GameEvent::ClearMessages => "messages cleared".to_string(),
            GameEvent::CameraZoom { zoom } => format!("camera zoom {zoom}"),
            GameEvent::CameraMove { offset } => format!("camera move {offset}"),
        }
    }
}

/// An event stamped with the scene time at which it was raised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneEvent {
    pub time: Centis,
    pub event: GameEvent,
}

impl SceneEvent {
    pub fn new(time: Centis, event: GameEvent) -> Self {
        Self { time, event }
    }

    /// Apply the event to the world.
    pub fn do_action(&self, target: &mut dyn EventTarget) -> Result<(), ScriptRuntimeError> {
        match &self.event {
            GameEvent::PlayerDies { player, .. } => target.kill_player(*player),
            GameEvent::PlayerWins { player } => target.make_player_win(*player),
            GameEvent::PlayerEntersZone { player, zone } => {
                target.player_enters_zone(*player, zone)?
            }
            GameEvent::PlayerLeavesZone { player, zone } => {
                target.player_leaves_zone(*player, zone)?
            }
            GameEvent::PlayerTouchesEntity {
                player,
                entity,
                with_head,
            } => target.player_touches_entity(*player, entity, *with_head)?,
            GameEvent::SetPlayerPosition {
                player,
                position,
                dir,
            } => target.set_player_position(*player, *position, *dir),
            GameEvent::AddForceToPlayer {
                player,
                force,
                start,
                end,
            } => target.add_force_to_player(*player, *force, *start, *end),
            GameEvent::EntityDestroyed {
                entity, taken_by, ..
            } => target.entity_destroyed(entity, self.time, *taken_by),
            GameEvent::SetEntityPosition { entity, position } => {
                target.set_entity_position(entity, *position)
            }
            GameEvent::SetBlockPosition { block, position } => {
                target.set_block_position(block, *position)
            }
            GameEvent::MoveBlock { block, offset } => target.move_block(block, *offset),
            GameEvent::SetBlockCenter { block, center } => target.set_block_center(block, *center),
            GameEvent::SetBlockRotation { block, angle } => {
                target.set_block_rotation(block, *angle)
            }
            GameEvent::SetDynamic {
                subject,
                motion,
                start,
                end,
            } => target.set_dynamic(subject, motion.clone(), *start, *end),
            GameEvent::ClearDynamic { subject } => target.clear_dynamic(subject),
            GameEvent::SetGravity { gravity } => target.set_gravity(*gravity),
            GameEvent::PenaltyTime { time } => target.add_penalty_time(*time),
            GameEvent::Message { text } => target.add_message(text),
            GameEvent::ClearMessages => target.clear_messages(),
            GameEvent::CameraZoom { zoom } => target.camera_zoom(*zoom),
            GameEvent::CameraMove { offset } => target.camera_move(*offset),
        }
        Ok(())
    }

    /// Undo the event while a replay is played backwards. Only entity
    /// destruction has an inverse; everything else is driven by the states.
    pub fn revert(&self, target: &mut dyn EventTarget) {
        if let GameEvent::EntityDestroyed { entity, .. } = &self.event {
            target.revert_entity_destroyed(entity);
        }
    }
}

// ---------------------------------------------------------------------------
// EventTarget
// ---------------------------------------------------------------------------

/// The world events act on. Implemented by the scene.
///
/// Player indices come from external data (replays, scripts), so
/// implementations ignore indices that do not resolve.
pub trait EventTarget {
    fn kill_player(&mut self, player: PlayerIndex);
    fn make_player_win(&mut self, player: PlayerIndex);
    fn player_enters_zone(&mut self, player: PlayerIndex, zone: &str)
    -> Result<(), ScriptRuntimeError>;
    fn player_leaves_zone(&mut self, player: PlayerIndex, zone: &str)
    -> Result<(), ScriptRuntimeError>;
    fn player_touches_entity(
        &mut self,
        player: PlayerIndex,
        entity: &str,
        with_head: bool,
    ) -> Result<(), ScriptRuntimeError>;
    fn set_player_position(&mut self, player: PlayerIndex, position: Vec2, dir: Direction);
    fn add_force_to_player(&mut self, player: PlayerIndex, force: Vec2, start: Centis, end: Centis);
    fn entity_destroyed(&mut self, entity: &str, time: Centis, taken_by: Option<PlayerIndex>);
    fn revert_entity_destroyed(&mut self, entity: &str);
    fn set_entity_position(&mut self, entity: &str, position: Vec2);
    fn set_block_position(&mut self, block: &str, position: Vec2);
    fn move_block(&mut self, block: &str, offset: Vec2);
    fn set_block_center(&mut self, block: &str, center: Vec2);
    fn set_block_rotation(&mut self, block: &str, angle: f32);
    fn set_dynamic(&mut self, subject: &DynamicSubject, motion: DynamicMotion, start: Centis, end: Centis);
    fn clear_dynamic(&mut self, subject: &DynamicSubject);
    fn set_gravity(&mut self, gravity: Vec2);
    fn add_penalty_time(&mut self, time: Centis);
    fn add_message(&mut self, text: &str);
    fn clear_messages(&mut self);
    fn camera_zoom(&mut self, zoom: f32);
    fn camera_move(&mut self, offset: Vec2);
}

// ---------------------------------------------------------------------------
// EventSink
// ---------------------------------------------------------------------------

/// Receives every executed event, in execution order.
pub trait EventSink {
    fn record(&mut self, event: &SceneEvent) -> Result<(), ReplayIoError>;
}

/// Append one length-prefixed event record to `out`.
pub fn encode_event(event: &SceneEvent, out: &mut Vec<u8>) -> Result<(), ReplayIoError> {
    let bytes = bitcode::serialize(event).map_err(|e| ReplayIoError::Encode(e.to_string()))?;
    out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(&bytes);
    Ok(())
}

/// A sink collecting the encoded event stream in memory.
#[derive(Debug, Default, Clone)]
pub struct EventRecorder {
    pub data: Vec<u8>,
    pub count: usize,
}

impl EventSink for EventRecorder {
    fn record(&mut self, event: &SceneEvent) -> Result<(), ReplayIoError> {
        encode_event(event, &mut self.data)?;
        self.count += 1;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// EventQueue
// ---------------------------------------------------------------------------

/// FIFO of events raised during a step.
#[derive(Debug, Default, Clone)]
pub struct EventQueue {
    pending: VecDeque<SceneEvent>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: SceneEvent) {
        self.pending.push_back(event);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &SceneEvent> {
        self.pending.iter()
    }

    /// Take the next event to execute: the oldest non-win event, or the
    /// oldest win once nothing else is pending.
    pub fn pop_next(&mut self) -> Option<SceneEvent> {
        let index = self
            .pending
            .iter()
            .position(|e| !e.event.is_player_wins())
            .unwrap_or(0);
        self.pending.remove(index)
    }
}

/// Something owning an [`EventQueue`] that events can act upon.
pub trait EventHost: EventTarget {
    fn events_mut(&mut self) -> &mut EventQueue;
}

/// Execute every pending event of `host`, including the ones raised by the
/// handlers themselves. Each event is recorded to `sink` before it runs.
/// Returns the number of executed events.
pub fn drain_events<H: EventHost>(
    host: &mut H,
    mut sink: Option<&mut dyn EventSink>,
) -> Result<usize, crate::error::SceneError> {
    let mut executed = 0;
    while let Some(event) = host.events_mut().pop_next() {
        if let Some(sink) = sink.as_deref_mut() {
            sink.record(&event)
                .map_err(crate::error::ReplayError::from)?;
        }
        log::trace!("t={} {}", event.time, event.event.describe());
        event.do_action(host)?;
        executed += 1;
    }
    Ok(executed)
}

/// Decode a stream written by [`encode_event`].
pub fn decode_events(data: &[u8]) -> Result<Vec<SceneEvent>, crate::error::CorruptReplayError> {
    use crate::error::CorruptReplayError;

    let mut out = Vec::new();
    let mut offset = 0;
    while offset < data.len() {
        let Some(len_bytes) = data.get(offset..offset + 4) else {
            return Err(CorruptReplayError::TruncatedEvent { offset });
        };
        let len = u32::from_le_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]])
            as usize;
        let Some(body) = data.get(offset + 4..offset + 4 + len) else {
            return Err(CorruptReplayError::TruncatedEvent { offset });
        };
        let event: SceneEvent =
            bitcode::deserialize(body).map_err(|e| CorruptReplayError::Decode(e.to_string()))?;
        out.push(event);
        offset += 4 + len;
    }
    Ok(out)
}
