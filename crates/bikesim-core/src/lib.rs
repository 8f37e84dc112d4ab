//! Bikesim Core -- deterministic simulation of a 2D physics motorbike game.
//!
//! This crate provides the bike physics, levels and their collision index,
//! gameplay events, the script seam, replay recording and ghost playback
//! that a trials-style bike game is built on.
//!
//! # Nine-Phase Update Pipeline
//!
//! Each call to [`scene::Scene::update_level`] advances the world by one
//! step:
//!
//! 1. **Dynamics** -- Scripted block and entity motions (every other step).
//! 2. **Clock** -- Advance scene time by the step times the speed factor.
//! 3. **Touches** -- Zone and entity touch transitions become events.
//! 4. **Script** -- One `Tick` per elapsed hundredth of a second.
//! 5. **Ghosts** -- Follow recorded runs; watched replays re-run events.
//! 6. **Players** -- Fixed-step bike physics and head deaths.
//! 7. **Events** -- Execute the event queue, recording each event.
//! 8. **Recording** -- Store the player's state at the replay frame rate.
//! 9. **Deletions** -- Drop destroyed entities from the collision index.
//!
//! # Key Types
//!
//! - [`scene::Scene`] -- The playable world and update orchestrator.
//! - [`level::Level`] -- Blocks, entities and zones, addressed by slotmap
//!   keys and by name.
//! - [`physics::PhysicsSimulator`] -- Fixed-step integrator of one bike.
//! - [`event::GameEvent`] -- Everything that can happen during play.
//! - [`replay::Replay`] -- Chunked recording of states, events and moving
//!   blocks, serialized with bitcode.
//! - [`ghost::Ghost`] -- Interpolated playback of a recorded run.
//! - [`selection::GhostSelectionPolicy`] -- Which replays become ghosts.
//! - [`fixed::Fixed64`] -- Q32.32 fixed-point type for the clock speed.

pub mod bike;
pub mod biker;
pub mod collision;
pub mod config;
pub mod dynamic;
pub mod error;
pub mod event;
pub mod fixed;
pub mod geom;
pub mod ghost;
pub mod id;
pub mod level;
pub mod physics;
pub mod replay;
pub mod rng;
pub mod scene;
pub mod script;
pub mod selection;
pub mod sim;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
