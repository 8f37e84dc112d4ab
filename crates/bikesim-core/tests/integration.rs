//! End-to-end tests for the scene with ghosts, replays and selection.

use std::path::PathBuf;

use bikesim_core::bike::serialized::SerializedBikeState;
use bikesim_core::bike::{BikeState, Direction};
use bikesim_core::config::{GhostStrategyConfig, SceneConfig};
use bikesim_core::event::{EventSink, GameEvent, SceneEvent};
use bikesim_core::ghost::{FileGhostSource, GhostPhase, NetGhostSource};
use bikesim_core::id::PlayerIndex;
use bikesim_core::level::EntitySpeciality;
use bikesim_core::physics::PhysicsSettings;
use bikesim_core::replay::Replay;
use bikesim_core::script::NullScriptHost;
use bikesim_core::selection::{GhostSelectionPolicy, ReplayCandidate, ReplayQuery};
use bikesim_core::test_utils::*;
use glam::Vec2;

fn temp_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("bikesim_it_{name}_{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn berry_taken(time: i64) -> SceneEvent {
    SceneEvent::new(
        time,
        GameEvent::EntityDestroyed {
            entity: "berry".into(),
            speciality: EntitySpeciality::ToTake,
            position: Vec2::ZERO,
            radius: 0.3,
            taken_by: Some(PlayerIndex(0)),
        },
    )
}

/// A recorded run is replayed by a ghost on the exact recorded poses.
#[test]
fn ghost_replays_recorded_run() {
    let (mut scene, p) = playing_scene(flat_level("flat"), Box::new(NullScriptHost));
    scene.controller_mut(p).unwrap().drive = 1.0;
    let mut replay = Replay::create("flat", "ann", 25.0);
    let mut recorded_at_97 = Vec2::ZERO;
    for _ in 0..150 {
        scene.update_level(1, Some(&mut replay)).unwrap();
        if scene.time() == 97 {
            recorded_at_97 = scene.player(p).unwrap().state().center;
        }
    }
    replay.finish_replay(false, 1.5);
    let bytes = replay.to_bytes().unwrap();

    let (mut watch, _) = playing_scene(flat_level("flat"), Box::new(NullScriptHost));
    let ghost = Replay::from_bytes(&bytes, Some("flat")).unwrap();
    let g = watch.add_ghost(
        Box::new(FileGhostSource::new(ghost)),
        "ann",
        true,
    );
    run(&mut watch, 97).unwrap();
    let shown = watch.ghosts()[g].state().center;
    assert!(shown.distance(recorded_at_97) < 1e-4, "{shown} vs {recorded_at_97}");
    assert!(shown.x > 0.0);
}

/// The diff to the reference follows the player's pickups, and a rewind
/// before the first pickup clears it.
#[test]
fn diff_to_player_tracks_pickups() {
    let pose = rest_pose(Vec2::ZERO);
    let level = with_entity(flat_level("flat"), "berry", EntitySpeciality::ToTake, pose.front_wheel, 0.3);
    let (mut scene, _) = playing_scene(level, Box::new(NullScriptHost));

    let mut ghost_run = rolling_replay("flat", "bob", 20, true);
    ghost_run.record(&berry_taken(30)).unwrap();
    let g = scene.add_ghost(
        Box::new(FileGhostSource::new(ghost_run)),
        "bob",
        true,
    );
    assert_eq!(scene.ghosts()[g].diff_to_player(), None);

    run(&mut scene, 5).unwrap();
    let diff = scene.ghosts()[g].diff_to_player().unwrap();
    assert!((diff + 0.29).abs() < 1e-6, "diff {diff}");

    assert!(scene.fastrewind(5));
    assert_eq!(scene.ghosts()[g].diff_to_player(), None);
}

/// A network ghost that closes without finishing ends as a dead end.
#[test]
fn net_ghost_dead_end() {
    let settings = PhysicsSettings::default();
    let mut source = NetGhostSource::new("peer");
    for i in 0..6 {
        let s = BikeState::at_rest(Vec2::new(i as f32, 1.0), Direction::Right, &settings.bike);
        source.push_state(SerializedBikeState::from_bike_state(&s, i * 4, settings.rpm_range()));
    }
    // Out of order, dropped.
    let late = BikeState::at_rest(Vec2::ZERO, Direction::Right, &settings.bike);
    source.push_state(SerializedBikeState::from_bike_state(&late, 2, settings.rpm_range()));
    source.close(false, 0.0);

    let (mut scene, _) = playing_scene(flat_level("flat"), Box::new(NullScriptHost));
    let g = scene.add_ghost(Box::new(source), "peer", false);
    run(&mut scene, 10).unwrap();
    assert_eq!(scene.ghosts()[g].phase(), GhostPhase::Tracking);
    run(&mut scene, 20).unwrap();
    assert!(scene.ghosts()[g].is_dead());
    assert_eq!(scene.ghosts()[g].finish_time(), None);
}

struct DirQuery {
    mine: PathBuf,
    room: PathBuf,
}

impl ReplayQuery for DirQuery {
    fn my_best(&self, _: &str, profile: &str, _: &[String]) -> Option<ReplayCandidate> {
        Some(ReplayCandidate {
            path: self.mine.clone(),
            player_name: profile.into(),
            finish_time: 12.0,
        })
    }

    fn local_best(&self, _: &str, _: &[String]) -> Option<ReplayCandidate> {
        None
    }

    fn room_best(&self, _: usize, _: &str, _: &[String]) -> Option<ReplayCandidate> {
        Some(ReplayCandidate {
            path: self.room.clone(),
            player_name: "wr".into(),
            finish_time: 9.0,
        })
    }
}

/// Policy-chosen replays become ghosts; unreadable ones are skipped.
#[test]
fn policy_ghosts_skip_corrupt_files() {
    let dir = temp_dir("policy");
    let mine = dir.join("me.rpl");
    let room = dir.join("wr.rpl");
    rolling_replay("flat", "me", 8, true).save(&mine).unwrap();
    std::fs::write(&room, b"not a replay").unwrap();

    let strategy = GhostStrategyConfig {
        my_best: true,
        local_best: false,
        best_of_room: vec![true],
        excluded: Vec::new(),
    };
    let config = SceneConfig {
        ghost_strategy: strategy.clone(),
        ..SceneConfig::default()
    };
    let (mut scene, _) = playing_scene_with(config, flat_level("flat"), Box::new(NullScriptHost));
    let policy = GhostSelectionPolicy::new(strategy, "me");
    let added = scene.add_ghosts_from_policy(&policy, &DirQuery { mine, room });

    assert_eq!(added.len(), 1);
    let ghost = &scene.ghosts()[added[0]];
    assert_eq!(ghost.label(), "My best");
    assert_eq!(ghost.player_name(), "me");
    // The player's own best is compared with even when the room slot fails.
    assert!(ghost.is_reference());
    std::fs::remove_dir_all(&dir).ok();
}
