//! Integration test: ghosts chosen from a replay directory.
//!
//! Replays are indexed from disk by the data crate, resolved by the
//! selection policy and shown by the scene. Also covers how a finished
//! ghost comes to rest on its last recorded state.

use std::path::{Path, PathBuf};

use bikesim_core::config::{GhostStrategyConfig, SceneConfig};
use bikesim_core::fixed::Centis;
use bikesim_core::ghost::{FileGhostSource, Ghost, GhostDisplay, GhostPhase};
use bikesim_core::physics::PhysicsSettings;
use bikesim_core::script::NullScriptHost;
use bikesim_core::selection::{GhostSelectionPolicy, GhostSlot, replay_name};
use bikesim_core::test_utils::*;
use bikesim_data::ReplayIndex;

fn temp_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("bikesim_ghosts_{name}_{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn save_run(dir: &Path, name: &str, player: &str, states: usize, finish: f32) {
    let mut replay = rolling_replay("flat", player, states, true);
    replay.finish_replay(true, finish);
    replay.save(&dir.join(format!("{name}.rpl"))).unwrap();
}

#[test]
fn same_replay_for_two_slots_is_shown_once() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = temp_dir("dup");
    save_run(&dir, "mine", "me", 12, 7.5);
    save_run(&dir, "slower", "you", 12, 9.0);

    // The room directory is the local one: my best is also the room best.
    let mut index = ReplayIndex::new();
    index.scan_local(&dir).unwrap();
    index.scan_room(0, &dir).unwrap();

    let strategy = GhostStrategyConfig {
        my_best: true,
        local_best: true,
        best_of_room: vec![true],
        excluded: Vec::new(),
    };
    let policy = GhostSelectionPolicy::new(strategy.clone(), "me");
    let choices = policy.resolve("flat", &index);
    assert_eq!(choices.len(), 1);
    assert_eq!(replay_name(&choices[0].path), "mine");
    assert_eq!(choices[0].slot, GhostSlot::BestOfRoom(0));
    assert!(choices[0].is_reference);

    let config = SceneConfig {
        ghost_strategy: strategy,
        ..SceneConfig::default()
    };
    let (mut scene, _) = playing_scene_with(config, flat_level("flat"), Box::new(NullScriptHost));
    let added = scene.add_ghosts_from_policy(&policy, &index);
    assert_eq!(added.len(), 1);
    assert_eq!(scene.ghosts().len(), 1);
    assert_eq!(scene.ghosts()[0].player_name(), "me");

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn excluded_replay_falls_back_to_next_best() {
    let dir = temp_dir("excluded");
    save_run(&dir, "mine", "me", 12, 7.5);
    save_run(&dir, "other", "you", 12, 9.0);

    let mut index = ReplayIndex::new();
    index.scan_local(&dir).unwrap();

    let strategy = GhostStrategyConfig {
        my_best: false,
        local_best: true,
        best_of_room: Vec::new(),
        excluded: vec!["mine".into()],
    };
    let choices = GhostSelectionPolicy::new(strategy, "me").resolve("flat", &index);
    assert_eq!(choices.len(), 1);
    assert_eq!(replay_name(&choices[0].path), "other");
    assert_eq!(choices[0].label, "you (local best)");

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn finished_ghost_rests_on_last_state() {
    let settings = PhysicsSettings::default();
    let mut recording = rolling_replay("flat", "bob", 10, true);
    recording.finish_replay(true, 0.36);
    let last: Centis = 36;

    let mut ghost = Ghost::new(
        Box::new(FileGhostSource::new(recording)),
        "bob",
        GhostDisplay {
            interpolation: true,
            cubic: false,
        },
        &settings.bike,
        settings.rpm_range(),
    );

    for t in 0..last {
        ghost.update(t);
        assert_eq!(ghost.phase(), GhostPhase::Tracking, "at {t}");
        assert_eq!(ghost.finish_time(), None);
    }

    for t in [last, last + 1, last + 50, 1000] {
        ghost.update(t);
        assert_eq!(ghost.phase(), GhostPhase::Finished, "at {t}");
        assert_eq!(ghost.finish_time(), Some(0.36));
        assert_eq!(ghost.state().engine_rpm, 0.0);
        assert!((ghost.state().center.x - 9.0).abs() < 1e-3);
    }
}

#[test]
fn ghosts_follow_a_saved_replay_in_the_scene() {
    let dir = temp_dir("scene");
    let path = dir.join("run.rpl");
    save_run(&dir, "run", "ann", 20, 0.76);

    let (mut scene, _) = playing_scene(flat_level("flat"), Box::new(NullScriptHost));
    let g = scene.add_ghost_from_file(&path, "ann", true).unwrap();
    run(&mut scene, 40).unwrap();
    assert_eq!(scene.ghosts()[g].phase(), GhostPhase::Tracking);
    assert!((scene.ghosts()[g].state().center.x - 10.0).abs() < 1e-3);

    run(&mut scene, 40).unwrap();
    assert_eq!(scene.ghosts()[g].finish_time(), Some(0.76));

    // A replay of another level is refused.
    rolling_replay("dunes", "ann", 5, true)
        .save(&dir.join("foreign.rpl"))
        .unwrap();
    assert!(scene.add_ghost_from_file(&dir.join("foreign.rpl"), "x", false).is_err());

    std::fs::remove_dir_all(&dir).ok();
}
