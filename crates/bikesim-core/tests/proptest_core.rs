//! Property-based tests for the Bikesim core.
//!
//! Uses proptest to generate coordinates, bike poses and replays, then
//! verify the codec, interpolation, replay cursor and ghost invariants.

use bikesim_core::bike::interpolate::interpolate_linear;
use bikesim_core::bike::serialized::{SerializedBikeState, decode_coordinate, encode_coordinate};
use bikesim_core::bike::{BikeParameters, BikeState, Direction};
use bikesim_core::fixed::Centis;
use bikesim_core::ghost::{FileGhostSource, Ghost, GhostDisplay};
use bikesim_core::physics::PhysicsSettings;
use bikesim_core::replay::Replay;
use glam::Vec2;
use proptest::prelude::*;

// ===========================================================================
// Generators
// ===========================================================================

fn arb_pose() -> impl Strategy<Value = BikeState> {
    (-50.0f32..50.0, -50.0f32..50.0, 0.0f32..7000.0).prop_map(|(x, y, rpm)| {
        let mut s = BikeState::at_rest(Vec2::new(x, y), Direction::Right, &BikeParameters::default());
        s.engine_rpm = rpm;
        s
    })
}

/// Strictly increasing record times, starting at zero.
fn arb_times(max_states: usize) -> impl Strategy<Value = Vec<Centis>> {
    proptest::collection::vec(1..12i64, 1..max_states).prop_map(|gaps| {
        let mut t = 0;
        let mut times = vec![0];
        for g in gaps {
            t += g;
            times.push(t);
        }
        times
    })
}

fn replay_at(times: &[Centis]) -> Replay {
    let params = BikeParameters::default();
    let rpm = PhysicsSettings::default().rpm_range();
    let mut replay = Replay::create("prop", "ann", 25.0);
    for (i, &t) in times.iter().enumerate() {
        let s = BikeState::at_rest(Vec2::new(i as f32 * 0.5, 1.0), Direction::Right, &params);
        replay.store_state(&SerializedBikeState::from_bike_state(&s, t, rpm));
    }
    replay
}

fn ghost_for(times: &[Centis]) -> Ghost {
    let settings = PhysicsSettings::default();
    let mut replay = replay_at(times);
    replay.finish_replay(true, *times.last().unwrap_or(&0) as f32 / 100.0);
    Ghost::new(
        Box::new(FileGhostSource::new(replay)),
        "prop",
        GhostDisplay {
            interpolation: true,
            cubic: false,
        },
        &settings.bike,
        settings.rpm_range(),
    )
}

// ===========================================================================
// Properties
// ===========================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    /// Decoding an encoded coordinate lands within one quantization step.
    #[test]
    fn coordinate_round_trip_bound(
        reference in -1000.0f32..1000.0,
        max_delta in 0.01f32..20.0,
        unit in -1.0f32..=1.0,
    ) {
        let coord = reference + unit * max_delta;
        let decoded = decode_coordinate(reference, max_delta, encode_coordinate(reference, max_delta, coord));
        let step = 2.0 * max_delta / 255.0;
        // Allow for f32 rounding at large references.
        let slack = reference.abs().max(1.0) * f32::EPSILON * 4.0;
        prop_assert!((decoded - coord).abs() <= step + slack,
            "coord {coord} decoded {decoded} step {step}");
    }

    /// Interpolation returns its endpoints, and is constant between equal
    /// states.
    #[test]
    fn interpolation_identity(a in arb_pose(), b in arb_pose(), t in 0.0f32..=1.0) {
        prop_assert_eq!(interpolate_linear(&a, &b, 0.0), a.clone());
        prop_assert_eq!(interpolate_linear(&a, &b, 1.0), b.clone());
        prop_assert_eq!(interpolate_linear(&a, &a, t), a.clone());
    }

    /// States come back in the order and with the times they were stored.
    #[test]
    fn replay_monotonic_read(times in arb_times(1200)) {
        let mut replay = replay_at(&times);
        let mut read = Vec::new();
        while !replay.end_of_file() {
            match replay.load_state() {
                Some(s) => read.push(s.game_time),
                None => break,
            }
        }
        let expected: Vec<f32> = times.iter().map(|&t| t as f32 / 100.0).collect();
        prop_assert_eq!(read, expected);
    }

    /// Restoring a saved position replays the same states.
    #[test]
    fn rewind_then_replay_idempotent(times in arb_times(700), skip in 0usize..600, k in 1usize..40) {
        let mut replay = replay_at(&times);
        for _ in 0..skip.min(times.len() - 1) {
            replay.load_state();
        }
        let pos = replay.position();
        let first: Vec<_> = (0..k).filter_map(|_| replay.load_state()).collect();
        replay.rewind_at_position(pos);
        let second: Vec<_> = (0..k).filter_map(|_| replay.load_state()).collect();
        prop_assert_eq!(first, second);
    }

    /// After tracking any time within the recording, the ghost's bracket
    /// encloses it, whatever the order the times come in.
    #[test]
    fn ghost_bracket_encloses_time(
        times in arb_times(80),
        picks in proptest::collection::vec(0.0f64..=1.0, 1..30),
    ) {
        let last = *times.last().unwrap();
        let mut ghost = ghost_for(&times);
        for p in picks {
            let t = (p * last as f64).round() as Centis;
            ghost.update(t);
            let secs = t as f32 / 100.0;
            let (previous, next) = ghost.bracket();
            prop_assert!(previous <= secs, "previous {previous} after {secs}");
            prop_assert!(next >= secs || ghost.at_end(), "next {next} before {secs}");
        }
    }
}
