//! Scene configuration, passed explicitly to [`crate::scene::Scene::new`].

use serde::{Deserialize, Serialize};

use crate::physics::PhysicsSettings;

/// Which ghosts to look for before play.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GhostStrategyConfig {
    /// The player's own best finished replay.
    pub my_best: bool,
    /// The best finished replay of any local profile.
    pub local_best: bool,
    /// One flag per remote room.
    pub best_of_room: Vec<bool>,
    /// Replay names never to be used as ghosts.
    pub excluded: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneConfig {
    pub physics: PhysicsSettings,
    /// Recorded states per second.
    pub replay_frame_rate: f32,
    pub ghost_interpolation: bool,
    pub ghost_cubic_interpolation: bool,
    /// A head hitting the level kills the player.
    pub head_touch_kills: bool,
    /// Script ticks run per update at most; the rest of the backlog is
    /// dropped.
    pub script_catchup_limit: u32,
    /// Seed of the wheel-spin random source.
    pub rng_seed: u64,
    pub ghost_strategy: GhostStrategyConfig,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            physics: PhysicsSettings::default(),
            replay_frame_rate: 25.0,
            ghost_interpolation: true,
            ghost_cubic_interpolation: false,
            head_touch_kills: true,
            script_catchup_limit: 100,
            rng_seed: 0x5EED,
            ghost_strategy: GhostStrategyConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let cfg: SceneConfig =
            serde_json::from_str(r#"{ "replay_frame_rate": 50.0, "ghost_strategy": { "my_best": true } }"#)
                .unwrap();
        assert_eq!(cfg.replay_frame_rate, 50.0);
        assert!(cfg.ghost_strategy.my_best);
        assert!(!cfg.ghost_strategy.local_best);
        assert!(cfg.ghost_interpolation);
        assert_eq!(cfg.script_catchup_limit, 100);
        assert_eq!(cfg.physics, PhysicsSettings::default());
    }
}
