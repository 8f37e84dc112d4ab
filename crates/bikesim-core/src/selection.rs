//! Choosing which replays to show as ghosts.
//!
//! Room slots resolve first, then the player's best, then the local best.
//! A replay already chosen for an earlier slot is never chosen twice.

use std::path::{Path, PathBuf};

use crate::config::GhostStrategyConfig;

/// A replay known to the replay store.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayCandidate {
    pub path: PathBuf,
    pub player_name: String,
    /// Seconds.
    pub finish_time: f32,
}

/// Read-only access to the known replays. Every method returns the fastest
/// finished replay of `level_id` matching its criterion, skipping replays
/// whose name is listed in `excluded`.
pub trait ReplayQuery {
    fn my_best(&self, level_id: &str, profile: &str, excluded: &[String]) -> Option<ReplayCandidate>;
    fn local_best(&self, level_id: &str, excluded: &[String]) -> Option<ReplayCandidate>;
    fn room_best(&self, room: usize, level_id: &str, excluded: &[String]) -> Option<ReplayCandidate>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GhostSlot {
    BestOfRoom(usize),
    MyBest,
    LocalBest,
}

/// One resolved ghost.
#[derive(Debug, Clone, PartialEq)]
pub struct GhostChoice {
    pub path: PathBuf,
    pub label: String,
    pub slot: GhostSlot,
    /// Set for the first room slot and the player's own best, the ghosts
    /// the player is compared with.
    pub is_reference: bool,
}

/// Name under which a replay can be excluded: its file stem.
pub fn replay_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn push_choice(chosen: &mut Vec<GhostChoice>, c: ReplayCandidate, slot: GhostSlot, label: String) {
    if chosen.iter().any(|g| g.path == c.path) {
        log::debug!("ghost {} already chosen, skipping {slot:?}", c.path.display());
        return;
    }
    log::debug!("ghost slot {slot:?} -> {}", c.path.display());
    chosen.push(GhostChoice {
        path: c.path,
        label,
        slot,
        is_reference: matches!(slot, GhostSlot::BestOfRoom(0) | GhostSlot::MyBest),
    });
}

#[derive(Debug, Clone)]
pub struct GhostSelectionPolicy {
    strategy: GhostStrategyConfig,
    profile: String,
}

impl GhostSelectionPolicy {
    pub fn new(strategy: GhostStrategyConfig, profile: impl Into<String>) -> Self {
        Self {
            strategy,
            profile: profile.into(),
        }
    }

    fn is_excluded(&self, candidate: &ReplayCandidate) -> bool {
        let name = replay_name(&candidate.path);
        self.strategy.excluded.iter().any(|e| *e == name)
    }

    /// Resolve the ghosts of `level_id`. No match for a slot is not an
    /// error; the slot is simply left out.
    pub fn resolve(&self, level_id: &str, query: &dyn ReplayQuery) -> Vec<GhostChoice> {
        let excluded = &self.strategy.excluded;
        let my_best = query
            .my_best(level_id, &self.profile, excluded)
            .filter(|c| !self.is_excluded(c));
        let mut chosen: Vec<GhostChoice> = Vec::new();

        for (room, enabled) in self.strategy.best_of_room.iter().enumerate() {
            if !*enabled {
                continue;
            }
            let room_best = query
                .room_best(room, level_id, excluded)
                .filter(|c| !self.is_excluded(c));
            // The slot shows the best known time, own replays included.
            let candidate = match (room_best, &my_best) {
                (Some(best), Some(mine)) if mine.finish_time < best.finish_time => mine.clone(),
                (Some(best), _) => best,
                (None, Some(mine)) => mine.clone(),
                (None, None) => continue,
            };
            let label = format!("{} (room {})", candidate.player_name, room + 1);
            push_choice(&mut chosen, candidate, GhostSlot::BestOfRoom(room), label);
        }

        if self.strategy.my_best {
            if let Some(mine) = my_best.clone() {
                push_choice(&mut chosen, mine, GhostSlot::MyBest, "My best".to_string());
            }
        }

        if self.strategy.local_best {
            if let Some(local) = query
                .local_best(level_id, excluded)
                .filter(|c| !self.is_excluded(c))
            {
                let label = format!("{} (local best)", local.player_name);
                push_choice(&mut chosen, local, GhostSlot::LocalBest, label);
            }
        }

        chosen
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Fixed {
        mine: Option<ReplayCandidate>,
        local: Option<ReplayCandidate>,
        rooms: Vec<Option<ReplayCandidate>>,
    }

    impl ReplayQuery for Fixed {
        fn my_best(&self, _: &str, _: &str, _: &[String]) -> Option<ReplayCandidate> {
            self.mine.clone()
        }
        fn local_best(&self, _: &str, _: &[String]) -> Option<ReplayCandidate> {
            self.local.clone()
        }
        fn room_best(&self, room: usize, _: &str, _: &[String]) -> Option<ReplayCandidate> {
            self.rooms.get(room).cloned().flatten()
        }
    }

    fn cand(path: &str, who: &str, time: f32) -> ReplayCandidate {
        ReplayCandidate {
            path: PathBuf::from(path),
            player_name: who.into(),
            finish_time: time,
        }
    }

    fn all_on(rooms: usize) -> GhostStrategyConfig {
        GhostStrategyConfig {
            my_best: true,
            local_best: true,
            best_of_room: vec![true; rooms],
            excluded: Vec::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Test 1: The same file is never chosen twice
    // -----------------------------------------------------------------------
    #[test]
    fn duplicate_is_suppressed() {
        let q = Fixed {
            mine: Some(cand("me.rpl", "me", 30.0)),
            local: Some(cand("me.rpl", "me", 30.0)),
            rooms: vec![Some(cand("me.rpl", "me", 30.0))],
        };
        let out = GhostSelectionPolicy::new(all_on(1), "me").resolve("lvl", &q);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].slot, GhostSlot::BestOfRoom(0));
        assert!(out[0].is_reference);
    }

    // -----------------------------------------------------------------------
    // Test 2: A faster own replay replaces the room's
    // -----------------------------------------------------------------------
    #[test]
    fn own_best_substitutes_slower_room() {
        let q = Fixed {
            mine: Some(cand("me.rpl", "me", 20.0)),
            local: Some(cand("bob.rpl", "bob", 25.0)),
            rooms: vec![Some(cand("room.rpl", "ann", 28.0)), Some(cand("fast.rpl", "zed", 10.0))],
        };
        let out = GhostSelectionPolicy::new(all_on(2), "me").resolve("lvl", &q);
        let paths: Vec<_> = out.iter().map(|g| g.path.to_str().unwrap()).collect();
        assert_eq!(paths, vec!["me.rpl", "fast.rpl", "bob.rpl"]);
        assert_eq!(out.iter().filter(|g| g.is_reference).count(), 1);
    }

    // -----------------------------------------------------------------------
    // Test 3: Missing replays and exclusions leave slots empty
    // -----------------------------------------------------------------------
    #[test]
    fn nothing_found_is_not_an_error() {
        let out = GhostSelectionPolicy::new(all_on(3), "me").resolve("lvl", &Fixed::default());
        assert!(out.is_empty());
    }

    #[test]
    fn excluded_names_are_skipped() {
        let q = Fixed {
            mine: Some(cand("replays/me.rpl", "me", 20.0)),
            local: Some(cand("replays/bob.rpl", "bob", 25.0)),
            rooms: Vec::new(),
        };
        let mut strategy = all_on(0);
        strategy.excluded = vec!["me".into()];
        let out = GhostSelectionPolicy::new(strategy, "me").resolve("lvl", &q);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].slot, GhostSlot::LocalBest);
        assert!(!out[0].is_reference);
    }

    #[test]
    fn disabled_slots_are_not_queried() {
        let q = Fixed {
            mine: Some(cand("me.rpl", "me", 20.0)),
            local: None,
            rooms: vec![Some(cand("room.rpl", "ann", 28.0))],
        };
        let strategy = GhostStrategyConfig {
            my_best: false,
            local_best: false,
            best_of_room: vec![false],
            excluded: Vec::new(),
        };
        assert!(GhostSelectionPolicy::new(strategy, "me").resolve("lvl", &q).is_empty());
    }

    // -----------------------------------------------------------------------
    // Test 4: An empty room shows the player's own best
    // -----------------------------------------------------------------------
    #[test]
    fn empty_room_falls_back_to_own_best() {
        let q = Fixed {
            mine: Some(cand("me.rpl", "me", 20.0)),
            local: None,
            rooms: vec![None],
        };
        let strategy = GhostStrategyConfig {
            my_best: false,
            local_best: false,
            best_of_room: vec![true],
            excluded: Vec::new(),
        };
        let out = GhostSelectionPolicy::new(strategy, "me").resolve("lvl", &q);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].slot, GhostSlot::BestOfRoom(0));
        assert_eq!(out[0].path, PathBuf::from("me.rpl"));
        assert_eq!(out[0].label, "me (room 1)");
    }

    // -----------------------------------------------------------------------
    // Test 5: First room and own best are references, the rest are not
    // -----------------------------------------------------------------------
    #[test]
    fn reference_flags_follow_the_slot() {
        let q = Fixed {
            mine: Some(cand("me.rpl", "me", 40.0)),
            local: Some(cand("bob.rpl", "bob", 25.0)),
            rooms: vec![Some(cand("room.rpl", "ann", 28.0)), Some(cand("fast.rpl", "zed", 10.0))],
        };
        let out = GhostSelectionPolicy::new(all_on(2), "me").resolve("lvl", &q);
        let flags: Vec<_> = out.iter().map(|g| (g.slot, g.is_reference)).collect();
        assert_eq!(
            flags,
            vec![
                (GhostSlot::BestOfRoom(0), true),
                (GhostSlot::BestOfRoom(1), false),
                (GhostSlot::MyBest, true),
                (GhostSlot::LocalBest, false),
            ]
        );
    }
}
