//! An on-disk replay store answering ghost selection queries.
//!
//! Replays are found by scanning directories for `*.rpl` files and reading
//! only their headers. Unreadable files are logged and left out.

use std::path::{Path, PathBuf};

use bikesim_core::replay::{Replay, ReplayInfos};
use bikesim_core::selection::{ReplayCandidate, ReplayQuery, replay_name};

use crate::loader::DataLoadError;

const REPLAY_EXTENSION: &str = "rpl";

#[derive(Debug, Clone)]
struct IndexedReplay {
    path: PathBuf,
    infos: ReplayInfos,
    /// `None` for replays recorded locally.
    room: Option<usize>,
}

/// Headers of every known replay.
#[derive(Debug, Clone, Default)]
pub struct ReplayIndex {
    entries: Vec<IndexedReplay>,
}

impl ReplayIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index the local replays in `dir`.
    pub fn scan_local(&mut self, dir: &Path) -> Result<usize, DataLoadError> {
        self.scan(dir, None)
    }

    /// Index the replays downloaded from room `room`.
    pub fn scan_room(&mut self, room: usize, dir: &Path) -> Result<usize, DataLoadError> {
        self.scan(dir, Some(room))
    }

    fn scan(&mut self, dir: &Path, room: Option<usize>) -> Result<usize, DataLoadError> {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some(REPLAY_EXTENSION))
            .collect();
        paths.sort();

        let mut added = 0;
        for path in paths {
            match Replay::read_infos(&path) {
                Ok(infos) => {
                    self.entries.push(IndexedReplay { path, infos, room });
                    added += 1;
                }
                Err(e) => log::warn!("skipping replay {}: {e}", path.display()),
            }
        }
        log::info!("indexed {added} replays from {}", dir.display());
        Ok(added)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn fastest<F>(&self, level_id: &str, excluded: &[String], accept: F) -> Option<ReplayCandidate>
    where
        F: Fn(&IndexedReplay) -> bool,
    {
        self.entries
            .iter()
            .filter(|r| r.infos.finished && r.infos.level_id == level_id)
            .filter(|r| !excluded.contains(&replay_name(&r.path)))
            .filter(|r| accept(r))
            .min_by(|a, b| a.infos.finish_time.total_cmp(&b.infos.finish_time))
            .map(|r| ReplayCandidate {
                path: r.path.clone(),
                player_name: r.infos.player_name.clone(),
                finish_time: r.infos.finish_time,
            })
    }
}

impl ReplayQuery for ReplayIndex {
    fn my_best(&self, level_id: &str, profile: &str, excluded: &[String]) -> Option<ReplayCandidate> {
        self.fastest(level_id, excluded, |r| {
            r.room.is_none() && r.infos.player_name == profile
        })
    }

    fn local_best(&self, level_id: &str, excluded: &[String]) -> Option<ReplayCandidate> {
        self.fastest(level_id, excluded, |r| r.room.is_none())
    }

    fn room_best(&self, room: usize, level_id: &str, excluded: &[String]) -> Option<ReplayCandidate> {
        self.fastest(level_id, excluded, |r| r.room == Some(room))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bikesim_core::test_utils::rolling_replay;
    use std::fs;

    fn make_test_dir(suffix: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "bikesim_index_test_{suffix}_{}",
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn save(dir: &Path, name: &str, level: &str, player: &str, finished: bool, time: f32) {
        let mut replay = rolling_replay(level, player, 4, false);
        replay.finish_replay(finished, time);
        replay.save(&dir.join(format!("{name}.rpl"))).unwrap();
    }

    // -----------------------------------------------------------------------
    // Test 1: Scanning skips corrupt and foreign files
    // -----------------------------------------------------------------------
    #[test]
    fn scan_skips_unreadable_files() {
        let dir = make_test_dir("scan");
        save(&dir, "a", "hills", "ann", true, 10.0);
        fs::write(dir.join("broken.rpl"), b"garbage").unwrap();
        fs::write(dir.join("notes.txt"), b"hello").unwrap();

        let mut index = ReplayIndex::new();
        assert_eq!(index.scan_local(&dir).unwrap(), 1);
        assert_eq!(index.len(), 1);

        let _ = fs::remove_dir_all(&dir);
    }

    // -----------------------------------------------------------------------
    // Test 2: Queries pick the fastest finished replay of the level
    // -----------------------------------------------------------------------
    #[test]
    fn fastest_finished_replay_wins() {
        let dir = make_test_dir("fastest");
        save(&dir, "slow", "hills", "ann", true, 30.0);
        save(&dir, "fast", "hills", "bob", true, 20.0);
        save(&dir, "unfinished", "hills", "ann", false, 5.0);
        save(&dir, "other_level", "dunes", "ann", true, 1.0);

        let mut index = ReplayIndex::new();
        index.scan_local(&dir).unwrap();

        let local = index.local_best("hills", &[]).unwrap();
        assert_eq!(replay_name(&local.path), "fast");
        assert_eq!(local.player_name, "bob");
        assert_eq!(local.finish_time, 20.0);

        let mine = index.my_best("hills", "ann", &[]).unwrap();
        assert_eq!(replay_name(&mine.path), "slow");
        assert!(index.my_best("hills", "carl", &[]).is_none());

        let _ = fs::remove_dir_all(&dir);
    }

    // -----------------------------------------------------------------------
    // Test 3: Excluded names and rooms
    // -----------------------------------------------------------------------
    #[test]
    fn exclusion_and_rooms() {
        let local = make_test_dir("local");
        let room = make_test_dir("room");
        save(&local, "fast", "hills", "bob", true, 20.0);
        save(&local, "slow", "hills", "bob", true, 25.0);
        save(&room, "wr", "hills", "champ", true, 9.0);

        let mut index = ReplayIndex::new();
        index.scan_local(&local).unwrap();
        index.scan_room(0, &room).unwrap();

        let excluded = vec!["fast".to_string()];
        let local_best = index.local_best("hills", &excluded).unwrap();
        assert_eq!(replay_name(&local_best.path), "slow");

        // Room replays never count as local.
        assert_eq!(index.room_best(0, "hills", &[]).unwrap().player_name, "champ");
        assert!(index.room_best(1, "hills", &[]).is_none());
        assert_eq!(index.local_best("hills", &[]).unwrap().finish_time, 20.0);

        let _ = fs::remove_dir_all(&local);
        let _ = fs::remove_dir_all(&room);
    }

    #[test]
    fn missing_directory_is_io_error() {
        let mut index = ReplayIndex::new();
        let result = index.scan_local(Path::new("/nonexistent/bikesim/replays"));
        assert!(matches!(result, Err(DataLoadError::Io(_))));
        assert!(index.is_empty());
    }
}
