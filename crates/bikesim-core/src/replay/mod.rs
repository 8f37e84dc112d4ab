//! Chunked recording of one playthrough, with a rewindable read cursor.
//!
//! A [`Replay`] is either being recorded (states appended with
//! [`Replay::store_state`], events through its [`EventSink`] impl) or opened
//! for playback. The two uses never overlap on one instance.

pub mod format;

use std::fs;
use std::path::Path;

use glam::Vec2;

use crate::bike::serialized::{SERIALIZED_STATE_SIZE, SerializedBikeState};
use crate::error::{CorruptReplayError, ReplayError, ReplayIoError};
use crate::event::{EventSink, GameEvent, SceneEvent, decode_events, encode_event};
use crate::fixed::Centis;
use crate::level::EntitySpeciality;

pub use format::{
    BlockSample, FORMAT_VERSION, MovingBlockTrack, ReplayHeader, STATES_PER_CHUNK, StateChunk,
};

/// Minimum gap between two samples of one moving block.
const FARDIFFTIME1: Centis = 15;
const FARDIFFTIME2: Centis = 80;
const FARDIFFTIME3: Centis = 150;
const FARDISTANCE1: f32 = 5.0;
const FARDISTANCE2: f32 = 10.0;
const MIN_DIFFMOVE: f32 = 0.1;
const SLOW_RESAMPLE_TIME: Centis = 500;
const SLOW_RESAMPLE_MOVE: f32 = 0.05;

/// A cursor into the state chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReplayPosition {
    pub chunk: usize,
    pub state: usize,
    pub end_of_file: bool,
}

/// A recorded event and whether playback has executed it.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedEvent {
    pub event: SceneEvent,
    pub passed: bool,
}

/// Header fields, read without decoding the states.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayInfos {
    pub level_id: String,
    pub player_name: String,
    pub frame_rate: f32,
    pub finished: bool,
    /// Seconds.
    pub finish_time: f32,
    pub version: u32,
}

impl MovingBlockTrack {
    /// The latest sample taken at or before `time`.
    pub fn sample_at(&self, time: Centis) -> Option<&BlockSample> {
        self.samples.iter().take_while(|s| s.time <= time).last()
    }
}

#[derive(Debug, Clone)]
pub struct Replay {
    header: ReplayHeader,
    version: u32,
    chunks: Vec<StateChunk>,
    events_data: Vec<u8>,
    events: Vec<RecordedEvent>,
    moving_blocks: Vec<MovingBlockTrack>,
    cursor: ReplayPosition,
}

impl Replay {
    // -----------------------------------------------------------------------
    // Recording
    // -----------------------------------------------------------------------

    /// An empty replay ready to record.
    pub fn create(level_id: impl Into<String>, player_name: impl Into<String>, frame_rate: f32) -> Self {
        Self {
            header: ReplayHeader {
                level_id: level_id.into(),
                player_name: player_name.into(),
                frame_rate,
                state_size: SERIALIZED_STATE_SIZE as u32,
                finished: false,
                finish_time: 0.0,
            },
            version: FORMAT_VERSION,
            chunks: Vec::new(),
            events_data: Vec::new(),
            events: Vec::new(),
            moving_blocks: Vec::new(),
            cursor: ReplayPosition::default(),
        }
    }

    /// Append a state, opening a new chunk when the current one is full.
    pub fn store_state(&mut self, state: &SerializedBikeState) {
        let needs_chunk = self
            .chunks
            .last()
            .is_none_or(|c| c.num_states as usize >= STATES_PER_CHUNK);
        if needs_chunk {
            self.chunks.push(StateChunk {
                num_states: 0,
                data: Vec::with_capacity(STATES_PER_CHUNK * SERIALIZED_STATE_SIZE),
            });
        }
        if let Some(chunk) = self.chunks.last_mut() {
            chunk.data.extend_from_slice(&state.to_bytes());
            chunk.num_states += 1;
        }
    }

    /// Sample the moving blocks. A sample is kept only when the block moved
    /// enough since its previous one; blocks far from the player are
    /// sampled less often.
    pub fn store_blocks<'a>(
        &mut self,
        time: Centis,
        blocks: impl IntoIterator<Item = (&'a str, Vec2, f32)>,
        player: Vec2,
    ) {
        for (name, position, rotation) in blocks {
            let sample = BlockSample {
                time,
                position,
                rotation,
            };
            let track = match self.moving_blocks.iter().position(|t| t.name == name) {
                Some(i) => &mut self.moving_blocks[i],
                None => {
                    self.moving_blocks.push(MovingBlockTrack {
                        name: name.to_string(),
                        samples: Vec::new(),
                    });
                    let last = self.moving_blocks.len() - 1;
                    &mut self.moving_blocks[last]
                }
            };
            let keep = match track.samples.last() {
                None => true,
                Some(prev) => should_store_block(prev, &sample, player),
            };
            if keep {
                track.samples.push(sample);
            }
        }
    }

    /// Mark the outcome. `finish_time` is in seconds.
    pub fn finish_replay(&mut self, finished: bool, finish_time: f32) {
        self.header.finished = finished;
        self.header.finish_time = finish_time;
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    /// Encode in the current format. Blocks sampled once never moved and
    /// are left out.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ReplayIoError> {
        let body = format::ReplayBody {
            events_data: self.events_data.clone(),
            chunks: self.chunks.clone(),
            moving_blocks: self
                .moving_blocks
                .iter()
                .filter(|t| t.samples.len() > 1)
                .cloned()
                .collect(),
        };
        format::encode_current(&self.header, &body)
    }

    pub fn save(&self, path: &Path) -> Result<(), ReplayIoError> {
        fs::write(path, self.to_bytes()?)?;
        log::info!(
            "saved replay of `{}` ({} states) to {}",
            self.header.level_id,
            self.num_states(),
            path.display()
        );
        Ok(())
    }

    /// Decode a replay. When `expected_level` is given the replay must
    /// belong to that level.
    pub fn from_bytes(data: &[u8], expected_level: Option<&str>) -> Result<Self, CorruptReplayError> {
        let (version, payload) = format::split_preamble(data)?;
        let decoder = format::decoder_for(version)?;
        let header = decoder.read_header(payload)?;
        let body = decoder.read_body(payload)?;
        format::validate(&header, &body)?;
        if let Some(expected) = expected_level {
            if header.level_id != expected {
                return Err(CorruptReplayError::LevelMismatch {
                    expected: expected.to_string(),
                    found: header.level_id,
                });
            }
        }
        let events = decode_events(&body.events_data)?
            .into_iter()
            .map(|event| RecordedEvent {
                event,
                passed: false,
            })
            .collect();
        Ok(Self {
            header,
            version,
            chunks: body.chunks,
            events_data: body.events_data,
            events,
            moving_blocks: body.moving_blocks,
            cursor: ReplayPosition::default(),
        })
    }

    pub fn open(path: &Path, expected_level: Option<&str>) -> Result<Self, ReplayError> {
        let data = fs::read(path)?;
        let replay = Self::from_bytes(&data, expected_level)?;
        log::debug!(
            "opened replay {} (v{}, level `{}`, {} states)",
            path.display(),
            replay.version,
            replay.header.level_id,
            replay.num_states()
        );
        Ok(replay)
    }

    /// Read the header fields only.
    pub fn read_infos(path: &Path) -> Result<ReplayInfos, ReplayError> {
        let data = fs::read(path)?;
        Ok(Self::infos_from_bytes(&data)?)
    }

    pub fn infos_from_bytes(data: &[u8]) -> Result<ReplayInfos, CorruptReplayError> {
        let (version, payload) = format::split_preamble(data)?;
        let header = format::decoder_for(version)?.read_header(payload)?;
        Ok(ReplayInfos {
            level_id: header.level_id,
            player_name: header.player_name,
            frame_rate: header.frame_rate,
            finished: header.finished,
            finish_time: header.finish_time,
            version,
        })
    }

    // -----------------------------------------------------------------------
    // Metadata
    // -----------------------------------------------------------------------

    pub fn level_id(&self) -> &str {
        &self.header.level_id
    }

    pub fn player_name(&self) -> &str {
        &self.header.player_name
    }

    pub fn frame_rate(&self) -> f32 {
        self.header.frame_rate
    }

    pub fn did_finish(&self) -> bool {
        self.header.finished
    }

    /// Seconds.
    pub fn finish_time(&self) -> f32 {
        self.header.finish_time
    }

    /// Format version the replay was read from.
    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn num_states(&self) -> usize {
        self.chunks.iter().map(|c| c.num_states as usize).sum()
    }

    pub fn events(&self) -> &[RecordedEvent] {
        &self.events
    }

    pub fn events_mut(&mut self) -> &mut [RecordedEvent] {
        &mut self.events
    }

    pub fn moving_blocks(&self) -> &[MovingBlockTrack] {
        &self.moving_blocks
    }

    /// Times at which the recorded player took a to-take entity.
    pub fn to_take_times(&self) -> Vec<Centis> {
        self.events
            .iter()
            .filter(|e| {
                matches!(
                    e.event.event,
                    GameEvent::EntityDestroyed {
                        speciality: EntitySpeciality::ToTake,
                        ..
                    }
                )
            })
            .map(|e| e.event.time)
            .collect()
    }

    // -----------------------------------------------------------------------
    // Read cursor
    // -----------------------------------------------------------------------

    fn state_in(&self, chunk: usize, state: usize) -> Option<SerializedBikeState> {
        let size = self.header.state_size as usize;
        let chunk = self.chunks.get(chunk)?;
        if state >= chunk.num_states as usize {
            return None;
        }
        SerializedBikeState::from_bytes(chunk.data.get(state * size..(state + 1) * size)?)
    }

    fn chunk_len(&self, chunk: usize) -> usize {
        self.chunks.get(chunk).map_or(0, |c| c.num_states as usize)
    }

    /// State at the cursor.
    pub fn peek_state(&self) -> Option<SerializedBikeState> {
        self.state_in(self.cursor.chunk, self.cursor.state)
    }

    /// State `offset` records away from the cursor, if it exists.
    pub fn peek_offset(&self, offset: isize) -> Option<SerializedBikeState> {
        let mut probe = self.clone_cursor();
        if offset >= 0 {
            if !probe.forward(offset as usize) {
                return None;
            }
        } else if !probe.backward(offset.unsigned_abs()) {
            return None;
        }
        self.state_in(probe.pos.chunk, probe.pos.state)
    }

    /// Return the state at the cursor and advance. On the last state the
    /// cursor stays and end-of-file is raised instead.
    pub fn load_state(&mut self) -> Option<SerializedBikeState> {
        let state = self.peek_state()?;
        if self.at_last_state() {
            self.cursor.end_of_file = true;
        } else {
            self.next_state(1);
        }
        Some(state)
    }

    pub fn at_last_state(&self) -> bool {
        match self.chunks.len() {
            0 => true,
            n => self.cursor.chunk + 1 >= n && self.cursor.state + 1 >= self.chunk_len(n - 1),
        }
    }

    pub fn at_first_state(&self) -> bool {
        self.cursor.chunk == 0 && self.cursor.state == 0
    }

    pub fn end_of_file(&self) -> bool {
        self.cursor.end_of_file
    }

    fn clone_cursor(&self) -> Walker<'_> {
        Walker {
            replay: self,
            pos: self.cursor,
        }
    }

    fn next_state(&mut self, n: usize) {
        let mut w = self.clone_cursor();
        w.forward(n);
        self.cursor = w.pos;
    }

    fn previous_state(&mut self, n: usize) {
        let mut w = self.clone_cursor();
        w.backward(n);
        self.cursor = w.pos;
    }

    fn frames_for(&self, centis: Centis) -> usize {
        let n = centis.max(0) as f32 * self.header.frame_rate / 100.0;
        n.round() as usize
    }

    /// Skip forward by `centis` of recorded time. Stops on the last state.
    pub fn fastforward(&mut self, centis: Centis) {
        let n = self.frames_for(centis);
        self.next_state(n);
    }

    /// Move back by `centis` of recorded time, and at least `min_frames`
    /// states. Stops on the first state and clears end-of-file.
    pub fn fastrewind(&mut self, centis: Centis, min_frames: usize) {
        let n = self.frames_for(centis).max(min_frames);
        self.previous_state(n);
        self.cursor.end_of_file = false;
    }

    pub fn position(&self) -> ReplayPosition {
        self.cursor
    }

    pub fn rewind_at_position(&mut self, position: ReplayPosition) {
        self.cursor = position;
    }

    pub fn rewind_at_beginning(&mut self) {
        self.cursor = ReplayPosition::default();
    }

    /// Back to the first state with every event pending again.
    pub fn reinitialize(&mut self) {
        self.rewind_at_beginning();
        for e in &mut self.events {
            e.passed = false;
        }
    }
}

impl EventSink for Replay {
    fn record(&mut self, event: &SceneEvent) -> Result<(), ReplayIoError> {
        encode_event(event, &mut self.events_data)?;
        self.events.push(RecordedEvent {
            event: event.clone(),
            passed: true,
        });
        Ok(())
    }
}

fn should_store_block(prev: &BlockSample, sample: &BlockSample, player: Vec2) -> bool {
    if sample.time < prev.time + FARDIFFTIME1 {
        return false;
    }
    let moved = prev.position.distance(sample.position);
    if moved > MIN_DIFFMOVE || prev.rotation != sample.rotation {
        let dist = sample.position.distance(player);
        if dist >= FARDISTANCE1 && sample.time <= prev.time + FARDIFFTIME2 {
            return false;
        }
        if dist >= FARDISTANCE2 && sample.time <= prev.time + FARDIFFTIME3 {
            return false;
        }
        return true;
    }
    sample.time > prev.time + SLOW_RESAMPLE_TIME && moved > SLOW_RESAMPLE_MOVE
}

/// Cursor arithmetic over chunks of uneven length.
struct Walker<'a> {
    replay: &'a Replay,
    pos: ReplayPosition,
}

impl Walker<'_> {
    /// Returns false when clamped at the last state.
    fn forward(&mut self, mut n: usize) -> bool {
        while n > 0 {
            let len = self.replay.chunk_len(self.pos.chunk);
            if len == 0 {
                return false;
            }
            let room = len - 1 - self.pos.state.min(len - 1);
            if n <= room {
                self.pos.state += n;
                return true;
            }
            if self.pos.chunk + 1 >= self.replay.chunks.len() {
                self.pos.state = len - 1;
                return false;
            }
            n -= room + 1;
            self.pos.chunk += 1;
            self.pos.state = 0;
        }
        true
    }

    /// Returns false when clamped at the first state.
    fn backward(&mut self, mut n: usize) -> bool {
        while n > 0 {
            if n <= self.pos.state {
                self.pos.state -= n;
                return true;
            }
            if self.pos.chunk == 0 {
                self.pos.state = 0;
                return false;
            }
            n -= self.pos.state + 1;
            self.pos.chunk -= 1;
            self.pos.state = self.replay.chunk_len(self.pos.chunk).saturating_sub(1);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bike::{BikeParameters, BikeState, Direction};
    use crate::bike::serialized::EngineRpmRange;

    const RPM: EngineRpmRange = EngineRpmRange {
        min: 400.0,
        max: 7000.0,
    };

    fn recorded(n: usize) -> Replay {
        let params = BikeParameters::default();
        let mut replay = Replay::create("lvl", "ann", 25.0);
        for i in 0..n {
            let state = BikeState::at_rest(Vec2::new(i as f32, 0.0), Direction::Right, &params);
            replay.store_state(&SerializedBikeState::from_bike_state(&state, i as Centis * 4, RPM));
        }
        replay
    }

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("bikesim_replay_{name}_{}.rpl", std::process::id()))
    }

    // -----------------------------------------------------------------------
    // Test 1: Storing opens a new chunk once the current one is full
    // -----------------------------------------------------------------------
    #[test]
    fn chunks_fill_up() {
        let replay = recorded(STATES_PER_CHUNK + 3);
        assert_eq!(replay.chunks.len(), 2);
        assert_eq!(replay.chunks[0].num_states as usize, STATES_PER_CHUNK);
        assert_eq!(replay.chunks[1].num_states, 3);
        assert_eq!(replay.num_states(), STATES_PER_CHUNK + 3);
    }

    // -----------------------------------------------------------------------
    // Test 2: Loading walks across chunks and flags end-of-file
    // -----------------------------------------------------------------------
    #[test]
    fn load_until_end_of_file() {
        let mut replay = recorded(STATES_PER_CHUNK + 2);
        let mut times = Vec::new();
        while !replay.end_of_file() {
            times.push(replay.load_state().unwrap().game_time);
        }
        assert_eq!(times.len(), STATES_PER_CHUNK + 2);
        assert!(times.windows(2).all(|w| w[0] < w[1]));
        // The last state stays readable.
        assert!(replay.peek_state().is_some());
        assert!(replay.at_last_state());
    }

    // -----------------------------------------------------------------------
    // Test 3: Rewinding is clamped and honours the minimum frame count
    // -----------------------------------------------------------------------
    #[test]
    fn fastrewind_clamps_and_moves_at_least_min_frames() {
        let mut replay = recorded(10);
        replay.fastforward(100); // 25 frames, clamped to the last state
        assert!(replay.at_last_state());

        replay.fastrewind(0, 2);
        assert_eq!(replay.position().state, 7);

        replay.fastrewind(10_000, 0);
        assert!(replay.at_first_state());
        assert!(!replay.end_of_file());
    }

    // -----------------------------------------------------------------------
    // Test 4: Saved positions restore exactly, across a chunk boundary
    // -----------------------------------------------------------------------
    #[test]
    fn position_restore() {
        let mut replay = recorded(STATES_PER_CHUNK + 20);
        replay.fastforward(4 * (STATES_PER_CHUNK as Centis - 3));
        let pos = replay.position();
        let first: Vec<_> = (0..8).filter_map(|_| replay.load_state()).collect();
        assert_eq!(replay.position().chunk, 1);
        replay.rewind_at_position(pos);
        let second: Vec<_> = (0..8).filter_map(|_| replay.load_state()).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn peek_offset_looks_both_ways() {
        let mut replay = recorded(5);
        replay.next_state(2);
        let t = |s: Option<SerializedBikeState>| s.map(|s| s.game_time);
        assert_eq!(t(replay.peek_offset(-1)), Some(0.04));
        assert_eq!(t(replay.peek_offset(2)), Some(0.16));
        assert_eq!(replay.peek_offset(3), None);
        assert_eq!(replay.peek_offset(-3), None);
    }

    // -----------------------------------------------------------------------
    // Test 5: Moving block samples are throttled
    // -----------------------------------------------------------------------
    #[test]
    fn block_samples_are_throttled() {
        let mut replay = Replay::create("lvl", "ann", 25.0);
        let near = Vec2::ZERO;
        replay.store_blocks(0, [("door", Vec2::ZERO, 0.0)], near);
        // Too soon.
        replay.store_blocks(10, [("door", Vec2::new(1.0, 0.0), 0.0)], near);
        // Moved, near the player.
        replay.store_blocks(20, [("door", Vec2::new(1.0, 0.0), 0.0)], near);
        // Moved but far away and recent.
        replay.store_blocks(50, [("door", Vec2::new(30.0, 0.0), 0.0)], near);
        // Still.
        replay.store_blocks(200, [("door", Vec2::new(1.0, 0.0), 0.0)], near);
        let samples = &replay.moving_blocks()[0].samples;
        assert_eq!(samples.iter().map(|s| s.time).collect::<Vec<_>>(), vec![0, 20]);

        // A slow drift is picked up after a long pause.
        replay.store_blocks(600, [("door", Vec2::new(1.07, 0.0), 0.0)], near);
        assert_eq!(replay.moving_blocks()[0].samples.len(), 3);
        assert_eq!(
            replay.moving_blocks()[0].sample_at(599).map(|s| s.time),
            Some(20)
        );
    }

    // -----------------------------------------------------------------------
    // Test 6: Save, probe and reopen
    // -----------------------------------------------------------------------
    #[test]
    fn save_and_reopen() {
        let mut replay = recorded(30);
        replay
            .record(&SceneEvent::new(
                12,
                GameEvent::EntityDestroyed {
                    entity: "star".into(),
                    speciality: EntitySpeciality::ToTake,
                    position: Vec2::ZERO,
                    radius: 0.5,
                    taken_by: None,
                },
            ))
            .unwrap();
        replay.store_blocks(0, [("still", Vec2::ZERO, 0.0)], Vec2::ZERO);
        replay.finish_replay(true, 1.2);

        let path = temp_path("roundtrip");
        replay.save(&path).unwrap();

        let infos = Replay::read_infos(&path).unwrap();
        assert_eq!(infos.level_id, "lvl");
        assert!(infos.finished);
        assert_eq!(infos.version, FORMAT_VERSION);

        let opened = Replay::open(&path, Some("lvl")).unwrap();
        assert_eq!(opened.num_states(), 30);
        assert_eq!(opened.finish_time(), 1.2);
        assert_eq!(opened.to_take_times(), vec![12]);
        assert!(opened.moving_blocks().is_empty());

        let err = Replay::open(&path, Some("other")).unwrap_err();
        assert!(matches!(
            err,
            ReplayError::Corrupt(CorruptReplayError::LevelMismatch { .. })
        ));
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn legacy_file_opens() {
        let replay = recorded(4);
        let body = format::ReplayBody {
            events_data: Vec::new(),
            chunks: replay.chunks.clone(),
            moving_blocks: Vec::new(),
        };
        let bytes = format::encode_legacy(&replay.header, &body).unwrap();
        let opened = Replay::from_bytes(&bytes, None).unwrap();
        assert_eq!(opened.version(), format::LEGACY_VERSION);
        assert_eq!(opened.num_states(), 4);
    }

    #[test]
    fn reinitialize_resets_events() {
        let mut replay = recorded(3);
        replay
            .record(&SceneEvent::new(0, GameEvent::ClearMessages))
            .unwrap();
        replay.load_state();
        assert!(replay.events()[0].passed);
        replay.reinitialize();
        assert!(replay.at_first_state());
        assert!(!replay.events()[0].passed);
    }
}
