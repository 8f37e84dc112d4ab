//! Replay-driven bikers.
//!
//! A [`Ghost`] keeps the two recorded states bracketing the scene time and
//! displays an interpolation between them. Its states come from a
//! [`GhostSource`]: a replay file, or a buffer fed from the network.
//!
//! The scene time may move backwards; the ghost then rewinds its source and
//! rebuilds the bracket. Once the source is exhausted the ghost stays on its
//! last state, either finished or dead depending on the recorded outcome.

use std::fmt::Debug;

use crate::bike::interpolate::{interpolate_cubic, interpolate_linear};
use crate::bike::serialized::{EngineRpmRange, SerializedBikeState};
use crate::bike::{BikeAnchors, BikeParameters, BikeState};
use crate::event::SceneEvent;
use crate::fixed::{Centis, centis_to_secs, secs_to_centis};
use crate::replay::{MovingBlockTrack, RecordedEvent, Replay};

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

/// Where a ghost reads its states from.
///
/// A source has a read cursor. `peek_offset(0)` is the state under it.
pub trait GhostSource: Debug + Send {
    fn peek_offset(&self, offset: isize) -> Option<SerializedBikeState>;

    /// Move the cursor one state forward. Returns `false` on the last
    /// available state.
    fn advance(&mut self) -> bool;

    /// Move the cursor back onto the last state recorded at or before
    /// `secs`, or onto the first state.
    fn rewind_to(&mut self, secs: f32);

    /// Whether more states may still arrive.
    fn is_complete(&self) -> bool;
    fn did_finish(&self) -> bool;
    /// Seconds.
    fn finish_time(&self) -> f32;
    fn player_name(&self) -> &str;
    fn events_mut(&mut self) -> &mut [RecordedEvent];

    /// Times at which the recorded player took a to-take entity.
    fn to_take_times(&self) -> Vec<Centis>;

    fn moving_blocks(&self) -> &[MovingBlockTrack] {
        &[]
    }
}

/// A ghost read from a replay file.
#[derive(Debug, Clone)]
pub struct FileGhostSource {
    replay: Replay,
}

impl FileGhostSource {
    pub fn new(mut replay: Replay) -> Self {
        replay.reinitialize();
        Self { replay }
    }

    pub fn replay(&self) -> &Replay {
        &self.replay
    }
}

impl GhostSource for FileGhostSource {
    fn peek_offset(&self, offset: isize) -> Option<SerializedBikeState> {
        self.replay.peek_offset(offset)
    }

    fn advance(&mut self) -> bool {
        if self.replay.at_last_state() {
            return false;
        }
        self.replay.load_state().is_some()
    }

    fn rewind_to(&mut self, secs: f32) {
        let Some(current) = self.replay.peek_state() else {
            return;
        };
        if current.game_time <= secs {
            return;
        }
        // Coarse jump by recorded time, then single states.
        self.replay
            .fastrewind(secs_to_centis(current.game_time - secs), 1);
        while !self.replay.at_first_state() {
            match self.replay.peek_state() {
                Some(s) if s.game_time > secs => self.replay.fastrewind(0, 1),
                _ => break,
            }
        }
    }

    fn is_complete(&self) -> bool {
        true
    }

    fn did_finish(&self) -> bool {
        self.replay.did_finish()
    }

    fn finish_time(&self) -> f32 {
        self.replay.finish_time()
    }

    fn player_name(&self) -> &str {
        self.replay.player_name()
    }

    fn events_mut(&mut self) -> &mut [RecordedEvent] {
        self.replay.events_mut()
    }

    fn to_take_times(&self) -> Vec<Centis> {
        self.replay.to_take_times()
    }

    fn moving_blocks(&self) -> &[MovingBlockTrack] {
        self.replay.moving_blocks()
    }
}

/// A ghost fed state by state, e.g. from a network peer.
#[derive(Debug, Clone, Default)]
pub struct NetGhostSource {
    player_name: String,
    states: Vec<SerializedBikeState>,
    events: Vec<RecordedEvent>,
    cursor: usize,
    closed: bool,
    finished: bool,
    finish_time: f32,
}

impl NetGhostSource {
    pub fn new(player_name: impl Into<String>) -> Self {
        Self {
            player_name: player_name.into(),
            ..Self::default()
        }
    }

    /// Append a received state. States older than the last one are dropped.
    pub fn push_state(&mut self, state: SerializedBikeState) {
        if self
            .states
            .last()
            .is_some_and(|last| state.game_time < last.game_time)
        {
            log::warn!(
                "net ghost `{}`: dropping out-of-order state at {}",
                self.player_name,
                state.game_time
            );
            return;
        }
        self.states.push(state);
    }

    pub fn push_event(&mut self, event: SceneEvent) {
        self.events.push(RecordedEvent {
            event,
            passed: false,
        });
    }

    /// No more states will arrive.
    pub fn close(&mut self, finished: bool, finish_time: f32) {
        self.closed = true;
        self.finished = finished;
        self.finish_time = finish_time;
    }
}

impl GhostSource for NetGhostSource {
    fn peek_offset(&self, offset: isize) -> Option<SerializedBikeState> {
        let index = self.cursor.checked_add_signed(offset)?;
        self.states.get(index).copied()
    }

    fn advance(&mut self) -> bool {
        if self.cursor + 1 < self.states.len() {
            self.cursor += 1;
            true
        } else {
            false
        }
    }

    fn rewind_to(&mut self, secs: f32) {
        while self.cursor > 0 && self.states[self.cursor].game_time > secs {
            self.cursor -= 1;
        }
    }

    fn is_complete(&self) -> bool {
        self.closed
    }

    fn did_finish(&self) -> bool {
        self.finished
    }

    fn finish_time(&self) -> f32 {
        self.finish_time
    }

    fn player_name(&self) -> &str {
        &self.player_name
    }

    fn events_mut(&mut self) -> &mut [RecordedEvent] {
        &mut self.events
    }

    fn to_take_times(&self) -> Vec<Centis> {
        self.events
            .iter()
            .filter(|e| {
                matches!(
                    e.event.event,
                    crate::event::GameEvent::EntityDestroyed {
                        speciality: crate::level::EntitySpeciality::ToTake,
                        ..
                    }
                )
            })
            .map(|e| e.event.time)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Ghost
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GhostPhase {
    /// No state read yet.
    Loading,
    /// `previous <= t <= next`.
    Tracking,
    /// Source exhausted, recorded player finished.
    Finished,
    /// Source exhausted, recorded player did not finish.
    DeadEnd,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GhostDisplay {
    pub interpolation: bool,
    pub cubic: bool,
}

/// Events an active ghost crossed during one update.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct GhostUpdate {
    /// Crossed forwards, in recorded order.
    pub to_do: Vec<SceneEvent>,
    /// Crossed backwards, newest first.
    pub to_revert: Vec<SceneEvent>,
    /// The source was rewound during this update.
    pub rewound: bool,
}

#[derive(Debug)]
pub struct Ghost {
    source: Box<dyn GhostSource>,
    label: String,
    is_reference: bool,
    is_active: bool,
    display: GhostDisplay,
    anchors: BikeAnchors,
    neck_length: f32,
    rpm: EngineRpmRange,
    phase: GhostPhase,
    previous: SerializedBikeState,
    next: SerializedBikeState,
    state: BikeState,
    to_take_times: Vec<Centis>,
    diff_to_player: Option<f32>,
}

impl Ghost {
    pub fn new(
        source: Box<dyn GhostSource>,
        label: impl Into<String>,
        display: GhostDisplay,
        params: &BikeParameters,
        rpm: EngineRpmRange,
    ) -> Self {
        let to_take_times = source.to_take_times();
        Self {
            source,
            label: label.into(),
            is_reference: false,
            is_active: false,
            display,
            anchors: BikeAnchors::from_parameters(params),
            neck_length: params.neck_length,
            rpm,
            phase: GhostPhase::Loading,
            previous: SerializedBikeState::default(),
            next: SerializedBikeState::default(),
            state: BikeState::default(),
            to_take_times,
            diff_to_player: None,
        }
    }

    /// Mark as the reference ghost, whose diff is shown to the player.
    pub fn with_reference(mut self, is_reference: bool) -> Self {
        self.is_reference = is_reference;
        self
    }

    /// Active ghosts replay their recorded events into the scene.
    pub fn with_active(mut self, is_active: bool) -> Self {
        self.is_active = is_active;
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn player_name(&self) -> &str {
        self.source.player_name()
    }

    pub fn is_reference(&self) -> bool {
        self.is_reference
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn phase(&self) -> GhostPhase {
        self.phase
    }

    /// Displayed pose.
    pub fn state(&self) -> &BikeState {
        &self.state
    }

    /// Times of the bracketing states, in seconds.
    pub fn bracket(&self) -> (f32, f32) {
        (self.previous.game_time, self.next.game_time)
    }

    /// Nothing left to read after `next`.
    pub fn at_end(&self) -> bool {
        matches!(self.phase, GhostPhase::Finished | GhostPhase::DeadEnd)
            || (self.source.is_complete() && self.source.peek_offset(1).is_none())
    }

    /// Recorded finish time once the ghost has crossed the line.
    pub fn finish_time(&self) -> Option<f32> {
        match self.phase {
            GhostPhase::Finished => Some(self.source.finish_time()),
            _ => None,
        }
    }

    pub fn is_dead(&self) -> bool {
        self.phase == GhostPhase::DeadEnd
    }

    /// Seconds the player is behind this ghost at the last shared pickup.
    pub fn diff_to_player(&self) -> Option<f32> {
        self.diff_to_player
    }

    pub fn to_take_times(&self) -> &[Centis] {
        &self.to_take_times
    }

    pub fn moving_blocks(&self) -> &[MovingBlockTrack] {
        self.source.moving_blocks()
    }

    /// Compare the player's pickup times with the ghost's. The diff is
    /// only updated once both reached the same pickup count.
    pub fn update_diff_to_player(&mut self, player_times: &[Centis]) {
        let n = player_times.len();
        if n == 0 || self.to_take_times.len() < n {
            return;
        }
        self.diff_to_player = Some(centis_to_secs(player_times[n - 1] - self.to_take_times[n - 1]));
    }

    /// Forget the diff, e.g. when the player rewinds before any pickup.
    pub fn clear_diff_to_player(&mut self) {
        self.diff_to_player = None;
    }

    /// Track scene time `time`.
    pub fn update(&mut self, time: Centis) -> GhostUpdate {
        let secs = centis_to_secs(time);
        let mut out = GhostUpdate::default();

        if self.phase == GhostPhase::Loading {
            let Some(first) = self.source.peek_offset(0) else {
                return out;
            };
            self.previous = first;
            self.next = first;
            self.phase = GhostPhase::Tracking;
        }

        if self.previous.game_time > secs {
            self.source.rewind_to(secs);
            if let Some(s) = self.source.peek_offset(0) {
                self.previous = s;
                self.next = s;
            }
            out.rewound = true;
            log::debug!("ghost `{}` rewound to {secs}", self.label);
        }

        let mut exhausted = false;
        while self.next.game_time <= secs {
            if !self.source.advance() {
                exhausted = true;
                break;
            }
            match self.source.peek_offset(0) {
                Some(s) => {
                    self.previous = self.next;
                    self.next = s;
                }
                None => {
                    exhausted = true;
                    break;
                }
            }
        }

        self.phase = if exhausted && self.source.is_complete() {
            if self.source.did_finish() {
                GhostPhase::Finished
            } else {
                GhostPhase::DeadEnd
            }
        } else {
            GhostPhase::Tracking
        };

        self.refresh_display(secs);

        if self.is_active {
            self.collect_events(time, &mut out);
        }
        out
    }

    fn decode(&self, s: &SerializedBikeState) -> BikeState {
        s.to_bike_state(&self.anchors, self.neck_length, self.rpm)
    }

    fn refresh_display(&mut self, secs: f32) {
        match self.phase {
            GhostPhase::Loading => {}
            GhostPhase::Finished | GhostPhase::DeadEnd => {
                self.state = self.decode(&self.next);
                if self.phase == GhostPhase::Finished {
                    self.state.engine_rpm = 0.0;
                }
            }
            GhostPhase::Tracking => {
                let span = self.next.game_time - self.previous.game_time;
                if !self.display.interpolation || span <= 0.0 {
                    self.state = self.decode(&self.previous);
                    return;
                }
                let t = (secs - self.previous.game_time) / span;
                self.state = self.interpolated(t);
            }
        }
    }

    fn interpolated(&self, t: f32) -> BikeState {
        let a = self.decode(&self.previous);
        let b = self.decode(&self.next);
        if self.display.cubic {
            let outer = (self.source.peek_offset(-2), self.source.peek_offset(1));
            if let (Some(before), Some(after)) = outer {
                let before = self.decode(&before);
                let after = self.decode(&after);
                return interpolate_cubic([&before, &a, &b, &after], t);
            }
        }
        interpolate_linear(&a, &b, t)
    }

    fn collect_events(&mut self, time: Centis, out: &mut GhostUpdate) {
        let events = self.source.events_mut();
        for e in events.iter_mut() {
            if !e.passed && e.event.time <= time {
                e.passed = true;
                if e.event.event.replays_on_ghost() {
                    out.to_do.push(e.event.clone());
                }
            }
        }
        for e in events.iter_mut().rev() {
            if e.passed && e.event.time > time {
                e.passed = false;
                if e.event.event.replays_on_ghost() {
                    out.to_revert.push(e.event.clone());
                }
            }
        }
    }
}
