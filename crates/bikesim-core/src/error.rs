//! Error taxonomy. One enum per failure domain, composed with `#[from]`.

use crate::fixed::Centis;
use crate::replay::format::{FORMAT_VERSION, REPLAY_MAGIC};

/// Level geometry or script could not be loaded.
#[derive(Debug, thiserror::Error)]
pub enum LevelLoadError {
    #[error("block `{block}` has {count} vertices, at least 3 are required")]
    TooFewVertices { block: String, count: usize },
    #[error("block `{block}` has a non-finite vertex")]
    NonFiniteVertex { block: String },
    #[error("entity `{entity}` has a non-finite position or radius")]
    InvalidEntity { entity: String },
    #[error("duplicate {kind} name `{name}`")]
    DuplicateName { kind: &'static str, name: String },
    #[error("level script failed to parse: {0}")]
    ScriptParse(String),
    #[error("level script OnLoad failed: {0}")]
    ScriptOnLoad(String),
    #[error("level script OnLoad returned false")]
    ScriptOnLoadRejected,
}

/// A scripted callback failed during play.
#[derive(Debug, thiserror::Error)]
pub enum ScriptRuntimeError {
    #[error("Tick returned false at time {time}")]
    TickFailed { time: Centis },
    #[error("script function `{function}` failed: {message}")]
    Host { function: String, message: String },
}

/// A replay file is unreadable.
#[derive(Debug, thiserror::Error)]
pub enum CorruptReplayError {
    #[error("data too short for replay header")]
    TooShort,
    #[error("invalid magic number: expected 0x{:08X}, got 0x{:08X}", REPLAY_MAGIC, .0)]
    InvalidMagic(u32),
    #[error("unsupported replay version {0}")]
    UnsupportedVersion(u32),
    #[error("replay from future version {0} (this build supports up to {FORMAT_VERSION})")]
    FutureVersion(u32),
    #[error("bitcode decoding failed: {0}")]
    Decode(String),
    #[error("declared state size {declared} is smaller than {required}")]
    StateSizeTooSmall { declared: u32, required: u32 },
    #[error("chunk {chunk} holds {len} bytes, not a whole number of states")]
    ChunkLength { chunk: usize, len: usize },
    #[error("replay is for level `{found}`, expected `{expected}`")]
    LevelMismatch { expected: String, found: String },
    #[error("event record at byte {offset} is truncated")]
    TruncatedEvent { offset: usize },
}

/// Storage failed while reading or writing a replay.
#[derive(Debug, thiserror::Error)]
pub enum ReplayIoError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("bitcode encoding failed: {0}")]
    Encode(String),
}

/// Failure opening or saving a replay.
#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error(transparent)]
    Corrupt(#[from] CorruptReplayError),
    #[error(transparent)]
    Io(#[from] ReplayIoError),
}

impl From<std::io::Error> for ReplayError {
    fn from(e: std::io::Error) -> Self {
        ReplayError::Io(ReplayIoError::Io(e))
    }
}

/// Any failure surfaced by the scene.
#[derive(Debug, thiserror::Error)]
pub enum SceneError {
    #[error(transparent)]
    LevelLoad(#[from] LevelLoadError),
    #[error(transparent)]
    Script(#[from] ScriptRuntimeError),
    #[error(transparent)]
    Replay(#[from] ReplayError),
    #[error("no level is loaded")]
    NoLevelLoaded,
    #[error("no player at index {0}")]
    PlayerIndex(usize),
}
