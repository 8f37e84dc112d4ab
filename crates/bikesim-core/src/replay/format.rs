//! On-disk replay framing and the per-version decoders.
//!
//! Every file starts with `[magic u32 LE][version u32 LE]`. The decoder for
//! the version is picked once, then reads the header and body:
//!
//! - v3 (current): `[header_len u32 LE][bitcode header][bitcode body]`, so
//!   the header can be probed without decoding the states.
//! - v2 (legacy, read-only): one bitcode payload holding the header fields,
//!   the chunks and the event stream. It carries no moving blocks.

use glam::Vec2;
use serde::{Deserialize, Serialize};

use crate::bike::serialized::SERIALIZED_STATE_SIZE;
use crate::error::{CorruptReplayError, ReplayIoError};
use crate::fixed::Centis;

/// Magic number at the start of every replay file.
pub const REPLAY_MAGIC: u32 = 0x5250_4C42;

/// Version written by this build.
pub const FORMAT_VERSION: u32 = 3;

/// The preceding version, still readable.
pub const LEGACY_VERSION: u32 = 2;

/// Number of state records per chunk.
pub const STATES_PER_CHUNK: usize = 512;

const PREAMBLE_LEN: usize = 8;

// ---------------------------------------------------------------------------
// Data
// ---------------------------------------------------------------------------

/// Replay metadata, readable without the states.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayHeader {
    pub level_id: String,
    pub player_name: String,
    /// Recorded states per second.
    pub frame_rate: f32,
    /// Bytes per state record; at least [`SERIALIZED_STATE_SIZE`].
    pub state_size: u32,
    pub finished: bool,
    /// Seconds.
    pub finish_time: f32,
}

/// A fixed-capacity run of state records.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StateChunk {
    pub num_states: u32,
    pub data: Vec<u8>,
}

/// One recorded transform of a moving block.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BlockSample {
    pub time: Centis,
    pub position: Vec2,
    pub rotation: f32,
}

/// Recorded transforms of one block.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MovingBlockTrack {
    pub name: String,
    pub samples: Vec<BlockSample>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ReplayBody {
    pub events_data: Vec<u8>,
    pub chunks: Vec<StateChunk>,
    pub moving_blocks: Vec<MovingBlockTrack>,
}

#[derive(Debug, Serialize, Deserialize)]
struct LegacyPayload {
    level_id: String,
    player_name: String,
    frame_rate: f32,
    state_size: u32,
    finished: bool,
    finish_time: f32,
    chunks: Vec<StateChunk>,
    events_data: Vec<u8>,
}

// ---------------------------------------------------------------------------
// Decoders
// ---------------------------------------------------------------------------

/// Reads one format version. `payload` is the file minus the preamble.
pub trait ReplayDecoder {
    fn version(&self) -> u32;
    fn read_header(&self, payload: &[u8]) -> Result<ReplayHeader, CorruptReplayError>;
    fn read_body(&self, payload: &[u8]) -> Result<ReplayBody, CorruptReplayError>;
}

fn decode<'de, T: Deserialize<'de>>(bytes: &'de [u8]) -> Result<T, CorruptReplayError> {
    bitcode::deserialize(bytes).map_err(|e| CorruptReplayError::Decode(e.to_string()))
}

/// Current format.
#[derive(Debug, Clone, Copy, Default)]
pub struct V3Decoder;

impl V3Decoder {
    fn split(payload: &[u8]) -> Result<(&[u8], &[u8]), CorruptReplayError> {
        let len_bytes = payload.get(..4).ok_or(CorruptReplayError::TooShort)?;
        let len = u32::from_le_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]])
            as usize;
        let header = payload.get(4..4 + len).ok_or(CorruptReplayError::TooShort)?;
        Ok((header, &payload[4 + len..]))
    }
}

impl ReplayDecoder for V3Decoder {
    fn version(&self) -> u32 {
        FORMAT_VERSION
    }

    fn read_header(&self, payload: &[u8]) -> Result<ReplayHeader, CorruptReplayError> {
        let (header, _) = Self::split(payload)?;
        decode(header)
    }

    fn read_body(&self, payload: &[u8]) -> Result<ReplayBody, CorruptReplayError> {
        let (_, body) = Self::split(payload)?;
        decode(body)
    }
}

/// Legacy single-payload format.
#[derive(Debug, Clone, Copy, Default)]
pub struct V2Decoder;

impl ReplayDecoder for V2Decoder {
    fn version(&self) -> u32 {
        LEGACY_VERSION
    }

    fn read_header(&self, payload: &[u8]) -> Result<ReplayHeader, CorruptReplayError> {
        let p: LegacyPayload = decode(payload)?;
        Ok(ReplayHeader {
            level_id: p.level_id,
            player_name: p.player_name,
            frame_rate: p.frame_rate,
            state_size: p.state_size,
            finished: p.finished,
            finish_time: p.finish_time,
        })
    }

    fn read_body(&self, payload: &[u8]) -> Result<ReplayBody, CorruptReplayError> {
        let p: LegacyPayload = decode(payload)?;
        Ok(ReplayBody {
            events_data: p.events_data,
            chunks: p.chunks,
            moving_blocks: Vec::new(),
        })
    }
}

/// Check the magic number and return `(version, payload)`.
pub fn split_preamble(data: &[u8]) -> Result<(u32, &[u8]), CorruptReplayError> {
    if data.len() < PREAMBLE_LEN {
        return Err(CorruptReplayError::TooShort);
    }
    let magic = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
    if magic != REPLAY_MAGIC {
        return Err(CorruptReplayError::InvalidMagic(magic));
    }
    let version = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
    Ok((version, &data[PREAMBLE_LEN..]))
}

/// Pick the decoder for `version`.
pub fn decoder_for(version: u32) -> Result<Box<dyn ReplayDecoder>, CorruptReplayError> {
    match version {
        FORMAT_VERSION => Ok(Box::new(V3Decoder)),
        LEGACY_VERSION => Ok(Box::new(V2Decoder)),
        v if v > FORMAT_VERSION => Err(CorruptReplayError::FutureVersion(v)),
        v => Err(CorruptReplayError::UnsupportedVersion(v)),
    }
}

/// Structural checks shared by every version. A replay without chunks is
/// an empty stream: its player died before the first state was due.
pub fn validate(header: &ReplayHeader, body: &ReplayBody) -> Result<(), CorruptReplayError> {
    if (header.state_size as usize) < SERIALIZED_STATE_SIZE {
        return Err(CorruptReplayError::StateSizeTooSmall {
            declared: header.state_size,
            required: SERIALIZED_STATE_SIZE as u32,
        });
    }
    let size = header.state_size as usize;
    for (i, chunk) in body.chunks.iter().enumerate() {
        if chunk.num_states == 0 || chunk.data.len() != chunk.num_states as usize * size {
            return Err(CorruptReplayError::ChunkLength {
                chunk: i,
                len: chunk.data.len(),
            });
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Encoders
// ---------------------------------------------------------------------------

fn preamble(version: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(PREAMBLE_LEN);
    out.extend_from_slice(&REPLAY_MAGIC.to_le_bytes());
    out.extend_from_slice(&version.to_le_bytes());
    out
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, ReplayIoError> {
    bitcode::serialize(value).map_err(|e| ReplayIoError::Encode(e.to_string()))
}

/// Encode in the current format.
pub fn encode_current(header: &ReplayHeader, body: &ReplayBody) -> Result<Vec<u8>, ReplayIoError> {
    let header_bytes = encode(header)?;
    let body_bytes = encode(body)?;
    let mut out = preamble(FORMAT_VERSION);
    out.extend_from_slice(&(header_bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(&header_bytes);
    out.extend_from_slice(&body_bytes);
    Ok(out)
}

/// Encode in the legacy format, to exercise the v2 reader.
#[cfg(any(test, feature = "test-utils"))]
pub fn encode_legacy(header: &ReplayHeader, body: &ReplayBody) -> Result<Vec<u8>, ReplayIoError> {
    let payload = LegacyPayload {
        level_id: header.level_id.clone(),
        player_name: header.player_name.clone(),
        frame_rate: header.frame_rate,
        state_size: header.state_size,
        finished: header.finished,
        finish_time: header.finish_time,
        chunks: body.chunks.clone(),
        events_data: body.events_data.clone(),
    };
    let mut out = preamble(LEGACY_VERSION);
    out.extend_from_slice(&encode(&payload)?);
    Ok(out)
}
