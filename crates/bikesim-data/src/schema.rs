//! Serde data file structs for level definitions.
//!
//! These structs define the on-disk format of a level. They are
//! deserialized from RON, JSON, or TOML data files and then built into the
//! core [`Level`](bikesim_core::level::Level) model by the loader.

use glam::Vec2;
use serde::Deserialize;

use bikesim_core::level::EntitySpeciality;

// ===========================================================================
// Level
// ===========================================================================

/// A level definition in a data file.
#[derive(Debug, Clone, Deserialize)]
pub struct LevelData {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub player_start: Vec2,
    /// Defaults to the standard downward gravity.
    #[serde(default)]
    pub gravity: Option<Vec2>,
    #[serde(default)]
    pub limits: Option<BoxData>,
    /// Inline script source.
    #[serde(default)]
    pub script: Option<String>,
    /// Script source file, relative to the level file.
    #[serde(default)]
    pub script_file: Option<String>,
    #[serde(default)]
    pub blocks: Vec<BlockData>,
    #[serde(default)]
    pub entities: Vec<EntityData>,
    #[serde(default)]
    pub zones: Vec<ZoneData>,
}

// ===========================================================================
// Geometry
// ===========================================================================

/// A block polygon. Vertices are relative to `position`.
#[derive(Debug, Clone, Deserialize)]
pub struct BlockData {
    pub name: String,
    pub vertices: Vec<Vec2>,
    #[serde(default)]
    pub position: Vec2,
    #[serde(default)]
    pub grip: Option<f32>,
    #[serde(default)]
    pub background: bool,
    /// Moved by the script or by physics during play.
    #[serde(default)]
    pub dynamic: bool,
}

/// An axis-aligned box.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct BoxData {
    pub min: Vec2,
    pub max: Vec2,
}

// ===========================================================================
// Entities and zones
// ===========================================================================

/// What an entity does, as written in data files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecialityData {
    #[default]
    None,
    Strawberry,
    Wrecker,
    Flower,
}

impl From<SpecialityData> for EntitySpeciality {
    fn from(s: SpecialityData) -> Self {
        match s {
            SpecialityData::None => EntitySpeciality::None,
            SpecialityData::Strawberry => EntitySpeciality::ToTake,
            SpecialityData::Wrecker => EntitySpeciality::Kill,
            SpecialityData::Flower => EntitySpeciality::MakeWin,
        }
    }
}

fn default_radius() -> f32 {
    0.4
}

#[derive(Debug, Clone, Deserialize)]
pub struct EntityData {
    pub name: String,
    #[serde(default)]
    pub speciality: SpecialityData,
    pub position: Vec2,
    #[serde(default = "default_radius")]
    pub radius: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ZoneData {
    pub name: String,
    pub boxes: Vec<BoxData>,
}
