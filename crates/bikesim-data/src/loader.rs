//! Reads scene configuration and level files.
//!
//! Provides format detection (RON/JSON/TOML), file discovery, and the
//! building of level definitions into the core level model.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;

use bikesim_core::config::SceneConfig;
use bikesim_core::error::LevelLoadError;
use bikesim_core::geom::Aabb;
use bikesim_core::level::{Block, Entity, Level, Zone};

use crate::schema::{BoxData, LevelData};

// ===========================================================================
// Errors
// ===========================================================================

/// Errors that can occur during data loading.
#[derive(Debug, thiserror::Error)]
pub enum DataLoadError {
    /// The file has an extension we don't support.
    #[error("unsupported format for file: {file}")]
    UnsupportedFormat { file: PathBuf },

    /// Two files with the same base name but different formats exist.
    #[error("conflicting formats: {a} and {b}")]
    ConflictingFormats { a: PathBuf, b: PathBuf },

    /// No level file with the requested id exists.
    #[error("level '{id}' not found in {dir}")]
    MissingLevel { id: String, dir: PathBuf },

    /// A deserialization error occurred.
    #[error("parse error in {file}: {detail}")]
    Parse { file: PathBuf, detail: String },

    /// The definition parsed but does not describe a valid level.
    #[error(transparent)]
    LevelLoad(#[from] LevelLoadError),

    /// An I/O error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

// ===========================================================================
// Format detection
// ===========================================================================

/// Supported data file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Ron,
    Toml,
    Json,
}

const EXTENSIONS: [&str; 3] = ["ron", "toml", "json"];

/// Detect the format of a file based on its extension.
pub fn detect_format(path: &Path) -> Result<Format, DataLoadError> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("ron") => Ok(Format::Ron),
        Some("toml") => Ok(Format::Toml),
        Some("json") => Ok(Format::Json),
        _ => Err(DataLoadError::UnsupportedFormat {
            file: path.to_path_buf(),
        }),
    }
}

/// Find `{base_name}.ron|toml|json` in `dir`. Two formats of the same file
/// are an error.
pub fn find_data_file(dir: &Path, base_name: &str) -> Result<Option<PathBuf>, DataLoadError> {
    let mut found: Option<PathBuf> = None;
    for ext in EXTENSIONS {
        let candidate = dir.join(format!("{base_name}.{ext}"));
        if !candidate.exists() {
            continue;
        }
        if let Some(existing) = found {
            return Err(DataLoadError::ConflictingFormats {
                a: existing,
                b: candidate,
            });
        }
        found = Some(candidate);
    }
    Ok(found)
}

// ===========================================================================
// Deserialization
// ===========================================================================

/// Read a file and deserialize it according to its format (detected from extension).
pub fn deserialize_file<T: DeserializeOwned>(path: &Path) -> Result<T, DataLoadError> {
    let format = detect_format(path)?;
    let content = std::fs::read_to_string(path)?;
    let parse_error = |detail: String| DataLoadError::Parse {
        file: path.to_path_buf(),
        detail,
    };

    match format {
        Format::Ron => ron::from_str(&content).map_err(|e| parse_error(e.to_string())),
        Format::Json => serde_json::from_str(&content).map_err(|e| parse_error(e.to_string())),
        Format::Toml => toml::from_str(&content).map_err(|e| parse_error(e.to_string())),
    }
}

/// Load a [`SceneConfig`]. Missing fields take their defaults.
pub fn load_scene_config(path: &Path) -> Result<SceneConfig, DataLoadError> {
    let config: SceneConfig = deserialize_file(path)?;
    log::debug!("scene config loaded from {}", path.display());
    Ok(config)
}

// ===========================================================================
// Levels
// ===========================================================================

fn to_aabb(b: &BoxData) -> Aabb {
    Aabb::new(b.min.min(b.max), b.min.max(b.max))
}

/// Build a level from its definition. `script` overrides the inline script.
pub fn build_level(data: LevelData, script: Option<String>) -> Result<Level, LevelLoadError> {
    let mut level = Level::new(data.id);
    if let Some(name) = data.name {
        level.name = name;
    }
    level.player_start = data.player_start;
    if let Some(gravity) = data.gravity {
        level.gravity = gravity;
    }
    if let Some(limits) = &data.limits {
        level.limits = to_aabb(limits);
    }
    level.script = script.or(data.script);

    for b in data.blocks {
        let mut block = Block::new(b.name, b.vertices).at(b.position);
        if let Some(grip) = b.grip {
            block.grip = grip;
        }
        block.background = b.background;
        block.dynamic = b.dynamic;
        level.add_block(block)?;
    }
    for e in data.entities {
        level.add_entity(Entity::new(e.name, e.speciality.into(), e.position, e.radius))?;
    }
    for z in data.zones {
        let boxes = z.boxes.iter().map(to_aabb).collect();
        level.add_zone(Zone::new(z.name, boxes))?;
    }
    Ok(level)
}

/// Load a level file. A `script_file` is read relative to the level file.
pub fn load_level(path: &Path) -> Result<Level, DataLoadError> {
    let mut data: LevelData = deserialize_file(path)?;
    let script = match data.script_file.take() {
        Some(file) => {
            let base = path.parent().unwrap_or(Path::new("."));
            Some(std::fs::read_to_string(base.join(file))?)
        }
        None => None,
    };
    let level = build_level(data, script)?;
    log::info!(
        "level `{}` loaded from {}: {} blocks, {} entities, {} zones",
        level.id,
        path.display(),
        level.blocks().count(),
        level.entities().count(),
        level.zones().count()
    );
    Ok(level)
}

/// Load the level `{dir}/{id}.ron|toml|json`.
pub fn find_level(dir: &Path, id: &str) -> Result<Level, DataLoadError> {
    let path = find_data_file(dir, id)?.ok_or_else(|| DataLoadError::MissingLevel {
        id: id.to_string(),
        dir: dir.to_path_buf(),
    })?;
    load_level(&path)
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use bikesim_core::level::EntitySpeciality;
    use glam::Vec2;
    use std::fs;

    /// Create a temporary directory with a unique name for test isolation.
    fn make_test_dir(suffix: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "bikesim_data_test_{suffix}_{}",
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn cleanup(dir: &Path) {
        let _ = fs::remove_dir_all(dir);
    }

    const LEVEL_JSON: &str = r#"{
        "id": "hills",
        "name": "Hills",
        "player_start": [1.0, 0.5],
        "blocks": [
            { "name": "ground", "vertices": [[-10, -1], [10, -1], [10, 0], [-10, 0]] },
            { "name": "sky", "vertices": [[0, 5], [1, 5], [1, 6]], "background": true }
        ],
        "entities": [
            { "name": "s1", "speciality": "strawberry", "position": [3.0, 0.5] },
            { "name": "end", "speciality": "flower", "position": [8.0, 0.5], "radius": 0.5 }
        ],
        "zones": [
            { "name": "start", "boxes": [{ "min": [-1, -1], "max": [1, 1] }] }
        ]
    }"#;

    // -----------------------------------------------------------------------
    // detect_format / find_data_file
    // -----------------------------------------------------------------------

    #[test]
    fn detect_format_by_extension() {
        assert_eq!(detect_format(Path::new("level.ron")).unwrap(), Format::Ron);
        assert_eq!(detect_format(Path::new("level.toml")).unwrap(), Format::Toml);
        assert_eq!(detect_format(Path::new("level.json")).unwrap(), Format::Json);
        assert!(matches!(
            detect_format(Path::new("level.lvl")),
            Err(DataLoadError::UnsupportedFormat { .. })
        ));
        assert!(matches!(
            detect_format(Path::new("level")),
            Err(DataLoadError::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn find_data_file_conflict() {
        let dir = make_test_dir("conflict");
        fs::write(dir.join("hills.ron"), "()").unwrap();
        fs::write(dir.join("hills.json"), "{}").unwrap();

        let result = find_data_file(&dir, "hills");
        assert!(matches!(result, Err(DataLoadError::ConflictingFormats { .. })));
        assert_eq!(find_data_file(&dir, "other").unwrap(), None);

        cleanup(&dir);
    }

    // -----------------------------------------------------------------------
    // Levels
    // -----------------------------------------------------------------------

    #[test]
    fn load_json_level() {
        let dir = make_test_dir("json_level");
        fs::write(dir.join("hills.json"), LEVEL_JSON).unwrap();

        let level = find_level(&dir, "hills").unwrap();
        assert_eq!(level.name, "Hills");
        assert_eq!(level.player_start, Vec2::new(1.0, 0.5));
        assert_eq!(level.blocks().count(), 2);
        assert_eq!(level.count_to_take(), 1);
        let end = level.entity(level.entity_by_name("end").unwrap()).unwrap();
        assert_eq!(end.speciality, EntitySpeciality::MakeWin);
        assert_eq!(end.radius, 0.5);
        let s1 = level.entity(level.entity_by_name("s1").unwrap()).unwrap();
        assert_eq!(s1.radius, 0.4);
        let sky = level.block(level.block_by_name("sky").unwrap()).unwrap();
        assert!(sky.background);
        assert!(!level.is_scripted());

        cleanup(&dir);
    }

    #[test]
    fn load_toml_level_with_script_file() {
        let dir = make_test_dir("toml_level");
        fs::write(dir.join("loop.lua"), "function Tick() return true end").unwrap();
        fs::write(
            dir.join("loop.toml"),
            r#"
id = "loop"
script_file = "loop.lua"
gravity = [0.0, -5.0]

[[blocks]]
name = "floor"
vertices = [[-5.0, -1.0], [5.0, -1.0], [5.0, 0.0]]
dynamic = true
"#,
        )
        .unwrap();

        let level = load_level(&dir.join("loop.toml")).unwrap();
        assert_eq!(level.gravity, Vec2::new(0.0, -5.0));
        assert!(level.is_scripted());
        assert!(level.has_dynamic_blocks());

        cleanup(&dir);
    }

    #[test]
    fn invalid_block_is_a_level_error() {
        let dir = make_test_dir("bad_block");
        fs::write(
            dir.join("bad.json"),
            r#"{ "id": "bad", "blocks": [{ "name": "b", "vertices": [[0, 0], [1, 0]] }] }"#,
        )
        .unwrap();

        let result = load_level(&dir.join("bad.json"));
        assert!(matches!(
            result,
            Err(DataLoadError::LevelLoad(LevelLoadError::TooFewVertices { count: 2, .. }))
        ));

        cleanup(&dir);
    }

    #[test]
    fn duplicate_entity_names_rejected() {
        let dir = make_test_dir("dup");
        fs::write(
            dir.join("dup.json"),
            r#"{ "id": "dup", "entities": [
                { "name": "e", "position": [0, 0] },
                { "name": "e", "position": [1, 0] }
            ] }"#,
        )
        .unwrap();

        let result = load_level(&dir.join("dup.json"));
        assert!(matches!(
            result,
            Err(DataLoadError::LevelLoad(LevelLoadError::DuplicateName { .. }))
        ));

        cleanup(&dir);
    }

    #[test]
    fn missing_level_and_parse_errors() {
        let dir = make_test_dir("missing");
        assert!(matches!(
            find_level(&dir, "nowhere"),
            Err(DataLoadError::MissingLevel { .. })
        ));

        fs::write(dir.join("broken.json"), "{ not json").unwrap();
        let err = load_level(&dir.join("broken.json")).unwrap_err();
        assert!(matches!(err, DataLoadError::Parse { .. }));
        assert!(err.to_string().contains("broken.json"));

        cleanup(&dir);
    }

    // -----------------------------------------------------------------------
    // Scene config
    // -----------------------------------------------------------------------

    #[test]
    fn scene_config_from_ron_and_toml() {
        let dir = make_test_dir("config");
        fs::write(
            dir.join("scene.ron"),
            "(replay_frame_rate: 50.0, head_touch_kills: false, ghost_strategy: (my_best: true, best_of_room: [true, false]))",
        )
        .unwrap();
        fs::write(dir.join("other.toml"), "rng_seed = 7\n[ghost_strategy]\nexcluded = [\"old\"]\n").unwrap();

        let ron_cfg = load_scene_config(&dir.join("scene.ron")).unwrap();
        assert_eq!(ron_cfg.replay_frame_rate, 50.0);
        assert!(!ron_cfg.head_touch_kills);
        assert_eq!(ron_cfg.ghost_strategy.best_of_room, vec![true, false]);

        let toml_cfg = load_scene_config(&dir.join("other.toml")).unwrap();
        assert_eq!(toml_cfg.rng_seed, 7);
        assert_eq!(toml_cfg.ghost_strategy.excluded, vec!["old".to_string()]);
        assert_eq!(toml_cfg.replay_frame_rate, 25.0);

        cleanup(&dir);
    }

    #[test]
    fn io_error_converts() {
        let err = load_scene_config(Path::new("/nonexistent/bikesim/scene.json")).unwrap_err();
        assert!(matches!(err, DataLoadError::Io(_)));
    }
}
