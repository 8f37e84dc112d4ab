pub mod loader;
pub mod replay_index;
pub mod schema;

pub use loader::{DataLoadError, find_level, load_level, load_scene_config};
pub use replay_index::ReplayIndex;
