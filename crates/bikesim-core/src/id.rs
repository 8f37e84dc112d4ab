use serde::{Deserialize, Serialize};
use slotmap::new_key_type;

new_key_type! {
    /// Identifies an entity (strawberry, wrecker, flower, sprite) in a level.
    pub struct EntityId;

    /// Identifies a zone in a level.
    pub struct ZoneId;

    /// Identifies a block (polygon of level geometry) in a level.
    pub struct BlockId;
}

/// Index of a player biker inside a scene. Events refer to players by index
/// so the recorded stream stays meaningful without any live handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PlayerIndex(pub usize);
