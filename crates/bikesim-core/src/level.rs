//! Level model: blocks, entities and zones with name lookup.
//!
//! A `Level` is the geometry and entity provider the scene plays on. Blocks
//! become collision lines, entities are the touchable circles (strawberries,
//! wreckers, flowers), zones are named boxes raising enter/leave events.

use std::collections::BTreeMap;

use glam::Vec2;
use serde::{Deserialize, Serialize};
use slotmap::SlotMap;

use crate::error::LevelLoadError;
use crate::geom::{Aabb, Segment, rot_apply, rot_from_angle};
use crate::id::{BlockId, EntityId, ZoneId};

/// Default level gravity.
pub const DEFAULT_GRAVITY: Vec2 = Vec2::new(0.0, -9.81);

/// Default grip of block edges.
pub const DEFAULT_GRIP: f32 = 20.0;

// ---------------------------------------------------------------------------
// Blocks
// ---------------------------------------------------------------------------

/// A polygon of level geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub name: String,
    /// Polygon vertices relative to `position`.
    pub vertices: Vec<Vec2>,
    pub position: Vec2,
    /// Rotation in radians around `rotation_center`.
    pub rotation: f32,
    /// Local pivot for `rotation`.
    pub rotation_center: Vec2,
    pub grip: f32,
    /// Background blocks are drawn but never collide.
    pub background: bool,
    /// Dynamic blocks may be moved during play and are recorded into
    /// replays.
    pub dynamic: bool,
    #[serde(skip)]
    initial: Option<(Vec2, f32)>,
}

impl Block {
    pub fn new(name: impl Into<String>, vertices: Vec<Vec2>) -> Self {
        Self {
            name: name.into(),
            vertices,
            position: Vec2::ZERO,
            rotation: 0.0,
            rotation_center: Vec2::ZERO,
            grip: DEFAULT_GRIP,
            background: false,
            dynamic: false,
            initial: None,
        }
    }

    pub fn at(mut self, position: Vec2) -> Self {
        self.position = position;
        self
    }

    pub fn dynamic(mut self) -> Self {
        self.dynamic = true;
        self
    }

    /// Vertices in level space.
    pub fn world_vertices(&self) -> Vec<Vec2> {
        let m = rot_from_angle(self.rotation);
        let pivot = self.position + self.rotation_center;
        self.vertices
            .iter()
            .map(|v| rot_apply(&m, *v - self.rotation_center, pivot))
            .collect()
    }

    /// Closed outline as segments.
    pub fn edges(&self) -> Vec<Segment> {
        let pts = self.world_vertices();
        (0..pts.len())
            .map(|i| Segment::new(pts[i], pts[(i + 1) % pts.len()]))
            .collect()
    }

    pub fn bounds(&self) -> Aabb {
        let mut bb = Aabb::empty();
        for p in self.world_vertices() {
            bb.add_point(p);
        }
        bb
    }

    /// Position and rotation the block had when the level was loaded.
    pub fn initial_placement(&self) -> (Vec2, f32) {
        self.initial.unwrap_or((self.position, self.rotation))
    }

    fn validate(&self) -> Result<(), LevelLoadError> {
        if self.vertices.len() < 3 {
            return Err(LevelLoadError::TooFewVertices {
                block: self.name.clone(),
                count: self.vertices.len(),
            });
        }
        let finite = self.vertices.iter().all(|v| v.is_finite())
            && self.position.is_finite()
            && self.rotation.is_finite();
        if !finite {
            return Err(LevelLoadError::NonFiniteVertex {
                block: self.name.clone(),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

/// What touching an entity does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EntitySpeciality {
    /// Decoration or script-only.
    #[default]
    None,
    /// Must be collected (strawberry).
    ToTake,
    /// Kills the player (wrecker).
    Kill,
    /// Finishes the level once nothing is left to take (flower).
    MakeWin,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub name: String,
    pub speciality: EntitySpeciality,
    pub position: Vec2,
    pub radius: f32,
    pub alive: bool,
    initial_position: Vec2,
}

impl Entity {
    pub fn new(
        name: impl Into<String>,
        speciality: EntitySpeciality,
        position: Vec2,
        radius: f32,
    ) -> Self {
        Self {
            name: name.into(),
            speciality,
            position,
            radius,
            alive: true,
            initial_position: position,
        }
    }

    pub fn initial_position(&self) -> Vec2 {
        self.initial_position
    }
}

// ---------------------------------------------------------------------------
// Zones
// ---------------------------------------------------------------------------

/// A named region made of boxes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub name: String,
    pub boxes: Vec<Aabb>,
}

impl Zone {
    pub fn new(name: impl Into<String>, boxes: Vec<Aabb>) -> Self {
        Self {
            name: name.into(),
            boxes,
        }
    }

    pub fn touches_circle(&self, center: Vec2, radius: f32) -> bool {
        self.boxes.iter().any(|b| b.touches_circle(center, radius))
    }
}

// ---------------------------------------------------------------------------
// Level
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Level {
    pub id: String,
    pub name: String,
    pub limits: Aabb,
    pub player_start: Vec2,
    pub gravity: Vec2,
    /// Source of the level script, if any.
    pub script: Option<String>,
    blocks: SlotMap<BlockId, Block>,
    entities: SlotMap<EntityId, Entity>,
    zones: SlotMap<ZoneId, Zone>,
    block_names: BTreeMap<String, BlockId>,
    entity_names: BTreeMap<String, EntityId>,
    zone_names: BTreeMap<String, ZoneId>,
}

impl Level {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            limits: Aabb::new(Vec2::splat(-100.0), Vec2::splat(100.0)),
            player_start: Vec2::ZERO,
            gravity: DEFAULT_GRAVITY,
            script: None,
            blocks: SlotMap::with_key(),
            entities: SlotMap::with_key(),
            zones: SlotMap::with_key(),
            block_names: BTreeMap::new(),
            entity_names: BTreeMap::new(),
            zone_names: BTreeMap::new(),
        }
    }

    pub fn add_block(&mut self, mut block: Block) -> Result<BlockId, LevelLoadError> {
        block.validate()?;
        if self.block_names.contains_key(&block.name) {
            return Err(LevelLoadError::DuplicateName {
                kind: "block",
                name: block.name,
            });
        }
        block.initial = Some((block.position, block.rotation));
        let name = block.name.clone();
        let id = self.blocks.insert(block);
        self.block_names.insert(name, id);
        Ok(id)
    }

    pub fn add_entity(&mut self, entity: Entity) -> Result<EntityId, LevelLoadError> {
        if !entity.position.is_finite() || !(entity.radius.is_finite() && entity.radius >= 0.0) {
            return Err(LevelLoadError::InvalidEntity {
                entity: entity.name,
            });
        }
        if self.entity_names.contains_key(&entity.name) {
            return Err(LevelLoadError::DuplicateName {
                kind: "entity",
                name: entity.name,
            });
        }
        let name = entity.name.clone();
        let id = self.entities.insert(entity);
        self.entity_names.insert(name, id);
        Ok(id)
    }

    pub fn add_zone(&mut self, zone: Zone) -> Result<ZoneId, LevelLoadError> {
        if self.zone_names.contains_key(&zone.name) {
            return Err(LevelLoadError::DuplicateName {
                kind: "zone",
                name: zone.name,
            });
        }
        let name = zone.name.clone();
        let id = self.zones.insert(zone);
        self.zone_names.insert(name, id);
        Ok(id)
    }

    // -----------------------------------------------------------------------
    // Lookup
    // -----------------------------------------------------------------------

    pub fn block(&self, id: BlockId) -> Option<&Block> {
        self.blocks.get(id)
    }

    pub fn block_mut(&mut self, id: BlockId) -> Option<&mut Block> {
        self.blocks.get_mut(id)
    }

    pub fn blocks(&self) -> impl Iterator<Item = (BlockId, &Block)> {
        self.blocks.iter()
    }

    pub fn block_by_name(&self, name: &str) -> Option<BlockId> {
        self.block_names.get(name).copied()
    }

    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(id)
    }

    pub fn entity_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.entities.get_mut(id)
    }

    pub fn entities(&self) -> impl Iterator<Item = (EntityId, &Entity)> {
        self.entities.iter()
    }

    pub fn entity_by_name(&self, name: &str) -> Option<EntityId> {
        self.entity_names.get(name).copied()
    }

    pub fn zone(&self, id: ZoneId) -> Option<&Zone> {
        self.zones.get(id)
    }

    pub fn zones(&self) -> impl Iterator<Item = (ZoneId, &Zone)> {
        self.zones.iter()
    }

    pub fn zone_by_name(&self, name: &str) -> Option<ZoneId> {
        self.zone_names.get(name).copied()
    }

    // -----------------------------------------------------------------------
    // Gameplay state
    // -----------------------------------------------------------------------

    /// Living entities that still have to be collected.
    pub fn count_to_take(&self) -> usize {
        self.entities
            .values()
            .filter(|e| e.alive && e.speciality == EntitySpeciality::ToTake)
            .count()
    }

    /// Mark an entity destroyed. Returns `false` if it was already gone.
    pub fn destroy_entity(&mut self, id: EntityId) -> bool {
        match self.entities.get_mut(id) {
            Some(e) if e.alive => {
                e.alive = false;
                true
            }
            _ => false,
        }
    }

    /// Undo [`Level::destroy_entity`].
    pub fn revert_entity_destroyed(&mut self, id: EntityId) -> bool {
        match self.entities.get_mut(id) {
            Some(e) if !e.alive => {
                e.alive = true;
                true
            }
            _ => false,
        }
    }

    pub fn is_scripted(&self) -> bool {
        self.script.as_deref().is_some_and(|s| !s.trim().is_empty())
    }

    pub fn has_dynamic_blocks(&self) -> bool {
        self.blocks.values().any(|b| b.dynamic)
    }

    /// Number of to-take entities, collected or not.
    pub fn total_to_take(&self) -> usize {
        self.entities
            .values()
            .filter(|e| e.speciality == EntitySpeciality::ToTake)
            .count()
    }
}
