//! Uniform-grid spatial index over level lines and entities.
//!
//! Cells live in `BTreeMap`s and every query returns its results sorted,
//! so iteration order never depends on hashing.

use std::collections::{BTreeMap, BTreeSet};

use glam::Vec2;

use crate::geom::{Aabb, Segment};
use crate::id::{BlockId, EntityId};

/// Default grid cell edge length, in level units.
pub const DEFAULT_CELL_SIZE: f32 = 4.0;

/// Queries spanning more cells than this scan everything instead.
const MAX_QUERY_CELLS: i64 = 4096;

type Cell = (i32, i32);

/// A solid edge of a block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Line {
    pub seg: Segment,
    pub block: BlockId,
    pub grip: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct EntityShape {
    center: Vec2,
    radius: f32,
}

impl EntityShape {
    fn bounds(&self) -> Aabb {
        Aabb::around_circle(self.center, self.radius)
    }
}

#[derive(Debug, Clone)]
pub struct CollisionSystem {
    cell_size: f32,
    next_line: u32,
    lines: BTreeMap<u32, Line>,
    line_cells: BTreeMap<Cell, Vec<u32>>,
    block_lines: BTreeMap<BlockId, Vec<u32>>,
    /// Lines spanning too many cells to index; checked by every query.
    wide_lines: BTreeSet<u32>,
    entities: BTreeMap<EntityId, EntityShape>,
    entity_cells: BTreeMap<Cell, Vec<EntityId>>,
}

impl CollisionSystem {
    pub fn new(cell_size: f32) -> Self {
        Self {
            cell_size: if cell_size > 0.0 { cell_size } else { DEFAULT_CELL_SIZE },
            next_line: 0,
            lines: BTreeMap::new(),
            line_cells: BTreeMap::new(),
            block_lines: BTreeMap::new(),
            wide_lines: BTreeSet::new(),
            entities: BTreeMap::new(),
            entity_cells: BTreeMap::new(),
        }
    }

    pub fn clear(&mut self) {
        *self = Self::new(self.cell_size);
    }

    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    fn cell_of(&self, p: Vec2) -> Cell {
        (
            (p.x / self.cell_size).floor() as i32,
            (p.y / self.cell_size).floor() as i32,
        )
    }

    /// Cells covered by a box, or `None` when the box is too large (or
    /// empty) to enumerate.
    fn cells_of(&self, bb: &Aabb) -> Option<Vec<Cell>> {
        if bb.is_empty() || !bb.min.is_finite() || !bb.max.is_finite() {
            return None;
        }
        let (x0, y0) = self.cell_of(bb.min);
        let (x1, y1) = self.cell_of(bb.max);
        let count = (x1 as i64 - x0 as i64 + 1) * (y1 as i64 - y0 as i64 + 1);
        if count > MAX_QUERY_CELLS {
            return None;
        }
        let mut cells = Vec::with_capacity(count as usize);
        for x in x0..=x1 {
            for y in y0..=y1 {
                cells.push((x, y));
            }
        }
        Some(cells)
    }

    // -----------------------------------------------------------------------
    // Lines
    // -----------------------------------------------------------------------

    pub fn add_line(&mut self, line: Line) {
        let id = self.next_line;
        self.next_line += 1;
        match self.cells_of(&line.seg.bounds()) {
            Some(cells) => {
                for c in cells {
                    self.line_cells.entry(c).or_default().push(id);
                }
            }
            None => {
                self.wide_lines.insert(id);
            }
        }
        self.block_lines.entry(line.block).or_default().push(id);
        self.lines.insert(id, line);
    }

    /// Remove every line of a block (before re-adding it at a new place).
    pub fn remove_block(&mut self, block: BlockId) {
        let Some(ids) = self.block_lines.remove(&block) else {
            return;
        };
        for id in ids {
            let Some(line) = self.lines.remove(&id) else {
                continue;
            };
            if self.wide_lines.remove(&id) {
                continue;
            }
            for c in self.cells_of(&line.seg.bounds()).unwrap_or_default() {
                if let Some(list) = self.line_cells.get_mut(&c) {
                    list.retain(|l| *l != id);
                    if list.is_empty() {
                        self.line_cells.remove(&c);
                    }
                }
            }
        }
    }

    /// Replace the lines of a block.
    pub fn set_block_lines(&mut self, block: BlockId, segments: &[Segment], grip: f32) {
        self.remove_block(block);
        for seg in segments {
            self.add_line(Line {
                seg: *seg,
                block,
                grip,
            });
        }
    }

    /// Lines whose bounds overlap `bb`, in insertion order.
    pub fn lines_near(&self, bb: &Aabb) -> Vec<Line> {
        let ids: BTreeSet<u32> = match self.cells_of(bb) {
            Some(cells) => cells
                .iter()
                .filter_map(|c| self.line_cells.get(c))
                .flatten()
                .chain(self.wide_lines.iter())
                .copied()
                .collect(),
            None => self.lines.keys().copied().collect(),
        };
        ids.into_iter()
            .filter_map(|id| self.lines.get(&id))
            .filter(|l| l.seg.bounds().overlaps(bb))
            .copied()
            .collect()
    }

    // -----------------------------------------------------------------------
    // Entities
    // -----------------------------------------------------------------------

    pub fn add_entity(&mut self, id: EntityId, center: Vec2, radius: f32) {
        self.remove_entity(id);
        let shape = EntityShape { center, radius };
        if let Some(cells) = self.cells_of(&shape.bounds()) {
            for c in cells {
                self.entity_cells.entry(c).or_default().push(id);
            }
        }
        self.entities.insert(id, shape);
    }

    pub fn remove_entity(&mut self, id: EntityId) {
        let Some(shape) = self.entities.remove(&id) else {
            return;
        };
        if let Some(cells) = self.cells_of(&shape.bounds()) {
            for c in cells {
                if let Some(list) = self.entity_cells.get_mut(&c) {
                    list.retain(|e| *e != id);
                    if list.is_empty() {
                        self.entity_cells.remove(&c);
                    }
                }
            }
        }
    }

    pub fn move_entity(&mut self, id: EntityId, center: Vec2) {
        if let Some(shape) = self.entities.get(&id).copied() {
            self.add_entity(id, center, shape.radius);
        }
    }

    pub fn contains_entity(&self, id: EntityId) -> bool {
        self.entities.contains_key(&id)
    }

    /// Entities whose bounding square overlaps `bb`, in entity order.
    pub fn entities_near(&self, bb: &Aabb) -> Vec<EntityId> {
        let candidates: BTreeSet<EntityId> = match self.cells_of(bb) {
            Some(cells) => cells
                .iter()
                .filter_map(|c| self.entity_cells.get(c))
                .flatten()
                .copied()
                .collect(),
            None => self.entities.keys().copied().collect(),
        };
        candidates
            .into_iter()
            .filter(|id| {
                self.entities
                    .get(id)
                    .is_some_and(|s| s.bounds().overlaps(bb))
            })
            .collect()
    }
}

impl Default for CollisionSystem {
    fn default() -> Self {
        Self::new(DEFAULT_CELL_SIZE)
    }
}
