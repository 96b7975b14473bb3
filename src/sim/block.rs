//! Per-cell storage and the records traversals exchange.

use std::ops::Range;

use crate::world::geometry::{IslandId, LineFlags, LineId, Seg2, SectorId, SideId};

use super::entity::EntityId;
use super::node_pool::NodeId;

/// One line projected into one cell, snapshotted at build time.  The
/// global array is sorted by `(block_index, line_id)`; lines must be
/// checked in line-id order within a cell so short-circuiting checks
/// see them in the same order the map's line list would produce.
#[derive(Clone, Debug)]
pub struct BlockLine {
    pub block_index: i32,
    pub line_id: LineId,
    pub seg: Seg2,
    pub one_sided: bool,
    pub has_special: bool,
    pub flags: LineFlags,
    pub front_sector: SectorId,
    pub back_sector: Option<SectorId>,
}

/// Mutable state of one grid cell.  The line slice is fixed at build
/// time; everything else changes as the simulation moves things.
#[derive(Default)]
pub struct Block {
    /// Half-open slice `[index, index + count)` into the blockmap's
    /// sorted `BlockLine` array.
    pub block_line_index: u32,
    pub block_line_count: u32,

    /// Physics membership by AABB overlap; one entity may appear in
    /// many blocks.  Grows as needed and never shrinks.
    pub entity_indices: Vec<EntityId>,

    /// Head of the render list: single-cell membership by point
    /// position, linked through the entities' render fields.
    pub head_entity: Option<EntityId>,

    /// Static sector islands overlapping this cell.
    pub sectors: Vec<IslandId>,
    /// Head of the pooled list of islands currently in motion here.
    pub dynamic_sectors: Option<NodeId>,
    /// Sides whose geometry changed this tick.
    pub dynamic_sides: Vec<SideId>,
}

impl Block {
    #[inline]
    pub fn line_slots(&self) -> Range<usize> {
        let start = self.block_line_index as usize;
        start..start + self.block_line_count as usize
    }

    /// Swap-remove; order inside a block carries no meaning.
    pub fn remove_entity(&mut self, id: EntityId) {
        if let Some(i) = self.entity_indices.iter().position(|&e| e == id) {
            self.entity_indices.swap_remove(i);
        }
    }
}

/// A hit along a query segment: either a slot in the `BlockLine` array
/// or an entity, tagged in the high bit, at a parametric time on the
/// query.  Buffers of these are sorted by time so callers can stop at
/// the first blocking hit.
#[derive(Clone, Copy, Debug)]
pub struct BlockmapIntersect {
    pub index: u32,
    pub seg_time: f32,
}

impl BlockmapIntersect {
    pub const ENTITY_FLAG: u32 = 1 << 31;

    #[inline]
    pub fn line(slot: usize, seg_time: f32) -> BlockmapIntersect {
        BlockmapIntersect {
            index: slot as u32,
            seg_time,
        }
    }

    #[inline]
    pub fn entity(id: EntityId, seg_time: f32) -> BlockmapIntersect {
        BlockmapIntersect {
            index: id.0 | Self::ENTITY_FLAG,
            seg_time,
        }
    }

    #[inline]
    pub fn line_slot(&self) -> Option<usize> {
        (self.index & Self::ENTITY_FLAG == 0).then_some(self.index as usize)
    }

    #[inline]
    pub fn entity_id(&self) -> Option<EntityId> {
        (self.index & Self::ENTITY_FLAG != 0).then_some(EntityId(self.index & !Self::ENTITY_FLAG))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intersect_tagging_round_trips() {
        let line = BlockmapIntersect::line(42, 0.25);
        assert_eq!(line.line_slot(), Some(42));
        assert_eq!(line.entity_id(), None);

        let ent = BlockmapIntersect::entity(EntityId(7), 0.5);
        assert_eq!(ent.line_slot(), None);
        assert_eq!(ent.entity_id(), Some(EntityId(7)));
    }

    #[test]
    fn remove_entity_is_swap_remove() {
        let mut block = Block::default();
        for i in 0..4 {
            block.entity_indices.push(EntityId(i));
        }
        block.remove_entity(EntityId(1));
        assert_eq!(block.entity_indices, vec![EntityId(0), EntityId(3), EntityId(2)]);
        // Removing an id that is not present is a no-op.
        block.remove_entity(EntityId(9));
        assert_eq!(block.entity_indices.len(), 3);
    }
}
