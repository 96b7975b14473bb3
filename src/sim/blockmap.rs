//! Map-to-grid index.
//!
//! Static line projections are rasterized once per map; entity, moving
//! sector, and side membership is rewritten every tick.  The grid is
//! write-through from the movement code: unlink before a move, relink
//! after, with a cheap no-op path for things that stayed in the same
//! cells.

use glam::Vec2;
use smallvec::SmallVec;

use crate::world::geometry::{Aabb, IslandId, Line, MapGeometry, SectorId, SideId};
use crate::world::grid::UniformGrid;

use super::block::{Block, BlockLine};
use super::entity::{BlockRange, EntityFlags, EntityId, EntityStore};
use super::node_pool::{NodeId, NodePool};

/// Vanilla cell edge length in map units.
pub const BLOCKMAP_DIMENSION: i32 = 128;

pub struct BlockMap {
    /// Unpadded union bounds of the static lines.
    pub bounds: Aabb,
    pub grid: UniformGrid<Block>,
    /// All line projections, sorted by `(block_index, line_id)`.
    pub block_lines: Vec<BlockLine>,
    /// lookup: sector -> its live dynamic nodes
    sector_nodes: Vec<SmallVec<[NodeId; 4]>>,
}

impl BlockMap {
    pub fn new(geometry: &MapGeometry, dimension: i32) -> BlockMap {
        let bounds = map_bounding_box(&geometry.lines);
        let mut grid: UniformGrid<Block> = UniformGrid::new(bounds, dimension);

        let mut block_lines = Vec::with_capacity(geometry.lines.len());
        for line in &geometry.lines {
            for index in grid.seg_iter(&line.seg) {
                block_lines.push(BlockLine {
                    block_index: index as i32,
                    line_id: line.id,
                    seg: line.seg,
                    one_sided: line.one_sided(),
                    has_special: line.has_special(),
                    flags: line.flags,
                    front_sector: geometry.front_sector(line),
                    back_sector: geometry.back_sector(line),
                });
            }
        }

        // (block, line) pairs are unique, so the unstable sort still
        // yields the one total order the cell checks depend on.
        block_lines.sort_unstable_by_key(|bl| (bl.block_index, bl.line_id));

        let mut last_index = -1;
        for (i, bl) in block_lines.iter().enumerate() {
            let block = &mut grid.blocks[bl.block_index as usize];
            if bl.block_index != last_index {
                last_index = bl.block_index;
                block.block_line_index = i as u32;
            }
            block.block_line_count += 1;
        }

        BlockMap {
            bounds,
            grid,
            block_lines,
            sector_nodes: vec![SmallVec::new(); geometry.sectors.len()],
        }
    }

    /*──────────────────────── entities ──────────────────────*/

    /// Record the entity in every cell its AABB overlaps.
    ///
    /// With `check_last_block` set, an unchanged cell range returns
    /// without touching any array; movement relinks every tick and
    /// most things stand still or move within a cell.  Without it the
    /// entity must be unlinked first.
    pub fn link(&mut self, store: &mut EntityStore, id: EntityId, check_last_block: bool) {
        let entity = &store[id];
        if entity.flags.contains(EntityFlags::NO_BLOCKMAP) {
            return;
        }
        assert!(
            entity.block_range.is_none() || check_last_block,
            "entity {} still linked to the blockmap",
            id.0
        );

        let origin = self.grid.origin();
        let dim = self.grid.dimension as f32;
        let bounds = entity.aabb();
        let range = BlockRange {
            start_x: (((bounds.min.x - origin.x) / dim) as i32).max(0) as i16,
            start_y: (((bounds.min.y - origin.y) / dim) as i32).max(0) as i16,
            end_x: (((bounds.max.x - origin.x) / dim) as i32).min(self.grid.width - 1) as i16,
            end_y: (((bounds.max.y - origin.y) / dim) as i32).min(self.grid.height - 1) as i16,
        };

        if check_last_block && entity.block_range == Some(range) {
            return;
        }

        self.unlink(store, id);
        store[id].block_range = Some(range);

        for by in range.start_y..=range.end_y {
            for bx in range.start_x..=range.end_x {
                let index = (by as i32 * self.grid.width + bx as i32) as usize;
                self.grid.blocks[index].entity_indices.push(id);
            }
        }
    }

    /// Remove the entity from every cell recorded at its last link.
    pub fn unlink(&mut self, store: &mut EntityStore, id: EntityId) {
        let Some(range) = store[id].block_range.take() else {
            return;
        };
        for by in range.start_y..=range.end_y {
            for bx in range.start_x..=range.end_x {
                let index = (by as i32 * self.grid.width + bx as i32) as usize;
                self.grid.blocks[index].remove_entity(id);
            }
        }
    }

    /// Render membership is by point position, one cell only, kept as
    /// an intrusive list through the entities' render fields.
    pub fn render_link(&mut self, store: &mut EntityStore, id: EntityId) {
        assert!(
            store[id].render_block.is_none(),
            "entity {} still linked to the render blockmap",
            id.0
        );

        let Some(index) = self.grid.block_index(store[id].pos) else {
            return;
        };
        store[id].render_block = Some(index as u32);

        let block = &mut self.grid.blocks[index];
        if let Some(head) = block.head_entity {
            store[id].render_next = Some(head);
            store[head].render_prev = Some(id);
        }
        block.head_entity = Some(id);
    }

    pub fn render_unlink(&mut self, store: &mut EntityStore, id: EntityId) {
        let Some(block_index) = store[id].render_block.take() else {
            return;
        };
        let prev = store[id].render_prev.take();
        let next = store[id].render_next.take();

        if let Some(next) = next {
            store[next].render_prev = prev;
        }
        match prev {
            Some(prev) => store[prev].render_next = next,
            None => self.grid.blocks[block_index as usize].head_entity = next,
        }
    }

    /*──────────────────── moving geometry ───────────────────*/

    /// Register a sector that starts moving: one pooled node per
    /// (island, overlapped cell).  Closet islands never register.
    pub fn link_dynamic_sector(
        &mut self,
        pool: &mut NodePool,
        geometry: &MapGeometry,
        sector: SectorId,
    ) {
        assert!(
            self.sector_nodes[sector as usize].is_empty(),
            "sector {sector} still linked to the blockmap"
        );

        for &island_id in &geometry.sector_islands[sector as usize] {
            let island = &geometry.islands[island_id as usize];
            if island.is_voodoo_closet || island.is_monster_closet {
                continue;
            }

            let range = self.grid.box_range(&island.bounds);
            for by in range.start_y..=range.end_y {
                for bx in range.start_x..=range.end_x {
                    let index = range.index(bx, by);
                    let node = pool.alloc(island_id, index as u32);

                    let block = &mut self.grid.blocks[index];
                    if let Some(head) = block.dynamic_sectors {
                        pool.get_mut(head).prev = Some(node);
                        pool.get_mut(node).next = Some(head);
                    }
                    block.dynamic_sectors = Some(node);
                    self.sector_nodes[sector as usize].push(node);
                }
            }
        }
    }

    /// Give back the sector's nodes when it stops moving.
    pub fn unlink_dynamic_sector(&mut self, pool: &mut NodePool, sector: SectorId) {
        let nodes = std::mem::take(&mut self.sector_nodes[sector as usize]);
        for id in nodes {
            let node = *pool.get(id);
            if let Some(next) = node.next {
                pool.get_mut(next).prev = node.prev;
            }
            match node.prev {
                Some(prev) => pool.get_mut(prev).next = node.next,
                None => self.grid.blocks[node.block as usize].dynamic_sectors = node.next,
            }
            pool.free(id);
        }
    }

    /// Static island registration, built once after the blockmap.
    pub fn link_sector(&mut self, geometry: &MapGeometry, sector: SectorId) {
        for &island_id in &geometry.sector_islands[sector as usize] {
            let island = &geometry.islands[island_id as usize];
            if island.is_voodoo_closet || island.is_monster_closet {
                continue;
            }
            let range = self.grid.box_range(&island.bounds);
            for by in range.start_y..=range.end_y {
                for bx in range.start_x..=range.end_x {
                    self.grid.blocks[range.index(bx, by)].sectors.push(island_id);
                }
            }
        }
    }

    /// Register a side whose wall geometry changed this tick; repeat
    /// calls are no-ops until the flag is reset with the next map.
    pub fn link_dynamic_side(&mut self, geometry: &mut MapGeometry, side: SideId) {
        let s = &mut geometry.sides[side as usize];
        if s.blockmap_linked {
            return;
        }
        s.blockmap_linked = true;

        let seg = geometry.lines[s.line as usize].seg;
        for index in self.grid.seg_iter(&seg) {
            self.grid.blocks[index].dynamic_sides.push(side);
        }
    }

    /// Drop every per-tick dynamic registration, returning pooled
    /// nodes.  Static lines and entity membership stay; entities are
    /// unlinked by their own teardown.  Safe to call twice.
    pub fn clear(&mut self, pool: &mut NodePool) {
        for block in &mut self.grid.blocks {
            let mut node = block.dynamic_sectors.take();
            while let Some(id) = node {
                node = pool.get(id).next;
                pool.free(id);
            }
            block.dynamic_sides.clear();
        }
        for nodes in &mut self.sector_nodes {
            nodes.clear();
        }
    }

    /// Islands currently moving through the cell holding `pos`.
    pub fn dynamic_islands_at(&self, pool: &NodePool, pos: Vec2) -> SmallVec<[IslandId; 4]> {
        let mut islands = SmallVec::new();
        let Some(index) = self.grid.block_index(pos) else {
            return islands;
        };
        let mut node = self.grid.blocks[index].dynamic_sectors;
        while let Some(id) = node {
            let n = pool.get(id);
            islands.push(n.island);
            node = n.next;
        }
        islands
    }
}

fn map_bounding_box(lines: &[Line]) -> Aabb {
    let mut iter = lines.iter();
    let Some(first) = iter.next() else {
        return Aabb::new(Vec2::ZERO, Vec2::ONE);
    };
    iter.fold(first.seg.bounds, |acc, line| acc.combine(&line.seg.bounds))
}

/*=======================================================================*/
/*                                Tests                                  */
/*=======================================================================*/
