//! Blockmap query engine.
//!
//! Every operation walks the cells a query overlaps (box range or
//! segment DDA) and deduplicates with an epoch stamp: the context
//! holds one monotonic counter, each visited line/entity is stamped
//! with the current value and skipped when already stamped.  Nothing
//! is cleared between calls.  Hits go into one caller-supplied buffer
//! per call site, sorted by segment time exactly once at the end, so
//! callers walk them in physical order and stop at the first blocker.

use glam::Vec2;

use crate::world::geometry::{Aabb, Seg2};
use crate::world::grid::GridIterationStatus;

use super::block::BlockmapIntersect;
use super::blockmap::BlockMap;
use super::entity::{Entity, EntityFlags, EntityId, EntityStore};

/// Per-world traversal state.  Owning this per world (instead of a
/// process-wide counter) lets several worlds and parallel tests run
/// without cross-contaminating each other's dedup stamps.
pub struct TraverseContext {
    check_counter: u64,
    checked_lines: Vec<u64>,
}

impl TraverseContext {
    pub fn new(line_count: usize) -> TraverseContext {
        TraverseContext {
            check_counter: 0,
            checked_lines: vec![0; line_count],
        }
    }

    #[inline]
    fn next_epoch(&mut self) -> u64 {
        self.check_counter += 1;
        self.check_counter
    }
}

pub struct BlockmapTraverser<'a> {
    blockmap: &'a BlockMap,
}

impl<'a> BlockmapTraverser<'a> {
    pub fn new(blockmap: &'a BlockMap) -> BlockmapTraverser<'a> {
        BlockmapTraverser { blockmap }
    }

    /// Solid entities the source could block against, by 2D overlap
    /// with the source's AABB.  Each entity appears at most once even
    /// when it spans several of the queried cells.
    pub fn solid_entity_intersections_2d(
        &self,
        ctx: &mut TraverseContext,
        store: &mut EntityStore,
        source: EntityId,
        out: &mut Vec<EntityId>,
    ) {
        out.clear();
        let epoch = ctx.next_epoch();
        let src = store[source];
        let bounds = src.aabb();

        let range = self.blockmap.grid.box_range(&bounds);
        for by in range.start_y..=range.end_y {
            for bx in range.start_x..=range.end_x {
                let block = &self.blockmap.grid.blocks[range.index(bx, by)];
                for i in (0..block.entity_indices.len()).rev() {
                    let id = block.entity_indices[i];
                    let entity = &mut store[id];
                    if entity.blockmap_count == epoch || !entity.flags.contains(EntityFlags::SOLID)
                    {
                        continue;
                    }
                    entity.blockmap_count = epoch;
                    if src.can_block(entity) && entity.overlaps_2d(&bounds) {
                        out.push(id);
                    }
                }
            }
        }
    }

    /// Line-of-sight walk.  Returns `true` the instant a one-sided
    /// line is crossed, leaving `out` empty; a wall blocks sight and
    /// anything past it is wasted work.  Otherwise `out` holds the
    /// crossed two-sided lines sorted by time.
    pub fn sight_traverse(
        &self,
        ctx: &mut TraverseContext,
        seg: &Seg2,
        out: &mut Vec<BlockmapIntersect>,
    ) -> bool {
        out.clear();
        let epoch = ctx.next_epoch();

        for index in self.blockmap.grid.seg_iter(seg) {
            let block = &self.blockmap.grid.blocks[index];
            out.reserve(block.block_line_count as usize);

            for slot in block.line_slots() {
                let line = &self.blockmap.block_lines[slot];
                let Some(t) = seg.intersection(&line.seg) else {
                    continue;
                };
                if ctx.checked_lines[line.line_id as usize] == epoch {
                    continue;
                }
                ctx.checked_lines[line.line_id as usize] = epoch;

                if line.one_sided {
                    out.clear();
                    return true;
                }
                out.push(BlockmapIntersect::line(slot, t));
            }
        }

        out.sort_unstable_by(|a, b| a.seg_time.total_cmp(&b.seg_time));
        false
    }

    /// Hitscan walk: every crossed line is recorded (one-sided ones
    /// included), and shootable entities are tested with the exact box
    /// entry point so the hit lands on the box face, not the cell.
    /// Line and entity hits share the buffer, sorted by time.
    pub fn shoot_traverse(
        &self,
        ctx: &mut TraverseContext,
        store: &mut EntityStore,
        seg: &Seg2,
        out: &mut Vec<BlockmapIntersect>,
    ) {
        out.clear();
        let epoch = ctx.next_epoch();

        for index in self.blockmap.grid.seg_iter(seg) {
            let block = &self.blockmap.grid.blocks[index];

            for slot in block.line_slots() {
                let line = &self.blockmap.block_lines[slot];
                let Some(t) = seg.intersection(&line.seg) else {
                    continue;
                };
                if ctx.checked_lines[line.line_id as usize] == epoch {
                    continue;
                }
                ctx.checked_lines[line.line_id as usize] = epoch;
                out.push(BlockmapIntersect::line(slot, t));
            }

            for i in (0..block.entity_indices.len()).rev() {
                let id = block.entity_indices[i];
                let entity = &mut store[id];
                if entity.blockmap_count == epoch {
                    continue;
                }
                if !entity.flags.contains(EntityFlags::SHOOTABLE) {
                    continue;
                }
                entity.blockmap_count = epoch;
                if let Some(hit) = entity.box_intersect(seg) {
                    out.push(BlockmapIntersect::entity(id, seg.to_time(hit)));
                }
            }
        }

        out.sort_unstable_by(|a, b| a.seg_time.total_cmp(&b.seg_time));
    }

    /// Run `action` on every shootable entity overlapping the blast
    /// box.
    pub fn explosion_traverse(
        &self,
        ctx: &mut TraverseContext,
        store: &mut EntityStore,
        bounds: &Aabb,
        mut action: impl FnMut(&mut Entity),
    ) {
        let epoch = ctx.next_epoch();
        let range = self.blockmap.grid.box_range(bounds);
        for by in range.start_y..=range.end_y {
            for bx in range.start_x..=range.end_x {
                let block = &self.blockmap.grid.blocks[range.index(bx, by)];
                for i in (0..block.entity_indices.len()).rev() {
                    let id = block.entity_indices[i];
                    let entity = &mut store[id];
                    if entity.blockmap_count == epoch {
                        continue;
                    }
                    if !entity.flags.contains(EntityFlags::SHOOTABLE) {
                        continue;
                    }
                    entity.blockmap_count = epoch;
                    if entity.overlaps_2d(bounds) {
                        action(entity);
                    }
                }
            }
        }
    }

    /// Generic box query; the callback decides per entity whether to
    /// keep going.
    pub fn entity_traverse(
        &self,
        ctx: &mut TraverseContext,
        store: &mut EntityStore,
        bounds: &Aabb,
        mut action: impl FnMut(&mut Entity) -> GridIterationStatus,
    ) {
        let epoch = ctx.next_epoch();
        let range = self.blockmap.grid.box_range(bounds);
        for by in range.start_y..=range.end_y {
            for bx in range.start_x..=range.end_x {
                let block = &self.blockmap.grid.blocks[range.index(bx, by)];
                for i in (0..block.entity_indices.len()).rev() {
                    let id = block.entity_indices[i];
                    let entity = &mut store[id];
                    if entity.blockmap_count == epoch {
                        continue;
                    }
                    entity.blockmap_count = epoch;
                    if !entity.overlaps_2d(bounds) {
                        continue;
                    }
                    if action(entity) == GridIterationStatus::Stop {
                        return;
                    }
                }
            }
        }
    }

    /// Find one raisable corpse in the box whose spot is still free,
    /// hand it to `action`, and stop.
    pub fn heal_traverse(
        &self,
        ctx: &mut TraverseContext,
        store: &mut EntityStore,
        bounds: &Aabb,
        mut action: impl FnMut(&mut Entity),
    ) {
        let epoch = ctx.next_epoch();
        let range = self.blockmap.grid.box_range(bounds);
        for by in range.start_y..=range.end_y {
            for bx in range.start_x..=range.end_x {
                let block = &self.blockmap.grid.blocks[range.index(bx, by)];
                for i in (0..block.entity_indices.len()).rev() {
                    let id = block.entity_indices[i];
                    {
                        let entity = &store[id];
                        if entity.blockmap_count == epoch {
                            continue;
                        }
                        if !entity.is_raisable_corpse() {
                            continue;
                        }
                    }

                    // The corpse only rises if nothing solid occupies
                    // its spot.  The nested walk bumps the counter, but
                    // the captured epoch keeps this loop's dedup exact.
                    let pos = store[id].pos;
                    let z = store[id].z;
                    if !self.solid_block_traverse(ctx, store, id, pos, z, false) {
                        continue;
                    }

                    let entity = &mut store[id];
                    entity.blockmap_count = epoch;
                    if entity.overlaps_2d(bounds) {
                        action(entity);
                        return;
                    }
                }
            }
        }
    }

    /// True when nothing solid blocks `source` standing at `position`.
    /// `check_z` switches between a full 3D box test and a footprint
    /// test.
    pub fn solid_block_traverse(
        &self,
        ctx: &mut TraverseContext,
        store: &mut EntityStore,
        source: EntityId,
        position: Vec2,
        z: f32,
        check_z: bool,
    ) -> bool {
        let epoch = ctx.next_epoch();
        let src = store[source];
        let bounds = src.aabb_at(position);
        let (z_min, z_max) = (z, z + src.height);

        let range = self.blockmap.grid.box_range(&bounds);
        for by in range.start_y..=range.end_y {
            for bx in range.start_x..=range.end_x {
                let block = &self.blockmap.grid.blocks[range.index(bx, by)];
                for i in (0..block.entity_indices.len()).rev() {
                    let id = block.entity_indices[i];
                    let entity = &mut store[id];
                    if entity.blockmap_count == epoch {
                        continue;
                    }
                    if !entity.flags.contains(EntityFlags::SOLID) {
                        continue;
                    }
                    entity.blockmap_count = epoch;
                    if entity_overlap(&src, entity, &bounds, z_min, z_max, check_z) {
                        return false;
                    }
                }
            }
        }

        true
    }

    /// Collecting variant of the solid-block test; `shootable` narrows
    /// the result to entities a hitscan could also hurt.
    pub fn solid_block_entities(
        &self,
        ctx: &mut TraverseContext,
        store: &mut EntityStore,
        source: EntityId,
        position: Vec2,
        z: f32,
        check_z: bool,
        shootable: bool,
        out: &mut Vec<EntityId>,
    ) {
        out.clear();
        let epoch = ctx.next_epoch();
        let src = store[source];
        let bounds = src.aabb_at(position);
        let (z_min, z_max) = (z, z + src.height);

        let range = self.blockmap.grid.box_range(&bounds);
        for by in range.start_y..=range.end_y {
            for bx in range.start_x..=range.end_x {
                let block = &self.blockmap.grid.blocks[range.index(bx, by)];
                for i in (0..block.entity_indices.len()).rev() {
                    let id = block.entity_indices[i];
                    let entity = &mut store[id];
                    if entity.blockmap_count == epoch {
                        continue;
                    }
                    if !entity.flags.contains(EntityFlags::SOLID) {
                        continue;
                    }
                    if shootable && !entity.flags.contains(EntityFlags::SHOOTABLE) {
                        continue;
                    }
                    entity.blockmap_count = epoch;
                    if entity_overlap(&src, entity, &bounds, z_min, z_max, check_z) {
                        out.push(id);
                    }
                }
            }
        }
    }

    /// Interaction reach: the lines crossed by a short use segment,
    /// sorted by time.  Entities never matter for switches and doors.
    pub fn use_traverse(
        &self,
        ctx: &mut TraverseContext,
        seg: &Seg2,
        out: &mut Vec<BlockmapIntersect>,
    ) {
        out.clear();
        let epoch = ctx.next_epoch();

        for index in self.blockmap.grid.seg_iter(seg) {
            let block = &self.blockmap.grid.blocks[index];
            for slot in block.line_slots() {
                let line = &self.blockmap.block_lines[slot];
                if ctx.checked_lines[line.line_id as usize] == epoch {
                    continue;
                }
                if let Some(t) = seg.intersection(&line.seg) {
                    ctx.checked_lines[line.line_id as usize] = epoch;
                    out.push(BlockmapIntersect::line(slot, t));
                }
            }
        }

        out.sort_unstable_by(|a, b| a.seg_time.total_cmp(&b.seg_time));
    }
}

fn entity_overlap(
    src: &Entity,
    entity: &Entity,
    bounds: &Aabb,
    z_min: f32,
    z_max: f32,
    check_z: bool,
) -> bool {
    if !entity.overlaps_2d(bounds) {
        return false;
    }
    if !src.can_block(entity) {
        return false;
    }
    if check_z && !entity.overlaps_z(z_min, z_max) {
        return false;
    }
    true
}

/*=======================================================================*/
/*                                Tests                                  */
/*=======================================================================*/
#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::geometry::{Line, LineFlags, MapGeometry, Sector, Side};

    /// 128x128 one-sided room with a two-sided divider at x = 64.
    fn divided_map() -> MapGeometry {
        let corners = [
            Vec2::new(0.0, 0.0),
            Vec2::new(128.0, 0.0),
            Vec2::new(128.0, 128.0),
            Vec2::new(0.0, 128.0),
        ];
        let mut lines = Vec::new();
        for i in 0..4u16 {
            lines.push(Line::new(
                i,
                corners[i as usize],
                corners[(i as usize + 1) % 4],
                LineFlags::BLOCKING,
                0,
                0,
                None,
            ));
        }
        lines.push(Line::new(
            4,
            Vec2::new(64.0, 0.0),
            Vec2::new(64.0, 128.0),
            LineFlags::TWO_SIDED,
            0,
            0,
            Some(1),
        ));
        let sides = vec![Side::new(0, 0), Side::new(1, 1)];
        let sectors = vec![
            Sector { id: 0, floor_h: 0.0, ceil_h: 128.0 },
            Sector { id: 1, floor_h: 0.0, ceil_h: 128.0 },
        ];
        MapGeometry::new(lines, sides, sectors, Vec::new()).unwrap()
    }

    struct World {
        blockmap: BlockMap,
        store: EntityStore,
        ctx: TraverseContext,
    }

    fn world() -> World {
        let geometry = divided_map();
        let blockmap = BlockMap::new(&geometry, 16);
        let ctx = TraverseContext::new(geometry.lines.len());
        World { blockmap, store: EntityStore::default(), ctx }
    }

    fn spawn_linked(w: &mut World, pos: Vec2, radius: f32, flags: EntityFlags) -> EntityId {
        let id = w.store.spawn(pos, 0.0, radius, 56.0, flags);
        w.blockmap.link(&mut w.store, id, false);
        id
    }

    #[test]
    fn sight_blocked_by_one_sided_line() {
        let mut w = world();
        let traverser = BlockmapTraverser::new(&w.blockmap);
        let mut hits = Vec::new();

        // Crosses the west boundary wall.
        let seg = Seg2::new(Vec2::new(-32.0, 32.0), Vec2::new(32.0, 32.0));
        let blocked = traverser.sight_traverse(&mut w.ctx, &seg, &mut hits);
        assert!(blocked);
        assert!(hits.is_empty());
    }

    #[test]
    fn sight_collects_two_sided_lines() {
        let mut w = world();
        let traverser = BlockmapTraverser::new(&w.blockmap);
        let mut hits = Vec::new();

        let seg = Seg2::new(Vec2::new(32.0, 64.0), Vec2::new(96.0, 64.0));
        let blocked = traverser.sight_traverse(&mut w.ctx, &seg, &mut hits);
        assert!(!blocked);
        assert_eq!(hits.len(), 1);
        let slot = hits[0].line_slot().unwrap();
        assert_eq!(w.blockmap.block_lines[slot].line_id, 4);
        assert!((hits[0].seg_time - 0.5).abs() < 1e-6);
    }

    #[test]
    fn sight_dedups_lines_across_cells() {
        let mut w = world();
        let traverser = BlockmapTraverser::new(&w.blockmap);
        let mut hits = Vec::new();

        // A diagonal crossing the divider; the divider spans every cell
        // row, so several visited cells project the same line.
        let seg = Seg2::new(Vec2::new(32.0, 16.0), Vec2::new(96.0, 112.0));
        assert!(!traverser.sight_traverse(&mut w.ctx, &seg, &mut hits));
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn shoot_collects_lines_and_entities_sorted() {
        let mut w = world();
        let target_near = spawn_linked(
            &mut w,
            Vec2::new(32.0, 64.0),
            8.0,
            EntityFlags::SOLID | EntityFlags::SHOOTABLE,
        );
        let target_far = spawn_linked(
            &mut w,
            Vec2::new(96.0, 64.0),
            8.0,
            EntityFlags::SOLID | EntityFlags::SHOOTABLE,
        );
        let traverser = BlockmapTraverser::new(&w.blockmap);
        let mut hits = Vec::new();

        // West to east through both targets, the divider, and the east
        // wall.
        let seg = Seg2::new(Vec2::new(8.0, 64.0), Vec2::new(140.0, 64.0));
        traverser.shoot_traverse(&mut w.ctx, &mut w.store, &seg, &mut hits);

        for pair in hits.windows(2) {
            assert!(pair[0].seg_time <= pair[1].seg_time);
        }

        let order: Vec<Option<EntityId>> = hits.iter().map(|h| h.entity_id()).collect();
        let near_at = order.iter().position(|&e| e == Some(target_near)).unwrap();
        let far_at = order.iter().position(|&e| e == Some(target_far)).unwrap();
        let divider_at = hits
            .iter()
            .position(|h| {
                h.line_slot()
                    .is_some_and(|s| w.blockmap.block_lines[s].line_id == 4)
            })
            .unwrap();
        assert!(near_at < divider_at && divider_at < far_at);

        // The east boundary wall is recorded too; shooting never
        // short-circuits on one-sided lines.
        assert!(hits.iter().any(|h| {
            h.line_slot()
                .is_some_and(|s| w.blockmap.block_lines[s].one_sided)
        }));
    }

    #[test]
    fn solid_intersections_report_spanning_entity_once() {
        let mut w = world();
        let source = spawn_linked(&mut w, Vec2::new(40.0, 40.0), 20.0, EntityFlags::SOLID);
        // Radius 24 around a cell corner: covers 4+ cells.
        let big = spawn_linked(&mut w, Vec2::new(48.0, 48.0), 24.0, EntityFlags::SOLID);
        let traverser = BlockmapTraverser::new(&w.blockmap);

        let mut out = Vec::new();
        traverser.solid_entity_intersections_2d(&mut w.ctx, &mut w.store, source, &mut out);
        assert_eq!(out, vec![big]);
    }

    #[test]
    fn entity_traverse_stops_on_request() {
        let mut w = world();
        for i in 0..4 {
            spawn_linked(
                &mut w,
                Vec2::new(16.0 + 8.0 * i as f32, 16.0),
                4.0,
                EntityFlags::SOLID,
            );
        }
        let traverser = BlockmapTraverser::new(&w.blockmap);

        let mut seen = 0;
        let bounds = Aabb::new(Vec2::new(0.0, 0.0), Vec2::new(64.0, 64.0));
        traverser.entity_traverse(&mut w.ctx, &mut w.store, &bounds, |_| {
            seen += 1;
            if seen == 2 { GridIterationStatus::Stop } else { GridIterationStatus::Continue }
        });
        assert_eq!(seen, 2);
    }

    #[test]
    fn explosion_only_reaches_shootables_in_box() {
        let mut w = world();
        let victim = spawn_linked(
            &mut w,
            Vec2::new(32.0, 32.0),
            8.0,
            EntityFlags::SOLID | EntityFlags::SHOOTABLE,
        );
        let _decoration = spawn_linked(&mut w, Vec2::new(36.0, 36.0), 8.0, EntityFlags::SOLID);
        let _outside = spawn_linked(
            &mut w,
            Vec2::new(110.0, 110.0),
            8.0,
            EntityFlags::SOLID | EntityFlags::SHOOTABLE,
        );
        let traverser = BlockmapTraverser::new(&w.blockmap);

        let mut hit = Vec::new();
        let blast = Aabb::from_center_radius(Vec2::new(32.0, 32.0), 24.0);
        traverser.explosion_traverse(&mut w.ctx, &mut w.store, &blast, |e| hit.push(e.id));
        assert_eq!(hit, vec![victim]);
    }

    #[test]
    fn heal_raises_first_free_corpse_only() {
        let mut w = world();
        let corpse = spawn_linked(&mut w, Vec2::new(32.0, 32.0), 16.0, EntityFlags::CORPSE);
        w.store[corpse].frame_ticks = -1;
        let corpse2 = spawn_linked(&mut w, Vec2::new(40.0, 32.0), 16.0, EntityFlags::CORPSE);
        w.store[corpse2].frame_ticks = -1;
        let traverser = BlockmapTraverser::new(&w.blockmap);

        let mut raised = Vec::new();
        let reach = Aabb::from_center_radius(Vec2::new(32.0, 32.0), 32.0);
        traverser.heal_traverse(&mut w.ctx, &mut w.store, &reach, |e| raised.push(e.id));
        assert_eq!(raised.len(), 1);
    }

    #[test]
    fn heal_skips_blocked_corpse() {
        let mut w = world();
        let corpse = spawn_linked(&mut w, Vec2::new(32.0, 32.0), 16.0, EntityFlags::CORPSE);
        w.store[corpse].frame_ticks = -1;
        // A live monster stands on the corpse.
        let _blocker = spawn_linked(&mut w, Vec2::new(34.0, 32.0), 16.0, EntityFlags::SOLID);
        let traverser = BlockmapTraverser::new(&w.blockmap);

        let mut raised = Vec::new();
        let reach = Aabb::from_center_radius(Vec2::new(32.0, 32.0), 32.0);
        traverser.heal_traverse(&mut w.ctx, &mut w.store, &reach, |e| raised.push(e.id));
        assert!(raised.is_empty());
    }

    #[test]
    fn solid_block_traverse_checks_z_only_when_asked() {
        let mut w = world();
        let mover = spawn_linked(&mut w, Vec2::new(96.0, 96.0), 16.0, EntityFlags::SOLID);
        let ledge = w.store.spawn(Vec2::new(32.0, 32.0), 128.0, 16.0, 56.0, EntityFlags::SOLID);
        w.blockmap.link(&mut w.store, ledge, false);
        let traverser = BlockmapTraverser::new(&w.blockmap);

        let dest = Vec2::new(32.0, 32.0);
        // Footprints overlap, so the 2D test blocks.
        assert!(!traverser.solid_block_traverse(&mut w.ctx, &mut w.store, mover, dest, 0.0, false));
        // The other entity floats 128 units up; the 3D test passes.
        assert!(traverser.solid_block_traverse(&mut w.ctx, &mut w.store, mover, dest, 0.0, true));

        let mut out = Vec::new();
        traverser.solid_block_entities(
            &mut w.ctx, &mut w.store, mover, dest, 0.0, false, false, &mut out,
        );
        assert_eq!(out, vec![ledge]);
    }

    #[test]
    fn use_traverse_ignores_entities() {
        let mut w = world();
        let _bystander = spawn_linked(
            &mut w,
            Vec2::new(56.0, 64.0),
            8.0,
            EntityFlags::SOLID | EntityFlags::SHOOTABLE,
        );
        let traverser = BlockmapTraverser::new(&w.blockmap);

        let mut hits = Vec::new();
        let reach = Seg2::new(Vec2::new(48.0, 64.0), Vec2::new(80.0, 64.0));
        traverser.use_traverse(&mut w.ctx, &reach, &mut hits);
        assert_eq!(hits.len(), 1);
        let slot = hits[0].line_slot().unwrap();
        assert_eq!(w.blockmap.block_lines[slot].line_id, 4);
    }

    #[test]
    fn contexts_do_not_share_stamps() {
        let mut w = world();
        let traverser = BlockmapTraverser::new(&w.blockmap);
        let mut other = TraverseContext::new(5);
        let mut hits = Vec::new();

        let seg = Seg2::new(Vec2::new(32.0, 64.0), Vec2::new(96.0, 64.0));
        assert!(!traverser.sight_traverse(&mut w.ctx, &seg, &mut hits));
        assert_eq!(hits.len(), 1);
        // A fresh context sees the same world state independently.
        assert!(!traverser.sight_traverse(&mut other, &seg, &mut hits));
        assert_eq!(hits.len(), 1);
    }
}
