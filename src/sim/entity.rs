//! Entity arena and the per-entity bookkeeping the blockmap owns.
//!
//! Entities live in a flat arena and refer to each other by index, so
//! the render list inside each block is a pair of `Option<EntityId>`
//! links instead of pointers.  Once an entity is linked, its
//! `block_range`, `blockmap_count`, and render-link fields belong to
//! the blockmap; callers only re-link after moving it.

use bitflags::bitflags;
use glam::Vec2;
use std::ops::{Index, IndexMut};

use crate::world::geometry::{Aabb, EPSILON, Seg2};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct EntityId(pub u32);

bitflags! {
    #[derive(Debug, Clone, Copy)]
    pub struct EntityFlags: u16 {
        const SOLID       = 0x0001;
        const SHOOTABLE   = 0x0002;
        const CORPSE      = 0x0004;
        const MISSILE     = 0x0008;
        const PICKUP      = 0x0010;
        const NO_BLOCKMAP = 0x0020;
        const NO_CLIP     = 0x0040;
        const PLAYER      = 0x0080;
    }
}

/// Inclusive cell range recorded at the last blockmap link.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockRange {
    pub start_x: i16,
    pub start_y: i16,
    pub end_x: i16,
    pub end_y: i16,
}

#[derive(Clone, Copy, Debug)]
pub struct Entity {
    pub id: EntityId,
    pub pos: Vec2,
    pub z: f32,
    pub radius: f32,
    pub height: f32,
    pub flags: EntityFlags,
    /// Shooter of a projectile; a projectile never collides with it.
    pub owner: Option<EntityId>,
    /// Remaining tics of the current animation frame; -1 means the
    /// frame holds forever (a settled corpse).
    pub frame_ticks: i32,

    /* blockmap bookkeeping */
    pub block_range: Option<BlockRange>,
    pub blockmap_count: u64,
    pub render_block: Option<u32>,
    pub render_prev: Option<EntityId>,
    pub render_next: Option<EntityId>,
}

impl Entity {
    #[inline]
    pub fn aabb(&self) -> Aabb {
        Aabb::from_center_radius(self.pos, self.radius)
    }

    #[inline]
    pub fn aabb_at(&self, pos: Vec2) -> Aabb {
        Aabb::from_center_radius(pos, self.radius)
    }

    #[inline]
    pub fn overlaps_2d(&self, b: &Aabb) -> bool {
        self.aabb().overlaps(b)
    }

    #[inline]
    pub fn overlaps_z(&self, z_min: f32, z_max: f32) -> bool {
        self.z < z_max && self.z + self.height > z_min
    }

    /// Pairwise blocking rule: a thing never blocks itself, and a
    /// projectile never blocks against its shooter.  Solidity is the
    /// caller's filter.
    #[inline]
    pub fn can_block(&self, other: &Entity) -> bool {
        other.id != self.id && self.owner != Some(other.id)
    }

    /// Corpse that a healer (arch-vile style) may raise: settled on its
    /// final frame and not a player.
    #[inline]
    pub fn is_raisable_corpse(&self) -> bool {
        self.flags.contains(EntityFlags::CORPSE)
            && !self.flags.contains(EntityFlags::PLAYER)
            && self.frame_ticks == -1
    }

    /// Exact entry point of a segment into this entity's box, or `None`
    /// when it misses.  A start point already inside hits immediately.
    pub fn box_intersect(&self, seg: &Seg2) -> Option<Vec2> {
        let b = self.aabb();
        if b.contains(seg.start) {
            return Some(seg.start);
        }

        let mut t_entry = 0.0f32;
        let mut t_exit = 1.0f32;
        for axis in 0..2 {
            let s = seg.start[axis];
            let d = seg.delta[axis];
            if d.abs() < EPSILON {
                if s <= b.min[axis] || s >= b.max[axis] {
                    return None;
                }
                continue;
            }

            let inv = 1.0 / d;
            let mut t0 = (b.min[axis] - s) * inv;
            let mut t1 = (b.max[axis] - s) * inv;
            if t0 > t1 {
                std::mem::swap(&mut t0, &mut t1);
            }
            t_entry = t_entry.max(t0);
            t_exit = t_exit.min(t1);
            if t_entry > t_exit {
                return None;
            }
        }

        Some(seg.from_time(t_entry))
    }
}

/*──────────────────────── entity store ──────────────────────*/

/// Flat entity arena; ids are indices and stay stable for the life of
/// the world.
#[derive(Default)]
pub struct EntityStore {
    entities: Vec<Entity>,
}

impl EntityStore {
    pub fn spawn(
        &mut self,
        pos: Vec2,
        z: f32,
        radius: f32,
        height: f32,
        flags: EntityFlags,
    ) -> EntityId {
        let id = EntityId(self.entities.len() as u32);
        self.entities.push(Entity {
            id,
            pos,
            z,
            radius,
            height,
            flags,
            owner: None,
            frame_ticks: 0,
            block_range: None,
            blockmap_count: 0,
            render_block: None,
            render_prev: None,
            render_next: None,
        });
        id
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.entities.iter()
    }
}

impl Index<EntityId> for EntityStore {
    type Output = Entity;

    #[inline]
    fn index(&self, id: EntityId) -> &Entity {
        &self.entities[id.0 as usize]
    }
}

impl IndexMut<EntityId> for EntityStore {
    #[inline]
    fn index_mut(&mut self, id: EntityId) -> &mut Entity {
        &mut self.entities[id.0 as usize]
    }
}

/*=======================================================================*/
/*                                Tests                                  */
/*=======================================================================*/
