use bitflags::bitflags;
use glam::Vec2;
use smallvec::SmallVec;
use thiserror::Error;

pub type LineId = u16;
pub type SideId = u16;
pub type SectorId = u16;
pub type IslandId = u16;

pub const EPSILON: f32 = 1e-5;

#[inline]
pub fn approx_zero(v: f32) -> bool {
    v.abs() < EPSILON
}

/*----------------------- simple primitives --------------------------*/

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    pub min: Vec2,
    pub max: Vec2,
}

impl Aabb {
    #[inline]
    pub fn new(min: Vec2, max: Vec2) -> Aabb {
        Aabb { min, max }
    }

    #[inline]
    pub fn from_center_radius(center: Vec2, radius: f32) -> Aabb {
        Aabb {
            min: center - Vec2::splat(radius),
            max: center + Vec2::splat(radius),
        }
    }

    #[inline]
    pub fn overlaps(&self, other: &Aabb) -> bool {
        self.min.x < other.max.x
            && self.max.x > other.min.x
            && self.min.y < other.max.y
            && self.max.y > other.min.y
    }

    #[inline]
    pub fn contains(&self, p: Vec2) -> bool {
        p.x > self.min.x && p.x < self.max.x && p.y > self.min.y && p.y < self.max.y
    }

    #[inline]
    pub fn combine(&self, other: &Aabb) -> Aabb {
        Aabb {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }
}

/// 2D segment with its delta and bounds cached; every traversal
/// re-reads both on the hot path.
#[derive(Clone, Copy, Debug)]
pub struct Seg2 {
    pub start: Vec2,
    pub end: Vec2,
    pub delta: Vec2,
    pub bounds: Aabb,
}

impl Seg2 {
    pub fn new(start: Vec2, end: Vec2) -> Seg2 {
        Seg2 {
            start,
            end,
            delta: end - start,
            bounds: Aabb::new(start.min(end), start.max(end)),
        }
    }

    #[inline]
    pub fn from_time(&self, t: f32) -> Vec2 {
        self.start + self.delta * t
    }

    /// Parametric time of a point known to lie on the segment.  Falls
    /// back to the Y axis when the segment is vertical within epsilon.
    pub fn to_time(&self, p: Vec2) -> f32 {
        if approx_zero(self.start.x - self.end.x) {
            return (p.y - self.start.y) / (self.end.y - self.start.y);
        }
        (p.x - self.start.x) / (self.end.x - self.start.x)
    }

    /// Proper crossing test via doubled triangle areas.  Collinear
    /// segments and endpoint touches do not count as intersections.
    /// Returns the parametric time on `self`.
    pub fn intersection(&self, other: &Seg2) -> Option<f32> {
        let (sx, sy) = (self.start.x, self.start.y);
        let (ex, ey) = (self.end.x, self.end.y);
        let (osx, osy) = (other.start.x, other.start.y);
        let (oex, oey) = (other.end.x, other.end.y);

        let area_start = ((sx - oex) * (ey - oey)) - ((sy - oey) * (ex - oex));
        let area_end = ((sx - osx) * (ey - osy)) - ((sy - osy) * (ex - osx));
        if area_start * area_end >= 0.0 {
            return None;
        }

        let area_this_start = ((osx - sx) * (oey - sy)) - ((osy - sy) * (oex - sx));
        let area_this_end = ((osx - ex) * (oey - ey)) - ((osy - ey) * (oex - ex));
        if area_this_start * area_this_end >= 0.0 {
            return None;
        }

        let t = area_this_start / (area_this_start - area_this_end);
        (0.0..=1.0).contains(&t).then_some(t)
    }

    /// True when the segment passes through the box.  Testing one
    /// diagonal is enough; which one depends on the slope sign.
    pub fn intersects_box(&self, b: &Aabb) -> bool {
        if self.bounds.min.x >= b.max.x
            || self.bounds.max.x <= b.min.x
            || self.bounds.min.y >= b.max.y
            || self.bounds.max.y <= b.min.y
        {
            return false;
        }

        let s = self.start;
        let d = self.delta;
        if (s.x < self.end.x) ^ (s.y < self.end.y) {
            (((d.x * (b.min.y - s.y)) - (d.y * (b.min.x - s.x))) < 0.0)
                != (((d.x * (b.max.y - s.y)) - (d.y * (b.max.x - s.x))) < 0.0)
        } else {
            (((d.x * (b.max.y - s.y)) - (d.y * (b.min.x - s.x))) < 0.0)
                != (((d.x * (b.min.y - s.y)) - (d.y * (b.max.x - s.x))) < 0.0)
        }
    }
}

/*--------------------------- lines ----------------------------------*/

bitflags! {
    #[derive(Debug, Clone, Copy)]
    pub struct LineFlags: u16 {
        const BLOCKING        = 0x0001;
        const BLOCK_MONSTERS  = 0x0002;
        const TWO_SIDED       = 0x0004;
        const UPPER_UNPEGGED  = 0x0010;
        const LOWER_UNPEGGED  = 0x0020;
        const SECRET          = 0x0040;
        const BLOCK_SOUND     = 0x0080;
        const NOT_ON_MAP      = 0x0200;
    }
}

#[derive(Clone, Debug)]
pub struct Line {
    pub id: LineId,
    pub seg: Seg2,
    pub flags: LineFlags,
    pub special: u16,
    pub front: SideId,
    pub back: Option<SideId>,
}

impl Line {
    pub fn new(
        id: LineId,
        start: Vec2,
        end: Vec2,
        flags: LineFlags,
        special: u16,
        front: SideId,
        back: Option<SideId>,
    ) -> Line {
        Line {
            id,
            seg: Seg2::new(start, end),
            flags,
            special,
            front,
            back,
        }
    }

    /// A line with no back side is a map boundary: opaque for sight and
    /// always blocking for movement.
    #[inline]
    pub fn one_sided(&self) -> bool {
        self.back.is_none()
    }

    #[inline]
    pub fn has_special(&self) -> bool {
        self.special != 0
    }
}

/*----------------------- sides / sectors ----------------------------*/

#[derive(Clone, Debug)]
pub struct Side {
    pub id: SideId,
    pub sector: SectorId,
    /// Owning line, filled in by `MapGeometry::new`.
    pub line: LineId,
    /// Set once the side is registered in the blockmap's dynamic lists;
    /// keeps re-registration idempotent.
    pub blockmap_linked: bool,
}

impl Side {
    pub fn new(id: SideId, sector: SectorId) -> Side {
        Side {
            id,
            sector,
            line: 0,
            blockmap_linked: false,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Sector {
    pub id: SectorId,
    pub floor_h: f32,
    pub ceil_h: f32,
}

/// A maximal connected region of one sector's floor/ceiling plane.
/// Registering islands instead of whole sectors keeps moving-geometry
/// membership tight on maps where a tagged sector spans half the map.
#[derive(Clone, Debug)]
pub struct SectorIsland {
    pub sector: SectorId,
    pub bounds: Aabb,
    /// Inaccessible helper geometry; never registered in the blockmap.
    pub is_monster_closet: bool,
    pub is_voodoo_closet: bool,
}

/*------------------------- map geometry -----------------------------*/

#[derive(Debug, Error)]
pub enum GeometryError {
    #[error("line {0} references missing side {1}")]
    MissingSide(LineId, SideId),
    #[error("side {0} references missing sector {1}")]
    MissingSector(SideId, SectorId),
    #[error("island {0} references missing sector {1}")]
    MissingIslandSector(usize, SectorId),
    #[error("{0} id {1} stored at index {2}")]
    IdMismatch(&'static str, u32, u32),
}

/// Immutable static map geometry, the blockmap's build-time input.
/// Ids double as indices; `new` validates every cross-reference up
/// front so the hot paths can index without checks.
#[derive(Debug, Default)]
pub struct MapGeometry {
    pub lines: Vec<Line>,
    pub sides: Vec<Side>,
    pub sectors: Vec<Sector>,
    pub islands: Vec<SectorIsland>,
    /// lookup: sector -> its islands
    pub sector_islands: Vec<SmallVec<[IslandId; 2]>>,
}

impl MapGeometry {
    pub fn new(
        lines: Vec<Line>,
        mut sides: Vec<Side>,
        sectors: Vec<Sector>,
        islands: Vec<SectorIsland>,
    ) -> Result<MapGeometry, GeometryError> {
        for (i, sector) in sectors.iter().enumerate() {
            if sector.id as usize != i {
                return Err(GeometryError::IdMismatch("sector", sector.id as u32, i as u32));
            }
        }
        for (i, side) in sides.iter().enumerate() {
            if side.id as usize != i {
                return Err(GeometryError::IdMismatch("side", side.id as u32, i as u32));
            }
            if side.sector as usize >= sectors.len() {
                return Err(GeometryError::MissingSector(side.id, side.sector));
            }
        }

        for (i, line) in lines.iter().enumerate() {
            if line.id as usize != i {
                return Err(GeometryError::IdMismatch("line", line.id as u32, i as u32));
            }
            for side in [Some(line.front), line.back].into_iter().flatten() {
                if side as usize >= sides.len() {
                    return Err(GeometryError::MissingSide(line.id, side));
                }
                sides[side as usize].line = line.id;
            }
        }

        let mut sector_islands: Vec<SmallVec<[IslandId; 2]>> =
            vec![SmallVec::new(); sectors.len()];
        for (i, island) in islands.iter().enumerate() {
            if island.sector as usize >= sectors.len() {
                return Err(GeometryError::MissingIslandSector(i, island.sector));
            }
            sector_islands[island.sector as usize].push(i as IslandId);
        }

        Ok(MapGeometry {
            lines,
            sides,
            sectors,
            islands,
            sector_islands,
        })
    }

    #[inline]
    pub fn front_sector(&self, line: &Line) -> SectorId {
        self.sides[line.front as usize].sector
    }

    #[inline]
    pub fn back_sector(&self, line: &Line) -> Option<SectorId> {
        line.back.map(|s| self.sides[s as usize].sector)
    }
}

/*=======================================================================*/
/*                                Tests                                  */
/*=======================================================================*/
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seg_intersection_crossing() {
        let a = Seg2::new(Vec2::new(0.0, 0.0), Vec2::new(10.0, 0.0));
        let b = Seg2::new(Vec2::new(5.0, -5.0), Vec2::new(5.0, 5.0));
        let t = a.intersection(&b).expect("segments cross");
        assert!((t - 0.5).abs() < 1e-6);
        assert!((a.from_time(t).x - 5.0).abs() < 1e-6);
    }

    #[test]
    fn seg_intersection_misses_parallel_and_collinear() {
        let a = Seg2::new(Vec2::new(0.0, 0.0), Vec2::new(10.0, 0.0));
        let parallel = Seg2::new(Vec2::new(0.0, 1.0), Vec2::new(10.0, 1.0));
        let collinear = Seg2::new(Vec2::new(2.0, 0.0), Vec2::new(8.0, 0.0));
        assert!(a.intersection(&parallel).is_none());
        assert!(a.intersection(&collinear).is_none());
    }

    #[test]
    fn seg_intersection_endpoint_touch_is_not_a_hit() {
        let a = Seg2::new(Vec2::new(0.0, 0.0), Vec2::new(10.0, 0.0));
        let touch = Seg2::new(Vec2::new(10.0, 0.0), Vec2::new(10.0, 5.0));
        assert!(a.intersection(&touch).is_none());
    }

    #[test]
    fn seg_to_time_vertical_uses_y() {
        let v = Seg2::new(Vec2::new(4.0, 0.0), Vec2::new(4.0, 8.0));
        assert!((v.to_time(Vec2::new(4.0, 2.0)) - 0.25).abs() < 1e-6);
    }

    #[test]
    fn seg_box_test() {
        let seg = Seg2::new(Vec2::new(-5.0, -5.0), Vec2::new(5.0, 5.0));
        assert!(seg.intersects_box(&Aabb::from_center_radius(Vec2::ZERO, 1.0)));
        assert!(!seg.intersects_box(&Aabb::from_center_radius(Vec2::new(10.0, 0.0), 1.0)));
    }

    #[test]
    fn geometry_validates_references() {
        let sides = vec![Side::new(0, 0)];
        let sectors = vec![Sector { id: 0, floor_h: 0.0, ceil_h: 128.0 }];
        let bad_line = vec![Line::new(
            0,
            Vec2::ZERO,
            Vec2::new(64.0, 0.0),
            LineFlags::BLOCKING,
            0,
            7,
            None,
        )];
        assert!(matches!(
            MapGeometry::new(bad_line, sides, sectors, Vec::new()),
            Err(GeometryError::MissingSide(0, 7))
        ));
    }

    #[test]
    fn geometry_backlinks_sides() {
        let sides = vec![Side::new(0, 0), Side::new(1, 0)];
        let sectors = vec![Sector { id: 0, floor_h: 0.0, ceil_h: 128.0 }];
        let lines = vec![
            Line::new(0, Vec2::ZERO, Vec2::new(64.0, 0.0), LineFlags::empty(), 0, 0, None),
            Line::new(1, Vec2::new(64.0, 0.0), Vec2::new(64.0, 64.0), LineFlags::empty(), 0, 1, None),
        ];
        let geometry = MapGeometry::new(lines, sides, sectors, Vec::new()).unwrap();
        assert_eq!(geometry.sides[1].line, 1);
    }
}
