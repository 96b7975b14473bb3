pub mod geometry;
pub mod grid;

pub use geometry::{
    Aabb, GeometryError, IslandId, Line, LineFlags, LineId, MapGeometry, Sector, SectorId,
    SectorIsland, Seg2, Side, SideId,
};

pub use grid::{BoxRange, GridIterationStatus, SegIter, UniformGrid};
