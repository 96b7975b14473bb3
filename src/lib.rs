//! Uniform-grid spatial index for a Doom-style simulation.
//!
//! A map's line segments are rasterized into a cell grid once at load;
//! entities and moving sector regions re-register every tick.  All
//! collision, sight, hitscan, explosion, and interaction queries walk
//! only the cells they overlap instead of scanning the map.

pub mod sim;
pub mod world;
