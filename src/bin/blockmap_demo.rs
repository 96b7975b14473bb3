//! Console demo: build a small map, link a few things, fire queries.
//!
//! ```text
//! cargo run --bin blockmap_demo -- --dimension 32
//! ```

use anyhow::Result;
use clap::Parser;
use glam::Vec2;

use blockmap_rs::sim::{
    BLOCKMAP_DIMENSION, BlockMap, BlockmapTraverser, EntityFlags, EntityStore, NodePool,
    TraverseContext,
};
use blockmap_rs::world::{Aabb, Line, LineFlags, MapGeometry, Sector, SectorIsland, Seg2, Side};

#[derive(Parser)]
#[command(about = "Blockmap traversal demo on a synthetic map")]
struct Args {
    /// Cell edge length in map units.
    #[arg(long, default_value_t = BLOCKMAP_DIMENSION)]
    dimension: i32,

    /// Room edge length in map units.
    #[arg(long, default_value_t = 512.0)]
    room: f32,
}

fn build_map(room: f32) -> Result<MapGeometry> {
    let corners = [
        Vec2::new(0.0, 0.0),
        Vec2::new(room, 0.0),
        Vec2::new(room, room),
        Vec2::new(0.0, room),
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
    // Two-sided divider with a door special, halfway across.
    lines.push(Line::new(
        4,
        Vec2::new(room / 2.0, 0.0),
        Vec2::new(room / 2.0, room),
        LineFlags::TWO_SIDED,
        1,
        0,
        Some(1),
    ));

    let sides = vec![Side::new(0, 0), Side::new(1, 1)];
    let sectors = vec![
        Sector { id: 0, floor_h: 0.0, ceil_h: 128.0 },
        Sector { id: 1, floor_h: 0.0, ceil_h: 128.0 },
    ];
    let islands = vec![SectorIsland {
        sector: 1,
        bounds: Aabb::new(Vec2::new(room / 2.0, 0.0), Vec2::new(room, room)),
        is_monster_closet: false,
        is_voodoo_closet: false,
    }];

    Ok(MapGeometry::new(lines, sides, sectors, islands)?)
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut geometry = build_map(args.room)?;
    let mut blockmap = BlockMap::new(&geometry, args.dimension);
    println!(
        "grid: {}x{} cells of {} units, {} line projections",
        blockmap.grid.width,
        blockmap.grid.height,
        blockmap.grid.dimension,
        blockmap.block_lines.len()
    );

    let mut store = EntityStore::default();
    let mut ctx = TraverseContext::new(geometry.lines.len());
    let mut pool = NodePool::default();

    let shooter = store.spawn(
        Vec2::new(args.room * 0.125, args.room * 0.5),
        0.0,
        16.0,
        56.0,
        EntityFlags::SOLID | EntityFlags::SHOOTABLE,
    );
    let target = store.spawn(
        Vec2::new(args.room * 0.75, args.room * 0.5),
        0.0,
        20.0,
        56.0,
        EntityFlags::SOLID | EntityFlags::SHOOTABLE,
    );
    blockmap.link(&mut store, shooter, false);
    blockmap.link(&mut store, target, false);

    // The far half starts moving (a door sector).
    blockmap.link_dynamic_sector(&mut pool, &geometry, 1);
    blockmap.link_dynamic_side(&mut geometry, 1);
    println!("dynamic nodes live: {}", pool.live_count());

    let traverser = BlockmapTraverser::new(&blockmap);
    let aim = Seg2::new(store[shooter].pos, store[target].pos);

    let mut hits = Vec::new();
    let blocked = traverser.sight_traverse(&mut ctx, &aim, &mut hits);
    println!("sight to target: blocked={blocked}, {} crossings", hits.len());

    traverser.shoot_traverse(&mut ctx, &mut store, &aim, &mut hits);
    println!("hitscan along the same segment:");
    for hit in &hits {
        match (hit.line_slot(), hit.entity_id()) {
            (Some(slot), _) => {
                let line = &blockmap.block_lines[slot];
                println!(
                    "  t={:.3} line {} ({})",
                    hit.seg_time,
                    line.line_id,
                    if line.one_sided { "wall" } else { "two-sided" }
                );
            }
            (_, Some(id)) => println!("  t={:.3} entity {}", hit.seg_time, id.0),
            _ => unreachable!(),
        }
    }

    let reach = Seg2::new(
        store[shooter].pos,
        store[shooter].pos + Vec2::new(args.room, 0.0),
    );
    traverser.use_traverse(&mut ctx, &reach, &mut hits);
    let usable = hits.iter().filter_map(|h| h.line_slot()).find(|&s| blockmap.block_lines[s].has_special);
    match usable {
        Some(slot) => println!(
            "use reach finds special line {}",
            blockmap.block_lines[slot].line_id
        ),
        None => println!("nothing to use in reach"),
    }

    blockmap.clear(&mut pool);
    println!("after clear, dynamic nodes live: {}", pool.live_count());

    Ok(())
}
