//! Shared scene construction for the scenario tests.
#![allow(dead_code)]

use glam::DVec3;

use acoustics_core::{Bvh, BvhBuilder, LayerMask, MaterialProps};

/// Add an axis aligned box with inward-facing triangles
pub fn add_box_mesh(builder: &mut BvhBuilder, center: DVec3, half: DVec3, mat: u16) {
    let c = center;
    let h = half;
    let vertices = [
        DVec3::new(c.x - h.x, c.y - h.y, c.z - h.z),
        DVec3::new(c.x + h.x, c.y - h.y, c.z - h.z),
        DVec3::new(c.x + h.x, c.y + h.y, c.z - h.z),
        DVec3::new(c.x - h.x, c.y + h.y, c.z - h.z),
        DVec3::new(c.x - h.x, c.y - h.y, c.z + h.z),
        DVec3::new(c.x + h.x, c.y - h.y, c.z + h.z),
        DVec3::new(c.x + h.x, c.y + h.y, c.z + h.z),
        DVec3::new(c.x - h.x, c.y + h.y, c.z + h.z),
    ];
    // wound so normals point into the box interior
    let triangles = [
        ([0u32, 5, 1], mat),
        ([0u32, 4, 5], mat),
        ([3, 2, 6], mat),
        ([3, 6, 7], mat),
        ([0, 1, 2], mat),
        ([0, 2, 3], mat),
        ([4, 7, 6], mat),
        ([4, 6, 5], mat),
        ([0, 3, 7], mat),
        ([0, 7, 4], mat),
        ([1, 5, 6], mat),
        ([1, 6, 2], mat),
    ];
    builder.add_mesh(&vertices, &triangles, LayerMask::ALL);
}

/// Closed box room with uniform absorption on all walls
pub fn closed_box(center: DVec3, half: DVec3, absorption: f32) -> Bvh {
    let mut builder = BvhBuilder::new(DVec3::ZERO);
    let mat = builder.add_material(MaterialProps::uniform(absorption));
    add_box_mesh(&mut builder, center, half, mat);
    builder.build()
}

/// Single ground plane at y=0, no walls
pub fn open_plane(absorption: f32) -> Bvh {
    let mut builder = BvhBuilder::new(DVec3::ZERO);
    let mat = builder.add_material(MaterialProps::uniform(absorption));
    let vertices = [
        DVec3::new(-300.0, 0.0, -300.0),
        DVec3::new(300.0, 0.0, -300.0),
        DVec3::new(300.0, 0.0, 300.0),
        DVec3::new(-300.0, 0.0, 300.0),
    ];
    // normal +Y
    let triangles = [([0u32, 2, 1], mat), ([0u32, 3, 2], mat)];
    builder.add_mesh(&vertices, &triangles, LayerMask::ALL);
    builder.build()
}

/// Double sided rectangular panel in the x = `x` plane
fn add_panel(
    builder: &mut BvhBuilder,
    x: f64,
    y_range: (f64, f64),
    z_range: (f64, f64),
    mat: u16,
) {
    let vertices = [
        DVec3::new(x, y_range.0, z_range.0),
        DVec3::new(x, y_range.1, z_range.0),
        DVec3::new(x, y_range.1, z_range.1),
        DVec3::new(x, y_range.0, z_range.1),
    ];
    let triangles = [
        // facing -X
        ([0u32, 2, 1], mat),
        ([0u32, 3, 2], mat),
        // facing +X
        ([0u32, 1, 2], mat),
        ([0u32, 2, 3], mat),
    ];
    builder.add_mesh(&vertices, &triangles, LayerMask::ALL);
}

/// Two 5x5x3 rooms sharing a divider at x=5
///
/// With `doorway` the divider leaves a 1m wide, 2m tall opening; without it
/// the divider seals room A off completely.
pub fn connected_rooms(doorway: bool, absorption: f32) -> Bvh {
    let mut builder = BvhBuilder::new(DVec3::ZERO);
    let mat = builder.add_material(MaterialProps::uniform(absorption));

    // outer shell spanning both rooms
    add_box_mesh(
        &mut builder,
        DVec3::new(5.0, 1.5, 2.5),
        DVec3::new(5.0, 1.5, 2.5),
        mat,
    );

    if doorway {
        // divider panels around a z in [2,3], y in [0,2] opening
        add_panel(&mut builder, 5.0, (0.0, 3.0), (0.0, 2.0), mat);
        add_panel(&mut builder, 5.0, (0.0, 3.0), (3.0, 5.0), mat);
        add_panel(&mut builder, 5.0, (2.0, 3.0), (2.0, 3.0), mat);
    } else {
        add_panel(&mut builder, 5.0, (0.0, 3.0), (0.0, 5.0), mat);
    }

    builder.build()
}
