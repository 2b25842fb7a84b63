//! Shared scene builders for unit tests.

use glam::DVec3;

use crate::geometry::{Bvh, BvhBuilder, MaterialProps};
use crate::layer_mask::LayerMask;

/// Add an axis aligned box with inward-facing triangles
pub(crate) fn add_box_mesh(builder: &mut BvhBuilder, center: DVec3, half: DVec3, mat: u16) {
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
        // floor (normal +Y)
        ([0u32, 5, 1], mat),
        ([0u32, 4, 5], mat),
        // ceiling (normal -Y)
        ([3, 2, 6], mat),
        ([3, 6, 7], mat),
        // -Z wall (normal +Z)
        ([0, 1, 2], mat),
        ([0, 2, 3], mat),
        // +Z wall (normal -Z)
        ([4, 7, 6], mat),
        ([4, 6, 5], mat),
        // -X wall (normal +X)
        ([0, 3, 7], mat),
        ([0, 7, 4], mat),
        // +X wall (normal -X)
        ([1, 5, 6], mat),
        ([1, 6, 2], mat),
    ];
    builder.add_mesh(&vertices, &triangles, LayerMask::ALL);
}

/// Closed box room with uniform absorption
pub(crate) fn build_box(center: DVec3, half: DVec3, absorption: f32) -> Bvh {
    let mut builder = BvhBuilder::new(DVec3::ZERO);
    let mat = builder.add_material(MaterialProps::uniform(absorption));
    add_box_mesh(&mut builder, center, half, mat);
    builder.build()
}

/// Single ground plane at y=0 with nothing else
pub(crate) fn build_ground_plane(absorption: f32) -> Bvh {
    let mut builder = BvhBuilder::new(DVec3::ZERO);
    let mat = builder.add_material(MaterialProps::uniform(absorption));
    let vertices = [
        DVec3::new(-200.0, 0.0, -200.0),
        DVec3::new(200.0, 0.0, -200.0),
        DVec3::new(200.0, 0.0, 200.0),
        DVec3::new(-200.0, 0.0, 200.0),
    ];
    // normal +Y
    let triangles = [([0u32, 2, 1], mat), ([0u32, 3, 2], mat)];
    builder.add_mesh(&vertices, &triangles, LayerMask::ALL);
    builder.build()
}
