//! # Bounding Volume Hierarchy
//!
//! Read-only two-level BVH: a world tree over components, each component
//! holding a triangle mesh with its own sub-tree. Triangle positions are
//! stored single-precision, local to a double-precision origin, which keeps
//! float roundoff bounded for worlds far from the world origin.

use glam::{DVec3, Vec3};

use crate::geometry::MaterialProps;
use crate::layer_mask::LayerMask;

/// Sentinel for "no node"
pub(crate) const NO_NODE: u32 = u32::MAX;

/// Maximum components per world leaf
const MAX_LEAF_COMPONENTS: usize = 4;

/// Maximum triangles per mesh leaf
const MAX_LEAF_TRIANGLES: usize = 8;

/// Axis aligned box node, leaf when `count > 0`
#[derive(Debug, Clone, Copy)]
pub(crate) struct BvhNode {
    pub center: Vec3,
    pub half_extents: Vec3,
    /// First index into the item index table (leaf only)
    pub first: u32,
    /// Number of items (0 for interior nodes)
    pub count: u32,
    pub child1: u32,
    pub child2: u32,
}

/// One placed mesh instance in the world tree
#[derive(Debug, Clone, Copy)]
pub(crate) struct BvhComponent {
    pub center: Vec3,
    pub half_extents: Vec3,
    pub mesh: u32,
    pub layer_mask: LayerMask,
}

/// Triangle referencing mesh vertices and a material slot
#[derive(Debug, Clone, Copy)]
pub(crate) struct BvhTriangle {
    pub vertices: [u32; 3],
    pub material: u16,
}

/// Triangle mesh with its own sub-tree
#[derive(Debug)]
pub(crate) struct BvhMesh {
    pub vertices: Vec<Vec3>,
    pub triangles: Vec<BvhTriangle>,
    pub nodes: Vec<BvhNode>,
    pub triangle_indices: Vec<u32>,
}

/// Read-only scene BVH
///
/// Built once by the host (or [`BvhBuilder`] in tests) and shared immutably
/// with tracing tasks. Any geometry change requires building a new tree.
#[derive(Debug)]
pub struct Bvh {
    origin: DVec3,
    nodes: Vec<BvhNode>,
    component_indices: Vec<u32>,
    components: Vec<BvhComponent>,
    meshes: Vec<BvhMesh>,
    materials: Vec<MaterialProps>,
}

impl Bvh {
    /// World origin the local coordinates are relative to
    #[inline]
    pub fn origin(&self) -> DVec3 {
        self.origin
    }

    /// World position converted to tree-local single precision
    #[inline]
    pub fn to_local(&self, position: DVec3) -> Vec3 {
        (position - self.origin).as_vec3()
    }

    /// Tree-local position converted back to world space
    #[inline]
    pub fn to_world(&self, position: Vec3) -> DVec3 {
        self.origin + position.as_dvec3()
    }

    /// Number of placed components
    pub fn component_count(&self) -> usize {
        self.components.len()
    }

    /// Total triangle count across all meshes
    pub fn triangle_count(&self) -> usize {
        self.meshes.iter().map(|m| m.triangles.len()).sum()
    }

    /// Material for a triangle material slot
    #[inline]
    pub fn material(&self, index: u16) -> &MaterialProps {
        &self.materials[index as usize]
    }

    #[inline]
    pub(crate) fn nodes(&self) -> &[BvhNode] {
        &self.nodes
    }

    #[inline]
    pub(crate) fn components(&self) -> &[BvhComponent] {
        &self.components
    }

    #[inline]
    pub(crate) fn component_indices(&self) -> &[u32] {
        &self.component_indices
    }

    #[inline]
    pub(crate) fn mesh(&self, index: u32) -> &BvhMesh {
        &self.meshes[index as usize]
    }
}

/// Item reference used during construction
struct BuildItem {
    center: Vec3,
    min: Vec3,
    max: Vec3,
    index: u32,
}

/// BVH construction by recursive median split
pub struct BvhBuilder {
    origin: DVec3,
    components: Vec<BvhComponent>,
    meshes: Vec<BvhMesh>,
    materials: Vec<MaterialProps>,
}

impl BvhBuilder {
    pub fn new(origin: DVec3) -> Self {
        Self {
            origin,
            components: Vec::new(),
            meshes: Vec::new(),
            materials: Vec::new(),
        }
    }

    /// Register a material, returning its slot for triangle records
    pub fn add_material(&mut self, material: MaterialProps) -> u16 {
        self.materials.push(material);
        (self.materials.len() - 1) as u16
    }

    /// Add a placed triangle mesh
    ///
    /// Vertices are world-space; triangles are `(vertex indices, material slot)`.
    /// Winding determines the surface normal (counter-clockwise front face).
    pub fn add_mesh(
        &mut self,
        vertices: &[DVec3],
        triangles: &[([u32; 3], u16)],
        layer_mask: LayerMask,
    ) {
        if vertices.is_empty() || triangles.is_empty() {
            return;
        }

        let local: Vec<Vec3> = vertices
            .iter()
            .map(|v| (*v - self.origin).as_vec3())
            .collect();

        let tris: Vec<BvhTriangle> = triangles
            .iter()
            .map(|(v, m)| BvhTriangle {
                vertices: *v,
                material: *m,
            })
            .collect();

        // sub-tree over triangles
        let mut items: Vec<BuildItem> = tris
            .iter()
            .enumerate()
            .map(|(i, t)| {
                let a = local[t.vertices[0] as usize];
                let b = local[t.vertices[1] as usize];
                let c = local[t.vertices[2] as usize];
                let min = a.min(b).min(c);
                let max = a.max(b).max(c);
                BuildItem {
                    center: (min + max) * 0.5,
                    min,
                    max,
                    index: i as u32,
                }
            })
            .collect();

        let mut nodes = Vec::new();
        let mut indices = Vec::new();
        build_node(&mut items, &mut nodes, &mut indices, MAX_LEAF_TRIANGLES);

        // component box around the whole mesh
        let root = nodes[0];

        self.components.push(BvhComponent {
            center: root.center,
            half_extents: root.half_extents,
            mesh: self.meshes.len() as u32,
            layer_mask,
        });

        self.meshes.push(BvhMesh {
            vertices: local,
            triangles: tris,
            nodes,
            triangle_indices: indices,
        });
    }

    /// Build the final tree
    pub fn build(self) -> Bvh {
        let mut nodes = Vec::new();
        let mut component_indices = Vec::new();

        if !self.components.is_empty() {
            let mut items: Vec<BuildItem> = self
                .components
                .iter()
                .enumerate()
                .map(|(i, c)| BuildItem {
                    center: c.center,
                    min: c.center - c.half_extents,
                    max: c.center + c.half_extents,
                    index: i as u32,
                })
                .collect();

            build_node(
                &mut items,
                &mut nodes,
                &mut component_indices,
                MAX_LEAF_COMPONENTS,
            );
        }

        log::debug!(
            "bvh built: {} components, {} meshes, {} world nodes",
            self.components.len(),
            self.meshes.len(),
            nodes.len()
        );

        Bvh {
            origin: self.origin,
            nodes,
            component_indices,
            components: self.components,
            meshes: self.meshes,
            materials: self.materials,
        }
    }
}

/// Recursive median split over item boxes, returns the created node index
fn build_node(
    items: &mut [BuildItem],
    nodes: &mut Vec<BvhNode>,
    indices: &mut Vec<u32>,
    max_leaf: usize,
) -> u32 {
    let mut min = items[0].min;
    let mut max = items[0].max;
    for item in items.iter().skip(1) {
        min = min.min(item.min);
        max = max.max(item.max);
    }

    let node_index = nodes.len() as u32;
    nodes.push(BvhNode {
        center: (min + max) * 0.5,
        half_extents: (max - min) * 0.5,
        first: 0,
        count: 0,
        child1: NO_NODE,
        child2: NO_NODE,
    });

    if items.len() <= max_leaf {
        let first = indices.len() as u32;
        indices.extend(items.iter().map(|i| i.index));
        let node = &mut nodes[node_index as usize];
        node.first = first;
        node.count = items.len() as u32;
        return node_index;
    }

    // split along the widest axis at the center median
    let size = max - min;
    let axis = if size.x >= size.y && size.x >= size.z {
        0
    } else if size.y >= size.z {
        1
    } else {
        2
    };

    items.sort_unstable_by(|a, b| {
        a.center[axis]
            .partial_cmp(&b.center[axis])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mid = items.len() / 2;
    let (left, right) = items.split_at_mut(mid);
    let child1 = build_node(left, nodes, indices, max_leaf);
    let child2 = build_node(right, nodes, indices, max_leaf);

    let node = &mut nodes[node_index as usize];
    node.child1 = child1;
    node.child2 = child2;
    node_index
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad_mesh(builder: &mut BvhBuilder, y: f64, size: f64, material: u16) {
        let vertices = [
            DVec3::new(-size, y, -size),
            DVec3::new(size, y, -size),
            DVec3::new(size, y, size),
            DVec3::new(-size, y, size),
        ];
        // counter-clockwise seen from above, normal +Y
        let triangles = [([0u32, 2, 1], material), ([0u32, 3, 2], material)];
        builder.add_mesh(&vertices, &triangles, LayerMask::ALL);
    }

    #[test]
    fn test_builder_counts() {
        let mut builder = BvhBuilder::new(DVec3::ZERO);
        let mat = builder.add_material(MaterialProps::uniform(0.1));
        quad_mesh(&mut builder, 0.0, 10.0, mat);
        quad_mesh(&mut builder, 3.0, 10.0, mat);

        let bvh = builder.build();
        assert_eq!(bvh.component_count(), 2);
        assert_eq!(bvh.triangle_count(), 4);
        assert!(!bvh.nodes().is_empty());
    }

    #[test]
    fn test_local_conversion_around_origin() {
        let origin = DVec3::new(1000.0, 0.0, -500.0);
        let builder = BvhBuilder::new(origin);
        let bvh = builder.build();

        let world = DVec3::new(1001.5, 2.0, -499.0);
        let local = bvh.to_local(world);
        assert!((local - Vec3::new(1.5, 2.0, 1.0)).length() < 1e-5);
        assert!((bvh.to_world(local) - world).length() < 1e-4);
    }

    #[test]
    fn test_many_meshes_split_into_tree() {
        let mut builder = BvhBuilder::new(DVec3::ZERO);
        let mat = builder.add_material(MaterialProps::default());
        for i in 0..32 {
            quad_mesh(&mut builder, i as f64 * 5.0, 1.0, mat);
        }
        let bvh = builder.build();
        // more than one node means the split actually recursed
        assert!(bvh.nodes().len() > 1);
        assert_eq!(bvh.component_indices().len(), 32);
    }
}
