//! # Ray Visitors
//!
//! Ray traversal over the scene BVH. Box rejection uses the three-slab method
//! with a precomputed inverse direction and per-axis enable flags so axis
//! aligned rays never divide by zero. Component leaves recurse into the mesh
//! sub-tree and run per-triangle tests.
//!
//! Three query shapes cover the hot loops: first-hit blocking, closest hit
//! and visit-all. Each is a thin monomorphized wrapper around the shared
//! traversal.

use glam::{DVec3, Vec3};

use crate::geometry::bvh::{Bvh, BvhMesh, BvhNode};
use crate::layer_mask::LayerMask;

const AXIS_EPSILON: f32 = 1e-6;

/// Margin added to the ray box used for quick leaf rejection
const RAY_BOX_MARGIN: f32 = 0.0005;

/// One triangle intersection along a ray
#[derive(Debug, Clone, Copy)]
pub struct RayHit {
    /// Distance from the ray origin in meters
    pub distance: f32,
    /// Hit point, BVH-local
    pub point: Vec3,
    /// Geometric surface normal (front-face winding)
    pub normal: Vec3,
    /// Material slot of the hit triangle
    pub material: u16,
    /// Component the triangle belongs to
    pub component: u32,
    /// True when the ray runs against the surface normal
    pub forward_facing: bool,
}

/// Facing classes a query can restrict itself to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FacingFilter {
    Any,
    ForwardOnly,
    BackwardOnly,
}

impl FacingFilter {
    #[inline]
    fn accepts(self, forward: bool) -> bool {
        match self {
            Self::Any => true,
            Self::ForwardOnly => forward,
            Self::BackwardOnly => !forward,
        }
    }
}

/// Shared per-ray state for slab and triangle tests
struct RayContext {
    origin: Vec3,
    target: Vec3,
    direction: Vec3,
    inv_direction: Vec3,
    check_axis: [bool; 3],
    length: f32,
}

impl RayContext {
    /// Ray from world-space origin along an unnormalized direction vector.
    /// The vector length is the tested range.
    fn new(bvh: &Bvh, origin: DVec3, direction: DVec3) -> Self {
        let origin = bvh.to_local(origin);
        let direction = direction.as_vec3();
        let target = origin + direction;

        let mut inv_direction = Vec3::ZERO;
        let check_axis = [
            direction.x.abs() > AXIS_EPSILON,
            direction.y.abs() > AXIS_EPSILON,
            direction.z.abs() > AXIS_EPSILON,
        ];
        if check_axis[0] {
            inv_direction.x = 1.0 / direction.x;
        }
        if check_axis[1] {
            inv_direction.y = 1.0 / direction.y;
        }
        if check_axis[2] {
            inv_direction.z = 1.0 / direction.z;
        }

        Self {
            origin,
            target,
            direction,
            inv_direction,
            check_axis,
            length: direction.length(),
        }
    }

    /// Three-slab ray/box test with endpoint containment early-out
    fn hits_box(&self, center: Vec3, half_extents: Vec3) -> bool {
        let point = self.origin - center;
        let margin = half_extents + Vec3::splat(RAY_BOX_MARGIN);
        if point.abs().cmple(margin).all() || (self.target - center).abs().cmple(margin).all() {
            return true;
        }

        for axis in 0..3 {
            if !self.check_axis[axis] {
                continue;
            }
            for side in [half_extents[axis], -half_extents[axis]] {
                let lambda = self.inv_direction[axis] * (side - point[axis]);
                if !(0.0..=1.0).contains(&lambda) {
                    continue;
                }
                let u = (axis + 1) % 3;
                let v = (axis + 2) % 3;
                let pu = point[u] + self.direction[u] * lambda;
                if pu < -half_extents[u] || pu > half_extents[u] {
                    continue;
                }
                let pv = point[v] + self.direction[v] * lambda;
                if pv >= -half_extents[v] && pv <= half_extents[v] {
                    return true;
                }
            }
        }
        false
    }

    /// Moeller-Trumbore test; lambda is relative to the full ray length
    fn intersect_triangle(&self, a: Vec3, b: Vec3, c: Vec3) -> Option<(f32, Vec3, bool)> {
        let edge1 = b - a;
        let edge2 = c - a;
        let pvec = self.direction.cross(edge2);
        let det = edge1.dot(pvec);
        if det.abs() < 1e-10 {
            return None;
        }

        let inv_det = 1.0 / det;
        let tvec = self.origin - a;
        let u = tvec.dot(pvec) * inv_det;
        if !(0.0..=1.0).contains(&u) {
            return None;
        }

        let qvec = tvec.cross(edge1);
        let v = self.direction.dot(qvec) * inv_det;
        if v < 0.0 || u + v > 1.0 {
            return None;
        }

        let lambda = edge2.dot(qvec) * inv_det;
        if !(0.0..=1.0).contains(&lambda) {
            return None;
        }

        let normal = edge1.cross(edge2).normalize();
        let forward_facing = self.direction.dot(normal) < 0.0;
        Some((lambda, normal, forward_facing))
    }
}

/// Traversal consumer; returning `false` stops the walk
trait HitConsumer {
    fn consume(&mut self, hit: RayHit) -> bool;
}

fn visit_node<C: HitConsumer>(
    bvh: &Bvh,
    ray: &RayContext,
    layer_mask: LayerMask,
    node: &BvhNode,
    consumer: &mut C,
) -> bool {
    if node.count > 0 {
        let first = node.first as usize;
        let count = node.count as usize;
        for &component_index in &bvh.component_indices()[first..first + count] {
            let component = &bvh.components()[component_index as usize];
            if !component.layer_mask.matches(layer_mask) {
                continue;
            }
            if !ray.hits_box(component.center, component.half_extents) {
                continue;
            }
            let mesh = bvh.mesh(component.mesh);
            if !visit_mesh(mesh, ray, component_index, consumer) {
                return false;
            }
        }
        return true;
    }

    let nodes = bvh.nodes();
    let child1 = &nodes[node.child1 as usize];
    if ray.hits_box(child1.center, child1.half_extents)
        && !visit_node(bvh, ray, layer_mask, child1, consumer)
    {
        return false;
    }
    let child2 = &nodes[node.child2 as usize];
    if ray.hits_box(child2.center, child2.half_extents)
        && !visit_node(bvh, ray, layer_mask, child2, consumer)
    {
        return false;
    }
    true
}

fn visit_mesh<C: HitConsumer>(
    mesh: &BvhMesh,
    ray: &RayContext,
    component: u32,
    consumer: &mut C,
) -> bool {
    visit_mesh_node(mesh, ray, &mesh.nodes[0], component, consumer)
}

fn visit_mesh_node<C: HitConsumer>(
    mesh: &BvhMesh,
    ray: &RayContext,
    node: &BvhNode,
    component: u32,
    consumer: &mut C,
) -> bool {
    if node.count > 0 {
        let first = node.first as usize;
        let count = node.count as usize;
        for &triangle_index in &mesh.triangle_indices[first..first + count] {
            let triangle = &mesh.triangles[triangle_index as usize];
            let a = mesh.vertices[triangle.vertices[0] as usize];
            let b = mesh.vertices[triangle.vertices[1] as usize];
            let c = mesh.vertices[triangle.vertices[2] as usize];

            if let Some((lambda, normal, forward_facing)) = ray.intersect_triangle(a, b, c) {
                let hit = RayHit {
                    distance: lambda * ray.length,
                    point: ray.origin + ray.direction * lambda,
                    normal,
                    material: triangle.material,
                    component,
                    forward_facing,
                };
                if !consumer.consume(hit) {
                    return false;
                }
            }
        }
        return true;
    }

    let child1 = &mesh.nodes[node.child1 as usize];
    if ray.hits_box(child1.center, child1.half_extents)
        && !visit_mesh_node(mesh, ray, child1, component, consumer)
    {
        return false;
    }
    let child2 = &mesh.nodes[node.child2 as usize];
    if ray.hits_box(child2.center, child2.half_extents)
        && !visit_mesh_node(mesh, ray, child2, component, consumer)
    {
        return false;
    }
    true
}

fn traverse<C: HitConsumer>(bvh: &Bvh, ray: &RayContext, layer_mask: LayerMask, consumer: &mut C) {
    let nodes = bvh.nodes();
    if nodes.is_empty() {
        return;
    }
    let root = &nodes[0];
    if ray.hits_box(root.center, root.half_extents) {
        visit_node(bvh, ray, layer_mask, root, consumer);
    }
}

struct BlockedConsumer {
    blocked: bool,
}

impl HitConsumer for BlockedConsumer {
    fn consume(&mut self, hit: RayHit) -> bool {
        if hit.forward_facing {
            self.blocked = true;
            return false;
        }
        true
    }
}

/// True if forward-facing geometry blocks the ray within the direction length
pub fn ray_blocked(bvh: &Bvh, layer_mask: LayerMask, origin: DVec3, direction: DVec3) -> bool {
    let ray = RayContext::new(bvh, origin, direction);
    if ray.length < AXIS_EPSILON {
        return false;
    }
    let mut consumer = BlockedConsumer { blocked: false };
    traverse(bvh, &ray, layer_mask, &mut consumer);
    consumer.blocked
}

struct ClosestConsumer {
    filter: FacingFilter,
    closest: Option<RayHit>,
}

impl HitConsumer for ClosestConsumer {
    fn consume(&mut self, hit: RayHit) -> bool {
        if self.filter.accepts(hit.forward_facing) {
            match &self.closest {
                Some(best) if best.distance <= hit.distance => {}
                _ => self.closest = Some(hit),
            }
        }
        true
    }
}

/// Closest hit matching the facing filter, if any within the direction length
pub fn ray_hits_closest(
    bvh: &Bvh,
    layer_mask: LayerMask,
    origin: DVec3,
    direction: DVec3,
    filter: FacingFilter,
) -> Option<RayHit> {
    let ray = RayContext::new(bvh, origin, direction);
    if ray.length < AXIS_EPSILON {
        return None;
    }
    let mut consumer = ClosestConsumer {
        filter,
        closest: None,
    };
    traverse(bvh, &ray, layer_mask, &mut consumer);
    consumer.closest
}

struct AllConsumer<'a, F: FnMut(&RayHit)> {
    callback: &'a mut F,
}

impl<F: FnMut(&RayHit)> HitConsumer for AllConsumer<'_, F> {
    fn consume(&mut self, hit: RayHit) -> bool {
        (self.callback)(&hit);
        true
    }
}

/// Invoke the callback for every hit along the ray, in traversal order
pub fn ray_hits_all<F: FnMut(&RayHit)>(
    bvh: &Bvh,
    layer_mask: LayerMask,
    origin: DVec3,
    direction: DVec3,
    callback: &mut F,
) {
    let ray = RayContext::new(bvh, origin, direction);
    if ray.length < AXIS_EPSILON {
        return;
    }
    let mut consumer = AllConsumer { callback };
    traverse(bvh, &ray, layer_mask, &mut consumer);
}
