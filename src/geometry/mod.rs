//! # Scene Geometry
//!
//! Read-only geometry consumed by the tracing core:
//! - Two-level BVH over components and triangles
//! - Acoustic material properties per triangle
//! - Slab-test ray visitors (blocked / closest / all)
//!
//! The core never builds geometry from scene components itself; hosts hand it
//! a finished [`Bvh`]. The builder in [`bvh`] exists for hosts and tests.

pub mod bvh;
pub mod visitor;

pub use bvh::{Bvh, BvhBuilder};
pub use visitor::{ray_blocked, ray_hits_all, ray_hits_closest, FacingFilter, RayHit};

use std::sync::Arc;

use crate::bands::BAND_COUNT;

/// Acoustic material properties
///
/// Absorption and transmission are per band (low, mid, high). Transmission
/// decays linearly with traversed material thickness, reaching zero at
/// `transmission_range` meters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaterialProps {
    /// Absorption coefficient per band (0-1)
    pub absorption: [f32; BAND_COUNT],
    /// Transmission coefficient per band at zero thickness (0-1)
    pub transmission: [f32; BAND_COUNT],
    /// Thickness in meters at which transmission reaches zero
    pub transmission_range: f32,
}

/// Pre-defined materials
impl MaterialProps {
    pub fn stone() -> Self {
        Self {
            absorption: [0.01, 0.02, 0.02],
            transmission: [0.01, 0.01, 0.0],
            transmission_range: 0.1,
        }
    }

    pub fn concrete() -> Self {
        Self {
            absorption: [0.01, 0.02, 0.03],
            transmission: [0.0, 0.0, 0.0],
            transmission_range: 0.0,
        }
    }

    pub fn wood() -> Self {
        Self {
            absorption: [0.15, 0.10, 0.07],
            transmission: [0.10, 0.05, 0.03],
            transmission_range: 0.4,
        }
    }

    pub fn glass() -> Self {
        Self {
            absorption: [0.06, 0.03, 0.02],
            transmission: [0.40, 0.40, 0.30],
            transmission_range: 0.05,
        }
    }

    pub fn fabric() -> Self {
        Self {
            absorption: [0.30, 0.55, 0.70],
            transmission: [0.30, 0.20, 0.10],
            transmission_range: 0.2,
        }
    }

    /// Uniform absorber with no transmission, used by calibration tests
    pub fn uniform(absorption: f32) -> Self {
        Self {
            absorption: [absorption; BAND_COUNT],
            transmission: [0.0; BAND_COUNT],
            transmission_range: 0.0,
        }
    }
}

impl Default for MaterialProps {
    fn default() -> Self {
        Self::concrete()
    }
}

/// World geometry as seen by the tracing core.
///
/// The world owns the scene; the core only reads the finished BVH. Geometry
/// mutation must happen in a phase with no tracing task in flight.
pub trait WorldGeom: Send + Sync {
    /// Scene BVH, shared with in-flight tracing tasks
    fn bvh(&self) -> &Arc<Bvh>;
}

/// Minimal world wrapping a static BVH
pub struct StaticWorld {
    bvh: Arc<Bvh>,
}

impl StaticWorld {
    pub fn new(bvh: Bvh) -> Self {
        Self { bvh: Arc::new(bvh) }
    }
}

impl WorldGeom for StaticWorld {
    fn bvh(&self) -> &Arc<Bvh> {
        &self.bvh
    }
}
