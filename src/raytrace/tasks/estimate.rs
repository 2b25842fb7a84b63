//! # Room Estimate Task
//!
//! Stripped down single-bounce probing. Casts one ray, takes at most one hit
//! and accumulates the same partial sums as the full trace, minus the segment
//! chain. Used for cheap probes where only room parameters are needed.

use std::sync::Arc;

use glam::DVec3;
use parking_lot::{Mutex, MutexGuard};

use crate::bands::BAND_COUNT;
use crate::geometry::{ray_hits_closest, Bvh, FacingFilter};
use crate::layer_mask::LayerMask;
use crate::raytrace::tasks::{TaskCore, TracePartial};
use crate::raytrace::RayConfig;

/// Incidence cosine floor for the hit surface estimate
const MIN_HIT_COSINE: f32 = 0.5;

/// Inputs configured while the task rests in the ready pool
#[derive(Clone, Default)]
pub(crate) struct EstimateInput {
    pub bvh: Option<Arc<Bvh>>,
    pub ray_config: Option<Arc<RayConfig>>,
    pub position: DVec3,
    pub range: f32,
    pub layer_mask: LayerMask,
    pub first_ray: usize,
}

/// Parallel task estimating room parameters from one first-order hit
pub struct RoomEstimateTask {
    core: TaskCore,
    input: Mutex<EstimateInput>,
    output: Mutex<TracePartial>,
}

impl RoomEstimateTask {
    pub(crate) fn new() -> Self {
        Self {
            core: TaskCore::default(),
            input: Mutex::new(EstimateInput::default()),
            output: Mutex::new(TracePartial::default()),
        }
    }

    pub(crate) fn configure(&self, input: EstimateInput) {
        self.core.reset();
        *self.input.lock() = input;
    }

    pub(crate) fn cancel(&self) {
        self.core.cancel();
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.core.is_cancelled()
    }

    pub(crate) fn output(&self) -> MutexGuard<'_, TracePartial> {
        self.output.lock()
    }

    /// Worker entry point
    pub(crate) fn run(&self) {
        if self.core.is_cancelled() {
            return;
        }

        let input = self.input.lock().clone();
        let (Some(bvh), Some(ray_config)) = (input.bvh.clone(), input.ray_config.clone()) else {
            self.core.cancel();
            return;
        };

        let mut output = self.output.lock();
        output.reset(input.position);

        let direction = ray_config.directions()[input.first_ray];
        let cast = (direction * input.range).as_dvec3();

        let Some(hit) = ray_hits_closest(
            &bvh,
            input.layer_mask,
            input.position,
            cast,
            FacingFilter::ForwardOnly,
        ) else {
            // miss; the finish reducer folds missing rays in as full
            // absorbers at range
            return;
        };

        output.update_extends(bvh.to_world(hit.point));

        let material = bvh.material(hit.material);
        let cosine = (-direction.dot(hit.normal)).max(0.0);
        let area = hit.distance * hit.distance / cosine.max(MIN_HIT_COSINE);

        output.first_hit_count = 1;
        output.room_surface_sum = area;
        output.room_volume_sum = hit.distance * hit.distance * hit.distance;
        output.mean_free_path_sum = hit.distance;
        for b in 0..BAND_COUNT {
            output.sabine_sum[b] = area * material.absorption[b];
            output.absorption_sum[b] = material.absorption[b];
        }
        output.absorption_count = 1;
    }
}
