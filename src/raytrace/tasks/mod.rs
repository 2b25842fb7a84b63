//! # Parallel Tasks
//!
//! Worker task objects executed on the engine worker pool. One task traces,
//! listens to or estimates a single ray; finish reducers fold the per-task
//! partials into the public result structs.
//!
//! Tasks are pooled and reused. Inputs are written while a task rests in the
//! ready pool; outputs are read by the finish reducer after all workers of an
//! invocation completed. A cancelled task returns immediately without
//! touching its outputs.

pub mod estimate;
pub mod finish;
pub mod listen;
pub mod trace;

use std::sync::atomic::{AtomicBool, Ordering};

use glam::DVec3;

use crate::bands::BAND_COUNT;
use crate::raytrace::SoundRayList;

/// Cancellation state shared by all task kinds
#[derive(Debug, Default)]
pub(crate) struct TaskCore {
    cancelled: AtomicBool,
}

impl TaskCore {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Re-arm before a new invocation
    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }
}

/// Partial sums produced by trace and estimate tasks
#[derive(Debug)]
pub(crate) struct TracePartial {
    pub min_extend: DVec3,
    pub max_extend: DVec3,
    pub ray_list: SoundRayList,
    pub mean_free_path_sum: f32,
    pub room_volume_sum: f32,
    pub room_surface_sum: f32,
    pub sabine_sum: [f32; BAND_COUNT],
    pub absorption_sum: [f32; BAND_COUNT],
    pub absorption_count: u32,
    pub first_hit_count: u32,
}

impl Default for TracePartial {
    fn default() -> Self {
        Self {
            min_extend: DVec3::ZERO,
            max_extend: DVec3::ZERO,
            ray_list: SoundRayList::new(),
            mean_free_path_sum: 0.0,
            room_volume_sum: 0.0,
            room_surface_sum: 0.0,
            sabine_sum: [0.0; BAND_COUNT],
            absorption_sum: [0.0; BAND_COUNT],
            absorption_count: 0,
            first_hit_count: 0,
        }
    }
}

impl TracePartial {
    /// Reset for a new run, keeping the ray list capacity
    pub fn reset(&mut self, position: DVec3) {
        self.min_extend = position;
        self.max_extend = position;
        self.ray_list.clear();
        self.mean_free_path_sum = 0.0;
        self.room_volume_sum = 0.0;
        self.room_surface_sum = 0.0;
        self.sabine_sum = [0.0; BAND_COUNT];
        self.absorption_sum = [0.0; BAND_COUNT];
        self.absorption_count = 0;
        self.first_hit_count = 0;
    }

    /// Grow the hit point box
    pub fn update_extends(&mut self, position: DVec3) {
        self.min_extend = self.min_extend.min(position);
        self.max_extend = self.max_extend.max(position);
    }
}
