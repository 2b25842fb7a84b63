//! # Ray Trace Task
//!
//! Traces one sound ray through the scene, producing a segment chain with
//! per-band gains and absorption sums plus the partial room sums. Transmitted
//! child rays are traced depth-first through an explicit stack; each parent's
//! children occupy a contiguous block of the transmitted arena.

use std::sync::Arc;

use glam::{DVec3, Vec3};
use parking_lot::{Mutex, MutexGuard};

use crate::bands::{any_band_above, linear_step, BAND_COUNT};
use crate::config::SoundTracingConfig;
use crate::geometry::{ray_hits_closest, Bvh, FacingFilter, RayHit};
use crate::layer_mask::LayerMask;
use crate::probe::Attenuation;
use crate::raytrace::tasks::{TaskCore, TracePartial};

/// Offset applied when restarting a ray at a surface
const SURFACE_OFFSET: f32 = 1e-4;

/// Remaining range below which a ray is considered spent
const MIN_REMAINING_RANGE: f32 = 1e-3;

/// Incidence cosine floor for the first-hit surface estimate
const MIN_HIT_COSINE: f32 = 0.5;

/// Inputs configured while the task rests in the ready pool
#[derive(Clone, Default)]
pub(crate) struct TraceInput {
    pub bvh: Option<Arc<Bvh>>,
    pub config: Option<Arc<SoundTracingConfig>>,
    pub position: DVec3,
    pub range: f32,
    pub attenuation: Attenuation,
    /// Apply attenuation to stored gains (off for inverse ray tracing)
    pub use_attenuation: bool,
    pub layer_mask: LayerMask,
    pub first_ray: usize,
}

/// In-flight state of one ray or transmitted child
#[derive(Clone, Copy)]
struct PendingRay {
    position: DVec3,
    direction: Vec3,
    /// Surface normal at the current segment origin, zero at the source
    normal: Vec3,
    distance: f32,
    bounces: u32,
    transmissions: u32,
    /// Per-band reflectivity/transmissivity product, attenuation excluded
    gain: [f32; BAND_COUNT],
    absorption_sum: [f32; BAND_COUNT],
}

/// Arena slot a pending ray writes into
#[derive(Clone, Copy)]
enum RaySlot {
    Primary(usize),
    Transmitted(usize),
}

/// Parallel task tracing one sound ray
pub struct RayTraceTask {
    core: TaskCore,
    input: Mutex<TraceInput>,
    output: Mutex<TracePartial>,
}

impl RayTraceTask {
    pub(crate) fn new() -> Self {
        Self {
            core: TaskCore::default(),
            input: Mutex::new(TraceInput::default()),
            output: Mutex::new(TracePartial::default()),
        }
    }

    pub(crate) fn configure(&self, input: TraceInput) {
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
        let (Some(bvh), Some(config)) = (input.bvh.clone(), input.config.clone()) else {
            self.core.cancel();
            return;
        };

        let mut output = self.output.lock();
        output.reset(input.position);

        let direction = config.ray_config.directions()[input.first_ray];
        trace_ray(&bvh, &input, &config, direction, &mut output);
    }
}

/// Trace the primary ray and all transmitted descendants
fn trace_ray(
    bvh: &Bvh,
    input: &TraceInput,
    config: &SoundTracingConfig,
    direction: Vec3,
    output: &mut TracePartial,
) {
    let primary = PendingRay {
        position: input.position,
        direction,
        normal: Vec3::ZERO,
        distance: 0.0,
        bounces: 0,
        transmissions: 0,
        gain: [1.0; BAND_COUNT],
        absorption_sum: [0.0; BAND_COUNT],
    };

    let ray_index = output.ray_list.add_ray();

    let mut stack: Vec<(RaySlot, PendingRay)> = Vec::new();
    trace_segments(
        bvh,
        input,
        config,
        RaySlot::Primary(ray_index),
        primary,
        output,
        &mut stack,
    );

    while let Some((slot, state)) = stack.pop() {
        trace_segments(bvh, input, config, slot, state, output, &mut stack);
    }

    // very short rays without any interaction carry no information
    let ray = output.ray_list.ray(ray_index);
    if ray.segment_count == 1 && ray.transmitted_count == 0 && !ray.outside {
        let segment = output.ray_list.segment(ray.first_segment as usize);
        if segment.bounce_count == 0 && segment.length < config.add_ray_min_length {
            output.ray_list.clear();
        }
    }
}

/// Walk one ray's segment chain, queueing transmitted children
fn trace_segments(
    bvh: &Bvh,
    input: &TraceInput,
    config: &SoundTracingConfig,
    slot: RaySlot,
    state: PendingRay,
    output: &mut TracePartial,
    stack: &mut Vec<(RaySlot, PendingRay)>,
) {
    let first_segment = output.ray_list.segment_count() as u32;
    let mut segment_count = 0u32;
    let mut outside = false;
    let mut children: Vec<PendingRay> = Vec::new();

    let mut ray = state;

    loop {
        let remaining = input.range - ray.distance;
        if remaining <= MIN_REMAINING_RANGE {
            break;
        }

        let cast = (ray.direction * remaining).as_dvec3();
        let hit = ray_hits_closest(
            bvh,
            input.layer_mask,
            ray.position,
            cast,
            FacingFilter::ForwardOnly,
        );

        match hit {
            None => {
                // escaped into free space; keep a final segment so listeners
                // can bound reverberation for open environments
                push_segment(output, input, &ray, remaining);
                segment_count += 1;
                output.mean_free_path_sum += remaining;
                output.update_extends(ray.position + cast);
                outside = true;
                break;
            }
            Some(hit) => {
                let hit_world = bvh.to_world(hit.point);
                output.update_extends(hit_world);

                let material = *bvh.material(hit.material);
                let cosine = (-ray.direction.dot(hit.normal)).max(0.0);

                // first order hits feed the room shape estimate
                if ray.bounces == 0 && matches!(slot, RaySlot::Primary(_)) {
                    let area = hit.distance * hit.distance / cosine.max(MIN_HIT_COSINE);
                    output.first_hit_count += 1;
                    output.room_surface_sum += area;
                    output.room_volume_sum += hit.distance * hit.distance * hit.distance;
                    for b in 0..BAND_COUNT {
                        output.sabine_sum[b] += area * material.absorption[b];
                    }
                }

                push_segment(output, input, &ray, hit.distance);
                segment_count += 1;
                output.mean_free_path_sum += hit.distance;

                for b in 0..BAND_COUNT {
                    output.absorption_sum[b] += material.absorption[b];
                }
                output.absorption_count += 1;

                // energy split at the surface
                let transmission = transmission_factors(bvh, input, &material, &hit, &ray);
                let mut reflected = [0.0f32; BAND_COUNT];
                let mut transmitted = [0.0f32; BAND_COUNT];
                for b in 0..BAND_COUNT {
                    let passthrough = 1.0 - material.absorption[b];
                    reflected[b] = ray.gain[b] * (passthrough - transmission[b]).max(0.0);
                    transmitted[b] = ray.gain[b] * transmission[b];
                }

                let hit_distance = ray.distance + hit.distance;

                // spawn transmitted child continuing straight through
                if ray.transmissions < config.max_transmit_count
                    && any_band_above(&transmitted, config.threshold_transmit)
                {
                    let mut absorption_sum = ray.absorption_sum;
                    for b in 0..BAND_COUNT {
                        absorption_sum[b] += material.absorption[b];
                    }
                    children.push(PendingRay {
                        position: hit_world + (ray.direction * SURFACE_OFFSET).as_dvec3(),
                        direction: ray.direction,
                        normal: -hit.normal,
                        distance: hit_distance,
                        bounces: ray.bounces,
                        transmissions: ray.transmissions + 1,
                        gain: transmitted,
                        absorption_sum,
                    });
                }

                // reflect or terminate
                if ray.bounces + 1 >= config.max_bounce_count
                    || !any_band_above(&reflected, config.threshold_reflect)
                {
                    break;
                }

                let reflected_dir =
                    ray.direction - hit.normal * (2.0 * ray.direction.dot(hit.normal));

                for b in 0..BAND_COUNT {
                    ray.absorption_sum[b] += material.absorption[b];
                }
                ray.position = hit_world + (hit.normal * SURFACE_OFFSET).as_dvec3();
                ray.direction = reflected_dir.normalize();
                ray.normal = hit.normal;
                ray.distance = hit_distance;
                ray.bounces += 1;
                ray.gain = reflected;
            }
        }
    }

    // close the ray record
    let transmitted_count = children.len() as u32;
    let first_transmitted = output.ray_list.transmitted_count() as u32;

    {
        let record = match slot {
            RaySlot::Primary(index) => output.ray_list.ray_mut(index),
            RaySlot::Transmitted(index) => output.ray_list.transmitted_ray_mut(index),
        };
        record.first_segment = first_segment;
        record.segment_count = segment_count;
        record.first_transmitted = first_transmitted;
        record.transmitted_count = transmitted_count;
        record.outside = outside;
    }

    // children occupy a contiguous block; trace them depth-first
    for child in children {
        let child_slot = output.ray_list.add_transmitted_ray();
        stack.push((RaySlot::Transmitted(child_slot), child));
    }
}

/// Store the segment the ray just completed
fn push_segment(output: &mut TracePartial, input: &TraceInput, ray: &PendingRay, length: f32) {
    let local = (ray.position - input.position).as_vec3();

    let mut gain = ray.gain;
    if input.use_attenuation {
        let attenuation = input.attenuation.gain(ray.distance);
        let energy = attenuation * attenuation;
        for value in &mut gain {
            *value *= energy;
        }
    }

    let index = output.ray_list.add_segment();
    let segment = output.ray_list.segment_mut(index);
    segment.position = local;
    segment.direction = ray.direction;
    segment.normal = ray.normal;
    segment.length = length;
    segment.distance = ray.distance;
    segment.gain = gain;
    segment.absorption_sum = ray.absorption_sum;
    segment.bounce_count = ray.bounces;
    segment.transmitted_count = ray.transmissions;
}

/// Per-band transmission after the distance decay test
///
/// Transmission falls off linearly with the thickness of material the ray
/// would traverse, reaching zero at the material's transmission range. The
/// thickness is measured by casting on to the exit face behind the surface.
fn transmission_factors(
    bvh: &Bvh,
    input: &TraceInput,
    material: &crate::geometry::MaterialProps,
    hit: &RayHit,
    ray: &PendingRay,
) -> [f32; BAND_COUNT] {
    let mut result = [0.0f32; BAND_COUNT];
    if material.transmission_range <= 0.0 || !any_band_above(&material.transmission, 0.0) {
        return result;
    }

    let hit_world = bvh.to_world(hit.point);
    let probe_origin = hit_world + (ray.direction * SURFACE_OFFSET).as_dvec3();
    let probe_length = material.transmission_range + SURFACE_OFFSET;

    let exit = ray_hits_closest(
        bvh,
        input.layer_mask,
        probe_origin,
        (ray.direction * probe_length).as_dvec3(),
        FacingFilter::BackwardOnly,
    );

    let Some(exit) = exit else {
        // no exit face within the transmission range: wall too thick
        return result;
    };

    let thickness = exit.distance;
    for b in 0..BAND_COUNT {
        let start = material.transmission[b].min(1.0 - material.absorption[b]);
        result[b] = linear_step(thickness, 0.0, material.transmission_range, start, 0.0);
    }
    result
}
