//! # Finish Reducers
//!
//! Reduce per-worker partials into the public result structs. Reduction
//! always runs in task-submission order, which fixes the floating point
//! summation order and makes results deterministic for identical inputs.

use std::sync::Arc;

use glam::Vec3;

use crate::bands::{BAND_COUNT, INV_SOUND_SPEED};
use crate::error::{AcousticsError, Result};
use crate::probe::{ListenerParameters, ProbeSnapshot, RoomParameters};
use crate::raytrace::tasks::estimate::RoomEstimateTask;
use crate::raytrace::tasks::listen::ListenTask;
use crate::raytrace::tasks::trace::RayTraceTask;
use crate::raytrace::tasks::TracePartial;
use crate::raytrace::{RayConfig, SoundRayList};

/// Reverberation time factor of the mean-free-path estimate
const RT60_FACTOR: f32 = 13.8;

/// Absorption clamp for the reverberation logarithm
const ABSORPTION_LOG_EPSILON: f32 = 1e-5;

/// First reflections travel this many mean free paths before counting as
/// late reverberation
const SEPARATION_MEAN_FREE_PATHS: f32 = 4.0;

/// Empirical ratio of reverberation delay to first reflection delay
const REVERB_DELAY_FACTOR: f32 = 1.5;

const FLOAT_SAFE_EPSILON: f32 = 1e-6;

/// Reduce trace task partials into room parameters and the merged ray list
pub(crate) fn reduce_trace(
    tasks: &[Arc<RayTraceTask>],
    ray_config: &RayConfig,
    range: f32,
) -> Result<(RoomParameters, SoundRayList)> {
    for task in tasks {
        if task.is_cancelled() {
            return Err(AcousticsError::TaskFailed);
        }
    }

    // exact reservation before the merge keeps the arena to one allocation
    let mut ray_count = 0;
    let mut segment_count = 0;
    let mut transmitted_count = 0;
    for task in tasks {
        let output = task.output();
        ray_count += output.ray_list.ray_count();
        segment_count += output.ray_list.segment_count();
        transmitted_count += output.ray_list.transmitted_count();
    }

    let mut sound_ray_list = SoundRayList::new();
    sound_ray_list.reserve(ray_count, segment_count, transmitted_count);

    let mut room = RoomParameters::default();
    let guards: Vec<_> = tasks.iter().map(|t| t.output()).collect();
    reduce_room_partials(
        &mut room,
        guards.iter().map(|g| &**g),
        Some(&mut sound_ray_list),
        ray_config,
        range,
    );

    Ok((room, sound_ray_list))
}

/// Reduce estimate task partials into room parameters
pub(crate) fn reduce_estimate(
    tasks: &[Arc<RoomEstimateTask>],
    ray_config: &RayConfig,
    range: f32,
) -> Result<RoomParameters> {
    for task in tasks {
        if task.is_cancelled() {
            return Err(AcousticsError::TaskFailed);
        }
    }

    let mut room = RoomParameters::default();
    let guards: Vec<_> = tasks.iter().map(|t| t.output()).collect();
    reduce_room_partials(
        &mut room,
        guards.iter().map(|g| &**g),
        None,
        ray_config,
        range,
    );
    Ok(room)
}

/// Shared trace/estimate reduction
fn reduce_room_partials<'a>(
    room: &mut RoomParameters,
    partials: impl Iterator<Item = &'a TracePartial>,
    mut sound_ray_list: Option<&mut SoundRayList>,
    ray_config: &RayConfig,
    range: f32,
) {
    let mut mean_free_path_sum = 0.0f32;
    let mut volume_sum = 0.0f32;
    let mut surface_sum = 0.0f32;
    let mut sabine_sum = [0.0f32; BAND_COUNT];
    let mut absorption_sum = [0.0f32; BAND_COUNT];
    let mut absorption_count = 0u32;
    let mut first_hit_count = 0u32;
    let mut segment_count = 0usize;
    let mut first = true;

    for partial in partials {
        if first {
            room.min_extend = partial.min_extend;
            room.max_extend = partial.max_extend;
            first = false;
        } else {
            room.min_extend = room.min_extend.min(partial.min_extend);
            room.max_extend = room.max_extend.max(partial.max_extend);
        }

        if let Some(list) = sound_ray_list.as_deref_mut() {
            list.append(&partial.ray_list);
        }
        segment_count += partial.ray_list.segment_count();

        mean_free_path_sum += partial.mean_free_path_sum;
        volume_sum += partial.room_volume_sum;
        surface_sum += partial.room_surface_sum;
        first_hit_count += partial.first_hit_count;
        absorption_count += partial.absorption_count;
        for b in 0..BAND_COUNT {
            sabine_sum[b] += partial.sabine_sum[b];
            absorption_sum[b] += partial.absorption_sum[b];
        }
    }

    // the estimate variant has no segments; its mean free path averages over
    // the sampled first hits instead
    let mean_free_path_count = if segment_count > 0 {
        segment_count as u32
    } else {
        absorption_count
    };
    room.mean_free_path = if mean_free_path_count > 0 {
        mean_free_path_sum / mean_free_path_count as f32
    } else {
        0.0
    };

    room.echo_delay = room.mean_free_path * INV_SOUND_SPEED;

    // rays that hit nothing count as hitting with absorption 1 at range
    let total_rays = ray_config.ray_count() as u32;
    if first_hit_count < total_rays {
        let miss_count = total_rays - first_hit_count;
        let factor = range * range * miss_count as f32;
        volume_sum += factor * range;
        for b in 0..BAND_COUNT {
            sabine_sum[b] += factor;
            absorption_sum[b] += miss_count as f32;
        }
        absorption_count += miss_count;
    }

    if absorption_count > 0 {
        let inv = 1.0 / absorption_count as f32;
        for b in 0..BAND_COUNT {
            room.avg_absorption[b] = absorption_sum[b] * inv;
        }
    }

    for b in 0..BAND_COUNT {
        room.sabine[b] = sabine_sum[b] * ray_config.ray_unit_surface();
    }
    room.room_surface = (surface_sum * ray_config.ray_unit_surface()).max(0.01);
    for b in 0..BAND_COUNT {
        room.room_absorption[b] = room.sabine[b] / room.room_surface;
    }
    room.room_volume = (volume_sum * ray_config.ray_unit_volume()).max(0.01);

    // the mean-free-path reverberation estimate stays stable at low ray
    // counts where the surface/volume based Sabine estimate does not
    let rt_factor = RT60_FACTOR * room.mean_free_path * -INV_SOUND_SPEED;
    for b in 0..BAND_COUNT {
        room.reverberation_time[b] = if room.avg_absorption[b] > FLOAT_SAFE_EPSILON {
            rt_factor / (1.0 - room.avg_absorption[b]).max(ABSORPTION_LOG_EPSILON).ln()
        } else {
            0.0
        };
    }

    // separation time from traversal count; depends only on traced
    // quantities, not on the unstable room volume
    room.separation_time_first_late_reflection =
        room.mean_free_path * INV_SOUND_SPEED * SEPARATION_MEAN_FREE_PATHS;
}

/// Context needed by the listen reduction besides the task outputs
pub(crate) struct ListenReduceContext {
    pub source: ProbeSnapshot,
    pub listen: Option<ProbeSnapshot>,
    pub listen_position: glam::DVec3,
}

/// Reduce listen task partials into listener parameters
pub(crate) fn reduce_listen(
    tasks: &[Arc<ListenTask>],
    context: &ListenReduceContext,
) -> Result<ListenerParameters> {
    for task in tasks {
        if task.is_cancelled() {
            return Err(AcousticsError::TaskFailed);
        }
    }

    let mut fr_min_distance = context.source.range;
    let mut fr_gain = [0.0f32; BAND_COUNT];
    let mut fr_pan = Vec3::ZERO;
    let mut fr_count = 0u32;

    let mut lr_gain = [0.0f32; BAND_COUNT];
    let mut lr_pan = Vec3::ZERO;

    let mut absorption = [0.0f32; BAND_COUNT];
    let mut absorption_count = 0u32;
    let mut mean_free_path = 0.0f32;
    let mut mean_free_path_count = 0u32;

    let mut limit_rev_time = [0.0f32; BAND_COUNT];
    let mut limit_rev_time_count = 0u32;
    let mut unlimit_rev_time_count = 0u32;

    let mut result = ListenerParameters::default();

    for task in tasks {
        let output = task.output();

        fr_min_distance = fr_min_distance.min(output.fr_min_distance);
        fr_pan += output.fr_pan;
        fr_count += output.fr_count;

        lr_pan += output.lr_pan;

        for b in 0..BAND_COUNT {
            fr_gain[b] += output.fr_gain[b];
            lr_gain[b] += output.lr_gain[b];
            absorption[b] += output.absorption_sum[b];
            limit_rev_time[b] += output.limit_rev_time_sum[b];
        }
        absorption_count += output.absorption_count;
        mean_free_path += output.mean_free_path_sum;
        mean_free_path_count += output.mean_free_path_count;
        limit_rev_time_count += output.limit_rev_time_count;
        unlimit_rev_time_count += output.unlimit_rev_time_count;

        result.impulse_response.insert_all(&output.impulse_response);
    }

    let frame_probe = context.listen.as_ref().unwrap_or(&context.source);
    let inv_ray_count = 1.0 / frame_probe.ray_count.max(1) as f32;

    result.impulse_response.scale(inv_ray_count);

    if absorption_count > 0 {
        let inv = 1.0 / absorption_count as f32;
        for b in 0..BAND_COUNT {
            absorption[b] *= inv;
        }
    }
    if mean_free_path_count > 0 {
        mean_free_path /= mean_free_path_count as f32;
    }

    // accumulated values are intensities; the reverberator wants pressure
    // amplitudes, and sound intensity level equals sound pressure level in
    // value, so the conversion collapses to a square root
    for b in 0..BAND_COUNT {
        result.reflected[b] = (fr_gain[b] * inv_ray_count).sqrt();
        result.reverberation_gain[b] = (lr_gain[b] * inv_ray_count).sqrt();
    }

    let direct_distance = (context.listen_position - context.source.position).length() as f32;
    let fr_min_delay = if fr_count > 0 {
        ((fr_min_distance - direct_distance) * INV_SOUND_SPEED).max(0.0)
    } else {
        0.0
    };
    result.reflection_delay = fr_min_delay;
    result.reflection_pan = fr_pan;

    result.reverberation_delay = fr_min_delay * REVERB_DELAY_FACTOR;
    result.reverberation_pan = lr_pan;

    if context.listen.is_some() {
        // listener-centric: rebuild the reverberation estimate from the ray
        // segments that actually reached this listener, so sources in
        // different rooms keep their own character
        result.echo_delay = mean_free_path * INV_SOUND_SPEED;
        let rt_factor = RT60_FACTOR * -result.echo_delay;
        for b in 0..BAND_COUNT {
            result.reverberation_time[b] = if absorption[b] > FLOAT_SAFE_EPSILON {
                rt_factor / (1.0 - absorption[b]).max(ABSORPTION_LOG_EPSILON).ln()
            } else {
                0.0
            };
        }
    } else {
        result.reverberation_time = context.source.reverberation_time;
        result.echo_delay = context.source.echo_delay;
    }

    // open space cap: rays leaving the range carry a slope-derived RT60;
    // averaging them against the mean-free-path estimate truncates the
    // reverberation outdoors and leaves closed rooms untouched
    let modify_count = limit_rev_time_count + unlimit_rev_time_count;
    if modify_count > 0 {
        let factor = 1.0 / modify_count as f32;
        for b in 0..BAND_COUNT {
            result.reverberation_time[b] = (limit_rev_time[b]
                + result.reverberation_time[b] * unlimit_rev_time_count as f32)
                * factor;
        }
    }

    Ok(result)
}
