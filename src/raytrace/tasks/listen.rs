//! # Listen Task
//!
//! Walks one traced ray with a sphere receiver centered on the listener and
//! accumulates per-band contributions, split into first and late reflections.
//!
//! The receiver model is fully diffuse: each segment origin re-radiates its
//! incoming energy over the half sphere in front of the hit face. A segment
//! contributes when the receiver lies in front of that face and no geometry
//! blocks the path between them.

use std::sync::Arc;

use glam::{DVec3, Vec3};
use parking_lot::{Mutex, MutexGuard};

use crate::bands::{max_band, BAND_COUNT, INV_SOUND_SPEED, SOUND_SPEED};
use crate::geometry::{ray_blocked, Bvh};
use crate::layer_mask::LayerMask;
use crate::probe::ProbeSnapshot;
use crate::raytrace::tasks::TaskCore;
use crate::raytrace::{ImpulseResponse, SoundRay, SoundRayList};

/// Receiver radius never collapses below this, meters
const MIN_RECEIVER_RADIUS: f32 = 0.01;

/// Intensity floor for the per-ray decay bookkeeping
const IMPINGE_FLOOR: f32 = 1e-6;

/// Inputs configured while the task rests in the ready pool
#[derive(Clone, Default)]
pub(crate) struct ListenInput {
    pub bvh: Option<Arc<Bvh>>,
    pub ray_list: Option<Arc<SoundRayList>>,
    pub source: ProbeSnapshot,
    pub listen: Option<ProbeSnapshot>,
    pub listen_position: DVec3,
    pub layer_mask: LayerMask,
    pub first_ray: usize,
    pub receiver_radius_scale: f32,
}

/// Per-task accumulators reduced by the listen finish
#[derive(Debug, Clone)]
pub(crate) struct ListenPartial {
    pub fr_sum_distance: f32,
    pub fr_min_distance: f32,
    pub fr_max_distance: f32,
    pub fr_gain: [f32; BAND_COUNT],
    pub fr_pan: Vec3,
    pub fr_pan_weight_sum: f32,
    pub fr_count: u32,

    pub lr_gain: [f32; BAND_COUNT],
    pub lr_pan: Vec3,
    pub lr_pan_weight_sum: f32,
    pub lr_count: u32,

    pub absorption_sum: [f32; BAND_COUNT],
    pub absorption_count: u32,
    pub mean_free_path_sum: f32,
    pub mean_free_path_count: u32,

    pub limit_rev_time_sum: [f32; BAND_COUNT],
    pub limit_rev_time_count: u32,
    pub unlimit_rev_time_count: u32,

    pub impulse_response: ImpulseResponse,
}

impl Default for ListenPartial {
    fn default() -> Self {
        Self {
            fr_sum_distance: 0.0,
            fr_min_distance: 0.0,
            fr_max_distance: 0.0,
            fr_gain: [0.0; BAND_COUNT],
            fr_pan: Vec3::ZERO,
            fr_pan_weight_sum: 0.0,
            fr_count: 0,
            lr_gain: [0.0; BAND_COUNT],
            lr_pan: Vec3::ZERO,
            lr_pan_weight_sum: 0.0,
            lr_count: 0,
            absorption_sum: [0.0; BAND_COUNT],
            absorption_count: 0,
            mean_free_path_sum: 0.0,
            mean_free_path_count: 0,
            limit_rev_time_sum: [0.0; BAND_COUNT],
            limit_rev_time_count: 0,
            unlimit_rev_time_count: 0,
            impulse_response: ImpulseResponse::new(),
        }
    }
}

impl ListenPartial {
    fn reset(&mut self, range: f32) {
        let impulse_response = std::mem::take(&mut self.impulse_response);
        *self = Self::default();
        self.impulse_response = impulse_response;
        self.impulse_response.clear();
        self.fr_min_distance = range;
    }
}

/// One recorded receiver crossing for the decay slope estimate
#[derive(Clone, Copy)]
struct Impinge {
    time: f32,
    gain: [f32; BAND_COUNT],
}

/// Geometry shared by all segments of one listen invocation
struct ReceiverFrame<'a> {
    bvh: &'a Bvh,
    ray_list: &'a SoundRayList,
    layer_mask: LayerMask,
    /// Receiver center, ray-list local
    target_position: Vec3,
    /// Receiver center, world
    target_position_world: DVec3,
    /// Position gains are measured against, ray-list local
    gain_position: Vec3,
    receiver_radius: f32,
    /// Path distance past which contributions count as late reflections
    sep_dist_first_late: f32,
    listener_centric: bool,
    source_attenuation: crate::probe::Attenuation,
}

/// Parallel task gathering one ray's listener contribution
pub struct ListenTask {
    core: TaskCore,
    input: Mutex<ListenInput>,
    output: Mutex<ListenPartial>,
}

impl ListenTask {
    pub(crate) fn new() -> Self {
        Self {
            core: TaskCore::default(),
            input: Mutex::new(ListenInput::default()),
            output: Mutex::new(ListenPartial::default()),
        }
    }

    pub(crate) fn configure(&self, input: ListenInput) {
        self.core.reset();
        *self.input.lock() = input;
    }

    pub(crate) fn cancel(&self) {
        self.core.cancel();
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.core.is_cancelled()
    }

    pub(crate) fn output(&self) -> MutexGuard<'_, ListenPartial> {
        self.output.lock()
    }

    /// Worker entry point
    pub(crate) fn run(&self) {
        if self.core.is_cancelled() {
            return;
        }

        let input = self.input.lock().clone();
        let (Some(bvh), Some(ray_list)) = (input.bvh.clone(), input.ray_list.clone()) else {
            self.core.cancel();
            return;
        };

        let mut output = self.output.lock();
        output.reset(input.source.range);

        if input.first_ray >= ray_list.ray_count() {
            return;
        }

        // the ray list belongs to the listen probe in listener-centric mode,
        // otherwise to the source probe; positions in it are local to that
        // probe's origin
        let frame_probe = input.listen.as_ref().unwrap_or(&input.source);

        // in listener-centric mode the rays were cast from the listener, so
        // the receiver sphere sits at the source
        let target_position_world = if input.listen.is_some() {
            input.source.position
        } else {
            input.listen_position
        };
        let target_position = (target_position_world - frame_probe.position).as_vec3();
        let gain_position = if input.listen.is_some() {
            (input.listen_position - frame_probe.position).as_vec3()
        } else {
            target_position
        };

        let direct_sound_distance =
            (input.listen_position - input.source.position).length() as f32;
        let sep_probe = input.listen.as_ref().unwrap_or(&input.source);
        let sep_dist_first_late = direct_sound_distance
            + sep_probe.separation_time_first_late_reflection * SOUND_SPEED;

        // r = meanFreePath * sqrt(2*pi/N) * scale. The radius explodes on
        // open planes where misses inflate the mean free path; the per-ray
        // decay cap below keeps the resulting reverberation bounded.
        let ray_count = frame_probe.ray_count.max(1);
        let receiver_radius = (frame_probe.mean_free_path
            * (2.0 * std::f32::consts::PI / ray_count as f32).sqrt()
            * input.receiver_radius_scale)
            .max(MIN_RECEIVER_RADIUS);

        let frame = ReceiverFrame {
            bvh: &bvh,
            ray_list: &ray_list,
            layer_mask: input.layer_mask,
            target_position,
            target_position_world,
            gain_position,
            receiver_radius,
            sep_dist_first_late,
            listener_centric: input.listen.is_some(),
            source_attenuation: input.source.attenuation,
        };

        walk_ray(&frame, ray_list.ray(input.first_ray), None, &mut output);
    }
}

/// Walk one ray's segments, then recurse into transmitted children
fn walk_ray(
    frame: &ReceiverFrame,
    ray: &SoundRay,
    first_impinge: Option<Impinge>,
    output: &mut ListenPartial,
) {
    let segments = frame.ray_list.segments_of(ray);
    let mut index_last_segment: Option<usize> = None;
    let mut local_first_impinge = first_impinge;
    let mut last_impinge = Impinge {
        time: 0.0,
        gain: [0.0; BAND_COUNT],
    };

    let initial_distance = segments.first().map_or(0.0, |s| s.distance);

    for (segment_index, segment) in segments.iter().enumerate() {
        let to_receiver = frame.target_position - segment.position;

        // receiver must lie in front of the hit face; the fade factor keeps
        // the gain from snapping when the receiver crosses the face
        let dist_to_face = segment.normal.dot(to_receiver);
        if dist_to_face <= 0.0 {
            continue;
        }
        let mut factor = (dist_to_face / frame.receiver_radius).min(1.0);

        if ray_blocked(
            frame.bvh,
            frame.layer_mask,
            frame.target_position_world,
            (-to_receiver).as_dvec3(),
        ) {
            continue;
        }

        let seg_tar_distance = to_receiver.length();
        let receive_distance = segment.distance + seg_tar_distance;

        // source-centric gains already carry the attenuation; listener-centric
        // rays apply the source curve here, squared for the energy convention
        if frame.listener_centric {
            let attenuation = frame.source_attenuation.gain(receive_distance);
            factor *= attenuation * attenuation;
        }

        let mut gain = [0.0f32; BAND_COUNT];
        for b in 0..BAND_COUNT {
            gain[b] = segment.gain[b] * factor;
        }

        if frame.listener_centric {
            // the direction from the receiver has to follow the initially
            // cast ray, not the path to the current segment
            let direction = segments[0].position - frame.gain_position;
            apply_indirect_gains(frame, segment.bounce_count, direction, receive_distance, gain, output);

            index_last_segment = Some(segment_index);
            last_impinge = Impinge {
                time: receive_distance * INV_SOUND_SPEED,
                gain: [
                    gain[0].max(IMPINGE_FLOOR),
                    gain[1].max(IMPINGE_FLOOR),
                    gain[2].max(IMPINGE_FLOOR),
                ],
            };
            if local_first_impinge.is_none() {
                local_first_impinge = Some(last_impinge);
            }
        } else {
            let direction = segment.position - frame.gain_position;
            apply_indirect_gains(frame, segment.bounce_count, direction, receive_distance, gain, output);
        }
    }

    // listener-centric bookkeeping from the last contributing segment; adding
    // it once per ray keeps early hits from outweighing later ones
    if let Some(last_index) = index_last_segment {
        let segment = &segments[last_index];

        for b in 0..BAND_COUNT {
            output.absorption_sum[b] += segment.absorption_sum[b];
        }
        output.absorption_count += segment.bounce_count;

        if ray.outside {
            output.mean_free_path_sum += segment.distance - initial_distance;
            output.mean_free_path_count += segment.bounce_count.saturating_sub(1);

            // the ray leaves the traced range and cannot feed the tail any
            // longer. A virtual RT60 through the first and last crossing
            // truncates the reverberation for open spaces.
            let mut limit_rev_time = [0.0f32; BAND_COUNT];
            if let Some(first) = local_first_impinge {
                let diff_time = last_impinge.time - first.time;
                if diff_time > 1e-3 {
                    for b in 0..BAND_COUNT {
                        let diff_power_db = -10.0 * (last_impinge.gain[b] / first.gain[b]).log10();
                        if diff_power_db > 1e-4 {
                            limit_rev_time[b] = diff_time * 60.0 / diff_power_db;
                        }
                    }
                }
            }
            for b in 0..BAND_COUNT {
                output.limit_rev_time_sum[b] += limit_rev_time[b];
            }
            output.limit_rev_time_count += 1;
        } else {
            output.mean_free_path_sum += segment.distance - initial_distance + segment.length;
            output.mean_free_path_count += segment.bounce_count;
            output.unlimit_rev_time_count += 1;
        }
    }

    let first_transmitted = ray.first_transmitted as usize;
    for i in 0..ray.transmitted_count as usize {
        walk_ray(
            frame,
            frame.ray_list.transmitted_ray(first_transmitted + i),
            local_first_impinge,
            output,
        );
    }
}

/// Classify one contribution as first or late reflection and accumulate
fn apply_indirect_gains(
    frame: &ReceiverFrame,
    bounces: u32,
    direction: Vec3,
    distance: f32,
    gain: [f32; BAND_COUNT],
    output: &mut ListenPartial,
) {
    let weight = max_band(&gain);

    if bounces > 1 && distance > frame.sep_dist_first_late {
        for b in 0..BAND_COUNT {
            output.lr_gain[b] += gain[b];
        }
        if direction.length_squared() > 1e-12 {
            output.lr_pan += direction.normalize() * weight;
        }
        output.lr_pan_weight_sum += weight;
        output.lr_count += 1;
    } else {
        output.fr_min_distance = output.fr_min_distance.min(distance);
        output.fr_max_distance = output.fr_max_distance.max(distance);
        output.fr_sum_distance += distance;

        for b in 0..BAND_COUNT {
            output.fr_gain[b] += gain[b];
        }
        if direction.length_squared() > 1e-12 {
            output.fr_pan += direction.normalize() * weight;
        }
        output.fr_pan_weight_sum += weight;
        output.fr_count += 1;
    }

    output
        .impulse_response
        .add(distance * INV_SOUND_SPEED, gain);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::Attenuation;

    fn snapshot(position: DVec3, mean_free_path: f32, ray_count: u32) -> ProbeSnapshot {
        ProbeSnapshot {
            position,
            range: 60.0,
            attenuation: Attenuation::default(),
            ray_count,
            opening_angle: 0.2,
            mean_free_path,
            separation_time_first_late_reflection: 4.0 * mean_free_path * INV_SOUND_SPEED,
            reverberation_time: [0.5; BAND_COUNT],
            echo_delay: mean_free_path * INV_SOUND_SPEED,
        }
    }

    /// One ray with two wall bounces inside an open arena list
    fn two_bounce_list() -> SoundRayList {
        let mut list = SoundRayList::new();
        let ray = list.add_ray();

        // source at origin, wall hit at x=5, second wall at x=-5
        let s0 = list.add_segment();
        {
            let segment = list.segment_mut(s0);
            segment.position = Vec3::ZERO;
            segment.direction = Vec3::X;
            segment.normal = Vec3::ZERO;
            segment.length = 5.0;
            segment.distance = 0.0;
            segment.bounce_count = 0;
        }
        let s1 = list.add_segment();
        {
            let segment = list.segment_mut(s1);
            segment.position = Vec3::new(5.0, 0.0, 0.0);
            segment.direction = -Vec3::X;
            segment.normal = -Vec3::X;
            segment.length = 10.0;
            segment.distance = 5.0;
            segment.gain = [0.9; BAND_COUNT];
            segment.absorption_sum = [0.1; BAND_COUNT];
            segment.bounce_count = 1;
        }
        let s2 = list.add_segment();
        {
            let segment = list.segment_mut(s2);
            segment.position = Vec3::new(-5.0, 0.0, 0.0);
            segment.direction = Vec3::X;
            segment.normal = Vec3::X;
            segment.length = 10.0;
            segment.distance = 15.0;
            segment.gain = [0.81; BAND_COUNT];
            segment.absorption_sum = [0.2; BAND_COUNT];
            segment.bounce_count = 2;
        }

        let record = list.ray_mut(ray);
        record.first_segment = s0 as u32;
        record.segment_count = 3;
        list
    }

    fn empty_bvh() -> Arc<Bvh> {
        Arc::new(crate::geometry::BvhBuilder::new(DVec3::ZERO).build())
    }

    #[test]
    fn test_source_centric_contributions() {
        let list = Arc::new(two_bounce_list());
        let task = ListenTask::new();
        task.configure(ListenInput {
            bvh: Some(empty_bvh()),
            ray_list: Some(list),
            source: snapshot(DVec3::ZERO, 6.0, 1),
            listen: None,
            listen_position: DVec3::new(2.0, 0.5, 0.0),
            layer_mask: LayerMask::ALL,
            first_ray: 0,
            receiver_radius_scale: 1.0,
        });
        task.run();

        let output = task.output();
        // first segment has no face normal and cannot contribute; both wall
        // segments face the receiver
        let contributions = output.fr_count + output.lr_count;
        assert_eq!(contributions, 2);
        assert_eq!(output.impulse_response.len(), 2);
        // distance and pan weight tracking follows the contributions
        assert!(output.fr_sum_distance > 0.0);
        assert!(output.fr_max_distance >= output.fr_min_distance);
        assert!(output.fr_pan_weight_sum > 0.0);
        assert!(output.lr_pan_weight_sum >= 0.0);
        // source-centric mode leaves the listener-centric sums untouched
        assert_eq!(output.absorption_count, 0);
        assert_eq!(output.mean_free_path_count, 0);
        // impulse times are path distance plus receiver offset over c
        let first = output.impulse_response.at(0);
        assert!(first.time > 0.0 && first.time < 0.2);
    }

    #[test]
    fn test_listener_centric_tracks_decay() {
        let list = Arc::new(two_bounce_list());
        let task = ListenTask::new();
        // rays were cast from the listener probe at the origin; the source
        // sits a little off to the side
        task.configure(ListenInput {
            bvh: Some(empty_bvh()),
            ray_list: Some(list),
            source: snapshot(DVec3::new(2.0, 0.5, 0.0), 6.0, 1),
            listen: Some(snapshot(DVec3::ZERO, 6.0, 1)),
            listen_position: DVec3::ZERO,
            layer_mask: LayerMask::ALL,
            first_ray: 0,
            receiver_radius_scale: 1.0,
        });
        task.run();

        let output = task.output();
        assert!(output.fr_count + output.lr_count > 0);
        // listener-centric mode accumulates the per-ray sums
        assert!(output.absorption_count > 0);
        assert_eq!(output.unlimit_rev_time_count, 1);
        assert_eq!(output.limit_rev_time_count, 0);
    }

    #[test]
    fn test_front_face_cull() {
        let mut list = two_bounce_list();
        // move the receiver behind both walls: no normals face it
        for i in 0..list.segment_count() {
            list.segment_mut(i).normal = Vec3::Y;
        }
        let task = ListenTask::new();
        task.configure(ListenInput {
            bvh: Some(empty_bvh()),
            ray_list: Some(Arc::new(list)),
            source: snapshot(DVec3::ZERO, 6.0, 1),
            listen: None,
            listen_position: DVec3::new(0.0, -3.0, 0.0),
            layer_mask: LayerMask::ALL,
            first_ray: 0,
            receiver_radius_scale: 1.0,
        });
        task.run();

        let output = task.output();
        assert_eq!(output.fr_count + output.lr_count, 0);
        assert!(output.impulse_response.is_empty());
    }
}
