//! # Environment Probe
//!
//! Stores the result of tracing sound rays in all directions around a world
//! position. Probes live in a [`crate::probe::ProbeCache`]; sound sources
//! within the reuse distance share one probe. Each probe additionally caches
//! computed listeners and blends between them while the listener moves.

use std::sync::Arc;

use glam::{DVec3, Vec3};

use crate::bands::BAND_COUNT;
use crate::config::SoundTracingConfig;
use crate::error::{AcousticsError, Result};
use crate::geometry::Bvh;
use crate::layer_mask::LayerMask;
use crate::probe::index::IndexSlot;
use crate::probe::params::{Attenuation, ListenerParameters, RoomParameters};
use crate::raytrace::{ParallelDispatcher, RayConfig, SoundRayList};

/// Cached listeners per probe before LRU replacement kicks in
const MAX_CACHED_LISTENERS: usize = 100;

const FLOAT_SAFE_EPSILON: f32 = 1e-6;

/// Listener parameters cached at a position local to the probe
#[derive(Debug, Clone)]
pub struct CachedListener {
    pub local_position: Vec3,
    pub last_used: u32,
    pub listener: ListenerParameters,
}

/// Immutable probe data needed by in-flight listen tasks
#[derive(Debug, Clone, Copy, Default)]
pub struct ProbeSnapshot {
    pub position: DVec3,
    pub range: f32,
    pub attenuation: Attenuation,
    pub ray_count: u32,
    pub opening_angle: f32,
    pub mean_free_path: f32,
    pub separation_time_first_late_reflection: f32,
    pub reverberation_time: [f32; BAND_COUNT],
    pub echo_delay: f32,
}

/// Environment probe
#[derive(Debug)]
pub struct EnvProbe {
    position: DVec3,
    range: f32,
    attenuation: Attenuation,
    layer_mask: LayerMask,
    rt_config: Option<Arc<SoundTracingConfig>>,

    room: RoomParameters,
    room_center: DVec3,
    sound_ray_list: Arc<SoundRayList>,
    ray_count: u32,
    ray_opening_angle: f32,

    listeners: Vec<CachedListener>,
    listener_range: f32,
    listener_tracking: u32,

    /// Only room parameters present, no ray list
    estimated: bool,
    last_used: u32,

    /// Slot in the cache's spatial index; `None` marks an invalid probe
    index_slot: Option<IndexSlot>,
}

impl EnvProbe {
    pub fn new(listener_range: f32) -> Self {
        Self {
            position: DVec3::ZERO,
            range: 0.0,
            attenuation: Attenuation::default(),
            layer_mask: LayerMask::ALL,
            rt_config: None,
            room: RoomParameters::default(),
            room_center: DVec3::ZERO,
            sound_ray_list: Arc::new(SoundRayList::new()),
            ray_count: 0,
            ray_opening_angle: 0.0,
            listeners: Vec::new(),
            listener_range,
            listener_tracking: 1,
            estimated: true,
            last_used: 0,
            index_slot: None,
        }
    }

    #[inline]
    pub fn position(&self) -> DVec3 {
        self.position
    }

    pub fn set_position(&mut self, position: DVec3) {
        self.position = position;
        self.invalidate_results();
    }

    #[inline]
    pub fn range(&self) -> f32 {
        self.range
    }

    pub fn set_range(&mut self, range: f32) {
        self.range = range;
        self.invalidate_results();
    }

    #[inline]
    pub fn attenuation(&self) -> Attenuation {
        self.attenuation
    }

    pub fn set_attenuation(&mut self, attenuation: Attenuation) {
        self.attenuation = attenuation;
        self.invalidate_results();
    }

    #[inline]
    pub fn layer_mask(&self) -> LayerMask {
        self.layer_mask
    }

    pub fn set_layer_mask(&mut self, layer_mask: LayerMask) {
        self.layer_mask = layer_mask;
        self.invalidate_results();
    }

    pub fn rt_config(&self) -> Option<&Arc<SoundTracingConfig>> {
        self.rt_config.as_ref()
    }

    pub fn set_rt_config(&mut self, config: Option<Arc<SoundTracingConfig>>) {
        self.rt_config = config;
        self.invalidate_results();
    }

    #[inline]
    pub fn min_extend(&self) -> DVec3 {
        self.room.min_extend
    }

    #[inline]
    pub fn max_extend(&self) -> DVec3 {
        self.room.max_extend
    }

    #[inline]
    pub fn room_center(&self) -> DVec3 {
        self.room_center
    }

    #[inline]
    pub fn room_parameters(&self) -> &RoomParameters {
        &self.room
    }

    #[inline]
    pub fn sound_ray_list(&self) -> &Arc<SoundRayList> {
        &self.sound_ray_list
    }

    #[inline]
    pub fn ray_count(&self) -> u32 {
        self.ray_count
    }

    #[inline]
    pub fn is_estimated(&self) -> bool {
        self.estimated
    }

    #[inline]
    pub fn last_used(&self) -> u32 {
        self.last_used
    }

    pub fn set_last_used(&mut self, last_used: u32) {
        self.last_used = last_used;
    }

    #[inline]
    pub fn index_slot(&self) -> Option<IndexSlot> {
        self.index_slot
    }

    pub fn set_index_slot(&mut self, slot: Option<IndexSlot>) {
        self.index_slot = slot;
    }

    #[inline]
    pub fn cached_listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Gain of the probe's attenuation curve at a distance
    #[inline]
    pub fn attenuated_gain(&self, distance: f32) -> f32 {
        self.attenuation.gain(distance)
    }

    /// Drop computed results, keeping the configuration
    pub fn invalidate_results(&mut self) {
        self.listeners.clear();
        self.room.min_extend = self.position;
        self.room.max_extend = self.position;
    }

    /// Probe data for in-flight tasks
    pub fn snapshot(&self) -> ProbeSnapshot {
        ProbeSnapshot {
            position: self.position,
            range: self.range,
            attenuation: self.attenuation,
            ray_count: self.ray_count,
            opening_angle: self.ray_opening_angle,
            mean_free_path: self.room.mean_free_path,
            separation_time_first_late_reflection: self
                .room
                .separation_time_first_late_reflection,
            reverberation_time: self.room.reverberation_time,
            echo_delay: self.room.echo_delay,
        }
    }

    /// Apply a finished room estimation
    pub fn apply_estimate(&mut self, room: RoomParameters, ray_config: &RayConfig) {
        self.room_center = (room.min_extend + room.max_extend) * 0.5;
        self.room = room;
        self.ray_count = ray_config.ray_count() as u32;
        self.ray_opening_angle = ray_config.opening_angle();
        self.sound_ray_list = Arc::new(SoundRayList::new());
        self.estimated = true;
    }

    /// Apply a finished full trace
    pub fn apply_trace(
        &mut self,
        room: RoomParameters,
        sound_ray_list: SoundRayList,
        ray_config: &RayConfig,
    ) {
        self.room_center = (room.min_extend + room.max_extend) * 0.5;
        self.room = room;
        self.ray_count = ray_config.ray_count() as u32;
        self.ray_opening_angle = ray_config.opening_angle();
        self.sound_ray_list = Arc::new(sound_ray_list);
        self.estimated = false;
    }

    /// Compute listener parameters at a position, blending cached listeners
    ///
    /// Cached listeners within twice the listener range contribute with a
    /// linear weight; a fresh listen pass runs only when none lies within
    /// the listener range itself. The impulse response is taken from the
    /// closest entry rather than blended.
    ///
    /// In listener-centric mode `listen_probe` carries the traced ray list
    /// and this probe may be estimated-only. Without a listen probe this
    /// probe must be fully traced.
    pub fn calc_listener(
        &mut self,
        listen_probe: Option<&EnvProbe>,
        position: DVec3,
        dispatcher: &ParallelDispatcher,
        bvh: &Arc<Bvh>,
    ) -> Result<ListenerParameters> {
        if listen_probe.is_none() && self.estimated {
            return Err(AcousticsError::StateViolation(
                "estimated probe cannot listen without a listen probe",
            ));
        }
        if let Some(probe) = listen_probe {
            if probe.estimated {
                return Err(AcousticsError::StateViolation(
                    "listen probe must be fully traced",
                ));
            }
        }

        let blend_range = self.listener_range * 2.0;
        let inv_blend_range = 0.5 / self.listener_range;
        let local_position = (position - self.position).as_vec3();

        self.listener_tracking = self.listener_tracking.wrapping_add(1);

        let mut listener = ListenerParameters::default();
        let mut listen_sum = 0.0f32;
        let mut create_listener = true;

        for cached in &mut self.listeners {
            let distance = (cached.local_position - local_position).length();
            if distance > blend_range {
                continue;
            }

            let scale = 1.0 - distance * inv_blend_range;
            listener.add_scaled(&cached.listener, scale);
            listen_sum += scale;
            cached.last_used = self.listener_tracking;

            if distance <= self.listener_range {
                create_listener = false;
            }
        }

        // blending impulse responses would smear arrival times; use the
        // closest cached one as-is
        if let Some(closest) = self.listeners.iter().min_by(|a, b| {
            let da = (a.local_position - local_position).length_squared();
            let db = (b.local_position - local_position).length_squared();
            da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
        }) {
            listener.impulse_response = closest.listener.impulse_response.clone();
        }

        if create_listener {
            let ray_list = match listen_probe {
                Some(probe) => probe.sound_ray_list.clone(),
                None => self.sound_ray_list.clone(),
            };

            let computed = dispatcher
                .listen_parts_async(
                    self.snapshot(),
                    listen_probe.map(|p| p.snapshot()),
                    ray_list,
                    position,
                    bvh,
                    self.layer_mask,
                )?
                .wait()?;

            // geometry changes anywhere inside the listen probe's extents can
            // redirect rays back to this listener, so adopt those extents
            if let Some(probe) = listen_probe {
                self.room.min_extend = probe.room.min_extend;
                self.room.max_extend = probe.room.max_extend;
            }

            let tracking = self.listener_tracking;
            let slot = if self.listeners.len() >= MAX_CACHED_LISTENERS {
                // replace the entry unused for the longest time
                let index = self
                    .listeners
                    .iter()
                    .enumerate()
                    .max_by_key(|(_, cached)| tracking.wrapping_sub(cached.last_used))
                    .map(|(i, _)| i)
                    .unwrap_or(0);
                &mut self.listeners[index]
            } else {
                self.listeners.push(CachedListener {
                    local_position,
                    last_used: tracking,
                    listener: ListenerParameters::default(),
                });
                let last = self.listeners.len() - 1;
                &mut self.listeners[last]
            };

            slot.local_position = local_position;
            slot.last_used = tracking;
            slot.listener = computed.clone();

            listener.impulse_response = computed.impulse_response.clone();
            listener.add_scaled(&computed, 1.0);
            listen_sum += 1.0;
        }

        if listen_sum > FLOAT_SAFE_EPSILON {
            listener.normalize(1.0 / listen_sum);
        }

        Ok(listener)
    }
}
