//! # Probe Cache
//!
//! Spatially indexed cache of environment probes. Queries inside the reuse
//! distance return a cached probe; misses trace (or estimate) a new one,
//! reusing invalid probe slots first and evicting by age at capacity.
//!
//! Mutations are expected to be serialized by the caller; the cache itself
//! holds no locks.

use std::sync::Arc;

use glam::DVec3;
use slotmap::{new_key_type, SlotMap};

use crate::config::{EngineConfig, SoundTracingConfig};
use crate::error::{AcousticsError, Result};
use crate::geometry::WorldGeom;
use crate::layer_mask::LayerMask;
use crate::probe::env_probe::EnvProbe;
use crate::probe::index::ProbeIndex;
use crate::probe::params::Attenuation;
use crate::raytrace::{ParallelDispatcher, RayConfig};

new_key_type! {
    /// Dense key of a probe inside its cache
    pub struct ProbeKey;
}

/// Collaborators a cache operation needs from the engine
pub struct CacheContext<'a> {
    pub dispatcher: &'a ParallelDispatcher,
    pub world: &'a dyn WorldGeom,
    /// Direction set used for estimation probes
    pub estimate_config: &'a Arc<RayConfig>,
}

/// Spatially indexed environment probe cache
pub struct ProbeCache {
    probes: SlotMap<ProbeKey, EnvProbe>,
    index: ProbeIndex,

    range: f32,
    attenuation: Attenuation,
    layer_mask: LayerMask,
    rt_config: Option<Arc<SoundTracingConfig>>,
    listener_range: f32,

    reuse_distance_squared: f64,
    max_probe_count: usize,
    last_used_counter: u32,
}

impl ProbeCache {
    pub fn new(config: &EngineConfig) -> Self {
        let reuse_distance = config.reuse_distance as f64;
        log::info!(
            "Probe cache created: reuse={:.2}m maxProbes={}",
            reuse_distance,
            config.max_probe_count
        );

        Self {
            probes: SlotMap::with_key(),
            index: ProbeIndex::new(),
            range: 0.0,
            attenuation: Attenuation::default(),
            layer_mask: LayerMask::ALL,
            rt_config: None,
            listener_range: config.listener_range,
            reuse_distance_squared: reuse_distance * reuse_distance,
            max_probe_count: config.max_probe_count as usize,
            last_used_counter: 1,
        }
    }

    pub fn set_range(&mut self, range: f32) {
        self.invalidate_all();
        self.range = range;
    }

    pub fn set_attenuation(&mut self, attenuation: Attenuation) {
        self.invalidate_all();
        self.attenuation = attenuation;
    }

    pub fn set_layer_mask(&mut self, layer_mask: LayerMask) {
        self.invalidate_all();
        self.layer_mask = layer_mask;
    }

    pub fn set_rt_config(&mut self, config: Option<Arc<SoundTracingConfig>>) {
        self.invalidate_all();
        self.rt_config = config;
    }

    /// Bump the frame counter used for probe aging
    pub fn prepare_frame(&mut self) {
        self.last_used_counter = self.last_used_counter.wrapping_add(1);
    }

    #[inline]
    pub fn probe(&self, key: ProbeKey) -> Option<&EnvProbe> {
        self.probes.get(key)
    }

    #[inline]
    pub fn probe_mut(&mut self, key: ProbeKey) -> Option<&mut EnvProbe> {
        self.probes.get_mut(key)
    }

    pub fn probe_count(&self) -> usize {
        self.probes.len()
    }

    pub fn valid_probe_count(&self) -> usize {
        self.probes.values().filter(|p| p.index_slot().is_some()).count()
    }

    /// Probe with a full ray trace at the position, reusing within the reuse
    /// distance. Estimated-only probes in range are upgraded in place.
    pub fn probe_for_tracing(&mut self, position: DVec3, context: &CacheContext) -> Result<ProbeKey> {
        let best = self.find_best(position);

        if let Some(key) = best {
            if self.probes[key].is_estimated() {
                // upgrade: a trace changes the extents, so the probe has to
                // leave and re-enter the index
                self.remove_from_index(key);
                let probe = &mut self.probes[key];
                probe.invalidate_results();
                probe.set_attenuation(self.attenuation);
                probe.set_layer_mask(self.layer_mask);
                probe.set_rt_config(self.rt_config.clone());
                probe.set_last_used(self.last_used_counter);
                self.trace_probe(key, context)?;
                self.insert_into_index(key);
            } else {
                self.probes[key].set_last_used(self.last_used_counter);
            }
            return Ok(key);
        }

        let key = self.claim_slot(position)?;
        self.trace_probe(key, context)?;
        self.insert_into_index(key);
        Ok(key)
    }

    /// Probe with at least estimated room parameters at the position. Any
    /// valid probe in range qualifies, fully traced ones included.
    pub fn probe_for_estimate(
        &mut self,
        position: DVec3,
        context: &CacheContext,
    ) -> Result<ProbeKey> {
        if let Some(key) = self.find_best(position) {
            self.probes[key].set_last_used(self.last_used_counter);
            return Ok(key);
        }

        let key = self.claim_slot(position)?;
        self.estimate_probe(key, context)?;
        self.insert_into_index(key);
        Ok(key)
    }

    /// Invalidate probes overlapping a changed geometry region
    ///
    /// Invalidated probes stay in the pool for reuse; only the index entry
    /// and the sentinel slot are cleared.
    pub fn invalidate_inside(&mut self, min_extend: DVec3, max_extend: DVec3, layer_mask: LayerMask) {
        let mut hits = Vec::new();
        self.index
            .query_overlap(min_extend, max_extend, layer_mask, |key| hits.push(key));

        log::debug!(
            "invalidate_inside: region=({:.1},{:.1},{:.1})..({:.1},{:.1},{:.1}) probes={}",
            min_extend.x,
            min_extend.y,
            min_extend.z,
            max_extend.x,
            max_extend.y,
            max_extend.z,
            hits.len()
        );

        for key in hits {
            self.remove_from_index(key);
            if let Some(probe) = self.probes.get_mut(key) {
                probe.invalidate_results();
            }
        }
    }

    /// Invalidate every probe
    pub fn invalidate_all(&mut self) {
        for probe in self.probes.values_mut() {
            if probe.index_slot().is_some() {
                probe.set_index_slot(None);
                probe.invalidate_results();
            }
        }
        self.index.clear();
    }

    /// World teardown path: clear the sentinels without index removal; the
    /// index dies with the cache anyway
    pub fn prepare_quick_dispose(&mut self) {
        for probe in self.probes.values_mut() {
            probe.set_index_slot(None);
        }
    }

    // ------------------------------------------------------------------

    /// Closest valid probe within the reuse distance
    ///
    /// Estimated probes qualify too; the tracing query upgrades the returned
    /// candidate in place when it is estimated-only.
    fn find_best(&self, position: DVec3) -> Option<ProbeKey> {
        let mut best: Option<(ProbeKey, f64)> = None;

        for (key, probe) in &self.probes {
            if probe.index_slot().is_none() {
                continue;
            }
            let distance_squared = (probe.position() - position).length_squared();
            if distance_squared > self.reuse_distance_squared {
                continue;
            }
            if let Some((_, best_distance)) = best {
                if distance_squared >= best_distance {
                    continue;
                }
            }
            best = Some((key, distance_squared));
        }

        best.map(|(key, _)| key)
    }

    /// Find a slot for a new probe: reuse an invalid one, evict by age at
    /// capacity, or allocate
    fn claim_slot(&mut self, position: DVec3) -> Result<ProbeKey> {
        // reuse the first invalid probe if present
        let invalid = self
            .probes
            .iter()
            .find(|(_, probe)| probe.index_slot().is_none())
            .map(|(key, _)| key);
        if let Some(key) = invalid {
            let counter = self.last_used_counter;
            let probe = &mut self.probes[key];
            probe.set_position(position);
            probe.set_range(self.range);
            probe.set_attenuation(self.attenuation);
            probe.set_layer_mask(self.layer_mask);
            probe.set_rt_config(self.rt_config.clone());
            probe.set_last_used(counter);
            return Ok(key);
        }

        // at capacity: evict the probe unused for the longest time
        if self.probes.len() >= self.max_probe_count {
            let counter = self.last_used_counter;
            let oldest = self
                .probes
                .iter()
                .max_by_key(|(_, probe)| counter.wrapping_sub(probe.last_used()))
                .map(|(key, _)| key)
                .ok_or(AcousticsError::InvalidArgument("probe cache capacity is zero"))?;

            log::debug!("probe cache full, evicting oldest probe");
            self.remove_from_index(oldest);
            let probe = &mut self.probes[oldest];
            probe.invalidate_results();
            probe.set_position(position);
            probe.set_range(self.range);
            probe.set_attenuation(self.attenuation);
            probe.set_layer_mask(self.layer_mask);
            probe.set_rt_config(self.rt_config.clone());
            probe.set_last_used(counter);
            return Ok(oldest);
        }

        // allocate a fresh probe
        let mut probe = EnvProbe::new(self.listener_range);
        probe.set_position(position);
        probe.set_range(self.range);
        probe.set_attenuation(self.attenuation);
        probe.set_layer_mask(self.layer_mask);
        probe.set_rt_config(self.rt_config.clone());
        probe.set_last_used(self.last_used_counter);
        Ok(self.probes.insert(probe))
    }

    fn trace_probe(&mut self, key: ProbeKey, context: &CacheContext) -> Result<()> {
        let probe = &self.probes[key];
        let config = probe
            .rt_config()
            .cloned()
            .ok_or(AcousticsError::ConfigurationMissing)?;

        let (room, rays) = context.dispatcher.trace_sound_rays(
            probe.position(),
            probe.range(),
            probe.attenuation(),
            context.world.bvh(),
            probe.layer_mask(),
            &config,
        )?;

        self.probes[key].apply_trace(room, rays, &config.ray_config);
        Ok(())
    }

    fn estimate_probe(&mut self, key: ProbeKey, context: &CacheContext) -> Result<()> {
        let probe = &self.probes[key];
        let room = context.dispatcher.estimate_room_parameters(
            probe.position(),
            probe.range(),
            context.world.bvh(),
            probe.layer_mask(),
            context.estimate_config,
        )?;

        self.probes[key].apply_estimate(room, context.estimate_config);
        Ok(())
    }

    fn insert_into_index(&mut self, key: ProbeKey) {
        let probe = &self.probes[key];
        let slot = self.index.insert(
            key,
            probe.min_extend(),
            probe.max_extend(),
            probe.layer_mask(),
        );
        self.probes[key].set_index_slot(Some(slot));
    }

    fn remove_from_index(&mut self, key: ProbeKey) {
        if let Some(slot) = self.probes[key].index_slot() {
            self.index.remove(slot);
            self.probes[key].set_index_slot(None);
        }
    }
}
