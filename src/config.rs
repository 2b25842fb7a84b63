//! # Engine Configuration
//!
//! Tracing configuration parsed from host-provided JSON, plus the per-purpose
//! ray tracing parameter bundles derived from it.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::raytrace::RayConfig;

/// Engine configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Ray count for full sound tracing
    #[serde(rename = "rayCountTrace")]
    pub ray_count_trace: u32,

    /// Ray count for coarse room estimation
    #[serde(rename = "rayCountEstimate")]
    pub ray_count_estimate: u32,

    /// Maximum reflections per ray
    #[serde(rename = "maxBounces")]
    pub max_bounces: u32,

    /// Maximum transmissions per ray tree
    #[serde(rename = "maxTransmits")]
    pub max_transmits: u32,

    /// Gain threshold to continue tracing reflected rays
    #[serde(rename = "thresholdReflect")]
    pub threshold_reflect: f32,

    /// Gain threshold to spawn transmitted rays
    #[serde(rename = "thresholdTransmit")]
    pub threshold_transmit: f32,

    /// Minimum ray length required to store a ray without interactions
    #[serde(rename = "addRayMinLength")]
    pub add_ray_min_length: f32,

    /// Probe reuse radius in meters
    #[serde(rename = "reuseDistance")]
    pub reuse_distance: f32,

    /// Maximum number of valid probes per cache
    #[serde(rename = "maxProbeCount")]
    pub max_probe_count: u32,

    /// Sphere receiver radius scale factor
    #[serde(rename = "receiverRadiusScale")]
    pub receiver_radius_scale: f32,

    /// Cached listener blending radius in meters
    #[serde(rename = "listenerRange")]
    pub listener_range: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ray_count_trace: 162,
            ray_count_estimate: 42,
            max_bounces: 20,
            max_transmits: 2,
            threshold_reflect: 1e-3,
            threshold_transmit: 1e-3,
            add_ray_min_length: 0.2,
            reuse_distance: 1.0,
            max_probe_count: 128,
            receiver_radius_scale: 1.0,
            listener_range: 1.0,
        }
    }
}

impl EngineConfig {
    /// Parse config from bytes (JSON)
    pub fn from_bytes(data: &[u8]) -> std::result::Result<Self, String> {
        if data.is_empty() {
            log::warn!("Empty config data, using defaults");
            return Ok(Self::default());
        }

        serde_json::from_slice(data).map_err(|e| format!("Config parse error: {}", e))
    }

    /// Serialize to bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }
}

/// Parameters for one sound tracing purpose
///
/// Bundles the ray direction set with the trace termination parameters.
/// Shared immutably between the cache, the dispatcher and in-flight tasks.
#[derive(Debug, Clone)]
pub struct SoundTracingConfig {
    pub ray_config: Arc<RayConfig>,
    pub add_ray_min_length: f32,
    pub max_bounce_count: u32,
    pub max_transmit_count: u32,
    pub threshold_reflect: f32,
    pub threshold_transmit: f32,
    /// Cast from the listener instead of the source
    pub inverse_ray_tracing: bool,
}

/// Ray tracing configurations per purpose
///
/// Rebuilt whenever the engine configuration changes. The sound tracing
/// direction sets are rotated a few degrees off the world axes; the room
/// estimate set is left axis aligned.
pub struct RayTracingConfigs {
    trace_sound_rays: Arc<RayConfig>,
    room_estimate: Arc<RayConfig>,
    sensor: Arc<RayConfig>,
    microphone: Arc<SoundTracingConfig>,
    metering: Arc<SoundTracingConfig>,
}

/// Ray count for sound level sensors, independent of the engine setting
const SENSOR_RAY_COUNT: usize = 24;

/// Bounce/transmit limits for metering probes
const METERING_MAX_BOUNCES: u32 = 10;
const METERING_MAX_TRANSMITS: u32 = 2;

impl RayTracingConfigs {
    pub fn new(config: &EngineConfig) -> Result<Self> {
        let mut trace = RayConfig::equally_spaced(config.ray_count_trace as usize)?;
        trace.rotate(5.0, 7.0, 3.0);
        let trace_sound_rays = Arc::new(trace);

        let room_estimate = Arc::new(RayConfig::equally_spaced(
            config.ray_count_estimate as usize,
        )?);

        let mut sensor = RayConfig::equally_spaced(SENSOR_RAY_COUNT)?;
        sensor.rotate(5.0, 7.0, 3.0);
        let sensor = Arc::new(sensor);

        let microphone = Arc::new(SoundTracingConfig {
            ray_config: trace_sound_rays.clone(),
            add_ray_min_length: config.add_ray_min_length,
            max_bounce_count: config.max_bounces,
            max_transmit_count: config.max_transmits,
            threshold_reflect: config.threshold_reflect,
            threshold_transmit: config.threshold_transmit,
            inverse_ray_tracing: false,
        });

        let metering = Arc::new(SoundTracingConfig {
            ray_config: sensor.clone(),
            max_bounce_count: METERING_MAX_BOUNCES,
            max_transmit_count: METERING_MAX_TRANSMITS,
            inverse_ray_tracing: true,
            ..(*microphone).clone()
        });

        log::info!(
            "Ray tracing configs: trace={} estimate={} sensor={}",
            trace_sound_rays.ray_count(),
            room_estimate.ray_count(),
            sensor.ray_count()
        );

        Ok(Self {
            trace_sound_rays,
            room_estimate,
            sensor,
            microphone,
            metering,
        })
    }

    /// Rebuild after an engine configuration change
    pub fn configuration_changed(&mut self, config: &EngineConfig) -> Result<()> {
        *self = Self::new(config)?;
        Ok(())
    }

    pub fn trace_sound_rays(&self) -> &Arc<RayConfig> {
        &self.trace_sound_rays
    }

    pub fn room_estimate(&self) -> &Arc<RayConfig> {
        &self.room_estimate
    }

    pub fn sensor(&self) -> &Arc<RayConfig> {
        &self.sensor
    }

    /// Sound tracing parameters for microphone listening
    pub fn microphone(&self) -> &Arc<SoundTracingConfig> {
        &self.microphone
    }

    /// Sound tracing parameters for sound level metering
    pub fn metering(&self) -> &Arc<SoundTracingConfig> {
        &self.metering
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.ray_count_trace, 162);
        assert!(config.threshold_reflect > 0.0);
        assert_eq!(config.receiver_radius_scale, 1.0);
    }

    #[test]
    fn test_config_json_round_trip() {
        let config = EngineConfig {
            ray_count_trace: 64,
            reuse_distance: 2.5,
            ..Default::default()
        };

        let bytes = config.to_bytes();
        let parsed = EngineConfig::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.ray_count_trace, 64);
        assert_eq!(parsed.reuse_distance, 2.5);
    }

    #[test]
    fn test_config_partial_json_uses_defaults() {
        let parsed = EngineConfig::from_bytes(br#"{"rayCountTrace": 42}"#).unwrap();
        assert_eq!(parsed.ray_count_trace, 42);
        assert_eq!(parsed.max_bounces, EngineConfig::default().max_bounces);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let parsed = EngineConfig::from_bytes(b"").unwrap();
        assert_eq!(parsed.ray_count_trace, 162);
    }

    #[test]
    fn test_ray_tracing_configs() {
        let configs = RayTracingConfigs::new(&EngineConfig::default()).unwrap();
        assert_eq!(configs.trace_sound_rays().ray_count(), 162);
        assert_eq!(configs.room_estimate().ray_count(), 42);
        assert_eq!(configs.sensor().ray_count(), SENSOR_RAY_COUNT);
        assert!(!configs.microphone().inverse_ray_tracing);
        assert!(configs.metering().inverse_ray_tracing);

        // estimate config stays axis aligned, trace config is rotated
        let plain = RayConfig::equally_spaced(162).unwrap();
        let rotated = configs.trace_sound_rays();
        assert!((plain.directions()[0] - rotated.directions()[0]).length() > 1e-4);
    }
}
