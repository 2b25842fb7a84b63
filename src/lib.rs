//! # Acoustics Core - Ray-Traced Audio
//!
//! Acoustic ray-tracing core for a real-time 3D audio engine. Simulates how
//! sound propagates from point sources through scene geometry to listeners
//! and produces per-listener reverberation parameters plus an impulse
//! response for a downstream reverberator.
//!
//! ## Modules
//!
//! - **Geometry**: read-only scene BVH with slab-test ray visitors
//! - **Ray Tracing**: ray configurations, sound ray arena, parallel tasks
//! - **Probes**: spatially indexed environment probe cache with reuse
//!   radius, LRU eviction and geometry invalidation
//!
//! The core owns no threads; it submits bounded fan-out to the host worker
//! pool and waits on explicit finish barriers. Geometric acoustics only; the
//! output parameterizes a reverberator, it is not an auralized signal.

#![allow(dead_code)]

// Core modules
pub mod bands;
pub mod config;
pub mod error;
pub mod geometry;
pub mod layer_mask;
pub mod probe;
pub mod raytrace;

#[cfg(test)]
pub(crate) mod test_support;

// Re-exports
pub use bands::{BAND_COUNT, BAND_HIGH, BAND_LOW, BAND_MID, INV_SOUND_SPEED, SOUND_SPEED};
pub use config::{EngineConfig, RayTracingConfigs, SoundTracingConfig};
pub use error::{AcousticsError, Result};
pub use geometry::{Bvh, BvhBuilder, MaterialProps, StaticWorld, WorldGeom};
pub use layer_mask::LayerMask;
pub use probe::{
    Attenuation, CacheContext, EnvProbe, ListenerParameters, ProbeCache, ProbeKey,
    RoomParameters,
};
pub use raytrace::{
    ImpulseResponse, ParallelDispatcher, RayConfig, SoundRayList, TaskHandle,
    ThreadWorkerPool, WorkerPool,
};

/// Library version
pub const VERSION: &str = "1.0.0";

/// Library name
pub const NAME: &str = "acoustics_core";
