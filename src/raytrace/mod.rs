//! # Acoustic Ray Tracing
//!
//! The tracing pipeline: ray direction configurations, the sound ray arena,
//! the parallel worker tasks and the dispatcher that fans them out over the
//! engine worker pool.

pub mod dispatcher;
pub mod ico_sphere;
pub mod impulse_response;
pub mod ray_config;
pub mod sound_ray;
pub(crate) mod tasks;

pub use dispatcher::{
    DispatchStats, ParallelDispatcher, TaskHandle, ThreadWorkerPool, WorkerPool,
};
pub use ico_sphere::IcoSphere;
pub use impulse_response::{Impulse, ImpulseResponse};
pub use ray_config::RayConfig;
pub use sound_ray::{SoundRay, SoundRayList, SoundRaySegment};
