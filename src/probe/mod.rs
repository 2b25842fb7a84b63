//! # Environment Probes
//!
//! Cached tracing results at points in world space:
//! - [`EnvProbe`]: ray list, room parameters and cached listeners
//! - [`ProbeCache`]: spatially indexed cache with reuse radius and LRU
//! - [`ProbeIndex`]: AABB index holding dense keys, never references

pub mod cache;
pub mod env_probe;
pub mod index;
pub mod params;

pub use cache::{CacheContext, ProbeCache, ProbeKey};
pub use env_probe::{CachedListener, EnvProbe, ProbeSnapshot};
pub use index::{IndexSlot, ProbeIndex};
pub use params::{Attenuation, ListenerParameters, RoomParameters};
