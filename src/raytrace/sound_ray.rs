//! # Sound Ray Arena
//!
//! Flat storage for traced rays, their segments and transmitted child rays.
//! Three parallel vectors, contiguous index ranges per ray, no deletion.
//! Capacity never shrinks so repeated traces reuse allocations.

use glam::Vec3;

use crate::bands::BAND_COUNT;

/// Top-level or transmitted sound ray
#[derive(Debug, Clone, Copy, Default)]
pub struct SoundRay {
    /// Index of the first segment in the segment arena
    pub first_segment: u32,
    pub segment_count: u32,
    /// Index of the first transmitted child in the transmitted arena
    pub first_transmitted: u32,
    pub transmitted_count: u32,
    /// Ray escaped into free space without a final hit in range
    pub outside: bool,
}

/// One straight flight between interactions
#[derive(Debug, Clone, Copy)]
pub struct SoundRaySegment {
    /// Segment origin, probe-local
    pub position: Vec3,
    /// Normalized flight direction
    pub direction: Vec3,
    /// Surface normal at the segment origin, zero for the initial segment
    pub normal: Vec3,
    /// Segment length in meters
    pub length: f32,
    /// Path distance from the ray origin to the segment origin
    pub distance: f32,
    /// Per-band gain at the segment origin
    pub gain: [f32; BAND_COUNT],
    /// Per-band absorption summed over all hits up to the segment origin
    pub absorption_sum: [f32; BAND_COUNT],
    /// Bounces at the segment origin
    pub bounce_count: u32,
    /// Transmissions at the segment origin
    pub transmitted_count: u32,
}

impl Default for SoundRaySegment {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            direction: Vec3::ZERO,
            normal: Vec3::ZERO,
            length: 0.0,
            distance: 0.0,
            gain: [1.0; BAND_COUNT],
            absorption_sum: [0.0; BAND_COUNT],
            bounce_count: 0,
            transmitted_count: 0,
        }
    }
}

/// Arena of rays, segments and transmitted rays
#[derive(Debug, Default)]
pub struct SoundRayList {
    rays: Vec<SoundRay>,
    segments: Vec<SoundRaySegment>,
    transmitted: Vec<SoundRay>,
}

impl SoundRayList {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn ray_count(&self) -> usize {
        self.rays.len()
    }

    #[inline]
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    #[inline]
    pub fn transmitted_count(&self) -> usize {
        self.transmitted.len()
    }

    #[inline]
    pub fn ray(&self, index: usize) -> &SoundRay {
        &self.rays[index]
    }

    #[inline]
    pub fn ray_mut(&mut self, index: usize) -> &mut SoundRay {
        &mut self.rays[index]
    }

    #[inline]
    pub fn segment(&self, index: usize) -> &SoundRaySegment {
        &self.segments[index]
    }

    #[inline]
    pub fn segment_mut(&mut self, index: usize) -> &mut SoundRaySegment {
        &mut self.segments[index]
    }

    #[inline]
    pub fn transmitted_ray(&self, index: usize) -> &SoundRay {
        &self.transmitted[index]
    }

    #[inline]
    pub fn transmitted_ray_mut(&mut self, index: usize) -> &mut SoundRay {
        &mut self.transmitted[index]
    }

    /// Segments of a ray as a slice
    #[inline]
    pub fn segments_of(&self, ray: &SoundRay) -> &[SoundRaySegment] {
        let first = ray.first_segment as usize;
        &self.segments[first..first + ray.segment_count as usize]
    }

    /// Append a default ray, returning its index
    pub fn add_ray(&mut self) -> usize {
        self.rays.push(SoundRay::default());
        self.rays.len() - 1
    }

    /// Append a default segment, returning its index
    pub fn add_segment(&mut self) -> usize {
        self.segments.push(SoundRaySegment::default());
        self.segments.len() - 1
    }

    /// Append a default transmitted ray, returning its index
    pub fn add_transmitted_ray(&mut self) -> usize {
        self.transmitted.push(SoundRay::default());
        self.transmitted.len() - 1
    }

    /// Reserve capacity ahead of a trace
    pub fn reserve(&mut self, rays: usize, segments: usize, transmitted: usize) {
        self.rays.reserve(rays);
        self.segments.reserve(segments);
        self.transmitted.reserve(transmitted);
    }

    /// Drop all entries, keeping capacity
    pub fn clear(&mut self) {
        self.rays.clear();
        self.segments.clear();
        self.transmitted.clear();
    }

    /// Append another list, adjusting all indices by the current offsets
    pub fn append(&mut self, other: &SoundRayList) {
        let segment_offset = self.segments.len() as u32;
        let transmitted_offset = self.transmitted.len() as u32;

        self.rays.extend(other.rays.iter().map(|ray| SoundRay {
            first_segment: ray.first_segment + segment_offset,
            first_transmitted: ray.first_transmitted + transmitted_offset,
            ..*ray
        }));

        self.segments.extend_from_slice(&other.segments);

        self.transmitted
            .extend(other.transmitted.iter().map(|ray| SoundRay {
                first_segment: ray.first_segment + segment_offset,
                first_transmitted: ray.first_transmitted + transmitted_offset,
                ..*ray
            }));
    }
}
