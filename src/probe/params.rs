//! # Acoustic Parameter Structs
//!
//! Plain result structs produced by the finish reducers: per-room parameters
//! from tracing/estimation and per-listener parameters from listening.

use glam::{DVec3, Vec3};

use crate::bands::BAND_COUNT;
use crate::raytrace::ImpulseResponse;

/// Distance attenuation parameters
///
/// Inverse distance clamped model:
/// `gain = refDist / (refDist + rolloff * max(distance + distOffset - refDist, 0))`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Attenuation {
    pub ref_distance: f32,
    pub rolloff: f32,
    pub distance_offset: f32,
}

impl Default for Attenuation {
    fn default() -> Self {
        Self {
            ref_distance: 1.0,
            rolloff: 1.0,
            distance_offset: 0.0,
        }
    }
}

impl Attenuation {
    /// Gain for a travel distance
    #[inline]
    pub fn gain(&self, distance: f32) -> f32 {
        self.ref_distance
            / (self.ref_distance
                + self.rolloff * (distance + self.distance_offset - self.ref_distance).max(0.0))
    }
}

/// Room parameters reduced from a trace or estimate
#[derive(Debug, Clone)]
pub struct RoomParameters {
    /// Box around all hit points
    pub min_extend: DVec3,
    pub max_extend: DVec3,
    /// Average traced segment length in meters
    pub mean_free_path: f32,
    pub room_volume: f32,
    pub room_surface: f32,
    /// Per-band sum of wall area times wall absorption, m^2
    pub sabine: [f32; BAND_COUNT],
    /// Sabine divided by room surface
    pub room_absorption: [f32; BAND_COUNT],
    /// Average surface absorption over all hits
    pub avg_absorption: [f32; BAND_COUNT],
    /// RT60 per band in seconds
    pub reverberation_time: [f32; BAND_COUNT],
    /// Echo delay in seconds, one mean free path of travel
    pub echo_delay: f32,
    /// Separation between first and late reflections in seconds
    pub separation_time_first_late_reflection: f32,
}

impl Default for RoomParameters {
    fn default() -> Self {
        Self {
            min_extend: DVec3::ZERO,
            max_extend: DVec3::ZERO,
            mean_free_path: 0.0,
            room_volume: 0.0,
            room_surface: 0.0,
            sabine: [0.0; BAND_COUNT],
            room_absorption: [0.0; BAND_COUNT],
            avg_absorption: [0.0; BAND_COUNT],
            reverberation_time: [0.0; BAND_COUNT],
            echo_delay: 0.0,
            separation_time_first_late_reflection: 0.03,
        }
    }
}

/// Listener parameters reduced from a listen pass
///
/// Pan vectors are raw weighted sums; normalization is left to the smoothing
/// layer downstream.
#[derive(Debug, Clone, Default)]
pub struct ListenerParameters {
    /// First reflection gain per band, linear amplitude
    pub reflected: [f32; BAND_COUNT],
    /// Delay of the earliest reflection past the direct sound, seconds
    pub reflection_delay: f32,
    pub reflection_pan: Vec3,
    /// Late reverberation gain per band, linear amplitude
    pub reverberation_gain: [f32; BAND_COUNT],
    pub reverberation_delay: f32,
    pub reverberation_pan: Vec3,
    /// RT60 per band in seconds
    pub reverberation_time: [f32; BAND_COUNT],
    pub echo_delay: f32,
    /// Per-band intensity impulse response, time sorted
    pub impulse_response: ImpulseResponse,
}

impl ListenerParameters {
    pub fn clear(&mut self) {
        let impulse_response = std::mem::take(&mut self.impulse_response);
        *self = Self::default();
        self.impulse_response = impulse_response;
        self.impulse_response.clear();
    }

    /// Accumulate another parameter set scaled by a blend weight.
    /// The impulse response is not blended; callers pick one.
    pub fn add_scaled(&mut self, other: &ListenerParameters, scale: f32) {
        for b in 0..BAND_COUNT {
            self.reflected[b] += other.reflected[b] * scale;
            self.reverberation_gain[b] += other.reverberation_gain[b] * scale;
            self.reverberation_time[b] += other.reverberation_time[b] * scale;
        }
        self.reflection_delay += other.reflection_delay * scale;
        self.reflection_pan += other.reflection_pan * scale;
        self.reverberation_delay += other.reverberation_delay * scale;
        self.reverberation_pan += other.reverberation_pan * scale;
        self.echo_delay += other.echo_delay * scale;
    }

    /// Divide all blended values by the accumulated weight sum
    pub fn normalize(&mut self, inv_weight_sum: f32) {
        for b in 0..BAND_COUNT {
            self.reflected[b] *= inv_weight_sum;
            self.reverberation_gain[b] *= inv_weight_sum;
            self.reverberation_time[b] *= inv_weight_sum;
        }
        self.reflection_delay *= inv_weight_sum;
        self.reflection_pan *= inv_weight_sum;
        self.reverberation_delay *= inv_weight_sum;
        self.reverberation_pan *= inv_weight_sum;
        self.echo_delay *= inv_weight_sum;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attenuation_clamped_inverse_distance() {
        let att = Attenuation::default();
        // inside the reference distance the gain stays at one
        assert_eq!(att.gain(0.5), 1.0);
        assert!((att.gain(2.0) - 0.5).abs() < 1e-6);
        assert!((att.gain(11.0) - 1.0 / 11.0).abs() < 1e-6);

        let soft = Attenuation {
            rolloff: 0.5,
            ..Default::default()
        };
        assert!(soft.gain(11.0) > att.gain(11.0));
    }

    #[test]
    fn test_listener_blend_normalize() {
        let mut a = ListenerParameters::default();
        let mut b = ListenerParameters::default();
        b.reflected = [0.4; BAND_COUNT];
        b.reflection_delay = 0.02;

        a.add_scaled(&b, 0.5);
        a.add_scaled(&b, 0.5);
        a.normalize(1.0);

        assert!((a.reflected[0] - 0.4).abs() < 1e-6);
        assert!((a.reflection_delay - 0.02).abs() < 1e-6);
    }
}
