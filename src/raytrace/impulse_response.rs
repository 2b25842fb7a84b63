//! # Impulse Response
//!
//! Time-ordered list of per-band impulses collected while listening. Values
//! are carried as intensities; conversions to pressure and decibel scales
//! happen at reduction time.

use crate::bands::BAND_COUNT;

/// Gain floor below which decibel conversion clamps
const GAIN_FLOOR: f32 = 1e-10;

/// Decibel floor for pressure values below the gain floor
const PRESSURE_DB_FLOOR: f32 = -200.0;

/// Decibel floor for intensity values below the gain floor
const INTENSITY_DB_FLOOR: f32 = -100.0;

const TIME_EPSILON: f32 = 1e-6;

/// One impulse: arrival time and per-band value
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Impulse {
    pub time: f32,
    pub gain: [f32; BAND_COUNT],
}

/// Impulse list, sorted by time when built through `insert`
#[derive(Debug, Clone, Default)]
pub struct ImpulseResponse {
    impulses: Vec<Impulse>,
}

impl ImpulseResponse {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.impulses.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.impulses.is_empty()
    }

    #[inline]
    pub fn at(&self, index: usize) -> &Impulse {
        &self.impulses[index]
    }

    #[inline]
    pub fn impulses(&self) -> &[Impulse] {
        &self.impulses
    }

    /// Append without keeping order, for task-local collection
    pub fn add(&mut self, time: f32, gain: [f32; BAND_COUNT]) {
        self.impulses.push(Impulse { time, gain });
    }

    /// Insert keeping ascending time order
    pub fn insert(&mut self, time: f32, gain: [f32; BAND_COUNT]) {
        let index = self.impulses.partition_point(|i| i.time <= time);
        self.impulses.insert(index, Impulse { time, gain });
    }

    /// Merge another response, keeping ascending time order
    pub fn insert_all(&mut self, other: &ImpulseResponse) {
        self.impulses.reserve(other.impulses.len());
        for impulse in &other.impulses {
            self.insert(impulse.time, impulse.gain);
        }
    }

    pub fn clear(&mut self) {
        self.impulses.clear();
    }

    /// Scale all band values
    pub fn scale(&mut self, factor: f32) {
        for impulse in &mut self.impulses {
            for gain in &mut impulse.gain {
                *gain *= factor;
            }
        }
    }

    /// Square all band values (pressure to intensity)
    pub fn square(&mut self) {
        for impulse in &mut self.impulses {
            for gain in &mut impulse.gain {
                *gain *= *gain;
            }
        }
    }

    /// Intensity to pressure: `p = sqrt(i)`
    ///
    /// Sound intensity level and sound pressure level agree in value, so the
    /// round trip through decibels collapses to a square root.
    pub fn intensity_to_pressure(&mut self) {
        for impulse in &mut self.impulses {
            for gain in &mut impulse.gain {
                *gain = gain.sqrt();
            }
        }
    }

    /// Pressure to sound pressure level in dB, floored at -200
    pub fn pressure_to_spl(&mut self) {
        for impulse in &mut self.impulses {
            for gain in &mut impulse.gain {
                *gain = if *gain > GAIN_FLOOR {
                    20.0 * gain.log10()
                } else {
                    PRESSURE_DB_FLOOR
                };
            }
        }
    }

    /// Intensity to sound intensity level in dB, floored at -100
    pub fn intensity_to_sil(&mut self) {
        for impulse in &mut self.impulses {
            for gain in &mut impulse.gain {
                *gain = if *gain > GAIN_FLOOR {
                    10.0 * gain.log10()
                } else {
                    INTENSITY_DB_FLOOR
                };
            }
        }
    }

    /// Schroeder backward integration, then conversion to dB
    ///
    /// Each impulse becomes the sum of all intensities at its time or later.
    pub fn backward_integrate(&mut self) {
        if self.impulses.is_empty() {
            return;
        }
        for i in (0..self.impulses.len() - 1).rev() {
            let next = self.impulses[i + 1].gain;
            let gain = &mut self.impulses[i].gain;
            for b in 0..BAND_COUNT {
                gain[b] += next[b];
            }
        }
        self.intensity_to_sil();
    }

    /// Per-band slope between first and last impulse, value units per second
    pub fn slopes(&self) -> Impulse {
        let mut result = Impulse::default();
        if self.impulses.len() < 2 {
            return result;
        }

        let first = &self.impulses[0];
        let last = &self.impulses[self.impulses.len() - 1];

        let time = last.time - first.time;
        if time < TIME_EPSILON {
            return result;
        }

        result.time = time;
        for b in 0..BAND_COUNT {
            result.gain[b] = (last.gain[b] - first.gain[b]) / time;
        }
        result
    }

    /// Reverberation time from the decay slope: `t = -dropDb / slope`
    ///
    /// Call on a backward-integrated (dB) response. The returned time field
    /// holds the observed decay window.
    pub fn reverberation_time(&self, drop_db: f32) -> Impulse {
        let mut result = Impulse::default();
        result.gain = [0.0; BAND_COUNT];
        if self.impulses.len() < 2 || drop_db < TIME_EPSILON {
            return result;
        }

        let slopes = self.slopes();
        result.time = slopes.time;
        for b in 0..BAND_COUNT {
            if slopes.gain[b] != 0.0 {
                result.gain[b] = -drop_db / slopes.gain[b];
            }
        }
        result
    }
}
