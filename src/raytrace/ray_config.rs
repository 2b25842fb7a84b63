//! # Ray Configurations
//!
//! Immutable sets of ray directions approximately equi-spaced on the unit
//! sphere, shared by all probes of the same purpose. Each configuration
//! carries the per-ray unit surface and volume used to scale first-hit
//! estimates to full-sphere quantities.

use glam::{Mat3, Vec3};

use crate::error::{AcousticsError, Result};
use crate::raytrace::ico_sphere::IcoSphere;

/// Immutable ray direction set
#[derive(Debug, Clone)]
pub struct RayConfig {
    directions: Vec<Vec3>,
    ray_unit_surface: f32,
    ray_unit_volume: f32,
    opening_angle: f32,
}

impl RayConfig {
    /// Directions via Fibonacci spiral, approximately equi-spaced
    pub fn equally_spaced(ray_count: usize) -> Result<Self> {
        if ray_count < 1 {
            return Err(AcousticsError::InvalidArgument("ray count must be >= 1"));
        }

        let d_longitude = std::f64::consts::PI * (3.0 - 5.0f64.sqrt());
        let d_z = 2.0 / ray_count as f64;
        let mut longitude = 0.0f64;
        let mut z = 1.0 - d_z * 0.5;

        let mut directions = Vec::with_capacity(ray_count);
        for _ in 0..ray_count {
            let radius = (1.0 - z * z).sqrt();
            directions.push(Vec3::new(
                (longitude.cos() * radius) as f32,
                (longitude.sin() * radius) as f32,
                z as f32,
            ));
            z -= d_z;
            longitude += d_longitude;
        }

        // opening angle from the nearest-neighbor separation on the spiral
        let opening_angle = if ray_count >= 3 {
            (directions[2] - directions[1]).length().atan() * 2.0
        } else {
            std::f32::consts::PI
        };

        Ok(Self::from_directions(directions, opening_angle))
    }

    /// Directions from icosphere vertices
    pub fn from_ico_sphere(ico: &IcoSphere) -> Self {
        Self::from_directions(ico.vertices().to_vec(), ico.opening_angle())
    }

    fn from_directions(directions: Vec<Vec3>, opening_angle: f32) -> Self {
        // sphere surface and volume distributed equally over all rays with
        // r=1. The radius is factorized in during the final reduction.
        let ray_unit_surface = 4.0 * std::f32::consts::PI / directions.len() as f32;
        let ray_unit_volume = ray_unit_surface / 3.0;

        Self {
            directions,
            ray_unit_surface,
            ray_unit_volume,
            opening_angle,
        }
    }

    /// Rotate all directions in place, angles in degrees
    ///
    /// Applied to sound-tracing configurations to avoid axis aligned
    /// artifacts. Room-estimate configurations stay unrotated.
    pub fn rotate(&mut self, rx: f32, ry: f32, rz: f32) {
        let matrix = Mat3::from_rotation_z(rz.to_radians())
            * Mat3::from_rotation_y(ry.to_radians())
            * Mat3::from_rotation_x(rx.to_radians());
        for direction in &mut self.directions {
            *direction = matrix * *direction;
        }
    }

    #[inline]
    pub fn ray_count(&self) -> usize {
        self.directions.len()
    }

    #[inline]
    pub fn directions(&self) -> &[Vec3] {
        &self.directions
    }

    /// Unit sphere surface share of one ray (`4*pi/N`)
    #[inline]
    pub fn ray_unit_surface(&self) -> f32 {
        self.ray_unit_surface
    }

    /// Unit sphere volume share of one ray (`4*pi/(3*N)`)
    #[inline]
    pub fn ray_unit_volume(&self) -> f32 {
        self.ray_unit_volume
    }

    /// Beam opening angle, radians
    #[inline]
    pub fn opening_angle(&self) -> f32 {
        self.opening_angle
    }
}
