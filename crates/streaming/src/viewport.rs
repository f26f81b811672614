use foundation::math::{Plane, Ray, Vec3};
use serde::{Deserialize, Serialize};

/// What the tile selector needs to know about the rendering camera.
///
/// Normalized device coordinates span `[-1, 1]` on both axes, `+y` up.
pub trait Viewport {
    /// Eye position in world space.
    fn position(&self) -> Vec3;

    /// Ray from the eye through the given normalized device coordinate.
    fn ray_through(&self, ndc_x: f64, ndc_y: f64) -> Ray;

    /// Where the ray through `(ndc_x, ndc_y)` meets the `y = 0` ground plane.
    fn intersect_ground(&self, ndc_x: f64, ndc_y: f64) -> Option<Vec3> {
        self.ray_through(ndc_x, ndc_y)
            .intersect_plane(&Plane::ground())
    }
}

impl<V: Viewport + ?Sized> Viewport for &V {
    fn position(&self) -> Vec3 {
        (**self).position()
    }

    fn ray_through(&self, ndc_x: f64, ndc_y: f64) -> Ray {
        (**self).ray_through(ndc_x, ndc_y)
    }
}

/// Pinhole camera with a symmetric vertical field of view.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerspectiveCamera {
    pub position: Vec3,
    pub forward: Vec3,
    #[serde(default = "default_up")]
    pub up: Vec3,
    #[serde(default = "default_fov")]
    pub fov_y_deg: f64,
    #[serde(default = "default_aspect")]
    pub aspect: f64,
}

fn default_up() -> Vec3 {
    Vec3::UP
}

fn default_fov() -> f64 {
    45.0
}

fn default_aspect() -> f64 {
    16.0 / 9.0
}

impl PerspectiveCamera {
    pub fn new(position: Vec3, forward: Vec3, up: Vec3, fov_y_deg: f64, aspect: f64) -> Self {
        Self {
            position,
            forward,
            up,
            fov_y_deg,
            aspect,
        }
    }

    pub fn looking_at(position: Vec3, target: Vec3, fov_y_deg: f64, aspect: f64) -> Self {
        Self::new(position, target - position, Vec3::UP, fov_y_deg, aspect)
    }

    /// Orthonormal `(forward, right, up)` basis.
    ///
    /// When `forward` is parallel to `up` (looking straight down), world `-z` stands in
    /// as the screen-up direction.
    fn basis(&self) -> (Vec3, Vec3, Vec3) {
        let forward = self
            .forward
            .try_normalize()
            .unwrap_or(Vec3::new(0.0, 0.0, -1.0));
        let right = forward
            .cross(self.up)
            .try_normalize()
            .or_else(|| forward.cross(Vec3::new(0.0, 0.0, -1.0)).try_normalize())
            .unwrap_or(Vec3::new(1.0, 0.0, 0.0));
        let up = right.cross(forward);
        (forward, right, up)
    }
}

impl Viewport for PerspectiveCamera {
    fn position(&self) -> Vec3 {
        self.position
    }

    fn ray_through(&self, ndc_x: f64, ndc_y: f64) -> Ray {
        let (forward, right, up) = self.basis();
        let half_h = (self.fov_y_deg.to_radians() * 0.5).tan();
        let half_w = half_h * self.aspect;
        let dir = forward + right * (ndc_x * half_w) + up * (ndc_y * half_h);
        Ray::new(self.position, dir.try_normalize().unwrap_or(forward))
    }
}
