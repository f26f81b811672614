use super::Vec3;

/// Plane in the form `n·p + d = 0`.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Plane {
    pub n: Vec3,
    pub d: f64,
}

impl Plane {
    pub fn new(n: Vec3, d: f64) -> Self {
        Self { n, d }
    }

    /// The `y = 0` ground plane.
    pub fn ground() -> Self {
        Self::new(Vec3::UP, 0.0)
    }

    pub fn distance(&self, p: Vec3) -> f64 {
        self.n.dot(p) + self.d
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Ray {
    pub origin: Vec3,
    pub direction: Vec3,
}

impl Ray {
    pub fn new(origin: Vec3, direction: Vec3) -> Self {
        Self { origin, direction }
    }

    pub fn at(&self, t: f64) -> Vec3 {
        self.origin + self.direction * t
    }

    /// Forward intersection with `plane`.
    ///
    /// Returns `None` when the ray is parallel to the plane or points away from it.
    pub fn intersect_plane(&self, plane: &Plane) -> Option<Vec3> {
        let denom = plane.n.dot(self.direction);
        if denom.abs() < 1e-12 {
            return None;
        }
        let t = -plane.distance(self.origin) / denom;
        if !t.is_finite() || t < 0.0 {
            return None;
        }
        Some(self.at(t))
    }
}
