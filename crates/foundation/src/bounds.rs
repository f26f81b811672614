use serde::{Deserialize, Serialize};

/// Axis-aligned 2D bounding box, e.g. a geographic `[min_x, min_y, max_x, max_y]` extent.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Aabb2 {
    pub min: [f64; 2],
    pub max: [f64; 2],
}

impl Aabb2 {
    pub fn new(min: [f64; 2], max: [f64; 2]) -> Self {
        Aabb2 { min, max }
    }

    pub fn from_array(b: [f64; 4]) -> Self {
        Self::new([b[0], b[1]], [b[2], b[3]])
    }

    pub fn to_array(&self) -> [f64; 4] {
        [self.min[0], self.min[1], self.max[0], self.max[1]]
    }

    pub fn width(&self) -> f64 {
        (self.max[0] - self.min[0]).max(0.0)
    }

    pub fn height(&self) -> f64 {
        (self.max[1] - self.min[1]).max(0.0)
    }
}

impl std::fmt::Display for Aabb2 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{},{},{},{}",
            self.min[0], self.min[1], self.max[0], self.max[1]
        )
    }
}

#[cfg(test)]
mod tests {
    use super::Aabb2;

    #[test]
    fn array_form_and_extent() {
        let b = Aabb2::from_array([10.0, 20.0, 13.0, 24.0]);
        assert_eq!(b.to_array(), [10.0, 20.0, 13.0, 24.0]);
        assert_eq!(b.width(), 3.0);
        assert_eq!(b.height(), 4.0);
        assert_eq!(b.to_string(), "10,20,13,24");
    }
}
