use foundation::math::Vec3;

use crate::tile::{DesiredTile, DesiredTiles, TileCoord, TileSize};
use crate::viewport::Viewport;

/// NDC height of the rays used to extrapolate a clamped far edge.
const CLAMP_RAY_NDC_Y: f64 = 0.5;

/// Visible part of the ground plane, as seen through the viewport's four corners.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct GroundQuad {
    pub near_left: Vec3,
    pub near_right: Vec3,
    pub far_left: Vec3,
    pub far_right: Vec3,
    /// The far edge was pulled in to `max_distance`.
    pub clamped: bool,
}

impl GroundQuad {
    pub fn corners(&self) -> [Vec3; 4] {
        [self.near_left, self.near_right, self.far_right, self.far_left]
    }

    /// `(close, left, right, far)` boundary lines.
    pub fn boundaries(&self) -> [BoundaryLine; 4] {
        [
            BoundaryLine::new(self.near_left, self.near_right),
            BoundaryLine::new(self.near_left, self.far_left),
            BoundaryLine::new(self.near_right, self.far_right),
            BoundaryLine::new(self.far_left, self.far_right),
        ]
    }

    /// `(min_x, min_z, max_x, max_z)` of the quad.
    pub fn extent(&self) -> (f64, f64, f64, f64) {
        let mut min_x = f64::INFINITY;
        let mut min_z = f64::INFINITY;
        let mut max_x = f64::NEG_INFINITY;
        let mut max_z = f64::NEG_INFINITY;
        for c in self.corners() {
            min_x = min_x.min(c.x);
            min_z = min_z.min(c.z);
            max_x = max_x.max(c.x);
            max_z = max_z.max(c.z);
        }
        (min_x, min_z, max_x, max_z)
    }
}

/// Parametric segment `from + (to - from) * t`, `t ∈ [0, 1]`, on the ground plane.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct BoundaryLine {
    pub from: Vec3,
    pub to: Vec3,
}

impl BoundaryLine {
    pub fn new(from: Vec3, to: Vec3) -> Self {
        Self { from, to }
    }

    pub fn at(&self, t: f64) -> Vec3 {
        self.from.lerp(self.to, t)
    }

    /// Z range covered by the part of the segment with `x ∈ [x0, x1]`.
    pub fn z_range_within(&self, x0: f64, x1: f64) -> Option<(f64, f64)> {
        let (a, b) = (self.from, self.to);
        let lo = a.x.min(b.x).max(x0);
        let hi = a.x.max(b.x).min(x1);
        if lo > hi {
            return None;
        }

        let dx = b.x - a.x;
        if dx.abs() < 1e-9 {
            return Some((a.z.min(b.z), a.z.max(b.z)));
        }

        let za = self.at((lo - a.x) / dx).z;
        let zb = self.at((hi - a.x) / dx).z;
        Some((za.min(zb), za.max(zb)))
    }
}

/// Project the viewport's corners onto the ground, clamping the far edge.
///
/// Returns `None` when the near corners miss the ground (no ground in view).
pub fn ground_quad(viewport: &impl Viewport, max_distance: f64) -> Option<GroundQuad> {
    let near_left = viewport.intersect_ground(-1.0, -1.0)?;
    let near_right = viewport.intersect_ground(1.0, -1.0)?;

    let far = match (
        viewport.intersect_ground(-1.0, 1.0),
        viewport.intersect_ground(1.0, 1.0),
    ) {
        (Some(l), Some(r))
            if l.distance(near_left) <= max_distance && r.distance(near_right) <= max_distance =>
        {
            Some((l, r))
        }
        _ => None,
    };

    let quad = match far {
        Some((far_left, far_right)) => GroundQuad {
            near_left,
            near_right,
            far_left,
            far_right,
            clamped: false,
        },
        None => GroundQuad {
            near_left,
            near_right,
            far_left: extrapolate(viewport, -1.0, near_left, max_distance),
            far_right: extrapolate(viewport, 1.0, near_right, max_distance),
            clamped: true,
        },
    };
    Some(quad)
}

/// Walk `max_distance` from `near` along the ground heading of the ray through
/// `(ndc_x, CLAMP_RAY_NDC_Y)`.
fn extrapolate(viewport: &impl Viewport, ndc_x: f64, near: Vec3, max_distance: f64) -> Vec3 {
    let ray = viewport.ray_through(ndc_x, CLAMP_RAY_NDC_Y);
    let heading = ray
        .direction
        .horizontal()
        .try_normalize()
        .or_else(|| (near - viewport.position()).horizontal().try_normalize());
    match heading {
        Some(h) => near + h * max_distance,
        None => near,
    }
}

/// Every tile touched by the visible ground quad, keyed by coordinate.
///
/// `distance` is the squared tile-index distance from the tile under the camera
/// (clamped into the visible bounding box); it orders fetches, nothing more.
pub fn compute_visible_tiles(
    viewport: &impl Viewport,
    tile_size: TileSize,
    max_distance: f64,
) -> DesiredTiles {
    let mut out = DesiredTiles::new();
    let Some(quad) = ground_quad(viewport, max_distance) else {
        return out;
    };

    let (min_x, min_z, max_x, max_z) = quad.extent();
    let lo = tile_size.tile_at(min_x, min_z);
    let hi = tile_size.tile_at(max_x, max_z);

    let eye = viewport.position();
    let under = tile_size.tile_at(eye.x, eye.z);
    let closest = TileCoord::new(under.x.clamp(lo.x, hi.x), under.y.clamp(lo.y, hi.y));

    let lines = quad.boundaries();
    for x in lo.x..=hi.x {
        let col_min = f64::from(x) * tile_size.x;
        let col_max = col_min + tile_size.x;

        let mut z_min = f64::INFINITY;
        let mut z_max = f64::NEG_INFINITY;
        for line in &lines {
            if let Some((a, b)) = line.z_range_within(col_min, col_max) {
                z_min = z_min.min(a);
                z_max = z_max.max(b);
            }
        }
        if z_min > z_max {
            continue;
        }

        let row_lo = ((z_min / tile_size.y).floor() as i32).max(lo.y);
        let row_hi = ((z_max / tile_size.y).floor() as i32).min(hi.y);
        for y in row_lo..=row_hi {
            let coord = TileCoord::new(x, y);
            out.insert(
                coord,
                DesiredTile {
                    coord,
                    distance: closest.distance_sq(coord),
                },
            );
        }
    }

    out
}
