use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Integer cell of the regular ground grid.
///
/// `x` indexes world X, `y` indexes world Z (the ground plane is `y = 0` in world space).
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct TileCoord {
    pub x: i32,
    pub y: i32,
}

impl TileCoord {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Squared distance in tile-index space.
    pub fn distance_sq(self, other: Self) -> i64 {
        let dx = i64::from(self.x) - i64::from(other.x);
        let dy = i64::from(self.y) - i64::from(other.y);
        dx * dx + dy * dy
    }
}

impl std::fmt::Display for TileCoord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.x, self.y)
    }
}

/// Ground size of one tile in world units.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct TileSize {
    pub x: f64,
    pub y: f64,
}

impl TileSize {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Tile containing the world-space ground point `(wx, wz)`.
    pub fn tile_at(&self, wx: f64, wz: f64) -> TileCoord {
        TileCoord::new(
            (wx / self.x).floor() as i32,
            (wz / self.y).floor() as i32,
        )
    }
}

/// A tile the current viewport wants, with its fetch priority.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub struct DesiredTile {
    pub coord: TileCoord,
    /// Smaller values are fetched first.
    pub distance: i64,
}

pub type DesiredTiles = BTreeMap<TileCoord, DesiredTile>;

/// Desired tiles in issue order: ascending distance, ties by coordinate.
pub fn in_priority_order(desired: &DesiredTiles) -> Vec<DesiredTile> {
    let mut tiles: Vec<DesiredTile> = desired.values().copied().collect();
    tiles.sort_by(|a, b| a.distance.cmp(&b.distance).then_with(|| a.coord.cmp(&b.coord)));
    tiles
}
