use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::tile::TileSize;

/// Longest accepted coalescing window.
pub const MAX_WINDOW_MS: f64 = 60_000.0;

/// Far-plane clamp expressed in tiles when no explicit distance is configured.
pub const DEFAULT_MAX_DISTANCE_TILES: f64 = 15.0;

/// Tunables for viewport-driven tile streaming.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    pub tile_size_x: f64,
    pub tile_size_y: f64,
    /// Far-plane clamp in world units; `None` means `15 * tile_size_x`.
    pub max_distance: Option<f64>,
    /// Repaint coalescing window.
    pub repaint_debounce_ms: f64,
    /// Visible-tile rescan coalescing window.
    pub rescan_debounce_ms: f64,
    /// Optional upper bound on a single fetch; expiry counts as a fetch error.
    pub fetch_timeout_ms: Option<u64>,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            tile_size_x: 256.0,
            tile_size_y: 256.0,
            max_distance: None,
            repaint_debounce_ms: 1000.0 / 60.0,
            rescan_debounce_ms: 2.0,
            fetch_timeout_ms: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    InvalidTileSize { x: f64, y: f64 },
    InvalidMaxDistance(f64),
    InvalidWindow { name: &'static str, ms: f64 },
    Parse(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidTileSize { x, y } => {
                write!(f, "tile size must be positive and finite: x={x} y={y}")
            }
            ConfigError::InvalidMaxDistance(d) => {
                write!(f, "max distance must be positive and finite: {d}")
            }
            ConfigError::InvalidWindow { name, ms } => {
                write!(f, "{name} window must be non-negative: {ms}ms")
            }
            ConfigError::Parse(msg) => write!(f, "invalid streaming config: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Clamped into `[0, MAX_WINDOW_MS]`; NaN counts as zero.
fn window(ms: f64) -> Duration {
    let ms = if ms.is_nan() { 0.0 } else { ms.clamp(0.0, MAX_WINDOW_MS) };
    Duration::from_secs_f64(ms / 1000.0)
}

fn positive(v: f64) -> bool {
    v.is_finite() && v > 0.0
}

impl StreamingConfig {
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(s).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !positive(self.tile_size_x) || !positive(self.tile_size_y) {
            return Err(ConfigError::InvalidTileSize {
                x: self.tile_size_x,
                y: self.tile_size_y,
            });
        }
        if !positive(self.max_distance()) {
            return Err(ConfigError::InvalidMaxDistance(self.max_distance()));
        }
        for (name, ms) in [
            ("repaint", self.repaint_debounce_ms),
            ("rescan", self.rescan_debounce_ms),
        ] {
            if !(0.0..=MAX_WINDOW_MS).contains(&ms) {
                return Err(ConfigError::InvalidWindow { name, ms });
            }
        }
        Ok(())
    }

    pub fn tile_size(&self) -> TileSize {
        TileSize::new(self.tile_size_x, self.tile_size_y)
    }

    pub fn max_distance(&self) -> f64 {
        self.max_distance
            .unwrap_or(DEFAULT_MAX_DISTANCE_TILES * self.tile_size_x)
    }

    pub fn repaint_window(&self) -> Duration {
        window(self.repaint_debounce_ms)
    }

    pub fn rescan_window(&self) -> Duration {
        window(self.rescan_debounce_ms)
    }

    pub fn fetch_timeout(&self) -> Option<Duration> {
        self.fetch_timeout_ms.map(Duration::from_millis)
    }
}
