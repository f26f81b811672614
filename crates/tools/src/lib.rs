//! Plumbing shared by the `eo` command line: config loading, argument parsing and the
//! HTTP/disk adapters that plug into the streaming and timelapse crates.

use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use foundation::Aabb2;
use runtime::cancel::CancelHandle;
use serde::Serialize;
use streaming::{FetchError, FetchedTile, Fetcher, StreamingConfig, TileCoord, TileSink};
use timelapse::ComposerConfig;
use tracing::{debug, warn};

pub const STREAMING_CONFIG_ENV: &str = "EO_STREAMING_CONFIG";
pub const COMPOSER_CONFIG_ENV: &str = "EO_COMPOSER_CONFIG";

const METERS_PER_DEGREE: f64 = 111_320.0;

/// Explicit path first, then the environment variable.
pub fn config_path(flag: Option<&Path>, env_key: &str) -> Option<PathBuf> {
    flag.map(Path::to_path_buf)
        .or_else(|| env::var(env_key).ok().filter(|s| !s.is_empty()).map(PathBuf::from))
}

pub fn load_streaming_config(
    flag: Option<&Path>,
) -> Result<StreamingConfig, Box<dyn std::error::Error>> {
    match config_path(flag, STREAMING_CONFIG_ENV) {
        Some(path) => {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| format!("read {}: {e}", path.display()))?;
            Ok(StreamingConfig::from_json_str(&text)?)
        }
        None => Ok(StreamingConfig::default()),
    }
}

pub fn load_composer_config(
    flag: Option<&Path>,
) -> Result<ComposerConfig, Box<dyn std::error::Error>> {
    match config_path(flag, COMPOSER_CONFIG_ENV) {
        Some(path) => {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| format!("read {}: {e}", path.display()))?;
            Ok(ComposerConfig::from_json_str(&text)?)
        }
        None => Ok(ComposerConfig::default()),
    }
}

pub fn parse_bbox(bbox: &str) -> Result<Aabb2, Box<dyn std::error::Error>> {
    let parts: Vec<_> = bbox.split(',').collect();
    if parts.len() != 4 {
        return Err("bbox must be minLon,minLat,maxLon,maxLat".into());
    }
    let min_lon: f64 = parts[0].trim().parse()?;
    let min_lat: f64 = parts[1].trim().parse()?;
    let max_lon: f64 = parts[2].trim().parse()?;
    let max_lat: f64 = parts[3].trim().parse()?;
    if min_lon >= max_lon || min_lat >= max_lat {
        return Err(format!("bbox {bbox} is empty").into());
    }
    Ok(Aabb2::from_array([min_lon, min_lat, max_lon, max_lat]))
}

/// East-west ground span of a lon/lat box, measured at its middle latitude.
pub fn ground_width_m(bbox: &Aabb2) -> f64 {
    let mid_lat = (bbox.min[1] + bbox.max[1]) / 2.0;
    bbox.width() * METERS_PER_DEGREE * mid_lat.to_radians().cos()
}

/// Output height matching the box aspect at its middle latitude.
pub fn height_for_width(bbox: &Aabb2, width: u32) -> u32 {
    let mid_lat = (bbox.min[1] + bbox.max[1]) / 2.0;
    let ground_w = bbox.width() * mid_lat.to_radians().cos();
    if ground_w <= 0.0 {
        return width;
    }
    ((width as f64 * bbox.height() / ground_w).round() as u32).max(1)
}

/// Tile fetcher over an `{x}`/`{y}` URL template.
///
/// The optional `x-max-altitude` response header feeds the tile's altitude; tiles
/// without it report `0.0`.
pub struct HttpTileFetcher {
    url_template: String,
    client: reqwest::Client,
}

impl HttpTileFetcher {
    pub fn new(url_template: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            url_template: url_template.into(),
            client,
        }
    }

    pub fn tile_url(&self, coord: TileCoord) -> String {
        self.url_template
            .replace("{x}", &coord.x.to_string())
            .replace("{y}", &coord.y.to_string())
    }
}

impl Fetcher<TileCoord> for HttpTileFetcher {
    type Output = FetchedTile<Bytes>;

    fn fetch(
        &self,
        coord: TileCoord,
        cancel: CancelHandle,
    ) -> futures_util::future::BoxFuture<'static, Result<Self::Output, FetchError>> {
        let url = self.tile_url(coord);
        let client = self.client.clone();
        Box::pin(async move {
            let request = async {
                let resp = client
                    .get(&url)
                    .send()
                    .await
                    .map_err(|e| FetchError::failed(format!("{url}: {e}")))?;
                if !resp.status().is_success() {
                    return Err(FetchError::failed(format!("{url}: HTTP {}", resp.status())));
                }
                let max_altitude = resp
                    .headers()
                    .get("x-max-altitude")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<f64>().ok())
                    .unwrap_or(0.0);
                let payload = resp
                    .bytes()
                    .await
                    .map_err(|e| FetchError::failed(format!("{url}: {e}")))?;
                Ok(FetchedTile {
                    payload,
                    max_altitude,
                })
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(FetchError::Cancelled),
                result = request => result,
            }
        })
    }
}

/// Keeps the latest payload per tile in memory until the stream ends.
#[derive(Debug, Default)]
pub struct TileStore {
    tiles: BTreeMap<TileCoord, (Bytes, f64)>,
    failed: BTreeMap<TileCoord, String>,
    repaints: usize,
}

impl TileStore {
    pub fn tiles(&self) -> &BTreeMap<TileCoord, (Bytes, f64)> {
        &self.tiles
    }

    pub fn failed(&self) -> &BTreeMap<TileCoord, String> {
        &self.failed
    }

    pub fn repaints(&self) -> usize {
        self.repaints
    }

    /// Highest altitude among stored tiles, if any.
    pub fn max_altitude(&self) -> Option<f64> {
        self.tiles.values().map(|(_, alt)| *alt).reduce(f64::max)
    }
}

impl TileSink<Bytes> for TileStore {
    fn ingest(&mut self, coord: TileCoord, payload: Bytes, max_altitude: f64) {
        self.failed.remove(&coord);
        self.tiles.insert(coord, (payload, max_altitude));
    }

    fn tile_failed(&mut self, coord: TileCoord, reason: &FetchError) {
        warn!(tile = %coord, error = %reason, "tile fetch failed");
        self.failed.insert(coord, reason.to_string());
    }

    fn repaint(&mut self) {
        self.repaints += 1;
        debug!(tiles = self.tiles.len(), "repaint");
    }
}

/// One line of the timelapse `index.json`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameIndexEntry {
    pub file: Option<String>,
    pub from_time: chrono::DateTime<chrono::Utc>,
    pub to_time: chrono::DateTime<chrono::Utc>,
    pub is_selected: bool,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::{
        FrameIndexEntry, HttpTileFetcher, TileStore, config_path, ground_width_m,
        height_for_width, parse_bbox,
    };
    use bytes::Bytes;
    use chrono::{TimeZone, Utc};
    use foundation::Aabb2;
    use pretty_assertions::assert_eq;
    use std::path::{Path, PathBuf};
    use streaming::{FetchError, TileCoord, TileSink};

    #[test]
    fn bbox_parses_and_rejects_garbage() {
        let b = parse_bbox("13.3, 52.4, 13.5, 52.6").unwrap();
        assert_eq!(b, Aabb2::from_array([13.3, 52.4, 13.5, 52.6]));
        assert!(parse_bbox("1,2,3").is_err());
        assert!(parse_bbox("1,2,x,4").is_err());
        assert!(parse_bbox("5,5,1,1").is_err());
    }

    #[test]
    fn ground_width_shrinks_with_latitude() {
        let equator = ground_width_m(&Aabb2::from_array([0.0, -0.5, 1.0, 0.5]));
        let north = ground_width_m(&Aabb2::from_array([0.0, 59.5, 1.0, 60.5]));
        assert!((equator - 111_320.0).abs() < 10.0);
        assert!((north - 55_660.0).abs() < 50.0);
        assert_eq!(height_for_width(&Aabb2::from_array([0.0, 59.5, 1.0, 60.5]), 500), 1000);
    }

    #[test]
    fn explicit_config_path_wins() {
        let p = config_path(Some(Path::new("/tmp/a.json")), "EO_TEST_UNSET_VARIABLE");
        assert_eq!(p, Some(PathBuf::from("/tmp/a.json")));
        assert_eq!(config_path(None, "EO_TEST_UNSET_VARIABLE"), None);
    }

    #[test]
    fn tile_url_expands_coordinates() {
        let f = HttpTileFetcher::new("https://t.test/{x}/{y}.png", reqwest::Client::new());
        assert_eq!(f.tile_url(TileCoord::new(-3, 7)), "https://t.test/-3/7.png");
    }

    #[test]
    fn store_keeps_latest_and_clears_failures() {
        let mut store = TileStore::default();
        let c = TileCoord::new(1, 1);
        store.tile_failed(c, &FetchError::failed("503"));
        assert_eq!(store.failed().len(), 1);
        store.ingest(c, Bytes::from_static(b"a"), 12.0);
        store.ingest(TileCoord::new(2, 1), Bytes::from_static(b"b"), 40.0);
        store.repaint();
        assert!(store.failed().is_empty());
        assert_eq!(store.tiles().len(), 2);
        assert_eq!(store.max_altitude(), Some(40.0));
        assert_eq!(store.repaints(), 1);
    }

    #[test]
    fn index_entries_serialize_camel_case() {
        let t = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let entry = FrameIndexEntry {
            file: Some("frame-000.jpg".into()),
            from_time: t,
            to_time: t,
            is_selected: true,
            error: None,
        };
        let v = serde_json::to_value(&entry).unwrap();
        assert_eq!(v["fromTime"], "2020-01-01T00:00:00Z");
        assert_eq!(v["isSelected"], true);
    }
}
