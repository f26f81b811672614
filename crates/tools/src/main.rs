use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use clap::{Parser, Subcommand};
use runtime::cancel::CancelHandle;
use serde_json::json;
use streaming::{
    PerspectiveCamera, TileFetchScheduler, compute_visible_tiles, in_priority_order,
    spawn_streaming,
};
use timelapse::{
    BrandingLogos, Flyover, FrameComposer, FrameFilter, HttpFrameSource, HttpOverlayClient,
    LabelFont, Period, TimelapseRequest, TimelapseSession, WmsOverlay, plan_frames,
};
use tools::{
    FrameIndexEntry, HttpTileFetcher, TileStore, ground_width_m, height_for_width,
    load_composer_config, load_streaming_config, parse_bbox,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

type CliResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

#[derive(Parser, Debug)]
#[command(author, version, about = "Earth observation tile streaming and timelapse tools")]
struct Args {
    /// Streaming or composer config JSON (falls back to EO_STREAMING_CONFIG / EO_COMPOSER_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Pick the best flyover per interval
    Select {
        /// JSON array of flyovers
        #[arg(long)]
        flyovers: PathBuf,

        /// orbit, day, week, month or year
        #[arg(long, default_value = "orbit")]
        period: Period,

        #[arg(long, default_value_t = 100.0)]
        max_cloud: f64,

        #[arg(long, default_value_t = 0.0)]
        min_coverage: f64,
    },

    /// List the tiles a camera sees, in fetch order
    Tiles {
        /// JSON camera: position, forward, optional up / fov_y_deg / aspect
        #[arg(long)]
        camera: PathBuf,
    },

    /// Burn a date, scale bar and optional logos into an image
    BurnIn {
        #[arg(long)]
        input: PathBuf,

        #[arg(long)]
        output: PathBuf,

        /// Text for the top-right date box
        #[arg(long)]
        date: String,

        /// Ground distance across the image width
        #[arg(long, conflicts_with = "bbox")]
        ground_width_m: Option<f64>,

        /// minLon,minLat,maxLon,maxLat; used to derive the ground width
        #[arg(long)]
        bbox: Option<String>,

        #[command(flatten)]
        branding: Branding,

        /// Write a data URL instead of raw JPEG
        #[arg(long)]
        data_url: bool,
    },

    /// Fetch, composite and label one frame per interval
    Timelapse {
        #[arg(long)]
        flyovers: PathBuf,

        /// Imagery URL template with {from}, {to} and {date}
        #[arg(long)]
        url: String,

        /// minLon,minLat,maxLon,maxLat
        #[arg(long)]
        bbox: String,

        #[arg(long, default_value_t = 512)]
        width: u32,

        #[arg(long, default_value = "month")]
        period: Period,

        #[arg(long, default_value_t = 100.0)]
        max_cloud: f64,

        #[arg(long, default_value_t = 0.0)]
        min_coverage: f64,

        /// WMS overlay base URL; repeat for more layers, drawn in order
        #[arg(long = "overlay")]
        overlays: Vec<String>,

        #[arg(long, default_value = "%Y-%m-%d")]
        date_format: String,

        #[arg(long, default_value_t = 4)]
        max_in_flight: usize,

        #[command(flatten)]
        branding: Branding,

        #[arg(long, default_value = "timelapse")]
        out: PathBuf,
    },

    /// Stream tiles for a sequence of camera poses
    Stream {
        /// JSON array of cameras, replayed in order
        #[arg(long)]
        cameras: PathBuf,

        /// Tile URL template with {x} and {y}
        #[arg(long)]
        url: String,

        /// Delay between camera poses
        #[arg(long, default_value_t = 100)]
        interval_ms: u64,

        /// Time to let outstanding fetches land after the last pose
        #[arg(long, default_value_t = 3000)]
        settle_ms: u64,

        #[arg(long, default_value = "tiles")]
        out: PathBuf,
    },
}

#[derive(clap::Args, Debug)]
struct Branding {
    /// TrueType font for labels (builtin bitmap font otherwise)
    #[arg(long)]
    font: Option<PathBuf>,

    #[arg(long, requires = "logo_secondary")]
    logo_primary: Option<PathBuf>,

    #[arg(long, requires = "logo_primary")]
    logo_secondary: Option<PathBuf>,
}

impl Branding {
    fn show_logos(&self) -> bool {
        self.logo_primary.is_some()
    }

    async fn composer(&self, config: Option<&Path>) -> CliResult<FrameComposer> {
        let config = load_composer_config(config)?;
        let font_px = config.label_font_px;
        let mut composer = FrameComposer::new(config);
        if let Some(path) = &self.font {
            let bytes = tokio::fs::read(path).await?;
            composer = composer.with_font(LabelFont::from_ttf(bytes, font_px)?);
        }
        if let (Some(primary), Some(secondary)) = (&self.logo_primary, &self.logo_secondary) {
            composer = composer.with_logos(BrandingLogos {
                primary: Bytes::from(tokio::fs::read(primary).await?),
                secondary: Bytes::from(tokio::fs::read(secondary).await?),
            });
        }
        Ok(composer)
    }
}

#[tokio::main]
async fn main() -> CliResult {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = args.config.as_deref();

    match args.command {
        Command::Select {
            flyovers,
            period,
            max_cloud,
            min_coverage,
        } => select(&flyovers, period, filter(max_cloud, min_coverage)).await?,
        Command::Tiles { camera } => tiles(&camera, config).await?,
        Command::BurnIn {
            input,
            output,
            date,
            ground_width_m,
            bbox,
            branding,
            data_url,
        } => {
            let ground_width = match (ground_width_m, bbox) {
                (Some(m), _) => m,
                (None, Some(b)) => tools::ground_width_m(&parse_bbox(&b)?),
                (None, None) => 0.0,
            };
            let composer = branding.composer(config).await?;
            burn_in(
                &composer,
                &input,
                &output,
                &date,
                ground_width,
                branding.show_logos(),
                data_url,
            )
            .await?
        }
        Command::Timelapse {
            flyovers,
            url,
            bbox,
            width,
            period,
            max_cloud,
            min_coverage,
            overlays,
            date_format,
            max_in_flight,
            branding,
            out,
        } => {
            let bbox = parse_bbox(&bbox)?;
            let height = height_for_width(&bbox, width);
            let mut request = TimelapseRequest::new(period, bbox, width, height);
            request.filter = filter(max_cloud, min_coverage);
            request.ground_width_m = ground_width_m(&bbox);
            request.show_branding_logos = branding.show_logos();
            request.date_format = date_format;
            request.max_in_flight = max_in_flight;
            request.validate()?;

            let composer = branding.composer(config).await?;
            timelapse(&flyovers, &url, overlays, composer, &request, &out).await?
        }
        Command::Stream {
            cameras,
            url,
            interval_ms,
            settle_ms,
            out,
        } => {
            stream(
                &cameras,
                &url,
                config,
                Duration::from_millis(interval_ms),
                Duration::from_millis(settle_ms),
                &out,
            )
            .await?
        }
    }

    Ok(())
}

fn filter(max_cloud: f64, min_coverage: f64) -> FrameFilter {
    FrameFilter {
        max_cloud_cover_percent: max_cloud,
        min_coverage_percent: min_coverage,
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> CliResult<T> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| format!("read {}: {e}", path.display()))?;
    Ok(serde_json::from_str(&text).map_err(|e| format!("parse {}: {e}", path.display()))?)
}

async fn select(path: &Path, period: Period, filter: FrameFilter) -> CliResult {
    let flyovers: Vec<Flyover> = read_json(path).await?;
    let planned = plan_frames(&flyovers, period, &filter);
    info!(candidates = flyovers.len(), selected = planned.len(), %period, "flyovers selected");

    let out: Vec<_> = planned
        .iter()
        .map(|p| json!({ "flyover": p.flyover, "isSelected": p.is_selected }))
        .collect();
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

async fn tiles(path: &Path, config: Option<&Path>) -> CliResult {
    let camera: PerspectiveCamera = read_json(path).await?;
    let config = load_streaming_config(config)?;
    let desired = compute_visible_tiles(&camera, config.tile_size(), config.max_distance());
    for tile in in_priority_order(&desired) {
        println!("{}\t{}\t{}", tile.coord.x, tile.coord.y, tile.distance);
    }
    info!(tiles = desired.len(), "visible tiles");
    Ok(())
}

async fn burn_in(
    composer: &FrameComposer,
    input: &Path,
    output: &Path,
    date: &str,
    ground_width_m: f64,
    show_logos: bool,
    data_url: bool,
) -> CliResult {
    let bytes = tokio::fs::read(input).await?;
    let (width, height) = image_size(&bytes)?;
    if data_url {
        let url = composer.apply_labels_and_logos(
            date,
            &bytes,
            width,
            height,
            ground_width_m,
            show_logos,
        )?;
        tokio::fs::write(output, url).await?;
    } else {
        let jpeg = composer.render_labels_and_logos(
            date,
            &bytes,
            width,
            height,
            ground_width_m,
            show_logos,
        )?;
        tokio::fs::write(output, &jpeg).await?;
    }
    info!(output = %output.display(), width, height, "frame written");
    Ok(())
}

fn image_size(bytes: &[u8]) -> CliResult<(u32, u32)> {
    let reader = image::ImageReader::new(std::io::Cursor::new(bytes)).with_guessed_format()?;
    Ok(reader.into_dimensions()?)
}

async fn timelapse(
    flyovers_path: &Path,
    url: &str,
    overlays: Vec<String>,
    composer: FrameComposer,
    request: &TimelapseRequest,
    out: &Path,
) -> CliResult {
    let flyovers: Vec<Flyover> = read_json(flyovers_path).await?;
    tokio::fs::create_dir_all(out).await?;

    let client = reqwest::Client::new();
    let source = Arc::new(HttpFrameSource::with_client(url, client.clone()));
    let mut session = TimelapseSession::new(source, HttpOverlayClient::new(client), composer);
    for (sort_index, overlay_url) in overlays.into_iter().enumerate() {
        session = session.with_overlay(WmsOverlay {
            url: overlay_url,
            params: Default::default(),
            sort_index: sort_index as i32,
        });
    }

    let abort = CancelHandle::new();
    let on_ctrl_c = abort.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling outstanding frames");
            on_ctrl_c.request_cancel();
        }
    });

    let results = session.run(&flyovers, request, &abort).await;

    let mut index = Vec::with_capacity(results.len());
    for (i, outcome) in results.iter().enumerate() {
        let mut entry = FrameIndexEntry {
            file: None,
            from_time: outcome.flyover.from_time,
            to_time: outcome.flyover.to_time,
            is_selected: false,
            error: None,
        };
        match &outcome.result {
            Ok(frame) => {
                let name = format!("frame-{i:03}.jpg");
                tokio::fs::write(out.join(&name), &frame.bytes).await?;
                entry.file = Some(name);
                entry.is_selected = frame.is_selected;
            }
            Err(err) => entry.error = Some(err.to_string()),
        }
        index.push(entry);
    }

    let index_path = out.join("index.json");
    tokio::fs::write(&index_path, serde_json::to_vec_pretty(&index)?).await?;
    let written = index.iter().filter(|e| e.file.is_some()).count();
    info!(frames = index.len(), written, index = %index_path.display(), "timelapse written");

    if abort.is_cancelled() {
        return Err("timelapse interrupted".into());
    }
    Ok(())
}

async fn stream(
    cameras_path: &Path,
    url: &str,
    config: Option<&Path>,
    interval: Duration,
    settle: Duration,
    out: &Path,
) -> CliResult {
    let cameras: Vec<PerspectiveCamera> = read_json(cameras_path).await?;
    let config = load_streaming_config(config)?;
    let fetcher = Arc::new(HttpTileFetcher::new(url, reqwest::Client::new()));
    let scheduler = TileFetchScheduler::new(config, fetcher, TileStore::default())?;

    let (viewports, handle) = spawn_streaming(scheduler, 16);
    for camera in cameras {
        if viewports.send(camera).await.is_err() {
            break;
        }
        tokio::time::sleep(interval).await;
    }
    tokio::time::sleep(settle).await;
    drop(viewports);

    let scheduler = handle.await?;
    let store = scheduler.sink();

    tokio::fs::create_dir_all(out).await?;
    let mut manifest = Vec::with_capacity(store.tiles().len());
    for (coord, (payload, max_altitude)) in store.tiles() {
        let name = format!("{coord}.bin");
        tokio::fs::write(out.join(&name), payload).await?;
        manifest.push(json!({
            "x": coord.x,
            "y": coord.y,
            "file": name,
            "maxAltitude": max_altitude,
        }));
    }
    let failed: Vec<_> = store
        .failed()
        .iter()
        .map(|(coord, reason)| json!({ "x": coord.x, "y": coord.y, "error": reason }))
        .collect();
    let manifest = json!({
        "tiles": manifest,
        "failed": failed,
        "maxAltitude": store.max_altitude(),
    });
    tokio::fs::write(out.join("tiles.json"), serde_json::to_vec_pretty(&manifest)?).await?;

    info!(
        stats = %scheduler.stats(),
        tiles = store.tiles().len(),
        repaints = store.repaints(),
        "streaming finished"
    );
    Ok(())
}
