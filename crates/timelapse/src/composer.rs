use std::io::Cursor;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use foundation::Aabb2;
use futures_util::future::try_join_all;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use tracing::{debug, warn};

use crate::config::ComposerConfig;
use crate::draw::{fill_rect, with_alpha};
use crate::error::ComposeError;
use crate::font::LabelFont;
use crate::overlay::{OverlayClient, OverlayProvider};

const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);
const BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);

/// Round to one significant "nice" step: a multiple of half the nearest power of ten.
///
/// `1876.0` becomes `2000.0`, `130.0` becomes `150.0`.
pub fn round_to_nice_factor(value: f64) -> f64 {
    if !(value.is_finite() && value > 0.0) {
        return 0.0;
    }
    let step = 10f64.powf(value.log10().round()) / 2.0;
    (value / step).round() * step
}

/// A scale bar whose length is a nice ground distance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleBar {
    pub meters: f64,
    pub width_px: f64,
}

impl ScaleBar {
    /// Pick a bar close to `target_px` long for an image `image_width` pixels wide
    /// showing `ground_width_m` meters.
    pub fn for_view(image_width: u32, ground_width_m: f64, target_px: f64) -> Option<Self> {
        if image_width == 0 || !(ground_width_m.is_finite() && ground_width_m > 0.0) {
            return None;
        }
        let meters_per_px = ground_width_m / image_width as f64;
        let meters = round_to_nice_factor(target_px * meters_per_px);
        if meters <= 0.0 {
            return None;
        }
        Some(Self {
            meters,
            width_px: meters / meters_per_px,
        })
    }

    pub fn label(&self) -> String {
        if self.meters >= 1000.0 {
            let km = self.meters / 1000.0;
            if km.fract() == 0.0 {
                format!("{km:.0} km")
            } else {
                format!("{km} km")
            }
        } else {
            format!("{:.0} m", self.meters)
        }
    }
}

/// Encoded branding logos, decoded lazily when a frame asks for them.
#[derive(Debug, Clone)]
pub struct BrandingLogos {
    pub primary: Bytes,
    pub secondary: Bytes,
}

pub fn encode_jpeg(image: &RgbaImage, quality: u8) -> Result<Vec<u8>, ComposeError> {
    let rgb = DynamicImage::ImageRgba8(image.clone()).into_rgb8();
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality)
        .encode_image(&rgb)
        .map_err(ComposeError::Encode)?;
    Ok(out)
}

pub fn jpeg_data_url(jpeg: &[u8]) -> String {
    format!("data:image/jpeg;base64,{}", STANDARD.encode(jpeg))
}

fn decode_rgba(bytes: &[u8], what: &'static str) -> Result<RgbaImage, ComposeError> {
    Ok(image::load_from_memory(bytes)
        .map_err(ComposeError::decode(what))?
        .to_rgba8())
}

fn fit(image: RgbaImage, width: u32, height: u32) -> RgbaImage {
    if image.dimensions() == (width, height) {
        image
    } else {
        imageops::resize(&image, width, height, FilterType::Triangle)
    }
}

fn scaled(image: &RgbaImage, factor: f32) -> RgbaImage {
    let w = ((image.width() as f32 * factor).round() as u32).max(1);
    let h = ((image.height() as f32 * factor).round() as u32).max(1);
    imageops::resize(image, w, h, FilterType::Triangle)
}

/// Composites overlays onto frames and burns in the date, scale bar and logos.
#[derive(Debug, Default)]
pub struct FrameComposer {
    config: ComposerConfig,
    font: LabelFont,
    logos: Option<BrandingLogos>,
}

impl FrameComposer {
    pub fn new(config: ComposerConfig) -> Self {
        let font = LabelFont::builtin(config.builtin_font_scale);
        Self {
            config,
            font,
            logos: None,
        }
    }

    pub fn with_font(mut self, font: LabelFont) -> Self {
        self.font = font;
        self
    }

    pub fn with_logos(mut self, logos: BrandingLogos) -> Self {
        self.logos = Some(logos);
        self
    }

    pub fn config(&self) -> &ComposerConfig {
        &self.config
    }

    /// Draw `base` on an `out_width x out_height` surface, add every overlay in
    /// `sort_index` order and return PNG bytes.
    ///
    /// If anything fails to fetch or decode, the whole composite is abandoned and
    /// `base` comes back unchanged.
    #[allow(clippy::too_many_arguments)]
    pub async fn compose_frame<C>(
        &self,
        client: &C,
        base: &Bytes,
        width: u32,
        height: u32,
        bbox: &Aabb2,
        overlays: &[Box<dyn OverlayProvider>],
        out_width: u32,
        out_height: u32,
    ) -> Bytes
    where
        C: OverlayClient + ?Sized,
    {
        match self
            .try_compose(client, base, width, height, bbox, overlays, out_width, out_height)
            .await
        {
            Ok(png) => Bytes::from(png),
            Err(err) => {
                warn!(error = %err, overlays = overlays.len(), "overlay compositing failed, using base image");
                base.clone()
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn try_compose<C>(
        &self,
        client: &C,
        base: &[u8],
        width: u32,
        height: u32,
        bbox: &Aabb2,
        overlays: &[Box<dyn OverlayProvider>],
        out_width: u32,
        out_height: u32,
    ) -> Result<Vec<u8>, ComposeError>
    where
        C: OverlayClient + ?Sized,
    {
        if out_width == 0 || out_height == 0 {
            return Err(ComposeError::InvalidSize {
                width: out_width,
                height: out_height,
            });
        }

        let requests: Vec<_> = overlays
            .iter()
            .map(|o| o.request(width, height, bbox))
            .collect();
        let fetched = try_join_all(requests.iter().map(|r| client.get(r))).await?;

        let mut layers: Vec<(i32, Bytes)> = requests
            .iter()
            .map(|r| r.sort_index)
            .zip(fetched)
            .collect();
        layers.sort_by_key(|(index, _)| *index);

        let mut canvas = fit(decode_rgba(base, "base image")?, out_width, out_height);
        for (index, bytes) in &layers {
            let layer = fit(decode_rgba(bytes, "overlay")?, out_width, out_height);
            imageops::overlay(&mut canvas, &layer, 0, 0);
            debug!(sort_index = index, "overlay drawn");
        }

        let mut out = Vec::new();
        DynamicImage::ImageRgba8(canvas)
            .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
            .map_err(ComposeError::Encode)?;
        Ok(out)
    }

    /// Burn in the labels and return the frame as a JPEG data URL.
    pub fn apply_labels_and_logos(
        &self,
        date_label: &str,
        image: &[u8],
        width: u32,
        height: u32,
        ground_width_m: f64,
        show_logos: bool,
    ) -> Result<String, ComposeError> {
        let jpeg = self.render_labels_and_logos(
            date_label,
            image,
            width,
            height,
            ground_width_m,
            show_logos,
        )?;
        Ok(jpeg_data_url(&jpeg))
    }

    /// Same as [`FrameComposer::apply_labels_and_logos`] but returns raw JPEG bytes.
    pub fn render_labels_and_logos(
        &self,
        date_label: &str,
        image: &[u8],
        width: u32,
        height: u32,
        ground_width_m: f64,
        show_logos: bool,
    ) -> Result<Bytes, ComposeError> {
        if width == 0 || height == 0 {
            return Err(ComposeError::InvalidSize { width, height });
        }
        let mut canvas = fit(decode_rgba(image, "frame")?, width, height);

        self.draw_date_label(&mut canvas, date_label);
        if let Some(bar) =
            ScaleBar::for_view(width, ground_width_m, self.config.scale_bar_target_px)
        {
            self.draw_scale_bar(&mut canvas, &bar);
        }
        if show_logos {
            self.draw_logos(&mut canvas)?;
        }

        let jpeg = encode_jpeg(&canvas, self.config.jpeg_quality)?;
        Ok(Bytes::from(jpeg))
    }

    fn backdrop(&self) -> Rgba<u8> {
        with_alpha(BLACK, self.config.label_background_alpha)
    }

    /// Date in a translucent box flush with the top-right corner.
    fn draw_date_label(&self, canvas: &mut RgbaImage, label: &str) {
        let pad = self.config.label_padding_px;
        let (tw, th) = self.font.measure(label);
        let (bw, bh) = (tw + 2 * pad, th + 2 * pad);
        let x = canvas.width() as i64 - bw as i64;
        fill_rect(canvas, x, 0, bw, bh, self.backdrop());
        self.font.draw(canvas, x + pad as i64, pad as i64, label, WHITE);
    }

    /// Bar with end ticks in the bottom-left corner, distance label centred above.
    fn draw_scale_bar(&self, canvas: &mut RgbaImage, bar: &ScaleBar) {
        let margin = self.config.scale_bar_margin_px as i64;
        let pad = self.config.label_padding_px as i64;
        let label = bar.label();
        let (tw, th) = self.font.measure(&label);
        let bar_w = bar.width_px.round().max(1.0) as i64;
        let tick = 6;

        let x0 = margin;
        let bar_y = canvas.height() as i64 - margin - 2;
        let text_y = bar_y - tick - pad - th as i64;
        let text_x = x0 + bar_w / 2 - tw as i64 / 2;

        let left = x0.min(text_x) - pad;
        let right = (x0 + bar_w).max(text_x + tw as i64) + pad;
        let top = text_y - pad;
        let bottom = bar_y + 2 + pad;
        fill_rect(
            canvas,
            left,
            top,
            (right - left) as u32,
            (bottom - top) as u32,
            self.backdrop(),
        );

        fill_rect(canvas, x0, bar_y, bar_w as u32, 2, WHITE);
        fill_rect(canvas, x0, bar_y - tick, 2, tick as u32 + 2, WHITE);
        fill_rect(canvas, x0 + bar_w - 2, bar_y - tick, 2, tick as u32 + 2, WHITE);
        self.font.draw(canvas, text_x, text_y, &label, WHITE);
    }

    /// Logos stacked in the bottom-right corner, secondary below primary, right aligned.
    fn draw_logos(&self, canvas: &mut RgbaImage) -> Result<(), ComposeError> {
        let logos = self.logos.as_ref().ok_or(ComposeError::MissingLogos)?;
        let primary = scaled(
            &decode_rgba(&logos.primary, "primary logo")?,
            self.config.primary_logo_scale,
        );
        let secondary = scaled(
            &decode_rgba(&logos.secondary, "secondary logo")?,
            self.config.secondary_logo_scale,
        );

        let margin = self.config.logo_margin_px as i64;
        let right = canvas.width() as i64 - margin;
        let secondary_y = canvas.height() as i64 - margin - secondary.height() as i64;
        let primary_y =
            secondary_y - self.config.logo_spacing_px as i64 - primary.height() as i64;

        imageops::overlay(canvas, &secondary, right - secondary.width() as i64, secondary_y);
        imageops::overlay(canvas, &primary, right - primary.width() as i64, primary_y);
        Ok(())
    }
}
