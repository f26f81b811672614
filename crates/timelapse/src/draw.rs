//! Pixel helpers for annotating RGBA canvases.

use image::{Rgba, RgbaImage};

/// Source-over blend of `color` scaled by `coverage` into one pixel; out of bounds is a no-op.
pub fn blend_pixel(canvas: &mut RgbaImage, x: i64, y: i64, color: Rgba<u8>, coverage: f32) {
    if x < 0 || y < 0 || x >= canvas.width() as i64 || y >= canvas.height() as i64 {
        return;
    }
    let alpha = (color[3] as f32 / 255.0) * coverage.clamp(0.0, 1.0);
    if alpha <= 0.0 {
        return;
    }
    let dst = canvas.get_pixel_mut(x as u32, y as u32);
    for c in 0..3 {
        let blended = color[c] as f32 * alpha + dst[c] as f32 * (1.0 - alpha);
        dst[c] = blended.round().clamp(0.0, 255.0) as u8;
    }
    let out_alpha = alpha + dst[3] as f32 / 255.0 * (1.0 - alpha);
    dst[3] = (out_alpha * 255.0).round().clamp(0.0, 255.0) as u8;
}

pub fn fill_rect(canvas: &mut RgbaImage, x: i64, y: i64, w: u32, h: u32, color: Rgba<u8>) {
    for py in y..y + h as i64 {
        for px in x..x + w as i64 {
            blend_pixel(canvas, px, py, color, 1.0);
        }
    }
}

pub fn with_alpha(color: Rgba<u8>, alpha: f32) -> Rgba<u8> {
    Rgba([
        color[0],
        color[1],
        color[2],
        (alpha.clamp(0.0, 1.0) * 255.0).round() as u8,
    ])
}
