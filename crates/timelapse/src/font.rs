use ab_glyph::{Font, FontVec, PxScale, ScaleFont, point};
use image::{Rgba, RgbaImage};

use crate::draw::blend_pixel;
use crate::error::ComposeError;

const GLYPH_W: u32 = 5;
const GLYPH_H: u32 = 7;
const UNKNOWN: [u8; 7] = [0x1F, 0x11, 0x11, 0x11, 0x11, 0x11, 0x1F];

/// 5x7 rows, most significant of the low five bits is the leftmost column.
fn builtin_glyph(c: char) -> [u8; 7] {
    match c {
        '0' => [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
        '1' => [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
        '2' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
        '3' => [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E],
        '4' => [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
        '5' => [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
        '6' => [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
        '7' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
        '9' => [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
        '-' => [0x00, 0x00, 0x00, 0x1F, 0x00, 0x00, 0x00],
        ':' => [0x00, 0x0C, 0x0C, 0x00, 0x0C, 0x0C, 0x00],
        '.' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x0C, 0x0C],
        '/' => [0x00, 0x01, 0x02, 0x04, 0x08, 0x10, 0x00],
        ' ' => [0x00; 7],
        'k' => [0x10, 0x10, 0x12, 0x14, 0x18, 0x14, 0x12],
        'm' => [0x00, 0x00, 0x1A, 0x15, 0x15, 0x11, 0x11],
        'T' => [0x1F, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04],
        'Z' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x10, 0x1F],
        _ => UNKNOWN,
    }
}

/// Font used for dates and scale bar labels.
///
/// The builtin bitmap covers digits and the punctuation of numeric dates and
/// distances; anything else renders as a box. Load a TrueType font for free text.
pub enum LabelFont {
    Builtin { scale: u32 },
    Outline { font: FontVec, px: f32 },
}

impl Default for LabelFont {
    fn default() -> Self {
        LabelFont::Builtin { scale: 2 }
    }
}

impl std::fmt::Debug for LabelFont {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LabelFont::Builtin { scale } => f.debug_struct("Builtin").field("scale", scale).finish(),
            LabelFont::Outline { px, .. } => f.debug_struct("Outline").field("px", px).finish(),
        }
    }
}

impl LabelFont {
    pub fn builtin(scale: u32) -> Self {
        LabelFont::Builtin {
            scale: scale.max(1),
        }
    }

    pub fn from_ttf(bytes: Vec<u8>, px: f32) -> Result<Self, ComposeError> {
        let font = FontVec::try_from_vec(bytes).map_err(|e| ComposeError::Font(e.to_string()))?;
        Ok(LabelFont::Outline { font, px })
    }

    /// Width and height of `text` in pixels.
    pub fn measure(&self, text: &str) -> (u32, u32) {
        match self {
            LabelFont::Builtin { scale } => {
                let n = text.chars().count() as u32;
                let advance = (GLYPH_W + 1) * scale;
                let width = (n * advance).saturating_sub(*scale);
                (width, GLYPH_H * scale)
            }
            LabelFont::Outline { font, px } => {
                let scaled = font.as_scaled(PxScale::from(*px));
                let width: f32 = text
                    .chars()
                    .map(|c| scaled.h_advance(scaled.glyph_id(c)))
                    .sum();
                let height = scaled.ascent() - scaled.descent();
                (width.ceil() as u32, height.ceil() as u32)
            }
        }
    }

    /// Draw `text` with its top-left corner at (`x`, `y`).
    pub fn draw(&self, canvas: &mut RgbaImage, x: i64, y: i64, text: &str, color: Rgba<u8>) {
        match self {
            LabelFont::Builtin { scale } => {
                let scale = *scale as i64;
                let advance = (GLYPH_W as i64 + 1) * scale;
                for (i, c) in text.chars().enumerate() {
                    let gx = x + i as i64 * advance;
                    for (row, bits) in builtin_glyph(c).iter().enumerate() {
                        for col in 0..GLYPH_W as i64 {
                            if (bits >> (GLYPH_W as i64 - 1 - col)) & 1 == 0 {
                                continue;
                            }
                            let px = gx + col * scale;
                            let py = y + row as i64 * scale;
                            for dy in 0..scale {
                                for dx in 0..scale {
                                    blend_pixel(canvas, px + dx, py + dy, color, 1.0);
                                }
                            }
                        }
                    }
                }
            }
            LabelFont::Outline { font, px } => {
                let scale = PxScale::from(*px);
                let scaled = font.as_scaled(scale);
                let baseline = y as f32 + scaled.ascent();
                let mut caret = x as f32;
                for c in text.chars() {
                    let id = scaled.glyph_id(c);
                    let glyph = id.with_scale_and_position(scale, point(caret, baseline));
                    caret += scaled.h_advance(id);
                    let Some(outlined) = font.outline_glyph(glyph) else {
                        continue;
                    };
                    let bounds = outlined.px_bounds();
                    let (ox, oy) = (bounds.min.x as i64, bounds.min.y as i64);
                    outlined.draw(|gx, gy, coverage| {
                        blend_pixel(canvas, ox + gx as i64, oy + gy as i64, color, coverage);
                    });
                }
            }
        }
    }
}
