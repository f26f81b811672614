use serde::{Deserialize, Serialize};

/// Layout and encoding knobs for burned-in labels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComposerConfig {
    /// JPEG quality, 1-100.
    pub jpeg_quality: u8,
    /// Preferred on-screen length of the scale bar.
    pub scale_bar_target_px: f64,
    pub scale_bar_margin_px: u32,
    /// Glyph height used when a TrueType font is supplied.
    pub label_font_px: f32,
    /// Pixel multiplier for the builtin bitmap font.
    pub builtin_font_scale: u32,
    pub label_padding_px: u32,
    /// Opacity of the box behind the date label, 0-1.
    pub label_background_alpha: f32,
    pub logo_margin_px: u32,
    pub logo_spacing_px: u32,
    pub primary_logo_scale: f32,
    pub secondary_logo_scale: f32,
}

impl Default for ComposerConfig {
    fn default() -> Self {
        Self {
            jpeg_quality: 90,
            scale_bar_target_px: 50.0,
            scale_bar_margin_px: 10,
            label_font_px: 16.0,
            builtin_font_scale: 2,
            label_padding_px: 6,
            label_background_alpha: 0.5,
            logo_margin_px: 8,
            logo_spacing_px: 6,
            primary_logo_scale: 0.5,
            secondary_logo_scale: 0.35,
        }
    }
}

impl ComposerConfig {
    pub fn from_json_str(s: &str) -> Result<Self, serde_json::Error> {
        let cfg: Self = serde_json::from_str(s)?;
        Ok(cfg.clamped())
    }

    /// Pull out-of-range values back to something the encoder accepts.
    pub fn clamped(mut self) -> Self {
        self.jpeg_quality = self.jpeg_quality.clamp(1, 100);
        self.builtin_font_scale = self.builtin_font_scale.max(1);
        self.label_background_alpha = self.label_background_alpha.clamp(0.0, 1.0);
        if !(self.scale_bar_target_px.is_finite() && self.scale_bar_target_px > 0.0) {
            self.scale_bar_target_px = Self::default().scale_bar_target_px;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::ComposerConfig;
    use pretty_assertions::assert_eq;

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg = ComposerConfig::from_json_str(r#"{"jpeg_quality": 75}"#).unwrap();
        assert_eq!(cfg.jpeg_quality, 75);
        assert_eq!(cfg.scale_bar_target_px, 50.0);
    }

    #[test]
    fn out_of_range_values_are_clamped() {
        let cfg = ComposerConfig::from_json_str(
            r#"{"jpeg_quality": 0, "label_background_alpha": 3.0, "scale_bar_target_px": -1}"#,
        )
        .unwrap();
        assert_eq!(cfg.jpeg_quality, 1);
        assert_eq!(cfg.label_background_alpha, 1.0);
        assert_eq!(cfg.scale_bar_target_px, 50.0);
    }
}
