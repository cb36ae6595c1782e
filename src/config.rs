use anyhow::{Result, anyhow};
use image::Rgb;
use serde::Deserialize;
use std::path::PathBuf;

use crate::color::{BLACK, WHITE, resolve_color};
use crate::settings::Settings;

/// A4 in inches.
pub const PAGE_WIDTH_INCHES: f64 = 8.27;
pub const PAGE_HEIGHT_INCHES: f64 = 11.69;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum WrapMode {
    /// Break before any glyph that would cross the right margin.
    #[default]
    Char,
    /// Keep words together when they fit on a fresh line.
    Word,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Margins {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

/// Validated parameters for one generation run.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderConfig {
    pub dpi: u32,
    pub margins: Margins,
    pub text_color: Rgb<u8>,
    pub background_color: Rgb<u8>,
    pub uppercase: bool,
    pub line_spacing: u32,
    pub space_width: Option<u32>,
    pub kerning_jitter: u32,
    pub random_offset: u32,
    pub baseline_jitter: u32,
    pub line_start_jitter: u32,
    pub wrap: WrapMode,
    pub max_rotation: f32,
    pub max_scale_jitter: f32,
    pub max_shear: f32,
    pub bleed_amount: u32,
    pub blur_after_bleed: f32,
    pub paper_texture: Option<PathBuf>,
    pub paper_opacity: f32,
    pub preserve_transparent_background: bool,
    pub add_noise: bool,
    pub noise_level: f32,
    pub auto_trim: bool,
    pub seed: Option<u64>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            dpi: 300,
            margins: Margins {
                left: 100,
                top: 100,
                right: 100,
                bottom: 100,
            },
            text_color: BLACK,
            background_color: WHITE,
            uppercase: false,
            line_spacing: 18,
            space_width: None,
            kerning_jitter: 2,
            random_offset: 3,
            baseline_jitter: 6,
            line_start_jitter: 5,
            wrap: WrapMode::Char,
            max_rotation: 6.0,
            max_scale_jitter: 0.06,
            max_shear: 0.06,
            bleed_amount: 2,
            blur_after_bleed: 0.8,
            paper_texture: None,
            paper_opacity: 1.0,
            preserve_transparent_background: false,
            add_noise: true,
            noise_level: 0.02,
            auto_trim: true,
            seed: None,
        }
    }
}

impl RenderConfig {
    /// A configuration with every random magnitude, bleed, blur and grain switched off.
    pub fn steady() -> Self {
        Self {
            kerning_jitter: 0,
            random_offset: 0,
            baseline_jitter: 0,
            line_start_jitter: 0,
            max_rotation: 0.0,
            max_scale_jitter: 0.0,
            max_shear: 0.0,
            bleed_amount: 0,
            blur_after_bleed: 0.0,
            add_noise: false,
            noise_level: 0.0,
            ..Self::default()
        }
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        if settings.dpi == 0 {
            return Err(anyhow!("dpi must be positive"));
        }
        for (name, value) in [
            ("max_rotation", settings.max_rotation),
            ("max_scale_jitter", settings.max_scale_jitter),
            ("max_shear", settings.max_shear),
            ("blur_after_bleed", settings.blur_after_bleed),
            ("noise_level", settings.noise_level),
            ("paper_opacity", settings.paper_opacity),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(anyhow!("{} must be a non-negative number (got {})", name, value));
            }
        }
        if settings.max_scale_jitter >= 1.0 {
            return Err(anyhow!(
                "max_scale_jitter must be below 1.0 (got {})",
                settings.max_scale_jitter
            ));
        }

        let config = Self {
            dpi: settings.dpi,
            margins: Margins {
                left: settings.margin_left,
                top: settings.margin_top,
                right: settings.margin_right,
                bottom: settings.margin_bottom,
            },
            text_color: resolve_color(&settings.text_color, BLACK, "text"),
            background_color: resolve_color(&settings.background_color, WHITE, "background"),
            uppercase: settings.uppercase,
            line_spacing: settings.line_spacing,
            space_width: settings.space_width,
            kerning_jitter: settings.kerning_jitter,
            random_offset: settings.random_offset,
            baseline_jitter: settings.baseline_jitter,
            line_start_jitter: settings.line_start_jitter,
            wrap: settings.wrap,
            max_rotation: settings.max_rotation,
            max_scale_jitter: settings.max_scale_jitter,
            max_shear: settings.max_shear,
            bleed_amount: settings.bleed_amount,
            blur_after_bleed: settings.blur_after_bleed,
            paper_texture: settings.paper_texture.as_ref().map(PathBuf::from),
            paper_opacity: settings.paper_opacity.min(1.0),
            preserve_transparent_background: settings.preserve_transparent_background,
            add_noise: settings.add_noise,
            noise_level: settings.noise_level,
            auto_trim: settings.auto_trim,
            seed: settings.seed,
        };

        let (width, height) = config.page_size();
        if config.margins.left.saturating_add(config.margins.right) >= width
            || config.margins.top.saturating_add(config.margins.bottom) >= height
        {
            return Err(anyhow!(
                "margins leave no room on a {}x{} page at {} dpi",
                width,
                height,
                config.dpi
            ));
        }
        Ok(config)
    }

    /// Page pixel dimensions: A4 at the configured density.
    pub fn page_size(&self) -> (u32, u32) {
        let dpi = self.dpi as f64;
        (
            (PAGE_WIDTH_INCHES * dpi) as u32,
            (PAGE_HEIGHT_INCHES * dpi) as u32,
        )
    }
}
