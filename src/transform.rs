use anyhow::{Result, anyhow};
use image::imageops::{self, FilterType};
use image::{GrayImage, ImageBuffer, Luma, Rgb, Rgba, RgbaImage};
use imageproc::distance_transform::Norm;
use imageproc::geometric_transformations::{Interpolation, Projection, warp_into};
use imageproc::morphology::dilate;
use rand::Rng;
use tracing::debug;

use crate::config::RenderConfig;
use crate::random::symmetric;
use crate::recolor::mul_div255;

/// Alpha of the bleed halo relative to the ink mask (~38%).
pub const BLEED_OPACITY: u8 = 96;
/// Edge blur sigma per unit of `blur_after_bleed`.
pub const EDGE_BLUR_FACTOR: f32 = 0.12;
const MAX_GLYPH_DIMENSION: u32 = 8192;
const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);

type Rgba16Image = ImageBuffer<Rgba<u16>, Vec<u16>>;

/// Random perturbation for one glyph instance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GlyphJitter {
    pub scale: f32,
    pub rotation_deg: f32,
    pub shear: f32,
}

impl GlyphJitter {
    pub fn none() -> Self {
        Self {
            scale: 1.0,
            rotation_deg: 0.0,
            shear: 0.0,
        }
    }

    /// Draws scale, rotation and shear independently; nothing carries over between glyphs.
    pub fn sample<R: Rng>(rng: &mut R, config: &RenderConfig) -> Self {
        Self {
            scale: 1.0 + symmetric(rng, config.max_scale_jitter),
            rotation_deg: symmetric(rng, config.max_rotation),
            shear: symmetric(rng, config.max_shear),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Scale,
    Rotate,
    Shear,
    Bleed,
    EdgeBlur,
}

/// What happens to a glyph when a stage fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fallback {
    /// Continue with the stage input unchanged.
    KeepInput,
    /// Drop the stage output entirely.
    Omit,
}

impl Stage {
    pub fn fallback(self) -> Fallback {
        match self {
            Self::Bleed => Fallback::Omit,
            Self::Scale | Self::Rotate | Self::Shear | Self::EdgeBlur => Fallback::KeepInput,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransformedGlyph {
    pub glyph: RgbaImage,
    /// Halo composited under `glyph` at the same anchor.
    pub bleed: Option<RgbaImage>,
}

/// Scale, rotate and shear a private copy of `glyph`, then derive the bleed
/// layer and soften the edges of the main stroke.
///
/// Returns `None` when a failing stage's policy omits the glyph itself.
pub fn transform(
    glyph: &RgbaImage,
    jitter: &GlyphJitter,
    config: &RenderConfig,
) -> Option<TransformedGlyph> {
    let mut current = glyph.clone();
    current = run_stage(Stage::Scale, current, |image| scale_glyph(image, jitter.scale))?;
    current = run_stage(Stage::Rotate, current, |image| {
        rotate_glyph(image, jitter.rotation_deg)
    })?;
    current = run_stage(Stage::Shear, current, |image| shear_glyph(image, jitter.shear))?;

    let bleed = if config.bleed_amount > 0 {
        run_stage(Stage::Bleed, current.clone(), |image| {
            bleed_layer(image, config.bleed_amount, config.text_color).map(Some)
        })
    } else {
        None
    };

    let sigma = EDGE_BLUR_FACTOR * config.blur_after_bleed;
    current = run_stage(Stage::EdgeBlur, current, |image| soften_edges(image, sigma))?;

    Some(TransformedGlyph {
        glyph: current,
        bleed,
    })
}

fn run_stage<F>(stage: Stage, input: RgbaImage, apply: F) -> Option<RgbaImage>
where
    F: FnOnce(&RgbaImage) -> Result<Option<RgbaImage>>,
{
    apply_with_fallback(stage, stage.fallback(), input, apply)
}

/// Runs one stage; on failure `policy` decides between the untouched input and nothing.
fn apply_with_fallback<F>(
    stage: Stage,
    policy: Fallback,
    input: RgbaImage,
    apply: F,
) -> Option<RgbaImage>
where
    F: FnOnce(&RgbaImage) -> Result<Option<RgbaImage>>,
{
    match apply(&input) {
        Ok(Some(output)) => Some(output),
        Ok(None) => Some(input),
        Err(err) => {
            debug!("{:?} stage failed ({:?}): {}", stage, policy, err);
            match policy {
                Fallback::KeepInput => Some(input),
                Fallback::Omit => None,
            }
        }
    }
}

fn check_dimensions(width: u32, height: u32) -> Result<()> {
    if width == 0 || height == 0 || width > MAX_GLYPH_DIMENSION || height > MAX_GLYPH_DIMENSION {
        return Err(anyhow!("glyph dimensions {}x{} out of range", width, height));
    }
    Ok(())
}

/// Bicubic resize of both dimensions by `factor`.
pub fn scale_glyph(image: &RgbaImage, factor: f32) -> Result<Option<RgbaImage>> {
    if (factor - 1.0).abs() <= 1e-6 {
        return Ok(None);
    }
    if !factor.is_finite() || factor <= 0.0 {
        return Err(anyhow!("invalid scale factor {}", factor));
    }
    let width = ((image.width() as f32 * factor) as u32).max(1);
    let height = ((image.height() as f32 * factor) as u32).max(1);
    check_dimensions(width, height)?;
    Ok(Some(imageops::resize(image, width, height, FilterType::CatmullRom)))
}

/// Rotates about the centre, growing the canvas so no ink is clipped.
pub fn rotate_glyph(image: &RgbaImage, degrees: f32) -> Result<Option<RgbaImage>> {
    if degrees.abs() <= 1e-6 {
        return Ok(None);
    }
    if !degrees.is_finite() {
        return Err(anyhow!("invalid rotation {}", degrees));
    }
    let (width, height) = (image.width() as f32, image.height() as f32);
    let (sin, cos) = degrees.to_radians().sin_cos();
    let new_width = ((width * cos.abs() + height * sin.abs()).ceil() as u32).max(1);
    let new_height = ((width * sin.abs() + height * cos.abs()).ceil() as u32).max(1);
    check_dimensions(new_width, new_height)?;

    // Rotate about the source centre and re-centre on the grown canvas.
    let (cx, cy) = (width / 2.0, height / 2.0);
    let (ncx, ncy) = (new_width as f32 / 2.0, new_height as f32 / 2.0);
    let projection = Projection::from_matrix([
        cos,
        -sin,
        ncx - (cos * cx - sin * cy),
        sin,
        cos,
        ncy - (sin * cx + cos * cy),
        0.0,
        0.0,
        1.0,
    ])
    .ok_or_else(|| anyhow!("rotation matrix is not invertible"))?;
    let mut output = RgbaImage::new(new_width, new_height);
    warp_into(
        image,
        &projection,
        Interpolation::Bicubic,
        TRANSPARENT,
        &mut output,
    );
    Ok(Some(output))
}

/// Horizontal shear by `factor` of the height, widening so no ink is clipped.
pub fn shear_glyph(image: &RgbaImage, factor: f32) -> Result<Option<RgbaImage>> {
    if factor.abs() <= 1e-4 {
        return Ok(None);
    }
    if !factor.is_finite() {
        return Err(anyhow!("invalid shear {}", factor));
    }
    let height = image.height() as f32;
    let extra = (factor.abs() * height).ceil() as u32;
    let new_width = image.width() + extra;
    check_dimensions(new_width, image.height())?;
    let offset = if factor < 0.0 { -factor * height } else { 0.0 };
    let projection = Projection::from_matrix([1.0, factor, offset, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0])
        .ok_or_else(|| anyhow!("shear matrix is not invertible"))?;
    let mut output = RgbaImage::new(new_width, image.height());
    warp_into(
        image,
        &projection,
        Interpolation::Bicubic,
        TRANSPARENT,
        &mut output,
    );
    Ok(Some(output))
}

/// Dilated and blurred copy of the ink mask, filled with `color` at low opacity.
pub fn bleed_layer(glyph: &RgbaImage, amount: u32, color: Rgb<u8>) -> Result<RgbaImage> {
    let radius =
        u8::try_from(amount).map_err(|_| anyhow!("bleed amount {} is too large", amount))?;
    let mask = GrayImage::from_fn(glyph.width(), glyph.height(), |x, y| {
        Luma([glyph.get_pixel(x, y)[3]])
    });
    let spread = dilate(&mask, Norm::LInf, radius);
    let soaked = imageops::blur(&spread, amount as f32);
    let [r, g, b] = color.0;
    Ok(RgbaImage::from_fn(glyph.width(), glyph.height(), |x, y| {
        Rgba([r, g, b, mul_div255(soaked.get_pixel(x, y)[0], BLEED_OPACITY)])
    }))
}

/// Light gaussian blur of the main stroke.
///
/// Blurs premultiplied channels so transparent surroundings do not darken the ink.
pub fn soften_edges(image: &RgbaImage, sigma: f32) -> Result<Option<RgbaImage>> {
    if sigma <= 0.0 {
        return Ok(None);
    }
    if !sigma.is_finite() {
        return Err(anyhow!("invalid blur sigma {}", sigma));
    }
    // Colour channels hold c * a and alpha holds a * 255, both within u16.
    let premultiplied: Rgba16Image = ImageBuffer::from_fn(image.width(), image.height(), |x, y| {
        let [r, g, b, a] = image.get_pixel(x, y).0;
        let a = u16::from(a);
        Rgba([u16::from(r) * a, u16::from(g) * a, u16::from(b) * a, a * 255])
    });
    let blurred = imageops::blur(&premultiplied, sigma);
    Ok(Some(RgbaImage::from_fn(image.width(), image.height(), |x, y| {
        let [r, g, b, a] = blurred.get_pixel(x, y).0;
        let alpha = ((u32::from(a) + 127) / 255).min(255) as u8;
        if alpha == 0 {
            return TRANSPARENT;
        }
        let unpremultiply =
            |c: u16| ((u32::from(c) * 255 + u32::from(a) / 2) / u32::from(a)).min(255) as u8;
        Rgba([unpremultiply(r), unpremultiply(g), unpremultiply(b), alpha])
    })))
}
