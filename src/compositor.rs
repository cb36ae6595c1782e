use anyhow::{Context, Result};
use image::imageops::{self, FilterType};
use image::{DynamicImage, Rgb, RgbImage, RgbaImage};
use rand::Rng;
use rand::rngs::StdRng;
use rand_distr::StandardNormal;
use std::path::Path;

use crate::config::RenderConfig;
use crate::layout::Canvas;
use crate::recolor::mul_div255;

/// Per-pixel grain applied to the finished page.
pub trait GrainSource {
    fn apply(&self, image: &mut DynamicImage, rng: &mut StdRng);
}

/// Leaves the page untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoGrain;

impl GrainSource for NoGrain {
    fn apply(&self, _image: &mut DynamicImage, _rng: &mut StdRng) {}
}

/// Zero-mean gaussian noise with standard deviation `level` (in 0..1 channel units).
#[derive(Debug, Clone, Copy)]
pub struct GaussianGrain {
    pub level: f32,
}

impl GrainSource for GaussianGrain {
    fn apply(&self, image: &mut DynamicImage, rng: &mut StdRng) {
        match image {
            DynamicImage::ImageRgb8(rgb) => {
                for channel in rgb.iter_mut() {
                    *channel = self.perturb(*channel, rng);
                }
            }
            DynamicImage::ImageRgba8(rgba) => {
                // Alpha stays as laid out so transparent paper remains transparent.
                for pixel in rgba.pixels_mut() {
                    for channel in pixel.0.iter_mut().take(3) {
                        *channel = self.perturb(*channel, rng);
                    }
                }
            }
            other => tracing::debug!("grain: unsupported color type {:?}", other.color()),
        }
    }
}

impl GaussianGrain {
    fn perturb(&self, value: u8, rng: &mut StdRng) -> u8 {
        let noise: f32 = rng.sample(StandardNormal);
        let shifted = value as f32 / 255.0 + noise * self.level;
        (shifted.clamp(0.0, 1.0) * 255.0).round() as u8
    }
}

/// Grain strategy selected by configuration.
pub fn grain_for(config: &RenderConfig) -> Box<dyn GrainSource> {
    if config.add_noise && config.noise_level > 0.0 {
        Box::new(GaussianGrain {
            level: config.noise_level,
        })
    } else {
        Box::new(NoGrain)
    }
}

/// Loads a paper texture and stretches it to the page.
pub fn load_paper_texture(path: &Path, width: u32, height: u32) -> Result<RgbImage> {
    let texture = image::open(path)
        .with_context(|| format!("failed to open paper texture: {}", path.display()))?
        .to_rgb8();
    Ok(imageops::resize(&texture, width, height, FilterType::CatmullRom))
}

/// Merges the glyph canvas into the final page.
pub fn finalize(
    canvas: Canvas,
    config: &RenderConfig,
    texture: Option<&RgbImage>,
    grain: &dyn GrainSource,
    rng: &mut StdRng,
) -> DynamicImage {
    let canvas = canvas.into_image();
    let mut page = if config.preserve_transparent_background {
        let mut page = canvas;
        if let Some(texture) = texture {
            shade_ink(&mut page, texture, config.paper_opacity);
        }
        DynamicImage::ImageRgba8(page)
    } else {
        let mut page = flatten(&canvas, config.background_color);
        if let Some(texture) = texture {
            shade_page(&mut page, texture, config.paper_opacity);
        }
        DynamicImage::ImageRgb8(page)
    };
    grain.apply(&mut page, rng);
    page
}

/// Alpha-composites the canvas over an opaque background.
pub fn flatten(canvas: &RgbaImage, background: Rgb<u8>) -> RgbImage {
    let mut page = RgbImage::from_pixel(canvas.width(), canvas.height(), background);
    for (ink, paper) in canvas.pixels().zip(page.pixels_mut()) {
        let alpha = ink[3] as u32;
        for channel in 0..3 {
            let mixed = ink[channel] as u32 * alpha + paper[channel] as u32 * (255 - alpha);
            paper[channel] = ((mixed + 127) / 255) as u8;
        }
    }
    page
}

fn shade_page(page: &mut RgbImage, texture: &RgbImage, opacity: f32) {
    for (pixel, grain) in page.pixels_mut().zip(texture.pixels()) {
        for channel in 0..3 {
            pixel[channel] = shade(pixel[channel], grain[channel], opacity);
        }
    }
}

fn shade_ink(page: &mut RgbaImage, texture: &RgbImage, opacity: f32) {
    for (pixel, grain) in page.pixels_mut().zip(texture.pixels()) {
        for channel in 0..3 {
            pixel[channel] = shade(pixel[channel], grain[channel], opacity);
        }
    }
}

/// Multiplies by the texture, mixed in at `opacity`.
fn shade(value: u8, texture: u8, opacity: f32) -> u8 {
    let multiplied = mul_div255(value, texture) as f32;
    (value as f32 + (multiplied - value as f32) * opacity).round() as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::rng_for_run;
    use image::Rgba;

    fn canvas_with_ink() -> Canvas {
        let mut canvas = Canvas::new(4, 4);
        let ink = RgbaImage::from_pixel(2, 2, Rgba([255, 255, 255, 255]));
        canvas.composite(&ink, 0, 0);
        let faint = RgbaImage::from_pixel(1, 1, Rgba([0, 0, 0, 128]));
        canvas.composite(&faint, 3, 3);
        canvas
    }

    fn opaque_config() -> RenderConfig {
        RenderConfig {
            background_color: Rgb([10, 20, 30]),
            ..RenderConfig::steady()
        }
    }

    #[test]
    fn opaque_page_shows_background_and_keeps_white_ink() {
        let mut rng = rng_for_run(Some(1));
        let page = finalize(canvas_with_ink(), &opaque_config(), None, &NoGrain, &mut rng);
        let page = page.as_rgb8().expect("opaque page is rgb");
        assert_eq!(page.get_pixel(0, 0).0, [255, 255, 255]);
        assert_eq!(page.get_pixel(2, 2).0, [10, 20, 30]);
        assert_eq!(page.get_pixel(3, 3).0, [5, 10, 15]);
    }

    #[test]
    fn transparent_mode_returns_canvas_as_is() {
        let config = RenderConfig {
            preserve_transparent_background: true,
            ..opaque_config()
        };
        let canvas = canvas_with_ink();
        let expected = canvas.image().clone();
        let mut rng = rng_for_run(Some(1));
        let page = finalize(canvas, &config, None, &NoGrain, &mut rng);
        assert_eq!(page.as_rgba8().expect("rgba page"), &expected);
    }

    #[test]
    fn texture_darkens_paper_by_opacity() {
        let texture = RgbImage::from_pixel(4, 4, Rgb([128, 128, 128]));
        let config = RenderConfig {
            background_color: Rgb([255, 255, 255]),
            paper_opacity: 1.0,
            ..RenderConfig::steady()
        };
        let mut rng = rng_for_run(Some(1));
        let page = finalize(Canvas::new(4, 4), &config, Some(&texture), &NoGrain, &mut rng);
        assert_eq!(page.as_rgb8().expect("rgb").get_pixel(1, 1).0, [128, 128, 128]);

        let half = RenderConfig {
            paper_opacity: 0.5,
            ..config
        };
        let page = finalize(Canvas::new(4, 4), &half, Some(&texture), &NoGrain, &mut rng);
        assert_eq!(page.as_rgb8().expect("rgb").get_pixel(1, 1).0, [192, 192, 192]);
    }

    #[test]
    fn texture_keeps_alpha_in_transparent_mode() {
        let texture = RgbImage::from_pixel(4, 4, Rgb([0, 0, 0]));
        let config = RenderConfig {
            preserve_transparent_background: true,
            ..RenderConfig::steady()
        };
        let canvas = canvas_with_ink();
        let alphas: Vec<u8> = canvas.image().pixels().map(|pixel| pixel[3]).collect();
        let mut rng = rng_for_run(Some(1));
        let page = finalize(canvas, &config, Some(&texture), &NoGrain, &mut rng);
        let page = page.as_rgba8().expect("rgba");
        let after: Vec<u8> = page.pixels().map(|pixel| pixel[3]).collect();
        assert_eq!(alphas, after);
        assert_eq!(page.get_pixel(0, 0).0, [0, 0, 0, 255]);
    }

    #[test]
    fn grain_perturbs_but_stays_in_range() {
        let mut page = DynamicImage::ImageRgb8(RgbImage::from_pixel(32, 32, Rgb([128, 0, 255])));
        let mut rng = rng_for_run(Some(11));
        GaussianGrain { level: 0.05 }.apply(&mut page, &mut rng);
        let rgb = page.as_rgb8().expect("rgb");
        assert!(rgb.pixels().any(|pixel| pixel[0] != 128));
        let mean = rgb.pixels().map(|pixel| pixel[0] as f64).sum::<f64>() / 1024.0;
        assert!((mean - 128.0).abs() < 3.0, "mean {mean}");
    }

    #[test]
    fn grain_strategy_follows_config() {
        let mut page = DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 8, Rgb([100, 100, 100])));
        let original = page.clone();
        let mut rng = rng_for_run(Some(2));
        grain_for(&RenderConfig::steady()).apply(&mut page, &mut rng);
        assert_eq!(page, original);

        let noisy = RenderConfig {
            add_noise: true,
            noise_level: 0.1,
            ..RenderConfig::steady()
        };
        grain_for(&noisy).apply(&mut page, &mut rng);
        assert_ne!(page, original);
    }
}
