use anyhow::{Context, Result, anyhow};
use image::codecs::jpeg::{JpegEncoder, PixelDensity};
use image::{DynamicImage, ImageFormat};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::warn;

const METERS_PER_INCH: f64 = 0.0254;
const JPEG_QUALITY: u8 = 95;

/// Writes the page, embedding `dpi` where the format supports it.
pub fn save_image(image: &DynamicImage, path: &Path, dpi: u32) -> Result<()> {
    let format = ImageFormat::from_path(path)
        .with_context(|| format!("unsupported output extension: {}", path.display()))?;
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create output directory: {}", parent.display()))?;
    }
    match format {
        ImageFormat::Png => {
            let bytes = encode_png(image, dpi)?;
            std::fs::write(path, bytes)
                .with_context(|| format!("failed to write image: {}", path.display()))?;
        }
        ImageFormat::Jpeg => {
            let file = File::create(path)
                .with_context(|| format!("failed to create image: {}", path.display()))?;
            let mut writer = BufWriter::new(file);
            encode_jpeg(image, dpi, &mut writer)?;
            writer
                .flush()
                .with_context(|| format!("failed to write image: {}", path.display()))?;
        }
        other => {
            warn!("{:?} output does not carry DPI metadata", other);
            image
                .save_with_format(path, other)
                .with_context(|| format!("failed to write image: {}", path.display()))?;
        }
    }
    Ok(())
}

/// PNG bytes with a pHYs chunk for `dpi`.
pub fn encode_png(image: &DynamicImage, dpi: u32) -> Result<Vec<u8>> {
    let (color, data) = match image {
        DynamicImage::ImageRgba8(rgba) => (png::ColorType::Rgba, rgba.as_raw().clone()),
        DynamicImage::ImageRgb8(rgb) => (png::ColorType::Rgb, rgb.as_raw().clone()),
        other if other.color().has_alpha() => (png::ColorType::Rgba, other.to_rgba8().into_raw()),
        other => (png::ColorType::Rgb, other.to_rgb8().into_raw()),
    };
    let pixels_per_meter = (dpi as f64 / METERS_PER_INCH).round() as u32;

    let mut bytes = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut bytes, image.width(), image.height());
        encoder.set_color(color);
        encoder.set_depth(png::BitDepth::Eight);
        encoder.set_pixel_dims(Some(png::PixelDimensions {
            xppu: pixels_per_meter,
            yppu: pixels_per_meter,
            unit: png::Unit::Meter,
        }));
        let mut writer = encoder
            .write_header()
            .with_context(|| "failed to write PNG header")?;
        writer
            .write_image_data(&data)
            .with_context(|| "failed to encode PNG data")?;
        writer.finish().with_context(|| "failed to finish PNG")?;
    }
    Ok(bytes)
}

fn encode_jpeg<W: Write>(image: &DynamicImage, dpi: u32, writer: &mut W) -> Result<()> {
    let density = u16::try_from(dpi).map_err(|_| anyhow!("dpi {} too large for JPEG", dpi))?;
    let mut encoder = JpegEncoder::new_with_quality(writer, JPEG_QUALITY);
    encoder.set_pixel_density(PixelDensity::dpi(density));
    encoder
        .encode_image(&image.to_rgb8())
        .with_context(|| "failed to encode JPEG")?;
    Ok(())
}
