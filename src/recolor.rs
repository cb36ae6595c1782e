use image::{Rgb, Rgba, RgbaImage};

/// Returns a copy of `glyph` whose ink is `color`.
///
/// Ink density is the inverted luminance multiplied by the source alpha, so
/// dark strokes keep their anti-aliased edges and a white paper background
/// in an opaque scan drops out as transparent.
pub fn recolor(glyph: &RgbaImage, color: Rgb<u8>) -> RgbaImage {
    let [r, g, b] = color.0;
    let mut output = RgbaImage::new(glyph.width(), glyph.height());
    for (src, dst) in glyph.pixels().zip(output.pixels_mut()) {
        let [sr, sg, sb, sa] = src.0;
        let ink = 255 - luminance(sr, sg, sb);
        *dst = Rgba([r, g, b, mul_div255(ink, sa)]);
    }
    output
}

pub(crate) fn luminance(r: u8, g: u8, b: u8) -> u8 {
    let weighted = r as u32 * 19595 + g as u32 * 38470 + b as u32 * 7471;
    ((weighted + 0x8000) >> 16) as u8
}

pub(crate) fn mul_div255(a: u8, b: u8) -> u8 {
    ((a as u32 * b as u32 + 127) / 255) as u8
}
