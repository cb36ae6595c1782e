use image::RgbaImage;
use image::imageops;
use rand::Rng;
use tracing::{debug, warn};

use crate::config::{RenderConfig, WrapMode};
use crate::glyphs::{GlyphKey, GlyphRepository, trim_to_ink};
use crate::random::symmetric_px;
use crate::transform::{GlyphJitter, transform};

/// Variants sampled per key when deriving a default space width.
const SPACE_SAMPLE_PER_KEY: usize = 3;
/// Space width as a fraction of an inch when no glyph can be sampled.
const FALLBACK_SPACE_INCHES: f64 = 0.25;

/// Transparent page-sized buffer that glyphs are composited onto.
#[derive(Debug, Clone)]
pub struct Canvas {
    image: RgbaImage,
}

impl Canvas {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            image: RgbaImage::new(width, height),
        }
    }

    pub fn for_config(config: &RenderConfig) -> Self {
        let (width, height) = config.page_size();
        Self::new(width, height)
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Alpha-composites `layer` with its top-left corner at `(x, y)`; off-page parts are clipped.
    pub fn composite(&mut self, layer: &RgbaImage, x: i64, y: i64) {
        imageops::overlay(&mut self.image, layer, x, y);
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn into_image(self) -> RgbaImage {
        self.image
    }
}

/// Where one glyph ended up on the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub key: GlyphKey,
    pub x: i64,
    pub y: i64,
    pub width: u32,
    pub height: u32,
    pub line: usize,
    pub has_bleed: bool,
}

#[derive(Debug, Clone)]
pub struct LayoutResult {
    pub canvas: Canvas,
    pub placements: Vec<Placement>,
    /// Characters dropped because the glyph set has no variant for them.
    pub skipped: Vec<char>,
}

#[derive(Debug, Clone, Copy)]
struct Cursor {
    x: i64,
    y: i64,
    line_height: u32,
    line: usize,
    line_start_x: i64,
    line_has_glyph: bool,
}

impl Cursor {
    /// Nothing has advanced the cursor on this line yet.
    fn at_line_start(&self) -> bool {
        !self.line_has_glyph && self.x <= self.line_start_x
    }
}

struct LayoutEngine<'a, R> {
    repository: &'a GlyphRepository,
    config: &'a RenderConfig,
    rng: R,
    canvas: Canvas,
    cursor: Cursor,
    right_limit: i64,
    bottom_limit: i64,
    space_width: i64,
    placements: Vec<Placement>,
    skipped: Vec<char>,
    overflow_reported: bool,
}

/// Lays `text` out on a fresh transparent canvas, one character at a time.
pub fn layout<R: Rng>(
    text: &str,
    repository: &GlyphRepository,
    config: &RenderConfig,
    rng: &mut R,
) -> LayoutResult {
    let mut engine = LayoutEngine::new(repository, config, rng);
    let chars: Vec<char> = text.chars().collect();
    let mut word_start = true;
    for (idx, &ch) in chars.iter().enumerate() {
        match ch {
            '\r' => {}
            '\n' => {
                engine.break_line();
                word_start = true;
            }
            ch if ch.is_whitespace() => {
                engine.advance_space();
                word_start = true;
            }
            ch => {
                if word_start && config.wrap == WrapMode::Word {
                    let word_end = chars[idx..]
                        .iter()
                        .position(|c| c.is_whitespace())
                        .map_or(chars.len(), |offset| idx + offset);
                    engine.wrap_word(&chars[idx..word_end]);
                }
                word_start = false;
                engine.place_char(ch);
            }
        }
    }
    engine.finish()
}

impl<'a, R: Rng> LayoutEngine<'a, R> {
    fn new(repository: &'a GlyphRepository, config: &'a RenderConfig, rng: R) -> Self {
        let canvas = Canvas::for_config(config);
        let right_limit = canvas.width() as i64 - config.margins.right as i64;
        let bottom_limit = canvas.height() as i64 - config.margins.bottom as i64;
        let space_width = config
            .space_width
            .or_else(|| repository.mean_sample_width(SPACE_SAMPLE_PER_KEY))
            .unwrap_or((FALLBACK_SPACE_INCHES * config.dpi as f64) as u32);
        debug!("layout: page {}x{}, space width {}", canvas.width(), canvas.height(), space_width);
        Self {
            repository,
            config,
            rng,
            canvas,
            cursor: Cursor {
                x: config.margins.left as i64,
                y: config.margins.top as i64,
                line_height: 0,
                line: 0,
                line_start_x: config.margins.left as i64,
                line_has_glyph: false,
            },
            right_limit,
            bottom_limit,
            space_width: space_width as i64,
            placements: Vec::new(),
            skipped: Vec::new(),
            overflow_reported: false,
        }
    }

    fn break_line(&mut self) {
        let jitter = symmetric_px(&mut self.rng, self.config.line_start_jitter);
        self.cursor.x = self.config.margins.left as i64 + jitter;
        self.cursor.y += self.cursor.line_height as i64 + self.config.line_spacing as i64;
        self.cursor.line_height = 0;
        self.cursor.line += 1;
        self.cursor.line_start_x = self.cursor.x;
        self.cursor.line_has_glyph = false;
        if self.cursor.y > self.bottom_limit && !self.overflow_reported {
            warn!(
                "text runs past the bottom margin at line {}; remaining glyphs are clipped",
                self.cursor.line + 1
            );
            self.overflow_reported = true;
        }
    }

    fn advance_space(&mut self) {
        self.cursor.x += self.space_width + symmetric_px(&mut self.rng, self.config.kerning_jitter);
    }

    /// Width a glyph may reach after the largest possible scale jitter.
    fn estimate_width(&self, width: u32) -> i64 {
        (width as f64 * (1.0 + self.config.max_scale_jitter as f64)).ceil() as i64
    }

    fn wrap_word(&mut self, word: &[char]) {
        let width: i64 = word
            .iter()
            .filter_map(|&ch| self.repository.max_width(&GlyphKey::for_char(ch)))
            .map(|width| self.estimate_width(width) + self.config.kerning_jitter as i64)
            .sum();
        if !self.cursor.at_line_start() && self.cursor.x + width > self.right_limit {
            debug!("layout: word of {} chars moves to a new line", word.len());
            self.break_line();
        }
    }

    fn place_char(&mut self, ch: char) {
        let repository = self.repository;
        let key = GlyphKey::for_char(ch);
        let Some(variants) = repository.variants(&key) else {
            warn!("no glyph for character '{}' (key '{}'), skipping", ch, key);
            self.skipped.push(ch);
            return;
        };
        let variant = &variants[self.rng.gen_range(0..variants.len())];
        let glyph = trim_to_ink(variant.image());

        let estimated = self.estimate_width(glyph.width());
        if !self.cursor.at_line_start() && self.cursor.x + estimated > self.right_limit {
            self.break_line();
        }

        let jitter = GlyphJitter::sample(&mut self.rng, self.config);
        let Some(transformed) = transform(&glyph, &jitter, self.config) else {
            warn!("glyph for character '{}' was dropped by a failing transform", ch);
            self.skipped.push(ch);
            return;
        };
        let x = self.cursor.x + symmetric_px(&mut self.rng, self.config.random_offset);
        let y = self.cursor.y + symmetric_px(&mut self.rng, self.config.baseline_jitter);

        if let Some(bleed) = transformed.bleed.as_ref() {
            self.canvas.composite(bleed, x, y);
        }
        self.canvas.composite(&transformed.glyph, x, y);

        let (width, height) = transformed.glyph.dimensions();
        self.placements.push(Placement {
            key,
            x,
            y,
            width,
            height,
            line: self.cursor.line,
            has_bleed: transformed.bleed.is_some(),
        });

        self.cursor.x += width as i64 + symmetric_px(&mut self.rng, self.config.kerning_jitter);
        self.cursor.line_height = self.cursor.line_height.max(height);
        self.cursor.line_has_glyph = true;
    }

    fn finish(self) -> LayoutResult {
        LayoutResult {
            canvas: self.canvas,
            placements: self.placements,
            skipped: self.skipped,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Margins;
    use crate::glyphs::GlyphVariant;
    use crate::random::rng_for_run;
    use image::Rgba;

    fn block(width: u32, height: u32) -> GlyphVariant {
        GlyphVariant::new(RgbaImage::from_pixel(width, height, Rgba([0, 0, 0, 255])))
    }

    fn repository(glyphs: &[(char, u32, u32)]) -> GlyphRepository {
        let mut repository = GlyphRepository::default();
        for &(ch, width, height) in glyphs {
            repository.insert(GlyphKey::for_char(ch), block(width, height));
        }
        repository
    }

    fn steady(margin: u32) -> RenderConfig {
        RenderConfig {
            dpi: 100,
            margins: Margins {
                left: margin,
                top: margin,
                right: margin,
                bottom: margin,
            },
            ..RenderConfig::steady()
        }
    }

    #[test]
    fn newline_moves_to_next_line_start() {
        let repository = repository(&[('A', 10, 20), ('B', 12, 30), ('C', 8, 16)]);
        let config = steady(5);
        let result = layout("AB\nC", &repository, &config, &mut rng_for_run(Some(1)));

        let positions: Vec<(&str, i64, i64)> = result
            .placements
            .iter()
            .map(|p| (p.key.as_str(), p.x, p.y))
            .collect();
        assert_eq!(
            positions,
            vec![("A", 5, 5), ("B", 15, 5), ("C", 5, 5 + 30 + 18)]
        );
        assert_eq!(result.placements[2].line, 1);
    }

    #[test]
    fn space_defaults_to_mean_glyph_width() {
        let repository = repository(&[('A', 10, 10), ('B', 30, 10)]);
        let config = steady(0);
        let result = layout("A B", &repository, &config, &mut rng_for_run(Some(1)));
        assert_eq!(result.placements[1].x, 10 + 20);

        let explicit = RenderConfig {
            space_width: Some(7),
            ..config
        };
        let result = layout("A B", &repository, &explicit, &mut rng_for_run(Some(1)));
        assert_eq!(result.placements[1].x, 17);
    }

    #[test]
    fn space_falls_back_to_quarter_inch_without_glyphs() {
        let repository = GlyphRepository::default();
        let config = steady(0);
        let mut rng = rng_for_run(Some(1));
        let engine = LayoutEngine::new(&repository, &config, &mut rng);
        assert_eq!(engine.space_width, 25);
    }

    #[test]
    fn missing_glyphs_are_skipped_not_fatal() {
        let repository = repository(&[('A', 10, 10)]);
        let config = steady(0);
        let result = layout("A#A", &repository, &config, &mut rng_for_run(Some(1)));
        assert_eq!(result.placements.len(), 2);
        assert_eq!(result.skipped, vec!['#']);
        assert_eq!(result.placements[1].x, 10);
    }

    #[test]
    fn wraps_before_crossing_right_margin() {
        let repository = repository(&[('W', 100, 40)]);
        let config = RenderConfig {
            max_scale_jitter: 0.06,
            random_offset: 0,
            ..steady(50)
        };
        let text = "W".repeat(40);
        let result = layout(&text, &repository, &config, &mut rng_for_run(Some(3)));
        let (width, _) = config.page_size();
        let right_limit = width as i64 - 50;
        let estimate = (100.0 * (1.0 + config.max_scale_jitter as f64)).ceil() as i64;

        assert!(result.placements.iter().any(|p| p.line > 0));
        for placement in &result.placements {
            assert!(placement.x <= right_limit);
            if placement.x != 50 {
                assert!(placement.x + estimate <= right_limit, "{placement:?}");
            }
        }
    }

    #[test]
    fn leading_spaces_still_wrap_before_the_right_margin() {
        let repository = repository(&[('A', 10, 10)]);
        let config = RenderConfig {
            space_width: Some(50),
            ..steady(100)
        };
        let right_limit = config.page_size().0 as i64 - 100;
        let text = format!("{}A", " ".repeat(20));
        let result = layout(&text, &repository, &config, &mut rng_for_run(Some(1)));

        let placement = &result.placements[0];
        assert!(placement.x + 10 <= right_limit, "{placement:?}");
        assert_eq!((placement.x, placement.line), (100, 1));
    }

    #[test]
    fn oversized_glyph_does_not_emit_blank_lines() {
        let repository = repository(&[('M', 2000, 40)]);
        let config = steady(10);
        let result = layout("M", &repository, &config, &mut rng_for_run(Some(1)));
        assert_eq!(result.placements[0].line, 0);
        assert_eq!((result.placements[0].x, result.placements[0].y), (10, 10));
    }

    #[test]
    fn word_wrap_keeps_words_together() {
        let repository = repository(&[('A', 100, 40)]);
        let config = RenderConfig {
            space_width: Some(50),
            ..steady(0)
        };
        // 827px wide: "AAAAA" fills 500px, the second word needs 300 more plus a space.
        let text = "AAAAA AAA";
        let by_char = layout(text, &repository, &config, &mut rng_for_run(Some(1)));
        let char_lines: Vec<usize> = by_char.placements.iter().map(|p| p.line).collect();
        assert_eq!(char_lines, vec![0, 0, 0, 0, 0, 0, 0, 1]);

        let word_config = RenderConfig {
            wrap: WrapMode::Word,
            ..config
        };
        let by_word = layout(text, &repository, &word_config, &mut rng_for_run(Some(1)));
        let word_lines: Vec<usize> = by_word.placements.iter().map(|p| p.line).collect();
        assert_eq!(word_lines, vec![0, 0, 0, 0, 0, 1, 1, 1]);
        assert_eq!(by_word.placements[5].x, 0);
    }

    #[test]
    fn bleed_is_composited_under_the_glyph() {
        let glyph = RgbaImage::from_pixel(10, 10, Rgba([255, 0, 0, 128]));
        let mut repository = GlyphRepository::default();
        repository.insert(GlyphKey::for_char('O'), GlyphVariant::new(glyph.clone()));
        let config = RenderConfig {
            bleed_amount: 2,
            ..steady(20)
        };
        let result = layout("O", &repository, &config, &mut rng_for_run(Some(1)));
        assert!(result.placements[0].has_bleed);
        assert_eq!((result.placements[0].x, result.placements[0].y), (20, 20));

        let parts = transform(&glyph, &GlyphJitter::none(), &config).expect("glyph kept");
        let bleed = parts.bleed.expect("bleed layer");
        let (width, height) = config.page_size();
        let mut under = Canvas::new(width, height);
        under.composite(&bleed, 20, 20);
        under.composite(&parts.glyph, 20, 20);
        let mut over = Canvas::new(width, height);
        over.composite(&parts.glyph, 20, 20);
        over.composite(&bleed, 20, 20);

        let canvas = result.canvas.image();
        assert_eq!(canvas, under.image());
        assert_ne!(canvas.get_pixel(25, 25), over.image().get_pixel(25, 25));
    }

    #[test]
    fn overlapping_strokes_blend() {
        let mut canvas = Canvas::new(4, 1);
        let half = RgbaImage::from_pixel(2, 1, Rgba([255, 0, 0, 128]));
        canvas.composite(&half, 0, 0);
        canvas.composite(&half, 1, 0);
        let overlap = canvas.image().get_pixel(1, 0)[3];
        assert!(overlap > 128, "overlap alpha {overlap}");
        assert_eq!(canvas.image().get_pixel(3, 0)[3], 0);
    }
}
