use anyhow::{Context, Result};
use image::{Rgb, RgbaImage};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::recolor::recolor;

const SUPPORTED_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp", "bmp", "gif", "tif", "tiff"];

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GlyphKey(String);

impl GlyphKey {
    /// Key for a glyph file stem: trailing digits stripped, upper-cased.
    pub fn from_file_stem(stem: &str) -> Option<Self> {
        let base = stem.trim_end_matches(|ch: char| ch.is_ascii_digit());
        if base.is_empty() {
            return None;
        }
        Some(Self(base.to_uppercase()))
    }

    /// Key used to look up a character of the input text.
    pub fn for_char(ch: char) -> Self {
        let name = match ch {
            '.' => "POINT".to_string(),
            ',' => "COMMA".to_string(),
            '?' => "QUESTION".to_string(),
            '!' => "EXCLAMATION".to_string(),
            other => other.to_uppercase().collect(),
        };
        Self(name)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GlyphKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One hand-drawn rendering of a glyph. Alpha carries the ink density.
#[derive(Debug, Clone)]
pub struct GlyphVariant {
    image: RgbaImage,
}

impl GlyphVariant {
    pub fn new(image: RgbaImage) -> Self {
        Self { image }
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

#[derive(Debug)]
pub enum GlyphSourceError {
    MissingFolder(PathBuf),
    NoGlyphs(PathBuf),
}

impl fmt::Display for GlyphSourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingFolder(path) => {
                write!(f, "glyph folder not found: {}", path.display())
            }
            Self::NoGlyphs(path) => write!(
                f,
                "no usable glyph images (png/jpg/...) in {}",
                path.display()
            ),
        }
    }
}

impl std::error::Error for GlyphSourceError {}

#[derive(Debug, Clone, Copy)]
pub struct LoadOptions {
    pub ink_color: Option<Rgb<u8>>,
    pub auto_trim: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            ink_color: None,
            auto_trim: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct GlyphRepository {
    variants: HashMap<GlyphKey, Vec<GlyphVariant>>,
}

impl GlyphRepository {
    pub fn load(folder: &Path, options: LoadOptions) -> Result<Self> {
        if !folder.is_dir() {
            return Err(GlyphSourceError::MissingFolder(folder.to_path_buf()).into());
        }
        let mut files = Vec::new();
        let entries = fs::read_dir(folder)
            .with_context(|| format!("failed to list glyph folder: {}", folder.display()))?;
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!("skipping unreadable entry in {}: {}", folder.display(), err);
                    continue;
                }
            };
            let path = entry.path();
            if path.is_file() && has_supported_extension(&path) {
                files.push(path);
            }
        }
        files.sort();

        let mut repository = Self::default();
        for path in files {
            let Some(key) = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(GlyphKey::from_file_stem)
            else {
                warn!("cannot derive glyph key from {}", path.display());
                continue;
            };
            let image = match image::open(&path) {
                Ok(image) => image.to_rgba8(),
                Err(err) => {
                    warn!("failed to open glyph {}: {}", path.display(), err);
                    continue;
                }
            };
            let image = match options.ink_color {
                Some(color) => recolor(&image, color),
                None => image,
            };
            let image = if options.auto_trim {
                trim_to_ink(&image)
            } else {
                image
            };
            debug!("glyph {} <- {}", key, path.display());
            repository.insert(key, GlyphVariant::new(image));
        }

        if repository.is_empty() {
            return Err(GlyphSourceError::NoGlyphs(folder.to_path_buf()).into());
        }
        info!(
            "loaded {} glyph keys ({} variants) from {}",
            repository.variants.len(),
            repository.variant_count(),
            folder.display()
        );
        Ok(repository)
    }

    /// Appends a variant; variants of one key keep insertion order.
    pub fn insert(&mut self, key: GlyphKey, variant: GlyphVariant) {
        self.variants.entry(key).or_default().push(variant);
    }

    pub fn variants(&self, key: &GlyphKey) -> Option<&[GlyphVariant]> {
        self.variants
            .get(key)
            .map(Vec::as_slice)
            .filter(|list| !list.is_empty())
    }

    pub fn contains(&self, key: &GlyphKey) -> bool {
        self.variants(key).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.variants.values().all(Vec::is_empty)
    }

    pub fn variant_count(&self) -> usize {
        self.variants.values().map(Vec::len).sum()
    }

    /// Mean width over the first few variants of every key.
    pub fn mean_sample_width(&self, per_key: usize) -> Option<u32> {
        let widths: Vec<u64> = self
            .variants
            .values()
            .flat_map(|list| list.iter().take(per_key))
            .map(|variant| variant.width() as u64)
            .collect();
        if widths.is_empty() {
            return None;
        }
        Some((widths.iter().sum::<u64>() / widths.len() as u64) as u32)
    }

    /// Width of the widest variant for `key`.
    pub fn max_width(&self, key: &GlyphKey) -> Option<u32> {
        self.variants(key)
            .and_then(|list| list.iter().map(GlyphVariant::width).max())
    }
}

fn has_supported_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            SUPPORTED_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// Bounding box `(x, y, w, h)` of pixels that are not fully transparent.
pub fn ink_bounds(image: &RgbaImage) -> Option<(u32, u32, u32, u32)> {
    let mut min_x = u32::MAX;
    let mut min_y = u32::MAX;
    let mut max_x = 0;
    let mut max_y = 0;
    let mut found = false;
    for (x, y, pixel) in image.enumerate_pixels() {
        if pixel[3] == 0 {
            continue;
        }
        found = true;
        min_x = min_x.min(x);
        min_y = min_y.min(y);
        max_x = max_x.max(x);
        max_y = max_y.max(y);
    }
    if !found {
        return None;
    }
    Some((min_x, min_y, max_x - min_x + 1, max_y - min_y + 1))
}

/// Crops to the ink bounds; a blank image is returned unchanged.
pub fn trim_to_ink(image: &RgbaImage) -> RgbaImage {
    match ink_bounds(image) {
        Some((x, y, w, h)) if (w, h) != image.dimensions() => {
            image::imageops::crop_imm(image, x, y, w, h).to_image()
        }
        _ => image.clone(),
    }
}
