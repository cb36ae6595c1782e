use anyhow::{Context, Result};
use image::{DynamicImage, RgbImage};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub mod color;
pub mod compositor;
pub mod config;
pub mod glyphs;
pub mod layout;
pub mod logging;
pub mod output;
pub mod random;
pub mod recolor;
pub mod settings;
pub mod transform;

pub use config::{Margins, RenderConfig, WrapMode};
pub use glyphs::{GlyphKey, GlyphRepository, GlyphSourceError, GlyphVariant, LoadOptions};
pub use layout::{Canvas, LayoutResult, Placement};

#[derive(Debug, Clone)]
pub struct Config {
    pub output: PathBuf,
    pub settings_path: Option<String>,
    pub overrides: settings::Overrides,
}

/// What a finished run produced.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub output: PathBuf,
    pub width: u32,
    pub height: u32,
    pub placed: usize,
    pub skipped: Vec<char>,
}

/// A finished page before encoding.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub image: DynamicImage,
    pub placements: Vec<Placement>,
    pub skipped: Vec<char>,
}

pub fn run(config: Config, input: &str) -> Result<RunSummary> {
    let settings_path = config.settings_path.as_deref().map(Path::new);
    let mut settings = settings::load_settings(settings_path)?;
    settings.apply_overrides(&config.overrides);
    let render_config = RenderConfig::from_settings(&settings)?;

    let text = input.trim_end_matches(['\n', '\r']);

    let repository = GlyphRepository::load(
        Path::new(&settings.glyph_folder),
        LoadOptions {
            ink_color: Some(render_config.text_color),
            auto_trim: render_config.auto_trim,
        },
    )
    .with_context(|| "a glyph folder is required to lay out text")?;

    let texture = match render_config.paper_texture.as_deref() {
        Some(path) => {
            let (width, height) = render_config.page_size();
            match compositor::load_paper_texture(path, width, height) {
                Ok(texture) => Some(texture),
                Err(err) => {
                    warn!("paper texture skipped: {:#}", err);
                    None
                }
            }
        }
        None => None,
    };

    let page = synthesize(text, &repository, &render_config, texture.as_ref());
    output::save_image(&page.image, &config.output, render_config.dpi)?;
    info!("saved {}", config.output.display());

    Ok(RunSummary {
        output: config.output,
        width: page.image.width(),
        height: page.image.height(),
        placed: page.placements.len(),
        skipped: page.skipped,
    })
}

/// Lays out `text` and finalizes the page, drawing all randomness from one
/// generator seeded by `config.seed`.
pub fn synthesize(
    text: &str,
    repository: &GlyphRepository,
    config: &RenderConfig,
    texture: Option<&RgbImage>,
) -> RenderedPage {
    let text = if config.uppercase {
        text.to_uppercase()
    } else {
        text.to_string()
    };
    let mut rng = random::rng_for_run(config.seed);
    let laid_out = layout::layout(&text, repository, config, &mut rng);
    if !laid_out.skipped.is_empty() {
        warn!(
            "{} character(s) had no glyph and were skipped",
            laid_out.skipped.len()
        );
    }
    let grain = compositor::grain_for(config);
    let image = compositor::finalize(laid_out.canvas, config, texture, grain.as_ref(), &mut rng);
    RenderedPage {
        image,
        placements: laid_out.placements,
        skipped: laid_out.skipped,
    }
}
