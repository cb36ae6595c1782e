use std::io::{self, IsTerminal, Read};
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use clap::Parser;

use handwriting_synth::WrapMode;
use handwriting_synth::settings::Overrides;

#[derive(Parser, Debug)]
#[command(
    name = "handwriting-synth",
    version,
    about = "Render text as a handwritten A4 page from a folder of glyph images"
)]
struct Cli {
    /// Text to render (reads --input or stdin when omitted)
    text: Option<String>,

    /// Read the text from a file
    #[arg(short = 'i', long = "input")]
    input: Option<PathBuf>,

    /// Output image path (.png keeps transparency, .jpg is always opaque)
    #[arg(short = 'o', long = "output", default_value = "output_a4.png")]
    output: PathBuf,

    /// Folder of glyph images (A1.png, A2.png, point.png, ...)
    #[arg(short = 'g', long = "glyphs")]
    glyphs: Option<String>,

    /// Page density in dots per inch
    #[arg(long = "dpi")]
    dpi: Option<u32>,

    /// Ink color (#RRGGBB, #RGB or a name)
    #[arg(short = 'c', long = "text-color")]
    text_color: Option<String>,

    /// Paper color (#RRGGBB, #RGB or a name)
    #[arg(short = 'b', long = "background-color")]
    background_color: Option<String>,

    /// Upper-case the text before layout
    #[arg(short = 'u', long = "uppercase")]
    uppercase: bool,

    /// Line wrapping strategy
    #[arg(short = 'w', long = "wrap", value_enum)]
    wrap: Option<WrapMode>,

    /// Paper texture image blended into the page
    #[arg(short = 'p', long = "paper-texture")]
    paper_texture: Option<String>,

    /// Keep the background transparent
    #[arg(short = 't', long = "transparent")]
    transparent: bool,

    /// Disable scan grain
    #[arg(long = "no-noise")]
    no_noise: bool,

    /// Seed for reproducible output
    #[arg(short = 's', long = "seed")]
    seed: Option<u64>,

    /// Read extra settings from a local TOML file
    #[arg(short = 'r', long = "read-settings")]
    read_settings: Option<String>,

    /// Enable verbose logging
    #[arg(long = "verbose")]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    handwriting_synth::logging::init(cli.verbose)?;

    let text = read_text(&cli)?;
    let summary = handwriting_synth::run(
        handwriting_synth::Config {
            output: cli.output,
            settings_path: cli.read_settings,
            overrides: Overrides {
                glyph_folder: cli.glyphs,
                dpi: cli.dpi,
                text_color: cli.text_color,
                background_color: cli.background_color,
                uppercase: cli.uppercase,
                wrap: cli.wrap,
                paper_texture: cli.paper_texture,
                transparent: cli.transparent,
                no_noise: cli.no_noise,
                seed: cli.seed,
            },
        },
        &text,
    )?;

    println!(
        "saved {} ({}x{}, {} glyphs)",
        summary.output.display(),
        summary.width,
        summary.height,
        summary.placed
    );
    if !summary.skipped.is_empty() {
        let missing: String = summary.skipped.iter().collect();
        eprintln!("warning: no glyph for: {}", missing);
    }
    Ok(())
}

fn read_text(cli: &Cli) -> Result<String> {
    if let Some(text) = cli.text.as_ref() {
        return Ok(text.clone());
    }
    if let Some(path) = cli.input.as_ref() {
        return std::fs::read_to_string(path)
            .with_context(|| format!("failed to read input: {}", path.display()));
    }
    if io::stdin().is_terminal() {
        return Err(anyhow!("no text given; pass it as an argument, with --input, or on stdin"));
    }
    let mut buffer = String::new();
    io::stdin()
        .read_to_string(&mut buffer)
        .with_context(|| "stdin must be UTF-8 text")?;
    Ok(buffer)
}
