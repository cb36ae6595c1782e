use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::WrapMode;

const DEFAULT_SETTINGS_TOML: &str = include_str!("../settings.toml");

/// Raw, merged settings before validation into a `RenderConfig`.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub glyph_folder: String,
    pub auto_trim: bool,
    pub dpi: u32,
    pub margin_left: u32,
    pub margin_top: u32,
    pub margin_right: u32,
    pub margin_bottom: u32,
    pub text_color: String,
    pub background_color: String,
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
    pub paper_texture: Option<String>,
    pub paper_opacity: f32,
    pub preserve_transparent_background: bool,
    pub add_noise: bool,
    pub noise_level: f32,
    pub seed: Option<u64>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            glyph_folder: "letters".to_string(),
            auto_trim: true,
            dpi: 300,
            margin_left: 100,
            margin_top: 100,
            margin_right: 100,
            margin_bottom: 100,
            text_color: "black".to_string(),
            background_color: "#FFFFFF".to_string(),
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
            seed: None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SettingsFile {
    glyphs: Option<GlyphSettings>,
    page: Option<PageSettings>,
    colors: Option<ColorSettings>,
    layout: Option<LayoutSettings>,
    jitter: Option<JitterSettings>,
    ink: Option<InkSettings>,
    paper: Option<PaperSettings>,
    noise: Option<NoiseSettings>,
    run: Option<RunSettings>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct GlyphSettings {
    folder: Option<String>,
    auto_trim: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct PageSettings {
    dpi: Option<u32>,
    margin_left: Option<u32>,
    margin_top: Option<u32>,
    margin_right: Option<u32>,
    margin_bottom: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ColorSettings {
    text: Option<String>,
    background: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct LayoutSettings {
    uppercase: Option<bool>,
    line_spacing: Option<u32>,
    space_width: Option<u32>,
    kerning_jitter: Option<u32>,
    random_offset: Option<u32>,
    baseline_jitter: Option<u32>,
    line_start_jitter: Option<u32>,
    wrap: Option<WrapMode>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct JitterSettings {
    max_rotation: Option<f32>,
    max_scale_jitter: Option<f32>,
    max_shear: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct InkSettings {
    bleed_amount: Option<u32>,
    blur_after_bleed: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct PaperSettings {
    texture: Option<String>,
    opacity: Option<f32>,
    transparent: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct NoiseSettings {
    enabled: Option<bool>,
    level: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RunSettings {
    seed: Option<u64>,
}

/// Command-line values that take precedence over every settings file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub glyph_folder: Option<String>,
    pub dpi: Option<u32>,
    pub text_color: Option<String>,
    pub background_color: Option<String>,
    pub uppercase: bool,
    pub wrap: Option<WrapMode>,
    pub paper_texture: Option<String>,
    pub transparent: bool,
    pub no_noise: bool,
    pub seed: Option<u64>,
}

pub fn load_settings(extra_path: Option<&Path>) -> Result<Settings> {
    let mut settings = Settings::default();
    let defaults: SettingsFile =
        toml::from_str(DEFAULT_SETTINGS_TOML).with_context(|| "failed to parse built-in settings")?;
    settings.merge(defaults);

    let mut ordered_paths = vec![
        PathBuf::from("settings.toml"),
        PathBuf::from("settings.local.toml"),
    ];
    if let Some(home) = home_dir() {
        ordered_paths.push(home.join("settings.toml"));
        ordered_paths.push(home.join("settings.local.toml"));
    }
    if let Some(extra) = extra_path {
        if !extra.exists() {
            return Err(anyhow!("settings file not found: {}", extra.display()));
        }
        ordered_paths.push(extra.to_path_buf());
    }

    for path in ordered_paths {
        if path.exists() {
            settings.merge_file(&path)?;
        }
    }
    Ok(settings)
}

impl Settings {
    pub fn merge_file(&mut self, path: &Path) -> Result<()> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read settings: {}", path.display()))?;
        let parsed: SettingsFile = toml::from_str(&content)
            .with_context(|| format!("failed to parse settings: {}", path.display()))?;
        self.merge(parsed);
        Ok(())
    }

    fn merge(&mut self, incoming: SettingsFile) {
        if let Some(glyphs) = incoming.glyphs {
            if let Some(folder) = glyphs.folder.filter(|value| !value.trim().is_empty()) {
                self.glyph_folder = folder;
            }
            merge_value(&mut self.auto_trim, glyphs.auto_trim);
        }
        if let Some(page) = incoming.page {
            merge_value(&mut self.dpi, page.dpi);
            merge_value(&mut self.margin_left, page.margin_left);
            merge_value(&mut self.margin_top, page.margin_top);
            merge_value(&mut self.margin_right, page.margin_right);
            merge_value(&mut self.margin_bottom, page.margin_bottom);
        }
        if let Some(colors) = incoming.colors {
            if let Some(color) = colors.text.filter(|value| !value.trim().is_empty()) {
                self.text_color = color;
            }
            if let Some(color) = colors.background.filter(|value| !value.trim().is_empty()) {
                self.background_color = color;
            }
        }
        if let Some(layout) = incoming.layout {
            merge_value(&mut self.uppercase, layout.uppercase);
            merge_value(&mut self.line_spacing, layout.line_spacing);
            if let Some(width) = layout.space_width {
                self.space_width = Some(width);
            }
            merge_value(&mut self.kerning_jitter, layout.kerning_jitter);
            merge_value(&mut self.random_offset, layout.random_offset);
            merge_value(&mut self.baseline_jitter, layout.baseline_jitter);
            merge_value(&mut self.line_start_jitter, layout.line_start_jitter);
            merge_value(&mut self.wrap, layout.wrap);
        }
        if let Some(jitter) = incoming.jitter {
            merge_value(&mut self.max_rotation, jitter.max_rotation);
            merge_value(&mut self.max_scale_jitter, jitter.max_scale_jitter);
            merge_value(&mut self.max_shear, jitter.max_shear);
        }
        if let Some(ink) = incoming.ink {
            merge_value(&mut self.bleed_amount, ink.bleed_amount);
            merge_value(&mut self.blur_after_bleed, ink.blur_after_bleed);
        }
        if let Some(paper) = incoming.paper {
            if let Some(texture) = paper.texture.filter(|value| !value.trim().is_empty()) {
                self.paper_texture = Some(texture);
            }
            merge_value(&mut self.paper_opacity, paper.opacity);
            merge_value(&mut self.preserve_transparent_background, paper.transparent);
        }
        if let Some(noise) = incoming.noise {
            merge_value(&mut self.add_noise, noise.enabled);
            merge_value(&mut self.noise_level, noise.level);
        }
        if let Some(run) = incoming.run {
            if let Some(seed) = run.seed {
                self.seed = Some(seed);
            }
        }
    }

    pub fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(folder) = overrides.glyph_folder.clone() {
            self.glyph_folder = folder;
        }
        merge_value(&mut self.dpi, overrides.dpi);
        if let Some(color) = overrides.text_color.clone() {
            self.text_color = color;
        }
        if let Some(color) = overrides.background_color.clone() {
            self.background_color = color;
        }
        if overrides.uppercase {
            self.uppercase = true;
        }
        merge_value(&mut self.wrap, overrides.wrap);
        if let Some(texture) = overrides.paper_texture.clone() {
            self.paper_texture = Some(texture);
        }
        if overrides.transparent {
            self.preserve_transparent_background = true;
        }
        if overrides.no_noise {
            self.add_noise = false;
        }
        if let Some(seed) = overrides.seed {
            self.seed = Some(seed);
        }
    }
}

fn merge_value<T>(slot: &mut T, incoming: Option<T>) {
    if let Some(value) = incoming {
        *slot = value;
    }
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().and_then(|home| {
        let home = home.trim();
        if home.is_empty() {
            None
        } else {
            Some(Path::new(home).join(".handwriting-synth"))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn builtin_settings_match_defaults() {
        let parsed: SettingsFile = toml::from_str(DEFAULT_SETTINGS_TOML).expect("parse defaults");
        let mut settings = Settings::default();
        settings.merge(parsed);
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn later_files_override_earlier_ones() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("extra.toml");
        fs::write(
            &path,
            "[page]\ndpi = 150\n[colors]\ntext = \"#1B1B1B\"\n[layout]\nwrap = \"word\"\nspace_width = 40\n[run]\nseed = 7\n",
        )
        .expect("write settings");

        let mut settings = Settings::default();
        settings.merge_file(&path).expect("merge");
        assert_eq!(settings.dpi, 150);
        assert_eq!(settings.text_color, "#1B1B1B");
        assert_eq!(settings.wrap, WrapMode::Word);
        assert_eq!(settings.space_width, Some(40));
        assert_eq!(settings.seed, Some(7));
        assert_eq!(settings.margin_left, 100);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("bad.toml");
        fs::write(&path, "[page]\ndpix = 3\n").expect("write settings");
        let mut settings = Settings::default();
        assert!(settings.merge_file(&path).is_err());
    }

    #[test]
    fn missing_explicit_settings_file_is_an_error() {
        let dir = tempdir().expect("tempdir");
        let err = load_settings(Some(&dir.path().join("absent.toml")))
            .expect_err("explicit file must exist");
        assert!(err.to_string().contains("settings file not found"));
    }

    #[test]
    fn overrides_win() {
        let mut settings = Settings::default();
        settings.apply_overrides(&Overrides {
            dpi: Some(72),
            transparent: true,
            no_noise: true,
            seed: Some(3),
            ..Overrides::default()
        });
        assert_eq!(settings.dpi, 72);
        assert!(settings.preserve_transparent_background);
        assert!(!settings.add_noise);
        assert_eq!(settings.seed, Some(3));
    }
}
