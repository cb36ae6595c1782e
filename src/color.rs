use anyhow::{Result, anyhow};
use image::Rgb;

const NAMED_COLORS: &[(&str, [u8; 3])] = &[
    ("white", [255, 255, 255]),
    ("black", [0, 0, 0]),
    ("red", [255, 0, 0]),
    ("green", [0, 255, 0]),
    ("blue", [0, 0, 255]),
    ("brown", [150, 75, 0]),
    ("paper", [250, 245, 240]),
];

pub const BLACK: Rgb<u8> = Rgb([0, 0, 0]);
pub const WHITE: Rgb<u8> = Rgb([255, 255, 255]);

/// Parses `#RRGGBB`, `#RGB` (leading `#` optional) or one of the named colors.
pub fn parse_color(value: &str) -> Result<Rgb<u8>> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("color is empty"));
    }
    if let Some(rgb) = named_color(trimmed) {
        return Ok(rgb);
    }
    parse_hex(trimmed).ok_or_else(|| anyhow!("unrecognized color '{}'", value))
}

/// Resolves a color, falling back to `fallback` with a warning when the value is not recognized.
pub fn resolve_color(value: &str, fallback: Rgb<u8>, role: &str) -> Rgb<u8> {
    match parse_color(value) {
        Ok(rgb) => rgb,
        Err(err) => {
            tracing::warn!("{} color: {}; using {:?}", role, err, fallback.0);
            fallback
        }
    }
}

fn named_color(value: &str) -> Option<Rgb<u8>> {
    let lower = value.to_ascii_lowercase();
    NAMED_COLORS
        .iter()
        .find(|(name, _)| *name == lower)
        .map(|(_, rgb)| Rgb(*rgb))
}

fn parse_hex(value: &str) -> Option<Rgb<u8>> {
    let digits = value.strip_prefix('#').unwrap_or(value);
    if !digits.chars().all(|ch| ch.is_ascii_hexdigit()) {
        return None;
    }
    let expanded: String = match digits.len() {
        3 => digits.chars().flat_map(|ch| [ch, ch]).collect(),
        6 => digits.to_string(),
        _ => return None,
    };
    let channel = |idx: usize| u8::from_str_radix(&expanded[idx..idx + 2], 16).ok();
    Some(Rgb([channel(0)?, channel(2)?, channel(4)?]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_long_and_short_hex() {
        assert_eq!(parse_color("#1B1B1B").expect("hex"), Rgb([0x1b, 0x1b, 0x1b]));
        assert_eq!(parse_color("#fa0").expect("short hex"), Rgb([0xff, 0xaa, 0x00]));
        assert_eq!(parse_color("FBF7EF").expect("bare hex"), Rgb([0xfb, 0xf7, 0xef]));
    }

    #[test]
    fn parses_named_colors_case_insensitively() {
        assert_eq!(parse_color("Brown").expect("named"), Rgb([150, 75, 0]));
        assert_eq!(parse_color(" paper ").expect("named"), Rgb([250, 245, 240]));
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_color("#12345").is_err());
        assert!(parse_color("#ggg").is_err());
        assert!(parse_color("teal").is_err());
        assert!(parse_color("").is_err());
    }

    #[test]
    fn resolve_falls_back_per_role() {
        assert_eq!(resolve_color("nope", WHITE, "background"), WHITE);
        assert_eq!(resolve_color("nope", BLACK, "text"), BLACK);
        assert_eq!(resolve_color("red", BLACK, "text"), Rgb([255, 0, 0]));
    }
}
