//! Color values, parsing and explosion palettes.
//!
//! Colors are straight (non-premultiplied) RGBA with each channel in `0.0..=1.0`.
//! Trigger calls hand colors around as strings (`#ff6600`, `rgb(255, 102, 0)`),
//! so parsing is lenient: anything unparseable falls back to a caller-chosen
//! default instead of failing the draw.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// An RGBA color.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Default for Color {
    fn default() -> Self {
        Color::WHITE
    }
}

impl Color {
    pub const WHITE: Color = Color::rgb8(255, 255, 255);
    pub const BLACK: Color = Color::rgb8(0, 0, 0);
    pub const TRANSPARENT: Color = Color { r: 0.0, g: 0.0, b: 0.0, a: 0.0 };
    /// Fallback for malformed color input.
    pub const FALLBACK: Color = Color::rgb8(0xff, 0x66, 0x00);

    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// Opaque color from 8-bit channels.
    pub const fn rgb8(r: u8, g: u8, b: u8) -> Self {
        Self {
            r: r as f32 / 255.0,
            g: g as f32 / 255.0,
            b: b as f32 / 255.0,
            a: 1.0,
        }
    }

    /// Opaque color from a packed `0xRRGGBB` value.
    pub const fn hex(rgb: u32) -> Self {
        Self::rgb8((rgb >> 16) as u8, (rgb >> 8) as u8, rgb as u8)
    }

    pub fn with_alpha(self, a: f32) -> Self {
        Self { a: a.clamp(0.0, 1.0), ..self }
    }

    /// Multiply the existing alpha.
    pub fn fade(self, factor: f32) -> Self {
        self.with_alpha(self.a * factor)
    }

    /// Linear interpolation of all four channels.
    pub fn lerp(self, other: Color, t: f32) -> Color {
        let t = t.clamp(0.0, 1.0);
        Color {
            r: self.r + (other.r - self.r) * t,
            g: self.g + (other.g - self.g) * t,
            b: self.b + (other.b - self.b) * t,
            a: self.a + (other.a - self.a) * t,
        }
    }

    pub fn to_rgba8(self) -> [u8; 4] {
        [
            to_byte(self.r),
            to_byte(self.g),
            to_byte(self.b),
            to_byte(self.a),
        ]
    }

    pub fn from_rgba8(px: [u8; 4]) -> Self {
        Self {
            r: px[0] as f32 / 255.0,
            g: px[1] as f32 / 255.0,
            b: px[2] as f32 / 255.0,
            a: px[3] as f32 / 255.0,
        }
    }

    /// Rec. 709 relative luminance of the RGB channels.
    pub fn luminance(self) -> f32 {
        luminance(self.r, self.g, self.b)
    }

    /// Parse a hex (`#rgb`, `#rrggbb`, `#rrggbbaa`) or functional
    /// (`rgb(..)`, `rgba(..)`) color string.
    pub fn parse(input: &str) -> Option<Color> {
        let s = input.trim();
        if let Some(hex) = s.strip_prefix('#') {
            return parse_hex(hex);
        }
        parse_functional(s)
    }

    /// Parse, falling back to `fallback` on malformed input.
    pub fn parse_or(input: &str, fallback: Color) -> Color {
        match Color::parse(input) {
            Some(color) => color,
            None => {
                log::debug!("Malformed color '{}', using fallback", input);
                fallback
            }
        }
    }

    /// Lowercase `#rrggbb` form, used as a palette key.
    pub fn to_hex(self) -> String {
        let [r, g, b, _] = self.to_rgba8();
        format!("#{:02x}{:02x}{:02x}", r, g, b)
    }
}

/// Rec. 709 luminance weights.
pub const LUMA_WEIGHTS: [f32; 3] = [0.2126, 0.7152, 0.0722];

pub fn luminance(r: f32, g: f32, b: f32) -> f32 {
    r * LUMA_WEIGHTS[0] + g * LUMA_WEIGHTS[1] + b * LUMA_WEIGHTS[2]
}

fn to_byte(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

fn parse_hex(hex: &str) -> Option<Color> {
    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let nibble = |i: usize| u8::from_str_radix(&hex[i..i + 1], 16).ok().map(|v| v * 17);
    let byte = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();

    match hex.len() {
        3 => Some(Color::rgb8(nibble(0)?, nibble(1)?, nibble(2)?)),
        6 => Some(Color::rgb8(byte(0)?, byte(2)?, byte(4)?)),
        8 => {
            let a = byte(6)? as f32 / 255.0;
            Some(Color::rgb8(byte(0)?, byte(2)?, byte(4)?).with_alpha(a))
        }
        _ => None,
    }
}

fn functional_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^rgba?\(\s*(\d{1,3})\s*,\s*(\d{1,3})\s*,\s*(\d{1,3})\s*(?:,\s*([0-9]*\.?[0-9]+)\s*)?\)$",
        )
        .map_err(|e| log::error!("Invalid color regex: {}", e))
        .ok()
    })
    .as_ref()
}

fn parse_functional(s: &str) -> Option<Color> {
    let caps = functional_regex()?.captures(s)?;
    let channel = |i: usize| -> Option<u8> {
        let v: u32 = caps.get(i)?.as_str().parse().ok()?;
        u8::try_from(v).ok()
    };
    let color = Color::rgb8(channel(1)?, channel(2)?, channel(3)?);
    match caps.get(4) {
        Some(a) => Some(color.with_alpha(a.as_str().parse().ok()?)),
        None => Some(color),
    }
}

// ============================================================================
// Palettes
// ============================================================================

/// Default explosion palette, also used for unknown seeds.
pub const ORANGE_PALETTE: [Color; 5] = [
    Color::hex(0xff3300),
    Color::hex(0xff6600),
    Color::hex(0xff9900),
    Color::hex(0xffcc00),
    Color::hex(0xffffff),
];

const RED_PALETTE: [Color; 5] = [
    Color::hex(0xff0000),
    Color::hex(0xcc0000),
    Color::hex(0xff3333),
    Color::hex(0xff6666),
    Color::hex(0xffffff),
];

const CYAN_PALETTE: [Color; 5] = [
    Color::hex(0x00ffff),
    Color::hex(0x00ccff),
    Color::hex(0x0099ff),
    Color::hex(0x66ffff),
    Color::hex(0xffffff),
];

const MAGENTA_PALETTE: [Color; 5] = [
    Color::hex(0xff00ff),
    Color::hex(0xcc00cc),
    Color::hex(0xff66ff),
    Color::hex(0x9900ff),
    Color::hex(0xffffff),
];

const GREEN_PALETTE: [Color; 5] = [
    Color::hex(0x00ff00),
    Color::hex(0x00cc00),
    Color::hex(0x66ff66),
    Color::hex(0xccff00),
    Color::hex(0xffffff),
];

const YELLOW_PALETTE: [Color; 4] = [
    Color::hex(0xffff00),
    Color::hex(0xffcc00),
    Color::hex(0xffff99),
    Color::hex(0xffffff),
];

const BLUE_PALETTE: [Color; 4] = [
    Color::hex(0x0066ff),
    Color::hex(0x3399ff),
    Color::hex(0x0033cc),
    Color::hex(0xffffff),
];

const WHITE_PALETTE: [Color; 4] = [
    Color::hex(0xffffff),
    Color::hex(0xeeeeff),
    Color::hex(0xccccff),
    Color::hex(0xffffcc),
];

/// Gold/white burst palette used for level-up effects.
pub const LEVEL_UP_PALETTE: [Color; 5] = [
    Color::hex(0xffd700),
    Color::hex(0xffee88),
    Color::hex(0xffffff),
    Color::hex(0x00ffcc),
    Color::hex(0xff66ff),
];

/// Palette for an explosion seeded by `seed` (a color string).
pub fn explosion_palette(seed: &str) -> &'static [Color] {
    let key = match Color::parse(seed) {
        Some(color) => color.to_hex(),
        None => return &ORANGE_PALETTE,
    };
    match key.as_str() {
        "#ff6600" => &ORANGE_PALETTE,
        "#ff0000" => &RED_PALETTE,
        "#00ffff" => &CYAN_PALETTE,
        "#ff00ff" => &MAGENTA_PALETTE,
        "#00ff00" => &GREEN_PALETTE,
        "#ffff00" => &YELLOW_PALETTE,
        "#0066ff" | "#0000ff" => &BLUE_PALETTE,
        "#ffffff" => &WHITE_PALETTE,
        _ => &ORANGE_PALETTE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex_forms() {
        assert_eq!(Color::parse("#ff6600"), Some(Color::hex(0xff6600)));
        assert_eq!(Color::parse("#f60"), Some(Color::hex(0xff6600)));
        let c = Color::parse("#ff660080").unwrap();
        assert!((c.a - 128.0 / 255.0).abs() < 1e-6);
    }

    #[test]
    fn test_parse_functional_forms() {
        assert_eq!(Color::parse("rgb(255, 102, 0)"), Some(Color::hex(0xff6600)));
        let c = Color::parse("rgba(0,255,255,0.5)").unwrap();
        assert_eq!(c.to_rgba8()[..3], [0, 255, 255]);
        assert!((c.a - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_functional_pattern_compiles() {
        assert!(functional_regex().is_some());
    }

    #[test]
    fn test_malformed_color_falls_back() {
        assert_eq!(Color::parse("#zzz"), None);
        assert_eq!(Color::parse("rgb(300, 0, 0)"), None);
        assert_eq!(Color::parse("#12345"), None);
        assert_eq!(Color::parse_or("not a color", Color::BLACK), Color::BLACK);
    }

    #[test]
    fn test_palette_lookup() {
        assert_eq!(explosion_palette("#ff6600"), &ORANGE_PALETTE);
        assert_eq!(explosion_palette("#FF6600"), &ORANGE_PALETTE);
        assert_eq!(explosion_palette("#00ffff")[0], Color::hex(0x00ffff));
        // Unknown and malformed seeds use the orange palette
        assert_eq!(explosion_palette("#123456"), &ORANGE_PALETTE);
        assert_eq!(explosion_palette("garbage"), &ORANGE_PALETTE);
    }

    #[test]
    fn test_luminance_weights() {
        assert!((Color::WHITE.luminance() - 1.0).abs() < 1e-5);
        assert_eq!(Color::BLACK.luminance(), 0.0);
    }
}
