use serde::{Deserialize, Serialize};
use std::fmt;

/// 8-bit straight-alpha color, serialized as a hex string ("#rrggbb" or "#rrggbbaa").
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const WHITE: Self = Self::rgb(0xFF, 0xFF, 0xFF);
    pub const BLACK: Self = Self::rgb(0, 0, 0);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 0xFF }
    }

    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    /// Per-channel blend, rounded to the nearest integer.
    #[inline(always)]
    pub fn lerp(self, to: Self, f: f64) -> Self {
        #[inline(always)]
        fn ch(a: u8, b: u8, f: f64) -> u8 {
            let a = f64::from(a);
            let b = f64::from(b);
            (a + (b - a) * f).round().clamp(0.0, 255.0) as u8
        }
        Self {
            r: ch(self.r, to.r, f),
            g: ch(self.g, to.g, f),
            b: ch(self.b, to.b, f),
            a: ch(self.a, to.a, f),
        }
    }

    #[inline(always)]
    pub const fn to_rgba8(self) -> [u8; 4] {
        [self.r, self.g, self.b, self.a]
    }

    pub fn to_hex(self) -> String {
        if self.a == 0xFF {
            format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
        } else {
            format!("#{:02x}{:02x}{:02x}{:02x}", self.r, self.g, self.b, self.a)
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl TryFrom<String> for Color {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        parse_hex(&s).ok_or_else(|| format!("invalid hex color '{s}'"))
    }
}

impl From<Color> for String {
    fn from(c: Color) -> Self {
        c.to_hex()
    }
}

// Const-safe hex char to u8
const fn hex_val(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(10 + (b - b'a')),
        b'A'..=b'F' => Some(10 + (b - b'A')),
        _ => None,
    }
}

/// Accepts "#rgb", "#rgba", "#rrggbb", "#rrggbbaa" (or without '#').
pub const fn parse_hex(s: &str) -> Option<Color> {
    let bytes = s.as_bytes();
    let (bytes, len) = if !bytes.is_empty() && bytes[0] == b'#' {
        let (_, rem) = bytes.split_at(1);
        (rem, s.len() - 1)
    } else {
        (bytes, s.len())
    };

    let mut nibbles = [0u8; 8];
    let mut i = 0;
    while i < len {
        if i >= 8 {
            return None;
        }
        match hex_val(bytes[i]) {
            Some(v) => nibbles[i] = v,
            None => return None,
        }
        i += 1;
    }

    // Expand 4-bit color to 8-bit (e.g. F -> FF)
    const fn rep(n: u8) -> u8 {
        (n << 4) | n
    }
    const fn byte2(h: u8, l: u8) -> u8 {
        (h << 4) | l
    }

    let n = nibbles;
    match len {
        3 => Some(Color::rgb(rep(n[0]), rep(n[1]), rep(n[2]))),
        4 => Some(Color::rgba(rep(n[0]), rep(n[1]), rep(n[2]), rep(n[3]))),
        6 => Some(Color::rgb(byte2(n[0], n[1]), byte2(n[2], n[3]), byte2(n[4], n[5]))),
        8 => Some(Color::rgba(
            byte2(n[0], n[1]),
            byte2(n[2], n[3]),
            byte2(n[4], n[5]),
            byte2(n[6], n[7]),
        )),
        _ => None,
    }
}

/// Panics on invalid input; use only with trusted literals.
/// Evaluated at COMPILE TIME if assigned to a const/static.
pub const fn hex(s: &str) -> Color {
    match parse_hex(s) {
        Some(c) => c,
        None => panic!("color hex string must be 3, 4, 6, or 8 hex digits"),
    }
}

/* =========================== THEME PALETTES =========================== */

/// Default note tint per lane, used when a difficulty has no `notes.colors.<n>` timeline.
pub const LANE_RGBA: [Color; 8] = [
    hex("#FF577E"),
    hex("#3D94FF"),
    hex("#5CE087"),
    hex("#FFBE00"),
    hex("#DD57FF"),
    hex("#00B8CC"),
    hex("#AEFA44"),
    hex("#FF7D00"),
];

/// Tint of an armed hold head and body.
pub const ACTIVE_HOLD_RGBA: Color = Color::WHITE;

pub const DEFAULT_BACKGROUND_TOP: Color = hex("#101018");
pub const DEFAULT_BACKGROUND_BOTTOM: Color = hex("#000000");

#[inline(always)]
const fn wrap(n: usize, i: usize) -> usize {
    i % n
}

#[inline(always)]
pub const fn lane_rgba(lane: usize) -> Color {
    LANE_RGBA[wrap(LANE_RGBA.len(), lane)]
}

/// Darkens a broken hold body so it reads as dead weight scrolling away.
#[inline(always)]
pub fn dim(c: Color) -> Color {
    c.lerp(Color::rgba(0x40, 0x40, 0x40, c.a), 0.6)
}

#[cfg(test)]
mod tests {
    use super::{Color, hex, lane_rgba, parse_hex};

    #[test]
    fn parses_every_supported_hex_length() {
        assert_eq!(parse_hex("#fff"), Some(Color::WHITE));
        assert_eq!(parse_hex("000"), Some(Color::BLACK));
        assert_eq!(parse_hex("#FF000080"), Some(Color::rgba(0xFF, 0, 0, 0x80)));
        assert_eq!(parse_hex("#12345"), None, "5 digits is not a color");
        assert_eq!(parse_hex("#gg0000"), None, "non-hex digits must be rejected");
        assert_eq!(parse_hex(""), None);
    }

    #[test]
    fn lerp_rounds_each_channel() {
        let a = hex("#000000");
        let b = hex("#ff0a01");
        let mid = a.lerp(b, 0.5);
        assert_eq!(mid, Color::rgb(128, 5, 1), "0.5 blend should round half away from zero");
        assert_eq!(a.lerp(b, 0.0), a);
        assert_eq!(a.lerp(b, 1.0), b);
    }

    #[test]
    fn hex_string_round_trips_through_serde() {
        let c: Color = serde_json::from_str("\"#3d94ff\"").expect("valid color");
        assert_eq!(c, Color::rgb(0x3D, 0x94, 0xFF));
        assert_eq!(serde_json::to_string(&c).expect("serialize"), "\"#3d94ff\"");
        assert!(serde_json::from_str::<Color>("\"blue\"").is_err());
    }

    #[test]
    fn lane_palette_wraps() {
        assert_eq!(lane_rgba(0), lane_rgba(8));
    }
}
