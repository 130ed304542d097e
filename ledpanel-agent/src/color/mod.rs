//! Color values and per-LED color expressions
//!
//! - `Rgb`: 24-bit color, canonically six upper-case hex digits
//! - `ColorExpr`: the textual per-LED expression stored in configuration
//! - evaluator: turns an expression plus elapsed time into a concrete color

mod eval;
mod expr;

pub use eval::{evaluate, evaluate_with, ColorSampler, EvalError, OsRandomSampler};
pub use expr::{ColorExpr, ExprError, MetricName, TimeUnit, SEPARATOR};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// 24-bit RGB color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

/// Color shown for LEDs whose expression cannot be parsed
pub const FALLBACK_COLOR: Rgb = Rgb::new(0xFF, 0xFF, 0xFF);

impl Rgb {
    pub const BLACK: Rgb = Rgb::new(0, 0, 0);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Parse six hex digits, tolerating one leading `#`
    pub fn from_hex(text: &str) -> Option<Self> {
        let digits = text.strip_prefix('#').unwrap_or(text);
        if digits.len() != 6 || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        let channel = |i: usize| u8::from_str_radix(&digits[i..i + 2], 16).ok();
        Some(Self::new(channel(0)?, channel(2)?, channel(4)?))
    }

    /// Linear per-channel blend towards `other`.
    ///
    /// `factor` is clamped to [0, 1] and each channel is rounded to the nearest integer.
    pub fn interpolate(self, other: Rgb, factor: f64) -> Rgb {
        let factor = if factor.is_nan() { 0.0 } else { factor.clamp(0.0, 1.0) };
        let mix = |a: u8, b: u8| {
            let a = f64::from(a);
            let value = a + (f64::from(b) - a) * factor;
            value.round().clamp(0.0, 255.0) as u8
        };
        Rgb::new(mix(self.r, other.r), mix(self.g, other.g), mix(self.b, other.b))
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }
}

impl FromStr for Rgb {
    type Err = ExprError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Rgb::from_hex(s).ok_or_else(|| ExprError::InvalidColor(s.to_string()))
    }
}

impl Serialize for Rgb {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Rgb {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}
