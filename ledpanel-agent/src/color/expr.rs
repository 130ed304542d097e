use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::Rgb;
use crate::metrics::Signal;

/// Separator between tokens of a stored expression
pub const SEPARATOR: char = '-';

/// Metric vocabulary accepted as the third token of a two-stop expression
pub type MetricName = Signal;

/// Time unit tag of a time-keyed expression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Seconds,
    Minutes,
    Hours,
}

impl TimeUnit {
    pub const ALL: [TimeUnit; 3] = [TimeUnit::Seconds, TimeUnit::Minutes, TimeUnit::Hours];

    pub fn as_str(self) -> &'static str {
        match self {
            TimeUnit::Seconds => "seconds",
            TimeUnit::Minutes => "minutes",
            TimeUnit::Hours => "hours",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|u| u.as_str().eq_ignore_ascii_case(key))
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reasons a stored expression is malformed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExprError {
    #[error("empty color expression")]
    Empty,
    #[error("invalid color token {0:?} (expected six hex digits)")]
    InvalidColor(String),
    #[error("unknown key {0:?}: expected a metric name or a time unit")]
    UnknownKey(String),
}

/// One LED's color specification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColorExpr {
    Solid(Rgb),
    /// Two-stop blend over one full cycle
    Gradient(Rgb, Rgb),
    MetricKeyed(Rgb, Rgb, MetricName),
    TimeKeyed(Rgb, Rgb, TimeUnit),
    /// Cyclic segment-wise gradient through the stops, closed back to the first one
    MultiStopCycle(Vec<Rgb>),
    /// Freshly sampled on every evaluation
    Random,
}

impl ColorExpr {
    pub fn is_metric_keyed(&self) -> bool {
        matches!(self, ColorExpr::MetricKeyed(..))
    }

    /// Parse a stored expression.
    ///
    /// `random` (any case), a single color, `A-B-<metric>`, `A-B-<time unit>`,
    /// two colors, or four or more colors joined by `-`. Two identical colors
    /// collapse to `Solid`. Three parts always need a metric or time key.
    pub fn parse(text: &str) -> Result<Self, ExprError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ExprError::Empty);
        }
        if text.eq_ignore_ascii_case("random") {
            return Ok(ColorExpr::Random);
        }
        if !text.contains(SEPARATOR) {
            return Ok(ColorExpr::Solid(parse_color(text)?));
        }

        let parts: Vec<&str> = text.split(SEPARATOR).collect();
        if let [a, b, key] = parts.as_slice() {
            if let Some(metric) = Signal::from_key(key) {
                return Ok(ColorExpr::MetricKeyed(parse_color(a)?, parse_color(b)?, metric));
            }
            if let Some(unit) = TimeUnit::from_key(key) {
                return Ok(ColorExpr::TimeKeyed(parse_color(a)?, parse_color(b)?, unit));
            }
            return Err(ExprError::UnknownKey((*key).to_string()));
        }

        let colors = parts
            .iter()
            .map(|part| parse_color(part))
            .collect::<Result<Vec<_>, _>>()?;
        match colors.as_slice() {
            [a, b] if a == b => Ok(ColorExpr::Solid(*a)),
            _ => Ok(ColorExpr::MultiStopCycle(colors)),
        }
    }
}

fn parse_color(token: &str) -> Result<Rgb, ExprError> {
    if token.is_empty() {
        return Err(ExprError::Empty);
    }
    Rgb::from_hex(token).ok_or_else(|| ExprError::InvalidColor(token.to_string()))
}

impl FromStr for ColorExpr {
    type Err = ExprError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ColorExpr::parse(s)
    }
}

impl fmt::Display for ColorExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColorExpr::Solid(c) => write!(f, "{c}"),
            ColorExpr::Gradient(a, b) => write!(f, "{a}{SEPARATOR}{b}"),
            ColorExpr::MetricKeyed(a, b, metric) => write!(f, "{a}{SEPARATOR}{b}{SEPARATOR}{metric}"),
            ColorExpr::TimeKeyed(a, b, unit) => write!(f, "{a}{SEPARATOR}{b}{SEPARATOR}{unit}"),
            ColorExpr::MultiStopCycle(colors) => {
                for (i, c) in colors.iter().enumerate() {
                    if i > 0 {
                        write!(f, "{SEPARATOR}")?;
                    }
                    write!(f, "{c}")?;
                }
                // three open stops would read back as a keyed form
                match colors.as_slice() {
                    [first, .., last] if colors.len() >= 3 && first != last => write!(f, "{SEPARATOR}{first}"),
                    _ => Ok(()),
                }
            }
            ColorExpr::Random => f.write_str("random"),
        }
    }
}
