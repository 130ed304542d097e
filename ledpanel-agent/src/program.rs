//! Compiled per-tick view of the configuration
//!
//! A `PanelProgram` holds the parsed expression of every LED slot for the active
//! layout and color set, plus the timing parameters. It is immutable; a config
//! edit produces a new program.

use std::time::Duration;
use tracing::warn;

use crate::color::{evaluate_with, ColorExpr, ColorSampler, OsRandomSampler, Rgb, FALLBACK_COLOR};
use crate::config::{ColorKey, PanelConfig};
use crate::layout::{LayoutMode, LedGroupIndex};
use crate::metrics::{MetricsSnapshot, TemperatureUnits};

#[derive(Debug, Clone, PartialEq)]
pub struct PanelProgram {
    layout: LayoutMode,
    color_key: ColorKey,
    expressions: Vec<ColorExpr>,
    update_interval: Duration,
    cycle_duration: f64,
    units: TemperatureUnits,
    needs_metrics: bool,
}

impl PanelProgram {
    /// Parse the active color array. Malformed entries become the fallback color.
    pub fn compile(config: &PanelConfig) -> Self {
        let layout = config.layout_mode;
        let led_count = LedGroupIndex::for_mode(layout).led_count();
        let color_key = config.active_color_key();
        let stored = &config.colors(color_key).colors;

        if stored.len() != led_count {
            warn!(
                "{:?} colors hold {} entries for {} LEDs, {}",
                color_key,
                stored.len(),
                led_count,
                if stored.len() < led_count { "padding with fallback" } else { "truncating" }
            );
        }

        let expressions: Vec<ColorExpr> = (0..led_count)
            .map(|slot| match stored.get(slot) {
                Some(text) => ColorExpr::parse(text).unwrap_or_else(|e| {
                    warn!("LED {}: malformed color {:?} ({}), using {}", slot, text, e, FALLBACK_COLOR);
                    ColorExpr::Solid(FALLBACK_COLOR)
                }),
                None => ColorExpr::Solid(FALLBACK_COLOR),
            })
            .collect();
        let needs_metrics = expressions.iter().any(ColorExpr::is_metric_keyed);

        Self {
            layout,
            color_key,
            expressions,
            update_interval: config.update_interval(),
            cycle_duration: config.cycle_duration,
            units: config.temperature_units(),
            needs_metrics,
        }
    }

    pub fn layout(&self) -> LayoutMode {
        self.layout
    }

    pub fn color_key(&self) -> ColorKey {
        self.color_key
    }

    pub fn expressions(&self) -> &[ColorExpr] {
        &self.expressions
    }

    pub fn led_count(&self) -> usize {
        self.expressions.len()
    }

    /// True when any slot is metric-keyed
    pub fn needs_metrics(&self) -> bool {
        self.needs_metrics
    }

    pub fn update_interval(&self) -> Duration {
        self.update_interval
    }

    pub fn cycle_duration(&self) -> f64 {
        self.cycle_duration
    }

    pub fn units(&self) -> TemperatureUnits {
        self.units
    }

    /// The scheduler restarts its animation clock when this changes
    pub fn timing(&self) -> (Duration, f64) {
        (self.update_interval, self.cycle_duration)
    }
}

/// Colors for every slot at `elapsed` seconds. Slots that fail to evaluate are black.
///
/// Metric-keyed expressions blend on elapsed time; `metrics` is accepted so
/// callers can hand over whatever they polled for the tick.
pub fn evaluate_tick(program: &PanelProgram, metrics: Option<&MetricsSnapshot>, elapsed: f64) -> Vec<Rgb> {
    let mut frame = Vec::new();
    evaluate_tick_into(program, metrics, elapsed, &mut frame, &mut OsRandomSampler);
    frame
}

/// Evaluate into `frame`, keeping the previous color of any slot that fails.
/// Returns the number of failed slots.
pub fn evaluate_tick_into(
    program: &PanelProgram,
    _metrics: Option<&MetricsSnapshot>,
    elapsed: f64,
    frame: &mut Vec<Rgb>,
    sampler: &mut dyn ColorSampler,
) -> usize {
    frame.resize(program.led_count(), Rgb::BLACK);

    let mut failures = 0;
    for (slot, expr) in program.expressions.iter().enumerate() {
        match evaluate_with(expr, elapsed, program.cycle_duration, sampler) {
            Ok(color) => frame[slot] = color,
            Err(e) => {
                warn!("LED {} keeps its previous color: {}", slot, e);
                failures += 1;
            }
        }
    }
    failures
}
