use super::{ColorExpr, Rgb};

/// Evaluation failures for a single LED
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvalError {
    #[error("multi-stop gradient needs at least 2 colors, got {0}")]
    TooFewStops(usize),
    #[error("cycle duration must be a positive number of seconds, got {0}")]
    InvalidCycle(f64),
    #[error("elapsed time must be finite, got {0}")]
    InvalidElapsed(f64),
}

/// Source of colors for `ColorExpr::Random`
pub trait ColorSampler {
    fn sample(&mut self) -> Rgb;
}

/// Samples channels from v4 UUID bytes, which come from the OS RNG
#[derive(Debug, Default, Clone, Copy)]
pub struct OsRandomSampler;

impl ColorSampler for OsRandomSampler {
    fn sample(&mut self) -> Rgb {
        // the first six bytes of a v4 uuid carry no version/variant bits
        let bytes = *uuid::Uuid::new_v4().as_bytes();
        Rgb::new(bytes[0], bytes[1], bytes[2])
    }
}

/// Evaluate `expr` at `elapsed` seconds for a `cycle`-second animation period.
pub fn evaluate(expr: &ColorExpr, elapsed: f64, cycle: f64) -> Result<Rgb, EvalError> {
    evaluate_with(expr, elapsed, cycle, &mut OsRandomSampler)
}

pub fn evaluate_with(
    expr: &ColorExpr,
    elapsed: f64,
    cycle: f64,
    sampler: &mut dyn ColorSampler,
) -> Result<Rgb, EvalError> {
    match expr {
        ColorExpr::Solid(color) => Ok(*color),
        ColorExpr::Random => Ok(sampler.sample()),
        // metric and time tags do not feed the blend factor
        ColorExpr::Gradient(a, b) | ColorExpr::MetricKeyed(a, b, _) | ColorExpr::TimeKeyed(a, b, _) => {
            check_timing(elapsed, cycle)?;
            Ok(a.interpolate(*b, two_stop_factor(elapsed, cycle)))
        }
        ColorExpr::MultiStopCycle(stops) => {
            if stops.len() < 2 {
                return Err(EvalError::TooFewStops(stops.len()));
            }
            check_timing(elapsed, cycle)?;
            Ok(multi_stop(stops, elapsed, cycle))
        }
    }
}

fn check_timing(elapsed: f64, cycle: f64) -> Result<(), EvalError> {
    if !cycle.is_finite() || cycle <= 0.0 {
        return Err(EvalError::InvalidCycle(cycle));
    }
    if !elapsed.is_finite() {
        return Err(EvalError::InvalidElapsed(elapsed));
    }
    Ok(())
}

/// Sawtooth over two cycles: 0 at the start, 0.5 after one cycle
fn two_stop_factor(elapsed: f64, cycle: f64) -> f64 {
    let period = cycle * 2.0;
    (elapsed.rem_euclid(period) / period).clamp(0.0, 1.0)
}

fn multi_stop(stops: &[Rgb], elapsed: f64, cycle: f64) -> Rgb {
    let closed = stops.first() == stops.last();
    let segments = if closed { stops.len() - 1 } else { stops.len() };
    let stop = |i: usize| stops.get(i).copied().unwrap_or(stops[0]);

    let segment_duration = cycle / segments as f64;
    let time_in_cycle = elapsed.rem_euclid(cycle);
    let index = ((time_in_cycle / segment_duration).floor() as usize).min(segments - 1);
    let time_in_segment = time_in_cycle - index as f64 * segment_duration;
    let factor = time_in_segment / segment_duration;

    stop(index).interpolate(stop(index + 1), factor)
}
