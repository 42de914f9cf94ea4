//! Window and capping resolution.
//!
//! Windows are expressed as bounds on the time elapsed between an event and
//! the user's reference instant (exposure or activation), plus an optional
//! lookback bound anchored at the experiment end.

use chrono::{DateTime, Utc};

use crate::model::{CappingKind, CappingSettings, WindowKind, WindowSettings};

const MS_PER_HOUR: f64 = 60.0 * 60.0 * 1000.0;

/// Convert hours to whole milliseconds.
pub fn hours_to_ms(hours: f64) -> i64 {
    (hours * MS_PER_HOUR).round() as i64
}

/// One boundary condition of a metric window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowBound {
    /// `event.time - start >= ms`
    ElapsedAtLeast(i64),
    /// `event.time - start < ms`
    ElapsedBelow(i64),
    /// `end - event.time <= length`
    Lookback { end: i64, length: i64 },
}

impl WindowBound {
    /// Whether an event at `time` satisfies this bound for a user whose
    /// reference instant is `start`.
    pub fn holds(&self, time: i64, start: i64) -> bool {
        match *self {
            WindowBound::ElapsedAtLeast(ms) => time - start >= ms,
            WindowBound::ElapsedBelow(ms) => time - start < ms,
            WindowBound::Lookback { end, length } => end - time <= length,
        }
    }
}

/// Resolve window settings into bounds.
pub fn resolve_window(settings: &WindowSettings, experiment_end: DateTime<Utc>) -> Vec<WindowBound> {
    let mut bounds = Vec::new();
    let delay = hours_to_ms(settings.delay_hours());
    let length = hours_to_ms(settings.window_hours());

    if delay != 0 {
        bounds.push(WindowBound::ElapsedAtLeast(delay));
    }
    match settings.kind {
        WindowKind::Conversion => bounds.push(WindowBound::ElapsedBelow(delay + length)),
        WindowKind::Lookback => bounds.push(WindowBound::Lookback {
            end: experiment_end.timestamp_millis(),
            length,
        }),
        WindowKind::None => {}
    }
    bounds
}

/// Whether every bound holds.
pub fn within(bounds: &[WindowBound], time: i64, start: i64) -> bool {
    bounds.iter().all(|b| b.holds(time, start))
}

/// The capping ceiling, if any.
pub fn resolve_capping(settings: &CappingSettings) -> Option<f64> {
    match settings.kind {
        CappingKind::Absolute if settings.value > 0.0 => Some(settings.value),
        _ => None,
    }
}

/// Clamp an aggregated per-user value. Binomial values are never capped.
pub fn apply_cap(value: f64, cap: Option<f64>, binomial: bool) -> f64 {
    match cap {
        Some(ceiling) if !binomial => value.min(ceiling),
        _ => value,
    }
}
