//! Chart date window: how much history fits on screen, and the fetch
//! `start_date` that follows from it.

#![allow(missing_docs)]

use chrono::{DateTime, Duration, DurationRound, Utc};
use serde::Serialize;

use crate::core::config::ChartConfig;

/// Widest window, in hours, that any view size or effect duration can ask for.
const MAX_WINDOW_HOURS: f64 = 24.0 * 14.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ChartWindow {
    /// Start of the charted range, floored to the hour. Every fetch uses it.
    pub start: DateTime<Utc>,
    pub max_end: DateTime<Utc>,
    pub total_hours: f64,
    pub history_hours: f64,
}

impl ChartWindow {
    /// Fit the window to `width` points.
    ///
    /// `effect_hours` is the insulin effect duration; its whole-hour ceiling
    /// is reserved for the future part of the chart.
    #[must_use]
    pub fn compute(
        width: f64,
        config: &ChartConfig,
        effect_hours: f64,
        now: DateTime<Utc>,
    ) -> Self {
        let available = (width - config.horizontal_margin).max(0.0);
        let total_hours = (available / config.minimum_width_per_hour)
            .floor()
            .max(0.0)
            .min(MAX_WINDOW_HOURS);
        let future_hours = effect_hours.ceil().max(0.0).min(MAX_WINDOW_HOURS);
        let history_hours = config
            .minimum_history_hours
            .max(total_hours - future_hours)
            .max(0.0)
            .min(MAX_WINDOW_HOURS);

        let earliest = now.checked_sub_signed(hours(history_hours)).unwrap_or(now);
        let start = earliest
            .duration_trunc(Duration::hours(1))
            .unwrap_or(earliest);

        Self {
            start,
            max_end: start.checked_add_signed(hours(total_hours)).unwrap_or(start),
            total_hours,
            history_hours,
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
fn hours(value: f64) -> Duration {
    Duration::milliseconds((value * 3_600_000.0).round() as i64)
}
