//! Data returned by the stores.

#![allow(missing_docs)]

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

// ──────────────────── series values ────────────────────

/// A stored CGM reading, in mg/dL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlucoseSample {
    pub start: DateTime<Utc>,
    pub mg_dl: f64,
}

/// A predicted glucose point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GlucoseValue {
    pub start: DateTime<Utc>,
    pub mg_dl: f64,
}

/// Insulin on board at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InsulinValue {
    pub start: DateTime<Utc>,
    pub units: f64,
}

/// Carbs on board at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CarbValue {
    pub start: DateTime<Utc>,
    pub grams: f64,
}

/// Rate of change of glucose attributed to insulin counteraction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GlucoseEffectVelocity {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub mg_dl_per_minute: f64,
}

/// Something with a timestamp, for "last value at or before now" lookups.
pub trait Timestamped {
    fn timestamp(&self) -> DateTime<Utc>;
}

impl Timestamped for InsulinValue {
    fn timestamp(&self) -> DateTime<Utc> {
        self.start
    }
}

impl Timestamped for CarbValue {
    fn timestamp(&self) -> DateTime<Utc> {
        self.start
    }
}

/// Latest element whose timestamp is not after `now`. Input is in time order.
pub fn last_at_or_before<T: Timestamped>(values: &[T], now: DateTime<Utc>) -> Option<&T> {
    let idx = values.partition_point(|value| value.timestamp() <= now);
    idx.checked_sub(1).and_then(|i| values.get(i))
}

// ──────────────────── doses ────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DoseKind {
    Basal,
    TempBasal,
    Bolus,
    Suspend,
    Resume,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DoseUnit {
    Units,
    UnitsPerHour,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoseEntry {
    pub kind: DoseKind,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub value: f64,
    pub unit: DoseUnit,
}

impl DoseEntry {
    /// Delivery rate regardless of how the value was recorded.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn units_per_hour(&self) -> f64 {
        match self.unit {
            DoseUnit::UnitsPerHour => self.value,
            DoseUnit::Units => {
                let hours = (self.end - self.start).num_milliseconds() as f64 / 3_600_000.0;
                if hours > 0.0 { self.value / hours } else { 0.0 }
            }
        }
    }
}

// ──────────────────── recommendations ────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TempBasalRecommendation {
    pub units_per_hour: f64,
    pub duration_minutes: f64,
}

/// A recommendation together with the time the loop produced it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RecommendedTempBasal {
    pub recommendation: TempBasalRecommendation,
    pub date: DateTime<Utc>,
}

// ──────────────────── schedules ────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BasalScheduleItem {
    /// Offset from midnight (UTC), in minutes.
    pub start_minute: u32,
    pub units_per_hour: f64,
}

/// Daily repeating basal schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasalRateSchedule {
    pub items: Vec<BasalScheduleItem>,
}

/// A schedule entry resolved to absolute times.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AbsoluteScheduleValue {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub value: f64,
}

impl BasalRateSchedule {
    /// The entry in effect at `at`. `None` for an empty schedule.
    #[must_use]
    pub fn value_at(&self, at: DateTime<Utc>) -> Option<AbsoluteScheduleValue> {
        let mut items: Vec<BasalScheduleItem> = self
            .items
            .iter()
            .copied()
            .filter(|item| item.start_minute < 24 * 60)
            .collect();
        items.sort_by_key(|item| item.start_minute);

        let first = items.first()?;
        let midnight = at
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|naive| naive.and_utc())?;
        let minute_of_day = u32::try_from((at - midnight).num_minutes()).unwrap_or(0);

        let idx = items
            .iter()
            .rposition(|item| item.start_minute <= minute_of_day);
        let (start, value) = match idx {
            Some(i) => (
                midnight + Duration::minutes(i64::from(items[i].start_minute)),
                items[i].units_per_hour,
            ),
            // Before the first entry: the last entry of the previous day applies.
            None => {
                let last = items.last().unwrap_or(first);
                (
                    midnight - Duration::days(1) + Duration::minutes(i64::from(last.start_minute)),
                    last.units_per_hour,
                )
            }
        };
        let end = match idx {
            Some(i) if i + 1 < items.len() => {
                midnight + Duration::minutes(i64::from(items[i + 1].start_minute))
            }
            Some(_) => midnight + Duration::days(1) + Duration::minutes(i64::from(first.start_minute)),
            None => midnight + Duration::minutes(i64::from(first.start_minute)),
        };

        Some(AbsoluteScheduleValue { start, end, value })
    }
}

/// Temporary target override contexts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrideContext {
    PreMeal,
    Workout,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GlucoseRange {
    pub min_mg_dl: f64,
    pub max_mg_dl: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ActiveOverride {
    pub context: OverrideContext,
    pub range: GlucoseRange,
    pub end: DateTime<Utc>,
}

/// Correction range schedule plus any active override.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlucoseRangeSchedule {
    pub default_range: GlucoseRange,
    #[serde(default)]
    pub active_override: Option<ActiveOverride>,
}

impl GlucoseRangeSchedule {
    /// Whether `context` is the currently active, unexpired override.
    #[must_use]
    pub fn override_enabled_for(&self, context: OverrideContext, now: DateTime<Utc>) -> bool {
        self.active_override
            .is_some_and(|o| o.context == context && o.end > now)
    }
}

// ──────────────────── net basal ────────────────────

/// Deviation of the current delivery from the scheduled basal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NetBasal {
    /// Units/hour above (positive) or below (negative) the schedule.
    pub rate: f64,
    /// Fraction of the available range: of the scheduled rate when negative,
    /// of `max - scheduled` when positive.
    pub percent: f64,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
}

impl NetBasal {
    #[must_use]
    pub fn new(
        last_temp_basal: Option<&DoseEntry>,
        max_basal: Option<f64>,
        scheduled: &AbsoluteScheduleValue,
        now: DateTime<Utc>,
    ) -> Self {
        if let Some(temp) = last_temp_basal
            && temp.end > now
            && let Some(max_basal) = max_basal
        {
            let rate = temp.units_per_hour() - scheduled.value;
            let span = if rate < 0.0 {
                scheduled.value
            } else {
                max_basal - scheduled.value
            };
            let percent = if span.abs() > f64::EPSILON { rate / span } else { 0.0 };
            return Self {
                rate,
                percent,
                start: temp.start,
                end: Some(temp.end),
            };
        }

        let start = match last_temp_basal {
            Some(temp) if temp.end > scheduled.start => temp.end,
            _ => scheduled.start,
        };
        Self {
            rate: 0.0,
            percent: 0.0,
            start,
            end: Some(scheduled.end),
        }
    }
}

// ──────────────────── loop state ────────────────────

/// Everything the loop-state fetch returns.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopState {
    /// `None` until the loop has produced a prediction.
    pub predicted_glucose: Option<Vec<GlucoseValue>>,
    pub recommended_temp_basal: Option<RecommendedTempBasal>,
    pub last_temp_basal: Option<DoseEntry>,
    pub last_error: Option<String>,
    pub last_completed: Option<DateTime<Utc>>,
    pub dosing_enabled: bool,
    pub basal_schedule: Option<BasalRateSchedule>,
    pub max_basal_rate: Option<f64>,
    pub dynamic_carb_absorption: bool,
    pub insulin_counteraction_effects: Vec<GlucoseEffectVelocity>,
    pub target_schedule: Option<GlucoseRangeSchedule>,
    /// Insulin action duration in hours, if an insulin model is configured.
    pub insulin_effect_hours: Option<f64>,
}
