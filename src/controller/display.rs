//! Display state assembled from fetch snapshots.

#![allow(missing_docs)]

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::fetch::coordinator::FetchSnapshot;
use crate::fetch::model::{
    CarbValue, DoseEntry, GlucoseRangeSchedule, GlucoseSample, GlucoseValue, InsulinValue,
    NetBasal, last_at_or_before,
};
use crate::refresh::chart_window::ChartWindow;
use crate::status::mode::StatusRowMode;

/// Series handed to the chart renderer.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ChartSeries {
    pub glucose: Vec<GlucoseSample>,
    pub predicted_glucose: Vec<GlucoseValue>,
    pub insulin_on_board: Vec<InsulinValue>,
    pub doses: Vec<DoseEntry>,
    pub carbs_on_board: Vec<CarbValue>,
    pub target_schedule: Option<GlucoseRangeSchedule>,
}

/// Values shown in the HUD and chart subtitles.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct HudSummary {
    pub latest_glucose: Option<GlucoseSample>,
    /// Last predicted value.
    pub eventual_glucose: Option<f64>,
    pub current_iob: Option<f64>,
    pub current_cob: Option<f64>,
    /// Units delivered since the start of the day.
    pub total_delivered: Option<f64>,
    pub net_basal: Option<NetBasal>,
    pub last_loop_completed: Option<DateTime<Utc>>,
    pub last_loop_error: Option<String>,
    pub dosing_enabled: Option<bool>,
    pub loop_in_progress: bool,
    pub pre_meal_mode: Option<bool>,
    pub workout_mode: Option<bool>,
    pub bolus_delivered_units: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct DisplayState {
    pub window: Option<ChartWindow>,
    pub charts: ChartSeries,
    pub hud: HudSummary,
    pub status_mode: StatusRowMode,
    pub landscape: bool,
}

impl DisplayState {
    /// Merge one pass's results. Signals not fetched keep their old values.
    pub fn apply_snapshot(&mut self, snapshot: FetchSnapshot, now: DateTime<Utc>) {
        let charts = &mut self.charts;
        let hud = &mut self.hud;

        if let Some(glucose) = snapshot.glucose_samples {
            charts.glucose = glucose;
        }
        charts.predicted_glucose = snapshot.predicted_glucose;
        hud.eventual_glucose = charts.predicted_glucose.last().map(|value| value.mg_dl);

        if let Some(targets) = snapshot.targets {
            charts.target_schedule = targets.schedule;
        }

        if let Some(iob) = snapshot.insulin_on_board {
            charts.insulin_on_board = iob;
        }
        hud.current_iob = last_at_or_before(&charts.insulin_on_board, now).map(|v| v.units);

        if let Some(doses) = snapshot.doses {
            charts.doses = doses;
        }
        if let Some(total) = snapshot.total_delivered {
            hud.total_delivered = Some(total);
        }

        if let Some(cob) = snapshot.carbs_on_board {
            charts.carbs_on_board = cob;
        }
        hud.current_cob = last_at_or_before(&charts.carbs_on_board, now).map(|v| v.grams);

        if let Some(summary) = snapshot.loop_summary {
            hud.last_loop_completed = summary.last_completed;
            hud.last_loop_error = summary.last_error;
            hud.dosing_enabled = Some(summary.dosing_enabled);
            if summary.net_basal.is_some() {
                hud.net_basal = summary.net_basal;
            }
            hud.pre_meal_mode = summary.pre_meal_mode;
            hud.workout_mode = summary.workout_mode;
        }
    }
}
