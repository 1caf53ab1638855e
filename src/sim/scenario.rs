//! Scripted scenarios over simulated stores.
//!
//! A scenario is a TOML file of `[[steps]]`, each tagged with `step = "..."`.
//! Steps drive the controller with events, move the manual clock, edit store
//! data, inject failures, and check expectations. Failed expectations are
//! collected in the report rather than aborting the run.

#![allow(missing_docs)]

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::controller::events::{ControllerEvent, LoopUpdateContext};
use crate::controller::render::Renderer;
use crate::controller::status_controller::{ControllerStats, Flow, StatusController};
use crate::core::clock::{Clock, ManualClock};
use crate::core::config::Config;
use crate::core::errors::{LscError, Result};
use crate::fetch::coordinator::FetchKind;
use crate::fetch::model::{
    DoseEntry, DoseKind, DoseUnit, GlucoseValue, RecommendedTempBasal, TempBasalRecommendation,
};
use crate::fetch::stores::StoreSet;
use crate::logger::activity::ActivityLoggerHandle;
use crate::refresh::context::ViewSize;
use crate::sim::stores::SimulatedStores;
use crate::status::actions::StatusAction;
use crate::status::mode::{BasalDeliveryState, BolusState};

/// Rounds of queued events followed after each step.
const MAX_DRAIN_ROUNDS: usize = 256;

/// Upper bound for any minute count a step carries (one year).
const MAX_STEP_MINUTES: i64 = 525_600;

const fn default_count() -> u32 {
    1
}

const fn default_true() -> bool {
    true
}

const fn default_settle_ms() -> u64 {
    1_000
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BolusStep {
    #[default]
    None,
    Initiating,
    InProgress,
    Canceling,
}

/// Changes to the served loop state. Absent fields are left alone.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct LoopEdit {
    pub completed_minutes_ago: Option<i64>,
    pub dosing_enabled: Option<bool>,
    /// `[units_per_hour, duration_minutes]`, produced at the current time.
    pub recommendation: Option<[f64; 2]>,
    pub clear_recommendation: bool,
    /// `false` withholds the prediction entirely.
    pub prediction: Option<bool>,
    pub insulin_effect_hours: Option<f64>,
    pub dynamic_carb_absorption: Option<bool>,
    pub error: Option<String>,
}

/// Checks against controller state. Absent fields are not checked.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct Expectation {
    /// Mode label, e.g. `"bolusing"`.
    pub mode: Option<String>,
    pub pending: Option<Vec<String>>,
    pub passes: Option<u64>,
    pub landscape: Option<bool>,
    /// HUD row currently in the table.
    pub hud_visible: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum Step {
    Advance {
        #[serde(default)]
        minutes: i64,
        #[serde(default)]
        seconds: i64,
    },
    LoopUpdated {
        #[serde(default)]
        context: Option<LoopUpdateContext>,
    },
    LoopRunning,
    Device {
        #[serde(default)]
        basal: BasalDeliveryState,
        #[serde(default)]
        bolus: BolusStep,
        #[serde(default)]
        units: f64,
        /// Remaining bolus duration.
        #[serde(default)]
        minutes: i64,
    },
    BolusProgress {
        delivered_units: f64,
        #[serde(default)]
        complete: bool,
    },
    Resize {
        width: f64,
        height: f64,
    },
    Visibility {
        visible: bool,
    },
    Active {
        active: bool,
    },
    MemoryWarning,
    GlucoseUnitChanged,
    Authorization {
        required: bool,
    },
    HudLoaded,
    Select {
        /// Wait for the action to settle before the next step.
        #[serde(default = "default_true")]
        settle: bool,
        #[serde(default = "default_settle_ms")]
        timeout_ms: u64,
    },
    Settle {
        #[serde(default = "default_settle_ms")]
        timeout_ms: u64,
    },
    Refresh,
    FailNext {
        kind: FetchKind,
        #[serde(default = "default_count")]
        count: u32,
    },
    FailAction {
        action: StatusAction,
        #[serde(default = "default_count")]
        count: u32,
    },
    RandomFailures {
        rate: f64,
        #[serde(default)]
        seed: u64,
    },
    Latency {
        #[serde(default)]
        fetch_ms: u64,
        #[serde(default)]
        action_ms: u64,
    },
    SetLoop(LoopEdit),
    Expect(Expectation),
}

impl Step {
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Advance { .. } => "advance",
            Self::LoopUpdated { .. } => "loop_updated",
            Self::LoopRunning => "loop_running",
            Self::Device { .. } => "device",
            Self::BolusProgress { .. } => "bolus_progress",
            Self::Resize { .. } => "resize",
            Self::Visibility { .. } => "visibility",
            Self::Active { .. } => "active",
            Self::MemoryWarning => "memory_warning",
            Self::GlucoseUnitChanged => "glucose_unit_changed",
            Self::Authorization { .. } => "authorization",
            Self::HudLoaded => "hud_loaded",
            Self::Select { .. } => "select",
            Self::Settle { .. } => "settle",
            Self::Refresh => "refresh",
            Self::FailNext { .. } => "fail_next",
            Self::FailAction { .. } => "fail_action",
            Self::RandomFailures { .. } => "random_failures",
            Self::Latency { .. } => "latency",
            Self::SetLoop(_) => "set_loop",
            Self::Expect(_) => "expect",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub name: String,
    /// RFC 3339, quoted. Defaults to 2024-03-01T12:00:00Z.
    #[serde(default)]
    pub start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub steps: Vec<Step>,
}

impl Scenario {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| LscError::io(path, e))?;
        let mut scenario = Self::parse(&raw)?;
        if scenario.name.is_empty() {
            scenario.name = path
                .file_stem()
                .map_or_else(String::new, |stem| stem.to_string_lossy().into_owned());
        }
        Ok(scenario)
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let scenario: Self = toml::from_str(raw).map_err(|e| LscError::InvalidScenario {
            details: e.to_string(),
        })?;
        scenario.validate()?;
        Ok(scenario)
    }

    pub fn validate(&self) -> Result<()> {
        if self.steps.is_empty() {
            return Err(invalid("scenario has no steps"));
        }
        for (index, step) in self.steps.iter().enumerate() {
            let bad = match step {
                Step::Resize { width, height } => {
                    (*width <= 0.0 || *height <= 0.0).then_some("view size must be positive")
                }
                Step::RandomFailures { rate, .. } => {
                    (!(0.0..=1.0).contains(rate)).then_some("failure rate must be within [0, 1]")
                }
                Step::Advance { minutes, seconds } => {
                    if *minutes < 0 || *seconds < 0 {
                        Some("clock cannot move backwards")
                    } else if *minutes > MAX_STEP_MINUTES || *seconds > MAX_STEP_MINUTES * 60 {
                        Some("clock advance is out of range")
                    } else {
                        None
                    }
                }
                Step::Device { minutes, .. } => {
                    if *minutes < 0 {
                        Some("bolus duration must not be negative")
                    } else if *minutes > MAX_STEP_MINUTES {
                        Some("bolus duration is out of range")
                    } else {
                        None
                    }
                }
                Step::SetLoop(edit) => edit
                    .completed_minutes_ago
                    .is_some_and(|m| !(0..=MAX_STEP_MINUTES).contains(&m))
                    .then_some("completed_minutes_ago is out of range"),
                _ => None,
            };
            if let Some(reason) = bad {
                return Err(invalid(format!("step {} ({}): {reason}", index + 1, step.label())));
            }
        }
        Ok(())
    }

    fn start_time(&self) -> DateTime<Utc> {
        self.start.unwrap_or_else(|| {
            Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0)
                .single()
                .unwrap_or_default()
        })
    }
}

fn invalid(details: impl Into<String>) -> LscError {
    LscError::InvalidScenario {
        details: details.into(),
    }
}

// ──────────────────── report ────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepOutcome {
    pub index: usize,
    pub step: &'static str,
    pub mode: String,
    pub pending: Vec<&'static str>,
    pub passes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScenarioReport {
    pub name: String,
    pub steps: Vec<StepOutcome>,
    pub mismatches: Vec<String>,
    pub stats: ControllerStats,
    pub final_mode: String,
}

impl ScenarioReport {
    #[must_use]
    pub fn passed(&self) -> bool {
        self.mismatches.is_empty()
    }
}

// ──────────────────── runner ────────────────────

/// Controller wired to simulated stores and a manual clock.
pub struct ScenarioHarness {
    pub stores: SimulatedStores,
    pub clock: ManualClock,
    pub controller: StatusController,
}

impl ScenarioHarness {
    pub fn new(
        config: Config,
        start: DateTime<Utc>,
        renderer: Box<dyn Renderer>,
        logger: Option<ActivityLoggerHandle>,
    ) -> Self {
        let stores = SimulatedStores::new(start);
        let clock = ManualClock::new(start);
        let mut controller = StatusController::new(
            config,
            StoreSet::uniform(Arc::new(stores.clone())),
            Arc::new(stores.clone()),
            renderer,
            Arc::new(clock.clone()),
        );
        if let Some(logger) = logger {
            controller = controller.with_logger(logger);
        }
        Self {
            stores,
            clock,
            controller,
        }
    }

    /// Apply one step. Expectation mismatches are appended to `mismatches`.
    pub fn apply(&mut self, step: &Step, mismatches: &mut Vec<String>) -> Result<()> {
        let now = self.clock.now();
        let event = match step {
            Step::Advance { minutes, seconds } => {
                let delta = chrono::Duration::try_minutes(*minutes)
                    .zip(chrono::Duration::try_seconds(*seconds))
                    .and_then(|(m, s)| m.checked_add(&s))
                    .ok_or_else(|| invalid("clock advance is out of range"))?;
                self.clock.advance(delta);
                None
            }
            Step::LoopUpdated { context } => Some(ControllerEvent::LoopDataUpdated(*context)),
            Step::LoopRunning => Some(ControllerEvent::LoopRunning),
            Step::Device {
                basal,
                bolus,
                units,
                minutes,
            } => Some(ControllerEvent::DeviceStatusChanged {
                basal: *basal,
                bolus: bolus_state(*bolus, *units, *minutes, now),
            }),
            Step::BolusProgress {
                delivered_units,
                complete,
            } => Some(ControllerEvent::BolusProgress {
                delivered_units: *delivered_units,
                complete: *complete,
            }),
            Step::Resize { width, height } => {
                Some(ControllerEvent::SizeChanged(ViewSize::new(*width, *height)))
            }
            Step::Visibility { visible } => Some(ControllerEvent::VisibilityChanged(*visible)),
            Step::Active { active } => Some(ControllerEvent::ActiveChanged(*active)),
            Step::MemoryWarning => Some(ControllerEvent::MemoryWarning),
            Step::GlucoseUnitChanged => Some(ControllerEvent::GlucoseUnitChanged),
            Step::Authorization { required } => {
                self.stores.set_authorization_required(*required);
                (!*required).then_some(ControllerEvent::AuthorizationGranted)
            }
            Step::HudLoaded => Some(ControllerEvent::HudLoaded),
            Step::Select { settle, timeout_ms } => {
                self.controller.handle_event(ControllerEvent::StatusRowSelected);
                if *settle {
                    self.settle(Duration::from_millis(*timeout_ms))?;
                }
                None
            }
            Step::Settle { timeout_ms } => {
                self.settle(Duration::from_millis(*timeout_ms))?;
                None
            }
            Step::Refresh => Some(ControllerEvent::Refresh),
            Step::FailNext { kind, count } => {
                self.stores.fail_next(*kind, *count);
                None
            }
            Step::FailAction { action, count } => {
                self.stores.fail_action(*action, *count);
                None
            }
            Step::RandomFailures { rate, seed } => {
                self.stores.set_random_failures(*rate, *seed);
                None
            }
            Step::Latency {
                fetch_ms,
                action_ms,
            } => {
                self.stores.set_fetch_latency(Duration::from_millis(*fetch_ms));
                self.stores.set_action_latency(Duration::from_millis(*action_ms));
                None
            }
            Step::SetLoop(edit) => {
                self.edit_loop(edit, now);
                None
            }
            Step::Expect(expectation) => {
                mismatches.extend(self.check(expectation));
                None
            }
        };

        if let Some(event) = event {
            self.controller.handle_event(event);
        }
        self.drain();
        Ok(())
    }

    /// Follow queued reruns until the controller is idle, bounded so a
    /// store that always fails cannot stall the scenario.
    fn drain(&mut self) {
        for _ in 0..MAX_DRAIN_ROUNDS {
            if self.controller.queued_events() == 0
                || self.controller.drain_events() == Flow::Stop
            {
                break;
            }
        }
    }

    /// Block until one action settles.
    pub fn settle(&mut self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(LscError::Runtime {
                    details: format!("action did not settle within {}ms", timeout.as_millis()),
                });
            }
            if let Some(event) = self.controller.next_event(remaining)? {
                let settled = matches!(event, ControllerEvent::ActionCompleted { .. });
                self.controller.handle_event(event);
                if settled {
                    return Ok(());
                }
            }
        }
    }

    fn edit_loop(&self, edit: &LoopEdit, now: DateTime<Utc>) {
        self.stores.update(|data| {
            let state = &mut data.loop_state;
            if let Some(minutes) = edit.completed_minutes_ago {
                state.last_completed = chrono::Duration::try_minutes(minutes)
                    .and_then(|ago| now.checked_sub_signed(ago))
                    .or(state.last_completed);
            }
            if let Some(enabled) = edit.dosing_enabled {
                state.dosing_enabled = enabled;
            }
            if edit.clear_recommendation {
                state.recommended_temp_basal = None;
            }
            if let Some([units_per_hour, duration_minutes]) = edit.recommendation {
                state.recommended_temp_basal = Some(RecommendedTempBasal {
                    recommendation: TempBasalRecommendation {
                        units_per_hour,
                        duration_minutes,
                    },
                    date: now,
                });
            }
            match edit.prediction {
                Some(false) => state.predicted_glucose = None,
                Some(true) if state.predicted_glucose.is_none() => {
                    state.predicted_glucose = Some(vec![GlucoseValue {
                        start: now,
                        mg_dl: 110.0,
                    }]);
                }
                _ => {}
            }
            if let Some(hours) = edit.insulin_effect_hours {
                state.insulin_effect_hours = Some(hours);
            }
            if let Some(dynamic) = edit.dynamic_carb_absorption {
                state.dynamic_carb_absorption = dynamic;
            }
            if let Some(error) = &edit.error {
                state.last_error = (!error.is_empty()).then(|| error.clone());
            }
        });
    }

    fn check(&self, expectation: &Expectation) -> Vec<String> {
        let mut mismatches = Vec::new();
        let display = self.controller.display();

        if let Some(mode) = &expectation.mode {
            let actual = display.status_mode.label();
            if actual != mode {
                mismatches.push(format!("expected mode {mode}, got {actual}"));
            }
        }
        if let Some(pending) = &expectation.pending {
            let actual = self.controller.pending().labels();
            if actual.iter().copied().ne(pending.iter().map(String::as_str)) {
                mismatches.push(format!("expected pending {pending:?}, got {actual:?}"));
            }
        }
        if let Some(passes) = expectation.passes {
            let actual = self.controller.stats().passes;
            if actual != passes {
                mismatches.push(format!("expected {passes} passes, got {actual}"));
            }
        }
        if let Some(landscape) = expectation.landscape
            && display.landscape != landscape
        {
            mismatches.push(format!("expected landscape={landscape}"));
        }
        if let Some(hud) = expectation.hud_visible
            && display.landscape == hud
        {
            mismatches.push(format!("expected hud_visible={hud}"));
        }
        mismatches
    }
}

fn bolus_state(kind: BolusStep, units: f64, minutes: i64, now: DateTime<Utc>) -> BolusState {
    match kind {
        BolusStep::None => BolusState::None,
        BolusStep::Initiating => BolusState::Initiating,
        BolusStep::Canceling => BolusState::Canceling,
        BolusStep::InProgress => BolusState::InProgress(DoseEntry {
            kind: DoseKind::Bolus,
            start: now,
            end: chrono::Duration::try_minutes(minutes)
                .and_then(|left| now.checked_add_signed(left))
                .unwrap_or(now),
            value: units,
            unit: DoseUnit::Units,
        }),
    }
}

/// Run every step of `scenario` against a fresh harness.
pub fn run(
    scenario: &Scenario,
    config: Config,
    renderer: Box<dyn Renderer>,
    logger: Option<ActivityLoggerHandle>,
) -> Result<ScenarioReport> {
    let mut harness = ScenarioHarness::new(config, scenario.start_time(), renderer, logger);
    harness.controller.start()?;

    let mut mismatches = Vec::new();
    let mut steps = Vec::with_capacity(scenario.steps.len());
    for (index, step) in scenario.steps.iter().enumerate() {
        let before = mismatches.len();
        harness.apply(step, &mut mismatches)?;
        for mismatch in &mut mismatches[before..] {
            *mismatch = format!("step {} ({}): {mismatch}", index + 1, step.label());
        }
        steps.push(StepOutcome {
            index: index + 1,
            step: step.label(),
            mode: harness.controller.status_mode().to_string(),
            pending: harness.controller.pending().labels(),
            passes: harness.controller.stats().passes,
        });
    }
    harness.controller.stop("scenario complete");

    Ok(ScenarioReport {
        name: scenario.name.clone(),
        steps,
        mismatches,
        stats: harness.controller.stats(),
        final_mode: harness.controller.status_mode().to_string(),
    })
}
