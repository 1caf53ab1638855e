//! Status screen controller.
//!
//! Owns every piece of display state and runs on one thread. Other threads
//! talk to it through a [`ControllerHandle`]: typed events over a crossbeam
//! channel, or reasons marked straight into the shared scheduler. Fetches run
//! on worker threads inside [`FetchCoordinator::run`] and rejoin here before
//! anything is mutated.

#![allow(missing_docs)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local, Utc};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use serde::Serialize;

use crate::controller::display::DisplayState;
use crate::controller::events::{ControllerEvent, ControllerHandle, LoopUpdateContext};
use crate::controller::render::Renderer;
use crate::core::clock::Clock;
use crate::core::config::Config;
use crate::core::errors::{LscError, Result};
use crate::fetch::coordinator::{FetchCoordinator, FetchKind, FetchRequest};
use crate::fetch::stores::{ErrorSink, StoreSet};
use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle};
use crate::refresh::chart_window::ChartWindow;
use crate::refresh::context::{RefreshContext, RefreshContextSet, ViewSize};
use crate::refresh::scheduler::{PassCompletion, PassGate, PassRefusal, RefreshScheduler, StartedPass};
use crate::status::actions::{DeviceActions, StatusAction, action_for_selection, settle};
use crate::status::mode::{
    BasalDeliveryState, BolusState, StatusRowMode, derive, recommendation_eligible,
};
use crate::status::reconcile::{DisplayLayout, RowOp, reconcile};

/// Completed passes kept for inspection.
const PASS_HISTORY: usize = 64;

/// Upper bound on events handled by one `reload_until_idle` call, so a store
/// that never recovers cannot hold the caller forever.
const IDLE_EVENT_LIMIT: usize = 1024;

/// Whether the event loop should keep going.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// Summary of one completed pass.
#[derive(Debug, Clone, PartialEq)]
pub struct PassReport {
    pub number: u64,
    pub context: RefreshContextSet,
    pub issued: Vec<FetchKind>,
    pub retry: RefreshContextSet,
    /// `(kind, error code)` per failed fetch.
    pub failures: Vec<(FetchKind, &'static str)>,
    pub mode: StatusRowMode,
    pub row_ops: Vec<RowOp>,
    pub completion: PassCompletion,
    pub duration: Duration,
}

/// Running totals for the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ControllerStats {
    pub passes: u64,
    pub fetch_failures: u64,
    /// Passes that left reasons pending and queued the next one.
    pub reruns: u64,
    pub refusals: u64,
    pub actions_settled: u64,
}

pub struct StatusController {
    config: Config,
    clock: Arc<dyn Clock>,
    coordinator: FetchCoordinator,
    device: Arc<dyn DeviceActions>,
    renderer: Box<dyn Renderer>,
    logger: ActivityLoggerHandle,
    scheduler: RefreshScheduler,
    events_tx: Sender<ControllerEvent>,
    events_rx: Receiver<ControllerEvent>,

    display: DisplayState,
    view_size: ViewSize,
    bolus: BolusState,
    basal: BasalDeliveryState,
    visible: bool,
    active: bool,
    /// Last insulin action duration reported by the loop.
    insulin_effect_hours: Option<f64>,
    last_refusal: Option<PassRefusal>,
    history: VecDeque<PassReport>,
    stats: ControllerStats,
}

impl StatusController {
    /// Build a controller with every data reason pending, as on first display.
    pub fn new(
        config: Config,
        stores: StoreSet,
        device: Arc<dyn DeviceActions>,
        renderer: Box<dyn Renderer>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let logger = ActivityLoggerHandle::disconnected();
        let coordinator = FetchCoordinator::new(stores)
            .with_error_sink(Arc::new(logger.clone()))
            .with_timeout(config.refresh.fetch_timeout());
        let scheduler = RefreshScheduler::new();
        scheduler.extend(&RefreshContextSet::all());
        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        let view_size = ViewSize::new(config.chart.initial_width, config.chart.initial_height);

        Self {
            config,
            clock,
            coordinator,
            device,
            renderer,
            logger,
            scheduler,
            events_tx,
            events_rx,
            display: DisplayState {
                landscape: view_size.is_landscape(),
                ..DisplayState::default()
            },
            view_size,
            bolus: BolusState::None,
            basal: BasalDeliveryState::Active,
            visible: true,
            active: true,
            insulin_effect_hours: None,
            last_refusal: None,
            history: VecDeque::with_capacity(PASS_HISTORY),
            stats: ControllerStats::default(),
        }
    }

    /// Route fetch errors and activity events to `logger`.
    #[must_use]
    pub fn with_logger(mut self, logger: ActivityLoggerHandle) -> Self {
        self.logger = logger;
        self.rebuild_coordinator();
        self
    }

    /// Swap in a reloaded config. Chart, status, and fetch timeout settings
    /// apply from the next pass.
    pub fn set_config(&mut self, config: Config) {
        self.config = config;
        self.rebuild_coordinator();
    }

    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    fn rebuild_coordinator(&mut self) {
        let stores = self.coordinator.stores().clone();
        self.coordinator = FetchCoordinator::new(stores)
            .with_error_sink(Arc::new(self.logger.clone()))
            .with_timeout(self.config.refresh.fetch_timeout());
    }

    /// Initial device state, applied without marking anything dirty.
    #[must_use]
    pub fn with_device_state(mut self, basal: BasalDeliveryState, bolus: BolusState) -> Self {
        self.basal = basal;
        self.bolus = bolus;
        self
    }

    #[must_use]
    pub fn handle(&self) -> ControllerHandle {
        ControllerHandle::new(self.events_tx.clone(), self.scheduler.clone())
    }

    #[must_use]
    pub const fn display(&self) -> &DisplayState {
        &self.display
    }

    #[must_use]
    pub const fn status_mode(&self) -> &StatusRowMode {
        &self.display.status_mode
    }

    #[must_use]
    pub const fn stats(&self) -> ControllerStats {
        self.stats
    }

    #[must_use]
    pub fn pending(&self) -> RefreshContextSet {
        self.scheduler.pending()
    }

    #[must_use]
    pub const fn last_refusal(&self) -> Option<PassRefusal> {
        self.last_refusal
    }

    /// Most recent passes, oldest first.
    pub fn passes(&self) -> impl Iterator<Item = &PassReport> {
        self.history.iter()
    }

    #[must_use]
    pub fn last_pass(&self) -> Option<&PassReport> {
        self.history.back()
    }

    /// Log the start and run the first reload.
    pub fn start(&mut self) -> Result<()> {
        self.logger.send(ActivityEvent::ControllerStarted {
            version: env!("CARGO_PKG_VERSION").to_string(),
            config_hash: self.config.stable_hash()?,
        });
        self.reload();
        Ok(())
    }

    pub fn stop(&mut self, reason: &str) {
        self.logger.send(ActivityEvent::ControllerStopped {
            reason: reason.to_string(),
            passes: self.stats.passes,
        });
    }

    // ──────────────────── event loop ────────────────────

    /// Wait up to `timeout` for the next queued event.
    pub fn next_event(&self, timeout: Duration) -> Result<Option<ControllerEvent>> {
        match self.events_rx.recv_timeout(timeout) {
            Ok(event) => Ok(Some(event)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(LscError::ChannelClosed {
                component: "controller",
            }),
        }
    }

    /// Handle the events queued at the time of the call, without blocking.
    /// Events those handlers queue wait for the next call.
    pub fn drain_events(&mut self) -> Flow {
        for _ in 0..self.events_rx.len() {
            let Ok(event) = self.events_rx.try_recv() else {
                break;
            };
            if self.handle_event(event) == Flow::Stop {
                return Flow::Stop;
            }
        }
        Flow::Continue
    }

    #[must_use]
    pub fn queued_events(&self) -> usize {
        self.events_rx.len()
    }

    pub fn handle_event(&mut self, event: ControllerEvent) -> Flow {
        match event {
            ControllerEvent::LoopDataUpdated(update) => {
                self.scheduler
                    .extend(&LoopUpdateContext::dirty_contexts(update));
                self.display.hud.loop_in_progress = false;
                self.reload();
            }
            ControllerEvent::LoopRunning => {
                self.display.hud.loop_in_progress = true;
            }
            ControllerEvent::DeviceStatusChanged { basal, bolus } => {
                self.set_basal_state(basal);
                self.set_bolus_state(bolus);
            }
            ControllerEvent::BolusProgress {
                delivered_units,
                complete,
            } => {
                // The bolus state itself only changes through DeviceStatusChanged.
                if complete {
                    self.display.hud.bolus_delivered_units = None;
                    self.scheduler.mark_dirty(RefreshContext::Status);
                    self.reload();
                } else {
                    self.display.hud.bolus_delivered_units = Some(delivered_units);
                }
            }
            ControllerEvent::SizeChanged(size) => {
                self.scheduler.mark_dirty(RefreshContext::SizeChange(size));
                self.reload();
            }
            ControllerEvent::VisibilityChanged(visible) => {
                self.visible = visible;
                self.reload();
            }
            ControllerEvent::ActiveChanged(active) => {
                self.active = active;
                self.reload();
            }
            ControllerEvent::MemoryWarning => {
                if !self.visible {
                    self.scheduler.extend(&RefreshContextSet::all());
                }
            }
            ControllerEvent::GlucoseUnitChanged => {
                self.scheduler.extend(&RefreshContextSet::all());
                self.reload();
            }
            ControllerEvent::AuthorizationGranted | ControllerEvent::Refresh => {
                self.reload();
            }
            ControllerEvent::HudLoaded => {
                self.scheduler.mark_dirty(RefreshContext::Status);
                self.reload();
            }
            ControllerEvent::StatusRowSelected => self.select_status_row(),
            ControllerEvent::ActionCompleted { action, result } => {
                self.settle_action(action, &result);
            }
            ControllerEvent::Shutdown => return Flow::Stop,
        }
        Flow::Continue
    }

    fn set_basal_state(&mut self, basal: BasalDeliveryState) {
        if basal != self.basal {
            self.basal = basal;
            self.scheduler.mark_dirty(RefreshContext::Status);
        }
    }

    fn set_bolus_state(&mut self, bolus: BolusState) {
        if bolus != self.bolus {
            if matches!(bolus, BolusState::InProgress(_)) {
                self.display.hud.bolus_delivered_units = Some(0.0);
            }
            self.bolus = bolus;
            self.scheduler.mark_dirty(RefreshContext::Status);
            self.reload();
        }
    }

    // ──────────────────── passes ────────────────────

    const fn displayed(&self) -> bool {
        self.active && self.visible
    }

    /// Try to run one pass. When reasons are still pending afterwards, a
    /// `Refresh` is queued on the controller's own channel so the next pass
    /// starts right after any events already waiting.
    pub fn reload(&mut self) -> Option<PassReport> {
        let authorization_required = self.coordinator.stores().loop_state.authorization_required();
        if !authorization_required {
            self.update_chart_window();
        }
        let gate = PassGate {
            authorization_required,
            displayed: self.displayed(),
        };

        let pass = match self.scheduler.begin_pass(gate) {
            Ok(pass) => pass,
            Err(refusal) => {
                if refusal != PassRefusal::NothingPending {
                    self.stats.refusals += 1;
                }
                self.last_refusal = Some(refusal);
                return None;
            }
        };
        self.last_refusal = None;

        let report = self.run_pass(pass);
        if report.completion.rerun {
            self.stats.reruns += 1;
            let _ = self.events_tx.send(ControllerEvent::Refresh);
        }
        Some(report)
    }

    /// Reload, then handle queued events until the queue is empty or
    /// `IDLE_EVENT_LIMIT` events have run. Returns every pass that ran,
    /// oldest first. A queued shutdown is put back.
    pub fn reload_until_idle(&mut self) -> Vec<PassReport> {
        let before = self.stats.passes;
        self.reload();
        for _ in 0..IDLE_EVENT_LIMIT {
            let Ok(event) = self.events_rx.try_recv() else {
                break;
            };
            if self.handle_event(event) == Flow::Stop {
                let _ = self.events_tx.send(ControllerEvent::Shutdown);
                break;
            }
        }
        let ran = usize::try_from(self.stats.passes - before).unwrap_or(usize::MAX);
        let skip = self.history.len().saturating_sub(ran);
        self.history.iter().skip(skip).cloned().collect()
    }

    /// Size the chart for the pending (or current) view width. A moved start
    /// marks every data reason dirty.
    fn update_chart_window(&mut self) {
        let width = self
            .scheduler
            .pending()
            .new_size()
            .unwrap_or(self.view_size)
            .width;
        let effect_hours = self
            .insulin_effect_hours
            .unwrap_or(self.config.chart.default_insulin_effect_hours);
        let window = ChartWindow::compute(width, &self.config.chart, effect_hours, self.clock.now());

        if self.display.window.is_none_or(|old| old.start != window.start) {
            self.scheduler.extend(&RefreshContextSet::all());
        }
        self.display.window = Some(window);
    }

    fn run_pass(&mut self, pass: StartedPass) -> PassReport {
        let started = Instant::now();
        let now = self.clock.now();
        let start_date = self.display.window.map_or(now, |window| window.start);
        let request = FetchRequest {
            context: pass.context,
            start_date,
            day_start: start_of_local_day(now),
            now,
        };

        let outcome = self.coordinator.run(&request);

        let recommendation = outcome.snapshot.loop_summary.as_ref().and_then(|summary| {
            let eligible = recommendation_eligible(
                summary.last_completed,
                summary.dosing_enabled,
                now,
                self.config.status.recommendation_freshness(),
            );
            summary.recommended_temp_basal.filter(|_| eligible)
        });
        if let Some(hours) = outcome
            .snapshot
            .loop_summary
            .as_ref()
            .and_then(|summary| summary.insulin_effect_hours)
        {
            self.insulin_effect_hours = Some(hours);
        }
        self.display.apply_snapshot(outcome.snapshot, now);
        if let Some(latest) = self.coordinator.stores().glucose.latest_glucose() {
            self.display.hud.latest_glucose = Some(latest);
        }

        let mode = derive(&self.bolus, self.basal, recommendation.as_ref(), now);
        if let Some(size) = pass.context.new_size() {
            self.view_size = size;
        }
        let landscape = pass
            .context
            .new_size()
            .map_or(self.display.landscape, |size| size.is_landscape());
        let row_ops = self.apply_layout(mode, landscape);
        self.renderer.render(&self.display);

        let completion = self.scheduler.end_pass(&outcome.retry);
        let duration = started.elapsed();

        self.stats.passes += 1;
        self.stats.fetch_failures += outcome.failures.len() as u64;
        self.logger.send(ActivityEvent::PassCompleted {
            pass: pass.number,
            contexts: labels(&pass.context),
            retry: labels(&outcome.retry),
            failures: outcome.failures.len(),
            duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
        });

        let report = PassReport {
            number: pass.number,
            context: pass.context,
            issued: outcome.issued,
            retry: outcome.retry,
            failures: outcome
                .failures
                .iter()
                .map(|failure| (failure.kind, failure.error.code()))
                .collect(),
            mode: self.display.status_mode.clone(),
            row_ops,
            completion,
            duration,
        };
        if self.history.len() == PASS_HISTORY {
            self.history.pop_front();
        }
        self.history.push_back(report.clone());
        report
    }

    /// Move to `mode` and `landscape`, sending the row diff to the renderer.
    fn apply_layout(&mut self, mode: StatusRowMode, landscape: bool) -> Vec<RowOp> {
        let old = DisplayLayout {
            landscape: self.display.landscape,
            mode: std::mem::take(&mut self.display.status_mode),
        };
        let new = DisplayLayout { landscape, mode };
        let ops = reconcile(&old, &new);

        if old.mode != new.mode {
            self.logger.send(ActivityEvent::StatusChanged {
                from: old.mode.to_string(),
                to: new.mode.to_string(),
            });
        }
        self.display.status_mode = new.mode;
        self.display.landscape = new.landscape;

        if !ops.is_empty() {
            self.renderer.apply_row_ops(&ops);
        }
        ops
    }

    // ──────────────────── user actions ────────────────────

    /// Start the action for the current mode, if it has one.
    pub fn select_status_row(&mut self) {
        let Some(plan) = action_for_selection(&self.display.status_mode) else {
            return;
        };
        let landscape = self.display.landscape;
        self.apply_layout(plan.optimistic, landscape);

        let action = plan.action;
        let device = Arc::clone(&self.device);
        let tx = self.events_tx.clone();
        let spawned = thread::Builder::new()
            .name(format!("lsc-action-{}", action.label()))
            .spawn(move || {
                let result = action.perform(device.as_ref());
                let _ = tx.send(ControllerEvent::ActionCompleted { action, result });
            });
        if let Err(error) = spawned {
            let result = Err(LscError::Runtime {
                details: format!("failed to spawn action worker: {error}"),
            });
            self.settle_action(action, &result);
        }
    }

    fn settle_action(&mut self, action: StatusAction, result: &Result<()>) {
        let settlement = settle(action, result, &self.bolus, self.basal);

        if let (Some(source), Err(error)) = (settlement.report_as, result) {
            self.logger.add_error(source, error);
        }
        if let Some(mode) = settlement.mode {
            let landscape = self.display.landscape;
            self.apply_layout(mode, landscape);
        }
        if let Some(alert) = &settlement.alert {
            self.renderer.present_error(alert);
        }

        self.stats.actions_settled += 1;
        self.logger.send(ActivityEvent::ActionSettled {
            action: action.label().to_string(),
            ok: result.is_ok(),
            code: result.as_ref().err().map(|e| e.code().to_string()),
            message: result.as_ref().err().map(ToString::to_string),
        });

        if settlement.refresh_status {
            self.scheduler.mark_dirty(RefreshContext::Status);
            self.reload();
        }
    }
}

impl std::fmt::Debug for StatusController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusController")
            .field("mode", &self.display.status_mode)
            .field("pending", &self.scheduler.pending())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

fn labels(set: &RefreshContextSet) -> Vec<String> {
    set.labels().into_iter().map(str::to_string).collect()
}

fn start_of_local_day(now: DateTime<Utc>) -> DateTime<Utc> {
    let local = now.with_timezone(&Local);
    local
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .and_then(|midnight| midnight.and_local_timezone(Local).earliest())
        .map_or(now, |midnight| midnight.with_timezone(&Utc))
}
