//! Fetch coordinator: one worker thread per issued fetch, a crossbeam
//! channel as the join barrier, and per-signal degradation on failure.

#![allow(missing_docs)]

use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use crossbeam_channel::{RecvTimeoutError, Sender};
use serde::{Deserialize, Serialize};

use crate::core::errors::{LscError, Result};
use crate::fetch::model::{
    CarbValue, DoseEntry, GlucoseRangeSchedule, GlucoseSample, GlucoseValue, InsulinValue,
    LoopState, NetBasal, OverrideContext, RecommendedTempBasal,
};
use crate::fetch::stores::{ErrorSink, NullErrorSink, StoreSet};
use crate::refresh::context::{ContextKind, RefreshContext, RefreshContextSet};

// ──────────────────── fetch kinds ────────────────────

/// One store call issued during a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchKind {
    LoopState,
    Carbs,
    Glucose,
    InsulinOnBoard,
    Doses,
    TotalDelivered,
}

impl FetchKind {
    /// Name reported to the error sink.
    #[must_use]
    pub const fn source(self) -> &'static str {
        match self {
            Self::LoopState => "LoopDataManager",
            Self::Glucose => "GlucoseStore",
            Self::InsulinOnBoard | Self::Doses | Self::TotalDelivered => "DoseStore",
            Self::Carbs => "CarbStore",
        }
    }

    /// The reason re-queued when this fetch fails.
    #[must_use]
    pub const fn retry_context(self) -> RefreshContext {
        match self {
            Self::LoopState => RefreshContext::Status,
            Self::Glucose => RefreshContext::Glucose,
            Self::InsulinOnBoard | Self::Doses | Self::TotalDelivered => RefreshContext::Insulin,
            Self::Carbs => RefreshContext::Carbs,
        }
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::LoopState => "loop_state",
            Self::Carbs => "carbs",
            Self::Glucose => "glucose",
            Self::InsulinOnBoard => "insulin_on_board",
            Self::Doses => "doses",
            Self::TotalDelivered => "total_delivered",
        }
    }

    const fn worker_name(self) -> &'static str {
        match self {
            Self::LoopState | Self::Carbs => "lsc-fetch-loop",
            Self::Glucose => "lsc-fetch-glucose",
            Self::InsulinOnBoard => "lsc-fetch-iob",
            Self::Doses => "lsc-fetch-doses",
            Self::TotalDelivered => "lsc-fetch-total",
        }
    }
}

impl fmt::Display for FetchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ──────────────────── request / outcome ────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FetchRequest {
    pub context: RefreshContextSet,
    /// Chart window start; every series is fetched from here.
    pub start_date: DateTime<Utc>,
    /// Start of the local day, for the delivered-today total.
    pub day_start: DateTime<Utc>,
    pub now: DateTime<Utc>,
}

/// Loop-derived HUD values. Present only when the loop-state fetch succeeded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoopSummary {
    /// As returned by the loop; eligibility is decided by the caller.
    pub recommended_temp_basal: Option<RecommendedTempBasal>,
    pub last_error: Option<String>,
    pub last_completed: Option<DateTime<Utc>>,
    pub dosing_enabled: bool,
    pub net_basal: Option<NetBasal>,
    pub pre_meal_mode: Option<bool>,
    pub workout_mode: Option<bool>,
    pub insulin_effect_hours: Option<f64>,
}

/// Target schedule read during a pass that had `Targets` dirty.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetsSnapshot {
    pub schedule: Option<GlucoseRangeSchedule>,
}

/// Pass-scoped results. `None` means "not fetched this pass".
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct FetchSnapshot {
    /// Replaced every pass; empty when the loop has no prediction yet.
    pub predicted_glucose: Vec<GlucoseValue>,
    pub loop_summary: Option<LoopSummary>,
    pub targets: Option<TargetsSnapshot>,
    pub glucose_samples: Option<Vec<GlucoseSample>>,
    pub insulin_on_board: Option<Vec<InsulinValue>>,
    pub doses: Option<Vec<DoseEntry>>,
    pub total_delivered: Option<f64>,
    pub carbs_on_board: Option<Vec<CarbValue>>,
}

#[derive(Debug)]
pub struct FetchFailure {
    pub kind: FetchKind,
    pub error: LscError,
}

#[derive(Debug)]
pub struct FetchOutcome {
    pub snapshot: FetchSnapshot,
    pub retry: RefreshContextSet,
    /// Sorted by kind.
    pub failures: Vec<FetchFailure>,
    pub issued: Vec<FetchKind>,
}

// ──────────────────── worker messages ────────────────────

enum FetchPayload {
    LoopState(Result<LoopState>),
    Carbs(Result<Vec<CarbValue>>),
    Glucose(Result<Vec<GlucoseSample>>),
    InsulinOnBoard(Result<Vec<InsulinValue>>),
    Doses(Result<Vec<DoseEntry>>),
    TotalDelivered(Result<f64>),
}

impl FetchPayload {
    fn failed(kind: FetchKind, error: LscError) -> Self {
        match kind {
            FetchKind::LoopState => Self::LoopState(Err(error)),
            FetchKind::Carbs => Self::Carbs(Err(error)),
            FetchKind::Glucose => Self::Glucose(Err(error)),
            FetchKind::InsulinOnBoard => Self::InsulinOnBoard(Err(error)),
            FetchKind::Doses => Self::Doses(Err(error)),
            FetchKind::TotalDelivered => Self::TotalDelivered(Err(error)),
        }
    }

    const fn kind(&self) -> FetchKind {
        match self {
            Self::LoopState(_) => FetchKind::LoopState,
            Self::Carbs(_) => FetchKind::Carbs,
            Self::Glucose(_) => FetchKind::Glucose,
            Self::InsulinOnBoard(_) => FetchKind::InsulinOnBoard,
            Self::Doses(_) => FetchKind::Doses,
            Self::TotalDelivered(_) => FetchKind::TotalDelivered,
        }
    }
}

// ──────────────────── coordinator ────────────────────

pub struct FetchCoordinator {
    stores: StoreSet,
    error_sink: Arc<dyn ErrorSink>,
    timeout: Option<Duration>,
}

impl FetchCoordinator {
    #[must_use]
    pub fn new(stores: StoreSet) -> Self {
        Self {
            stores,
            error_sink: Arc::new(NullErrorSink),
            timeout: None,
        }
    }

    #[must_use]
    pub fn with_error_sink(mut self, sink: Arc<dyn ErrorSink>) -> Self {
        self.error_sink = sink;
        self
    }

    /// Bound the join barrier. `None` waits for every fetch.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub const fn stores(&self) -> &StoreSet {
        &self.stores
    }

    /// Fetches a pass with `context` issues, in kind order.
    #[must_use]
    pub fn plan(context: &RefreshContextSet) -> Vec<FetchKind> {
        let mut kinds = vec![FetchKind::LoopState];
        if context.contains(ContextKind::Carbs) {
            kinds.push(FetchKind::Carbs);
        }
        if context.contains(ContextKind::Glucose) {
            kinds.push(FetchKind::Glucose);
        }
        if context.contains(ContextKind::Insulin) {
            kinds.extend([
                FetchKind::InsulinOnBoard,
                FetchKind::Doses,
                FetchKind::TotalDelivered,
            ]);
        }
        kinds
    }

    /// Issue every fetch `request.context` calls for and wait for all of them.
    ///
    /// Never fails: each failed signal is degraded, reported to the error
    /// sink, and its reason added to `retry`.
    pub fn run(&self, request: &FetchRequest) -> FetchOutcome {
        let issued = Self::plan(&request.context);
        let (tx, rx) = crossbeam_channel::unbounded::<FetchPayload>();
        let mut payloads: Vec<FetchPayload> = Vec::with_capacity(issued.len());
        let mut outstanding = issued.clone();

        for (kind, details) in self.spawn_workers(request, &issued, &tx) {
            outstanding.retain(|k| *k != kind);
            let error = LscError::Runtime {
                details: format!("failed to spawn {kind} worker: {details}"),
            };
            payloads.push(FetchPayload::failed(kind, error));
        }
        drop(tx);

        let deadline = self.timeout.map(|timeout| Instant::now() + timeout);
        while !outstanding.is_empty() {
            let received = match deadline {
                Some(deadline) => rx.recv_deadline(deadline),
                None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };
            match received {
                Ok(payload) => {
                    let kind = payload.kind();
                    if let Some(pos) = outstanding.iter().position(|k| *k == kind) {
                        outstanding.swap_remove(pos);
                        payloads.push(payload);
                    }
                }
                Err(gap) => {
                    for kind in outstanding.drain(..) {
                        payloads.push(FetchPayload::failed(kind, self.gap_error(kind, gap)));
                    }
                }
            }
        }

        self.assemble(request, issued, payloads)
    }

    fn gap_error(&self, kind: FetchKind, gap: RecvTimeoutError) -> LscError {
        match gap {
            RecvTimeoutError::Timeout => LscError::FetchTimeout {
                store: kind.source(),
                timeout_ms: self
                    .timeout
                    .map_or(0, |t| u64::try_from(t.as_millis()).unwrap_or(u64::MAX)),
            },
            RecvTimeoutError::Disconnected => LscError::ChannelClosed {
                component: kind.worker_name(),
            },
        }
    }

    /// Returns the kinds whose worker could not be started.
    fn spawn_workers(
        &self,
        request: &FetchRequest,
        issued: &[FetchKind],
        tx: &Sender<FetchPayload>,
    ) -> Vec<(FetchKind, String)> {
        let mut spawn_failures = Vec::new();
        let since = request.start_date;
        let wants_carbs = issued.contains(&FetchKind::Carbs);

        {
            let loop_store = Arc::clone(&self.stores.loop_state);
            let carb_store = Arc::clone(&self.stores.carbs);
            let spawned = spawn_worker(FetchKind::LoopState, tx, move |tx| {
                let state = loop_store.loop_state();
                let velocities = match &state {
                    Ok(state) if state.dynamic_carb_absorption => {
                        Some(state.insulin_counteraction_effects.clone())
                    }
                    _ => None,
                };
                let _ = tx.send(FetchPayload::LoopState(state));
                if wants_carbs {
                    let carbs = carb_store.carbs_on_board(since, velocities.as_deref());
                    let _ = tx.send(FetchPayload::Carbs(carbs));
                }
            });
            if let Err(error) = spawned {
                spawn_failures.push((FetchKind::LoopState, error.to_string()));
                if wants_carbs {
                    spawn_failures.push((FetchKind::Carbs, error.to_string()));
                }
            }
        }

        for kind in issued {
            let spawned = match kind {
                FetchKind::LoopState | FetchKind::Carbs => continue,
                FetchKind::Glucose => {
                    let store = Arc::clone(&self.stores.glucose);
                    spawn_worker(*kind, tx, move |tx| {
                        let _ = tx.send(FetchPayload::Glucose(store.cached_samples(since)));
                    })
                }
                FetchKind::InsulinOnBoard => {
                    let store = Arc::clone(&self.stores.doses);
                    spawn_worker(*kind, tx, move |tx| {
                        let _ = tx.send(FetchPayload::InsulinOnBoard(store.insulin_on_board(since)));
                    })
                }
                FetchKind::Doses => {
                    let store = Arc::clone(&self.stores.doses);
                    spawn_worker(*kind, tx, move |tx| {
                        let _ = tx.send(FetchPayload::Doses(store.normalized_doses(since)));
                    })
                }
                FetchKind::TotalDelivered => {
                    let store = Arc::clone(&self.stores.doses);
                    let day_start = request.day_start;
                    spawn_worker(*kind, tx, move |tx| {
                        let _ = tx.send(FetchPayload::TotalDelivered(store.total_delivered(day_start)));
                    })
                }
            };
            if let Err(error) = spawned {
                spawn_failures.push((*kind, error.to_string()));
            }
        }

        spawn_failures
    }

    fn assemble(
        &self,
        request: &FetchRequest,
        issued: Vec<FetchKind>,
        payloads: Vec<FetchPayload>,
    ) -> FetchOutcome {
        let mut snapshot = FetchSnapshot::default();
        let mut retry = RefreshContextSet::new();
        let mut failures = Vec::new();

        for payload in payloads {
            let kind = payload.kind();
            let failed = match payload {
                FetchPayload::LoopState(Ok(state)) => {
                    // An absent prediction is not actionable yet.
                    if state.predicted_glucose.is_none() {
                        retry.insert(RefreshContext::Status);
                    }
                    snapshot.apply_loop_state(state, request);
                    None
                }
                FetchPayload::LoopState(Err(error)) => Some(error),
                FetchPayload::Carbs(result) => degrade(result, &mut snapshot.carbs_on_board),
                FetchPayload::Glucose(result) => degrade(result, &mut snapshot.glucose_samples),
                FetchPayload::InsulinOnBoard(result) => {
                    degrade(result, &mut snapshot.insulin_on_board)
                }
                FetchPayload::Doses(result) => degrade(result, &mut snapshot.doses),
                FetchPayload::TotalDelivered(result) => match result {
                    Ok(total) => {
                        snapshot.total_delivered = Some(total);
                        None
                    }
                    Err(error) => Some(error),
                },
            };

            if let Some(error) = failed {
                self.error_sink.add_error(kind.source(), &error);
                retry.insert(kind.retry_context());
                failures.push(FetchFailure { kind, error });
            }
        }

        failures.sort_by_key(|failure| failure.kind);
        FetchOutcome {
            snapshot,
            retry,
            failures,
            issued,
        }
    }
}

impl fmt::Debug for FetchCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchCoordinator")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl FetchSnapshot {
    fn apply_loop_state(&mut self, state: LoopState, request: &FetchRequest) {
        let now = request.now;
        let net_basal = state.basal_schedule.as_ref().and_then(|schedule| {
            let at = state.last_temp_basal.as_ref().map_or(now, |temp| temp.start);
            schedule.value_at(at).map(|scheduled| {
                NetBasal::new(
                    state.last_temp_basal.as_ref(),
                    state.max_basal_rate,
                    &scheduled,
                    now,
                )
            })
        });
        let override_mode = |context| {
            state
                .target_schedule
                .as_ref()
                .map(|schedule| schedule.override_enabled_for(context, now))
        };

        self.loop_summary = Some(LoopSummary {
            recommended_temp_basal: state.recommended_temp_basal,
            last_error: state.last_error.clone(),
            last_completed: state.last_completed,
            dosing_enabled: state.dosing_enabled,
            net_basal,
            pre_meal_mode: override_mode(OverrideContext::PreMeal),
            workout_mode: override_mode(OverrideContext::Workout),
            insulin_effect_hours: state.insulin_effect_hours,
        });
        if request.context.contains(ContextKind::Targets) {
            self.targets = Some(TargetsSnapshot {
                schedule: state.target_schedule,
            });
        }
        self.predicted_glucose = state.predicted_glucose.unwrap_or_default();
    }
}

/// Store `Ok` values; substitute an empty series on failure.
fn degrade<T>(result: Result<Vec<T>>, slot: &mut Option<Vec<T>>) -> Option<LscError> {
    match result {
        Ok(values) => {
            *slot = Some(values);
            None
        }
        Err(error) => {
            *slot = Some(Vec::new());
            Some(error)
        }
    }
}

fn spawn_worker<F>(kind: FetchKind, tx: &Sender<FetchPayload>, job: F) -> std::io::Result<()>
where
    F: FnOnce(&Sender<FetchPayload>) + Send + 'static,
{
    let tx = tx.clone();
    thread::Builder::new()
        .name(kind.worker_name().to_string())
        .spawn(move || job(&tx))
        .map(|_| ())
}
