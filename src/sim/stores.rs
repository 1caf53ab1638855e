//! In-memory stores and device with scripted failures.
//!
//! One [`SimulatedStores`] implements every store trait and
//! [`DeviceActions`]; clones share state, so a test or scenario keeps a
//! clone to edit data and inject failures while the controller reads.

#![allow(missing_docs)]

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::core::errors::{LscError, Result};
use crate::fetch::coordinator::FetchKind;
use crate::fetch::model::{
    CarbValue, DoseEntry, DoseKind, DoseUnit, GlucoseEffectVelocity, GlucoseSample, GlucoseValue,
    InsulinValue, LoopState,
};
use crate::fetch::stores::{CarbStore, DoseStore, GlucoseStore, LoopStateStore};
use crate::status::actions::{DeviceActions, StatusAction};

/// Called on the fetch worker thread before the store answers.
pub type FetchHook = Arc<dyn Fn(FetchKind) + Send + Sync>;

/// Store data served to fetches.
#[derive(Debug, Clone, Default)]
pub struct SimData {
    pub loop_state: LoopState,
    pub glucose: Vec<GlucoseSample>,
    pub insulin_on_board: Vec<InsulinValue>,
    pub doses: Vec<DoseEntry>,
    pub total_delivered: f64,
    pub carbs_on_board: Vec<CarbValue>,
}

impl SimData {
    /// A quiet six hours: flat glucose, decaying insulin, hourly basal.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn steady(now: DateTime<Utc>) -> Self {
        let five = chrono::Duration::minutes(5);
        let glucose = (0..72)
            .rev()
            .map(|i| GlucoseSample {
                start: now - five * i,
                mg_dl: 110.0 + f64::from(u8::try_from(i % 6).unwrap_or(0)),
            })
            .collect();
        let insulin_on_board = (-36..36)
            .map(|i: i32| InsulinValue {
                start: now + five * i,
                units: (1.8 - f64::from(i + 36) * 0.025).max(0.0),
            })
            .collect();
        let hour = chrono::Duration::hours(1);
        let doses = (1..=6)
            .rev()
            .map(|i| DoseEntry {
                kind: DoseKind::Basal,
                start: now - hour * i,
                end: now - hour * (i - 1),
                value: 0.85,
                unit: DoseUnit::UnitsPerHour,
            })
            .collect();
        let predicted = (0..12)
            .map(|i| GlucoseValue {
                start: now + five * i,
                mg_dl: 110.0 - f64::from(i),
            })
            .collect();

        Self {
            loop_state: LoopState {
                predicted_glucose: Some(predicted),
                last_completed: Some(now),
                dosing_enabled: true,
                ..LoopState::default()
            },
            glucose,
            insulin_on_board,
            doses,
            total_delivered: 5.1,
            carbs_on_board: Vec::new(),
        }
    }
}

struct SimState {
    data: SimData,
    authorization_required: bool,
    /// Failures still owed per fetch kind.
    fail_next: BTreeMap<FetchKind, u32>,
    fail_actions: HashMap<StatusAction, u32>,
    failure_rate: f64,
    rng: StdRng,
    fetch_latency: Duration,
    action_latency: Duration,
    fetch_log: Vec<FetchKind>,
    action_log: Vec<StatusAction>,
    /// Whether each carbs fetch was given counteraction effects.
    carbs_with_effects: Vec<bool>,
    hook: Option<FetchHook>,
}

#[derive(Clone)]
pub struct SimulatedStores {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedStores {
    #[must_use]
    pub fn new(now: DateTime<Utc>) -> Self {
        Self::with_data(SimData::steady(now))
    }

    #[must_use]
    pub fn with_data(data: SimData) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                data,
                authorization_required: false,
                fail_next: BTreeMap::new(),
                fail_actions: HashMap::new(),
                failure_rate: 0.0,
                rng: StdRng::seed_from_u64(0),
                fetch_latency: Duration::ZERO,
                action_latency: Duration::ZERO,
                fetch_log: Vec::new(),
                action_log: Vec::new(),
                carbs_with_effects: Vec::new(),
                hook: None,
            })),
        }
    }

    // ──────────────────── data ────────────────────

    pub fn set_loop_state(&self, loop_state: LoopState) {
        self.state.lock().data.loop_state = loop_state;
    }

    /// Edit the served data in place.
    pub fn update<R>(&self, edit: impl FnOnce(&mut SimData) -> R) -> R {
        edit(&mut self.state.lock().data)
    }

    #[must_use]
    pub fn data(&self) -> SimData {
        self.state.lock().data.clone()
    }

    pub fn set_authorization_required(&self, required: bool) {
        self.state.lock().authorization_required = required;
    }

    // ──────────────────── fault injection ────────────────────

    /// Fail the next `count` fetches of `kind`.
    pub fn fail_next(&self, kind: FetchKind, count: u32) {
        *self.state.lock().fail_next.entry(kind).or_insert(0) += count;
    }

    /// Fail the next `count` attempts of `action`.
    pub fn fail_action(&self, action: StatusAction, count: u32) {
        *self.state.lock().fail_actions.entry(action).or_insert(0) += count;
    }

    /// Fail every fetch with probability `rate`, drawn from a generator
    /// seeded with `seed`.
    pub fn set_random_failures(&self, rate: f64, seed: u64) {
        let mut state = self.state.lock();
        state.failure_rate = rate.clamp(0.0, 1.0);
        state.rng = StdRng::seed_from_u64(seed);
    }

    pub fn set_fetch_latency(&self, latency: Duration) {
        self.state.lock().fetch_latency = latency;
    }

    pub fn set_action_latency(&self, latency: Duration) {
        self.state.lock().action_latency = latency;
    }

    pub fn set_fetch_hook(&self, hook: Option<FetchHook>) {
        self.state.lock().hook = hook;
    }

    // ──────────────────── inspection ────────────────────

    /// Every fetch served so far, in arrival order.
    #[must_use]
    pub fn fetch_log(&self) -> Vec<FetchKind> {
        self.state.lock().fetch_log.clone()
    }

    #[must_use]
    pub fn fetch_count(&self, kind: FetchKind) -> usize {
        self.state
            .lock()
            .fetch_log
            .iter()
            .filter(|k| **k == kind)
            .count()
    }

    #[must_use]
    pub fn action_log(&self) -> Vec<StatusAction> {
        self.state.lock().action_log.clone()
    }

    #[must_use]
    pub fn carbs_with_effects(&self) -> Vec<bool> {
        self.state.lock().carbs_with_effects.clone()
    }

    pub fn clear_logs(&self) {
        let mut state = self.state.lock();
        state.fetch_log.clear();
        state.action_log.clear();
        state.carbs_with_effects.clear();
    }

    /// Record the fetch, run the hook and latency outside the lock, then
    /// decide whether it fails.
    fn serve(&self, kind: FetchKind) -> Result<()> {
        let (hook, latency, fail) = {
            let mut state = self.state.lock();
            state.fetch_log.push(kind);
            let scripted = state.fail_next.get_mut(&kind).is_some_and(|owed| {
                let due = *owed > 0;
                *owed = owed.saturating_sub(1);
                due
            });
            let rate = state.failure_rate;
            let random = rate > 0.0 && state.rng.random_bool(rate);
            (state.hook.clone(), state.fetch_latency, scripted || random)
        };

        if let Some(hook) = hook {
            hook(kind);
        }
        if !latency.is_zero() {
            thread::sleep(latency);
        }
        if fail {
            return Err(LscError::store(kind.source(), "simulated failure"));
        }
        Ok(())
    }

    fn act(&self, action: StatusAction) -> Result<()> {
        let (latency, fail) = {
            let mut state = self.state.lock();
            state.action_log.push(action);
            let fail = state.fail_actions.get_mut(&action).is_some_and(|owed| {
                let due = *owed > 0;
                *owed = owed.saturating_sub(1);
                due
            });
            (state.action_latency, fail)
        };
        if !latency.is_zero() {
            thread::sleep(latency);
        }
        if fail {
            return Err(LscError::ActionFailed {
                action: action.label(),
                details: "simulated device error".to_string(),
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for SimulatedStores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SimulatedStores")
            .field("fetches", &state.fetch_log.len())
            .field("actions", &state.action_log.len())
            .field("failure_rate", &state.failure_rate)
            .finish_non_exhaustive()
    }
}

fn since<T: Clone>(values: &[T], since: DateTime<Utc>, at: impl Fn(&T) -> DateTime<Utc>) -> Vec<T> {
    values.iter().filter(|v| at(v) >= since).cloned().collect()
}

impl LoopStateStore for SimulatedStores {
    fn loop_state(&self) -> Result<LoopState> {
        self.serve(FetchKind::LoopState)?;
        Ok(self.state.lock().data.loop_state.clone())
    }

    fn authorization_required(&self) -> bool {
        self.state.lock().authorization_required
    }
}

impl GlucoseStore for SimulatedStores {
    fn cached_samples(&self, start: DateTime<Utc>) -> Result<Vec<GlucoseSample>> {
        self.serve(FetchKind::Glucose)?;
        Ok(since(&self.state.lock().data.glucose, start, |s| s.start))
    }

    fn latest_glucose(&self) -> Option<GlucoseSample> {
        self.state.lock().data.glucose.last().cloned()
    }
}

impl DoseStore for SimulatedStores {
    fn insulin_on_board(&self, start: DateTime<Utc>) -> Result<Vec<InsulinValue>> {
        self.serve(FetchKind::InsulinOnBoard)?;
        Ok(since(&self.state.lock().data.insulin_on_board, start, |v| v.start))
    }

    fn normalized_doses(&self, start: DateTime<Utc>) -> Result<Vec<DoseEntry>> {
        self.serve(FetchKind::Doses)?;
        Ok(since(&self.state.lock().data.doses, start, |d| d.end))
    }

    fn total_delivered(&self, _since: DateTime<Utc>) -> Result<f64> {
        self.serve(FetchKind::TotalDelivered)?;
        Ok(self.state.lock().data.total_delivered)
    }
}

impl CarbStore for SimulatedStores {
    fn carbs_on_board(
        &self,
        start: DateTime<Utc>,
        effects: Option<&[GlucoseEffectVelocity]>,
    ) -> Result<Vec<CarbValue>> {
        self.state.lock().carbs_with_effects.push(effects.is_some());
        self.serve(FetchKind::Carbs)?;
        Ok(since(&self.state.lock().data.carbs_on_board, start, |v| v.start))
    }
}

impl DeviceActions for SimulatedStores {
    fn enact_recommended_temp_basal(&self) -> Result<()> {
        self.act(StatusAction::EnactTempBasal)?;
        self.state.lock().data.loop_state.recommended_temp_basal = None;
        Ok(())
    }

    fn resume_delivery(&self) -> Result<()> {
        self.act(StatusAction::ResumeDelivery)
    }

    fn cancel_bolus(&self) -> Result<()> {
        self.act(StatusAction::CancelBolus)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn steady_data_is_time_ordered() {
        let data = SimData::steady(now());
        assert!(data.glucose.windows(2).all(|w| w[0].start < w[1].start));
        assert_eq!(data.glucose.last().map(|s| s.start), Some(now()));
        assert!(data.insulin_on_board.iter().all(|v| v.units >= 0.0));
    }

    #[test]
    fn scripted_failures_are_consumed() {
        let stores = SimulatedStores::new(now());
        stores.fail_next(FetchKind::Glucose, 2);

        assert!(stores.cached_samples(now()).is_err());
        assert!(stores.cached_samples(now()).is_err());
        assert!(stores.cached_samples(now()).is_ok());
        assert_eq!(stores.fetch_count(FetchKind::Glucose), 3);
    }

    #[test]
    fn failures_name_the_store() {
        let stores = SimulatedStores::new(now());
        stores.fail_next(FetchKind::Doses, 1);
        let err = stores.normalized_doses(now()).unwrap_err();
        assert_eq!(err.code(), "LSC-2001");
        assert!(err.to_string().contains(FetchKind::Doses.source()));
    }

    #[test]
    fn seeded_failures_repeat() {
        let run = || {
            let stores = SimulatedStores::new(now());
            stores.set_random_failures(0.5, 7);
            (0..32)
                .map(|_| stores.total_delivered(now()).is_ok())
                .collect::<Vec<_>>()
        };
        let first = run();
        assert_eq!(first, run());
        assert!(first.iter().any(|ok| *ok));
        assert!(first.iter().any(|ok| !*ok));
    }

    #[test]
    fn hook_sees_every_fetch() {
        let stores = SimulatedStores::new(now());
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        stores.set_fetch_hook(Some(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })));

        stores.loop_state().unwrap();
        stores.insulin_on_board(now()).unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn range_queries_filter_by_start() {
        let stores = SimulatedStores::new(now());
        let recent = stores
            .cached_samples(now() - chrono::Duration::minutes(30))
            .unwrap();
        assert_eq!(recent.len(), 7);
    }

    #[test]
    fn enact_consumes_recommendation() {
        let stores = SimulatedStores::new(now());
        stores.update(|data| {
            data.loop_state.recommended_temp_basal =
                Some(crate::fetch::model::RecommendedTempBasal {
                    recommendation: crate::fetch::model::TempBasalRecommendation {
                        units_per_hour: 0.5,
                        duration_minutes: 30.0,
                    },
                    date: now(),
                });
        });
        stores.enact_recommended_temp_basal().unwrap();
        assert!(stores.data().loop_state.recommended_temp_basal.is_none());

        stores.fail_action(StatusAction::CancelBolus, 1);
        assert_eq!(stores.cancel_bolus().unwrap_err().code(), "LSC-2003");
        assert!(stores.cancel_bolus().is_ok());
        assert_eq!(stores.action_log().len(), 3);
    }
}
