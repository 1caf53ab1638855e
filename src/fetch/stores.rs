//! Store traits consumed by the coordinator.
//!
//! Every call is blocking and may be issued from a worker thread, so each
//! trait is `Send + Sync`. Failures are ordinary `Result`s; the coordinator
//! degrades the affected signal instead of aborting the pass.

#![allow(missing_docs)]

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::core::errors::{LscError, Result};
use crate::fetch::model::{
    CarbValue, DoseEntry, GlucoseEffectVelocity, GlucoseSample, InsulinValue, LoopState,
};

pub trait LoopStateStore: Send + Sync {
    fn loop_state(&self) -> Result<LoopState>;

    /// Health data access has not been granted yet.
    fn authorization_required(&self) -> bool {
        false
    }
}

pub trait GlucoseStore: Send + Sync {
    fn cached_samples(&self, since: DateTime<Utc>) -> Result<Vec<GlucoseSample>>;

    /// Most recent sample, read synchronously when the HUD is refreshed.
    fn latest_glucose(&self) -> Option<GlucoseSample>;
}

pub trait DoseStore: Send + Sync {
    fn insulin_on_board(&self, since: DateTime<Utc>) -> Result<Vec<InsulinValue>>;
    fn normalized_doses(&self, since: DateTime<Utc>) -> Result<Vec<DoseEntry>>;
    fn total_delivered(&self, since: DateTime<Utc>) -> Result<f64>;
}

pub trait CarbStore: Send + Sync {
    fn carbs_on_board(
        &self,
        since: DateTime<Utc>,
        effect_velocities: Option<&[GlucoseEffectVelocity]>,
    ) -> Result<Vec<CarbValue>>;
}

/// Receives per-fetch failures tagged with the name of their source.
pub trait ErrorSink: Send + Sync {
    fn add_error(&self, source: &'static str, error: &LscError);
}

/// Sink that drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullErrorSink;

impl ErrorSink for NullErrorSink {
    fn add_error(&self, _source: &'static str, _error: &LscError) {}
}

/// The four stores a pass reads from.
#[derive(Clone)]
pub struct StoreSet {
    pub loop_state: Arc<dyn LoopStateStore>,
    pub glucose: Arc<dyn GlucoseStore>,
    pub doses: Arc<dyn DoseStore>,
    pub carbs: Arc<dyn CarbStore>,
}

impl StoreSet {
    /// Use one object for every store.
    pub fn uniform<S>(stores: Arc<S>) -> Self
    where
        S: LoopStateStore + GlucoseStore + DoseStore + CarbStore + 'static,
    {
        Self {
            loop_state: stores.clone(),
            glucose: stores.clone(),
            doses: stores.clone(),
            carbs: stores,
        }
    }
}

impl std::fmt::Debug for StoreSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreSet").finish_non_exhaustive()
    }
}
