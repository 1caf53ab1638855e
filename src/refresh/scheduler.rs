//! Coalescing refresh scheduler.
//!
//! Reasons accumulate in a mutex-protected pending set from any thread. A
//! pass snapshots and clears the set; anything marked while the pass runs
//! lands in a fresh pending set and is reported back at `end_pass` so the
//! owner can start the next pass straight away.

#![allow(missing_docs)]

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use super::context::{RefreshContext, RefreshContextSet};

/// Preconditions the owner evaluates before each pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassGate {
    pub authorization_required: bool,
    /// Screen is both active and visible.
    pub displayed: bool,
}

impl PassGate {
    pub const OPEN: Self = Self {
        authorization_required: false,
        displayed: true,
    };
}

/// Why `begin_pass` declined to start. Pending reasons are untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassRefusal {
    InFlight,
    AuthorizationRequired,
    NotDisplayed,
    NothingPending,
}

impl fmt::Display for PassRefusal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::InFlight => "pass already in flight",
            Self::AuthorizationRequired => "authorization required",
            Self::NotDisplayed => "screen not displayed",
            Self::NothingPending => "nothing pending",
        };
        f.write_str(text)
    }
}

/// A pass that has been admitted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StartedPass {
    /// 1-based pass counter.
    pub number: u64,
    pub context: RefreshContextSet,
}

/// What `end_pass` observed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PassCompletion {
    /// Reasons marked while the pass was running.
    pub mid_flight: RefreshContextSet,
    /// Pending set after the retry merge.
    pub pending: RefreshContextSet,
    /// The pending set is non-empty; the owner must schedule the next pass
    /// now rather than wait for a tick.
    pub rerun: bool,
}

#[derive(Debug, Default)]
struct SchedulerState {
    pending: RefreshContextSet,
    in_flight: bool,
    passes: u64,
}

/// Shared handle to the pending set and in-flight guard.
#[derive(Debug, Clone, Default)]
pub struct RefreshScheduler {
    state: Arc<Mutex<SchedulerState>>,
}

impl RefreshScheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a reason. Idempotent and callable from any thread.
    pub fn mark_dirty(&self, context: RefreshContext) {
        self.state.lock().pending.insert(context);
    }

    pub fn extend(&self, contexts: &RefreshContextSet) {
        if contexts.is_empty() {
            return;
        }
        self.state.lock().pending.union_with(contexts);
    }

    #[must_use]
    pub fn pending(&self) -> RefreshContextSet {
        self.state.lock().pending
    }

    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        self.state.lock().in_flight
    }

    #[must_use]
    pub fn passes_started(&self) -> u64 {
        self.state.lock().passes
    }

    /// Atomically snapshot and clear the pending set, or refuse.
    pub fn begin_pass(&self, gate: PassGate) -> Result<StartedPass, PassRefusal> {
        let mut state = self.state.lock();
        if state.in_flight {
            return Err(PassRefusal::InFlight);
        }
        if gate.authorization_required {
            return Err(PassRefusal::AuthorizationRequired);
        }
        if !gate.displayed {
            return Err(PassRefusal::NotDisplayed);
        }
        if state.pending.is_empty() {
            return Err(PassRefusal::NothingPending);
        }

        state.in_flight = true;
        state.passes += 1;
        Ok(StartedPass {
            number: state.passes,
            context: state.pending.take(),
        })
    }

    /// Clear the in-flight flag and merge `retry` into the pending set.
    pub fn end_pass(&self, retry: &RefreshContextSet) -> PassCompletion {
        let mut state = self.state.lock();
        state.in_flight = false;

        let mid_flight = state.pending;
        state.pending.union_with(retry);

        PassCompletion {
            mid_flight,
            pending: state.pending,
            rerun: !state.pending.is_empty(),
        }
    }
}
