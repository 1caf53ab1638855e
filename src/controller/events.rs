//! Typed events delivered to the controller thread.

#![allow(missing_docs)]

use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};

use crate::core::errors::{LscError, Result};
use crate::refresh::context::{RefreshContext, RefreshContextSet, ViewSize};
use crate::refresh::scheduler::RefreshScheduler;
use crate::status::actions::StatusAction;
use crate::status::mode::{BasalDeliveryState, BolusState};

/// What changed in the loop's data, as carried by a loop update notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopUpdateContext {
    Bolus,
    Preferences,
    Carbs,
    Glucose,
    TempBasal,
}

impl LoopUpdateContext {
    /// Reasons to mark dirty for an update. An untagged update counts as a
    /// bolus update.
    #[must_use]
    pub fn dirty_contexts(update: Option<Self>) -> RefreshContextSet {
        let contexts: &[RefreshContext] = match update {
            None | Some(Self::Bolus) => &[RefreshContext::Status, RefreshContext::Insulin],
            Some(Self::Preferences) => &[RefreshContext::Status, RefreshContext::Targets],
            Some(Self::Carbs) => &[RefreshContext::Carbs],
            Some(Self::Glucose) => &[RefreshContext::Glucose, RefreshContext::Carbs],
            Some(Self::TempBasal) => &[RefreshContext::Insulin],
        };
        contexts.iter().copied().collect()
    }
}

#[derive(Debug)]
pub enum ControllerEvent {
    LoopDataUpdated(Option<LoopUpdateContext>),
    /// The loop started a cycle.
    LoopRunning,
    DeviceStatusChanged {
        basal: BasalDeliveryState,
        bolus: BolusState,
    },
    BolusProgress {
        delivered_units: f64,
        complete: bool,
    },
    SizeChanged(ViewSize),
    VisibilityChanged(bool),
    ActiveChanged(bool),
    MemoryWarning,
    GlucoseUnitChanged,
    AuthorizationGranted,
    HudLoaded,
    StatusRowSelected,
    ActionCompleted {
        action: StatusAction,
        result: Result<()>,
    },
    /// Tick or queued rerun; runs a pass for anything still pending.
    Refresh,
    Shutdown,
}

impl ControllerEvent {
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::LoopDataUpdated(_) => "loop_data_updated",
            Self::LoopRunning => "loop_running",
            Self::DeviceStatusChanged { .. } => "device_status_changed",
            Self::BolusProgress { .. } => "bolus_progress",
            Self::SizeChanged(_) => "size_changed",
            Self::VisibilityChanged(_) => "visibility_changed",
            Self::ActiveChanged(_) => "active_changed",
            Self::MemoryWarning => "memory_warning",
            Self::GlucoseUnitChanged => "glucose_unit_changed",
            Self::AuthorizationGranted => "authorization_granted",
            Self::HudLoaded => "hud_loaded",
            Self::StatusRowSelected => "status_row_selected",
            Self::ActionCompleted { .. } => "action_completed",
            Self::Refresh => "refresh",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Cloneable, `Send` access to a controller from other threads.
#[derive(Debug, Clone)]
pub struct ControllerHandle {
    tx: Sender<ControllerEvent>,
    scheduler: RefreshScheduler,
}

impl ControllerHandle {
    pub(crate) const fn new(tx: Sender<ControllerEvent>, scheduler: RefreshScheduler) -> Self {
        Self { tx, scheduler }
    }

    pub fn send(&self, event: ControllerEvent) -> Result<()> {
        self.tx.send(event).map_err(|_| LscError::ChannelClosed {
            component: "controller",
        })
    }

    /// Mark a reason dirty without waking the controller. It is picked up by
    /// the next pass to start; a pass already running is not affected.
    pub fn mark_dirty(&self, context: RefreshContext) {
        self.scheduler.mark_dirty(context);
    }

    #[must_use]
    pub const fn scheduler(&self) -> &RefreshScheduler {
        &self.scheduler
    }
}
