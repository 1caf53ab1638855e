//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use loop_status_core::prelude::*;
//! ```

// Core
pub use crate::core::clock::{Clock, ManualClock, SystemClock};
pub use crate::core::config::Config;
pub use crate::core::errors::{LscError, Result};

// Refresh
pub use crate::refresh::chart_window::ChartWindow;
pub use crate::refresh::context::{ContextKind, RefreshContext, RefreshContextSet, ViewSize};
pub use crate::refresh::scheduler::{PassGate, PassRefusal, RefreshScheduler};

// Fetch
pub use crate::fetch::coordinator::{FetchCoordinator, FetchKind, FetchOutcome, FetchRequest};
pub use crate::fetch::model::LoopState;
pub use crate::fetch::stores::{
    CarbStore, DoseStore, ErrorSink, GlucoseStore, LoopStateStore, StoreSet,
};

// Status
pub use crate::status::actions::{DeviceActions, StatusAction, action_for_selection, settle};
pub use crate::status::mode::{BasalDeliveryState, BolusState, StatusRowMode, derive};
pub use crate::status::reconcile::{DisplayLayout, Row, RowOp, reconcile};

// Controller
pub use crate::controller::events::{ControllerEvent, ControllerHandle, LoopUpdateContext};
pub use crate::controller::render::{RecordingRenderer, Renderer};
pub use crate::controller::status_controller::{Flow, StatusController};

// Logging
pub use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle, spawn_logger};
