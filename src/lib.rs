#![forbid(unsafe_code)]

//! Loop Status Core (lsc): the refresh and status logic behind an automated
//! insulin dosing status screen.
//!
//! Four pieces cooperate:
//! 1. **Refresh scheduler**: dirty reasons coalesce into at most one pass in
//!    flight, with reruns for anything marked meanwhile
//! 2. **Fetch coordinator**: one pass fans out to the stores and joins
//!    before any display state changes; failed signals retry on the next pass
//! 3. **Status derivation**: a pure priority function picks the single
//!    status-row mode, and a reconciler turns mode changes into row edits
//! 4. **Optimistic actions**: selecting the row updates it at once and the
//!    device outcome settles it later
//!
//! # Library usage
//!
//! ```rust,no_run
//! use loop_status_core::prelude::*;
//! ```
//!
//! Individual modules can also be imported directly:
//!
//! ```rust,no_run
//! use loop_status_core::status::mode::derive;
//! use loop_status_core::refresh::scheduler::RefreshScheduler;
//! ```

pub mod prelude;

pub mod controller;
pub mod core;
pub mod daemon;
pub mod fetch;
pub mod logger;
pub mod refresh;
pub mod sim;
pub mod status;
