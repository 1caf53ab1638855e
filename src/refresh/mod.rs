//! Dirty-reason bookkeeping: reason sets, the coalescing scheduler, and the
//! chart window that bounds every fetch.

pub mod chart_window;
pub mod context;
pub mod scheduler;
