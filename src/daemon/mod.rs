//! Runtime subsystem: the event/tick loop around the controller and signal
//! handling.

#[cfg(feature = "daemon")]
pub mod loop_main;
#[cfg(feature = "daemon")]
pub mod signals;
