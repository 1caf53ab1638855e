//! Status row: mode derivation, row diffing, and optimistic user actions.

pub mod actions;
pub mod mode;
pub mod reconcile;
