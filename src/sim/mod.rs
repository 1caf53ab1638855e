//! Simulated stores, device, and scripted scenarios.

pub mod scenario;
pub mod stores;
