//! The status screen controller: serial owner of display state, driven by
//! typed events.

pub mod display;
pub mod events;
pub mod render;
pub mod status_controller;
