//! Store-facing side of a refresh pass: the data model, the store traits,
//! and the coordinator that fans fetches out and joins them.

pub mod coordinator;
pub mod model;
pub mod stores;
