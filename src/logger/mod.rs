//! Activity logging: JSONL append-only writer behind a dedicated logger thread.

pub mod activity;
pub mod jsonl;
