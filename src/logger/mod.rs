//! Activity logging: JSONL append-only writer behind a non-blocking logger thread.

pub mod activity;
pub mod jsonl;
