//! Durable run storage.

pub mod run_store;

pub use run_store::{RunStore, SetHistoryEntry, SetInfo, StoreStats};
