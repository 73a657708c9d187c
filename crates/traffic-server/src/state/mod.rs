//! In-memory state and collaborators.

mod memory;
mod store;

pub use memory::{MemoryAlertSink, MemoryPingStore, MemoryRoadStore, StoredAlert};
pub use store::{AppState, RunGuard};
