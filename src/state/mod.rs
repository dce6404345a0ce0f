//! State management module.
//!
//! This module provides persistent storage of what the engine last
//! provisioned for a stack, plus the lock that serializes runs.

mod local;
mod lock;
mod memory;
mod store;
mod types;

pub use local::{LocalStateStore, STATE_DIR};
pub use lock::{generate_holder_id, LockInfo, LOCK_EXPIRY_SECS};
pub use memory::MemoryStateStore;
pub use store::StateStore;
pub use types::{
    RecordedExport, ResourceState, RetiredInstance, RunHistoryEntry, RunOperation, StackState,
    STATE_VERSION,
};
