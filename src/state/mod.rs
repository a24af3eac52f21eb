//! Local state management.
//!
//! Records which provider identifier belongs to which declared resource,
//! together with the attributes folded in after the last operation and a
//! bounded operation history.

mod local;
mod lock;
mod store;
mod types;

pub use local::LocalStateStore;
pub use lock::{holder_id, LockInfo, LOCK_EXPIRY_SECS};
pub use store::StateStore;
pub use types::{
    HistoryEntry, HistoryOperation, RecordStatus, ResourceRecord, StateFile, MAX_HISTORY,
    STATE_VERSION,
};
