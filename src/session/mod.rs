//! Durable session state: chain snapshot, pending-load marker, crash blacklist
//! and the auto-save loop that keeps the snapshot current.

pub mod blacklist;
pub mod persistence;
pub mod snapshot;
pub mod store;

pub use blacklist::Blacklist;
pub use persistence::{persist_once, snapshot_chain, PersistenceHandle, PersistenceLoop};
pub use snapshot::{SessionSnapshot, SnapshotEntry};
pub use store::{PendingLoad, SessionStore};
