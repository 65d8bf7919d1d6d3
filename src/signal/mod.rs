//! Cross-tab invalidation signals.
//!
//! A mutation in one tab leaves a lightweight marker
//! (`<entity-type>-updated-<id>` -> ISO timestamp) in a store visible to
//! every same-profile context. Observers learn about it either through the
//! store's event feed or, for backends without one, through a polling
//! fallback. The marker is a fire-and-forget hint; the fetched collection
//! stays authoritative.

mod channel;
mod storage;

pub use channel::{ObserverHandle, SignalChannel};
pub use storage::{MemorySignalStore, SignalMarker, SignalStorage, SqliteSignalStore};
