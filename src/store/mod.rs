//! Cache store for synchronized entity collections.
//!
//! One store per entity type. It holds the last-known collection, replaces
//! it wholesale on each successful fetch, and fans updates out to
//! subscribers in registration order. Fetch results carry a monotonic
//! sequence number so a late-arriving stale response never overwrites newer
//! data.

mod cache;

pub use cache::{CacheStore, Subscription, SyncUpdate};
