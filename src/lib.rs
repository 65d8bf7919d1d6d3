//! Client-side data synchronization layer for the CRM.
//!
//! Keeps cached entity collections (clients, SIM cards) consistent with the
//! authoritative REST API across multiple same-profile contexts ("tabs"):
//!
//! - [`store::CacheStore`] holds the last-known collection per entity type
//!   and fans updates out to subscribers.
//! - [`fetch::ApiClient`] retrieves the authoritative collection with
//!   cache-defeating headers.
//! - [`signal::SignalChannel`] carries lightweight cross-tab invalidation
//!   markers, delivered event-driven where the backend supports it with a
//!   polling fallback everywhere.
//! - [`trigger::SyncTrigger`] orchestrates periodic refresh and
//!   refresh-on-mutation through an Idle/Fetching state machine that
//!   coalesces concurrent triggers and damps bursts with a cooldown window.
//!
//! Wire it up once per application root with [`service::SyncService`]:
//!
//! ```ignore
//! let mut service = SyncService::new(Config::load(None)?)?;
//! service.start();
//!
//! let _sub = service.clients().store().subscribe(|update| {
//!     render_client_list(&update.collection, update.is_stale);
//! });
//!
//! // After a successful PUT /api/clients/5:
//! service.clients().trigger_update_for(5);
//! ```

pub mod clock;
pub mod config;
pub mod entities;
pub mod error;
pub mod fetch;
pub mod service;
pub mod signal;
pub mod store;
pub mod trigger;

pub use clock::{Clock, SystemClock};
pub use config::Config;
pub use entities::{Client, SimCard, SyncEntity};
pub use error::SyncError;
pub use fetch::ApiClient;
pub use service::SyncService;
pub use signal::SignalChannel;
pub use store::{CacheStore, Subscription, SyncUpdate};
pub use trigger::SyncTrigger;
