//! Refresh orchestration per entity type.
//!
//! A `SyncTrigger` moves through `Idle -> Fetching -> Idle`. Triggers that
//! arrive while a fetch is in flight are coalesced (dropped, not queued),
//! which guarantees at most one concurrent fetch per entity type. After a
//! fetch completes, a cooldown window suppresses immediately-following
//! triggers so a burst of near-simultaneous mutation signals produces one
//! request, not a storm; a mutation landing inside the cooldown still
//! signals the other tabs and schedules one deferred refresh for when the
//! window closes. Failed fetches mark the cache stale and are retried on
//! the next periodic tick, never in a tight loop.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::clock::Clock;
use crate::error::SyncError;
use crate::signal::SignalChannel;
use crate::store::CacheStore;

/// A boxed future resolving to a fetched collection
type BoxFuture<T> = Pin<Box<dyn Future<Output = Result<Vec<T>, SyncError>> + Send>>;

/// A factory function that creates futures for fetching the collection
type FetcherFn<T> = Box<dyn Fn() -> BoxFuture<T> + Send + Sync>;

#[derive(Debug, Clone, Copy)]
enum FetchState {
  Idle { last_done: Option<Instant> },
  Fetching,
}

/// Why a trigger did or did not start a fetch.
enum BeginOutcome {
  Started,
  InFlight,
  Cooldown { remaining: Duration },
}

/// Orchestrates periodic refresh and refresh-on-mutation for one entity
/// type.
pub struct SyncTrigger<T> {
  entity_type: String,
  store: Arc<CacheStore<T>>,
  fetcher: FetcherFn<T>,
  signals: SignalChannel,
  clock: Arc<dyn Clock>,
  cooldown: Duration,
  state: Mutex<FetchState>,
  /// Monotonic fetch sequence; results are applied newest-wins by this.
  next_seq: AtomicU64,
  /// A refresh is already scheduled for when the cooldown window closes.
  deferred: AtomicBool,
}

impl<T: Send + Sync + 'static> SyncTrigger<T> {
  /// Create a trigger with the given fetcher function.
  ///
  /// The fetcher is a closure that returns a future producing the full
  /// authoritative collection. It is called once per refresh.
  pub fn new<F, Fut>(
    entity_type: impl Into<String>,
    store: Arc<CacheStore<T>>,
    signals: SignalChannel,
    clock: Arc<dyn Clock>,
    cooldown: Duration,
    fetcher: F,
  ) -> Arc<Self>
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<T>, SyncError>> + Send + 'static,
  {
    Arc::new(Self {
      entity_type: entity_type.into(),
      store,
      fetcher: Box::new(move || Box::pin(fetcher())),
      signals,
      clock,
      cooldown,
      state: Mutex::new(FetchState::Idle { last_done: None }),
      next_seq: AtomicU64::new(0),
      deferred: AtomicBool::new(false),
    })
  }

  /// The cache store this trigger refreshes.
  pub fn store(&self) -> &Arc<CacheStore<T>> {
    &self.store
  }

  /// Called after a local mutation touching the whole collection.
  ///
  /// Starts a refresh and signals other tabs. A call while a fetch is in
  /// flight is a no-op and emits no signal (the in-flight fetch's completion
  /// covers it). A call inside the cooldown window still writes the signal
  /// (other tabs should not wait out this tab's cooldown) and defers the
  /// local refresh until the window closes.
  pub fn trigger_update(self: &Arc<Self>) {
    self.trigger_mutation(None);
  }

  /// Called after a local mutation of one record; the cross-tab marker is
  /// narrowed to that record's id.
  pub fn trigger_update_for(self: &Arc<Self>, id: i64) {
    self.trigger_mutation(Some(id));
  }

  fn trigger_mutation(self: &Arc<Self>, id: Option<i64>) {
    match self.classify_begin() {
      BeginOutcome::Started => {
        self.signals.signal(&self.entity_type, id);
        self.spawn_fetch();
      }
      BeginOutcome::InFlight => {
        tracing::debug!(entity_type = %self.entity_type, "trigger coalesced");
      }
      BeginOutcome::Cooldown { remaining } => {
        self.signals.signal(&self.entity_type, id);
        self.defer_refresh(remaining);
      }
    }
  }

  /// Refresh without signaling other tabs: the periodic-tick and
  /// observed-signal paths. Returns false when coalesced or in cooldown.
  pub fn refresh(self: &Arc<Self>) -> bool {
    if !self.begin_fetch() {
      return false;
    }
    self.spawn_fetch();
    true
  }

  /// Idle -> Fetching transition, honoring the cooldown window.
  fn begin_fetch(&self) -> bool {
    matches!(self.classify_begin(), BeginOutcome::Started)
  }

  fn classify_begin(&self) -> BeginOutcome {
    let mut state = self.state.lock().expect("trigger state poisoned");
    match *state {
      FetchState::Fetching => BeginOutcome::InFlight,
      FetchState::Idle { last_done } => {
        if let Some(done) = last_done {
          let elapsed = self.clock.now().duration_since(done);
          if elapsed < self.cooldown {
            return BeginOutcome::Cooldown {
              remaining: self.cooldown - elapsed,
            };
          }
        }
        *state = FetchState::Fetching;
        BeginOutcome::Started
      }
    }
  }

  /// Schedule one refresh for when the cooldown window closes. Further
  /// mutations inside the same window fold into the pending refresh.
  fn defer_refresh(self: &Arc<Self>, delay: Duration) {
    if self.deferred.swap(true, Ordering::SeqCst) {
      return;
    }
    let this = Arc::clone(self);
    tokio::spawn(async move {
      tokio::time::sleep(delay).await;
      this.deferred.store(false, Ordering::SeqCst);
      this.refresh();
    });
  }

  fn spawn_fetch(self: &Arc<Self>) {
    let seq = self.next_seq.fetch_add(1, Ordering::SeqCst) + 1;
    let future = (self.fetcher)();
    let this = Arc::clone(self);

    tokio::spawn(async move {
      match future.await {
        Ok(collection) => {
          this.store.apply(seq, collection);
        }
        Err(e) => {
          tracing::warn!(
            entity_type = %this.entity_type,
            error = %e,
            "refresh failed; keeping last-known-good data"
          );
          this.store.mark_stale();
        }
      }

      let mut state = this.state.lock().expect("trigger state poisoned");
      *state = FetchState::Idle {
        last_done: Some(this.clock.now()),
      };
    });
  }

  /// Spawn the periodic refresh task. The first tick fires immediately (the
  /// initial load); the task ends once the trigger is dropped.
  pub fn run_periodic(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
    let weak = Arc::downgrade(self);

    tokio::spawn(async move {
      let mut ticker = tokio::time::interval(interval);
      ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

      loop {
        ticker.tick().await;
        match weak.upgrade() {
          Some(trigger) => {
            trigger.refresh();
          }
          None => break,
        }
      }
    })
  }

  /// Start observing cross-tab invalidation signals for this entity type.
  /// An observed marker refreshes the collection without re-signaling.
  pub fn observe_signals(self: &Arc<Self>) -> crate::signal::ObserverHandle {
    let weak: Weak<Self> = Arc::downgrade(self);

    self.signals.observe(&self.entity_type, move |_marker| {
      if let Some(trigger) = weak.upgrade() {
        trigger.refresh();
      }
    })
  }
}

impl<T> std::fmt::Debug for SyncTrigger<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("SyncTrigger")
      .field("entity_type", &self.entity_type)
      .field("state", &self.state.lock().ok())
      .finish_non_exhaustive()
  }
}
