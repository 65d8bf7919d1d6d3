//! Signal channel: one `observe` abstraction over two delivery strategies.

use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::storage::{SignalMarker, SignalStorage};
use crate::config::{SignalConfig, SignalStoreConfig};
use crate::error::Result;
use crate::signal::{MemorySignalStore, SqliteSignalStore};

/// Cross-tab invalidation signal channel.
///
/// `signal` is fire-and-forget; `observe` delivers markers event-driven when
/// the storage backend supports it and always keeps a polling fallback, so
/// a marker is picked up within one poll interval even when no event
/// arrives.
///
/// Each channel instance stands for one "tab" and stamps its markers with a
/// unique origin. Observers never consume markers written through the same
/// channel: the writing tab's trigger already refreshed its own store, and
/// eating the marker locally would starve the other tabs.
#[derive(Clone)]
pub struct SignalChannel {
  storage: Arc<dyn SignalStorage>,
  poll_interval: Duration,
  origin: Arc<str>,
}

impl SignalChannel {
  pub fn new(storage: Arc<dyn SignalStorage>, poll_interval: Duration) -> Self {
    Self {
      storage,
      poll_interval,
      origin: next_origin(),
    }
  }

  /// Build the channel from configuration, selecting the storage backend.
  pub fn from_config(config: &SignalConfig) -> Result<Self> {
    let storage: Arc<dyn SignalStorage> = match &config.store {
      SignalStoreConfig::Memory => Arc::new(MemorySignalStore::new()),
      SignalStoreConfig::Sqlite { path } => Arc::new(SqliteSignalStore::open(path.clone())?),
    };

    Ok(Self::new(storage, config.poll_interval()))
  }

  /// Marker key for an entity type, optionally narrowed to one record.
  fn marker_key(entity_type: &str, id: Option<i64>) -> String {
    match id {
      Some(id) => format!("{}-updated-{}", entity_type, id),
      None => format!("{}-updated", entity_type),
    }
  }

  /// Persist an invalidation marker with the current timestamp.
  ///
  /// The marker is a hint, not state: a failed write is logged and dropped,
  /// never propagated to the mutation path.
  pub fn signal(&self, entity_type: &str, id: Option<i64>) {
    let key = Self::marker_key(entity_type, id);
    let signaled_at = Utc::now().to_rfc3339();

    if let Err(e) = self.storage.put(&key, &signaled_at, &self.origin) {
      tracing::warn!(key = %key, error = %e, "failed to write invalidation marker");
    }
  }

  /// Watch for markers of one entity type written by other tabs.
  ///
  /// The handler runs for each observed marker after the marker has been
  /// removed from storage. Storage errors are logged and the observer keeps
  /// polling; a closed event feed degrades to polling-only. Observation
  /// stops when the returned handle is dropped.
  pub fn observe<F>(&self, entity_type: &str, on_signal: F) -> ObserverHandle
  where
    F: Fn(SignalMarker) + Send + Sync + 'static,
  {
    let storage = Arc::clone(&self.storage);
    let prefix = Self::marker_key(entity_type, None);
    let poll_interval = self.poll_interval;
    let origin = Arc::clone(&self.origin);

    let task = tokio::spawn(async move {
      let mut events = storage.events();
      if events.is_none() {
        tracing::debug!(prefix = %prefix, "signal events unavailable; polling only");
      }

      let mut poll = tokio::time::interval(poll_interval);
      poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

      loop {
        let mut feed_closed = false;
        match &mut events {
          Some(rx) => {
            tokio::select! {
              _ = poll.tick() => {}
              received = rx.recv() => match received {
                Ok(key) if key.starts_with(&prefix) => {}
                // Irrelevant key: wait for the next wakeup
                Ok(_) => continue,
                // Lagged: markers may be pending, drain them now
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => feed_closed = true,
              },
            }
          }
          None => {
            poll.tick().await;
          }
        }
        if feed_closed {
          events = None;
          continue;
        }

        match storage.take_matching(&prefix, &origin) {
          Ok(markers) => {
            for marker in markers {
              tracing::debug!(key = %marker.key, "invalidation signal observed");
              on_signal(marker);
            }
          }
          Err(e) => {
            tracing::warn!(prefix = %prefix, error = %e, "failed to poll signal markers");
          }
        }
      }
    });

    ObserverHandle { task }
  }
}

/// Unique per-channel origin, so two tabs in one process stay distinct and
/// two processes sharing a SQLite store do too.
fn next_origin() -> Arc<str> {
  static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(0);
  let n = NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed);
  format!("tab-{}-{}", std::process::id(), n).into()
}

/// Stops the observation task when dropped.
#[derive(Debug)]
pub struct ObserverHandle {
  task: JoinHandle<()>,
}

impl Drop for ObserverHandle {
  fn drop(&mut self) {
    self.task.abort();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicIsize, AtomicUsize, Ordering};
  use std::sync::Mutex;

  /// Two channels over one store, standing for two tabs.
  fn tab_pair(poll: Duration) -> (SignalChannel, SignalChannel) {
    let storage: Arc<dyn SignalStorage> = Arc::new(MemorySignalStore::new());
    (
      SignalChannel::new(Arc::clone(&storage), poll),
      SignalChannel::new(storage, poll),
    )
  }

  #[test]
  fn marker_keys_follow_the_namespace_format() {
    assert_eq!(
      SignalChannel::marker_key("client", Some(5)),
      "client-updated-5"
    );
    assert_eq!(SignalChannel::marker_key("sim-card", None), "sim-card-updated");
  }

  #[tokio::test]
  async fn signal_is_delivered_within_one_poll_interval() {
    let (writer, observer) = tab_pair(Duration::from_millis(20));
    let seen = Arc::new(Mutex::new(Vec::new()));

    let s = Arc::clone(&seen);
    let _observer = observer.observe("client", move |marker| {
      s.lock().unwrap().push(marker);
    });

    writer.signal("client", Some(5));
    tokio::time::sleep(Duration::from_millis(100)).await;

    let markers = seen.lock().unwrap();
    assert_eq!(markers.len(), 1);
    assert_eq!(markers[0].key, "client-updated-5");
    assert_eq!(markers[0].record_id(), Some(5));
    // Timestamp is valid RFC 3339
    assert!(chrono::DateTime::parse_from_rfc3339(&markers[0].signaled_at).is_ok());
  }

  #[tokio::test]
  async fn polling_fallback_works_without_events() {
    // SQLite backend has no event feed; delivery must still happen.
    let path = std::env::temp_dir().join(format!(
      "crmsync-channel-test-{}.db",
      std::process::id()
    ));
    std::fs::remove_file(&path).ok();

    let store: Arc<dyn SignalStorage> =
      Arc::new(SqliteSignalStore::open(Some(path.clone())).unwrap());
    let writer = SignalChannel::new(Arc::clone(&store), Duration::from_millis(20));
    let observer = SignalChannel::new(store, Duration::from_millis(20));

    let count = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&count);
    let _observer = observer.observe("sim-card", move |_| {
      c.fetch_add(1, Ordering::SeqCst);
    });

    writer.signal("sim-card", Some(7));
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(count.load(Ordering::SeqCst), 1);
    std::fs::remove_file(path).ok();
  }

  #[tokio::test]
  async fn signaling_tab_never_consumes_its_own_marker() {
    // Both tabs observing, as two started tabs would; the writer's observer
    // must leave the marker for the other tab every time.
    for _ in 0..20 {
      let (tab_a, tab_b) = tab_pair(Duration::from_millis(10));

      let a_seen = Arc::new(AtomicUsize::new(0));
      let b_seen = Arc::new(AtomicUsize::new(0));
      let a = Arc::clone(&a_seen);
      let _oa = tab_a.observe("client", move |_| {
        a.fetch_add(1, Ordering::SeqCst);
      });
      let b = Arc::clone(&b_seen);
      let _ob = tab_b.observe("client", move |_| {
        b.fetch_add(1, Ordering::SeqCst);
      });

      tab_a.signal("client", Some(5));
      tokio::time::sleep(Duration::from_millis(60)).await;

      assert_eq!(a_seen.load(Ordering::SeqCst), 0);
      assert_eq!(b_seen.load(Ordering::SeqCst), 1);
    }
  }

  #[tokio::test]
  async fn signal_fires_at_most_once_across_observers() {
    let storage: Arc<dyn SignalStorage> = Arc::new(MemorySignalStore::new());
    let writer = SignalChannel::new(Arc::clone(&storage), Duration::from_millis(10));
    let channel_a = SignalChannel::new(Arc::clone(&storage), Duration::from_millis(10));
    let channel_b = SignalChannel::new(Arc::clone(&storage), Duration::from_millis(10));

    let total = Arc::new(AtomicUsize::new(0));
    let ta = Arc::clone(&total);
    let _oa = channel_a.observe("client", move |_| {
      ta.fetch_add(1, Ordering::SeqCst);
    });
    let tb = Arc::clone(&total);
    let _ob = channel_b.observe("client", move |_| {
      tb.fetch_add(1, Ordering::SeqCst);
    });

    writer.signal("client", None);
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Consumed by whichever other tab took it first, never both
    assert_eq!(total.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn event_delivery_beats_a_slow_poll() {
    // Poll so slowly that only the event path can deliver in time.
    let (writer, observer) = tab_pair(Duration::from_secs(60));
    let count = Arc::new(AtomicUsize::new(0));

    let c = Arc::clone(&count);
    let _observer = observer.observe("client", move |_| {
      c.fetch_add(1, Ordering::SeqCst);
    });

    // Let the observer get past its first immediate tick
    tokio::time::sleep(Duration::from_millis(50)).await;

    writer.signal("client", Some(1));
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(count.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn observer_only_sees_its_entity_type() {
    let (writer, observer) = tab_pair(Duration::from_millis(10));
    let count = Arc::new(AtomicUsize::new(0));

    let c = Arc::clone(&count);
    let _observer = observer.observe("client", move |_| {
      c.fetch_add(1, Ordering::SeqCst);
    });

    writer.signal("sim-card", Some(3));
    tokio::time::sleep(Duration::from_millis(60)).await;

    assert_eq!(count.load(Ordering::SeqCst), 0);
  }

  #[tokio::test]
  async fn dropped_observer_stops_consuming() {
    let storage: Arc<dyn SignalStorage> = Arc::new(MemorySignalStore::new());
    let writer = SignalChannel::new(Arc::clone(&storage), Duration::from_millis(10));
    let channel = SignalChannel::new(Arc::clone(&storage), Duration::from_millis(10));

    let observer = channel.observe("client", |_| {});
    drop(observer);
    tokio::time::sleep(Duration::from_millis(30)).await;

    writer.signal("client", None);
    tokio::time::sleep(Duration::from_millis(60)).await;

    // Nobody consumed the marker
    let remaining = storage.take_matching("client-updated", "elsewhere").unwrap();
    assert_eq!(remaining.len(), 1);
  }

  /// Backend whose event feed is closed and whose operations fail a set
  /// number of times before recovering.
  struct FlakyStore {
    inner: MemorySignalStore,
    put_failures: AtomicIsize,
    take_failures: AtomicIsize,
  }

  impl FlakyStore {
    fn new(put_failures: isize, take_failures: isize) -> Self {
      Self {
        inner: MemorySignalStore::new(),
        put_failures: AtomicIsize::new(put_failures),
        take_failures: AtomicIsize::new(take_failures),
      }
    }
  }

  impl SignalStorage for FlakyStore {
    fn put(&self, key: &str, signaled_at: &str, origin: &str) -> crate::error::Result<()> {
      if self.put_failures.fetch_sub(1, Ordering::SeqCst) > 0 {
        return Err(crate::error::SyncError::Signal("marker write refused".into()));
      }
      self.inner.put(key, signaled_at, origin)
    }

    fn take_matching(
      &self,
      prefix: &str,
      exclude_origin: &str,
    ) -> crate::error::Result<Vec<SignalMarker>> {
      if self.take_failures.fetch_sub(1, Ordering::SeqCst) > 0 {
        return Err(crate::error::SyncError::Signal("marker read refused".into()));
      }
      self.inner.take_matching(prefix, exclude_origin)
    }

    fn events(&self) -> Option<broadcast::Receiver<String>> {
      // A feed that closes as soon as the observer starts listening
      let (tx, rx) = broadcast::channel(1);
      drop(tx);
      Some(rx)
    }
  }

  #[tokio::test]
  async fn storage_errors_degrade_to_polling_without_stopping_the_observer() {
    let storage: Arc<dyn SignalStorage> = Arc::new(FlakyStore::new(1, 3));
    let writer = SignalChannel::new(Arc::clone(&storage), Duration::from_millis(10));
    let observer = SignalChannel::new(storage, Duration::from_millis(10));

    let count = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&count);
    let _observer = observer.observe("client", move |_| {
      c.fetch_add(1, Ordering::SeqCst);
    });

    // First write is refused: logged, not propagated, no panic
    writer.signal("client", Some(1));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(count.load(Ordering::SeqCst), 0);

    // The feed closed immediately and the first polls errored; once storage
    // recovers, the surviving polling loop still delivers the marker.
    writer.signal("client", Some(2));
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(count.load(Ordering::SeqCst), 1);
  }
}
