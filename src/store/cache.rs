//! Collection cache with subscriber fan-out.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

/// A refreshed (or stale-flagged) collection delivered to subscribers.
#[derive(Debug)]
pub struct SyncUpdate<T> {
  /// The full collection. On a stale notification this is the
  /// last-known-good data, unchanged.
  pub collection: Arc<Vec<T>>,
  /// True when the latest refresh attempt failed and the collection is
  /// potentially outdated.
  pub is_stale: bool,
}

impl<T> Clone for SyncUpdate<T> {
  fn clone(&self) -> Self {
    Self {
      collection: Arc::clone(&self.collection),
      is_stale: self.is_stale,
    }
  }
}

type SubscriberFn<T> = dyn Fn(&SyncUpdate<T>) + Send + Sync;
type SubscriberList<T> = Mutex<Vec<(u64, Arc<SubscriberFn<T>>)>>;

/// Guard returned by [`CacheStore::subscribe`]; dropping it deregisters the
/// callback. Tie its lifetime to the owning component.
pub struct Subscription {
  cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
  /// Deregister explicitly. Equivalent to dropping the guard.
  pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
  fn drop(&mut self) {
    if let Some(cancel) = self.cancel.take() {
      cancel();
    }
  }
}

impl std::fmt::Debug for Subscription {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Subscription")
      .field("active", &self.cancel.is_some())
      .finish()
  }
}

struct Inner<T> {
  collection: Arc<Vec<T>>,
  /// Sequence number of the last applied fetch. Zero means never fetched.
  seq: u64,
  stale: bool,
}

/// Holds the latest known collection for one entity type and notifies
/// subscribers on change.
pub struct CacheStore<T> {
  inner: Mutex<Inner<T>>,
  subscribers: Arc<SubscriberList<T>>,
  next_subscriber_id: AtomicU64,
}

impl<T: Send + Sync + 'static> CacheStore<T> {
  pub fn new() -> Self {
    Self {
      inner: Mutex::new(Inner {
        collection: Arc::new(Vec::new()),
        seq: 0,
        stale: false,
      }),
      subscribers: Arc::new(Mutex::new(Vec::new())),
      next_subscriber_id: AtomicU64::new(0),
    }
  }

  /// Register a callback invoked with every update. Callbacks are called in
  /// registration order; the returned guard deregisters on drop.
  pub fn subscribe<F>(&self, callback: F) -> Subscription
  where
    F: Fn(&SyncUpdate<T>) + Send + Sync + 'static,
  {
    let id = self.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
    self
      .subscribers
      .lock()
      .expect("subscriber list poisoned")
      .push((id, Arc::new(callback)));

    let list: Weak<SubscriberList<T>> = Arc::downgrade(&self.subscribers);
    Subscription {
      cancel: Some(Box::new(move || {
        if let Some(list) = list.upgrade() {
          if let Ok(mut subscribers) = list.lock() {
            subscribers.retain(|(sub_id, _)| *sub_id != id);
          }
        }
      })),
    }
  }

  /// The most recently applied collection, empty if never fetched.
  ///
  /// Returns the same `Arc` until the next successful `apply`, so repeated
  /// calls without an intervening update are identical.
  pub fn last_data(&self) -> Arc<Vec<T>> {
    Arc::clone(&self.inner.lock().expect("cache store poisoned").collection)
  }

  /// Whether the latest refresh attempt failed.
  pub fn is_stale(&self) -> bool {
    self.inner.lock().expect("cache store poisoned").stale
  }

  /// Sequence number of the last applied fetch.
  pub fn last_seq(&self) -> u64 {
    self.inner.lock().expect("cache store poisoned").seq
  }

  /// Replace the collection with the result of fetch number `seq` and notify
  /// subscribers.
  ///
  /// Newest-wins by sequence number: a result whose `seq` is not greater
  /// than the last applied one is discarded (out-of-order completion of a
  /// superseded fetch) and `false` is returned.
  pub fn apply(&self, seq: u64, collection: Vec<T>) -> bool {
    let update = {
      let mut inner = self.inner.lock().expect("cache store poisoned");
      if seq <= inner.seq {
        tracing::debug!(seq, last_seq = inner.seq, "discarding stale fetch result");
        return false;
      }
      inner.seq = seq;
      inner.stale = false;
      inner.collection = Arc::new(collection);
      SyncUpdate {
        collection: Arc::clone(&inner.collection),
        is_stale: false,
      }
    };

    self.notify(&update);
    true
  }

  /// Flag the cached collection as potentially outdated after a failed
  /// refresh. The data itself is retained and re-delivered unchanged.
  pub fn mark_stale(&self) {
    let update = {
      let mut inner = self.inner.lock().expect("cache store poisoned");
      inner.stale = true;
      SyncUpdate {
        collection: Arc::clone(&inner.collection),
        is_stale: true,
      }
    };

    self.notify(&update);
  }

  /// Invoke every registered callback with `update`, in registration order.
  /// A panicking callback is logged and skipped; the rest still run.
  fn notify(&self, update: &SyncUpdate<T>) {
    let callbacks: Vec<Arc<SubscriberFn<T>>> = self
      .subscribers
      .lock()
      .expect("subscriber list poisoned")
      .iter()
      .map(|(_, cb)| Arc::clone(cb))
      .collect();

    for callback in callbacks {
      if catch_unwind(AssertUnwindSafe(|| callback(update))).is_err() {
        tracing::warn!("subscriber callback panicked during notify");
      }
    }
  }

  #[cfg(test)]
  pub(crate) fn subscriber_count(&self) -> usize {
    self.subscribers.lock().unwrap().len()
  }
}

impl<T: Send + Sync + 'static> Default for CacheStore<T> {
  fn default() -> Self {
    Self::new()
  }
}
