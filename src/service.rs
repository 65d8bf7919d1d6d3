//! Application-root wiring for the synchronization layer.
//!
//! One `SyncService` per application root, passed to the components that
//! need it. It replaces the global-singleton managers of earlier designs
//! with an explicit, injectable instance while keeping the
//! one-instance-per-process semantics.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::entities::{Client, SimCard, SyncEntity};
use crate::error::Result;
use crate::fetch::ApiClient;
use crate::signal::{ObserverHandle, SignalChannel};
use crate::store::CacheStore;
use crate::trigger::SyncTrigger;

/// Context-scoped synchronization service for the CRM's entity collections.
pub struct SyncService {
  api: ApiClient,
  signals: SignalChannel,
  config: Config,
  clients: Arc<SyncTrigger<Client>>,
  sim_cards: Arc<SyncTrigger<SimCard>>,
  tasks: Vec<JoinHandle<()>>,
  observers: Vec<ObserverHandle>,
}

impl SyncService {
  /// Build the service from configuration. Background refresh does not run
  /// until [`start`](Self::start) is called.
  pub fn new(config: Config) -> Result<Self> {
    let signals = SignalChannel::from_config(&config.signals)?;
    Self::with_channel(config, signals)
  }

  /// Build the service around an existing signal channel. Lets several
  /// contexts ("tabs") of one process share marker storage.
  pub fn with_channel(config: Config, signals: SignalChannel) -> Result<Self> {
    let api = ApiClient::new(&config)?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let cooldown = config.sync.cooldown();

    let clients = build_trigger::<Client>(&api, &signals, &clock, cooldown);
    let sim_cards = build_trigger::<SimCard>(&api, &signals, &clock, cooldown);

    Ok(Self {
      api,
      signals,
      config,
      clients,
      sim_cards,
      tasks: Vec::new(),
      observers: Vec::new(),
    })
  }

  /// Launch periodic refresh and cross-tab signal observation for both
  /// entity types. The first periodic tick runs immediately and performs
  /// the initial load.
  pub fn start(&mut self) {
    if !self.tasks.is_empty() {
      return;
    }

    self
      .tasks
      .push(self.clients.run_periodic(self.config.sync.client_interval()));
    self.tasks.push(
      self
        .sim_cards
        .run_periodic(self.config.sync.sim_card_interval()),
    );

    self.observers.push(self.clients.observe_signals());
    self.observers.push(self.sim_cards.observe_signals());
  }

  /// Sync handle for the client collection.
  pub fn clients(&self) -> &Arc<SyncTrigger<Client>> {
    &self.clients
  }

  /// Sync handle for the SIM card collection.
  pub fn sim_cards(&self) -> &Arc<SyncTrigger<SimCard>> {
    &self.sim_cards
  }

  /// The shared invalidation channel.
  pub fn signals(&self) -> &SignalChannel {
    &self.signals
  }

  /// Register an additional entity type with its own refresh interval.
  /// The caller owns the returned trigger and its background handles.
  pub fn register<T: SyncEntity>(
    &self,
    interval: Duration,
  ) -> (Arc<SyncTrigger<T>>, JoinHandle<()>, ObserverHandle) {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let trigger = build_trigger::<T>(&self.api, &self.signals, &clock, self.config.sync.cooldown());
    let task = trigger.run_periodic(interval);
    let observer = trigger.observe_signals();
    (trigger, task, observer)
  }
}

impl Drop for SyncService {
  fn drop(&mut self) {
    for task in &self.tasks {
      task.abort();
    }
  }
}

fn build_trigger<T: SyncEntity>(
  api: &ApiClient,
  signals: &SignalChannel,
  clock: &Arc<dyn Clock>,
  cooldown: Duration,
) -> Arc<SyncTrigger<T>> {
  let api = api.clone();
  SyncTrigger::new(
    T::entity_type(),
    Arc::new(CacheStore::new()),
    signals.clone(),
    Arc::clone(clock),
    cooldown,
    move || {
      let api = api.clone();
      async move { api.fetch_collection::<T>().await }
    },
  )
}
