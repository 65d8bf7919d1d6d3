//! Signal marker storage trait and backends.

use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use tokio::sync::broadcast;

use crate::error::{Result, SyncError};

/// A persisted invalidation marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalMarker {
  /// Namespaced key, e.g. "client-updated-5" or "client-updated".
  pub key: String,
  /// ISO timestamp written by the signaling side.
  pub signaled_at: String,
  /// Channel instance that wrote the marker.
  pub origin: String,
}

impl SignalMarker {
  /// Record id suffix of the key, when the signal targets a single record.
  pub fn record_id(&self) -> Option<i64> {
    self
      .key
      .rsplit_once("-updated-")
      .and_then(|(_, id)| id.parse().ok())
  }
}

/// Storage backend for invalidation markers.
///
/// Writes are last-write-wins with no locking; `take_matching` is the only
/// consumer-side operation and removes what it returns, so each marker is
/// observed at most once. Markers carry the writing channel's origin and a
/// take skips markers from its own origin: the writing tab already refreshed
/// itself, and its observer must not race the marker away from other tabs.
pub trait SignalStorage: Send + Sync {
  /// Persist a marker. Overwrites any existing marker under the same key.
  fn put(&self, key: &str, signaled_at: &str, origin: &str) -> Result<()>;

  /// Atomically remove and return every marker whose key starts with
  /// `prefix`, except those written by `exclude_origin` — a tab leaves its
  /// own markers in place for the other tabs to consume.
  fn take_matching(&self, prefix: &str, exclude_origin: &str) -> Result<Vec<SignalMarker>>;

  /// Feed of keys as they are written, for event-driven delivery.
  ///
  /// Returns `None` when the backend cannot deliver events (e.g. a file
  /// shared between processes); observers then rely on polling alone.
  fn events(&self) -> Option<broadcast::Receiver<String>>;
}

/// In-process marker store with an event feed.
pub struct MemorySignalStore {
  markers: Mutex<HashMap<String, (String, String)>>,
  events: broadcast::Sender<String>,
}

impl MemorySignalStore {
  pub fn new() -> Self {
    let (events, _) = broadcast::channel(64);
    Self {
      markers: Mutex::new(HashMap::new()),
      events,
    }
  }
}

impl Default for MemorySignalStore {
  fn default() -> Self {
    Self::new()
  }
}

impl SignalStorage for MemorySignalStore {
  fn put(&self, key: &str, signaled_at: &str, origin: &str) -> Result<()> {
    self
      .markers
      .lock()
      .map_err(|e| SyncError::Signal(format!("marker map poisoned: {}", e)))?
      .insert(key.to_string(), (signaled_at.to_string(), origin.to_string()));

    // No receivers is fine; polling still picks the marker up.
    let _ = self.events.send(key.to_string());
    Ok(())
  }

  fn take_matching(&self, prefix: &str, exclude_origin: &str) -> Result<Vec<SignalMarker>> {
    let mut markers = self
      .markers
      .lock()
      .map_err(|e| SyncError::Signal(format!("marker map poisoned: {}", e)))?;

    let keys: Vec<String> = markers
      .iter()
      .filter(|(k, (_, origin))| k.starts_with(prefix) && origin != exclude_origin)
      .map(|(k, _)| k.clone())
      .collect();

    Ok(
      keys
        .into_iter()
        .filter_map(|key| {
          markers.remove(&key).map(|(signaled_at, origin)| SignalMarker {
            key,
            signaled_at,
            origin,
          })
        })
        .collect(),
    )
  }

  fn events(&self) -> Option<broadcast::Receiver<String>> {
    Some(self.events.subscribe())
  }
}

/// Schema for the signal marker table.
const SIGNAL_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS signal_markers (
    key TEXT PRIMARY KEY,
    signaled_at TEXT NOT NULL,
    origin TEXT NOT NULL DEFAULT ''
);
"#;

/// SQLite-backed marker store shared between processes of the same profile.
///
/// Polling-only: SQLite cannot push change events to other processes, so
/// `events` returns `None` and observers fall back to the polling path.
pub struct SqliteSignalStore {
  conn: Mutex<Connection>,
}

impl SqliteSignalStore {
  /// Open (or create) the marker database.
  pub fn open(path: Option<PathBuf>) -> Result<Self> {
    let path = match path {
      Some(p) => p,
      None => Self::default_path()?,
    };

    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| SyncError::Signal(format!("failed to create signal directory: {}", e)))?;
    }

    let conn = Connection::open(&path).map_err(|e| {
      SyncError::Signal(format!(
        "failed to open signal database at {}: {}",
        path.display(),
        e
      ))
    })?;

    conn
      .execute_batch(SIGNAL_SCHEMA)
      .map_err(|e| SyncError::Signal(format!("failed to run signal migrations: {}", e)))?;

    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| SyncError::Signal("could not determine data directory".to_string()))?;

    Ok(data_dir.join("crmsync").join("signals.db"))
  }
}

impl SignalStorage for SqliteSignalStore {
  fn put(&self, key: &str, signaled_at: &str, origin: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| SyncError::Signal(format!("lock poisoned: {}", e)))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO signal_markers (key, signaled_at, origin) VALUES (?, ?, ?)",
        params![key, signaled_at, origin],
      )
      .map_err(|e| SyncError::Signal(format!("failed to store marker: {}", e)))?;

    Ok(())
  }

  fn take_matching(&self, prefix: &str, exclude_origin: &str) -> Result<Vec<SignalMarker>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| SyncError::Signal(format!("lock poisoned: {}", e)))?;

    let pattern = format!("{}%", prefix.replace('%', "").replace('_', "\\_"));

    // Single DELETE..RETURNING so two processes polling at once never both
    // observe the same marker.
    let mut stmt = conn
      .prepare(
        "DELETE FROM signal_markers WHERE key LIKE ? ESCAPE '\\' AND origin <> ? \
         RETURNING key, signaled_at, origin",
      )
      .map_err(|e| SyncError::Signal(format!("failed to prepare marker query: {}", e)))?;

    let markers: Vec<SignalMarker> = stmt
      .query_map(params![pattern, exclude_origin], |row| {
        Ok(SignalMarker {
          key: row.get(0)?,
          signaled_at: row.get(1)?,
          origin: row.get(2)?,
        })
      })
      .map_err(|e| SyncError::Signal(format!("failed to take markers: {}", e)))?
      .filter_map(|r| r.ok())
      .collect();

    Ok(markers)
  }

  fn events(&self) -> Option<broadcast::Receiver<String>> {
    None
  }
}
