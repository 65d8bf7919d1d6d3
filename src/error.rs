//! Error taxonomy for the synchronization layer.

/// Errors surfaced by the synchronization layer.
///
/// Fetch-side errors (`Network`, `Parse`) are caught at the fetcher boundary
/// and converted into a stale notification; they never reach subscriber code
/// as panics or unhandled results. `Signal` errors degrade the invalidation
/// channel to polling-only mode.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
  /// Transport failure or non-2xx HTTP response.
  #[error("network error (status {status:?}): {message}")]
  Network {
    /// HTTP status code, if a response was received at all.
    status: Option<u16>,
    message: String,
  },

  /// The response body was not a valid entity collection.
  #[error("failed to parse response body: {0}")]
  Parse(#[from] serde_json::Error),

  /// The signal storage is unavailable (e.g. access denied, corrupt file).
  #[error("signal storage unavailable: {0}")]
  Signal(String),

  /// Invalid or missing configuration.
  #[error("configuration error: {0}")]
  Config(String),
}

impl SyncError {
  /// Status code carried by a `Network` error, if any.
  pub fn status(&self) -> Option<u16> {
    match self {
      SyncError::Network { status, .. } => *status,
      _ => None,
    }
  }
}

pub type Result<T, E = SyncError> = std::result::Result<T, E>;
