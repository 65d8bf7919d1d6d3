//! CRM entity types synchronized by this crate.

use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Trait for entity types whose collections can be kept in sync.
///
/// Implementors name their entity type (used to namespace invalidation
/// signal markers) and the REST collection endpoint that is authoritative
/// for them.
pub trait SyncEntity: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
  /// Unique integer identifier of this record.
  fn id(&self) -> i64;

  /// Entity type name used in signal keys (e.g. "client", "sim-card").
  fn entity_type() -> &'static str;

  /// Path of the collection endpoint, relative to the API base URL.
  fn collection_path() -> &'static str;
}

/// A client managed by a sales agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Client {
  pub id: i64,
  pub name: String,
  pub phone: Option<String>,
  pub email: Option<String>,
  pub status: String,
  /// Sales agent this client is assigned to
  pub vendor_id: Option<i64>,
  pub updated_at: Option<String>,
}

impl SyncEntity for Client {
  fn id(&self) -> i64 {
    self.id
  }

  fn entity_type() -> &'static str {
    "client"
  }

  fn collection_path() -> &'static str {
    "/api/clients"
  }
}

/// A SIM card in inventory, optionally assigned to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimCard {
  pub id: i64,
  pub iccid: String,
  pub msisdn: Option<String>,
  pub status: String,
  pub client_id: Option<i64>,
  pub vendor_id: Option<i64>,
  pub updated_at: Option<String>,
}

impl SyncEntity for SimCard {
  fn id(&self) -> i64 {
    self.id
  }

  fn entity_type() -> &'static str {
    "sim-card"
  }

  fn collection_path() -> &'static str {
    "/api/sim-cards"
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn client_roundtrips_through_json() {
    let json = r#"{"id":5,"name":"Durand","phone":"+33612345678","email":null,"status":"active","vendor_id":2,"updated_at":"2026-08-01T10:00:00Z"}"#;

    let client: Client = serde_json::from_str(json).unwrap();
    assert_eq!(client.id(), 5);
    assert_eq!(client.status, "active");

    let back = serde_json::to_string(&client).unwrap();
    let reparsed: Client = serde_json::from_str(&back).unwrap();
    assert_eq!(reparsed, client);
  }

  #[test]
  fn entity_types_are_distinct() {
    assert_ne!(Client::entity_type(), SimCard::entity_type());
    assert_ne!(Client::collection_path(), SimCard::collection_path());
  }
}
