// Hardware record DTO

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// A physical machine known to the engine.
///
/// The `data` document is opaque to the server apart from the network
/// interface fields used for worker lookup and template rendering.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Hardware {
    /// Stable operator-assigned identifier.
    #[schema(example = "machine-ewr1-07")]
    pub id: String,
    /// Opaque machine description (interfaces, metadata, ...).
    #[schema(value_type = Object)]
    pub data: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set when the record has been tombstoned.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}
