use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::Status;

// -- Records --

/// A row of the `requests` or `offers` table as it travels over the wire.
/// The category is implied by the table, so it is not part of the row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordPayload {
    pub id: i64,
    pub name: String,
    pub phone: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub location: String,
    pub description: String,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub status: Status,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewRecordRequest {
    pub name: String,
    pub phone: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub location: String,
    pub description: String,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateStatusRequest {
    pub status: Status,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
