use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::RecordPayload;
use crate::models::{Category, HelpRecord, RecordError, RecordKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
}

/// `{ eventType, table, new }` as emitted by the backend. `new` always holds
/// the complete post-change row, never a diff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEventPayload {
    #[serde(rename = "eventType")]
    pub event_type: ChangeKind,
    pub table: String,
    pub new: RecordPayload,
}

/// A change event after the table name has been resolved to a category and
/// the row has been validated.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub record: HelpRecord,
}

impl ChangeEvent {
    pub fn insert(record: HelpRecord) -> Self {
        Self { kind: ChangeKind::Insert, record }
    }

    pub fn update(record: HelpRecord) -> Self {
        Self { kind: ChangeKind::Update, record }
    }

    pub fn key(&self) -> RecordKey {
        self.record.key()
    }

    pub fn from_payload(payload: ChangeEventPayload) -> Result<Self, RecordError> {
        let category = Category::from_table(&payload.table)?;
        let record = HelpRecord::from_payload(category, payload.new)?;
        Ok(Self {
            kind: payload.event_type,
            record,
        })
    }

    pub fn to_payload(&self) -> ChangeEventPayload {
        ChangeEventPayload {
            event_type: self.kind,
            table: self.record.category().table().to_string(),
            new: self.record.to_payload(),
        }
    }
}

/// Frames sent over the realtime WebSocket, server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Connection accepted
    Ready { connection_id: Uuid },

    /// The set of tables this connection now receives changes for
    Subscribed { tables: Vec<String> },

    /// A row was inserted or updated
    Change(ChangeEventPayload),
}

impl GatewayEvent {
    /// Returns the table if this event is scoped to one.
    /// Events that return `None` are connection-level and always delivered.
    pub fn table(&self) -> Option<&str> {
        match self {
            Self::Change(payload) => Some(&payload.table),
            _ => None,
        }
    }
}

/// Frames sent over the realtime WebSocket, client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Start receiving changes for these tables (added to the current set)
    Subscribe { tables: Vec<String> },

    /// Stop receiving changes for these tables
    Unsubscribe { tables: Vec<String> },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{HelpKind, RequestKind, Status};

    const UPDATE_FRAME: &str = r#"{
        "type": "Change",
        "data": {
            "eventType": "UPDATE",
            "table": "requests",
            "new": {
                "id": 1,
                "name": "Kamala",
                "phone": "0712345678",
                "type": "food",
                "location": "Malabe",
                "description": "Family of five",
                "latitude": null,
                "longitude": null,
                "created_at": "2025-11-28T09:15:00+05:30",
                "status": "completed"
            }
        }
    }"#;

    #[test]
    fn change_frame_normalizes_to_category_record() {
        let frame: GatewayEvent = serde_json::from_str(UPDATE_FRAME).unwrap();
        assert_eq!(frame.table(), Some("requests"));

        let GatewayEvent::Change(payload) = frame else {
            panic!("expected a change frame");
        };
        let event = ChangeEvent::from_payload(payload).unwrap();

        assert_eq!(event.kind, ChangeKind::Update);
        assert_eq!(event.record.kind, HelpKind::Request(RequestKind::Food));
        assert_eq!(event.record.status, Status::Completed);
        assert_eq!(event.record.coordinates, None);
        assert_eq!(event.record.created_at.to_rfc3339(), "2025-11-28T03:45:00+00:00");
    }

    #[test]
    fn change_for_unknown_table_is_rejected() {
        let mut payload = match serde_json::from_str::<GatewayEvent>(UPDATE_FRAME).unwrap() {
            GatewayEvent::Change(p) => p,
            other => panic!("unexpected frame {:?}", other),
        };
        payload.table = "volunteers".into();
        assert_eq!(
            ChangeEvent::from_payload(payload),
            Err(RecordError::UnknownTable("volunteers".into()))
        );
    }

    #[test]
    fn subscribe_command_wire_shape() {
        let cmd = GatewayCommand::Subscribe {
            tables: vec!["offers".into()],
        };
        let json = serde_json::to_value(&cmd).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "type": "Subscribe", "data": { "tables": ["offers"] } })
        );
    }
}
