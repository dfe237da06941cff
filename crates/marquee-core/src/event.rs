use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ids::{ConnectionId, EventId};
use crate::role::Role;

/// Immutable push-notification unit. Created at broadcast time, serialized
/// once per receiving connection, never mutated.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PushEvent {
    pub id: EventId,
    pub event_type: String,
    pub payload: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
    pub retry_ms: Option<u64>,
}

impl PushEvent {
    pub fn new(event_type: impl Into<String>, payload: Map<String, Value>) -> Self {
        Self {
            id: EventId::new(),
            event_type: event_type.into(),
            payload,
            timestamp: Utc::now(),
            retry_ms: None,
        }
    }

    pub fn with_retry(mut self, retry_ms: u64) -> Self {
        self.retry_ms = Some(retry_ms);
        self
    }

    /// Synthetic keep-alive emitted by an idle stream writer.
    pub fn ping() -> Self {
        Self::new("ping", Map::new())
    }

    /// Handshake event confirming a freshly opened stream.
    pub fn connected(connection_id: &ConnectionId, role: Role) -> Self {
        let mut payload = Map::new();
        payload.insert(
            "connection_id".into(),
            Value::String(connection_id.as_str().to_string()),
        );
        payload.insert("role".into(), Value::String(role.as_str().to_string()));
        Self::new("connected", payload)
    }

    /// Render the wire frame: id line, event line, optional retry line, one
    /// data line carrying the payload merged with the RFC 3339 timestamp,
    /// then a blank-line terminator.
    pub fn to_frame(&self) -> String {
        let mut data = self.payload.clone();
        data.insert(
            "timestamp".into(),
            Value::String(self.timestamp.to_rfc3339()),
        );
        let data_json =
            serde_json::to_string(&Value::Object(data)).unwrap_or_else(|_| "{}".to_string());

        let mut frame = String::with_capacity(data_json.len() + 64);
        frame.push_str("id: ");
        frame.push_str(self.id.as_str());
        frame.push('\n');
        frame.push_str("event: ");
        frame.push_str(&self.event_type);
        frame.push('\n');
        if let Some(retry) = self.retry_ms {
            frame.push_str(&format!("retry: {retry}\n"));
        }
        frame.push_str("data: ");
        frame.push_str(&data_json);
        frame.push_str("\n\n");
        frame
    }
}
