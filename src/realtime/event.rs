use serde::{Deserialize, Serialize};

/// Kind of a pushed queue event, `type` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    QueueUpdate,
    SwitchCompleted,
    SwitchFailed,
    QueueStatus,
    Heartbeat,
    Pong,
}

/// Event time as sent by the server: epoch millis or an RFC 3339 string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventTimestamp {
    Millis(u64),
    Text(String),
}

/// One inbound frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueUpdateEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<EventTimestamp>,
}

impl QueueUpdateEvent {
    /// A bare event of `kind` with every optional field empty.
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            request_id: None,
            status: None,
            message: None,
            pending_count: None,
            email: None,
            timestamp: None,
        }
    }

    /// `queue_status` carrying the server's pending count.
    pub fn queue_status(pending_count: u32) -> Self {
        Self { pending_count: Some(pending_count), ..Self::new(EventKind::QueueStatus) }
    }

    pub fn parse(frame: &str) -> Result<Self, ParseError> {
        Ok(serde_json::from_str(frame)?)
    }

    pub fn to_json(&self) -> String {
        // a struct of strings and integers always serializes
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// An inbound frame that is not a valid [`QueueUpdateEvent`]. Logged and dropped.
#[derive(Debug, thiserror::Error)]
#[error("malformed queue event: {0}")]
pub struct ParseError(#[from] serde_json::Error);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_camel_case_frame() {
        let frame = r#"{"type":"switch_completed","requestId":42,"status":"done",
            "email":"e@x.com","timestamp":"2026-10-18T09:00:00Z"}"#;
        let event = QueueUpdateEvent::parse(frame).unwrap();
        assert_eq!(event.kind, EventKind::SwitchCompleted);
        assert_eq!(event.request_id, Some(42));
        assert_eq!(event.email.as_deref(), Some("e@x.com"));
        assert_eq!(event.timestamp, Some(EventTimestamp::Text("2026-10-18T09:00:00Z".into())));
    }

    #[test]
    fn numeric_timestamp_and_pending_count() {
        let event =
            QueueUpdateEvent::parse(r#"{"type":"queue_status","pendingCount":7,"timestamp":1700000000000}"#)
                .unwrap();
        assert_eq!(event.pending_count, Some(7));
        assert_eq!(event.timestamp, Some(EventTimestamp::Millis(1_700_000_000_000)));
    }

    #[test]
    fn rejects_unknown_type_and_garbage() {
        assert!(QueueUpdateEvent::parse(r#"{"type":"reboot"}"#).is_err());
        assert!(QueueUpdateEvent::parse("not json").is_err());
        assert!(QueueUpdateEvent::parse(r#"{"requestId":1}"#).is_err());
    }

    #[test]
    fn serializes_only_present_fields() {
        assert_eq!(QueueUpdateEvent::queue_status(3).to_json(), r#"{"type":"queue_status","pendingCount":3}"#);
    }
}
