//! Wire frames. Self-delimited JSON in both directions; every outbound
//! frame carries a monotonically increasing `seq` and an ISO-8601
//! timestamp.

use serde::{Deserialize, Serialize};

/// Client to gateway.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientRequest {
    pub action: String,
    #[serde(default)]
    pub channels: Vec<String>,
    #[serde(rename = "requestId", default)]
    pub request_id: Option<String>,
}

/// Gateway to client, before sequencing.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FramePayload {
    Connected {
        #[serde(rename = "clientId")]
        client_id: String,
        role: String,
    },
    Subscribed {
        channels: Vec<String>,
        errors: Vec<String>,
        #[serde(rename = "requestId", skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
    Unsubscribed {
        channels: Vec<String>,
        errors: Vec<String>,
        #[serde(rename = "requestId", skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
    Data {
        channel: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        pattern: Option<String>,
        data: serde_json::Value,
    },
    Pong {
        #[serde(rename = "requestId", skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
    Error {
        error: String,
        #[serde(rename = "requestId", skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
}

/// A sequenced, timestamped frame ready for the wire.
#[derive(Debug, Clone, Serialize)]
pub struct OutboundFrame {
    #[serde(flatten)]
    pub payload: FramePayload,
    pub seq: u64,
    pub timestamp: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_parses_with_optional_fields() {
        let request: ClientRequest =
            serde_json::from_str(r#"{"action": "ping", "requestId": "r1"}"#).unwrap();
        assert_eq!(request.action, "ping");
        assert!(request.channels.is_empty());
        assert_eq!(request.request_id.as_deref(), Some("r1"));
    }

    #[test]
    fn frame_serializes_with_type_tag_and_seq() {
        let frame = OutboundFrame {
            payload: FramePayload::Data {
                channel: "market:tick:NIFTY".into(),
                pattern: None,
                data: serde_json::json!({"price": 48500.0}),
            },
            seq: 7,
            timestamp: "2025-06-02T10:00:00+00:00".into(),
        };
        let value: serde_json::Value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["type"], "data");
        assert_eq!(value["seq"], 7);
        assert_eq!(value["channel"], "market:tick:NIFTY");
        assert!(value.get("pattern").is_none());
    }
}
