//! Message normalizer — collapses the transport's heterogeneous message
//! shapes into one tagged input event.
//!
//! The webhook envelope nests messages under `entry[].changes[].value
//! .messages[]`; each message carries a `type` discriminator plus a
//! type-specific object. Anything this core does not process (media,
//! stickers, reactions) becomes `Unsupported` and receives the canned help
//! response instead of flow processing.

use serde_json::Value;
use tracing::debug;

/// One normalized input event.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    /// Free text.
    Text { body: String },
    /// Interactive button selection.
    ButtonReply { id: String },
    /// Interactive list selection.
    ListReply { id: String },
    /// Shared GPS location.
    Location {
        latitude: f64,
        longitude: f64,
        address: Option<String>,
    },
    /// A message type this core does not process.
    Unsupported { kind: String },
}

impl InboundEvent {
    /// Short tag for logging.
    pub fn kind(&self) -> &str {
        match self {
            Self::Text { .. } => "text",
            Self::ButtonReply { .. } => "button_reply",
            Self::ListReply { .. } => "list_reply",
            Self::Location { .. } => "location",
            Self::Unsupported { kind } => kind,
        }
    }
}

/// A normalized inbound message: who sent what, with the transport's id
/// preserved for deduplication.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub id: String,
    pub sender: String,
    pub event: InboundEvent,
}

/// Extract all messages from a webhook envelope. Malformed entries are
/// skipped with a debug log; the webhook must always be acknowledged.
pub fn normalize_webhook(payload: &Value) -> Vec<InboundMessage> {
    let mut out = Vec::new();
    let entries = payload.get("entry").and_then(Value::as_array);
    for entry in entries.into_iter().flatten() {
        let changes = entry.get("changes").and_then(Value::as_array);
        for change in changes.into_iter().flatten() {
            let messages = change
                .pointer("/value/messages")
                .and_then(Value::as_array);
            for message in messages.into_iter().flatten() {
                match normalize_message(message) {
                    Some(normalized) => out.push(normalized),
                    None => debug!(?message, "Skipping malformed webhook message"),
                }
            }
        }
    }
    out
}

/// Normalize one raw message object. Returns `None` when the id or sender
/// is missing (nothing to deduplicate or reply to).
pub fn normalize_message(message: &Value) -> Option<InboundMessage> {
    let id = message.get("id").and_then(Value::as_str)?.to_string();
    let sender = message.get("from").and_then(Value::as_str)?.to_string();
    let kind = message.get("type").and_then(Value::as_str).unwrap_or("");

    let event = match kind {
        "text" => InboundEvent::Text {
            body: message
                .pointer("/text/body")
                .and_then(Value::as_str)
                .unwrap_or("")
                .trim()
                .to_string(),
        },
        "interactive" => normalize_interactive(message),
        "location" => {
            let latitude = message.pointer("/location/latitude").and_then(Value::as_f64)?;
            let longitude = message.pointer("/location/longitude").and_then(Value::as_f64)?;
            let address = message
                .pointer("/location/address")
                .or_else(|| message.pointer("/location/name"))
                .and_then(Value::as_str)
                .map(str::to_string);
            InboundEvent::Location {
                latitude,
                longitude,
                address,
            }
        }
        other => InboundEvent::Unsupported {
            kind: if other.is_empty() { "unknown" } else { other }.to_string(),
        },
    };

    Some(InboundMessage { id, sender, event })
}

fn normalize_interactive(message: &Value) -> InboundEvent {
    let interactive_type = message
        .pointer("/interactive/type")
        .and_then(Value::as_str)
        .unwrap_or("");
    match interactive_type {
        "button_reply" => {
            let id = message
                .pointer("/interactive/button_reply/id")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();
            InboundEvent::ButtonReply { id }
        }
        "list_reply" => {
            let id = message
                .pointer("/interactive/list_reply/id")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();
            InboundEvent::ListReply { id }
        }
        other => InboundEvent::Unsupported {
            kind: format!("interactive:{other}"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(message: Value) -> Value {
        json!({
            "entry": [{
                "changes": [{
                    "value": { "messages": [message] }
                }]
            }]
        })
    }

    #[test]
    fn text_message_normalizes_trimmed_body() {
        let payload = envelope(json!({
            "id": "wamid.1",
            "from": "263771234567",
            "type": "text",
            "text": { "body": "  EMERGENCY:LT-2025-A7X9K3  " }
        }));
        let messages = normalize_webhook(&payload);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].sender, "263771234567");
        assert_eq!(
            messages[0].event,
            InboundEvent::Text {
                body: "EMERGENCY:LT-2025-A7X9K3".into()
            }
        );
    }

    #[test]
    fn button_and_list_replies_extract_selection_id() {
        let button = normalize_message(&json!({
            "id": "wamid.2",
            "from": "u",
            "type": "interactive",
            "interactive": { "type": "button_reply", "button_reply": { "id": "conscious_yes", "title": "Yes" } }
        }))
        .unwrap();
        assert_eq!(button.event, InboundEvent::ButtonReply { id: "conscious_yes".into() });

        let list = normalize_message(&json!({
            "id": "wamid.3",
            "from": "u",
            "type": "interactive",
            "interactive": { "type": "list_reply", "list_reply": { "id": "victims_2", "title": "2 people" } }
        }))
        .unwrap();
        assert_eq!(list.event, InboundEvent::ListReply { id: "victims_2".into() });
    }

    #[test]
    fn location_prefers_address_over_name() {
        let message = normalize_message(&json!({
            "id": "wamid.4",
            "from": "u",
            "type": "location",
            "location": { "latitude": -17.82, "longitude": 31.05, "name": "Clinic", "address": "5th Ave" }
        }))
        .unwrap();
        match message.event {
            InboundEvent::Location {
                latitude,
                longitude,
                address,
            } => {
                assert!((latitude + 17.82).abs() < 1e-9);
                assert!((longitude - 31.05).abs() < 1e-9);
                assert_eq!(address.as_deref(), Some("5th Ave"));
            }
            other => panic!("Expected Location, got {other:?}"),
        }
    }

    #[test]
    fn media_types_become_unsupported() {
        let message = normalize_message(&json!({
            "id": "wamid.5",
            "from": "u",
            "type": "image",
            "image": { "id": "media-1" }
        }))
        .unwrap();
        assert_eq!(message.event, InboundEvent::Unsupported { kind: "image".into() });
    }

    #[test]
    fn message_without_id_is_skipped() {
        assert!(normalize_message(&json!({ "from": "u", "type": "text" })).is_none());
        let payload = envelope(json!({ "from": "u", "type": "text" }));
        assert!(normalize_webhook(&payload).is_empty());
    }

    #[test]
    fn location_without_coordinates_is_skipped() {
        assert!(
            normalize_message(&json!({
                "id": "wamid.6",
                "from": "u",
                "type": "location",
                "location": { "name": "somewhere" }
            }))
            .is_none()
        );
    }
}
