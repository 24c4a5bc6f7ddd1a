//! Graph-API-style messaging adapter.
//!
//! Sends text, interactive button/list prompts, and location request
//! messages through the hosted messaging API's `/{phone_number_id}/messages`
//! endpoint. Payload construction is split out as plain functions so the
//! exact wire shapes stay testable without a server.

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde_json::{Value, json};
use tracing::info;

use crate::config::CloudApiConfig;
use crate::error::ChannelError;
use crate::outbound::{ButtonPrompt, ListPrompt, OutboundChannel};

/// Interactive button titles are truncated to this length by the API.
const BUTTON_TITLE_MAX: usize = 20;
/// List row titles are truncated to this length.
const ROW_TITLE_MAX: usize = 24;
/// The API accepts at most three reply buttons per message.
const MAX_BUTTONS: usize = 3;

/// Outbound channel over the hosted messaging API.
pub struct CloudApiChannel {
    config: CloudApiConfig,
    client: reqwest::Client,
}

impl CloudApiChannel {
    pub fn new(config: CloudApiConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/{}/messages",
            self.config.api_base.trim_end_matches('/'),
            self.config.phone_number_id
        )
    }

    async fn post_message(
        &self,
        kind: &'static str,
        to: &str,
        payload: Value,
    ) -> Result<(), ChannelError> {
        let response = self
            .client
            .post(self.messages_url())
            .bearer_auth(self.config.access_token.expose_secret())
            .json(&payload)
            .send()
            .await
            .map_err(|e| ChannelError::SendFailed {
                kind,
                to: to.to_string(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ChannelError::ApiRejected { status, body });
        }

        info!(kind, to, "Outbound message accepted");
        Ok(())
    }
}

#[async_trait]
impl OutboundChannel for CloudApiChannel {
    async fn send_text(&self, to: &str, body: &str) -> Result<(), ChannelError> {
        self.post_message("text", to, text_payload(to, body)).await
    }

    async fn send_buttons(&self, to: &str, prompt: &ButtonPrompt) -> Result<(), ChannelError> {
        self.post_message("buttons", to, buttons_payload(to, prompt))
            .await
    }

    async fn send_list(&self, to: &str, prompt: &ListPrompt) -> Result<(), ChannelError> {
        self.post_message("list", to, list_payload(to, prompt)).await
    }

    async fn request_location(&self, to: &str, body: &str) -> Result<(), ChannelError> {
        self.post_message("location_request", to, location_request_payload(to, body))
            .await
    }
}

// ── Wire payloads ───────────────────────────────────────────────────

fn envelope(to: &str) -> Value {
    json!({
        "messaging_product": "whatsapp",
        "recipient_type": "individual",
        "to": to
    })
}

pub fn text_payload(to: &str, body: &str) -> Value {
    let mut payload = envelope(to);
    payload["type"] = json!("text");
    payload["text"] = json!({ "body": body });
    payload
}

pub fn buttons_payload(to: &str, prompt: &ButtonPrompt) -> Value {
    let buttons: Vec<Value> = prompt
        .buttons
        .iter()
        .take(MAX_BUTTONS)
        .map(|b| {
            json!({
                "type": "reply",
                "reply": { "id": b.id, "title": truncate(&b.title, BUTTON_TITLE_MAX) }
            })
        })
        .collect();

    let mut interactive = json!({
        "type": "button",
        "body": { "text": prompt.body },
        "action": { "buttons": buttons }
    });
    if let Some(header) = &prompt.header {
        interactive["header"] = json!({ "type": "text", "text": header });
    }

    let mut payload = envelope(to);
    payload["type"] = json!("interactive");
    payload["interactive"] = interactive;
    payload
}

pub fn list_payload(to: &str, prompt: &ListPrompt) -> Value {
    let sections: Vec<Value> = prompt
        .sections
        .iter()
        .map(|section| {
            let rows: Vec<Value> = section
                .rows
                .iter()
                .map(|row| {
                    json!({
                        "id": row.id,
                        "title": truncate(&row.title, ROW_TITLE_MAX),
                        "description": row.description
                    })
                })
                .collect();
            json!({ "title": section.title, "rows": rows })
        })
        .collect();

    let mut interactive = json!({
        "type": "list",
        "body": { "text": prompt.body },
        "action": { "button": prompt.button_label, "sections": sections }
    });
    if let Some(header) = &prompt.header {
        interactive["header"] = json!({ "type": "text", "text": header });
    }

    let mut payload = envelope(to);
    payload["type"] = json!("interactive");
    payload["interactive"] = interactive;
    payload
}

pub fn location_request_payload(to: &str, body: &str) -> Value {
    let mut payload = envelope(to);
    payload["type"] = json!("interactive");
    payload["interactive"] = json!({
        "type": "location_request_message",
        "body": { "text": body },
        "action": { "name": "send_location" }
    });
    payload
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        text.chars().take(max_chars).collect()
    }
}
