//! Outbound messaging boundary — typed prompt payloads and the send trait.
//!
//! Delivery (HTTP, retries, rate limits) belongs to the messaging
//! collaborator behind [`OutboundChannel`]; this core only constructs
//! payloads and reports send failures upward.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ChannelError;

/// A reply button (interactive message, max 3 per prompt).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Button {
    pub id: String,
    pub title: String,
}

impl Button {
    pub fn new(id: &str, title: &str) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
        }
    }
}

/// A button prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ButtonPrompt {
    pub header: Option<String>,
    pub body: String,
    pub buttons: Vec<Button>,
}

/// One selectable row of a list prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListRow {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
}

impl ListRow {
    pub fn new(id: &str, title: &str, description: &str) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
            description: Some(description.to_string()),
        }
    }
}

/// A titled section of list rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListSection {
    pub title: String,
    pub rows: Vec<ListRow>,
}

/// A list prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListPrompt {
    pub header: Option<String>,
    pub body: String,
    pub button_label: String,
    pub sections: Vec<ListSection>,
}

/// Outbound send boundary. One call per message; no retries here.
#[async_trait]
pub trait OutboundChannel: Send + Sync {
    /// Send a plain text message.
    async fn send_text(&self, to: &str, body: &str) -> Result<(), ChannelError>;

    /// Send an interactive button prompt.
    async fn send_buttons(&self, to: &str, prompt: &ButtonPrompt) -> Result<(), ChannelError>;

    /// Send an interactive list prompt.
    async fn send_list(&self, to: &str, prompt: &ListPrompt) -> Result<(), ChannelError>;

    /// Ask the user to share their GPS location.
    async fn request_location(&self, to: &str, body: &str) -> Result<(), ChannelError>;
}
