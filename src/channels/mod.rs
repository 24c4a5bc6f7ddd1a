//! Concrete outbound channel adapters.
//!
//! The engine only sees the `OutboundChannel` trait; everything
//! transport-specific lives here.

use async_trait::async_trait;
use tracing::info;

use crate::error::ChannelError;
use crate::outbound::{ButtonPrompt, ListPrompt, OutboundChannel};

pub mod cloud_api;

pub use cloud_api::CloudApiChannel;

/// Fallback channel used when no messaging API is configured: logs every
/// send instead of delivering it. Lets the service run locally end to end.
pub struct LogChannel;

#[async_trait]
impl OutboundChannel for LogChannel {
    async fn send_text(&self, to: &str, body: &str) -> Result<(), ChannelError> {
        info!(to, body, "Outbound text (log only)");
        Ok(())
    }

    async fn send_buttons(&self, to: &str, prompt: &ButtonPrompt) -> Result<(), ChannelError> {
        info!(to, body = %prompt.body, buttons = prompt.buttons.len(), "Outbound buttons (log only)");
        Ok(())
    }

    async fn send_list(&self, to: &str, prompt: &ListPrompt) -> Result<(), ChannelError> {
        info!(to, body = %prompt.body, "Outbound list (log only)");
        Ok(())
    }

    async fn request_location(&self, to: &str, body: &str) -> Result<(), ChannelError> {
        info!(to, body, "Outbound location request (log only)");
        Ok(())
    }
}
