//! Outbound side: sending export artifacts.

use async_trait::async_trait;

use crate::error::ChannelError;

/// A file sent along with an outbound message.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundAttachment {
    pub name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// One message to one recipient.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub recipient: String,
    pub subject: String,
    pub body: String,
    /// Sender display name.
    pub display_name: String,
    pub attachment: OutboundAttachment,
}

/// Outbound delivery channel. A returned error means the message was not sent.
#[async_trait]
pub trait Delivery: Send + Sync {
    /// Get the channel name.
    fn name(&self) -> &str;

    async fn send(&self, message: &OutboundMessage) -> Result<(), ChannelError>;
}
