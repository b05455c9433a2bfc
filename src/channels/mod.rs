//! Outbound message delivery.

mod twilio;

pub use twilio::{TwilioChannel, WHATSAPP_MAX_BODY, clip_body};

use async_trait::async_trait;

use crate::error::ChannelError;

/// Best-effort outbound delivery to a single recipient. Callers log
/// failures rather than propagating them; the persisted exchange is the
/// source of truth regardless of delivery.
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send(&self, to: &str, body: &str) -> Result<(), ChannelError>;
}
