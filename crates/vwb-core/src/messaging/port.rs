use async_trait::async_trait;

use crate::{
    domain::MessageRef,
    messaging::types::{MessagingCapabilities, OutgoingMessage},
    Result,
};

/// Outbound messaging port.
///
/// Callers treat every call as fire-and-forget: errors are logged, never
/// retried synchronously beyond what the adapter does itself.
#[async_trait]
pub trait MessagingPort: Send + Sync {
    fn capabilities(&self) -> MessagingCapabilities;

    async fn send_message(&self, msg: &OutgoingMessage) -> Result<MessageRef>;
    async fn edit_html(&self, msg: MessageRef, html: &str) -> Result<()>;
    async fn answer_callback_query(&self, callback_id: &str, text: Option<&str>) -> Result<()>;
}
