use std::path::PathBuf;

use async_trait::async_trait;
use tracing::warn;

use crate::error::Result;
use crate::types::ChannelId;

#[derive(Debug, Clone)]
pub enum Attachment {
    Image { file_name: String, bytes: Vec<u8> },
    Audio { path: PathBuf },
}

/// Delivery side of the chat platform.
#[async_trait]
pub trait Outbox: Send + Sync {
    async fn send_text(&self, channel_id: ChannelId, text: &str) -> Result<()>;

    async fn send_attachment(
        &self,
        channel_id: ChannelId,
        attachment: Attachment,
        caption: Option<&str>,
    ) -> Result<()>;
}

/// Sends a notice and logs instead of failing. Used for every channel-visible side
/// effect of timers and supervisors.
pub async fn notify_best_effort(outbox: &dyn Outbox, channel_id: ChannelId, text: &str, what: &str) {
    if let Err(err) = outbox.send_text(channel_id, text).await {
        warn!(
            "notify failed: what={} channel_id={} err={}",
            what, channel_id, err
        );
    }
}
