use anyhow::Result;
use async_trait::async_trait;

/// Processes one bus message. Must be safe to run concurrently with itself.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle(&self, topic: &str, payload: &[u8]) -> Result<()>;
}
