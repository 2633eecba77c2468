use anyhow::Result;
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

/// Turns assistant text into playable audio (PCM16 at the playback rate).
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>>;
}
