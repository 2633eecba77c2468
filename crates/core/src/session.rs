use crate::events::{InboundEvent, SessionMessage};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

/// How the assistant answers: the service speaks itself, or it writes text
/// that is synthesized locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseMode {
    #[default]
    TextOnly,
    AudioOnly,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub model: String,
    pub response_mode: ResponseMode,
    pub temperature: f32,
    pub system_instruction: Option<String>,
    pub tool_manifest: Value,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            model: "models/gemini-2.0-flash-exp".to_string(),
            response_mode: ResponseMode::TextOnly,
            temperature: 0.0,
            system_instruction: None,
            tool_manifest: Value::Null,
        }
    }
}

/// Lifecycle of the one session an orchestrator run owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Connecting,
    Active,
    Closing,
    Closed,
    Failed,
}

/// Opens live sessions with the conversational service.
#[async_trait]
pub trait LiveConnector: Send + Sync {
    async fn connect(
        &self,
        config: &SessionConfig,
    ) -> Result<(Box<dyn SessionWriter>, Box<dyn SessionReader>)>;
}

/// Write half of a session.
#[async_trait]
pub trait SessionWriter: Send {
    async fn send(&mut self, message: SessionMessage) -> Result<()>;

    async fn close(&mut self) -> Result<()>;
}

/// Read half of a session. `None` means the service closed the session.
#[async_trait]
pub trait SessionReader: Send {
    async fn next_event(&mut self) -> Result<Option<InboundEvent>>;
}
