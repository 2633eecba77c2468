use serde::Serialize;
use serde_json::{Map, Value};

/// Something headed for the live session.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundEvent {
    TextTurn { content: String, end_of_turn: bool },
    AudioChunk { bytes: Vec<u8>, mime_type: String },
}

/// Something received from the live session. A turn ends with `TurnComplete`.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    AudioChunk(Vec<u8>),
    TextDelta(String),
    ToolCallBatch(Vec<ToolCall>),
    TurnComplete,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub name: String,
    pub args: Map<String, Value>,
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolResult {
    pub name: String,
    pub response: Value,
    pub id: String,
}

/// Everything the single session writer sends.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionMessage {
    Outbound(OutboundEvent),
    ToolResults(Vec<ToolResult>),
}

impl From<OutboundEvent> for SessionMessage {
    fn from(event: OutboundEvent) -> Self {
        SessionMessage::Outbound(event)
    }
}
