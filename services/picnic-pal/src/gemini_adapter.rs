use anyhow::{Context, Result};
use async_trait::async_trait;
use gemini_live::types::{
    Content, FunctionResponse, GenerationConfig, Modality, ServerMessage, Setup,
};
use gemini_live::{GeminiReader, GeminiWriter, LIVE_URL, decode_inline};
use picnic_pal_core::{
    InboundEvent, LiveConnector, OutboundEvent, ResponseMode, SessionConfig, SessionMessage,
    SessionReader, SessionWriter, ToolCall, ToolResult,
};
use secrecy::{ExposeSecret, SecretString};
use std::collections::VecDeque;

/// Implements the core `LiveConnector` trait for Gemini Live.
pub struct GeminiConnector {
    api_key: SecretString,
    url: String,
}

impl GeminiConnector {
    pub fn new(api_key: SecretString) -> Self {
        Self {
            api_key,
            url: LIVE_URL.to_string(),
        }
    }

    pub fn with_url(mut self, url: &str) -> Self {
        self.url = url.to_string();
        self
    }
}

#[async_trait]
impl LiveConnector for GeminiConnector {
    async fn connect(
        &self,
        config: &SessionConfig,
    ) -> Result<(Box<dyn SessionWriter>, Box<dyn SessionReader>)> {
        let mut client = gemini_live::connect_with_url(&self.url, self.api_key.expose_secret())
            .await
            .context("Failed to open Gemini Live session")?;
        client
            .setup(setup_message(config))
            .await
            .context("Gemini Live setup was rejected")?;

        let (writer, reader) = client.split();
        Ok((
            Box::new(GeminiSessionWriter { writer }),
            Box::new(GeminiSessionReader {
                reader,
                pending: VecDeque::new(),
            }),
        ))
    }
}

fn setup_message(config: &SessionConfig) -> Setup {
    let modality = match config.response_mode {
        ResponseMode::TextOnly => Modality::Text,
        ResponseMode::AudioOnly => Modality::Audio,
    };
    Setup {
        model: config.model.clone(),
        generation_config: GenerationConfig {
            response_modalities: vec![modality],
            temperature: Some(config.temperature),
        },
        system_instruction: config.system_instruction.as_deref().map(Content::instruction),
        tools: if config.tool_manifest.is_null() {
            vec![]
        } else {
            vec![config.tool_manifest.clone()]
        },
    }
}

pub struct GeminiSessionWriter {
    writer: GeminiWriter,
}

#[async_trait]
impl SessionWriter for GeminiSessionWriter {
    async fn send(&mut self, message: SessionMessage) -> Result<()> {
        match message {
            SessionMessage::Outbound(OutboundEvent::TextTurn {
                content,
                end_of_turn,
            }) => self.writer.send_text(&content, end_of_turn).await,
            SessionMessage::Outbound(OutboundEvent::AudioChunk { bytes, mime_type }) => {
                self.writer.send_audio_chunk(&bytes, &mime_type).await
            }
            SessionMessage::ToolResults(results) => match function_responses(results) {
                Some(responses) => self.writer.send_tool_response(responses).await,
                None => Ok(()),
            },
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.writer.close().await
    }
}

/// Gemini rejects an empty `functionResponses` list, so a batch where every
/// call faulted is not sent at all.
fn function_responses(results: Vec<ToolResult>) -> Option<Vec<FunctionResponse>> {
    if results.is_empty() {
        tracing::warn!("Every tool call in the batch failed, no tool response sent");
        return None;
    }
    Some(
        results
            .into_iter()
            .map(|result| FunctionResponse {
                id: result.id,
                name: result.name,
                response: result.response,
            })
            .collect(),
    )
}

/// Flattens server messages into inbound events, one at a time.
pub struct GeminiSessionReader {
    reader: GeminiReader,
    pending: VecDeque<InboundEvent>,
}

#[async_trait]
impl SessionReader for GeminiSessionReader {
    async fn next_event(&mut self) -> Result<Option<InboundEvent>> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Ok(Some(event));
            }
            match self.reader.next_message().await? {
                Some(message) => self.pending.extend(translate(message)?),
                None => return Ok(None),
            }
        }
    }
}

/// Tool calls first, then the model's parts in order, then turn completion.
fn translate(message: ServerMessage) -> Result<Vec<InboundEvent>> {
    let mut events = Vec::new();

    if let Some(tool_call) = message.tool_call {
        let calls = tool_call
            .function_calls
            .into_iter()
            .map(|call| ToolCall {
                name: call.name,
                args: call.args,
                id: call.id,
            })
            .collect();
        events.push(InboundEvent::ToolCallBatch(calls));
    }

    if let Some(cancellation) = message.tool_call_cancellation {
        tracing::warn!("Server cancelled tool calls {:?}", cancellation.ids);
    }

    if let Some(content) = message.server_content {
        if let Some(turn) = content.model_turn {
            for part in turn.parts {
                if let Some(text) = part.text {
                    events.push(InboundEvent::TextDelta(text));
                }
                if let Some(blob) = part.inline_data {
                    events.push(InboundEvent::AudioChunk(decode_inline(&blob.data)?));
                }
            }
        }
        if content.interrupted == Some(true) {
            tracing::debug!("Model turn interrupted");
        }
        if content.turn_complete == Some(true) {
            events.push(InboundEvent::TurnComplete);
        }
    }

    Ok(events)
}
