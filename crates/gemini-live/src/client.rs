use crate::types::{
    Blob, ClientContent, ClientMessage, Content, FunctionResponse, RealtimeInput, ServerMessage,
    Setup, ToolResponse,
};
use anyhow::{Context, Result, bail};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::protocol::Message,
};

pub const LIVE_URL: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1alpha.GenerativeService.BidiGenerateContent";

type WsWriter =
    futures_util::stream::SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsReader = futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// A connected Gemini Live session, before it is split into halves.
pub struct GeminiClient {
    writer: GeminiWriter,
    reader: GeminiReader,
}

/// Sending half of a Live session.
pub struct GeminiWriter {
    write: WsWriter,
}

/// Receiving half of a Live session.
pub struct GeminiReader {
    read: WsReader,
}

/// Establishes a connection to the Gemini Live service.
pub async fn connect(api_key: &str) -> Result<GeminiClient> {
    connect_with_url(LIVE_URL, api_key).await
}

pub async fn connect_with_url(base_url: &str, api_key: &str) -> Result<GeminiClient> {
    let url = format!("{}?key={}", base_url, api_key);
    let (ws_stream, _) = connect_async(url)
        .await
        .context("Failed to connect to Gemini Live WebSocket")?;

    tracing::info!("Successfully connected to Gemini Live WebSocket.");
    let (write, read) = ws_stream.split();
    Ok(GeminiClient {
        writer: GeminiWriter { write },
        reader: GeminiReader { read },
    })
}

impl GeminiClient {
    /// Sends the setup message and waits for the server to acknowledge it.
    pub async fn setup(&mut self, setup: Setup) -> Result<()> {
        self.writer.send(&ClientMessage::Setup(setup)).await?;
        match self.reader.next_message().await? {
            Some(message) if message.setup_complete.is_some() => {
                tracing::info!("Gemini Live session setup complete.");
                Ok(())
            }
            Some(other) => bail!("Expected setupComplete, got {:?}", other),
            None => bail!("Connection closed before setupComplete"),
        }
    }

    pub fn split(self) -> (GeminiWriter, GeminiReader) {
        (self.writer, self.reader)
    }
}

impl GeminiWriter {
    pub async fn send(&mut self, message: &ClientMessage) -> Result<()> {
        let json = serde_json::to_string(message)?;
        self.write
            .send(Message::Text(json))
            .await
            .context("Failed to send message to Gemini Live")
    }

    /// Sends one user text turn.
    pub async fn send_text(&mut self, text: &str, turn_complete: bool) -> Result<()> {
        self.send(&ClientMessage::ClientContent(ClientContent {
            turns: vec![Content::user_text(text)],
            turn_complete,
        }))
        .await
    }

    /// Sends a chunk of raw PCM audio as realtime input.
    pub async fn send_audio_chunk(&mut self, pcm_data: &[u8], mime_type: &str) -> Result<()> {
        self.send(&ClientMessage::RealtimeInput(RealtimeInput {
            media_chunks: vec![Blob {
                mime_type: mime_type.to_string(),
                data: STANDARD.encode(pcm_data),
            }],
        }))
        .await
    }

    pub async fn send_tool_response(&mut self, responses: Vec<FunctionResponse>) -> Result<()> {
        self.send(&ClientMessage::ToolResponse(ToolResponse {
            function_responses: responses,
        }))
        .await
    }

    pub async fn close(&mut self) -> Result<()> {
        self.write
            .close()
            .await
            .context("Failed to close Gemini Live WebSocket")
    }
}

impl GeminiReader {
    /// Reads the next message from the server.
    ///
    /// The service sends JSON in both text and binary frames.
    pub async fn next_message(&mut self) -> Result<Option<ServerMessage>> {
        while let Some(msg) = self.read.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    let message: ServerMessage = serde_json::from_str(&text)
                        .context("Failed to deserialize server message")?;
                    return Ok(Some(message));
                }
                Ok(Message::Binary(bytes)) => {
                    let message: ServerMessage = serde_json::from_slice(&bytes)
                        .context("Failed to deserialize binary server message")?;
                    return Ok(Some(message));
                }
                Ok(Message::Close(frame)) => {
                    tracing::info!(?frame, "Gemini Live WebSocket connection closed.");
                    return Ok(None);
                }
                Err(e) => {
                    tracing::error!("Error reading from Gemini Live WebSocket: {}", e);
                    return Err(e.into());
                }
                _ => {}
            }
        }
        Ok(None)
    }
}

/// Decodes a base64 inline-data payload.
pub fn decode_inline(data: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(data)
        .context("Failed to decode inline data")
}
