//! Speech synthesis through the Google Cloud Text-to-Speech REST API.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use picnic_pal_core::SpeechSynthesizer;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::io::Cursor;

pub const TEXT_TO_SPEECH_URL: &str = "https://texttospeech.googleapis.com/v1/text:synthesize";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SynthesizeRequest<'a> {
    input: SynthesisInput<'a>,
    voice: VoiceSelection<'a>,
    audio_config: AudioConfig,
}

#[derive(Debug, Serialize)]
struct SynthesisInput<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VoiceSelection<'a> {
    language_code: &'a str,
    name: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AudioConfig {
    audio_encoding: &'static str,
    sample_rate_hertz: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SynthesizeResponse {
    audio_content: String,
}

/// Synthesizes LINEAR16 speech at the playback rate.
pub struct GoogleSpeech {
    client: Client,
    api_key: SecretString,
    voice: String,
    sample_rate: u32,
    url: String,
}

impl GoogleSpeech {
    pub fn new(api_key: SecretString, voice: &str, sample_rate: u32) -> Self {
        Self {
            client: Client::new(),
            api_key,
            voice: voice.to_string(),
            sample_rate,
            url: TEXT_TO_SPEECH_URL.to_string(),
        }
    }

    pub fn with_url(mut self, url: &str) -> Self {
        self.url = url.to_string();
        self
    }

    fn request<'a>(&'a self, text: &'a str) -> SynthesizeRequest<'a> {
        SynthesizeRequest {
            input: SynthesisInput { text },
            voice: VoiceSelection {
                language_code: language_code(&self.voice),
                name: &self.voice,
            },
            audio_config: AudioConfig {
                audio_encoding: "LINEAR16",
                sample_rate_hertz: self.sample_rate,
            },
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for GoogleSpeech {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .post(format!("{}?key={}", self.url, self.api_key.expose_secret()))
            .json(&self.request(text))
            .send()
            .await
            .context("Failed to reach the text-to-speech service")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("text-to-speech request failed with {}: {}", status, body);
        }

        let body: SynthesizeResponse = response
            .json()
            .await
            .context("Failed to parse text-to-speech response")?;
        let audio = STANDARD
            .decode(body.audio_content)
            .context("Failed to decode synthesized audio")?;
        tracing::debug!("Synthesized {} bytes for {} characters", audio.len(), text.len());
        strip_wav_header(audio)
    }
}

/// `en-US-Journey-D` -> `en-US`.
fn language_code(voice: &str) -> &str {
    let mut dashes = voice.match_indices('-').map(|(i, _)| i);
    match (dashes.next(), dashes.next()) {
        (Some(_), Some(end)) => &voice[..end],
        _ => voice,
    }
}

/// LINEAR16 answers arrive as a WAV file; playback wants the bare samples.
fn strip_wav_header(audio: Vec<u8>) -> Result<Vec<u8>> {
    if !audio.starts_with(b"RIFF") {
        return Ok(audio);
    }
    let mut reader = hound::WavReader::new(Cursor::new(audio)).context("Invalid WAV payload")?;
    let spec = reader.spec();
    if spec.bits_per_sample != 16 || spec.sample_format != hound::SampleFormat::Int {
        bail!("unsupported WAV format {:?}", spec);
    }
    let mut pcm = Vec::with_capacity(reader.len() as usize * 2);
    for sample in reader.samples::<i16>() {
        pcm.extend_from_slice(&sample?.to_le_bytes());
    }
    Ok(pcm)
}
