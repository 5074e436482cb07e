//! Speech-to-text (STT) processing

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use crate::config::{ApiKeys, SttProvider, VoiceConfig};
use crate::{Error, Result};

/// One transcription call
#[derive(Debug, Clone)]
pub struct TranscriptionRequest {
    /// WAV audio bytes
    pub audio: Vec<u8>,
    /// Language hint (e.g. "en")
    pub language: String,
    /// Sampling temperature; 0 minimizes hallucinated text
    pub temperature: f32,
    /// Vocabulary hint biasing the recognizer toward known words
    pub prompt: Option<String>,
}

impl TranscriptionRequest {
    #[must_use]
    pub const fn new(audio: Vec<u8>, language: String) -> Self {
        Self {
            audio,
            language,
            temperature: 0.0,
            prompt: None,
        }
    }

    #[must_use]
    pub fn with_prompt(mut self, prompt: Option<String>) -> Self {
        self.prompt = prompt.filter(|p| !p.trim().is_empty());
        self
    }
}

/// A transcription service
///
/// Silence or noise may come back as an empty or garbage transcript; that is
/// not an error.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe audio to text
    ///
    /// # Errors
    ///
    /// Returns error if the service call fails
    async fn transcribe(&self, request: TranscriptionRequest) -> Result<String>;
}

/// Response from OpenAI Whisper transcription API
#[derive(serde::Deserialize)]
struct WhisperResponse {
    text: String,
}

/// Response from Deepgram transcription API
#[derive(serde::Deserialize)]
struct DeepgramResponse {
    results: DeepgramResults,
}

#[derive(serde::Deserialize)]
struct DeepgramResults {
    channels: Vec<DeepgramChannel>,
}

#[derive(serde::Deserialize)]
struct DeepgramChannel {
    alternatives: Vec<DeepgramAlternative>,
}

#[derive(serde::Deserialize)]
struct DeepgramAlternative {
    transcript: String,
}

/// Transcribes speech over HTTP
pub struct SpeechToText {
    client: reqwest::Client,
    api_key: SecretString,
    model: String,
    provider: SttProvider,
}

impl SpeechToText {
    /// Build the configured provider
    ///
    /// # Errors
    ///
    /// Returns error if the provider's API key is missing
    pub fn from_config(voice: &VoiceConfig, keys: &ApiKeys) -> Result<Self> {
        let (key, what) = match voice.stt_provider {
            SttProvider::OpenAi => (&keys.openai, "OpenAI API key required for Whisper"),
            SttProvider::Deepgram => (&keys.deepgram, "Deepgram API key required"),
        };
        let api_key = key
            .clone()
            .filter(|k| !k.expose_secret().is_empty())
            .ok_or_else(|| Error::Config(what.to_string()))?;

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model: voice.stt_model.clone(),
            provider: voice.stt_provider,
        })
    }

    /// Transcribe using OpenAI Whisper
    async fn transcribe_whisper(&self, request: TranscriptionRequest) -> Result<String> {
        tracing::debug!(audio_bytes = request.audio.len(), "starting Whisper transcription");

        let mut form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(request.audio)
                    .file_name("command.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| Error::Stt(e.to_string()))?,
            )
            .text("model", self.model.clone())
            .text("language", request.language)
            .text("temperature", request.temperature.to_string());
        if let Some(prompt) = request.prompt {
            form = form.text("prompt", prompt);
        }

        let response = self
            .client
            .post("https://api.openai.com/v1/audio/transcriptions")
            .bearer_auth(self.api_key.expose_secret())
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Whisper request failed");
                e
            })?;

        let status = response.status();
        tracing::debug!(status = %status, "received response");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Whisper API error");
            return Err(Error::Stt(format!("Whisper API error {status}: {body}")));
        }

        let result: WhisperResponse = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "failed to parse response");
            e
        })?;

        tracing::info!(transcript = %result.text, "transcription complete");
        Ok(result.text)
    }

    /// Transcribe using Deepgram
    async fn transcribe_deepgram(&self, request: TranscriptionRequest) -> Result<String> {
        tracing::debug!(audio_bytes = request.audio.len(), "starting Deepgram transcription");

        let mut query = vec![
            ("model", self.model.clone()),
            ("punctuate", "true".to_string()),
            ("language", request.language),
        ];
        if let Some(prompt) = &request.prompt {
            query.extend(
                prompt
                    .split(',')
                    .map(str::trim)
                    .filter(|w| !w.is_empty())
                    .map(|w| ("keywords", w.to_string())),
            );
        }

        let response = self
            .client
            .post("https://api.deepgram.com/v1/listen")
            .query(&query)
            .header(
                "Authorization",
                format!("Token {}", self.api_key.expose_secret()),
            )
            .header("Content-Type", "audio/wav")
            .body(request.audio)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Deepgram request failed");
                e
            })?;

        let status = response.status();
        tracing::debug!(status = %status, "received response");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Deepgram API error");
            return Err(Error::Stt(format!("Deepgram API error {status}: {body}")));
        }

        let result: DeepgramResponse = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "failed to parse Deepgram response");
            e
        })?;

        let transcript = result
            .results
            .channels
            .first()
            .and_then(|c| c.alternatives.first())
            .map(|a| a.transcript.clone())
            .unwrap_or_default();

        tracing::info!(transcript = %transcript, "transcription complete");
        Ok(transcript)
    }
}

#[async_trait]
impl Transcriber for SpeechToText {
    async fn transcribe(&self, request: TranscriptionRequest) -> Result<String> {
        match self.provider {
            SttProvider::OpenAi => self.transcribe_whisper(request).await,
            SttProvider::Deepgram => self.transcribe_deepgram(request).await,
        }
    }
}

/// Build the vocabulary hint from the assistant's name and known words
///
/// Returns `None` when there is nothing to hint.
#[must_use]
pub fn vocabulary_prompt(assistant_name: &str, words: &[String]) -> Option<String> {
    let mut hint: Vec<&str> = Vec::with_capacity(words.len() + 1);
    if !assistant_name.is_empty() {
        hint.push(assistant_name);
    }
    for word in words {
        let word = word.trim();
        if !word.is_empty() && !hint.iter().any(|w| w.eq_ignore_ascii_case(word)) {
            hint.push(word);
        }
    }
    (!hint.is_empty()).then(|| hint.join(", "))
}
