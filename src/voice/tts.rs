//! Text-to-speech (TTS) processing

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use secrecy::{ExposeSecret, SecretString};

use crate::config::{ApiKeys, TtsProvider, VoiceConfig};
use crate::{Error, Result};

/// A speech synthesis service
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Synthesize plain text to playable audio bytes
    ///
    /// # Errors
    ///
    /// Returns error if synthesis fails
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>>;
}

/// Synthesizes speech over HTTP
pub struct TextToSpeech {
    client: reqwest::Client,
    api_key: SecretString,
    voice: String,
    speed: f32,
    model: String,
    provider: TtsProvider,
}

impl TextToSpeech {
    /// Build the configured provider
    ///
    /// # Errors
    ///
    /// Returns error if the provider's API key is missing
    pub fn from_config(voice: &VoiceConfig, keys: &ApiKeys) -> Result<Self> {
        let (key, what) = match voice.tts_provider {
            TtsProvider::OpenAi => (&keys.openai, "OpenAI API key required for TTS"),
            TtsProvider::ElevenLabs => (&keys.elevenlabs, "ElevenLabs API key required for TTS"),
        };
        let api_key = key
            .clone()
            .filter(|k| !k.expose_secret().is_empty())
            .ok_or_else(|| Error::Config(what.to_string()))?;

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            voice: voice.tts_voice.clone(),
            speed: voice.tts_speed.clamp(0.25, 4.0),
            model: voice.tts_model.clone(),
            provider: voice.tts_provider,
        })
    }

    /// Synthesize using OpenAI TTS
    async fn synthesize_openai(&self, text: &str) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct TtsRequest<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
            speed: f32,
            response_format: &'a str,
        }

        let request = TtsRequest {
            model: &self.model,
            input: text,
            voice: &self.voice,
            speed: self.speed,
            response_format: "mp3",
        };

        tracing::debug!(chars = text.len(), voice = %self.voice, "requesting OpenAI speech");

        let response = self
            .client
            .post("https://api.openai.com/v1/audio/speech")
            .bearer_auth(self.api_key.expose_secret())
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("OpenAI TTS error {status}: {body}")));
        }

        let audio = response.bytes().await?;
        Ok(audio.to_vec())
    }

    /// Synthesize using ElevenLabs TTS
    async fn synthesize_elevenlabs(&self, text: &str) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct ElevenLabsRequest<'a> {
            text: &'a str,
            model_id: &'a str,
        }

        let url = format!(
            "https://api.elevenlabs.io/v1/text-to-speech/{}",
            self.voice
        );

        let request = ElevenLabsRequest {
            text,
            model_id: &self.model,
        };

        let response = self
            .client
            .post(&url)
            .header("xi-api-key", self.api_key.expose_secret())
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("ElevenLabs TTS error {status}: {body}")));
        }

        let audio = response.bytes().await?;
        Ok(audio.to_vec())
    }
}

#[async_trait]
impl Synthesizer for TextToSpeech {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        match self.provider {
            TtsProvider::OpenAi => self.synthesize_openai(text).await,
            TtsProvider::ElevenLabs => self.synthesize_elevenlabs(text).await,
        }
    }
}

static CODE_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```.*?```").expect("valid regex"));
static LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]]*)\]\([^)]*\)").expect("valid regex"));
static EMPHASIS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[*_~`]+").expect("valid regex"));
static LINE_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*(?:#{1,6}\s+|[-+*]\s+|\d+[.)]\s+|>\s*)").expect("valid regex")
});
static SPACES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t]+").expect("valid regex"));

/// Turn display text into something a voice can read
///
/// Strips markdown and collapses line breaks into sentence breaks.
#[must_use]
pub fn prepare_for_speech(text: &str) -> String {
    let text = CODE_BLOCK.replace_all(text, " ");
    let text = LINK.replace_all(&text, "$1");
    let text = LINE_MARKER.replace_all(&text, "");
    let text = EMPHASIS.replace_all(&text, "");

    let sentences: Vec<String> = text
        .lines()
        .map(|line| SPACES.replace_all(line.trim(), " ").into_owned())
        .filter(|line| !line.is_empty())
        .map(|line| {
            if line.ends_with(['.', '!', '?', ':', ';', ',']) {
                line
            } else {
                format!("{line}.")
            }
        })
        .collect();

    // A single line keeps its own punctuation
    if sentences.len() == 1 {
        return SPACES.replace_all(text.trim(), " ").into_owned();
    }
    sentences.join(" ")
}
