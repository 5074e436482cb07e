//! TOML configuration file loading
//!
//! Supports `~/.config/jarvis/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct JarvisConfigFile {
    /// Controller switches
    #[serde(default)]
    pub controller: ControllerFileConfig,

    /// Capture subprocess configuration
    #[serde(default)]
    pub capture: CaptureFileConfig,

    /// Voice/audio configuration
    #[serde(default)]
    pub voice: VoiceFileConfig,

    /// LLM configuration
    #[serde(default)]
    pub llm: LlmFileConfig,

    /// Per-call timeouts in seconds
    #[serde(default)]
    pub timeouts: TimeoutsFileConfig,

    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,

    /// Override for the data directory
    pub data_dir: Option<String>,
}

/// Controller switches
#[derive(Debug, Default, Deserialize)]
pub struct ControllerFileConfig {
    /// Microphone device index passed to the capture process
    pub microphone: Option<u32>,

    /// Enable acoustic wake word detection
    pub wake_word: Option<bool>,

    /// Enable always-listening mode
    pub always_listening: Option<bool>,

    /// Intent gate threshold in [0, 1]
    pub intent_threshold: Option<f32>,

    /// Use the LLM to judge whether speech was addressed to the assistant
    pub llm_intent: Option<bool>,
}

/// Capture subprocess configuration
#[derive(Debug, Default, Deserialize)]
pub struct CaptureFileConfig {
    /// Interpreter used to run the capture script (e.g. "python3")
    pub interpreter: Option<String>,

    /// Path to the capture script
    pub script: Option<String>,

    /// Working directory for the capture process
    pub working_dir: Option<String>,

    /// Where the capture process writes each utterance
    pub audio_path: Option<String>,

    /// Captures smaller than this are treated as too short
    pub min_audio_bytes: Option<u64>,

    /// Optional keyboard listener script
    pub keyboard_script: Option<String>,
}

/// Voice processing configuration
#[derive(Debug, Default, Deserialize)]
pub struct VoiceFileConfig {
    /// STT provider ("openai" or "deepgram")
    pub stt_provider: Option<String>,

    /// STT model (e.g. "whisper-1")
    pub stt_model: Option<String>,

    /// Language hint for transcription
    pub language: Option<String>,

    /// TTS provider ("openai" or "elevenlabs")
    pub tts_provider: Option<String>,

    /// TTS model (e.g. "tts-1")
    pub tts_model: Option<String>,

    /// TTS voice identifier (e.g. "onyx")
    pub tts_voice: Option<String>,

    /// TTS speed multiplier
    pub tts_speed: Option<f32>,

    /// Where synthesized speech is written before playback
    pub response_audio_path: Option<String>,

    /// Player command; the audio path is appended as the last argument
    pub player: Option<Vec<String>>,

    /// Sound played when recording starts
    pub cue_sound: Option<String>,
}

/// LLM-related configuration
#[derive(Debug, Default, Deserialize)]
pub struct LlmFileConfig {
    /// OpenAI-compatible base URL
    pub base_url: Option<String>,

    /// Model identifier
    pub model: Option<String>,

    /// Max tokens per completion
    pub max_tokens: Option<u32>,

    /// Cap on tool-call round trips per reply
    pub max_steps: Option<u32>,

    /// Assistant name used in prompts
    pub assistant_name: Option<String>,
}

/// Timeouts in seconds
#[derive(Debug, Default, Deserialize)]
pub struct TimeoutsFileConfig {
    pub transcription: Option<u64>,
    pub generation: Option<u64>,
    pub synthesis: Option<u64>,
    pub classification: Option<u64>,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub openai: Option<String>,
    pub elevenlabs: Option<String>,
    pub deepgram: Option<String>,
}

/// Load the TOML config file from the standard path
///
/// Returns `JarvisConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> JarvisConfigFile {
    config_file_path().map_or_else(JarvisConfigFile::default, |path| load_from(&path))
}

/// Load a TOML config file from an explicit path
///
/// Missing or malformed files yield defaults.
pub fn load_from(path: &Path) -> JarvisConfigFile {
    if !path.exists() {
        return JarvisConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                JarvisConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            JarvisConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/jarvis/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("jarvis").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_partial_file() {
        let fc: JarvisConfigFile = toml::from_str(
            r#"
            [controller]
            microphone = 2
            always_listening = true

            [voice]
            player = ["mpv", "--no-video"]
            "#,
        )
        .unwrap();

        assert_eq!(fc.controller.microphone, Some(2));
        assert_eq!(fc.controller.always_listening, Some(true));
        assert!(fc.controller.wake_word.is_none());
        assert_eq!(
            fc.voice.player,
            Some(vec!["mpv".to_string(), "--no-video".to_string()])
        );
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "controller = [not valid").unwrap();

        let fc = load_from(&path);
        assert!(fc.controller.microphone.is_none());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let fc = load_from(Path::new("/nonexistent/jarvis/config.toml"));
        assert!(fc.data_dir.is_none());
    }
}
