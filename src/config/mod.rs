//! Configuration management for the voice controller
//!
//! Values resolve with the precedence env > TOML file > defaults.

pub mod file;

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::{Error, Result};

/// Default intent gate threshold
pub const DEFAULT_INTENT_THRESHOLD: f32 = 0.7;

/// Captures below this size are treated as truncated
pub const DEFAULT_MIN_AUDIO_BYTES: u64 = 1000;

/// Default cap on tool-call round trips per reply
pub const DEFAULT_MAX_STEPS: u32 = 5;

/// Voice controller configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Controller switches
    pub controller: ControllerConfig,

    /// Capture subprocess configuration
    pub capture: CaptureConfig,

    /// STT/TTS/playback configuration
    pub voice: VoiceConfig,

    /// Response generation configuration
    pub llm: LlmConfig,

    /// Per-call timeouts
    pub timeouts: Timeouts,

    /// API keys
    pub api_keys: ApiKeys,

    /// Path to data directory (memory store)
    pub data_dir: PathBuf,
}

/// Per-controller switches
///
/// Immutable for the controller's lifetime except the microphone, which can
/// only change by restarting the capture process.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerConfig {
    /// Microphone device index; `None` uses the system default
    pub microphone: Option<u32>,

    /// Enable acoustic wake word detection
    pub wake_word: bool,

    /// Evaluate every speech segment for intent, not only wake words
    pub always_listening: bool,

    /// Intent gate threshold in [0, 1]
    pub intent_threshold: f32,

    /// Judge addressed speech with the LLM instead of keyword heuristics
    pub llm_intent: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            microphone: None,
            wake_word: true,
            always_listening: false,
            intent_threshold: DEFAULT_INTENT_THRESHOLD,
            llm_intent: false,
        }
    }
}

/// Capture subprocess configuration
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Interpreter for the capture script
    pub interpreter: String,

    /// Capture script path
    pub script: PathBuf,

    /// Working directory for the capture process
    pub working_dir: Option<PathBuf>,

    /// Singleton file the capture process writes each utterance to
    pub audio_path: PathBuf,

    /// Captures smaller than this are treated as too short
    pub min_audio_bytes: u64,

    /// Optional global hotkey listener script
    pub keyboard_script: Option<PathBuf>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            interpreter: "python3".to_string(),
            script: PathBuf::from("scripts/unified_voice.py"),
            working_dir: None,
            audio_path: PathBuf::from("command.wav"),
            min_audio_bytes: DEFAULT_MIN_AUDIO_BYTES,
            keyboard_script: None,
        }
    }
}

impl CaptureConfig {
    /// Resolve a path relative to the capture working directory
    #[must_use]
    pub fn resolve(&self, path: &std::path::Path) -> PathBuf {
        match &self.working_dir {
            Some(dir) if path.is_relative() => dir.join(path),
            _ => path.to_path_buf(),
        }
    }

    /// Where the capture process leaves each recording
    #[must_use]
    pub fn capture_file(&self) -> PathBuf {
        self.resolve(&self.audio_path)
    }
}

/// STT provider backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SttProvider {
    OpenAi,
    Deepgram,
}

/// TTS provider backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtsProvider {
    OpenAi,
    ElevenLabs,
}

/// Voice processing configuration
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    /// STT backend
    pub stt_provider: SttProvider,

    /// STT model (e.g. "whisper-1", "nova-2")
    pub stt_model: String,

    /// Language hint for transcription
    pub language: String,

    /// TTS backend
    pub tts_provider: TtsProvider,

    /// TTS model (e.g. "tts-1")
    pub tts_model: String,

    /// TTS voice identifier
    pub tts_voice: String,

    /// TTS speed multiplier (0.25 to 4.0)
    pub tts_speed: f32,

    /// Singleton file synthesized speech is written to
    pub response_audio_path: PathBuf,

    /// Player command; the audio path is appended
    pub player: Vec<String>,

    /// Sound played when recording starts
    pub cue_sound: Option<PathBuf>,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            stt_provider: SttProvider::OpenAi,
            stt_model: "whisper-1".to_string(),
            language: "en".to_string(),
            tts_provider: TtsProvider::OpenAi,
            tts_model: "tts-1".to_string(),
            tts_voice: "onyx".to_string(),
            tts_speed: 1.0,
            response_audio_path: std::env::temp_dir().join("jarvis-response.mp3"),
            player: default_player(),
            cue_sound: None,
        }
    }
}

/// Response generation configuration
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// OpenAI-compatible API base URL
    pub base_url: String,

    /// Model identifier
    pub model: String,

    /// Max tokens per completion
    pub max_tokens: u32,

    /// Cap on tool-call round trips per reply
    pub max_steps: u32,

    /// Name the assistant answers to
    pub assistant_name: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            max_tokens: 1024,
            max_steps: DEFAULT_MAX_STEPS,
            assistant_name: "Jarvis".to_string(),
        }
    }
}

/// Limits on each external call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub transcription: Duration,
    pub generation: Duration,
    pub synthesis: Duration,
    pub classification: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            transcription: Duration::from_secs(30),
            generation: Duration::from_secs(90),
            synthesis: Duration::from_secs(30),
            classification: Duration::from_secs(10),
        }
    }
}

/// API keys for external services
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    /// `OpenAI` API key (Whisper, TTS, chat)
    pub openai: Option<SecretString>,

    /// `ElevenLabs` API key (optional TTS)
    pub elevenlabs: Option<SecretString>,

    /// `Deepgram` API key (optional STT)
    pub deepgram: Option<SecretString>,
}

impl Config {
    /// Load configuration from the environment and the TOML config file
    ///
    /// # Errors
    ///
    /// Returns error if a value is present but invalid
    pub fn load() -> Result<Self> {
        let fc = file::load_config_file();
        Self::resolve(fc, |key| std::env::var(key).ok())
    }

    /// Resolve configuration from a parsed file and an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if a provider name or threshold is invalid
    #[allow(clippy::too_many_lines)]
    pub fn resolve(fc: file::JarvisConfigFile, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let flag = |key: &str| env(key).map(|v| v == "1" || v.eq_ignore_ascii_case("true"));

        // Controller switches (env > toml > default)
        let defaults = ControllerConfig::default();
        let intent_threshold = env("JARVIS_INTENT_THRESHOLD")
            .and_then(|s| s.parse().ok())
            .or(fc.controller.intent_threshold)
            .unwrap_or(defaults.intent_threshold);
        if !(0.0..=1.0).contains(&intent_threshold) {
            return Err(Error::Config(format!(
                "intent threshold must be within [0, 1], got {intent_threshold}"
            )));
        }
        let controller = ControllerConfig {
            microphone: env("JARVIS_MICROPHONE")
                .and_then(|s| s.parse().ok())
                .or(fc.controller.microphone),
            wake_word: flag("JARVIS_WAKE_WORD")
                .or(fc.controller.wake_word)
                .unwrap_or(defaults.wake_word),
            always_listening: flag("JARVIS_ALWAYS_LISTENING")
                .or(fc.controller.always_listening)
                .unwrap_or(defaults.always_listening),
            intent_threshold,
            llm_intent: flag("JARVIS_LLM_INTENT")
                .or(fc.controller.llm_intent)
                .unwrap_or(defaults.llm_intent),
        };

        // Capture process
        let defaults = CaptureConfig::default();
        let capture = CaptureConfig {
            interpreter: env("JARVIS_CAPTURE_INTERPRETER")
                .or(fc.capture.interpreter)
                .unwrap_or(defaults.interpreter),
            script: env("JARVIS_CAPTURE_SCRIPT")
                .or(fc.capture.script)
                .map_or(defaults.script, PathBuf::from),
            working_dir: env("JARVIS_CAPTURE_DIR")
                .or(fc.capture.working_dir)
                .map(PathBuf::from),
            audio_path: fc
                .capture
                .audio_path
                .map_or(defaults.audio_path, PathBuf::from),
            min_audio_bytes: fc
                .capture
                .min_audio_bytes
                .unwrap_or(defaults.min_audio_bytes),
            keyboard_script: env("JARVIS_KEYBOARD_SCRIPT")
                .or(fc.capture.keyboard_script)
                .map(PathBuf::from),
        };

        // Voice config (env > toml > default)
        let defaults = VoiceConfig::default();
        let stt_provider = match env("JARVIS_STT_PROVIDER")
            .or(fc.voice.stt_provider)
            .as_deref()
        {
            None | Some("openai") => SttProvider::OpenAi,
            Some("deepgram") => SttProvider::Deepgram,
            Some(other) => return Err(Error::Config(format!("unknown STT provider: {other}"))),
        };
        let tts_provider = match env("JARVIS_TTS_PROVIDER")
            .or(fc.voice.tts_provider)
            .as_deref()
        {
            None | Some("openai") => TtsProvider::OpenAi,
            Some("elevenlabs") => TtsProvider::ElevenLabs,
            Some(other) => return Err(Error::Config(format!("unknown TTS provider: {other}"))),
        };
        let voice = VoiceConfig {
            stt_provider,
            stt_model: env("JARVIS_STT_MODEL")
                .or(fc.voice.stt_model)
                .unwrap_or(defaults.stt_model),
            language: fc.voice.language.unwrap_or(defaults.language),
            tts_provider,
            tts_model: env("JARVIS_TTS_MODEL")
                .or(fc.voice.tts_model)
                .unwrap_or(defaults.tts_model),
            tts_voice: env("JARVIS_TTS_VOICE")
                .or(fc.voice.tts_voice)
                .unwrap_or(defaults.tts_voice),
            tts_speed: fc.voice.tts_speed.unwrap_or(defaults.tts_speed),
            response_audio_path: fc
                .voice
                .response_audio_path
                .map_or(defaults.response_audio_path, PathBuf::from),
            player: fc
                .voice
                .player
                .filter(|p| !p.is_empty())
                .unwrap_or(defaults.player),
            cue_sound: fc.voice.cue_sound.map(PathBuf::from),
        };

        // LLM (env > toml > default)
        let defaults = LlmConfig::default();
        let llm = LlmConfig {
            base_url: env("JARVIS_LLM_BASE_URL")
                .or(fc.llm.base_url)
                .unwrap_or(defaults.base_url),
            model: env("JARVIS_LLM_MODEL")
                .or(fc.llm.model)
                .unwrap_or(defaults.model),
            max_tokens: fc.llm.max_tokens.unwrap_or(defaults.max_tokens),
            max_steps: fc.llm.max_steps.unwrap_or(defaults.max_steps).max(1),
            assistant_name: fc.llm.assistant_name.unwrap_or(defaults.assistant_name),
        };

        let defaults = Timeouts::default();
        let secs = |v: Option<u64>, d: Duration| v.map_or(d, Duration::from_secs);
        let timeouts = Timeouts {
            transcription: secs(fc.timeouts.transcription, defaults.transcription),
            generation: secs(fc.timeouts.generation, defaults.generation),
            synthesis: secs(fc.timeouts.synthesis, defaults.synthesis),
            classification: secs(fc.timeouts.classification, defaults.classification),
        };

        // API keys (env > toml > None)
        let api_keys = ApiKeys {
            openai: env("OPENAI_API_KEY")
                .or(fc.api_keys.openai)
                .map(SecretString::from),
            elevenlabs: env("ELEVENLABS_API_KEY")
                .or(fc.api_keys.elevenlabs)
                .map(SecretString::from),
            deepgram: env("DEEPGRAM_API_KEY")
                .or(fc.api_keys.deepgram)
                .map(SecretString::from),
        };

        // Determine data directory (~/.local/share/jarvis on Linux)
        let data_dir = env("JARVIS_DATA_DIR")
            .or(fc.data_dir)
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                directories::BaseDirs::new()
                    .map_or_else(|| PathBuf::from("."), |d| d.data_dir().join("jarvis"))
            });

        Ok(Self {
            controller,
            capture,
            voice,
            llm,
            timeouts,
            api_keys,
            data_dir,
        })
    }
}

/// Pick an installed audio player, preferring ones that exit when done
fn default_player() -> Vec<String> {
    let candidates: [&[&str]; 4] = [
        &["afplay"],
        &["mpv", "--no-video", "--really-quiet"],
        &["ffplay", "-nodisp", "-autoexit", "-loglevel", "quiet"],
        &["mpg123", "-q"],
    ];

    candidates
        .iter()
        .find(|c| which::which(c[0]).is_ok())
        .unwrap_or(&candidates[0])
        .iter()
        .map(ToString::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_sources() {
        let config = Config::resolve(file::JarvisConfigFile::default(), |_| None).unwrap();

        assert_eq!(config.controller, ControllerConfig::default());
        assert!((config.controller.intent_threshold - 0.7).abs() < f32::EPSILON);
        assert_eq!(config.capture.min_audio_bytes, 1000);
        assert_eq!(config.llm.max_steps, 5);
        assert!(config.api_keys.openai.is_none());
    }

    #[test]
    fn env_overrides_file() {
        let fc: file::JarvisConfigFile = toml::from_str(
            r#"
            [controller]
            microphone = 1
            always_listening = false

            [api_keys]
            openai = "from-file"
            "#,
        )
        .unwrap();
        let env = env_from(&[
            ("JARVIS_MICROPHONE", "4"),
            ("JARVIS_ALWAYS_LISTENING", "true"),
            ("OPENAI_API_KEY", "from-env"),
        ]);

        let config = Config::resolve(fc, env).unwrap();

        assert_eq!(config.controller.microphone, Some(4));
        assert!(config.controller.always_listening);
        assert_eq!(
            config.api_keys.openai.as_ref().map(ExposeSecret::expose_secret),
            Some("from-env")
        );
    }

    #[test]
    fn rejects_unknown_provider() {
        let env = env_from(&[("JARVIS_TTS_PROVIDER", "espeak")]);
        let err = Config::resolve(file::JarvisConfigFile::default(), env).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn rejects_threshold_out_of_range() {
        let env = env_from(&[("JARVIS_INTENT_THRESHOLD", "1.5")]);
        assert!(Config::resolve(file::JarvisConfigFile::default(), env).is_err());
    }

    #[test]
    fn capture_file_resolves_against_working_dir() {
        let capture = CaptureConfig {
            working_dir: Some(PathBuf::from("/opt/jarvis")),
            ..CaptureConfig::default()
        };
        assert_eq!(capture.capture_file(), PathBuf::from("/opt/jarvis/command.wav"));
    }
}
