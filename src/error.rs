//! Error types for the voice controller

use std::time::Duration;

use thiserror::Error;

/// Result type alias for voice controller operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the voice controller
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Capture subprocess error (spawn failure, broken pipe)
    #[error("capture error: {0}")]
    Capture(String),

    /// Audio artifact error
    #[error("audio error: {0}")]
    Audio(String),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// Audio player error
    #[error("playback error: {0}")]
    Playback(String),

    /// Response generation error
    #[error("generation error: {0}")]
    Generation(String),

    /// Memory store error
    #[error("memory error: {0}")]
    Memory(String),

    /// Tool execution error
    #[error("tool error: {0}")]
    Tool(String),

    /// An external call did not finish in time
    #[error("{step} timed out after {}s", after.as_secs())]
    Timeout {
        /// Pipeline step that timed out
        step: &'static str,
        /// Configured limit
        after: Duration,
    },

    /// The in-flight work was cancelled by an interruption
    #[error("interrupted")]
    Interrupted,

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// WAV decoding error
    #[error("wav error: {0}")]
    Wav(#[from] hound::Error),
}

impl Error {
    /// Whether this error only signals a deliberate interruption
    ///
    /// Cancellation-shaped errors are never surfaced to the user.
    #[must_use]
    pub const fn is_cancellation(&self) -> bool {
        matches!(self, Self::Interrupted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_is_distinguished() {
        assert!(Error::Interrupted.is_cancellation());
        assert!(!Error::Stt("boom".to_string()).is_cancellation());
    }

    #[test]
    fn test_timeout_message() {
        let err = Error::Timeout {
            step: "transcription",
            after: Duration::from_secs(30),
        };
        assert_eq!(err.to_string(), "transcription timed out after 30s");
    }
}
