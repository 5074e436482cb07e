//! Controller status and the event stream published to listeners
//!
//! Events are fanned out to every subscriber through its own unbounded
//! channel. Publishing never blocks and never drops: a slow subscriber only
//! grows its own queue, and a dropped subscriber is pruned on the next send.

use std::fmt;
use std::sync::{Mutex, PoisonError};

use serde::Serialize;
use tokio::sync::mpsc;

/// What the controller is currently doing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Status {
    /// Not listening; capture process is not running
    Idle,
    /// Waiting for a wake word, keyboard trigger or speech segment
    Listening,
    /// Wake word observed, recording about to start
    WakeWordDetected,
    /// Capture process is recording an utterance
    Recording,
    /// Transcribing an always-listening speech segment
    Transcribing,
    /// Deciding whether a speech segment was addressed to the assistant
    IntentChecking,
    /// Running the transcribe → generate → speak pipeline
    Processing,
    /// Capture process failed; caller decides whether to restart
    Error,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Listening => "listening",
            Self::WakeWordDetected => "wake-word-detected",
            Self::Recording => "recording",
            Self::Transcribing => "transcribing",
            Self::IntentChecking => "intent-checking",
            Self::Processing => "processing",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// Severity of a log event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// An event emitted by the controller
///
/// Serializes as `{"type": ..., "data": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum VoiceEvent {
    /// Status changed
    Status(Status),
    /// Wake word or manual activation
    #[serde(rename_all = "camelCase")]
    WakeWord {
        confidence: f32,
        /// Activation cut off speech that was in progress
        interrupted: bool,
        /// Triggered from the keyboard rather than acoustically
        manual: bool,
    },
    /// User utterance as text
    Transcription { text: String },
    /// Assistant reply
    #[serde(rename_all = "camelCase")]
    Response {
        display_text: String,
        speech_text: String,
        expects_follow_up: bool,
    },
    /// A failure the user should know about
    Error { message: String },
    /// Diagnostic output
    Log { level: LogLevel, message: String },
    /// Speech segment judged not to be addressed to the assistant
    BackgroundSpeech { transcript: String, confidence: f32 },
    /// Speech segment accepted by the intent gate
    IntentDetected { transcript: String, confidence: f32 },
}

impl VoiceEvent {
    /// The wire name of this event's type
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Status(_) => "status",
            Self::WakeWord { .. } => "wake-word",
            Self::Transcription { .. } => "transcription",
            Self::Response { .. } => "response",
            Self::Error { .. } => "error",
            Self::Log { .. } => "log",
            Self::BackgroundSpeech { .. } => "background-speech",
            Self::IntentDetected { .. } => "intent-detected",
        }
    }

    pub(crate) fn log(level: LogLevel, message: impl Into<String>) -> Self {
        Self::Log {
            level,
            message: message.into(),
        }
    }

    pub(crate) fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

/// Fan-out publisher for controller events
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<VoiceEvent>>>,
}

impl EventBus {
    /// Create a bus with no subscribers
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to every event published from now on
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<VoiceEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    /// Publish an event to all live subscribers
    pub fn publish(&self, event: VoiceEvent) {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Number of live subscribers
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|tx| !tx.is_closed());
        subscribers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_kebab_case() {
        let json = serde_json::to_value(VoiceEvent::Status(Status::WakeWordDetected)).unwrap();
        assert_eq!(json["type"], "status");
        assert_eq!(json["data"], "wake-word-detected");
        assert_eq!(Status::IntentChecking.to_string(), "intent-checking");
    }

    #[test]
    fn wake_word_event_shape() {
        let event = VoiceEvent::WakeWord {
            confidence: 0.5,
            interrupted: true,
            manual: false,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "wake-word");
        assert_eq!(json["data"]["interrupted"], true);
        assert_eq!(event.kind(), "wake-word");
    }

    #[test]
    fn response_event_uses_camel_case_fields() {
        let event = VoiceEvent::Response {
            display_text: "a".to_string(),
            speech_text: "b".to_string(),
            expects_follow_up: false,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["data"]["displayText"], "a");
        assert_eq!(json["data"]["expectsFollowUp"], false);
    }

    #[test]
    fn publish_fans_out_in_order() {
        let bus = EventBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.publish(VoiceEvent::Status(Status::Listening));
        bus.publish(VoiceEvent::Status(Status::Recording));

        for rx in [&mut a, &mut b] {
            assert_eq!(rx.try_recv().unwrap(), VoiceEvent::Status(Status::Listening));
            assert_eq!(rx.try_recv().unwrap(), VoiceEvent::Status(Status::Recording));
        }
    }

    #[test]
    fn dropped_subscriber_does_not_affect_others() {
        let bus = EventBus::new();
        let dropped = bus.subscribe();
        let mut kept = bus.subscribe();
        drop(dropped);

        bus.publish(VoiceEvent::error("boom"));

        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(kept.try_recv().unwrap().kind(), "error");
    }
}
