//! Turn pipelines: recorded utterances, always-listening segments, typed input
//!
//! Each step that follows an await re-checks that its turn is still current
//! before touching state or emitting anything user-facing.

use std::sync::{Arc, Weak};

use super::prompt::{self, PromptContext};
use super::{Turn, VoiceController};
use crate::events::{LogLevel, Status, VoiceEvent};
use crate::intent::IntentSignals;
use crate::llm::{AssistantReply, GenerationRequest};
use crate::memory::Role;
use crate::supervisor::CaptureCommand;
use crate::tools::{AssistantControl, ToolContext};
use crate::voice::{Capture, TranscriptionRequest, inspect_capture, stt};
use crate::{Error, Result};

/// Prior conversation entries sent with each request
const HISTORY_TURNS: usize = 10;

const APOLOGY_UNHEARD: &str = "Sorry, I didn't catch that.";
const APOLOGY_FAILED: &str = "Sorry, something went wrong while I was working on that.";

impl VoiceController {
    /// RECORDING_COMPLETE: the capture file holds one utterance
    pub(super) async fn run_recorded_turn(&self, turn: &Turn) {
        let Some(audio) = self.load_capture().await else {
            self.settle(turn, Status::Processing);
            return;
        };

        let transcript = match self.transcribe(turn, audio).await {
            Ok(text) => text,
            Err(e) if e.is_cancellation() => return,
            Err(e) => {
                self.fail_turn(turn, &e, APOLOGY_UNHEARD).await;
                return;
            }
        };

        let transcript = transcript.trim();
        if transcript.is_empty() {
            self.log(LogLevel::Info, "no speech in recording");
            self.settle(turn, Status::Processing);
            return;
        }

        if !self.still(turn, Status::Processing) {
            return;
        }
        self.run_text_turn(turn, transcript).await;
    }

    /// SPEECH_SEGMENT: decide whether overheard speech was meant for us
    pub(super) async fn run_segment_turn(&self, turn: &Turn, wake_word_confidence: f32) {
        let Some(audio) = self.load_capture().await else {
            self.settle(turn, Status::Transcribing);
            return;
        };

        let transcript = match self.transcribe(turn, audio).await {
            Ok(text) => text,
            Err(e) if e.is_cancellation() => return,
            Err(e) => {
                if self.still(turn, Status::Transcribing) {
                    self.log(LogLevel::Warn, format!("segment transcription failed: {e}"));
                    self.settle(turn, Status::Transcribing);
                }
                return;
            }
        };

        let transcript = transcript.trim().to_string();
        if transcript.is_empty() {
            self.settle(turn, Status::Transcribing);
            return;
        }

        let (wake_word_recent, last_assistant_turn) = {
            let mut state = self.lock();
            if !Self::is_current(&state, turn, Status::Transcribing) {
                return;
            }
            let recent = std::mem::take(&mut state.last_wake_word);
            self.transition(&mut state, Status::IntentChecking);
            (recent, state.last_assistant_turn)
        };

        let signals = IntentSignals {
            transcript: &transcript,
            wake_word_recent,
            wake_word_confidence,
            last_assistant_turn,
        };
        let decision = tokio::select! {
            () = turn.token.cancelled() => return,
            decision = self.intent.decide(&signals) => decision,
        };

        {
            let mut state = self.lock();
            if !Self::is_current(&state, turn, Status::IntentChecking) {
                return;
            }

            if !decision.should_respond {
                tracing::debug!(confidence = decision.confidence, "background speech");
                self.events.publish(VoiceEvent::BackgroundSpeech {
                    transcript,
                    confidence: decision.confidence,
                });
                let rest = self.resting(&state);
                self.transition(&mut state, rest);
                return;
            }

            self.events.publish(VoiceEvent::IntentDetected {
                transcript: transcript.clone(),
                confidence: decision.confidence,
            });
            self.transition(&mut state, Status::Processing);
        }

        self.run_text_turn(turn, &transcript).await;
    }

    /// Record the user's words, then generate and speak the reply
    pub(super) async fn run_text_turn(&self, turn: &Turn, text: &str) {
        self.events.publish(VoiceEvent::Transcription {
            text: text.to_string(),
        });
        self.remember(Role::User, text).await;

        let raw = match self.generate(turn, text).await {
            Ok(raw) => raw,
            Err(e) if e.is_cancellation() => return,
            Err(e) => {
                self.fail_turn(turn, &e, APOLOGY_FAILED).await;
                return;
            }
        };

        let reply = AssistantReply::parse(&raw);

        {
            let mut state = self.lock();
            if !Self::is_current(&state, turn, Status::Processing) {
                tracing::debug!(turn = turn.id, "reply dropped, turn superseded");
                return;
            }
            state.last_assistant_turn = Some(std::time::Instant::now());
            self.events.publish(VoiceEvent::Response {
                display_text: reply.display_text.clone(),
                speech_text: reply.speech_text.clone(),
                expects_follow_up: reply.expect_follow_up,
            });
        }
        self.remember(Role::Assistant, &reply.display_text).await;

        if let Err(e) = self.speaker.speak(&reply.speech_text, &turn.token).await
            && !e.is_cancellation()
            && self.still(turn, Status::Processing)
        {
            tracing::error!(error = %e, "speech failed");
            self.events
                .publish(VoiceEvent::error(format!("could not speak reply: {e}")));
        }

        self.finish_turn(turn, reply.expect_follow_up).await;
    }

    async fn finish_turn(&self, turn: &Turn, expect_follow_up: bool) {
        let follow_up = {
            let mut state = self.lock();
            if !Self::is_current(&state, turn, Status::Processing) {
                return;
            }
            if expect_follow_up && state.capture_active {
                state.is_recording = true;
                self.transition(&mut state, Status::Recording);
                true
            } else {
                let rest = self.resting(&state);
                self.transition(&mut state, rest);
                false
            }
        };

        if follow_up && !self.capture.send(CaptureCommand::RecordNow.as_str()).await {
            self.log(LogLevel::Warn, "could not start follow-up recording");
            self.abandon_recording(turn);
        }
    }

    /// Read the capture file, logging why it was rejected
    async fn load_capture(&self) -> Option<Vec<u8>> {
        let capture = &self.settings.capture;
        match inspect_capture(&capture.capture_file(), capture.min_audio_bytes).await {
            Capture::Ready(audio) => Some(audio),
            Capture::TooShort { bytes } => {
                self.log(
                    LogLevel::Info,
                    format!("recording too short, ignored ({bytes} bytes)"),
                );
                None
            }
        }
    }

    async fn transcribe(&self, turn: &Turn, audio: Vec<u8>) -> Result<String> {
        let vocabulary = self.memory.vocabulary().await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "vocabulary unavailable");
            Vec::new()
        });
        let request = TranscriptionRequest::new(audio, self.settings.language.clone())
            .with_prompt(stt::vocabulary_prompt(
                &self.settings.assistant_name,
                &vocabulary,
            ));

        let limit = self.settings.timeouts.transcription;
        let call = tokio::time::timeout(limit, self.transcriber.transcribe(request));
        tokio::select! {
            () = turn.token.cancelled() => Err(Error::Interrupted),
            result = call => result.map_err(|_| Error::Timeout {
                step: "transcription",
                after: limit,
            })?,
        }
    }

    async fn generate(&self, turn: &Turn, text: &str) -> Result<String> {
        let microphone = self.lock().microphone;
        let context = PromptContext::gather(self.memory.as_ref(), microphone).await;

        let mut history = self
            .memory
            .recent_history(HISTORY_TURNS + 1)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "history unavailable");
                Vec::new()
            });
        // The utterance was already appended; it is sent as the user message
        if history
            .last()
            .is_some_and(|entry| entry.role == Role::User && entry.text == text)
        {
            history.pop();
        }
        let skip = history.len().saturating_sub(HISTORY_TURNS);
        history.drain(..skip);

        let request = GenerationRequest {
            system: prompt::system_prompt(&self.settings.assistant_name, &context),
            history,
            user: text.to_string(),
        };

        let control: Weak<dyn AssistantControl> = self.me.clone();
        let ctx = ToolContext::new(Arc::clone(&self.memory)).with_control(control);

        let limit = self.settings.timeouts.generation;
        let call = tokio::time::timeout(limit, self.generator.generate(&request, &self.tools, &ctx));
        tokio::select! {
            () = turn.token.cancelled() => Err(Error::Interrupted),
            result = call => result.map_err(|_| Error::Timeout {
                step: "generation",
                after: limit,
            })?,
        }
    }

    /// Report a failed turn, apologize out loud, and rest
    async fn fail_turn(&self, turn: &Turn, error: &Error, apology: &str) {
        {
            let state = self.lock();
            if !Self::is_current(&state, turn, Status::Processing) {
                return;
            }
            tracing::error!(turn = turn.id, error = %error, "turn failed");
            self.events.publish(VoiceEvent::error(error.to_string()));
            self.events.publish(VoiceEvent::Response {
                display_text: apology.to_string(),
                speech_text: apology.to_string(),
                expects_follow_up: false,
            });
        }

        if let Err(e) = self.speaker.speak(apology, &turn.token).await {
            tracing::debug!(error = %e, "apology not spoken");
        }
        self.settle(turn, Status::Processing);
    }

    async fn remember(&self, role: Role, text: &str) {
        if let Err(e) = self.memory.append_history(role, text).await {
            tracing::warn!(error = %e, "failed to record conversation history");
        }
    }

    /// Whether `turn` is current and the status still `expected`
    fn still(&self, turn: &Turn, expected: Status) -> bool {
        Self::is_current(&self.lock(), turn, expected)
    }

    /// Return to resting if `turn` is still current in `expected`
    fn settle(&self, turn: &Turn, expected: Status) {
        let mut state = self.lock();
        if Self::is_current(&state, turn, expected) {
            let rest = self.resting(&state);
            self.transition(&mut state, rest);
        }
    }
}
