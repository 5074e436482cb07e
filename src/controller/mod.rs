//! Voice interaction controller
//!
//! The controller is the only component that changes [`Status`]. It consumes
//! capture process lines, keyboard signals and API calls, and runs at most one
//! turn (record, transcribe, generate, speak) at a time.
//!
//! Every turn carries an id and a cancellation token. A pipeline step that
//! resumes after a suspension point only transitions if its turn is still the
//! current one and the status is still what the step presupposes. Interrupting
//! therefore never needs a lock held across an await: it changes the status,
//! cancels the token, and the stale pipeline quietly no-ops.

mod pipeline;
mod prompt;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::{CaptureConfig, Config, ControllerConfig, Timeouts};
use crate::events::{EventBus, LogLevel, Status, VoiceEvent};
use crate::intent::IntentGate;
use crate::llm::Generator;
use crate::memory::Memory;
use crate::supervisor::{
    CaptureBackend, CaptureCommand, CaptureLine, KeyboardSignal, ProcessSpec, SupervisorEvent,
};
use crate::tools::{AssistantControl, ToolRegistry};
use crate::voice::{Speaker, Transcriber};
use crate::Result;

/// Settings the controller reads but never changes
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub controller: ControllerConfig,
    pub capture: CaptureConfig,
    /// Transcription language hint
    pub language: String,
    pub assistant_name: String,
    pub timeouts: Timeouts,
}

impl ControllerSettings {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            controller: config.controller.clone(),
            capture: config.capture.clone(),
            language: config.voice.language.clone(),
            assistant_name: config.llm.assistant_name.clone(),
            timeouts: config.timeouts,
        }
    }
}

/// Services the controller drives
pub struct Collaborators {
    pub capture: Arc<dyn CaptureBackend>,
    /// Global hotkey listener, if any
    pub keyboard: Option<Arc<dyn CaptureBackend>>,
    pub transcriber: Arc<dyn Transcriber>,
    pub generator: Arc<dyn Generator>,
    pub speaker: Speaker,
    pub intent: IntentGate,
    pub memory: Arc<dyn Memory>,
    pub tools: ToolRegistry,
}

/// One unit of interaction work
#[derive(Debug, Clone)]
struct Turn {
    id: u64,
    token: CancellationToken,
}

impl Turn {
    fn new(id: u64) -> Self {
        Self {
            id,
            token: CancellationToken::new(),
        }
    }
}

struct State {
    status: Status,
    is_recording: bool,
    is_muted: bool,
    /// One-shot: consumed by the next intent decision
    last_wake_word: bool,
    microphone: Option<u32>,
    capture_active: bool,
    /// Identifies the current capture process; lines from older ones are dropped
    session: u64,
    turn: Turn,
    last_assistant_turn: Option<Instant>,
}

/// The voice interaction state machine
pub struct VoiceController {
    me: Weak<Self>,
    settings: ControllerSettings,
    state: Mutex<State>,
    events: EventBus,
    capture: Arc<dyn CaptureBackend>,
    keyboard: Option<Arc<dyn CaptureBackend>>,
    transcriber: Arc<dyn Transcriber>,
    generator: Arc<dyn Generator>,
    speaker: Speaker,
    intent: IntentGate,
    memory: Arc<dyn Memory>,
    tools: ToolRegistry,
}

impl VoiceController {
    /// Create an idle controller
    #[must_use]
    pub fn new(settings: ControllerSettings, services: Collaborators) -> Arc<Self> {
        let state = State {
            status: Status::Idle,
            is_recording: false,
            is_muted: false,
            last_wake_word: false,
            microphone: settings.controller.microphone,
            capture_active: false,
            session: 0,
            turn: Turn::new(0),
            last_assistant_turn: None,
        };

        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            settings,
            state: Mutex::new(state),
            events: EventBus::new(),
            capture: services.capture,
            keyboard: services.keyboard,
            transcriber: services.transcriber,
            generator: services.generator,
            speaker: services.speaker,
            intent: services.intent,
            memory: services.memory,
            tools: services.tools,
        })
    }

    /// Receive every event emitted from now on
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<VoiceEvent> {
        self.events.subscribe()
    }

    #[must_use]
    pub fn status(&self) -> Status {
        self.lock().status
    }

    #[must_use]
    pub fn is_muted(&self) -> bool {
        self.lock().is_muted
    }

    #[must_use]
    pub fn is_recording(&self) -> bool {
        self.lock().is_recording
    }

    #[must_use]
    pub fn microphone(&self) -> Option<u32> {
        self.lock().microphone
    }

    /// Start the capture process (and keyboard listener) and begin listening
    ///
    /// # Errors
    ///
    /// Returns error if the capture process cannot be spawned; the controller
    /// is left in [`Status::Error`] and the caller decides whether to retry.
    pub async fn start(&self) -> Result<()> {
        if self.lock().capture_active {
            return Ok(());
        }
        self.spawn_capture().await?;
        self.start_keyboard().await;
        Ok(())
    }

    /// Stop everything: speech, the current turn, and both processes
    pub async fn shutdown(&self) {
        {
            let mut state = self.lock();
            self.interrupt(&mut state);
            Self::begin_turn(&mut state);
            state.is_recording = false;
            state.capture_active = false;
            state.session += 1;
            self.transition(&mut state, Status::Idle);
        }

        self.capture.stop().await;
        if let Some(keyboard) = &self.keyboard {
            keyboard.stop().await;
        }
        tracing::info!("voice controller shut down");
    }

    /// Switch microphones by restarting the capture process
    ///
    /// A turn already past recording keeps running; a recording in progress
    /// is lost with the old process.
    ///
    /// # Errors
    ///
    /// Returns error if the new capture process cannot be spawned
    pub async fn update_microphone(&self, index: u32) -> Result<()> {
        let restart = {
            let mut state = self.lock();
            state.microphone = Some(index);
            let restart = state.capture_active || state.status == Status::Error;
            if restart {
                state.session += 1;
                state.capture_active = false;
            }
            if state.status == Status::Recording {
                Self::begin_turn(&mut state);
                state.is_recording = false;
                self.transition(&mut state, Status::Listening);
            }
            restart
        };

        self.log(LogLevel::Info, format!("switching to microphone {index}"));
        if !restart {
            return Ok(());
        }

        self.capture.stop().await;
        self.spawn_capture().await
    }

    /// Ignore (or resume reacting to) wake words and speech segments
    ///
    /// Nothing in flight is cancelled.
    pub fn set_muted(&self, muted: bool) {
        let mut state = self.lock();
        if state.is_muted == muted {
            return;
        }
        state.is_muted = muted;
        drop(state);
        self.log(LogLevel::Info, if muted { "muted" } else { "unmuted" });
    }

    /// Flip the mute flag, returning the new value
    pub fn toggle_mute(&self) -> bool {
        let muted = !self.is_muted();
        self.set_muted(muted);
        muted
    }

    /// Start recording without a wake word (keyboard trigger)
    ///
    /// Interrupts a reply in progress.
    pub async fn manual_activate(&self) {
        let turn = {
            let mut state = self.lock();
            if state.status == Status::Recording {
                tracing::debug!("already recording");
                return;
            }

            let interrupted = matches!(
                state.status,
                Status::Processing | Status::Transcribing | Status::IntentChecking
            );
            self.interrupt(&mut state);
            let turn = Self::begin_turn(&mut state);
            self.events.publish(VoiceEvent::WakeWord {
                confidence: 1.0,
                interrupted,
                manual: true,
            });
            self.speaker.play_cue();
            state.is_recording = true;
            self.transition(&mut state, Status::Recording);
            turn
        };

        if !self.capture.send(CaptureCommand::RecordNow.as_str()).await {
            self.events.publish(VoiceEvent::error(
                "cannot record: capture process is not running",
            ));
            self.abandon_recording(&turn);
        }
    }

    /// End a manual recording; the capture process then reports completion
    pub async fn manual_deactivate(&self) {
        if self.status() != Status::Recording {
            tracing::debug!("not recording, deactivate ignored");
            return;
        }
        if !self.capture.send(CaptureCommand::StopRecording.as_str()).await {
            self.log(LogLevel::Warn, "failed to send stop to capture process");
        }
    }

    /// Stop speaking, abandon any recording, and go back to resting
    pub async fn cancel_interaction(&self) {
        let was_recording = {
            let mut state = self.lock();
            let was_recording = state.status == Status::Recording;
            self.interrupt(&mut state);
            Self::begin_turn(&mut state);
            state.is_recording = false;
            let rest = self.resting(&state);
            self.transition(&mut state, rest);
            was_recording
        };

        if was_recording {
            self.capture
                .send(CaptureCommand::StopRecording.as_str())
                .await;
        }
    }

    /// Handle typed input as if it had been transcribed
    ///
    /// Skips capture and transcription and returns when the turn is over.
    pub async fn process_text_input(&self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }

        let (turn, was_recording) = {
            let mut state = self.lock();
            let was_recording = state.status == Status::Recording;
            self.interrupt(&mut state);
            let turn = Self::begin_turn(&mut state);
            state.is_recording = false;
            self.transition(&mut state, Status::Processing);
            (turn, was_recording)
        };
        if was_recording {
            self.capture
                .send(CaptureCommand::StopRecording.as_str())
                .await;
        }

        self.run_text_turn(&turn, text).await;
    }

    /// React to one line from the capture process
    pub fn handle_capture_line(&self, line: CaptureLine) {
        match line {
            CaptureLine::Ready => self.log(LogLevel::Info, "capture process ready"),
            CaptureLine::Debug(text) => self.log(LogLevel::Debug, text),
            CaptureLine::Unknown(text) => {
                self.log(LogLevel::Debug, format!("unknown capture output: {text}"));
            }
            CaptureLine::Detected(confidence) => self.on_wake_word(confidence),
            CaptureLine::RecordingComplete => self.on_recording_complete(),
            CaptureLine::SpeechSegment(confidence) => self.on_speech_segment(confidence),
        }
    }

    /// React to one line from the keyboard listener
    pub async fn handle_keyboard_signal(&self, signal: KeyboardSignal) {
        match signal {
            KeyboardSignal::Ready => self.log(LogLevel::Info, "keyboard listener ready"),
            KeyboardSignal::PressStart | KeyboardSignal::ToggleOn => self.manual_activate().await,
            KeyboardSignal::PressEnd | KeyboardSignal::ToggleOff => self.manual_deactivate().await,
            KeyboardSignal::Cancel => self.cancel_interaction().await,
            KeyboardSignal::Unknown(line) => {
                tracing::debug!(line = %line, "unknown keyboard output");
            }
        }
    }

    fn on_wake_word(&self, confidence: f32) {
        let mut state = self.lock();
        if state.is_muted {
            tracing::debug!(confidence, "muted, wake word ignored");
            return;
        }

        match state.status {
            Status::Listening => {
                Self::begin_turn(&mut state);
                state.last_wake_word = true;
                self.transition(&mut state, Status::WakeWordDetected);
                self.events.publish(VoiceEvent::WakeWord {
                    confidence,
                    interrupted: false,
                    manual: false,
                });
                self.speaker.play_cue();
                state.is_recording = true;
                self.transition(&mut state, Status::Recording);
            }
            Status::Processing => {
                self.interrupt(&mut state);
                Self::begin_turn(&mut state);
                state.last_wake_word = true;
                self.events.publish(VoiceEvent::WakeWord {
                    confidence,
                    interrupted: true,
                    manual: false,
                });
                state.is_recording = false;
                self.transition(&mut state, Status::Listening);
            }
            other => tracing::debug!(status = %other, confidence, "wake word ignored"),
        }
    }

    fn on_recording_complete(&self) {
        let turn = {
            let mut state = self.lock();
            if state.status != Status::Recording {
                tracing::debug!(status = %state.status, "stale recording completion ignored");
                return;
            }
            state.is_recording = false;
            self.transition(&mut state, Status::Processing);
            state.turn.clone()
        };

        if let Some(this) = self.me.upgrade() {
            tokio::spawn(async move { this.run_recorded_turn(&turn).await });
        }
    }

    fn on_speech_segment(&self, confidence: f32) {
        if !self.settings.controller.always_listening {
            tracing::debug!("speech segment outside always-listening mode ignored");
            return;
        }

        let turn = {
            let mut state = self.lock();
            if state.is_muted {
                tracing::debug!("muted, speech segment ignored");
                return;
            }
            if !matches!(
                state.status,
                Status::Listening | Status::Transcribing | Status::IntentChecking
            ) {
                tracing::debug!(status = %state.status, "speech segment ignored");
                return;
            }
            // A newer segment supersedes one still being evaluated
            let turn = Self::begin_turn(&mut state);
            self.transition(&mut state, Status::Transcribing);
            turn
        };

        if let Some(this) = self.me.upgrade() {
            tokio::spawn(async move { this.run_segment_turn(&turn, confidence).await });
        }
    }

    async fn spawn_capture(&self) -> Result<()> {
        let spec = {
            let state = self.lock();
            let controller = ControllerConfig {
                microphone: state.microphone,
                ..self.settings.controller.clone()
            };
            ProcessSpec::capture(&self.settings.capture, &controller)
        };

        match self.capture.start(&spec).await {
            Ok(rx) => {
                let session = {
                    let mut state = self.lock();
                    state.session += 1;
                    state.capture_active = true;
                    if matches!(state.status, Status::Idle | Status::Error) {
                        self.transition(&mut state, Status::Listening);
                    }
                    state.session
                };
                tokio::spawn(Self::pump_capture(self.me.clone(), rx, session));
                Ok(())
            }
            Err(e) => {
                let mut state = self.lock();
                state.capture_active = false;
                self.events
                    .publish(VoiceEvent::error(format!("failed to start capture: {e}")));
                self.transition(&mut state, Status::Error);
                Err(e)
            }
        }
    }

    async fn start_keyboard(&self) {
        let (Some(keyboard), Some(spec)) =
            (&self.keyboard, ProcessSpec::keyboard(&self.settings.capture))
        else {
            return;
        };

        match keyboard.start(&spec).await {
            Ok(rx) => {
                tokio::spawn(Self::pump_keyboard(self.me.clone(), rx));
            }
            Err(e) => self.log(LogLevel::Warn, format!("keyboard listener unavailable: {e}")),
        }
    }

    async fn pump_capture(
        me: Weak<Self>,
        mut rx: mpsc::UnboundedReceiver<SupervisorEvent>,
        session: u64,
    ) {
        while let Some(event) = rx.recv().await {
            let Some(this) = me.upgrade() else {
                break;
            };
            if this.lock().session != session {
                tracing::debug!(?event, "output from a replaced capture process dropped");
                continue;
            }

            match event {
                SupervisorEvent::Stdout(line) => this.handle_capture_line(CaptureLine::parse(&line)),
                SupervisorEvent::Stderr(line) => this.log(LogLevel::Error, line),
                SupervisorEvent::Exited { code, requested } => {
                    this.on_capture_exit(session, code, requested);
                }
            }
        }
    }

    fn on_capture_exit(&self, session: u64, code: Option<i32>, requested: bool) {
        let mut state = self.lock();
        if requested || state.session != session {
            return;
        }

        state.capture_active = false;
        state.is_recording = false;
        self.interrupt(&mut state);
        Self::begin_turn(&mut state);

        let code = code.map_or_else(|| "signal".to_string(), |c| c.to_string());
        self.events.publish(VoiceEvent::error(format!(
            "capture process exited unexpectedly ({code})"
        )));
        self.transition(&mut state, Status::Error);
    }

    async fn pump_keyboard(me: Weak<Self>, mut rx: mpsc::UnboundedReceiver<SupervisorEvent>) {
        while let Some(event) = rx.recv().await {
            let Some(this) = me.upgrade() else {
                break;
            };
            match event {
                SupervisorEvent::Stdout(line) => {
                    this.handle_keyboard_signal(KeyboardSignal::parse(&line)).await;
                }
                SupervisorEvent::Stderr(line) => this.log(LogLevel::Warn, line),
                SupervisorEvent::Exited {
                    requested: false, ..
                } => this.log(LogLevel::Warn, "keyboard listener exited"),
                SupervisorEvent::Exited { .. } => {}
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn log(&self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            LogLevel::Debug => tracing::debug!(message = %message, "controller"),
            LogLevel::Info => tracing::info!(message = %message, "controller"),
            LogLevel::Warn => tracing::warn!(message = %message, "controller"),
            LogLevel::Error => tracing::error!(message = %message, "controller"),
        }
        self.events.publish(VoiceEvent::log(level, message));
    }

    /// Set the status, emitting an event if it changed
    fn transition(&self, state: &mut State, status: Status) {
        if state.status == status {
            return;
        }
        tracing::info!(from = %state.status, to = %status, "status changed");
        state.status = status;
        self.events.publish(VoiceEvent::Status(status));
    }

    /// Cancel the current turn and whatever it is saying
    fn interrupt(&self, state: &mut State) {
        state.turn.token.cancel();
        self.speaker.cancel();
    }

    fn begin_turn(state: &mut State) -> Turn {
        state.turn.token.cancel();
        state.turn = Turn::new(state.turn.id + 1);
        state.turn.clone()
    }

    fn is_current(state: &State, turn: &Turn, status: Status) -> bool {
        state.turn.id == turn.id && state.status == status && !turn.token.is_cancelled()
    }

    /// Where the controller goes when a turn ends
    fn resting(&self, state: &State) -> Status {
        if state.capture_active || self.settings.controller.always_listening {
            Status::Listening
        } else {
            Status::Idle
        }
    }

    /// Undo a recording that never started
    fn abandon_recording(&self, turn: &Turn) {
        let mut state = self.lock();
        if Self::is_current(&state, turn, Status::Recording) {
            state.is_recording = false;
            let rest = self.resting(&state);
            self.transition(&mut state, rest);
        }
    }
}

#[async_trait]
impl AssistantControl for VoiceController {
    async fn update_microphone(&self, index: u32) -> Result<()> {
        Self::update_microphone(self, index).await
    }

    fn set_muted(&self, muted: bool) {
        Self::set_muted(self, muted);
    }

    fn status(&self) -> Status {
        Self::status(self)
    }
}
