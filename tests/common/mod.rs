//! Shared test utilities: fake collaborators and a controller harness

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use jarvis_voice::config::{CaptureConfig, ControllerConfig, Timeouts};
use jarvis_voice::intent::{HeuristicClassifier, IntentGate};
use jarvis_voice::llm::{GenerationRequest, Generator};
use jarvis_voice::memory::{JsonMemory, Memory};
use jarvis_voice::supervisor::{CaptureBackend, ProcessSpec, SupervisorEvent};
use jarvis_voice::tools::{ToolContext, ToolRegistry};
use jarvis_voice::voice::{
    AudioPlayer, Speaker, Synthesizer, Transcriber, TranscriptionRequest,
};
use jarvis_voice::{
    Collaborators, ControllerSettings, Error, Result, Status, VoiceController, VoiceEvent,
};

/// How long a test waits for an expected event
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().expect("test mutex poisoned")
}

/// Capture backend driven by the test instead of a real process
#[derive(Default)]
pub struct FakeCapture {
    tx: Mutex<Option<mpsc::UnboundedSender<SupervisorEvent>>>,
    running: AtomicBool,
    pub fail_start: AtomicBool,
    pub starts: Mutex<Vec<ProcessSpec>>,
    pub sent: Mutex<Vec<String>>,
    pub stops: AtomicUsize,
}

impl FakeCapture {
    /// Deliver a stdout line as if the process printed it
    pub fn line(&self, line: &str) {
        if let Some(tx) = lock(&self.tx).as_ref() {
            let _ = tx.send(SupervisorEvent::Stdout(line.to_string()));
        }
    }

    pub fn stderr(&self, line: &str) {
        if let Some(tx) = lock(&self.tx).as_ref() {
            let _ = tx.send(SupervisorEvent::Stderr(line.to_string()));
        }
    }

    /// Simulate the process dying on its own
    pub fn crash(&self, code: i32) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(tx) = lock(&self.tx).take() {
            let _ = tx.send(SupervisorEvent::Exited {
                code: Some(code),
                requested: false,
            });
        }
    }

    pub fn sent(&self) -> Vec<String> {
        lock(&self.sent).clone()
    }

    pub fn starts(&self) -> Vec<ProcessSpec> {
        lock(&self.starts).clone()
    }
}

#[async_trait]
impl CaptureBackend for FakeCapture {
    async fn start(&self, spec: &ProcessSpec) -> Result<mpsc::UnboundedReceiver<SupervisorEvent>> {
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(Error::Capture("spawn failed".to_string()));
        }
        lock(&self.starts).push(spec.clone());
        let (tx, rx) = mpsc::unbounded_channel();
        *lock(&self.tx) = Some(tx);
        self.running.store(true, Ordering::SeqCst);
        Ok(rx)
    }

    async fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
        if let Some(tx) = lock(&self.tx).take() {
            let _ = tx.send(SupervisorEvent::Exited {
                code: None,
                requested: true,
            });
        }
    }

    async fn send(&self, line: &str) -> bool {
        if !self.running.load(Ordering::SeqCst) {
            return false;
        }
        lock(&self.sent).push(line.to_string());
        true
    }

    async fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Transcriber with a scripted answer
pub struct FakeTranscriber {
    pub reply: Mutex<std::result::Result<String, String>>,
    pub delay: Duration,
    pub requests: Mutex<Vec<TranscriptionRequest>>,
}

impl FakeTranscriber {
    pub fn replying(text: &str) -> Self {
        Self {
            reply: Mutex::new(Ok(text.to_string())),
            delay: Duration::ZERO,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn set_reply(&self, reply: std::result::Result<&str, &str>) {
        *lock(&self.reply) = reply.map(ToString::to_string).map_err(ToString::to_string);
    }

    pub fn calls(&self) -> usize {
        lock(&self.requests).len()
    }
}

#[async_trait]
impl Transcriber for FakeTranscriber {
    async fn transcribe(&self, request: TranscriptionRequest) -> Result<String> {
        lock(&self.requests).push(request);
        tokio::time::sleep(self.delay).await;
        lock(&self.reply).clone().map_err(Error::Stt)
    }
}

/// Generator with a scripted answer
pub struct FakeGenerator {
    pub reply: Mutex<std::result::Result<String, String>>,
    pub delay: Duration,
    pub requests: Mutex<Vec<GenerationRequest>>,
}

impl FakeGenerator {
    pub fn replying(text: &str) -> Self {
        Self {
            reply: Mutex::new(Ok(text.to_string())),
            delay: Duration::ZERO,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn set_reply(&self, reply: std::result::Result<&str, &str>) {
        *lock(&self.reply) = reply.map(ToString::to_string).map_err(ToString::to_string);
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        lock(&self.requests).clone()
    }
}

#[async_trait]
impl Generator for FakeGenerator {
    async fn generate(
        &self,
        request: &GenerationRequest,
        _tools: &ToolRegistry,
        _ctx: &ToolContext,
    ) -> Result<String> {
        lock(&self.requests).push(request.clone());
        tokio::time::sleep(self.delay).await;
        lock(&self.reply).clone().map_err(Error::Generation)
    }

    async fn complete(&self, _system: &str, _user: &str) -> Result<String> {
        lock(&self.reply).clone().map_err(Error::Generation)
    }
}

/// Synthesizer that returns the text bytes
#[derive(Default)]
pub struct FakeSynth {
    pub fail: AtomicBool,
    pub texts: Mutex<Vec<String>>,
}

#[async_trait]
impl Synthesizer for FakeSynth {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        lock(&self.texts).push(text.to_string());
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Tts("voice service down".to_string()));
        }
        Ok(text.as_bytes().to_vec())
    }
}

/// Player that records calls and optionally plays until cancelled
#[derive(Default)]
pub struct FakePlayer {
    pub endless: AtomicBool,
    pub started: AtomicUsize,
    pub cancelled: AtomicUsize,
}

#[async_trait]
impl AudioPlayer for FakePlayer {
    async fn play(&self, _path: &Path, cancel: CancellationToken) -> Result<()> {
        self.started.fetch_add(1, Ordering::SeqCst);
        if self.endless.load(Ordering::SeqCst) {
            cancel.cancelled().await;
            self.cancelled.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Knobs for [`Harness::build`]
pub struct Options {
    pub always_listening: bool,
    pub transcript: String,
    pub reply: String,
    pub endless_playback: bool,
    pub generation_delay: Duration,
    pub transcription_delay: Duration,
    pub keyboard: bool,
    /// Replaces the JSON store
    pub memory: Option<Arc<dyn Memory>>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            always_listening: false,
            transcript: "what time is it".to_string(),
            reply: r#"{"displayText": "It is **noon**.", "speechText": "It is noon.", "expectFollowUp": false}"#
                .to_string(),
            endless_playback: false,
            generation_delay: Duration::ZERO,
            transcription_delay: Duration::ZERO,
            keyboard: false,
            memory: None,
        }
    }
}

/// A controller wired to fakes
pub struct Harness {
    pub controller: Arc<VoiceController>,
    pub capture: Arc<FakeCapture>,
    pub keyboard: Arc<FakeCapture>,
    pub transcriber: Arc<FakeTranscriber>,
    pub generator: Arc<FakeGenerator>,
    pub synth: Arc<FakeSynth>,
    pub player: Arc<FakePlayer>,
    pub memory: Arc<dyn Memory>,
    pub events: mpsc::UnboundedReceiver<VoiceEvent>,
    pub dir: tempfile::TempDir,
}

impl Harness {
    pub async fn build(options: Options) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");

        let capture = Arc::new(FakeCapture::default());
        let keyboard = Arc::new(FakeCapture::default());
        let transcriber = Arc::new(FakeTranscriber {
            delay: options.transcription_delay,
            ..FakeTranscriber::replying(&options.transcript)
        });
        let generator = Arc::new(FakeGenerator {
            delay: options.generation_delay,
            ..FakeGenerator::replying(&options.reply)
        });
        let synth = Arc::new(FakeSynth::default());
        let player = Arc::new(FakePlayer::default());
        player
            .endless
            .store(options.endless_playback, Ordering::SeqCst);

        let memory: Arc<dyn Memory> = match options.memory {
            Some(memory) => memory,
            None => Arc::new(
                JsonMemory::open_in(dir.path())
                    .await
                    .expect("open memory"),
            ),
        };

        let settings = ControllerSettings {
            controller: ControllerConfig {
                always_listening: options.always_listening,
                ..ControllerConfig::default()
            },
            capture: CaptureConfig {
                working_dir: Some(dir.path().to_path_buf()),
                keyboard_script: options.keyboard.then(|| PathBuf::from("keyboard.py")),
                ..CaptureConfig::default()
            },
            language: "en".to_string(),
            assistant_name: "Jarvis".to_string(),
            timeouts: Timeouts::default(),
        };

        let speaker = Speaker::new(
            Arc::clone(&synth) as Arc<dyn Synthesizer>,
            Arc::clone(&player) as Arc<dyn AudioPlayer>,
            dir.path().join("response.mp3"),
            Duration::from_secs(5),
        );

        let services = Collaborators {
            capture: Arc::clone(&capture) as Arc<dyn CaptureBackend>,
            keyboard: Some(Arc::clone(&keyboard) as Arc<dyn CaptureBackend>),
            transcriber: Arc::clone(&transcriber) as Arc<dyn Transcriber>,
            generator: Arc::clone(&generator) as Arc<dyn Generator>,
            speaker,
            intent: IntentGate::new(0.7, Arc::new(HeuristicClassifier::new("Jarvis"))),
            memory: Arc::clone(&memory),
            tools: ToolRegistry::with_builtins(),
        };

        let controller = VoiceController::new(settings, services);
        let events = controller.subscribe();

        Self {
            controller,
            capture,
            keyboard,
            transcriber,
            generator,
            synth,
            player,
            memory,
            events,
            dir,
        }
    }

    /// Build, start, and consume the startup events
    pub async fn started(options: Options) -> Self {
        let mut harness = Self::build(options).await;
        harness.controller.start().await.expect("start controller");
        harness.wait_status(Status::Listening).await;
        harness
    }

    /// Where the capture process would leave its recording
    pub fn capture_path(&self) -> PathBuf {
        self.dir.path().join("command.wav")
    }

    /// Write a valid recording of `ms` milliseconds to the capture path
    pub fn record(&self, ms: u32) {
        write_wav(&self.capture_path(), ms);
    }

    /// Wait for an event matching `pred`, returning every event seen up to it
    pub async fn until(&mut self, pred: impl Fn(&VoiceEvent) -> bool) -> Vec<VoiceEvent> {
        let mut seen = Vec::new();
        let wait = async {
            while let Some(event) = self.events.recv().await {
                let done = pred(&event);
                seen.push(event);
                if done {
                    return;
                }
            }
        };
        if tokio::time::timeout(EVENT_TIMEOUT, wait).await.is_err() {
            panic!("timed out waiting for event; saw {seen:?}");
        }
        seen
    }

    pub async fn wait_status(&mut self, status: Status) -> Vec<VoiceEvent> {
        self.until(|e| *e == VoiceEvent::Status(status)).await
    }

    /// Events already queued, without waiting
    pub fn drain(&mut self) -> Vec<VoiceEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

/// Event type names, skipping logs
pub fn kinds(events: &[VoiceEvent]) -> Vec<&'static str> {
    events
        .iter()
        .filter(|e| !matches!(e, VoiceEvent::Log { .. }))
        .map(VoiceEvent::kind)
        .collect()
}

/// Status transitions in order
pub fn statuses(events: &[VoiceEvent]) -> Vec<Status> {
    events
        .iter()
        .filter_map(|e| match e {
            VoiceEvent::Status(s) => Some(*s),
            _ => None,
        })
        .collect()
}

/// Write a 16 kHz mono WAV of `ms` milliseconds of a quiet tone
pub fn write_wav(path: &Path, ms: u32) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 16_000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).expect("create wav");
    let samples = 16 * ms;
    for i in 0..samples {
        let t = f64::from(i) / 16_000.0;
        let sample = (t * 440.0 * std::f64::consts::TAU).sin() * 2_000.0;
        #[allow(clippy::cast_possible_truncation)]
        writer.write_sample(sample as i16).expect("write sample");
    }
    writer.finalize().expect("finalize wav");
}

/// Memory whose reads all fail
pub struct BrokenMemory;

#[async_trait]
impl Memory for BrokenMemory {
    async fn active_project(&self) -> Result<Option<String>> {
        Err(Error::Memory("offline".to_string()))
    }
    async fn todos(&self) -> Result<Vec<jarvis_voice::memory::Todo>> {
        Err(Error::Memory("offline".to_string()))
    }
    async fn notes(&self) -> Result<Vec<jarvis_voice::memory::Note>> {
        Err(Error::Memory("offline".to_string()))
    }
    async fn active_reminders(&self) -> Result<Vec<jarvis_voice::memory::Reminder>> {
        Err(Error::Memory("offline".to_string()))
    }
    async fn vocabulary(&self) -> Result<Vec<String>> {
        Err(Error::Memory("offline".to_string()))
    }
    async fn repositories(&self) -> Result<Vec<String>> {
        Err(Error::Memory("offline".to_string()))
    }
    async fn recent_history(&self, _n: usize) -> Result<Vec<jarvis_voice::memory::HistoryEntry>> {
        Err(Error::Memory("offline".to_string()))
    }
    async fn append_history(&self, _role: jarvis_voice::memory::Role, _text: &str) -> Result<()> {
        Err(Error::Memory("offline".to_string()))
    }
    async fn add_todo(&self, _text: &str) -> Result<jarvis_voice::memory::Todo> {
        Err(Error::Memory("offline".to_string()))
    }
    async fn complete_todo(&self, _id_or_text: &str) -> Result<Option<jarvis_voice::memory::Todo>> {
        Err(Error::Memory("offline".to_string()))
    }
    async fn add_note(&self, _text: &str) -> Result<jarvis_voice::memory::Note> {
        Err(Error::Memory("offline".to_string()))
    }
    async fn add_reminder(
        &self,
        _text: &str,
        _due: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<jarvis_voice::memory::Reminder> {
        Err(Error::Memory("offline".to_string()))
    }
    async fn add_vocabulary_word(&self, _word: &str) -> Result<bool> {
        Err(Error::Memory("offline".to_string()))
    }
}

/// JSON store whose assistant history writes take a while
pub struct SlowReplies {
    pub inner: JsonMemory,
    pub delay: Duration,
}

#[async_trait]
impl Memory for SlowReplies {
    async fn active_project(&self) -> Result<Option<String>> {
        self.inner.active_project().await
    }
    async fn todos(&self) -> Result<Vec<jarvis_voice::memory::Todo>> {
        self.inner.todos().await
    }
    async fn notes(&self) -> Result<Vec<jarvis_voice::memory::Note>> {
        self.inner.notes().await
    }
    async fn active_reminders(&self) -> Result<Vec<jarvis_voice::memory::Reminder>> {
        self.inner.active_reminders().await
    }
    async fn vocabulary(&self) -> Result<Vec<String>> {
        self.inner.vocabulary().await
    }
    async fn repositories(&self) -> Result<Vec<String>> {
        self.inner.repositories().await
    }
    async fn recent_history(&self, n: usize) -> Result<Vec<jarvis_voice::memory::HistoryEntry>> {
        self.inner.recent_history(n).await
    }
    async fn append_history(&self, role: jarvis_voice::memory::Role, text: &str) -> Result<()> {
        if role == jarvis_voice::memory::Role::Assistant {
            tokio::time::sleep(self.delay).await;
        }
        self.inner.append_history(role, text).await
    }
    async fn add_todo(&self, text: &str) -> Result<jarvis_voice::memory::Todo> {
        self.inner.add_todo(text).await
    }
    async fn complete_todo(&self, id_or_text: &str) -> Result<Option<jarvis_voice::memory::Todo>> {
        self.inner.complete_todo(id_or_text).await
    }
    async fn add_note(&self, text: &str) -> Result<jarvis_voice::memory::Note> {
        self.inner.add_note(text).await
    }
    async fn add_reminder(
        &self,
        text: &str,
        due: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<jarvis_voice::memory::Reminder> {
        self.inner.add_reminder(text, due).await
    }
    async fn add_vocabulary_word(&self, word: &str) -> Result<bool> {
        self.inner.add_vocabulary_word(word).await
    }
}
