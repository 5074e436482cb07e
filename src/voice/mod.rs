//! Voice I/O: transcription, synthesis and cancellable playback

pub mod audio;
pub mod speaker;
pub mod stt;
pub mod tts;

pub use audio::{Capture, inspect_capture};
pub use speaker::{AudioPlayer, CommandPlayer, Speaker};
pub use stt::{SpeechToText, Transcriber, TranscriptionRequest};
pub use tts::{Synthesizer, TextToSpeech, prepare_for_speech};
