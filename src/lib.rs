//! Jarvis Voice - voice interaction controller for a local assistant
//!
//! The controller supervises an external capture process (wake word, VAD,
//! recording), turns finished utterances into text, asks a language model for
//! a reply and speaks it, while staying interruptible at every step.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐   stdout lines   ┌─────────────────────────┐
//! │ capture process      │ ───────────────▶ │                         │
//! │ (wake word, VAD)     │ ◀─────────────── │                         │
//! └──────────────────────┘   RECORD_NOW     │                         │
//! ┌──────────────────────┐                  │     VoiceController     │ ──▶ events
//! │ keyboard listener    │ ───────────────▶ │                         │
//! └──────────────────────┘                  │                         │
//!                                           └───┬──────┬──────┬───────┘
//!                                               │      │      │
//!                                              STT    LLM   Speaker (TTS + player)
//! ```

pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod intent;
pub mod llm;
pub mod memory;
pub mod supervisor;
pub mod tools;
pub mod voice;

pub use config::Config;
pub use controller::{Collaborators, ControllerSettings, VoiceController};
pub use error::{Error, Result};
pub use events::{EventBus, LogLevel, Status, VoiceEvent};
