//! Cancellable speech output
//!
//! At most one utterance is audible at a time. Every `speak()` first cancels
//! the one before it, and every suspension point inside it races against the
//! utterance's cancellation token so an interruption resolves the call
//! quietly instead of failing it.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use super::tts::{Synthesizer, prepare_for_speech};
use crate::{Error, Result};

/// Plays an audio file to completion
#[async_trait]
pub trait AudioPlayer: Send + Sync {
    /// Play `path`, stopping early when `cancel` fires
    ///
    /// A stop caused by `cancel` is a success.
    ///
    /// # Errors
    ///
    /// Returns error if the player cannot be started or fails on its own
    async fn play(&self, path: &Path, cancel: CancellationToken) -> Result<()>;
}

/// Plays audio through an external command (afplay, mpv, ffplay...)
#[derive(Debug, Clone)]
pub struct CommandPlayer {
    command: Vec<String>,
}

impl CommandPlayer {
    /// The audio path is appended as the last argument
    ///
    /// # Errors
    ///
    /// Returns error if `command` is empty
    pub fn new(command: Vec<String>) -> Result<Self> {
        if command.is_empty() {
            return Err(Error::Config("player command is empty".to_string()));
        }
        Ok(Self { command })
    }
}

#[async_trait]
impl AudioPlayer for CommandPlayer {
    async fn play(&self, path: &Path, cancel: CancellationToken) -> Result<()> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| Error::Playback("player command is empty".to_string()))?;

        let mut child = Command::new(program)
            .args(args)
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Playback(format!("failed to start {program}: {e}")))?;

        let finished = tokio::select! {
            () = cancel.cancelled() => None,
            status = child.wait() => Some(status?),
        };

        match finished {
            None => {
                if let Err(e) = child.kill().await {
                    tracing::debug!(error = %e, "player already gone");
                }
                tracing::debug!("playback cancelled");
                Ok(())
            }
            Some(status) if status.success() => Ok(()),
            // Killed from elsewhere while we were being cancelled
            Some(_) if cancel.is_cancelled() => Ok(()),
            Some(status) => Err(Error::Playback(format!("{program} exited with {status}"))),
        }
    }
}

/// The TTS cancellation primitive
pub struct Speaker {
    synthesizer: Arc<dyn Synthesizer>,
    player: Arc<dyn AudioPlayer>,
    output: PathBuf,
    synthesis_timeout: Duration,
    cue: Option<PathBuf>,
    current: Mutex<CancellationToken>,
}

impl Speaker {
    /// `output` is the singleton file each utterance is written to
    #[must_use]
    pub fn new(
        synthesizer: Arc<dyn Synthesizer>,
        player: Arc<dyn AudioPlayer>,
        output: PathBuf,
        synthesis_timeout: Duration,
    ) -> Self {
        Self {
            synthesizer,
            player,
            output,
            synthesis_timeout,
            cue: None,
            current: Mutex::new(CancellationToken::new()),
        }
    }

    /// Sound played by [`Speaker::play_cue`]
    #[must_use]
    pub fn with_cue(mut self, cue: Option<PathBuf>) -> Self {
        self.cue = cue;
        self
    }

    /// Speak `text`, returning once playback ends or is cancelled
    ///
    /// Cancels whatever was speaking before. The utterance is also cancelled
    /// when `scope` is, so a caller can tie speech to a larger unit of work.
    /// Empty text is a no-op.
    ///
    /// # Errors
    ///
    /// Returns error if synthesis, the file write or playback fails without
    /// having been cancelled
    pub async fn speak(&self, text: &str, scope: &CancellationToken) -> Result<()> {
        let token = {
            let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
            current.cancel();
            *current = scope.child_token();
            current.clone()
        };

        let text = prepare_for_speech(text);
        if text.is_empty() || token.is_cancelled() {
            return Ok(());
        }

        tracing::debug!(chars = text.len(), "synthesizing speech");
        let synthesis = tokio::time::timeout(
            self.synthesis_timeout,
            self.synthesizer.synthesize(&text),
        );
        let audio = tokio::select! {
            () = token.cancelled() => return Ok(()),
            result = synthesis => result.map_err(|_| Error::Timeout {
                step: "synthesis",
                after: self.synthesis_timeout,
            })??,
        };

        tokio::select! {
            () = token.cancelled() => return Ok(()),
            result = tokio::fs::write(&self.output, &audio) => result?,
        }

        if token.is_cancelled() {
            return Ok(());
        }

        tracing::debug!(path = %self.output.display(), bytes = audio.len(), "playing speech");
        self.player.play(&self.output, token).await
    }

    /// Stop the current utterance; safe to call when nothing is playing
    pub fn cancel(&self) {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel();
    }

    /// Play the activation cue without waiting for it
    pub fn play_cue(&self) {
        let Some(cue) = self.cue.clone() else {
            return;
        };
        let player = Arc::clone(&self.player);
        tokio::spawn(async move {
            if let Err(e) = player.play(&cue, CancellationToken::new()).await {
                tracing::debug!(error = %e, "cue sound failed");
            }
        });
    }
}
