//! Subprocess supervision for the capture and keyboard listener processes
//!
//! A [`ProcessSupervisor`] owns at most one child at a time. Its stdout and
//! stderr are read as raw chunks, reassembled into lines and forwarded in
//! order on an unbounded channel, followed by a single [`SupervisorEvent::Exited`].

pub mod protocol;

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{ChildStdin, Command};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::config::{CaptureConfig, ControllerConfig};
use crate::{Error, Result};

pub use protocol::{CaptureCommand, CaptureLine, KeyboardSignal, LineBuffer};

/// How long `stop()` waits for a killed child to be reaped
const REAP_TIMEOUT: Duration = Duration::from_secs(2);

/// How long to wait for buffered output after the child exits
const DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// What to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    /// Short name for logs ("capture", "keyboard")
    pub name: &'static str,
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
}

impl ProcessSpec {
    /// Command line for the capture process
    ///
    /// `<interpreter> <script> [<mic>] [--no-wake-word] [--always-listening]`
    #[must_use]
    pub fn capture(capture: &CaptureConfig, controller: &ControllerConfig) -> Self {
        let mut args = vec![capture.script.display().to_string()];
        if let Some(mic) = controller.microphone {
            args.push(mic.to_string());
        }
        if !controller.wake_word {
            args.push("--no-wake-word".to_string());
        }
        if controller.always_listening {
            args.push("--always-listening".to_string());
        }

        Self {
            name: "capture",
            program: capture.interpreter.clone(),
            args,
            working_dir: capture.working_dir.clone(),
        }
    }

    /// Command line for the keyboard listener, if one is configured
    #[must_use]
    pub fn keyboard(capture: &CaptureConfig) -> Option<Self> {
        let script = capture.keyboard_script.as_ref()?;
        Some(Self {
            name: "keyboard",
            program: capture.interpreter.clone(),
            args: vec![script.display().to_string()],
            working_dir: capture.working_dir.clone(),
        })
    }
}

/// Output of a supervised process
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorEvent {
    /// A complete stdout line
    Stdout(String),
    /// A complete stderr line that is not known library noise
    Stderr(String),
    /// The process is gone; always the last event of a session
    Exited {
        code: Option<i32>,
        /// The exit was caused by `stop()`
        requested: bool,
    },
}

/// A supervised external process
#[async_trait]
pub trait CaptureBackend: Send + Sync {
    /// Spawn the process, replacing any running one
    ///
    /// # Errors
    ///
    /// Returns error if the process cannot be spawned
    async fn start(&self, spec: &ProcessSpec) -> Result<mpsc::UnboundedReceiver<SupervisorEvent>>;

    /// Kill the process; a no-op when nothing is running
    async fn stop(&self);

    /// Write one command line to the process's stdin
    ///
    /// Returns `false` if nothing is running or the pipe is broken.
    async fn send(&self, line: &str) -> bool;

    /// Whether a process is currently alive
    async fn is_running(&self) -> bool;
}

struct Running {
    name: &'static str,
    stdin: Option<ChildStdin>,
    kill: Option<oneshot::Sender<()>>,
    alive: Arc<AtomicBool>,
    waiter: JoinHandle<()>,
}

/// Supervises one child process at a time with `tokio::process`
#[derive(Default)]
pub struct ProcessSupervisor {
    running: Mutex<Option<Running>>,
}

impl ProcessSupervisor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    async fn stop_locked(slot: &mut Option<Running>) {
        let Some(mut running) = slot.take() else {
            return;
        };

        tracing::info!(process = running.name, "stopping process");
        drop(running.stdin.take());
        if let Some(kill) = running.kill.take() {
            let _ = kill.send(());
        }

        if tokio::time::timeout(REAP_TIMEOUT, &mut running.waiter)
            .await
            .is_err()
        {
            tracing::warn!(process = running.name, "process did not exit in time");
            running.waiter.abort();
        }
    }
}

#[async_trait]
impl CaptureBackend for ProcessSupervisor {
    async fn start(&self, spec: &ProcessSpec) -> Result<mpsc::UnboundedReceiver<SupervisorEvent>> {
        let mut slot = self.running.lock().await;
        Self::stop_locked(&mut slot).await;

        tracing::info!(
            process = spec.name,
            program = %spec.program,
            args = ?spec.args,
            "spawning process"
        );

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|e| {
            tracing::error!(process = spec.name, error = %e, "failed to spawn process");
            Error::Capture(format!("failed to spawn {}: {e}", spec.name))
        })?;

        let (tx, rx) = mpsc::unbounded_channel();
        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(pump_lines(stdout, tx.clone(), false)));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(pump_lines(stderr, tx.clone(), true)));
        }

        let stdin = child.stdin.take();
        let alive = Arc::new(AtomicBool::new(true));
        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        let name = spec.name;

        let waiter = {
            let alive = Arc::clone(&alive);
            tokio::spawn(async move {
                // A dropped sender means the supervisor is gone; kill as well
                let requested = tokio::select! {
                    _ = kill_rx => true,
                    _ = child.wait() => false,
                };
                if requested && let Err(e) = child.start_kill() {
                    tracing::debug!(process = name, error = %e, "kill failed");
                }
                let status = child.wait().await;
                alive.store(false, Ordering::SeqCst);

                // Drain readers so every line precedes the exit event
                for reader in readers {
                    let _ = tokio::time::timeout(DRAIN_TIMEOUT, reader).await;
                }

                let code = status.ok().and_then(|s| s.code());
                if requested {
                    tracing::debug!(process = name, ?code, "process stopped");
                } else {
                    tracing::warn!(process = name, ?code, "process exited");
                }
                let _ = tx.send(SupervisorEvent::Exited { code, requested });
            })
        };

        *slot = Some(Running {
            name,
            stdin,
            kill: Some(kill_tx),
            alive,
            waiter,
        });

        Ok(rx)
    }

    async fn stop(&self) {
        let mut slot = self.running.lock().await;
        Self::stop_locked(&mut slot).await;
    }

    async fn send(&self, line: &str) -> bool {
        let mut slot = self.running.lock().await;
        let Some(running) = slot.as_mut() else {
            tracing::debug!(command = line, "no process running, command dropped");
            return false;
        };
        let Some(stdin) = running.stdin.as_mut() else {
            return false;
        };

        let write = async {
            stdin.write_all(line.as_bytes()).await?;
            stdin.write_all(b"\n").await?;
            stdin.flush().await
        };
        match write.await {
            Ok(()) => {
                tracing::debug!(process = running.name, command = line, "sent command");
                true
            }
            Err(e) => {
                tracing::warn!(process = running.name, error = %e, "failed to write command");
                false
            }
        }
    }

    async fn is_running(&self) -> bool {
        self.running
            .lock()
            .await
            .as_ref()
            .is_some_and(|r| r.alive.load(Ordering::SeqCst))
    }
}

/// Forward complete lines from a pipe until EOF
async fn pump_lines<R>(mut pipe: R, tx: mpsc::UnboundedSender<SupervisorEvent>, stderr: bool)
where
    R: AsyncRead + Unpin,
{
    let mut buffer = LineBuffer::new();
    let mut chunk = [0u8; 4096];

    let forward = |line: String| {
        let event = if stderr {
            if protocol::is_noise(&line) {
                tracing::trace!(line = %line, "suppressed stderr noise");
                return true;
            }
            SupervisorEvent::Stderr(line)
        } else {
            SupervisorEvent::Stdout(line)
        };
        tx.send(event).is_ok()
    };

    loop {
        match pipe.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                for line in buffer.push(&chunk[..n]) {
                    if !forward(line) {
                        return;
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "pipe read failed");
                break;
            }
        }
    }

    if let Some(line) = buffer.finish() {
        forward(line);
    }
}
