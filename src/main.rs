use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use jarvis_voice::config::file::config_file_path;
use jarvis_voice::intent::{HeuristicClassifier, IntentClassifier, IntentGate, LlmClassifier};
use jarvis_voice::llm::{ChatClient, Generator};
use jarvis_voice::memory::{JsonMemory, Memory};
use jarvis_voice::supervisor::{CaptureBackend, ProcessSupervisor};
use jarvis_voice::tools::ToolRegistry;
use jarvis_voice::voice::{CommandPlayer, SpeechToText, Speaker, TextToSpeech};
use jarvis_voice::{
    Collaborators, Config, ControllerSettings, VoiceController, VoiceEvent,
};

/// Jarvis - wake-word driven voice assistant
#[derive(Parser)]
#[command(name = "jarvis", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Microphone device index passed to the capture process
    #[arg(long)]
    mic: Option<u32>,

    /// Record on keyboard trigger only, without wake-word detection
    #[arg(long)]
    no_wake_word: bool,

    /// Continuously segment speech and let the intent gate decide
    #[arg(long)]
    always_listening: bool,

    /// Don't start the keyboard listener even if one is configured
    #[arg(long)]
    no_keyboard: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Speak text through the configured TTS and player
    Say {
        /// Text to speak
        #[arg(default_value = "Hello! This is a test of the text to speech system.")]
        text: String,
    },
    /// Answer one typed request without starting the capture process
    Ask {
        /// What to ask
        text: String,
    },
    /// Print the config file location
    ConfigPath,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info,jarvis_voice=info",
        1 => "info,jarvis_voice=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    if let Some(Command::ConfigPath) = cli.command {
        match config_file_path() {
            Some(path) => println!("{}", path.display()),
            None => anyhow::bail!("could not determine config directory"),
        }
        return Ok(());
    }

    let mut config = Config::load()?;
    if let Some(mic) = cli.mic {
        config.controller.microphone = Some(mic);
    }
    if cli.no_wake_word {
        config.controller.wake_word = false;
    }
    if cli.always_listening {
        config.controller.always_listening = true;
    }
    if cli.no_keyboard {
        config.capture.keyboard_script = None;
    }

    match cli.command {
        Some(Command::Say { text }) => say(&config, &text).await,
        Some(Command::Ask { text }) => ask(&config, &text).await,
        Some(Command::ConfigPath) | None => listen(&config).await,
    }
}

fn build_speaker(config: &Config) -> anyhow::Result<Speaker> {
    let synthesizer = Arc::new(TextToSpeech::from_config(&config.voice, &config.api_keys)?);
    let player = Arc::new(CommandPlayer::new(config.voice.player.clone())?);
    Ok(Speaker::new(
        synthesizer,
        player,
        config.voice.response_audio_path.clone(),
        config.timeouts.synthesis,
    )
    .with_cue(config.voice.cue_sound.clone()))
}

async fn build_controller(config: &Config) -> anyhow::Result<Arc<VoiceController>> {
    let memory: Arc<dyn Memory> = Arc::new(JsonMemory::open_in(&config.data_dir).await?);
    let generator: Arc<dyn Generator> =
        Arc::new(ChatClient::from_config(&config.llm, &config.api_keys)?);
    let transcriber = Arc::new(SpeechToText::from_config(&config.voice, &config.api_keys)?);

    let name = &config.llm.assistant_name;
    let classifier: Arc<dyn IntentClassifier> = if config.controller.llm_intent {
        Arc::new(LlmClassifier::new(
            Arc::clone(&generator),
            name,
            config.timeouts.classification,
        ))
    } else {
        Arc::new(HeuristicClassifier::new(name))
    };

    let keyboard = config
        .capture
        .keyboard_script
        .is_some()
        .then(|| Arc::new(ProcessSupervisor::new()) as Arc<dyn CaptureBackend>);

    let services = Collaborators {
        capture: Arc::new(ProcessSupervisor::new()),
        keyboard,
        transcriber,
        generator,
        speaker: build_speaker(config)?,
        intent: IntentGate::new(config.controller.intent_threshold, classifier),
        memory,
        tools: ToolRegistry::with_builtins(),
    };

    Ok(VoiceController::new(
        ControllerSettings::from_config(config),
        services,
    ))
}

/// Run the assistant until Ctrl-C, `/quit` or end of input
async fn listen(config: &Config) -> anyhow::Result<()> {
    let controller = build_controller(config).await?;
    tokio::spawn(mirror_events(
        controller.subscribe(),
        config.llm.assistant_name.clone(),
    ));

    tracing::info!(
        microphone = ?config.controller.microphone,
        wake_word = config.controller.wake_word,
        always_listening = config.controller.always_listening,
        "starting voice controller"
    );

    // The console still works without a capture process
    if let Err(e) = controller.start().await {
        tracing::error!(error = %e, "capture unavailable, text input only");
    } else {
        tracing::info!(
            "{} ready - say the wake word or type a request",
            config.llm.assistant_name
        );
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if !console_command(&controller, line.trim()).await {
                    break;
                }
            }
        }
    }

    controller.shutdown().await;
    Ok(())
}

/// Handle one console line; returns false to quit
async fn console_command(controller: &Arc<VoiceController>, line: &str) -> bool {
    let (command, arg) = line.split_once(' ').unwrap_or((line, ""));
    match command {
        "" => {}
        "/quit" | "/exit" => return false,
        "/talk" => controller.manual_activate().await,
        "/stop" => controller.cancel_interaction().await,
        "/done" => controller.manual_deactivate().await,
        "/mute" => controller.set_muted(true),
        "/unmute" => controller.set_muted(false),
        "/status" => println!(
            "status: {}, muted: {}, microphone: {}",
            controller.status(),
            controller.is_muted(),
            controller
                .microphone()
                .map_or_else(|| "default".to_string(), |m| m.to_string()),
        ),
        "/mic" => match arg.trim().parse::<u32>() {
            Ok(index) => {
                if let Err(e) = controller.update_microphone(index).await {
                    println!("could not switch microphone: {e}");
                }
            }
            Err(_) => println!("usage: /mic <index>"),
        },
        other if other.starts_with('/') => {
            println!("commands: /talk /done /stop /mute /unmute /mic <n> /status /quit");
        }
        _ => {
            // Typed turns run in the background so /stop stays responsive
            let controller = Arc::clone(controller);
            let text = line.to_string();
            tokio::spawn(async move { controller.process_text_input(&text).await });
        }
    }
    true
}

/// Answer a single typed request and exit
async fn ask(config: &Config, text: &str) -> anyhow::Result<()> {
    let controller = build_controller(config).await?;
    let printer = tokio::spawn(mirror_events(
        controller.subscribe(),
        config.llm.assistant_name.clone(),
    ));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => controller.cancel_interaction().await,
        () = controller.process_text_input(text) => {}
    }

    controller.shutdown().await;
    drop(controller);
    printer.abort();
    Ok(())
}

/// Speak text and exit
async fn say(config: &Config, text: &str) -> anyhow::Result<()> {
    let speaker = build_speaker(config)?;
    let scope = CancellationToken::new();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => scope.cancel(),
        result = speaker.speak(text, &scope) => result?,
    }
    Ok(())
}

/// Print the conversation and mirror diagnostics to the log
async fn mirror_events(mut events: mpsc::UnboundedReceiver<VoiceEvent>, name: String) {
    while let Some(event) = events.recv().await {
        match event {
            VoiceEvent::Transcription { text } => println!("you: {text}"),
            VoiceEvent::Response { display_text, .. } => println!("{name}: {display_text}"),
            VoiceEvent::WakeWord {
                confidence,
                interrupted,
                manual,
            } => tracing::info!(confidence, interrupted, manual, "activated"),
            VoiceEvent::IntentDetected {
                transcript,
                confidence,
            } => tracing::info!(confidence, transcript = %transcript, "addressed to assistant"),
            VoiceEvent::BackgroundSpeech {
                transcript,
                confidence,
            } => tracing::debug!(confidence, transcript = %transcript, "background speech"),
            VoiceEvent::Error { message } => tracing::error!("{message}"),
            // Status changes and logs are traced where they happen
            VoiceEvent::Status(_) | VoiceEvent::Log { .. } => {}
        }
    }
}
