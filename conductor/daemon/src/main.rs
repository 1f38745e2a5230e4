//! Lily Daemon - Headless Text Surface
//!
//! Runs the Lily conductor in a terminal. Typed lines are submitted as user
//! turns and every committed message is printed as it lands.
//!
//! # Usage
//!
//! ```bash
//! # Start with defaults
//! lily-daemon
//!
//! # Point at another assistant service
//! lily-daemon --base-url https://lily.example.net
//!
//! # With another config file (default: ~/.config/lily/lily.toml)
//! lily-daemon --config ./lily.toml
//!
//! # Verbose logging
//! RUST_LOG=debug lily-daemon
//! ```
//!
//! # Signals
//!
//! - `SIGINT` (Ctrl-C): Graceful shutdown

mod input;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{error, info, warn};

use lily_conductor::commands::{CommandMatcher, LoggingPlatform};
use lily_conductor::config::{
    default_config_path, load_config_from_path, ConfigOverrides, LilyConfig,
};
use lily_conductor::recognition::{
    ChannelRecognizer, RecognitionEvent, RecognitionHandle, RecognitionLoop, WakeEvent,
};
use lily_conductor::remote::{RemoteQueryService, SharedCredentials};
use lily_conductor::speech::{LogSpeechEngine, SpeechOutput};
use lily_conductor::store::{ConversationStore, JsonlStore, MemoryStore};
use lily_conductor::transcript::transcript_line;
use lily_conductor::{
    export_transcript, Conductor, ConductorDeps, ConductorHandle, Conversation, MessageId, Notice,
    NotifyLevel, SubmitError,
};

use input::{SurfaceInput, HELP};

/// Lily Daemon - Text console for the Lily assistant
#[derive(Parser, Debug)]
#[command(name = "lily-daemon")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, env = "LILY_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Conversation store file
    #[arg(short = 's', long, env = "LILY_STORE", value_name = "PATH")]
    store: Option<PathBuf>,

    /// Assistant service base URL
    #[arg(long, value_name = "URL")]
    base_url: Option<String>,

    /// Assistant service API key
    #[arg(long, value_name = "KEY")]
    api_key: Option<String>,

    /// Language tag sent with remote queries (e.g. en-US)
    #[arg(long, value_name = "TAG")]
    language: Option<String>,

    /// Directory that receives transcript exports
    #[arg(long, value_name = "DIR", default_value = ".")]
    export_dir: PathBuf,

    /// Do not run the recognition loop
    #[arg(long)]
    no_listen: bool,

    /// Do not speak replies
    #[arg(long)]
    no_speech: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "LILY_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

/// Initialize logging
fn init_logging(level: &str) -> Result<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("lily_daemon={level},lily_conductor={level}")));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {e}"))?;

    Ok(())
}

/// Config file to read: `--config` if given, else the XDG default
fn config_path(args: &Args) -> Option<PathBuf> {
    args.config.clone().or_else(default_config_path)
}

/// CLI flags as configuration overrides
fn cli_overrides(args: &Args) -> ConfigOverrides {
    let mut overrides = ConfigOverrides::new();
    if let Some(ref base_url) = args.base_url {
        overrides = overrides.with_base_url(base_url.clone());
    }
    if let Some(ref api_key) = args.api_key {
        overrides = overrides.with_api_key(api_key.clone());
    }
    if let Some(ref language) = args.language {
        overrides = overrides.with_language(language.clone());
    }
    if let Some(ref store) = args.store {
        overrides = overrides.with_store_path(store.clone());
    }
    if args.no_listen {
        overrides = overrides.with_listen_enabled(false);
    }
    if args.no_speech {
        overrides = overrides.with_speech_enabled(false);
    }
    overrides
}

/// Resolve configuration: file, then environment, then CLI flags
fn resolve_config(args: &Args) -> Result<LilyConfig> {
    let mut config =
        load_config_from_path(config_path(args)).context("Failed to load configuration")?;
    cli_overrides(args).apply(&mut config);

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn build_store(config: &LilyConfig) -> Arc<dyn ConversationStore> {
    match config.store_path {
        Some(ref path) => {
            info!(path = ?path, "Conversation store");
            Arc::new(JsonlStore::new(path.clone()))
        }
        None => {
            warn!("No data directory available, conversation will not be kept");
            Arc::new(MemoryStore::new())
        }
    }
}

/// Console state owned by the input loop
struct Console {
    handle: ConductorHandle,
    credentials: SharedCredentials,
    hear_tx: Option<mpsc::Sender<RecognitionEvent>>,
    export_dir: PathBuf,
    last_printed: Option<MessageId>,
}

impl Console {
    /// Print every message newer than the last one printed
    fn print_new(&mut self, conversation: &Conversation) {
        for message in conversation {
            if self.last_printed.is_some_and(|last| message.id() <= last) {
                continue;
            }
            println!("{}", transcript_line(message));
            self.last_printed = Some(message.id());
        }
    }

    async fn submit(&self, text: String) {
        match self.handle.submit(text).await {
            Ok(turn) => {
                tracing::debug!(id = %turn.user_message().id(), "Turn submitted");
            }
            Err(SubmitError::InputRejected) => {}
            Err(e) => warn!(error = %e, "Submission failed"),
        }
    }

    /// Handle one console line; returns false to quit
    async fn handle_line(&mut self, line: &str) -> bool {
        match SurfaceInput::parse(line) {
            SurfaceInput::Empty => {}
            SurfaceInput::Utterance(text) => self.submit(text).await,
            SurfaceInput::Help => println!("{HELP}"),
            SurfaceInput::Export => {
                let snapshot = self.handle.snapshot();
                match export_transcript(&self.export_dir, snapshot.messages()).await {
                    Ok(Some(path)) => println!("Transcript saved to {}", path.display()),
                    Ok(None) => println!("Nothing to export yet."),
                    Err(e) => {
                        error!(error = %e, "Transcript export failed");
                        println!("Export failed: {e}");
                    }
                }
            }
            SurfaceInput::Hear(transcript) => match self.hear_tx {
                Some(ref tx) => {
                    if tx.send(RecognitionEvent::Final(vec![transcript])).await.is_err() {
                        warn!("Recognition loop is not accepting events");
                    }
                }
                None => println!("Listening is disabled."),
            },
            SurfaceInput::Key(api_key) => {
                self.credentials.set_api_key(api_key);
                info!("API key replaced");
                println!("API key updated.");
            }
            SurfaceInput::Unknown(command) => {
                println!("Unknown command: {command} (try /help)");
            }
            SurfaceInput::Quit => return false,
        }
        true
    }

    /// Announce a wake phrase and submit whatever followed it
    async fn on_wake(&self, event: WakeEvent) {
        println!("*** Lily is listening ({}) ***", event.phrase);
        let request = event
            .transcript
            .split_once(event.phrase.as_str())
            .map(|(_, rest)| rest.trim_matches(|c: char| c.is_whitespace() || c == ','))
            .unwrap_or_default();
        if !request.is_empty() {
            self.submit(request.to_string()).await;
        }
    }
}

fn print_notice(notice: &Notice) {
    match notice.level {
        NotifyLevel::Info => println!("[info] {}", notice.message),
        NotifyLevel::Warning => println!("[warning] {}", notice.message),
        NotifyLevel::Error => println!("[error] {}", notice.message),
    }
}

async fn run_console(
    mut console: Console,
    mut updates: watch::Receiver<Conversation>,
    mut notices: broadcast::Receiver<Notice>,
    mut wakes: mpsc::Receiver<WakeEvent>,
) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT, initiating shutdown");
                break;
            }
            line = lines.next_line() => {
                match line.context("Failed to read console input")? {
                    Some(line) => {
                        if !console.handle_line(&line).await {
                            break;
                        }
                    }
                    None => {
                        info!("Console input closed");
                        break;
                    }
                }
            }
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let conversation = updates.borrow_and_update().clone();
                console.print_new(&conversation);
            }
            notice = notices.recv() => {
                match notice {
                    Ok(notice) => print_notice(&notice),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Notice stream lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {}
                }
            }
            Some(event) = wakes.recv() => {
                console.on_wake(event).await;
            }
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging first
    init_logging(&args.log_level)?;

    info!("Lily Daemon starting");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = resolve_config(&args)?;
    info!(
        source = %config.source(),
        endpoint = ?config.remote_endpoint,
        "Configuration loaded"
    );

    let credentials = config.shared_credentials();
    let deps = ConductorDeps {
        matcher: CommandMatcher::new(Arc::new(LoggingPlatform)),
        remote: Arc::new(RemoteQueryService::new(
            Arc::new(credentials.clone()),
            config.timeouts,
        )),
        store: build_store(&config),
        speech: Arc::new(SpeechOutput::new(LogSpeechEngine::new(
            config.speech_enabled,
        ))),
    };

    let conductor = Conductor::new(deps, config.conductor.clone());
    let mut notices = conductor.notices();
    let handle = conductor.start().await;

    // Surface anything raised while history loaded
    while let Ok(notice) = notices.try_recv() {
        print_notice(&notice);
    }

    let (wake_tx, wake_rx) = mpsc::channel(8);
    let (recognition, hear_tx): (Option<RecognitionHandle>, _) = if config.listen_enabled {
        let (recognizer, hear_tx) = ChannelRecognizer::new(16);
        let recognition =
            RecognitionLoop::spawn(Arc::new(recognizer), config.recognition.clone(), wake_tx);
        (Some(recognition), Some(hear_tx))
    } else {
        info!("Listening disabled");
        drop(wake_tx);
        (None, None)
    };

    let snapshot = handle.snapshot();
    if !snapshot.is_empty() {
        println!("({} earlier messages restored)", snapshot.len());
    }
    println!("Lily is ready. Type /help for commands.");

    let console = Console {
        handle: handle.clone(),
        credentials,
        hear_tx,
        export_dir: args.export_dir.clone(),
        last_printed: snapshot.last().map(|m| m.id()),
    };

    let result = run_console(console, handle.subscribe(), notices, wake_rx).await;

    // Cleanup
    info!("Shutting down...");
    if let Some(recognition) = recognition {
        recognition.stop().await;
    }
    handle.shutdown().await;

    match result {
        Ok(()) => {
            info!("Lily daemon stopped cleanly");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Daemon stopped with error");
            Err(e)
        }
    }
}
