mod config;
mod local;
mod lock;
mod shutdown;
mod slack;
mod socket;

use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use secarch_contracts::analysis::{AnalysisRequest, ImageRef};
use secarch_contracts::events::{emit_optional, EventPayload, EventWriter, SESSION_STARTED};
use secarch_engine::{build_http_client, build_orchestrator, EngineSettings, ReplyTarget};
use serde_json::json;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

use crate::config::{
    engine_settings_from_env, events_path_from_env, open_log_file, BotConfig, LogSettings,
};
use crate::local::{LocalFirstFetcher, StdoutSink};
use crate::lock::PidLock;
use crate::shutdown::{install_signal_handlers, ShutdownHandle};
use crate::slack::SlackClient;
use crate::socket::SocketModeLoop;

#[derive(Debug, Parser)]
#[command(
    name = "secarch-bot",
    version,
    about = "Zero trust architecture review bot"
)]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,
    /// Append pipeline events to this JSONL file.
    #[arg(long, global = true)]
    events: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Connect to Slack over Socket Mode and answer mentions and DMs.
    Run(RunArgs),
    /// Run one analysis against local inputs and print the reply.
    Analyze(AnalyzeArgs),
}

#[derive(Debug, Parser)]
struct ModelArgs {
    #[arg(long)]
    openai_model: Option<String>,
    #[arg(long)]
    vision_model: Option<String>,
}

impl ModelArgs {
    fn apply(&self, settings: &mut EngineSettings) {
        if let Some(model) = &self.openai_model {
            settings.openai_model = model.clone();
        }
        if let Some(model) = &self.vision_model {
            settings.vision_model = model.clone();
        }
    }
}

#[derive(Debug, Parser)]
struct RunArgs {
    #[arg(long)]
    pid_file: Option<PathBuf>,
    #[arg(long)]
    diagram_path: Option<PathBuf>,
    #[command(flatten)]
    models: ModelArgs,
}

#[derive(Debug, Parser)]
struct AnalyzeArgs {
    #[arg(long, default_value = "")]
    text: String,
    #[arg(long = "image")]
    images: Vec<PathBuf>,
    #[arg(long)]
    diagram_out: Option<PathBuf>,
    #[command(flatten)]
    models: ModelArgs,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("secarch-bot error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    init_logging(cli.log_json)?;
    match cli.command {
        Command::Run(args) => run_bot(args, cli.events),
        Command::Analyze(args) => run_analyze(args, cli.events),
    }
}

fn init_logging(json: bool) -> Result<()> {
    let settings = LogSettings::from_env();
    let filter = EnvFilter::try_new(&settings.filter)
        .with_context(|| format!("invalid log filter {:?}", settings.filter))?;
    let console: Box<dyn Layer<Registry> + Send + Sync> = if json {
        fmt::layer().json().with_writer(std::io::stderr).boxed()
    } else {
        fmt::layer().with_writer(std::io::stderr).boxed()
    };
    let file = match settings.file.as_deref() {
        Some(path) => Some(
            fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(Mutex::new(open_log_file(path)?)),
        ),
        None => None,
    };
    tracing_subscriber::registry()
        .with(console)
        .with(file)
        .with(filter)
        .try_init()
        .map_err(|err| anyhow!("failed to initialise logging: {err}"))
}

fn open_events(path: Option<PathBuf>, mode: &str) -> Option<EventWriter> {
    let writer = EventWriter::new(path?, uuid::Uuid::new_v4().to_string());
    let mut payload = EventPayload::new();
    payload.insert("mode".to_string(), json!(mode));
    payload.insert("pid".to_string(), json!(std::process::id()));
    payload.insert("version".to_string(), json!(env!("CARGO_PKG_VERSION")));
    emit_optional(Some(&writer), SESSION_STARTED, payload);
    info!(path = %writer.path().display(), "writing pipeline events");
    Some(writer)
}

fn run_bot(args: RunArgs, events: Option<PathBuf>) -> Result<i32> {
    let mut config = BotConfig::from_env()?;
    args.models.apply(&mut config.engine);
    if let Some(path) = args.diagram_path {
        config.engine.diagram_path = path;
    }
    if let Some(path) = args.pid_file {
        config.pid_file = path;
    }
    info!(config = %config.summary(), "configuration loaded");
    let lock = PidLock::acquire(&config.pid_file)?;

    let shutdown = ShutdownHandle::new();
    install_signal_handlers(shutdown.clone())?;

    let events = open_events(events.or_else(|| config.events_path.clone()), "run");
    let http = build_http_client(events.clone()).context("failed to build HTTP client")?;
    let slack = SlackClient::new(http.clone(), &config.slack_bot_token, &config.slack_app_token)
        .with_api_base(&config.slack_api_base);
    let identity = slack.auth_test().context("Slack auth.test failed")?;
    info!(
        user = ?identity.user,
        user_id = ?identity.user_id,
        team = ?identity.team,
        "connected to Slack"
    );

    let orchestrator = build_orchestrator(&config.engine, http.clone(), Box::new(http), events);
    SocketModeLoop::new(&slack, &orchestrator, shutdown).run()?;
    info!(pid_file = %lock.path().display(), "bot stopped, releasing lock");
    Ok(0)
}

fn run_analyze(args: AnalyzeArgs, events: Option<PathBuf>) -> Result<i32> {
    let mut settings = engine_settings_from_env()?;
    args.models.apply(&mut settings);
    let scratch = tempfile::tempdir().context("failed to create scratch directory")?;
    settings.diagram_path = scratch.path().join(secarch_engine::orchestrator::DEFAULT_DIAGRAM_FILE);

    let events = open_events(events.or_else(events_path_from_env), "analyze");
    let http = build_http_client(events.clone()).context("failed to build HTTP client")?;
    let fetcher = LocalFirstFetcher::new(http.clone());
    let orchestrator = build_orchestrator(&settings, http, Box::new(fetcher), events);

    let images = args
        .images
        .iter()
        .map(|path| ImageRef::new(path.display().to_string()))
        .collect();
    let request = AnalysisRequest::new(args.text, images);
    let sink = StdoutSink::new(args.diagram_out);
    let outcome = orchestrator.handle(&request, &ReplyTarget::default(), &sink);
    if let Some(err) = &outcome.diagram_error {
        warn!(error = %err, "diagram was not produced");
    }
    info!(request_id = %outcome.request_id, state = %outcome.final_state(), "analysis finished");
    Ok(if outcome.succeeded() { 0 } else { 1 })
}
