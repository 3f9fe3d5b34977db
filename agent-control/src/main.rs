//! Agent control core driver.
//!
//! Replays inbound payloads (one JSON object per line) through a session,
//! prompts on stderr/stdin when a human decision is needed, and writes
//! outbound payloads to stdout as JSON lines.

use std::fs;
use std::path::{Path, PathBuf};

use agent_control::core::state_detector::detect;
use agent_control::delegation::resume_target;
use agent_control::dispatch::{AskDispatcher, DispatchConfig};
use agent_control::driver::{JsonLineSink, SessionDriver};
use agent_control::io::config::{ControlConfig, DispatchMode, load_config, write_config};
use agent_control::io::delegation_store::FileDelegationStore;
use agent_control::io::prompt::TerminalPrompter;
use agent_control::io::wire::{InboundMessage, parse_inbound};
use agent_control::logging;
use agent_control::session::{SessionClient, SessionEvent};
use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};

const DEFAULT_CONFIG: &str = "agent-control.toml";

#[derive(Parser)]
#[command(
    name = "agent-control",
    version,
    about = "State detection, ask dispatch and delegation for coding-agent sessions"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default config file.
    Init {
        #[arg(long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
    /// Drive a session from a JSONL file of inbound payloads.
    Run {
        #[arg(long)]
        input: PathBuf,
        #[arg(long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,
        /// Answer asks without a human where policy allows.
        #[arg(long)]
        non_interactive: bool,
    },
    /// Print the detected state of a `state` snapshot payload.
    Detect {
        #[arg(long)]
        input: PathBuf,
    },
    /// Print the task that should be foreground after a restart.
    ResumeTarget {
        task_id: String,
        #[arg(long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    logging::init();
    if let Err(err) = run().await {
        eprintln!("{:#}", err);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Init { config, force } => cmd_init(&config, force),
        Command::Run {
            input,
            config,
            non_interactive,
        } => cmd_run(&input, &config, non_interactive).await,
        Command::Detect { input } => cmd_detect(&input),
        Command::ResumeTarget { task_id, config } => cmd_resume_target(&task_id, &config),
    }
}

fn cmd_init(path: &Path, force: bool) -> Result<()> {
    if !force && path.exists() {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    write_config(path, &ControlConfig::default())
}

async fn cmd_run(input: &Path, config: &Path, non_interactive: bool) -> Result<()> {
    let mut cfg = load_config(config)?;
    if non_interactive {
        cfg.mode = DispatchMode::NonInteractive;
    }
    info!(mode = ?cfg.mode, input = %input.display(), "starting session");

    let file = tokio::fs::File::open(input)
        .await
        .with_context(|| format!("open {}", input.display()))?;
    let mut lines = BufReader::new(file).lines();

    let dispatcher = AskDispatcher::new(TerminalPrompter::stdio(), DispatchConfig::from(&cfg));
    let mut driver = SessionDriver::new(
        SessionClient::new(),
        dispatcher,
        JsonLineSink::new(std::io::stdout()),
    );
    driver
        .session()
        .subscribe(|event| match event {
            SessionEvent::StateChange { current, .. } => info!(state = ?current.state, "state"),
            SessionEvent::Error { error } => error!(error = %error, "session error"),
            _ => {}
        })
        .forget();

    while let Some(line) = lines
        .next_line()
        .await
        .with_context(|| format!("read {}", input.display()))?
    {
        if line.trim().is_empty() {
            continue;
        }
        driver.handle_inbound(&line);
    }
    driver.settle().await;
    Ok(())
}

fn cmd_detect(input: &Path) -> Result<()> {
    let raw = fs::read_to_string(input).with_context(|| format!("read {}", input.display()))?;
    let Some(InboundMessage::State { state, .. }) = parse_inbound(&raw) else {
        bail!("{} is not a state snapshot payload", input.display());
    };
    let detected = detect(&state.messages);
    println!(
        "{}",
        serde_json::to_string_pretty(&detected).context("serialize detected state")?
    );
    Ok(())
}

fn cmd_resume_target(task_id: &str, config: &Path) -> Result<()> {
    let cfg = load_config(config)?;
    let store = FileDelegationStore::new(&cfg.delegation_dir)?;
    println!("{}", resume_target(&store, task_id)?);
    Ok(())
}
