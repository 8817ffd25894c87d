//! Control surface for the AtlasChat coordinator.
//!
//! Every subcommand is a protocol request against the state in
//! `<root>/.atlaschat/`. `serve` runs the long-lived coordinator over
//! newline-delimited JSON on stdin/stdout.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info};

use atlaschat::coordinator::{self, Coordinator};
use atlaschat::core::types::{ExtensionState, Mode, RewriteResult};
use atlaschat::io::config::{AtlasConfig, load_config, write_config};
use atlaschat::io::indicator::LogIndicator;
use atlaschat::io::paths::AtlasPaths;
use atlaschat::io::store::JsonFileStore;
use atlaschat::logging;
use atlaschat::protocol::{Request, Response, decode_request};

#[derive(Parser)]
#[command(
    name = "atlaschat",
    version,
    about = "Submit interception and prompt rewriting for a chat page"
)]
struct Cli {
    /// Project directory holding `.atlaschat/`.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.atlaschat/` with default state and config.
    Init {
        /// Overwrite existing files.
        #[arg(short, long)]
        force: bool,
    },
    /// Print engagement and mode.
    State,
    /// Flip engagement.
    Toggle,
    /// Set the rewrite mode (anything but `direct` selects guard).
    Mode { mode: String },
    /// Rewrite a prompt as the engine would.
    Process {
        text: String,
        /// Override the stored mode for this request.
        #[arg(long)]
        mode: Option<String>,
    },
    /// Serve protocol requests as NDJSON on stdin/stdout.
    Serve,
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
    let paths = AtlasPaths::new(&cli.root);
    match cli.command {
        Command::Init { force } => cmd_init(&paths, force),
        Command::State => cmd_request(&paths, Request::GetState),
        Command::Toggle => cmd_request(&paths, Request::Toggle),
        Command::Mode { mode } => cmd_request(&paths, Request::set_mode(&mode)),
        Command::Process { text, mode } => cmd_process(&paths, &text, mode.as_deref()),
        Command::Serve => cmd_serve(&paths).await,
    }
}

fn open(paths: &AtlasPaths) -> Coordinator<JsonFileStore, LogIndicator> {
    Coordinator::new(JsonFileStore::new(paths.state_path.clone()), LogIndicator)
}

fn cmd_init(paths: &AtlasPaths, force: bool) -> Result<()> {
    fs::create_dir_all(&paths.state_dir)
        .with_context(|| format!("create {}", paths.state_dir.display()))?;
    if force || !paths.config_path.exists() {
        write_config(&paths.config_path, &AtlasConfig::default())
            .context("write .atlaschat/config.toml")?;
    }
    let state = open(paths).install(force)?;
    print_state(&state);
    Ok(())
}

fn cmd_request(paths: &AtlasPaths, request: Request) -> Result<()> {
    let kind = request.kind();
    let response = open(paths)
        .handle(request)
        .with_context(|| format!("no reply to {kind}"))?;
    match response {
        Response::State(state) => {
            print_state(&state);
            Ok(())
        }
        Response::Result(result) => fail(&result),
    }
}

fn cmd_process(paths: &AtlasPaths, text: &str, mode: Option<&str>) -> Result<()> {
    let result = open(paths).process_prompt(text, mode);
    if !result.ok {
        return fail(&result);
    }
    println!("{}", result.text.unwrap_or_default());
    Ok(())
}

async fn cmd_serve(paths: &AtlasPaths) -> Result<()> {
    // The coordinator itself has no tunables; only a broken file is fatal.
    let config = load_config(&paths.config_path)?;
    let (handle, task) = coordinator::spawn(open(paths));
    info!(
        root = %paths.root.display(),
        hosts = config.hosts.len(),
        rewrite_timeout_ms = config.rewrite_timeout_ms,
        "coordinator serving on stdin, config validated"
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    while let Some(line) = lines.next_line().await.context("read stdin")? {
        let Some(request) = decode_request(&line) else {
            continue;
        };
        let Some(response) = handle.dispatch(request).await? else {
            continue;
        };
        let mut payload = serde_json::to_string(&response).context("serialize response")?;
        payload.push('\n');
        stdout
            .write_all(payload.as_bytes())
            .await
            .context("write stdout")?;
        stdout.flush().await.context("flush stdout")?;
    }

    drop(handle);
    task.await.context("coordinator task")?;
    debug!("stdin closed");
    Ok(())
}

fn print_state(state: &ExtensionState) {
    let engaged = if state.enabled { "Engaged" } else { "Disengaged" };
    let mode = match state.mode {
        Mode::Guard => "Guard",
        Mode::Direct => "Direct",
    };
    println!("{engaged}\t{mode}");
}

fn fail(result: &RewriteResult) -> Result<()> {
    let code = result.error.map(|e| e.as_str()).unwrap_or("UNKNOWN");
    match result.detail.as_deref() {
        Some(detail) => bail!("{code}: {detail}"),
        None => bail!("{code}"),
    }
}
