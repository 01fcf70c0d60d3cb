//! Command-line surface: the interactive builder and one-shot commands.

use crate::auth::{self, CredentialStore};
use crate::config::Config;
use crate::error::Result;
use crate::gallery::{GamePatch, GameStore, HttpGameStore, Visibility};
use crate::sandbox::{RenderHandle, Sandbox};
use crate::session::{
    AnswerSheet, GenerationParams, Origin, Outcome, Question, SessionDriver, SessionState,
};
use crate::transport::HttpTransport;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::future::Future;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;

/// Build, preview, and share AI-generated arcade games
#[derive(Parser, Debug)]
#[command(name = "gameforge", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Verbose output (structured logs to stderr)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Backend base URL (overrides config)
    #[arg(long, global = true, value_name = "URL")]
    pub backend: Option<String>,
}

impl Cli {
    /// Config with CLI overrides applied.
    pub fn effective_config(&self) -> Result<Config> {
        let mut config = Config::load()?;
        if let Some(backend) = &self.backend {
            config.backend_url = backend.clone();
        }
        Ok(config)
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build a game interactively (default)
    Build(BuildArgs),
    /// Generate a game from a single prompt (non-interactive)
    Run(RunArgs),
    /// Ping the backend so a cold instance spins up
    Wake,
    /// Manage saved games
    Games(GamesArgs),
    /// Store an access token for the games gateway
    Login,
    /// Forget the stored access token
    Logout,
    /// Show who the stored token belongs to
    Whoami,
    /// View or modify configuration
    Config(ConfigArgs),
}

#[derive(Parser, Debug, Default)]
pub struct BuildArgs {
    /// Weapon folded into the first prompt
    #[arg(long)]
    pub weapon: Option<String>,

    /// Background vibe folded into the first prompt
    #[arg(long)]
    pub vibe: Option<String>,

    /// Target type folded into the first prompt
    #[arg(long)]
    pub target: Option<String>,
}

#[derive(Parser, Debug)]
pub struct RunArgs {
    /// The game idea (use "-" to read from stdin)
    #[arg(required = true)]
    pub prompt: String,

    /// Write the generated markup to a file instead of stdout
    #[arg(long, value_name = "FILE")]
    pub out: Option<PathBuf>,

    /// Output format
    #[arg(short = 'o', long, default_value = "text", value_enum)]
    pub output_format: OutputFormat,

    /// Weapon folded into the prompt
    #[arg(long)]
    pub weapon: Option<String>,

    /// Background vibe folded into the prompt
    #[arg(long)]
    pub vibe: Option<String>,

    /// Target type folded into the prompt
    #[arg(long)]
    pub target: Option<String>,
}

#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Parser, Debug)]
pub struct GamesArgs {
    #[command(subcommand)]
    pub action: GamesAction,
}

#[derive(Subcommand, Debug)]
pub enum GamesAction {
    /// List your saved games
    List {
        /// Show everyone's public games instead
        #[arg(long)]
        public: bool,
    },
    /// Make a saved game public
    Publish {
        /// Game id
        id: String,
    },
    /// Make a saved game private
    Unpublish {
        /// Game id
        id: String,
    },
    /// Retitle a saved game
    Rename {
        /// Game id
        id: String,
        /// New title
        title: String,
    },
    /// Delete a saved game
    Delete {
        /// Game id
        id: String,
    },
}

#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Get a configuration value
    Get {
        /// Key to get (backend_url, weapon, vibe, target)
        key: String,
    },
    /// Set a configuration value
    Set {
        /// Key to set
        key: String,
        /// Value to set
        value: String,
    },
    /// Show config file path
    Path,
}

/// Merge arcade knobs: CLI flags win over config defaults.
fn merge_params(
    config: &Config,
    weapon: Option<String>,
    vibe: Option<String>,
    target: Option<String>,
) -> GenerationParams {
    GenerationParams {
        weapon: weapon.or_else(|| config.weapon.clone()),
        vibe: vibe.or_else(|| config.vibe.clone()),
        target: target.or_else(|| config.target.clone()),
    }
}

/// Map a numeric selection onto a suggested option; anything else passes
/// through as free text.
fn resolve_choice(options: &[String], input: &str) -> String {
    if let Ok(n) = input.parse::<usize>()
        && n >= 1
        && n <= options.len()
    {
        return options[n - 1].clone();
    }
    input.to_string()
}

fn read_line(prompt: &str) -> io::Result<Option<String>> {
    print!("{prompt}");
    io::stdout().flush()?;
    let mut line = String::new();
    if io::stdin().read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim().to_string()))
}

/// Prompt for every question in the batch. Returns `None` on EOF.
fn collect_answers(questions: &[Question]) -> io::Result<Option<AnswerSheet>> {
    let mut sheet = AnswerSheet::new();
    for question in questions {
        println!("{}", question.prompt);
        for (i, option) in question.options.iter().enumerate() {
            println!("  {}. {option}", i + 1);
        }
        let Some(line) = read_line("answer> ")? else {
            return Ok(None);
        };
        sheet.record(&question.id, resolve_choice(&question.options, &line));
    }
    Ok(Some(sheet))
}

/// Await a generation call; Ctrl-C abandons it instead of killing the
/// process.
async fn guarded<F: Future>(cancel: CancellationToken, call: F) -> F::Output {
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });
    let out = call.await;
    watcher.abort();
    out
}

fn last_system_message(driver: &SessionDriver<HttpTransport>) -> Option<&str> {
    driver
        .session()
        .history()
        .iter()
        .rev()
        .find(|m| m.origin == Origin::System)
        .map(|m| m.text.as_str())
}

/// Run the interactive builder.
pub async fn build(args: BuildArgs, config: Config) -> ExitCode {
    match build_inner(args, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn build_inner(args: BuildArgs, config: Config) -> Result<()> {
    let params = merge_params(&config, args.weapon, args.vibe, args.target);
    let transport = HttpTransport::new(&config.backend_url, config.request_timeout());

    // Cold backends take a while to spin up; nudge it before the first
    // prompt. Failure here is not fatal.
    if let Err(e) = transport.wake().await {
        tracing::debug!(error = %e, "wake ping failed");
    }

    let sandbox = Sandbox::with_grace_period(config.preview_grace())?;
    let mut driver = SessionDriver::new(transport);
    let mut render: Option<RenderHandle> = None;

    println!("GameForge interactive builder. Describe the game you want.");
    println!("Commands: /save <title>, /play, /new, /quit");

    loop {
        let Some(line) = read_line("> ")? else {
            break;
        };
        if line.is_empty() {
            continue;
        }

        match line.as_str() {
            "/quit" => break,
            "/new" => {
                driver.reset();
                sandbox.clear();
                render = None;
                println!("Started a new topic.");
                continue;
            }
            "/play" => {
                match &render {
                    Some(handle) => sandbox.play(handle)?,
                    None => println!("Nothing to play yet."),
                }
                continue;
            }
            _ => {}
        }

        if let Some(title) = line.strip_prefix("/save ") {
            save_current(&driver, &config, title).await;
            continue;
        }

        // After a failed resume the session is back to answering; free text
        // is not valid there, so re-prompt the batch instead of sending.
        let mut outcome = if driver.session().state() == SessionState::AwaitingAnswers {
            println!("The service still needs your answers.");
            let questions = driver.session().pending_questions().to_vec();
            let Some(sheet) = collect_answers(&questions)? else {
                return Ok(());
            };
            println!("Generating...");
            guarded(driver.cancel_handle(), driver.answer(&sheet)).await?
        } else {
            println!("Generating...");
            guarded(driver.cancel_handle(), driver.send(&line, &params)).await?
        };

        loop {
            match outcome {
                Outcome::Interrupted => {
                    if let Some(text) = last_system_message(&driver) {
                        println!("{text}");
                    }
                    let questions = driver.session().pending_questions().to_vec();
                    let Some(sheet) = collect_answers(&questions)? else {
                        return Ok(());
                    };
                    println!("Generating...");
                    outcome = guarded(driver.cancel_handle(), driver.answer(&sheet)).await?;
                }
                Outcome::Ready => {
                    if let Some(text) = last_system_message(&driver) {
                        println!("{text}");
                    }
                    if let Some(artifact) = driver.session().artifact() {
                        let handle = sandbox.render(artifact);
                        println!("Preview: {} (type /play to open)", handle.url);
                        render = Some(handle);
                    }
                    break;
                }
                Outcome::Errored(message) => {
                    eprintln!("{message}");
                    break;
                }
                Outcome::Stale => {
                    println!("Abandoned. Send another message to start over.");
                    break;
                }
            }
        }
    }

    sandbox.shutdown();
    Ok(())
}

async fn save_current(driver: &SessionDriver<HttpTransport>, config: &Config, title: &str) {
    let Some(artifact) = driver.session().artifact() else {
        println!("Nothing to save yet.");
        return;
    };

    let token = match CredentialStore::new().and_then(|s| s.require()) {
        Ok(token) => token,
        Err(e) => {
            eprintln!("{e}");
            return;
        }
    };

    let store = HttpGameStore::new(&config.backend_url, token, config.request_timeout());
    match store
        .save(title, &artifact.source_markup, Visibility::Private)
        .await
    {
        Ok(game) => println!("Saved \"{}\" as {}", game.title, game.id),
        Err(e) => eprintln!("Save failed: {e}"),
    }
}

/// Structured result of a one-shot run, for `-o json`.
#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RunReport {
    Success {
        html: String,
    },
    Interrupt {
        questions: Vec<ReportQuestion>,
    },
    Error {
        message: String,
    },
}

#[derive(Serialize)]
struct ReportQuestion {
    question: String,
    options: Vec<String>,
}

/// Run one-shot generation. Exits 3 when the service interrupts with
/// questions, since there is no one to answer them.
pub async fn run(args: RunArgs, config: Config) -> ExitCode {
    match run_inner(args, config).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run_inner(args: RunArgs, config: Config) -> Result<ExitCode> {
    let prompt = if args.prompt == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        buffer.trim().to_string()
    } else {
        args.prompt.clone()
    };
    if prompt.is_empty() {
        return Err(anyhow::anyhow!("empty prompt").into());
    }

    let params = merge_params(&config, args.weapon, args.vibe, args.target);
    let transport = HttpTransport::new(&config.backend_url, config.request_timeout());
    if let Err(e) = transport.wake().await {
        tracing::debug!(error = %e, "wake ping failed");
    }

    let mut driver = SessionDriver::new(transport);
    let outcome = guarded(driver.cancel_handle(), driver.send(&prompt, &params)).await?;

    match outcome {
        Outcome::Ready => {
            let markup = driver
                .session()
                .artifact()
                .map(|a| a.source_markup.clone())
                .unwrap_or_default();
            if let Some(out) = &args.out {
                std::fs::write(out, &markup)?;
                if matches!(args.output_format, OutputFormat::Text) {
                    eprintln!("Wrote {}", out.display());
                }
            }
            match args.output_format {
                OutputFormat::Text => {
                    if args.out.is_none() {
                        println!("{markup}");
                    }
                }
                OutputFormat::Json => {
                    println!(
                        "{}",
                        serde_json::to_string(&RunReport::Success { html: markup })?
                    );
                }
            }
            Ok(ExitCode::from(0))
        }
        Outcome::Interrupted => {
            let questions: Vec<ReportQuestion> = driver
                .session()
                .pending_questions()
                .iter()
                .map(|q| ReportQuestion {
                    question: q.prompt.clone(),
                    options: q.options.clone(),
                })
                .collect();
            match args.output_format {
                OutputFormat::Text => {
                    eprintln!("The service needs more input:");
                    for q in &questions {
                        eprintln!("- {}", q.question);
                        for option in &q.options {
                            eprintln!("    {option}");
                        }
                    }
                    eprintln!("Use `gameforge build` to answer interactively.");
                }
                OutputFormat::Json => {
                    println!(
                        "{}",
                        serde_json::to_string(&RunReport::Interrupt { questions })?
                    );
                }
            }
            Ok(ExitCode::from(3))
        }
        Outcome::Errored(message) => {
            match args.output_format {
                OutputFormat::Text => eprintln!("{message}"),
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string(&RunReport::Error { message })?);
                }
            }
            Ok(ExitCode::from(1))
        }
        Outcome::Stale => Ok(ExitCode::from(1)),
    }
}

/// Ping the backend root so a sleeping instance starts warming up.
pub async fn wake(config: &Config) -> ExitCode {
    let transport = HttpTransport::new(&config.backend_url, config.request_timeout());
    match transport.wake().await {
        Ok(message) => {
            println!("{message}");
            ExitCode::from(0)
        }
        Err(e) => {
            eprintln!("Wake failed: {e}");
            ExitCode::from(1)
        }
    }
}

/// Run a games subcommand.
pub async fn games(args: GamesArgs, config: Config) -> ExitCode {
    match games_inner(args, config).await {
        Ok(()) => ExitCode::from(0),
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(1)
        }
    }
}

async fn games_inner(args: GamesArgs, config: Config) -> Result<()> {
    let credentials = CredentialStore::new()?;

    // The public listing needs no credential; everything else does.
    let token = match &args.action {
        GamesAction::List { public: true } => credentials.load()?.unwrap_or_default(),
        _ => credentials.require()?,
    };
    let store = HttpGameStore::new(&config.backend_url, token, config.request_timeout());

    match args.action {
        GamesAction::List { public } => {
            let games = if public {
                store.explore().await?
            } else {
                store.list().await?
            };
            if games.is_empty() {
                println!("No games.");
                return Ok(());
            }
            for game in games {
                let visibility = match game.visibility {
                    Visibility::Public => "public ",
                    Visibility::Private => "private",
                };
                let updated = game
                    .updated_at
                    .or(game.created_at)
                    .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_default();
                println!("{}  {visibility}  {}  {updated}", game.id, game.title);
            }
        }
        GamesAction::Publish { id } => {
            let game = store
                .update(
                    &id,
                    &GamePatch {
                        visibility: Some(Visibility::Public),
                        ..GamePatch::default()
                    },
                )
                .await?;
            println!("\"{}\" is now public", game.title);
        }
        GamesAction::Unpublish { id } => {
            let game = store
                .update(
                    &id,
                    &GamePatch {
                        visibility: Some(Visibility::Private),
                        ..GamePatch::default()
                    },
                )
                .await?;
            println!("\"{}\" is now private", game.title);
        }
        GamesAction::Rename { id, title } => {
            let game = store
                .update(
                    &id,
                    &GamePatch {
                        title: Some(title),
                        ..GamePatch::default()
                    },
                )
                .await?;
            println!("Renamed to \"{}\"", game.title);
        }
        GamesAction::Delete { id } => {
            store.delete(&id).await?;
            println!("Deleted {id}");
        }
    }
    Ok(())
}

/// Store an access token after verifying it against the backend.
pub async fn login(config: &Config) -> ExitCode {
    match login_inner(config).await {
        Ok(()) => ExitCode::from(0),
        Err(e) => {
            eprintln!("Login failed: {e}");
            ExitCode::from(1)
        }
    }
}

async fn login_inner(config: &Config) -> Result<()> {
    let Some(token) = read_line("Paste your access token: ")? else {
        return Err(anyhow::anyhow!("no token provided").into());
    };
    if token.is_empty() {
        return Err(anyhow::anyhow!("no token provided").into());
    }

    let identity = auth::whoami(&config.backend_url, &token, config.request_timeout()).await?;
    CredentialStore::new()?.save(&token)?;
    println!("Logged in as {}", identity.username);
    Ok(())
}

/// Forget the stored token.
pub fn logout() -> ExitCode {
    match CredentialStore::new().and_then(|s| s.clear()) {
        Ok(()) => {
            println!("Logged out");
            ExitCode::from(0)
        }
        Err(e) => {
            eprintln!("Logout failed: {e}");
            ExitCode::from(1)
        }
    }
}

/// Show the principal behind the stored token.
pub async fn whoami(config: &Config) -> ExitCode {
    match whoami_inner(config).await {
        Ok(()) => ExitCode::from(0),
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(1)
        }
    }
}

async fn whoami_inner(config: &Config) -> Result<()> {
    let token = CredentialStore::new()?.require()?;
    let identity = auth::whoami(&config.backend_url, &token, config.request_timeout()).await?;
    match identity.name {
        Some(name) => println!("{} ({name})", identity.username),
        None => println!("{}", identity.username),
    }
    Ok(())
}

/// Run the config command.
#[must_use]
pub fn config_cmd(args: ConfigArgs) -> ExitCode {
    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading config: {e}");
            return ExitCode::from(1);
        }
    };

    match args.action {
        None => {
            println!("backend_url: {}", config.backend_url);
            println!("request_timeout_secs: {}", config.request_timeout_secs);
            println!("preview_grace_ms: {}", config.preview_grace_ms);
            println!("weapon: {}", config.weapon.as_deref().unwrap_or("(not set)"));
            println!("vibe: {}", config.vibe.as_deref().unwrap_or("(not set)"));
            println!("target: {}", config.target.as_deref().unwrap_or("(not set)"));
            ExitCode::from(0)
        }
        Some(ConfigAction::Path) => {
            println!("{}", Config::path().display());
            ExitCode::from(0)
        }
        Some(ConfigAction::Get { key }) => {
            let value = match key.as_str() {
                "backend_url" => Some(config.backend_url.clone()),
                "request_timeout_secs" => Some(config.request_timeout_secs.to_string()),
                "preview_grace_ms" => Some(config.preview_grace_ms.to_string()),
                "weapon" => config.weapon.clone(),
                "vibe" => config.vibe.clone(),
                "target" => config.target.clone(),
                _ => {
                    eprintln!(
                        "Unknown key: {key}. Valid keys: backend_url, request_timeout_secs, \
                         preview_grace_ms, weapon, vibe, target"
                    );
                    return ExitCode::from(1);
                }
            };
            println!("{}", value.unwrap_or_else(|| "(not set)".to_string()));
            ExitCode::from(0)
        }
        Some(ConfigAction::Set { key, value }) => {
            let mut config = config;
            match key.as_str() {
                "backend_url" => config.backend_url = value,
                "request_timeout_secs" => match value.parse() {
                    Ok(v) => config.request_timeout_secs = v,
                    Err(_) => {
                        eprintln!("request_timeout_secs must be a number");
                        return ExitCode::from(1);
                    }
                },
                "preview_grace_ms" => match value.parse() {
                    Ok(v) => config.preview_grace_ms = v,
                    Err(_) => {
                        eprintln!("preview_grace_ms must be a number");
                        return ExitCode::from(1);
                    }
                },
                "weapon" => config.weapon = Some(value),
                "vibe" => config.vibe = Some(value),
                "target" => config.target = Some(value),
                _ => {
                    eprintln!(
                        "Unknown key: {key}. Valid keys: backend_url, request_timeout_secs, \
                         preview_grace_ms, weapon, vibe, target"
                    );
                    return ExitCode::from(1);
                }
            }
            if let Err(e) = config.save() {
                eprintln!("Failed to save config: {e}");
                return ExitCode::from(1);
            }
            println!("Updated {key}");
            ExitCode::from(0)
        }
    }
}
