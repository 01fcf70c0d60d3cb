use clap::Parser;
use gameforge::cli::{self, BuildArgs, Cli, Commands};
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.verbose || std::env::var("GAMEFORGE_LOG").is_ok() {
        let filter = tracing_subscriber::EnvFilter::try_from_env("GAMEFORGE_LOG")
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("gameforge=debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();
    }

    let config = match cli.effective_config() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading config: {e}");
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        None => cli::build(BuildArgs::default(), config).await,
        Some(Commands::Build(args)) => cli::build(args, config).await,
        Some(Commands::Run(args)) => cli::run(args, config).await,
        Some(Commands::Wake) => cli::wake(&config).await,
        Some(Commands::Games(args)) => cli::games(args, config).await,
        Some(Commands::Login) => cli::login(&config).await,
        Some(Commands::Logout) => cli::logout(),
        Some(Commands::Whoami) => cli::whoami(&config).await,
        Some(Commands::Config(args)) => cli::config_cmd(args),
    }
}
