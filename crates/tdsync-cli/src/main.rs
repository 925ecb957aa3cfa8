mod cmd;
mod output;

use clap::{Parser, Subcommand};
use cmd::{config::ConfigSubcommand, game::GameSubcommand, storyboard::StoryboardSubcommand};
use std::path::PathBuf;
use tdsync_core::config::DEFAULT_CONFIG_FILE;

#[derive(Parser)]
#[command(
    name = "tdsync",
    about = "Plan GitLab work in Thunderdome: build poker games from issues, write votes back as weights",
    version,
    propagate_version = true
)]
struct Cli {
    /// Config file (default: ./tdsync.yaml, optional)
    #[arg(long, global = true, env = "TDSYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Thunderdome base URL (overrides the config file)
    #[arg(long, global = true, env = "THUNDERDOME_URL")]
    thunderdome_url: Option<String>,

    /// GitLab base URL (overrides the config file)
    #[arg(long, global = true, env = "GITLAB_URL")]
    gitlab_url: Option<String>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create, extend, and harvest planning-poker games
    Game {
        #[command(subcommand)]
        subcommand: GameSubcommand,
    },

    /// Move storyboard stories into GitLab iterations
    Storyboard {
        #[command(subcommand)]
        subcommand: StoryboardSubcommand,
    },

    /// Create or validate the config file
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli
        .config
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    let result = match cli.command {
        Commands::Config { subcommand } => cmd::config::run(&config_path, subcommand, cli.json),
        Commands::Game { subcommand } => cmd::Settings::load(
            &config_path,
            cli.thunderdome_url,
            cli.gitlab_url,
            cli.json,
        )
        .and_then(|settings| cmd::game::run(&settings, subcommand)),
        Commands::Storyboard { subcommand } => cmd::Settings::load(
            &config_path,
            cli.thunderdome_url,
            cli.gitlab_url,
            cli.json,
        )
        .and_then(|settings| cmd::storyboard::run(&settings, subcommand)),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
