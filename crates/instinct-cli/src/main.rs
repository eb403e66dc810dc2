mod cmd;
mod engine;
mod output;
mod root;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use cmd::config::ConfigSubcommand;

#[derive(Parser)]
#[command(
    name = "instinct",
    about = "Reflex engine: match security events to automated responses",
    version,
    propagate_version = true
)]
struct Cli {
    /// Configuration file (default: ./instinct.yaml)
    #[arg(long, global = true, env = "INSTINCT_CONFIG")]
    config: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load reflexes and plugins, then accept events over HTTP
    Serve {
        /// Address to bind (overrides server.host)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides server.port)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Check every reflex file without running anything
    Validate {
        /// Reflex directory (default: reflex_dir from the config)
        #[arg(long)]
        dir: Option<PathBuf>,
    },

    /// Run a single event through the loaded reflexes
    Process {
        /// JSON file holding the event, or - for stdin
        input: String,

        /// Reflex directory (default: reflex_dir from the config)
        #[arg(long)]
        dir: Option<PathBuf>,
    },

    /// List discovered plugins
    Plugins,

    /// Inspect and validate the configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Serve { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let result = root::load_config(cli.config.as_deref()).and_then(|config| match cli.command {
        Commands::Serve { host, port } => cmd::serve::run(config, host, port),
        Commands::Validate { dir } => cmd::validate::run(&config, dir, cli.json),
        Commands::Process { input, dir } => cmd::process::run(&config, &input, dir, cli.json),
        Commands::Plugins => cmd::plugins::run(&config, cli.json),
        Commands::Config { subcommand } => cmd::config::run(&config, subcommand, cli.json),
    });

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
