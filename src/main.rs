//! Notestream - streaming notebook Q&A client
//!
#![doc = "Notestream - streaming notebook Q&A client"]
#![doc = "Main entry point for the notestream command line application."]

use anyhow::Result;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use notestream::cli::{Cli, Commands};
use notestream::commands;
use notestream::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse_args();

    // Initialize tracing
    init_tracing(cli.verbose);

    // Mirror a storage override into NOTESTREAM_HISTORY_DB so the default
    // store constructor picks it up as well.
    if let Some(db_path) = &cli.storage_path {
        std::env::set_var("NOTESTREAM_HISTORY_DB", db_path);
        tracing::info!("Using storage DB override from CLI: {}", db_path);
    }

    // Load configuration
    let config_path = cli.config.as_deref().unwrap_or("config/config.yaml");
    let config = Config::load(config_path, &cli)?;

    // Validate configuration
    config.validate()?;

    // Execute command
    match cli.command {
        Commands::Ask {
            query,
            conversation,
        } => {
            tracing::info!("Starting ask command");
            if let Some(c) = &conversation {
                tracing::debug!("Continuing conversation: {}", c);
            }
            commands::ask::run_ask(config, query, conversation).await?;
            Ok(())
        }
        Commands::Chat { resume } => {
            if let Some(r) = &resume {
                tracing::debug!("Resuming conversation: {}", r);
            }
            commands::chat::run_chat(config, resume).await?;
            Ok(())
        }
        Commands::History { command } => {
            tracing::info!("Starting history command");
            let store = commands::open_store(&config)?;
            commands::history::handle_history(command, &store).await?;
            Ok(())
        }
    }
}

/// Initialize tracing subscriber with environment filter
///
/// Logs go to stderr so they do not interleave with streamed answers.
fn init_tracing(verbose: bool) {
    let default_filter = if verbose {
        "notestream=debug"
    } else {
        "notestream=info"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
