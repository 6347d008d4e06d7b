mod cli;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use embed_server::config::AppConfig;

#[derive(Parser)]
#[command(name = "embed-server", version, about = "Text-embedding and similarity service")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load the model and serve HTTP
    Serve,
    /// Manage the embedding model
    Model {
        #[command(subcommand)]
        action: ModelAction,
    },
    /// Embed texts once and print the result as JSON
    Embed {
        /// Texts to embed
        #[arg(required = true)]
        texts: Vec<String>,
        /// Return raw vectors instead of unit-normalized ones
        #[arg(long)]
        raw: bool,
    },
}

#[derive(Subcommand)]
enum ModelAction {
    /// Download the embedding model to ~/.embed-server/models/
    Download,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load config (for log level)
    let config = AppConfig::load()?;

    // Log to stderr so stdout stays clean for `embed` output.
    let filter = EnvFilter::try_new(&config.server.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Serve => {
            embed_server::api::serve(config).await?;
        }
        Command::Model { action } => match action {
            ModelAction::Download => {
                cli::model_download(&config.model).await?;
            }
        },
        Command::Embed { texts, raw } => {
            cli::embed_once(&config, texts, !raw).await?;
        }
    }

    Ok(())
}
