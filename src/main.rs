use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod cli;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Docker credential helper: read a server URL from stdin and print its credentials
    Get,
    /// Show how a registry hostname is interpreted
    Parse {
        /// Registry hostname (e.g., 123456789012.dkr.ecr.us-west-2.amazonaws.com)
        host: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout carries the credential helper protocol
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Get => {
            let mut stdout = std::io::stdout();
            let outcome = match ecr_keychain::default_keychain().await {
                Ok(keychain) => {
                    cli::helper::handle_get(&keychain, std::io::stdin(), &mut stdout).await
                }
                Err(err) => cli::helper::report_error(&mut stdout, &err).and(Err(err)),
            };
            if let Err(err) = outcome {
                tracing::debug!("credential helper get failed: {:#}", err);
                std::process::exit(1);
            }
        }
        Commands::Parse { host } => {
            cli::helper::handle_parse(host)?;
        }
    }

    Ok(())
}
