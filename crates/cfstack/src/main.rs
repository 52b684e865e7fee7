mod rpc;

use cfstack_resource::Provider;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cfstack")]
#[command(about = "Cloud Foundry provider for declarative infrastructure hosts", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Speak the provider protocol on stdin/stdout (default)
    Serve,
    /// Print every resource and data source schema as JSON
    Schema,
    /// Print the version
    Version,
}

/// stdout carries the protocol, so logs go to stderr.
fn init_logging() {
    let filter = EnvFilter::try_from_env("CF_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_ansi(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Version => {
            println!("cfstack {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::Schema => {
            println!("{}", serde_json::to_string_pretty(&Provider::new().schemas())?);
            Ok(())
        }
        Commands::Serve => {
            init_logging();
            tracing::info!(version = env!("CARGO_PKG_VERSION"), "cfstack provider starting");
            let provider = Arc::new(Provider::new());
            rpc::serve(provider, tokio::io::stdin(), tokio::io::stdout()).await
        }
    }
}
