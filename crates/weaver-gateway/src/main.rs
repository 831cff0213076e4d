//! Weaver — configurable-agent runs with streamed results

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use weaver_gateway::{start_server, ServerConfig};

#[derive(Parser)]
#[command(name = "weaver", about = "Weaver agent service — versioned agents, streamed runs")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway server
    Serve {
        #[arg(short, long, default_value = "8321")]
        port: u16,
        #[arg(short, long, default_value = "127.0.0.1")]
        bind: String,
        /// Model used when neither the request nor the version names one
        #[arg(short, long)]
        model: Option<String>,
    },
    /// Show version
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Serve { port, bind, model }) => {
            tracing_subscriber::registry()
                .with(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| "weaver=info,tower_http=info".into()),
                )
                .with(tracing_subscriber::fmt::layer())
                .init();

            let config = ServerConfig {
                port,
                bind,
                anthropic_api_key: std::env::var("ANTHROPIC_API_KEY").ok(),
                default_model: model,
            };
            start_server(config).await?;
        }

        Some(Commands::Version) | None => {
            println!("weaver v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
