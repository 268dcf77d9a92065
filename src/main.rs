use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use instaiq::actions::BackendActions;
use instaiq::backend::{self, BackendConfig};
use instaiq::chat;
use instaiq::constants;
use instaiq::web_server::{self, WebConfig};

// Define the command-line interface structure using clap
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Serve the landing page, the chat UI and the streaming completion endpoint.
    Start {
        #[arg(long, default_value_t = 3000, help = "Port for the web server.")]
        port: u16,
        #[arg(
            long,
            env = "INSTAIQ_BACKEND_URL",
            default_value = constants::DEFAULT_BACKEND_URL,
            help = "Base URL of the data backend."
        )]
        backend_url: String,
    },
    /// Serve the data backend (/process_data and /process_query).
    Backend {
        #[arg(long, default_value_t = 5000, help = "Port for the data backend.")]
        port: u16,
    },
    /// Chat about a profile from the terminal.
    Chat {
        #[arg(
            long,
            env = "INSTAIQ_BACKEND_URL",
            default_value = constants::DEFAULT_BACKEND_URL,
            help = "Base URL of the data backend."
        )]
        backend_url: String,
    },
}

async fn run_until_ctrl_c<F>(name: &str, server: F) -> Result<()>
where
    F: std::future::Future<Output = Result<()>> + Send + 'static,
{
    let mut handle = tokio::spawn(server);

    // None means Ctrl-C arrived first.
    let finished = tokio::select! {
        _ = tokio::signal::ctrl_c() => None,
        res = &mut handle => Some(res),
    };

    match finished {
        None => {
            info!("Ctrl-C received, shutting down {}...", name);
            handle.abort();
        }
        Some(Ok(Ok(()))) => info!("{} stopped.", name),
        Some(Ok(Err(e))) => {
            error!("{} failed: {:?}", name, e);
            return Err(e);
        }
        Some(Err(e)) if e.is_panic() => error!("{} task panicked: {:?}", name, e),
        Some(Err(e)) => error!("{} task failed: {:?}", name, e),
    }

    info!("Shutdown complete.");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (for environment variables like API keys)
    dotenvy::dotenv().ok();

    // Reads log level from RUST_LOG environment variable (e.g., RUST_LOG=info,instaiq=debug)
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    info!("InstaIQ starting with command: {:?}", cli.command);

    match cli.command {
        Commands::Start { port, backend_url } => {
            info!("Starting web server on port {}...", port);
            let config = WebConfig::from_env(backend_url);
            run_until_ctrl_c("Web server", web_server::start_web_server(port, config)).await?;
        }
        Commands::Backend { port } => {
            info!("Starting data backend on port {}...", port);
            let config = BackendConfig::from_env();
            run_until_ctrl_c("Data backend", backend::start_backend(port, config)).await?;
        }
        Commands::Chat { backend_url } => {
            let actions = BackendActions::new(backend_url);
            let stdin = std::io::stdin();
            chat::run_chat(&actions, stdin.lock(), std::io::stdout())
                .await
                .context("Chat session failed")?;
        }
    }

    Ok(())
}
