mod api;

use clap::{Parser, Subcommand};
use std::sync::Arc;
use wagate_core::config;
use wagate_session::SessionManager;

#[derive(Parser)]
#[command(
    name = "wagate",
    version,
    about = "wagate — multi-number WhatsApp HTTP gateway"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to config file.
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway and serve the HTTP API.
    Serve,
    /// Print the effective configuration and exit.
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load(&cli.config)?;

    // RUST_LOG wins; the config's log_level is the fallback.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cfg.gateway.log_level)),
        )
        .init();

    if !std::path::Path::new(&cli.config).exists() {
        tracing::info!("config file not found at {}, using defaults", cli.config);
    }

    match cli.command {
        Commands::Serve => {
            let manager = Arc::new(SessionManager::new(cfg.clone()));
            api::serve(&cfg.api.host, cfg.api.port, &cfg.api.api_key, manager).await?;
        }
        Commands::Status => {
            println!("wagate — Status\n");
            println!("Config: {}", cli.config);
            println!("Data dir: {}", config::shellexpand(&cfg.gateway.data_dir));
            println!("API: {}:{}", cfg.api.host, cfg.api.port);
            println!(
                "API auth: {}",
                if cfg.api.api_key.is_empty() {
                    "disabled"
                } else {
                    "bearer token"
                }
            );
            println!("Device name: {}", cfg.whatsapp.device_name);
            println!(
                "Allowed senders: {}",
                if cfg.whatsapp.allowed_numbers.is_empty() {
                    "any".to_string()
                } else {
                    cfg.whatsapp.allowed_numbers.join(", ")
                }
            );
        }
    }

    Ok(())
}
