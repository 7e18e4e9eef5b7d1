use anyhow::Result;
use clap::{Parser, Subcommand};
use gateway_core::config::{self, AppConfig};
use gateway_core::OpenAiAgentFactory;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "sales-gateway",
    about = "HTTP chat gateway serving one sales agent per conversation",
    version,
    author
)]
struct Cli {
    /// Path to config file (default: ~/.config/sales-gateway/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server (default)
    Serve {
        /// Bind host
        #[arg(long)]
        host: Option<String>,
        /// Bind port
        #[arg(long)]
        port: Option<u16>,
    },

    /// Show or manage configuration
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Initialize default configuration file
    Init,
    /// Print config file path
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Production reads settings from the real environment only.
    if !config::is_production(|key| std::env::var(key).ok()) {
        let _ = dotenvy::dotenv();
    }

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "sales_gateway=info,gateway_server=info,gateway_core=info,warn".into()),
        )
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load()?,
    };
    config.apply_env();

    match cli.command {
        Some(Commands::Config { action }) => handle_config_command(action, &config)?,
        Some(Commands::Serve { host, port }) => {
            if let Some(h) = host {
                config.server.host = h;
            }
            if let Some(p) = port {
                config.server.port = p;
            }
            run_server(config).await?;
        }
        None => run_server(config).await?,
    }

    Ok(())
}

async fn run_server(config: AppConfig) -> Result<()> {
    tracing::info!(
        "Agent defaults: model {}, setup {}, tools {}",
        config.agent.model,
        config.agent.config_path.display(),
        config.agent.use_tools,
    );
    let factory = Arc::new(OpenAiAgentFactory::new(config.provider.clone()));
    gateway_server::serve(config, factory).await
}

fn handle_config_command(action: Option<ConfigAction>, config: &AppConfig) -> Result<()> {
    match action {
        Some(ConfigAction::Show) | None => {
            // Never print secrets.
            let mut shown = config.clone();
            shown.server.auth_key = shown.server.auth_key.map(|_| "***".into());
            shown.provider.api_key = shown.provider.api_key.map(|_| "***".into());
            println!("{}", toml::to_string_pretty(&shown)?);
        }
        Some(ConfigAction::Init) => {
            let path = AppConfig::default_path();
            if path.exists() {
                println!("Config already exists at: {}", path.display());
            } else {
                AppConfig::default().save()?;
                println!("Created default config at: {}", path.display());
            }
        }
        Some(ConfigAction::Path) => {
            println!("{}", AppConfig::default_path().display());
        }
    }
    Ok(())
}
