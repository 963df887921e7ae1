use clap::{Parser, Subcommand};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "chatrelay")]
#[command(about = "ChatRelay: relay Slack mentions to a streaming query backend", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory and a default config file.
    Init {
        /// Config file path (default: CHATRELAY_CONFIG_PATH or ~/.chatrelay/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },

    /// Run the relay: listen for Slack mentions over Socket Mode and stream backend answers back.
    Run {
        /// Config file path (default: CHATRELAY_CONFIG_PATH or ~/.chatrelay/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },

    /// Run the mock streaming backend (POST /v1/chat/stream).
    MockBackend {
        /// Bind address
        #[arg(long, default_value = "127.0.0.1")]
        bind: String,

        /// Port (default: MOCK_BACKEND_PORT or 8091)
        #[arg(long, short)]
        port: Option<u16>,

        /// Delay between frames in milliseconds
        #[arg(long, default_value_t = 500)]
        delay_ms: u64,
    },
}

#[tokio::main]
async fn main() {
    let dotenv_path = chatrelay::config::load_dotenv();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    match dotenv_path {
        Some(path) => log::debug!("loaded environment from {}", path.display()),
        None => log::info!("no .env file found, using system environment variables"),
    }

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("chatrelay {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Init { config }) => {
            if let Err(e) = run_init(config) {
                log::error!("init failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Run { config }) => {
            if let Err(e) = run_relay(config).await {
                log::error!("relay failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::MockBackend {
            bind,
            port,
            delay_ms,
        }) => {
            let port = port.unwrap_or_else(chatrelay::backend::mock::resolve_port);
            if let Err(e) = chatrelay::backend::mock::run_mock_backend(
                &bind,
                port,
                Duration::from_millis(delay_ms),
            )
            .await
            {
                log::error!("mock backend failed: {:#}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

fn run_init(config_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(chatrelay::config::default_config_path);
    let dir = chatrelay::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

async fn run_relay(config_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let (config, path) = chatrelay::config::load_config(config_path)?;
    log::info!("using config {}", path.display());
    let endpoint = chatrelay::config::resolve_otlp_endpoint(&config);
    let telemetry =
        chatrelay::telemetry::init_tracing(&config.telemetry.service_name, endpoint.as_deref())?;
    let result = chatrelay::gateway::run_relay(config).await;
    if let Err(e) = telemetry.shutdown() {
        log::warn!("tracing shutdown failed: {}", e);
    }
    result
}
