mod tenant_commands;

use std::path::PathBuf;

use {
    clap::{Parser, Subcommand},
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "wagate", about = "wagate: multi-tenant chat protocol gateway")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Directory holding wagate.toml / .yaml / .json.
    #[arg(long, global = true, env = "WAGATE_CONFIG_DIR")]
    config_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server.
    Serve {
        /// Override `server.bind`.
        #[arg(long)]
        bind: Option<String>,
        /// Override `server.port`.
        #[arg(long)]
        port: Option<u16>,
    },
    /// Tenant administration against the local database.
    Tenants {
        #[command(subcommand)]
        action: tenant_commands::TenantAction,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    if cli.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    if let Some(dir) = &cli.config_dir {
        wagate_config::set_config_dir(dir.clone());
    }
    let mut config = wagate_config::discover_and_load();

    info!(version = env!("CARGO_PKG_VERSION"), "wagate starting");

    match cli.command {
        Commands::Serve { bind, port } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            wagate_gateway::server::start_gateway(config).await
        },
        Commands::Tenants { action } => tenant_commands::handle_tenants(action, &config).await,
    }
}
