use std::process;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use gridlink::cli::{Cli, Commands, GatewayArgs, NodeArgs, RouterArgs};
use gridlink::gateway::{create_gateway_router, GatewayState};
use gridlink::server::{serve, shutdown_signal, NodeService, RouterService};

#[tokio::main]
async fn main() {
    let mut cli = Cli::parse();

    // Load .env file if specified, then re-read env-backed options
    if let Some(env_file) = cli.env_file.clone() {
        if let Err(e) = dotenvy::from_path(&env_file) {
            eprintln!("Failed to load env file {}: {}", env_file.display(), e);
            process::exit(1);
        }
        cli = Cli::parse();
    }

    // Initialize logging
    let filter = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    let result = match cli.command {
        Commands::Node(args) => run_node(args).await,
        Commands::Router(args) => run_router(args).await,
        Commands::Gateway(args) => run_gateway(args).await,
    };

    if let Err(e) = result {
        error!("{:#}", e);
        process::exit(1);
    }
}

async fn bind(addr: &str) -> anyhow::Result<tokio::net::TcpListener> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Server listening on {}", addr);
    Ok(listener)
}

async fn run_node(args: NodeArgs) -> anyhow::Result<()> {
    let config = args.to_config()?;
    let addr = args.addr();

    let service = NodeService::start(&config);
    let listener = bind(&addr).await?;

    info!("Endpoints:");
    info!("  POST /charge  - Admit a charging session");
    info!("  GET  /metrics - Exposition-format gauges");
    info!("  GET  /status  - Node status and active sessions");
    info!("  GET  /health  - Health check");

    let served = serve(listener, service.app.clone(), shutdown_signal()).await;
    service.shutdown().await;
    served.context("Server error")
}

async fn run_router(args: RouterArgs) -> anyhow::Result<()> {
    let config = args.to_config()?;
    let addr = args.addr();

    let service = RouterService::start(&config).context("Failed to create HTTP client")?;
    let listener = bind(&addr).await?;

    info!("Endpoints:");
    info!("  POST /route_charge - Route to the least-loaded node");
    info!("  GET  /metrics      - Exposition-format gauges");
    info!("  GET  /status       - Registry snapshot");
    info!("  GET  /health       - Health check");

    let served = serve(listener, service.app.clone(), shutdown_signal()).await;
    service.shutdown().await;
    served.context("Server error")
}

async fn run_gateway(args: GatewayArgs) -> anyhow::Result<()> {
    let config = args.to_config();
    let addr = args.addr();

    info!("Starting gateway, forwarding to {}", config.router_url);
    let state = GatewayState::new(config).context("Failed to create HTTP client")?;
    let listener = bind(&addr).await?;

    serve(listener, create_gateway_router(state), shutdown_signal())
        .await
        .context("Server error")
}
