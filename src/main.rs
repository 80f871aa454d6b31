//! Portal gateway - auth-aware HTTP proxy for the science portal.
//!
//! Usage:
//!   portal-gateway serve [--port 8080]   # Start HTTP server
//!   portal-gateway check-config          # Resolve and print configuration

use clap::{Parser, Subcommand};
use portal_gateway::config::{GatewayConfig, ProcessEnv};
use portal_gateway::{run_server, AppState};
use std::process::exit;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "portal-gateway")]
#[command(about = "Science portal gateway for session and storage services")]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Port to listen on
        #[arg(long, default_value = "8080")]
        port: u16,
    },
    /// Resolve configuration from the environment and print it
    CheckConfig,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let config = match GatewayConfig::from_env(&ProcessEnv) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            exit(1);
        }
    };

    match args.command {
        Commands::CheckConfig => {
            println!("auth mode:  {}", config.auth_mode);
            println!("login api:  {}", config.upstreams.login);
            println!("skaha api:  {}", config.upstreams.skaha);
            println!("storage api: {}", config.upstreams.storage);
            if let Some(oidc) = &config.oidc {
                println!("oidc issuer: {}", oidc.issuer);
                println!("oidc client: {}", oidc.client_id);
                if oidc.placeholder {
                    println!("oidc config: PLACEHOLDER (not servable)");
                }
            }
            if let Err(e) = config.ensure_servable() {
                eprintln!("Error: {}", e);
                exit(1);
            }
        }
        Commands::Serve { port } => {
            let mode = config.auth_mode;
            let state = match AppState::new(config) {
                Ok(state) => state,
                Err(e) => {
                    eprintln!("Error: {}", e);
                    exit(1);
                }
            };
            info!(auth_mode = %mode, "configuration loaded");
            if let Err(e) = run_server(port, state).await {
                error!("server error: {}", e);
                exit(1);
            }
        }
    }
}
