//! # Vecmesh CLI
//!
//! Bootstrap for one cluster node.
//!
//! ```bash
//! # Run a node (RPC server + maintenance loop + HTTP API)
//! vecmesh serve --config vecmesh.toml
//!
//! # Show the effective configuration
//! vecmesh print-config --config vecmesh.toml
//! ```

mod api;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use tracing::{error, info};
use vecmesh_core::Addr;
use vecmesh_node::arbiter::StaticArbiter;
use vecmesh_node::{event_loop, logging, NodeConfig, NodeServer};

#[derive(Parser)]
#[command(name = "vecmesh", about = "Distributed approximate-nearest-neighbor vector store")]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Run a cluster node: RPC server, maintenance loop and HTTP API.
    Serve {
        /// Path to a TOML configuration file.
        #[arg(long)]
        config: Option<String>,
        /// Emit JSON logs (for aggregators) instead of compact text.
        #[arg(long)]
        json_logs: bool,
    },
    /// Print the effective configuration (defaults + file + env) as TOML.
    PrintConfig {
        #[arg(long)]
        config: Option<String>,
    },
}

/// Resolves a structural address to a bindable socket address.
async fn resolve(addr: &Addr) -> anyhow::Result<SocketAddr> {
    tokio::net::lookup_host(addr.to_string())
        .await
        .with_context(|| format!("resolving {addr}"))?
        .next()
        .ok_or_else(|| anyhow!("no socket address for {addr}"))
}

async fn serve(config_path: Option<String>, json_logs: bool) -> anyhow::Result<()> {
    if json_logs {
        logging::init_json();
    } else {
        logging::init();
    }

    let config = NodeConfig::load(config_path.as_deref())?;
    let factory = config.manager_factory()?;

    // RPC node.
    let rpc_bind = resolve(&config.local_rpc_addr).await?;
    let server = NodeServer::new(config.local_rpc_addr.clone(), factory);
    info!(addr = %config.local_rpc_addr, "rpc node listening");
    let rpc_task = tokio::spawn(server.serve(rpc_bind));

    // Maintenance loop, gated by the cluster arbiter.
    let arbiter = Arc::new(StaticArbiter::new(config.all_rpc_addrs.clone()));
    let loop_handle = event_loop::start(config.event_loop_config(), arbiter);

    // User-facing API; blocks until the process exits.
    let api_bind = resolve(&config.local_api_addr).await?;
    let state = api::ApiState {
        rpc_addrs: config.all_rpc_addrs.clone(),
        metric: config.metric,
    };
    let result = api::serve(state, api_bind).await;

    loop_handle.stop();
    rpc_task.abort();

    result.map_err(Into::into)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.cmd {
        Cmd::Serve { config, json_logs } => {
            if let Err(err) = serve(config, json_logs).await {
                error!(error = %err, "node exited with error");
                return Err(err);
            }
            Ok(())
        }
        Cmd::PrintConfig { config } => {
            let config = NodeConfig::load(config.as_deref())?;
            println!("{}", config.to_toml()?);
            Ok(())
        }
    }
}
