//! Forward HTTP/HTTPS proxy.
//!
//! # Architecture Overview
//!
//! ```text
//!     Browser ──▶ net::listener ──▶ proxy::handler ──▶ proxy::router
//!                                                         │
//!                    ┌────────────────────────────────────┼──────────────────┐
//!                    ▼                                    ▼                  ▼
//!              proxy::tunnel                       proxy::regular      proxy::local
//!             (CONNECT relay)            (policy, pooled origin I/O)  (status page,
//!                    │                                    │             /res/ files)
//!                    ▼                                    ▼
//!              origin / forward proxy            origin / forward proxy
//!
//!     Cross-cutting: config, rules, policy, observability, lifecycle
//! ```

use std::path::PathBuf;

use clap::Parser;

use forward_proxy::config::{load_config, validate_config, ProxyConfig};
use forward_proxy::lifecycle::signals::shutdown_on_ctrl_c;
use forward_proxy::lifecycle::Shutdown;
use forward_proxy::observability::{logging, metrics};
use forward_proxy::ProxyServer;

#[derive(Parser)]
#[command(name = "forward-proxy")]
#[command(about = "Forward HTTP/HTTPS proxy with cookie and block rules", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overrides `listener.bind_address`
    #[arg(short, long)]
    bind: Option<String>,

    /// Forwarding proxy `host:port`, overrides `forward.address`
    #[arg(short, long)]
    forward: Option<String>,

    /// Rule list directory, overrides `rules.directory`
    #[arg(short, long)]
    rules: Option<PathBuf>,
}

impl Cli {
    fn apply(self, config: &mut ProxyConfig) {
        if let Some(bind) = self.bind {
            config.listener.bind_address = bind;
        }
        if let Some(forward) = self.forward {
            config.forward.address = Some(forward);
        }
        if let Some(rules) = self.rules {
            config.rules.directory = Some(rules);
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut cli = Cli::parse();

    let mut config = match cli.config.take() {
        Some(path) => load_config(&path)?,
        None => ProxyConfig::default(),
    };
    cli.apply(&mut config);
    if let Err(errors) = validate_config(&config) {
        for error in &errors {
            eprintln!("invalid configuration: {error}");
        }
        return Err(format!("{} configuration error(s)", errors.len()).into());
    }

    logging::init(&config.observability.log_filter, config.observability.log_format);
    tracing::info!("forward-proxy v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        forward = ?config.forward.address,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Shutdown::new();
    tokio::spawn(shutdown_on_ctrl_c(shutdown.clone()));

    let server = ProxyServer::bind(config).await?;
    server.run(shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
