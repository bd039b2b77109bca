//! The gazette server binary: loads configuration, opens the broker, starts
//! the enabled front-ends, and shuts everything down on ctrl-c.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::broadcast;
use tracing::{error, info};

use gazette::broker::Broker;
use gazette::config::ServerConfig;
use gazette::error::Result;
use gazette::http::{self, HttpState};
use gazette::server::BrokerServer;
use gazette::subscription::SubscriptionManager;
use gazette::telemetry::{init_logging, LogFormat};
use gazette::ws::{self, WsState};

#[derive(Debug, Parser)]
#[command(name = "gazette", version, about = "Persistent topic-partitioned append-only log")]
struct Args {
    /// Override the data directory
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Override the binary protocol port (and enable the listener)
    #[arg(long)]
    tcp_port: Option<u16>,

    /// Override the HTTP port (and enable the listener)
    #[arg(long)]
    http_port: Option<u16>,

    /// Override the WebSocket port (and enable the listener)
    #[arg(long)]
    ws_port: Option<u16>,
}

fn apply_overrides(config: &mut ServerConfig, args: &Args) {
    if let Some(data_dir) = &args.data_dir {
        config.data_dir = data_dir.clone();
    }
    if let Some(port) = args.tcp_port {
        config.tcp.port = port;
        config.tcp.enabled = true;
    }
    if let Some(port) = args.http_port {
        config.http.port = port;
        config.http.enabled = true;
    }
    if let Some(port) = args.ws_port {
        config.websocket.port = port;
        config.websocket.enabled = true;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    if let Err(e) = init_logging(LogFormat::from_env()) {
        eprintln!("failed to initialize logging: {e}");
    }

    let mut config = ServerConfig::from_env()?;
    apply_overrides(&mut config, &args);

    info!(
        data_dir = %config.data_dir.display(),
        tcp = config.tcp.enabled,
        http = config.http.enabled,
        websocket = config.websocket.enabled,
        "starting gazette"
    );

    let broker = Arc::new(Broker::open(&config.data_dir).await?);
    let subscriptions = Arc::new(SubscriptionManager::new());
    broker.add_listener(subscriptions.clone());

    let (shutdown_tx, _) = broadcast::channel(1);
    let mut tasks = Vec::new();

    let tcp_server = if config.tcp.enabled {
        let server = Arc::new(BrokerServer::new(&config.tcp_addr(), broker.clone()).await?);
        let runner = server.clone();
        tasks.push(tokio::spawn(async move { runner.run().await }));
        Some(server)
    } else {
        None
    };

    if config.http.enabled {
        let state = HttpState {
            broker: broker.clone(),
            subscriptions: subscriptions.clone(),
        };
        let addr = config.http_addr();
        let shutdown = shutdown_tx.subscribe();
        tasks.push(tokio::spawn(async move {
            http::serve(&addr, state, shutdown).await
        }));
    }

    if config.websocket.enabled {
        let state = WsState {
            broker: broker.clone(),
            subscriptions: subscriptions.clone(),
        };
        let addr = config.websocket_addr();
        let shutdown = shutdown_tx.subscribe();
        tasks.push(tokio::spawn(async move {
            ws::serve(&addr, state, shutdown).await
        }));
    }

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    let _ = shutdown_tx.send(());
    if let Some(server) = &tcp_server {
        server.shutdown_and_wait(Duration::from_secs(5)).await;
    }
    for task in tasks {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "front-end exited with error"),
            Err(e) => error!(error = %e, "front-end task panicked"),
        }
    }

    broker.flush().await?;
    info!("gazette shut down cleanly");
    Ok(())
}
