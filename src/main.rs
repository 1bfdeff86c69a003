//! Entry point: parses configuration, starts peer discovery, and serves the
//! HTTP/sync listener until interrupted (spec §6 "Exit conditions").
mod actor;
mod config;
mod dbpool;
mod discovery;
mod error;
mod http;
mod logging;
mod observer;
mod ws;

use std::collections::HashMap;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use actor::Scheduler;
use config::Config;
use dbpool::DatabaseRegistry;
use discovery::providers::{BleProvider, DnsSdProvider};
use discovery::{DiscoveryManager, PeerGroupID, PeerID, Provider};
use http::{AppState, Listener, TaskRegistry};

/// Owns a dedicated multi-threaded runtime instead of `#[tokio::main]`'s
/// default single-threaded-capable one: peersync is the whole process here,
/// and every actor mailbox needs a real worker pool to run on (spec §4.A).
fn main() -> ExitCode {
    let config = Config::parse();
    if let Err(e) = config.validate() {
        eprintln!("configuration error: {e}");
        return ExitCode::FAILURE;
    }

    logging::init();

    let scheduler = match Scheduler::with_owned_runtime() {
        Ok(s) => s,
        Err(e) => {
            eprintln!("failed to start runtime: {e}");
            return ExitCode::FAILURE;
        }
    };
    let timers = scheduler.timers.clone();
    let rt = scheduler.runtime().expect("with_owned_runtime always sets a runtime");

    if let Err(e) = rt.block_on(run(config, timers)) {
        tracing::error!(error = %e, "fatal error");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

async fn run(config: Config, timers: Arc<actor::TimerWheel>) -> anyhow::Result<()> {
    let peer_group_id = PeerGroupID::new(&config.peer_group_id)?;

    let events = DiscoveryManager::event_channel();
    let providers = build_providers(&config, &peer_group_id, events.0.clone()).await?;
    let discovery = DiscoveryManager::new(peer_group_id, PeerID([0; 16]), providers, events, timers.clone());
    discovery.start_browsing().await?;
    if let Some(display_name) = &config.display_name {
        discovery.start_publishing(display_name, config.port, HashMap::new()).await?;
    }

    let registry = Arc::new(DatabaseRegistry::new());
    let tasks = TaskRegistry::new(timers);
    let state = Arc::new(AppState {
        registry,
        tasks,
        allow_create_dbs: config.allow_create_dbs,
        allow_delete_dbs: config.allow_delete_dbs,
    });

    let router = http::handlers::build_router(state.clone());
    let listener = Arc::new(
        Listener::new(router, state)
            .with_ping_interval(std::time::Duration::from_secs(config.heartbeat_secs)),
    );

    let shutdown_signal = listener.clone();
    let serve = {
        let listener = listener.clone();
        let iface = config.interface.clone();
        let port = config.port;
        tokio::spawn(async move { listener.start(&iface, port).await })
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown requested");
            shutdown_signal.shutdown();
        }
        result = serve => {
            result??;
        }
    }

    discovery.stop_browsing().await?;
    discovery.shutdown().await;
    Ok(())
}

/// Instantiates one provider per name in `config.providers` (all registered
/// providers if the list is empty), wired to the manager's shared event channel.
async fn build_providers(
    config: &Config,
    peer_group_id: &PeerGroupID,
    tx: tokio::sync::mpsc::UnboundedSender<discovery::ProviderEvent>,
) -> anyhow::Result<Vec<Arc<dyn Provider>>> {
    let wanted = if config.providers.is_empty() {
        vec!["dnssd".to_string(), "ble".to_string()]
    } else {
        config.providers.clone()
    };

    let mut providers: Vec<Arc<dyn Provider>> = Vec::new();
    for name in wanted {
        match name.as_str() {
            "dnssd" => {
                let provider = DnsSdProvider::new(peer_group_id.as_str(), tx.clone())?;
                providers.push(Arc::new(provider));
            }
            "ble" => {
                let provider = BleProvider::new(peer_group_id.as_str(), tx.clone()).await?;
                providers.push(Arc::new(provider));
            }
            other => {
                tracing::warn!(provider = other, "unknown discovery provider name, skipping");
            }
        }
    }
    Ok(providers)
}
