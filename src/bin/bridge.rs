use std::path::Path;
use std::sync::Arc;

use clap::{App, Arg};
use tokio::sync::mpsc;

use portbridge::config;
use portbridge::manager::ChannelManager;
use portbridge::store::ConfigStore;
use portbridge::supervisor::Supervisor;
use portbridge::Result;

// RUST_LOG=debug bridge --db bridge.db
// bridge --update channels.json

#[tokio::main]
async fn main() {
    env_logger::init();

    let matches = App::new("bridge")
        .version("0.1.0")
        .about("Protocol-agnostic byte stream bridge over TCP, UDP and serial")
        .arg(
            Arg::with_name("db")
                .takes_value(true)
                .long("db")
                .default_value("bridge.db")
                .help("Path of the channel database"),
        )
        .arg(
            Arg::with_name("update")
                .takes_value(true)
                .long("update")
                .value_name("CONFIG_FILE")
                .help("Replace the channel table from a JSON/YAML file and exit"),
        )
        .get_matches();

    let db_path = matches.value_of("db").unwrap_or("bridge.db");

    if let Some(file) = matches.value_of("update") {
        match run_update(db_path, file) {
            Ok(()) => std::process::exit(0),
            Err(err) => {
                log::error!("update from {file} failed: {err}");
                std::process::exit(1);
            }
        }
    }

    if let Err(err) = run_daemon(db_path).await {
        log::error!("fatal: {err}");
        std::process::exit(1);
    }
}

fn run_update(db_path: &str, file: &str) -> Result<()> {
    let channels = config::parse_file(Path::new(file))?;
    let store = ConfigStore::open(db_path)?;
    store.replace_channels(&channels)?;
    println!("channel table updated from {file} ({} channels)", channels.len());
    Ok(())
}

async fn run_daemon(db_path: &str) -> Result<()> {
    let store = ConfigStore::open(db_path)?;
    let manager = Arc::new(ChannelManager::with_default_pool());
    let supervisor = Supervisor::new(store, Arc::clone(&manager));

    let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
    tokio::spawn(wait_for_signal(shutdown_tx));

    log::info!("bridge started, channel database at {db_path}");
    supervisor.run(shutdown_rx).await;
    manager.worker_pool().shutdown().await;
    log::info!("bridge stopped");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal(shutdown_tx: mpsc::Sender<()>) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(err) => {
            log::error!("SIGTERM handler setup failed: {err}");
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => log::warn!("received SIGINT, shutting down"),
        _ = term.recv() => log::warn!("received SIGTERM, shutting down"),
    }
    let _ = shutdown_tx.send(()).await;
}

#[cfg(not(unix))]
async fn wait_for_signal(shutdown_tx: mpsc::Sender<()>) {
    if tokio::signal::ctrl_c().await.is_ok() {
        log::warn!("received Ctrl-C, shutting down");
    }
    let _ = shutdown_tx.send(()).await;
}
