mod app;
mod components;
mod theme;

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};

use tabcap_engine::core::{EngineBroadcast, EngineCore, EngineEvent};
use tabcap_engine::stream::SyntheticBroker;
use tabcap_proto::config::Config;
use tabcap_proto::prefs::PrefsStore;
use tabcap_proto::protocol::Command;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let data_dir = tabcap_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;

    let log_path = data_dir.join("tui.log");
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    // RUST_LOG overrides; terminal output would fight the UI, so logs go to
    // a file only.
    let log_filter =
        std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tabcap_tui=debug".to_string());
    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_env_filter(log_filter.as_str())
        .with_ansi(false)
        .init();
    eprintln!("tabcap log: {}", log_path.display());
    tracing::info!("tabcap starting…");

    let config = Config::load().unwrap_or_default();

    // ── Channels: engine broadcasts out, events in ───────────────────────────
    let (broadcast_tx, broadcast_rx) = broadcast::channel::<EngineBroadcast>(1024);
    let (event_tx, event_rx) = mpsc::channel::<EngineEvent>(1024);

    // ── Embedded engine, no sockets ──────────────────────────────────────────
    let prefs = PrefsStore::new(config.daemon.prefs_file.clone());
    let broker = Arc::new(SyntheticBroker);
    let engine = EngineCore::new(config, broker, prefs, broadcast_tx.clone(), event_tx.clone());

    // Queue a state push so the session list fills before the first keypress.
    let _ = event_tx
        .send(EngineEvent::ClientCommand(Command::GetState))
        .await;

    let engine_task = tokio::spawn(engine.run(event_rx));

    let app = app::App::new(event_tx);
    app.run(broadcast_rx).await?;

    // App sends Shutdown on quit; wait for the engine to stop its sessions.
    let _ = engine_task.await;

    Ok(())
}
