mod app;
mod bridge;
mod dispatch;
mod event;
mod geometry;
mod ingest;
mod instance;
mod paths;
mod session;
mod settings;
mod shell;
mod shortcuts;
mod store;
mod surface;
mod updater;
mod window_state;

#[cfg(test)]
mod test_support;

use std::sync::Arc;
use std::time::Duration;

use tokio::io::BufReader;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app::{AppContext, AppOptions, Services};
use crate::dispatch::Flow;
use crate::event::AppEvent;
use crate::ingest::{LiveSession, SignalParser};
use crate::instance::Acquire;
use crate::settings::SettingsStore;
use crate::shell::SystemShell;
use crate::updater::OfflineUpdateChecker;

/// Capacity of the record queue between the bridge and the ingestion session.
const LINE_QUEUE_CAPACITY: usize = 1024;
const OUTPUT_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() {
    // Stdout carries the surface bridge, so logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    // ── App data directory ────────────────────────────────────────────────────
    let app_dir = paths::app_data_dir();
    if let Err(e) = std::fs::create_dir_all(&app_dir) {
        error!("Failed to create app data directory {}: {e}", app_dir.display());
        std::process::exit(1);
    }

    let (event_tx, mut event_rx) = mpsc::channel::<AppEvent>(32);

    // ── Single instance ───────────────────────────────────────────────────────
    let _instance = match instance::acquire(instance::APP_LOCK_KEY, event_tx.clone()).await {
        Ok(Acquire::Held(guard)) => Some(guard),
        Ok(Acquire::Denied) => {
            info!("[instance] Another instance is already running; exiting");
            return;
        }
        Err(e) => {
            warn!("[instance] {e}; running without the single-instance guard");
            None
        }
    };

    // ── Settings ──────────────────────────────────────────────────────────────
    let store = SettingsStore::new(paths::settings_file_path());
    let settings = store.load();
    tokio::spawn(settings::watch_settings(store.path().to_path_buf(), event_tx.clone()));

    // ── Ingestion session ─────────────────────────────────────────────────────
    let (line_tx, line_rx) = mpsc::channel::<String>(LINE_QUEUE_CAPACITY);
    let log_dir = paths::log_dir(settings.general.custom_log_path.as_deref());
    let session_log = match ingest::open_session_log(&log_dir) {
        Ok((path, writer)) => {
            info!("[ingest] Writing session log to {}", path.display());
            Some(writer)
        }
        Err(e) => {
            warn!("[ingest] Session log disabled: {e:#}");
            None
        }
    };
    let session = Arc::new(LiveSession::start(
        SignalParser::default(),
        line_rx,
        session_log,
        event_tx.clone(),
    ));

    // ── Surface bridge ────────────────────────────────────────────────────────
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let writer = tokio::spawn(bridge::write_outbound(outbound_rx, tokio::io::stdout()));
    tokio::spawn(bridge::read_inbound(
        BufReader::new(tokio::io::stdin()),
        event_tx.clone(),
        line_tx,
    ));

    // Graceful shutdown on Ctrl+C.
    {
        let tx = event_tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = tx.send(AppEvent::Shutdown).await;
            }
        });
    }

    let bypass_update_check = std::env::var_os("DEBUGGING").is_some()
        || std::env::args().any(|arg| arg == "--skip-update-check");

    let mut ctx = AppContext::new(
        settings,
        AppOptions {
            store,
            window_state_path: paths::window_state_file_path(),
            bypass_update_check,
            enable_shortcuts: true,
        },
        Services {
            session: session.clone(),
            updater: Box::new(OfflineUpdateChecker::new(event_tx.clone())),
            shell: Arc::new(SystemShell),
        },
        outbound_tx,
        event_tx.clone(),
    );

    info!("loa-details v{} started", env!("CARGO_PKG_VERSION"));
    let _ = event_tx.send(AppEvent::Ready).await;

    // ── Event loop ────────────────────────────────────────────────────────────
    while let Some(event) = event_rx.recv().await {
        if ctx.handle_event(event) == Flow::Quit {
            break;
        }
    }

    ctx.stop_shortcuts();
    session.stop().await;
    // Closing every surface sender lets the writer flush what is queued.
    drop(ctx);
    let _ = tokio::time::timeout(OUTPUT_FLUSH_TIMEOUT, writer).await;
    // The stdin reader sits on a blocking thread that would keep the runtime alive.
    std::process::exit(0);
}
