/// The live ingestion session: one long-running task fed by decoded log lines.
///
/// A `LiveSession` is started once per process. It owns:
///   - the line-processing task, which writes every line to the session log
///     and feeds the parser unless paused
///   - a control channel, drained before each line, so resets, flag updates
///     and pause changes always land between two records
///
/// The line parser is pluggable; it reports game-state signals that the
/// control loop turns into session commands.
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::event::AppEvent;
use crate::session::{FunctionalityFlags, IngestionSession};

/// Game-state signals a parser can raise while reading a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameSignal {
    PhaseTransition,
    ZoneChange,
}

/// Consumes log lines and accumulates session statistics.
pub trait LineParser: Send + 'static {
    fn parse_line(&mut self, line: &str, flags: &FunctionalityFlags) -> Option<GameSignal>;
    fn reset(&mut self);
}

/// Parser that tracks only what session control needs: record counts and the
/// zone-change (`1|`) and phase-transition (`2|`) lines of the legacy log format.
#[derive(Debug, Default)]
pub struct SignalParser {
    records: u64,
}

impl SignalParser {
    #[cfg(test)]
    pub fn records(&self) -> u64 {
        self.records
    }
}

impl LineParser for SignalParser {
    fn parse_line(&mut self, line: &str, _flags: &FunctionalityFlags) -> Option<GameSignal> {
        self.records += 1;
        match line.split('|').next()? {
            "1" => Some(GameSignal::ZoneChange),
            "2" => Some(GameSignal::PhaseTransition),
            _ => None,
        }
    }

    fn reset(&mut self) {
        debug!("[ingest] Parser reset after {} records", self.records);
        self.records = 0;
    }
}

#[derive(Debug)]
enum Control {
    Reset,
    Flags(FunctionalityFlags),
    Paused(bool),
}

pub struct LiveSession {
    control_tx: mpsc::UnboundedSender<Control>,
    /// Setting this to `true` signals the task to stop.
    stop_tx: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl LiveSession {
    /// Starts the session task. `log` receives a copy of every line.
    pub fn start<P: LineParser>(
        parser: P,
        lines: mpsc::Receiver<String>,
        log: Option<Box<dyn Write + Send>>,
        events: mpsc::Sender<AppEvent>,
    ) -> Self {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(run(parser, lines, control_rx, stop_rx, log, events));
        Self {
            control_tx,
            stop_tx,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Signals the task to stop and waits for it to finish.
    pub async fn stop(&self) {
        let _ = self.stop_tx.send(true);
        let handle = self.handle.lock().ok().and_then(|mut h| h.take());
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    fn control(&self, message: Control) {
        if self.control_tx.send(message).is_err() {
            debug!("[ingest] Session task is gone; control message dropped");
        }
    }
}

impl IngestionSession for LiveSession {
    fn reset(&self) {
        self.control(Control::Reset);
    }

    fn apply_flags(&self, flags: FunctionalityFlags) {
        self.control(Control::Flags(flags));
    }

    fn set_paused(&self, paused: bool) {
        self.control(Control::Paused(paused));
    }
}

async fn run<P: LineParser>(
    mut parser: P,
    mut lines: mpsc::Receiver<String>,
    mut control_rx: mpsc::UnboundedReceiver<Control>,
    mut stop_rx: watch::Receiver<bool>,
    mut log: Option<Box<dyn Write + Send>>,
    events: mpsc::Sender<AppEvent>,
) {
    let mut flags = FunctionalityFlags::default();
    let mut paused = false;

    info!("[ingest] Session started");

    loop {
        tokio::select! {
            // Control first: everything queued before a line applies to it.
            // Queued lines are drained into the log before a stop is honoured.
            biased;
            control = control_rx.recv() => {
                let Some(control) = control else { break };
                match control {
                    Control::Reset => parser.reset(),
                    Control::Flags(f) => flags = f,
                    Control::Paused(p) => paused = p,
                }
            }
            line = lines.recv() => {
                let Some(line) = line else { break };
                if let Some(out) = log.as_mut() {
                    if let Err(e) = writeln!(out, "{line}") {
                        warn!("[ingest] Session log write failed, disabling it: {e}");
                        log = None;
                    }
                }
                if paused {
                    continue;
                }
                match parser.parse_line(&line, &flags) {
                    Some(GameSignal::ZoneChange) if !flags.dont_reset_on_zone_change => {
                        parser.reset();
                    }
                    Some(GameSignal::PhaseTransition) => report_phase_transition(&events),
                    _ => {}
                }
            }
            _ = stop_rx.changed() => break,
        }
    }

    if let Some(mut out) = log {
        let _ = out.flush();
    }
    info!("[ingest] Session stopped");
}

/// Never blocks ingestion on a busy control loop.
fn report_phase_transition(events: &mpsc::Sender<AppEvent>) {
    match events.try_send(AppEvent::PhaseTransition) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => {
            warn!("[ingest] Control loop busy; phase transition dropped");
        }
        Err(TrySendError::Closed(_)) => debug!("[ingest] Control loop gone; phase transition dropped"),
    }
}

// ── Session log file ──────────────────────────────────────────────────────────

/// Returns the current local time formatted as `YYYY-MM-DD-HH-MM-SS`.
fn local_timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%d-%H-%M-%S").to_string()
}

/// Builds `<dir>/LostArk_<timestamp>.log`, creating `dir` if needed.
pub fn session_log_path(dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
    Ok(dir.join(format!("LostArk_{}.log", local_timestamp())))
}

/// Opens a fresh session log in `dir`.
pub fn open_session_log(dir: &Path) -> Result<(PathBuf, Box<dyn Write + Send>)> {
    let path = session_log_path(dir)?;
    let file = std::fs::File::create(&path)
        .with_context(|| format!("Failed to create session log {}", path.display()))?;
    Ok((path, Box::new(std::io::LineWriter::new(file))))
}
