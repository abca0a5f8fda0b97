/// Recording fakes for the external collaborators, shared by unit tests.
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use tokio::sync::mpsc;

use crate::app::{AppContext, AppOptions, Services};
use crate::event::AppEvent;
use crate::session::{FunctionalityFlags, IngestionSession};
use crate::settings::{Settings, SettingsStore};
use crate::shell::{self, Shell};
use crate::surface::Outbound;
use crate::updater::UpdateChecker;

#[derive(Default)]
pub struct RecordingSession {
    resets: AtomicUsize,
    flags: Mutex<Vec<FunctionalityFlags>>,
    paused: AtomicBool,
}

impl RecordingSession {
    pub fn resets(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }

    /// Every flag set pushed so far, oldest first.
    pub fn flags(&self) -> Vec<FunctionalityFlags> {
        self.flags.lock().unwrap().clone()
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }
}

impl IngestionSession for RecordingSession {
    fn reset(&self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
    }

    fn apply_flags(&self, flags: FunctionalityFlags) {
        self.flags.lock().unwrap().push(flags);
    }

    fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct UpdaterCalls {
    pub checks: usize,
    /// `(silent, force_run_after)` per install.
    pub installs: Vec<(bool, bool)>,
}

/// Cloneable so the test keeps a handle after the context takes the box.
#[derive(Clone, Default)]
pub struct RecordingUpdater {
    calls: Arc<Mutex<UpdaterCalls>>,
}

impl RecordingUpdater {
    pub fn calls(&self) -> UpdaterCalls {
        self.calls.lock().unwrap().clone()
    }
}

impl UpdateChecker for RecordingUpdater {
    fn check_for_updates(&mut self) {
        self.calls.lock().unwrap().checks += 1;
    }

    fn quit_and_install(&mut self, silent: bool, force_run_after: bool) {
        self.calls
            .lock()
            .unwrap()
            .installs
            .push((silent, force_run_after));
    }
}

#[derive(Default)]
pub struct FakeShell {
    pub opened_paths: Mutex<Vec<PathBuf>>,
    pub opened_urls: Mutex<Vec<String>>,
    /// What the folder picker returns; `None` simulates a cancel.
    pub picked: Mutex<Option<PathBuf>>,
}

impl Shell for FakeShell {
    fn open_path(&self, path: &Path) -> Result<()> {
        self.opened_paths.lock().unwrap().push(path.to_path_buf());
        Ok(())
    }

    fn open_url(&self, url: &str) -> Result<()> {
        let url = shell::validate_link(url)?;
        self.opened_urls.lock().unwrap().push(url.to_string());
        Ok(())
    }

    fn pick_directory(&self) -> Result<Option<PathBuf>> {
        Ok(self.picked.lock().unwrap().clone())
    }
}

/// An [`AppContext`] wired to fakes, with its channels and data dir in reach.
pub struct TestApp {
    pub ctx: AppContext,
    pub outbound: mpsc::UnboundedReceiver<Outbound>,
    pub events: mpsc::Receiver<AppEvent>,
    pub session: Arc<RecordingSession>,
    pub updater: RecordingUpdater,
    pub shell: Arc<FakeShell>,
    pub dir: tempfile::TempDir,
}

impl TestApp {
    /// Fresh context over an empty data dir. Shortcuts are never installed.
    pub fn new(bypass_update_check: bool) -> Self {
        let dir = tempfile::tempdir().unwrap();
        Self::in_dir(dir, bypass_update_check)
    }

    /// Context over `dir`, which may already hold persisted state.
    pub fn in_dir(dir: tempfile::TempDir, bypass_update_check: bool) -> Self {
        let store = SettingsStore::new(dir.path().join("settings.toml"));
        let settings: Settings = store.load();
        let session = Arc::new(RecordingSession::default());
        let updater = RecordingUpdater::default();
        let shell = Arc::new(FakeShell::default());
        let (outbound_tx, outbound) = mpsc::unbounded_channel();
        let (events_tx, events) = mpsc::channel(32);

        let options = AppOptions {
            store,
            window_state_path: dir.path().join("window-state.toml"),
            bypass_update_check,
            enable_shortcuts: false,
        };
        let services = Services {
            session: session.clone(),
            updater: Box::new(updater.clone()),
            shell: shell.clone(),
        };
        let ctx = AppContext::new(settings, options, services, outbound_tx, events_tx);

        Self {
            ctx,
            outbound,
            events,
            session,
            updater,
            shell,
            dir,
        }
    }

    /// A context whose main surfaces are already up, with the outbox drained.
    pub fn started() -> Self {
        let mut app = Self::new(true);
        app.ctx.handle_event(AppEvent::Ready);
        assert!(app.ctx.updates.is_started());
        app.drain();
        app
    }

    pub fn drain(&mut self) -> Vec<Outbound> {
        let mut out = Vec::new();
        while let Ok(m) = self.outbound.try_recv() {
            out.push(m);
        }
        out
    }

    /// Outbound messages on `channel`, in send order.
    pub fn drain_channel(&mut self, channel: &str) -> Vec<Outbound> {
        self.drain()
            .into_iter()
            .filter(|m| m.channel == channel)
            .collect()
    }
}
