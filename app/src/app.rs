/// The application context: every piece of state the control loop owns.
///
/// One `AppContext` lives on the control loop and is handed by `&mut` to the
/// dispatch router and the update orchestrator's action runner. Nothing here
/// is shared across tasks; other tasks talk to it through [`AppEvent`]s.
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::dispatch::{self, Flow};
use crate::event::AppEvent;
use crate::geometry::{GeometryManager, Point, COMPACT_SIZE};
use crate::session::{FunctionalityFlags, IngestionSession, SessionController};
use crate::settings::{Settings, SettingsStore};
use crate::shell::Shell;
use crate::shortcuts::{self, ShortcutAction, ShortcutHandle};
use crate::surface::{Outbound, Surface, SurfaceKind, Surfaces, WindowState};
use crate::updater::{UpdateAction, UpdateChecker, UpdateOrchestrator};
use crate::window_state::{self, WindowPositions};

/// How many of our own settings writes are remembered to recognise their echoes.
const OWN_WRITE_MEMORY: usize = 4;

pub struct AppOptions {
    pub store: SettingsStore,
    pub window_state_path: PathBuf,
    /// Skip the prelauncher and the startup update check.
    pub bypass_update_check: bool,
    /// Install the global keyboard hook when the application starts.
    pub enable_shortcuts: bool,
}

/// External collaborators, behind the traits the context talks to.
pub struct Services {
    pub session: Arc<dyn IngestionSession>,
    pub updater: Box<dyn UpdateChecker>,
    pub shell: Arc<dyn Shell>,
}

pub struct AppContext {
    pub settings: Settings,
    store: SettingsStore,
    /// Trees this process wrote, newest last; the watcher reports them back.
    own_writes: VecDeque<Settings>,
    window_state_path: PathBuf,
    positions: WindowPositions,
    pub session: SessionController,
    pub geometry: GeometryManager,
    pub surfaces: Surfaces,
    pub updates: UpdateOrchestrator,
    updater: Box<dyn UpdateChecker>,
    pub(crate) shell: Arc<dyn Shell>,
    shortcuts: Option<ShortcutHandle>,
    pub(crate) outbound: mpsc::UnboundedSender<Outbound>,
    events: mpsc::Sender<AppEvent>,
    bypass_update_check: bool,
    enable_shortcuts: bool,
}

impl AppContext {
    pub fn new(
        settings: Settings,
        options: AppOptions,
        services: Services,
        outbound: mpsc::UnboundedSender<Outbound>,
        events: mpsc::Sender<AppEvent>,
    ) -> Self {
        let positions = window_state::load_window_state(&options.window_state_path);
        let flags = FunctionalityFlags::from(&settings.damage_meter.functionality);
        let session = SessionController::new(services.session, events.clone(), flags);

        Self {
            settings,
            store: options.store,
            own_writes: VecDeque::new(),
            window_state_path: options.window_state_path,
            positions,
            session,
            geometry: GeometryManager::new(),
            surfaces: Surfaces::default(),
            updates: UpdateOrchestrator::new(),
            updater: services.updater,
            shell: services.shell,
            shortcuts: None,
            outbound,
            events,
            bypass_update_check: options.bypass_update_check,
            enable_shortcuts: options.enable_shortcuts,
        }
    }

    /// Handles one event from the control channel.
    pub fn handle_event(&mut self, event: AppEvent) -> Flow {
        match event {
            AppEvent::Ready => {
                let actions = self.updates.on_ready(self.bypass_update_check);
                self.apply_update_actions(actions)
            }
            AppEvent::Update(update) => {
                let actions = self.updates.on_event(&update);
                self.apply_update_actions(actions)
            }
            AppEvent::StartupDeadline => {
                let actions = self.updates.on_startup_deadline();
                self.apply_update_actions(actions)
            }
            AppEvent::Command(message) => dispatch::dispatch(self, &message),
            AppEvent::Shortcut(action) => {
                self.on_shortcut(action);
                Flow::Continue
            }
            AppEvent::SecondInstance => {
                self.bring_primary_to_front();
                Flow::Continue
            }
            AppEvent::ResetTimerFired(generation) => {
                self.session.on_reset_timer(generation);
                Flow::Continue
            }
            AppEvent::PhaseTransition => {
                self.session.on_phase_transition();
                Flow::Continue
            }
            AppEvent::SettingsReloaded(settings) => {
                if settings == self.settings {
                    debug!("[settings] Reloaded settings are unchanged");
                } else if self.own_writes.contains(&settings) {
                    debug!("[settings] Ignoring a stale reload of our own write");
                } else {
                    info!("[settings] Settings changed on disk; applying");
                    self.own_writes.clear();
                    self.replace_settings(settings, false);
                }
                Flow::Continue
            }
            AppEvent::Shutdown => {
                info!("Shutting down");
                self.quit()
            }
        }
    }

    /// Carries out what the update orchestrator decided.
    pub fn apply_update_actions(&mut self, actions: Vec<UpdateAction>) -> Flow {
        for action in actions {
            match action {
                UpdateAction::ShowPrelauncher => {
                    self.surfaces.prelauncher = Some(Surface::new(
                        SurfaceKind::Prelauncher,
                        WindowState::prelauncher(),
                        self.outbound.clone(),
                    ));
                }
                UpdateAction::ArmStartupDeadline(after) => self.arm_startup_deadline(after),
                UpdateAction::CheckForUpdates => self.updater.check_for_updates(),
                UpdateAction::Forward(kind, update) => match self.surfaces.get(kind) {
                    Some(surface) => match serde_json::to_value(&update) {
                        Ok(payload) => surface.send("updater-message", payload),
                        Err(e) => warn!("[updater] Failed to serialize update event: {e}"),
                    },
                    None => debug!("[updater] No {kind:?} surface for {update:?}"),
                },
                UpdateAction::StartApplication => self.start_application(),
                UpdateAction::DismissPrelauncher => {
                    if let Some(prelauncher) = self.surfaces.prelauncher.take() {
                        prelauncher.close();
                    }
                }
                UpdateAction::QuitAndInstall {
                    silent,
                    force_run_after,
                } => {
                    info!("[updater] Quitting to install update");
                    self.persist_damage_meter_position();
                    self.updater.quit_and_install(silent, force_run_after);
                    return Flow::Quit;
                }
            }
        }
        Flow::Continue
    }

    fn arm_startup_deadline(&self, after: Duration) {
        let events = self.events.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = events.send(AppEvent::StartupDeadline).await;
        });
    }

    /// Creates the main and damage-meter surfaces. Runs once per process.
    fn start_application(&mut self) {
        info!("[app] Starting application");
        let general = &self.settings.general;

        let mut main = WindowState::main();
        main.visible = !general.start_main_hidden;
        main.minimized = general.start_main_minimized;
        self.surfaces.main = Some(Surface::new(SurfaceKind::Main, main, self.outbound.clone()));

        let position = self.positions.damage_meter.unwrap_or_default();
        let meter = WindowState::damage_meter(position, self.settings.damage_meter.design.opacity);
        self.surfaces.damage_meter = Some(Surface::new(
            SurfaceKind::DamageMeter,
            meter,
            self.outbound.clone(),
        ));

        self.surfaces
            .broadcast("on-settings-change", &self.settings_value());

        if self.enable_shortcuts && self.shortcuts.is_none() {
            self.shortcuts = shortcuts::start(&self.settings.shortcuts, self.events.clone());
        }
    }

    /// Replaces the whole settings tree, optionally persisting it, and pushes
    /// it to every consumer: surfaces, the session, shortcuts and the meter.
    pub fn replace_settings(&mut self, mut settings: Settings, persist: bool) {
        if persist {
            settings.app_version = env!("CARGO_PKG_VERSION").to_string();
            self.store.save(&settings);
            if self.own_writes.len() == OWN_WRITE_MEMORY {
                self.own_writes.pop_front();
            }
            self.own_writes.push_back(settings.clone());
        }
        self.settings = settings;

        self.surfaces
            .broadcast("on-settings-change", &self.settings_value());
        self.session
            .apply_functionality_flags(FunctionalityFlags::from(&self.settings.damage_meter.functionality));
        if let Some(handle) = &self.shortcuts {
            handle.update_bindings(&self.settings.shortcuts);
        }

        let opacity = self.settings.damage_meter.design.opacity;
        if let Some(meter) = self.surfaces.damage_meter.as_mut() {
            if meter.window.opacity != opacity {
                meter.window.opacity = opacity;
                meter.sync_window();
            }
        }
    }

    pub fn settings_value(&self) -> Value {
        serde_json::to_value(&self.settings).unwrap_or_else(|e| {
            warn!("[settings] Failed to serialize settings: {e}");
            Value::Null
        })
    }

    fn on_shortcut(&mut self, action: ShortcutAction) {
        debug!("[shortcuts] {action:?}");
        if action == ShortcutAction::PauseDamageMeter {
            self.session.toggle_pause();
        }
        match &self.surfaces.damage_meter {
            Some(meter) => meter.send("shortcut-action", Value::from(action.surface_message())),
            None => debug!("[shortcuts] No damage meter yet; {action:?} not forwarded"),
        }
    }

    /// Focuses whatever is on screen: the main window once started, else the
    /// prelauncher.
    fn bring_primary_to_front(&mut self) {
        let surface = match self.surfaces.main.as_mut() {
            Some(main) => Some(main),
            None => self.surfaces.prelauncher.as_mut(),
        };
        match surface {
            Some(surface) => surface.bring_to_front(),
            None => debug!("[instance] Nothing on screen to focus yet"),
        }
    }

    /// Enters or leaves compact mode, or minimizes/restores the damage meter
    /// when the user prefers the taskbar. Repeats of the current state are no-ops.
    pub fn set_damage_meter_compact(&mut self, compact: bool) {
        let minimize_to_taskbar = self.settings.damage_meter.functionality.minimize_to_taskbar;
        let Some(meter) = self.surfaces.damage_meter.as_mut() else {
            debug!("[app] No damage meter to toggle");
            return;
        };

        if minimize_to_taskbar {
            // A meter left compact by an earlier toggle is restored first.
            self.geometry.exit_compact_mode(&mut meter.window.geometry);
            meter.set_minimized(compact);
            return;
        }
        if compact == self.geometry.is_compact() {
            return;
        }
        if compact {
            self.geometry
                .enter_compact_mode(&mut meter.window.geometry, COMPACT_SIZE);
        } else {
            self.geometry.exit_compact_mode(&mut meter.window.geometry);
        }
        meter.sync_window();
    }

    /// Tray click or its "Show" entry.
    pub fn show_main_window(&mut self) {
        match self.surfaces.main.as_mut() {
            Some(main) => main.bring_to_front(),
            None => debug!("[app] Main window not created yet"),
        }
    }

    /// The main window's close button hides it to the tray unless the user
    /// turned that off, in which case the application quits.
    pub fn on_main_window_closed(&mut self) -> Flow {
        if !self.settings.general.close_to_system_tray {
            return self.quit();
        }
        if let Some(main) = self.surfaces.main.as_mut() {
            main.window.visible = false;
            main.sync_window();
        }
        Flow::Continue
    }

    /// Persists what must survive a restart and stops the control loop.
    pub fn quit(&mut self) -> Flow {
        self.persist_damage_meter_position();
        Flow::Quit
    }

    pub fn reset_damage_meter_position(&mut self) {
        if let Some(meter) = self.surfaces.damage_meter.as_mut() {
            meter.window.geometry.position = Point::default();
            meter.sync_window();
        }
        self.positions.damage_meter = Some(Point::default());
        window_state::save_window_state(&self.window_state_path, &self.positions);
    }

    /// Remembers where the damage meter rests: the pre-compact position while compact.
    fn persist_damage_meter_position(&mut self) {
        let Some(meter) = &self.surfaces.damage_meter else {
            return;
        };
        let position = self.geometry.resting_position(meter.window.geometry.position);
        self.positions.damage_meter = Some(position);
        window_state::save_window_state(&self.window_state_path, &self.positions);
    }

    /// Uninstalls the keyboard hook, if one is running.
    pub fn stop_shortcuts(&mut self) {
        if let Some(handle) = self.shortcuts.take() {
            handle.stop();
        }
    }
}
