/// Startup sequencing against the update check.
///
/// [`UpdateOrchestrator`] is a pure state machine: it consumes update events
/// and returns the [`UpdateAction`]s the control loop must carry out. Two
/// one-shot guards live here: the application starts at most once, and an
/// install is only forced while the prelauncher is still on screen.
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::event::AppEvent;
use crate::surface::SurfaceKind;

/// How long the prelauncher waits for a conclusive update check before the
/// application is started anyway.
pub const STARTUP_UPDATE_DEADLINE: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadProgress {
    pub percent: f64,
    pub bytes_per_second: u64,
    pub transferred: u64,
    pub total: u64,
}

/// Events reported by the update-check collaborator. Serialized with a
/// `message` tag, which is exactly what the surfaces receive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "message", rename_all = "kebab-case")]
pub enum UpdateEvent {
    Checking,
    UpdateAvailable {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version: Option<String>,
    },
    UpdateNotAvailable,
    Downloading(DownloadProgress),
    UpdateDownloaded {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version: Option<String>,
    },
    Error {
        error: String,
    },
}

/// The update-check collaborator. Results come back as [`AppEvent::Update`].
pub trait UpdateChecker: Send {
    fn check_for_updates(&mut self);
    /// Exits the process and applies the downloaded update.
    fn quit_and_install(&mut self, silent: bool, force_run_after: bool);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateState {
    Init,
    Checking,
    NoUpdate,
    UpdateAvailable,
    Downloaded,
    Installing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupStage {
    /// Process is up but nothing is displayed yet.
    Pending,
    /// The prelauncher is displayed while the update check runs.
    Prelauncher,
    /// Main surfaces are up; the prelauncher is gone for good.
    Started,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UpdateAction {
    ShowPrelauncher,
    ArmStartupDeadline(Duration),
    CheckForUpdates,
    Forward(SurfaceKind, UpdateEvent),
    StartApplication,
    DismissPrelauncher,
    QuitAndInstall { silent: bool, force_run_after: bool },
}

#[derive(Debug)]
pub struct UpdateOrchestrator {
    state: UpdateState,
    stage: StartupStage,
}

impl Default for UpdateOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl UpdateOrchestrator {
    pub fn new() -> Self {
        Self {
            state: UpdateState::Init,
            stage: StartupStage::Pending,
        }
    }

    pub fn state(&self) -> UpdateState {
        self.state
    }

    pub fn stage(&self) -> StartupStage {
        self.stage
    }

    pub fn is_started(&self) -> bool {
        self.stage == StartupStage::Started
    }

    /// Process is ready. With `bypass` the prelauncher and the check are skipped.
    pub fn on_ready(&mut self, bypass: bool) -> Vec<UpdateAction> {
        if self.stage != StartupStage::Pending {
            return Vec::new();
        }
        let mut actions = Vec::new();
        if bypass {
            info!("[updater] Update check bypassed");
            self.start(&mut actions);
            return actions;
        }
        self.stage = StartupStage::Prelauncher;
        self.state = UpdateState::Checking;
        actions.push(UpdateAction::ShowPrelauncher);
        actions.push(UpdateAction::ArmStartupDeadline(STARTUP_UPDATE_DEADLINE));
        actions.push(UpdateAction::CheckForUpdates);
        actions
    }

    /// A user-requested re-check.
    pub fn on_check_requested(&mut self) -> Vec<UpdateAction> {
        if self.state == UpdateState::Installing {
            return Vec::new();
        }
        // A finished download stays ready to install; the re-check only refreshes the UI.
        if self.state != UpdateState::Downloaded {
            self.state = UpdateState::Checking;
        }
        vec![UpdateAction::CheckForUpdates]
    }

    pub fn on_event(&mut self, event: &UpdateEvent) -> Vec<UpdateAction> {
        let mut actions = Vec::new();
        if let Some(target) = self.displayed_surface() {
            actions.push(UpdateAction::Forward(target, event.clone()));
        }

        match event {
            UpdateEvent::Checking => {
                if self.state != UpdateState::Downloaded {
                    self.state = UpdateState::Checking;
                }
            }
            UpdateEvent::UpdateAvailable { .. } | UpdateEvent::Downloading(_) => {
                if self.state != UpdateState::Downloaded {
                    self.state = UpdateState::UpdateAvailable;
                }
            }
            UpdateEvent::UpdateNotAvailable => {
                if self.state != UpdateState::Downloaded {
                    self.state = UpdateState::NoUpdate;
                }
                self.start(&mut actions);
            }
            UpdateEvent::UpdateDownloaded { .. } => {
                self.state = UpdateState::Downloaded;
                if self.stage == StartupStage::Prelauncher {
                    info!("[updater] Update downloaded during startup; installing");
                    actions.extend(self.install());
                } else {
                    info!("[updater] Update downloaded; waiting for the user to install");
                }
            }
            UpdateEvent::Error { error } => {
                warn!("[updater] Update check failed: {error}");
                if self.state != UpdateState::Downloaded {
                    self.state = UpdateState::NoUpdate;
                }
                self.start(&mut actions);
            }
        }
        actions
    }

    /// The bounded wait for the update check ran out.
    pub fn on_startup_deadline(&mut self) -> Vec<UpdateAction> {
        let mut actions = Vec::new();
        if self.stage == StartupStage::Prelauncher && self.state != UpdateState::Installing {
            warn!("[updater] Update check did not conclude in time; starting anyway");
            self.start(&mut actions);
        }
        actions
    }

    /// User asked to install. Only meaningful once an update is downloaded.
    pub fn request_install(&mut self) -> Vec<UpdateAction> {
        if self.state != UpdateState::Downloaded {
            info!("[updater] Install requested but no update is downloaded");
            return Vec::new();
        }
        self.install()
    }

    fn install(&mut self) -> Vec<UpdateAction> {
        self.state = UpdateState::Installing;
        vec![UpdateAction::QuitAndInstall {
            silent: false,
            force_run_after: true,
        }]
    }

    /// One-shot transition to [`StartupStage::Started`].
    fn start(&mut self, actions: &mut Vec<UpdateAction>) {
        match self.stage {
            StartupStage::Started => {}
            StartupStage::Pending => {
                self.stage = StartupStage::Started;
                actions.push(UpdateAction::StartApplication);
            }
            StartupStage::Prelauncher => {
                self.stage = StartupStage::Started;
                actions.push(UpdateAction::StartApplication);
                actions.push(UpdateAction::DismissPrelauncher);
            }
        }
    }

    fn displayed_surface(&self) -> Option<SurfaceKind> {
        match self.stage {
            StartupStage::Pending => None,
            StartupStage::Prelauncher => Some(SurfaceKind::Prelauncher),
            StartupStage::Started => Some(SurfaceKind::Main),
        }
    }
}

/// Update checker for builds without an update feed: every check reports
/// that no update is available.
pub struct OfflineUpdateChecker {
    events: mpsc::Sender<AppEvent>,
}

impl OfflineUpdateChecker {
    pub fn new(events: mpsc::Sender<AppEvent>) -> Self {
        Self { events }
    }
}

impl UpdateChecker for OfflineUpdateChecker {
    fn check_for_updates(&mut self) {
        let events = self.events.clone();
        tokio::spawn(async move {
            for event in [UpdateEvent::Checking, UpdateEvent::UpdateNotAvailable] {
                if events.send(AppEvent::Update(event)).await.is_err() {
                    break;
                }
            }
        });
    }

    fn quit_and_install(&mut self, silent: bool, force_run_after: bool) {
        debug!("[updater] quit_and_install(silent={silent}, force_run_after={force_run_after}) with no update feed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn count(actions: &[UpdateAction], wanted: &UpdateAction) -> usize {
        actions.iter().filter(|a| *a == wanted).count()
    }

    fn through_prelauncher() -> UpdateOrchestrator {
        let mut o = UpdateOrchestrator::new();
        o.on_ready(false);
        o
    }

    #[test]
    fn ready_shows_prelauncher_and_checks() {
        let mut o = UpdateOrchestrator::new();
        let actions = o.on_ready(false);
        assert_eq!(
            actions,
            vec![
                UpdateAction::ShowPrelauncher,
                UpdateAction::ArmStartupDeadline(STARTUP_UPDATE_DEADLINE),
                UpdateAction::CheckForUpdates,
            ]
        );
        assert_eq!(o.state(), UpdateState::Checking);
        assert_eq!(o.stage(), StartupStage::Prelauncher);
    }

    #[test]
    fn bypass_starts_directly() {
        let mut o = UpdateOrchestrator::new();
        assert_eq!(o.on_ready(true), vec![UpdateAction::StartApplication]);
        assert!(o.is_started());
        assert!(o.on_ready(true).is_empty());
    }

    #[test]
    fn no_update_twice_starts_exactly_once() {
        let mut o = through_prelauncher();
        let mut all = o.on_event(&UpdateEvent::UpdateNotAvailable);
        all.extend(o.on_event(&UpdateEvent::UpdateNotAvailable));

        assert_eq!(count(&all, &UpdateAction::StartApplication), 1);
        assert_eq!(count(&all, &UpdateAction::DismissPrelauncher), 1);
        assert_eq!(o.state(), UpdateState::NoUpdate);
    }

    #[test]
    fn events_are_forwarded_to_displayed_surface() {
        let mut o = through_prelauncher();
        let first = o.on_event(&UpdateEvent::Checking);
        assert_eq!(
            first,
            vec![UpdateAction::Forward(SurfaceKind::Prelauncher, UpdateEvent::Checking)]
        );

        // Forwarded before the transition, so the prelauncher sees its own outcome.
        let second = o.on_event(&UpdateEvent::UpdateNotAvailable);
        assert_eq!(
            second[0],
            UpdateAction::Forward(SurfaceKind::Prelauncher, UpdateEvent::UpdateNotAvailable)
        );

        let third = o.on_event(&UpdateEvent::Checking);
        assert_eq!(
            third,
            vec![UpdateAction::Forward(SurfaceKind::Main, UpdateEvent::Checking)]
        );
    }

    #[test]
    fn downloaded_during_prelauncher_installs() {
        let mut o = through_prelauncher();
        o.on_event(&UpdateEvent::UpdateAvailable { version: None });
        let actions = o.on_event(&UpdateEvent::UpdateDownloaded { version: None });
        assert!(actions.contains(&UpdateAction::QuitAndInstall {
            silent: false,
            force_run_after: true
        }));
        assert_eq!(o.state(), UpdateState::Installing);
        assert!(o.on_startup_deadline().is_empty());
    }

    #[test]
    fn downloaded_after_dismissal_does_not_install() {
        let mut o = through_prelauncher();
        o.on_event(&UpdateEvent::UpdateNotAvailable);
        let actions = o.on_event(&UpdateEvent::UpdateDownloaded { version: None });

        assert!(!actions
            .iter()
            .any(|a| matches!(a, UpdateAction::QuitAndInstall { .. })));
        assert_eq!(o.state(), UpdateState::Downloaded);

        // Dormant until the user asks.
        assert_eq!(o.request_install().len(), 1);
        assert_eq!(o.state(), UpdateState::Installing);
    }

    #[test]
    fn install_request_without_download_is_ignored() {
        let mut o = through_prelauncher();
        assert!(o.request_install().is_empty());
    }

    #[test]
    fn error_still_reaches_started() {
        let mut o = through_prelauncher();
        let actions = o.on_event(&UpdateEvent::Error {
            error: "net::ERR_INTERNET_DISCONNECTED".to_string(),
        });
        assert_eq!(count(&actions, &UpdateAction::StartApplication), 1);
        assert!(o.is_started());
    }

    #[test]
    fn deadline_starts_once_and_only_from_prelauncher() {
        let mut o = through_prelauncher();
        assert_eq!(
            o.on_startup_deadline(),
            vec![UpdateAction::StartApplication, UpdateAction::DismissPrelauncher]
        );
        assert!(o.on_startup_deadline().is_empty());
        assert!(o.on_event(&UpdateEvent::UpdateNotAvailable)
            .iter()
            .all(|a| matches!(a, UpdateAction::Forward(..))));
    }

    #[test]
    fn recheck_keeps_downloaded_update_installable() {
        let mut o = through_prelauncher();
        o.on_event(&UpdateEvent::UpdateNotAvailable);
        o.on_event(&UpdateEvent::UpdateDownloaded { version: None });
        o.on_check_requested();
        o.on_event(&UpdateEvent::Checking);
        assert_eq!(o.state(), UpdateState::Downloaded);
    }

    #[test]
    fn events_serialize_with_message_tag() {
        assert_eq!(
            serde_json::to_value(UpdateEvent::UpdateNotAvailable).unwrap(),
            json!({"message": "update-not-available"})
        );
        let progress = UpdateEvent::Downloading(DownloadProgress {
            percent: 42.0,
            bytes_per_second: 1024,
            transferred: 420,
            total: 1000,
        });
        assert_eq!(
            serde_json::to_value(progress).unwrap(),
            json!({"message": "downloading", "percent": 42.0, "bytesPerSecond": 1024, "transferred": 420, "total": 1000})
        );
    }

    #[tokio::test]
    async fn offline_checker_reports_no_update() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut checker = OfflineUpdateChecker::new(tx);
        checker.check_for_updates();
        assert!(matches!(rx.recv().await, Some(AppEvent::Update(UpdateEvent::Checking))));
        assert!(matches!(
            rx.recv().await,
            Some(AppEvent::Update(UpdateEvent::UpdateNotAvailable))
        ));
    }
}
