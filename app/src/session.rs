/// Session control on top of the long-running ingestion session.
///
/// The controller owns the reset debounce timer and the paused flag; the
/// ingestion session itself is shared and keeps running underneath. Timer
/// expiry is posted back onto the control channel as
/// [`AppEvent::ResetTimerFired`] so it is ordered with every other command.
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::event::AppEvent;
use crate::settings::FunctionalitySettings;

/// Delay before a phase-transition reset actually clears the session.
pub const PHASE_TRANSITION_RESET_DELAY: Duration = Duration::from_secs(6);

/// Live behaviour switches of the ingestion session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FunctionalityFlags {
    pub dont_reset_on_zone_change: bool,
    pub remove_overkill_damage: bool,
    pub reset_after_phase_transition: bool,
}

impl From<&FunctionalitySettings> for FunctionalityFlags {
    fn from(f: &FunctionalitySettings) -> Self {
        Self {
            dont_reset_on_zone_change: f.dont_reset_on_zone_change,
            remove_overkill_damage: f.remove_overkill_damage,
            reset_after_phase_transition: f.reset_after_phase_transition,
        }
    }
}

/// The external ingestion session. Every call is a fence: it takes effect
/// between two records, never in the middle of one.
pub trait IngestionSession: Send + Sync {
    /// Drops all accumulated session state.
    fn reset(&self);
    fn apply_flags(&self, flags: FunctionalityFlags);
    fn set_paused(&self, paused: bool);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    PendingReset(Instant),
    Paused,
}

struct PendingReset {
    generation: u64,
    deadline: Instant,
    timer: JoinHandle<()>,
}

pub struct SessionController {
    session: Arc<dyn IngestionSession>,
    events: mpsc::Sender<AppEvent>,
    flags: FunctionalityFlags,
    paused: bool,
    pending: Option<PendingReset>,
    generation: u64,
}

impl SessionController {
    /// Wraps `session` and pushes `flags` to it immediately.
    pub fn new(
        session: Arc<dyn IngestionSession>,
        events: mpsc::Sender<AppEvent>,
        flags: FunctionalityFlags,
    ) -> Self {
        session.apply_flags(flags);
        Self {
            session,
            events,
            flags,
            paused: false,
            pending: None,
            generation: 0,
        }
    }

    /// Clears the session now and drops any pending debounce timer.
    pub fn reset(&mut self) {
        self.cancel_scheduled_reset();
        info!("[session] Resetting session");
        self.session.reset();
    }

    /// Starts the debounce timer, replacing any timer already running.
    pub fn schedule_reset(&mut self, after: Duration) {
        self.cancel_scheduled_reset();
        self.generation += 1;
        let generation = self.generation;
        let deadline = Instant::now() + after;
        let events = self.events.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let _ = events.send(AppEvent::ResetTimerFired(generation)).await;
        });
        debug!("[session] Reset scheduled in {after:?} (generation {generation})");
        self.pending = Some(PendingReset {
            generation,
            deadline,
            timer,
        });
    }

    /// Cancels the pending timer. Returns whether one was pending.
    pub fn cancel_scheduled_reset(&mut self) -> bool {
        match self.pending.take() {
            Some(pending) => {
                pending.timer.abort();
                debug!("[session] Cancelled reset (generation {})", pending.generation);
                true
            }
            None => false,
        }
    }

    /// Handles an expired timer. Stale generations (the timer was cancelled or
    /// superseded after it fired) are ignored.
    pub fn on_reset_timer(&mut self, generation: u64) {
        match &self.pending {
            Some(pending) if pending.generation == generation => {
                self.pending = None;
                info!("[session] Scheduled reset fired");
                self.session.reset();
            }
            _ => debug!("[session] Ignoring stale reset timer (generation {generation})"),
        }
    }

    /// Phase transitions schedule a debounced reset when the user asked for it.
    pub fn on_phase_transition(&mut self) {
        if self.flags.reset_after_phase_transition {
            self.schedule_reset(PHASE_TRANSITION_RESET_DELAY);
        }
    }

    pub fn apply_functionality_flags(&mut self, flags: FunctionalityFlags) {
        if flags == self.flags {
            return;
        }
        self.flags = flags;
        self.session.apply_flags(flags);
    }

    pub fn set_paused(&mut self, paused: bool) {
        if self.paused == paused {
            return;
        }
        self.paused = paused;
        info!("[session] {}", if paused { "Paused" } else { "Resumed" });
        self.session.set_paused(paused);
    }

    /// Flips the paused state and returns the new value.
    pub fn toggle_pause(&mut self) -> bool {
        self.set_paused(!self.paused);
        self.paused
    }

    pub fn flags(&self) -> FunctionalityFlags {
        self.flags
    }

    pub fn has_pending_reset(&self) -> bool {
        self.pending.is_some()
    }

    pub fn state(&self) -> SessionState {
        if self.paused {
            SessionState::Paused
        } else if let Some(pending) = &self.pending {
            SessionState::PendingReset(pending.deadline)
        } else {
            SessionState::Active
        }
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.cancel_scheduled_reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::RecordingSession;

    fn controller() -> (SessionController, Arc<RecordingSession>, mpsc::Receiver<AppEvent>) {
        let session = Arc::new(RecordingSession::default());
        let (tx, rx) = mpsc::channel(8);
        let controller = SessionController::new(session.clone(), tx, FunctionalityFlags::default());
        (controller, session, rx)
    }

    /// Feeds timer events back into the controller the way the control loop does.
    async fn pump_one(controller: &mut SessionController, rx: &mut mpsc::Receiver<AppEvent>) {
        match rx.recv().await {
            Some(AppEvent::ResetTimerFired(generation)) => controller.on_reset_timer(generation),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn new_pushes_initial_flags() {
        let session = Arc::new(RecordingSession::default());
        let (tx, _rx) = mpsc::channel(1);
        let flags = FunctionalityFlags {
            dont_reset_on_zone_change: true,
            ..Default::default()
        };
        let _c = SessionController::new(session.clone(), tx, flags);
        assert_eq!(session.flags(), vec![flags]);
    }

    #[test]
    fn reset_clears_immediately() {
        let (mut c, session, _rx) = controller();
        c.reset();
        c.reset();
        assert_eq!(session.resets(), 2);
        assert_eq!(c.state(), SessionState::Active);
    }

    #[test]
    fn cancel_without_pending_timer_is_noop() {
        let (mut c, session, _rx) = controller();
        assert!(!c.cancel_scheduled_reset());
        assert_eq!(session.resets(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_schedules_coalesce_into_one_reset_from_last_call() {
        let (mut c, session, mut rx) = controller();
        let delay = Duration::from_secs(6);

        c.schedule_reset(delay);
        tokio::time::advance(Duration::from_secs(2)).await;
        c.schedule_reset(delay);
        tokio::time::advance(Duration::from_secs(2)).await;
        c.schedule_reset(delay);
        let last_call = Instant::now();
        assert_eq!(c.state(), SessionState::PendingReset(last_call + delay));

        pump_one(&mut c, &mut rx).await;
        assert_eq!(Instant::now(), last_call + delay);
        assert_eq!(session.resets(), 1);
        assert!(!c.has_pending_reset());

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(session.resets(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_while_pending_cancels_timer() {
        let (mut c, session, mut rx) = controller();
        c.schedule_reset(Duration::from_secs(6));
        c.reset();
        assert_eq!(session.resets(), 1);

        tokio::time::advance(Duration::from_secs(10)).await;
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());
        assert_eq!(session.resets(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_timer_never_resets() {
        let (mut c, session, mut rx) = controller();
        c.schedule_reset(Duration::from_secs(6));
        assert!(c.cancel_scheduled_reset());

        tokio::time::advance(Duration::from_secs(10)).await;
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());
        assert_eq!(session.resets(), 0);
    }

    #[tokio::test]
    async fn stale_generation_is_ignored() {
        let (mut c, session, _rx) = controller();
        c.schedule_reset(Duration::from_secs(60));
        c.on_reset_timer(999);
        assert_eq!(session.resets(), 0);
        assert!(c.has_pending_reset());
    }

    #[tokio::test]
    async fn timer_event_after_manual_reset_is_ignored() {
        let (mut c, session, _rx) = controller();
        c.schedule_reset(Duration::from_secs(60));
        let generation = c.generation;
        c.reset();
        c.on_reset_timer(generation);
        assert_eq!(session.resets(), 1);
    }

    #[tokio::test]
    async fn phase_transition_schedules_only_when_enabled() {
        let (mut c, _session, _rx) = controller();
        c.on_phase_transition();
        assert!(!c.has_pending_reset());

        c.apply_functionality_flags(FunctionalityFlags {
            reset_after_phase_transition: true,
            ..Default::default()
        });
        c.on_phase_transition();
        assert!(c.has_pending_reset());
    }

    #[test]
    fn unchanged_flags_are_not_republished() {
        let (mut c, session, _rx) = controller();
        c.apply_functionality_flags(FunctionalityFlags::default());
        let changed = FunctionalityFlags {
            remove_overkill_damage: true,
            ..Default::default()
        };
        c.apply_functionality_flags(changed);
        assert_eq!(session.flags(), vec![FunctionalityFlags::default(), changed]);
    }

    #[test]
    fn toggle_pause_reports_state() {
        let (mut c, session, _rx) = controller();
        assert!(c.toggle_pause());
        assert_eq!(c.state(), SessionState::Paused);
        assert!(session.is_paused());
        assert!(!c.toggle_pause());
        assert_eq!(c.state(), SessionState::Active);
    }
}
