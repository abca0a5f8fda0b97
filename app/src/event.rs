use crate::dispatch::CommandMessage;
use crate::settings::Settings;
use crate::shortcuts::ShortcutAction;
use crate::updater::UpdateEvent;

/// Everything the control loop reacts to. Producers run on their own tasks;
/// the loop is the single consumer, so events are handled in arrival order.
#[derive(Debug)]
pub enum AppEvent {
    /// Startup finished; decide between the prelauncher and the main surfaces.
    Ready,
    /// Progress or outcome reported by the update-check collaborator.
    Update(UpdateEvent),
    /// The bounded wait for a conclusive update check has elapsed.
    StartupDeadline,
    /// A named message sent by one of the surfaces.
    Command(CommandMessage),
    /// A global shortcut was pressed.
    Shortcut(ShortcutAction),
    /// A second process tried to start and was turned away.
    SecondInstance,
    /// The debounce timer with this generation expired.
    ResetTimerFired(u64),
    /// The ingestion session saw a phase transition.
    PhaseTransition,
    /// The settings file changed on disk and was successfully re-read.
    SettingsReloaded(Settings),
    /// Ctrl+C or end of input; persist state and exit.
    Shutdown,
}
