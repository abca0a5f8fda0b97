/// Global shortcuts using a low-level Windows keyboard hook (`WH_KEYBOARD_LL`).
///
/// The hook runs on a dedicated OS thread with its own Windows message pump, so
/// shortcuts fire while the game has focus. Accelerators use the renderer's
/// notation (`CommandOrControl+Up`) and are rebound whenever settings change.
///
/// On non-Windows platforms the public API compiles but is a no-op at runtime.
use std::sync::{Mutex, OnceLock, PoisonError};
use tokio::sync::mpsc;
use tracing::warn;

use crate::event::AppEvent;
use crate::settings::ShortcutSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShortcutAction {
    MinimizeDamageMeter,
    ResetSession,
    PauseDamageMeter,
}

impl ShortcutAction {
    /// Payload of the `shortcut-action` message sent to the damage meter.
    pub fn surface_message(self) -> &'static str {
        match self {
            ShortcutAction::MinimizeDamageMeter => "toggle-minimized-state",
            ShortcutAction::ResetSession => "reset-session",
            ShortcutAction::PauseDamageMeter => "pause-damage-meter",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Modifiers {
    pub ctrl: bool,
    pub alt: bool,
    pub shift: bool,
    pub meta: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Accelerator {
    pub modifiers: Modifiers,
    /// Windows virtual-key code.
    pub vk: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Binding {
    accelerator: Accelerator,
    action: ShortcutAction,
}

/// Active bindings, read inside the hook callback.
static BINDINGS: Mutex<Vec<Binding>> = Mutex::new(Vec::new());

/// Channel used to forward [`AppEvent::Shortcut`] from the hook callback to
/// the control loop. Set once by [`start`].
static HOOK_TX: OnceLock<mpsc::Sender<AppEvent>> = OnceLock::new();

/// Converts a key name (e.g. `"F8"`, `"Up"`, `"A"`) to a Windows virtual-key code.
pub fn parse_vk(name: &str) -> Option<u32> {
    let upper = name.to_uppercase();
    if let Some(n) = upper.strip_prefix('F').and_then(|n| n.parse::<u32>().ok()) {
        // F1=0x70 … F24=0x87
        return (1..=24).contains(&n).then(|| 0x6F + n);
    }
    match upper.as_str() {
        "UP" => Some(0x26),
        "DOWN" => Some(0x28),
        "LEFT" => Some(0x25),
        "RIGHT" => Some(0x27),
        "SPACE" => Some(0x20),
        "TAB" => Some(0x09),
        "ENTER" | "RETURN" => Some(0x0D),
        "ESC" | "ESCAPE" => Some(0x1B),
        "BACKSPACE" => Some(0x08),
        "INSERT" => Some(0x2D),
        "DELETE" => Some(0x2E),
        "HOME" => Some(0x24),
        "END" => Some(0x23),
        "PAGEUP" => Some(0x21),
        "PAGEDOWN" => Some(0x22),
        "PLUS" => Some(0xBB),
        s if s.len() == 1 => {
            let c = s.chars().next()?;
            // 'A'=0x41…'Z'=0x5A; '0'=0x30…'9'=0x39, identical to the VK codes.
            c.is_ascii_alphanumeric().then_some(c as u32)
        }
        _ => None,
    }
}

/// Parses an accelerator such as `CommandOrControl+Shift+R`.
///
/// Every part but the last must be a modifier; the last must be a key.
pub fn parse_accelerator(accelerator: &str) -> Option<Accelerator> {
    let parts: Vec<&str> = accelerator.split('+').map(str::trim).collect();
    let (key, modifier_names) = parts.split_last()?;
    let mut modifiers = Modifiers::default();
    for name in modifier_names {
        match name.to_lowercase().as_str() {
            "commandorcontrol" | "cmdorctrl" | "control" | "ctrl" => modifiers.ctrl = true,
            "alt" | "option" | "altgr" => modifiers.alt = true,
            "shift" => modifiers.shift = true,
            "command" | "cmd" | "super" | "meta" => modifiers.meta = true,
            _ => return None,
        }
    }
    Some(Accelerator {
        modifiers,
        vk: parse_vk(key)?,
    })
}

fn bindings_from(settings: &ShortcutSettings) -> Vec<Binding> {
    [
        (&settings.minimize_damage_meter, ShortcutAction::MinimizeDamageMeter),
        (&settings.reset_session, ShortcutAction::ResetSession),
        (&settings.pause_damage_meter, ShortcutAction::PauseDamageMeter),
    ]
    .into_iter()
    .filter_map(|(binding, action)| match parse_accelerator(&binding.value) {
        Some(accelerator) => Some(Binding { accelerator, action }),
        None => {
            if !binding.value.is_empty() {
                warn!("[shortcuts] Ignoring unrecognised shortcut '{}' for {action:?}", binding.value);
            }
            None
        }
    })
    .collect()
}

fn store_bindings(settings: &ShortcutSettings) {
    let bindings = bindings_from(settings);
    *BINDINGS.lock().unwrap_or_else(PoisonError::into_inner) = bindings;
}

/// Action bound to `vk` under `modifiers`, if any.
fn lookup(vk: u32, modifiers: Modifiers) -> Option<ShortcutAction> {
    // The hook must never block; a contended lock just misses this press.
    let bindings = BINDINGS.try_lock().ok()?;
    bindings
        .iter()
        .find(|b| b.accelerator.vk == vk && b.accelerator.modifiers == modifiers)
        .map(|b| b.action)
}

// ── Public handle ─────────────────────────────────────────────────────────────

/// A handle to the running keyboard hook.
pub struct ShortcutHandle {
    #[cfg(windows)]
    thread: std::thread::JoinHandle<()>,
    /// Thread ID of the message-pump thread, used to post `WM_QUIT`.
    #[cfg(windows)]
    thread_id: u32,
}

impl ShortcutHandle {
    /// Replaces all bindings with the ones in `settings`.
    pub fn update_bindings(&self, settings: &ShortcutSettings) {
        store_bindings(settings);
    }

    /// Signals the hook thread to stop and blocks until it exits.
    pub fn stop(self) {
        #[cfg(windows)]
        {
            imp::post_quit(self.thread_id);
            let _ = self.thread.join();
        }
    }
}

/// Installs the keyboard hook on a dedicated OS thread.
///
/// Matching presses are sent to `tx` with a non-blocking `try_send`; if the
/// channel is full the press is dropped.
///
/// Returns `None` if the hook thread could not be started.
pub fn start(settings: &ShortcutSettings, tx: mpsc::Sender<AppEvent>) -> Option<ShortcutHandle> {
    store_bindings(settings);
    // Ignored if called more than once (e.g. in test binaries).
    let _ = HOOK_TX.set(tx);

    #[cfg(windows)]
    {
        let (id_tx, id_rx) = std::sync::mpsc::sync_channel::<u32>(1);
        let thread = match std::thread::Builder::new()
            .name("shortcut-pump".into())
            .spawn(move || imp::run_message_pump(id_tx))
        {
            Ok(t) => t,
            Err(e) => {
                warn!("[shortcuts] Failed to spawn hook thread: {e}");
                return None;
            }
        };
        let thread_id = match id_rx.recv() {
            Ok(id) => id,
            Err(_) => {
                warn!("[shortcuts] Hook thread exited before reporting its ID");
                return None;
            }
        };
        Some(ShortcutHandle { thread, thread_id })
    }

    #[cfg(not(windows))]
    Some(ShortcutHandle {})
}

// ── Windows implementation ────────────────────────────────────────────────────

#[cfg(windows)]
mod imp {
    use std::sync::mpsc as std_mpsc;

    use tracing::{debug, warn};
    use windows::Win32::Foundation::{HINSTANCE, LPARAM, LRESULT, WPARAM};
    use windows::Win32::System::Threading::GetCurrentThreadId;
    use windows::Win32::UI::Input::KeyboardAndMouse::{
        GetAsyncKeyState, VIRTUAL_KEY, VK_CONTROL, VK_LWIN, VK_MENU, VK_RWIN, VK_SHIFT,
    };
    use windows::Win32::UI::WindowsAndMessaging::{
        CallNextHookEx, DispatchMessageW, GetMessageW, PostThreadMessageW, SetWindowsHookExW,
        UnhookWindowsHookEx, KBDLLHOOKSTRUCT, MSG, WH_KEYBOARD_LL, WM_KEYDOWN, WM_QUIT,
        WM_SYSKEYDOWN,
    };

    use super::{lookup, Modifiers, HOOK_TX};
    use crate::event::AppEvent;

    fn is_down(vk: VIRTUAL_KEY) -> bool {
        // High bit set = key currently held.
        unsafe { GetAsyncKeyState(i32::from(vk.0)) < 0 }
    }

    fn current_modifiers() -> Modifiers {
        Modifiers {
            ctrl: is_down(VK_CONTROL),
            alt: is_down(VK_MENU),
            shift: is_down(VK_SHIFT),
            meta: is_down(VK_LWIN) || is_down(VK_RWIN),
        }
    }

    unsafe extern "system" fn keyboard_proc(
        n_code: i32,
        w_param: WPARAM,
        l_param: LPARAM,
    ) -> LRESULT {
        let message = w_param.0 as u32;
        if n_code >= 0 && (message == WM_KEYDOWN || message == WM_SYSKEYDOWN) {
            let kb = &*(l_param.0 as *const KBDLLHOOKSTRUCT);
            if let Some(action) = lookup(kb.vkCode, current_modifiers()) {
                if let Some(tx) = HOOK_TX.get() {
                    let _ = tx.try_send(AppEvent::Shortcut(action));
                }
            }
        }
        CallNextHookEx(None, n_code, w_param, l_param)
    }

    /// Installs `WH_KEYBOARD_LL`, pumps messages until `WM_QUIT`, then
    /// uninstalls the hook. Sends the thread ID to `id_tx` first.
    pub fn run_message_pump(id_tx: std_mpsc::SyncSender<u32>) {
        unsafe {
            let _ = id_tx.send(GetCurrentThreadId());
            drop(id_tx);

            let hook = match SetWindowsHookExW(
                WH_KEYBOARD_LL,
                Some(keyboard_proc),
                HINSTANCE::default(),
                0,
            ) {
                Ok(h) => h,
                Err(e) => {
                    warn!("[shortcuts] SetWindowsHookExW failed: {e}");
                    return;
                }
            };

            let mut msg = MSG::default();
            // GetMessageW: >0 = message, 0 = WM_QUIT, <0 = error.
            while GetMessageW(&mut msg, None, 0, 0).0 > 0 {
                DispatchMessageW(&msg);
            }

            let _ = UnhookWindowsHookEx(hook);
            debug!("[shortcuts] Hook thread exited");
        }
    }

    pub fn post_quit(thread_id: u32) {
        unsafe {
            let _ = PostThreadMessageW(thread_id, WM_QUIT, WPARAM(0), LPARAM(0));
        }
    }
}
