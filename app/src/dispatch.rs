/// Command dispatch: a static table from inbound message names to handlers.
///
/// Handlers run to completion on the control loop. Unknown names are logged
/// and ignored, and no handler can fail the loop: every error is logged where
/// it happens.
use std::path::PathBuf;

use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::app::AppContext;
use crate::paths;
use crate::settings;
use crate::surface::{Outbound, SurfaceKind};

/// A named message sent by a surface.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CommandMessage {
    #[serde(rename = "message")]
    pub name: String,
    #[serde(default)]
    pub value: Value,
    #[serde(rename = "surface")]
    pub origin: SurfaceKind,
}

#[cfg(test)]
impl CommandMessage {
    pub fn new(name: &str, value: Value, origin: SurfaceKind) -> Self {
        Self {
            name: name.to_string(),
            value,
            origin,
        }
    }
}

/// Replies go back to the surface a command came from.
#[derive(Debug, Clone)]
pub struct ReplyChannel {
    surface: SurfaceKind,
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl ReplyChannel {
    pub fn new(surface: SurfaceKind, outbound: mpsc::UnboundedSender<Outbound>) -> Self {
        Self { surface, outbound }
    }

    pub fn send(&self, channel: &str, payload: Value) {
        let message = Outbound {
            surface: self.surface,
            channel: channel.to_string(),
            payload,
        };
        if self.outbound.send(message).is_err() {
            debug!("[dispatch] Reply '{channel}' dropped: renderer gone");
        }
    }
}

/// Whether the control loop keeps running after an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

type Handler = fn(&mut AppContext, &CommandMessage, &ReplyChannel) -> Flow;

static HANDLERS: &[(&str, Handler)] = &[
    ("reset-session", reset_session),
    ("cancel-reset-session", cancel_reset_session),
    ("save-settings", save_settings),
    ("get-settings", get_settings),
    ("select-log-path-folder", select_log_path_folder),
    ("reset-damage-meter-position", reset_damage_meter_position),
    ("toggle-compact-mode", toggle_compact_mode),
    ("toggle-damage-meter-minimized-state", toggle_compact_mode),
    ("check-for-updates", check_for_updates),
    ("quit-and-install", quit_and_install),
    ("open-log-directory", open_log_directory),
    ("open-link", open_link),
    ("show-main-window", show_main_window),
    ("main-window-closed", main_window_closed),
    ("quit-app", quit_app),
];

/// Routes `message` to its handler.
pub fn dispatch(ctx: &mut AppContext, message: &CommandMessage) -> Flow {
    let Some((_, handler)) = HANDLERS.iter().find(|(name, _)| *name == message.name) else {
        warn!(
            "[dispatch] Unknown message '{}' from {:?}",
            message.name, message.origin
        );
        return Flow::Continue;
    };
    let reply = ReplyChannel::new(message.origin, ctx.outbound.clone());
    handler(ctx, message, &reply)
}

fn reset_session(ctx: &mut AppContext, _: &CommandMessage, _: &ReplyChannel) -> Flow {
    ctx.session.reset();
    Flow::Continue
}

fn cancel_reset_session(ctx: &mut AppContext, _: &CommandMessage, _: &ReplyChannel) -> Flow {
    ctx.session.cancel_scheduled_reset();
    Flow::Continue
}

fn save_settings(ctx: &mut AppContext, message: &CommandMessage, _: &ReplyChannel) -> Flow {
    match settings::from_payload(&message.value) {
        Ok(new_settings) => ctx.replace_settings(new_settings, true),
        Err(e) => warn!("[dispatch] Ignoring invalid save-settings payload: {e:#}"),
    }
    Flow::Continue
}

fn get_settings(ctx: &mut AppContext, _: &CommandMessage, reply: &ReplyChannel) -> Flow {
    reply.send("on-settings-change", ctx.settings_value());
    Flow::Continue
}

/// The picker blocks, so it runs off the control loop and replies when done.
fn select_log_path_folder(ctx: &mut AppContext, _: &CommandMessage, reply: &ReplyChannel) -> Flow {
    let shell = ctx.shell.clone();
    let reply = reply.clone();
    tokio::spawn(async move {
        match tokio::task::spawn_blocking(move || shell.pick_directory()).await {
            Ok(Ok(Some(dir))) => {
                reply.send("selected-log-path-folder", Value::from(dir.to_string_lossy().into_owned()));
            }
            Ok(Ok(None)) => debug!("[dispatch] Log folder selection cancelled"),
            Ok(Err(e)) => warn!("[dispatch] Folder picker failed: {e:#}"),
            Err(e) => warn!("[dispatch] Folder picker task failed: {e}"),
        }
    });
    Flow::Continue
}

fn reset_damage_meter_position(ctx: &mut AppContext, _: &CommandMessage, _: &ReplyChannel) -> Flow {
    ctx.reset_damage_meter_position();
    Flow::Continue
}

/// `true` shrinks (or minimizes), `false` restores.
fn toggle_compact_mode(ctx: &mut AppContext, message: &CommandMessage, _: &ReplyChannel) -> Flow {
    match message.value.as_bool() {
        Some(compact) => ctx.set_damage_meter_compact(compact),
        None => warn!(
            "[dispatch] '{}' expects a boolean, got {}",
            message.name, message.value
        ),
    }
    Flow::Continue
}

fn check_for_updates(ctx: &mut AppContext, _: &CommandMessage, _: &ReplyChannel) -> Flow {
    let actions = ctx.updates.on_check_requested();
    ctx.apply_update_actions(actions)
}

fn quit_and_install(ctx: &mut AppContext, _: &CommandMessage, _: &ReplyChannel) -> Flow {
    let actions = ctx.updates.request_install();
    ctx.apply_update_actions(actions)
}

/// Opens the given folder, or the session log folder when no path is sent.
fn open_log_directory(ctx: &mut AppContext, message: &CommandMessage, _: &ReplyChannel) -> Flow {
    let dir = match message.value.as_str().filter(|s| !s.trim().is_empty()) {
        Some(path) => PathBuf::from(path),
        None => paths::log_dir(ctx.settings.general.custom_log_path.as_deref()),
    };
    info!("[dispatch] Opening {}", dir.display());
    if let Err(e) = ctx.shell.open_path(&dir) {
        warn!("[dispatch] {e:#}");
    }
    Flow::Continue
}

fn open_link(ctx: &mut AppContext, message: &CommandMessage, _: &ReplyChannel) -> Flow {
    let Some(link) = message.value.as_str() else {
        warn!("[dispatch] open-link expects a string, got {}", message.value);
        return Flow::Continue;
    };
    if let Err(e) = ctx.shell.open_url(link) {
        warn!("[dispatch] {e:#}");
    }
    Flow::Continue
}

fn show_main_window(ctx: &mut AppContext, _: &CommandMessage, _: &ReplyChannel) -> Flow {
    ctx.show_main_window();
    Flow::Continue
}

fn main_window_closed(ctx: &mut AppContext, _: &CommandMessage, _: &ReplyChannel) -> Flow {
    ctx.on_main_window_closed()
}

fn quit_app(ctx: &mut AppContext, _: &CommandMessage, _: &ReplyChannel) -> Flow {
    info!("[dispatch] Quit requested");
    ctx.quit()
}
