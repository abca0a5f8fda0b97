/// Presentation surfaces as the orchestrator sees them.
///
/// A surface is an owned handle: its window state lives here, and every
/// message for the renderer goes through its outbound channel. Rendering is
/// somebody else's job; the bridge forwards outbound messages to it.
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use crate::geometry::{Geometry, Point, Size};

pub const PRELAUNCHER_SIZE: Size = Size {
    width: 300,
    height: 360,
};
pub const MAIN_SIZE: Size = Size {
    width: 1280,
    height: 720,
};
pub const MAIN_MINIMUM_SIZE: Size = Size {
    width: 800,
    height: 600,
};
pub const DAMAGE_METER_SIZE: Size = Size {
    width: 500,
    height: 350,
};
pub const DAMAGE_METER_MINIMUM_SIZE: Size = Size {
    width: 360,
    height: 124,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SurfaceKind {
    Prelauncher,
    Main,
    DamageMeter,
}

/// One message for a renderer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Outbound {
    pub surface: SurfaceKind,
    pub channel: String,
    pub payload: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowState {
    #[serde(flatten)]
    pub geometry: Geometry,
    pub visible: bool,
    pub minimized: bool,
    pub opacity: f64,
}

impl WindowState {
    fn new(position: Point, size: Size, minimum_size: Size) -> Self {
        Self {
            geometry: Geometry {
                position,
                size,
                minimum_size,
                resizable: true,
            },
            visible: true,
            minimized: false,
            opacity: 1.0,
        }
    }

    pub fn prelauncher() -> Self {
        let mut w = Self::new(Point::default(), PRELAUNCHER_SIZE, PRELAUNCHER_SIZE);
        w.geometry.resizable = false;
        w
    }

    pub fn main() -> Self {
        Self::new(Point::default(), MAIN_SIZE, MAIN_MINIMUM_SIZE)
    }

    pub fn damage_meter(position: Point, opacity: f64) -> Self {
        let mut w = Self::new(position, DAMAGE_METER_SIZE, DAMAGE_METER_MINIMUM_SIZE);
        w.opacity = opacity;
        w
    }
}

pub struct Surface {
    kind: SurfaceKind,
    pub window: WindowState,
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl Surface {
    pub fn new(
        kind: SurfaceKind,
        window: WindowState,
        outbound: mpsc::UnboundedSender<Outbound>,
    ) -> Self {
        let surface = Self {
            kind,
            window,
            outbound,
        };
        surface.sync_window();
        surface
    }

    #[cfg(test)]
    pub fn kind(&self) -> SurfaceKind {
        self.kind
    }

    /// Best-effort delivery; a closed renderer is not an error.
    pub fn send(&self, channel: &str, payload: Value) {
        let message = Outbound {
            surface: self.kind,
            channel: channel.to_string(),
            payload,
        };
        if self.outbound.send(message).is_err() {
            debug!("[surface] Dropped '{channel}' for {:?}: renderer gone", self.kind);
        }
    }

    /// Publishes the current window state so the renderer can apply it.
    pub fn sync_window(&self) {
        match serde_json::to_value(self.window) {
            Ok(state) => self.send("window-state", state),
            Err(e) => debug!("[surface] Failed to serialize window state: {e}"),
        }
    }

    /// Un-minimizes, shows and focuses the window. Content is untouched.
    pub fn bring_to_front(&mut self) {
        self.window.visible = true;
        self.window.minimized = false;
        self.sync_window();
        self.send("focus", Value::Null);
    }

    pub fn set_minimized(&mut self, minimized: bool) {
        self.window.minimized = minimized;
        self.sync_window();
    }

    pub fn close(self) {
        self.send("close", Value::Null);
    }
}

/// All live surfaces. Each slot is empty until its window is created.
#[derive(Default)]
pub struct Surfaces {
    pub prelauncher: Option<Surface>,
    pub main: Option<Surface>,
    pub damage_meter: Option<Surface>,
}

impl Surfaces {
    pub fn get(&self, kind: SurfaceKind) -> Option<&Surface> {
        match kind {
            SurfaceKind::Prelauncher => self.prelauncher.as_ref(),
            SurfaceKind::Main => self.main.as_ref(),
            SurfaceKind::DamageMeter => self.damage_meter.as_ref(),
        }
    }

    /// Sends `payload` on `channel` to the main window and the damage meter.
    pub fn broadcast(&self, channel: &str, payload: &Value) {
        for surface in [self.main.as_ref(), self.damage_meter.as_ref()]
            .into_iter()
            .flatten()
        {
            surface.send(channel, payload.clone());
        }
    }
}
