/// Window geometry bookkeeping for the damage meter's compact toggle.
///
/// Entering compact mode shrinks the window to a fixed size while keeping its
/// bottom-right corner in place; leaving it restores the exact geometry that
/// was captured on entry. Only the most recent snapshot is kept.
use serde::{Deserialize, Serialize};

/// Compact damage meter size in pixels.
pub const COMPACT_SIZE: Size = Size {
    width: 160,
    height: 64,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

/// Live geometry of a window as the manager sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Geometry {
    pub position: Point,
    pub size: Size,
    pub minimum_size: Size,
    pub resizable: bool,
}

/// What gets restored on exit from compact mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeometrySnapshot {
    pub position: Point,
    pub size: Size,
    pub minimum_size: Size,
}

impl From<&Geometry> for GeometrySnapshot {
    fn from(g: &Geometry) -> Self {
        Self {
            position: g.position,
            size: g.size,
            minimum_size: g.minimum_size,
        }
    }
}

/// Position that keeps the bottom-right corner of `size` at `position` fixed
/// when the window is resized to `target`.
pub fn anchor_bottom_right(position: Point, size: Size, target: Size) -> Point {
    Point {
        x: position.x + size.width as i32 - target.width as i32,
        y: position.y + size.height as i32 - target.height as i32,
    }
}

#[derive(Debug, Default)]
pub struct GeometryManager {
    snapshot: Option<GeometrySnapshot>,
}

impl GeometryManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Captures `window` and shrinks it to `target`, anchored bottom-right.
    /// Any earlier snapshot is overwritten.
    pub fn enter_compact_mode(&mut self, window: &mut Geometry, target: Size) {
        self.snapshot = Some(GeometrySnapshot::from(&*window));

        window.resizable = false;
        window.minimum_size = target;
        window.position = anchor_bottom_right(window.position, window.size, target);
        window.size = target;
    }

    /// Restores the snapshot taken by [`enter_compact_mode`](Self::enter_compact_mode).
    /// Without a snapshot the window is left untouched.
    pub fn exit_compact_mode(&mut self, window: &mut Geometry) {
        let Some(snapshot) = self.snapshot.take() else {
            return;
        };
        window.resizable = true;
        window.minimum_size = snapshot.minimum_size;
        window.size = snapshot.size;
        window.position = snapshot.position;
    }

    pub fn is_compact(&self) -> bool {
        self.snapshot.is_some()
    }

    #[cfg(test)]
    pub fn snapshot(&self) -> Option<&GeometrySnapshot> {
        self.snapshot.as_ref()
    }

    /// Where the window should be remembered: the pre-compact position while
    /// compact, otherwise `current`.
    pub fn resting_position(&self, current: Point) -> Point {
        self.snapshot.map(|s| s.position).unwrap_or(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window() -> Geometry {
        Geometry {
            position: Point { x: 300, y: 200 },
            size: Size {
                width: 500,
                height: 350,
            },
            minimum_size: Size {
                width: 360,
                height: 124,
            },
            resizable: true,
        }
    }

    #[test]
    fn enter_compact_anchors_bottom_right() {
        let mut manager = GeometryManager::new();
        let mut w = window();
        manager.enter_compact_mode(&mut w, COMPACT_SIZE);

        assert_eq!(w.size, COMPACT_SIZE);
        assert_eq!(w.minimum_size, COMPACT_SIZE);
        assert_eq!(w.position, Point { x: 640, y: 486 });
        assert!(!w.resizable);
        assert!(manager.is_compact());
    }

    #[test]
    fn compact_round_trip_restores_exact_geometry() {
        let mut manager = GeometryManager::new();
        let original = window();
        let mut w = original;

        manager.enter_compact_mode(&mut w, COMPACT_SIZE);
        manager.exit_compact_mode(&mut w);

        assert_eq!(w, original);
        assert!(manager.snapshot().is_none());
    }

    #[test]
    fn exit_without_snapshot_is_noop() {
        let mut manager = GeometryManager::new();
        let original = window();
        let mut w = original;
        manager.exit_compact_mode(&mut w);
        assert_eq!(w, original);
    }

    #[test]
    fn snapshot_is_consumed_once() {
        let mut manager = GeometryManager::new();
        let original = window();
        let mut w = original;
        manager.enter_compact_mode(&mut w, COMPACT_SIZE);
        manager.exit_compact_mode(&mut w);

        w.position = Point { x: 5, y: 5 };
        manager.exit_compact_mode(&mut w);
        assert_eq!(w.position, Point { x: 5, y: 5 });
    }

    #[test]
    fn re_entering_overwrites_snapshot() {
        let mut manager = GeometryManager::new();
        let mut w = window();
        manager.enter_compact_mode(&mut w, COMPACT_SIZE);
        let compact = w;
        manager.enter_compact_mode(&mut w, COMPACT_SIZE);

        assert_eq!(manager.snapshot(), Some(&GeometrySnapshot::from(&compact)));
    }

    #[test]
    fn anchor_can_go_negative() {
        let p = anchor_bottom_right(
            Point { x: 0, y: 0 },
            Size {
                width: 100,
                height: 20,
            },
            COMPACT_SIZE,
        );
        assert_eq!(p, Point { x: -60, y: -44 });
    }

    #[test]
    fn resting_position_prefers_snapshot() {
        let mut manager = GeometryManager::new();
        let mut w = window();
        assert_eq!(manager.resting_position(w.position), w.position);
        manager.enter_compact_mode(&mut w, COMPACT_SIZE);
        assert_eq!(manager.resting_position(w.position), Point { x: 300, y: 200 });
    }
}
