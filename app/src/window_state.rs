use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{error, warn};

use crate::geometry::Point;
use crate::store;

/// Window positions remembered across runs, stored in
/// `%APPDATA%\loa-details\window-state.toml`.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct WindowPositions {
    /// Top-left corner of the damage meter when the app last shut down.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub damage_meter: Option<Point>,
}

/// Reads the remembered positions. A missing or malformed file yields the
/// defaults, so the damage meter opens at its default position.
pub fn load_window_state(path: &Path) -> WindowPositions {
    let content = match store::read_optional(path) {
        Ok(Some(content)) => content,
        Ok(None) => return WindowPositions::default(),
        Err(e) => {
            warn!("[window-state] {e:#}");
            return WindowPositions::default();
        }
    };
    match toml::from_str(&content) {
        Ok(positions) => positions,
        Err(e) => {
            warn!("[window-state] Ignoring malformed {}: {e}", path.display());
            WindowPositions::default()
        }
    }
}

/// Serializes `positions` to TOML and writes it to `path`.
/// Logs errors rather than panicking: losing a window position must never
/// take the application down.
pub fn save_window_state(path: &Path, positions: &WindowPositions) {
    match toml::to_string_pretty(positions) {
        Ok(content) => {
            if let Err(e) = store::write_atomic(path, &content) {
                error!("[window-state] Failed to write window state: {e:#}");
            }
        }
        Err(e) => error!("[window-state] Failed to serialize window state: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let positions = load_window_state(&dir.path().join("window-state.toml"));
        assert_eq!(positions, WindowPositions::default());
    }

    #[test]
    fn save_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("window-state.toml");
        save_window_state(
            &path,
            &WindowPositions {
                damage_meter: Some(Point { x: 10, y: 20 }),
            },
        );
        assert!(path.exists());
    }

    #[test]
    fn saved_position_is_loaded_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("window-state.toml");
        let positions = WindowPositions {
            damage_meter: Some(Point { x: -1200, y: 340 }),
        };
        save_window_state(&path, &positions);

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("[damage_meter]"));
        assert_eq!(load_window_state(&path), positions);
    }

    #[test]
    fn empty_positions_omit_damage_meter_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("window-state.toml");
        save_window_state(&path, &WindowPositions::default());
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(!content.contains("damage_meter"));
    }

    #[test]
    fn malformed_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("window-state.toml");
        std::fs::write(&path, "damage_meter = \"left\"").unwrap();
        assert_eq!(load_window_state(&path), WindowPositions::default());
    }
}
