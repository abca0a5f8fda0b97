/// Canonical file paths for LOA Details data files.
///
/// Persisted state lives under the platform data directory
/// (`%APPDATA%\loa-details\` on Windows):
///   - settings.toml      Versioned settings tree.
///   - window-state.toml  Last known damage meter position.
///
/// Session logs go to `Documents\Lost Ark Logs` unless the user picked a
/// custom folder.
use std::path::{Path, PathBuf};

const APP_DIR_NAME: &str = "loa-details";
const LOG_DIR_NAME: &str = "Lost Ark Logs";
pub const SETTINGS_FILE_NAME: &str = "settings.toml";
pub const WINDOW_STATE_FILE_NAME: &str = "window-state.toml";

/// Returns the application data directory, falling back to the temp dir on
/// platforms without a data directory.
pub fn app_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR_NAME)
}

pub fn settings_file_path() -> PathBuf {
    app_data_dir().join(SETTINGS_FILE_NAME)
}

pub fn window_state_file_path() -> PathBuf {
    app_data_dir().join(WINDOW_STATE_FILE_NAME)
}

/// Directory that receives session log files.
///
/// `custom` is the user's `general.customLogPath`; an empty string counts as unset.
pub fn log_dir(custom: Option<&str>) -> PathBuf {
    match custom.map(str::trim).filter(|s| !s.is_empty()) {
        Some(dir) => PathBuf::from(dir),
        None => default_log_dir(),
    }
}

fn default_log_dir() -> PathBuf {
    match dirs::document_dir() {
        Some(docs) => docs.join(LOG_DIR_NAME),
        None => app_data_dir().join("logs"),
    }
}

/// Sibling path used for write-then-rename persistence.
pub fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_data_dir_ends_with_app_name() {
        let dir = app_data_dir();
        assert_eq!(dir.file_name().unwrap(), APP_DIR_NAME);
    }

    #[test]
    fn persisted_files_share_same_parent_dir() {
        assert_eq!(
            settings_file_path().parent(),
            window_state_file_path().parent()
        );
        assert_eq!(settings_file_path().file_name().unwrap(), SETTINGS_FILE_NAME);
    }

    #[test]
    fn log_dir_prefers_custom_path() {
        let dir = log_dir(Some("/tmp/my-logs"));
        assert_eq!(dir, PathBuf::from("/tmp/my-logs"));
    }

    #[test]
    fn log_dir_ignores_blank_custom_path() {
        assert_eq!(log_dir(Some("   ")), log_dir(None));
    }

    #[test]
    fn temp_sibling_appends_suffix() {
        let path = PathBuf::from("/data/settings.toml");
        assert_eq!(temp_sibling(&path), PathBuf::from("/data/settings.toml.tmp"));
    }
}
