use anyhow::{bail, Context, Result};
use notify::{Config as NotifyConfig, RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::event::AppEvent;
use crate::store;

/// Schema version written next to the settings tree.
pub const SETTINGS_VERSION: u32 = 1;
pub const DEFAULT_OPACITY: f64 = 0.9;
pub const DEFAULT_LISTEN_PORT: u16 = 6040;
pub const DEFAULT_MINIMIZE_SHORTCUT: &str = "CommandOrControl+Down";
pub const DEFAULT_RESET_SHORTCUT: &str = "CommandOrControl+Up";
pub const DEFAULT_PAUSE_SHORTCUT: &str = "CommandOrControl+Right";

/// Root settings tree. Field names follow the renderer's camelCase keys so the
/// same tree can be broadcast to every surface unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub app_version: String,
    pub general: GeneralSettings,
    pub shortcuts: ShortcutSettings,
    pub uploads: UploadSettings,
    pub damage_meter: DamageMeterSettings,
    pub logs: LogSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Server {
    Steam,
    Kr,
    Ru,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneralSettings {
    pub start_main_hidden: bool,
    pub start_main_minimized: bool,
    pub close_to_system_tray: bool,
    pub save_screenshots: bool,
    pub server: Server,
    /// Folder that receives session logs. `None` means the documents folder.
    pub custom_log_path: Option<String>,
    pub use_raw_socket: bool,
    pub listen_port: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShortcutBinding {
    pub value: String,
    pub default_value: String,
}

impl ShortcutBinding {
    fn new(accelerator: &str) -> Self {
        Self {
            value: accelerator.to_string(),
            default_value: accelerator.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShortcutSettings {
    pub minimize_damage_meter: ShortcutBinding,
    pub reset_session: ShortcutBinding,
    pub pause_damage_meter: ShortcutBinding,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionalValue {
    pub value: Option<String>,
    pub default_value: Option<String>,
}

impl OptionalValue {
    fn from_build_env(value: Option<&'static str>) -> Self {
        Self {
            value: value.map(str::to_string),
            default_value: value.map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSettings {
    pub upload_logs: bool,
    pub upload_key: String,
    pub api: OptionalValue,
    pub endpoint: OptionalValue,
    pub site: OptionalValue,
    pub open_on_upload: bool,
    pub upload_unlisted: bool,
    pub include_region: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionalitySettings {
    pub dont_reset_on_zone_change: bool,
    pub remove_overkill_damage: bool,
    pub pause_on_phase_transition: bool,
    pub reset_after_phase_transition: bool,
    pub auto_minimize: bool,
    pub auto_minimize_timer: u32,
    pub minimize_to_taskbar: bool,
    pub name_display: String,
    pub name_display_v2: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DesignSettings {
    pub compact_design: bool,
    pub pin_user_to_top: bool,
    pub transparency: bool,
    pub opacity: f64,
}

/// One row of the header/tab visibility tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnToggle {
    pub name: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassColor {
    pub color: String,
    pub default_color: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DamageMeterSettings {
    pub functionality: FunctionalitySettings,
    pub design: DesignSettings,
    pub header: BTreeMap<String, ColumnToggle>,
    pub tabs: BTreeMap<String, ColumnToggle>,
    pub classes: BTreeMap<String, ClassColor>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogSettings {
    pub minimum_session_duration_in_minutes: f64,
    pub minimum_encounter_duration_in_minutes: f64,
    pub minimum_duration_in_minutes: f64,
    pub split_on_phase_transition: bool,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for Settings {
    fn default() -> Self {
        Self {
            app_version: String::new(),
            general: GeneralSettings::default(),
            shortcuts: ShortcutSettings::default(),
            uploads: UploadSettings::default(),
            damage_meter: DamageMeterSettings::default(),
            logs: LogSettings::default(),
        }
    }
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            start_main_hidden: false,
            start_main_minimized: false,
            close_to_system_tray: true,
            save_screenshots: true,
            server: Server::Steam,
            custom_log_path: None,
            use_raw_socket: false,
            listen_port: DEFAULT_LISTEN_PORT,
        }
    }
}

impl Default for ShortcutSettings {
    fn default() -> Self {
        Self {
            minimize_damage_meter: ShortcutBinding::new(DEFAULT_MINIMIZE_SHORTCUT),
            reset_session: ShortcutBinding::new(DEFAULT_RESET_SHORTCUT),
            pause_damage_meter: ShortcutBinding::new(DEFAULT_PAUSE_SHORTCUT),
        }
    }
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            upload_logs: false,
            upload_key: String::new(),
            api: OptionalValue::from_build_env(option_env!("UPLOADS_API_URL")),
            endpoint: OptionalValue::from_build_env(option_env!("UPLOADS_ENDPOINT")),
            site: OptionalValue::from_build_env(option_env!("UPLOADS_LOGIN_URL")),
            open_on_upload: false,
            upload_unlisted: true,
            include_region: false,
        }
    }
}

impl Default for FunctionalitySettings {
    fn default() -> Self {
        Self {
            dont_reset_on_zone_change: false,
            remove_overkill_damage: true,
            pause_on_phase_transition: true,
            reset_after_phase_transition: true,
            auto_minimize: false,
            auto_minimize_timer: 60,
            minimize_to_taskbar: false,
            name_display: "name+class".to_string(),
            name_display_v2: "name+gear+class".to_string(),
        }
    }
}

impl Default for DesignSettings {
    fn default() -> Self {
        Self {
            compact_design: false,
            pin_user_to_top: false,
            transparency: true,
            opacity: DEFAULT_OPACITY,
        }
    }
}

impl Default for DamageMeterSettings {
    fn default() -> Self {
        Self {
            functionality: FunctionalitySettings::default(),
            design: DesignSettings::default(),
            header: toggles(&[
                ("damage", "Damage", true),
                ("dps", "DPS", true),
                ("tank", "Tanked", false),
                ("bossHP", "Boss HP", false),
            ]),
            tabs: toggles(&[
                ("damage", "Damage/Tanked", true),
                ("deathTime", "Death Time", false),
                ("damagePercent", "D% (Damage Percent)", true),
                ("dps", "DPS/TPS", true),
                ("critRate", "Crit Rate", true),
                ("dBuffedBySup", "Dmg % buffed by Support", false),
                ("dDebuffedBySup", "Dmg % debuffed by Support", false),
                ("dBuffed", "Dmg % Buffed", false),
                ("dDebuffed", "Dmg % Debuffed", false),
                ("faRate", "Front Attack Rate", true),
                ("baRate", "Back Attack Rate", true),
                ("counterCount", "Counter Count", true),
                ("hBuffedBySup", "Hit % buffed by Support", false),
                ("hDebuffedBySup", "Hit % debuffed by Support", false),
                ("hBuffed", "Hit % Buffed", false),
                ("hDebuffed", "Hit % Debuffed", false),
                ("maxDmg", "Skill View / Max Damage", true),
                ("avgDmg", "Skill View / Average Damage", true),
                ("totalHits", "Skill View / Total Hits", true),
                ("hpm", "Skill View / Hits per Minute", true),
            ]),
            classes: BTreeMap::new(),
        }
    }
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            minimum_session_duration_in_minutes: 1.0,
            minimum_encounter_duration_in_minutes: 0.5,
            minimum_duration_in_minutes: 0.0,
            split_on_phase_transition: true,
        }
    }
}

fn toggles(rows: &[(&str, &str, bool)]) -> BTreeMap<String, ColumnToggle> {
    rows.iter()
        .map(|(key, name, enabled)| {
            (
                key.to_string(),
                ColumnToggle {
                    name: name.to_string(),
                    enabled: *enabled,
                },
            )
        })
        .collect()
}

// ── Merge ─────────────────────────────────────────────────────────────────────

/// Recursively merges `overlay` into `base`.
///
/// Objects merge key by key, so a key that only exists in `base` is never
/// removed. A `null` in the overlay never clobbers an existing value. Any other
/// overlay value replaces the base value outright.
pub fn merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(slot) => merge(slot, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (_, Value::Null) => {}
        (slot, value) => *slot = value,
    }
}

/// The immutable default tree as a JSON value.
pub fn default_tree() -> Value {
    serde_json::to_value(Settings::default()).unwrap_or_default()
}

/// Merges `overlay` onto the default tree and deserializes the result.
/// Fails when the merged tree no longer has the expected shape.
pub fn from_overlay(overlay: Value) -> Result<Settings> {
    let mut tree = default_tree();
    merge(&mut tree, overlay);
    serde_json::from_value(tree).context("Settings tree has an unexpected shape")
}

/// Decodes a `save-settings` payload: either a JSON string or an object.
pub fn from_payload(value: &Value) -> Result<Settings> {
    match value {
        Value::String(raw) => {
            let overlay: Value =
                serde_json::from_str(raw).context("Settings payload is not valid JSON")?;
            from_overlay(overlay)
        }
        Value::Object(_) => from_overlay(value.clone()),
        other => bail!("Settings payload must be a string or an object, got {other}"),
    }
}

// ── Persistence ───────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct PersistedSettings<'a> {
    version: u32,
    settings: &'a Settings,
}

/// Loads and saves the settings tree at a fixed path.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the persisted settings merged onto the defaults.
    ///
    /// A missing, unreadable or malformed file is logged and yields the defaults.
    pub fn load(&self) -> Settings {
        match read_settings(&self.path) {
            Ok(Some(settings)) => {
                info!("[settings] Found and applied settings");
                settings
            }
            Ok(None) => {
                info!("[settings] No saved settings at {}, using defaults", self.path.display());
                Settings::default()
            }
            Err(e) => {
                warn!("[settings] Setting retrieval failed (using defaults): {e:#}");
                Settings::default()
            }
        }
    }

    /// Persists `settings`. Errors are logged; the caller's copy stays authoritative.
    pub fn save(&self, settings: &Settings) {
        match self.write(settings) {
            Ok(()) => info!("[settings] Saved settings to {}", self.path.display()),
            Err(e) => error!("[settings] Failed to save settings: {e:#}"),
        }
    }

    fn write(&self, settings: &Settings) -> Result<()> {
        let content = toml::to_string_pretty(&PersistedSettings {
            version: SETTINGS_VERSION,
            settings,
        })
        .context("Failed to serialize settings")?;
        store::write_atomic(&self.path, &content)
    }
}

/// Reads the settings document at `path`. `Ok(None)` means nothing was saved yet.
pub fn read_settings(path: &Path) -> Result<Option<Settings>> {
    let Some(content) = store::read_optional(path)? else {
        return Ok(None);
    };
    let doc: Value = toml::from_str(&content)
        .with_context(|| format!("Failed to parse settings file: {}", path.display()))?;

    if let Some(version) = doc.get("version").and_then(Value::as_u64) {
        if version > u64::from(SETTINGS_VERSION) {
            warn!("[settings] Settings were written by a newer version ({version}); unknown keys are kept");
        }
    }

    let overlay = match doc.get("settings") {
        None => return Ok(None),
        // Older builds stored the tree as a JSON string.
        Some(Value::String(raw)) => {
            serde_json::from_str(raw).context("Stored settings string is not valid JSON")?
        }
        Some(tree) => tree.clone(),
    };
    from_overlay(overlay).map(Some)
}

/// Watches the settings file's directory and sends [`AppEvent::SettingsReloaded`]
/// whenever the file is created or modified and still parses.
pub async fn watch_settings(path: PathBuf, tx: mpsc::Sender<AppEvent>) {
    let (watch_tx, mut watch_rx) = mpsc::channel::<notify::Event>(16);

    let mut watcher = match RecommendedWatcher::new(
        move |res: notify::Result<notify::Event>| {
            if let Ok(event) = res {
                let _ = watch_tx.blocking_send(event);
            }
        },
        NotifyConfig::default(),
    ) {
        Ok(w) => w,
        Err(e) => {
            warn!("[settings] Failed to create file watcher: {e}");
            return;
        }
    };

    // Watch the parent so write-then-rename saves are seen.
    let watch_dir = match path.parent() {
        Some(d) => d.to_path_buf(),
        None => {
            warn!("[settings] Settings path has no parent directory");
            return;
        }
    };

    if let Err(e) = watcher.watch(&watch_dir, RecursiveMode::NonRecursive) {
        warn!("[settings] Failed to watch settings directory: {e}");
        return;
    }

    while let Some(event) = watch_rx.recv().await {
        let affects_settings = event.paths.iter().any(|p| p == path.as_path());
        let is_write = matches!(
            event.kind,
            notify::EventKind::Create(_) | notify::EventKind::Modify(_)
        );

        if affects_settings && is_write {
            match read_settings(&path) {
                Ok(Some(settings)) => {
                    if tx.send(AppEvent::SettingsReloaded(settings)).await.is_err() {
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) => warn!("[settings] Failed to reload settings: {e:#}"),
            }
        }
    }
}
