/// Desktop shell integration: opening folders and links, and the folder picker.
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{bail, Context, Result};
use url::Url;

pub trait Shell: Send + Sync {
    /// Opens `path` in the platform file manager.
    fn open_path(&self, path: &Path) -> Result<()>;
    /// Opens an http(s) link in the default browser.
    fn open_url(&self, url: &str) -> Result<()>;
    /// Shows a blocking folder picker. `Ok(None)` means the user cancelled.
    fn pick_directory(&self) -> Result<Option<PathBuf>>;
}

/// Only web links may be handed to the OS opener.
pub fn validate_link(raw: &str) -> Result<Url> {
    let url = Url::parse(raw.trim()).with_context(|| format!("Invalid link {raw:?}"))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => bail!("Refusing to open {other}: link {raw:?}"),
    }
}

#[derive(Debug, Default)]
pub struct SystemShell;

impl SystemShell {
    fn opener() -> Command {
        if cfg!(target_os = "macos") {
            Command::new("open")
        } else if cfg!(target_os = "windows") {
            Command::new("explorer")
        } else {
            Command::new("xdg-open")
        }
    }
}

impl Shell for SystemShell {
    fn open_path(&self, path: &Path) -> Result<()> {
        std::fs::create_dir_all(path)
            .with_context(|| format!("Failed to create directory {}", path.display()))?;
        Self::opener()
            .arg(path)
            .spawn()
            .with_context(|| format!("Failed to open {}", path.display()))?;
        Ok(())
    }

    fn open_url(&self, url: &str) -> Result<()> {
        let url = validate_link(url)?;
        Self::opener()
            .arg(url.as_str())
            .spawn()
            .with_context(|| format!("Failed to open {url}"))?;
        Ok(())
    }

    fn pick_directory(&self) -> Result<Option<PathBuf>> {
        Ok(rfd::FileDialog::new()
            .set_title("Select the Lost Ark log folder")
            .pick_folder())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn web_links_are_accepted() {
        assert!(validate_link("https://github.com/lost-ark-dev/loa-details").is_ok());
        assert!(validate_link(" http://example.com/ ").is_ok());
    }

    #[test]
    fn non_web_links_are_rejected() {
        assert!(validate_link("file:///C:/Windows/System32").is_err());
        assert!(validate_link("javascript:alert(1)").is_err());
        assert!(validate_link("not a url").is_err());
    }
}
