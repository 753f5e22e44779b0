use crate::tabs::TabSetSnapshot;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

const APP_DIR: &str = "skiff";
const TABS_FILE: &str = "tabs.yml";

/// Keeps the tab set in a YAML file so tabs survive restarts.
#[derive(Debug, Clone)]
pub struct TabFileStore {
    path: PathBuf,
}

impl TabFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store under the user cache directory, e.g. `~/.cache/skiff/tabs.yml`.
    pub fn in_cache_dir() -> Result<Self> {
        let base = dirs::cache_dir().context("unable to locate a user cache directory")?;
        Ok(Self::new(base.join(APP_DIR).join(TABS_FILE)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `Ok(None)` when there is nothing saved yet.
    pub fn read(&self) -> Result<Option<TabSetSnapshot>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("unable to read tabs file {}", self.path.display()))?;
        if raw.trim().is_empty() {
            return Ok(None);
        }

        let snapshot = serde_yaml::from_str(&raw)
            .with_context(|| format!("unable to parse tabs file {}", self.path.display()))?;
        Ok(Some(snapshot))
    }

    pub fn write(&self, snapshot: &TabSetSnapshot) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("unable to create {}", parent.display()))?;
        }

        let raw = serde_yaml::to_string(snapshot).context("unable to serialize tabs")?;
        fs::write(&self.path, raw)
            .with_context(|| format!("unable to write tabs file {}", self.path.display()))?;
        Ok(())
    }
}
