use crate::keys::{
    Binding, BindingError, CommandId, default_page_bindings, default_shell_bindings,
    ensure_unique_chords, parse_chord_spec,
};
use crate::relay::DEFAULT_EXCLUDED_CODES;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

const CONFIG_ENV: &str = "SKIFF_CONFIG";

/// The key tables and exclusions in effect after loading the runtime config.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct KeymapSnapshot {
    pub source: Option<String>,
    pub shell: Vec<Binding>,
    pub page: Vec<Binding>,
    pub excluded_codes: Vec<String>,
}

impl Default for KeymapSnapshot {
    fn default() -> Self {
        Self {
            source: None,
            shell: default_shell_bindings(),
            page: default_page_bindings(),
            excluded_codes: DEFAULT_EXCLUDED_CODES
                .iter()
                .map(|code| code.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RuntimeConfigWatcher {
    path: Option<PathBuf>,
    modified: Option<SystemTime>,
    pinned: bool,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct SkiffConfigFile {
    #[serde(default, alias = "bindings", alias = "keys")]
    keybindings: Vec<KeybindingSpec>,
    #[serde(default, alias = "exclude", alias = "passthrough_keys")]
    exclude_keys: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
struct KeybindingSpec {
    command: String,
    #[serde(alias = "chord")]
    key: String,
}

impl RuntimeConfigWatcher {
    pub fn discover() -> Self {
        Self {
            path: discover_config_path(),
            modified: None,
            pinned: false,
        }
    }

    /// Watch one file only, never falling back to discovery.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            modified: None,
            pinned: true,
        }
    }

    pub fn load_current(&mut self) -> Result<KeymapSnapshot> {
        let Some(path) = self.path.clone() else {
            return Ok(KeymapSnapshot::default());
        };
        if !path.exists() {
            self.modified = None;
            return Ok(KeymapSnapshot::default());
        }

        // Recorded before parsing so a broken file is reported once per edit.
        self.modified = fs::metadata(&path)
            .ok()
            .and_then(|meta| meta.modified().ok());
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("failed to read runtime config {}", path.display()))?;
        let parsed: SkiffConfigFile = if raw.trim().is_empty() {
            SkiffConfigFile::default()
        } else {
            serde_yaml::from_str(&raw)
                .with_context(|| format!("failed to parse runtime config {}", path.display()))?
        };

        build_keymap(parsed, &path)
            .with_context(|| format!("invalid key bindings in {}", path.display()))
    }

    pub fn reload_if_changed(&mut self) -> Result<Option<KeymapSnapshot>> {
        let Some(current_path) = self.path.clone() else {
            self.path = discover_config_path();
            if self.path.is_some() {
                return self.load_current().map(Some);
            }
            return Ok(None);
        };

        if !current_path.exists() {
            if self.modified.is_none() {
                return Ok(None);
            }
            self.modified = None;
            if !self.pinned {
                self.path = discover_config_path();
                if self.path.is_some() {
                    return self.load_current().map(Some);
                }
            }
            return Ok(Some(KeymapSnapshot::default()));
        }

        let modified = fs::metadata(&current_path)
            .ok()
            .and_then(|meta| meta.modified().ok());
        if modified != self.modified {
            return self.load_current().map(Some);
        }

        Ok(None)
    }
}

/// Overlay configured bindings on the defaults. A command named in the config
/// loses its default chord; shell and page tables are checked separately.
fn build_keymap(parsed: SkiffConfigFile, path: &Path) -> Result<KeymapSnapshot, BindingError> {
    let mut keymap = KeymapSnapshot {
        source: Some(path.display().to_string()),
        ..KeymapSnapshot::default()
    };

    let mut overridden = Vec::new();
    for spec in parsed.keybindings {
        let command = CommandId::from_token(&spec.command)
            .ok_or_else(|| BindingError::UnknownCommand(spec.command.clone()))?;
        let chord = parse_chord_spec(&spec.key)?;

        let table = if command.is_tab_command() {
            &mut keymap.shell
        } else {
            &mut keymap.page
        };
        if !overridden.contains(&command) {
            table.retain(|binding| binding.command != command);
            overridden.push(command);
        }
        table.push(Binding::new(command, chord));
    }

    ensure_unique_chords(&keymap.shell)?;
    ensure_unique_chords(&keymap.page)?;
    // A chord bound in both tables would only ever reach one window.
    let combined = keymap
        .shell
        .iter()
        .chain(&keymap.page)
        .cloned()
        .collect::<Vec<_>>();
    ensure_unique_chords(&combined)?;

    if let Some(codes) = parsed.exclude_keys {
        keymap.excluded_codes = codes
            .iter()
            .map(|code| parse_chord_spec(code).map(|chord| chord.code))
            .collect::<Result<Vec<_>, _>>()?;
    }
    Ok(keymap)
}

fn discover_config_path() -> Option<PathBuf> {
    if let Some(path) = std::env::var_os(CONFIG_ENV).filter(|path| !path.is_empty()) {
        return Some(PathBuf::from(path));
    }
    config_candidates(dirs::home_dir())
        .into_iter()
        .find(|candidate| candidate.exists())
}

/// Files in the working directory come before the per-user ones.
fn config_candidates(home: Option<PathBuf>) -> Vec<PathBuf> {
    let mut candidates = ["skiff.yaml", "skiff.yml", ".skiff.yaml"]
        .map(PathBuf::from)
        .to_vec();
    if let Some(home) = home {
        let user_dir = home.join(".config").join("skiff");
        candidates.extend([
            user_dir.join("config.yaml"),
            user_dir.join("config.yml"),
            home.join(".skiff.yaml"),
        ]);
    }
    candidates
}
