use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const FILENAME: &str = "preferences.toml";

pub trait PreferenceStore {
    fn load(&self, key: &str) -> Option<String>;
    fn save(&mut self, key: &str, value: &str) -> Result<()>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PreferenceFile {
    #[serde(default)]
    values: BTreeMap<String, String>,
}

/// Preferences kept in `<dir>/preferences.toml` under a `[values]` table.
/// An unreadable file behaves as empty.
#[derive(Debug, Clone)]
pub struct TomlFileStore {
    path: PathBuf,
}

impl TomlFileStore {
    pub fn new(dir: &Path) -> Self {
        Self {
            path: dir.join(FILENAME),
        }
    }

    /// The store under `$CODEX_LOG_VIEW_PREFS_DIR`, or the platform config
    /// directory. `None` when neither is available.
    pub fn default_location() -> Option<Self> {
        let dir = std::env::var_os("CODEX_LOG_VIEW_PREFS_DIR")
            .map(PathBuf::from)
            .or_else(|| dirs::config_dir().map(|d| d.join("codex-log-view")))?;
        Some(Self::new(&dir))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<PreferenceFile> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => toml::from_str(&contents)
                .with_context(|| format!("parsing {}", self.path.display())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(PreferenceFile::default()),
            Err(e) => Err(e).with_context(|| format!("reading {}", self.path.display())),
        }
    }

    fn write(&self, file: &PreferenceFile) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let contents = toml::to_string_pretty(file).context("serializing preferences")?;
        fs::write(&self.path, contents)
            .with_context(|| format!("writing {}", self.path.display()))
    }
}

impl PreferenceStore for TomlFileStore {
    fn load(&self, key: &str) -> Option<String> {
        match self.read() {
            Ok(mut file) => file.values.remove(key),
            Err(err) => {
                warn!("preference store unreadable, using defaults: {err:#}");
                None
            }
        }
    }

    fn save(&mut self, key: &str, value: &str) -> Result<()> {
        // An unreadable file is replaced rather than blocking the write.
        let mut file = self.read().unwrap_or_default();
        file.values.insert(key.to_string(), value.to_string());
        self.write(&file)?;
        debug!(path = %self.path.display(), %key, "saved preference");
        Ok(())
    }
}

/// Process-lifetime store, used when no preference directory exists.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: BTreeMap<String, String>,
}

impl PreferenceStore for MemoryStore {
    fn load(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn save(&mut self, key: &str, value: &str) -> Result<()> {
        self.values.insert(key.to_string(), value.to_string());
        Ok(())
    }
}
