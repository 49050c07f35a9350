//! Two-tier key/value storage shim
//!
//! Mirrors the page-side storage helper: a persistent `local` tier and an
//! ephemeral `session` tier. Reads fall back from local to session; removal
//! and clearing apply to both tiers. The local tier can be backed by a JSON
//! file under the app data directory; the session tier is memory only.

use hashbrown::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

use carewave_common::{CareWaveError, Result, ResultExt};

/// A single storage tier.
#[derive(Debug, Default)]
pub struct StorageArea {
    data: HashMap<String, String>,
}

impl StorageArea {
    /// Create an empty tier.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a value by key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.data.get(key).map(|v| v.as_str())
    }

    /// Set a value.
    pub fn set(&mut self, key: &str, value: &str) {
        self.data.insert(key.to_string(), value.to_string());
    }

    /// Remove a key. Returns whether it was present.
    pub fn remove(&mut self, key: &str) -> bool {
        self.data.remove(key).is_some()
    }

    /// Remove every key.
    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the tier is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// The two-tier storage shim.
#[derive(Debug, Default)]
pub struct Storage {
    local: StorageArea,
    session: StorageArea,
    persist_path: Option<PathBuf>,
}

impl Storage {
    /// Memory-only storage, both tiers ephemeral.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Storage whose local tier is backed by a JSON file. Existing content
    /// at the path is loaded; a missing file starts empty.
    pub fn persistent(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let local = match load_tier(&path)? {
            Some(data) => StorageArea { data },
            None => StorageArea::new(),
        };

        Ok(Self {
            local,
            session: StorageArea::new(),
            persist_path: Some(path),
        })
    }

    /// Persistent storage under the platform data directory.
    pub fn at_default_path() -> Result<Self> {
        let dir = dirs::data_dir()
            .ok_or_else(|| CareWaveError::storage("no platform data directory"))?;
        Self::persistent(dir.join("carewave").join("local_storage.json"))
    }

    /// Get a value: local tier first, session tier as fallback.
    pub fn get_item(&self, key: &str) -> Option<&str> {
        self.local.get(key).or_else(|| self.session.get(key))
    }

    /// Set a value in the local (persistent) or session tier.
    pub fn set_item(&mut self, key: &str, value: &str, persistent: bool) -> Result<()> {
        if persistent {
            self.local.set(key, value);
            self.flush()
        } else {
            self.session.set(key, value);
            Ok(())
        }
    }

    /// Remove a key from both tiers.
    pub fn remove_item(&mut self, key: &str) -> Result<()> {
        self.local.remove(key);
        self.session.remove(key);
        self.flush()
    }

    /// Clear both tiers.
    pub fn clear(&mut self) -> Result<()> {
        self.local.clear();
        self.session.clear();
        self.flush()
    }

    /// Write the local tier to its backing file, if any.
    fn flush(&self) -> Result<()> {
        let path = match self.persist_path {
            Some(ref path) => path,
            None => return Ok(()),
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string(&self.local.data).context("serializing local storage")?;
        std::fs::write(path, json)?;
        debug!(path = %path.display(), keys = self.local.len(), "flushed local storage");
        Ok(())
    }
}

fn load_tier(path: &Path) -> Result<Option<HashMap<String, String>>> {
    if !path.exists() {
        return Ok(None);
    }

    let raw = std::fs::read_to_string(path)?;
    let data = serde_json::from_str(&raw).context("parsing local storage file")?;
    Ok(Some(data))
}
