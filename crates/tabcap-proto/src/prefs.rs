use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::protocol::{TabId, MAX_CAP};

/// A fresh tab starts uncapped at the top of the range.
pub const DEFAULT_CAP: u8 = MAX_CAP as u8;

/// The per-tab settings that survive engine restarts.  Written only at
/// session boundaries (start/stop/cap change/visual toggle), never from
/// inside the control loop.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TabPrefs {
    pub enabled: bool,
    #[serde(default = "default_cap")]
    pub cap: u8,
    #[serde(default)]
    pub visual_hidden: bool,
}

impl Default for TabPrefs {
    fn default() -> Self {
        Self {
            enabled: false,
            cap: DEFAULT_CAP,
            visual_hidden: false,
        }
    }
}

fn default_cap() -> u8 {
    DEFAULT_CAP
}

/// JSON-backed map of tab id → prefs.  Unknown or unreadable files yield an
/// empty map; a missing tab reads as `TabPrefs::default()`.
pub struct PrefsStore {
    prefs: HashMap<TabId, TabPrefs>,
    prefs_file: PathBuf,
}

impl PrefsStore {
    pub fn new(prefs_file: PathBuf) -> Self {
        let prefs = Self::load_file(&prefs_file);
        Self { prefs, prefs_file }
    }

    pub fn get(&self, tab_id: TabId) -> TabPrefs {
        self.prefs.get(&tab_id).copied().unwrap_or_default()
    }

    pub fn tabs(&self) -> impl Iterator<Item = TabId> + '_ {
        self.prefs.keys().copied()
    }

    pub async fn set(&mut self, tab_id: TabId, prefs: TabPrefs) -> anyhow::Result<()> {
        self.prefs.insert(tab_id, prefs);
        self.save().await
    }

    pub async fn remove(&mut self, tab_id: TabId) -> anyhow::Result<()> {
        if self.prefs.remove(&tab_id).is_some() {
            self.save().await?;
        }
        Ok(())
    }

    /// Drop every stored pref.  Run on first install / factory reset.
    pub async fn clear(&mut self) -> anyhow::Result<()> {
        self.prefs.clear();
        self.save().await
    }

    async fn save(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.prefs_file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(&self.prefs)?;
        tokio::fs::write(&self.prefs_file, json).await?;
        Ok(())
    }

    fn load_file(path: &PathBuf) -> HashMap<TabId, TabPrefs> {
        if let Ok(content) = std::fs::read_to_string(path) {
            if let Ok(prefs) = serde_json::from_str::<HashMap<TabId, TabPrefs>>(&content) {
                return prefs;
            }
        }
        HashMap::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.json");

        let mut store = PrefsStore::new(path.clone());
        store
            .set(
                12,
                TabPrefs {
                    enabled: true,
                    cap: 65,
                    visual_hidden: true,
                },
            )
            .await
            .unwrap();

        let reloaded = PrefsStore::new(path);
        assert_eq!(
            reloaded.get(12),
            TabPrefs {
                enabled: true,
                cap: 65,
                visual_hidden: true,
            }
        );
        // Unknown tab falls back to defaults
        assert_eq!(reloaded.get(99), TabPrefs::default());
    }

    #[test]
    fn test_corrupt_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.json");
        std::fs::write(&path, "not json {{{").unwrap();

        let store = PrefsStore::new(path);
        assert_eq!(store.get(1), TabPrefs::default());
    }

    #[tokio::test]
    async fn test_remove_unknown_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.json");

        let mut store = PrefsStore::new(path.clone());
        store.remove(5).await.unwrap();
        // No file written since nothing changed
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_clear() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.json");

        let mut store = PrefsStore::new(path.clone());
        store.set(1, TabPrefs::default()).await.unwrap();
        store.set(2, TabPrefs::default()).await.unwrap();
        store.clear().await.unwrap();

        let reloaded = PrefsStore::new(path);
        assert_eq!(reloaded.tabs().count(), 0);
    }

    #[test]
    fn default_cap_is_top_of_range() {
        assert_eq!(TabPrefs::default().cap as u16, MAX_CAP);
        assert!(!TabPrefs::default().enabled);
    }
}
