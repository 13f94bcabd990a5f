//! Durable key-value preferences (the persisted volume lives here).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use crate::error::Result;

/// Key under which the last-set volume is stored.
pub const VOLUME_KEY: &str = "bb_vol";

/// String-to-string storage that survives restarts.
pub trait KeyValueStore: Send + Sync {
    /// Reads a value.
    fn get(&self, key: &str) -> Option<String>;

    /// Writes a value durably.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be persisted.
    fn set(&self, key: &str, value: &str) -> Result<()>;
}

/// Preferences kept in memory only.
#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    values: Mutex<BTreeMap<String, String>>,
}

impl MemoryKeyValueStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Preferences stored as a flat TOML table in a single file.
///
/// The whole file is rewritten on every `set` (tmp file + rename).
#[derive(Debug)]
pub struct FileKeyValueStore {
    path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
}

impl FileKeyValueStore {
    /// Opens the store at `path`, loading existing values if the file exists.
    ///
    /// An unreadable or corrupt file is logged and treated as empty.
    #[must_use]
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let values = match std::fs::read_to_string(&path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                log::warn!("Ignoring corrupt preferences file {}: {e}", path.display());
                BTreeMap::new()
            }),
            Err(_) => BTreeMap::new(),
        };
        Self {
            path,
            values: Mutex::new(values),
        }
    }

    /// Default location: `$XDG_DATA_HOME/bearbang/prefs.toml`.
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("bearbang")
            .join("prefs.toml")
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self, values: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let tmp_path = self.path.with_extension("toml.tmp");
        std::fs::write(&tmp_path, toml::to_string(values)?)?;
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

impl KeyValueStore for FileKeyValueStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.insert(key.to_string(), value.to_string());
        self.save(&values)
    }
}

/// Reads the persisted volume, falling back to `default` when absent,
/// unparsable, or not finite.
#[must_use]
pub fn load_volume(store: &dyn KeyValueStore, default: f32) -> f32 {
    let Some(raw) = store.get(VOLUME_KEY) else {
        return default;
    };
    raw.trim()
        .parse::<f32>()
        .ok()
        .filter(|v| v.is_finite())
        .unwrap_or_else(|| {
            log::warn!("Ignoring invalid stored volume {raw:?}");
            default
        })
}

/// Persists the volume as a numeric string.
///
/// # Errors
///
/// Returns an error if the store cannot write.
pub fn save_volume(store: &dyn KeyValueStore, volume: f32) -> Result<()> {
    store.set(VOLUME_KEY, &volume.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn volume_defaults_when_absent_or_invalid() {
        let store = MemoryKeyValueStore::new();
        assert!((load_volume(&store, 0.9) - 0.9).abs() < f32::EPSILON);

        store.set(VOLUME_KEY, "loud").unwrap();
        assert!((load_volume(&store, 0.9) - 0.9).abs() < f32::EPSILON);
    }

    #[test]
    fn non_finite_volume_falls_back_to_default() {
        let store = MemoryKeyValueStore::new();
        for raw in ["NaN", "nan", "inf", "-inf", "infinity"] {
            store.set(VOLUME_KEY, raw).unwrap();
            assert!((load_volume(&store, 0.9) - 0.9).abs() < f32::EPSILON, "{raw}");
        }
    }

    #[test]
    fn volume_round_trips_as_numeric_string() {
        let store = MemoryKeyValueStore::new();
        save_volume(&store, 0.25).unwrap();
        assert_eq!(store.get(VOLUME_KEY).as_deref(), Some("0.25"));
        assert!((load_volume(&store, 0.9) - 0.25).abs() < f32::EPSILON);
    }

    #[test]
    fn file_store_persists_across_instances() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("prefs.toml");

        let store = FileKeyValueStore::open(&path);
        assert_eq!(store.get(VOLUME_KEY), None);
        store.set(VOLUME_KEY, "0.4").unwrap();

        let reopened = FileKeyValueStore::open(&path);
        assert_eq!(reopened.get(VOLUME_KEY).as_deref(), Some("0.4"));
        assert_eq!(reopened.path(), path.as_path());
    }

    #[test]
    fn corrupt_file_is_treated_as_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("prefs.toml");
        std::fs::write(&path, "this is = = not toml").unwrap();

        let store = FileKeyValueStore::open(&path);
        assert_eq!(store.get(VOLUME_KEY), None);
        store.set(VOLUME_KEY, "0.5").unwrap();
        assert_eq!(FileKeyValueStore::open(&path).get(VOLUME_KEY).as_deref(), Some("0.5"));
    }

    #[test]
    fn default_path_is_under_bearbang() {
        let path = FileKeyValueStore::default_path();
        assert!(path.to_string_lossy().contains("bearbang"));
        assert!(path.ends_with("prefs.toml"));
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn saved_volume_loads_back(volume in 0.0f32..=1.0) {
                let store = MemoryKeyValueStore::new();
                save_volume(&store, volume).unwrap();
                prop_assert_eq!(load_volume(&store, 0.9).to_bits(), volume.to_bits());
            }

            #[test]
            fn unparsable_volume_falls_back(raw in "[xyz ]{1,12}") {
                let store = MemoryKeyValueStore::new();
                store.set(VOLUME_KEY, &raw).unwrap();
                prop_assert_eq!(load_volume(&store, 0.9).to_bits(), 0.9f32.to_bits());
            }
        }
    }
}
