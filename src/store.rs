use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use crate::error::StoreError;

/// group the alarms are written under, one entry per alarm keyed by its uuid
pub const ALARM_GROUP: &str = "Alarms";

/// Grouped key/value storage the alarms persist themselves into.
///
/// Writes only have to reach the backing storage on [`ConfigStore::sync`].
pub trait ConfigStore {
    fn read_entry(&self, group: &str, key: &str) -> Option<String>;
    fn write_entry(&mut self, group: &str, key: &str, value: &str);
    fn delete_entry(&mut self, group: &str, key: &str);
    /// every key and value of a group, sorted by key
    fn entries(&self, group: &str) -> Vec<(String, String)>;
    /// # Errors
    /// if the backing storage couldn't be written
    fn sync(&mut self) -> Result<(), StoreError>;
}

pub type SharedStore = Arc<Mutex<dyn ConfigStore + Send>>;

#[must_use]
pub fn shared<S: ConfigStore + Send + 'static>(store: S) -> SharedStore {
    Arc::new(Mutex::new(store))
}

type Groups = BTreeMap<String, BTreeMap<String, String>>;

fn entries_of(groups: &Groups, group: &str) -> Vec<(String, String)> {
    groups
        .get(group)
        .map(|entries| {
            entries
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        })
        .unwrap_or_default()
}

/// store that never leaves memory
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    groups: Groups,
    syncs: usize,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn sync_count(&self) -> usize {
        self.syncs
    }
}

impl ConfigStore for MemoryStore {
    fn read_entry(&self, group: &str, key: &str) -> Option<String> {
        self.groups.get(group)?.get(key).cloned()
    }

    fn write_entry(&mut self, group: &str, key: &str, value: &str) {
        self.groups
            .entry(group.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
    }

    fn delete_entry(&mut self, group: &str, key: &str) {
        if let Some(entries) = self.groups.get_mut(group) {
            entries.remove(key);
        }
    }

    fn entries(&self, group: &str) -> Vec<(String, String)> {
        entries_of(&self.groups, group)
    }

    fn sync(&mut self) -> Result<(), StoreError> {
        self.syncs += 1;
        Ok(())
    }
}

/// store backed by a toml file with a table per group
#[derive(Debug)]
pub struct TomlStore {
    path: PathBuf,
    groups: Groups,
    dirty: bool,
}

impl TomlStore {
    /// a missing file opens as an empty store, it is created on the first sync
    ///
    /// # Errors
    /// if the file exists but can't be read or parsed
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let groups = if path.exists() {
            let contents = std::fs::read_to_string(&path).map_err(|source| StoreError::Read {
                path: path.clone(),
                source,
            })?;
            toml::from_str(&contents).map_err(|source| StoreError::Parse {
                path: path.clone(),
                source,
            })?
        } else {
            Groups::new()
        };
        Ok(Self {
            path,
            groups,
            dirty: false,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigStore for TomlStore {
    fn read_entry(&self, group: &str, key: &str) -> Option<String> {
        self.groups.get(group)?.get(key).cloned()
    }

    fn write_entry(&mut self, group: &str, key: &str, value: &str) {
        self.groups
            .entry(group.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
        self.dirty = true;
    }

    fn delete_entry(&mut self, group: &str, key: &str) {
        if let Some(entries) = self.groups.get_mut(group) {
            self.dirty |= entries.remove(key).is_some();
        }
    }

    fn entries(&self, group: &str) -> Vec<(String, String)> {
        entries_of(&self.groups, group)
    }

    fn sync(&mut self) -> Result<(), StoreError> {
        if !self.dirty {
            return Ok(());
        }
        let contents = toml::to_string(&self.groups)?;
        let write_err = |source| StoreError::Write {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        std::fs::write(&self.path, contents).map_err(write_err)?;
        self.dirty = false;
        Ok(())
    }
}
