use crate::config::atomic_rename;
use crate::model::Pet;
use anyhow::{bail, Context, Result};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::{fs, io, path::PathBuf};

pub const PET_KEY: &str = "aether_pet";
pub const DESCRIPTION_KEY: &str = "aether_prompt";

/// Durable string key-value store. Writes must be whole-value replacements.
pub trait KeyValueStore: Send {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&mut self, key: &str, value: &str) -> Result<()>;
    /// Removing a missing key is not an error.
    fn remove(&mut self, key: &str) -> Result<()>;
}

/// One file per key under `dir`, replaced via tmp-file + rename.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
            bail!("invalid storage key {key:?}");
        }
        Ok(self.dir.join(format!("{key}.json")))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key)?;
        match fs::read_to_string(&path) {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
        }
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let path = self.path_for(key)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value).with_context(|| format!("writing {}", tmp.display()))?;
        atomic_rename(&tmp, &path)
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("removing {}", path.display())),
        }
    }
}

/// In-memory store. Clones share the same map, so a test can keep a handle
/// and inspect what the controller persisted.
#[derive(Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<BTreeMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raw(&self, key: &str) -> Option<String> {
        self.entries.lock().get(key).cloned()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.raw(key))
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

/// Typed view over the two logical keys.
pub struct PetStore<S> {
    kv: S,
}

impl<S: KeyValueStore> PetStore<S> {
    pub fn new(kv: S) -> Self {
        Self { kv }
    }

    pub fn load_pet(&self) -> Result<Option<Pet>> {
        let Some(raw) = self.kv.get(PET_KEY)? else {
            return Ok(None);
        };
        let pet = serde_json::from_str(&raw).context("decoding saved pet")?;
        Ok(Some(pet))
    }

    pub fn save_pet(&mut self, pet: &Pet) -> Result<()> {
        let data = serde_json::to_string(pet)?;
        self.kv.set(PET_KEY, &data)
    }

    pub fn load_description(&self) -> Result<Option<String>> {
        self.kv.get(DESCRIPTION_KEY)
    }

    pub fn save_description(&mut self, description: &str) -> Result<()> {
        self.kv.set(DESCRIPTION_KEY, description)
    }

    pub fn clear(&mut self) -> Result<()> {
        self.kv.remove(PET_KEY)?;
        self.kv.remove(DESCRIPTION_KEY)
    }
}
