//! Parser source persistence and the binding manifest.

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use framegate_engine::{Engine, ExecError};
use framegate_types::{ProtocolId, Record, Signature};

use crate::fsutil::atomic_write;
use crate::sanitize::extract_signature;

/// Extension of parser source files in storage and seeds.
pub const SOURCE_EXT: &str = "dyn";

const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("no parser registered for {0}")]
    UnknownParser(ProtocolId),

    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error("persistence failure: {0}")]
    Persistence(#[from] io::Error),

    #[error("malformed manifest: {0}")]
    Manifest(#[from] serde_json::Error),
}

/// On-disk record of the dispatcher's binding set.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Manifest {
    bindings: BTreeMap<String, ProtocolId>,
}

/// Owns parser source persistence: the storage directory, the in-memory
/// source cache, and the binding manifest. Registration is the single write
/// path and keeps the engine's compiled cache coherent.
pub struct Manager {
    engine: Arc<Engine>,
    storage_dir: PathBuf,
    seed_dir: Option<PathBuf>,
    cache: RwLock<HashMap<ProtocolId, String>>,
}

impl Manager {
    /// Create a manager over `storage_dir`, creating the directory if
    /// needed. `seed_dir` is an optional read-only directory of starter
    /// parsers.
    pub fn new(
        engine: Arc<Engine>,
        storage_dir: impl Into<PathBuf>,
        seed_dir: Option<PathBuf>,
    ) -> io::Result<Self> {
        let storage_dir = storage_dir.into();
        std::fs::create_dir_all(&storage_dir)?;
        Ok(Self {
            engine,
            storage_dir,
            seed_dir,
            cache: RwLock::new(HashMap::new()),
        })
    }

    #[must_use]
    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    #[must_use]
    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    fn source_path(&self, protocol: &ProtocolId) -> PathBuf {
        self.storage_dir
            .join(format!("{}.{SOURCE_EXT}", protocol.as_str()))
    }

    /// Copy seed parsers into storage unless a same-named file already
    /// exists; storage always wins. Returns how many files were seeded.
    pub fn seed_parsers(&self) -> io::Result<usize> {
        let Some(seed_dir) = &self.seed_dir else {
            return Ok(0);
        };
        let entries = match std::fs::read_dir(seed_dir) {
            Ok(entries) => entries,
            // a missing seed directory is not an error
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };
        let mut seeded = 0;
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(SOURCE_EXT) {
                continue;
            }
            let Some(name) = path.file_name() else {
                continue;
            };
            let dest = self.storage_dir.join(name);
            if dest.exists() {
                continue;
            }
            std::fs::copy(&path, &dest)?;
            tracing::info!(parser = %name.to_string_lossy(), "seeded parser");
            seeded += 1;
        }
        Ok(seeded)
    }

    /// Load every parser source from storage into the cache.
    ///
    /// Returns the signature bindings declared in `// Signature:` comments;
    /// sources without a declaration load fine but must be bound from the
    /// manifest instead.
    pub fn load_saved_parsers(&self) -> io::Result<HashMap<ProtocolId, Signature>> {
        let mut bindings = HashMap::new();
        let mut cache = self.write_cache();
        for entry in std::fs::read_dir(&self.storage_dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(SOURCE_EXT) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let protocol = match ProtocolId::new(stem) {
                Ok(id) => id,
                Err(e) => {
                    tracing::warn!(file = %path.display(), "skipping parser with bad name: {e}");
                    continue;
                }
            };
            let source = std::fs::read_to_string(&path)?;
            if let Some(signature) = extract_signature(&source) {
                bindings.insert(protocol.clone(), signature);
            }
            tracing::info!(protocol = %protocol, "loaded cached parser");
            cache.insert(protocol, source);
        }
        Ok(bindings)
    }

    /// Persist `source` for `protocol` and make it current: atomic write to
    /// storage, source cache update, compiled cache invalidation. On a
    /// persistence failure the in-memory state is left untouched.
    pub fn register_parser(&self, protocol: &ProtocolId, source: &str) -> Result<(), ManagerError> {
        atomic_write(&self.source_path(protocol), source.as_bytes())?;
        self.write_cache()
            .insert(protocol.clone(), source.to_string());
        self.engine.clear_cache(protocol.as_str());
        tracing::debug!(protocol = %protocol, bytes = source.len(), "registered parser");
        Ok(())
    }

    /// The cached source for `protocol`, if any.
    #[must_use]
    pub fn get_parser_code(&self, protocol: &ProtocolId) -> Option<String> {
        self.read_cache().get(protocol).cloned()
    }

    /// Run the cached parser for `protocol` over `frame`.
    pub fn parse_data(&self, protocol: &ProtocolId, frame: &[u8]) -> Result<Record, ManagerError> {
        let source = self
            .read_cache()
            .get(protocol)
            .cloned()
            .ok_or_else(|| ManagerError::UnknownParser(protocol.clone()))?;
        Ok(self.engine.execute(protocol.as_str(), frame, &source)?)
    }

    /// Write the binding set to `manifest.json`, atomically and in full.
    pub fn save_manifest(
        &self,
        bindings: &BTreeMap<String, ProtocolId>,
    ) -> Result<(), ManagerError> {
        let manifest = Manifest {
            bindings: bindings.clone(),
        };
        let json = serde_json::to_vec_pretty(&manifest)?;
        atomic_write(&self.storage_dir.join(MANIFEST_FILE), &json)?;
        Ok(())
    }

    /// Read the manifest; a missing file is an empty binding set.
    pub fn load_manifest(&self) -> Result<BTreeMap<String, ProtocolId>, ManagerError> {
        let path = self.storage_dir.join(MANIFEST_FILE);
        let json = match std::fs::read(&path) {
            Ok(json) => json,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(e.into()),
        };
        let manifest: Manifest = serde_json::from_slice(&json)?;
        Ok(manifest.bindings)
    }

    fn read_cache(&self) -> RwLockReadGuard<'_, HashMap<ProtocolId, String>> {
        self.cache.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_cache(&self) -> RwLockWriteGuard<'_, HashMap<ProtocolId, String>> {
        self.cache.write().unwrap_or_else(|e| e.into_inner())
    }
}
