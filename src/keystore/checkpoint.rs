/// Key store checkpoints and their persistence backends.
///
/// A checkpoint is a full snapshot, loaded once when a session opens and
/// saved once when it closes. Master secrets are hex-encoded inside it and
/// wiped when the checkpoint is dropped.
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, Zeroizing};

use crate::error::{OblivError, Result};

pub const CHECKPOINT_VERSION: u32 = 1;

/// Serialized key store state.
#[derive(Serialize, Deserialize)]
pub struct Checkpoint {
    /// Format version.
    pub version: u32,
    /// Every logical key present in the store.
    pub key_set: BTreeSet<String>,
    /// Recorded (unpadded) value length per key.
    pub value_sizes: BTreeMap<String, usize>,
    /// Master secret per key (hex-encoded).
    pub master_keys: BTreeMap<String, String>,
}

impl Checkpoint {
    pub fn new() -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            key_set: BTreeSet::new(),
            value_sizes: BTreeMap::new(),
            master_keys: BTreeMap::new(),
        }
    }

    pub fn to_bytes(&self) -> Result<Zeroizing<Vec<u8>>> {
        serde_json::to_vec(self)
            .map(Zeroizing::new)
            .map_err(|e| OblivError::Serialization(e.to_string()))
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let checkpoint: Self =
            serde_json::from_slice(data).map_err(|e| OblivError::Serialization(e.to_string()))?;
        if checkpoint.version != CHECKPOINT_VERSION {
            return Err(OblivError::Checkpoint(format!(
                "Unsupported checkpoint version: {}",
                checkpoint.version
            )));
        }
        Ok(checkpoint)
    }
}

impl Default for Checkpoint {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Checkpoint {
    fn drop(&mut self) {
        for secret in self.master_keys.values_mut() {
            secret.zeroize();
        }
    }
}

/// Blob store holding the checkpoint between process runs.
pub trait CheckpointStore: Send + Sync {
    /// Human-readable backend name for logs.
    fn name(&self) -> &str;

    /// Load the stored checkpoint, `None` if nothing has been saved yet.
    fn load(&self) -> Result<Option<Checkpoint>>;

    /// Replace the stored checkpoint.
    fn save(&self, checkpoint: &Checkpoint) -> Result<()>;
}

/// JSON file backend. Saves go through a sibling temp file and a rename, so
/// an interrupted save leaves the previous checkpoint intact.
pub struct FileCheckpointStore {
    path: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn name(&self) -> &str {
        "file"
    }

    fn load(&self) -> Result<Option<Checkpoint>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let data = Zeroizing::new(fs::read(&self.path)?);
        Checkpoint::from_bytes(&data).map(Some)
    }

    fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        let data = checkpoint.to_bytes()?;
        let tmp = self.temp_path();

        // A leftover temp file would keep its old mode.
        match fs::remove_file(&tmp) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e.into()),
            _ => {}
        }

        let mut file = owner_only().open(&tmp)?;
        file.write_all(&data[..])?;
        file.sync_all()?;
        drop(file);

        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// Checkpoints hold plaintext secrets: readable and writable by the owner only.
fn owner_only() -> OpenOptions {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options
}

/// In-process backend, used by tests and embedders without a filesystem.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    blob: Mutex<Option<Zeroizing<Vec<u8>>>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn load(&self) -> Result<Option<Checkpoint>> {
        match self.blob.lock().as_ref() {
            Some(data) => Checkpoint::from_bytes(data).map(Some),
            None => Ok(None),
        }
    }

    fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        let data = checkpoint.to_bytes()?;
        *self.blob.lock() = Some(data);
        Ok(())
    }
}
