/// A session owns one engine and one key store, bound to a checkpoint
/// backend: the store is loaded when the session opens and saved when it
/// closes.
use tracing::info;

use crate::config::ProtocolConfig;
use crate::engine::LabelEngine;
use crate::entry::Entry;
use crate::error::Result;
use crate::keystore::{CheckpointStore, KeyStore};

pub struct Session {
    engine: LabelEngine,
    store: KeyStore,
    backend: Box<dyn CheckpointStore>,
}

impl Session {
    /// Build the engine and load the backend's checkpoint, if it has one.
    pub fn open(config: ProtocolConfig, backend: Box<dyn CheckpointStore>) -> Result<Self> {
        let engine = LabelEngine::new(config)?;
        let value_size = engine.config().value_size;
        let store = match backend.load()? {
            Some(checkpoint) => KeyStore::from_checkpoint(&checkpoint, value_size)?,
            None => KeyStore::with_value_size(value_size),
        };

        info!(
            backend = backend.name(),
            keys = store.len(),
            value_size = engine.config().value_size,
            workers = engine.config().workers,
            "Session opened"
        );
        Ok(Self {
            engine,
            store,
            backend,
        })
    }

    /// Save a full snapshot without closing.
    pub fn checkpoint(&self) -> Result<()> {
        let checkpoint = self.store.save();
        self.backend.save(&checkpoint)?;
        info!(backend = self.backend.name(), keys = checkpoint.key_set.len(), "Checkpoint saved");
        Ok(())
    }

    pub fn close(self) -> Result<()> {
        self.checkpoint()?;
        info!(backend = self.backend.name(), "Session closed");
        Ok(())
    }

    pub fn engine(&self) -> &LabelEngine {
        &self.engine
    }

    pub fn store(&self) -> &KeyStore {
        &self.store
    }

    pub fn create(&self, key: &str, value: &[u8]) -> Result<Entry> {
        self.engine.create(&self.store, key, value)
    }

    pub fn get(&self, key: &str) -> Result<Entry> {
        self.engine.get(&self.store, key)
    }

    pub fn put(&self, key: &str, value: &[u8]) -> Result<Entry> {
        self.engine.put(&self.store, key, value)
    }

    pub fn decode(&self, key: &str, labels: &[u8]) -> Result<Vec<u8>> {
        self.engine.decode(&self.store, key, labels)
    }

    pub fn resolve(&self, prior: &[u8], entry: &Entry) -> Result<Vec<u8>> {
        self.engine.resolve(prior, entry)
    }
}
