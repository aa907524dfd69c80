/// Process-wide key store: logical key → master secret and recorded length.
///
/// Each key has its own lock. Get and Put hold it across the whole
/// read-old-secret, compute, commit-new-secret sequence, so two rotations of
/// the same key never interleave; different keys never contend beyond the
/// brief map lookup.
pub mod checkpoint;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::config::{check_value_len, DEFAULT_VALUE_SIZE};
use crate::crypto::sensitive::MasterSecret;
use crate::error::{OblivError, Result};

pub use checkpoint::{
    Checkpoint, CheckpointStore, FileCheckpointStore, MemoryCheckpointStore, CHECKPOINT_VERSION,
};

/// Current-epoch state of one key.
#[derive(Debug)]
pub struct KeyState {
    pub secret: MasterSecret,
    /// Unpadded value length, `None` until recorded.
    pub value_len: Option<usize>,
}

type Slot = Arc<Mutex<KeyState>>;

pub struct KeyStore {
    slots: RwLock<HashMap<String, Slot>>,
    /// Upper bound for recorded lengths.
    value_size: usize,
}

impl Default for KeyStore {
    fn default() -> Self {
        Self::with_value_size(DEFAULT_VALUE_SIZE)
    }
}

impl KeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty store whose recorded lengths are bounded by `value_size`.
    pub fn with_value_size(value_size: usize) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            value_size,
        }
    }

    /// Build a store bounded by `value_size` from a checkpoint.
    pub fn from_checkpoint(checkpoint: &Checkpoint, value_size: usize) -> Result<Self> {
        let store = Self::with_value_size(value_size);
        store.load(checkpoint)?;
        Ok(store)
    }

    pub fn value_size(&self) -> usize {
        self.value_size
    }

    /// Replace all in-memory state with `checkpoint`.
    ///
    /// The checkpoint is fully validated first; on error the current state
    /// is left untouched.
    pub fn load(&self, checkpoint: &Checkpoint) -> Result<()> {
        let mut slots = HashMap::with_capacity(checkpoint.key_set.len());

        for key in &checkpoint.key_set {
            let encoded = checkpoint.master_keys.get(key).ok_or_else(|| {
                OblivError::Checkpoint(format!("Key {key} has no master secret"))
            })?;
            let raw = Zeroizing::new(hex::decode(encoded).map_err(|_| {
                OblivError::Checkpoint(format!("Master secret for key {key} is not valid hex"))
            })?);
            let secret = MasterSecret::from_slice(&raw).ok_or_else(|| {
                OblivError::Checkpoint(format!("Master secret for key {key} has wrong length"))
            })?;
            let value_len = checkpoint.value_sizes.get(key).copied();
            if let Some(len) = value_len {
                check_value_len(len, self.value_size).map_err(|_| {
                    OblivError::Checkpoint(format!(
                        "Recorded length {len} for key {key} is outside 1..={}",
                        self.value_size
                    ))
                })?;
            }

            slots.insert(
                key.clone(),
                Arc::new(Mutex::new(KeyState { secret, value_len })),
            );
        }

        if let Some(orphan) = checkpoint
            .master_keys
            .keys()
            .find(|k| !checkpoint.key_set.contains(*k))
        {
            warn!(key = %orphan, "Checkpoint holds a secret for a key outside its key set");
            return Err(OblivError::Checkpoint(format!(
                "Master secret for unknown key {orphan}"
            )));
        }
        if let Some(orphan) = checkpoint
            .value_sizes
            .keys()
            .find(|k| !checkpoint.key_set.contains(*k))
        {
            warn!(key = %orphan, "Checkpoint holds a length for a key outside its key set");
            return Err(OblivError::Checkpoint(format!(
                "Recorded length for unknown key {orphan}"
            )));
        }

        debug!(keys = slots.len(), "Key store loaded");
        *self.slots.write() = slots;
        Ok(())
    }

    /// Full snapshot of the store.
    pub fn save(&self) -> Checkpoint {
        let slots = self.slots.read();
        let mut checkpoint = Checkpoint::new();

        for (key, slot) in slots.iter() {
            let state = slot.lock();
            checkpoint.key_set.insert(key.clone());
            checkpoint
                .master_keys
                .insert(key.clone(), hex::encode(state.secret.as_bytes()));
            if let Some(len) = state.value_len {
                checkpoint.value_sizes.insert(key.clone(), len);
            }
        }

        checkpoint
    }

    /// Copy of the current secret for `key`.
    pub fn get(&self, key: &str) -> Option<MasterSecret> {
        self.slot(key).map(|slot| slot.lock().secret.clone())
    }

    /// Set the secret for `key`, creating the key if needed. A new key has no
    /// recorded length.
    pub fn put(&self, key: &str, secret: MasterSecret) {
        let fresh = KeyState {
            secret,
            value_len: None,
        };
        self.upsert(key, fresh, |state, fresh| state.secret = fresh.secret);
    }

    /// Set `key`'s secret and recorded length together. The length is not
    /// checked here; callers pass a length they already validated.
    pub fn install(&self, key: &str, secret: MasterSecret, value_len: usize) {
        let fresh = KeyState {
            secret,
            value_len: Some(value_len),
        };
        self.upsert(key, fresh, |state, fresh| *state = fresh);
    }

    /// Record the unpadded length of `key`'s value; `len` must be in
    /// `1..=value_size`.
    pub fn record_length(&self, key: &str, len: usize) -> Result<()> {
        check_value_len(len, self.value_size)?;
        let slot = self
            .slot(key)
            .ok_or_else(|| OblivError::KeyNotFound(key.to_string()))?;
        slot.lock().value_len = Some(len);
        Ok(())
    }

    pub fn length_of(&self, key: &str) -> Result<usize> {
        let slot = self
            .slot(key)
            .ok_or_else(|| OblivError::KeyNotFound(key.to_string()))?;
        let len = slot.lock().value_len;
        len.ok_or_else(|| OblivError::LengthUnknown(key.to_string()))
    }

    /// Run `f` with `key`'s state locked. Other operations on the same key
    /// block until `f` returns.
    pub fn with_key<T>(&self, key: &str, f: impl FnOnce(&mut KeyState) -> Result<T>) -> Result<T> {
        let slot = self
            .slot(key)
            .ok_or_else(|| OblivError::KeyNotFound(key.to_string()))?;
        let mut state = slot.lock();
        f(&mut *state)
    }

    pub fn remove(&self, key: &str) -> bool {
        self.slots.write().remove(key).is_some()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.slots.read().contains_key(key)
    }

    /// All keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.slots.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.read().is_empty()
    }

    fn slot(&self, key: &str) -> Option<Slot> {
        self.slots.read().get(key).cloned()
    }

    /// Insert `fresh` for a new key, otherwise apply `update` to the existing
    /// state. The map lock is released before the key lock is taken.
    fn upsert(&self, key: &str, fresh: KeyState, update: impl FnOnce(&mut KeyState, KeyState)) {
        let slot = match self.slot(key) {
            Some(slot) => slot,
            None => {
                let mut slots = self.slots.write();
                match slots.get(key) {
                    Some(slot) => Arc::clone(slot),
                    None => {
                        slots.insert(key.to_string(), Arc::new(Mutex::new(fresh)));
                        return;
                    }
                }
            }
        };
        let mut state = slot.lock();
        update(&mut *state, fresh);
    }
}

#[cfg(test)]
mod tests {
    use subtle::ConstantTimeEq;

    use super::*;

    fn same(a: &MasterSecret, b: &MasterSecret) -> bool {
        bool::from(a.ct_eq(b))
    }

    #[test]
    fn test_put_get() {
        let store = KeyStore::new();
        assert!(store.get("k").is_none());

        let secret = MasterSecret::new([1; 32]);
        store.put("k", secret.clone());
        assert!(same(&store.get("k").unwrap(), &secret));
        assert!(store.contains("k"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_put_replaces_secret_keeps_length() {
        let store = KeyStore::new();
        store.install("k", MasterSecret::new([1; 32]), 3);
        store.put("k", MasterSecret::new([2; 32]));
        assert!(same(&store.get("k").unwrap(), &MasterSecret::new([2; 32])));
        assert_eq!(store.length_of("k").unwrap(), 3);
    }

    #[test]
    fn test_length_bookkeeping() {
        let store = KeyStore::new();
        assert!(matches!(
            store.record_length("k", 1),
            Err(OblivError::KeyNotFound(_))
        ));

        store.put("k", MasterSecret::generate());
        assert!(matches!(store.length_of("k"), Err(OblivError::LengthUnknown(_))));

        store.record_length("k", 7).unwrap();
        assert_eq!(store.length_of("k").unwrap(), 7);
    }

    #[test]
    fn test_save_load_roundtrip() {
        let store = KeyStore::new();
        store.install("a", MasterSecret::new([0xA; 32]), 4);
        store.put("b", MasterSecret::new([0xB; 32]));

        let checkpoint = store.save();
        assert_eq!(checkpoint.key_set.len(), 2);
        assert_eq!(checkpoint.value_sizes.len(), 1);

        let restored = KeyStore::from_checkpoint(&checkpoint, 16).unwrap();
        assert_eq!(restored.keys(), vec!["a".to_string(), "b".to_string()]);
        assert!(same(&restored.get("a").unwrap(), &MasterSecret::new([0xA; 32])));
        assert_eq!(restored.length_of("a").unwrap(), 4);
        assert!(matches!(
            restored.length_of("b"),
            Err(OblivError::LengthUnknown(_))
        ));
    }

    #[test]
    fn test_load_replaces_everything() {
        let store = KeyStore::new();
        store.put("old", MasterSecret::generate());

        let mut checkpoint = Checkpoint::new();
        checkpoint.key_set.insert("new".into());
        checkpoint
            .master_keys
            .insert("new".into(), hex::encode([3u8; 32]));

        store.load(&checkpoint).unwrap();
        store.load(&checkpoint).unwrap();
        assert_eq!(store.keys(), vec!["new".to_string()]);
    }

    #[test]
    fn test_load_rejects_inconsistent_checkpoint() {
        let store = KeyStore::new();
        store.put("keep", MasterSecret::generate());

        let mut missing_secret = Checkpoint::new();
        missing_secret.key_set.insert("k".into());
        assert!(matches!(
            store.load(&missing_secret),
            Err(OblivError::Checkpoint(_))
        ));

        let mut orphan = Checkpoint::new();
        orphan.master_keys.insert("x".into(), hex::encode([1u8; 32]));
        assert!(store.load(&orphan).is_err());

        let mut short = Checkpoint::new();
        short.key_set.insert("k".into());
        short.master_keys.insert("k".into(), hex::encode([1u8; 8]));
        assert!(store.load(&short).is_err());

        assert_eq!(store.keys(), vec!["keep".to_string()]);
    }

    fn one_key(len: usize) -> Checkpoint {
        let mut checkpoint = Checkpoint::new();
        checkpoint.key_set.insert("k".into());
        checkpoint.master_keys.insert("k".into(), hex::encode([5u8; 32]));
        checkpoint.value_sizes.insert("k".into(), len);
        checkpoint
    }

    #[test]
    fn test_load_rejects_length_beyond_value_size() {
        let store = KeyStore::with_value_size(4);
        assert!(store.load(&one_key(4)).is_ok());
        assert!(matches!(store.load(&one_key(9)), Err(OblivError::Checkpoint(_))));
        assert!(matches!(
            KeyStore::from_checkpoint(&one_key(9), 4),
            Err(OblivError::Checkpoint(_))
        ));
        // The earlier valid load survives the rejected one.
        assert_eq!(store.length_of("k").unwrap(), 4);
    }

    #[test]
    fn test_load_rejects_zero_length() {
        let store = KeyStore::with_value_size(4);
        assert!(matches!(store.load(&one_key(0)), Err(OblivError::Checkpoint(_))));
        assert!(store.is_empty());
    }

    #[test]
    fn test_load_rejects_length_for_unknown_key() {
        let store = KeyStore::with_value_size(4);
        let mut checkpoint = one_key(2);
        checkpoint.value_sizes.insert("ghost".into(), 1);
        assert!(matches!(store.load(&checkpoint), Err(OblivError::Checkpoint(_))));
        assert!(store.is_empty());
    }

    #[test]
    fn test_record_length_bounds() {
        let store = KeyStore::with_value_size(4);
        store.put("k", MasterSecret::generate());

        assert!(matches!(
            store.record_length("k", 5),
            Err(OblivError::ValueTooLong { len: 5, max: 4 })
        ));
        assert!(matches!(store.record_length("k", 0), Err(OblivError::EmptyValue)));
        assert!(matches!(store.length_of("k"), Err(OblivError::LengthUnknown(_))));

        store.record_length("k", 4).unwrap();
        assert_eq!(store.length_of("k").unwrap(), 4);
    }

    #[test]
    fn test_busy_key_does_not_block_other_keys() {
        use std::sync::mpsc;
        use std::thread;

        let store = Arc::new(KeyStore::new());
        store.put("busy", MasterSecret::new([1; 32]));

        let (locked_tx, locked_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let holder = {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                store
                    .with_key("busy", |_| {
                        locked_tx.send(()).unwrap();
                        release_rx.recv().unwrap();
                        Ok(())
                    })
                    .unwrap();
            })
        };
        locked_rx.recv().unwrap();

        // Queues behind the holder on "busy".
        let writer = {
            let store = Arc::clone(&store);
            thread::spawn(move || store.install("busy", MasterSecret::new([2; 32]), 1))
        };

        store.install("idle", MasterSecret::new([3; 32]), 2);
        store.put("other", MasterSecret::new([4; 32]));
        assert_eq!(store.length_of("idle").unwrap(), 2);
        assert_eq!(store.keys(), vec!["busy", "idle", "other"]);

        release_tx.send(()).unwrap();
        holder.join().unwrap();
        writer.join().unwrap();
        assert_eq!(store.length_of("busy").unwrap(), 1);
        assert!(same(&store.get("busy").unwrap(), &MasterSecret::new([2; 32])));
    }

    #[test]
    fn test_with_key_missing() {
        let store = KeyStore::new();
        let result = store.with_key("nope", |_| Ok(()));
        assert!(matches!(result, Err(OblivError::KeyNotFound(_))));
    }

    #[test]
    fn test_remove() {
        let store = KeyStore::new();
        store.put("k", MasterSecret::generate());
        assert!(store.remove("k"));
        assert!(!store.remove("k"));
        assert!(store.is_empty());
    }
}
