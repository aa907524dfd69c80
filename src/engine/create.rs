use rayon::prelude::*;
use tracing::info;

use crate::crypto::kdf::{derive_label, LABEL_LEN};
use crate::crypto::sensitive::{MasterSecret, SensitiveVec};
use crate::entry::Entry;
use crate::error::Result;
use crate::keystore::KeyStore;
use crate::table::{bit_index, bit_of};

use super::LabelEngine;

impl LabelEngine {
    /// Build the initial label table for `value` under a fresh master secret.
    ///
    /// The secret and the unpadded length are committed to `store` only once
    /// the whole table has been produced; any prior state for `key` is
    /// replaced.
    pub fn create(&self, store: &KeyStore, key: &str, value: &[u8]) -> Result<Entry> {
        let padded = SensitiveVec::new(self.config.pad(value)?);
        let secret = MasterSecret::generate();

        let table = self.true_labels(&secret, padded.as_bytes())?;
        store.install(key, secret, value.len());

        info!(
            key = %key,
            value_len = value.len(),
            bits = self.config.bit_count(),
            "Created label table"
        );
        Ok(Entry::raw(key, table))
    }

    /// One label per bit position: the label selected by the bit itself.
    pub(crate) fn true_labels(&self, secret: &MasterSecret, padded: &[u8]) -> Result<Vec<u8>> {
        let mut table = vec![0u8; self.config.label_table_len()];
        let context = &self.config.context;
        let plan = self.plan;

        self.pool.install(|| {
            table
                .par_chunks_mut(plan.span(LABEL_LEN))
                .zip(padded.par_chunks(plan.chunk_bytes()))
                .enumerate()
                .try_for_each(|(part, (out, bytes))| -> Result<()> {
                    let start = plan.start(part);
                    for (offset, &byte) in bytes.iter().enumerate() {
                        for j in 0..8 {
                            let label =
                                derive_label(secret, context, bit_index(start + offset, j), bit_of(byte, j))?;
                            let pos = bit_index(offset, j) * LABEL_LEN;
                            out[pos..pos + LABEL_LEN].copy_from_slice(label.as_bytes());
                        }
                    }
                    Ok(())
                })
        })?;

        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use subtle::ConstantTimeEq;

    use crate::engine::test_support::{engine, reference_table};
    use crate::error::{ErrorKind, OblivError};
    use crate::keystore::KeyStore;

    #[test]
    fn test_create_table_shape() {
        let engine = engine(4, 8);
        let store = KeyStore::new();

        let entry = engine.create(&store, "k", b"AB").unwrap();

        assert_eq!(entry.key_name, "k");
        assert!(entry.encrypted_labels_b.is_none());
        assert_eq!(entry.encrypted_labels_a.len(), 32 * 32);
        assert_eq!(entry.records_a().count(), 32);
        assert!(entry.validate(engine.config()).is_ok());
    }

    #[test]
    fn test_create_matches_sequential_reference() {
        for workers in [1, 3, 8] {
            let engine = engine(20, workers);
            let store = KeyStore::new();

            let entry = engine.create(&store, "k", b"hello, labels").unwrap();
            let secret = store.get("k").unwrap();
            let padded = engine.config().pad(b"hello, labels").unwrap();

            assert_eq!(
                entry.encrypted_labels_a,
                reference_table(engine.config(), &secret, &padded),
                "workers = {workers}"
            );
        }
    }

    #[test]
    fn test_create_records_length() {
        let engine = engine(8, 2);
        let store = KeyStore::new();
        engine.create(&store, "k", b"abc").unwrap();
        assert_eq!(store.length_of("k").unwrap(), 3);
    }

    #[test]
    fn test_create_twice_replaces_secret() {
        let engine = engine(4, 2);
        let store = KeyStore::new();

        engine.create(&store, "k", b"a").unwrap();
        let first = store.get("k").unwrap();
        engine.create(&store, "k", b"bb").unwrap();
        let second = store.get("k").unwrap();

        assert!(!bool::from(first.ct_eq(&second)));
        assert_eq!(store.length_of("k").unwrap(), 2);
    }

    #[test]
    fn test_create_too_long_leaves_store_untouched() {
        let engine = engine(4, 2);
        let store = KeyStore::new();

        let err = engine.create(&store, "k", b"12345").unwrap_err();

        assert!(matches!(err, OblivError::ValueTooLong { len: 5, max: 4 }));
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(!store.contains("k"));
    }

    #[test]
    fn test_create_empty_rejected() {
        let engine = engine(4, 2);
        let store = KeyStore::new();
        assert!(matches!(
            engine.create(&store, "k", b""),
            Err(OblivError::EmptyValue)
        ));
        assert!(store.is_empty());
    }
}
